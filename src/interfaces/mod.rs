pub mod dispatch;
pub mod messages;
pub mod native;
