pub mod api;
pub mod candidates;
pub mod error;
pub mod jobs;
pub mod session;
pub mod tabs;
pub mod transport;
pub mod urls;

#[cfg(test)]
pub(crate) mod testutil;
