use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize structured logging. Stdout carries native-messaging frames,
/// so everything goes to stderr.
pub fn init() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
