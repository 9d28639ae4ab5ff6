mod core;
mod interfaces;
mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(e) = interfaces::native::run().await {
        tracing::error!("bridge terminated: {:#}", e);
        std::process::exit(1);
    }
}
