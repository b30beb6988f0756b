mod cli;
mod core;
mod logging;
mod platform;

#[tokio::main]
async fn main() {
    let reason = cli::run_main().await;
    core::lifecycle::terminate(reason);
}
