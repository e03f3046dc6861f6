use event_forwarder::app;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    app::main().await
}
