use std::process::ExitCode;

use lipsync::app;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    app::run().await
}
