use anyhow::Result;

use kbc_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("kbc-daemon")?;
    kbc_daemon::server::run().await
}
