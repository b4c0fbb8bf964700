use clap::Parser;

use gce_snapshot::config::CliArgs;
use gce_snapshot::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    if let Err(err) = init_logging(cli.log_format) {
        eprintln!("logging unavailable: {}", err);
    }
    if let Err(err) = gce_snapshot::run(cli).await {
        tracing::error!(error = %err, "Snapshot step failed");
        eprintln!("gce-snapshot failed: {}", err);
        std::process::exit(1);
    }
}
