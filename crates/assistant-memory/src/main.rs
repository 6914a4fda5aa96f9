#[cfg(feature = "cli")]
use assistant_memory::{cli::Cli, config::Config, telemetry};
#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    telemetry::init_tracing(&cfg.log_filter);

    assistant_memory::cli::run(cli, cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
