use clap::Parser;
use forgekit::cli::{run_cli, Cli};
use forgekit::logging::{init_logging_with_config, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _logging = init_logging_with_config(&LogConfig::from_env())?;
    run_cli(Cli::parse()).await
}
