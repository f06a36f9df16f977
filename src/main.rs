//! `rstc`: a thin CLI wrapper over the `rstc` library's orchestrator.
use clap::Parser;
use rstc::config::{Cli, Command, Config, DownloadArgs};
use rstc::orchestrator::Orchestrator;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let Command::Download(args) = cli.command;
    let config = Config::from_cli(&args);
    let mut orchestrator = Orchestrator::new(config);

    if let Err(err) = run(&mut orchestrator, &args).await {
        tracing::error!(%err, "download failed");
        std::process::exit(1);
    }
}

async fn run(orchestrator: &mut Orchestrator, args: &DownloadArgs) -> anyhow::Result<()> {
    orchestrator.add(&args.torrent_path).await?;
    orchestrator.announce().await?;
    orchestrator.download(&args.output_path).await?;
    orchestrator.close()?;
    Ok(())
}
