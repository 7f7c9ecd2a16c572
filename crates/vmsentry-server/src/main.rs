use anyhow::Result;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use vmsentry_server::config::{RulesSeedFile, ServerConfig};
use vmsentry_server::rule_seed;
use vmsentry_server::runtime::Runtime;
use vmsentry_storage::AlertStore;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  vmsentry-server [config.toml]                          Start the alert engine");
    eprintln!("  vmsentry-server init-rules <config.toml> <seed.json>   Seed VMs, groups and alert rules");
}

#[tokio::main]
async fn main() -> Result<()> {
    vmsentry_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vmsentry=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <seed.json> argument")
            })?;
            run_init_rules(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = AlertStore::connect(&config.database.connection_url()).await?;
    let seed = RulesSeedFile::load(seed_path)?;
    let report = rule_seed::apply_seed(&store, &seed).await?;
    tracing::info!(
        created = report.rules_created,
        skipped = report.rules_skipped,
        failed = report.rules_failed,
        "init-rules completed"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        db = %config.database.redacted_url(),
        interval_secs = config.evaluation.interval_secs,
        reload_interval_secs = config.evaluation.reload_interval_secs,
        "vmsentry-server starting"
    );

    let mut runtime = Runtime::build(config).await?;
    runtime.start().await?;

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    runtime.shutdown().await;
    tracing::info!("vmsentry-server stopped");
    Ok(())
}
