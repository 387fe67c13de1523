//! Binary entry point for the `keysweep` CLI.

use std::process;

use clap::Parser;
use thiserror::Error;

use keysweep::{
    ComputeConfig, ConfigError, GceProvider, KeySweeper, ProviderError, RemovalSet, SweepError,
    SweepSummary,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("compute client error: {0}")]
    Provider(#[from] ProviderError),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let removal = RemovalSet::from_csv(&cli.users);
    log::info!(
        "will remove keys for users: {:?}",
        removal.iter().collect::<Vec<_>>()
    );

    let config = load_config(cli.max_concurrency)?;
    let limit = config.concurrency_limit()?;
    let provider = GceProvider::from_config(&config)?;
    let sweeper = KeySweeper::new(provider, limit);

    let outcome = sweeper.sweep(&cli.project_id, &removal).await;
    Ok(report(&outcome, cli.fail_on_error))
}

fn load_config(max_concurrency: Option<usize>) -> Result<ComputeConfig, ConfigError> {
    let mut config = ComputeConfig::load_without_cli_args()?;
    if let Some(limit) = max_concurrency {
        config.max_concurrency = limit;
    }
    config.validate()?;
    Ok(config)
}

/// Logs the sweep outcome and picks the process exit status.
///
/// Failures only affect the status when `fail_on_error` is set.
fn report(outcome: &Result<SweepSummary, SweepError>, fail_on_error: bool) -> i32 {
    match outcome {
        Ok(summary) => {
            log::info!(
                "sweep complete: zones={}, zones_unlisted={}, instances_updated={}, instances_failed={}",
                summary.zones,
                summary.zones_unlisted,
                summary.instances_updated,
                summary.instances_failed
            );
            i32::from(fail_on_error && !summary.is_clean())
        }
        Err(err) => {
            log::error!("{err}");
            i32::from(fail_on_error)
        }
    }
}
