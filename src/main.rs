//! `sim-runner`: the `run_simulation` CLI entry point (§6).
//!
//! Loads a scenario by name from the registry, builds a [`RunConfig`], and
//! drives it to completion against a freshly bound CSMS. Exits non-zero
//! when the named scenario cannot be found or the config is otherwise
//! malformed (`ConfigError`, §7); any failure during the run itself is
//! logged and triggers cleanup, not a non-zero exit (`ScenarioError`, §7).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use cp_anomaly_sim::cli::Cli;
use cp_anomaly_sim::config::RunConfig;
use cp_anomaly_sim::scenario;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            },
        ))
        .init();

    if cli.list_scenarios {
        for s in scenario::catalog() {
            println!("{}", s.name());
        }
        return ExitCode::SUCCESS;
    }

    let config = match RunConfig::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let Some(scenario) = scenario::lookup(&config.scenario) else {
        error!(
            scenario = config.scenario.as_str(),
            "unknown scenario; run with --list-scenarios to see the registry"
        );
        return ExitCode::FAILURE;
    };
    let scenario: Arc<dyn scenario::Scenario> = Arc::from(scenario);

    match scenario::run(&config, scenario).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(scenario = config.scenario.as_str(), error = %e, "scenario run failed");
            ExitCode::SUCCESS
        }
    }
}
