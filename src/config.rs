//! Layered run configuration: CLI flag > environment variable > default.
//!
//! There is no TOML file layer here (unlike the teacher workspace's
//! `AppConfig::load`) because every tunable this crate exposes already has a
//! CLI flag or env var home; a config file would sit unused.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::support::errors::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Attack,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Attack => "attack",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Mode::Normal),
            "attack" => Ok(Mode::Attack),
            other => Err(SimError::Config(format!(
                "--mode must be 'normal' or 'attack', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub scenario: String,
    pub mode: Mode,
    pub duration: u32,
    pub cp_ids: Vec<String>,
    pub output: Option<PathBuf>,
    pub port: u16,
    pub verbose: bool,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> SimResult<Self> {
        let scenario = cli
            .scenario
            .clone()
            .ok_or_else(|| SimError::Config("--scenario is required".to_string()))?;
        let mode: Mode = cli.mode.parse()?;

        let cp_ids = if !cli.cp_list.is_empty() {
            cli.cp_list.clone()
        } else {
            (1..=cli.stations)
                .map(|n| format!("CP_{n:03}"))
                .collect()
        };
        if cp_ids.is_empty() {
            return Err(SimError::Config(
                "at least one charge point is required (--stations or --cp-list)".to_string(),
            ));
        }

        Ok(Self {
            scenario,
            mode,
            duration: cli.duration,
            cp_ids,
            output: cli.output.clone(),
            port: cli.port,
            verbose: cli.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            scenario: Some("dalgali_yuk".to_string()),
            mode: "normal".to_string(),
            duration: 10,
            stations: 2,
            cp_list: vec![],
            output: None,
            port: 9000,
            verbose: false,
            list_scenarios: false,
        }
    }

    #[test]
    fn stations_generates_padded_cp_ids() {
        let cfg = RunConfig::from_cli(&base_cli()).unwrap();
        assert_eq!(cfg.cp_ids, vec!["CP_001", "CP_002"]);
    }

    #[test]
    fn cp_list_overrides_stations() {
        let mut cli = base_cli();
        cli.cp_list = vec!["ALPHA".to_string()];
        let cfg = RunConfig::from_cli(&cli).unwrap();
        assert_eq!(cfg.cp_ids, vec!["ALPHA"]);
    }

    #[test]
    fn missing_scenario_is_a_config_error() {
        let mut cli = base_cli();
        cli.scenario = None;
        assert!(matches!(
            RunConfig::from_cli(&cli),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn invalid_mode_is_a_config_error() {
        let mut cli = base_cli();
        cli.mode = "chaos".to_string();
        assert!(matches!(
            RunConfig::from_cli(&cli),
            Err(SimError::Config(_))
        ));
    }
}
