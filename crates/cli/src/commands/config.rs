// `copresence config` — show the effective configuration.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use copresence_engine::config::{global_config_path, PresenceConfig};
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Read this file instead of ~/.copresence/config.toml.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Write the defaults to the config file if it does not exist yet.
    #[arg(long)]
    init: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub path: Option<PathBuf>,
    pub exists: bool,
    pub config: PresenceConfig,
    /// Derived staleness bound, absent when the timers are invalid.
    pub stale_threshold_ms: Option<u64>,
    pub problem: Option<String>,
}

pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match build_report(args.path.or_else(global_config_path), args.init) {
        Ok(report) => {
            output::print_output(format, &report, format_human)?;
            Ok(())
        }
        Err(error) => {
            output::print_error(format, "CONFIG_ERROR", &format!("{error:#}"));
            Err(error)
        }
    }
}

fn build_report(path: Option<PathBuf>, init: bool) -> anyhow::Result<ConfigReport> {
    let exists = path.as_deref().is_some_and(|path| path.exists());
    let config = match path.as_deref() {
        Some(path) if exists => PresenceConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        _ => PresenceConfig::default(),
    };

    let mut exists = exists;
    if init && !exists {
        let target = path.as_deref().context("cannot locate a home directory for the config")?;
        config
            .save_to(target)
            .with_context(|| format!("failed to write config to {}", target.display()))?;
        exists = true;
    }

    let (stale_threshold_ms, problem) = match config.presence.engine_config() {
        Ok(engine) => (Some(engine.stale_threshold().as_millis() as u64), None),
        Err(error) => (None, Some(error.to_string())),
    };

    Ok(ConfigReport { path, exists, config, stale_threshold_ms, problem })
}

fn format_human(report: &ConfigReport) -> String {
    let mut lines = Vec::new();
    let location = match &report.path {
        Some(path) => path.display().to_string(),
        None => "(no home directory)".into(),
    };
    if report.exists {
        lines.push(format!("config: {location}"));
    } else {
        lines.push(format!("config: {location} (not found, using defaults)"));
    }

    let config = &report.config;
    lines.push(format!("identity: {}", config.identity.as_deref().unwrap_or("(unset)")));
    lines.push(format!("resend_interval_ms: {}", config.presence.resend_interval_ms));
    lines.push(format!("purge_interval_ms: {}", config.presence.purge_interval_ms));
    lines.push(format!("notify_debounce_ms: {}", config.presence.notify_debounce_ms));
    if let Some(stale) = report.stale_threshold_ms {
        lines.push(format!("stale_threshold_ms: {stale}"));
    }
    lines.push(format!(
        "multicast: {}:{}",
        config.transport.multicast_group, config.transport.port
    ));
    if let Some(problem) = &report.problem {
        lines.push(format!("problem: {problem}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reports_defaults() {
        let dir = TempDir::new().unwrap();
        let report = build_report(Some(dir.path().join("config.toml")), false).unwrap();

        assert!(!report.exists);
        assert_eq!(report.config, PresenceConfig::default());
        assert_eq!(report.stale_threshold_ms, Some(30_000));
        let output = format_human(&report);
        assert!(output.contains("not found, using defaults"));
        assert!(output.contains("multicast: 239.255.42.99:42424"));
    }

    #[test]
    fn init_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let report = build_report(Some(path.clone()), true).unwrap();
        assert!(report.exists);
        assert_eq!(PresenceConfig::load_from(&path).unwrap(), PresenceConfig::default());
    }

    #[test]
    fn invalid_timers_are_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[presence]\nresend_interval_ms = 1000\npurge_interval_ms = 9000\n")
            .unwrap();

        let report = build_report(Some(path), false).unwrap();
        assert!(report.stale_threshold_ms.is_none());
        assert!(format_human(&report).contains("problem: invalid config"));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "identity = [").unwrap();

        let error = build_report(Some(path), false).unwrap_err();
        assert!(format!("{error:#}").contains("config parse error"));
    }

    #[test]
    fn json_report_includes_effective_values() {
        let dir = TempDir::new().unwrap();
        let report = build_report(Some(dir.path().join("config.toml")), false).unwrap();
        let mut buf = Vec::new();
        output::write_output(&mut buf, OutputFormat::Json, &report, format_human).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["config"]["presence"]["resend_interval_ms"], 15_000);
        assert_eq!(parsed["config"]["transport"]["port"], 42424);
        assert_eq!(parsed["exists"], false);
    }
}
