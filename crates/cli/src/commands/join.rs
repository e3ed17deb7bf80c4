// `copresence join` — announce local presence on the LAN and watch peers.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use copresence_common::protocol::presence::RESERVED_FIELDS;
use copresence_engine::config::{global_config_path, PresenceConfig};
use copresence_engine::transport::UdpMulticastTransport;
use copresence_engine::{EngineStatus, PresenceEngine, Snapshot};
use serde_json::Value;
use tracing::info;

use super::{format_roster, runtime, Fields};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Identity to announce (defaults to `identity` in the config file).
    #[arg(long)]
    identity: Option<String>,

    /// Presence field as KEY=VALUE, repeatable. Values that parse as JSON
    /// are sent as JSON, anything else as a string.
    #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
    fields: Vec<(String, Value)>,

    /// Read configuration from this file instead of ~/.copresence/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force JSON output (one snapshot per line).
    #[arg(long)]
    json: bool,
}

pub fn run(args: JoinArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = prepare(args).and_then(|(identity, fields, config)| {
        runtime()?.block_on(watch_presence(identity, fields, config, format))
    });
    if let Err(error) = &result {
        output::print_error(format, "JOIN_FAILED", &format!("{error:#}"));
    }
    result
}

fn prepare(args: JoinArgs) -> anyhow::Result<(String, Fields, PresenceConfig)> {
    let config = load_config(args.config.as_deref())?;
    let identity = resolve_identity(args.identity, &config)?;
    let fields = collect_fields(args.fields)?;
    Ok((identity, fields, config))
}

async fn watch_presence(
    identity: String,
    fields: Fields,
    config: PresenceConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let engine_config = config.presence.engine_config()?;
    let group = &config.transport;
    let transport = UdpMulticastTransport::bind(group).with_context(|| {
        format!("failed to join multicast group {}:{}", group.multicast_group, group.port)
    })?;

    let engine: PresenceEngine<Fields> =
        PresenceEngine::start(identity, transport, engine_config)?;
    engine.report_local_state(fields)?;
    info!(identity = engine.identity(), session = %engine.session(), "joined presence group");

    let mut snapshots = engine.watch();
    let mut status = engine.status();
    let initial = snapshots.borrow_and_update().clone();
    output::print_output(format, &initial, format_update)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                output::print_output(format, &snapshot, format_update)?;
            }
            _ = status.wait_for(|status| !status.is_running()) => break,
        }
    }

    engine.close();
    match engine.closed().await {
        EngineStatus::Failed(reason) => anyhow::bail!("presence transport failed: {reason}"),
        _ => Ok(()),
    }
}

fn format_update(snapshot: &Snapshot<Fields>) -> String {
    format!("{} other participant(s)\n{}", snapshot.len(), format_roster(snapshot))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PresenceConfig> {
    match path {
        Some(path) => PresenceConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(PresenceConfig::load()),
    }
}

fn resolve_identity(flag: Option<String>, config: &PresenceConfig) -> anyhow::Result<String> {
    flag.or_else(|| config.identity.clone())
        .map(|identity| identity.trim().to_string())
        .filter(|identity| !identity.is_empty())
        .ok_or_else(|| {
            let path = global_config_path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "~/.copresence/config.toml".into());
            anyhow::anyhow!("no identity: pass --identity or set `identity` in {path}")
        })
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) =
        raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field key must not be empty".into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn collect_fields(pairs: Vec<(String, Value)>) -> anyhow::Result<Fields> {
    let mut fields = Fields::new();
    for (key, value) in pairs {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            anyhow::bail!("field `{key}` is reserved by the presence protocol");
        }
        fields.insert(key, value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn parse_field_keeps_plain_text_as_string() {
        assert_eq!(parse_field("path=/doc/1").unwrap(), ("path".into(), json!("/doc/1")));
    }

    #[test]
    fn parse_field_reads_json_values() {
        assert_eq!(parse_field("line=42").unwrap().1, json!(42));
        assert_eq!(parse_field("typing=true").unwrap().1, json!(true));
        assert_eq!(parse_field("cursor={\"x\":1}").unwrap().1, json!({ "x": 1 }));
    }

    #[test]
    fn parse_field_splits_on_first_equals() {
        assert_eq!(parse_field("query=a=b").unwrap(), ("query".into(), json!("a=b")));
    }

    #[test]
    fn parse_field_rejects_missing_equals_and_empty_key() {
        assert!(parse_field("path").is_err());
        assert!(parse_field(" =x").is_err());
    }

    #[test]
    fn collect_fields_rejects_reserved_keys() {
        let error = collect_fields(vec![("session".into(), json!("x"))]).unwrap_err();
        assert!(error.to_string().contains("reserved"));

        let error = collect_fields(vec![("identity".into(), json!("mallory"))]).unwrap_err();
        assert!(error.to_string().contains("`identity` is reserved"));
    }

    #[test]
    fn collect_fields_last_value_wins() {
        let fields =
            collect_fields(vec![("path".into(), json!("/a")), ("path".into(), json!("/b"))])
                .unwrap();
        assert_eq!(fields.get("path"), Some(&json!("/b")));
    }

    #[test]
    fn identity_flag_overrides_config() {
        let config = PresenceConfig { identity: Some("from-config".into()), ..Default::default() };
        assert_eq!(resolve_identity(Some("flag".into()), &config).unwrap(), "flag");
        assert_eq!(resolve_identity(None, &config).unwrap(), "from-config");
    }

    #[test]
    fn missing_identity_is_an_error() {
        let config = PresenceConfig::default();
        let error = resolve_identity(Some("   ".into()), &config).unwrap_err();
        assert!(error.to_string().contains("no identity"));
    }

    #[test]
    fn load_config_reads_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "identity = \"carol\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.identity.as_deref(), Some("carol"));
    }

    #[test]
    fn load_config_reports_bad_explicit_path() {
        let dir = TempDir::new().unwrap();
        let error = load_config(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(format!("{error:#}").contains("failed to load config"));
    }
}
