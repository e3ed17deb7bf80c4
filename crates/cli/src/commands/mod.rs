// CLI subcommand dispatch.

use clap::Subcommand;
use copresence_engine::{PresenceState, Snapshot};
use serde_json::{Map, Value};

pub mod config;
pub mod demo;
pub mod join;

/// Free-form presence payload: whatever fields the user passed.
pub type Fields = Map<String, Value>;

#[derive(Subcommand)]
pub enum Command {
    /// Join the LAN presence group and watch who else is there
    Join(join::JoinArgs),
    /// Run several engines in-process and show joins, expiry and leaves
    Demo(demo::DemoArgs),
    /// Show the effective configuration
    Config(config::ConfigArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Join(args) => join::run(args),
        Command::Demo(args) => demo::run(args),
        Command::Config(args) => config::run(args),
    }
}

/// Build the Tokio runtime the async commands run on.
fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread().enable_all().build()?)
}

/// One line per participant: `identity  session-less fields`.
pub fn format_roster(snapshot: &Snapshot<Fields>) -> String {
    if snapshot.is_empty() {
        return "  (nobody else here)".into();
    }
    let mut lines = Vec::new();
    for (identity, states) in snapshot.by_identity() {
        for state in states {
            lines.push(format!("  {identity:<16} {}", format_fields(state)));
        }
    }
    lines.join("\n")
}

fn format_fields(state: &PresenceState<Fields>) -> String {
    if state.payload.is_empty() {
        return "-".into();
    }
    state
        .payload
        .iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}={text}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test fields must be an object"),
        }
    }

    fn snapshot(states: Vec<(&str, Value)>) -> Snapshot<Fields> {
        let states: Vec<PresenceState<Fields>> = states
            .into_iter()
            .map(|(identity, payload)| PresenceState {
                identity: identity.into(),
                payload: fields(payload),
            })
            .collect();
        serde_json::from_value(serde_json::to_value(&states).unwrap()).unwrap()
    }

    #[test]
    fn roster_lists_every_session() {
        let snapshot = snapshot(vec![
            ("alice", json!({ "path": "/doc/1" })),
            ("alice", json!({ "path": "/doc/2", "line": 4 })),
            ("bob", json!({})),
        ]);
        let output = format_roster(&snapshot);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("alice") && lines[0].contains("path=/doc/1"));
        assert!(lines[1].contains("line=4"));
        assert!(lines[2].contains("bob") && lines[2].ends_with('-'));
    }

    #[test]
    fn empty_roster_says_so() {
        let output = format_roster(&Snapshot::default());
        assert!(output.contains("nobody else here"));
    }
}
