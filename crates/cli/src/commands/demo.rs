// `copresence demo` — several engines on an in-process hub.
//
// Peers join, one crashes without a goodbye and expires after the stale
// threshold, another leaves cleanly and disappears at once. Timers are
// shortened so the whole run takes a few seconds.

use std::time::Duration;

use clap::Args;
use copresence_engine::transport::{MemoryHub, MemoryTransport};
use copresence_engine::{EngineConfig, PresenceEngine, Snapshot};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{self, Instant};

use super::{format_roster, runtime, Fields};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Number of in-process peers.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(3..=16))]
    peers: u8,

    /// Force JSON output (one step per line).
    #[arg(long)]
    json: bool,
}

/// One observation of the first peer's snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DemoStep {
    pub elapsed_ms: u64,
    pub event: String,
    pub observer: String,
    pub participants: Snapshot<Fields>,
}

pub fn run(args: DemoArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    runtime()?.block_on(run_scenario(usize::from(args.peers), demo_config(), |step| {
        output::print_output(format, step, format_human)
    }))
}

/// Stale after 2s, swept every 250ms, notified after 100ms of quiet.
fn demo_config() -> EngineConfig {
    EngineConfig {
        resend_interval: Duration::from_secs(1),
        purge_interval: Duration::from_millis(250),
        notify_debounce: Duration::from_millis(100),
    }
}

struct Peer {
    engine: PresenceEngine<Fields>,
    transport: MemoryTransport,
}

async fn run_scenario<F>(peers: usize, config: EngineConfig, mut emit: F) -> anyhow::Result<()>
where
    F: FnMut(&DemoStep) -> std::io::Result<()>,
{
    let hub = MemoryHub::new();
    let started = Instant::now();
    let settle = config.notify_debounce * 2;

    let mut group = Vec::with_capacity(peers);
    for index in 0..peers {
        let transport = hub.transport();
        let engine = PresenceEngine::start(peer_name(index), transport.clone(), config)?;
        engine.report_local_state(fields(index))?;
        group.push(Peer { engine, transport });
    }
    let observer = &group[0].engine;
    let mut observe = |event: String| {
        emit(&DemoStep {
            elapsed_ms: started.elapsed().as_millis() as u64,
            event,
            observer: observer.identity().to_string(),
            participants: observer.watch().borrow().clone(),
        })
    };

    time::sleep(settle).await;
    observe(format!("{peers} peers joined"))?;

    let crashed = &group[peers - 1];
    crashed.transport.sever();
    time::sleep(settle).await;
    observe(format!("{} crashed without a goodbye", crashed.engine.identity()))?;

    time::sleep(config.stale_threshold() + config.purge_interval + settle).await;
    observe(format!("{} expired after going silent", crashed.engine.identity()))?;

    let leaving = &group[peers - 2].engine;
    leaving.close();
    leaving.closed().await;
    time::sleep(settle).await;
    observe(format!("{} left", leaving.identity()))?;

    for peer in &group {
        peer.engine.close();
    }
    Ok(())
}

fn peer_name(index: usize) -> String {
    format!("peer-{index}")
}

fn fields(index: usize) -> Fields {
    let mut fields = Fields::new();
    fields.insert("path".into(), Value::String(format!("/doc/{}", index % 2 + 1)));
    fields
}

fn format_human(step: &DemoStep) -> String {
    format!(
        "[{:>5}ms] {}; {} sees:\n{}",
        step.elapsed_ms,
        step.event,
        step.observer,
        format_roster(&step.participants)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identities(step: &DemoStep) -> Vec<String> {
        step.participants.iter().map(|state| state.identity.clone()).collect()
    }

    #[tokio::test]
    async fn scenario_shows_join_expiry_and_leave() {
        time::pause();
        let mut steps = Vec::new();
        run_scenario(3, demo_config(), |step| {
            steps.push(step.clone());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|step| step.observer == "peer-0"));
        assert_eq!(identities(&steps[0]), vec!["peer-1", "peer-2"]);
        // A crashed peer lingers until it misses two resends.
        assert_eq!(identities(&steps[1]), vec!["peer-1", "peer-2"]);
        assert_eq!(identities(&steps[2]), vec!["peer-1"]);
        assert!(identities(&steps[3]).is_empty());
    }

    #[test]
    fn human_step_names_the_event_and_observer() {
        let step = DemoStep {
            elapsed_ms: 200,
            event: "3 peers joined".into(),
            observer: "peer-0".into(),
            participants: Snapshot::default(),
        };
        let output = format_human(&step);
        assert!(output.starts_with("[  200ms] 3 peers joined; peer-0 sees:"));
        assert!(output.contains("nobody else here"));
    }
}
