//! Test doubles for the orchestrator's external collaborators.
//!
//! Servers and proxies are real `sleep` processes so kill paths are exercised;
//! liveness, cleanup and the benchmark client are scripted through a shared
//! [`World`] that records every interaction in order.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;

use pd_bench::bench::{BenchmarkClient, BenchmarkRun};
use pd_bench::config::Config;
use pd_bench::proxy::CommandProxy;
use pd_bench::server::{CleanupReport, HealthProbe, LaunchCommand, Reaper, Spawner, SystemSpawner};
use pd_bench::visualize::Visualizer;
use pd_bench::{Collaborators, OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Spawn(String),
    Reap,
    Bench(String, f64),
    Render,
}

pub struct World {
    events: Mutex<Vec<Event>>,
    port_owner: Mutex<HashMap<u16, String>>,
    probe_counts: Mutex<HashMap<String, u32>>,
    never_live: Mutex<BTreeSet<String>>,
    spawn_fails: Mutex<BTreeSet<String>>,
    exits_at_once: Mutex<BTreeSet<String>>,
    pids: Mutex<HashMap<String, u32>>,
    failing_qps: Mutex<Vec<f64>>,
    polls_until_live: u32,
}

impl World {
    /// Every process answers on its `polls_until_live`-th probe.
    pub fn new(polls_until_live: u32) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            port_owner: Mutex::new(HashMap::new()),
            probe_counts: Mutex::new(HashMap::new()),
            never_live: Mutex::new(BTreeSet::new()),
            spawn_fails: Mutex::new(BTreeSet::new()),
            exits_at_once: Mutex::new(BTreeSet::new()),
            pids: Mutex::new(HashMap::new()),
            failing_qps: Mutex::new(Vec::new()),
            polls_until_live,
        })
    }

    /// The process with this label (e.g. `producer:8100`) never answers.
    pub fn never_live(&self, label: &str) {
        self.never_live.lock().unwrap().insert(label.to_string());
    }

    /// Spawning the process with this label fails outright.
    pub fn fail_spawn(&self, label: &str) {
        self.spawn_fails.lock().unwrap().insert(label.to_string());
    }

    /// The process with this label starts but exits immediately.
    pub fn exit_at_once(&self, label: &str) {
        self.exits_at_once.lock().unwrap().insert(label.to_string());
    }

    /// Pid of the most recent process spawned under `label`.
    pub fn pid(&self, label: &str) -> Option<u32> {
        self.pids.lock().unwrap().get(label).copied()
    }

    /// The benchmark client fails at this rate.
    pub fn fail_qps(&self, qps: f64) {
        self.failing_qps.lock().unwrap().push(qps);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn probes(&self, label: &str) -> u32 {
        self.probe_counts
            .lock()
            .unwrap()
            .get(label)
            .copied()
            .unwrap_or(0)
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FakeSpawner(pub Arc<World>);

impl Spawner for FakeSpawner {
    fn spawn(&self, command: &LaunchCommand) -> Result<Child> {
        self.0.push(Event::Spawn(command.label.clone()));
        if let Some(port) = command.label.rsplit(':').next().and_then(|p| p.parse().ok()) {
            self.0
                .port_owner
                .lock()
                .unwrap()
                .insert(port, command.label.clone());
        }

        if self.0.spawn_fails.lock().unwrap().contains(&command.label) {
            return Err(OrchestratorError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let (program, args) = if self.0.exits_at_once.lock().unwrap().contains(&command.label) {
            ("true", vec![])
        } else {
            ("sleep", vec!["600".to_string()])
        };
        let stand_in = LaunchCommand {
            label: command.label.clone(),
            program: program.to_string(),
            args,
            env: Default::default(),
        };
        let child = SystemSpawner.spawn(&stand_in)?;
        if let Some(pid) = child.id() {
            self.0.pids.lock().unwrap().insert(command.label.clone(), pid);
        }
        Ok(child)
    }
}

/// Spawns the given program and arguments instead of the requested command.
pub struct ProgramSpawner(pub &'static str, pub &'static [&'static str]);

impl Spawner for ProgramSpawner {
    fn spawn(&self, command: &LaunchCommand) -> Result<Child> {
        let stand_in = LaunchCommand {
            label: command.label.clone(),
            program: self.0.to_string(),
            args: self.1.iter().map(|a| a.to_string()).collect(),
            env: Default::default(),
        };
        SystemSpawner.spawn(&stand_in)
    }
}

pub struct FakeProbe(pub Arc<World>);

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn is_live(&self, port: u16) -> bool {
        let Some(label) = self.0.port_owner.lock().unwrap().get(&port).cloned() else {
            return false;
        };
        let count = {
            let mut counts = self.0.probe_counts.lock().unwrap();
            let c = counts.entry(label.clone()).or_insert(0);
            *c += 1;
            *c
        };
        if self.0.never_live.lock().unwrap().contains(&label) {
            return false;
        }
        count >= self.0.polls_until_live
    }
}

pub struct FakeReaper(pub Arc<World>);

#[async_trait]
impl Reaper for FakeReaper {
    async fn reap(&self, _patterns: &[String], _ports: &[u16], _settle: Duration) -> CleanupReport {
        self.0.push(Event::Reap);
        self.0.port_owner.lock().unwrap().clear();
        CleanupReport::default()
    }
}

pub struct FakeClient(pub Arc<World>);

#[async_trait]
impl BenchmarkClient for FakeClient {
    async fn run(&self, run: &BenchmarkRun, _port: u16, _model: &str) -> Result<()> {
        self.0.push(Event::Bench(run.tag.clone(), run.qps));
        if self.0.failing_qps.lock().unwrap().contains(&run.qps) {
            return Err(OrchestratorError::BenchmarkClientFailure {
                qps: run.qps,
                reason: "scripted failure".to_string(),
            });
        }
        std::fs::write(&run.result_file_path, r#"{"request_throughput": 1.0}"#)?;
        Ok(())
    }
}

pub struct FakeVisualizer(pub Arc<World>);

#[async_trait]
impl Visualizer for FakeVisualizer {
    async fn render(&self, _results_dir: &Path) -> Result<()> {
        self.0.push(Event::Render);
        Ok(())
    }
}

/// Whether `pid` no longer exists (killed and reaped).
pub fn is_gone(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err()
}

pub fn collaborators(world: &Arc<World>, config: &Config) -> Collaborators {
    let spawner: Arc<dyn Spawner> = Arc::new(FakeSpawner(world.clone()));
    let probe: Arc<dyn HealthProbe> = Arc::new(FakeProbe(world.clone()));
    Collaborators {
        proxies: Arc::new(CommandProxy::new(
            spawner.clone(),
            probe.clone(),
            config.topology.clone(),
        )),
        spawner,
        probe,
        reaper: Arc::new(FakeReaper(world.clone())),
        client: Arc::new(FakeClient(world.clone())),
        visualizer: Arc::new(FakeVisualizer(world.clone())),
    }
}

/// Eight GPUs, everything rooted in `dir`.
pub fn test_config(dir: &Path) -> Config {
    let source = dir.join("sonnet.txt");
    std::fs::write(&source, "Shall I compare thee to a summer's day?\n").unwrap();

    let mut config = Config::default();
    config.gpu_count = Some(8);
    config.results_dir = dir.join("results");
    config.corpus.source = source;
    config.corpus.output = dir.join("sonnet_4x.txt");
    config.topology.host_ip = Some("127.0.0.1".to_string());
    config
}
