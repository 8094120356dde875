//! Test utility functions for targetflow
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use targetflow::core::{PipelineRun, RunStatus};
use targetflow::execution::{PipelineInvoker, RunLauncher};
use targetflow::persistence::{InMemoryStore, RunStore, SchemaStatus, TargetStore};
use targetflow::service::{PipelineService, StatusReply};
use targetflow::transform::{InvokeError, ProcessOutput, ProcessRunner};
use tokio::sync::Notify;

/// What the mock process does when run
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Exit { code: i32, stdout: String, stderr: String },
    Timeout(u64),
    SpawnFailure(String),
}

/// Mock transformation process with a scripted outcome
#[derive(Clone)]
pub struct MockRunner {
    outcome: MockOutcome,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    calls: Arc<AtomicUsize>,
}

impl MockRunner {
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            delay: None,
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding(stdout: &str) -> Self {
        Self::new(MockOutcome::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
        .with_delay(Duration::from_millis(20))
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self::new(MockOutcome::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    pub fn timing_out(secs: u64) -> Self {
        Self::new(MockOutcome::Timeout(secs))
    }

    pub fn unspawnable(reason: &str) -> Self {
        Self::new(MockOutcome::SpawnFailure(reason.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block every run until the returned handle is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Number of times the process was started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(&self) -> Result<ProcessOutput, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.outcome {
            MockOutcome::Exit { code, stdout, stderr } => {
                Ok(ProcessOutput::new(*code, stdout.clone(), stderr.clone()))
            }
            MockOutcome::Timeout(secs) => Err(InvokeError::Timeout(*secs)),
            MockOutcome::SpawnFailure(reason) => Err(InvokeError::Spawn(reason.clone())),
        }
    }
}

/// Build a service over any store pair with a single run slot
pub fn build_service<R: ProcessRunner + 'static>(
    runner: R,
    runs: Arc<dyn RunStore>,
    targets: Arc<dyn TargetStore>,
    schema: SchemaStatus,
) -> PipelineService<R> {
    let invoker = PipelineInvoker::new(runner, runs.clone());
    PipelineService::new(runs, targets, RunLauncher::new(invoker, 1), schema)
}

/// Service over a fresh in-memory store
pub fn memory_service(runner: MockRunner) -> (PipelineService<MockRunner>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let service = build_service(runner, store.clone(), store.clone(), store.schema_status());
    (service, store)
}

/// Poll a run until it is terminal, recording every status observed
pub async fn wait_for_terminal<R: ProcessRunner + 'static>(
    service: &PipelineService<R>,
    id: i64,
) -> (PipelineRun, Vec<RunStatus>) {
    let mut seen = Vec::new();
    let polling = async {
        loop {
            match service.status(id).await {
                StatusReply::Found(run) => {
                    if seen.last() != Some(&run.status) {
                        seen.push(run.status);
                    }
                    if run.status.is_terminal() {
                        return run;
                    }
                }
                other => panic!("run {} disappeared: {:?}", id, other),
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    let run = tokio::time::timeout(Duration::from_secs(10), polling)
        .await
        .expect("run did not finish within 10s");
    (run, seen)
}

/// Wait until the launcher has no run in flight
pub async fn wait_until_idle<R: ProcessRunner + 'static>(service: &PipelineService<R>) {
    for _ in 0..1000 {
        if service.launcher().in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("launcher never became idle");
}

/// Assert a record satisfies the terminal-field invariants
pub fn assert_terminal_fields(run: &PipelineRun) {
    assert!(run.status.is_terminal(), "run {} is {}", run.id, run.status);
    assert!(run.completed_at.is_some(), "completed_at missing on run {}", run.id);
    assert!(
        run.duration_seconds.is_some(),
        "duration_seconds missing on run {}",
        run.id
    );
    if run.status == RunStatus::Failed {
        assert!(run.error.is_some(), "failed run {} has no error", run.id);
    }
}

/// Observed statuses must only ever move forward
pub fn assert_forward_sequence(seen: &[RunStatus]) {
    let rank = |status: &RunStatus| match status {
        RunStatus::Pending => 0,
        RunStatus::Running => 1,
        RunStatus::Success | RunStatus::Failed => 2,
    };
    for pair in seen.windows(2) {
        assert!(
            rank(&pair[0]) < rank(&pair[1]),
            "status sequence {:?} moves backwards",
            seen
        );
    }
}
