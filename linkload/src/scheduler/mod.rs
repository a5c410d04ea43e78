/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-link FIFO scheduling of workloads.
//!
//! Each link has its own queue and at most one worker task.  Two executions on
//! the same link therefore never overlap, while different links proceed
//! independently.
//!
//! # Registry
//! All queues live in one map behind a `std::sync::Mutex`.  The lock is only
//! held for bookkeeping (append, peek, pop, remove) and never across an
//! `.await`.  Appending an entry and spawning the worker for an idle link
//! happen under the same lock, as do a worker finding its queue empty and
//! clearing its own handle, so an enqueue can never be stranded without a
//! worker.
//!
//! # Ordering
//! FIFO is primary.  A requested start time only delays the head of the queue;
//! later entries never overtake it even if they are due earlier.
//!
//! # Failure containment
//! Each run happens inside its own spawned task.  Errors and panics are
//! logged and the entry is popped; the worker continues with the next one.

pub mod error;
pub mod pipeline;

pub use error::SchedulerError;
pub use pipeline::{ExecutionRunner, Pipeline};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Topology;
use crate::workload::{QueuedExecution, Workload};

// ── Internal state types ──────────────────────────────────────────────────────

#[derive(Default)]
struct LinkQueue {
    pending: VecDeque<QueuedExecution>,
    /// Execution id of the head while it is running.
    in_flight: Option<String>,
    worker: Option<JoinHandle<()>>,
    /// Wakes a worker waiting on the head's start time.
    wake: Arc<Notify>,
}

struct Shared {
    queues: Mutex<HashMap<String, LinkQueue>>,
    runner: Arc<dyn ExecutionRunner>,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LinkQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of [`LinkScheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The entry was waiting and has been removed.
    Removed,
    /// The entry is executing and cannot be cancelled.
    Running,
    NotFound,
}

// ── LinkScheduler ─────────────────────────────────────────────────────────────

pub struct LinkScheduler {
    topology: Arc<Topology>,
    shared: Arc<Shared>,
}

impl LinkScheduler {
    pub fn new(topology: Arc<Topology>, runner: Arc<dyn ExecutionRunner>) -> Self {
        Self {
            topology,
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                runner,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue `workload` on its destination's link and return the execution id.
    ///
    /// Never waits for the execution itself.  Must be called from within a
    /// Tokio runtime, since it may spawn the link worker.
    ///
    /// # Errors
    /// * [`SchedulerError::UnknownDestination`] if no link contains the node.
    /// * [`SchedulerError::InvalidWorkload`] if the rate or size is malformed.
    /// * [`SchedulerError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, workload: Workload) -> Result<String, SchedulerError> {
        let link = self
            .topology
            .link_for(&workload.destination_node)
            .ok_or_else(|| SchedulerError::UnknownDestination {
                node: workload.destination_node.clone(),
            })?
            .clone();
        let execution = QueuedExecution::bind(workload, link, Utc::now())?;
        let execution_id = execution.execution_id.clone();
        let link_name = execution.link.name.clone();

        // Checked under the registry lock, which `shutdown` also holds while
        // cancelling, so an accepted entry always has a worker to await.
        let mut queues = self.shared.lock();
        if self.shared.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let queue = queues.entry(link_name.clone()).or_default();
        queue.pending.push_back(execution);
        let depth = queue.pending.len();

        if queue.worker.is_none() {
            debug!(link = %link_name, "spawning link worker");
            queue.worker = Some(tokio::spawn(link_worker(
                Arc::clone(&self.shared),
                link_name.clone(),
                Arc::clone(&queue.wake),
            )));
        }
        drop(queues);

        info!(exec_id = %execution_id, link = %link_name, depth, "workload queued");
        Ok(execution_id)
    }

    /// Remove a not-yet-started execution.
    pub fn cancel(&self, execution_id: &str) -> CancelOutcome {
        let mut queues = self.shared.lock();
        for (link, queue) in queues.iter_mut() {
            if queue.in_flight.as_deref() == Some(execution_id) {
                return CancelOutcome::Running;
            }
            if let Some(pos) = queue
                .pending
                .iter()
                .position(|e| e.execution_id == execution_id)
            {
                queue.pending.remove(pos);
                queue.wake.notify_one();
                info!(exec_id = %execution_id, link = %link, "execution cancelled");
                return CancelOutcome::Removed;
            }
        }
        CancelOutcome::NotFound
    }

    /// Entries waiting or running on `link`.
    pub fn queue_len(&self, link: &str) -> usize {
        self.shared
            .lock()
            .get(link)
            .map_or(0, |q| q.pending.len())
    }

    /// Number of links with a live worker.
    pub fn active_workers(&self) -> usize {
        self.shared
            .lock()
            .values()
            .filter(|q| q.worker.is_some())
            .count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Refuse new work, let in-flight executions finish, and wait for every
    /// worker to exit.  Entries that have not started are dropped.
    pub async fn shutdown(&self) {
        let workers: Vec<(String, JoinHandle<()>)> = {
            let mut queues = self.shared.lock();
            self.shared.shutdown.cancel();
            queues
                .iter_mut()
                .filter_map(|(link, q)| q.worker.take().map(|h| (link.clone(), h)))
                .collect()
        };

        info!(workers = workers.len(), "waiting for link workers to finish");
        for (link, handle) in workers {
            if let Err(e) = handle.await {
                error!(link = %link, "link worker failed: {e}");
            }
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

enum Next {
    Run(QueuedExecution),
    Wait { execution_id: String, delay: Duration },
    Exit,
}

/// Decide what the worker of `link` does next.  `due` names a head whose
/// start-time wait has already elapsed.
fn next_step(shared: &Shared, link: &str, due: Option<&str>) -> Next {
    let mut queues = shared.lock();
    let Some(queue) = queues.get_mut(link) else {
        return Next::Exit;
    };

    let head = match queue.pending.front() {
        Some(head) if !shared.shutdown.is_cancelled() => head,
        _ => {
            queue.worker = None;
            queue.in_flight = None;
            return Next::Exit;
        }
    };

    if due != Some(head.execution_id.as_str()) {
        if let Some(delay) = head.time_until_start(Utc::now()) {
            return Next::Wait {
                execution_id: head.execution_id.clone(),
                delay,
            };
        }
    }

    queue.in_flight = Some(head.execution_id.clone());
    Next::Run(head.clone())
}

fn finish(shared: &Shared, link: &str, execution_id: &str) {
    let mut queues = shared.lock();
    if let Some(queue) = queues.get_mut(link) {
        queue.pending.retain(|e| e.execution_id != execution_id);
        queue.in_flight = None;
    }
}

async fn link_worker(shared: Arc<Shared>, link: String, wake: Arc<Notify>) {
    debug!(link = %link, "link worker started");
    let mut due: Option<String> = None;

    loop {
        let execution = match next_step(&shared, &link, due.as_deref()) {
            Next::Exit => break,
            Next::Wait {
                execution_id,
                delay,
            } => {
                info!(
                    exec_id = %execution_id,
                    link = %link,
                    wait_s = delay.as_secs(),
                    "waiting for requested start time"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => due = Some(execution_id),
                    _ = wake.notified() => due = None,
                    _ = shared.shutdown.cancelled() => {}
                }
                continue;
            }
            Next::Run(execution) => execution,
        };
        due = None;

        let execution_id = execution.execution_id.clone();
        let runner = Arc::clone(&shared.runner);
        let outcome = tokio::spawn(async move { runner.run(&execution).await }).await;
        match outcome {
            Ok(Ok(())) => info!(exec_id = %execution_id, link = %link, "execution complete"),
            Ok(Err(e)) => warn!(exec_id = %execution_id, link = %link, "execution failed: {e}"),
            Err(e) => error!(exec_id = %execution_id, link = %link, "execution aborted: {e}"),
        }
        finish(&shared, &link, &execution_id);
    }

    debug!(link = %link, "link worker idle, exiting");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use std::sync::atomic::Ordering;

    use crate::config::NodeEndpoint;
    use crate::orchestrator::tests::{healthy, topology};
    use crate::orchestrator::{ExecutionError, Orchestrator};
    use crate::remote::{CommandOutput, NodeController, RemoteError};
    use crate::units::UnitError;
    use crate::workload::tests::workload;

    #[derive(Debug, Clone, PartialEq)]
    enum Phase {
        Start,
        End,
    }

    #[derive(Debug, Clone)]
    struct Event {
        phase: Phase,
        link: String,
        exec_id: String,
        at: Instant,
    }

    /// Takes `duration` per execution and fails or panics on request.
    struct FakeRunner {
        duration: Duration,
        events: Mutex<Vec<Event>>,
        fail: Mutex<HashSet<String>>,
        panic: Mutex<HashSet<String>>,
    }

    impl FakeRunner {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                events: Mutex::default(),
                fail: Mutex::default(),
                panic: Mutex::default(),
            })
        }

        fn record(&self, phase: Phase, e: &QueuedExecution) {
            self.events.lock().unwrap().push(Event {
                phase,
                link: e.link.name.clone(),
                exec_id: e.execution_id.clone(),
                at: Instant::now(),
            });
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn started(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter(|e| e.phase == Phase::Start)
                .map(|e| e.exec_id)
                .collect()
        }

        fn start_of(&self, exec_id: &str) -> Instant {
            self.events()
                .into_iter()
                .find(|e| e.phase == Phase::Start && e.exec_id == exec_id)
                .unwrap()
                .at
        }
    }

    #[async_trait]
    impl ExecutionRunner for FakeRunner {
        async fn run(&self, execution: &QueuedExecution) -> Result<(), ExecutionError> {
            self.record(Phase::Start, execution);
            tokio::time::sleep(self.duration).await;
            self.record(Phase::End, execution);

            if self.panic.lock().unwrap().contains(&execution.execution_id) {
                panic!("runner exploded");
            }
            if self.fail.lock().unwrap().contains(&execution.execution_id) {
                return Err(ExecutionError::UnparsableOutput {
                    output: String::new(),
                });
            }
            Ok(())
        }
    }

    fn scheduler(runner: &Arc<FakeRunner>) -> LinkScheduler {
        LinkScheduler::new(topology(), runner.clone())
    }

    /// Let paused time run until every worker has exited.
    async fn wait_idle(s: &LinkScheduler) {
        while s.active_workers() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    // ── Enqueue validation ────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_destination_is_rejected() {
        let runner = FakeRunner::new(Duration::ZERO);
        let err = scheduler(&runner)
            .enqueue(workload("node99", "1M", "1M"))
            .unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UnknownDestination {
                node: "node99".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_workload_is_rejected_before_queueing() {
        let runner = FakeRunner::new(Duration::ZERO);
        let s = scheduler(&runner);
        let err = s.enqueue(workload("node05", "fast", "1M")).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidWorkload(UnitError::InvalidFormat { .. })
        ));
        assert_eq!(s.queue_len("link1"), 0);
        assert_eq!(s.active_workers(), 0);
    }

    #[tokio::test]
    async fn out_of_range_values_are_rejected_at_enqueue() {
        let runner = FakeRunner::new(Duration::ZERO);
        let s = scheduler(&runner);
        let huge_rate = "9".repeat(400);
        for (bw, amount) in [(huge_rate.as_str(), "1M"), ("1M", "99999999999G")] {
            let err = s.enqueue(workload("node05", bw, amount)).unwrap_err();
            assert!(
                matches!(err, SchedulerError::InvalidWorkload(_)),
                "{bw} / {amount}: {err:?}"
            );
        }
        assert_eq!(s.queue_len("link1"), 0);
        assert!(runner.started().is_empty());
    }

    // ── Ordering and exclusivity ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn same_link_runs_in_fifo_order_without_overlap() {
        let runner = FakeRunner::new(Duration::from_secs(30));
        let s = scheduler(&runner);

        // Both endpoints of link1 share one queue.
        let ids: Vec<String> = ["node05", "node01", "node05"]
            .iter()
            .map(|d| s.enqueue(workload(d, "2.4M", "1M")).unwrap())
            .collect();
        assert_eq!(s.queue_len("link1"), 3);
        assert_eq!(s.active_workers(), 1);

        wait_idle(&s).await;

        assert_eq!(runner.started(), ids);
        let phases: Vec<Phase> = runner.events().into_iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            [Phase::Start, Phase::End, Phase::Start, Phase::End, Phase::Start, Phase::End]
        );
        assert_eq!(s.queue_len("link1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_links_run_concurrently() {
        let runner = FakeRunner::new(Duration::from_secs(30));
        let s = scheduler(&runner);

        s.enqueue(workload("node05", "2.4M", "1M")).unwrap();
        s.enqueue(workload("node06", "2.4M", "1M")).unwrap();
        assert_eq!(s.active_workers(), 2);

        wait_idle(&s).await;

        let events = runner.events();
        let first_end = events.iter().position(|e| e.phase == Phase::End).unwrap();
        let starts_before_first_end = events[..first_end]
            .iter()
            .filter(|e| e.phase == Phase::Start)
            .map(|e| e.link.as_str())
            .collect::<HashSet<_>>();
        assert_eq!(starts_before_first_end, HashSet::from(["link1", "link2"]));
    }

    // ── Failure containment ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn failing_and_panicking_runs_do_not_stall_the_queue() {
        let runner = FakeRunner::new(Duration::from_secs(1));
        let s = scheduler(&runner);

        let failing = s.enqueue(workload("node05", "1M", "1M")).unwrap();
        let panicking = s.enqueue(workload("node05", "1M", "1M")).unwrap();
        let healthy = s.enqueue(workload("node05", "1M", "1M")).unwrap();
        runner.fail.lock().unwrap().insert(failing.clone());
        runner.panic.lock().unwrap().insert(panicking.clone());

        wait_idle(&s).await;

        assert_eq!(runner.started(), [failing, panicking, healthy]);
        assert_eq!(s.queue_len("link1"), 0);
    }

    // ── Start times ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn future_head_delays_later_entries() {
        let runner = FakeRunner::new(Duration::from_secs(1));
        let s = scheduler(&runner);
        let t0 = Instant::now();

        let mut delayed = workload("node05", "1M", "1M");
        delayed.start_time = Some(Utc::now() + chrono::Duration::seconds(60));
        let first = s.enqueue(delayed).unwrap();
        let second = s.enqueue(workload("node01", "1M", "1M")).unwrap();

        wait_idle(&s).await;

        assert_eq!(runner.started(), [first.clone(), second.clone()]);
        assert!(runner.start_of(&first) - t0 >= Duration::from_secs(59));
        assert!(runner.start_of(&second) >= runner.start_of(&first));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_waiting_head_releases_the_queue() {
        let runner = FakeRunner::new(Duration::from_secs(1));
        let s = scheduler(&runner);
        let t0 = Instant::now();

        let mut delayed = workload("node05", "1M", "1M");
        delayed.start_time = Some(Utc::now() + chrono::Duration::hours(1));
        let waiting = s.enqueue(delayed).unwrap();
        let next = s.enqueue(workload("node05", "1M", "1M")).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(s.cancel(&waiting), CancelOutcome::Removed);
        wait_idle(&s).await;

        assert_eq!(runner.started(), [next.clone()]);
        assert!(runner.start_of(&next) - t0 < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn running_entry_cannot_be_cancelled() {
        let runner = FakeRunner::new(Duration::from_secs(30));
        let s = scheduler(&runner);

        let id = s.enqueue(workload("node05", "1M", "1M")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(s.cancel(&id), CancelOutcome::Running);
        assert_eq!(s.cancel("exec_0_00000000"), CancelOutcome::NotFound);
        wait_idle(&s).await;
        assert_eq!(runner.started(), [id]);
    }

    // ── Worker lifecycle ──────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn idle_worker_exits_and_is_respawned() {
        let runner = FakeRunner::new(Duration::from_secs(1));
        let s = scheduler(&runner);

        s.enqueue(workload("node05", "1M", "1M")).unwrap();
        wait_idle(&s).await;
        assert_eq!(s.active_workers(), 0);

        s.enqueue(workload("node05", "1M", "1M")).unwrap();
        assert_eq!(s.active_workers(), 1);
        wait_idle(&s).await;
        assert_eq!(runner.started().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_finishes_in_flight_and_refuses_new_work() {
        let runner = FakeRunner::new(Duration::from_secs(10));
        let s = scheduler(&runner);

        let running = s.enqueue(workload("node05", "1M", "1M")).unwrap();
        s.enqueue(workload("node05", "1M", "1M")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        s.shutdown().await;

        assert!(s.is_shutting_down());
        assert_eq!(runner.started(), [running]);
        assert_eq!(runner.events().len(), 2, "in-flight run completed");
        assert_eq!(
            s.enqueue(workload("node05", "1M", "1M")).unwrap_err(),
            SchedulerError::ShuttingDown
        );
    }

    // ── Teardown ordering ─────────────────────────────────────────────────────

    /// Healthy link whose first client run panics and whose server kill is
    /// slow to complete.
    #[derive(Default)]
    struct PanickyClientNodes {
        log: Mutex<Vec<String>>,
        client_runs: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl NodeController for PanickyClientNodes {
        async fn run(
            &self,
            node: &NodeEndpoint,
            command: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput, RemoteError> {
            self.log.lock().unwrap().push(command.to_string());
            if command.starts_with("iperf -c")
                && self.client_runs.fetch_add(1, Ordering::SeqCst) == 0
            {
                panic!("client transport blew up");
            }
            if command.starts_with("kill -9") {
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.log.lock().unwrap().push("kill finished".to_string());
            }
            healthy(&node.name, command)
        }
    }

    struct OrchestratorOnly(Orchestrator);

    #[async_trait]
    impl ExecutionRunner for OrchestratorOnly {
        async fn run(&self, execution: &QueuedExecution) -> Result<(), ExecutionError> {
            self.0.execute(execution).await.map(|_| ())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_teardown_completes_before_next_entry_after_client_panic() {
        let nodes = Arc::new(PanickyClientNodes::default());
        let orchestrator = Orchestrator::new(nodes.clone(), topology(), Duration::from_secs(15));
        let s = LinkScheduler::new(topology(), Arc::new(OrchestratorOnly(orchestrator)));

        s.enqueue(workload("node05", "2.4M", "1M")).unwrap();
        s.enqueue(workload("node05", "2.4M", "1M")).unwrap();
        wait_idle(&s).await;

        let log = nodes.log.lock().unwrap().clone();
        let first_kill_done = log.iter().position(|c| c == "kill finished").unwrap();
        let clients_before: usize = log[..first_kill_done]
            .iter()
            .filter(|c| c.starts_with("iperf -c"))
            .count();
        let addr_lookups_before: usize = log[..first_kill_done]
            .iter()
            .filter(|c| c.starts_with("ip addr show"))
            .count();
        assert_eq!(clients_before, 1, "{log:#?}");
        assert_eq!(addr_lookups_before, 2, "{log:#?}");
        assert_eq!(log.iter().filter(|c| *c == "kill finished").count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue_racing_shutdown_is_either_refused_or_awaited() {
        for _ in 0..200 {
            let runner = FakeRunner::new(Duration::ZERO);
            let s = Arc::new(scheduler(&runner));

            let enqueue = tokio::spawn({
                let s = Arc::clone(&s);
                async move { s.enqueue(workload("node05", "1M", "1M")) }
            });
            s.shutdown().await;
            let accepted = enqueue.await.unwrap();

            // Once both calls have returned, no worker may be left behind.
            assert!(
                accepted.is_err() || s.active_workers() == 0,
                "accepted {accepted:?} but a worker outlived shutdown"
            );
            if let Err(e) = accepted {
                assert_eq!(e, SchedulerError::ShuttingDown);
            }
        }
    }
}
