//! FIFO task queue with one worker, exponential-backoff retries and a dead-letter list.
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent_engine::event_bus::{EventBus, TaskEvent};
use crate::agent_engine::loop_control::RetryPolicy;
use crate::agent_engine::state::{Metrics, Task, TaskRequest, TaskState};
use crate::config::SchedulerConfig;
use crate::errors::{SteadyhandError, SteadyhandResult};

/// Does the actual work for one task attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task) -> SteadyhandResult<()>;
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    /// Set and cleared together with queue pops so idleness checks never race the worker.
    in_flight: AtomicBool,
    dead_letters: Mutex<Vec<Task>>,
    metrics: Mutex<Metrics>,
    active: AtomicBool,
    events: EventBus,
    policy: RetryPolicy,
    idle_poll: Duration,
    handler: Arc<dyn TaskHandler>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TaskScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl TaskScheduler {
    pub fn new(handler: Arc<dyn TaskHandler>, cfg: &SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                in_flight: AtomicBool::new(false),
                dead_letters: Mutex::new(Vec::new()),
                metrics: Mutex::new(Metrics::default()),
                active: AtomicBool::new(true),
                events: EventBus::default(),
                policy: RetryPolicy::from_config(cfg),
                idle_poll: Duration::from_millis(cfg.idle_poll_ms.max(1)),
                handler,
            }),
            worker: Mutex::new(None),
            join_timeout: Duration::from_millis(cfg.join_timeout_ms),
        }
    }

    /// Queue a click on the element named `identifier`.
    pub fn add_task(&self, identifier: impl Into<String>) -> Uuid {
        self.enqueue(Task::new(identifier))
    }

    pub fn add_request(&self, request: TaskRequest) -> Uuid {
        let identifier = request.target().to_string();
        self.enqueue(Task::from_request(identifier, request))
    }

    pub fn enqueue(&self, mut task: Task) -> Uuid {
        task.state = TaskState::Queued;
        let id = task.id;
        let identifier = task.identifier.clone();
        lock(&self.shared.queue).push_back(task);
        tracing::info!(task = %id, identifier = %identifier, "task queued");
        self.shared.events.send(TaskEvent::Queued { id, identifier });
        id
    }

    /// Spawn the worker. Calling it again while the worker runs is a no-op.
    pub fn run(&self) {
        if !self.shared.active.load(Ordering::Acquire) {
            tracing::warn!("scheduler already shut down; not starting worker");
            return;
        }
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        *worker = Some(tokio::spawn(worker_loop(self.shared.clone())));
        tracing::info!("scheduler worker started");
    }

    /// Ask the worker to stop after its in-flight task.
    pub fn shutdown(&self) {
        self.shared.active.store(false, Ordering::Release);
        tracing::info!(pending = self.pending(), "scheduler shutdown requested");
    }

    /// Join the worker, waiting at most the configured join timeout.
    /// Returns false if it had to be aborted. Call after [`Self::shutdown`].
    pub async fn wait_for_completion(&self) -> bool {
        let handle = lock(&self.worker).take();
        let Some(mut handle) = handle else {
            return true;
        };
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(timeout = ?self.join_timeout, "scheduler worker did not stop in time; aborting");
                handle.abort();
                false
            }
        }
    }

    /// Resolves once the queue is empty and no task is being worked on.
    pub async fn wait_until_idle(&self) {
        loop {
            {
                let queue = lock(&self.shared.queue);
                if queue.is_empty() && !self.shared.in_flight.load(Ordering::Acquire) {
                    return;
                }
            }
            tokio::time::sleep(self.shared.idle_poll).await;
        }
    }

    pub fn dead_letters(&self) -> Vec<Task> {
        lock(&self.shared.dead_letters).clone()
    }

    pub fn metrics(&self) -> Metrics {
        lock(&self.shared.metrics).clone()
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    while shared.active.load(Ordering::Acquire) {
        let next = {
            let mut queue = lock(&shared.queue);
            let task = queue.pop_front();
            if task.is_some() {
                shared.in_flight.store(true, Ordering::Release);
            }
            task
        };
        let Some(task) = next else {
            tokio::time::sleep(shared.idle_poll).await;
            continue;
        };

        run_task(&shared, task).await;
        {
            let _queue = lock(&shared.queue);
            shared.in_flight.store(false, Ordering::Release);
        }
    }
    tracing::info!("scheduler worker exited");
}

/// Attempt `task` until it succeeds, runs out of retries, or fails for good.
async fn run_task(shared: &Shared, mut task: Task) {
    loop {
        task.state = TaskState::Executing;
        let attempt = task.retry_count + 1;
        tracing::info!(task = %task.id, identifier = %task.identifier, attempt, "task started");
        shared.events.send(TaskEvent::Started { id: task.id, attempt });

        let started = Instant::now();
        let result = match AssertUnwindSafe(shared.handler.process(&task)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(SteadyhandError::HandlerPanic(task.identifier.clone())),
        };
        let elapsed = started.elapsed();
        lock(&shared.metrics).record_attempt(elapsed, result.is_ok());

        let err = match result {
            Ok(()) => {
                task.state = TaskState::Succeeded;
                tracing::info!(task = %task.id, elapsed_ms = elapsed.as_millis() as u64, "task succeeded");
                shared.events.send(TaskEvent::Succeeded {
                    id: task.id,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                return;
            }
            Err(e) => e,
        };
        task.last_error = Some(err.to_string());

        if err.is_recoverable() && shared.policy.allows_retry(task.retry_count) {
            task.retry_count += 1;
            let delay = shared.policy.delay_for(task.retry_count);
            task.state = TaskState::FailedRetryable;
            tracing::warn!(
                task = %task.id,
                retry = task.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "task failed; retrying"
            );
            shared.events.send(TaskEvent::Retrying {
                id: task.id,
                retry: task.retry_count,
                delay_ms: delay.as_millis() as u64,
                error: err.to_string(),
            });
            tokio::time::sleep(delay).await;
            task.state = TaskState::Queued;
            continue;
        }

        let final_error = if err.is_recoverable() {
            format!("{}: {err}", SteadyhandError::TaskExhausted(task.identifier.clone()))
        } else {
            err.to_string()
        };
        task.state = TaskState::DeadLetter;
        task.last_error = Some(final_error.clone());
        tracing::error!(
            task = %task.id,
            retries = task.retry_count,
            error = %final_error,
            "task dead-lettered"
        );
        shared.events.send(TaskEvent::DeadLettered {
            id: task.id,
            error: final_error,
        });
        lock(&shared.metrics).dead_lettered += 1;
        lock(&shared.dead_letters).push(task);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Fails each identifier a scripted number of times, then succeeds.
    #[derive(Default)]
    struct ScriptedHandler {
        failures: Mutex<HashMap<String, u32>>,
        fatal: Vec<String>,
        panics: Vec<String>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedHandler {
        fn failing(pairs: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()),
                ..Self::default()
            }
        }

        fn calls_for(&self, identifier: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == identifier)
                .map(|(_, at)| *at)
                .collect()
        }

        fn order(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
        }
    }

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        async fn process(&self, task: &Task) -> SteadyhandResult<()> {
            self.calls.lock().unwrap().push((task.identifier.clone(), Instant::now()));
            if self.panics.contains(&task.identifier) {
                panic!("handler blew up");
            }
            if self.fatal.contains(&task.identifier) {
                return Err(SteadyhandError::Config("no provider".into()));
            }
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&task.identifier) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(SteadyhandError::RegenerationExhausted {
                        attempts: 3,
                        command: "move to (1, 1)".into(),
                    })
                }
                _ => Ok(()),
            }
        }
    }

    fn cfg(retry_delay_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            max_retries: 3,
            retry_delay_ms,
            idle_poll_ms: 2,
            join_timeout_ms: 1000,
        }
    }

    async fn settle(scheduler: &TaskScheduler) {
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_until_idle())
            .await
            .expect("scheduler never went idle");
    }

    #[tokio::test]
    async fn always_failing_task_backs_off_then_dead_letters_once() {
        let handler = Arc::new(ScriptedHandler::failing(&[("broken", u32::MAX)]));
        let scheduler = TaskScheduler::new(handler.clone(), &cfg(20));
        scheduler.add_task("broken");
        scheduler.add_task("fine");
        scheduler.run();
        settle(&scheduler).await;

        let calls = handler.calls_for("broken");
        assert_eq!(calls.len(), 4);
        for (i, expected_ms) in [20u64, 40, 80].into_iter().enumerate() {
            let gap = calls[i + 1] - calls[i];
            assert!(gap >= Duration::from_millis(expected_ms), "gap {i} was {gap:?}");
        }
        assert_eq!(handler.calls_for("fine").len(), 1);

        let dead = scheduler.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].identifier, "broken");
        assert_eq!(dead[0].retry_count, 3);
        assert_eq!(dead[0].state, TaskState::DeadLetter);
        let last_error = dead[0].last_error.as_deref().unwrap();
        assert!(last_error.starts_with("Task broken exhausted all retries"));
        assert!(last_error.contains("Regeneration exhausted"));

        let m = scheduler.metrics();
        assert_eq!((m.tasks_processed, m.tasks_failed, m.dead_lettered), (1, 4, 1));

        scheduler.shutdown();
        assert!(scheduler.wait_for_completion().await);
    }

    #[tokio::test]
    async fn transient_failures_recover_without_dead_letter() {
        let handler = Arc::new(ScriptedHandler::failing(&[("flaky", 2)]));
        let scheduler = TaskScheduler::new(handler.clone(), &cfg(1));
        scheduler.add_task("flaky");
        scheduler.run();
        settle(&scheduler).await;

        assert_eq!(handler.calls_for("flaky").len(), 3);
        assert!(scheduler.dead_letters().is_empty());
        let m = scheduler.metrics();
        assert_eq!((m.tasks_processed, m.tasks_failed), (1, 2));
        scheduler.shutdown();
        scheduler.wait_for_completion().await;
    }

    #[tokio::test]
    async fn fatal_and_panicking_tasks_dead_letter_immediately() {
        let handler = Arc::new(ScriptedHandler {
            fatal: vec!["misconfigured".into()],
            panics: vec!["explodes".into()],
            ..ScriptedHandler::default()
        });
        let scheduler = TaskScheduler::new(handler.clone(), &cfg(1));
        scheduler.add_task("misconfigured");
        scheduler.add_task("explodes");
        scheduler.add_task("after");
        scheduler.run();
        settle(&scheduler).await;

        assert_eq!(handler.order(), vec!["misconfigured", "explodes", "after"]);
        let dead = scheduler.dead_letters();
        assert_eq!(dead.len(), 2);
        assert!(dead[0].last_error.as_deref().unwrap().starts_with("Configuration error"));
        assert_eq!(dead[0].retry_count, 0);
        assert_eq!(scheduler.metrics().tasks_processed, 1);
        scheduler.shutdown();
        scheduler.wait_for_completion().await;
    }

    #[tokio::test]
    async fn processes_in_fifo_order() {
        let handler = Arc::new(ScriptedHandler::default());
        let scheduler = TaskScheduler::new(handler.clone(), &cfg(1));
        for name in ["a", "b", "c"] {
            scheduler.add_task(name);
        }
        scheduler.add_request(TaskRequest::Type {
            target: "d".into(),
            text: "hello".into(),
        });
        scheduler.run();
        settle(&scheduler).await;
        assert_eq!(handler.order(), vec!["a", "b", "c", "d"]);
        scheduler.shutdown();
        scheduler.wait_for_completion().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_worker_and_leaves_the_queue() {
        let handler = Arc::new(ScriptedHandler::default());
        let scheduler = TaskScheduler::new(handler.clone(), &cfg(1));
        scheduler.run();
        scheduler.shutdown();
        assert!(scheduler.wait_for_completion().await);

        scheduler.add_task("late");
        scheduler.run();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.pending(), 1);
        assert!(handler.order().is_empty());
    }

    #[tokio::test]
    async fn events_follow_the_task_lifecycle() {
        let handler = Arc::new(ScriptedHandler::failing(&[("once", 1)]));
        let scheduler = TaskScheduler::new(handler, &cfg(1));
        let mut rx = scheduler.subscribe();
        let id = scheduler.add_task("once");
        scheduler.run();
        settle(&scheduler).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                TaskEvent::Queued { id: e, .. } => {
                    assert_eq!(e, id);
                    "queued"
                }
                TaskEvent::Started { .. } => "started",
                TaskEvent::Retrying { retry, .. } => {
                    assert_eq!(retry, 1);
                    "retrying"
                }
                TaskEvent::Succeeded { .. } => "succeeded",
                TaskEvent::DeadLettered { .. } => "dead",
            });
        }
        assert_eq!(kinds, vec!["queued", "started", "retrying", "started", "succeeded"]);
        scheduler.shutdown();
        scheduler.wait_for_completion().await;
    }
}
