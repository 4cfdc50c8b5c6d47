//! The worker loop.
//!
//! One iteration claims a task, runs the removal flow, downloads the
//! result, and reports back to the queue. Around that sits the
//! session-rotation and circuit-breaker state machine. The loop's
//! collaborators are traits so every branch can be exercised with
//! mocks.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::sleep;
use tracing::{error, info, warn};

use sorawm_models::{RemovalResult, Task};
use sorawm_notify::TelegramNotifier;
use sorawm_queue::{QueueResult, TaskClient};

use crate::config::WorkerConfig;
use crate::download::download_video;
use crate::error::WorkerResult;
use crate::flow::BrowserRemover;
use crate::state::WorkerState;

/// Remote task queue operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn claim(&self, product_code: &str) -> QueueResult<Option<Task>>;
    /// Terminal failure; the task is never retried.
    async fn report(&self, task_id: &str, reason: &str) -> QueueResult<()>;
    /// Retryable failure; the task returns to the pool.
    async fn reset(&self, task_id: &str) -> QueueResult<()>;
    async fn complete(&self, task_id: &str, result_url: &str) -> QueueResult<()>;
}

/// The removal flow plus its session lifecycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Remover: Send {
    /// Binary contract: `None` covers every failure cause; detail
    /// goes to logs and notifications only.
    async fn remove_watermark(&mut self, source_url: &str, task_id: &str)
        -> Option<RemovalResult>;
    async fn rotate_session(&mut self) -> WorkerResult<()>;
    async fn rebuild_session(&mut self) -> WorkerResult<()>;
    async fn shutdown(&mut self);
}

/// Result video download.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Option<PathBuf>;
}

/// Human-facing notifications, best-effort.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, text: &str);
}

#[async_trait]
impl TaskQueue for TaskClient {
    async fn claim(&self, product_code: &str) -> QueueResult<Option<Task>> {
        self.claim_task(product_code).await
    }

    async fn report(&self, task_id: &str, reason: &str) -> QueueResult<()> {
        self.report_task(task_id, reason).await
    }

    async fn reset(&self, task_id: &str) -> QueueResult<()> {
        self.reset_task(task_id).await
    }

    async fn complete(&self, task_id: &str, result_url: &str) -> QueueResult<()> {
        self.complete_task(task_id, result_url).await
    }
}

#[async_trait]
impl Remover for BrowserRemover {
    async fn remove_watermark(
        &mut self,
        source_url: &str,
        task_id: &str,
    ) -> Option<RemovalResult> {
        BrowserRemover::remove_watermark(self, source_url, Some(task_id)).await
    }

    async fn rotate_session(&mut self) -> WorkerResult<()> {
        BrowserRemover::rotate_session(self).await
    }

    async fn rebuild_session(&mut self) -> WorkerResult<()> {
        BrowserRemover::rebuild_session(self).await
    }

    async fn shutdown(&mut self) {
        BrowserRemover::shutdown(self).await
    }
}

/// Plain streaming download into the configured output directory.
pub struct HttpDownloader {
    client: Client,
    output_dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Option<PathBuf> {
        download_video(&self.client, url, &self.output_dir).await
    }
}

#[async_trait]
impl Notify for TelegramNotifier {
    async fn notify(&self, text: &str) {
        self.send_message(text).await
    }
}

/// Outcome of one claim-and-process iteration.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Queue was empty; nothing happened, no counters move.
    NoTask,
    Success,
    Error {
        message: String,
        task_id: Option<String>,
    },
}

/// The worker loop over its four collaborators.
pub struct Worker<Q, R, D, N> {
    queue: Q,
    remover: R,
    downloader: D,
    notifier: N,
    config: WorkerConfig,
    state: WorkerState,
}

impl<Q, R, D, N> Worker<Q, R, D, N>
where
    Q: TaskQueue,
    R: Remover,
    D: Downloader,
    N: Notify,
{
    pub fn new(queue: Q, remover: R, downloader: D, notifier: N, config: WorkerConfig) -> Self {
        Self {
            queue,
            remover,
            downloader,
            notifier,
            config,
            state: WorkerState::new(),
        }
    }

    /// One claim-and-process iteration.
    ///
    /// A task missing its source URL is reported as a terminal
    /// failure (malformed input will not become valid on retry);
    /// flow and download failures reset the task for another
    /// attempt. Queue call errors propagate to the caller.
    async fn process_task(&mut self) -> WorkerResult<TaskOutcome> {
        let Some(task) = self.queue.claim(&self.config.product_code).await? else {
            return Ok(TaskOutcome::NoTask);
        };
        info!(task_id = %task.id, "Claimed task");

        let Some(source_url) = task.video_url.clone() else {
            let reason = "task is missing video_url";
            warn!(task_id = %task.id, "{reason}");
            self.queue.report(&task.id, reason).await?;
            return Ok(TaskOutcome::Error {
                message: reason.to_string(),
                task_id: Some(task.id),
            });
        };

        let Some(result) = self.remover.remove_watermark(&source_url, &task.id).await else {
            self.queue.reset(&task.id).await?;
            return Ok(TaskOutcome::Error {
                message: "watermark-removal flow failed".to_string(),
                task_id: Some(task.id),
            });
        };

        if self.downloader.download(&result.media_url).await.is_none() {
            self.queue.reset(&task.id).await?;
            return Ok(TaskOutcome::Error {
                message: "result video download failed".to_string(),
                task_id: Some(task.id),
            });
        }

        self.queue.complete(&task.id, &result.media_url).await?;
        info!(task_id = %task.id, media_url = %result.media_url, "Task completed");
        Ok(TaskOutcome::Success)
    }

    /// Run iterations until the circuit breaker trips (clean return)
    /// or an error escapes a session rebuild.
    ///
    /// Empty-queue polls touch no counters. Handled tasks, success or
    /// error, count toward session rotation; iteration errors also
    /// count toward the consecutive-failure threshold. An error
    /// escaping `process_task` or the rotation relaunch is counted
    /// like a failure and forces a session rebuild, since the page
    /// may be in an unknown state.
    pub async fn run_once(&mut self) -> WorkerResult<()> {
        loop {
            match self.process_task().await {
                Ok(TaskOutcome::NoTask) => {
                    sleep(self.config.poll_interval).await;
                    continue;
                }
                Ok(TaskOutcome::Success) => {
                    self.state.record_success();
                }
                Ok(TaskOutcome::Error { message, task_id }) => {
                    let failures = self.state.record_failure();
                    error!(task_id = ?task_id, failures, "Iteration failed: {message}");
                    self.notifier
                        .notify(&format!(
                            "Task {} failed ({failures} consecutive): {message}",
                            task_id.as_deref().unwrap_or("?")
                        ))
                        .await;
                    if self.stop_if_threshold_reached(failures).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    let failures = self.state.record_failure();
                    error!(failures, "Iteration raised an error: {e}");
                    self.notifier
                        .notify(&format!("Worker iteration error ({failures} consecutive): {e}"))
                        .await;
                    if self.stop_if_threshold_reached(failures).await {
                        return Ok(());
                    }
                    self.remover.rebuild_session().await?;
                    continue;
                }
            }

            if self.state.record_task_handled() >= self.config.tasks_per_session {
                match self.remover.rotate_session().await {
                    Ok(()) => self.state.reset_session_count(),
                    Err(e) => {
                        // A session error counts like a processing
                        // error; the counter stays put so the next
                        // handled task retries rotation.
                        let failures = self.state.record_failure();
                        error!(failures, "Session rotation failed: {e}");
                        self.notifier
                            .notify(&format!(
                                "Session rotation failed ({failures} consecutive): {e}"
                            ))
                            .await;
                        if self.stop_if_threshold_reached(failures).await {
                            return Ok(());
                        }
                        self.remover.rebuild_session().await?;
                    }
                }
            }
        }
    }

    async fn stop_if_threshold_reached(&mut self, failures: u32) -> bool {
        if failures < self.config.max_consecutive_failures {
            return false;
        }
        error!(failures, "Consecutive failure threshold reached, stopping the loop");
        self.notifier
            .notify(&format!(
                "Worker stopped after {failures} consecutive failures, manual check needed"
            ))
            .await;
        self.remover.shutdown().await;
        true
    }
}

/// Build the real collaborators and run the loop once to completion.
/// The supervisor in `main` wraps this with restart backoff.
pub async fn run_worker_once(config: &WorkerConfig, notifier: &TelegramNotifier) -> WorkerResult<()> {
    let queue = TaskClient::from_env()?;
    let remover = BrowserRemover::start(config.clone(), notifier.clone()).await?;
    let downloader = HttpDownloader::new(&config.output_dir);
    let mut worker = Worker::new(queue, remover, downloader, notifier.clone(), config.clone());
    worker.run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use mockall::predicate::eq;

    use sorawm_queue::QueueError;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(1),
            ..WorkerConfig::default()
        }
    }

    fn quiet_notifier() -> MockNotify {
        let mut notifier = MockNotify::new();
        notifier.expect_notify().returning(|_| ());
        notifier
    }

    #[tokio::test]
    async fn test_success_completes_task_with_media_url() {
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .returning(|_| Ok(Some(Task::new("T1", "https://x/s_1"))));
        queue
            .expect_complete()
            .with(eq("T1"), eq("https://cdn/v1.mp4"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut remover = MockRemover::new();
        remover
            .expect_remove_watermark()
            .with(eq("https://x/s_1"), eq("T1"))
            .times(1)
            .returning(|_, _| Some(RemovalResult::new("https://cdn/v1.mp4")));

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .with(eq("https://cdn/v1.mp4"))
            .times(1)
            .returning(|_| Some(PathBuf::from("/tmp/out.mp4")));

        let mut worker = Worker::new(
            queue,
            remover,
            downloader,
            quiet_notifier(),
            fast_config(),
        );
        let outcome = worker.process_task().await.unwrap();
        assert_eq!(outcome, TaskOutcome::Success);
    }

    #[tokio::test]
    async fn test_missing_video_url_is_reported_not_reset() {
        let mut queue = MockTaskQueue::new();
        queue.expect_claim().returning(|_| {
            Ok(Some(Task {
                id: "T2".to_string(),
                video_url: None,
            }))
        });
        queue
            .expect_report()
            .with(eq("T2"), eq("task is missing video_url"))
            .times(1)
            .returning(|_, _| Ok(()));
        queue.expect_reset().times(0);

        let mut worker = Worker::new(
            queue,
            MockRemover::new(),
            MockDownloader::new(),
            quiet_notifier(),
            fast_config(),
        );
        let outcome = worker.process_task().await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Error { task_id: Some(id), .. } if id == "T2"));
    }

    #[tokio::test]
    async fn test_flow_failure_resets_task_not_report() {
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .returning(|_| Ok(Some(Task::new("T3", "https://x/s_3"))));
        queue
            .expect_reset()
            .with(eq("T3"))
            .times(1)
            .returning(|_| Ok(()));
        queue.expect_report().times(0);

        let mut remover = MockRemover::new();
        remover.expect_remove_watermark().returning(|_, _| None);

        let mut worker = Worker::new(
            queue,
            remover,
            MockDownloader::new(),
            quiet_notifier(),
            fast_config(),
        );
        let outcome = worker.process_task().await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn test_download_failure_resets_task() {
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .returning(|_| Ok(Some(Task::new("T4", "https://x/s_4"))));
        queue
            .expect_reset()
            .with(eq("T4"))
            .times(1)
            .returning(|_| Ok(()));
        queue.expect_complete().times(0);

        let mut remover = MockRemover::new();
        remover
            .expect_remove_watermark()
            .returning(|_, _| Some(RemovalResult::new("https://cdn/v4.mp4")));

        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|_| None);

        let mut worker = Worker::new(
            queue,
            remover,
            downloader,
            quiet_notifier(),
            fast_config(),
        );
        let outcome = worker.process_task().await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn test_empty_queue_touches_nothing() {
        let mut queue = MockTaskQueue::new();
        queue.expect_claim().returning(|_| Ok(None));

        let mut worker = Worker::new(
            queue,
            MockRemover::new(),
            MockDownloader::new(),
            MockNotify::new(),
            fast_config(),
        );
        let outcome = worker.process_task().await.unwrap();
        assert_eq!(outcome, TaskOutcome::NoTask);
        assert_eq!(worker.state.consecutive_failures(), 0);
        assert_eq!(worker.state.session_task_count(), 0);
    }

    #[tokio::test]
    async fn test_three_consecutive_failures_stop_the_loop() {
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .times(3)
            .returning(|_| Ok(Some(Task::new("T5", "https://x/s_5"))));
        queue.expect_reset().times(3).returning(|_| Ok(()));

        let mut remover = MockRemover::new();
        remover
            .expect_remove_watermark()
            .times(3)
            .returning(|_, _| None);
        // Failures count toward rotation: it fires after the second
        // handled task, before the threshold trips on the third.
        remover
            .expect_rotate_session()
            .times(1)
            .returning(|| Ok(()));
        remover.expect_shutdown().times(1).returning(|| ());

        let mut notifier = MockNotify::new();
        // Three per-failure notifications plus the threshold one.
        notifier.expect_notify().times(4).returning(|_| ());

        let mut worker = Worker::new(
            queue,
            remover,
            MockDownloader::new(),
            notifier,
            fast_config(),
        );
        worker.run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_success_resets_the_failure_streak() {
        // Outcomes: error, error, success, error, error, error.
        // Without the reset after the success, the loop would stop
        // two iterations earlier.
        let calls = Arc::new(AtomicUsize::new(0));

        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .times(6)
            .returning(|_| Ok(Some(Task::new("T6", "https://x/s_6"))));
        queue.expect_reset().times(5).returning(|_| Ok(()));
        queue.expect_complete().times(1).returning(|_, _| Ok(()));

        let mut remover = MockRemover::new();
        let flow_calls = calls.clone();
        remover.expect_remove_watermark().times(6).returning(move |_, _| {
            let n = flow_calls.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                Some(RemovalResult::new("https://cdn/v6.mp4"))
            } else {
                None
            }
        });
        remover.expect_rotate_session().times(2).returning(|| Ok(()));
        remover.expect_shutdown().times(1).returning(|| ());

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(1)
            .returning(|_| Some(PathBuf::from("/tmp/v6.mp4")));

        let mut notifier = MockNotify::new();
        // Five per-failure notifications plus the threshold one.
        notifier.expect_notify().times(6).returning(|_| ());

        let mut worker = Worker::new(queue, remover, downloader, notifier, fast_config());
        worker.run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_polls_never_rotate_the_session() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut queue = MockTaskQueue::new();
        let claim_calls = calls.clone();
        queue.expect_claim().times(3).returning(move |_| {
            if claim_calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Err(QueueError::config("queue went away"))
            }
        });

        let mut remover = MockRemover::new();
        remover.expect_rotate_session().times(0);
        // Exit the loop by failing the rebuild after the queue error.
        remover
            .expect_rebuild_session()
            .times(1)
            .returning(|| Err(crate::error::WorkerError::session("relaunch failed")));

        let mut notifier = MockNotify::new();
        notifier.expect_notify().times(1).returning(|_| ());

        let mut worker = Worker::new(
            queue,
            remover,
            MockDownloader::new(),
            notifier,
            fast_config(),
        );
        assert!(worker.run_once().await.is_err());
    }

    #[tokio::test]
    async fn test_rotation_failure_counts_toward_circuit_breaker() {
        // Two flow failures, then the rotation relaunch fails: that
        // third failure must trip the breaker, not escape as an
        // error that would reach the supervisor and wipe the streak.
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .times(2)
            .returning(|_| Ok(Some(Task::new("T7", "https://x/s_7"))));
        queue.expect_reset().times(2).returning(|_| Ok(()));

        let mut remover = MockRemover::new();
        remover
            .expect_remove_watermark()
            .times(2)
            .returning(|_, _| None);
        remover
            .expect_rotate_session()
            .times(1)
            .returning(|| Err(crate::error::WorkerError::session("relaunch failed")));
        remover.expect_rebuild_session().times(0);
        remover.expect_shutdown().times(1).returning(|| ());

        let mut notifier = MockNotify::new();
        // Two task failures, the rotation failure, the threshold stop.
        notifier.expect_notify().times(4).returning(|_| ());

        let mut worker = Worker::new(
            queue,
            remover,
            MockDownloader::new(),
            notifier,
            fast_config(),
        );
        worker.run_once().await.unwrap();
        assert_eq!(worker.state.consecutive_failures(), 3);
    }

    #[tokio::test]
    async fn test_rotation_failure_below_threshold_rebuilds_session() {
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .times(2)
            .returning(|_| Ok(Some(Task::new("T8", "https://x/s_8"))));
        queue.expect_complete().times(2).returning(|_, _| Ok(()));

        let mut remover = MockRemover::new();
        remover
            .expect_remove_watermark()
            .times(2)
            .returning(|_, _| Some(RemovalResult::new("https://cdn/v8.mp4")));
        remover
            .expect_rotate_session()
            .times(1)
            .returning(|| Err(crate::error::WorkerError::session("relaunch failed")));
        // Failure streak is only 1, so the loop rebuilds and carries
        // on; the failing rebuild here just ends the test.
        remover
            .expect_rebuild_session()
            .times(1)
            .returning(|| Err(crate::error::WorkerError::session("still down")));
        remover.expect_shutdown().times(0);

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(2)
            .returning(|_| Some(PathBuf::from("/tmp/v8.mp4")));

        let mut notifier = MockNotify::new();
        notifier.expect_notify().times(1).returning(|_| ());

        let mut worker = Worker::new(queue, remover, downloader, notifier, fast_config());
        assert!(worker.run_once().await.is_err());
        assert_eq!(worker.state.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_iteration_errors_rebuild_and_count_toward_threshold() {
        let mut queue = MockTaskQueue::new();
        queue
            .expect_claim()
            .times(3)
            .returning(|_| Err(QueueError::config("queue down")));

        let mut remover = MockRemover::new();
        // Rebuilt after the first two errors; the third trips the
        // threshold before any rebuild.
        remover
            .expect_rebuild_session()
            .times(2)
            .returning(|| Ok(()));
        remover.expect_rotate_session().times(0);
        remover.expect_shutdown().times(1).returning(|| ());

        let mut notifier = MockNotify::new();
        notifier.expect_notify().times(4).returning(|_| ());

        let mut worker = Worker::new(
            queue,
            remover,
            MockDownloader::new(),
            notifier,
            fast_config(),
        );
        worker.run_once().await.unwrap();
    }
}
