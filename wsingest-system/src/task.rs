use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use wsingest_log::Instrument;

/// The reason a supervised task did not produce its output.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task panicked. Contains the panic message, if it was a string.
    #[error("task panicked: {0}")]
    Panic(String),
    /// The task was aborted before it completed.
    #[error("task was cancelled")]
    Cancelled,
    /// The task did not complete in time and has been aborted.
    #[error("task did not complete within {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    /// Returns `true` if the task panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }
}

impl From<JoinError> for TaskError {
    fn from(error: JoinError) -> Self {
        match error.try_into_panic() {
            Ok(payload) => Self::Panic(panic_message(payload)),
            Err(_) => Self::Cancelled,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast_ref::<&'static str>() {
            Some(message) => (*message).to_owned(),
            None => "<non-string panic payload>".to_owned(),
        },
    }
}

/// Spawns a supervised task on the current Tokio runtime.
///
/// The task runs inside a span carrying its `name`, so all logs it emits can be attributed. Unlike
/// a detached [`tokio::spawn`], the returned [`TaskHandle`] must be used to observe how the task
/// ended.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
pub fn spawn<F>(name: &'static str, future: F) -> TaskHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let span = wsingest_log::info_span!("task", name);

    TaskHandle {
        name,
        handle: tokio::spawn(future.instrument(span)),
    }
}

/// An owned handle to a task started with [`spawn`].
///
/// Dropping the handle detaches the task; it keeps running in the background.
#[must_use = "dropping a task handle detaches the task"]
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: &'static str,
    handle: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Returns the name this task was spawned with.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if the task has finished, regardless of how.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Aborts the task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the task to complete.
    pub async fn join(self) -> Result<T, TaskError> {
        self.handle.await.map_err(TaskError::from)
    }

    /// Waits for the task to complete for at most `timeout`.
    ///
    /// If the task does not finish in time, it is aborted and [`TaskError::Timeout`] is returned.
    pub async fn join_timeout(mut self, timeout: Duration) -> Result<T, TaskError> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(result) => result.map_err(TaskError::from),
            Err(_) => {
                wsingest_log::warn!(task = self.name, "task did not complete in time, aborting");
                self.handle.abort();
                Err(TaskError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_output() {
        let task = spawn("answer", async { 42 });
        assert_eq!(task.name(), "answer");
        assert_eq!(task.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_join_panic() {
        let task = spawn("panic", async {
            panic!("ingest failed");
        });

        let error = task.join().await.unwrap_err();
        assert!(error.is_panic());
        assert_eq!(error.to_string(), "task panicked: ingest failed");
    }

    #[tokio::test]
    async fn test_join_formatted_panic() {
        let task = spawn("panic", async {
            let code = 7;
            panic!("exit code {code}");
        });

        let error = task.join().await.unwrap_err();
        assert_eq!(error.to_string(), "task panicked: exit code 7");
    }

    #[tokio::test]
    async fn test_join_aborted() {
        let task = spawn("pending", std::future::pending::<()>());
        task.abort();

        let error = task.join().await.unwrap_err();
        assert!(matches!(error, TaskError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout() {
        let task = spawn("pending", std::future::pending::<()>());

        let error = task.join_timeout(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(error, TaskError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_completes() {
        let task = spawn("sleep", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            "done"
        });

        assert!(!task.is_finished());
        let output = task.join_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(output, "done");
    }
}
