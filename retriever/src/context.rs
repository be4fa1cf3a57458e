// Per-request context: cancellation signal and optional deadline

use crate::error::{Result, RetrieverError};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Fires `Cancellation`s created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

/// Read side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

impl Cancellation {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, cancel) = cancellation();
        cancel
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryContext {
    pub request_id: Uuid,
    deadline: Option<Instant>,
    cancel: Cancellation,
}

impl QueryContext {
    pub fn new(cancel: Cancellation) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            deadline: None,
            cancel,
        }
    }

    /// Context with no deadline that is never cancelled.
    pub fn background() -> Self {
        Self::new(Cancellation::never())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_optional_timeout(self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => self.with_timeout(timeout),
            None => self,
        }
    }

    /// Drives `fut` until it completes, the caller cancels, or the deadline
    /// passes. The losing branches are dropped, which aborts any in-flight
    /// HTTP request.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(RetrieverError::Cancelled);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RetrieverError::Cancelled),
            _ = deadline => Err(RetrieverError::Timeout(format!("{} exceeded request deadline", operation))),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_completed_future() {
        let ctx = QueryContext::background();
        let value = ctx.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (handle, cancel) = cancellation();
        handle.cancel();
        let ctx = QueryContext::new(cancel);
        let err = ctx.run("noop", async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, RetrieverError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_aborts_pending_call() {
        let (handle, cancel) = cancellation();
        let ctx = QueryContext::new(cancel);
        let pending = ctx.run("search", futures::future::pending::<Result<()>>());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let err = pending.await.unwrap_err();
        assert!(matches!(err, RetrieverError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_produces_timeout() {
        let ctx = QueryContext::background().with_timeout(Duration::from_secs(5));
        let err = ctx
            .run("embed", futures::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Timeout(_)));
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (handle, cancel) = cancellation();
        drop(handle);
        let ctx = QueryContext::new(cancel);
        let value = ctx.run("noop", async { Ok("ok") }).await.unwrap();
        assert_eq!(value, "ok");
    }
}
