//! Utilities used in [`swerve_portmapper`][`crate`]

use tokio::task::JoinHandle;

/// A join handle that owns the task it is running, and aborts it when dropped.
#[derive(Debug)]
pub(crate) struct AbortingJoinHandle<T>(JoinHandle<T>);

impl<T> From<JoinHandle<T>> for AbortingJoinHandle<T> {
    fn from(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }
}

impl<T> AbortingJoinHandle<T> {
    /// Whether the task already ran to completion, or was aborted.
    pub(crate) fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> Drop for AbortingJoinHandle<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn drop_aborts_the_task() {
        let (tx, rx) = oneshot::channel::<()>();
        let handle = AbortingJoinHandle::from(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            tx.send(()).ok();
        }));
        assert!(!handle.is_finished());
        drop(handle);
        // the sender goes away with the aborted task
        assert!(rx.await.is_err());
    }
}
