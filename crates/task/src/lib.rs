use std::future::Future;

use async_trait::async_trait;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct ShutdownHandle(tokio::sync::watch::Sender<()>);

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (sender, receiver) = tokio::sync::watch::channel(());
        (Self(sender), ShutdownSignal(receiver))
    }

    pub fn signal(&self) {
        let _ = self.0.send(());
    }

    pub async fn all_closed(&self) {
        self.0.closed().await;
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal(tokio::sync::watch::Receiver<()>);

impl ShutdownSignal {
    pub async fn wait(&mut self) {
        let _ = self.0.changed().await;
    }
}

/// Aborts the running task when dropped.
/// Also see https://github.com/tokio-rs/tokio/issues/1830 for some background.
#[must_use]
pub struct ChildTask<T>(JoinHandle<T>);

impl<T> ChildTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        ChildTask(tokio::task::spawn(future))
    }

    pub async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }

    /// Immediately abort the task.
    pub fn abort(&self) {
        self.0.abort()
    }

    /// Drop without aborting the task.
    pub fn detach(self) {
        core::mem::forget(self);
    }
}

impl<T> From<JoinHandle<T>> for ChildTask<T> {
    fn from(value: JoinHandle<T>) -> Self {
        Self(value)
    }
}

impl<T> Drop for ChildTask<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

#[async_trait]
pub trait Task {
    type Output: Send;

    const NAME: &'static str;

    async fn run(self, shutdown_signal: ShutdownSignal) -> Self::Output;
}

pub fn spawn_task<T>(task: T, shutdown_signal: ShutdownSignal) -> ChildTask<T::Output>
where
    T: Task + 'static,
{
    let task_fut = task.run(shutdown_signal);
    let handle = spawn_task_impl(task_fut, T::NAME);
    ChildTask(handle)
}

#[cfg(not(all(feature = "named_tasks", tokio_unstable)))]
#[track_caller]
fn spawn_task_impl<T>(future: T, _name: &str) -> JoinHandle<T::Output>
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

#[cfg(all(feature = "named_tasks", tokio_unstable))]
#[track_caller]
fn spawn_task_impl<T>(future: T, name: &str) -> JoinHandle<T::Output>
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    // NOTE: enable with RUSTFLAGS="--cfg tokio_unstable" cargo check --features named_tasks
    tokio::task::Builder::new().name(name).spawn(future).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker;

    #[async_trait]
    impl Task for Ticker {
        type Output = u32;
        const NAME: &'static str = "ticker";

        async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
            let mut ticks = 0;
            loop {
                tokio::select! {
                    _ = shutdown_signal.wait() => return ticks,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {
                        ticks += 1;
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn shutdown_signal_stops_task() {
        let (handle, signal) = ShutdownHandle::new();
        let child = spawn_task(Ticker, signal);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.signal();
        let ticks = child.join().await.expect("task panicked");
        assert!(ticks > 0);
    }

    #[tokio::test]
    async fn child_task_aborts_on_drop() {
        let child = ChildTask::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            1u32
        });
        drop(child);
        // the task is aborted; nothing to assert beyond "this does not hang the test binary"
    }
}
