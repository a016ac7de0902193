//! Worker pool for decoding and merging shard results.
//!
//! All waits on driver futures, row decoding and merging run here rather
//! than on the caller's thread or the driver's I/O threads.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rotor_common::config::ExecutorConfig;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult};

static SHARED_POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Handle to the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Handle used to spawn tasks.
    handle: Handle,
    /// Runtime owned by this pool, if it built one.
    runtime: Mutex<Option<Runtime>>,
    /// Thread name prefix, for diagnostics.
    name: String,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            // May run inside another runtime, where a blocking shutdown panics.
            runtime.shutdown_background();
        }
    }
}

impl WorkerPool {
    /// Builds a dedicated multi-threaded runtime.
    pub fn new(config: &ExecutorConfig) -> ClientResult<Self> {
        config.validate().map_err(ClientError::Configuration)?;

        let prefix = config.thread_name.clone();
        let counter = AtomicUsize::new(0);
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name_fn(move || {
                let id = counter.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{id}")
            })
            .enable_all()
            .build()
            .map_err(|e| ClientError::Worker(format!("failed to start worker pool: {e}")))?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                handle: runtime.handle().clone(),
                runtime: Mutex::new(Some(runtime)),
                name: config.thread_name.clone(),
            }),
        })
    }

    /// Uses an existing runtime instead of building one.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                handle,
                runtime: Mutex::new(None),
                name: "external".to_string(),
            }),
        }
    }

    /// Returns the process-wide pool, building it with default settings on
    /// first use.
    pub fn shared() -> ClientResult<Self> {
        if let Some(pool) = SHARED_POOL.get() {
            return Ok(pool.clone());
        }
        let pool = Self::new(&ExecutorConfig::default())?;
        // A concurrent caller may have won the race; its pool is kept.
        Ok(SHARED_POOL.get_or_init(|| pool).clone())
    }

    /// Returns true if this pool owns its runtime.
    pub fn is_dedicated(&self) -> bool {
        self.inner.runtime.lock().is_some()
    }

    /// Returns the thread name prefix.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submits a task and returns its pending result.
    pub fn submit<T, F>(&self, task: F) -> PendingResult<T>
    where
        T: Send + 'static,
        F: Future<Output = ClientResult<T>> + Send + 'static,
    {
        PendingResult::running(self.inner.handle.spawn(task), self.clone())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("dedicated", &self.is_dedicated())
            .finish()
    }
}

/// Result of an asynchronous execution.
///
/// Resolves once every dispatched shard request completed and the results
/// were merged. Holds a handle to its pool, so a dedicated runtime outlives
/// the executor that submitted the work. Dropping it detaches the work;
/// in-flight shard requests are not cancelled.
#[must_use = "a pending result does nothing unless awaited"]
pub struct PendingResult<T> {
    state: PendingState<T>,
}

enum PendingState<T> {
    /// Already resolved, typically a setup failure.
    Ready(Option<ClientResult<T>>),
    /// Running on the worker pool, which must stay alive until it resolves.
    Running {
        handle: JoinHandle<ClientResult<T>>,
        _pool: WorkerPool,
    },
}

impl<T> PendingResult<T> {
    fn running(handle: JoinHandle<ClientResult<T>>, pool: WorkerPool) -> Self {
        Self {
            state: PendingState::Running {
                handle,
                _pool: pool,
            },
        }
    }

    /// Creates an already failed result.
    pub fn failed(error: ClientError) -> Self {
        Self {
            state: PendingState::Ready(Some(Err(error))),
        }
    }

    /// Returns true if the result is available without waiting.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            PendingState::Ready(_) => true,
            PendingState::Running { handle, .. } => handle.is_finished(),
        }
    }

    /// Blocks the calling thread until the result is available.
    ///
    /// Must not be called from inside an async task.
    pub fn wait(self) -> ClientResult<T> {
        futures::executor::block_on(self)
    }
}

// Only the join handle is polled, and it is Unpin.
impl<T> Unpin for PendingResult<T> {}

impl<T> Future for PendingResult<T> {
    type Output = ClientResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Ready(slot) => Poll::Ready(
                slot.take()
                    .unwrap_or_else(|| Err(ClientError::Worker("result already taken".to_string()))),
            ),
            PendingState::Running { handle, .. } => match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(e)) => Poll::Ready(Err(ClientError::Worker(e.to_string()))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T> std::fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("finished", &self.is_finished())
            .finish()
    }
}
