use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::{HierSyncError, Result};

/// A handle to a non-blocking operation.
///
/// The operation runs in a spawned task. Continuations attached with
/// [`then`](Self::then) or [`and_then`](Self::and_then) run once this
/// operation completes and yield a new handle, so a multi-stage chain is
/// represented by a single handle. Call [`wait`](Self::wait) to get the
/// result.
///
/// Must be created from within a tokio runtime. If dropped before being
/// consumed, the background task is aborted.
pub struct AsyncHandle<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Ready(Option<Result<T>>),
    Task(Option<JoinHandle<Result<T>>>),
}

impl<T: Send + 'static> AsyncHandle<T> {
    /// Spawn a future and return a handle to its result.
    pub fn spawn(fut: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            inner: Inner::Task(Some(tokio::spawn(fut))),
        }
    }

    /// A handle that is already complete.
    pub fn ready(value: T) -> Self {
        Self::completed(Ok(value))
    }

    /// A handle that has already failed.
    pub fn failed(err: HierSyncError) -> Self {
        Self::completed(Err(err))
    }

    fn completed(result: Result<T>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    /// Wait for the operation to complete and propagate any error.
    pub async fn wait(mut self) -> Result<T> {
        match &mut self.inner {
            Inner::Ready(slot) => slot.take().unwrap_or(Err(HierSyncError::Cancelled)),
            Inner::Task(slot) => {
                let Some(handle) = slot.take() else {
                    return Err(HierSyncError::Cancelled);
                };
                match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Err(HierSyncError::Cancelled),
                    Err(e) => Err(HierSyncError::transport(format!("task panicked: {e}"))),
                }
            }
        }
    }

    /// Check if the operation has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            Inner::Ready(_) => true,
            Inner::Task(slot) => slot.as_ref().is_none_or(|h| h.is_finished()),
        }
    }

    /// Attach a continuation that receives this operation's result, success
    /// or failure, and produces the result of the returned handle.
    pub fn then<U, F>(mut self, f: F) -> AsyncHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        if let Inner::Ready(slot) = &mut self.inner
            && let Some(result) = slot.take()
        {
            return AsyncHandle::completed(f(result));
        }
        AsyncHandle::spawn(async move { f(self.wait().await) })
    }

    /// Attach a continuation that issues the next non-blocking operation
    /// with this operation's output. It is not invoked if this operation
    /// fails; the error is forwarded to the returned handle instead.
    pub fn and_then<U, F>(mut self, f: F) -> AsyncHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> AsyncHandle<U> + Send + 'static,
    {
        if let Inner::Ready(slot) = &mut self.inner
            && let Some(result) = slot.take()
        {
            return match result {
                Ok(v) => f(v),
                Err(e) => AsyncHandle::failed(e),
            };
        }
        AsyncHandle::spawn(async move {
            let value = self.wait().await?;
            f(value).wait().await
        })
    }

    /// Transform the error of this operation, leaving success untouched.
    pub fn map_err<F>(self, f: F) -> AsyncHandle<T>
    where
        F: FnOnce(HierSyncError) -> HierSyncError + Send + 'static,
    {
        self.then(|r| r.map_err(f))
    }
}

impl<T> Drop for AsyncHandle<T> {
    fn drop(&mut self) {
        if let Inner::Task(Some(handle)) = &self.inner {
            handle.abort();
        }
    }
}

/// A group of non-blocking operations that can be waited on together.
pub struct HandleGroup<T> {
    handles: Vec<AsyncHandle<T>>,
}

impl<T: Send + 'static> HandleGroup<T> {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, h: AsyncHandle<T>) {
        self.handles.push(h);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for all operations, returning their outputs in push order.
    ///
    /// Returns the first error encountered, if any. All operations are
    /// awaited regardless of errors.
    pub async fn wait_all(self) -> Result<Vec<T>> {
        let mut first_err = None;
        let mut out = Vec::with_capacity(self.handles.len());
        for h in self.handles {
            match h.wait().await {
                Ok(v) => out.push(v),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

impl<T: Send + 'static> Default for HandleGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}
