use super::error::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Cancellable, deadline-bearing context attached to a chain of store operations.
#[derive(Clone, Debug)]
pub struct OperationScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OperationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationScope {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// Tightens the deadline; a later deadline than the current one is ignored.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Cancels this scope when the returned guard is dropped.
    ///
    /// Handlers hold the guard for the lifetime of the request future, so a
    /// client disconnect aborts every operation derived from the scope.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Derives a child scope that is cancelled with its parent and released
    /// (cancelled) when the returned [`ChildScope`] goes out of scope.
    pub fn child(&self) -> ChildScope {
        let token = self.token.child_token();
        let guard = token.clone().drop_guard();
        ChildScope {
            scope: OperationScope {
                token,
                deadline: self.deadline,
            },
            _guard: guard,
        }
    }

    /// Drives `fut` to completion unless the scope is cancelled or its deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        if self.token.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or(Err(StorageError::DeadlineExceeded)),
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StorageError::Cancelled),
            res = bounded => res,
        }
    }
}

/// Scope derived for a bounded sub-operation such as a listing.
pub struct ChildScope {
    scope: OperationScope,
    _guard: DropGuard,
}

impl std::ops::Deref for ChildScope {
    type Target = OperationScope;

    fn deref(&self) -> &OperationScope {
        &self.scope
    }
}
