//! Request-scoped time budget.
//!
//! Every downstream call made while resolving one GraphQL request is bounded
//! by the smaller of the per-call timeout and whatever remains of the request
//! budget. When the request future is dropped (client gone), in-flight calls
//! are dropped with it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use xgql_core::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDeadline {
    deadline: Instant,
}

impl RequestDeadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Time a single call may take.
    pub fn budget(&self, call_timeout: Duration) -> Duration {
        call_timeout.min(self.remaining())
    }

    /// Run `call` within the budget. Nothing is issued once the request
    /// budget is spent.
    pub async fn bound<T, F>(&self, call_timeout: Duration, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let budget = self.budget(call_timeout);
        let timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        if budget.is_zero() {
            return Err(ClientError::Timeout { timeout_ms });
        }
        tokio::time::timeout(budget, call)
            .await
            .unwrap_or(Err(ClientError::Timeout { timeout_ms }))
    }
}
