//! The ambient per-call slot.
//!
//! Pipeline code receives the [`Context`](crate::Context) explicitly. The
//! ambient slot only exposes a small [`CallInfo`] to code that has no
//! context at hand, such as log helpers deep inside a handler. It is
//! task-local: set when an adapter starts processing a unit and cleared when
//! that future completes or is dropped.

use std::future::Future;

use crate::context::RequestId;

/// Identity of the call running on the current task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Request ID.
    pub request_id: RequestId,
    /// Adapter name.
    pub adapter: String,
}

tokio::task_local! {
    static CURRENT_CALL: CallInfo;
}

/// Runs `fut` with `info` installed as the current call.
pub async fn with_call<F: Future>(info: CallInfo, fut: F) -> F::Output {
    CURRENT_CALL.scope(info, fut).await
}

/// Returns the current call, if any.
pub fn current_call() -> Option<CallInfo> {
    CURRENT_CALL.try_with(Clone::clone).ok()
}
