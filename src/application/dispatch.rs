//! Fire-and-forget side effects that must never reach the caller.

use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Run `task` off the caller's path.
///
/// With the `async` feature and a tokio runtime on the current thread the task
/// is spawned; otherwise it runs inline. A panic in the task is logged and
/// swallowed in both cases.
pub(crate) fn emit_detached<F>(what: &'static str, task: F)
where
    F: FnOnce() + Send + 'static,
{
    #[cfg(feature = "async")]
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { run_guarded(what, task) });
        return;
    }

    run_guarded(what, task);
}

fn run_guarded<F: FnOnce()>(what: &'static str, task: F) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!(task = what, "detached task panicked");
    }
}
