//! Failure containment for user-supplied callbacks.
//!
//! Hooks, listeners, and extension listeners all run through `run_isolated`:
//! an `Err` or a panic is logged and reported as `false`, never propagated.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, warn};

/// Run `f`, containing both returned errors and panics.
///
/// Returns `true` if `f` completed successfully.
pub fn run_isolated<F>(kind: &str, name: &str, f: F) -> bool
where
    F: FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(kind, name, error = %err, "callback failed");
            false
        }
        Err(payload) => {
            error!(kind, name, panic = %panic_message(payload.as_ref()), "callback panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
