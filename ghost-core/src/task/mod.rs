//! Fault boundary for supervised tasks.
//!
//! Every long-lived body (the audio capture loop, each viewer's video
//! session) runs inside its own spawned task. A panic or error in that body
//! surfaces here as a [`TaskError`] instead of unwinding into the caller,
//! so one viewer or the audio path cannot take the process down.

use std::any::Any;
use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, trace};

use crate::error::{GhostError, TaskError};

/// Run `fut` on its own task and wait for it, converting errors and panics
/// into a [`TaskError`].
///
/// # Arguments
///
/// * `name` - Label used in log lines.
/// * `fut` - The fallible body to supervise.
pub async fn guarded<F, T>(name: &'static str, fut: F) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, GhostError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(Ok(value)) => {
            trace!("{name}: task finished");
            Ok(value)
        }
        Ok(Err(e)) => Err(TaskError::Failed(e.to_string())),
        Err(join) => Err(classify(join)),
    }
}

/// Spawn an infallible body behind a fault boundary and return immediately.
///
/// The outer task only observes the inner one; a panic in `fut` is logged
/// and swallowed.
pub fn spawn_guarded<F>(name: String, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(join) = tokio::spawn(fut).await {
            match classify(join) {
                TaskError::Cancelled => trace!("{name}: task cancelled"),
                e => error!("{name}: {e}"),
            }
        }
    })
}

fn classify(join: JoinError) -> TaskError {
    if join.is_panic() {
        TaskError::Panicked(panic_message(join.into_panic()))
    } else {
        TaskError::Cancelled
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn guarded_passes_value_through() {
        let v = guarded("ok", async { Ok::<_, GhostError>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn guarded_maps_error() {
        let r = guarded("err", async { Err::<(), _>(GhostError::Device("busy".into())) }).await;
        match r {
            Err(TaskError::Failed(msg)) => assert!(msg.contains("busy")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn guarded_contains_panic() {
        let r = guarded("boom", async {
            if true {
                panic!("device exploded");
            }
            Ok::<(), GhostError>(())
        })
        .await;
        match r {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "device exploded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_guarded_survives_panic() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = spawn_guarded("session".into(), async move {
            flag.store(true, Ordering::SeqCst);
            panic!("viewer crashed");
        });
        // The outer task completes normally even though the body panicked.
        handle.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
