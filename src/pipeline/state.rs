//! Shared assistant state.
//!
//! [`AssistantState`] is the single place a front end reads what the
//! assistant last did: the reply it spoke, where it navigated, the last
//! failure and the recogniser's current snapshot.
//!
//! [`SharedState`] is `Arc<Mutex<AssistantState>>`.  Hold the lock for short
//! critical sections only and never across `.await`.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::recognition::RecognitionState;

// ---------------------------------------------------------------------------
// AssistantState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssistantState {
    /// Text most recently handed to the voice.
    pub last_response: Option<String>,

    /// Scrubbed message of the most recent failure.
    pub last_error: Option<String>,

    /// Destination of the most recent navigation command.
    pub last_navigation: Option<String>,

    /// Tag of the most recent non-navigation action.
    pub last_action: Option<String>,

    /// Queries answered by the brain since start-up.
    pub queries_answered: u64,

    pub recognition: RecognitionState,
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

pub type SharedState = Arc<Mutex<AssistantState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(AssistantState::default()))
}

/// Run `f` against the locked state, recovering a poisoned lock.
pub(crate) fn update<R>(state: &SharedState, f: impl FnOnce(&mut AssistantState) -> R) -> R {
    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
}

/// Copy every recognition snapshot into `state` until the sender is gone.
pub fn mirror_recognition(
    state: SharedState,
    mut recognition: watch::Receiver<RecognitionState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = recognition.borrow_and_update().clone();
            update(&state, |st| st.recognition = snapshot);
            if recognition.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_empty() {
        let state = AssistantState::default();
        assert!(state.last_response.is_none());
        assert!(state.last_navigation.is_none());
        assert!(!state.recognition.is_listening);
        assert_eq!(state.queries_answered, 0);
    }

    #[test]
    fn shared_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedState>();
    }

    #[tokio::test]
    async fn recognition_snapshots_are_mirrored() {
        let state = new_shared_state();
        let (tx, rx) = watch::channel(RecognitionState::default());
        let task = mirror_recognition(Arc::clone(&state), rx);

        tx.send(RecognitionState {
            is_listening: true,
            transcript: "show patients".into(),
            ..RecognitionState::default()
        })
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let st = state.lock().unwrap();
        assert!(st.recognition.is_listening);
        assert_eq!(st.recognition.transcript, "show patients");
    }
}
