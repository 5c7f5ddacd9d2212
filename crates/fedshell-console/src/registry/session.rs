//! A single registered session.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use super::types::{RegistryError, SessionId, SessionState, SessionSummary};
use crate::auth::Identity;
use crate::shell::TargetRef;

struct Activity {
    state: SessionState,
    last_activity: Instant,
    last_activity_at: SystemTime,
    bytes_in: u64,
    bytes_out: u64,
    terminate_reason: Option<String>,
}

/// Registry record for one bridged terminal.
///
/// Identity and target are fixed at creation. The transport and shell
/// handles are owned by the bridge task, not stored here.
pub struct Session {
    id: SessionId,
    target: TargetRef,
    identity: Identity,
    created_at: SystemTime,
    activity: Mutex<Activity>,
    cancel: CancellationToken,
}

impl Session {
    pub(super) fn new(id: SessionId, target: TargetRef, identity: Identity) -> Self {
        Self {
            id,
            target,
            identity,
            created_at: SystemTime::now(),
            activity: Mutex::new(Activity {
                state: SessionState::Connecting,
                last_activity: Instant::now(),
                last_activity_at: SystemTime::now(),
                bytes_in: 0,
                bytes_out: 0,
                terminate_reason: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn target(&self) -> &TargetRef {
        &self.target
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    fn lock(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: SessionState) -> Result<SessionState, RegistryError> {
        let mut activity = self.lock();
        let from = activity.state;
        if !from.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition { from, to: next });
        }
        activity.state = next;
        drop(activity);
        debug!(session_id = %self.id, %from, to = %next, "session state changed");
        Ok(from)
    }

    /// Record `n` bytes received from the client.
    pub fn touch_inbound(&self, n: usize) {
        let mut activity = self.lock();
        activity.bytes_in += n as u64;
        Self::bump(&mut activity);
    }

    /// Record `n` bytes sent to the client.
    pub fn touch_outbound(&self, n: usize) {
        let mut activity = self.lock();
        activity.bytes_out += n as u64;
        Self::bump(&mut activity);
    }

    fn bump(activity: &mut Activity) {
        activity.last_activity = Instant::now();
        activity.last_activity_at = SystemTime::now();
    }

    /// Monotonic time of the last transferred byte.
    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    /// Request forced teardown. The first reason wins.
    pub fn terminate(&self, reason: impl Into<String>) {
        {
            let mut activity = self.lock();
            if activity.terminate_reason.is_none() {
                activity.terminate_reason = Some(reason.into());
            }
        }
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn terminate_reason(&self) -> Option<String> {
        self.lock().terminate_reason.clone()
    }

    /// Resolves once [`Self::terminate`] has been called.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn summary(&self) -> SessionSummary {
        let activity = self.lock();
        SessionSummary {
            id: self.id,
            target: self.target.clone(),
            user: self.identity.username.clone(),
            state: activity.state,
            created_at: self.created_at,
            last_activity: activity.last_activity_at,
            bytes_in: activity.bytes_in,
            bytes_out: activity.bytes_out,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("user", &self.identity.username)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
