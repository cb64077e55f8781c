//! Session and authentication seam.

use crate::error::{SyncError, SyncResult};
use repsync_protocol::OwnerId;

/// Supplies the signed-in user that scopes every sync call.
pub trait SessionProvider: Send + Sync {
    /// Returns the signed-in owner, or an authentication error.
    fn current_owner(&self) -> SyncResult<OwnerId>;
}

/// A session that is always signed in as one owner.
#[derive(Debug, Clone)]
pub struct StaticSession {
    owner_id: OwnerId,
}

impl StaticSession {
    /// Creates a session for `owner_id`.
    pub fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }
}

impl SessionProvider for StaticSession {
    fn current_owner(&self) -> SyncResult<OwnerId> {
        Ok(self.owner_id.clone())
    }
}

/// A session with nobody signed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedOutSession;

impl SessionProvider for SignedOutSession {
    fn current_owner(&self) -> SyncResult<OwnerId> {
        Err(SyncError::AuthenticationFailed("no signed-in user".into()))
    }
}
