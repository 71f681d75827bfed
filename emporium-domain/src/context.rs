//! Caller Context
//!
//! Identity of whoever drives an orchestrator operation. It is passed
//! explicitly through every call that records ownership; nothing reads it
//! from global or thread-local state.

use crate::entities::UserId;
use serde::{Deserialize, Serialize};

/// Explicit caller identity for ownership and audit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerContext {
    /// Authenticated user on whose behalf the operation runs.
    pub user_id: UserId,
}

impl CallerContext {
    /// Create a caller context for a user.
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}
