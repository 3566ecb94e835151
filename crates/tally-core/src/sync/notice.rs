//! User-facing summaries of saves and syncs

use std::fmt;

/// The user action a save notice refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Added,
    Updated,
    Deleted,
    Restored,
}

impl UserAction {
    const fn past_tense(self) -> &'static str {
        match self {
            Self::Added => "saved",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Restored => "restored",
        }
    }
}

/// Short message for the user, published after user actions and
/// user-initiated syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Confirmed by the remote store
    Saved(UserAction),
    /// Stored locally while offline
    SavedOffline(UserAction),
    /// Stored locally while online; a background sync will send it
    Queued(UserAction),
    /// An add matched a live cached entry and was not repeated
    AlreadyExists,
    Synced { count: usize },
    SyncFailed { count: usize },
    /// Changes the remote store could not take without a decision
    Conflicts { count: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saved(action) => write!(f, "Entry {} successfully", action.past_tense()),
            Self::SavedOffline(action) => write!(
                f,
                "Entry {} offline - will sync when online",
                action.past_tense()
            ),
            Self::Queued(action) => write!(
                f,
                "Entry {} (will sync in background)",
                action.past_tense()
            ),
            Self::AlreadyExists => f.write_str("Entry already exists"),
            Self::Synced { count } => write!(f, "Synced {count} changes"),
            Self::SyncFailed { count } => write!(f, "Failed to sync {count} changes"),
            Self::Conflicts { count } => write!(f, "{count} changes need your decision"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            Notice::SavedOffline(UserAction::Added).to_string(),
            "Entry saved offline - will sync when online"
        );
        assert_eq!(
            Notice::Saved(UserAction::Deleted).to_string(),
            "Entry deleted successfully"
        );
        assert_eq!(Notice::SyncFailed { count: 2 }.to_string(), "Failed to sync 2 changes");
        assert_eq!(
            Notice::Queued(UserAction::Restored).to_string(),
            "Entry restored (will sync in background)"
        );
    }
}
