//! Status vocabulary translation between the two systems.
//!
//! The external service uses free-form lowercase workflow states, the
//! internal backend a closed three-value enum with an implied progress
//! percentage. Unknown external states fall back to `Pending` rather than
//! failing the sync.

use std::str::FromStr;

use tracing::debug;

use crate::models::TaskStatus;

/// Translate an external workflow state into the internal status and its
/// progress percentage.
///
/// Already-internal strings ("Pending", "In Progress", "Completed") pass
/// through unchanged, so the function is idempotent when a payload carries
/// a value that was previously translated.
pub fn from_external(raw: &str) -> (TaskStatus, u8) {
    let normalized = raw.trim().to_lowercase();
    let (status, progress) = match normalized.as_str() {
        "to do" | "todo" | "open" | "pending" => (TaskStatus::Pending, 0),
        "in progress" => (TaskStatus::InProgress, 50),
        "review" | "in review" => (TaskStatus::InProgress, 75),
        "complete" | "completed" | "closed" | "done" => (TaskStatus::Completed, 100),
        _ => {
            // Internal display names re-enter here when events echo our own
            // writes back; parse them before giving up.
            if let Ok(status) = TaskStatus::from_str(&normalized) {
                (status, status.default_progress())
            } else {
                debug!(raw, "unknown external status, defaulting to pending");
                (TaskStatus::Pending, 0)
            }
        }
    };
    (status, progress)
}

/// Translate an internal status into the external service's workflow state.
pub fn to_external(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "to do",
        TaskStatus::InProgress => "in progress",
        TaskStatus::Completed => "complete",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_states_map_to_internal_status_and_progress() {
        assert_eq!(from_external("to do"), (TaskStatus::Pending, 0));
        assert_eq!(from_external("open"), (TaskStatus::Pending, 0));
        assert_eq!(from_external("in progress"), (TaskStatus::InProgress, 50));
        assert_eq!(from_external("review"), (TaskStatus::InProgress, 75));
        assert_eq!(from_external("complete"), (TaskStatus::Completed, 100));
        assert_eq!(from_external("closed"), (TaskStatus::Completed, 100));
    }

    #[test]
    fn translation_is_case_insensitive_and_trims() {
        assert_eq!(from_external("  COMPLETE "), (TaskStatus::Completed, 100));
        assert_eq!(from_external("In Progress"), (TaskStatus::InProgress, 50));
    }

    #[test]
    fn unknown_states_default_to_pending() {
        assert_eq!(from_external("blocked"), (TaskStatus::Pending, 0));
        assert_eq!(from_external(""), (TaskStatus::Pending, 0));
    }

    #[test]
    fn internal_display_names_pass_through() {
        // Idempotency: translating an already-translated value changes nothing.
        assert_eq!(from_external("Completed"), (TaskStatus::Completed, 100));
        assert_eq!(from_external("Pending"), (TaskStatus::Pending, 0));
        for raw in ["to do", "in progress", "review", "complete", "nonsense"] {
            let (status, progress) = from_external(raw);
            assert_eq!(from_external(status.as_str()), (status, status.default_progress()));
            let _ = progress;
        }
    }

    #[test]
    fn outbound_states_round_trip() {
        for status in [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Completed] {
            let (back, _) = from_external(to_external(status));
            assert_eq!(back, status);
        }
    }
}
