//! Build and deployment status values with the transition rules the rest of
//! the platform relies on.

use crate::error::StoreError;

/// Lifecycle of a build. Transitions only move forward:
/// `pending -> building -> {success | failed}`. A build that never reached a
/// worker may fail straight from `pending` (trigger failure), but nothing
/// ever moves back toward `pending`, and terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Building,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Building => "building",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "building" => Ok(BuildStatus::Building),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            BuildStatus::Pending => 0,
            BuildStatus::Building => 1,
            BuildStatus::Success | BuildStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Active,
    Inactive,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Active => "active",
            DeploymentStatus::Inactive => "inactive",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Building));
        assert!(BuildStatus::Building.can_transition_to(BuildStatus::Success));
        assert!(BuildStatus::Building.can_transition_to(BuildStatus::Failed));
        // Trigger failure before a worker picks the job up.
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Failed));
    }

    #[test]
    fn reverse_and_terminal_transitions_rejected() {
        assert!(!BuildStatus::Building.can_transition_to(BuildStatus::Pending));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Building));
        assert!(!BuildStatus::Failed.can_transition_to(BuildStatus::Success));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Failed));
        assert!(!BuildStatus::Pending.can_transition_to(BuildStatus::Pending));
    }

    #[test]
    fn parse_round_trip() {
        for s in ["pending", "building", "success", "failed"] {
            assert_eq!(BuildStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(BuildStatus::parse("deleted").is_err());
    }
}
