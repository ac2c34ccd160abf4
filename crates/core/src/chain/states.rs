use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStage, ApprovalStatus};

/// Position of an action within the review chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTier {
    /// The originating fault-resolution action, owned by the routed team.
    FieldResolution,
    /// Intermediate equipment review of vendor-handled work.
    EquipmentReview,
    /// Terminal CCR sign-off.
    FinalSignOff,
}

impl ChainTier {
    pub fn approval_stage(&self) -> Option<ApprovalStage> {
        match self {
            Self::FieldResolution => None,
            Self::EquipmentReview => Some(ApprovalStage::EquipmentReview),
            Self::FinalSignOff => Some(ApprovalStage::FinalSignOff),
        }
    }
}

/// How the action now carrying the chain was routed. Decides whether the
/// equipment tier is entered at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// AMC-style vendor maintenance work: reviewed by Equipment first.
    VendorMaintenance,
    /// Division- or role-scoped team work: skips straight to final sign-off.
    TeamScoped,
}

/// Explicit reviewer verdict on a chain-stage action.
///
/// The transition API takes this enum, never free-text remarks; the remark
/// heuristic of the legacy interface lives only in
/// [`ReviewDecision::from_legacy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    KeepForMonitoring,
    RequestRecheck,
}

impl ReviewDecision {
    /// Translates the legacy (status, remarks) convention at the interface
    /// edge: marking the review action Completed means approval, marking it
    /// InProgress means a rejection whose flavor the remarks carry.
    pub fn from_legacy(completed: bool, remarks: &str) -> Self {
        if completed {
            return Self::Approve;
        }
        if remarks.to_ascii_lowercase().contains("kept for monitoring")
            || remarks.to_ascii_lowercase().contains("keep for monitoring")
        {
            return Self::KeepForMonitoring;
        }
        Self::RequestRecheck
    }
}

/// What the chain engine wants done after a transition. The caller owns
/// persistence; these are instructions, not side effects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainDirective {
    /// Spawn the review pair (Action + Pending Approval) for a tier.
    OpenReview { tier: ChainTier },
    /// Mark the current tier's approval with a terminal status.
    CloseReview { status: ApprovalStatus },
    /// Return the originating field action to InProgress.
    RevertOriginToInProgress,
    /// Stamp the terminal sign-off outcome onto the site's records.
    FinalizeSite { kept_for_monitoring: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub tier: ChainTier,
    pub directives: Vec<ChainDirective>,
}
