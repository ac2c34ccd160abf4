use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ActionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

/// The review tier an Approval record belongs to.
///
/// Stage-0 field resolution carries no Approval of its own; only the two
/// review tiers do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    EquipmentReview,
    FinalSignOff,
}

impl ApprovalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EquipmentReview => "equipment_review",
            Self::FinalSignOff => "final_sign_off",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equipment_review" => Some(Self::EquipmentReview),
            "final_sign_off" => Some(Self::FinalSignOff),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    KeptForMonitoring,
    RecheckRequested,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::KeptForMonitoring => "kept_for_monitoring",
            Self::RecheckRequested => "recheck_requested",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "kept_for_monitoring" => Some(Self::KeptForMonitoring),
            "recheck_requested" => Some(Self::RecheckRequested),
            _ => None,
        }
    }

    /// Pending is the only open state; everything else closes the record.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A review record attached 1:1 to a chain-stage Action.
///
/// `prior_action_id` links back to the action whose completion spawned this
/// review, so the full chain can be walked from the final sign-off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub action_id: ActionId,
    pub site_code: String,
    pub stage: ApprovalStage,
    pub status: ApprovalStatus,
    pub submitted_by: String,
    pub assigned_to: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub prior_action_id: Option<ActionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
