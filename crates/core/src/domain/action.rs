use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
    Low,
    Normal,
    High,
}

impl ActionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// A routed unit of maintenance work, owned by exactly one user at a time.
///
/// The row snapshot is captured at creation and never mutated afterwards;
/// remarks and photo references only grow as the ticket changes hands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub row_snapshot: BTreeMap<String, String>,
    /// Identifier of the source-file row this action was raised from.
    pub row_key: String,
    pub routing_team: String,
    pub issue_type: String,
    pub site_code: Option<String>,
    pub assigned_to_user_id: String,
    pub assigned_to_role: String,
    pub assigned_to_division: Option<String>,
    pub assigned_to_vendor: Option<String>,
    pub assigned_by_user_id: String,
    pub assigned_by_role: String,
    pub source_file_id: String,
    pub status: ActionStatus,
    pub priority: ActionPriority,
    pub remarks: Vec<String>,
    pub photo_refs: Vec<String>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn can_transition_to(&self, next: &ActionStatus) -> bool {
        matches!(
            (&self.status, next),
            (ActionStatus::Pending, ActionStatus::InProgress)
                | (ActionStatus::Pending, ActionStatus::Completed)
                | (ActionStatus::InProgress, ActionStatus::Completed)
        )
    }

    pub fn transition_to(&mut self, next: ActionStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(&next) {
            return Err(DomainError::InvalidActionTransition {
                from: self.status.clone(),
                to: next,
            });
        }

        self.status = next;
        Ok(())
    }

    /// Remarks are append-only: a reroute or review never rewrites history.
    pub fn append_remark(&mut self, remark: impl Into<String>) {
        let remark = remark.into();
        if !remark.trim().is_empty() {
            self.remarks.push(remark);
        }
    }

    pub fn append_photos(&mut self, photos: impl IntoIterator<Item = String>) {
        self.photo_refs.extend(photos.into_iter().filter(|p| !p.trim().is_empty()));
    }
}
