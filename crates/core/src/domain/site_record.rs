use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composite key of a SiteRecord: one row of one ingested file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteRecordKey {
    pub file_id: String,
    pub row_key: String,
}

impl SiteRecordKey {
    pub fn new(file_id: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self { file_id: file_id.into(), row_key: row_key.into() }
    }

    /// Key of the duplicate record created when a row is routed to a new
    /// holder, so both can coexist under the unique (file_id, row_key)
    /// constraint.
    pub fn routed_variant(&self, assignee_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            file_id: self.file_id.clone(),
            row_key: format!("{}-routed-{}-{}", self.row_key, assignee_id, at.timestamp()),
        }
    }

    /// Strips the `-routed-…` suffix, recovering the key of the original
    /// record the routed copy was derived from.
    pub fn base_row_key(&self) -> &str {
        match self.row_key.find("-routed-") {
            Some(idx) => &self.row_key[..idx],
            None => &self.row_key,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Pending,
    Resolved,
}

impl ObservationStatus {
    /// The upstream store historically encodes Resolved as an empty string.
    /// That convention is preserved at the storage boundary only; the
    /// domain API always speaks the enum.
    pub fn as_legacy_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Resolved => "",
        }
    }

    pub fn parse_legacy(value: &str) -> Self {
        if value.trim().is_empty() {
            Self::Resolved
        } else {
            Self::Pending
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcrStatus {
    None,
    Pending,
    Approved,
    KeptForMonitoring,
}

impl CcrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::KeptForMonitoring => "kept_for_monitoring",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "kept_for_monitoring" => Some(Self::KeptForMonitoring),
            _ => None,
        }
    }
}

/// Per-(file, site, holder) open-item projection backing "my active items"
/// views and reporting.
///
/// Records are never deleted; once `ccr_status` reaches Approved they drop
/// out of active queries but remain retrievable for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub key: SiteRecordKey,
    pub site_code: String,
    pub owner_user_id: String,
    /// First holder of the record. Set once at creation and never
    /// overwritten, no matter how many transfers follow.
    pub original_user_id: String,
    pub observation: ObservationStatus,
    pub ccr_status: CcrStatus,
    pub task_status: String,
    pub provenance: String,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SiteRecord {
    pub fn is_active(&self) -> bool {
        self.ccr_status != CcrStatus::Approved
    }
}
