pub mod action_store;
pub mod chain_runner;
pub mod overrides;
pub mod ownership;
pub mod service;

use std::sync::Arc;

use faultdesk_core::audit::AuditSink;
use faultdesk_core::notify::Notifier;
use faultdesk_core::routing::policy::RoutingPolicy;
use faultdesk_db::repositories::{
    ActionRepository, ApprovalRepository, DirectoryRepository, SiteRecordRepository,
};

pub use action_store::{ActionStore, RoutingRequest, StatusUpdate};
pub use chain_runner::ChainRunner;
pub use overrides::{CachedOverrideSet, OverrideSnapshot};
pub use ownership::OwnershipTransferManager;
pub use service::WorkflowService;

/// Shared wiring for every workflow service: the three stores, the two
/// read-only collaborators, delivery and audit sinks, and the routing
/// policy in force.
pub struct WorkflowContext {
    pub actions: Arc<dyn ActionRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub sites: Arc<dyn SiteRecordRepository>,
    pub directory: Arc<dyn DirectoryRepository>,
    pub overrides: Arc<CachedOverrideSet>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
    pub policy: RoutingPolicy,
}
