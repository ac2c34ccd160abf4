pub mod audit;
pub mod chain;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod routing;

pub use chain::{ChainDirective, ChainEngine, ChainOutcome, ChainTier, ReviewDecision, RouteClass};
pub use domain::action::{Action, ActionId, ActionPriority, ActionStatus};
pub use domain::approval::{Approval, ApprovalId, ApprovalStage, ApprovalStatus};
pub use domain::directory::DirectoryUser;
pub use domain::site_record::{CcrStatus, ObservationStatus, SiteRecord, SiteRecordKey};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{EmailRequest, Notification, Notifier, NotifyError};
pub use routing::{
    InMemoryVendorOverrideSet, NoOpenRoutes, OpenRouteProbe, ResolvedAssignee, RoutingBasis,
    RoutingError, RoutingInput, RoutingResolver, VendorOverrideSet,
};

pub use chrono;
