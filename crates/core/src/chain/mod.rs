pub mod engine;
pub mod states;

pub use engine::{ChainEngine, ChainTransitionError};
pub use states::{ChainDirective, ChainOutcome, ChainTier, ReviewDecision, RouteClass};
