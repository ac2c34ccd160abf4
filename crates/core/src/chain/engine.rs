use thiserror::Error;

use crate::chain::states::{ChainDirective, ChainOutcome, ChainTier, ReviewDecision, RouteClass};
use crate::domain::approval::ApprovalStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainTransitionError {
    #[error("tier {tier:?} does not accept review decisions")]
    TierNotReviewable { tier: ChainTier },
}

/// Pure decision logic of the review chain. Stateless: callers hand in
/// where the chain stands and get back what must happen next.
///
/// The two entry points mirror the two ways a chain moves: completion of
/// the action carrying a tier, and an explicit reviewer decision on a
/// review tier.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChainEngine;

impl ChainEngine {
    pub fn new() -> Self {
        Self
    }

    /// The action carrying `tier` reached Completed. Returns the follow-up
    /// the chain requires.
    ///
    /// The tier-1 skip for team-scoped work is deliberate: only
    /// vendor-maintenance resolutions pass through Equipment review;
    /// everything else goes straight to final sign-off.
    pub fn on_tier_completed(&self, tier: ChainTier, route: RouteClass) -> ChainOutcome {
        let directives = match (tier, route) {
            (ChainTier::FieldResolution, RouteClass::VendorMaintenance) => {
                vec![ChainDirective::OpenReview { tier: ChainTier::EquipmentReview }]
            }
            (ChainTier::FieldResolution, RouteClass::TeamScoped) => {
                vec![ChainDirective::OpenReview { tier: ChainTier::FinalSignOff }]
            }
            // A bare Completed on a review tier counts as an approval.
            (ChainTier::EquipmentReview, _) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::Approved },
                    ChainDirective::OpenReview { tier: ChainTier::FinalSignOff },
                ]
            }
            (ChainTier::FinalSignOff, _) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::Approved },
                    ChainDirective::FinalizeSite { kept_for_monitoring: false },
                ]
            }
        };

        ChainOutcome { tier, directives }
    }

    /// A reviewer ruled on the review action of `tier`.
    pub fn on_review_decision(
        &self,
        tier: ChainTier,
        decision: ReviewDecision,
    ) -> Result<ChainOutcome, ChainTransitionError> {
        let directives = match (tier, decision) {
            (ChainTier::FieldResolution, _) => {
                return Err(ChainTransitionError::TierNotReviewable { tier });
            }
            (ChainTier::EquipmentReview, ReviewDecision::Approve) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::Approved },
                    ChainDirective::OpenReview { tier: ChainTier::FinalSignOff },
                ]
            }
            (ChainTier::EquipmentReview, ReviewDecision::KeepForMonitoring) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::KeptForMonitoring },
                    ChainDirective::RevertOriginToInProgress,
                    ChainDirective::FinalizeSite { kept_for_monitoring: true },
                ]
            }
            (ChainTier::EquipmentReview, ReviewDecision::RequestRecheck) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::RecheckRequested },
                    ChainDirective::RevertOriginToInProgress,
                ]
            }
            (ChainTier::FinalSignOff, ReviewDecision::Approve) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::Approved },
                    ChainDirective::FinalizeSite { kept_for_monitoring: false },
                ]
            }
            (ChainTier::FinalSignOff, ReviewDecision::KeepForMonitoring) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::KeptForMonitoring },
                    ChainDirective::FinalizeSite { kept_for_monitoring: true },
                ]
            }
            (ChainTier::FinalSignOff, ReviewDecision::RequestRecheck) => {
                vec![
                    ChainDirective::CloseReview { status: ApprovalStatus::RecheckRequested },
                    ChainDirective::RevertOriginToInProgress,
                ]
            }
        };

        Ok(ChainOutcome { tier, directives })
    }
}

#[cfg(test)]
mod tests {
    use crate::chain::engine::{ChainEngine, ChainTransitionError};
    use crate::chain::states::{ChainDirective, ChainTier, ReviewDecision, RouteClass};
    use crate::domain::approval::ApprovalStatus;

    #[test]
    fn vendor_work_enters_equipment_review_first() {
        let outcome = ChainEngine::new()
            .on_tier_completed(ChainTier::FieldResolution, RouteClass::VendorMaintenance);

        assert_eq!(
            outcome.directives,
            vec![ChainDirective::OpenReview { tier: ChainTier::EquipmentReview }]
        );
    }

    #[test]
    fn team_scoped_work_skips_equipment_review() {
        let outcome = ChainEngine::new()
            .on_tier_completed(ChainTier::FieldResolution, RouteClass::TeamScoped);

        assert_eq!(
            outcome.directives,
            vec![ChainDirective::OpenReview { tier: ChainTier::FinalSignOff }]
        );
    }

    #[test]
    fn equipment_approval_advances_to_final_sign_off() {
        let outcome = ChainEngine::new()
            .on_review_decision(ChainTier::EquipmentReview, ReviewDecision::Approve)
            .expect("equipment tier is reviewable");

        assert!(outcome
            .directives
            .contains(&ChainDirective::OpenReview { tier: ChainTier::FinalSignOff }));
    }

    #[test]
    fn keep_for_monitoring_stops_the_chain_and_reverts_origin() {
        let outcome = ChainEngine::new()
            .on_review_decision(ChainTier::EquipmentReview, ReviewDecision::KeepForMonitoring)
            .expect("equipment tier is reviewable");

        assert!(outcome.directives.contains(&ChainDirective::RevertOriginToInProgress));
        assert!(outcome
            .directives
            .contains(&ChainDirective::FinalizeSite { kept_for_monitoring: true }));
        assert!(!outcome
            .directives
            .iter()
            .any(|d| matches!(d, ChainDirective::OpenReview { .. })));
    }

    #[test]
    fn recheck_reverts_origin_without_advancing() {
        let outcome = ChainEngine::new()
            .on_review_decision(ChainTier::EquipmentReview, ReviewDecision::RequestRecheck)
            .expect("equipment tier is reviewable");

        assert_eq!(
            outcome.directives,
            vec![
                ChainDirective::CloseReview { status: ApprovalStatus::RecheckRequested },
                ChainDirective::RevertOriginToInProgress,
            ]
        );
    }

    #[test]
    fn final_approval_finalizes_the_site() {
        let outcome = ChainEngine::new()
            .on_review_decision(ChainTier::FinalSignOff, ReviewDecision::Approve)
            .expect("final tier is reviewable");

        assert_eq!(
            outcome.directives,
            vec![
                ChainDirective::CloseReview { status: ApprovalStatus::Approved },
                ChainDirective::FinalizeSite { kept_for_monitoring: false },
            ]
        );
    }

    #[test]
    fn field_resolution_rejects_review_decisions() {
        let error = ChainEngine::new()
            .on_review_decision(ChainTier::FieldResolution, ReviewDecision::Approve)
            .expect_err("tier 0 has no reviewer");

        assert_eq!(
            error,
            ChainTransitionError::TierNotReviewable { tier: ChainTier::FieldResolution }
        );
    }

    #[test]
    fn legacy_remark_translation_matches_historic_behavior() {
        assert_eq!(ReviewDecision::from_legacy(true, "done"), ReviewDecision::Approve);
        assert_eq!(
            ReviewDecision::from_legacy(false, "Please KEEP for Monitoring this site"),
            ReviewDecision::KeepForMonitoring
        );
        assert_eq!(
            ReviewDecision::from_legacy(false, "battery readings look wrong, recheck"),
            ReviewDecision::RequestRecheck
        );
    }
}
