use std::collections::BTreeMap;
use std::sync::Arc;

use faultdesk_core::audit::InMemoryAuditSink;
use faultdesk_core::chain::ReviewDecision;
use faultdesk_core::domain::action::{ActionPriority, ActionStatus};
use faultdesk_core::domain::approval::{ApprovalStage, ApprovalStatus};
use faultdesk_core::domain::site_record::{CcrStatus, ObservationStatus};
use faultdesk_core::errors::ApplicationError;
use faultdesk_core::notify::{FailingNotifier, InMemoryNotifier};
use faultdesk_core::routing::policy::RoutingPolicy;
use faultdesk_core::routing::RoutingError;
use faultdesk_db::fixtures::SeedDataset;
use faultdesk_db::repositories::{
    ApprovalRepository, InMemoryActionRepository, InMemoryApprovalRepository,
    InMemoryDirectoryRepository, InMemorySiteRecordRepository, InMemoryVendorOverrideRepository,
};
use faultdesk_workflow::{
    CachedOverrideSet, ChainRunner, RoutingRequest, StatusUpdate, WorkflowContext,
    WorkflowService,
};

struct Harness {
    service: WorkflowService,
    ctx: Arc<WorkflowContext>,
    notifier: InMemoryNotifier,
}

async fn harness(override_sites: Vec<&str>) -> Harness {
    harness_with_notifier(override_sites, InMemoryNotifier::default()).await
}

async fn harness_with_notifier(
    override_sites: Vec<&str>,
    notifier: InMemoryNotifier,
) -> Harness {
    let overrides_repo = Arc::new(
        InMemoryVendorOverrideRepository::with_sites(
            override_sites.into_iter().map(str::to_string).collect(),
        )
        .await,
    );

    let ctx = Arc::new(WorkflowContext {
        actions: Arc::new(InMemoryActionRepository::default()),
        approvals: Arc::new(InMemoryApprovalRepository::default()),
        sites: Arc::new(InMemorySiteRecordRepository::default()),
        directory: Arc::new(InMemoryDirectoryRepository::with_users(SeedDataset::users()).await),
        overrides: Arc::new(CachedOverrideSet::new(overrides_repo)),
        notifier: Arc::new(notifier.clone()),
        audit: Arc::new(InMemoryAuditSink::default()),
        policy: RoutingPolicy::default(),
    });

    Harness { service: WorkflowService::new(Arc::clone(&ctx)), ctx, notifier }
}

fn amc_request(site: &str, circle: &str) -> RoutingRequest {
    RoutingRequest {
        team_label: "AMC".to_string(),
        issue_type: "battery fault".to_string(),
        row: BTreeMap::from([
            ("Site Code".to_string(), site.to_string()),
            ("circle".to_string(), circle.to_string()),
            ("division".to_string(), "HSR".to_string()),
        ]),
        row_key: "row-1".to_string(),
        source_file_id: "file-1".to_string(),
        priority: ActionPriority::Normal,
        remark: Some("reported by station staff".to_string()),
    }
}

fn signal_request(division: &str) -> RoutingRequest {
    RoutingRequest {
        team_label: "Signal".to_string(),
        issue_type: "track circuit failure".to_string(),
        row: BTreeMap::from([
            ("site code".to_string(), "5T1100".to_string()),
            ("division".to_string(), division.to_string()),
        ]),
        row_key: "row-7".to_string(),
        source_file_id: "file-2".to_string(),
        priority: ActionPriority::High,
        remark: None,
    }
}

fn complete(remarks: Option<&str>) -> StatusUpdate {
    StatusUpdate {
        status: ActionStatus::Completed,
        decision: None,
        remarks: remarks.map(str::to_string),
    }
}

#[tokio::test]
async fn override_site_routes_to_override_vendor_regardless_of_circle() {
    let h = harness(vec!["3W2872"]).await;

    let action = h
        .service
        .submit_routing(amc_request("3W2872", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    assert_eq!(action.assigned_to_user_id, "u-amc-sky-1");
    assert_eq!(action.assigned_to_vendor.as_deref(), Some("skybridge"));
}

#[tokio::test]
async fn non_override_site_follows_circle_vendor_mapping() {
    let h = harness(vec!["3W2872"]).await;

    let action = h
        .service
        .submit_routing(amc_request("9K9999", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    assert_eq!(action.assigned_to_vendor.as_deref(), Some("northgrid"));
    assert_eq!(action.assigned_to_user_id, "u-amc-east");
}

#[tokio::test]
async fn routing_creates_the_site_record_pair_and_notifies() {
    let h = harness(vec![]).await;

    let action = h
        .service
        .submit_routing(amc_request("9K9999", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    let creator_items = h.service.list_site_records("u-control", false).await.expect("list");
    assert_eq!(creator_items.len(), 1);
    assert_eq!(creator_items[0].key.row_key, "row-1");

    let assignee_items = h
        .service
        .list_site_records(&action.assigned_to_user_id, false)
        .await
        .expect("list");
    assert_eq!(assignee_items.len(), 1);
    assert!(assignee_items[0].key.row_key.starts_with("row-1-routed-"));
    assert_eq!(assignee_items[0].original_user_id, action.assigned_to_user_id);

    let sent = h.notifier.notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, action.assigned_to_user_id);
    assert_eq!(h.notifier.emails().len(), 1);
}

#[tokio::test]
async fn no_eligible_assignee_creates_nothing() {
    let h = harness(vec![]).await;

    // Operating staff covers GNT only; HSR has nobody.
    let request = RoutingRequest {
        team_label: "Operating".to_string(),
        issue_type: "point failure".to_string(),
        row: BTreeMap::from([("division".to_string(), "HSR".to_string())]),
        row_key: "row-9".to_string(),
        source_file_id: "file-3".to_string(),
        priority: ActionPriority::Normal,
        remark: None,
    };

    let error = h
        .service
        .submit_routing(request, "u-control", "req-1")
        .await
        .expect_err("nobody covers HSR for operating");

    assert!(matches!(
        error,
        ApplicationError::Routing(RoutingError::NoEligibleAssignee { ref division, .. })
            if division.as_deref() == Some("HSR")
    ));

    let items = h.service.list_site_records("u-control", true).await.expect("list");
    assert!(items.is_empty());
}

#[tokio::test]
async fn non_assignee_cannot_change_status() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(amc_request("9K9999", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    let error = h
        .service
        .update_action_status(&action.id, "u-intruder", complete(None), "req-2")
        .await
        .expect_err("stranger may not act");
    assert!(matches!(error, ApplicationError::Authorization { .. }));

    let unchanged = h
        .service
        .list_my_actions(&action.assigned_to_user_id, false)
        .await
        .expect("list")
        .into_iter()
        .find(|a| a.id == action.id)
        .expect("still assigned");
    assert_eq!(unchanged.status, ActionStatus::Pending);
}

#[tokio::test]
async fn vendor_chain_runs_equipment_then_final_sign_off() {
    let h = harness(vec!["3W2872"]).await;
    let action = h
        .service
        .submit_routing(amc_request("3W2872", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    // Stage 0 completes; the equipment review pair must appear.
    h.service
        .update_action_status(&action.id, "u-amc-sky-1", complete(Some("replaced battery")), "req-2")
        .await
        .expect("assignee completes");

    let equipment = h
        .ctx
        .approvals
        .find_pending_for_stage("3W2872", ApprovalStage::EquipmentReview)
        .await
        .expect("query")
        .expect("equipment review opened");
    assert_eq!(equipment.assigned_to, "u-equip-1");
    assert_eq!(equipment.prior_action_id, Some(action.id.clone()));

    // Equipment approves; the final pair must appear and ccr goes Pending.
    h.service
        .update_action_status(&equipment.action_id, "u-equip-1", complete(None), "req-3")
        .await
        .expect("equipment approves");

    let final_review = h
        .ctx
        .approvals
        .find_pending_for_stage("3W2872", ApprovalStage::FinalSignOff)
        .await
        .expect("query")
        .expect("final review opened");
    assert_eq!(final_review.assigned_to, "u-ccr-1");

    let records = h.service.list_site_records("u-amc-sky-1", true).await.expect("list");
    assert!(records.iter().all(|r| r.ccr_status == CcrStatus::Pending));

    // Any active controller may act on the final tier, not only u-ccr-1.
    h.service
        .update_action_status(&final_review.action_id, "u-ccr-2", complete(None), "req-4")
        .await
        .expect("role-wide final sign-off");

    let closed = h
        .ctx
        .approvals
        .find_by_id(&final_review.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(closed.status, ApprovalStatus::Approved);
    assert_eq!(closed.approved_by.as_deref(), Some("u-ccr-2"));

    let active = h.service.list_site_records("u-amc-sky-1", false).await.expect("list");
    assert!(active.is_empty(), "approved records leave the active view");

    let retained = h.service.list_site_records("u-amc-sky-1", true).await.expect("list");
    assert!(!retained.is_empty());
    assert!(retained.iter().all(|r| r.ccr_status == CcrStatus::Approved));
}

#[tokio::test]
async fn team_scoped_chain_skips_equipment_review() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");
    assert_eq!(action.assigned_to_user_id, "u-sig-hsr");

    h.service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("signal team completes");

    assert!(h
        .ctx
        .approvals
        .find_pending_for_stage("5T1100", ApprovalStage::EquipmentReview)
        .await
        .expect("query")
        .is_none());
    assert!(h
        .ctx
        .approvals
        .find_pending_for_stage("5T1100", ApprovalStage::FinalSignOff)
        .await
        .expect("query")
        .is_some());
}

#[tokio::test]
async fn kept_for_monitoring_remarks_stop_the_chain_and_revert_origin() {
    let h = harness(vec!["3W2872"]).await;
    let action = h
        .service
        .submit_routing(amc_request("3W2872", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    h.service
        .update_action_status(&action.id, "u-amc-sky-1", complete(None), "req-2")
        .await
        .expect("assignee completes");
    let equipment = h
        .ctx
        .approvals
        .find_pending_for_stage("3W2872", ApprovalStage::EquipmentReview)
        .await
        .expect("query")
        .expect("equipment review opened");

    // Legacy-style decision: InProgress plus the monitoring phrase.
    h.service
        .update_action_status(
            &equipment.action_id,
            "u-equip-1",
            StatusUpdate {
                status: ActionStatus::InProgress,
                decision: None,
                remarks: Some("please keep for monitoring until next quarter".to_string()),
            },
            "req-3",
        )
        .await
        .expect("reviewer rules");

    let closed = h
        .ctx
        .approvals
        .find_by_id(&equipment.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(closed.status, ApprovalStatus::KeptForMonitoring);

    assert!(
        h.ctx
            .approvals
            .find_pending_for_stage("3W2872", ApprovalStage::FinalSignOff)
            .await
            .expect("query")
            .is_none(),
        "no final stage after keep-for-monitoring"
    );

    let origin = h
        .service
        .list_my_actions("u-amc-sky-1", true)
        .await
        .expect("list")
        .into_iter()
        .find(|a| a.id == action.id)
        .expect("origin exists");
    assert_eq!(origin.status, ActionStatus::InProgress, "origin reverted");

    let records = h.service.list_site_records("u-amc-sky-1", true).await.expect("list");
    assert!(records.iter().all(|r| r.ccr_status == CcrStatus::KeptForMonitoring));
}

#[tokio::test]
async fn explicit_recheck_decision_reverts_without_advancing() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    h.service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("completes");
    let final_review = h
        .ctx
        .approvals
        .find_pending_for_stage("5T1100", ApprovalStage::FinalSignOff)
        .await
        .expect("query")
        .expect("final review opened");

    h.service
        .update_action_status(
            &final_review.action_id,
            "u-ccr-1",
            StatusUpdate {
                status: ActionStatus::InProgress,
                decision: Some(ReviewDecision::RequestRecheck),
                remarks: Some("voltage log incomplete".to_string()),
            },
            "req-3",
        )
        .await
        .expect("reviewer rules");

    let closed = h
        .ctx
        .approvals
        .find_by_id(&final_review.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(closed.status, ApprovalStatus::RecheckRequested);

    let origin = h
        .service
        .list_my_actions("u-sig-hsr", true)
        .await
        .expect("list")
        .into_iter()
        .find(|a| a.id == action.id)
        .expect("origin exists");
    assert_eq!(origin.status, ActionStatus::InProgress);
}

#[tokio::test]
async fn double_advancement_yields_exactly_one_pending_review() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    let completed = h
        .service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("completes");

    // A second, concurrent-looking advance through a fresh runner must hit
    // the guard and change nothing.
    let runner = ChainRunner::new(Arc::clone(&h.ctx));
    runner
        .advance_on_completion(&completed, "u-sig-hsr", "req-3")
        .await
        .expect("idempotent re-advance");

    let reviews = h.ctx.approvals.list_for_site("5T1100").await.expect("list");
    let pending_final: Vec<_> = reviews
        .iter()
        .filter(|a| a.stage == ApprovalStage::FinalSignOff && a.status == ApprovalStatus::Pending)
        .collect();
    assert_eq!(pending_final.len(), 1);
}

#[tokio::test]
async fn reroutes_preserve_the_original_owner() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");
    assert_eq!(action.assigned_to_user_id, "u-sig-hsr");

    let rerouted = h
        .service
        .reroute_action(
            &action.id,
            "u-control",
            "u-ele-hsr",
            "electrical_maintainer",
            Some("actually an electrical fault".to_string()),
            vec!["photo-1.jpg".to_string()],
            "req-2",
        )
        .await
        .expect("first reroute");
    assert_eq!(rerouted.status, ActionStatus::Pending);
    assert_eq!(rerouted.remarks.len(), 1);
    assert_eq!(rerouted.photo_refs, vec!["photo-1.jpg".to_string()]);

    let again = h
        .service
        .reroute_action(
            &action.id,
            "u-control",
            "u-sig-bza",
            "signal_maintainer",
            Some("transferred to BZA".to_string()),
            Vec::new(),
            "req-3",
        )
        .await
        .expect("second reroute");
    assert_eq!(again.remarks.len(), 2, "remarks only ever grow");

    let current_items = h.service.list_site_records("u-sig-bza", false).await.expect("list");
    let routed = current_items
        .iter()
        .find(|r| r.key.row_key.starts_with("row-7-routed-"))
        .expect("routed record followed the ticket");
    assert_eq!(routed.owner_user_id, "u-sig-bza");
    assert_eq!(routed.original_user_id, "u-sig-hsr", "first holder never changes");

    let old_items = h.service.list_site_records("u-ele-hsr", false).await.expect("list");
    assert!(old_items.is_empty(), "intermediate holder no longer owns the record");
}

#[tokio::test]
async fn resolving_the_routed_record_completes_the_action_and_advances() {
    let h = harness(vec!["3W2872"]).await;
    let action = h
        .service
        .submit_routing(amc_request("3W2872", "east"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    let routed = h
        .service
        .list_site_records("u-amc-sky-1", false)
        .await
        .expect("list")
        .into_iter()
        .next()
        .expect("routed record exists");

    let resolved = h
        .service
        .resolve_site_observation(
            &routed.key.file_id,
            &routed.key.row_key,
            ObservationStatus::Resolved,
            Some("fault cleared".to_string()),
            "u-amc-sky-1",
            "req-2",
        )
        .await
        .expect("owner resolves");
    assert_eq!(resolved.observation, ObservationStatus::Resolved);

    let origin = h
        .service
        .list_my_actions("u-amc-sky-1", true)
        .await
        .expect("list")
        .into_iter()
        .find(|a| a.id == action.id)
        .expect("origin exists");
    assert_eq!(origin.status, ActionStatus::Completed);

    // Same guarded advance as the primary path: one equipment review.
    let reviews = h.ctx.approvals.list_for_site("3W2872").await.expect("list");
    let pending: Vec<_> = reviews
        .iter()
        .filter(|a| {
            a.stage == ApprovalStage::EquipmentReview && a.status == ApprovalStatus::Pending
        })
        .collect();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn stranger_cannot_resolve_someone_elses_record() {
    let h = harness(vec![]).await;
    h.service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    let routed = h
        .service
        .list_site_records("u-sig-hsr", false)
        .await
        .expect("list")
        .into_iter()
        .next()
        .expect("routed record");

    let error = h
        .service
        .resolve_site_observation(
            &routed.key.file_id,
            &routed.key.row_key,
            ObservationStatus::Resolved,
            None,
            "u-ele-hsr",
            "req-2",
        )
        .await
        .expect_err("non-owner, non-controller");
    assert!(matches!(error, ApplicationError::Authorization { .. }));
}

#[tokio::test]
async fn delete_is_assignee_only_and_spares_the_approval() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");

    h.service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("completes");
    let final_review = h
        .ctx
        .approvals
        .find_pending_for_stage("5T1100", ApprovalStage::FinalSignOff)
        .await
        .expect("query")
        .expect("final review opened");

    let error = h
        .service
        .delete_action(&final_review.action_id, "u-sig-hsr", "req-3")
        .await
        .expect_err("only the reviewer owns the review action");
    assert!(matches!(error, ApplicationError::Authorization { .. }));

    h.service
        .delete_action(&final_review.action_id, "u-ccr-1", "req-4")
        .await
        .expect("assignee deletes");

    // The review record outlives the deleted ticket.
    let survivor = h
        .ctx
        .approvals
        .find_by_id(&final_review.id)
        .await
        .expect("query")
        .expect("approval retained");
    assert_eq!(survivor.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn notification_failure_never_masks_the_primary_mutation() {
    let overrides_repo = Arc::new(InMemoryVendorOverrideRepository::default());
    let ctx = Arc::new(WorkflowContext {
        actions: Arc::new(InMemoryActionRepository::default()),
        approvals: Arc::new(InMemoryApprovalRepository::default()),
        sites: Arc::new(InMemorySiteRecordRepository::default()),
        directory: Arc::new(InMemoryDirectoryRepository::with_users(SeedDataset::users()).await),
        overrides: Arc::new(CachedOverrideSet::new(overrides_repo)),
        notifier: Arc::new(FailingNotifier),
        audit: Arc::new(InMemoryAuditSink::default()),
        policy: RoutingPolicy::default(),
    });
    let service = WorkflowService::new(Arc::clone(&ctx));

    let action = service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds despite dead notifier");

    let listed = service.list_my_actions(&action.assigned_to_user_id, false).await.expect("list");
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn completed_actions_cannot_be_rerouted() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");
    h.service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("completes");

    let error = h
        .service
        .reroute_action(
            &action.id,
            "u-control",
            "u-ele-hsr",
            "electrical_maintainer",
            None,
            Vec::new(),
            "req-3",
        )
        .await
        .expect_err("terminal actions stay terminal");
    assert!(matches!(error, ApplicationError::Domain(_)));
}

#[tokio::test]
async fn every_controller_sees_the_pending_sign_off_queue() {
    let h = harness(vec![]).await;
    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");
    h.service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("completes");

    // The review was nominally assigned to u-ccr-1, but the queue is
    // role-scoped: u-ccr-2 must see it too.
    let queue = h
        .service
        .list_my_approvals("u-ccr-2", Some("ccr_controller"), true)
        .await
        .expect("list");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].stage, ApprovalStage::FinalSignOff);

    let personal = h.service.list_my_approvals("u-ccr-2", None, true).await.expect("list");
    assert!(personal.is_empty(), "without the role hint only direct assignments show");
}

#[tokio::test]
async fn notifier_sees_reviewer_hand_offs() {
    let notifier = InMemoryNotifier::default();
    let h = harness_with_notifier(vec![], notifier.clone()).await;

    let action = h
        .service
        .submit_routing(signal_request("HSR"), "u-control", "req-1")
        .await
        .expect("routing succeeds");
    h.service
        .update_action_status(&action.id, "u-sig-hsr", complete(None), "req-2")
        .await
        .expect("completes");

    let sent = notifier.notifications();
    assert!(sent.iter().any(|n| n.user_id == "u-sig-hsr"), "assignment notice");
    assert!(sent.iter().any(|n| n.user_id == "u-ccr-1"), "final reviewer notice");
}
