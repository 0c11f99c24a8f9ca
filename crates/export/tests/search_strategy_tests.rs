//! Tests of the three-tier search: type filters, unfiltered types and
//! patient compartments, across system, patient and group exports.

mod common;

use chrono::{DateTime, Utc};
use serde_json::json;

use common::*;
use helios_export::export::{DELETED_TAG_CODE, GENERIC_FAILURE_REASON};
use helios_export::types::ResourceWrapper;
use helios_export::types::search_params::names;
use helios_export::{ExportJobProgress, ExportType, JobStatus, ResourceFilter, StatusClass};

fn filter(text: &str) -> ResourceFilter {
    ResourceFilter::parse(text).unwrap()
}

fn instant(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
}

/// p1..p3 with observations o1 (p1, final), o2 (p1, preliminary) and
/// o3 (p2, final).
fn seed_clinic(harness: &TestHarness) {
    seed(
        &harness.search,
        [
            patient("p1"),
            patient("p2"),
            patient("p3"),
            observation("o1", "p1", "final"),
            observation("o2", "p1", "preliminary"),
            observation("o3", "p2", "final"),
        ],
    );
}

// ============================================================================
// System Export
// ============================================================================

/// Test that filters covering every requested type skip the unfiltered tier.
#[tokio::test]
async fn test_filters_covering_all_types_skip_unfiltered_tier() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    let record = harness
        .record(ExportType::All)
        .with_resource_types(["Patient", "Observation"])
        .with_filters(vec![
            filter("Patient?gender=female"),
            filter("Observation?status=final"),
        ]);

    let record = harness.run(record).await;

    assert_eq!(record.status, JobStatus::Completed);
    let calls = harness.search.calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| !c.parameters.contains(names::TYPE)));
    assert!(calls.iter().all(|c| c.resource_type.is_some()));
    assert_eq!(harness.exported_ids("Patient"), vec!["p1", "p2", "p3"]);
    assert_eq!(harness.exported_ids("Observation"), vec!["o1", "o3"]);

    let progress = harness.stored(&record.id).progress.unwrap();
    assert_eq!(progress.completed_filters().len(), 2);
}

/// Test that types without a filter are exported in one `_type` query.
#[tokio::test]
async fn test_unfiltered_types_share_one_query() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    seed(&harness.search, [condition("c1", "p3")]);
    let record = harness
        .record(ExportType::All)
        .with_resource_types(["Observation", "Condition", "Patient"])
        .with_filters(vec![filter("Observation?status=preliminary")]);

    harness.run(record).await;

    let typed: Vec<_> = harness
        .search
        .calls()
        .into_iter()
        .filter_map(|c| c.parameters.get(names::TYPE).map(str::to_string))
        .collect();
    assert!(!typed.is_empty());
    assert!(typed.iter().all(|t| t == "Condition,Patient"));
    assert_eq!(harness.exported_ids("Observation"), vec!["o2"]);
    assert_eq!(harness.exported_ids("Condition"), vec!["c1"]);
    assert_eq!(harness.exported_ids("Patient"), vec!["p1", "p2", "p3"]);
}

/// Test that filters on types that were not requested are ignored.
#[tokio::test]
async fn test_filters_for_unrequested_types_are_ignored() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    let record = harness
        .record(ExportType::All)
        .with_resource_types(["Patient"])
        .with_filters(vec![filter("Observation?status=final")]);

    harness.run(record).await;

    assert!(harness.exported("Observation").is_empty());
    assert_eq!(harness.exported_ids("Patient"), vec!["p1", "p2", "p3"]);
}

/// Test the `_since` and `_till` bounds.
#[tokio::test]
async fn test_since_and_till_bound_last_updated() {
    let mut recent = patient("p-new");
    recent["meta"]["lastUpdated"] = json!("2025-01-01T00:00:00.000Z");

    let harness = TestHarness::new();
    seed(&harness.search, [patient("p-old"), recent.clone()]);
    let mut record = harness.record(ExportType::All);
    record.since = Some(instant("2024-06-01T00:00:00Z"));
    harness.run(record).await;
    assert_eq!(harness.exported_ids("Patient"), vec!["p-new"]);

    let harness = TestHarness::new();
    seed(&harness.search, [patient("p-old"), recent]);
    let mut record = harness.record(ExportType::All);
    record.till = Some(instant("2024-06-01T00:00:00Z"));
    harness.run(record).await;
    assert_eq!(harness.exported_ids("Patient"), vec!["p-old"]);
}

/// Test that deleted resources are exported with the deleted tag only when
/// requested.
#[tokio::test]
async fn test_deleted_resources_carry_the_deleted_tag() {
    let harness = TestHarness::new();
    seed_patients(&harness.search, 1);
    let tombstone = json!({"resourceType": "Patient", "id": "gone"});
    harness.search.add(
        ResourceWrapper::from_content(&tombstone, "3", instant("2024-02-01T00:00:00Z"), 100)
            .unwrap()
            .deleted(),
    );

    harness.run(harness.record(ExportType::All)).await;
    assert_eq!(harness.exported_ids("Patient"), vec!["p1"]);

    let harness2 = TestHarness::new();
    seed_patients(&harness2.search, 1);
    harness2.search.add(
        ResourceWrapper::from_content(&tombstone, "3", instant("2024-02-01T00:00:00Z"), 100)
            .unwrap()
            .deleted(),
    );
    let mut record = harness2.record(ExportType::All);
    record.include_deleted = true;
    harness2.run(record).await;

    let exported = harness2.exported("Patient");
    assert_eq!(exported.len(), 2);
    let gone = &exported[1];
    assert_eq!(gone["id"], "gone");
    assert_eq!(gone["meta"]["versionId"], "3");
    assert!(
        gone["meta"]["tag"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["code"] == DELETED_TAG_CODE)
    );
}

// ============================================================================
// Patient Export
// ============================================================================

/// Test a patient export with an observation filter: patients come from the
/// unfiltered tier, observations from filtered compartment scans.
#[tokio::test]
async fn test_patient_export_with_compartment_filter() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    let record = harness
        .record(ExportType::Patient)
        .with_resource_types(["Patient", "Observation"])
        .with_filters(vec![filter("Observation?status=final")]);

    let record = harness.run(record).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(harness.exported_ids("Patient"), vec!["p1", "p2", "p3"]);
    assert_eq!(harness.exported_ids("Observation"), vec!["o1", "o3"]);

    let calls = harness.search.calls();
    assert!(calls.iter().any(|c| c.compartment.is_none()
        && c.parameters.get(names::TYPE) == Some("Patient")));

    let compartment_calls: Vec<_> = calls.iter().filter(|c| c.compartment.is_some()).collect();
    assert_eq!(compartment_calls.len(), 3);
    for call in compartment_calls {
        assert_eq!(call.resource_type.as_deref(), Some("Observation"));
        assert_eq!(call.parameters.get("status"), Some("final"));
        assert!(!call.parameters.contains(names::TYPE));
    }
}

/// Test that patients are only written when requested, but still drive the
/// compartment scans.
#[tokio::test]
async fn test_patient_export_without_patient_type() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    let record = harness
        .record(ExportType::Patient)
        .with_resource_types(["Observation"]);

    harness.run(record).await;

    assert!(harness.exported("Patient").is_empty());
    assert_eq!(harness.exported_ids("Observation"), vec!["o1", "o2", "o3"]);
}

/// Test that a patient filter restricts which compartments are scanned.
#[tokio::test]
async fn test_patient_filter_selects_compartments() {
    let mut male = patient("p2");
    male["gender"] = json!("male");

    let harness = TestHarness::new();
    seed(
        &harness.search,
        [
            patient("p1"),
            male,
            observation("o1", "p1", "final"),
            observation("o3", "p2", "final"),
        ],
    );
    let record = harness
        .record(ExportType::Patient)
        .with_resource_types(["Patient", "Observation"])
        .with_filters(vec![filter("Patient?gender=female")]);

    harness.run(record).await;

    assert_eq!(harness.exported_ids("Patient"), vec!["p1"]);
    assert_eq!(harness.exported_ids("Observation"), vec!["o1"]);
    assert!(
        harness
            .search
            .calls()
            .iter()
            .all(|c| c.compartment.is_some() || !c.parameters.contains(names::TYPE))
    );
}

/// Test that a resumed job skips compartments that were already exported.
#[tokio::test]
async fn test_compartment_resume_skips_finished_patients() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    let mut record = harness.record(ExportType::Patient);
    let mut progress = ExportJobProgress::new();
    progress.new_sub_search("p2");
    record.status = JobStatus::Running;
    record.progress = Some(progress);

    let record = harness.run(record).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.restart_count, 1);
    assert_eq!(harness.exported_ids("Patient"), vec!["p3"]);
    assert_eq!(harness.exported_ids("Observation"), vec!["o3"]);
    let scanned: Vec<String> = harness
        .search
        .calls()
        .into_iter()
        .filter_map(|c| c.compartment.map(|(_, id)| id))
        .collect();
    assert_eq!(scanned, vec!["p2", "p3"]);
}

/// Test that a missing triggering patient fails the job.
#[tokio::test]
async fn test_compartment_resume_with_missing_patient_fails() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    let mut record = harness.record(ExportType::Patient);
    let mut progress = ExportJobProgress::new();
    progress.new_sub_search("p-gone");
    record.status = JobStatus::Running;
    record.progress = Some(progress);

    let record = harness.run(record).await;

    assert_eq!(record.status, JobStatus::Failed);
    let details = record.failure_details.unwrap();
    assert_eq!(details.reason, GENERIC_FAILURE_REASON);
    assert_eq!(details.status_class, StatusClass::InternalServerError);
}

// ============================================================================
// Group Export
// ============================================================================

/// Test that a group export covers exactly the members' compartments.
#[tokio::test]
async fn test_group_export_limits_to_members() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    harness.groups.set_group("g1", ["p1", "p3"]);

    let record = harness
        .run(harness.record(ExportType::Group).with_group("g1"))
        .await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(harness.exported_ids("Patient"), vec!["p1", "p3"]);
    assert_eq!(harness.exported_ids("Observation"), vec!["o1", "o2"]);
    let first = &harness.search.calls()[0];
    assert_eq!(first.parameters.get(names::ID), Some("p1,p3"));
}

/// Test that a group export resumed from a checkpoint continues with the
/// stored token instead of resolving the group again.
#[tokio::test]
async fn test_resumed_group_export_skips_membership_resolution() {
    let first = TestHarness::new();
    seed_patients(&first.search, 3);
    first.groups.set_group("g1", ["p1", "p2", "p3"]);
    let completed = first
        .run(first.record(ExportType::Group).with_group("g1"))
        .await;
    assert_eq!(first.groups.resolve_count(), 1);

    let snapshot = first
        .store
        .history(&completed.id)
        .into_iter()
        .find(|r| r.progress.as_ref().is_some_and(|p| p.page() == 1))
        .expect("checkpoint after the first page");

    let second = TestHarness::new();
    seed_patients(&second.search, 3);
    second.groups.set_group("g1", ["p1", "p2", "p3"]);

    let resumed = second.run(snapshot).await;

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.restart_count, 1);
    assert_eq!(second.groups.resolve_count(), 0);
    let first_call = &second.search.calls()[0];
    assert!(first_call.compartment.is_none());
    assert!(first_call.parameters.contains(names::CONTINUATION_TOKEN));
    assert!(!first_call.parameters.contains(names::ID));
    assert_eq!(second.exported_ids("Patient"), vec!["p3"]);
}

/// Test that a group without members completes without searching.
#[tokio::test]
async fn test_empty_group_completes_without_searching() {
    let harness = TestHarness::new();
    seed_clinic(&harness);
    harness.groups.set_group("g-empty", Vec::<String>::new());

    let record = harness
        .run(harness.record(ExportType::Group).with_group("g-empty"))
        .await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(harness.search.call_count(), 0);
    assert!(harness.destination.files().is_empty());
    assert!(record.output.is_empty());
}

/// Test that an unknown group fails as a client error.
#[tokio::test]
async fn test_unknown_group_fails_as_bad_request() {
    let harness = TestHarness::new();

    let record = harness
        .run(harness.record(ExportType::Group).with_group("nope"))
        .await;

    assert_eq!(record.status, JobStatus::Failed);
    let details = record.failure_details.unwrap();
    assert_eq!(details.status_class, StatusClass::BadRequest);
    assert!(details.reason.contains("Group/nope"));
}
