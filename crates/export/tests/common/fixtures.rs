//! Seed resources.

use serde_json::{Value, json};

use helios_export::backends::memory::InMemorySearchService;

/// Last-updated instant of every fixture.
pub const FIXTURE_LAST_UPDATED: &str = "2024-01-01T00:00:00.000Z";

/// A patient with embedded metadata.
pub fn patient(id: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "meta": {"versionId": "1", "lastUpdated": FIXTURE_LAST_UPDATED},
        "gender": "female",
        "name": [{"family": format!("Family-{}", id)}]
    })
}

/// An observation about `patient_id`.
pub fn observation(id: &str, patient_id: &str, status: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "meta": {"versionId": "1", "lastUpdated": FIXTURE_LAST_UPDATED},
        "status": status,
        "subject": {"reference": format!("Patient/{}", patient_id)}
    })
}

/// A condition of `patient_id`.
pub fn condition(id: &str, patient_id: &str) -> Value {
    json!({
        "resourceType": "Condition",
        "id": id,
        "meta": {"versionId": "1", "lastUpdated": FIXTURE_LAST_UPDATED},
        "subject": {"reference": format!("Patient/{}", patient_id)}
    })
}

/// Inserts every resource, in order.
pub fn seed(search: &InMemorySearchService, resources: impl IntoIterator<Item = Value>) {
    for resource in resources {
        search.insert(resource).expect("fixture resource is valid");
    }
}

/// Inserts patients `p1..=pN`.
pub fn seed_patients(search: &InMemorySearchService, count: usize) {
    seed(search, (1..=count).map(|i| patient(&format!("p{}", i))));
}
