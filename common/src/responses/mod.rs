use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Synchronous response of the attendance import endpoint.
///
/// `success` reports that the pipeline ran to completion; row and batch
/// failures are reported through `errors` and `error_details`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub success: bool,
    pub saved: u64,
    pub saved_by_year: BTreeMap<i32, u64>,
    pub errors: u64,
    pub error_details: Vec<String>,
    pub total_attendance: u64,
    pub year_counts: BTreeMap<i32, u64>,
    pub message: String,
}
