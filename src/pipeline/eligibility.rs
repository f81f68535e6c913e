//! Eligibility filter: which listed cases get a letter at all.
//!
//! Pure and order-preserving. A case is eligible when it is approved and
//! none of its case types is excluded; a case with no types is eligible
//! when approved.

use std::collections::BTreeSet;

use crate::pipeline::types::{CaseStatus, CaseSummary};

/// Whether a single summary passes the business rules.
pub fn is_eligible(case: &CaseSummary, excluded_case_types: &BTreeSet<String>) -> bool {
    case.status == CaseStatus::Approved && case.case_types.is_disjoint(excluded_case_types)
}

/// Keep only eligible summaries, preserving order.
pub fn filter_cases(
    cases: Vec<CaseSummary>,
    excluded_case_types: &BTreeSet<String>,
) -> Vec<CaseSummary> {
    cases
        .into_iter()
        .filter(|case| is_eligible(case, excluded_case_types))
        .collect()
}
