//! Recorded benchmark outcomes

use indexmap::IndexMap;
use serde::Serialize;

use cm_core::ExpectationKind;

/// Outcome of one side of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Waiting for a run or for its response
    Awaiting,
    /// A renderable model arrived
    Success,
    /// A reply arrived without a model
    NoModel,
    /// The backend reported a failure
    Error,
    /// No reply in time, or the channel dropped
    Timeout,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Awaiting => "awaiting",
            CaseStatus::Success => "success",
            CaseStatus::NoModel => "no-model",
            CaseStatus::Error => "error",
            CaseStatus::Timeout => "timeout",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, CaseStatus::Awaiting)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutcome {
    pub status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub elapsed_ms: u64,
}

/// Both sides of one case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<CaseOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<CaseOutcome>,
}

impl CaseResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            llm: None,
            ground_truth: None,
        }
    }

    pub fn outcome(&self, kind: ExpectationKind) -> Option<&CaseOutcome> {
        match kind {
            ExpectationKind::Llm => self.llm.as_ref(),
            ExpectationKind::GroundTruth => self.ground_truth.as_ref(),
        }
    }

    pub(crate) fn set(&mut self, kind: ExpectationKind, outcome: CaseOutcome) {
        match kind {
            ExpectationKind::Llm => self.llm = Some(outcome),
            ExpectationKind::GroundTruth => self.ground_truth = Some(outcome),
        }
    }
}

/// Serialized form of all recorded results
#[derive(Debug, Serialize)]
pub struct ResultsExport<'a> {
    pub exported_at: u64,
    pub results: &'a IndexMap<String, CaseResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(CaseStatus::NoModel.to_string(), "no-model");
        assert_eq!(
            serde_json::to_value(CaseStatus::NoModel).unwrap(),
            serde_json::json!("no_model")
        );
        assert!(!CaseStatus::Awaiting.is_final());
        assert!(CaseStatus::Timeout.is_final());
    }

    #[test]
    fn test_result_skips_missing_sides() {
        let mut result = CaseResult::new("Box");
        result.set(
            ExpectationKind::Llm,
            CaseOutcome {
                status: CaseStatus::Success,
                message: None,
                elapsed_ms: 12,
            },
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["llm"]["status"], "success");
        assert!(value.get("ground_truth").is_none());
        assert!(result.outcome(ExpectationKind::GroundTruth).is_none());
    }
}
