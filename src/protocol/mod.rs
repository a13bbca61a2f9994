use crate::cleanup::CleanupAction;
use crate::validators::{ValidationResult, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize)]
pub struct Suite {
    pub meta: Meta,
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Meta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One unit of work: a single MCP tool invocation plus its validations
/// and teardown. `test_name` must be unique within a run; `dependencies`
/// reference other cases by name and must form a DAG.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TestCase {
    pub test_name: String,
    pub tool_name: String,
    pub input_params: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub cleanups: Vec<CleanupAction>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one test case. Skipped cases carry the failing ancestor in
/// their validation message; errored cases carry the exception text in
/// `error` instead.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutionResult {
    pub test_name: String,
    pub status: CaseStatus,
    pub success: bool,
    #[serde(default)]
    pub validations: Vec<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExecutionReport {
    pub run_id: uuid::Uuid,
    pub suite_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub summary: RunSummary,
    pub success_map: HashMap<String, bool>,
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    pub fn from_success_map(success_map: &HashMap<String, bool>) -> Self {
        let total = success_map.len();
        let passed = success_map.values().filter(|v| **v).count();
        let success_rate = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            passed,
            failed: total - passed,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_arithmetic() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), true);
        map.insert("b".to_string(), true);
        map.insert("c".to_string(), false);
        map.insert("d".to_string(), false);

        let summary = RunSummary::from_success_map(&map);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 2);
        assert!((summary.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_empty_run() {
        let summary = RunSummary::from_success_map(&HashMap::new());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn test_case_deserializes_with_defaults() {
        let raw = serde_json::json!({
            "test_name": "create_database_basic",
            "tool_name": "manage_aws_glue_databases",
            "input_params": { "operation": "create-database", "database_name": "db1" }
        });

        let case: TestCase = serde_json::from_value(raw).unwrap();
        assert!(case.dependencies.is_empty());
        assert!(case.validators.is_empty());
        assert!(case.cleanups.is_empty());
    }
}
