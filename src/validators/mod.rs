// Module: Validators
// Pass/fail checks over MCP tool responses and over live AWS state.
// The two calling conventions are variants of one tagged union so the
// executor dispatches on the variant instead of inspecting types.

use crate::client::{StateClient, StateError};
use crate::injection::{extract_path, ResponseMap};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Expected value of the ManagedBy tag on every resource the MCP server
/// creates.
pub const MANAGED_BY_VALUE: &str = "DataprocessingMcpServer";

/// Tags stamped on managed resources; their presence is verified unless
/// the operation is in the skip-list.
pub const MANAGED_RESOURCE_TAGS: &[&str] = &["CreatedAt", "ManagedBy", "ResourceType"];

/// Read-only operations whose targets are not tagged by the server
/// (IAM / S3 / sub-resource / listing-style calls).
pub const SKIP_TAG_CHECK_OPERATIONS: &[&str] = &[
    "describe_step",
    "list_role_policies",
    "get_role_policy",
    "get_role",
    "get_partition",
    "list_instance_groups",
    "list_instance_fleets",
    "get_data_catalog_encryption_settings",
    "get_object",
    "get_workflow_run",
    "get_classifier",
    "get_usage_profile",
    "get_security_configuration",
    "list_objects_v2",
    "get_caller_identity",
    "get_query_execution",
    "get_named_query",
];

static INJECTABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{(.+?)\}\}$").expect("valid injectable regex"));

/// snake_case tool parameter names to the casing the AWS APIs use.
fn aws_param_key(key: &str) -> &str {
    match key {
        "job_name" => "JobName",
        "database_name" => "DatabaseName",
        "job_definition" => "JobDefinition",
        "table_name" => "Name",
        "cluster_id" => "ClusterId",
        "step_id" => "StepId",
        "policy_name" => "PolicyName",
        "location_uri" => "LocationUri",
        "role_name" => "RoleName",
        "release_label" => "ReleaseLabel",
        "step_concurrency_level" => "StepConcurrencyLevel",
        "termination_protected" => "TerminationProtected",
        "session_id" => "Id",
        "crawler_name" => "Name",
        "trigger_name" => "Name",
        "classifier_name" => "Name",
        "profile_name" => "Name",
        "description" => "Description",
        "command" => "Command",
        "configuration" => "Configuration",
        other => other,
    }
}

/// Per-operation prefixes for expected-key comparison: the sub-object of
/// the tool input holding the definition, and the singular wrapper the
/// AWS response nests the resource under.
fn operation_prefixes(operation: &str) -> (Option<&'static str>, Option<&'static str>) {
    match operation {
        "get_job" => (Some("job_definition"), Some("Job")),
        "get_database" => (Some(""), Some("Database")),
        "get_table" => (Some("table_input"), Some("Table")),
        "get_crawler" => (Some("crawler_definition"), Some("Crawler")),
        "get_role" => (Some(""), Some("Role")),
        "describe_cluster" => (Some(""), Some("Cluster")),
        "get_trigger" => (Some(""), Some("Trigger")),
        "get_workflow" => (Some(""), Some("Workflow")),
        "get_session" => (Some(""), Some("Session")),
        "get_work_group" => (Some(""), Some("WorkGroup")),
        "get_data_catalog" => (Some(""), Some("DataCatalog")),
        "get_data_catalog_encryption_settings" => (Some(""), Some("DataCatalogEncryptionSettings")),
        _ => (None, None),
    }
}

/// Result of one validation. `details` carries structured mismatch
/// information when available.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ValidationResult {
    pub success: bool,
    pub message: String,
    /// Failure text, mirrored from `message` on failed validations so
    /// report consumers can read failures from a single field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ValidationResult {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_message: None,
            details: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error_message: Some(message.clone()),
            message,
            details: None,
        }
    }

    pub fn fail_with_details(message: impl Into<String>, details: Value) -> Self {
        let mut result = Self::fail(message);
        result.details = Some(details);
        result
    }
}

/// Everything a validator may need; each variant reads only its share.
pub struct ValidationContext<'a> {
    /// Raw response of the current case's tool call.
    pub response: &'a Value,
    /// The case's resolved input parameters.
    pub tool_params: &'a Value,
    /// Responses captured so far, for injectable parameters.
    pub responses: &'a ResponseMap,
    /// Live-state query client.
    pub state: &'a dyn StateClient,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Validator {
    /// Inspects the immediate tool response.
    ContainsText(ContainsTextValidator),
    /// Queries live AWS state through the state client.
    AwsState(AwsStateValidator),
}

impl Validator {
    pub async fn validate(&self, cx: &ValidationContext<'_>) -> ValidationResult {
        match self {
            Validator::ContainsText(v) => v.validate(cx.response),
            Validator::AwsState(v) => v.validate(cx.state, cx.tool_params, cx.responses).await,
        }
    }
}

// ============================================================================
// Response-inspecting validator
// ============================================================================

/// Checks the text embedded in an MCP tool response. Responses wrap a
/// JSON document inside `result.content[0].text`; error responses may
/// carry plain text instead.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContainsTextValidator {
    pub expected_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<i64>,
}

impl ContainsTextValidator {
    pub fn new(expected_string: impl Into<String>) -> Self {
        Self {
            expected_string: expected_string.into(),
            expected_count: None,
            bucket_count: None,
        }
    }

    pub fn validate(&self, response: &Value) -> ValidationResult {
        let first_text = match response
            .pointer("/result/content/0/text")
            .and_then(Value::as_str)
        {
            Some(text) => text,
            None => return ValidationResult::fail("No content in response"),
        };

        let parsed: Value = match serde_json::from_str(first_text) {
            Ok(parsed) => parsed,
            Err(_) => {
                // Error responses are plain text, not embedded JSON.
                if first_text.contains(&self.expected_string) {
                    return ValidationResult::pass("Error message contains expected string");
                }
                return ValidationResult::fail(format!(
                    "Expected string '{}' not found, and not valid JSON",
                    self.expected_string
                ));
            }
        };

        let embedded = parsed
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !embedded.contains(&self.expected_string) {
            return ValidationResult::fail(format!(
                "Expected string '{}' not found in response",
                self.expected_string
            ));
        }

        if let Some(expected) = self.expected_count {
            let actual = parsed.get("count").and_then(Value::as_i64);
            if actual != Some(expected) {
                return ValidationResult::fail(format!(
                    "Count mismatch: expected {}, got {:?}",
                    expected, actual
                ));
            }
        }
        if let Some(expected) = self.bucket_count {
            let actual = parsed.get("bucket_count").and_then(Value::as_i64);
            if actual != Some(expected) {
                return ValidationResult::fail(format!(
                    "Bucket count mismatch: expected {}, got {:?}",
                    expected, actual
                ));
            }
        }

        ValidationResult::pass("Text and count match")
    }
}

// ============================================================================
// Live-state validator
// ============================================================================

/// Calls a read-only describe operation and compares selected fields of
/// the live resource against the tool input, plus the managed-resource
/// tag check. `validate_absence` inverts the contract: a NotFound error
/// is the success condition.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AwsStateValidator {
    pub operation: String,
    #[serde(default)]
    pub operation_input_params: Map<String, Value>,
    #[serde(default)]
    pub expected_keys: Vec<String>,
    #[serde(default)]
    pub validate_absence: bool,
    /// Values of the form `{{dep.path}}`, resolved from prior responses
    /// and merged into the operation input under the AWS key casing.
    #[serde(default)]
    pub injectable_params: Map<String, Value>,
}

impl AwsStateValidator {
    pub async fn validate(
        &self,
        state: &dyn StateClient,
        tool_params: &Value,
        responses: &ResponseMap,
    ) -> ValidationResult {
        let mut params = normalize_params(&self.operation_input_params);

        for (key, value) in &self.injectable_params {
            let template = match value.as_str().and_then(|s| {
                INJECTABLE_RE
                    .captures(s)
                    .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
            }) {
                Some(t) => t,
                None => {
                    params.insert(aws_param_key(key).to_string(), value.clone());
                    continue;
                }
            };

            let (dep_name, sub_path) = match template.split_once('.') {
                Some((dep, rest)) => (dep, rest),
                None => (template.as_str(), ""),
            };
            let dep_response = match responses.get(dep_name).filter(|v| !v.is_null()) {
                Some(r) => r,
                None => {
                    return ValidationResult::fail(format!(
                        "Missing response for dependency: {dep_name}"
                    ))
                }
            };
            match extract_path(dep_response, sub_path) {
                Ok(resolved) => {
                    params.insert(aws_param_key(key).to_string(), resolved);
                }
                Err(e) => {
                    return ValidationResult::fail(format!("Failed to inject param '{key}': {e}"))
                }
            }
        }

        let response = match state.describe(&self.operation, &params).await {
            Ok(response) => response,
            Err(StateError::NotFound { code }) if self.validate_absence => {
                return ValidationResult::pass(format!("Resource correctly not found: {code}"));
            }
            Err(e) => {
                return ValidationResult::fail(format!(
                    "Error during validation for '{}': {e}",
                    self.operation
                ));
            }
        };

        if self.validate_absence {
            // Trigger deletion is asynchronous on the AWS side.
            if self.operation == "get_trigger"
                && response.pointer("/Trigger/State").and_then(Value::as_str) == Some("DELETING")
            {
                return ValidationResult::pass(
                    "Trigger is in DELETING state, considered as deleted",
                );
            }
            return ValidationResult::fail(format!(
                "Expected resource to NOT exist, but it does: {response}"
            ));
        }

        let mut mismatches = self.compare_expected_keys(tool_params, &response);
        self.check_managed_tags(&response, &mut mismatches);

        if mismatches.is_empty() {
            ValidationResult::pass(format!(
                "Validation successful for operation '{}'",
                self.operation
            ))
        } else {
            ValidationResult::fail_with_details(
                format!("Validation failed: {}", mismatches.join("; ")),
                Value::Array(mismatches.into_iter().map(Value::String).collect()),
            )
        }
    }

    fn compare_expected_keys(&self, tool_params: &Value, response: &Value) -> Vec<String> {
        let mut mismatches = Vec::new();
        let (input_prefix, response_prefix) = operation_prefixes(&self.operation);

        for key_path in &self.expected_keys {
            let expected = match input_prefix {
                Some("") | None => get_nested_value(tool_params, key_path),
                Some(prefix) => {
                    let sub = tool_params.get(prefix).cloned().unwrap_or(Value::Null);
                    get_nested_value(&sub, aws_param_key(key_path))
                }
            };
            let actual = match response_prefix {
                Some(prefix) if !prefix.is_empty() => {
                    let sub = response.get(prefix).cloned().unwrap_or(Value::Null);
                    get_nested_value(&sub, key_path)
                }
                _ => get_nested_value(response, key_path),
            };

            if expected != actual {
                // A scalar expectation may legitimately live inside a
                // list-valued field on the AWS side.
                if let Some(list) = actual.as_ref().and_then(Value::as_array) {
                    if let Some(expected_value) = &expected {
                        if list.contains(expected_value) {
                            continue;
                        }
                    }
                    mismatches.push(format!(
                        "Expected '{:?}' in list at '{}', but got {:?}",
                        expected, key_path, actual
                    ));
                } else {
                    mismatches.push(format!(
                        "Mismatch for '{}': expected '{:?}', got '{:?}'",
                        key_path, expected, actual
                    ));
                }
            }
        }

        mismatches
    }

    fn check_managed_tags(&self, response: &Value, mismatches: &mut Vec<String>) {
        if SKIP_TAG_CHECK_OPERATIONS.contains(&self.operation.as_str()) {
            info!(operation = %self.operation, "skipping tag validation");
            return;
        }

        let tag_value = if self.operation == "describe_cluster" {
            response.pointer("/Cluster/Tags")
        } else {
            find_tags_field(response)
        };

        let tags = match tag_value.map(tags_as_map) {
            Some(tags) => tags,
            None => {
                warn!(operation = %self.operation, "no Tags field in describe response");
                Map::new()
            }
        };

        for tag_key in MANAGED_RESOURCE_TAGS {
            if !tags.contains_key(*tag_key) {
                mismatches.push(format!("Missing tag: {tag_key}"));
            }
        }
        let managed_by = tags.get("ManagedBy").and_then(Value::as_str);
        if managed_by != Some(MANAGED_BY_VALUE) {
            mismatches.push(format!(
                "ManagedBy should be '{}', got '{:?}'",
                MANAGED_BY_VALUE, managed_by
            ));
        }
    }
}

fn normalize_params(params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (aws_param_key(k).to_string(), v.clone()))
        .collect()
}

/// Looks for a `Tags` field at the top level or one level down (AWS
/// describe responses nest the resource under a singular wrapper).
fn find_tags_field(response: &Value) -> Option<&Value> {
    if let Some(tags) = response.get("Tags") {
        return Some(tags);
    }
    response
        .as_object()?
        .values()
        .find_map(|nested| nested.get("Tags"))
}

/// Tags arrive either as `{"Key": .., "Value": ..}` pairs (Glue, EMR,
/// Athena) or as a plain map (IAM-style).
fn tags_as_map(tags: &Value) -> Map<String, Value> {
    match tags {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let key = item.get("Key")?.as_str()?.to_string();
                let value = item.get("Value").cloned().unwrap_or(Value::Null);
                Some((key, value))
            })
            .collect(),
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

/// Dot-path lookup with case-insensitive segment matching, since tool
/// inputs are snake_case while AWS responses are PascalCase.
fn get_nested_value(data: &Value, key_path: &str) -> Option<Value> {
    let mut current = data.clone();
    for key in key_path.split('.') {
        let obj = current.as_object()?;
        let matched = obj
            .get(key)
            .or_else(|| {
                obj.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })?
            .clone();
        current = matched;
    }
    Some(current)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn mcp_response(embedded: Value) -> Value {
        json!({
            "result": {
                "content": [{ "text": embedded.to_string() }]
            }
        })
    }

    // ------------------------------------------------------------------------
    // ContainsTextValidator
    // ------------------------------------------------------------------------

    #[test]
    fn test_contains_text_in_embedded_json() {
        let response = mcp_response(json!({
            "content": [{ "text": "Successfully created database mcp_test_database" }]
        }));
        let validator = ContainsTextValidator::new("Successfully created database");
        assert!(validator.validate(&response).success);
    }

    #[test]
    fn test_contains_text_missing_string_fails() {
        let response = mcp_response(json!({
            "content": [{ "text": "something else entirely" }]
        }));
        let result = ContainsTextValidator::new("Successfully created").validate(&response);
        assert!(!result.success);
        assert!(result.message.contains("not found in response"));
    }

    #[test]
    fn test_contains_text_plain_error_text() {
        let response = json!({
            "result": { "content": [{ "text": "database_name is required for create-database operation" }] }
        });
        let result = ContainsTextValidator::new("database_name is required").validate(&response);
        assert!(result.success);
        assert_eq!(result.message, "Error message contains expected string");
    }

    #[test]
    fn test_contains_text_no_content() {
        let result = ContainsTextValidator::new("anything").validate(&json!({"result": {}}));
        assert!(!result.success);
        assert_eq!(result.message, "No content in response");
    }

    #[test]
    fn test_contains_text_count_check() {
        let response = mcp_response(json!({
            "content": [{ "text": "Found 3 jobs" }],
            "count": 3
        }));
        let mut validator = ContainsTextValidator::new("Found 3 jobs");
        validator.expected_count = Some(3);
        assert!(validator.validate(&response).success);

        validator.expected_count = Some(5);
        let result = validator.validate(&response);
        assert!(!result.success);
        assert!(result.message.contains("Count mismatch"));
    }

    // ------------------------------------------------------------------------
    // AwsStateValidator, against a scripted state client
    // ------------------------------------------------------------------------

    struct FakeState {
        response: Result<Value, StateError>,
        seen_params: Mutex<Option<Map<String, Value>>>,
    }

    impl FakeState {
        fn returning(response: Value) -> Self {
            Self {
                response: Ok(response),
                seen_params: Mutex::new(None),
            }
        }

        fn not_found(code: &str) -> Self {
            Self {
                response: Err(StateError::NotFound {
                    code: code.to_string(),
                }),
                seen_params: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl StateClient for FakeState {
        async fn describe(
            &self,
            _operation: &str,
            params: &Map<String, Value>,
        ) -> Result<Value, StateError> {
            *self.seen_params.lock().unwrap() = Some(params.clone());
            match &self.response {
                Ok(v) => Ok(v.clone()),
                Err(StateError::NotFound { code }) => {
                    Err(StateError::NotFound { code: code.clone() })
                }
                Err(StateError::Api(m)) => Err(StateError::Api(m.clone())),
            }
        }

        async fn delete(
            &self,
            _operation: &str,
            _params: &Map<String, Value>,
        ) -> Result<(), StateError> {
            Ok(())
        }
    }

    fn tagged(mut resource: Value) -> Value {
        resource["Tags"] = json!([
            { "Key": "CreatedAt", "Value": "2025-01-01T00:00:00Z" },
            { "Key": "ManagedBy", "Value": "DataprocessingMcpServer" },
            { "Key": "ResourceType", "Value": "database" }
        ]);
        resource
    }

    fn validator(operation: &str) -> AwsStateValidator {
        AwsStateValidator {
            operation: operation.to_string(),
            operation_input_params: Map::new(),
            expected_keys: vec![],
            validate_absence: false,
            injectable_params: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_state_expected_keys_match() {
        let state = FakeState::returning(tagged(json!({
            "Database": { "Description": "Test database" }
        })));
        let mut v = validator("get_database");
        v.expected_keys = vec!["description".to_string()];

        let tool_params = json!({ "description": "Test database" });
        let result = v.validate(&state, &tool_params, &ResponseMap::new()).await;
        assert!(result.success, "{}", result.message);
    }

    #[tokio::test]
    async fn test_state_expected_keys_mismatch() {
        let state = FakeState::returning(tagged(json!({
            "Database": { "Description": "wrong" }
        })));
        let mut v = validator("get_database");
        v.expected_keys = vec!["description".to_string()];

        let tool_params = json!({ "description": "Test database" });
        let result = v.validate(&state, &tool_params, &ResponseMap::new()).await;
        assert!(!result.success);
        assert!(result.message.contains("Mismatch for 'description'"));
        assert!(result.details.is_some());
    }

    #[tokio::test]
    async fn test_state_absence_not_found_is_success() {
        let state = FakeState::not_found("EntityNotFoundException");
        let mut v = validator("get_database");
        v.validate_absence = true;

        let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
        assert!(result.success);
        assert!(result.message.contains("correctly not found"));
    }

    #[tokio::test]
    async fn test_state_absence_fails_when_resource_exists() {
        let state = FakeState::returning(json!({ "Database": { "Name": "still_here" } }));
        let mut v = validator("get_database");
        v.validate_absence = true;

        let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_state_absence_trigger_deleting_counts_as_deleted() {
        let state = FakeState::returning(json!({ "Trigger": { "State": "DELETING" } }));
        let mut v = validator("get_trigger");
        v.validate_absence = true;

        let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_state_missing_managed_tags() {
        let state = FakeState::returning(json!({ "Database": { "Name": "db" } }));
        let v = validator("get_database");

        let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
        assert!(!result.success);
        assert!(result.message.contains("Missing tag: CreatedAt"));
        assert!(result.message.contains("ManagedBy should be"));
    }

    #[tokio::test]
    async fn test_state_tag_check_skipped_for_listed_operations() {
        let state = FakeState::returning(json!({ "Role": { "RoleName": "glue-role" } }));
        let v = validator("get_role");

        let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
        assert!(result.success, "{}", result.message);
    }

    #[tokio::test]
    async fn test_state_tag_check_skipped_for_untagged_sub_resources() {
        // These resources are never tagged by the server, so the tag
        // check must not fail them despite the tagless describe output.
        for operation in [
            "describe_step",
            "get_partition",
            "get_classifier",
            "get_usage_profile",
            "get_security_configuration",
        ] {
            let state = FakeState::returning(json!({ "Name": "untagged" }));
            let v = validator(operation);
            let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
            assert!(result.success, "{operation}: {}", result.message);
        }
    }

    #[tokio::test]
    async fn test_state_injectable_param_from_dependency() {
        let state = FakeState::returning(tagged(json!({ "Session": { "Status": "READY" } })));
        let mut v = validator("get_session");
        v.injectable_params.insert(
            "session_id".to_string(),
            json!("{{create_session.result.content[0].text.session_id}}"),
        );

        let mut responses = ResponseMap::new();
        responses.insert(
            "create_session".to_string(),
            mcp_response(json!({ "session_id": "sess-42" })),
        );

        let result = v.validate(&state, &json!({}), &responses).await;
        assert!(result.success, "{}", result.message);

        let seen = state.seen_params.lock().unwrap().clone().unwrap();
        // session_id is normalized to the Glue API's "Id" key.
        assert_eq!(seen.get("Id"), Some(&json!("sess-42")));
    }

    #[tokio::test]
    async fn test_state_injectable_param_missing_dependency() {
        let state = FakeState::returning(json!({}));
        let mut v = validator("get_session");
        v.injectable_params
            .insert("session_id".to_string(), json!("{{create_session.id}}"));

        let result = v.validate(&state, &json!({}), &ResponseMap::new()).await;
        assert!(!result.success);
        assert!(result.message.contains("Missing response for dependency"));
    }

    #[test]
    fn test_failed_result_carries_error_message() {
        let failed = ValidationResult::fail("Mismatch for 'description'");
        assert_eq!(
            failed.error_message.as_deref(),
            Some("Mismatch for 'description'")
        );

        let passed = ValidationResult::pass("Text and count match");
        assert!(passed.error_message.is_none());
    }

    #[test]
    fn test_nested_lookup_is_case_insensitive() {
        let data = json!({ "Database": { "LocationUri": "s3://bucket/" } });
        assert_eq!(
            get_nested_value(&data, "database.locationuri"),
            Some(json!("s3://bucket/"))
        );
    }

    #[test]
    fn test_tags_as_map_handles_both_shapes() {
        let list = json!([{ "Key": "ManagedBy", "Value": "x" }]);
        assert_eq!(tags_as_map(&list).get("ManagedBy"), Some(&json!("x")));

        let map = json!({ "ManagedBy": "y" });
        assert_eq!(tags_as_map(&map).get("ManagedBy"), Some(&json!("y")));
    }
}
