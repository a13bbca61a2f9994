// Module: Cleanup
// Best-effort deletion of AWS resources a test case created. Cleanup
// never fails a run: every error is logged and swallowed so later
// cleanups still get their chance.

use crate::client::{StateClient, StateError};
use crate::config::HarnessConfig;
use crate::injection::extract_path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polling policy applied before the delete call, for resources that
/// reject deletion until they reach a stable state.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WaitPolicy {
    /// Describe operation polled between attempts.
    pub describe_op: String,
    #[serde(default)]
    pub describe_params: Map<String, Value>,
    /// Dot path of the status field in the describe response.
    pub status_path: String,
    /// States in which the delete call is allowed to proceed.
    pub terminal_states: Vec<String>,
    /// Fixed settling delay in seconds after the terminal state is
    /// reached, for services that keep rejecting the delete briefly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_secs: Option<u64>,
}

/// One declarative delete step attached to a test case.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CleanupAction {
    /// Delete operation name on the state client.
    pub delete_op: String,
    #[serde(default)]
    pub delete_params: Map<String, Value>,
    /// Path into the case's captured response identifying the resource,
    /// relative to the embedded response document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_field: Option<String>,
    /// Parameter key the extracted identifier is passed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_param_key: Option<String>,
    /// Wrap the extracted identifier in a single-element list, for APIs
    /// that take batch delete parameters.
    #[serde(default)]
    pub param_is_list: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitPolicy>,
}

impl CleanupAction {
    /// Runs the delete, best effort. `response` is the captured tool
    /// response of the case this action belongs to, or None when the
    /// case never produced one.
    pub async fn run(
        &self,
        test_name: &str,
        response: Option<&Value>,
        state: &dyn StateClient,
        config: &HarnessConfig,
    ) {
        let mut params = self.delete_params.clone();

        if let (Some(field), Some(target_key)) = (&self.resource_field, &self.target_param_key) {
            let path = format!("result.content[0].text.{field}");
            let extracted = response.and_then(|r| extract_path(r, &path).ok());
            match extracted {
                Some(id) => {
                    let value = if self.param_is_list {
                        Value::Array(vec![id])
                    } else {
                        id
                    };
                    params.insert(target_key.clone(), value);
                }
                None => {
                    warn!(
                        test = test_name,
                        operation = %self.delete_op,
                        field = %field,
                        "cleanup skipped: resource identifier not found in response"
                    );
                    return;
                }
            }
        }

        if let Some(wait) = &self.wait {
            self.wait_for_stable_state(test_name, wait, state, config)
                .await;
        }

        match state.delete(&self.delete_op, &params).await {
            Ok(()) => {
                info!(test = test_name, operation = %self.delete_op, "cleanup succeeded");
            }
            Err(StateError::NotFound { code }) => {
                debug!(
                    test = test_name,
                    operation = %self.delete_op,
                    code = %code,
                    "resource already gone"
                );
            }
            Err(e) => {
                warn!(
                    test = test_name,
                    operation = %self.delete_op,
                    error = %e,
                    "cleanup failed"
                );
            }
        }
    }

    async fn wait_for_stable_state(
        &self,
        test_name: &str,
        wait: &WaitPolicy,
        state: &dyn StateClient,
        config: &HarnessConfig,
    ) {
        for iteration in 0..config.cleanup_wait_iterations {
            match state.describe(&wait.describe_op, &wait.describe_params).await {
                Ok(response) => {
                    let status = get_status(&response, &wait.status_path);
                    if let Some(status) = &status {
                        if wait.terminal_states.iter().any(|s| s == status) {
                            debug!(
                                test = test_name,
                                operation = %wait.describe_op,
                                status = %status,
                                "resource reached stable state"
                            );
                            if let Some(secs) = wait.settle_secs {
                                tokio::time::sleep(Duration::from_secs(secs)).await;
                            }
                            return;
                        }
                    }
                    debug!(
                        test = test_name,
                        operation = %wait.describe_op,
                        iteration,
                        status = ?status,
                        "waiting for stable state"
                    );
                }
                Err(StateError::NotFound { .. }) => return,
                Err(e) => {
                    warn!(
                        test = test_name,
                        operation = %wait.describe_op,
                        error = %e,
                        "describe failed while waiting, proceeding with delete"
                    );
                    return;
                }
            }
            tokio::time::sleep(config.cleanup_poll_interval).await;
        }
        warn!(
            test = test_name,
            operation = %wait.describe_op,
            iterations = config.cleanup_wait_iterations,
            "gave up waiting for stable state, attempting delete anyway"
        );
    }
}

fn get_status(response: &Value, status_path: &str) -> Option<String> {
    let mut current = response;
    for key in status_path.split('.') {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}
