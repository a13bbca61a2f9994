// Module: Client
// Boundary seams for the MCP server (tool calls over JSON-RPC/stdio)
// and for read-only AWS state queries used by live-state validation.

use crate::config::HarnessConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Invokes an MCP tool and returns the raw JSON-RPC result. The harness
/// treats the response as opaque apart from path-based extraction and
/// validator inspection.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn call_tool(&self, tool_name: &str, params: &Value) -> Result<Value>;
}

#[derive(Debug, Error)]
pub enum StateError {
    /// The resource does not exist. In absence-validation mode this is
    /// the success condition.
    #[error("resource not found: {code}")]
    NotFound { code: String },

    #[error("aws api error: {0}")]
    Api(String),
}

/// Read-only describe and destructive delete operations against live
/// AWS state, keyed by operation name (e.g. "get_database"). The real
/// implementation shells out to the AWS CLI; tests substitute a
/// scripted fake.
#[async_trait]
pub trait StateClient: Send + Sync {
    async fn describe(&self, operation: &str, params: &Map<String, Value>)
        -> Result<Value, StateError>;

    async fn delete(&self, operation: &str, params: &Map<String, Value>)
        -> Result<(), StateError>;
}

/// MCP client over newline-delimited JSON-RPC 2.0 on a spawned server
/// process's stdio.
pub struct McpClient {
    _child: Child,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
}

impl McpClient {
    /// Spawns the server process described by the config. The caller
    /// must run `initialize` before the first tool call.
    pub fn spawn(config: &HarnessConfig) -> Result<Self> {
        let mut command = Command::new(&config.server_command);
        command
            .args(&config.server_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Some(profile) = &config.aws_profile {
            command.env("AWS_PROFILE", profile);
        }
        if let Some(region) = &config.aws_region {
            command.env("AWS_REGION", region);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn MCP server '{}'", config.server_command))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("server stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("server stdout unavailable"))?;

        info!(command = %config.server_command, "MCP server spawned");

        Ok(Self {
            _child: child,
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
        })
    }

    /// JSON-RPC initialize handshake followed by the `initialized`
    /// notification, per the MCP lifecycle.
    pub async fn initialize(&self) -> Result<Value> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "harness", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;

        self.notify("notifications/initialized", json!({})).await?;
        Ok(result)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        self.write_line(&payload).await?;

        // Responses may interleave with notifications; skip anything
        // that is not the reply to this id.
        loop {
            let line = self.read_line().await?;
            let message: Value = serde_json::from_str(&line)
                .with_context(|| format!("invalid JSON-RPC message: {line}"))?;

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                debug!(method, "skipping unrelated message");
                continue;
            }

            if let Some(error) = message.get("error") {
                return Err(anyhow!("JSON-RPC error for '{}': {}", method, error));
            }
            return Ok(message);
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let payload = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.write_line(&payload).await
    }

    async fn write_line(&self, payload: &Value) -> Result<()> {
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.context("failed to write to MCP server")?;
        stdin.flush().await.context("failed to flush MCP server stdin")?;
        Ok(())
    }

    async fn read_line(&self) -> Result<String> {
        let mut stdout = self.stdout.lock().await;
        let mut line = String::new();
        let read = stdout
            .read_line(&mut line)
            .await
            .context("failed to read from MCP server")?;
        if read == 0 {
            return Err(anyhow!("MCP server closed its stdout"));
        }
        Ok(line)
    }
}

#[async_trait]
impl ToolClient for McpClient {
    async fn call_tool(&self, tool_name: &str, params: &Value) -> Result<Value> {
        debug!(tool = tool_name, "calling MCP tool");
        self.request(
            "tools/call",
            json!({ "name": tool_name, "arguments": params }),
        )
        .await
    }
}

// ============================================================================
// AWS CLI state client
// ============================================================================

/// Error codes the AWS APIs use for a missing resource.
const NOT_FOUND_CODES: &[&str] = &[
    "EntityNotFoundException",
    "ResourceNotFoundException",
    "InvalidRequestException",
    "NoSuchEntity",
    "NoSuchKey",
    "NotFoundException",
    "ClusterNotFound",
];

/// Which AWS CLI service namespace an operation belongs to.
fn service_for(operation: &str) -> Option<&'static str> {
    match operation {
        "get_database" | "get_table" | "get_partition" | "get_job" | "get_crawler"
        | "get_trigger" | "get_workflow" | "get_workflow_run" | "get_session"
        | "get_classifier" | "get_usage_profile" | "get_security_configuration"
        | "get_data_catalog_encryption_settings" | "delete_database" | "delete_table"
        | "delete_job" | "delete_crawler" | "delete_trigger" | "delete_workflow"
        | "delete_session" | "delete_classifier" | "delete_usage_profile"
        | "delete_security_configuration" => Some("glue"),
        "describe_cluster" | "describe_step" | "list_instance_groups"
        | "list_instance_fleets" | "terminate_job_flows" => Some("emr"),
        "get_role" | "get_role_policy" | "list_role_policies" | "delete_role" => Some("iam"),
        "get_work_group" | "get_data_catalog" | "get_query_execution" | "get_named_query"
        | "delete_work_group" | "delete_data_catalog" | "delete_named_query" => Some("athena"),
        "get_object" | "list_objects_v2" | "delete_object" => Some("s3api"),
        "get_caller_identity" => Some("sts"),
        _ => None,
    }
}

/// [`StateClient`] over the AWS CLI. Operation names map onto CLI
/// subcommands (`get_database` becomes `aws glue get-database`) and
/// parameters are passed as `--cli-input-json`, so the casing matches
/// the service APIs.
pub struct AwsCliState {
    profile: Option<String>,
    region: Option<String>,
}

impl AwsCliState {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            profile: config.aws_profile.clone(),
            region: config.aws_region.clone(),
        }
    }

    async fn invoke(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, StateError> {
        let service = service_for(operation)
            .ok_or_else(|| StateError::Api(format!("unsupported operation: {operation}")))?;

        let mut command = Command::new("aws");
        command.arg(service).arg(operation.replace('_', "-"));
        command.arg("--output").arg("json");
        if !params.is_empty() {
            let input = serde_json::to_string(&Value::Object(params.clone()))
                .map_err(|e| StateError::Api(e.to_string()))?;
            command.arg("--cli-input-json").arg(input);
        }
        if let Some(profile) = &self.profile {
            command.arg("--profile").arg(profile);
        }
        if let Some(region) = &self.region {
            command.arg("--region").arg(region);
        }

        debug!(service, operation, "invoking AWS CLI");
        let output = command
            .output()
            .await
            .map_err(|e| StateError::Api(format!("failed to run aws cli: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if let Some(code) = NOT_FOUND_CODES.iter().find(|c| stderr.contains(**c)) {
                return Err(StateError::NotFound {
                    code: (*code).to_string(),
                });
            }
            return Err(StateError::Api(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            // Delete operations return no body.
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout.trim())
            .map_err(|e| StateError::Api(format!("invalid aws cli output: {e}")))
    }
}

#[async_trait]
impl StateClient for AwsCliState {
    async fn describe(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, StateError> {
        self.invoke(operation, params).await
    }

    async fn delete(
        &self,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<(), StateError> {
        self.invoke(operation, params).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_routing() {
        assert_eq!(service_for("get_database"), Some("glue"));
        assert_eq!(service_for("describe_cluster"), Some("emr"));
        assert_eq!(service_for("get_role"), Some("iam"));
        assert_eq!(service_for("get_work_group"), Some("athena"));
        assert_eq!(service_for("made_up_operation"), None);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_api_error() {
        let state = AwsCliState {
            profile: None,
            region: None,
        };
        let err = state.describe("made_up_operation", &Map::new()).await.unwrap_err();
        assert!(matches!(err, StateError::Api(_)));
    }
}
