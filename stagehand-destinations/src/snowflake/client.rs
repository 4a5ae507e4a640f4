// Copyright 2025 Stagehand Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal client for the Snowflake SQL API (`/api/v2/statements`).
//!
//! Every statement is a single POST. Statements that do not finish within
//! the synchronous window come back as `202 Accepted` with a statement
//! handle, which is polled until a result or an error arrives.

use super::config::SnowflakeConfig;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use stagehand_core::destination::DestinationError;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Object does not exist or not authorized.
pub const OBJECT_NOT_EXIST_OR_AUTHORIZED: &str = "002003";
/// Invalid identifier.
pub const INVALID_IDENTIFIER: &str = "000904";

/// Errors returned by the SQL API.
#[derive(Error, Debug)]
pub enum SnowflakeError {
    /// The API answered with an error status.
    #[error("Snowflake returned HTTP {status} (code {code}): {message}")]
    Http {
        /// HTTP status
        status: u16,
        /// Snowflake error code, e.g. `002003`
        code: String,
        /// Error message
        message: String,
    },

    /// The request never got an answer.
    #[error("Snowflake request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not what the API documents.
    #[error("Failed to decode Snowflake response: {0}")]
    Decode(String),

    /// Polling an asynchronous statement took longer than the timeout.
    #[error("Snowflake statement {handle} did not finish within {timeout:?}")]
    Timeout {
        /// Statement handle
        handle: String,
        /// Configured statement timeout
        timeout: Duration,
    },
}

impl SnowflakeError {
    fn code(&self) -> Option<&str> {
        match self {
            Self::Http { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The referenced object does not exist or the role cannot see it.
    #[must_use]
    pub fn is_object_missing(&self) -> bool {
        self.code() == Some(OBJECT_NOT_EXIST_OR_AUTHORIZED)
    }

    /// A statement named a column the table does not have.
    #[must_use]
    pub fn is_invalid_identifier(&self) -> bool {
        self.code() == Some(INVALID_IDENTIFIER)
    }

    /// Throttling, gateway errors, transport failures and poll timeouts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Decode(_) => false,
        }
    }

    fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Http { status: 401 | 403, .. })
    }
}

impl From<SnowflakeError> for DestinationError {
    fn from(err: SnowflakeError) -> Self {
        if err.is_retryable() {
            Self::connection(err)
        } else if err.is_auth_failure() {
            Self::configuration(err.to_string(), Some("token".to_string()))
        } else {
            Self::write(err, false)
        }
    }
}

/// A positional statement binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Snowflake binding type: `TEXT`, `FIXED`, `REAL` or `BOOLEAN`
    #[serde(rename = "type")]
    pub ty: &'static str,
    /// Value rendered as text, `None` for SQL `NULL`
    pub value: Option<String>,
}

impl Binding {
    /// A text binding.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            ty: "TEXT",
            value: Some(value.into()),
        }
    }

    /// Binds a JSON value with the closest Snowflake type.
    ///
    /// Objects and arrays are bound as their JSON text.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self {
                ty: "TEXT",
                value: None,
            },
            Value::Bool(b) => Self {
                ty: "BOOLEAN",
                value: Some(b.to_string()),
            },
            Value::Number(n) if n.is_i64() || n.is_u64() => Self {
                ty: "FIXED",
                value: Some(n.to_string()),
            },
            Value::Number(n) => Self {
                ty: "REAL",
                value: Some(n.to_string()),
            },
            Value::String(s) => Self::text(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::text(value.to_string()),
        }
    }
}

/// Rows returned by a statement. Every value arrives as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementResult {
    /// Column names of the result set
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    code: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    statement_status_url: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

/// SQL API client, optionally scoped to a schema.
///
/// The API is stateless, so cloning is cheap and every clone can run
/// statements concurrently.
#[derive(Debug, Clone)]
pub struct SnowflakeClient {
    http: reqwest::Client,
    config: SnowflakeConfig,
    schema: Option<String>,
}

impl SnowflakeClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SnowflakeConfig) -> Result<Self, SnowflakeError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            config,
            schema: None,
        })
    }

    /// Returns a client that runs statements in `schema`.
    #[must_use]
    pub fn scoped(&self, schema: Option<&str>) -> Self {
        Self {
            http: self.http.clone(),
            config: self.config.clone(),
            schema: schema.map(str::to_string),
        }
    }

    /// Configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &SnowflakeConfig {
        &self.config
    }

    /// Schema statements run in, if any.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    fn request_body(&self, statement: &str, bindings: &[Binding]) -> Value {
        let mut body = Map::new();
        body.insert("statement".into(), json!(statement));
        body.insert("timeout".into(), json!(self.config.timeout.as_secs()));
        body.insert("database".into(), json!(self.config.database));
        if let Some(schema) = &self.schema {
            body.insert("schema".into(), json!(schema));
        }
        if let Some(warehouse) = &self.config.warehouse {
            body.insert("warehouse".into(), json!(warehouse));
        }
        if let Some(role) = &self.config.role {
            body.insert("role".into(), json!(role));
        }
        if !bindings.is_empty() {
            let bindings: BTreeMap<String, &Binding> = bindings
                .iter()
                .enumerate()
                .map(|(i, b)| ((i + 1).to_string(), b))
                .collect();
            body.insert("bindings".into(), json!(bindings));
        }
        if !self.config.parameters.is_empty() {
            body.insert("parameters".into(), json!(self.config.parameters));
        }
        Value::Object(body)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header(
                "X-Snowflake-Authorization-Token-Type",
                self.config.token_type.header_value(),
            )
            .header(header::ACCEPT, "application/json")
    }

    /// Runs one statement and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`SnowflakeError::Http`] with the Snowflake error code if the
    /// statement fails.
    #[instrument(skip(self, bindings), fields(schema = ?self.schema))]
    pub async fn execute(
        &self,
        statement: &str,
        bindings: &[Binding],
    ) -> Result<StatementResult, SnowflakeError> {
        let url = format!("{}{}", self.config.base_url(), STATEMENTS_PATH);
        debug!(statement = %statement, bindings = bindings.len(), "Executing statement");

        let response = self
            .authorized(self.http.post(&url))
            .json(&self.request_body(statement, bindings))
            .send()
            .await?;
        let (status, body) = Self::read(response).await?;

        if status == StatusCode::ACCEPTED {
            return self.poll(body).await;
        }
        Ok(Self::into_result(body))
    }

    async fn poll(&self, accepted: ApiResponse) -> Result<StatementResult, SnowflakeError> {
        let handle = accepted
            .statement_handle
            .ok_or_else(|| SnowflakeError::Decode("202 response without statement handle".into()))?;
        let path = accepted
            .statement_status_url
            .unwrap_or_else(|| format!("{STATEMENTS_PATH}/{handle}"));
        let url = format!("{}{}", self.config.base_url(), path);
        let deadline = Instant::now() + self.config.timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(SnowflakeError::Timeout {
                    handle,
                    timeout: self.config.timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self.authorized(self.http.get(&url)).send().await?;
            let (status, body) = Self::read(response).await?;
            if status != StatusCode::ACCEPTED {
                return Ok(Self::into_result(body));
            }
            debug!(handle = %handle, "Statement still running");
        }
    }

    async fn read(response: reqwest::Response) -> Result<(StatusCode, ApiResponse), SnowflakeError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();
            let (code, message) = match parsed {
                Some(body) => (
                    body.code.unwrap_or_default(),
                    body.message.unwrap_or_else(|| text.clone()),
                ),
                None => (String::new(), text),
            };
            return Err(SnowflakeError::Http {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let body = serde_json::from_str(&text).map_err(|e| SnowflakeError::Decode(e.to_string()))?;
        Ok((status, body))
    }

    fn into_result(body: ApiResponse) -> StatementResult {
        StatementResult {
            columns: body
                .result_set_meta_data
                .map(|meta| meta.row_type.into_iter().map(|r| r.name).collect())
                .unwrap_or_default(),
            rows: body.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snowflake::config::TokenType;
    use serde_json::json;

    fn client() -> SnowflakeClient {
        let config = SnowflakeConfig::builder()
            .account("acme")
            .database("DB")
            .warehouse("WH")
            .token("secret")
            .token_type(TokenType::OAuth)
            .build()
            .unwrap();
        SnowflakeClient::new(config).unwrap()
    }

    #[test]
    fn test_request_body() {
        let client = client().scoped(Some("RAW"));
        let body = client.request_body("SELECT ?", &[Binding::text("x")]);

        assert_eq!(body["statement"], json!("SELECT ?"));
        assert_eq!(body["database"], json!("DB"));
        assert_eq!(body["schema"], json!("RAW"));
        assert_eq!(body["warehouse"], json!("WH"));
        assert_eq!(body["timeout"], json!(60));
        assert_eq!(body["bindings"]["1"], json!({"type": "TEXT", "value": "x"}));
        assert_eq!(body["parameters"]["client_session_keep_alive"], json!("true"));
        assert!(body.get("role").is_none());
    }

    #[test]
    fn test_unscoped_body_has_no_schema() {
        let body = client().request_body("SELECT 1", &[]);
        assert!(body.get("schema").is_none());
        assert!(body.get("bindings").is_none());
    }

    #[test]
    fn test_binding_types() {
        assert_eq!(Binding::from_value(&json!(1)).ty, "FIXED");
        assert_eq!(Binding::from_value(&json!(1.5)).ty, "REAL");
        assert_eq!(Binding::from_value(&json!(true)).ty, "BOOLEAN");
        assert_eq!(Binding::from_value(&json!(null)).value, None);
        assert_eq!(
            Binding::from_value(&json!({"k": 1})).value.as_deref(),
            Some("{\"k\":1}")
        );
        // Snowflake casts the text into the timestamp column
        assert_eq!(
            Binding::from_value(&json!("2024-01-01T00:00:00Z")),
            Binding::text("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_decode_result_set() {
        let body: ApiResponse = serde_json::from_value(json!({
            "code": "090001",
            "statementHandle": "01b2",
            "resultSetMetaData": {"rowType": [{"name": "COLUMN_NAME"}, {"name": "DATA_TYPE"}]},
            "data": [["ID", "NUMBER"], ["NOTE", null]]
        }))
        .unwrap();

        let result = SnowflakeClient::into_result(body);
        assert_eq!(result.columns, vec!["COLUMN_NAME", "DATA_TYPE"]);
        assert_eq!(result.rows[1], vec![Some("NOTE".to_string()), None]);
    }

    #[test]
    fn test_error_classification() {
        let missing = SnowflakeError::Http {
            status: 422,
            code: OBJECT_NOT_EXIST_OR_AUTHORIZED.to_string(),
            message: "Schema 'RAW' does not exist or not authorized.".to_string(),
        };
        assert!(missing.is_object_missing());
        assert!(!missing.is_retryable());
        assert!(matches!(
            DestinationError::from(missing),
            DestinationError::WriteError { retryable: false, .. }
        ));

        let throttled = SnowflakeError::Http {
            status: 429,
            code: String::new(),
            message: "slow down".to_string(),
        };
        assert!(DestinationError::from(throttled).is_retryable());

        let unauthorized = SnowflakeError::Http {
            status: 401,
            code: "390303".to_string(),
            message: "Invalid OAuth access token".to_string(),
        };
        assert!(matches!(
            DestinationError::from(unauthorized),
            DestinationError::ConfigurationError { .. }
        ));
    }
}
