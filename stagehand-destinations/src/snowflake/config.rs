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

//! Snowflake connection configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Schema used when none is configured.
pub const DEFAULT_SCHEMA: &str = "PUBLIC";

/// How the bearer token in [`SnowflakeConfig::token`] was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    /// JWT signed with the user's key pair.
    #[default]
    KeyPairJwt,
    /// OAuth access token.
    OAuth,
}

impl TokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    #[must_use]
    pub const fn header_value(&self) -> &'static str {
        match self {
            Self::KeyPairJwt => "KEYPAIR_JWT",
            Self::OAuth => "OAUTH",
        }
    }
}

/// Configuration of a Snowflake warehouse connection.
///
/// # Examples
///
/// ```rust
/// use stagehand_destinations::snowflake::SnowflakeConfig;
///
/// let config = SnowflakeConfig::builder()
///     .account("xy12345.eu-central-1")
///     .database("ANALYTICS")
///     .warehouse("LOADING")
///     .token("eyJhbGciOi...")
///     .build()
///     .unwrap();
///
/// assert_eq!(config.schema, "PUBLIC");
/// assert_eq!(config.parameters["client_session_keep_alive"], "true");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct SnowflakeConfig {
    /// Account identifier, e.g. `xy12345.eu-central-1`.
    pub account: String,

    /// Database to load into.
    pub database: String,

    /// Schema to load into (default: `PUBLIC`).
    pub schema: String,

    /// Virtual warehouse running the statements.
    pub warehouse: Option<String>,

    /// Role to run statements as.
    pub role: Option<String>,

    /// Bearer token.
    pub token: String,

    /// How `token` was issued (default: key pair JWT).
    pub token_type: TokenType,

    /// Named external stage used to load from Google Cloud Storage.
    pub stage: Option<String>,

    /// Session parameters sent with every statement.
    ///
    /// `client_session_keep_alive` defaults to `true`.
    pub parameters: BTreeMap<String, String>,

    /// Statement timeout (default: 60 seconds).
    pub timeout: Duration,

    /// Overrides `https://<account>.snowflakecomputing.com`.
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for SnowflakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeConfig")
            .field("account", &self.account)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("stage", &self.stage)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl SnowflakeConfig {
    /// Creates a new builder for `SnowflakeConfig`.
    #[must_use]
    pub fn builder() -> SnowflakeConfigBuilder {
        SnowflakeConfigBuilder::default()
    }

    /// Base URL of the SQL API.
    #[must_use]
    pub fn base_url(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

/// Builder for `SnowflakeConfig`.
#[derive(Debug, Default)]
pub struct SnowflakeConfigBuilder {
    account: Option<String>,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
    token: Option<String>,
    token_type: Option<TokenType>,
    stage: Option<String>,
    parameters: BTreeMap<String, String>,
    timeout: Option<Duration>,
    endpoint_url: Option<String>,
}

impl SnowflakeConfigBuilder {
    /// Sets the account identifier (required).
    #[must_use]
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Sets the database (required).
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the schema (default: `PUBLIC`).
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Sets the virtual warehouse.
    #[must_use]
    pub fn warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    /// Sets the role.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Sets the bearer token (required).
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the token type (default: key pair JWT).
    #[must_use]
    pub fn token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    /// Sets the named stage used for Google Cloud Storage loads.
    #[must_use]
    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Adds a session parameter.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Sets the statement timeout (default: 60 seconds).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the SQL API base URL.
    #[must_use]
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Builds the `SnowflakeConfig`.
    ///
    /// A blank schema falls back to [`DEFAULT_SCHEMA`] with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if `account`, `database` or `token` is missing or
    /// empty, or if the timeout is zero.
    pub fn build(self) -> Result<SnowflakeConfig, String> {
        let account = required(self.account, "account")?;
        let database = required(self.database, "database")?;
        let token = required(self.token, "token")?;

        let schema = match self.schema.filter(|s| !s.trim().is_empty()) {
            Some(schema) => schema,
            None => {
                warn!(
                    schema = DEFAULT_SCHEMA,
                    "Snowflake schema wasn't provided, using the default one"
                );
                DEFAULT_SCHEMA.to_string()
            }
        };

        let timeout = self.timeout.unwrap_or(Duration::from_secs(60));
        if timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }

        let mut parameters = self.parameters;
        parameters
            .entry("client_session_keep_alive".to_string())
            .or_insert_with(|| "true".to_string());

        Ok(SnowflakeConfig {
            account,
            database,
            schema,
            warehouse: self.warehouse,
            role: self.role,
            token,
            token_type: self.token_type.unwrap_or_default(),
            stage: self.stage.filter(|s| !s.trim().is_empty()),
            parameters,
            timeout,
            endpoint_url: self.endpoint_url,
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, String> {
    match value {
        None => Err(format!("{name} is required")),
        Some(v) if v.trim().is_empty() => Err(format!("{name} cannot be empty")),
        Some(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SnowflakeConfigBuilder {
        SnowflakeConfig::builder()
            .account("acme")
            .database("DB")
            .token("t")
    }

    #[test]
    fn test_defaults() {
        let config = minimal().build().unwrap();

        assert_eq!(config.schema, DEFAULT_SCHEMA);
        assert_eq!(config.token_type, TokenType::KeyPairJwt);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.parameters["client_session_keep_alive"], "true");
        assert_eq!(config.base_url(), "https://acme.snowflakecomputing.com");
    }

    #[test]
    fn test_blank_schema_defaults() {
        let config = minimal().schema("  ").build().unwrap();
        assert_eq!(config.schema, "PUBLIC");
    }

    #[test]
    fn test_explicit_keep_alive_is_kept() {
        let config = minimal()
            .parameter("client_session_keep_alive", "false")
            .build()
            .unwrap();
        assert_eq!(config.parameters["client_session_keep_alive"], "false");
    }

    #[test]
    fn test_required_fields() {
        let err = SnowflakeConfig::builder().database("DB").token("t").build().unwrap_err();
        assert!(err.contains("account"));

        let err = minimal().database("").build().unwrap_err();
        assert!(err.contains("database cannot be empty"));

        let err = minimal().timeout(Duration::ZERO).build().unwrap_err();
        assert!(err.contains("timeout"));
    }

    #[test]
    fn test_endpoint_override_and_redaction() {
        let config = minimal()
            .endpoint_url("http://localhost:8080/")
            .build()
            .unwrap();
        assert_eq!(config.base_url(), "http://localhost:8080");
        assert!(!format!("{config:?}").contains("token: \"t\""));
    }

    #[test]
    fn test_token_type_header() {
        assert_eq!(TokenType::KeyPairJwt.header_value(), "KEYPAIR_JWT");
        assert_eq!(TokenType::OAuth.header_value(), "OAUTH");
    }
}
