//! Bridge configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::AdapterOptions;
use crate::models::session::PermissionMode;
use crate::spawner::SpawnConfig;
use crate::{AppError, Result};

fn default_backend_bin() -> String {
    "codex".into()
}

fn default_backend_args() -> Vec<String> {
    vec!["app-server".into()]
}

fn default_permission_mode() -> String {
    PermissionMode::Default.as_str().into()
}

fn default_sandbox() -> String {
    "workspace-write".into()
}

fn default_channel_capacity() -> usize {
    256
}

fn default_client_name() -> String {
    "agent-bridge".into()
}

/// Configuration parsed from `bridge.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BridgeConfig {
    /// Backend executable.
    #[serde(default = "default_backend_bin")]
    pub backend_bin: String,
    /// Arguments passed to the backend executable.
    #[serde(default = "default_backend_args")]
    pub backend_args: Vec<String>,
    /// Model requested for new threads; empty lets the backend choose.
    #[serde(default)]
    pub default_model: String,
    /// Permission mode wire name (`default`, `acceptEdits`, `plan`,
    /// `bypassPermissions`).
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
    /// Backend sandbox policy.
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    /// Capacity of the adapter's bounded channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Per-call response timeout; 0 means wait indefinitely.
    #[serde(default)]
    pub call_timeout_seconds: u64,
    /// Client name announced during the handshake.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend_bin: default_backend_bin(),
            backend_args: default_backend_args(),
            default_model: String::new(),
            permission_mode: default_permission_mode(),
            sandbox: default_sandbox(),
            channel_capacity: default_channel_capacity(),
            call_timeout_seconds: 0,
            client_name: default_client_name(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed permission mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown mode name.
    pub fn permission_mode(&self) -> Result<PermissionMode> {
        self.permission_mode.parse()
    }

    /// Per-call timeout, `None` when disabled.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_seconds > 0).then_some(Duration::from_secs(self.call_timeout_seconds))
    }

    /// Adapter options for a session rooted at `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown permission mode.
    pub fn adapter_options(
        &self,
        session_id: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Result<AdapterOptions> {
        Ok(AdapterOptions {
            model: Some(self.default_model.clone()).filter(|m| !m.is_empty()),
            permission_mode: self.permission_mode()?,
            sandbox: self.sandbox.clone(),
            client_name: self.client_name.clone(),
            call_timeout: self.call_timeout(),
            channel_capacity: self.channel_capacity,
            ..AdapterOptions::new(session_id, cwd)
        })
    }

    /// Process launch parameters for a session rooted at `cwd`.
    #[must_use]
    pub fn spawn_config(&self, cwd: impl AsRef<Path>) -> SpawnConfig {
        SpawnConfig {
            backend_bin: self.backend_bin.clone(),
            backend_args: self.backend_args.clone(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.backend_bin.trim().is_empty() {
            return Err(AppError::Config("backend_bin must not be empty".into()));
        }

        if self.channel_capacity == 0 {
            return Err(AppError::Config(
                "channel_capacity must be greater than zero".into(),
            ));
        }

        self.permission_mode()?;
        Ok(())
    }
}
