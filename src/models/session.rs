//! Session metadata and permission-mode helpers.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Permission mode selected by the browser for a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before risky actions.
    #[default]
    Default,
    /// Auto-accept file edits.
    AcceptEdits,
    /// Planning only.
    Plan,
    /// Never ask.
    BypassPermissions,
}

impl PermissionMode {
    /// Backend approval policy for this mode.
    ///
    /// Only [`PermissionMode::BypassPermissions`] maps to `never`; every
    /// other mode asks unless the command is trusted.
    #[must_use]
    pub fn approval_policy(self) -> &'static str {
        match self {
            Self::BypassPermissions => "never",
            Self::Default | Self::AcceptEdits | Self::Plan => "unless-trusted",
        }
    }

    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(AppError::Config(format!("unknown permission mode '{other}'"))),
        }
    }
}

/// Session metadata owned by the adapter and read by the glue layer.
///
/// Mutated only in response to handshake and thread negotiation results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMeta {
    /// Browser-facing session identifier.
    pub session_id: String,
    /// Backend thread identifier, known once the thread is open.
    pub thread_id: Option<String>,
    /// Model in use; empty when the backend chose and did not say.
    pub model: String,
    /// Working directory of the backend thread.
    pub cwd: String,
    /// Permission mode the session was opened with.
    pub permission_mode: PermissionMode,
}
