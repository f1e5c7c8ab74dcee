//! Resource-group lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TypesError, TypesResult};

/// Lifecycle state of a resource group or evaluator resource.
///
/// Numeric codes match the values exchanged with peer daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RgState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Failed,
    Uninitialized,
    Checking,
    Error,
    Recovering,
    Disabled,
    Migrating,
}

impl RgState {
    pub const ALL: [RgState; 11] = [
        RgState::Stopped,
        RgState::Starting,
        RgState::Started,
        RgState::Stopping,
        RgState::Failed,
        RgState::Uninitialized,
        RgState::Checking,
        RgState::Error,
        RgState::Recovering,
        RgState::Disabled,
        RgState::Migrating,
    ];

    pub fn code(self) -> i32 {
        match self {
            RgState::Stopped => 110,
            RgState::Starting => 111,
            RgState::Started => 112,
            RgState::Stopping => 113,
            RgState::Failed => 114,
            RgState::Uninitialized => 115,
            RgState::Checking => 116,
            RgState::Error => 117,
            RgState::Recovering => 118,
            RgState::Disabled => 119,
            RgState::Migrating => 120,
        }
    }

    pub fn from_code(code: i32) -> TypesResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.code() == code)
            .ok_or(TypesError::UnknownState(code))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RgState::Stopped => "stopped",
            RgState::Starting => "starting",
            RgState::Started => "started",
            RgState::Stopping => "stopping",
            RgState::Failed => "failed",
            RgState::Uninitialized => "uninitialized",
            RgState::Checking => "checking",
            RgState::Error => "error",
            RgState::Recovering => "recovering",
            RgState::Disabled => "disabled",
            RgState::Migrating => "migrating",
        }
    }

    /// Whether the group occupies its owner node.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            RgState::Starting | RgState::Started | RgState::Stopping
        )
    }

    /// Whether the state needs administrative intervention to leave.
    pub fn is_failed(self) -> bool {
        matches!(self, RgState::Failed | RgState::Error)
    }
}

impl fmt::Display for RgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RgState {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TypesError::UnknownStateName(s.to_string()))
    }
}
