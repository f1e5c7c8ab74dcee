//! Requests that can be queued against a resource group

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TypesError, TypesResult};

/// Request kind with its numeric wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Start,
    Stop,
    Status,
    Disable,
    StopRecover,
    StartRecover,
    Restart,
    Exiting,
    Init,
    Enable,
    Relocate,
    CondStop,
    CondStart,
    StartRemote,
    StopUser,
    Migrate,
    Freeze,
    Unfreeze,
    StatusInquiry,
    None,
}

impl RequestKind {
    pub const ALL: [RequestKind; 20] = [
        RequestKind::Start,
        RequestKind::Stop,
        RequestKind::Status,
        RequestKind::Disable,
        RequestKind::StopRecover,
        RequestKind::StartRecover,
        RequestKind::Restart,
        RequestKind::Exiting,
        RequestKind::Init,
        RequestKind::Enable,
        RequestKind::Relocate,
        RequestKind::CondStop,
        RequestKind::CondStart,
        RequestKind::StartRemote,
        RequestKind::StopUser,
        RequestKind::Migrate,
        RequestKind::Freeze,
        RequestKind::Unfreeze,
        RequestKind::StatusInquiry,
        RequestKind::None,
    ];

    pub fn code(self) -> i32 {
        match self {
            RequestKind::Start => 2,
            RequestKind::Stop => 3,
            RequestKind::Status => 4,
            RequestKind::Disable => 5,
            RequestKind::StopRecover => 6,
            RequestKind::StartRecover => 7,
            RequestKind::Restart => 8,
            RequestKind::Exiting => 9,
            RequestKind::Init => 10,
            RequestKind::Enable => 11,
            RequestKind::Relocate => 13,
            RequestKind::CondStop => 14,
            RequestKind::CondStart => 15,
            RequestKind::StartRemote => 16,
            RequestKind::StopUser => 17,
            RequestKind::Migrate => 22,
            RequestKind::Freeze => 23,
            RequestKind::Unfreeze => 24,
            RequestKind::StatusInquiry => 25,
            RequestKind::None => 999,
        }
    }

    pub fn from_code(code: i32) -> TypesResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.code() == code)
            .ok_or(TypesError::UnknownRequest(code))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Start => "start",
            RequestKind::Stop => "stop",
            RequestKind::Status => "status",
            RequestKind::Disable => "disable",
            RequestKind::StopRecover => "stop (recovery)",
            RequestKind::StartRecover => "start (recovery)",
            RequestKind::Restart => "restart",
            RequestKind::Exiting => "exiting",
            RequestKind::Init => "initialize",
            RequestKind::Enable => "enable",
            RequestKind::Relocate => "relocate",
            RequestKind::CondStop => "conditional stop",
            RequestKind::CondStart => "conditional start",
            RequestKind::StartRemote => "remote start",
            RequestKind::StopUser => "user stop",
            RequestKind::Migrate => "migrate",
            RequestKind::Freeze => "freeze",
            RequestKind::Unfreeze => "unfreeze",
            RequestKind::StatusInquiry => "status inquiry",
            RequestKind::None => "none",
        }
    }

    /// Requests that would place the group on a node.
    ///
    /// These are refused while a relocation of the same group is in flight.
    pub fn is_start_class(self) -> bool {
        matches!(
            self,
            RequestKind::Start
                | RequestKind::Enable
                | RequestKind::Relocate
                | RequestKind::StartRemote
                | RequestKind::StartRecover
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', '_'], " ");
        Self::ALL
            .iter()
            .copied()
            .find(|r| {
                r.as_str().eq_ignore_ascii_case(&wanted)
                    || format!("{:?}", r).eq_ignore_ascii_case(&wanted.replace(' ', ""))
            })
            .ok_or_else(|| TypesError::UnknownRequestName(s.to_string()))
    }
}
