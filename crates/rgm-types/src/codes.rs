//! Cluster-wide request return codes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TypesError, TypesResult};

/// Integer result a group worker replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnCode {
    Success,
    Fail,
    Abort,
    Forward,
    NoService,
    Deadlock,
    Again,
    Depend,
    Invalid,
    Quorum,
    Running,
    Frozen,
    Node,
    Fence,
    Script,
    Domain,
    Exclusive,
}

impl ReturnCode {
    const ALL: [ReturnCode; 17] = [
        ReturnCode::Success,
        ReturnCode::Fail,
        ReturnCode::Abort,
        ReturnCode::Forward,
        ReturnCode::NoService,
        ReturnCode::Deadlock,
        ReturnCode::Again,
        ReturnCode::Depend,
        ReturnCode::Invalid,
        ReturnCode::Quorum,
        ReturnCode::Running,
        ReturnCode::Frozen,
        ReturnCode::Node,
        ReturnCode::Fence,
        ReturnCode::Script,
        ReturnCode::Domain,
        ReturnCode::Exclusive,
    ];

    pub fn code(self) -> i32 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::Fail => -1,
            ReturnCode::Abort => -2,
            ReturnCode::Forward => -3,
            ReturnCode::NoService => -4,
            ReturnCode::Deadlock => -5,
            ReturnCode::Again => -6,
            ReturnCode::Depend => -7,
            ReturnCode::Invalid => -8,
            ReturnCode::Quorum => -9,
            ReturnCode::Running => -10,
            ReturnCode::Frozen => -11,
            ReturnCode::Node => -12,
            ReturnCode::Fence => -13,
            ReturnCode::Script => -14,
            ReturnCode::Domain => -15,
            ReturnCode::Exclusive => -16,
        }
    }

    pub fn from_code(code: i32) -> TypesResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or(TypesError::UnknownReturnCode(code))
    }

    pub fn is_success(self) -> bool {
        self == ReturnCode::Success
    }

    pub fn description(self) -> &'static str {
        match self {
            ReturnCode::Success => "Success",
            ReturnCode::Fail => "Failure",
            ReturnCode::Abort => "Aborted; service failed",
            ReturnCode::Forward => "Request forwarded to owner",
            ReturnCode::NoService => "Service does not exist",
            ReturnCode::Deadlock => "Operation would deadlock",
            ReturnCode::Again => "Temporary failure; try again",
            ReturnCode::Depend => "Invalid operation due to dependency",
            ReturnCode::Invalid => "Invalid request",
            ReturnCode::Quorum => "Quorum not present",
            ReturnCode::Running => "Service is running",
            ReturnCode::Frozen => "Service is frozen",
            ReturnCode::Node => "Target node dead or not a member",
            ReturnCode::Fence => "Fencing not yet complete",
            ReturnCode::Script => "Service script failed",
            ReturnCode::Domain => "Service failover domain is empty",
            ReturnCode::Exclusive => "Exclusive service could not be placed",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}
