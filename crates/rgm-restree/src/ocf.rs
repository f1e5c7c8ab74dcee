//! OCF resource agent invocation.
//!
//! An agent is run as `<handler> <agent> <operation>` with its parameters
//! passed as `OCF_RESKEY_<attr>` environment variables. The exit status is
//! the only result channel.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{RestreeError, RestreeResult};
use crate::tree::{ResourceTree, TreeNodeId};

/// Operations an agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcfOperation {
    Start,
    Stop,
    Status,
    Monitor,
    Recover,
    Reconfig,
    MetaData,
    ValidateAll,
}

impl OcfOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            OcfOperation::Start => "start",
            OcfOperation::Stop => "stop",
            OcfOperation::Status => "status",
            OcfOperation::Monitor => "monitor",
            OcfOperation::Recover => "recover",
            OcfOperation::Reconfig => "reconfig",
            OcfOperation::MetaData => "meta-data",
            OcfOperation::ValidateAll => "validate-all",
        }
    }
}

impl fmt::Display for OcfOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OCF exit codes, see `ocf-returncodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcfStatus {
    Success,
    ErrGeneric,
    ErrArgs,
    ErrUnimplemented,
    ErrPerm,
    ErrInstalled,
    ErrConfigured,
    NotRunning,
    Other(i32),
}

impl OcfStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => OcfStatus::Success,
            1 => OcfStatus::ErrGeneric,
            2 => OcfStatus::ErrArgs,
            3 => OcfStatus::ErrUnimplemented,
            4 => OcfStatus::ErrPerm,
            5 => OcfStatus::ErrInstalled,
            6 => OcfStatus::ErrConfigured,
            7 => OcfStatus::NotRunning,
            other => OcfStatus::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            OcfStatus::Success => 0,
            OcfStatus::ErrGeneric => 1,
            OcfStatus::ErrArgs => 2,
            OcfStatus::ErrUnimplemented => 3,
            OcfStatus::ErrPerm => 4,
            OcfStatus::ErrInstalled => 5,
            OcfStatus::ErrConfigured => 6,
            OcfStatus::NotRunning => 7,
            OcfStatus::Other(code) => code,
        }
    }

    /// Codes 2 through 6 point at configuration or environment faults.
    pub fn is_config_fault(self) -> bool {
        (2..=6).contains(&self.code())
    }
}

impl fmt::Display for OcfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcfStatus::Success => f.write_str("OCF_SUCCESS"),
            OcfStatus::ErrGeneric => f.write_str("OCF_ERR_GENERIC"),
            OcfStatus::ErrArgs => f.write_str("OCF_ERR_ARGS"),
            OcfStatus::ErrUnimplemented => f.write_str("OCF_ERR_UNIMPLEMENTED"),
            OcfStatus::ErrPerm => f.write_str("OCF_ERR_PERM"),
            OcfStatus::ErrInstalled => f.write_str("OCF_ERR_INSTALLED"),
            OcfStatus::ErrConfigured => f.write_str("OCF_ERR_CONFIGURED"),
            OcfStatus::NotRunning => f.write_str("OCF_NOT_RUNNING"),
            OcfStatus::Other(code) => write!(f, "exit status {}", code),
        }
    }
}

/// How an agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentOutcome {
    Exited(OcfStatus),
    /// Killed by a signal. Treated as the most severe fault.
    Signalled,
}

impl AgentOutcome {
    pub const SUCCESS: AgentOutcome = AgentOutcome::Exited(OcfStatus::Success);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentOutcome::Exited(status) => write!(f, "{}", status),
            AgentOutcome::Signalled => f.write_str("killed by signal"),
        }
    }
}

fn default_resource_root() -> PathBuf {
    PathBuf::from("/usr/share/cluster")
}

fn default_ocf_root() -> PathBuf {
    PathBuf::from("/usr/lib/ocf")
}

fn default_handler() -> PathBuf {
    PathBuf::from("/bin/sh")
}

/// Where agents live and how they are run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_resource_root")]
    pub resource_root: PathBuf,
    #[serde(default = "default_ocf_root")]
    pub ocf_root: PathBuf,
    #[serde(default = "default_handler")]
    pub default_handler: PathBuf,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            resource_root: default_resource_root(),
            ocf_root: default_ocf_root(),
            default_handler: default_handler(),
        }
    }
}

/// A fully prepared agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Instance name, `type:primary`.
    pub resource: String,
    pub operation: OcfOperation,
    pub handler: PathBuf,
    pub agent: PathBuf,
    pub env: Vec<(String, String)>,
}

impl AgentInvocation {
    /// Prepare the call for a tree node. Returns `None` when the node's
    /// rule has no agent, which callers treat as success.
    pub fn for_node(
        tree: &ResourceTree,
        node: TreeNodeId,
        operation: OcfOperation,
        depth: u32,
        settings: &AgentSettings,
    ) -> Option<Self> {
        let resource = tree.node_resource(node)?;
        let agent = resource.rule.agent.as_ref()?;
        let agent = if Path::new(agent).is_absolute() {
            PathBuf::from(agent)
        } else {
            settings.resource_root.join(agent)
        };
        let handler = resource
            .rule
            .handler
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| settings.default_handler.clone());

        let (major, minor) = resource.rule.version_parts();
        let mut env = vec![
            ("OCF_RA_VERSION_MAJOR".to_string(), major),
            ("OCF_RA_VERSION_MINOR".to_string(), minor),
            (
                "OCF_ROOT".to_string(),
                settings.ocf_root.display().to_string(),
            ),
            ("OCF_RESOURCE_INSTANCE".to_string(), resource.name()),
            ("OCF_RESOURCE_TYPE".to_string(), resource.rtype().to_string()),
            ("OCF_CHECK_LEVEL".to_string(), depth.to_string()),
            (
                "OCF_RESKEY_RGMANAGER_meta_refcnt".to_string(),
                resource.incarnations.to_string(),
            ),
        ];
        env.extend(
            tree.resolved_attrs(node)
                .into_iter()
                .map(|(k, v)| (format!("OCF_RESKEY_{}", k), v)),
        );

        Some(Self {
            resource: resource.name(),
            operation,
            handler,
            agent,
            env,
        })
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Runs one agent invocation to completion.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn exec(&self, invocation: &AgentInvocation) -> RestreeResult<AgentOutcome>;
}

/// Spawns the agent as a child process and waits for it.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentExecutor for ProcessExecutor {
    async fn exec(&self, invocation: &AgentInvocation) -> RestreeResult<AgentOutcome> {
        debug!(
            resource = %invocation.resource,
            operation = %invocation.operation,
            agent = %invocation.agent.display(),
            "Executing agent"
        );
        let status = Command::new(&invocation.handler)
            .arg(&invocation.agent)
            .arg(invocation.operation.as_str())
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| RestreeError::Spawn {
                resource: invocation.resource.clone(),
                source,
            })?;

        let outcome = match status.code() {
            Some(code) => AgentOutcome::Exited(OcfStatus::from_code(code)),
            None => AgentOutcome::Signalled,
        };
        if !outcome.is_success() {
            info!(
                resource = %invocation.resource,
                operation = %invocation.operation,
                outcome = %outcome,
                "Agent returned nonzero"
            );
        }
        Ok(outcome)
    }
}

/// Records invocations instead of running them. Scripted failures are
/// returned for matching resource/operation pairs; everything else succeeds.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<AgentInvocation>>,
    failures: Mutex<HashMap<(String, OcfOperation), AgentOutcome>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, resource: &str, operation: OcfOperation, outcome: AgentOutcome) {
        self.failures
            .lock()
            .insert((resource.to_string(), operation), outcome);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn calls(&self) -> Vec<AgentInvocation> {
        self.calls.lock().clone()
    }

    /// `(resource, operation)` pairs in call order.
    pub fn operations(&self) -> Vec<(String, OcfOperation)> {
        self.calls
            .lock()
            .iter()
            .map(|c| (c.resource.clone(), c.operation))
            .collect()
    }
}

#[async_trait]
impl AgentExecutor for RecordingExecutor {
    async fn exec(&self, invocation: &AgentInvocation) -> RestreeResult<AgentOutcome> {
        self.calls.lock().push(invocation.clone());
        let outcome = self
            .failures
            .lock()
            .get(&(invocation.resource.clone(), invocation.operation))
            .copied()
            .unwrap_or(AgentOutcome::SUCCESS);
        Ok(outcome)
    }
}
