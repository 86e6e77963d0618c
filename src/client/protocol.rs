//! Wire messages shared by the agent and browser transports.
//!
//! Both transports carry the same JSON bodies; the agent frames them with
//! a length prefix, the browser sends them as WebSocket text messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{ManagedCodeUpdate, StaticAssetUpdate, TargetOutcome, blob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestType {
    ManagedCodeUpdate,
    StaticAssetUpdate,
    InitialUpdatesCompleted,
}

/// How much of the target's log should come back with each response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLoggingLevel {
    WarningsAndErrors = 0,
    Verbose = 1,
}

impl ResponseLoggingLevel {
    pub fn current() -> Self {
        if crate::logger::is_verbose() {
            Self::Verbose
        } else {
            Self::WarningsAndErrors
        }
    }
}

impl Serialize for ResponseLoggingLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireDelta<'a> {
    pub module_id: Uuid,
    #[serde(with = "blob")]
    pub metadata_delta: &'a [u8],
    #[serde(rename = "ILDelta", with = "blob")]
    pub il_delta: &'a [u8],
    #[serde(with = "blob")]
    pub pdb_delta: &'a [u8],
    pub updated_types: &'a [i32],
}

impl<'a> From<&'a ManagedCodeUpdate> for WireDelta<'a> {
    fn from(update: &'a ManagedCodeUpdate) -> Self {
        Self {
            module_id: update.module_id,
            metadata_delta: &update.metadata_delta,
            il_delta: &update.il_delta,
            pdb_delta: &update.pdb_delta,
            updated_types: &update.updated_types,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireAsset<'a> {
    pub assembly_name: &'a str,
    pub relative_path: &'a str,
    #[serde(with = "blob")]
    pub contents: &'a [u8],
    pub is_application_project: bool,
}

impl<'a> From<&'a StaticAssetUpdate> for WireAsset<'a> {
    fn from(update: &'a StaticAssetUpdate) -> Self {
        Self {
            assembly_name: &update.assembly_name,
            relative_path: &update.asset_path,
            contents: &update.content,
            is_application_project: update.is_application_project,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedCodeUpdateRequest<'a> {
    #[serde(rename = "Type")]
    pub kind: RequestType,
    pub shared_secret: &'a str,
    pub update_id: u64,
    pub deltas: Vec<WireDelta<'a>>,
    pub response_logging_level: ResponseLoggingLevel,
}

impl<'a> ManagedCodeUpdateRequest<'a> {
    pub fn new(shared_secret: &'a str, update_id: u64, updates: &[&'a ManagedCodeUpdate]) -> Self {
        Self {
            kind: RequestType::ManagedCodeUpdate,
            shared_secret,
            update_id,
            deltas: updates.iter().map(|u| WireDelta::from(*u)).collect(),
            response_logging_level: ResponseLoggingLevel::current(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StaticAssetUpdateRequest<'a> {
    #[serde(rename = "Type")]
    pub kind: RequestType,
    pub shared_secret: &'a str,
    pub update_id: u64,
    pub assets: Vec<WireAsset<'a>>,
    pub response_logging_level: ResponseLoggingLevel,
}

impl<'a> StaticAssetUpdateRequest<'a> {
    pub fn new(shared_secret: &'a str, update_id: u64, updates: &'a [StaticAssetUpdate]) -> Self {
        Self {
            kind: RequestType::StaticAssetUpdate,
            shared_secret,
            update_id,
            assets: updates.iter().map(WireAsset::from).collect(),
            response_logging_level: ResponseLoggingLevel::current(),
        }
    }
}

/// Fire-and-forget notification, the agent sends no response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitialUpdatesCompleted<'a> {
    #[serde(rename = "Type")]
    pub kind: RequestType,
    pub shared_secret: &'a str,
}

impl<'a> InitialUpdatesCompleted<'a> {
    pub fn new(shared_secret: &'a str) -> Self {
        Self {
            kind: RequestType::InitialUpdatesCompleted,
            shared_secret,
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Severity of a log line relayed by a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Severity {
    Verbose,
    Warning,
    Error,
}

impl Severity {
    fn from_code(code: u8) -> Option<Severity> {
        match code {
            0 => Some(Severity::Verbose),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Error),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        Severity::from_code(value).ok_or_else(|| format!("unknown severity {value}"))
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> u8 {
        match severity {
            Severity::Verbose => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    pub message: String,
    pub severity: Severity,
}

impl LogEntry {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateResponse {
    pub success: bool,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

/// Sent instead of a response when the runtime rejects an edit it
/// cannot apply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HotReloadException {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ResponseBody {
    Update(UpdateResponse),
    Exception(HotReloadException),
}

/// One target's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub outcome: TargetOutcome,
    pub log: Vec<LogEntry>,
}

impl Reply {
    pub fn disconnected() -> Self {
        Self {
            outcome: TargetOutcome::Disconnected,
            log: Vec::new(),
        }
    }
}

/// Decode a response body. Undecodable input is a protocol mismatch.
pub fn parse_reply(body: &[u8]) -> Reply {
    match serde_json::from_slice::<ResponseBody>(body) {
        Ok(ResponseBody::Update(response)) => Reply {
            outcome: if response.success {
                TargetOutcome::Succeeded
            } else {
                TargetOutcome::Rejected
            },
            log: response.log,
        },
        Ok(ResponseBody::Exception(e)) => Reply {
            outcome: TargetOutcome::Rejected,
            log: vec![LogEntry::error(format!(
                "runtime rejected the edit ({}): {}",
                e.code, e.message
            ))],
        },
        Err(e) => Reply {
            outcome: TargetOutcome::ProtocolMismatch,
            log: vec![LogEntry::error(format!("malformed response: {e}"))],
        },
    }
}

/// First frame sent by a freshly connected agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientInitialization {
    pub capabilities: String,
}

impl ClientInitialization {
    pub fn tokens(&self) -> Vec<String> {
        self.capabilities
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }
}
