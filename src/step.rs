// ABOUTME: Step record describing one runtime execution for hosts and traces

use crate::error::Error;
use crate::value::{StrMap, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the persisted trace layout changes shape.
pub const STEP_SCHEMA_VERSION: u32 = 1;

/// Outcome of an explicit `(fail value)` signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Fail {
    pub reason: String,
    pub message: String,
}

/// A typed runtime error surfaced on an error Step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StepError {
    pub reason: String,
    pub message: String,
}

impl From<&Error> for StepError {
    fn from(e: &Error) -> Self {
        StepError { reason: e.kind.as_str().to_string(), message: e.render() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub duration_ms: u64,
    pub memory_bytes: u64,
}

/// One tool invocation, in program order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// String-keyed argument map exactly as the tool received it.
    pub args: Value,
    pub result_size: u64,
    pub duration_ms: u64,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmapBranch {
    pub index: usize,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_traces: Vec<String>,
}

/// One parallel fan-out (`pmap` or `pcalls`) with per-branch timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmapCall {
    pub kind: String,
    pub duration_ms: u64,
    pub branches: Vec<PmapBranch>,
}

/// The complete record of one runtime call. Every execution produces a
/// Step, including failed ones; `child_steps` nests sub-agent executions
/// so the whole tree serializes as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Step {
    pub schema_version: u32,
    #[serde(rename = "return")]
    pub return_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<Fail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub memory: StrMap,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pmap_calls: Vec<PmapCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_traces: Vec<String>,
    #[serde(default, skip_serializing_if = "StrMap::is_empty")]
    pub journal: StrMap,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub summaries: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "StrMap::is_empty")]
    pub tool_cache: StrMap,
    pub turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub field_descriptions: IndexMap<String, String>,
    /// Unix epoch milliseconds, UTC.
    pub started_at_ms: u64,
}

impl Step {
    pub fn new() -> Self {
        Step {
            schema_version: STEP_SCHEMA_VERSION,
            started_at_ms: now_ms(),
            ..Step::default()
        }
    }

    /// True when the execution produced neither a fail signal nor an error.
    pub fn is_success(&self) -> bool {
        self.fail.is_none() && self.error.is_none()
    }

    /// Decode a child Step piggybacked through a tool's return envelope.
    pub fn from_value(value: &Value) -> Option<Step> {
        serde_json::from_value(value.to_json()).ok()
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
