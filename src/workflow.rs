use crate::error::{MasterError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseState {
    Offline,
    Online,
}

impl FromStr for ReleaseState {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ONLINE" => Ok(ReleaseState::Online),
            "OFFLINE" => Ok(ReleaseState::Offline),
            _ => Err(MasterError::invalid_argument("releaseState", s)),
        }
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseState::Offline => "OFFLINE",
            ReleaseState::Online => "ONLINE",
        })
    }
}

/// How concurrent instances of the same workflow are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowExecutionType {
    #[default]
    Parallel,
    SerialWait,
    SerialDiscard,
    SerialPriority,
}

impl FromStr for WorkflowExecutionType {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PARALLEL" => Ok(WorkflowExecutionType::Parallel),
            "SERIAL_WAIT" => Ok(WorkflowExecutionType::SerialWait),
            "SERIAL_DISCARD" => Ok(WorkflowExecutionType::SerialDiscard),
            "SERIAL_PRIORITY" => Ok(WorkflowExecutionType::SerialPriority),
            _ => Err(MasterError::invalid_argument("executionType", s)),
        }
    }
}

/// Persisted workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub code: i64,
    pub name: String,
    pub version: i32,
    pub description: Option<String>,
    pub release_state: ReleaseState,
    pub global_params: Option<String>,
    pub warning_group_id: i32,
    pub timeout: i32,
    pub execution_type: WorkflowExecutionType,
    pub locations: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Partial update of a workflow definition.
///
/// Absent strings and zero integers leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `ONLINE` or `OFFLINE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_params: Option<String>,
    pub warning_group_id: i32,
    pub timeout: i32,
    /// `PARALLEL`, `SERIAL_WAIT`, `SERIAL_DISCARD` or `SERIAL_PRIORITY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl WorkflowUpdateRequest {
    /// Parse a request body. Unknown fields are ignored.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Overlay this request onto a copy of `existing`. The update time of the
    /// result is always refreshed.
    pub fn merge_into(&self, existing: &WorkflowDefinition) -> Result<WorkflowDefinition> {
        let mut merged = existing.clone();

        if let Some(name) = &self.name {
            merged.name = name.clone();
        }
        if let Some(description) = &self.description {
            merged.description = Some(description.clone());
        }
        if let Some(release_state) = &self.release_state {
            merged.release_state = release_state.parse()?;
        }
        if let Some(global_params) = &self.global_params {
            merged.global_params = Some(global_params.clone());
        }
        if self.warning_group_id != 0 {
            merged.warning_group_id = self.warning_group_id;
        }
        if self.timeout != 0 {
            merged.timeout = self.timeout;
        }
        if let Some(execution_type) = &self.execution_type {
            merged.execution_type = execution_type.parse()?;
        }
        if let Some(location) = &self.location {
            merged.locations = Some(location.clone());
        }

        merged.update_time = Utc::now();
        Ok(merged)
    }
}
