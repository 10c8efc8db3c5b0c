//! Control protocol types.
//!
//! Commands travel as newline-delimited JSON over the Unix socket and as
//! JSON bodies over HTTP. Every command gets one [`ControlResponse`].

use serde::{Deserialize, Serialize};

use courier_types::{StartResult, StatusReport, StopResult};

/// A command sent to the daemon control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Liveness check.
    Ping,
    /// Read the supervisor status.
    Status,
    /// Start the client. Without a token the stored credential is used.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Stop the client and suppress automatic restarts.
    Stop,
    /// Stop the client and exit the daemon.
    Shutdown,
}

/// Response to a control command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }

    /// Decode the structured payload, if it has the expected shape.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }
}

impl From<StartResult> for ControlResponse {
    fn from(result: StartResult) -> Self {
        let message = match &result.error {
            Some(err) => err.clone(),
            None => "client started".to_string(),
        };
        Self {
            ok: result.ok,
            message,
            data: serde_json::to_value(&result).ok(),
        }
    }
}

impl From<StopResult> for ControlResponse {
    fn from(result: StopResult) -> Self {
        let message = if result.was_running {
            "client stopped"
        } else {
            "client was not running"
        };
        Self {
            ok: result.ok,
            message: message.to_string(),
            data: serde_json::to_value(result).ok(),
        }
    }
}

impl From<StatusReport> for ControlResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            ok: true,
            message: report.phase.to_string(),
            data: serde_json::to_value(&report).ok(),
        }
    }
}
