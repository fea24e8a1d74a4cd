//! The NLPRP message envelope (spec.md §4.5 "Envelope").
//!
//! Every request/response is a JSON object carrying `protocol`/`command`
//! (requests) or `protocol`/`status`/`server_info` (responses), mirroring
//! `casparian_protocol::types`'s newtype-and-enum conventions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `protocol` block: identifies the wire version both ends speak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub name: String,
    pub version: String,
}

impl ProtocolInfo {
    pub const NAME: &'static str = "nlprp";
    pub const VERSION: &'static str = "0.2.0";

    pub fn current() -> Self {
        Self {
            name: Self::NAME.to_string(),
            version: Self::VERSION.to_string(),
        }
    }
}

impl Default for ProtocolInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// `server_info` block: identity of the remote NLP service, echoed on every
/// response so clients can detect a server restart/version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Outcome of processing one request, carried as the response's `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Ok => write!(f, "ok"),
            ResponseStatus::Error => write!(f, "error"),
        }
    }
}

/// One entry of a response's `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Generic request envelope, parameterized by the command-specific body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request<T> {
    pub protocol: ProtocolInfo,
    #[serde(flatten)]
    pub command: T,
}

impl<T> Request<T> {
    pub fn new(command: T) -> Self {
        Self {
            protocol: ProtocolInfo::current(),
            command,
        }
    }
}

/// Generic response envelope, parameterized by the command-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    pub protocol: ProtocolInfo,
    pub status: ResponseStatus,
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetail>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> Response<T> {
    pub fn ok(server_info: ServerInfo, payload: T) -> Self {
        Self {
            protocol: ProtocolInfo::current(),
            status: ResponseStatus::Ok,
            server_info,
            errors: Vec::new(),
            payload: Some(payload),
        }
    }

    pub fn error(server_info: ServerInfo, errors: Vec<ErrorDetail>) -> Self {
        Self {
            protocol: ProtocolInfo::current(),
            status: ResponseStatus::Error,
            server_info,
            errors,
            payload: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ResponseStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        value: u32,
    }

    #[test]
    fn response_ok_round_trips_through_json() {
        let server_info = ServerInfo {
            name: "nlprunner-server".to_string(),
            version: "0.1.0".to_string(),
            id: None,
        };
        let response = Response::ok(server_info, Dummy { value: 7 });
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["status"], json!("ok"));
        assert_eq!(encoded["value"], json!(7));

        let decoded: Response<Dummy> = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn response_error_has_no_payload_field() {
        let server_info = ServerInfo {
            name: "nlprunner-server".to_string(),
            version: "0.1.0".to_string(),
            id: None,
        };
        let response: Response<Dummy> = Response::error(
            server_info,
            vec![ErrorDetail::new("bad_request", "missing content")],
        );
        let encoded = serde_json::to_value(&response).unwrap();
        assert!(encoded.get("value").is_none());
        assert!(!response.is_ok());
    }
}
