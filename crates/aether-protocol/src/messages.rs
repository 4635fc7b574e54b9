use serde::{Deserialize, Serialize};

/// Known RPC method names.
///
/// The daemon dispatches on these strings; anything else produces a
/// `success=false` response naming the unknown method.
pub mod methods {
    pub const STATUS_FULL: &str = "status.full";
    pub const STATUS_AGENT: &str = "status.agent";
    pub const LOGS_PATH: &str = "logs.path";
    pub const POOL_DRAIN: &str = "pool.drain";
    pub const POOL_PAUSE: &str = "pool.pause";
    pub const POOL_RESUME: &str = "pool.resume";
    pub const AGENT_KILL: &str = "agent.kill";
    pub const SHUTDOWN: &str = "shutdown";
    pub const SESSION_EVENT: &str = "session.event";
    pub const EVENTS_LIST: &str = "events.list";
    pub const SPAWN_REGISTER: &str = "spawn.register";
    pub const SPAWN_DEREGISTER: &str = "spawn.deregister";
}

/// Client -> Daemon request envelope.
///
/// `params` is left as raw JSON; each handler deserializes the shape it
/// expects and rejects anything else with a `success=false` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Daemon -> Client response envelope.
///
/// Success/failure is binary across the wire; `error` carries a descriptive
/// message when `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            result: None,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let req = Request::with_params(methods::AGENT_KILL, json!({"agent_name": "bold-otter-1"}));
        let wire = serde_json::to_string(&req).unwrap();
        assert!(wire.contains(r#""method":"agent.kill""#));
        let parsed: Request = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.method, methods::AGENT_KILL);
        assert_eq!(parsed.params.unwrap()["agent_name"], "bold-otter-1");
    }

    #[test]
    fn test_request_without_params_omits_field() {
        let req = Request::new(methods::POOL_DRAIN);
        let wire = serde_json::to_string(&req).unwrap();
        assert!(!wire.contains("params"));
        let parsed: Request = serde_json::from_str(&wire).unwrap();
        assert!(parsed.params.is_none());
    }

    #[test]
    fn test_response_ok_roundtrip() {
        let resp = Response::ok(json!({"mode": "draining", "running": 2}));
        let wire = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&wire).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.result.unwrap()["running"], 2);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_response_err_carries_message() {
        let resp = Response::err("agent not found: bold-otter-1");
        let wire = serde_json::to_string(&resp).unwrap();
        assert!(!wire.contains("result"));
        let parsed: Response = serde_json::from_str(&wire).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error.as_deref(), Some("agent not found: bold-otter-1"));
    }

    #[test]
    fn test_extra_envelope_fields_tolerated() {
        // Extra envelope fields from newer clients must not break decoding
        let parsed: Request =
            serde_json::from_str(r#"{"method":"status.full","trace_id":"t-1"}"#).unwrap();
        assert_eq!(parsed.method, "status.full");
    }
}
