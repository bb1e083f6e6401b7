use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request id allocated by the client. Matchlock ids are always positive
/// integers, monotonically increasing for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFrame {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single line of the wire protocol. Order matters: `serde(untagged)`
/// tries variants top to bottom, and classification relies on `Request`
/// requiring `method` (so a bare response falls through) and `Notification`
/// lacking `id` (so it is only reached once both frames carrying an id have
/// failed to match).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
    Notification(NotificationFrame),
}

impl Frame {
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Frame::Request(RequestFrame {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        })
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            Frame::Request(r) => Some(r.id),
            Frame::Response(r) => Some(r.id),
            Frame::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Frame::Request(r) => Some(&r.method),
            Frame::Notification(n) => Some(&n.method),
            Frame::Response(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_request_response_notification() {
        let req: Frame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"exec","params":{"command":"echo hi"}}"#,
        )
        .unwrap();
        assert!(matches!(req, Frame::Request(_)));
        assert_eq!(req.id(), Some(RequestId(1)));

        let resp: Frame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"exit_code":0}}"#).unwrap();
        assert!(matches!(resp, Frame::Response(_)));

        let err: Frame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"no such method"}}"#,
        )
        .unwrap();
        match err {
            Frame::Response(ResponseFrame { error: Some(e), .. }) => {
                assert_eq!(e.code, -32601);
            }
            other => panic!("expected error response, got {other:?}"),
        }

        let notif: Frame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"exec_stream.stdout","params":{"id":1,"data":"aGk="}}"#,
        )
        .unwrap();
        assert!(matches!(notif, Frame::Notification(_)));
        assert_eq!(notif.method(), Some("exec_stream.stdout"));
    }

    #[test]
    fn round_trips_request_frame() {
        let frame = Frame::request(RequestId(7), "exec", Some(serde_json::json!({"command":"ls"})));
        let line = serde_json::to_string(&frame).unwrap();
        let parsed: Frame = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.id(), Some(RequestId(7)));
        assert_eq!(parsed.method(), Some("exec"));
    }
}
