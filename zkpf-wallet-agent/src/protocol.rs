//! Messages exchanged with a connected client.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::approval::Decision;
use crate::error::Failure;
use crate::types::{ClientId, Domain, RequestId};

// ═══════════════════════════════════════════════════════════════════════════════
// INBOUND
// ═══════════════════════════════════════════════════════════════════════════════

/// A message arriving on a connection's inbound channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// An action request that goes through authorization.
    #[serde(rename = "QUERY")]
    Query(QueryRequest),

    /// A UI decision echoed back through the page; routed to the approval channel.
    #[serde(rename = "ACTION_RESPONSE")]
    ActionResponse(DecisionEcho),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Caller-claimed origin. Informational only; the connection's own origin is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub request_id: RequestId,
    pub query: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEcho {
    /// Client the decided request belongs to. Required from the approval
    /// surface; a connection always substitutes its own id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub request_id: RequestId,
    pub data: Decision,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESPONSE CODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    NeedsReauthorization,
    Denied,
    TimedOut,
    Unknown,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::NeedsReauthorization => 401,
            ResponseCode::Denied => 403,
            ResponseCode::TimedOut => 408,
            ResponseCode::Unknown => 500,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResponseCode::Ok
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

/// How a request ended, before it is rendered as an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Refused by validation or argument checks, or a normalized fault.
    Denied(Failure),
    /// The user rejected the approval request.
    Rejected(Value),
    /// No decision arrived within the approval window.
    TimedOut,
    /// The operation (or the approved decision) produced a payload.
    Completed(Value),
}

/// A payload carries an error marker when it has a non-null `error` field.
pub fn error_marker(payload: &Value) -> Option<&Value> {
    payload.get("error").filter(|value| !value.is_null())
}

impl Resolution {
    /// Priority-ordered: re-auth 401, rejection 403, timeout 408, clean
    /// success 200, everything else 500.
    pub fn code(&self) -> ResponseCode {
        match self {
            Resolution::Denied(failure) => match failure.permission_kind() {
                Some(kind) if kind.reauth_action().is_some() => ResponseCode::NeedsReauthorization,
                _ => ResponseCode::Unknown,
            },
            Resolution::Rejected(_) => ResponseCode::Denied,
            Resolution::TimedOut => ResponseCode::TimedOut,
            Resolution::Completed(payload) if error_marker(payload).is_none() => ResponseCode::Ok,
            Resolution::Completed(_) => ResponseCode::Unknown,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTBOUND
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub message: String,
    #[serde(default)]
    pub response: Value,
}

/// The single response produced for a request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: RequestId,
    pub code: ResponseCode,
    pub response: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

impl ResponseEnvelope {
    pub fn from_resolution(request_id: RequestId, resolution: Resolution) -> Self {
        let code = resolution.code();
        let (response, error) = match resolution {
            Resolution::Completed(payload) => {
                let error = error_marker(&payload).map(|marker| ErrorDescriptor {
                    kind: "unknown".into(),
                    key: "operation-error".into(),
                    message: match marker {
                        Value::String(message) => message.clone(),
                        other => other.to_string(),
                    },
                    response: payload.clone(),
                });
                (payload, error)
            }
            Resolution::Rejected(payload) => {
                let error = ErrorDescriptor {
                    kind: "rejected".into(),
                    key: "user-rejected".into(),
                    message: "the request was rejected by the user".into(),
                    response: payload.clone(),
                };
                (payload, Some(error))
            }
            Resolution::TimedOut => {
                let error = ErrorDescriptor {
                    kind: "timeout".into(),
                    key: "approval-timeout".into(),
                    message: "no decision arrived before the approval window closed".into(),
                    response: Value::Null,
                };
                (Value::Null, Some(error))
            }
            Resolution::Denied(failure) => (Value::Null, Some(describe_failure(&failure))),
        };

        Self {
            request_id,
            code,
            response,
            error,
        }
    }
}

fn describe_failure(failure: &Failure) -> ErrorDescriptor {
    match failure {
        Failure::Permission(kind) => ErrorDescriptor {
            kind: "permission".into(),
            key: kind.key().into(),
            message: kind.to_string(),
            response: match kind.reauth_action() {
                Some(action) => json!({ "action": action }),
                None => Value::Null,
            },
        },
        Failure::Argument(error) => ErrorDescriptor {
            kind: "argument".into(),
            key: error.key().into(),
            message: error.to_string(),
            response: Value::Null,
        },
        Failure::Unknown { message } => ErrorDescriptor {
            kind: "unknown".into(),
            key: "unknown".into(),
            message: message.clone(),
            response: Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ArgumentError, PermissionKind};

    #[test]
    fn test_inbound_parsing() {
        let query: InboundMessage = serde_json::from_value(json!({
            "type": "QUERY",
            "domain": "https://evil.example",
            "requestId": "r-1",
            "query": "asset",
            "args": { "assetId": 1 }
        }))
        .unwrap();
        match query {
            InboundMessage::Query(q) => {
                assert_eq!(q.request_id, RequestId::from("r-1"));
                assert_eq!(q.query, "asset");
                assert_eq!(q.args.get("assetId"), Some(&json!(1)));
                assert!(q.client_id.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let echo: InboundMessage = serde_json::from_value(json!({
            "type": "ACTION_RESPONSE",
            "requestId": "r-1",
            "data": { "decision": "rejected", "response": null }
        }))
        .unwrap();
        assert_eq!(
            echo,
            InboundMessage::ActionResponse(DecisionEcho {
                client_id: None,
                request_id: RequestId::from("r-1"),
                data: Decision::Rejected(Value::Null),
            })
        );
    }

    #[test]
    fn test_code_priority() {
        let reauth = Resolution::Denied(PermissionKind::DomainNotRegistered.into());
        let no_action = Resolution::Denied(PermissionKind::AccountIncorrectPassword.into());
        let argument = Resolution::Denied(ArgumentError::MissingOrigin.into());

        assert_eq!(reauth.code().as_u16(), 401);
        assert_eq!(no_action.code().as_u16(), 500);
        assert_eq!(argument.code().as_u16(), 500);
        assert_eq!(Resolution::Rejected(json!("no")).code().as_u16(), 403);
        assert_eq!(Resolution::TimedOut.code().as_u16(), 408);
        assert_eq!(Resolution::Completed(json!({ "ok": 1 })).code().as_u16(), 200);
        assert_eq!(
            Resolution::Completed(json!({ "error": null, "ok": 1 })).code().as_u16(),
            200
        );
        assert_eq!(
            Resolution::Completed(json!({ "error": "bad proof" })).code().as_u16(),
            500
        );
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ResponseEnvelope::from_resolution(
            RequestId::from("r-7"),
            Resolution::Denied(PermissionKind::AccountNotLoggedIn.into()),
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "requestId": "r-7",
                "code": 401,
                "response": null,
                "error": {
                    "type": "permission",
                    "key": "account-not-logged-in",
                    "message": "the account is not logged in",
                    "response": { "action": "account.login" }
                }
            })
        );

        let ok = ResponseEnvelope::from_resolution(
            RequestId::from("r-8"),
            Resolution::Completed(json!({ "balance": 3 })),
        );
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "requestId": "r-8", "code": 200, "response": { "balance": 3 } })
        );
    }
}
