//! Wire envelopes exchanged over the cross-document messaging channel.
//!
//! Three shapes travel on the wire, none of them tagged:
//!
//! - request: `{methodId, fn, args}`
//! - reply: `{methodId, result, rejected, error}`
//! - handshake: the bare string `"init"`
//!
//! Requests and replies are told apart by the presence of the `fn` key. That
//! convention is shared with every existing peer, so [`Envelope`] decodes it
//! into an explicit variant but always encodes back to the untagged shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;

/// The handshake message, sent as a bare string in both directions.
pub const INIT_MESSAGE: &str = "init";

/// A method call addressed to a remote request handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation ID assigned by the calling client.
    #[serde(rename = "methodId")]
    pub method_id: u64,
    /// Registered method name.
    #[serde(rename = "fn")]
    pub function: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// The settlement of a previously issued request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    /// Echoed correlation ID.
    pub method_id: u64,
    /// Result value (`null` when rejected).
    #[serde(default)]
    pub result: Value,
    /// Whether the call was rejected.
    #[serde(default)]
    pub rejected: bool,
    /// Rejection value (`null` when resolved).
    #[serde(default)]
    pub error: Value,
}

impl RequestEnvelope {
    /// Build a request envelope.
    pub fn new(method_id: u64, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method_id,
            function: function.into(),
            args,
        }
    }
}

impl ReplyEnvelope {
    /// Build a reply for a call that resolved with `result`.
    pub fn resolved(method_id: u64, result: Value) -> Self {
        Self {
            method_id,
            result,
            rejected: false,
            error: Value::Null,
        }
    }

    /// Build a reply for a call that was rejected with `error`.
    pub fn rejected(method_id: u64, error: Value) -> Self {
        Self {
            method_id,
            result: Value::Null,
            rejected: true,
            error,
        }
    }

    /// Split the reply into the value the caller should observe.
    pub fn into_result(self) -> Result<Value, Value> {
        if self.rejected {
            Err(self.error)
        } else {
            Ok(self.result)
        }
    }
}

/// Any message understood by the protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// The `"init"` handshake.
    Init,
    /// A method call.
    Request(RequestEnvelope),
    /// A method settlement.
    Reply(ReplyEnvelope),
}

impl Envelope {
    /// Decode an inbound message payload.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::String(s) if s == INIT_MESSAGE => Ok(Self::Init),
            Value::Object(map) if map.contains_key("fn") => {
                Ok(Self::Request(RequestEnvelope::deserialize(value)?))
            }
            Value::Object(_) => Ok(Self::Reply(ReplyEnvelope::deserialize(value)?)),
            other => Err(EnvelopeError::Unrecognized {
                kind: value_kind(other),
            }),
        }
    }

    /// Encode to the untagged wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Init => Value::String(INIT_MESSAGE.to_owned()),
            // Both envelope structs only hold JSON-native fields.
            Self::Request(req) => serde_json::to_value(req).unwrap_or(Value::Null),
            Self::Reply(reply) => serde_json::to_value(reply).unwrap_or(Value::Null),
        }
    }

    /// Correlation ID, if the envelope carries one.
    pub fn method_id(&self) -> Option<u64> {
        match self {
            Self::Init => None,
            Self::Request(req) => Some(req.method_id),
            Self::Reply(reply) => Some(reply.method_id),
        }
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(req: RequestEnvelope) -> Self {
        Self::Request(req)
    }
}

impl From<ReplyEnvelope> for Envelope {
    fn from(reply: ReplyEnvelope) -> Self {
        Self::Reply(reply)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn init_is_a_bare_string() {
        assert_eq!(Envelope::Init.to_value(), json!("init"));
        assert_eq!(Envelope::from_value(&json!("init")).unwrap(), Envelope::Init);
    }

    #[test]
    fn other_strings_are_unrecognized() {
        let err = Envelope::from_value(&json!("hello")).unwrap_err();
        assert_matches!(err, EnvelopeError::Unrecognized { kind: "string" });
    }

    #[test]
    fn request_wire_shape() {
        let env = Envelope::from(RequestEnvelope::new(3, "add", vec![json!(2), json!(3)]));
        assert_eq!(
            env.to_value(),
            json!({"methodId": 3, "fn": "add", "args": [2, 3]})
        );
    }

    #[test]
    fn reply_wire_shape_always_has_four_fields() {
        let env = Envelope::from(ReplyEnvelope::resolved(7, json!(5)));
        assert_eq!(
            env.to_value(),
            json!({"methodId": 7, "result": 5, "rejected": false, "error": null})
        );
    }

    #[test]
    fn fn_key_selects_request() {
        let env = Envelope::from_value(&json!({"methodId": 1, "fn": "x", "args": []})).unwrap();
        assert_matches!(env, Envelope::Request(ref r) if r.function == "x");
    }

    #[test]
    fn request_without_args_defaults_to_empty() {
        let env = Envelope::from_value(&json!({"methodId": 1, "fn": "x"})).unwrap();
        assert_matches!(env, Envelope::Request(ref r) if r.args.is_empty());
    }

    #[test]
    fn object_without_fn_is_reply() {
        let env = Envelope::from_value(&json!({"methodId": 4, "rejected": true, "error": "nope"}))
            .unwrap();
        let Envelope::Reply(reply) = env else {
            panic!("expected reply");
        };
        assert_eq!(reply.method_id, 4);
        assert_eq!(reply.result, Value::Null);
        assert_eq!(reply.into_result(), Err(json!("nope")));
    }

    #[test]
    fn reply_missing_method_id_is_malformed() {
        let err = Envelope::from_value(&json!({"result": 1})).unwrap_err();
        assert_matches!(err, EnvelopeError::Malformed(_));
    }

    #[test]
    fn request_with_non_string_fn_is_malformed() {
        let err = Envelope::from_value(&json!({"methodId": 1, "fn": 42})).unwrap_err();
        assert_matches!(err, EnvelopeError::Malformed(_));
    }

    #[test]
    fn non_object_payloads_are_unrecognized() {
        assert_matches!(
            Envelope::from_value(&json!([1, 2])),
            Err(EnvelopeError::Unrecognized { kind: "array" })
        );
        assert_matches!(
            Envelope::from_value(&Value::Null),
            Err(EnvelopeError::Unrecognized { kind: "null" })
        );
    }

    #[test]
    fn method_id_accessor() {
        assert_eq!(Envelope::Init.method_id(), None);
        assert_eq!(
            Envelope::from(ReplyEnvelope::rejected(9, json!("e"))).method_id(),
            Some(9)
        );
    }

    #[test]
    fn resolved_reply_into_result() {
        assert_eq!(
            ReplyEnvelope::resolved(1, json!({"a": 1})).into_result(),
            Ok(json!({"a": 1}))
        );
    }
}
