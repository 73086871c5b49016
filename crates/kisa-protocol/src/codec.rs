//! Conversion between frame payloads and [`Message`] values.
//!
//! Each frame carries exactly one message. Decoding validates the envelope
//! shape only; whether a method exists is a dispatch concern. Encoding is
//! deterministic: object keys are emitted in sorted order.

use serde_json::{Map, Value};

use crate::error::CodecError;
use crate::message::{
    ErrorObject, JSONRPC_VERSION, Message, Notification, Params, Request, RequestId, Response,
    ResponsePayload,
};

/// Decodes one message from a frame payload.
pub fn decode(payload: &[u8]) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_slice(payload).map_err(CodecError::Parse)?;
    decode_value(value)
}

/// Decodes one message from an already parsed JSON value.
pub fn decode_value(value: Value) -> Result<Message, CodecError> {
    let Value::Object(mut object) = value else {
        return Err(CodecError::invalid("message must be a JSON object", None));
    };

    let id = object.remove("id");
    // Recover the id early so validation failures can still be answered.
    let recovered_id = id.as_ref().and_then(Value::as_i64);

    match object.remove("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => {
            return Err(CodecError::invalid(
                "jsonrpc member must be \"2.0\"",
                recovered_id,
            ));
        }
    }

    match object.remove("method") {
        Some(method) => decode_call(method, id, object, recovered_id),
        None => decode_response(id, object),
    }
}

/// Encodes a message into a frame payload.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&canonicalize(message.to_value())).map_err(CodecError::Serialize)
}

/// Rebuilds objects with sorted keys so output never depends on map order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        scalar => scalar,
    }
}

fn decode_call(
    method: Value,
    id: Option<Value>,
    mut object: Map<String, Value>,
    recovered_id: Option<RequestId>,
) -> Result<Message, CodecError> {
    let Value::String(method) = method else {
        return Err(CodecError::invalid("method must be a string", recovered_id));
    };
    if object.contains_key("result") || object.contains_key("error") {
        return Err(CodecError::invalid(
            "a call must not carry result or error members",
            recovered_id,
        ));
    }
    let params = match object.remove("params") {
        None => None,
        Some(value) => Some(Params::from_value(value).map_err(|_| {
            CodecError::invalid("params must be an array or an object", recovered_id)
        })?),
    };

    match id {
        None => Ok(Message::Notification(Notification { method, params })),
        Some(id) => Ok(Message::Request(Request {
            id: decode_id(&id)?,
            method,
            params,
        })),
    }
}

fn decode_response(
    id: Option<Value>,
    mut object: Map<String, Value>,
) -> Result<Message, CodecError> {
    let id = match id {
        None => return Err(CodecError::invalid("response is missing its id", None)),
        Some(Value::Null) => None,
        Some(value) => Some(decode_id(&value)?),
    };

    let payload = match (object.remove("result"), object.remove("error")) {
        (Some(result), None) => ResponsePayload::Result(result),
        (None, Some(error)) => {
            let error: ErrorObject = serde_json::from_value(error)
                .map_err(|source| CodecError::invalid(format!("invalid error object: {source}"), id))?;
            ResponsePayload::Error(error)
        }
        (Some(_), Some(_)) => {
            return Err(CodecError::invalid(
                "response carries both result and error",
                id,
            ));
        }
        (None, None) => {
            return Err(CodecError::invalid(
                "response carries neither result nor error",
                id,
            ));
        }
    };

    Ok(Message::Response(Response { id, payload }))
}

fn decode_id(value: &Value) -> Result<RequestId, CodecError> {
    value
        .as_i64()
        .ok_or_else(|| CodecError::invalid("id must be an integer", None))
}
