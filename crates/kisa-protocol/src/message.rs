//! JSON-RPC 2.0 shaped messages exchanged between the server and clients.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Numeric identifier correlating a request with its response.
pub type RequestId = i64;

/// Structured request parameters.
///
/// Bare scalars are not valid parameters; only ordered lists and keyed maps
/// are representable.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Parameters addressed by position.
    Positional(Vec<Value>),
    /// Parameters addressed by name.
    Named(Map<String, Value>),
}

impl Params {
    /// Serialises `value` into parameters, rejecting non-structured output.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        let value = serde_json::to_value(value).map_err(CodecError::Serialize)?;
        Self::from_value(value)
    }

    /// Wraps a JSON value, rejecting scalars.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Array(items) => Ok(Self::Positional(items)),
            Value::Object(fields) => Ok(Self::Named(fields)),
            _ => Err(CodecError::invalid(
                "params must be an array or an object",
                None,
            )),
        }
    }

    /// Deserialises the parameters into a typed payload.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }

    /// JSON representation of the parameters.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Positional(items) => Value::Array(items.clone()),
            Self::Named(fields) => Value::Object(fields.clone()),
        }
    }
}

/// A call that expects exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Identifier echoed by the response.
    pub id: RequestId,
    /// Method name; unknown names are rejected at dispatch, not decode.
    pub method: String,
    /// Optional structured parameters.
    pub params: Option<Params>,
}

impl Request {
    /// Builds a request.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// A one-way message; no response is ever produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Optional structured parameters.
    pub params: Option<Params>,
}

impl Notification {
    /// Builds a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ErrorObject {
    /// Numeric error code, see [`crate::codes`].
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Builds an error object without details.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// The call succeeded.
    Result(Value),
    /// The call failed.
    Error(ErrorObject),
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the answered request; `None` when the request was too
    /// malformed for its id to be recovered.
    pub id: Option<RequestId>,
    /// Result or error.
    pub payload: ResponsePayload,
}

impl Response {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Returns the result, or the error object on failure.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error),
        }
    }
}

/// Any message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call awaiting a response.
    Request(Request),
    /// A one-way message.
    Notification(Notification),
    /// The answer to an earlier request.
    Response(Response),
}

impl Message {
    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }

    /// JSON representation of the message.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_owned(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request(request) => {
                object.insert("id".to_owned(), Value::from(request.id));
                insert_call(&mut object, &request.method, request.params.as_ref());
            }
            Self::Notification(notification) => {
                insert_call(&mut object, &notification.method, notification.params.as_ref());
            }
            Self::Response(response) => {
                object.insert(
                    "id".to_owned(),
                    response.id.map_or(Value::Null, Value::from),
                );
                match &response.payload {
                    ResponsePayload::Result(value) => {
                        object.insert("result".to_owned(), value.clone());
                    }
                    ResponsePayload::Error(error) => {
                        let mut error_object = Map::new();
                        error_object.insert("code".to_owned(), Value::from(error.code));
                        error_object.insert("message".to_owned(), Value::from(error.message.clone()));
                        if let Some(data) = &error.data {
                            error_object.insert("data".to_owned(), data.clone());
                        }
                        object.insert("error".to_owned(), Value::Object(error_object));
                    }
                }
            }
        }
        Value::Object(object)
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

fn insert_call(object: &mut Map<String, Value>, method: &str, params: Option<&Params>) {
    object.insert("method".to_owned(), Value::from(method));
    if let Some(params) = params {
        object.insert("params".to_owned(), params.to_value());
    }
}
