//! Error codes carried by error responses.
//!
//! Codes from `-32768` to `-32000` are reserved by JSON-RPC. The server uses
//! the `-32000..=-32099` window for its own protocol and application errors.

/// Payload was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Payload was JSON but not a valid message.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler is registered for the method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Parameters did not match the method's schema.
pub const INVALID_PARAMS: i64 = -32602;
/// The server failed while handling the request.
pub const INTERNAL_ERROR: i64 = -32603;

/// A command failed and its batch was rolled back.
pub const BATCH_FAILED: i64 = -32001;
/// A request reused the id of a request still awaiting its response.
pub const ID_COLLISION: i64 = -32002;
/// The session must complete the `askId` exchange first.
pub const SESSION_NOT_IDENTIFIED: i64 = -32003;
/// The client asked for something the server never announced.
pub const NO_PENDING_INQUIRY: i64 = -32004;
/// The answer exceeds the frame limit and cannot be sent.
pub const RESPONSE_TOO_LARGE: i64 = -32005;
