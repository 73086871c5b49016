//! Framed message IO for the server side of a test socket.

use std::os::unix::net::UnixStream;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};

use kisa_config::DEFAULT_MAX_FRAME_BYTES;
use kisa_protocol::methods::DRAW;
use kisa_protocol::{
    Message, Notification, Params, Request, Response, decode, encode, read_frame, write_frame,
};

/// One end of a socket speaking framed JSON-RPC.
pub(in crate::tests) struct Peer {
    stream: UnixStream,
}

impl Peer {
    pub(in crate::tests) fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub(in crate::tests) fn send(&mut self, message: impl Into<Message>) -> Result<()> {
        let payload = encode(&message.into()).context("encode")?;
        write_frame(&mut self.stream, &payload, DEFAULT_MAX_FRAME_BYTES).context("write frame")
    }

    pub(in crate::tests) fn notify(&mut self, method: &str) -> Result<()> {
        self.send(Notification::new(method, None))
    }

    /// Reads one message, or `None` once the client hangs up.
    pub(in crate::tests) fn recv(&mut self) -> Result<Option<Message>> {
        let frame = read_frame(&mut self.stream, DEFAULT_MAX_FRAME_BYTES).context("read frame")?;
        let Some(frame) = frame else {
            return Ok(None);
        };
        decode(&frame).map(Some).context("decode")
    }

    pub(in crate::tests) fn expect_request(&mut self) -> Result<Request> {
        match self.recv()? {
            Some(Message::Request(request)) => Ok(request),
            other => Err(anyhow!("expected a request, got {other:?}")),
        }
    }

    pub(in crate::tests) fn reply(&mut self, request: &Request, result: Value) -> Result<()> {
        self.send(Response::success(request.id, result))
    }

    pub(in crate::tests) fn push_draw(&mut self, draw: &Value) -> Result<()> {
        let params = Params::from_value(draw.clone()).context("draw params")?;
        self.send(Notification::new(DRAW, Some(params)))
    }
}

/// Render data with one unstyled segment per line.
pub(in crate::tests) fn screen(lines: &[String], cursor: (usize, usize)) -> Value {
    let lines: Vec<Value> = lines
        .iter()
        .map(|text| json!({ "segments": [{ "text": text }] }))
        .collect();
    json!({
        "lines": lines,
        "cursor": { "line": cursor.0, "column": cursor.1 }
    })
}
