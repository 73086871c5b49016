//! In-process server driven over socket pairs.
//!
//! The harness owns a detached [`Multiplexer`] and a [`Server`]; each
//! [`TestClient`] is the far end of a socket pair adopted as a session. Tests
//! write requests, pump the loop, then drain whatever the server wrote.

use std::io;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use kisa_config::{Config, Keymap};
use kisa_protocol::{
    Message, Notification, Params, Request, RequestId, Response, decode, encode, read_frame,
    write_frame,
};

use super::RecordingHealthReporter;
use crate::dispatch::{DispatchLimits, Dispatcher, ScratchExecutor};
use crate::server::{MethodRegistry, Server, ServerSettings};
use crate::session::SessionId;
use crate::transport::{ConnectionLimits, Multiplexer};

const DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// A server and its loop, without a listening socket.
pub struct ServerHarness {
    pub multiplexer: Multiplexer,
    pub server: Server<ScratchExecutor>,
    pub reporter: Arc<RecordingHealthReporter>,
    limits: ConnectionLimits,
}

impl ServerHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    #[must_use]
    pub fn with_config(config: &Config) -> Self {
        let reporter = Arc::new(RecordingHealthReporter::default());
        let dispatcher = Dispatcher::new(
            ScratchExecutor::new(),
            Keymap::builtin(),
            DispatchLimits::from_config(config),
        );
        let server = Server::new(
            dispatcher,
            MethodRegistry::standard(),
            ServerSettings::from_config(config),
            reporter.clone(),
        );
        let limits = ConnectionLimits::from_config(config);
        Self {
            multiplexer: Multiplexer::detached(limits),
            server,
            reporter,
            limits,
        }
    }

    /// Opens a session and returns the client end.
    pub fn connect(&mut self) -> TestClient {
        let (server_end, client_end) = UnixStream::pair().expect("socket pair");
        let session = self
            .multiplexer
            .adopt(server_end, &mut self.server)
            .expect("adopt session");
        TestClient::new(client_end, session, self.limits.max_frame)
    }

    /// Opens a session and completes identification.
    pub fn connect_identified(&mut self) -> TestClient {
        let mut client = self.connect();
        client.drain();
        let announced = client.take_notifications();
        assert_eq!(announced.len(), 1, "expected only the identity announcement");
        let response = self.call(&mut client, "askId", None);
        assert_eq!(response.into_result(), Ok(Value::Bool(true)));
        client
    }

    /// Runs one loop pass without waiting.
    pub fn pump(&mut self) {
        self.multiplexer
            .run(&mut self.server, Some(Duration::ZERO))
            .expect("loop pass");
    }

    /// Sends a request, runs the loop, and returns its response. Everything
    /// else the server sent is kept in the client's inbox.
    pub fn call(&mut self, client: &mut TestClient, method: &str, params: Option<Value>) -> Response {
        let id = client.request(method, params);
        self.pump();
        client.drain();
        client
            .take_response(id)
            .unwrap_or_else(|| panic!("no response to '{method}'"))
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.multiplexer.sessions().len()
    }
}

/// Client end of a socket pair.
pub struct TestClient {
    stream: UnixStream,
    session: SessionId,
    max_frame: usize,
    next_id: RequestId,
    inbox: Vec<Message>,
}

impl TestClient {
    fn new(stream: UnixStream, session: SessionId, max_frame: usize) -> Self {
        stream
            .set_read_timeout(Some(DRAIN_TIMEOUT))
            .expect("read timeout");
        Self {
            stream,
            session,
            max_frame,
            next_id: 0,
            inbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Sends a request and returns its id.
    pub fn request(&mut self, method: &str, params: Option<Value>) -> RequestId {
        self.next_id += 1;
        let params = params.map(|value| Params::from_value(value).expect("params"));
        self.send(&Message::from(Request::new(self.next_id, method, params)));
        self.next_id
    }

    pub fn notify(&mut self, method: &str) {
        self.send(&Message::from(Notification::new(method, None)));
    }

    pub fn respond(&mut self, id: RequestId, result: Value) {
        self.send(&Message::from(Response::success(id, result)));
    }

    pub fn send(&mut self, message: &Message) {
        let payload = encode(message).expect("encode");
        self.send_raw(&payload);
    }

    /// Frames and writes `payload` as is.
    pub fn send_raw(&mut self, payload: &[u8]) {
        write_frame(&mut self.stream, payload, self.max_frame).expect("write frame");
    }

    /// Reads everything the server has written so far into the inbox.
    pub fn drain(&mut self) -> &[Message] {
        loop {
            match read_frame(&mut self.stream, self.max_frame) {
                Ok(Some(frame)) => self.inbox.push(decode(&frame).expect("decode")),
                Ok(None) => break,
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    break;
                }
                Err(error) => panic!("read failed: {error}"),
            }
        }
        &self.inbox
    }

    /// Whether the server closed its end.
    pub fn is_closed(&mut self) -> bool {
        self.drain();
        let mut probe = [0_u8; 1];
        matches!(io::Read::read(&mut self.stream, &mut probe), Ok(0))
    }

    pub fn take_response(&mut self, id: RequestId) -> Option<Response> {
        let index = self.inbox.iter().position(
            |message| matches!(message, Message::Response(response) if response.id == Some(id)),
        )?;
        match self.inbox.remove(index) {
            Message::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Error response the server sent for a message it could not read.
    pub fn take_unaddressed_error(&mut self) -> Option<Response> {
        let index = self.inbox.iter().position(
            |message| matches!(message, Message::Response(response) if response.id.is_none()),
        )?;
        match self.inbox.remove(index) {
            Message::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Notifications received, oldest first, removed from the inbox.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        let (notifications, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.inbox)
            .into_iter()
            .partition(|message| matches!(message, Message::Notification(_)));
        self.inbox = rest;
        notifications
            .into_iter()
            .filter_map(|message| match message {
                Message::Notification(notification) => Some(notification),
                _ => None,
            })
            .collect()
    }

    /// Requests the server sent, removed from the inbox.
    pub fn take_requests(&mut self) -> Vec<Request> {
        let (requests, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.inbox)
            .into_iter()
            .partition(|message| matches!(message, Message::Request(_)));
        self.inbox = rest;
        requests
            .into_iter()
            .filter_map(|message| match message {
                Message::Request(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}
