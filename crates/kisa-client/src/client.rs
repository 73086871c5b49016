//! Blocking client over one server socket.

use std::os::unix::net::UnixStream;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use kisa_config::SocketEndpoint;
use kisa_protocol::methods::{
    CLOSE, DrawParams, EVENTS, EventEntry, FIRE_EVENT, FireEventParams, KEYMAP_HELP, KeyPress,
    KeymapHelpParams, PING, REDO, UNDO,
};
use kisa_protocol::{Inquiry, Message, Params, codes, decode, encode, read_frame, write_frame};

use crate::session::{ClientSession, Received, ServerEvent};
use crate::{ClientError, transport};

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// A connected client that completes each request before returning.
///
/// Inquiries the server announces are serviced after the request in flight
/// resolves, so the server never waits on a client that is waiting on it.
#[derive(Debug)]
pub struct Client {
    stream: UnixStream,
    session: ClientSession,
    max_frame: usize,
}

impl Client {
    /// Connects to `endpoint`.
    pub fn connect(endpoint: &SocketEndpoint, max_frame: usize) -> Result<Self, ClientError> {
        let stream = transport::connect(endpoint)?;
        Ok(Self::from_stream(stream, max_frame))
    }

    /// Wraps an already connected stream.
    #[must_use]
    pub fn from_stream(stream: UnixStream, max_frame: usize) -> Self {
        Self {
            stream,
            session: ClientSession::new(),
            max_frame,
        }
    }

    /// Protocol state behind the socket.
    #[must_use]
    pub const fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Waits for the server's `shouldAskId` and completes identification.
    pub fn acquire_session(&mut self) -> Result<(), ClientError> {
        while !self.session.is_identified() {
            if self.session.has_inquiry(Inquiry::Id) {
                self.service_inquiries()?;
            } else {
                self.read_one()?;
            }
        }
        Ok(())
    }

    /// Sends a request and waits for its result.
    ///
    /// Inquiries announced meanwhile are serviced afterwards. A failure
    /// there is logged and surfaces on the next call; it never replaces
    /// the result of this request.
    pub fn request(&mut self, method: &str, params: Option<Params>) -> Result<Value, ClientError> {
        let result = self.call(method, params);
        if let Err(error) = self.service_inquiries() {
            warn!(
                target: CLIENT_TARGET,
                method,
                error = %error,
                "servicing server inquiries failed"
            );
        }
        result
    }

    /// Dispatches a key press.
    pub fn fire_key(&mut self, key: KeyPress) -> Result<Value, ClientError> {
        self.fire(&FireEventParams::Key { key })
    }

    /// Dispatches a named event.
    pub fn fire_named(&mut self, name: &str) -> Result<Value, ClientError> {
        self.fire(&FireEventParams::Named {
            name: name.to_owned(),
        })
    }

    /// Undoes the newest batch.
    pub fn undo(&mut self) -> Result<Value, ClientError> {
        self.request(UNDO, None)
    }

    /// Reapplies the newest undone batch.
    pub fn redo(&mut self) -> Result<Value, ClientError> {
        self.request(REDO, None)
    }

    /// Fetches the event log.
    pub fn events(&mut self) -> Result<Vec<EventEntry>, ClientError> {
        let value = self.request(EVENTS, None)?;
        parse_result(EVENTS, value)
    }

    /// Looks up the documentation bound to `keys`.
    pub fn keymap_help(
        &mut self,
        mode: Option<&str>,
        keys: &str,
    ) -> Result<Option<String>, ClientError> {
        let params = Params::from_serializable(&KeymapHelpParams {
            mode: mode.map(str::to_owned),
            keys: keys.to_owned(),
        })?;
        let value = self.request(KEYMAP_HELP, Some(params))?;
        parse_result(KEYMAP_HELP, value)
    }

    /// Round-trips a ping, which also flushes every draw the server sent
    /// before answering it.
    pub fn sync(&mut self) -> Result<(), ClientError> {
        self.request(PING, None).map(|_| ())
    }

    /// Blocks until the server pushes render data.
    pub fn next_draw(&mut self) -> Result<DrawParams, ClientError> {
        loop {
            match self.session.next_event() {
                Some(ServerEvent::Draw(draw)) => return Ok(draw),
                Some(ServerEvent::Shutdown) => return Err(ClientError::ServerShutdown),
                None => {}
            }
            if self.session.has_pending_inquiry() {
                self.service_inquiries()?;
            } else {
                self.read_one()?;
            }
        }
    }

    /// Newest render data received so far, discarding older draws.
    pub fn latest_draw(&mut self) -> Option<DrawParams> {
        self.session.latest_draw()
    }

    /// Ends the session and waits for the server to close the socket.
    pub fn close(mut self) -> Result<(), ClientError> {
        self.call(CLOSE, None)?;
        loop {
            match self.read_one() {
                Ok(()) => {}
                Err(ClientError::Disconnected) => return Ok(()),
                Err(error) => return Err(error),
            }
        }
    }

    fn fire(&mut self, params: &FireEventParams) -> Result<Value, ClientError> {
        let params = Params::from_serializable(params)?;
        self.request(FIRE_EVENT, Some(params))
    }

    /// Sends a request and reads until it resolves, without servicing
    /// inquiries.
    fn call(&mut self, method: &str, params: Option<Params>) -> Result<Value, ClientError> {
        let request = self.session.request(method, params)?;
        let id = request.id;
        self.send(&Message::from(request))?;
        loop {
            let message = self.read_message()?;
            match self.session.receive(message) {
                Received::Resolved { request, result } if request.id == id => {
                    return result.map_err(ClientError::Remote);
                }
                Received::Resolved { .. } | Received::Noted => {}
                Received::Rejected(error) => return Err(ClientError::Remote(error)),
                Received::Reply(reply) => self.send(&reply)?,
            }
        }
    }

    /// Asks for every announced inquiry in turn. An announcement the
    /// server no longer holds is a repeat of one already serviced.
    fn service_inquiries(&mut self) -> Result<(), ClientError> {
        while let Some(inquiry) = self.session.next_inquiry() {
            match self.call(inquiry.request_method(), None) {
                Ok(result) => self.session.inquiry_answered(inquiry, result)?,
                Err(ClientError::Remote(error)) if error.code == codes::NO_PENDING_INQUIRY => {
                    debug!(
                        target: CLIENT_TARGET,
                        inquiry = %inquiry,
                        "skipping stale announcement"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn read_one(&mut self) -> Result<(), ClientError> {
        let message = self.read_message()?;
        if let Received::Reply(reply) = self.session.receive(message) {
            self.send(&reply)?;
        }
        Ok(())
    }

    fn read_message(&mut self) -> Result<Message, ClientError> {
        let frame =
            read_frame(&mut self.stream, self.max_frame)?.ok_or(ClientError::Disconnected)?;
        Ok(decode(&frame)?)
    }

    fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let payload = encode(message)?;
        write_frame(&mut self.stream, &payload, self.max_frame)?;
        Ok(())
    }
}

fn parse_result<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::UnexpectedPayload {
        method: method.to_owned(),
        source,
    })
}
