//! Protocol state for one client connection, free of socket IO.
//!
//! [`ClientSession`] turns incoming messages into things the caller must do:
//! resolve one of its own requests, send an immediate reply, or remember that
//! the server wants an inquiry serviced. Inquiries are never answered while
//! another request of ours is outstanding; the caller drains them with
//! [`ClientSession::next_inquiry`] once it is idle.

use std::collections::VecDeque;

use serde_json::Value;

use kisa_protocol::methods::{DRAW, DrawParams, PING, SHUTDOWN};
use kisa_protocol::{
    Correlator, Direction, ErrorObject, Inquiry, Message, Notification, Params, PendingRequest,
    Request, Response, codes,
};

use crate::ClientError;

/// Something the server pushed that the caller has not consumed yet.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Render data, pushed directly or fetched through `askDraw`.
    Draw(DrawParams),
    /// The server is going away.
    Shutdown,
}

/// What the caller must do with a message it just read.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// One of our requests was answered.
    Resolved {
        /// The request as it was tracked.
        request: PendingRequest,
        /// Its result or error object.
        result: Result<Value, ErrorObject>,
    },
    /// The server could not read a request and every outstanding request
    /// was dropped.
    Rejected(ErrorObject),
    /// The server expects this reply now.
    Reply(Message),
    /// The message was recorded; nothing to send.
    Noted,
}

/// Client half of the session protocol.
#[derive(Debug, Default)]
pub struct ClientSession {
    correlator: Correlator,
    identified: bool,
    inquiries: VecDeque<Inquiry>,
    events: VecDeque<ServerEvent>,
}

impl ClientSession {
    /// A session that has not yet identified.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `askId` has succeeded on this connection.
    #[must_use]
    pub const fn is_identified(&self) -> bool {
        self.identified
    }

    /// Whether the server announced `inquiry` and it is not serviced yet.
    #[must_use]
    pub fn has_inquiry(&self, inquiry: Inquiry) -> bool {
        self.inquiries.contains(&inquiry)
    }

    /// Whether any announced inquiry is waiting to be serviced.
    #[must_use]
    pub fn has_pending_inquiry(&self) -> bool {
        !self.inquiries.is_empty()
    }

    /// Number of our requests still awaiting a response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.correlator.len()
    }

    /// Builds and tracks a request.
    pub fn request(
        &mut self,
        method: &str,
        params: Option<Params>,
    ) -> Result<Request, ClientError> {
        let id = self.correlator.next_id(Direction::ClientInitiated);
        self.correlator.track(Direction::ClientInitiated, id, method)?;
        Ok(Request::new(id, method, params))
    }

    /// Processes one message from the server.
    pub fn receive(&mut self, message: Message) -> Received {
        match message {
            Message::Response(response) => self.resolve(response),
            Message::Request(request) => Received::Reply(Message::from(answer(&request))),
            Message::Notification(notification) => {
                self.note(notification);
                Received::Noted
            }
        }
    }

    /// Takes the oldest announced inquiry, if no request of ours is in
    /// flight.
    pub fn next_inquiry(&mut self) -> Option<Inquiry> {
        if !self.correlator.is_empty() {
            return None;
        }
        self.inquiries.pop_front()
    }

    /// Records the result of the request that serviced `inquiry`.
    pub fn inquiry_answered(&mut self, inquiry: Inquiry, result: Value) -> Result<(), ClientError> {
        match inquiry {
            Inquiry::Id => {
                self.identified = true;
                Ok(())
            }
            Inquiry::Draw => {
                let draw = serde_json::from_value(result).map_err(|source| {
                    ClientError::UnexpectedPayload {
                        method: inquiry.request_method().to_owned(),
                        source,
                    }
                })?;
                self.events.push_back(ServerEvent::Draw(draw));
                Ok(())
            }
        }
    }

    /// Takes the oldest pushed event.
    pub fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }

    /// Discards every buffered draw except the newest, returning it.
    pub fn latest_draw(&mut self) -> Option<DrawParams> {
        let mut latest = None;
        self.events.retain(|event| match event {
            ServerEvent::Draw(draw) => {
                latest = Some(draw.clone());
                false
            }
            ServerEvent::Shutdown => true,
        });
        latest
    }

    fn resolve(&mut self, response: Response) -> Received {
        let Some(id) = response.id else {
            // The server could not read something we sent.
            return match response.into_result() {
                Err(error) => {
                    self.correlator.purge();
                    Received::Rejected(error)
                }
                Ok(_) => Received::Noted,
            };
        };
        match self.correlator.resolve(Direction::ClientInitiated, id) {
            Ok(request) => Received::Resolved {
                request,
                result: response.into_result(),
            },
            Err(_) => Received::Noted,
        }
    }

    fn note(&mut self, notification: Notification) {
        if let Some(inquiry) = Inquiry::from_notification(&notification.method) {
            if !self.inquiries.contains(&inquiry) {
                self.inquiries.push_back(inquiry);
            }
            return;
        }
        match notification.method.as_str() {
            DRAW => {
                if let Some(draw) = notification
                    .params
                    .as_ref()
                    .and_then(|params| params.parse::<DrawParams>().ok())
                {
                    self.events.push_back(ServerEvent::Draw(draw));
                }
            }
            SHUTDOWN => self.events.push_back(ServerEvent::Shutdown),
            _ => {}
        }
    }
}

fn answer(request: &Request) -> Response {
    if request.method == PING {
        return Response::success(request.id, Value::Bool(true));
    }
    Response::failure(
        Some(request.id),
        ErrorObject::new(
            codes::METHOD_NOT_FOUND,
            format!("client does not serve '{}'", request.method),
        ),
    )
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use kisa_protocol::methods::{SHOULD_ASK_DRAW, SHOULD_ASK_ID};

    #[fixture]
    fn session() -> ClientSession {
        ClientSession::new()
    }

    fn notice(method: &str) -> Message {
        Message::from(Notification::new(method, None))
    }

    #[rstest]
    fn inquiries_wait_for_outstanding_requests(mut session: ClientSession) {
        let request = session.request(PING, None).expect("request");
        assert_eq!(session.receive(notice(SHOULD_ASK_ID)), Received::Noted);
        assert_eq!(session.next_inquiry(), None);

        let reply = Message::from(Response::success(request.id, Value::Bool(true)));
        assert!(matches!(
            session.receive(reply),
            Received::Resolved { result: Ok(Value::Bool(true)), .. }
        ));
        assert_eq!(session.next_inquiry(), Some(Inquiry::Id));
        assert_eq!(session.next_inquiry(), None);
    }

    #[rstest]
    fn repeated_announcements_queue_once(mut session: ClientSession) {
        session.receive(notice(SHOULD_ASK_DRAW));
        session.receive(notice(SHOULD_ASK_DRAW));
        assert_eq!(session.next_inquiry(), Some(Inquiry::Draw));
        assert_eq!(session.next_inquiry(), None);
    }

    #[rstest]
    fn answers_server_ping(mut session: ClientSession) {
        let ping = Message::from(Request::new(9, PING, None));
        let Received::Reply(Message::Response(response)) = session.receive(ping) else {
            panic!("expected a reply");
        };
        assert_eq!(response.id, Some(9));
        assert_eq!(response.into_result(), Ok(Value::Bool(true)));
    }

    #[rstest]
    fn rejects_other_server_requests(mut session: ClientSession) {
        let request = Message::from(Request::new(4, "askId", None));
        let Received::Reply(Message::Response(response)) = session.receive(request) else {
            panic!("expected a reply");
        };
        let error = response.into_result().expect_err("error reply");
        assert_eq!(error.code, codes::METHOD_NOT_FOUND);
    }

    #[rstest]
    fn unmatched_responses_are_ignored(mut session: ClientSession) {
        let stray = Message::from(Response::success(77, json!(null)));
        assert_eq!(session.receive(stray), Received::Noted);
    }

    #[rstest]
    fn unreadable_request_rejects_outstanding(mut session: ClientSession) {
        session.request(PING, None).expect("request");
        let error = ErrorObject::new(codes::PARSE_ERROR, "malformed JSON");
        let reply = Message::from(Response::failure(None, error.clone()));
        assert_eq!(session.receive(reply), Received::Rejected(error));
        assert_eq!(session.outstanding(), 0);
    }

    #[rstest]
    fn identification_follows_ask_id(mut session: ClientSession) {
        assert!(!session.is_identified());
        session
            .inquiry_answered(Inquiry::Id, Value::Bool(true))
            .expect("answered");
        assert!(session.is_identified());
    }

    #[rstest]
    fn latest_draw_keeps_shutdown(mut session: ClientSession) {
        for text in ["one", "two"] {
            let params = json!({
                "lines": [{ "segments": [{ "text": text }] }],
                "cursor": { "line": 0, "column": 0 }
            });
            let params = Params::from_value(params).expect("params");
            session.receive(Message::from(Notification::new(DRAW, Some(params))));
        }
        session.receive(notice(SHUTDOWN));

        let latest = session.latest_draw().expect("draw");
        let text: Vec<_> = latest
            .lines
            .iter()
            .flat_map(|line| line.segments.iter().map(|segment| segment.text.as_str()))
            .collect();
        assert_eq!(text, ["two"]);
        assert_eq!(session.next_event(), Some(ServerEvent::Shutdown));
    }
}
