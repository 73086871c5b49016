//! [`SessionHandler`] implementation for [`Server`].

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use kisa_protocol::methods::{FireEventParams, InsertAtParams, KeymapHelpParams, PING};
use kisa_protocol::{
    Direction, ErrorObject, Inquiry, Message, Request, RequestId, Response, codes, decode, encode,
};

use super::{MethodKind, SERVER_TARGET, Server, announce};
use crate::dispatch::{CommandExecutor, DispatchError, Intent, Outcome, report_value};
use crate::session::{HandshakeAction, Queued, Session, SessionFault, SessionId, SessionRegistry};
use crate::transport::SessionHandler;

/// What must happen after a response is queued.
#[derive(Debug, Default, Clone, Copy)]
struct Followup {
    state_changed: bool,
    inquiry_answered: bool,
    close: bool,
}

type Reply = Result<Value, ErrorObject>;

impl<E: CommandExecutor> SessionHandler for Server<E> {
    fn on_open(&mut self, sessions: &mut SessionRegistry, id: SessionId) {
        self.reporter.session_opened(id);
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if let Some(inquiry) = session.handshake_mut().enqueue(Queued::Id, Instant::now()) {
            announce(session, inquiry);
        }
    }

    fn on_frame(&mut self, sessions: &mut SessionRegistry, id: SessionId, frame: &[u8]) {
        let message = match decode(frame) {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    target: SERVER_TARGET,
                    session = %id,
                    error = %error,
                    "rejecting malformed message"
                );
                if let Some(session) = sessions.get_mut(id) {
                    let reply = Response::failure(error.request_id(), error.to_error_object());
                    session.send(&Message::from(reply));
                }
                return;
            }
        };
        match message {
            Message::Request(request) => self.handle_request(sessions, id, &request),
            Message::Response(response) => handle_response(sessions, id, &response),
            Message::Notification(notification) => {
                debug!(
                    target: SERVER_TARGET,
                    session = %id,
                    method = %notification.method,
                    "ignoring client notification"
                );
            }
        }
    }

    fn on_close(&mut self, _sessions: &mut SessionRegistry, id: SessionId, fault: &SessionFault) {
        self.dispatcher.session_closed(id);
        self.reporter.session_closed(id, fault);
    }

    fn on_tick(&mut self, sessions: &mut SessionRegistry, now: Instant) {
        let policy = self.settings.handshake;
        for session in sessions.iter_mut() {
            if session.is_failed() {
                continue;
            }
            match session.handshake_mut().poll(now, policy) {
                None => {}
                Some(HandshakeAction::Announce(inquiry)) => {
                    debug!(
                        target: SERVER_TARGET,
                        session = %session.id(),
                        inquiry = %inquiry,
                        "re-announcing unanswered inquiry"
                    );
                    announce(session, inquiry);
                }
                Some(HandshakeAction::Probe) => send_probe(session, now),
                Some(HandshakeAction::Expire) => session.fail(SessionFault::Unresponsive),
            }
        }
    }
}

impl<E: CommandExecutor> Server<E> {
    fn handle_request(&mut self, sessions: &mut SessionRegistry, id: SessionId, request: &Request) {
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if let Err(error) =
            session
                .pending_mut()
                .track(Direction::ClientInitiated, request.id, &request.method)
        {
            let error = ErrorObject::new(codes::ID_COLLISION, error.to_string());
            session.send(&Message::from(Response::failure(Some(request.id), error)));
            return;
        }

        let mut followup = Followup::default();
        let reply = self.route(session, request, &mut followup);
        if let Err(error) = session
            .pending_mut()
            .resolve(Direction::ClientInitiated, request.id)
        {
            warn!(target: SERVER_TARGET, session = %id, error = %error, "request was not tracked");
        }
        respond(session, request.id, reply);

        let now = Instant::now();
        if followup.inquiry_answered
            && let Some(next) = session.handshake_mut().finish(now)
        {
            announce(session, next);
        }
        if followup.close {
            session.close_after_flush();
        }
        if followup.state_changed {
            self.broadcast_draw(sessions, now);
        }
    }

    fn route(
        &mut self,
        session: &mut Session,
        request: &Request,
        followup: &mut Followup,
    ) -> Reply {
        let Some(kind) = self.methods.lookup(&request.method) else {
            return Err(ErrorObject::new(
                codes::METHOD_NOT_FOUND,
                format!("unknown method '{}'", request.method),
            ));
        };
        if kind.requires_identity() && !session.is_identified() {
            return Err(ErrorObject::new(
                codes::SESSION_NOT_IDENTIFIED,
                format!("'{}' requires askId first", request.method),
            ));
        }
        let id = session.id();
        match kind {
            MethodKind::AskId => {
                if session.is_identified() {
                    return Ok(Value::Bool(true));
                }
                begin_inquiry(session, Inquiry::Id, followup)?;
                session.mark_identified();
                debug!(target: SERVER_TARGET, session = %id, "session identified");
                Ok(Value::Bool(true))
            }
            MethodKind::AskDraw => match begin_inquiry(session, Inquiry::Draw, followup)? {
                Queued::Draw(draw) => serde_json::to_value(draw).map_err(|error| internal(&error)),
                Queued::Id => Err(no_pending(Inquiry::Draw)),
            },
            MethodKind::FireEvent => {
                let intent = match params::<FireEventParams>(request)? {
                    FireEventParams::Key { key } => Intent::Key(key),
                    FireEventParams::Named { name } => Intent::Named(name),
                };
                let outcome = self.dispatcher.dispatch(id, intent)?;
                followup.state_changed = matches!(outcome, Outcome::Applied(_));
                Ok(outcome.to_value())
            }
            MethodKind::Undo => {
                let report = self.dispatcher.undo(id)?;
                followup.state_changed = true;
                Ok(report_value(&report))
            }
            MethodKind::Redo => {
                let report = self.dispatcher.redo(id)?;
                followup.state_changed = true;
                Ok(report_value(&report))
            }
            MethodKind::InsertAt => {
                let insert = params::<InsertAtParams>(request)?;
                let commands = insert.commands.into_iter().map(Into::into).collect();
                let report = self.dispatcher.insert_at(id, insert.anchor, commands)?;
                followup.state_changed = true;
                Ok(report_value(&report))
            }
            MethodKind::Snapshot => Ok(json!({ "sequence": self.dispatcher.snapshot() })),
            MethodKind::Events => {
                serde_json::to_value(self.dispatcher.events()).map_err(|error| internal(&error))
            }
            MethodKind::KeymapHelp => {
                let help = params::<KeymapHelpParams>(request)?;
                Ok(self
                    .dispatcher
                    .documentation(help.mode.as_deref(), &help.keys)
                    .map_or(Value::Null, Value::String))
            }
            MethodKind::Ping => Ok(Value::Bool(true)),
            MethodKind::Close => {
                followup.close = true;
                Ok(Value::Bool(true))
            }
        }
    }
}

/// Sends the answer to request `id`. An answer too large for one frame is
/// replaced by an error so the request still gets exactly one response.
fn respond(session: &mut Session, id: RequestId, reply: Reply) {
    let response = match reply {
        Ok(result) => Response::success(id, result),
        Err(error) => Response::failure(Some(id), error),
    };
    let payload = match encode(&Message::from(response)) {
        Ok(payload) => payload,
        Err(error) => {
            session.fail(SessionFault::Encode(error));
            return;
        }
    };
    let max = session.max_payload();
    if payload.len() <= max {
        session.send_encoded(&payload);
        return;
    }
    warn!(
        target: SERVER_TARGET,
        session = %session.id(),
        size = payload.len(),
        max,
        "response exceeds the frame limit"
    );
    let error = ErrorObject::new(
        codes::RESPONSE_TOO_LARGE,
        format!(
            "response of {} bytes exceeds the {max} byte frame limit",
            payload.len()
        ),
    )
    .with_data(json!({ "size": payload.len(), "max": max }));
    session.send(&Message::from(Response::failure(Some(id), error)));
}

/// Accepts the client's request for the announced head inquiry.
fn begin_inquiry(
    session: &mut Session,
    inquiry: Inquiry,
    followup: &mut Followup,
) -> Result<Queued, ErrorObject> {
    let queued = session
        .handshake_mut()
        .begin(inquiry)
        .ok_or_else(|| no_pending(inquiry))?;
    followup.inquiry_answered = true;
    Ok(queued)
}

fn handle_response(sessions: &mut SessionRegistry, id: SessionId, response: &Response) {
    let Some(session) = sessions.get_mut(id) else {
        return;
    };
    let Some(request_id) = response.id else {
        warn!(
            target: SERVER_TARGET,
            session = %id,
            "client reported an error for an unidentifiable message"
        );
        return;
    };
    match session
        .pending_mut()
        .resolve(Direction::ServerInitiated, request_id)
    {
        Ok(pending) if pending.method == PING => {
            if let Some(inquiry) = session
                .handshake_mut()
                .probe_answered(request_id, Instant::now())
            {
                announce(session, inquiry);
            }
        }
        Ok(pending) => {
            debug!(
                target: SERVER_TARGET,
                session = %id,
                method = %pending.method,
                "response resolved"
            );
        }
        Err(error) => {
            warn!(
                target: SERVER_TARGET,
                session = %id,
                error = %error,
                "dropping unmatched response"
            );
        }
    }
}

fn send_probe(session: &mut Session, now: Instant) {
    let request_id = session.pending_mut().next_id(Direction::ServerInitiated);
    if let Err(error) = session
        .pending_mut()
        .track(Direction::ServerInitiated, request_id, PING)
    {
        warn!(target: SERVER_TARGET, session = %session.id(), error = %error, "probe not sent");
        return;
    }
    debug!(target: SERVER_TARGET, session = %session.id(), "probing unresponsive client");
    session.send(&Message::from(Request::new(request_id, PING, None)));
    session.handshake_mut().probe_sent(request_id, now);
}

fn params<T: DeserializeOwned>(request: &Request) -> Result<T, ErrorObject> {
    let params = request.params.as_ref().ok_or_else(|| {
        DispatchError::invalid_params(format!("'{}' requires parameters", request.method))
    })?;
    params
        .parse()
        .map_err(|error| DispatchError::invalid_params(error.to_string()).into())
}

fn no_pending(inquiry: Inquiry) -> ErrorObject {
    ErrorObject::new(
        codes::NO_PENDING_INQUIRY,
        format!("no pending inquiry for '{inquiry}'"),
    )
}

fn internal(error: &serde_json::Error) -> ErrorObject {
    ErrorObject::new(codes::INTERNAL_ERROR, error.to_string())
}
