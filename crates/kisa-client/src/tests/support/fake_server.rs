//! Scripted stand-in for `kisad` bound to a temporary socket.
//!
//! The server accepts one connection, completes identification, and answers
//! every method with canned data. Each state-changing call is followed by
//! the configured screen, pushed directly or announced with `shouldAskDraw`.

use std::os::unix::net::UnixListener;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use serde_json::{Value, json};
use tempfile::TempDir;

use kisa_config::SocketEndpoint;
use kisa_protocol::methods::{
    ASK_DRAW, ASK_ID, CLOSE, EVENTS, FIRE_EVENT, KEYMAP_HELP, PING, REDO, SHOULD_ASK_DRAW,
    SHOULD_ASK_ID, UNDO,
};
use kisa_protocol::{ErrorObject, Message, Request, Response, codes};

use super::peer::{Peer, screen};

/// How render data reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::tests) enum DrawDelivery {
    Push,
    Inquiry,
}

pub(in crate::tests) struct FakeServer {
    _dir: TempDir,
    endpoint: SocketEndpoint,
    methods: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl FakeServer {
    pub(in crate::tests) fn spawn(lines: Vec<String>, delivery: DrawDelivery) -> Result<Self> {
        let dir = TempDir::new().context("socket dir")?;
        let path = Utf8PathBuf::from_path_buf(dir.path().join("kisa.sock"))
            .map_err(|path| anyhow!("non UTF-8 socket path {}", path.display()))?;
        let listener = UnixListener::bind(&path).context("bind fake server")?;
        let methods = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&methods);
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().context("accept")?;
            serve(Peer::new(stream), &lines, delivery, &recorded)
        });
        Ok(Self {
            _dir: dir,
            endpoint: SocketEndpoint::unix(path),
            methods,
            handle: Some(handle),
        })
    }

    pub(in crate::tests) fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Waits for the connection to end and returns the methods it called.
    pub(in crate::tests) fn finish(&mut self) -> Result<Vec<String>> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("fake server thread panicked"))??;
        }
        let methods = self
            .methods
            .lock()
            .map_err(|error| anyhow!("lock methods: {error}"))?;
        Ok(methods.clone())
    }
}

fn serve(
    mut peer: Peer,
    lines: &[String],
    delivery: DrawDelivery,
    recorded: &Mutex<Vec<String>>,
) -> Result<()> {
    let draw = screen(lines, (0, 0));
    peer.notify(SHOULD_ASK_ID)?;
    while let Some(message) = peer.recv()? {
        let Message::Request(request) = message else {
            continue;
        };
        recorded
            .lock()
            .map_err(|error| anyhow!("lock methods: {error}"))?
            .push(request.method.clone());
        match request.method.as_str() {
            ASK_ID | PING => peer.reply(&request, Value::Bool(true))?,
            ASK_DRAW => peer.reply(&request, draw.clone())?,
            FIRE_EVENT | UNDO | REDO => {
                peer.reply(&request, json!({ "batch": 1, "events": [1] }))?;
                match delivery {
                    DrawDelivery::Push => peer.push_draw(&draw)?,
                    DrawDelivery::Inquiry => peer.notify(SHOULD_ASK_DRAW)?,
                }
            }
            EVENTS => peer.reply(
                &request,
                json!([{
                    "sequence": 1,
                    "batch": 1,
                    "kind": "command",
                    "payload": { "name": "insert_text", "arguments": ["a"] },
                    "obsolete": false
                }]),
            )?,
            KEYMAP_HELP => peer.reply(&request, Value::String("enter insert mode".to_owned()))?,
            CLOSE => {
                peer.reply(&request, Value::Bool(true))?;
                return Ok(());
            }
            _ => reject(&mut peer, &request)?,
        }
    }
    Ok(())
}

fn reject(peer: &mut Peer, request: &Request) -> Result<()> {
    let error = ErrorObject::new(codes::METHOD_NOT_FOUND, "unknown method");
    peer.send(Response::failure(Some(request.id), error))
}
