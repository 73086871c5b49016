//! Wire protocol shared by the kisa server and its clients.
//!
//! Messages are JSON-RPC 2.0 shaped objects carried one per length-prefixed
//! frame over a Unix stream socket. Both peers may issue requests, so each
//! session tracks outstanding ids per direction with a [`Correlator`].

pub mod codec;
pub mod codes;
pub mod correlation;
pub mod error;
pub mod framing;
pub mod message;
pub mod methods;

pub use codec::{decode, decode_value, encode};
pub use correlation::{Correlator, Direction, PendingRequest, PendingState};
pub use error::{CodecError, CorrelationError, FrameError};
pub use framing::{FRAME_HEADER_LEN, FrameDecoder, encode_frame, read_frame, write_frame};
pub use message::{
    ErrorObject, JSONRPC_VERSION, Message, Notification, Params, Request, RequestId, Response,
    ResponsePayload,
};
pub use methods::Inquiry;
