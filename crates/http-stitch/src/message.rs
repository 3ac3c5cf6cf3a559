//! Parsed HTTP/1.x message type

use conn_track::MessageKind;
use http::{HeaderMap, Method, StatusCode, Uri};

/// A complete HTTP/1.x message, request or response.
///
/// One type covers both directions so that a connection's streams share a
/// single message type regardless of role; `kind` plus the option fields say
/// which half is populated.
#[derive(Debug, Clone)]
pub struct HttpMessage {
    /// Request or response.
    pub kind:          MessageKind,
    /// HTTP minor version (0 or 1).
    pub minor_version: u8,
    /// All headers, in wire order, multi-valued headers preserved.
    pub headers:       HeaderMap,
    /// Request method (requests only).
    pub method:        Option<Method>,
    /// Request target (requests only).
    pub path:          Option<Uri>,
    /// Status code (responses only).
    pub status:        Option<StatusCode>,
    /// Decoded body bytes (chunked bodies are de-chunked).
    pub body:          Vec<u8>,
    /// BPF timestamp of the event holding the message's first byte.
    pub timestamp_ns:  u64,
}

impl HttpMessage {
    /// True for request messages.
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// True for response messages.
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Body as lossily decoded UTF-8.
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
