//! HTTP message model: header map, request/response composition, and
//! header serialization.

use bytes::{Bytes, BytesMut};

use crate::body::{Body, MemoryBody};
use crate::date;

/// Ordered header map with case-insensitive keys. Keys are stored
/// lowercased; setting an existing key overwrites it in place.
#[derive(Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_ascii_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.into(),
            None => self.entries.push((key, value.into())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// An HTTP/1.x message, request or response. Requests have a non-empty
/// `method`; responses have a non-zero `status`.
pub struct HttpMessage {
    pub method: String,
    pub uri: String,
    pub protocol: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    /// Total body length when known. `None` means the body length is
    /// unknown and the message is streamed until close.
    pub length: Option<u64>,
    body: Box<dyn Body>,
}

impl Default for HttpMessage {
    fn default() -> Self {
        Self {
            method: String::new(),
            uri: String::new(),
            protocol: "HTTP/1.1".to_string(),
            status: 0,
            reason: String::new(),
            headers: Headers::default(),
            length: Some(0),
            body: Box::<MemoryBody>::default(),
        }
    }
}

impl HttpMessage {
    /// Compose a request for `uri`, which must be a path (with optional
    /// query), not a full URL.
    pub fn request(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            ..Self::default()
        }
    }

    /// Compose a response with a `Date` header.
    pub fn response(status: u16, reason: &str) -> Self {
        let mut message = Self {
            status,
            reason: reason.to_string(),
            ..Self::default()
        };
        message.headers.set("date", date::rfc1123_now());
        message
    }

    pub fn is_request(&self) -> bool {
        self.status == 0
    }

    /// Attach a body. When the body length is known a `Content-Length`
    /// header is set; otherwise the message is framed by connection
    /// close.
    pub fn set_body(&mut self, body: Box<dyn Body>, mime: Option<&str>) {
        self.length = body.remaining();
        match self.length {
            Some(n) => self.headers.set("content-length", n.to_string()),
            None => {
                self.headers.remove("content-length");
                self.headers.set("connection", "close");
            }
        }
        if let Some(mime) = mime {
            self.headers.set("content-type", mime);
        }
        self.body = body;
    }

    pub fn set_text_body(&mut self, text: &str) {
        self.set_body(Box::new(MemoryBody::new(text.as_bytes())), Some("text/plain"));
    }

    /// Request that the peer close the connection after this message.
    pub fn set_keepalive(&mut self, keepalive: bool) {
        if keepalive {
            self.headers.remove("connection");
        } else {
            self.headers.set("connection", "close");
        }
    }

    /// Drop the body payload, keeping the entity headers. Used for
    /// responses to HEAD requests.
    pub fn drop_body(&mut self) {
        self.body = Box::<MemoryBody>::default();
        self.length = Some(0);
    }

    /// Take the body out, leaving an empty one behind.
    pub fn take_body(&mut self) -> Box<dyn Body> {
        std::mem::replace(&mut self.body, Box::<MemoryBody>::default())
    }

    pub fn body_mut(&mut self) -> &mut dyn Body {
        self.body.as_mut()
    }

    /// First line plus headers plus the blank separator line.
    pub fn serialize_headers(&self) -> Bytes {
        let mut buf = BytesMut::new();
        if self.is_request() {
            buf.extend_from_slice(self.method.as_bytes());
            buf.extend_from_slice(b" ");
            buf.extend_from_slice(self.uri.as_bytes());
            buf.extend_from_slice(b" ");
            buf.extend_from_slice(self.protocol.as_bytes());
        } else {
            buf.extend_from_slice(self.protocol.as_bytes());
            buf.extend_from_slice(b" ");
            buf.extend_from_slice(self.status.to_string().as_bytes());
            buf.extend_from_slice(b" ");
            buf.extend_from_slice(self.reason.as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        for (key, value) in self.headers.iter() {
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf.freeze()
    }

    /// The request line for access logging.
    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.protocol)
    }

    /// Whether this message asks for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        self.headers.get("connection") == Some("close")
    }
}
