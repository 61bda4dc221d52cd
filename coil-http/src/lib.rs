//! coil-http: HTTP/1.x message framing over the [`coil`] reactor.
//!
//! The crate layers an incremental HTTP parser, a message model with
//! streamed bodies, and client/server channel wrappers on top of
//! [`coil::Stream`]. Bodies are exchanged as [`Body`] objects, so a
//! large download never has to fit in memory, and small messages are
//! coalesced with their headers into a single send.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use coil::Poller;
//! use coil_http::{FileServer, HttpConfig, HttpServer};
//!
//! fn main() -> Result<(), coil::Error> {
//!     let mut poller = Poller::new();
//!     let mut server = HttpServer::new(HttpConfig::default());
//!     server.register_child("/", Box::new(FileServer::new("/var/www")));
//!     let server = Rc::new(RefCell::new(server));
//!     coil::listen(&mut poller, &server, "127.0.0.1", 8080)?;
//!     poller.run();
//!     Ok(())
//! }
//! ```

// ── Public modules ──────────────────────────────────────────────────────
pub mod body;
pub mod client;
pub mod config;
pub mod date;
pub mod error;
pub mod files;
pub mod message;
pub mod parser;
pub mod server;
pub mod stream;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Message body source/sink contract.
pub use body::Body;
/// Body backed by a file on disk.
pub use body::FileBody;
/// In-memory body.
pub use body::MemoryBody;
/// Pseudo-random body for bulk-transfer payloads.
pub use body::RandomBody;
/// Connect to an `http://` URI.
pub use client::connect_uri;
/// Path-and-query helper for request lines.
pub use client::path_query;
/// Connection originator for client channels.
pub use client::HttpClient;
/// Application callbacks for the client side.
pub use client::HttpClientHandler;
/// The client end of one HTTP channel.
pub use client::HttpClientStream;
/// HTTP channel configuration.
pub use config::HttpConfig;
/// Errors produced by the HTTP framing layer.
pub use error::HttpError;
/// Static file request handler.
pub use files::FileServer;
/// Ordered case-insensitive header map.
pub use message::Headers;
/// An HTTP/1.x message, request or response.
pub use message::HttpMessage;
/// Decide how an incoming body is delimited.
pub use parser::body_framing;
/// Body delimitation of a message.
pub use parser::Framing;
/// A parsed protocol element.
pub use parser::HttpEvent;
/// Incremental HTTP/1.x parser.
pub use parser::HttpParser;
/// Connection acceptor and request router.
pub use server::HttpServer;
/// The server end of one HTTP channel.
pub use server::HttpServerStream;
/// Serves requests routed to a URI prefix.
pub use server::RequestHandler;
/// The HTTP channel core shared by both sides.
pub use stream::HttpStream;
