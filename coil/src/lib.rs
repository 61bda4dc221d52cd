//! coil: cooperative single-threaded network reactor.
//!
//! coil multiplexes non-blocking TCP sockets with `poll(2)` on one
//! thread of control. Applications implement [`Pollable`] for objects
//! that own a descriptor and [`StreamHandler`] for objects that
//! originate or accept connections; the [`Poller`] dispatches readiness
//! events, runs deferred callbacks, and reclaims idle descriptors with
//! a per-pollable watchdog.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::os::fd::RawFd;
//! use std::rc::Rc;
//! use std::time::{Duration, Instant};
//!
//! use coil::{listen, Config, Pollable, Poller, RecvEvent, SendEvent, Sock, Stream, StreamHandler};
//!
//! struct Echo {
//!     config: Config,
//! }
//!
//! impl StreamHandler for Echo {
//!     fn config(&self) -> &Config {
//!         &self.config
//!     }
//!
//!     fn connection_made(
//!         this: &Rc<RefCell<Self>>,
//!         poller: &mut Poller,
//!         sock: Sock,
//!         _rtt: Option<Duration>,
//!     ) {
//!         let stream = Stream::new(sock, this.borrow().config()).unwrap();
//!         let echo = Rc::new(RefCell::new(EchoStream { stream }));
//!         echo.borrow_mut().stream.start_recv(poller).unwrap();
//!         poller.add(echo);
//!     }
//! }
//!
//! struct EchoStream {
//!     stream: Stream,
//! }
//!
//! impl Pollable for EchoStream {
//!     fn fileno(&self) -> RawFd {
//!         self.stream.fileno()
//!     }
//!
//!     fn handle_read(&mut self, poller: &mut Poller) {
//!         match self.stream.do_recv(poller) {
//!             RecvEvent::Data(data) => {
//!                 self.stream.start_send(poller, data).unwrap();
//!             }
//!             RecvEvent::Closed => self.stream.close(poller),
//!             RecvEvent::Retry => {}
//!         }
//!     }
//!
//!     fn handle_write(&mut self, poller: &mut Poller) {
//!         match self.stream.do_send(poller) {
//!             SendEvent::Complete => {
//!                 self.stream.start_recv(poller).unwrap();
//!             }
//!             SendEvent::Closed => self.stream.close(poller),
//!             SendEvent::Retry => {}
//!         }
//!     }
//!
//!     fn handle_periodic(&mut self, now: Instant) -> bool {
//!         self.stream.watchdog_expired(now)
//!     }
//!
//!     fn set_timeout(&mut self, timeout: Option<Duration>) {
//!         self.stream.set_timeout(timeout)
//!     }
//! }
//!
//! fn main() -> Result<(), coil::Error> {
//!     let mut poller = Poller::new();
//!     let handler = Rc::new(RefCell::new(Echo {
//!         config: Config::default(),
//!     }));
//!     listen(&mut poller, &handler, "127.0.0.1", 7878)?;
//!     poller.run();
//!     Ok(())
//! }
//! ```
//!
//! # Platform
//!
//! POSIX only. Built directly on the libc `poll(2)`/`socket(2)` surface.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod connector;
pub(crate) mod listener;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod error;
pub mod handler;
pub mod pollable;
pub mod poller;
pub mod sock;
pub mod stream;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Reactor configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Default per-recv byte cap.
pub use config::DEFAULT_MAX_RECV;
/// Default inactivity watchdog deadline.
pub use config::DEFAULT_WATCHDOG;
/// Reactor and stream errors.
pub use error::Error;
/// Start one outgoing connection on behalf of a handler.
pub use handler::connect;
/// Bind listening sockets on behalf of a handler.
pub use handler::listen;
/// Callback contract for connection originators and acceptors.
pub use handler::StreamHandler;
/// Capability contract for descriptor owners watched by the reactor.
pub use pollable::Pollable;
/// Inactivity deadline tracked per pollable.
pub use pollable::Watchdog;
/// The event loop.
pub use poller::Poller;
/// Owned non-blocking TCP socket.
pub use sock::Sock;
/// Outcome of one recv attempt.
pub use stream::RecvEvent;
/// Outcome of one send attempt.
pub use stream::SendEvent;
/// Connected non-blocking TCP stream.
pub use stream::Stream;
