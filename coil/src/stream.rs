use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use tracing::debug;

use crate::config::Config;
use crate::error::Error;
use crate::pollable::Watchdog;
use crate::poller::Poller;
use crate::sock::Sock;

/// Outcome of one recv attempt on a [`Stream`].
#[derive(Debug)]
pub enum RecvEvent {
    /// The socket was not ready; the recv stays armed.
    Retry,
    /// Bytes arrived.
    Data(Bytes),
    /// The peer closed, or a hard error occurred. The caller must close
    /// the stream.
    Closed,
}

/// Outcome of one send attempt on a [`Stream`].
#[derive(Debug)]
pub enum SendEvent {
    /// Partial progress or not ready; the send stays armed.
    Retry,
    /// The buffered data was fully written.
    Complete,
    /// A hard error occurred. The caller must close the stream.
    Closed,
}

/// A connected non-blocking TCP stream driven by the reactor.
///
/// At most one recv and one send may be outstanding at any time; the
/// second `start_recv`/`start_send` is rejected. Readiness events are
/// consumed through [`Stream::do_recv`] and [`Stream::do_send`] by the
/// pollable wrapper that owns the stream.
pub struct Stream {
    sock: Sock,
    peer: SocketAddr,
    local: SocketAddr,
    watchdog: Watchdog,
    timeout: Option<Duration>,
    max_recv: usize,
    recv_pending: bool,
    send_pending: bool,
    send_buf: Bytes,
    bytes_in: u64,
    bytes_out: u64,
    close_callbacks: Vec<Box<dyn FnOnce()>>,
    eof: bool,
    rst: bool,
    closing: bool,
    close_deferred: bool,
}

impl Stream {
    pub fn new(sock: Sock, config: &Config) -> io::Result<Self> {
        let peer = sock.peer_addr()?;
        let local = sock.local_addr()?;
        let mut watchdog = Watchdog::new();
        watchdog.set(config.watchdog);
        Ok(Self {
            sock,
            peer,
            local,
            watchdog,
            timeout: config.watchdog,
            max_recv: config.max_recv,
            recv_pending: false,
            send_pending: false,
            send_buf: Bytes::new(),
            bytes_in: 0,
            bytes_out: 0,
            close_callbacks: Vec::new(),
            eof: false,
            rst: false,
            closing: false,
            close_deferred: false,
        })
    }

    pub fn fileno(&self) -> RawFd {
        self.sock.fileno()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// True once the peer has shut down its writing side.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// True once the connection was reset by the peer.
    pub fn rst(&self) -> bool {
        self.rst
    }

    /// True once a close is underway; further I/O requests are ignored.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// True while a send is outstanding.
    pub fn send_pending(&self) -> bool {
        self.send_pending
    }

    /// Cumulative bytes received.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Cumulative bytes sent.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Register a callback invoked exactly once when the stream closes.
    pub fn register_close_callback(&mut self, callback: impl FnOnce() + 'static) {
        self.close_callbacks.push(Box::new(callback));
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
        self.watchdog.set(timeout);
    }

    pub fn watchdog_expired(&self, now: Instant) -> bool {
        self.watchdog.expired(now)
    }

    /// Arm a recv. Readiness is reported through the owner's
    /// `handle_read`, which must call [`Stream::do_recv`].
    pub fn start_recv(&mut self, poller: &mut Poller) -> Result<(), Error> {
        if self.closing {
            return Ok(());
        }
        if self.recv_pending {
            return Err(Error::RecvAlreadyPending);
        }
        self.recv_pending = true;
        poller.set_readable(self.fileno());
        Ok(())
    }

    /// Consume a readability event.
    pub fn do_recv(&mut self, poller: &mut Poller) -> RecvEvent {
        self.recv_pending = false;
        poller.unset_readable(self.fileno());
        match self.sock.recv(self.max_recv) {
            Ok(data) if data.is_empty() => {
                debug!(fd = self.fileno(), "recv: end of stream");
                self.eof = true;
                RecvEvent::Closed
            }
            Ok(data) => {
                self.watchdog.touch();
                self.bytes_in += data.len() as u64;
                RecvEvent::Data(data)
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                self.recv_pending = true;
                poller.set_readable(self.fileno());
                RecvEvent::Retry
            }
            Err(err) => {
                debug!(fd = self.fileno(), error = %err, "recv failed");
                if err.kind() == io::ErrorKind::ConnectionReset {
                    self.rst = true;
                }
                RecvEvent::Closed
            }
        }
    }

    /// Arm a send of `data`. Completion is reported through the owner's
    /// `handle_write`, which must call [`Stream::do_send`].
    ///
    /// A zero-length send completes on the next writability event
    /// without touching the socket.
    pub fn start_send(&mut self, poller: &mut Poller, data: Bytes) -> Result<(), Error> {
        if self.closing {
            return Ok(());
        }
        if self.send_pending {
            return Err(Error::SendAlreadyPending);
        }
        self.send_pending = true;
        self.send_buf = data;
        poller.set_writable(self.fileno());
        Ok(())
    }

    /// Consume a writability event, pushing buffered bytes out.
    pub fn do_send(&mut self, poller: &mut Poller) -> SendEvent {
        if self.send_buf.is_empty() {
            return self.finish_send(poller);
        }
        let result = self.sock.send(&self.send_buf);
        self.send_outcome(poller, result)
    }

    fn send_outcome(&mut self, poller: &mut Poller, result: io::Result<usize>) -> SendEvent {
        match result {
            // Zero bytes accepted for a non-empty buffer is EOF.
            Ok(0) => {
                debug!(fd = self.fileno(), "send: end of stream");
                self.eof = true;
                SendEvent::Closed
            }
            Ok(n) if n == self.send_buf.len() => {
                self.watchdog.touch();
                self.bytes_out += n as u64;
                self.finish_send(poller)
            }
            Ok(n) => {
                self.watchdog.touch();
                self.bytes_out += n as u64;
                self.send_buf.advance(n);
                SendEvent::Retry
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                SendEvent::Retry
            }
            Err(err) => {
                debug!(fd = self.fileno(), error = %err, "send failed");
                if err.kind() == io::ErrorKind::ConnectionReset {
                    self.rst = true;
                }
                SendEvent::Closed
            }
        }
    }

    fn finish_send(&mut self, poller: &mut Poller) -> SendEvent {
        self.send_pending = false;
        self.send_buf = Bytes::new();
        poller.unset_writable(self.fileno());
        if self.close_deferred {
            self.close(poller);
        }
        SendEvent::Complete
    }

    /// Request a close. When a send is still draining the close is
    /// deferred until the buffered bytes are out; an EOF or error makes
    /// it immediate.
    pub fn close(&mut self, poller: &mut Poller) {
        if self.closing {
            return;
        }
        if self.send_pending && !self.eof && !self.rst {
            self.close_deferred = true;
            return;
        }
        self.closing = true;
        poller.close(self.fileno());
    }

    /// Mark the stream closed. Called from the owner's `handle_close`
    /// before the owner notifies its subscriber.
    ///
    /// See [`Stream::run_close_callbacks`] for the rest of the close
    /// sequence.
    pub fn mark_closed(&mut self) {
        self.closing = true;
        debug!(
            fd = self.fileno(),
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            "stream closed"
        );
    }

    /// Run the registered close callbacks. Called from the owner's
    /// `handle_close` after `connection_lost`; draining the vector
    /// makes repeated calls harmless.
    pub fn run_close_callbacks(&mut self) {
        for callback in self.close_callbacks.drain(..) {
            callback();
        }
    }
}
