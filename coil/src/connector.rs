use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Error;
use crate::handler::StreamHandler;
use crate::pollable::{Pollable, Watchdog};
use crate::poller::Poller;
use crate::sock::{self, Sock};

/// One in-flight non-blocking connect attempt.
///
/// Registered write-interest only; writability signals that the
/// three-way handshake finished, with the verdict in `SO_ERROR`. On
/// failure the connector falls through to the next resolved address;
/// the handler hears `connection_failed` once, after the last address
/// gives up or the watchdog fires.
pub struct Connector<H: StreamHandler> {
    handler: Rc<RefCell<H>>,
    fd: RawFd,
    sock: Option<Sock>,
    remaining: VecDeque<SocketAddr>,
    timeout: Duration,
    watchdog: Watchdog,
    began: Instant,
}

impl<H: StreamHandler + 'static> Connector<H> {
    /// Try the addresses in order until one attempt can be started.
    /// Immediate syscall failures skip to the next address; exhaustion
    /// reports `connection_failed` through the deferred queue.
    pub(crate) fn spawn(
        poller: &mut Poller,
        handler: &Rc<RefCell<H>>,
        mut addrs: VecDeque<SocketAddr>,
        timeout: Duration,
    ) {
        let mut last_err: Option<io::Error> = None;
        while let Some(addr) = addrs.pop_front() {
            match sock::start_connect(addr) {
                Ok(attempt) => {
                    let fd = attempt.fileno();
                    debug!(fd, peer = %addr, "connect attempt started");
                    let mut watchdog = Watchdog::new();
                    watchdog.set(Some(timeout));
                    let connector = Rc::new(RefCell::new(Self {
                        handler: Rc::clone(handler),
                        fd,
                        sock: Some(attempt),
                        remaining: addrs,
                        timeout,
                        watchdog,
                        began: Instant::now(),
                    }));
                    poller.add(connector);
                    poller.set_writable(fd);
                    return;
                }
                Err(err) => {
                    debug!(peer = %addr, error = %err, "connect attempt refused");
                    last_err = Some(err);
                }
            }
        }
        let handler = Rc::clone(handler);
        let error = last_err
            .map(Error::Io)
            .unwrap_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotConnected, "no address")));
        poller.call_soon(move |poller| handler.borrow_mut().connection_failed(poller, error));
    }
}

impl<H: StreamHandler + 'static> Pollable for Connector<H> {
    fn fileno(&self) -> RawFd {
        self.fd
    }

    fn handle_write(&mut self, poller: &mut Poller) {
        let attempt = match self.sock.take() {
            Some(attempt) => attempt,
            None => return,
        };
        let verdict = attempt.take_error();
        match verdict {
            Ok(None) => {
                let rtt = self.began.elapsed();
                debug!(fd = self.fd, ?rtt, "connect completed");
                poller.close(self.fd);
                let handler = Rc::clone(&self.handler);
                poller.call_soon(move |poller| {
                    H::connection_made(&handler, poller, attempt, Some(rtt))
                });
            }
            Ok(Some(err)) | Err(err) => {
                debug!(fd = self.fd, error = %err, "connect failed");
                poller.close(self.fd);
                if self.remaining.is_empty() {
                    let handler = Rc::clone(&self.handler);
                    poller.call_soon(move |poller| {
                        handler.borrow_mut().connection_failed(poller, err.into())
                    });
                } else {
                    let handler = Rc::clone(&self.handler);
                    let addrs = std::mem::take(&mut self.remaining);
                    let timeout = self.timeout;
                    poller.call_soon(move |poller| Self::spawn(poller, &handler, addrs, timeout));
                }
            }
        }
    }

    /// Reached when the attempt was closed from the outside, which for
    /// a connector means the watchdog fired.
    fn handle_close(&mut self, poller: &mut Poller) {
        if self.sock.take().is_some() {
            let handler = Rc::clone(&self.handler);
            poller.call_soon(move |poller| {
                handler.borrow_mut().connection_failed(
                    poller,
                    Error::Io(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
                )
            });
        }
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.watchdog.expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.watchdog.set(timeout);
    }
}
