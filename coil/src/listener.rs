use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::handler::StreamHandler;
use crate::pollable::{Pollable, Watchdog};
use crate::poller::Poller;
use crate::sock::Sock;

/// A bound listening socket. Accepts one connection per readability
/// event and hands it to the owning handler. Listeners never time out.
pub struct Listener<H: StreamHandler> {
    handler: Rc<RefCell<H>>,
    sock: Sock,
    watchdog: Watchdog,
}

impl<H: StreamHandler + 'static> Listener<H> {
    pub(crate) fn register(poller: &mut Poller, handler: &Rc<RefCell<H>>, sock: Sock) {
        let fd = sock.fileno();
        let listener = Rc::new(RefCell::new(Self {
            handler: Rc::clone(handler),
            sock,
            watchdog: Watchdog::disabled(),
        }));
        poller.add(listener);
        poller.set_readable(fd);
    }
}

impl<H: StreamHandler + 'static> Pollable for Listener<H> {
    fn fileno(&self) -> RawFd {
        self.sock.fileno()
    }

    fn handle_read(&mut self, poller: &mut Poller) {
        match self.sock.accept() {
            Ok(Some((accepted, peer))) => {
                debug!(fd = accepted.fileno(), %peer, "accepted connection");
                H::connection_made(&Rc::clone(&self.handler), poller, accepted, None);
            }
            Ok(None) => {}
            Err(err) => {
                debug!(fd = self.sock.fileno(), error = %err, "accept failed");
                self.handler.borrow_mut().accept_failed(poller, err.into());
            }
        }
    }

    fn handle_close(&mut self, _poller: &mut Poller) {
        debug!(fd = self.sock.fileno(), "listener closed");
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.watchdog.expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.watchdog.set(timeout);
    }
}
