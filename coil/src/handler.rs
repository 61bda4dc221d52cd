use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use crate::config::Config;
use crate::connector::Connector;
use crate::error::Error;
use crate::listener::Listener;
use crate::poller::Poller;
use crate::sock::{self, Sock};

/// Callback contract for code that originates or accepts connections.
///
/// Implementors hold a [`Config`] and receive lifecycle notifications
/// from listeners and connectors. `connection_made` takes the handler
/// as `Rc<RefCell<Self>>` so the handler can hand a reference to itself
/// to the streams it creates.
pub trait StreamHandler {
    fn config(&self) -> &Config;

    /// A connection is established. `rtt` is the connect round-trip
    /// time for outgoing connections, `None` for accepted ones.
    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        rtt: Option<Duration>,
    ) where
        Self: Sized;

    /// An outgoing connection attempt gave up.
    fn connection_failed(&mut self, _poller: &mut Poller, _error: Error) {}

    /// A listening socket is bound and accepting.
    fn started_listening(&mut self, _poller: &mut Poller, _addr: SocketAddr) {}

    /// Binding one of the resolved addresses failed. Reported once,
    /// with no retry.
    fn bind_failed(&mut self, _poller: &mut Poller, _error: Error) {}

    /// An accept attempt failed.
    fn accept_failed(&mut self, _poller: &mut Poller, _error: Error) {}

    /// An outgoing connection attempt is underway.
    fn started_connecting(&mut self, _poller: &mut Poller, _addr: SocketAddr) {}

    /// A stream created by this handler closed. Invoked by the stream's
    /// owning pollable, not by the reactor.
    fn connection_lost(&mut self, _poller: &mut Poller) {}
}

/// Bind listening sockets for every address `address:port` resolves to.
///
/// Per-address bind failures are reported through
/// [`StreamHandler::bind_failed`]; only resolution failure is
/// returned as an error.
pub fn listen<H>(
    poller: &mut Poller,
    handler: &Rc<RefCell<H>>,
    address: &str,
    port: u16,
) -> Result<(), Error>
where
    H: StreamHandler + 'static,
{
    let config = handler.borrow().config().clone();
    config.validate()?;
    let addrs = sock::resolve_list(address, port, config.prefer_ipv6)
        .map_err(|_| Error::Resolve(address.to_string(), port))?;
    if addrs.is_empty() {
        return Err(Error::Resolve(address.to_string(), port));
    }
    for addr in addrs {
        match sock::bind_listen(addr, config.backlog) {
            Ok(listening) => {
                let local = listening.local_addr()?;
                Listener::register(poller, handler, listening);
                handler.borrow_mut().started_listening(poller, local);
            }
            Err(err) => handler.borrow_mut().bind_failed(poller, err.into()),
        }
    }
    Ok(())
}

/// Start one outgoing connection to `address:port`. The outcome is
/// reported through `connection_made` or `connection_failed`.
///
/// Only a single attempt per call is supported; `count` other than 1
/// is rejected.
pub fn connect<H>(
    poller: &mut Poller,
    handler: &Rc<RefCell<H>>,
    address: &str,
    port: u16,
    count: usize,
) -> Result<(), Error>
where
    H: StreamHandler + 'static,
{
    if count != 1 {
        return Err(Error::MultiConnect(count));
    }
    let config = handler.borrow().config().clone();
    config.validate()?;
    let addrs: VecDeque<SocketAddr> = sock::resolve_list(address, port, config.prefer_ipv6)
        .map_err(|_| Error::Resolve(address.to_string(), port))?
        .into();
    if addrs.is_empty() {
        return Err(Error::Resolve(address.to_string(), port));
    }
    if let Some(&first) = addrs.front() {
        handler.borrow_mut().started_connecting(poller, first);
    }
    Connector::spawn(poller, handler, addrs, config.connect_timeout);
    Ok(())
}
