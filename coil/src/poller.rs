use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pollable::Pollable;

/// Upper bound on how long one reactor iteration may block in `poll(2)`.
/// Keeps the periodic watchdog sweep running even on an idle descriptor set.
const MAX_WAIT: Duration = Duration::from_secs(1);

type DeferredCall = Box<dyn FnOnce(&mut Poller)>;

/// The reactor: owns every registered pollable, multiplexes readiness
/// with `poll(2)`, runs deferred callbacks, and sweeps watchdogs.
///
/// Three registries back the event loop: the ownership map of all
/// pollables, and the readable/writable interest sets. All of them are
/// touched from the single thread of control only.
pub struct Poller {
    pollables: HashMap<RawFd, Rc<RefCell<dyn Pollable>>>,
    readable: HashSet<RawFd>,
    writable: HashSet<RawFd>,
    deferred: VecDeque<DeferredCall>,
}

impl Poller {
    pub fn new() -> Self {
        Self {
            pollables: HashMap::new(),
            readable: HashSet::new(),
            writable: HashSet::new(),
            deferred: VecDeque::new(),
        }
    }

    /// Register a pollable. The reactor owns it until `close`.
    pub fn add(&mut self, pollable: Rc<RefCell<dyn Pollable>>) {
        let fd = pollable.borrow().fileno();
        debug!(fd, "registering pollable");
        self.pollables.insert(fd, pollable);
    }

    /// Declare interest in readability for `fd`.
    pub fn set_readable(&mut self, fd: RawFd) {
        self.readable.insert(fd);
    }

    /// Withdraw interest in readability for `fd`.
    pub fn unset_readable(&mut self, fd: RawFd) {
        self.readable.remove(&fd);
    }

    /// Declare interest in writability for `fd`.
    pub fn set_writable(&mut self, fd: RawFd) {
        self.writable.insert(fd);
    }

    /// Withdraw interest in writability for `fd`.
    pub fn unset_writable(&mut self, fd: RawFd) {
        self.writable.remove(&fd);
    }

    /// Schedule a callback to run before the next blocking wait.
    ///
    /// Deferred calls let callback-driven transitions (completing a
    /// connect before invoking application code, closing from within a
    /// dispatch) run outside the dispatch that triggered them.
    pub fn call_soon(&mut self, call: impl FnOnce(&mut Poller) + 'static) {
        self.deferred.push_back(Box::new(call));
    }

    /// Close a pollable: unregister it from every registry immediately
    /// and schedule `handle_close` through the deferred queue.
    ///
    /// `handle_close` runs exactly once no matter how many times close
    /// is requested for the same descriptor.
    pub fn close(&mut self, fd: RawFd) {
        if let Some(pollable) = self.pollables.remove(&fd) {
            debug!(fd, "closing pollable");
            self.readable.remove(&fd);
            self.writable.remove(&fd);
            self.call_soon(move |poller| pollable.borrow_mut().handle_close(poller));
        }
    }

    /// Close every registered pollable, draining the reactor.
    pub fn shutdown(&mut self) {
        let fds: Vec<RawFd> = self.pollables.keys().copied().collect();
        for fd in fds {
            self.close(fd);
        }
    }

    /// Whether `fd` is currently registered.
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.pollables.contains_key(&fd)
    }

    /// Number of registered pollables.
    pub fn registered_count(&self) -> usize {
        self.pollables.len()
    }

    /// Run the event loop until no pollable remains registered and no
    /// deferred call is queued.
    pub fn run(&mut self) {
        while !self.pollables.is_empty() || !self.deferred.is_empty() {
            // Deferred calls run FIFO, exactly once each, before any
            // blocking wait. Calls scheduled while draining run too.
            while !self.deferred.is_empty() {
                let mut queue = std::mem::take(&mut self.deferred);
                while let Some(call) = queue.pop_front() {
                    call(self);
                }
            }
            if self.pollables.is_empty() {
                continue;
            }
            self.wait_and_dispatch();
            self.sweep(Instant::now());
        }
    }

    fn wait_and_dispatch(&mut self) {
        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(self.readable.len() + self.writable.len());
        for &fd in &self.readable {
            fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        for &fd in &self.writable {
            if let Some(entry) = fds.iter_mut().find(|entry| entry.fd == fd) {
                entry.events |= libc::POLLOUT;
            } else {
                fds.push(libc::pollfd {
                    fd,
                    events: libc::POLLOUT,
                    revents: 0,
                });
            }
        }

        let timeout = MAX_WAIT.as_millis() as libc::c_int;
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                warn!(error = %err, "poll failed");
            }
            return;
        }
        if rc == 0 {
            return;
        }

        for entry in &fds {
            if entry.revents == 0 {
                continue;
            }
            let read_ready = entry.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0;
            let write_ready = entry.revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0;
            // A handler may have unregistered or closed this fd while we
            // were dispatching an earlier one; re-check membership.
            if read_ready && self.readable.contains(&entry.fd) {
                if let Some(pollable) = self.pollables.get(&entry.fd).cloned() {
                    pollable.borrow_mut().handle_read(self);
                }
            }
            if write_ready && self.writable.contains(&entry.fd) {
                if let Some(pollable) = self.pollables.get(&entry.fd).cloned() {
                    pollable.borrow_mut().handle_write(self);
                }
            }
        }
    }

    /// Watchdog sweep: ask every registered pollable whether it expired
    /// and close the ones that did. O(n) per iteration.
    fn sweep(&mut self, now: Instant) {
        let snapshot: Vec<(RawFd, Rc<RefCell<dyn Pollable>>)> = self
            .pollables
            .iter()
            .map(|(fd, pollable)| (*fd, Rc::clone(pollable)))
            .collect();
        for (fd, pollable) in snapshot {
            if !self.pollables.contains_key(&fd) {
                continue;
            }
            if pollable.borrow_mut().handle_periodic(now) {
                warn!(fd, "watchdog timeout, closing pollable");
                self.close(fd);
            }
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    struct FakePollable {
        fd: RawFd,
        closes: Rc<Cell<u32>>,
    }

    impl Pollable for FakePollable {
        fn fileno(&self) -> RawFd {
            self.fd
        }
        fn handle_close(&mut self, _poller: &mut Poller) {
            self.closes.set(self.closes.get() + 1);
        }
        fn handle_periodic(&mut self, _now: Instant) -> bool {
            false
        }
        fn set_timeout(&mut self, _timeout: Option<Duration>) {}
    }

    #[test]
    fn deferred_calls_run_in_fifo_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut poller = Poller::new();
        for i in 0..3 {
            let order = Rc::clone(&order);
            poller.call_soon(move |_| order.borrow_mut().push(i));
        }
        poller.run();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn close_runs_handle_close_exactly_once() {
        let closes = Rc::new(Cell::new(0));
        let mut poller = Poller::new();
        poller.add(Rc::new(RefCell::new(FakePollable {
            fd: 42,
            closes: Rc::clone(&closes),
        })));
        poller.set_readable(42);
        poller.close(42);
        poller.close(42);
        poller.run();
        assert_eq!(closes.get(), 1);
        assert!(!poller.is_registered(42));
    }

    #[test]
    fn shutdown_closes_every_pollable() {
        let closes = Rc::new(Cell::new(0));
        let mut poller = Poller::new();
        for fd in [7, 8, 9] {
            poller.add(Rc::new(RefCell::new(FakePollable {
                fd,
                closes: Rc::clone(&closes),
            })));
        }
        poller.shutdown();
        poller.run();
        assert_eq!(closes.get(), 3);
        assert_eq!(poller.registered_count(), 0);
    }
}
