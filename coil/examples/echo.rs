//! TCP echo server on the coil reactor.
//!
//! Run with `cargo run --example echo -- 7878`, then try
//! `printf 'hi\n' | nc 127.0.0.1 7878`.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use coil::{listen, Config, Pollable, Poller, RecvEvent, SendEvent, Sock, Stream, StreamHandler};
use tracing::info;

struct Echo {
    config: Config,
}

impl StreamHandler for Echo {
    fn config(&self) -> &Config {
        &self.config
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        _rtt: Option<Duration>,
    ) {
        let stream = match Stream::new(sock, this.borrow().config()) {
            Ok(stream) => stream,
            Err(_) => return,
        };
        info!(peer = %stream.peer_addr(), "connection");
        let echo = Rc::new(RefCell::new(EchoStream { stream }));
        if echo.borrow_mut().stream.start_recv(poller).is_err() {
            return;
        }
        poller.add(echo);
    }

    fn started_listening(&mut self, _poller: &mut Poller, addr: std::net::SocketAddr) {
        info!(%addr, "listening");
    }
}

struct EchoStream {
    stream: Stream,
}

impl Pollable for EchoStream {
    fn fileno(&self) -> RawFd {
        self.stream.fileno()
    }

    fn handle_read(&mut self, poller: &mut Poller) {
        match self.stream.do_recv(poller) {
            RecvEvent::Data(data) => {
                if self.stream.start_send(poller, data).is_err() {
                    self.stream.close(poller);
                }
            }
            RecvEvent::Closed => self.stream.close(poller),
            RecvEvent::Retry => {}
        }
    }

    fn handle_write(&mut self, poller: &mut Poller) {
        match self.stream.do_send(poller) {
            SendEvent::Complete => {
                if self.stream.start_recv(poller).is_err() {
                    self.stream.close(poller);
                }
            }
            SendEvent::Closed => self.stream.close(poller),
            SendEvent::Retry => {}
        }
    }

    fn handle_close(&mut self, _poller: &mut Poller) {
        info!(peer = %self.stream.peer_addr(), "connection closed");
        self.stream.mark_closed();
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.stream.watchdog_expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.stream.set_timeout(timeout)
    }
}

fn main() -> Result<(), coil::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(7878);

    let mut poller = Poller::new();
    let handler = Rc::new(RefCell::new(Echo {
        config: Config::default(),
    }));
    listen(&mut poller, &handler, "127.0.0.1", port)?;
    poller.run();
    Ok(())
}
