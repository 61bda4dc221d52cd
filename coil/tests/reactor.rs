//! Integration tests: reactor, stream, listener, and connector over
//! real TCP connections.
//!
//! Each test runs a [`Poller`] on its own thread (the reactor types are
//! single-threaded by design) and drives it from std TCP sockets.

use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{IntoRawFd, RawFd};
use std::rc::Rc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use coil::{
    connect, listen, Config, ConfigBuilder, Error, Pollable, Poller, RecvEvent, SendEvent, Sock,
    Stream, StreamHandler,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Find an available port by binding to :0.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn echo_round_trip(addr: &str, msg: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(msg).unwrap();
    stream.flush().unwrap();

    let mut buf = vec![0u8; msg.len()];
    let mut total = 0;
    while total < msg.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => panic!("read error: {e}"),
        }
    }
    buf.truncate(total);
    buf
}

/// Connected non-blocking [`Stream`] built from a std socket pair, for
/// tests that exercise the stream API without a full reactor setup.
fn connected_stream(config: &Config) -> (Stream, TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (accepted, _) = listener.accept().unwrap();
    let sock = Sock::from_raw(accepted.into_raw_fd());
    sock.set_nonblocking().unwrap();
    (Stream::new(sock, config).unwrap(), peer)
}

// ── Echo server harness ─────────────────────────────────────────────

struct EchoServer {
    config: Config,
}

impl StreamHandler for EchoServer {
    fn config(&self) -> &Config {
        &self.config
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        _rtt: Option<Duration>,
    ) {
        let stream = Stream::new(sock, this.borrow().config()).unwrap();
        let echo = Rc::new(RefCell::new(EchoStream { stream }));
        echo.borrow_mut().stream.start_recv(poller).unwrap();
        poller.add(echo);
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
            RecvEvent::Data(data) => self.stream.start_send(poller, data).unwrap(),
            RecvEvent::Closed => self.stream.close(poller),
            RecvEvent::Retry => {}
        }
    }

    fn handle_write(&mut self, poller: &mut Poller) {
        match self.stream.do_send(poller) {
            SendEvent::Complete => self.stream.start_recv(poller).unwrap(),
            SendEvent::Closed => self.stream.close(poller),
            SendEvent::Retry => {}
        }
    }

    fn handle_close(&mut self, poller: &mut Poller) {
        self.stream.mark_closed();
        // One connection per test; drain the reactor so run() returns.
        poller.shutdown();
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.stream.watchdog_expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.stream.set_timeout(timeout)
    }
}

/// Launch a reactor thread running `setup`, returning once the setup
/// closure has finished binding.
fn launch_reactor(
    setup: impl FnOnce(&mut Poller) + Send + 'static,
) -> std::thread::JoinHandle<()> {
    let (ready_tx, ready_rx) = mpsc::channel();
    let handle = std::thread::spawn(move || {
        let mut poller = Poller::new();
        setup(&mut poller);
        ready_tx.send(()).unwrap();
        poller.run();
    });
    ready_rx.recv().unwrap();
    handle
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn echo_small_message() {
    init_tracing();
    let port = free_port();
    let server = launch_reactor(move |poller| {
        let handler = Rc::new(RefCell::new(EchoServer {
            config: Config::default(),
        }));
        listen(poller, &handler, "127.0.0.1", port).expect("listen failed");
    });

    let addr = format!("127.0.0.1:{port}");
    let msg = b"Hello, coil!";
    let response = echo_round_trip(&addr, msg);
    assert_eq!(response, msg);

    server.join().unwrap();
}

#[test]
fn echo_large_message() {
    init_tracing();
    let port = free_port();
    let server = launch_reactor(move |poller| {
        let handler = Rc::new(RefCell::new(EchoServer {
            config: Config::default(),
        }));
        listen(poller, &handler, "127.0.0.1", port).expect("listen failed");
    });

    let addr = format!("127.0.0.1:{port}");
    // Larger than a typical TCP segment so the echo spans several
    // recv/send rounds.
    let msg: Vec<u8> = (0..65536).map(|i| (i % 256) as u8).collect();
    let response = echo_round_trip(&addr, &msg);
    assert_eq!(response, msg);

    server.join().unwrap();
}

// ── Deferred close flushes pending sends ────────────────────────────

const BLAST_LEN: usize = 4 * 1024 * 1024;

struct BlastServer {
    config: Config,
}

impl StreamHandler for BlastServer {
    fn config(&self) -> &Config {
        &self.config
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        _rtt: Option<Duration>,
    ) {
        let mut stream = Stream::new(sock, this.borrow().config()).unwrap();
        let payload: Bytes = (0..BLAST_LEN).map(|i| (i % 251) as u8).collect();
        stream.start_send(poller, payload).unwrap();
        // Close requested while the send is still draining; the stream
        // must flush every byte before the descriptor goes away.
        stream.close(poller);
        let blast = Rc::new(RefCell::new(BlastStream { stream }));
        poller.add(blast);
    }
}

struct BlastStream {
    stream: Stream,
}

impl Pollable for BlastStream {
    fn fileno(&self) -> RawFd {
        self.stream.fileno()
    }

    fn handle_write(&mut self, poller: &mut Poller) {
        match self.stream.do_send(poller) {
            SendEvent::Closed => self.stream.close(poller),
            SendEvent::Complete | SendEvent::Retry => {}
        }
    }

    fn handle_close(&mut self, poller: &mut Poller) {
        self.stream.mark_closed();
        poller.shutdown();
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.stream.watchdog_expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.stream.set_timeout(timeout)
    }
}

#[test]
fn close_waits_for_pending_send_to_drain() {
    init_tracing();
    let port = free_port();
    let server = launch_reactor(move |poller| {
        let handler = Rc::new(RefCell::new(BlastServer {
            config: Config::default(),
        }));
        listen(poller, &handler, "127.0.0.1", port).expect("listen failed");
    });

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}")).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut total = 0;
    let mut buf = vec![0u8; 65536];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => panic!("read error: {e}"),
        }
    }
    assert_eq!(total, BLAST_LEN, "payload truncated by close");

    server.join().unwrap();
}

// ── Watchdog reclaims idle streams ──────────────────────────────────

struct IdleServer {
    config: Config,
}

impl StreamHandler for IdleServer {
    fn config(&self) -> &Config {
        &self.config
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        _rtt: Option<Duration>,
    ) {
        let stream = Stream::new(sock, this.borrow().config()).unwrap();
        let idle = Rc::new(RefCell::new(EchoStream { stream }));
        idle.borrow_mut().stream.start_recv(poller).unwrap();
        poller.add(idle);
    }
}

#[test]
fn watchdog_closes_idle_stream() {
    init_tracing();
    let port = free_port();
    let server = launch_reactor(move |poller| {
        let config = ConfigBuilder::new()
            .watchdog(Some(Duration::from_millis(200)))
            .build()
            .unwrap();
        let handler = Rc::new(RefCell::new(IdleServer { config }));
        listen(poller, &handler, "127.0.0.1", port).expect("listen failed");
    });

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}")).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Never send anything; the server watchdog must close us.
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(_) => panic!("unexpected data from idle server"),
        Err(e) => panic!("expected EOF, got {e}"),
    }

    server.join().unwrap();
}

// ── Connector behavior ──────────────────────────────────────────────

struct Dialer {
    config: Config,
    made: Rc<Cell<bool>>,
    saw_rtt: Rc<Cell<bool>>,
    failed: Rc<Cell<bool>>,
}

impl StreamHandler for Dialer {
    fn config(&self) -> &Config {
        &self.config
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        _poller: &mut Poller,
        sock: Sock,
        rtt: Option<Duration>,
    ) {
        let dialer = this.borrow();
        dialer.made.set(true);
        dialer.saw_rtt.set(rtt.is_some());
        drop(sock);
    }

    fn connection_failed(&mut self, _poller: &mut Poller, _error: Error) {
        self.failed.set(true);
    }
}

#[test]
fn connect_reports_connection_made_with_rtt() {
    init_tracing();
    // Keep the listener alive so the connect completes via the backlog.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let made = Rc::new(Cell::new(false));
    let saw_rtt = Rc::new(Cell::new(false));
    let failed = Rc::new(Cell::new(false));
    let mut poller = Poller::new();
    let handler = Rc::new(RefCell::new(Dialer {
        config: Config::default(),
        made: Rc::clone(&made),
        saw_rtt: Rc::clone(&saw_rtt),
        failed: Rc::clone(&failed),
    }));
    connect(&mut poller, &handler, "127.0.0.1", port, 1).expect("connect failed");
    poller.run();

    assert!(made.get());
    assert!(saw_rtt.get());
    assert!(!failed.get());
}

#[test]
fn connect_to_dead_port_reports_failure() {
    init_tracing();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let made = Rc::new(Cell::new(false));
    let failed = Rc::new(Cell::new(false));
    let mut poller = Poller::new();
    let handler = Rc::new(RefCell::new(Dialer {
        config: Config::default(),
        made: Rc::clone(&made),
        saw_rtt: Rc::new(Cell::new(false)),
        failed: Rc::clone(&failed),
    }));
    connect(&mut poller, &handler, "127.0.0.1", dead_port, 1).expect("connect failed");
    poller.run();

    assert!(!made.get());
    assert!(failed.get());
}

#[test]
fn connect_rejects_multiple_attempts() {
    let mut poller = Poller::new();
    let handler = Rc::new(RefCell::new(Dialer {
        config: Config::default(),
        made: Rc::new(Cell::new(false)),
        saw_rtt: Rc::new(Cell::new(false)),
        failed: Rc::new(Cell::new(false)),
    }));
    let result = connect(&mut poller, &handler, "127.0.0.1", 80, 2);
    assert!(matches!(result, Err(Error::MultiConnect(2))));
}

// ── Stream discipline ───────────────────────────────────────────────

#[test]
fn second_start_recv_is_rejected() {
    let config = Config::default();
    let (mut stream, _peer) = connected_stream(&config);
    let mut poller = Poller::new();
    stream.start_recv(&mut poller).unwrap();
    assert!(matches!(
        stream.start_recv(&mut poller),
        Err(Error::RecvAlreadyPending)
    ));
}

#[test]
fn second_start_send_is_rejected() {
    let config = Config::default();
    let (mut stream, _peer) = connected_stream(&config);
    let mut poller = Poller::new();
    stream.start_send(&mut poller, Bytes::from_static(b"a")).unwrap();
    assert!(matches!(
        stream.start_send(&mut poller, Bytes::from_static(b"b")),
        Err(Error::SendAlreadyPending)
    ));
}

#[test]
fn close_callbacks_run_exactly_once() {
    let config = Config::default();
    let (mut stream, _peer) = connected_stream(&config);
    let mut poller = Poller::new();
    let calls = Rc::new(Cell::new(0));
    for _ in 0..2 {
        let calls = Rc::clone(&calls);
        stream.register_close_callback(move || calls.set(calls.get() + 1));
    }
    stream.close(&mut poller);
    stream.mark_closed();
    stream.run_close_callbacks();
    stream.run_close_callbacks();
    assert_eq!(calls.get(), 2);
}

#[test]
fn stream_counts_bytes_both_ways() {
    init_tracing();
    let config = Config::default();
    let (mut stream, mut peer) = connected_stream(&config);
    let mut poller = Poller::new();

    peer.write_all(b"12345").unwrap();
    peer.flush().unwrap();
    stream.start_recv(&mut poller).unwrap();
    // The bytes are in flight; poll the recv until they land.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match stream.do_recv(&mut poller) {
            RecvEvent::Data(data) => {
                assert_eq!(&data[..], b"12345");
                break;
            }
            RecvEvent::Retry if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1))
            }
            other => panic!("unexpected recv outcome: {other:?}"),
        }
    }
    assert_eq!(stream.bytes_in(), 5);

    stream
        .start_send(&mut poller, Bytes::from_static(b"abc"))
        .unwrap();
    loop {
        match stream.do_send(&mut poller) {
            SendEvent::Complete => break,
            SendEvent::Retry if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1))
            }
            other => panic!("unexpected send outcome: {other:?}"),
        }
    }
    assert_eq!(stream.bytes_out(), 3);
}

#[test]
fn io_after_close_is_ignored() {
    let config = Config::default();
    let (mut stream, _peer) = connected_stream(&config);
    let mut poller = Poller::new();
    stream.close(&mut poller);
    assert!(stream.is_closing());
    // Both requests are silently dropped once a close is underway.
    stream.start_recv(&mut poller).unwrap();
    stream.start_send(&mut poller, Bytes::from_static(b"x")).unwrap();
}
