//! Client side of an HTTP channel: pipelined request tracking and the
//! connector-facing handler.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use coil::{Pollable, Poller, RecvEvent, SendEvent, Sock, StreamHandler};
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::error::HttpError;
use crate::message::HttpMessage;
use crate::parser::{body_framing, HttpEvent};
use crate::stream::HttpStream;

/// Application callbacks for the client side of an HTTP channel.
pub trait HttpClientHandler: Sized + 'static {
    /// The connection is up; typically send the first request here.
    fn connection_ready(&mut self, poller: &mut Poller, stream: &mut HttpClientStream<Self>);

    /// The connection attempt gave up.
    fn connection_failed(&mut self, _poller: &mut Poller, _error: coil::Error) {}

    /// Response headers arrived. Return false to refuse the response;
    /// the connection is closed without reading further.
    fn got_response_headers(
        &mut self,
        _poller: &mut Poller,
        _request: &HttpMessage,
        _response: &mut HttpMessage,
    ) -> bool {
        true
    }

    /// A piece of the response body arrived. The piece has already
    /// been appended to the response body.
    fn got_response_piece(&mut self, _response: &HttpMessage, _piece: &[u8]) {}

    /// A complete response arrived, body rewound for reading.
    fn got_response(
        &mut self,
        poller: &mut Poller,
        stream: &mut HttpClientStream<Self>,
        request: HttpMessage,
        response: HttpMessage,
    );

    /// The connection is gone.
    fn connection_lost(&mut self, _poller: &mut Poller) {}
}

/// A request waiting for its response. Responses are matched to
/// requests in FIFO order.
struct Exchange {
    request: HttpMessage,
    response: HttpMessage,
}

/// The client end of one HTTP channel.
pub struct HttpClientStream<H: HttpClientHandler> {
    http: HttpStream,
    handler: Rc<RefCell<H>>,
    host: String,
    exchanges: VecDeque<Exchange>,
    max_pipeline: usize,
}

impl<H: HttpClientHandler> HttpClientStream<H> {
    /// Queue a request on the wire. A `Host` header is filled in from
    /// the connect endpoint unless the request carries its own.
    pub fn send_request(
        &mut self,
        poller: &mut Poller,
        mut request: HttpMessage,
    ) -> Result<(), HttpError> {
        if self.exchanges.len() >= self.max_pipeline {
            return Err(HttpError::PipelineFull);
        }
        if !request.headers.contains("host") {
            request.headers.set("host", self.host.clone());
        }
        self.http.send_message(poller, &mut request)?;
        self.exchanges.push_back(Exchange {
            request,
            response: HttpMessage::default(),
        });
        Ok(())
    }

    pub fn close(&mut self, poller: &mut Poller) {
        self.http.close(poller);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.http.tcp.peer_addr()
    }

    /// Requests still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.exchanges.len()
    }

    fn process_data(&mut self, poller: &mut Poller, data: Bytes) -> Result<(), HttpError> {
        self.http.parser.push(&data);
        self.drain_events(poller)?;
        if !self.http.is_closing() {
            self.http.tcp.start_recv(poller)?;
        }
        Ok(())
    }

    fn drain_events(&mut self, poller: &mut Poller) -> Result<(), HttpError> {
        while !self.http.is_closing() {
            match self.http.parser.next()? {
                None => break,
                Some(event) => self.on_event(poller, event)?,
            }
        }
        Ok(())
    }

    fn front_exchange(&mut self) -> Result<&mut Exchange, HttpError> {
        self.exchanges
            .front_mut()
            .ok_or_else(|| HttpError::Protocol("response without outstanding request".into()))
    }

    fn on_event(&mut self, poller: &mut Poller, event: HttpEvent) -> Result<(), HttpError> {
        match event {
            HttpEvent::FirstLine {
                first,
                second,
                third,
            } => {
                if first != "HTTP/1.0" && first != "HTTP/1.1" {
                    return Err(HttpError::UnsupportedProtocol(first));
                }
                let exchange = self.front_exchange()?;
                exchange.response.protocol = first;
                exchange.response.status = second
                    .parse()
                    .map_err(|_| HttpError::Protocol(format!("invalid status code: {second:?}")))?;
                exchange.response.reason = third;
            }
            HttpEvent::Header { key, value } => {
                self.front_exchange()?.response.headers.set(&key, value);
            }
            HttpEvent::EndOfHeaders => {
                let handler = Rc::clone(&self.handler);
                let exchange = self.front_exchange()?;
                let accepted = handler.borrow_mut().got_response_headers(
                    poller,
                    &exchange.request,
                    &mut exchange.response,
                );
                if !accepted {
                    debug!(fd = self.http.tcp.fileno(), "response refused by handler");
                    self.http.parser.poison();
                    self.http.tcp.close(poller);
                    return Ok(());
                }
                let framing = body_framing(&exchange.request, Some(&exchange.response))?;
                self.http.parser.begin_body(framing);
            }
            HttpEvent::BodyPiece(piece) => {
                let handler = Rc::clone(&self.handler);
                let exchange = self.front_exchange()?;
                exchange.response.body_mut().write(&piece)?;
                handler.borrow_mut().got_response_piece(&exchange.response, &piece);
            }
            HttpEvent::EndOfBody => self.deliver_response(poller)?,
        }
        Ok(())
    }

    fn deliver_response(&mut self, poller: &mut Poller) -> Result<(), HttpError> {
        let mut exchange = self
            .exchanges
            .pop_front()
            .ok_or_else(|| HttpError::Protocol("end of body without outstanding request".into()))?;
        exchange.response.body_mut().rewind()?;
        let wants_close = exchange.request.wants_close() || exchange.response.wants_close();
        let handler = Rc::clone(&self.handler);
        handler
            .borrow_mut()
            .got_response(poller, self, exchange.request, exchange.response);
        if wants_close {
            debug!(fd = self.http.tcp.fileno(), "honoring connection close");
            self.http.close(poller);
        }
        Ok(())
    }
}

impl<H: HttpClientHandler> Pollable for HttpClientStream<H> {
    fn fileno(&self) -> RawFd {
        self.http.tcp.fileno()
    }

    fn handle_read(&mut self, poller: &mut Poller) {
        match self.http.tcp.do_recv(poller) {
            RecvEvent::Data(data) => {
                if let Err(err) = self.process_data(poller, data) {
                    debug!(fd = self.http.tcp.fileno(), error = %err, "closing http stream");
                    self.http.tcp.close(poller);
                }
            }
            RecvEvent::Closed => self.http.close(poller),
            RecvEvent::Retry => {}
        }
    }

    fn handle_write(&mut self, poller: &mut Poller) {
        match self.http.tcp.do_send(poller) {
            SendEvent::Complete => {
                if let Err(err) = self.http.handle_send_complete(poller) {
                    debug!(fd = self.http.tcp.fileno(), error = %err, "closing http stream");
                    self.http.tcp.close(poller);
                }
            }
            SendEvent::Closed => self.http.tcp.close(poller),
            SendEvent::Retry => {}
        }
    }

    fn handle_close(&mut self, poller: &mut Poller) {
        self.http.tcp.mark_closed();
        // A body delimited by connection close completes at EOF.
        if self.http.tcp.eof() && self.http.parser.finish_at_eof().is_some() {
            if let Err(err) = self.deliver_response(poller) {
                debug!(fd = self.http.tcp.fileno(), error = %err, "discarding final response");
            }
        }
        let handler = Rc::clone(&self.handler);
        handler.borrow_mut().connection_lost(poller);
        // Close callbacks run last, after the subscriber heard the loss.
        self.http.tcp.run_close_callbacks();
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.http.tcp.watchdog_expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.http.tcp.set_timeout(timeout)
    }
}

/// Originates HTTP connections and wires accepted sockets into
/// [`HttpClientStream`]s.
pub struct HttpClient<H: HttpClientHandler> {
    config: HttpConfig,
    host: String,
    rtt: Option<Duration>,
    app: Rc<RefCell<H>>,
}

impl<H: HttpClientHandler> HttpClient<H> {
    pub fn new(config: HttpConfig, app: Rc<RefCell<H>>) -> Self {
        Self {
            config,
            host: String::new(),
            rtt: None,
            app,
        }
    }

    /// Connect round-trip time of the most recent connection.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }
}

impl<H: HttpClientHandler> StreamHandler for HttpClient<H> {
    fn config(&self) -> &coil::Config {
        &self.config.reactor
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        rtt: Option<Duration>,
    ) {
        let (config, host, app) = {
            let mut client = this.borrow_mut();
            if rtt.is_some() {
                debug!(?rtt, "connect completed");
                client.rtt = rtt;
            }
            // If we did not connect via connect_uri...
            if client.host.is_empty() {
                if let Ok(peer) = sock.peer_addr() {
                    client.host = peer.to_string();
                }
            }
            (
                client.config.clone(),
                client.host.clone(),
                Rc::clone(&client.app),
            )
        };
        let http = match HttpStream::new(sock, &config) {
            Ok(http) => http,
            Err(err) => {
                debug!(error = %err, "failed to set up http stream");
                return;
            }
        };
        let fd = http.tcp.fileno();
        let stream = Rc::new(RefCell::new(HttpClientStream {
            http,
            handler: app,
            host,
            exchanges: VecDeque::new(),
            max_pipeline: config.max_pipeline,
        }));
        poller.add(Rc::clone(&stream) as Rc<RefCell<dyn Pollable>>);
        let mut guard = stream.borrow_mut();
        if guard.http.tcp.start_recv(poller).is_err() {
            poller.close(fd);
            return;
        }
        let handler = Rc::clone(&guard.handler);
        handler.borrow_mut().connection_ready(poller, &mut guard);
    }

    fn connection_failed(&mut self, poller: &mut Poller, error: coil::Error) {
        self.app.borrow_mut().connection_failed(poller, error);
    }
}

/// Connect to an `http://` URI. The outcome is reported through the
/// application's [`HttpClientHandler`] callbacks.
pub fn connect_uri<H: HttpClientHandler>(
    poller: &mut Poller,
    client: &Rc<RefCell<HttpClient<H>>>,
    uri: &str,
) -> Result<(), HttpError> {
    let parsed = Url::parse(uri).map_err(|err| HttpError::InvalidUrl(format!("{uri}: {err}")))?;
    if parsed.scheme() != "http" {
        return Err(HttpError::InvalidUrl(format!("unsupported scheme: {uri}")));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| HttpError::InvalidUrl(format!("missing host: {uri}")))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| HttpError::InvalidUrl(format!("missing port: {uri}")))?;
    client.borrow_mut().host = format!("{host}:{port}");
    // Url keeps IPv6 hosts bracketed; the resolver wants them bare.
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    coil::connect(poller, client, bare_host, port, 1)?;
    Ok(())
}

/// The path-and-query part of `uri`, for the request line.
pub fn path_query(uri: &str) -> Result<String, HttpError> {
    let parsed = Url::parse(uri).map_err(|err| HttpError::InvalidUrl(format!("{uri}: {err}")))?;
    let mut path = parsed.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;

    #[test]
    fn connection_lost_precedes_close_callbacks() {
        struct Recorder {
            order: Rc<RefCell<Vec<&'static str>>>,
        }
        impl HttpClientHandler for Recorder {
            fn connection_ready(&mut self, _: &mut Poller, _: &mut HttpClientStream<Self>) {}
            fn got_response(
                &mut self,
                _: &mut Poller,
                _: &mut HttpClientStream<Self>,
                _: HttpMessage,
                _: HttpMessage,
            ) {
            }
            fn connection_lost(&mut self, _poller: &mut Poller) {
                self.order.borrow_mut().push("lost");
            }
        }

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let sock = Sock::from_raw(accepted.into_raw_fd());
        sock.set_nonblocking().unwrap();

        let config = HttpConfig::default();
        let mut http = HttpStream::new(sock, &config).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let order = Rc::clone(&order);
            http.tcp
                .register_close_callback(move || order.borrow_mut().push("callback"));
        }
        let mut stream = HttpClientStream {
            http,
            handler: Rc::new(RefCell::new(Recorder {
                order: Rc::clone(&order),
            })),
            host: String::new(),
            exchanges: VecDeque::new(),
            max_pipeline: config.max_pipeline,
        };
        let mut poller = Poller::new();
        stream.handle_close(&mut poller);
        assert_eq!(*order.borrow(), vec!["lost", "callback"]);
    }

    #[test]
    fn path_query_defaults_to_root() {
        assert_eq!(path_query("http://example.org").unwrap(), "/");
        assert_eq!(
            path_query("http://example.org/a/b?x=1").unwrap(),
            "/a/b?x=1"
        );
    }

    #[test]
    fn connect_uri_rejects_https() {
        let mut poller = Poller::new();
        struct Nop;
        impl HttpClientHandler for Nop {
            fn connection_ready(&mut self, _: &mut Poller, _: &mut HttpClientStream<Self>) {}
            fn got_response(
                &mut self,
                _: &mut Poller,
                _: &mut HttpClientStream<Self>,
                _: HttpMessage,
                _: HttpMessage,
            ) {
            }
        }
        let client = Rc::new(RefCell::new(HttpClient::new(
            HttpConfig::default(),
            Rc::new(RefCell::new(Nop)),
        )));
        let result = connect_uri(&mut poller, &client, "https://example.org/");
        assert!(matches!(result, Err(HttpError::InvalidUrl(_))));
    }
}
