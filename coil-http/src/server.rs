//! Server side of an HTTP channel: request routing by URI prefix,
//! response dispatch, and access logging.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use coil::{Pollable, Poller, RecvEvent, SendEvent, Sock, StreamHandler};
use tracing::{debug, info, warn};

use crate::config::HttpConfig;
use crate::date;
use crate::error::HttpError;
use crate::message::HttpMessage;
use crate::parser::{body_framing, HttpEvent};
use crate::stream::HttpStream;

/// Serves requests routed to a URI prefix.
pub trait RequestHandler {
    /// Produce the response for `request`. The request body, if any,
    /// is complete and rewound. An error becomes a 500 response and
    /// closes the connection.
    fn process_request(&mut self, request: &mut HttpMessage) -> Result<HttpMessage, HttpError>;
}

/// Accepts HTTP connections and routes requests to registered
/// children by longest URI prefix.
pub struct HttpServer {
    config: HttpConfig,
    children: Vec<(String, Box<dyn RequestHandler>)>,
}

impl HttpServer {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            children: Vec::new(),
        }
    }

    /// Register a child for every URI starting with `prefix`.
    pub fn register_child(&mut self, prefix: &str, child: Box<dyn RequestHandler>) {
        self.children.push((prefix.to_string(), child));
        // Longest prefix first, so "/a/b" wins over "/a".
        self.children.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    fn route(&mut self, uri: &str) -> Option<&mut (dyn RequestHandler + '_)> {
        for (prefix, child) in self.children.iter_mut() {
            if uri.starts_with(prefix.as_str()) {
                return Some(&mut **child);
            }
        }
        None
    }
}

impl StreamHandler for HttpServer {
    fn config(&self) -> &coil::Config {
        &self.config.reactor
    }

    fn connection_made(
        this: &Rc<RefCell<Self>>,
        poller: &mut Poller,
        sock: Sock,
        _rtt: Option<Duration>,
    ) {
        let config = this.borrow().config.clone();
        let http = match HttpStream::new(sock, &config) {
            Ok(http) => http,
            Err(err) => {
                debug!(error = %err, "failed to set up http stream");
                return;
            }
        };
        debug!(fd = http.tcp.fileno(), peer = %http.tcp.peer_addr(), "accepted http connection");
        let fd = http.tcp.fileno();
        let stream = Rc::new(RefCell::new(HttpServerStream {
            http,
            server: Rc::clone(this),
            request: None,
        }));
        poller.add(Rc::clone(&stream) as Rc<RefCell<dyn Pollable>>);
        if stream.borrow_mut().http.tcp.start_recv(poller).is_err() {
            poller.close(fd);
        }
    }

    fn accept_failed(&mut self, _poller: &mut Poller, error: coil::Error) {
        warn!(error = %error, "accept failed");
    }
}

/// The server end of one HTTP channel.
pub struct HttpServerStream {
    http: HttpStream,
    server: Rc<RefCell<HttpServer>>,
    request: Option<HttpMessage>,
}

impl HttpServerStream {
    fn process_data(&mut self, poller: &mut Poller, data: Bytes) -> Result<(), HttpError> {
        self.http.parser.push(&data);
        while !self.http.is_closing() {
            match self.http.parser.next()? {
                None => break,
                Some(event) => self.on_event(poller, event)?,
            }
        }
        if !self.http.is_closing() {
            self.http.tcp.start_recv(poller)?;
        }
        Ok(())
    }

    fn on_event(&mut self, poller: &mut Poller, event: HttpEvent) -> Result<(), HttpError> {
        match event {
            HttpEvent::FirstLine {
                first,
                second,
                third,
            } => {
                if third != "HTTP/1.0" && third != "HTTP/1.1" {
                    return Err(HttpError::UnsupportedProtocol(third));
                }
                let mut request = HttpMessage::default();
                request.method = first;
                request.uri = second;
                request.protocol = third;
                self.request = Some(request);
            }
            HttpEvent::Header { key, value } => {
                self.current_request()?.headers.set(&key, value);
            }
            HttpEvent::EndOfHeaders => {
                let framing = body_framing(self.current_request()?, None)?;
                self.http.parser.begin_body(framing);
            }
            HttpEvent::BodyPiece(piece) => {
                self.current_request()?.body_mut().write(&piece)?;
            }
            HttpEvent::EndOfBody => self.dispatch_request(poller)?,
        }
        Ok(())
    }

    fn current_request(&mut self) -> Result<&mut HttpMessage, HttpError> {
        self.request
            .as_mut()
            .ok_or_else(|| HttpError::Protocol("event without a request".into()))
    }

    fn dispatch_request(&mut self, poller: &mut Poller) -> Result<(), HttpError> {
        let mut request = self
            .request
            .take()
            .ok_or_else(|| HttpError::Protocol("end of body without a request".into()))?;
        request.body_mut().rewind()?;
        let response = if !request.uri.starts_with('/') {
            forbidden()
        } else {
            let server = Rc::clone(&self.server);
            let mut server = server.borrow_mut();
            match server.route(&request.uri) {
                Some(child) => match child.process_request(&mut request) {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(uri = %request.uri, error = %err, "request handler failed");
                        internal_error()
                    }
                },
                None => forbidden(),
            }
        };
        self.send_response(poller, &request, response)
    }

    /// Send `response` to `request`, honoring the connection directive
    /// and writing one access log line.
    pub fn send_response(
        &mut self,
        poller: &mut Poller,
        request: &HttpMessage,
        mut response: HttpMessage,
    ) -> Result<(), HttpError> {
        if request.wants_close() || request.protocol == "HTTP/1.0" {
            response.set_keepalive(false);
        }
        let nbytes = match response.headers.get("content-length") {
            Some(n) if n != "0" => n.to_string(),
            _ => "-".to_string(),
        };
        info!(
            target: "access",
            "{} - - [{}] \"{}\" {} {}",
            self.http.tcp.peer_addr().ip(),
            date::access_log_stamp(),
            request.request_line(),
            response.status,
            nbytes,
        );
        let close = response.wants_close();
        self.http.send_message(poller, &mut response)?;
        if close {
            self.http.close(poller);
        }
        Ok(())
    }
}

fn forbidden() -> HttpMessage {
    let mut response = HttpMessage::response(403, "Forbidden");
    response.set_text_body("403 Forbidden");
    response
}

fn internal_error() -> HttpMessage {
    let mut response = HttpMessage::response(500, "Internal Server Error");
    response.set_text_body("500 Internal Server Error");
    response.set_keepalive(false);
    response
}

impl Pollable for HttpServerStream {
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
        debug!(fd = self.http.tcp.fileno(), "http connection closed");
        self.http.tcp.mark_closed();
        let server = Rc::clone(&self.server);
        server.borrow_mut().connection_lost(poller);
        self.http.tcp.run_close_callbacks();
    }

    fn handle_periodic(&mut self, now: Instant) -> bool {
        self.http.tcp.watchdog_expired(now)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.http.tcp.set_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(u16);

    impl RequestHandler for Canned {
        fn process_request(&mut self, _request: &mut HttpMessage) -> Result<HttpMessage, HttpError> {
            Ok(HttpMessage::response(self.0, "Ok"))
        }
    }

    #[test]
    fn routing_prefers_the_longest_prefix() {
        let mut server = HttpServer::new(HttpConfig::default());
        server.register_child("/a", Box::new(Canned(201)));
        server.register_child("/a/b", Box::new(Canned(202)));
        server.register_child("/", Box::new(Canned(203)));

        let mut probe = |uri: &str| {
            let mut request = HttpMessage::request("GET", uri);
            server
                .route(uri)
                .map(|child| child.process_request(&mut request).unwrap().status)
        };
        assert_eq!(probe("/a/b/c"), Some(202));
        assert_eq!(probe("/a/x"), Some(201));
        assert_eq!(probe("/other"), Some(203));
    }

    #[test]
    fn routing_without_a_match_yields_none() {
        let mut server = HttpServer::new(HttpConfig::default());
        server.register_child("/api", Box::new(Canned(200)));
        assert!(server.route("/else").is_none());
    }
}
