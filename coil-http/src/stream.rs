//! The HTTP channel core shared by the client and server sides: an
//! incoming parser plus an outgoing queue of buffers and streamed
//! bodies over one [`coil::Stream`].

use std::collections::VecDeque;
use std::io;

use bytes::BytesMut;
use coil::{Poller, Sock};
use tracing::debug;

use crate::body::Body;
use crate::config::HttpConfig;
use crate::error::HttpError;
use crate::message::HttpMessage;
use crate::parser::HttpParser;

enum OutPiece {
    /// Ready-to-send bytes. Popped when the send is started.
    Buffer(bytes::Bytes),
    /// A streamed body, read one block per completed send. Popped when
    /// a read returns no bytes.
    Body(Box<dyn Body>),
}

/// One HTTP channel over a TCP stream.
///
/// Outgoing messages whose total length is known and small are
/// coalesced with their headers into a single buffer, which may fit a
/// single L2 packet. Larger or unsized bodies are streamed one block
/// per send completion, keeping at most one block buffered.
pub struct HttpStream {
    pub tcp: coil::Stream,
    pub parser: HttpParser,
    outgoing: VecDeque<OutPiece>,
    send_in_flight: bool,
    close_requested: bool,
    small_message: u64,
    block: usize,
}

impl HttpStream {
    pub fn new(sock: Sock, config: &HttpConfig) -> io::Result<Self> {
        Ok(Self {
            tcp: coil::Stream::new(sock, &config.reactor)?,
            parser: HttpParser::new(config.max_line, config.reactor.max_recv),
            outgoing: VecDeque::new(),
            send_in_flight: false,
            close_requested: false,
            small_message: config.small_message,
            block: config.block,
        })
    }

    /// Queue a message for sending. The message's body is taken.
    pub fn send_message(
        &mut self,
        poller: &mut Poller,
        message: &mut HttpMessage,
    ) -> Result<(), HttpError> {
        match message.length {
            Some(length) if length <= self.small_message => {
                debug!(fd = self.tcp.fileno(), length, "sending small http message");
                let mut buf = BytesMut::from(&message.serialize_headers()[..]);
                let mut body = message.take_body();
                loop {
                    let piece = body.read(self.block)?;
                    if piece.is_empty() {
                        break;
                    }
                    buf.extend_from_slice(&piece);
                }
                self.outgoing.push_back(OutPiece::Buffer(buf.freeze()));
            }
            _ => {
                debug!(fd = self.tcp.fileno(), "sending ordinary http message");
                self.outgoing
                    .push_back(OutPiece::Buffer(message.serialize_headers()));
                self.outgoing.push_back(OutPiece::Body(message.take_body()));
            }
        }
        self.flush(poller)
    }

    /// A send finished; push the next piece out.
    pub fn handle_send_complete(&mut self, poller: &mut Poller) -> Result<(), HttpError> {
        self.send_in_flight = false;
        self.flush(poller)
    }

    fn flush(&mut self, poller: &mut Poller) -> Result<(), HttpError> {
        while !self.send_in_flight && !self.tcp.is_closing() {
            let piece = match self.outgoing.front_mut() {
                None => break,
                Some(OutPiece::Buffer(_)) => match self.outgoing.pop_front() {
                    Some(OutPiece::Buffer(buf)) => buf,
                    _ => unreachable!(),
                },
                Some(OutPiece::Body(body)) => {
                    let piece = body.read(self.block)?;
                    if piece.is_empty() {
                        self.outgoing.pop_front();
                        continue;
                    }
                    piece
                }
            };
            self.tcp.start_send(poller, piece)?;
            self.send_in_flight = true;
        }
        if self.close_requested && self.drained() {
            self.tcp.close(poller);
        }
        Ok(())
    }

    fn drained(&self) -> bool {
        self.outgoing.is_empty() && !self.send_in_flight
    }

    /// Request a close once every queued message has gone out. An EOF
    /// from the peer makes the close immediate.
    pub fn close(&mut self, poller: &mut Poller) {
        if self.drained() || self.tcp.eof() {
            self.tcp.close(poller);
        } else {
            self.close_requested = true;
        }
    }

    pub fn is_closing(&self) -> bool {
        self.tcp.is_closing() || self.close_requested
    }
}
