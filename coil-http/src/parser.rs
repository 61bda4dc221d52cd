//! Incremental HTTP/1.x message parser.
//!
//! A pull parser: the owner pushes raw bytes in and drains events out.
//! After `EndOfHeaders` the parser stalls until the caller arms the
//! body framing with [`HttpParser::begin_body`], since only the caller
//! knows the request context that decides how the body is delimited.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use memchr::memchr;

use crate::error::HttpError;
use crate::message::HttpMessage;

/// How the body of a message is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body.
    Empty,
    /// Exactly this many bytes.
    Bounded(u64),
    /// Everything until the connection closes.
    Unbounded,
    /// Chunked transfer encoding.
    Chunked,
}

/// A parsed protocol element.
#[derive(Debug, PartialEq, Eq)]
pub enum HttpEvent {
    /// The start line, split at whitespace into its three fields.
    FirstLine {
        first: String,
        second: String,
        third: String,
    },
    /// One header. Keys are lowercased, values trimmed.
    Header { key: String, value: String },
    /// The blank line ending the header section. The caller must call
    /// [`HttpParser::begin_body`] before more events are produced.
    EndOfHeaders,
    /// A piece of the body.
    BodyPiece(Bytes),
    /// The body is complete; the parser is back at the start line.
    EndOfBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FirstLine,
    Header,
    Bounded,
    Unbounded,
    Chunk,
    ChunkLength,
    ChunkEnd,
    Trailer,
    Error,
}

pub struct HttpParser {
    buf: BytesMut,
    /// Bytes already scanned for a newline, so repeated pushes do not
    /// rescan the same prefix.
    scanned: usize,
    state: State,
    left: u64,
    pending: VecDeque<HttpEvent>,
    awaiting_framing: bool,
    max_line: usize,
    unbounded_refill: u64,
}

impl HttpParser {
    pub fn new(max_line: usize, unbounded_refill: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            state: State::FirstLine,
            left: 0,
            pending: VecDeque::new(),
            awaiting_framing: false,
            max_line,
            unbounded_refill: unbounded_refill as u64,
        }
    }

    /// Feed raw bytes into the parser.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether the parser stalled after `EndOfHeaders`, waiting for the
    /// body framing decision.
    pub fn awaiting_framing(&self) -> bool {
        self.awaiting_framing
    }

    /// Arm the body framing after `EndOfHeaders`.
    pub fn begin_body(&mut self, framing: Framing) {
        self.awaiting_framing = false;
        match framing {
            Framing::Empty | Framing::Bounded(0) => {
                self.state = State::FirstLine;
                self.pending.push_back(HttpEvent::EndOfBody);
            }
            Framing::Bounded(n) => {
                self.state = State::Bounded;
                self.left = n;
            }
            Framing::Unbounded => {
                self.state = State::Unbounded;
                self.left = self.unbounded_refill;
            }
            Framing::Chunked => {
                self.state = State::ChunkLength;
                self.left = 0;
            }
        }
    }

    /// Mark the parser poisoned; no further events are produced.
    pub fn poison(&mut self) {
        self.state = State::Error;
    }

    /// End-of-file notification. For a body delimited by connection
    /// close this completes the body.
    pub fn finish_at_eof(&mut self) -> Option<HttpEvent> {
        if self.state == State::Unbounded {
            self.state = State::FirstLine;
            Some(HttpEvent::EndOfBody)
        } else {
            None
        }
    }

    /// Pull the next event, or `None` when more input (or a framing
    /// decision) is needed.
    pub fn next(&mut self) -> Result<Option<HttpEvent>, HttpError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if !self.step()? {
                return Ok(None);
            }
        }
    }

    /// One state-machine step. Returns false when stalled on input.
    fn step(&mut self) -> Result<bool, HttpError> {
        if self.awaiting_framing {
            return Ok(false);
        }
        match self.state {
            State::Error => Err(HttpError::Poisoned),
            State::Bounded | State::Unbounded | State::Chunk => self.step_piece(),
            State::FirstLine
            | State::Header
            | State::ChunkLength
            | State::ChunkEnd
            | State::Trailer => self.step_line(),
        }
    }

    fn step_piece(&mut self) -> Result<bool, HttpError> {
        if self.buf.is_empty() {
            return Ok(false);
        }
        let count = (self.left.min(self.buf.len() as u64)) as usize;
        let piece = self.buf.split_to(count).freeze();
        self.left -= count as u64;
        self.pending.push_back(HttpEvent::BodyPiece(piece));
        match self.state {
            State::Bounded => {
                if self.left == 0 {
                    self.state = State::FirstLine;
                    self.pending.push_back(HttpEvent::EndOfBody);
                }
            }
            State::Unbounded => self.left = self.unbounded_refill,
            State::Chunk => {
                if self.left == 0 {
                    self.state = State::ChunkEnd;
                }
            }
            _ => unreachable!(),
        }
        Ok(true)
    }

    fn step_line(&mut self) -> Result<bool, HttpError> {
        let index = match memchr(b'\n', &self.buf[self.scanned..]) {
            Some(offset) => self.scanned + offset,
            None => {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_line {
                    self.state = State::Error;
                    return Err(HttpError::LineTooLong);
                }
                return Ok(false);
            }
        };
        let raw = self.buf.split_to(index + 1);
        self.scanned = 0;
        // Header lines are latin-1 on the wire.
        let line: String = raw.iter().map(|&byte| byte as char).collect();
        self.got_line(&line).inspect_err(|_| self.state = State::Error)?;
        Ok(true)
    }

    fn got_line(&mut self, line: &str) -> Result<(), HttpError> {
        match self.state {
            State::FirstLine => {
                let trimmed = line.trim();
                let (first, rest) = trimmed
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| HttpError::InvalidFirstLine(trimmed.to_string()))?;
                let rest = rest.trim_start();
                let (second, third) = rest
                    .split_once(char::is_whitespace)
                    .map(|(second, third)| (second, third.trim_start()))
                    .ok_or_else(|| HttpError::InvalidFirstLine(trimmed.to_string()))?;
                self.pending.push_back(HttpEvent::FirstLine {
                    first: first.to_string(),
                    second: second.to_string(),
                    third: third.to_string(),
                });
                self.state = State::Header;
                Ok(())
            }
            State::Header => {
                if line.starts_with(' ') || line.starts_with('\t') {
                    return Err(HttpError::ContinuationHeader);
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    self.pending.push_back(HttpEvent::EndOfHeaders);
                    self.awaiting_framing = true;
                    return Ok(());
                }
                let (key, value) = trimmed
                    .split_once(':')
                    .ok_or_else(|| HttpError::InvalidHeader(trimmed.to_string()))?;
                self.pending.push_back(HttpEvent::Header {
                    key: key.trim().to_ascii_lowercase(),
                    value: value.trim().to_string(),
                });
                Ok(())
            }
            State::ChunkLength => {
                let token = line
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| HttpError::InvalidChunkLength(line.trim().to_string()))?;
                let length = u64::from_str_radix(token, 16)
                    .map_err(|_| HttpError::InvalidChunkLength(token.to_string()))?;
                if length == 0 {
                    self.state = State::Trailer;
                } else {
                    self.left = length;
                    self.state = State::Chunk;
                }
                Ok(())
            }
            State::ChunkEnd => {
                if !line.trim().is_empty() {
                    return Err(HttpError::InvalidChunkEnd);
                }
                self.state = State::ChunkLength;
                Ok(())
            }
            State::Trailer => {
                if line.trim().is_empty() {
                    self.state = State::FirstLine;
                    self.pending.push_back(HttpEvent::EndOfBody);
                }
                // Trailers themselves are ignored.
                Ok(())
            }
            _ => Err(HttpError::Protocol("not expecting a line".to_string())),
        }
    }
}

/// Decide the body framing of an incoming message.
///
/// For a response, `request` is the request it answers: responses to
/// HEAD and 1xx/204/304 responses have no body, and a response without
/// explicit length runs until the connection closes. For a request
/// (`response` is `None`) the default is no body.
pub fn body_framing(
    request: &HttpMessage,
    response: Option<&HttpMessage>,
) -> Result<Framing, HttpError> {
    let message = response.unwrap_or(request);

    if let Some(response) = response {
        if request.method == "HEAD" || matches!(response.status, 100..=199 | 204 | 304) {
            return Ok(Framing::Empty);
        }
    }
    if message
        .headers
        .get("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
    {
        return Ok(Framing::Chunked);
    }
    if let Some(value) = message.headers.get("content-length") {
        let length: u64 = value
            .trim()
            .parse()
            .map_err(|_| HttpError::Protocol(format!("invalid content-length: {value:?}")))?;
        return Ok(if length == 0 {
            Framing::Empty
        } else {
            Framing::Bounded(length)
        });
    }
    Ok(if response.is_some() {
        Framing::Unbounded
    } else {
        Framing::Empty
    })
}
