/// Maximum accepted length of a start line or header line.
pub const DEFAULT_MAX_LINE: usize = 1 << 15;

/// Messages whose total length is known and at most this many bytes
/// are coalesced into one send. A small enough message fits a single
/// L2 packet.
pub const DEFAULT_SMALL_MESSAGE: u64 = 8000;

/// Read size for streamed bodies.
pub const DEFAULT_BLOCK: usize = 1 << 18;

/// Configuration for an HTTP channel, on top of the reactor
/// [`coil::Config`].
#[derive(Clone)]
pub struct HttpConfig {
    /// Reactor and stream settings.
    pub reactor: coil::Config,
    /// Line-length cap for start lines and headers.
    pub max_line: usize,
    /// Coalescing threshold for outgoing messages.
    pub small_message: u64,
    /// Per-read block size for streamed bodies.
    pub block: usize,
    /// Maximum outstanding pipelined requests on a client channel.
    pub max_pipeline: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            reactor: coil::Config::default(),
            max_line: DEFAULT_MAX_LINE,
            small_message: DEFAULT_SMALL_MESSAGE,
            block: DEFAULT_BLOCK,
            max_pipeline: 128,
        }
    }
}
