use std::time::Duration;

use patchbay_wire::DEFAULT_MAX_BUFFER;

/// Knobs for outbound connections and request waits.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Bound on the TCP connect handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for a response to a sent request.
    pub response_timeout: Duration,
    /// Cap on buffered undecoded inbound bytes; pinned to at least 64 KiB.
    pub max_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }
}

/// Knobs for listening endpoints.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Cap on buffered undecoded inbound bytes per connection.
    pub max_buffer: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl EndpointConfig {
    pub fn max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }
}
