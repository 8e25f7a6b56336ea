//! Relay configuration

use std::time::Duration;

use crate::frame::DEFAULT_MAX_LINE_BYTES;

/// Relay configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Longest frame accepted from a client, excluding the terminator
    pub max_line_bytes: usize,

    /// Per-subscriber write deadline during broadcast (None = wait forever)
    pub write_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            write_timeout: None,
        }
    }
}

impl RelayConfig {
    /// Set the frame size limit
    pub fn max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// Set the broadcast write deadline
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}
