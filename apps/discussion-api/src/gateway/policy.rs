//! Liveness, size and back-pressure limits for gateway connections.

use std::time::Duration;

/// Per-connection outbound queue depth. A member whose queue is full when a
/// broadcast arrives is evicted.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Deadline for a single transport write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// How long the read side waits for any frame (including pongs).
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Largest accepted inbound frame, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Floor for the transport's own message limit. Frames between
/// `max_message_size` and this limit reach the reader, which closes with
/// 1009; anything larger is a transport error.
pub const TRANSPORT_MESSAGE_LIMIT: usize = 64 * 1024;

/// Smallest ping period the writer's interval accepts.
const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub outbound_capacity: usize,
    pub write_wait: Duration,
    pub pong_wait: Duration,
    /// Always shorter than `pong_wait`, so a healthy peer's pong lands
    /// before the read deadline.
    pub ping_period: Duration,
    pub max_message_size: usize,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            outbound_capacity: OUTBOUND_CAPACITY,
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: ping_period_for(PONG_WAIT),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl DeliveryPolicy {
    /// Replace the read deadline and derive the matching ping period.
    pub fn with_pong_wait(self, pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: ping_period_for(pong_wait),
            ..self
        }
    }

    /// Message limit handed to the WebSocket transport.
    pub fn transport_message_limit(&self) -> usize {
        self.max_message_size.max(TRANSPORT_MESSAGE_LIMIT)
    }
}

/// Nine tenths of the read deadline, never zero.
pub fn ping_period_for(pong_wait: Duration) -> Duration {
    (pong_wait * 9 / 10).max(MIN_PING_PERIOD)
}
