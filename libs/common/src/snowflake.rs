use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 2025-01-01T00:00:00Z, in milliseconds since the Unix epoch.
const IQRAA_EPOCH_MS: u64 = 1_735_689_600_000;

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER: u16 = (1 << WORKER_BITS) - 1;

struct Clock {
    last_ms: u64,
    sequence: u64,
}

/// Time-ordered 64-bit id generator used for reply ids.
///
/// Bits, high to low: 42 bits of milliseconds since the Iqraa epoch, 10 bits
/// of worker id, 12 bits of per-millisecond sequence. Ids from one generator
/// are strictly increasing, so ordering by id equals ordering by creation.
pub struct SnowflakeGenerator {
    worker_id: u64,
    clock: Mutex<Clock>,
}

impl SnowflakeGenerator {
    /// Worker ids above 1023 are masked down to 10 bits.
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: u64::from(worker_id & MAX_WORKER),
            clock: Mutex::new(Clock {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> i64 {
        let mut clock = self
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // A clock that steps backwards keeps issuing from the last seen
        // millisecond instead of producing smaller ids.
        let mut now_ms = current_ms().max(clock.last_ms);

        if now_ms == clock.last_ms {
            clock.sequence = (clock.sequence + 1) & SEQUENCE_MASK;
            if clock.sequence == 0 {
                while now_ms <= clock.last_ms {
                    std::hint::spin_loop();
                    now_ms = current_ms();
                }
            }
        } else {
            clock.sequence = 0;
        }
        clock.last_ms = now_ms;

        let elapsed = now_ms.saturating_sub(IQRAA_EPOCH_MS);
        ((elapsed << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS) | clock.sequence)
            as i64
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(IQRAA_EPOCH_MS)
}

/// Creation time (ms since the Unix epoch) encoded in a snowflake id.
pub fn snowflake_timestamp_ms(id: i64) -> u64 {
    ((id as u64) >> (WORKER_BITS + SEQUENCE_BITS)) + IQRAA_EPOCH_MS
}
