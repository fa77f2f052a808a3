use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

/// Genesis timestamp of the Gnosis beacon chain.
pub const GNOSIS_GENESIS_TIME: u64 = 1_638_993_340;
/// Slot length on Gnosis and Chiado.
pub const GNOSIS_SECONDS_PER_SLOT: u64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("timestamp {timestamp} precedes genesis {genesis_time}")]
    BeforeGenesis { timestamp: u64, genesis_time: u64 },
    #[error("timestamp {timestamp} is not aligned to a slot boundary")]
    Misaligned { timestamp: u64 },
}

/// Maps block timestamps to slot numbers.
pub trait SlotComputer: Send + Sync {
    fn slot_at(&self, timestamp: u64) -> Result<u64, SlotError>;
}

/// Fixed-length slots counted from a genesis timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotClock {
    pub genesis_time: u64,
    pub seconds_per_slot: u64,
}

impl Default for SlotClock {
    fn default() -> Self {
        Self {
            genesis_time: GNOSIS_GENESIS_TIME,
            seconds_per_slot: GNOSIS_SECONDS_PER_SLOT,
        }
    }
}

impl SlotComputer for SlotClock {
    fn slot_at(&self, timestamp: u64) -> Result<u64, SlotError> {
        let since_genesis =
            timestamp
                .checked_sub(self.genesis_time)
                .ok_or(SlotError::BeforeGenesis {
                    timestamp,
                    genesis_time: self.genesis_time,
                })?;
        if since_genesis % self.seconds_per_slot != 0 {
            return Err(SlotError::Misaligned { timestamp });
        }
        Ok(since_genesis / self.seconds_per_slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_counts_from_genesis() {
        let clock = SlotClock {
            genesis_time: 1_000,
            seconds_per_slot: 5,
        };
        assert_eq!(clock.slot_at(1_000), Ok(0));
        assert_eq!(clock.slot_at(1_050), Ok(10));
    }

    #[test]
    fn misaligned_timestamp_is_rejected() {
        let clock = SlotClock {
            genesis_time: 1_000,
            seconds_per_slot: 5,
        };
        assert_eq!(
            clock.slot_at(1_052),
            Err(SlotError::Misaligned { timestamp: 1_052 })
        );
    }

    #[test]
    fn timestamp_before_genesis_is_rejected() {
        let clock = SlotClock::default();
        assert!(matches!(
            clock.slot_at(GNOSIS_GENESIS_TIME - 5),
            Err(SlotError::BeforeGenesis { .. })
        ));
    }
}
