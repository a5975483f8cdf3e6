//! Monotonic sequence key generation

use super::SequenceKey;
use chrono::Utc;
use rand::Rng;
use std::sync::{Mutex, PoisonError};

/// Largest value of the 80-bit random component
const MAX_RANDOM: u128 = (1 << 80) - 1;

/// Fresh randomness is drawn below this bound, leaving headroom for
/// same-millisecond increments.
const FRESH_RANDOM_BOUND: u128 = 1 << 79;

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Default)]
struct GeneratorState {
    last_ms: u64,
    last_random: u128,
    issued: bool,
}

/// Issues strictly increasing [`SequenceKey`]s.
///
/// Keys embed the wall clock millisecond. Within one millisecond, or if the
/// clock steps backwards, the random component of the previous key is
/// incremented instead, so every key is greater than all keys issued before
/// it by this generator.
pub struct SequenceKeyGenerator {
    clock: Clock,
    state: Mutex<GeneratorState>,
}

impl SequenceKeyGenerator {
    pub fn new() -> Self {
        Self::with_clock(|| Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Generator driven by a custom millisecond clock
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        Self {
            clock: Box::new(clock),
            state: Mutex::new(GeneratorState::default()),
        }
    }

    pub fn next_key(&self) -> SequenceKey {
        let now = (self.clock)();
        // The state is always left consistent, so a poisoned lock is still usable.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let (ms, random) = if !state.issued || now > state.last_ms {
            (now, fresh_random())
        } else if state.last_random < MAX_RANDOM {
            (state.last_ms, state.last_random + 1)
        } else {
            (state.last_ms + 1, fresh_random())
        };

        state.last_ms = ms;
        state.last_random = random;
        state.issued = true;
        SequenceKey::from_parts(ms, random)
    }
}

impl Default for SequenceKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequenceKeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceKeyGenerator").finish_non_exhaustive()
    }
}

fn fresh_random() -> u128 {
    rand::thread_rng().gen_range(0..FRESH_RANDOM_BOUND)
}
