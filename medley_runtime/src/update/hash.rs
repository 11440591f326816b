//! Perfect-hash mtbl resolution.
//!
//! Methods that cannot rely on the stolen deallocator slot resolve a class's
//! mtbl through a multiplicative hash of the class token:
//! `(mult * token) >> (64 - M)`. The update pass searches for an odd
//! multiplier that is injective over every participating token, growing the
//! table (`room` sweep) when a tight one cannot be found. Lookup is then two
//! dependent loads and a multiply, independent of class count.

use medley_core::error::UpdateError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Search Parameters
// =============================================================================

/// Tuning knobs of the multiplier search.
///
/// The defaults match the engine's tested envelope; they exist as data so a
/// host embedding the engine can trade table size against search time.
#[derive(Debug, Clone)]
pub struct HashOptions {
    /// Multipliers drawn per table size before growing the table.
    pub max_attempts: usize,
    /// First table-size factor tried: the table holds `room * N / 2`
    /// entries.
    pub min_room: usize,
    /// Last table-size factor tried before the search fails.
    pub max_room: usize,
    /// Fixed RNG seed for reproducible searches; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            max_attempts: 100_000,
            min_room: 2,
            max_room: 6,
            seed: None,
        }
    }
}

// =============================================================================
// Hash Parameters
// =============================================================================

/// A found perfect hash: `(mult * token) >> shift` indexes a table of
/// `size` Words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HashInfo {
    pub(crate) mult: u64,
    pub(crate) shift: u32,
    pub(crate) size: usize,
}

/// Hash one class token with the published parameters.
#[inline]
pub(crate) fn hash_token(mult: u64, shift: u32, token: usize) -> usize {
    (mult.wrapping_mul(token as u64) >> shift) as usize
}

/// Search a multiplier injective over `tokens`.
pub(crate) fn find_hash(tokens: &[usize], options: &HashOptions) -> Result<HashInfo, UpdateError> {
    debug_assert!(!tokens.is_empty());
    debug_assert!(options.min_room >= 1 && options.min_room <= options.max_room);

    let n = tokens.len();
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut total_attempts = 0usize;

    for room in options.min_room..=options.max_room {
        let wanted = (room * n).div_ceil(2).max(2);
        let m: u32 = 64 - ((wanted - 1) as u64).leading_zeros();
        let size = 1usize << m;
        let shift = 64 - m;

        // Bucket stamps instead of a cleared bitmap per attempt.
        let mut stamps = vec![usize::MAX; size];
        for attempt in 0..options.max_attempts {
            total_attempts += 1;
            let mult = rng.gen::<u64>() | 1;
            let mut injective = true;
            for &token in tokens {
                let h = hash_token(mult, shift, token);
                if stamps[h] == attempt {
                    injective = false;
                    break;
                }
                stamps[h] = attempt;
            }
            if injective {
                tracing::debug!(
                    classes = n,
                    size,
                    attempts = total_attempts,
                    "perfect hash found"
                );
                return Ok(HashInfo { mult, shift, size });
            }
        }
    }
    Err(UpdateError::HashSearchFailed {
        classes: n,
        attempts: total_attempts,
    })
}
