//! Session identifier generation and validation.
//!
//! Identifiers are 32 lowercase hexadecimal characters carrying 128 bits of
//! entropy. Generation draws from pooled CSPRNGs that are seeded (and
//! periodically reseeded) from an [`EntropySource`], so the operating system
//! is only consulted once per generator rather than once per identifier.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use tracing::trace;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// Length of a session identifier in characters.
pub const SESSION_ID_LEN: usize = 32;

/// Number of random bytes behind one identifier.
const ENTROPY_LEN: usize = SESSION_ID_LEN / 2;

/// Default number of identifiers drawn from one generator before it is reseeded.
pub const DEFAULT_RESEED_INTERVAL: u32 = 1 << 16;

/// Upper bound on idle generators kept in the pool.
const MAX_POOLED_GENERATORS: usize = 32;

static VALID_ID_CHARS: [bool; 256] = {
    let mut table = [false; 256];
    let mut i = 0;
    while i < table.len() {
        let c = i as u8;
        table[i] = c.is_ascii_digit() || (c >= b'a' && c <= b'f');
        i += 1;
    }
    table
};

/// Returns true if `id` is exactly 32 characters drawn from `[0-9a-f]`.
///
/// Anything else (wrong length, uppercase, non-hex) is rejected rather than
/// normalized.
pub fn is_valid_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() == SESSION_ID_LEN && bytes.iter().all(|&b| VALID_ID_CHARS[b as usize])
}

/// A cryptographically secure source of seed material.
///
/// Implementations must fail rather than hand back weak bytes.
pub trait EntropySource: Send + Sync {
    /// Fill `dest` entirely with secure random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// Entropy from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::Entropy(e.to_string()))
    }
}

struct PooledRng {
    rng: StdRng,
    remaining: u32,
}

/// Generates session identifiers from a pool of seeded CSPRNGs.
///
/// Safe to share between tasks; each call checks a generator out of the pool
/// and returns it afterwards.
pub struct IdGenerator {
    source: Arc<dyn EntropySource>,
    pool: Mutex<Vec<PooledRng>>,
    reseed_interval: u32,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("pooled", &self.pool.lock().len())
            .field("reseed_interval", &self.reseed_interval)
            .finish_non_exhaustive()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(OsEntropy)
    }
}

impl IdGenerator {
    /// Create a generator seeded from `source`.
    pub fn new(source: impl EntropySource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            pool: Mutex::new(Vec::new()),
            reseed_interval: DEFAULT_RESEED_INTERVAL,
        }
    }

    /// Set how many identifiers one generator may produce before reseeding.
    pub fn with_reseed_interval(mut self, interval: u32) -> Self {
        self.reseed_interval = interval.max(1);
        self
    }

    /// Generate a fresh identifier.
    ///
    /// Returns [`Error::Entropy`] if a generator has to be seeded and the
    /// entropy source fails.
    pub fn generate(&self) -> Result<String> {
        let mut pooled = match self.checkout() {
            Some(pooled) => pooled,
            None => self.seed()?,
        };

        let mut entropy = [0u8; ENTROPY_LEN];
        pooled.rng.fill_bytes(&mut entropy);
        pooled.remaining -= 1;
        self.checkin(pooled);

        let mut encoded = [0u8; SESSION_ID_LEN];
        let result = hex::encode_to_slice(entropy, &mut encoded)
            .map_err(|e| Error::Entropy(e.to_string()))
            .map(|()| encoded.iter().map(|&b| b as char).collect::<String>());

        entropy.zeroize();
        encoded.zeroize();
        result
    }

    fn checkout(&self) -> Option<PooledRng> {
        let mut pool = self.pool.lock();
        while let Some(pooled) = pool.pop() {
            if pooled.remaining > 0 {
                return Some(pooled);
            }
        }
        None
    }

    fn checkin(&self, pooled: PooledRng) {
        if pooled.remaining == 0 {
            return;
        }
        let mut pool = self.pool.lock();
        if pool.len() < MAX_POOLED_GENERATORS {
            pool.push(pooled);
        }
    }

    fn seed(&self) -> Result<PooledRng> {
        let mut seed = Zeroizing::new([0u8; 32]);
        self.source.fill(seed.as_mut())?;
        trace!("Seeded session id generator");
        Ok(PooledRng {
            rng: StdRng::from_seed(*seed),
            remaining: self.reseed_interval,
        })
    }
}
