// ===============================
// src/memory.rs
// ===============================
//
// Rolling state carried between invocations. The trader gets the previous blob
// back verbatim every timestep, decodes it into TraderMemory, appends to the
// windows and encodes it again on the way out.
//
// Blob layout (JSON):
//   { "version": 1, "checksum": "<sha256 hex of payload>", "payload": "<TraderMemory json>" }
//
// Anything that does not decode cleanly (empty, bad json, wrong version,
// checksum mismatch) is treated as "start from scratch".
//
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::MEMORY_RESETS;

pub const SCHEMA_VERSION: u32 = 1;

/// Fixed-capacity FIFO window, oldest value evicted first.
/// Invariant: `1 <= cap` and `values.len() <= cap`, also for decoded windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredWindow")]
pub struct RollingWindow {
    cap: usize,
    values: VecDeque<f64>,
}

#[derive(Deserialize)]
struct StoredWindow {
    cap: usize,
    values: VecDeque<f64>,
}

impl TryFrom<StoredWindow> for RollingWindow {
    type Error = String;

    fn try_from(w: StoredWindow) -> Result<Self, Self::Error> {
        if w.cap == 0 {
            return Err("rolling window with zero capacity".to_string());
        }
        if w.values.len() > w.cap {
            return Err(format!("rolling window holds {} values, capacity {}", w.values.len(), w.cap));
        }
        Ok(Self { cap: w.cap, values: w.values })
    }
}

impl RollingWindow {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), values: VecDeque::with_capacity(cap.max(1)) }
    }

    pub fn push(&mut self, v: f64) {
        while self.values.len() >= self.cap {
            self.values.pop_front();
        }
        self.values.push_back(v);
    }

    /// Shrinks or grows the capacity; shrinking drops the oldest values.
    pub fn set_capacity(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.values.len() > self.cap {
            self.values.pop_front();
        }
    }

    pub fn capacity(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// The most recent `n` values, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &f64> + Clone {
        let skip = self.values.len().saturating_sub(n);
        self.values.iter().skip(skip)
    }
}

/// Per-product history used by the fair-value estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMemory {
    pub mids: RollingWindow,
    pub spreads: RollingWindow,
    #[serde(default)]
    pub factors: BTreeMap<String, RollingWindow>,
}

impl ProductMemory {
    pub fn new(cap: usize) -> Self {
        Self { mids: RollingWindow::new(cap), spreads: RollingWindow::new(cap), factors: BTreeMap::new() }
    }

    pub fn record_book(&mut self, mid: f64, spread: i64) {
        self.mids.push(mid);
        self.spreads.push(spread as f64);
    }

    pub fn record_factor(&mut self, name: &str, value: f64) {
        let cap = self.mids.capacity();
        self.factors
            .entry(name.to_string())
            .or_insert_with(|| RollingWindow::new(cap))
            .push(value);
    }

    pub fn factor(&self, name: &str) -> Option<&RollingWindow> { self.factors.get(name) }

    fn set_capacity(&mut self, cap: usize) {
        self.mids.set_capacity(cap);
        self.spreads.set_capacity(cap);
        for w in self.factors.values_mut() {
            w.set_capacity(cap);
        }
    }
}

/// Composite price series and its synthetic replica, sampled in lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPair {
    pub composite: RollingWindow,
    pub synthetic: RollingWindow,
}

impl SeriesPair {
    pub fn new(cap: usize) -> Self {
        Self { composite: RollingWindow::new(cap), synthetic: RollingWindow::new(cap) }
    }

    pub fn push(&mut self, composite: f64, synthetic: f64) {
        self.composite.push(composite);
        self.synthetic.push(synthetic);
    }

    pub fn len(&self) -> usize { self.composite.len().min(self.synthetic.len()) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraderMemory {
    #[serde(default)]
    pub products: BTreeMap<String, ProductMemory>,
    #[serde(default)]
    pub composites: BTreeMap<String, SeriesPair>,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("empty memory blob")]
    Empty,
    #[error("memory blob is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("memory schema version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },
    #[error("memory checksum mismatch")]
    Checksum,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    payload: String,
}

fn digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

impl TraderMemory {
    /// History for `symbol`, created empty on first use. Every window of an
    /// existing entry is resized to `cap` so a config change never leaves an
    /// oversized (or mismatched) window behind.
    pub fn product_mut(&mut self, symbol: &str, cap: usize) -> &mut ProductMemory {
        let pm = self
            .products
            .entry(symbol.to_string())
            .or_insert_with(|| ProductMemory::new(cap));
        pm.set_capacity(cap);
        pm
    }

    pub fn series_mut(&mut self, name: &str, cap: usize) -> &mut SeriesPair {
        let sp = self
            .composites
            .entry(name.to_string())
            .or_insert_with(|| SeriesPair::new(cap));
        sp.composite.set_capacity(cap);
        sp.synthetic.set_capacity(cap);
        sp
    }

    pub fn encode(&self) -> Result<String, MemoryError> {
        let payload = serde_json::to_string(self)?;
        let env = Envelope { version: SCHEMA_VERSION, checksum: digest(&payload), payload };
        Ok(serde_json::to_string(&env)?)
    }

    pub fn decode(blob: &str) -> Result<Self, MemoryError> {
        if blob.trim().is_empty() {
            return Err(MemoryError::Empty);
        }
        let env: Envelope = serde_json::from_str(blob)?;
        if env.version != SCHEMA_VERSION {
            return Err(MemoryError::Version { found: env.version, expected: SCHEMA_VERSION });
        }
        if digest(&env.payload) != env.checksum {
            return Err(MemoryError::Checksum);
        }
        Ok(serde_json::from_str(&env.payload)?)
    }

    /// Wraps an already serialized payload in a valid envelope.
    #[cfg(test)]
    pub(crate) fn seal(payload: &str) -> String {
        let env = Envelope { version: SCHEMA_VERSION, checksum: digest(payload), payload: payload.to_string() };
        serde_json::to_string(&env).unwrap()
    }

    /// Decode, falling back to empty memory on any failure.
    pub fn decode_or_default(blob: &str) -> Self {
        match Self::decode(blob) {
            Ok(m) => m,
            Err(MemoryError::Empty) => {
                debug!("no previous memory, starting empty");
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable memory blob");
                MEMORY_RESETS.inc();
                Self::default()
            }
        }
    }
}
