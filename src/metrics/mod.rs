//! Validator Metrics
//!
//! Prometheus counters describing how lookups were answered and how the
//! authoritative store failed.
//!
//! | Metric | Labels |
//! |--------|--------|
//! | `userdb_lookups_total` | `op`, `source` (`cache`/`storage`/`none`), `outcome` (`found`/`not_found`) |
//! | `userdb_storage_errors_total` | `op`, `kind` |
//! | `userdb_writes_total` | `op`, `outcome` (`ok`/`error`) |
//!
//! Counters are created unregistered; call [`ValidatorMetrics::register`] to
//! expose them through a [`Registry`].

use prometheus::{IntCounterVec, Opts, Registry};

use crate::error::{ErrorKind, Result};

/// Where a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Storage,
    None,
}

impl LookupSource {
    fn as_str(&self) -> &'static str {
        match self {
            LookupSource::Cache => "cache",
            LookupSource::Storage => "storage",
            LookupSource::None => "none",
        }
    }
}

/// Counters owned by a validator
#[derive(Clone)]
pub struct ValidatorMetrics {
    lookups: IntCounterVec,
    storage_errors: IntCounterVec,
    writes: IntCounterVec,
}

impl ValidatorMetrics {
    /// Create unregistered counters
    pub fn new() -> Result<Self> {
        let lookups = IntCounterVec::new(
            Opts::new("userdb_lookups_total", "User lookups by source and outcome"),
            &["op", "source", "outcome"],
        )?;
        let storage_errors = IntCounterVec::new(
            Opts::new(
                "userdb_storage_errors_total",
                "Storage failures observed by the validator",
            ),
            &["op", "kind"],
        )?;
        let writes = IntCounterVec::new(
            Opts::new("userdb_writes_total", "User writes by outcome"),
            &["op", "outcome"],
        )?;

        Ok(Self {
            lookups,
            storage_errors,
            writes,
        })
    }

    /// Register all counters with `registry`
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.lookups.clone()))?;
        registry.register(Box::new(self.storage_errors.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        Ok(())
    }

    pub fn record_lookup(&self, op: &str, source: LookupSource, found: bool) {
        let outcome = if found { "found" } else { "not_found" };
        self.lookups
            .with_label_values(&[op, source.as_str(), outcome])
            .inc();
    }

    pub fn record_storage_error(&self, op: &str, kind: ErrorKind) {
        self.storage_errors
            .with_label_values(&[op, kind.as_str()])
            .inc();
    }

    pub fn record_write(&self, op: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.writes.with_label_values(&[op, outcome]).inc();
    }

    pub fn lookup_count(&self, op: &str, source: LookupSource, found: bool) -> u64 {
        let outcome = if found { "found" } else { "not_found" };
        self.lookups
            .with_label_values(&[op, source.as_str(), outcome])
            .get()
    }

    pub fn storage_error_count(&self, op: &str, kind: ErrorKind) -> u64 {
        self.storage_errors
            .with_label_values(&[op, kind.as_str()])
            .get()
    }
}

impl std::fmt::Debug for ValidatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorMetrics").finish_non_exhaustive()
    }
}

/// Render every metric in `registry` in the Prometheus text format
pub fn encode_text(registry: &Registry) -> Result<String> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::error::Error::Internal(e.to_string()))
}
