//! Kernel cache
//!
//! Compiled kernels are cached per device context, keyed by the full
//! build fingerprint. A hit returns the existing kernel without touching
//! the driver's compiler. Concurrent requests for the same fingerprint
//! are funnelled through one builder: the losers block and receive the
//! winner's kernel, or the winner's failure. Failed builds leave no
//! entry behind, so a retry after fixing the source compiles again.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use manifold_backends::{BuildOptions, CompiledKernel, Mode};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Identity of a compiled-kernel artifact
///
/// Two build requests with equal fingerprints must yield the same
/// compiled kernel without rebuilding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    source: String,
    entry: String,
    defines: BTreeMap<String, String>,
    mode: Mode,
    device_id: u64,
}

impl Fingerprint {
    pub(crate) fn new(source: &str, entry: &str, options: &BuildOptions, mode: Mode, device_id: u64) -> Self {
        Self {
            source: source.to_string(),
            entry: entry.to_string(),
            defines: options.defines.clone(),
            mode,
            device_id,
        }
    }

    /// Short digest for log fields
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone)]
enum BuildOutcome {
    Built(Arc<CompiledKernel>),
    Failed(String),
}

type Slot = Arc<OnceLock<BuildOutcome>>;

/// Fingerprint-keyed cache with a single builder per fingerprint
pub(crate) struct KernelCache {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    builds: AtomicU64,
}

impl KernelCache {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            builds: AtomicU64::new(0),
        }
    }

    /// Number of compilations performed (misses), for cache-idempotence checks
    pub(crate) fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of cached kernels
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Return the cached kernel for `fingerprint`, building on a miss.
    ///
    /// At most one invocation of `build` runs per fingerprint at a time;
    /// concurrent callers for the same fingerprint block and share the
    /// result. A failure is handed to every caller of that round, then
    /// evicted.
    pub(crate) fn get_or_build<F>(&self, fingerprint: Fingerprint, build: F) -> Result<Arc<CompiledKernel>>
    where
        F: FnOnce() -> Result<Arc<CompiledKernel>>,
    {
        let slot = self.slots.lock().entry(fingerprint.clone()).or_default().clone();

        let outcome = slot.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            match build() {
                Ok(kernel) => BuildOutcome::Built(kernel),
                Err(Error::Build { diagnostic }) => BuildOutcome::Failed(diagnostic),
                Err(other) => BuildOutcome::Failed(other.to_string()),
            }
        });

        match outcome {
            BuildOutcome::Built(kernel) => Ok(Arc::clone(kernel)),
            BuildOutcome::Failed(diagnostic) => {
                let diagnostic = diagnostic.clone();
                // Evict the failed slot (unless a retry already replaced
                // it) so the next request re-attempts compilation.
                let mut slots = self.slots.lock();
                if let Some(existing) = slots.get(&fingerprint) {
                    if Arc::ptr_eq(existing, &slot) {
                        slots.remove(&fingerprint);
                    }
                }
                Err(Error::Build { diagnostic })
            }
        }
    }
}
