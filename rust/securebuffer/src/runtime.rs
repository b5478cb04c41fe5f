//! Process-wide, one-time setup of the native secure-memory facility.
//!
//! ## Lifecycle
//!
//! 1. Nothing happens at load time.
//! 2. The first call to [`init`] or [`init_with`] (made explicitly by the host,
//!    or lazily by [`GuardedAllocator::init`](crate::guarded::GuardedAllocator))
//!    runs the setup exactly once.
//! 3. The outcome is cached for the life of the process. Every later call
//!    returns it; a failed setup is never retried and there is no
//!    re-initialization.
//!
//! ## Setup steps
//!
//! - read the system page size;
//! - optionally set `RLIMIT_CORE` to zero so a crash cannot write locked pages
//!   to disk (failure is logged, not fatal);
//! - optionally run a self-check: map one page, lock it, write and verify a
//!   pattern, unlock and unmap it. Any failure here is fatal.

use crate::error::{Result, SecureBufferError};
use log::{debug, warn};
use once_cell::sync::OnceCell;

/// Options applied by the one-time setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Set the core dump size limit to zero.
    pub disable_core_dumps: bool,
    /// Exercise map/lock/unlock/unmap once before reporting success.
    pub self_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disable_core_dumps: true,
            self_check: true,
        }
    }
}

struct Outcome {
    config: Config,
    result: std::result::Result<(), String>,
}

static RUNTIME: OnceCell<Outcome> = OnceCell::new();

/// Initializes the facility with [`Config::default`].
pub fn init() -> Result<()> {
    init_with(Config::default())
}

/// Initializes the facility with `config`.
///
/// Only the first caller's config is applied. A later call with a different
/// config logs a warning and receives the cached outcome.
pub fn init_with(config: Config) -> Result<()> {
    let outcome = RUNTIME.get_or_init(|| {
        debug!("Initializing secure memory runtime with {:?}", config);
        Outcome {
            config,
            result: setup(&config),
        }
    });

    if outcome.config != config {
        warn!(
            "Secure memory runtime already initialized with {:?}; ignoring {:?}",
            outcome.config, config
        );
    }

    outcome
        .result
        .clone()
        .map_err(SecureBufferError::Initialization)
}

/// Returns true once a successful initialization has happened.
pub fn is_initialized() -> bool {
    matches!(RUNTIME.get(), Some(Outcome { result: Ok(()), .. }))
}

fn setup(config: &Config) -> std::result::Result<(), String> {
    let page = memcall::page_size();
    if page == 0 || !page.is_power_of_two() {
        return Err(format!("unusable page size {}", page));
    }

    if config.disable_core_dumps {
        if let Err(e) = memcall::disable_core_dumps() {
            warn!("Could not disable core dumps: {}", e);
        }
    }

    if config.self_check {
        self_check(page)?;
    }

    debug!("Secure memory runtime ready (page size {})", page);
    Ok(())
}

fn self_check(page: usize) -> std::result::Result<(), String> {
    let probe = memcall::alloc(page).map_err(|e| format!("self-check allocation failed: {}", e))?;

    let checked = exercise_probe(probe);
    let freed = memcall::free(probe).map_err(|e| format!("self-check release failed: {}", e));

    checked.and(freed)
}

fn exercise_probe(probe: &mut [u8]) -> std::result::Result<(), String> {
    #[cfg(not(feature = "no-mlock"))]
    memcall::lock(probe).map_err(|e| format!("self-check lock failed: {}", e))?;

    probe.fill(0xA5);
    let intact = probe.iter().all(|&b| b == 0xA5);
    probe.fill(0);

    #[cfg(not(feature = "no-mlock"))]
    memcall::unlock(probe).map_err(|e| format!("self-check unlock failed: {}", e))?;

    if intact {
        Ok(())
    } else {
        Err("self-check pattern mismatch".to_string())
    }
}
