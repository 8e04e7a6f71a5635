//! Polling for stop signals (e.g. `SIGINT`, `SIGTERM`). Once [enable]d, the
//! first stop signal no longer kills the process, it just makes [received]
//! return `true`. A second one before [clear] is called exits right away.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use signal_hook::{SigId, consts, flag, low_level};

/// Enables stop signal polling. Does nothing if it's already enabled. Also see
/// [disable].
pub fn enable() -> Result<(), io::Error> {
    let mut sig_ids = lock_sig_ids();
    if !sig_ids.is_empty() {
        return Ok(());
    }

    let mut registered = Vec::with_capacity(consts::TERM_SIGNALS.len() * 2);
    let result = consts::TERM_SIGNALS.iter().try_for_each(|&signal| -> io::Result<()> {
        // Registered first so it sees the flag from before this signal.
        registered.push(flag::register_conditional_shutdown(
            signal,
            1,
            RECEIVED.clone(),
        )?);
        registered.push(flag::register(signal, RECEIVED.clone())?);
        Ok(())
    });

    if let Err(e) = result {
        crate::debug_log_error!("Failed to register a stop signal handler: {e}");
        for sig_id in registered {
            low_level::unregister(sig_id);
        }
        return Err(e);
    }

    *sig_ids = registered;
    Ok(())
}

/// Restores the default stop signal handling if polling is enabled. A signal
/// that was already received stays [received].
pub fn disable() {
    for sig_id in lock_sig_ids().drain(..) {
        low_level::unregister(sig_id);
    }
}

pub fn is_enabled() -> bool {
    !lock_sig_ids().is_empty()
}

/// Whether a stop signal has arrived since polling was enabled (or since the
/// last [clear]).
pub fn received() -> bool {
    RECEIVED.load(Ordering::SeqCst)
}

/// Forget any received stop signal.
pub fn clear() {
    RECEIVED.store(false, Ordering::SeqCst);
}

fn lock_sig_ids() -> std::sync::MutexGuard<'static, Vec<SigId>> {
    SIG_IDS.lock().unwrap_or_else(PoisonError::into_inner)
}

static RECEIVED: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

static SIG_IDS: Mutex<Vec<SigId>> = Mutex::new(Vec::new());

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn a_stop_signal_is_observed_instead_of_exiting() {
        enable().unwrap();
        enable().unwrap();
        assert!(is_enabled());

        clear();
        low_level::raise(consts::SIGTERM).unwrap();
        assert!(received());

        clear();
        assert!(!received());

        disable();
        assert!(!is_enabled());
    }
}
