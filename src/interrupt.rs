//! External interrupts.
//!
//! An [`Interrupt`] stops whichever run is currently armed on it, and marks the
//! whole batch as canceled so no further targets are started.
//! [`Interrupt::ctrlc`] connects it to ctrl-c: the first ctrl-c stops cleanly,
//! a second one exits immediately.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use crate::engine::{StopHandle, StopReason};
use crate::GoslingError;

lazy_static! {
    static ref CTRLC: Interrupt = Interrupt::new();
}
static CTRLC_HANDLER: Once = Once::new();

#[derive(Default)]
struct InterruptState {
    armed: Mutex<Option<StopHandle>>,
    canceled: AtomicBool,
}

/// A source of interrupts, shared by cloning.
#[derive(Clone, Default)]
pub struct Interrupt {
    state: Arc<InterruptState>,
}
impl Interrupt {
    /// An interrupt source that is only triggered by calling [`Interrupt::trigger`].
    pub fn new() -> Self {
        Interrupt::default()
    }

    /// The process-wide interrupt source triggered by ctrl-c.
    ///
    /// The signal handler is installed on the first call. Every call clears
    /// any earlier interrupt, so each batch starts uncanceled.
    pub fn ctrlc() -> Result<Self, GoslingError> {
        let mut installed = Ok(());
        CTRLC_HANDLER.call_once(|| {
            installed = ctrlc::set_handler(move || {
                // Determine if this is the first ctrl-c or an additional one.
                if CTRLC.is_canceled() {
                    warn!("caught another ctrl-c, exiting immediately...");
                    std::process::exit(1);
                } else {
                    warn!("caught ctrl-c, stopping...");
                    CTRLC.trigger();
                }
            });
        });
        installed.map_err(|e| GoslingError::Resource {
            detail: format!("failed to set ctrl-c handler: {}", e),
        })?;
        CTRLC.reset();
        Ok(CTRLC.clone())
    }

    /// Route interrupts to `stop` until the returned guard is dropped.
    ///
    /// If an interrupt was already received the run is stopped immediately.
    pub fn arm(&self, stop: StopHandle) -> ArmedInterrupt {
        // Armed before checking, so a concurrent trigger can't be missed.
        *self.lock_armed() = Some(stop.clone());
        if self.is_canceled() {
            stop.stop(StopReason::Interrupted);
        }
        ArmedInterrupt {
            interrupt: self.clone(),
        }
    }

    /// Cancel the batch and stop the armed run, if any. Returns `true` the
    /// first time.
    pub fn trigger(&self) -> bool {
        let first = !self.state.canceled.swap(true, Ordering::SeqCst);
        if let Some(stop) = self.lock_armed().as_ref() {
            stop.stop(StopReason::Interrupted);
        }
        first
    }

    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.state.canceled.store(false, Ordering::SeqCst);
    }

    fn lock_armed(&self) -> std::sync::MutexGuard<'_, Option<StopHandle>> {
        // A stop handle can't be left half-written, so a poisoned lock is still usable.
        self.state
            .armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Disarms the interrupt when dropped.
pub struct ArmedInterrupt {
    interrupt: Interrupt,
}
impl Drop for ArmedInterrupt {
    fn drop(&mut self) {
        *self.interrupt.lock_armed() = None;
    }
}
