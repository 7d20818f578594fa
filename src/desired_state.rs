//! Operator-requested sensor configuration and its reconciliation flags.
//!
//! The store is the only state shared between the operator side and the
//! control loop. Every operation runs inside one critical section covering
//! both the desired values and their dirty flags, so no torn state is ever
//! observable.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Configuration the operator wants the sensor to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub power_enabled: bool,
    pub continuous_mode: bool,
}

impl Default for DesiredState {
    /// Sensor powered and measuring continuously, as forced on startup.
    fn default() -> Self {
        Self {
            power_enabled: true,
            continuous_mode: true,
        }
    }
}

/// Fields whose last applied value is not yet confirmed by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingFlags {
    pub power_dirty: bool,
    pub mode_dirty: bool,
}

/// Reconcilable configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Power,
    Mode,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Power => "power state",
            Field::Mode => "measurement mode",
        }
    }
}

/// A value waiting to be applied, tagged with the request generation it
/// came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange {
    pub value: bool,
    pub generation: u64,
}

/// Result of [`DesiredStateStore::take_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    pub power: Option<PendingChange>,
    pub mode: Option<PendingChange>,
}

impl Pending {
    pub fn is_empty(&self) -> bool {
        self.power.is_none() && self.mode.is_none()
    }
}

#[derive(Debug)]
struct Inner {
    desired: DesiredState,
    flags: PendingFlags,
    // Bumped on every request; mark_applied only clears a flag whose
    // generation is unchanged since the take_pending read.
    power_generation: u64,
    mode_generation: u64,
}

/// Mutex-guarded desired state plus dirty flags.
///
/// # Example
///
/// ```
/// use jdtsd::desired_state::{DesiredState, DesiredStateStore, Field};
///
/// let store = DesiredStateStore::new(DesiredState::default());
/// store.request_power(false);
///
/// let pending = store.take_pending();
/// let power = pending.power.unwrap();
/// assert!(!power.value);
///
/// // Device acknowledged the change
/// assert!(store.mark_applied(Field::Power, power.generation));
/// assert!(!store.flags().power_dirty);
/// ```
#[derive(Debug)]
pub struct DesiredStateStore {
    inner: Mutex<Inner>,
}

impl DesiredStateStore {
    /// Creates a store with both fields dirty, so the initial state is
    /// asserted on the device by the first loop iteration.
    pub fn new(initial: DesiredState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                desired: initial,
                flags: PendingFlags {
                    power_dirty: true,
                    mode_dirty: true,
                },
                power_generation: 1,
                mode_generation: 1,
            }),
        }
    }

    /// Requests a power state. Marks power dirty even if the value is unchanged.
    pub fn request_power(&self, enabled: bool) {
        let mut inner = self.lock();
        inner.desired.power_enabled = enabled;
        inner.flags.power_dirty = true;
        inner.power_generation += 1;
    }

    /// Requests a measurement mode. Marks mode dirty even if the value is unchanged.
    pub fn request_mode(&self, continuous: bool) {
        let mut inner = self.lock();
        inner.desired.continuous_mode = continuous;
        inner.flags.mode_dirty = true;
        inner.mode_generation += 1;
    }

    /// Returns the desired value of every dirty field. Flags stay set.
    pub fn take_pending(&self) -> Pending {
        let inner = self.lock();
        Pending {
            power: inner.flags.power_dirty.then_some(PendingChange {
                value: inner.desired.power_enabled,
                generation: inner.power_generation,
            }),
            mode: inner.flags.mode_dirty.then_some(PendingChange {
                value: inner.desired.continuous_mode,
                generation: inner.mode_generation,
            }),
        }
    }

    /// Clears the dirty flag of `field` if no request arrived since the
    /// `take_pending` read that produced `generation`.
    ///
    /// Returns whether the flag was cleared.
    pub fn mark_applied(&self, field: Field, generation: u64) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let (current, dirty) = match field {
            Field::Power => (inner.power_generation, &mut inner.flags.power_dirty),
            Field::Mode => (inner.mode_generation, &mut inner.flags.mode_dirty),
        };
        if current != generation {
            return false;
        }
        *dirty = false;
        true
    }

    /// Consistent copy of desired values and flags.
    pub fn snapshot(&self) -> (DesiredState, PendingFlags) {
        let inner = self.lock();
        (inner.desired, inner.flags)
    }

    pub fn desired(&self) -> DesiredState {
        self.snapshot().0
    }

    pub fn flags(&self) -> PendingFlags {
        self.snapshot().1
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Plain flags: a panic elsewhere cannot leave them half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DesiredStateStore {
    fn default() -> Self {
        Self::new(DesiredState::default())
    }
}
