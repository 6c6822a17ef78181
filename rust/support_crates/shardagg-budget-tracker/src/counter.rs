use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe tally that only grows, bounded by a fixed ceiling.
///
/// Multiple consumers may charge the tally concurrently. A charge that would push the
/// tally past the ceiling is rejected as a whole and leaves the tally unchanged.
pub struct Tally {
    value: AtomicU64,
    ceiling: u64,
}

impl Tally {
    /// Creates a new `Tally` starting at zero.
    ///
    /// # Arguments
    ///
    /// * `ceiling` - The maximum value the tally may reach.
    pub fn new(ceiling: u64) -> Tally {
        Tally {
            value: AtomicU64::new(0),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Attempts to add `amount` to the tally.
    ///
    /// Returns `Ok(new_value)` when the result stays within the ceiling. Otherwise the
    /// tally remains unchanged and `Err(attempted_value)` is returned, where
    /// `attempted_value` is the value the tally would have reached (saturated at
    /// `u64::MAX`).
    ///
    /// This operation uses atomic compare-and-exchange operations to ensure correctness when
    /// multiple threads are charging concurrently.
    pub fn charge(&self, amount: u64) -> Result<u64, u64> {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(amount);
            if next > self.ceiling {
                return Err(next);
            }
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(next),
                Err(updated) => current = updated,
            }
        }
    }

    /// Takes back a previously successful charge.
    ///
    /// Used to roll back a local charge when the parent tally rejects the same amount.
    pub fn refund(&self, amount: u64) {
        let previous = self.value.fetch_sub(amount, Ordering::AcqRel);
        debug_assert!(previous >= amount);
    }

    /// Returns the tally value (most likely stale by the time it is observed by the caller).
    pub fn read(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}
