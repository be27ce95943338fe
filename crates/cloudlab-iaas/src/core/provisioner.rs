//! Bookkeeping of a single resource kind.

use std::collections::BTreeMap;

/// Tracks the capacity of one resource kind (cores, memory, bandwidth, storage) and its allocations per consumer.
///
/// Invariant: `available + sum(allocations) == capacity`.
#[derive(Clone, Debug)]
pub struct ResourceProvisioner {
    capacity: u64,
    available: u64,
    allocations: BTreeMap<u64, u64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: capacity,
            allocations: BTreeMap::new(),
        }
    }

    /// Allocates `amount` to the consumer, replacing its previous allocation if any.
    ///
    /// Returns `false` and leaves the state unchanged if the amount does not fit.
    pub fn allocate(&mut self, consumer: u64, amount: u64) -> bool {
        let current = self.allocated_for(consumer);
        if amount > self.available + current {
            return false;
        }
        self.available = self.available + current - amount;
        self.allocations.insert(consumer, amount);
        true
    }

    /// Releases the consumer allocation and returns the released amount.
    ///
    /// Releasing a consumer without allocation is a no-op which returns zero.
    pub fn deallocate(&mut self, consumer: u64) -> u64 {
        match self.allocations.remove(&consumer) {
            Some(amount) => {
                self.available += amount;
                amount
            }
            None => 0,
        }
    }

    pub fn allocated_for(&self, consumer: u64) -> u64 {
        self.allocations.get(&consumer).copied().unwrap_or(0)
    }

    pub fn has_allocation(&self, consumer: u64) -> bool {
        self.allocations.contains_key(&consumer)
    }

    pub fn is_suitable(&self, amount: u64) -> bool {
        amount <= self.available
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn allocated(&self) -> u64 {
        self.capacity - self.available
    }

    /// Fraction of allocated capacity, zero for empty resource.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.
        } else {
            self.allocated() as f64 / self.capacity as f64
        }
    }

    /// Permanently removes `amount` of free capacity, e.g. when a core fails.
    pub fn shrink(&mut self, amount: u64) -> bool {
        if amount > self.available {
            return false;
        }
        self.available -= amount;
        self.capacity -= amount;
        true
    }
}
