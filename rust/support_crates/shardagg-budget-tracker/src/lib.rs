//! Bucket budget tracking for aggregation reductions.
//!
//! A [`Budget`] counts how many buckets a request has materialized and rejects any
//! charge that would push the running total past the configured ceiling. Budgets form
//! a tree: a subordinate budget has its own (optional) ceiling, and every charge against
//! it is also charged against its parent, so concurrent tasks holding separate
//! subordinates still share a single request-wide total.
//!
//! Charges are never returned. The budget bounds the total amount of work a request may
//! perform, not its instantaneous footprint.

use std::sync::Arc;

use counter::Tally;

pub mod counter;

/// Represents a bucket budget that can be charged against.
#[derive(Clone)]
pub struct Budget(Arc<BudgetNode>);

impl Budget {
    /// Creates a new root budget with the given ceiling.
    pub fn new(limit: u64) -> Budget {
        Budget(Arc::new(BudgetNode {
            parent: None,
            tally: Tally::new(limit),
        }))
    }

    /// Creates a root budget that never rejects a charge.
    pub fn unlimited() -> Budget {
        Budget::new(u64::MAX)
    }

    /// The ceiling of this budget node.
    pub fn limit(&self) -> u64 {
        self.0.tally.ceiling()
    }

    /// Returns the amount charged against this budget node so far.
    ///
    /// **Note**: This method is primarily intended for diagnostic purposes. The returned
    /// value may be outdated in a concurrent environment.
    pub fn consumed(&self) -> u64 {
        self.0.tally.read()
    }

    /// Returns the remaining amount of this budget node, ignoring its ancestors.
    pub fn remaining(&self) -> u64 {
        self.limit().saturating_sub(self.consumed())
    }

    /// Charges `amount` against this budget and all of its ancestors.
    ///
    /// Either every node in the chain accepts the charge, or none of them keeps it.
    /// On failure the returned [`BudgetExceeded`] describes the node that rejected it.
    pub fn charge(&self, amount: u64) -> Result<(), BudgetExceeded> {
        self.0.charge(amount)
    }

    /// Creates a subordinate budget that charges through to this one.
    ///
    /// The subordinate has no ceiling of its own; use [`Budget::subordinate`] to
    /// configure one.
    pub fn split(&self) -> Budget {
        self.subordinate().create()
    }

    /// Constructs a subordinate budget tracker.
    ///
    /// The subordinate budget has its own limit on the total charged amount.
    /// Additionally, every charge against the subordinate budget is also tracked
    /// by the parent budget. For a charge to succeed, both the parent and
    /// subordinate budgets must have sufficient headroom.
    pub fn subordinate(&self) -> SubordinateBuilder {
        SubordinateBuilder {
            node: self.0.clone(),
            limit: None,
        }
    }
}

impl std::fmt::Debug for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Budget")
            .field("limit", &self.limit())
            .field("consumed", &self.consumed())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SubordinateBuilder {
    node: Arc<BudgetNode>,
    limit: Option<u64>,
}

impl SubordinateBuilder {
    /// Configures the ceiling for the subordinate budget tracker.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn create(self) -> Budget {
        Budget(Arc::new(BudgetNode {
            parent: Some(self.node),
            tally: Tally::new(self.limit.unwrap_or(u64::MAX)),
        }))
    }
}

/// An error that occurs when a charge would exceed a budget ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BudgetExceeded {
    /// Ceiling of the node that rejected the charge.
    pub limit: u64,
    /// The total that node would have reached had the charge been accepted.
    pub requested: u64,
}

impl std::fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "budget exceeded: {} requested, limit {}",
            self.requested, self.limit
        )
    }
}

impl std::error::Error for BudgetExceeded {}

/// A node in the budget tree.
struct BudgetNode {
    /// Parent budget node. If present, every charge against the current node must also
    /// be accepted by this parent in order to succeed.
    parent: Option<Arc<BudgetNode>>,
    /// Running total of this node.
    tally: Tally,
}

impl BudgetNode {
    fn charge(&self, amount: u64) -> Result<(), BudgetExceeded> {
        if amount == 0 {
            return Ok(());
        }

        self.tally.charge(amount).map_err(|requested| BudgetExceeded {
            limit: self.tally.ceiling(),
            requested,
        })?;

        if let Some(parent) = self.parent.as_deref() {
            if let Err(e) = parent.charge(amount) {
                self.tally.refund(amount);
                return Err(e);
            }
        }
        Ok(())
    }
}
