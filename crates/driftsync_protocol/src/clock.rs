//! Per-client causal clocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockOrdering {
    /// Every component is equal.
    Equal,
    /// The left clock happened before the right one.
    Less,
    /// The left clock happened after the right one.
    Greater,
    /// Neither clock dominates the other.
    Concurrent,
}

/// A vector clock: one logical counter per client id.
///
/// Missing components are treated as zero everywhere, so `{a:0, b:5}` and
/// `{b:5}` compare as equal. Counters never decrease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for `client_id` (zero when absent).
    #[must_use]
    pub fn get(&self, client_id: &str) -> u64 {
        self.0.get(client_id).copied().unwrap_or(0)
    }

    /// Returns true if every component is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|&c| c == 0)
    }

    /// Iterates over `(client_id, counter)` pairs in client-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum of all counters.
    ///
    /// If `a` happened before `b`, `a.total() < b.total()`, which makes the
    /// sum usable as the primary key of a causal linear extension.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.values().fold(0u64, |acc, &c| acc.saturating_add(c))
    }

    /// Increments the counter of `client_id` and returns the new clock.
    ///
    /// Saturates instead of wrapping so the clock stays monotonic.
    #[must_use]
    pub fn tick(mut self, client_id: &str) -> Self {
        let counter = self.0.entry(client_id.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        self
    }

    /// Merges `other` into this clock (component-wise maximum).
    pub fn merge(&mut self, other: &VectorClock) {
        for (client, &counter) in &other.0 {
            let entry = self.0.entry(client.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
    }

    /// Returns the component-wise maximum of both clocks.
    #[must_use]
    pub fn merged(&self, other: &VectorClock) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Compares two clocks under the component-wise partial order.
    #[must_use]
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        for client in self.0.keys().chain(other.0.keys()) {
            let a = self.get(client);
            let b = other.get(client);
            if a < b {
                less = true;
            } else if a > b {
                greater = true;
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Less,
            (false, true) => ClockOrdering::Greater,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Returns true if this clock has any component ahead of `reference`.
    #[must_use]
    pub fn has_changes_since(&self, reference: &VectorClock) -> bool {
        self.0.iter().any(|(client, &c)| c > reference.get(client))
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (client, counter)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{client}:{counter}")?;
        }
        f.write_str("}")
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn tick_adds_missing_component() {
        let c = VectorClock::new().tick("a").tick("a").tick("b");
        assert_eq!(c.get("a"), 2);
        assert_eq!(c.get("b"), 1);
        assert_eq!(c.get("zzz"), 0);
    }

    #[test]
    fn tick_saturates() {
        let c = clock(&[("a", u64::MAX)]).tick("a");
        assert_eq!(c.get("a"), u64::MAX);
    }

    #[test]
    fn compare_cases() {
        let a = clock(&[("a", 1), ("b", 2)]);
        assert_eq!(a.compare(&a.clone()), ClockOrdering::Equal);
        assert_eq!(
            a.compare(&clock(&[("a", 2), ("b", 2)])),
            ClockOrdering::Less
        );
        assert_eq!(
            clock(&[("a", 2), ("b", 2)]).compare(&a),
            ClockOrdering::Greater
        );
        assert_eq!(
            a.compare(&clock(&[("a", 2), ("b", 1)])),
            ClockOrdering::Concurrent
        );
    }

    #[test]
    fn missing_components_count_as_zero() {
        assert_eq!(
            clock(&[("a", 0), ("b", 5)]).compare(&clock(&[("b", 5)])),
            ClockOrdering::Equal
        );
        assert_eq!(
            clock(&[("b", 5)]).compare(&clock(&[("a", 1), ("b", 5)])),
            ClockOrdering::Less
        );
        assert!(clock(&[("a", 0)]).is_empty());
    }

    #[test]
    fn merge_takes_component_max_over_union() {
        let mut a = clock(&[("a", 3), ("b", 1)]);
        a.merge(&clock(&[("b", 4), ("c", 2)]));
        assert_eq!(a, clock(&[("a", 3), ("b", 4), ("c", 2)]));
    }

    #[test]
    fn display_sorts_client_ids() {
        let c = clock(&[("z", 1), ("a", 2), ("m", 3)]);
        assert_eq!(c.to_string(), "{a:2, m:3, z:1}");
        assert_eq!(VectorClock::new().to_string(), "{}");
    }

    #[test]
    fn has_changes_since_detects_any_newer_component() {
        let reference = clock(&[("a", 2), ("b", 2)]);
        assert!(!clock(&[("a", 2)]).has_changes_since(&reference));
        assert!(clock(&[("a", 2), ("c", 1)]).has_changes_since(&reference));
        assert!(clock(&[("b", 3)]).has_changes_since(&reference));
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        prop::collection::btree_map("[a-d]", 0u64..20, 0..4).prop_map(VectorClock)
    }

    proptest! {
        #[test]
        fn merge_dominates_both_inputs(a in arb_clock(), b in arb_clock()) {
            let m = a.merged(&b);
            prop_assert!(matches!(a.compare(&m), ClockOrdering::Less | ClockOrdering::Equal));
            prop_assert!(matches!(b.compare(&m), ClockOrdering::Less | ClockOrdering::Equal));
        }

        #[test]
        fn merge_is_commutative(a in arb_clock(), b in arb_clock()) {
            prop_assert_eq!(a.merged(&b).compare(&b.merged(&a)), ClockOrdering::Equal);
        }

        #[test]
        fn tick_is_strictly_greater(a in arb_clock(), id in "[a-d]") {
            let ticked = a.clone().tick(&id);
            prop_assert_eq!(a.compare(&ticked), ClockOrdering::Less);
            prop_assert!(a.total() < ticked.total());
        }
    }
}
