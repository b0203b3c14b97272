use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::foundation::core::InstanceKey;
use crate::tree::model::{NodeKind, NodeTree};

/// Per-node execution times keyed by instance key.
///
/// Fused operations stand for several nodes; their time is split evenly between them. Group
/// node totals are derived from their contents by [`Profiler::finalize`].
#[derive(Debug, Default)]
pub struct Profiler {
    times: Mutex<BTreeMap<InstanceKey, Duration>>,
    total: Mutex<Option<Duration>>,
}

impl Profiler {
    /// Attribute `end - start` to `keys`. Operations without keys are not attributed.
    pub fn add_operation_execution_time(&self, keys: &[InstanceKey], start: Instant, end: Instant) {
        if keys.is_empty() {
            return;
        }
        let elapsed = end.saturating_duration_since(start);
        let share = elapsed / u32::try_from(keys.len()).unwrap_or(u32::MAX);
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        for k in keys {
            *times.entry(*k).or_default() += share;
        }
    }

    /// Time recorded for one node occurrence.
    pub fn node_execution_time(&self, key: InstanceKey) -> Option<Duration> {
        self.times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
    }

    /// Roll group contents up into their group node occurrences, starting at the root tree.
    ///
    /// Returns the total time of the root tree.
    pub fn finalize(&self, tree: &NodeTree) -> Duration {
        let mut times = self.times.lock().unwrap_or_else(PoisonError::into_inner);
        let total = accumulate(tree, InstanceKey::ROOT, &mut times);
        *self.total.lock().unwrap_or_else(PoisonError::into_inner) = Some(total);
        total
    }

    /// Root total computed by the last [`Profiler::finalize`].
    pub fn total(&self) -> Option<Duration> {
        *self.total.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of all recorded times.
    pub fn snapshot(&self) -> BTreeMap<InstanceKey, Duration> {
        self.times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget all recorded times.
    pub fn reset(&self) {
        self.times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.total.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn accumulate(
    tree: &NodeTree,
    instance: InstanceKey,
    times: &mut BTreeMap<InstanceKey, Duration>,
) -> Duration {
    let mut total = Duration::ZERO;
    for node in tree.nodes() {
        let key = instance.child(&node.name);
        match &node.kind {
            NodeKind::Group(Some(child)) => {
                let sum = accumulate(child, key, times);
                if sum > Duration::ZERO || times.contains_key(&key) {
                    times.insert(key, sum);
                }
                total += sum;
            }
            _ => total += times.get(&key).copied().unwrap_or_default(),
        }
    }
    total
}

#[cfg(test)]
#[path = "../tests/unit/profile.rs"]
mod tests;
