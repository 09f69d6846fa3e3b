//! Delta view over two consecutive switch-state snapshots.
//!
//! A [`StateDelta`] is the unit of work the engine processes: it pairs the
//! previous and next snapshot and exposes ordered iterators over the
//! objects that differ between them. Unchanged objects never show up, which
//! is what keeps every handler's work proportional to the change.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::{EitherOrBoth, Itertools};
use qph_types::{PortId, RouterId, VlanId};

use super::types::{Port, RouteTable, SwitchState, Vlan};

/// One changed object: present only on the old side (removed), only on the
/// new side (added), or on both with differing contents (changed).
#[derive(Debug, Clone, Copy)]
pub struct DeltaRow<'a, K, V> {
    pub key: &'a K,
    pub old: Option<&'a V>,
    pub new: Option<&'a V>,
}

/// Walks two ordered maps in lockstep, yielding a row for every key whose
/// value was added, removed, or changed.
pub fn map_delta<'a, K: Ord, V: PartialEq>(
    old: &'a BTreeMap<K, V>,
    new: &'a BTreeMap<K, V>,
) -> impl Iterator<Item = DeltaRow<'a, K, V>> {
    old.iter()
        .merge_join_by(new.iter(), |(old_key, _), (new_key, _)| {
            old_key.cmp(new_key)
        })
        .filter_map(|merged| match merged {
            EitherOrBoth::Left((key, value)) => Some(DeltaRow {
                key,
                old: Some(value),
                new: None,
            }),
            EitherOrBoth::Right((key, value)) => Some(DeltaRow {
                key,
                old: None,
                new: Some(value),
            }),
            EitherOrBoth::Both((key, old_value), (_, new_value)) => {
                (old_value != new_value).then_some(DeltaRow {
                    key,
                    old: Some(old_value),
                    new: Some(new_value),
                })
            }
        })
}

/// The difference between two consecutive snapshots.
///
/// Snapshots are shared immutably; handlers resolve every ID against the
/// relevant side and treat a miss as an explicit `Option::None`.
#[derive(Debug, Clone)]
pub struct StateDelta {
    old: Arc<SwitchState>,
    new: Arc<SwitchState>,
}

impl StateDelta {
    pub fn new(old: Arc<SwitchState>, new: Arc<SwitchState>) -> Self {
        Self { old, new }
    }

    pub fn old_state(&self) -> &SwitchState {
        &self.old
    }

    pub fn new_state(&self) -> &SwitchState {
        &self.new
    }

    /// Changed ports between the two snapshots.
    pub fn ports(&self) -> impl Iterator<Item = DeltaRow<'_, PortId, Port>> {
        map_delta(self.old.ports(), self.new.ports())
    }

    /// Changed VLANs, including neighbor-table changes within a VLAN.
    pub fn vlans(&self) -> impl Iterator<Item = DeltaRow<'_, VlanId, Vlan>> {
        map_delta(self.old.vlans(), self.new.vlans())
    }

    /// Changed per-VRF route tables.
    pub fn route_tables(&self) -> impl Iterator<Item = DeltaRow<'_, RouterId, RouteTable>> {
        map_delta(self.old.route_tables(), self.new.route_tables())
    }
}
