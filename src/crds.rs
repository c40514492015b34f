//! This module implements Cluster Replicated Data Store for
//! asynchronous updates in a distributed network.
//!
//! Data is stored in the CrdsValue type, each type has a specific
//! CrdsValueLabel. Labels are semantically grouped into a single record
//! that is identified by a Pubkey.
//! * 1 Pubkey maps many CrdsValueLabels
//! * 1 CrdsValueLabel maps to 1 CrdsValue
//! The Label, the record Pubkey, and all the record labels can be derived
//! from a single CrdsValue.
//!
//! The actual data is stored in a single map of
//! `CrdsValueLabel(Pubkey) -> CrdsValue`. This allows for partial record
//! updates to be propagated through the network.
//!
//! This means that full `Record` updates are not atomic.
//!
//! Additional labels can be added by appending them to the CrdsValueLabel,
//! CrdsValue enums.
//!
//! Merge strategy is implemented in:
//!     impl PartialOrd for VersionedCrdsValue
//!
//! A value is updated to a new version if the labels match, and the value
//! wallclock is later, or the value hash is greater.
//!
//! Accepted inserts are numbered by a monotonically increasing ordinal, so
//! readers can tail the table (or one category of it) with a [`Cursor`]
//! and never see the same version twice. Entries are additionally indexed
//! by the leading bits of their value hash (see `crds_shards`) to serve
//! the bitmask queries pull requests are built from.

use crate::contact_info::LegacyContactInfo;
use crate::crds_shards::CrdsShards;
use crate::crds_value::{CrdsData, CrdsValue, CrdsValueLabel};
use crate::purged_queue::PurgedQueue;
use bincode::serialize;
use indexmap::map::{Entry, IndexMap};
use indexmap::set::IndexSet;
use rayon::prelude::*;
use solana_sdk::hash::{hash, Hash};
use solana_sdk::pubkey::Pubkey;
use std::cmp;
use std::collections::{BTreeMap, HashMap};
use std::ops::{Bound, Index};
use thiserror::Error;

const CRDS_SHARDS_BITS: u32 = 12;

#[derive(Clone)]
pub struct Crds {
    /// Stores the map of labels and values
    table: IndexMap<CrdsValueLabel, VersionedCrdsValue>,
    /// Next insert ordinal location.
    cursor: Cursor,
    shards: CrdsShards,
    /// Indices of nodes' contact-infos, in the order first inserted.
    nodes: IndexSet<usize>,
    /// Indices of Vote values, ordered by insert ordinal.
    votes: BTreeMap<u64, usize>,
    /// Indices of EpochSlots values, ordered by insert ordinal.
    epoch_slots: BTreeMap<u64, usize>,
    /// Indices of DuplicateShred values, ordered by insert ordinal.
    duplicate_shreds: BTreeMap<u64, usize>,
    /// Indices of all values, ordered by insert ordinal.
    entries: BTreeMap<u64, usize>,
    /// Hashes of values overridden in, or rejected by, the table.
    pub purged: PurgedQueue,
    /// Last shred-version each node advertised in its contact-info.
    shred_versions: HashMap<Pubkey, u16>,
    pub num_inserts: usize,
}

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum CrdsError {
    #[error("duplicate value")]
    DuplicateValue,
    #[error("old value")]
    OldValue,
}

/// Cursor tracking the ordinal up to which a reader has consumed the
/// table. Getters advance it past every record they yield, so repeated
/// calls return each accepted version exactly once.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Cursor(u64);

impl Cursor {
    pub fn ordinal(&self) -> u64 {
        self.0
    }

    /// Updates the cursor position given the ordinal index of the value
    /// consumed.
    #[inline]
    fn consume(&mut self, ordinal: u64) {
        self.0 = self.0.max(ordinal + 1);
    }
}

/// This structure stores some local metadata associated with the CrdsValue
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedCrdsValue {
    /// Ordinal index indicating insert order.
    pub ordinal: u64,
    pub value: CrdsValue,
    /// local time when inserted
    pub local_timestamp: u64,
    /// value hash
    pub value_hash: Hash,
}

impl PartialOrd for VersionedCrdsValue {
    fn partial_cmp(&self, other: &VersionedCrdsValue) -> Option<cmp::Ordering> {
        if self.value.label() != other.value.label() {
            None
        } else if self.value.wallclock() == other.value.wallclock() {
            Some(self.value_hash.cmp(&other.value_hash))
        } else {
            Some(self.value.wallclock().cmp(&other.value.wallclock()))
        }
    }
}

impl VersionedCrdsValue {
    pub(crate) fn new(value: CrdsValue, cursor: Cursor, local_timestamp: u64) -> Self {
        let value_hash = hash(&serialize(&value).unwrap());
        VersionedCrdsValue {
            ordinal: cursor.ordinal(),
            value,
            local_timestamp,
            value_hash,
        }
    }
}

impl Default for Crds {
    fn default() -> Self {
        Crds {
            table: IndexMap::new(),
            cursor: Cursor::default(),
            shards: CrdsShards::new(CRDS_SHARDS_BITS),
            nodes: IndexSet::new(),
            votes: BTreeMap::new(),
            epoch_slots: BTreeMap::new(),
            duplicate_shreds: BTreeMap::new(),
            entries: BTreeMap::new(),
            purged: PurgedQueue::default(),
            shred_versions: HashMap::new(),
            num_inserts: 0,
        }
    }
}

impl Crds {
    pub fn insert(&mut self, value: CrdsValue, now: u64) -> Result<(), CrdsError> {
        let label = value.label();
        let pubkey = value.pubkey();
        let value = VersionedCrdsValue::new(value, self.cursor, now);
        match self.table.entry(label) {
            Entry::Vacant(entry) => {
                let entry_index = entry.index();
                assert!(self.shards.insert(entry_index, &value));
                match &value.value.data {
                    CrdsData::LegacyContactInfo(node) => {
                        self.nodes.insert(entry_index);
                        self.shred_versions.insert(pubkey, node.shred_version);
                    }
                    CrdsData::Vote(_, _) => {
                        self.votes.insert(value.ordinal, entry_index);
                    }
                    CrdsData::EpochSlots(_, _) => {
                        self.epoch_slots.insert(value.ordinal, entry_index);
                    }
                    CrdsData::DuplicateShred(_, _) => {
                        self.duplicate_shreds.insert(value.ordinal, entry_index);
                    }
                    _ => (),
                }
                self.entries.insert(value.ordinal, entry_index);
                self.cursor.consume(value.ordinal);
                self.num_inserts += 1;
                entry.insert(value);
                Ok(())
            }
            Entry::Occupied(mut entry) if *entry.get() < value => {
                let entry_index = entry.index();
                assert!(self.shards.remove(entry_index, entry.get()));
                assert!(self.shards.insert(entry_index, &value));
                match &value.value.data {
                    CrdsData::LegacyContactInfo(node) => {
                        self.shred_versions.insert(pubkey, node.shred_version);
                        // self.nodes does not need to be updated since the
                        // index of the entry does not change.
                    }
                    CrdsData::Vote(_, _) => {
                        self.votes.remove(&entry.get().ordinal);
                        self.votes.insert(value.ordinal, entry_index);
                    }
                    CrdsData::EpochSlots(_, _) => {
                        self.epoch_slots.remove(&entry.get().ordinal);
                        self.epoch_slots.insert(value.ordinal, entry_index);
                    }
                    CrdsData::DuplicateShred(_, _) => {
                        self.duplicate_shreds.remove(&entry.get().ordinal);
                        self.duplicate_shreds.insert(value.ordinal, entry_index);
                    }
                    _ => (),
                }
                self.entries.remove(&entry.get().ordinal);
                self.entries.insert(value.ordinal, entry_index);
                self.cursor.consume(value.ordinal);
                self.num_inserts += 1;
                self.purged.insert(entry.get().value_hash, now);
                entry.insert(value);
                Ok(())
            }
            Entry::Occupied(entry) => {
                trace!(
                    "INSERT FAILED data: {} new.wallclock: {}",
                    value.value.label(),
                    value.value.wallclock(),
                );
                if entry.get().value_hash == value.value_hash {
                    Err(CrdsError::DuplicateValue)
                } else {
                    // Record the rejected hash so pull requests stop
                    // offering the stale payload.
                    self.purged.insert(value.value_hash, now);
                    Err(CrdsError::OldValue)
                }
            }
        }
    }

    /// Inserts a batch of values, dropping values whose wallclock is
    /// outside the +/- `timeout` window around `now`. Returns indices of
    /// values which failed to insert, in input order; dropped values are
    /// not reported.
    pub fn insert_values(&mut self, values: Vec<CrdsValue>, now: u64, timeout: u64) -> Vec<usize> {
        let wallclock_window = now.saturating_sub(timeout)..=now.saturating_add(timeout);
        let mut failed = Vec::new();
        for (index, value) in values.into_iter().enumerate() {
            if !wallclock_window.contains(&value.wallclock()) {
                trace!(
                    "insert_values: {} wallclock is outside the timeout window",
                    value.label(),
                );
                continue;
            }
            if let Err(err) = self.insert(value, now) {
                trace!("insert_values: insert failed: {:?}", err);
                failed.push(index);
            }
        }
        failed
    }

    pub fn lookup(&self, label: &CrdsValueLabel) -> Option<&CrdsValue> {
        self.table.get(label).map(|x| &x.value)
    }

    pub fn lookup_versioned(&self, label: &CrdsValueLabel) -> Option<&VersionedCrdsValue> {
        self.table.get(label)
    }

    /// Returns all entries which are Vote, with ordinal index larger than
    /// the given cursor, and updates the cursor past every record yielded.
    pub fn get_votes<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> {
        let range = (Bound::Included(cursor.ordinal()), Bound::Unbounded);
        self.votes.range(range).map(move |(ordinal, index)| {
            cursor.consume(*ordinal);
            self.table.index(*index)
        })
    }

    /// Returns all entries which are EpochSlots, past the given cursor.
    pub fn get_epoch_slots<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> {
        let range = (Bound::Included(cursor.ordinal()), Bound::Unbounded);
        self.epoch_slots.range(range).map(move |(ordinal, index)| {
            cursor.consume(*ordinal);
            self.table.index(*index)
        })
    }

    /// Returns all entries which are DuplicateShred, past the given cursor.
    pub fn get_duplicate_shreds<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> {
        let range = (Bound::Included(cursor.ordinal()), Bound::Unbounded);
        self.duplicate_shreds
            .range(range)
            .map(move |(ordinal, index)| {
                cursor.consume(*ordinal);
                self.table.index(*index)
            })
    }

    /// Returns all accepted entries past the given cursor, in insert
    /// order.
    pub fn get_entries<'a>(
        &'a self,
        cursor: &'a mut Cursor,
    ) -> impl Iterator<Item = &'a VersionedCrdsValue> {
        let range = (Bound::Included(cursor.ordinal()), Bound::Unbounded);
        self.entries.range(range).map(move |(ordinal, index)| {
            cursor.consume(*ordinal);
            self.table.index(*index)
        })
    }

    /// Returns all records of nodes' contact-infos, in the order of the
    /// node index (not insert order).
    pub fn get_nodes(&self) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.nodes.iter().map(move |i| self.table.index(*i))
    }

    /// Returns the contact-info of all known nodes.
    pub fn get_nodes_contact_info(&self) -> impl Iterator<Item = &LegacyContactInfo> {
        self.get_nodes().map(|v| match &v.value.data {
            CrdsData::LegacyContactInfo(info) => info,
            _ => panic!("this should not happen!"),
        })
    }

    /// Last shred-version the node with the given pubkey advertised in a
    /// contact-info, if any.
    pub fn get_shred_version(&self, pubkey: &Pubkey) -> Option<u16> {
        self.shred_versions.get(pubkey).copied()
    }

    /// Returns indices of all stored values whose first `mask_bits` hash
    /// bits equal the first `mask_bits` of `mask`.
    pub fn get_bitmask_matches(&self, mask: u64, mask_bits: u32) -> Vec<usize> {
        self.shards.find(mask, mask_bits).collect()
    }

    /// Returns all stored values whose first `mask_bits` hash bits equal
    /// the first `mask_bits` of `mask`.
    pub fn filter_bitmask(
        &self,
        mask: u64,
        mask_bits: u32,
    ) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.shards
            .find(mask, mask_bits)
            .map(move |i| self.table.index(i))
    }

    pub fn values(&self) -> impl Iterator<Item = &VersionedCrdsValue> {
        self.table.values()
    }

    pub fn par_values(&self) -> impl IndexedParallelIterator<Item = &VersionedCrdsValue> {
        self.table.par_values()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}
