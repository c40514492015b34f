//! Thread safe access envelope around the crds table.
//!
//! The table itself is single threaded; services share it through a single
//! read-write lock. Readers (cursor scans, peer sampling, bitmask queries)
//! may hold the table concurrently; writers are exclusive, so every side
//! effect of one insert (store, category indices, shards, purged queue,
//! cursor) becomes visible atomically.
//!
//! The convenience getters here clone records under the read lock, so
//! callers are free to use the results after the lock is released and
//! resume later with their own [`Cursor`].

use crate::crds::{Crds, CrdsError, Cursor, VersionedCrdsValue};
use crate::crds_value::{CrdsValue, CrdsValueLabel};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::timing::timestamp;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub struct CrdsStore {
    crds: RwLock<Crds>,
}

impl CrdsStore {
    pub fn read(&self) -> RwLockReadGuard<Crds> {
        self.crds.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<Crds> {
        self.crds.write().unwrap()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn insert(&self, value: CrdsValue, now: u64) -> Result<(), CrdsError> {
        self.write().insert(value, now)
    }

    /// Inserts a batch of values under one write lock, stamping all of
    /// them with a single wall time. Values whose wallclock is outside the
    /// +/- `timeout` window around that time are dropped; indices of
    /// values which failed to insert are returned in input order.
    pub fn insert_values(&self, values: Vec<CrdsValue>, timeout: u64) -> Vec<usize> {
        let now = timestamp();
        self.write().insert_values(values, now, timeout)
    }

    pub fn get(&self, label: &CrdsValueLabel) -> Option<VersionedCrdsValue> {
        self.read().lookup_versioned(label).cloned()
    }

    /// Copies of up to `max` accepted records past the cursor, in insert
    /// order. The cursor advances by the number of records returned.
    pub fn get_entries(&self, cursor: &mut Cursor, max: usize) -> Vec<VersionedCrdsValue> {
        let crds = self.read();
        crds.get_entries(cursor).take(max).cloned().collect()
    }

    /// Copies of up to `max` vote records past the cursor.
    pub fn get_votes(&self, cursor: &mut Cursor, max: usize) -> Vec<VersionedCrdsValue> {
        let crds = self.read();
        crds.get_votes(cursor).take(max).cloned().collect()
    }

    /// Copies of up to `max` epoch-slots records past the cursor.
    pub fn get_epoch_slots(&self, cursor: &mut Cursor, max: usize) -> Vec<VersionedCrdsValue> {
        let crds = self.read();
        crds.get_epoch_slots(cursor).take(max).cloned().collect()
    }

    /// Copies of up to `max` duplicate-shred records past the cursor.
    pub fn get_duplicate_shreds(&self, cursor: &mut Cursor, max: usize) -> Vec<VersionedCrdsValue> {
        let crds = self.read();
        crds.get_duplicate_shreds(cursor).take(max).cloned().collect()
    }

    /// Copies of up to `max` contact-info records, in node index order
    /// (not insert order); used for peer sampling.
    pub fn get_contact_infos(&self, max: usize) -> Vec<VersionedCrdsValue> {
        let crds = self.read();
        crds.get_nodes().take(max).cloned().collect()
    }

    pub fn get_shred_version(&self, pubkey: &Pubkey) -> Option<u16> {
        self.read().get_shred_version(pubkey)
    }

    pub fn get_bitmask_matches(&self, mask: u64, mask_bits: u32) -> Vec<usize> {
        self.read().get_bitmask_matches(mask, mask_bits)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::contact_info::LegacyContactInfo;
    use crate::crds_value::CrdsData;
    use std::iter::repeat_with;
    use std::sync::Arc;
    use std::thread;

    fn new_contact_info_value(pubkey: Pubkey, wallclock: u64) -> CrdsValue {
        CrdsValue::new_unsigned(CrdsData::LegacyContactInfo(
            LegacyContactInfo::new_localhost(&pubkey, wallclock),
        ))
    }

    #[test]
    fn test_contact_info_dedup() {
        let store = CrdsStore::default();
        let pubkey = Pubkey::new_unique();
        let value = new_contact_info_value(pubkey, 0);
        assert_eq!(store.insert(value.clone(), 0), Ok(()));
        // Reinserting the identical value is reported as a duplicate.
        assert_eq!(store.insert(value, 0), Err(CrdsError::DuplicateValue));
        // A fresher wallclock for the same label replaces the record.
        assert_eq!(store.insert(new_contact_info_value(pubkey, 2), 0), Ok(()));
        let infos = store.get_contact_infos(usize::MAX);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].value.wallclock(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cursor_resumes_across_locks() {
        let store = CrdsStore::default();
        let pubkeys: Vec<_> = repeat_with(Pubkey::new_unique).take(5).collect();
        for pubkey in &pubkeys[..3] {
            assert_eq!(store.insert(new_contact_info_value(*pubkey, 1), 0), Ok(()));
        }
        let mut cursor = Cursor::default();
        let chunk = store.get_entries(&mut cursor, 2);
        assert_eq!(chunk.len(), 2);
        assert_eq!(cursor.ordinal(), 2);
        // Writers run between calls; the cursor picks up from where the
        // previous read stopped.
        for pubkey in &pubkeys[3..] {
            assert_eq!(store.insert(new_contact_info_value(*pubkey, 1), 0), Ok(()));
        }
        let rest = store.get_entries(&mut cursor, usize::MAX);
        assert_eq!(rest.len(), 3);
        assert_eq!(cursor.ordinal(), 5);
        let pubkeys_seen: Vec<_> = chunk
            .iter()
            .chain(rest.iter())
            .map(|v| v.value.pubkey())
            .collect();
        assert_eq!(pubkeys_seen, pubkeys);
        assert!(store.get_entries(&mut cursor, usize::MAX).is_empty());
    }

    #[test]
    fn test_get_returns_copies() {
        let store = CrdsStore::default();
        let pubkey = Pubkey::new_unique();
        let value = new_contact_info_value(pubkey, 1);
        assert_eq!(store.insert(value.clone(), 0), Ok(()));
        let record = store.get(&value.label()).unwrap();
        // The copy stays valid while writers make progress.
        assert_eq!(store.insert(new_contact_info_value(pubkey, 2), 1), Ok(()));
        assert_eq!(record.value, value);
        assert_eq!(store.get(&value.label()).unwrap().value.wallclock(), 2);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        const NUM_WRITERS: usize = 4;
        const VALUES_PER_WRITER: usize = 32;
        let store = Arc::new(CrdsStore::default());
        let writers: Vec<_> = (0..NUM_WRITERS)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for wallclock in 0..VALUES_PER_WRITER as u64 {
                        let value = new_contact_info_value(Pubkey::new_unique(), wallclock);
                        assert_eq!(store.insert(value, wallclock), Ok(()));
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut cursor = Cursor::default();
                    let mut seen = 0;
                    // Tail the table while the writers run; each reader
                    // observes every record exactly once.
                    while seen < NUM_WRITERS * VALUES_PER_WRITER {
                        seen += store.get_entries(&mut cursor, 7).len();
                    }
                    seen
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        for reader in readers {
            assert_eq!(reader.join().unwrap(), NUM_WRITERS * VALUES_PER_WRITER);
        }
        assert_eq!(store.len(), NUM_WRITERS * VALUES_PER_WRITER);
        let mut cursor = Cursor::default();
        let ordinals: Vec<_> = store
            .get_entries(&mut cursor, usize::MAX)
            .iter()
            .map(|value| value.ordinal)
            .collect();
        assert_eq!(
            ordinals,
            (0..(NUM_WRITERS * VALUES_PER_WRITER) as u64).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_insert_values_stamps_one_wallclock() {
        let store = CrdsStore::default();
        let now = timestamp();
        let values = vec![
            new_contact_info_value(Pubkey::new_unique(), now),
            // Far in the past; dropped without being reported.
            new_contact_info_value(Pubkey::new_unique(), 0),
        ];
        let failed = store.insert_values(values, /*timeout:*/ 60_000);
        assert!(failed.is_empty());
        assert_eq!(store.len(), 1);
    }
}
