//! Copy-on-write overlay cache over a backing state view.
//!
//! Reads pull lazily from the backing view; writes stay local until `flush`
//! merges every delta into the backing view in one atomic commit. Caches
//! chain: a cache whose backing view is another cache composes through the
//! same merge algorithm.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::mem;

use zend_consensus::Hash256;
use zend_primitives::SidechainId;

use crate::coins::Coin;
use crate::events::SidechainEvents;
use crate::sidechains::Sidechain;
use crate::view::{
    CacheFlag, CacheFlushData, CacheSlot, CoinsCacheEntry, CoinsView, CswNullifierKey,
    MembershipEntry, ViewError, FLAG_DIRTY, FLAG_FRESH,
};

pub struct CoinsViewCache<V> {
    base: V,
    coins: HashMap<Hash256, CoinsCacheEntry>,
    anchors: HashMap<Hash256, MembershipEntry>,
    nullifiers: HashMap<Hash256, MembershipEntry>,
    sidechains: HashMap<SidechainId, CacheSlot<Sidechain>>,
    events: HashMap<i32, CacheSlot<SidechainEvents>>,
    csw_nullifiers: HashMap<CswNullifierKey, CacheSlot<()>>,
    best_block: Option<Hash256>,
    best_anchor: Option<Hash256>,
}

impl<V: CoinsView> CoinsViewCache<V> {
    pub fn new(base: V) -> Self {
        Self {
            base,
            coins: HashMap::new(),
            anchors: HashMap::new(),
            nullifiers: HashMap::new(),
            sidechains: HashMap::new(),
            events: HashMap::new(),
            csw_nullifiers: HashMap::new(),
            best_block: None,
            best_anchor: None,
        }
    }

    pub fn base(&self) -> &V {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut V {
        &mut self.base
    }

    pub fn into_base(self) -> V {
        self.base
    }

    pub fn cached_entries(&self) -> usize {
        self.coins.len()
            + self.anchors.len()
            + self.nullifiers.len()
            + self.sidechains.len()
            + self.events.len()
            + self.csw_nullifiers.len()
    }

    fn fetch_coins(&mut self, txid: &Hash256) -> Result<(), ViewError> {
        if self.coins.contains_key(txid) {
            return Ok(());
        }
        if let Some(coin) = self.base.coins(txid)? {
            // A pruned pull carries no information the backing view needs
            // preserved, so it may be discarded instead of written back.
            let flags = if coin.is_pruned() { FLAG_FRESH } else { 0 };
            self.coins.insert(*txid, CoinsCacheEntry { coin, flags });
        }
        Ok(())
    }

    pub fn access_coins(&mut self, txid: &Hash256) -> Result<Option<&Coin>, ViewError> {
        self.fetch_coins(txid)?;
        Ok(self
            .coins
            .get(txid)
            .filter(|entry| !entry.coin.is_pruned())
            .map(|entry| &entry.coin))
    }

    /// Scoped mutation of one coin bundle. The record is normalized when the
    /// closure returns: trailing spent slots are trimmed, and a record left
    /// fully pruned on a backing-view-absent key is dropped entirely.
    pub fn modify_coins<R>(
        &mut self,
        txid: &Hash256,
        f: impl FnOnce(&mut Coin) -> R,
    ) -> Result<R, ViewError> {
        self.fetch_coins(txid)?;
        let entry = self.coins.entry(*txid).or_insert_with(|| CoinsCacheEntry {
            coin: Coin::default(),
            flags: FLAG_FRESH,
        });
        let out = f(&mut entry.coin);
        entry.coin.cleanup();
        entry.flags |= FLAG_DIRTY;
        if entry.coin.is_pruned() && entry.is_fresh() {
            self.coins.remove(txid);
        }
        Ok(out)
    }

    fn fetch_anchor(&mut self, root: &Hash256) -> Result<bool, ViewError> {
        if let Some(entry) = self.anchors.get(root) {
            return Ok(entry.entered);
        }
        let entered = self.base.have_anchor(root)?;
        let flags = if entered { 0 } else { FLAG_FRESH };
        self.anchors.insert(*root, MembershipEntry { entered, flags });
        Ok(entered)
    }

    pub fn add_anchor(&mut self, root: Hash256) -> Result<(), ViewError> {
        self.fetch_anchor(&root)?;
        if let Some(entry) = self.anchors.get_mut(&root) {
            entry.entered = true;
            entry.flags |= FLAG_DIRTY;
        }
        self.best_anchor = Some(root);
        Ok(())
    }

    pub fn remove_anchor(&mut self, root: &Hash256, new_best: Hash256) -> Result<(), ViewError> {
        self.fetch_anchor(root)?;
        if let Some(entry) = self.anchors.get_mut(root) {
            entry.entered = false;
            entry.flags |= FLAG_DIRTY;
            if entry.is_fresh() {
                self.anchors.remove(root);
            }
        }
        self.best_anchor = Some(new_best);
        Ok(())
    }

    fn fetch_shielded_nullifier(&mut self, nullifier: &Hash256) -> Result<bool, ViewError> {
        if let Some(entry) = self.nullifiers.get(nullifier) {
            return Ok(entry.entered);
        }
        let entered = self.base.have_shielded_nullifier(nullifier)?;
        let flags = if entered { 0 } else { FLAG_FRESH };
        self.nullifiers
            .insert(*nullifier, MembershipEntry { entered, flags });
        Ok(entered)
    }

    pub fn add_shielded_nullifier(&mut self, nullifier: Hash256) -> Result<(), ViewError> {
        self.fetch_shielded_nullifier(&nullifier)?;
        if let Some(entry) = self.nullifiers.get_mut(&nullifier) {
            entry.entered = true;
            entry.flags |= FLAG_DIRTY;
        }
        Ok(())
    }

    pub fn remove_shielded_nullifier(&mut self, nullifier: &Hash256) -> Result<(), ViewError> {
        self.fetch_shielded_nullifier(nullifier)?;
        if let Some(entry) = self.nullifiers.get_mut(nullifier) {
            entry.entered = false;
            entry.flags |= FLAG_DIRTY;
            if entry.is_fresh() {
                self.nullifiers.remove(nullifier);
            }
        }
        Ok(())
    }

    fn fetch_csw_nullifier(&mut self, key: &CswNullifierKey) -> Result<bool, ViewError> {
        if let Some(slot) = self.csw_nullifiers.get(key) {
            return Ok(slot.value.is_some());
        }
        let slot = if self.base.have_csw_nullifier(key)? {
            CacheSlot::pulled(())
        } else {
            CacheSlot::fresh_miss()
        };
        let entered = slot.value.is_some();
        self.csw_nullifiers.insert(*key, slot);
        Ok(entered)
    }

    pub fn add_csw_nullifier(&mut self, key: CswNullifierKey) -> Result<(), ViewError> {
        self.fetch_csw_nullifier(&key)?;
        if let Some(slot) = self.csw_nullifiers.get_mut(&key) {
            slot.value = Some(());
            if slot.flag != CacheFlag::Fresh {
                slot.flag = CacheFlag::Dirty;
            }
        }
        Ok(())
    }

    pub fn remove_csw_nullifier(&mut self, key: &CswNullifierKey) -> Result<(), ViewError> {
        self.fetch_csw_nullifier(key)?;
        if let Some(slot) = self.csw_nullifiers.get_mut(key) {
            slot.value = None;
            if slot.flag != CacheFlag::Fresh {
                slot.flag = CacheFlag::Erased;
            }
        }
        Ok(())
    }

    fn fetch_sidechain(&mut self, sc_id: &SidechainId) -> Result<(), ViewError> {
        if self.sidechains.contains_key(sc_id) {
            return Ok(());
        }
        // A miss is cached as a fresh tombstone so a later delete of the same
        // key does not re-query the backing view.
        let slot = match self.base.get_sidechain(sc_id)? {
            Some(sidechain) => CacheSlot::pulled(sidechain),
            None => CacheSlot::fresh_miss(),
        };
        self.sidechains.insert(*sc_id, slot);
        Ok(())
    }

    pub fn sidechain(&mut self, sc_id: &SidechainId) -> Result<Option<&Sidechain>, ViewError> {
        self.fetch_sidechain(sc_id)?;
        Ok(self.sidechains.get(sc_id).and_then(|slot| slot.value.as_ref()))
    }

    /// Scoped mutation of one sidechain record. Setting the value to `None`
    /// deletes the record; the lifecycle tag is normalized on return.
    pub fn modify_sidechain<R>(
        &mut self,
        sc_id: &SidechainId,
        f: impl FnOnce(&mut Option<Sidechain>) -> R,
    ) -> Result<R, ViewError> {
        self.fetch_sidechain(sc_id)?;
        let slot = self
            .sidechains
            .entry(*sc_id)
            .or_insert_with(CacheSlot::fresh_miss);
        let backing_absent = slot.flag == CacheFlag::Fresh;
        let out = f(&mut slot.value);
        slot.flag = match (slot.value.is_some(), backing_absent) {
            (_, true) => CacheFlag::Fresh,
            (true, false) => CacheFlag::Dirty,
            (false, false) => CacheFlag::Erased,
        };
        Ok(out)
    }

    fn fetch_sidechain_events(&mut self, height: i32) -> Result<(), ViewError> {
        if self.events.contains_key(&height) {
            return Ok(());
        }
        let slot = match self.base.get_sidechain_events(height)? {
            Some(events) => CacheSlot::pulled(events),
            None => CacheSlot::fresh_miss(),
        };
        self.events.insert(height, slot);
        Ok(())
    }

    pub fn sidechain_events(&mut self, height: i32) -> Result<Option<&SidechainEvents>, ViewError> {
        self.fetch_sidechain_events(height)?;
        Ok(self.events.get(&height).and_then(|slot| slot.value.as_ref()))
    }

    /// Scoped mutation of the event set of one height. An empty set is the
    /// "equivalent to absent" state and is normalized to a deletion.
    pub fn modify_sidechain_events<R>(
        &mut self,
        height: i32,
        f: impl FnOnce(&mut SidechainEvents) -> R,
    ) -> Result<R, ViewError> {
        self.fetch_sidechain_events(height)?;
        let slot = self
            .events
            .entry(height)
            .or_insert_with(CacheSlot::fresh_miss);
        let backing_absent = slot.flag == CacheFlag::Fresh;
        let mut events = slot.value.take().unwrap_or_default();
        let out = f(&mut events);
        if events.is_null() {
            slot.value = None;
            slot.flag = if backing_absent {
                CacheFlag::Fresh
            } else {
                CacheFlag::Erased
            };
        } else {
            slot.value = Some(events);
            slot.flag = if backing_absent {
                CacheFlag::Fresh
            } else {
                CacheFlag::Dirty
            };
        }
        Ok(out)
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best_block = Some(hash);
    }

    pub fn set_best_anchor(&mut self, root: Hash256) {
        self.best_anchor = Some(root);
    }

    /// Merges every cached delta into the backing view in one atomic commit.
    /// On failure the cache's in-memory content is left exactly as it was.
    pub fn flush(&mut self) -> Result<(), ViewError> {
        let mut data = CacheFlushData {
            coins: mem::take(&mut self.coins),
            anchors: mem::take(&mut self.anchors),
            nullifiers: mem::take(&mut self.nullifiers),
            sidechains: mem::take(&mut self.sidechains),
            events: mem::take(&mut self.events),
            csw_nullifiers: mem::take(&mut self.csw_nullifiers),
            best_block: self.best_block,
            best_anchor: self.best_anchor,
        };
        match self.base.batch_write(&mut data) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.coins = mem::take(&mut data.coins);
                self.anchors = mem::take(&mut data.anchors);
                self.nullifiers = mem::take(&mut data.nullifiers);
                self.sidechains = mem::take(&mut data.sidechains);
                self.events = mem::take(&mut data.events);
                self.csw_nullifiers = mem::take(&mut data.csw_nullifiers);
                Err(err)
            }
        }
    }
}

fn merge_coin_entry(
    parent: &mut HashMap<Hash256, CoinsCacheEntry>,
    txid: Hash256,
    child: CoinsCacheEntry,
) {
    match parent.entry(txid) {
        Entry::Vacant(vacant) => {
            if child.coin.is_pruned() {
                if !child.is_fresh() {
                    // Propagate the deletion further down.
                    vacant.insert(CoinsCacheEntry {
                        coin: Coin::default(),
                        flags: FLAG_DIRTY,
                    });
                }
            } else {
                vacant.insert(CoinsCacheEntry {
                    coin: child.coin,
                    flags: FLAG_DIRTY | FLAG_FRESH,
                });
            }
        }
        Entry::Occupied(mut occupied) => {
            if child.coin.is_pruned() && occupied.get().is_fresh() {
                occupied.remove();
            } else {
                let flags = occupied.get().flags | FLAG_DIRTY;
                occupied.insert(CoinsCacheEntry {
                    coin: child.coin,
                    flags,
                });
            }
        }
    }
}

fn merge_membership_entry(
    parent: &mut HashMap<Hash256, MembershipEntry>,
    key: Hash256,
    child: MembershipEntry,
) {
    match parent.entry(key) {
        Entry::Vacant(vacant) => {
            if child.entered {
                vacant.insert(MembershipEntry {
                    entered: true,
                    flags: FLAG_DIRTY | FLAG_FRESH,
                });
            } else if !child.is_fresh() {
                vacant.insert(MembershipEntry {
                    entered: false,
                    flags: FLAG_DIRTY,
                });
            }
        }
        Entry::Occupied(mut occupied) => {
            if !child.entered && occupied.get().is_fresh() {
                occupied.remove();
            } else {
                let flags = occupied.get().flags | FLAG_DIRTY;
                occupied.insert(MembershipEntry {
                    entered: child.entered,
                    flags,
                });
            }
        }
    }
}

fn merge_slot<K: Copy + Eq + Hash, T>(
    parent: &mut HashMap<K, CacheSlot<T>>,
    key: K,
    child: CacheSlot<T>,
) {
    // Pulled but unmodified slots carry no change for the parent.
    if child.flag == CacheFlag::Default {
        return;
    }
    match parent.entry(key) {
        Entry::Vacant(vacant) => {
            if child.value.is_some() {
                vacant.insert(CacheSlot {
                    value: child.value,
                    flag: CacheFlag::Fresh,
                });
            } else if child.flag != CacheFlag::Fresh {
                vacant.insert(CacheSlot {
                    value: None,
                    flag: CacheFlag::Erased,
                });
            }
        }
        Entry::Occupied(mut occupied) => {
            let backing_absent = occupied.get().flag == CacheFlag::Fresh;
            if child.value.is_none() || child.flag == CacheFlag::Erased {
                if backing_absent {
                    occupied.remove();
                } else {
                    *occupied.get_mut() = CacheSlot {
                        value: None,
                        flag: CacheFlag::Erased,
                    };
                }
            } else {
                let flag = if backing_absent {
                    CacheFlag::Fresh
                } else {
                    CacheFlag::Dirty
                };
                *occupied.get_mut() = CacheSlot {
                    value: child.value,
                    flag,
                };
            }
        }
    }
}

fn validate_slot_merge<K: Eq + Hash, T>(
    parent: &HashMap<K, CacheSlot<T>>,
    child: &HashMap<K, CacheSlot<T>>,
    family: &'static str,
) -> Result<(), ViewError> {
    for (key, slot) in child {
        if slot.flag == CacheFlag::Default {
            continue;
        }
        if slot.value.is_some() && slot.flag != CacheFlag::Fresh && !parent.contains_key(key) {
            return Err(ViewError::InconsistentFlush(family));
        }
    }
    Ok(())
}

impl<V: CoinsView> CoinsView for CoinsViewCache<V> {
    fn coins(&mut self, txid: &Hash256) -> Result<Option<Coin>, ViewError> {
        Ok(self.access_coins(txid)?.cloned())
    }

    fn have_coins(&mut self, txid: &Hash256) -> Result<bool, ViewError> {
        Ok(self.access_coins(txid)?.is_some())
    }

    fn have_anchor(&mut self, root: &Hash256) -> Result<bool, ViewError> {
        self.fetch_anchor(root)
    }

    fn have_shielded_nullifier(&mut self, nullifier: &Hash256) -> Result<bool, ViewError> {
        self.fetch_shielded_nullifier(nullifier)
    }

    fn have_csw_nullifier(&mut self, key: &CswNullifierKey) -> Result<bool, ViewError> {
        self.fetch_csw_nullifier(key)
    }

    fn get_sidechain(&mut self, sc_id: &SidechainId) -> Result<Option<Sidechain>, ViewError> {
        Ok(self.sidechain(sc_id)?.cloned())
    }

    fn have_sidechain(&mut self, sc_id: &SidechainId) -> Result<bool, ViewError> {
        Ok(self.sidechain(sc_id)?.is_some())
    }

    fn sidechain_ids(&mut self) -> Result<Vec<SidechainId>, ViewError> {
        let mut ids: BTreeSet<SidechainId> = self.base.sidechain_ids()?.into_iter().collect();
        for (sc_id, slot) in &self.sidechains {
            if slot.value.is_some() {
                ids.insert(*sc_id);
            } else {
                ids.remove(sc_id);
            }
        }
        Ok(ids.into_iter().collect())
    }

    fn get_sidechain_events(&mut self, height: i32) -> Result<Option<SidechainEvents>, ViewError> {
        Ok(self.sidechain_events(height)?.cloned())
    }

    fn best_block(&mut self) -> Result<Option<Hash256>, ViewError> {
        match self.best_block {
            Some(hash) => Ok(Some(hash)),
            None => self.base.best_block(),
        }
    }

    fn best_anchor(&mut self) -> Result<Option<Hash256>, ViewError> {
        match self.best_anchor {
            Some(root) => Ok(Some(root)),
            None => self.base.best_anchor(),
        }
    }

    /// Merges a child cache's deltas into this cache's maps. Validation runs
    /// before any mutation so a rejected flush leaves both layers untouched.
    fn batch_write(&mut self, data: &mut CacheFlushData) -> Result<(), ViewError> {
        for (txid, entry) in &data.coins {
            if entry.is_dirty()
                && !entry.is_fresh()
                && !entry.coin.is_pruned()
                && !self.coins.contains_key(txid)
            {
                return Err(ViewError::InconsistentFlush(
                    "non-fresh coin entry unknown to the parent cache",
                ));
            }
        }
        for (key, entry) in &data.anchors {
            if entry.is_dirty() && !entry.is_fresh() && entry.entered && !self.anchors.contains_key(key)
            {
                return Err(ViewError::InconsistentFlush(
                    "non-fresh anchor entry unknown to the parent cache",
                ));
            }
        }
        for (key, entry) in &data.nullifiers {
            if entry.is_dirty()
                && !entry.is_fresh()
                && entry.entered
                && !self.nullifiers.contains_key(key)
            {
                return Err(ViewError::InconsistentFlush(
                    "non-fresh nullifier entry unknown to the parent cache",
                ));
            }
        }
        validate_slot_merge(&self.sidechains, &data.sidechains, "sidechains")?;
        validate_slot_merge(&self.events, &data.events, "sidechain events")?;
        validate_slot_merge(&self.csw_nullifiers, &data.csw_nullifiers, "csw nullifiers")?;

        for (txid, entry) in data.coins.drain() {
            if entry.is_dirty() {
                merge_coin_entry(&mut self.coins, txid, entry);
            }
        }
        for (key, entry) in data.anchors.drain() {
            if entry.is_dirty() {
                merge_membership_entry(&mut self.anchors, key, entry);
            }
        }
        for (key, entry) in data.nullifiers.drain() {
            if entry.is_dirty() {
                merge_membership_entry(&mut self.nullifiers, key, entry);
            }
        }
        for (sc_id, slot) in data.sidechains.drain() {
            merge_slot(&mut self.sidechains, sc_id, slot);
        }
        for (height, slot) in data.events.drain() {
            merge_slot(&mut self.events, height, slot);
        }
        for (key, slot) in data.csw_nullifiers.drain() {
            merge_slot(&mut self.csw_nullifiers, key, slot);
        }
        if let Some(hash) = data.best_block {
            self.best_block = Some(hash);
        }
        if let Some(root) = data.best_anchor {
            self.best_anchor = Some(root);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::CoinsViewDb;
    use zend_primitives::{SidechainFixedParams, TxOut};
    use zend_storage::memory::MemoryStore;

    fn db_cache() -> CoinsViewCache<CoinsViewDb<MemoryStore>> {
        CoinsViewCache::new(CoinsViewDb::new(MemoryStore::new()))
    }

    fn params() -> SidechainFixedParams {
        SidechainFixedParams {
            version: 0,
            withdrawal_epoch_length: 10,
            cert_vk: vec![1],
            csw_vk: Vec::new(),
            mbtr_request_data_length: 0,
            custom_field_sizes: Vec::new(),
        }
    }

    fn coin_with_value(value: i64) -> Coin {
        Coin {
            is_coin_base: false,
            outputs: vec![Some(TxOut {
                value,
                script_pubkey: vec![0x51],
            })],
            origin_height: 1,
            source_version: 1,
            first_bwt_index: None,
            bwt_maturity_height: 0,
        }
    }

    #[test]
    fn reads_alone_flush_nothing() {
        let mut cache = db_cache();
        assert!(!cache.have_coins(&[1; 32]).expect("read"));
        assert!(cache.sidechain(&[2; 32]).expect("read").is_none());
        assert!(cache.sidechain_events(10).expect("read").is_none());
        // Misses for the tombstone families are cached.
        assert!(cache.sidechains.contains_key(&[2; 32]));
        cache.flush().expect("flush");
        let mut db = CoinsViewDb::new(MemoryStore::new());
        assert_eq!(db.sidechain_ids().expect("scan"), Vec::<SidechainId>::new());
    }

    #[test]
    fn fresh_entry_pruned_on_release_is_dropped() {
        let mut cache = db_cache();
        cache
            .modify_coins(&[7; 32], |coin| {
                *coin = coin_with_value(50);
                coin.spend(0);
            })
            .expect("modify");
        assert!(!cache.coins.contains_key(&[7; 32]));
    }

    #[test]
    fn modify_then_flush_persists() {
        let mut cache = db_cache();
        cache
            .modify_coins(&[7; 32], |coin| *coin = coin_with_value(50))
            .expect("modify");
        cache
            .modify_sidechain(&[3; 32], |slot| {
                *slot = Some(Sidechain::new(5, [9; 32], params()));
            })
            .expect("modify");
        cache.set_best_block([0xbb; 32]);
        cache.flush().expect("flush");

        assert!(cache.base_mut().have_coins(&[7; 32]).expect("read"));
        assert!(cache.base_mut().have_sidechain(&[3; 32]).expect("read"));
        assert_eq!(cache.base_mut().best_block().expect("read"), Some([0xbb; 32]));
        assert_eq!(cache.cached_entries(), 0);
    }

    #[test]
    fn delete_after_cached_miss_does_not_resurrect() {
        let mut cache = db_cache();
        assert!(cache.sidechain(&[4; 32]).expect("read").is_none());
        cache.modify_sidechain(&[4; 32], |slot| *slot = None).expect("modify");
        cache.flush().expect("flush");
        assert!(!cache.base_mut().have_sidechain(&[4; 32]).expect("read"));
    }

    #[test]
    fn chained_caches_merge_through_to_store() {
        let mut parent = db_cache();
        parent
            .modify_coins(&[1; 32], |coin| *coin = coin_with_value(10))
            .expect("modify");

        let mut child = CoinsViewCache::new(parent);
        child
            .modify_coins(&[2; 32], |coin| *coin = coin_with_value(20))
            .expect("modify");
        // Spend the parent's coin from the child layer.
        child
            .modify_coins(&[1; 32], |coin| {
                coin.spend(0);
            })
            .expect("modify");
        child
            .modify_sidechain(&[5; 32], |slot| {
                *slot = Some(Sidechain::new(5, [9; 32], params()));
            })
            .expect("modify");
        child.flush().expect("flush child");

        let mut parent = child.base;
        assert!(!parent.have_coins(&[1; 32]).expect("read"));
        assert!(parent.have_coins(&[2; 32]).expect("read"));
        assert!(parent.have_sidechain(&[5; 32]).expect("read"));

        parent.flush().expect("flush parent");
        // The spent coin was fresh at the parent layer, so nothing reaches
        // the store for it.
        assert!(!parent.base_mut().have_coins(&[1; 32]).expect("read"));
        assert!(parent.base_mut().have_coins(&[2; 32]).expect("read"));
        assert!(parent.base_mut().have_sidechain(&[5; 32]).expect("read"));
    }

    #[test]
    fn child_erase_propagates_over_parent_pull() {
        let mut db = CoinsViewDb::new(MemoryStore::new());
        let mut data = CacheFlushData::default();
        data.sidechains.insert(
            [6; 32],
            CacheSlot {
                value: Some(Sidechain::new(5, [9; 32], params())),
                flag: CacheFlag::Fresh,
            },
        );
        db.batch_write(&mut data).expect("seed");

        let mut parent = CoinsViewCache::new(db);
        assert!(parent.have_sidechain(&[6; 32]).expect("read"));
        let mut child = CoinsViewCache::new(parent);
        child.modify_sidechain(&[6; 32], |slot| *slot = None).expect("modify");
        child.flush().expect("flush child");

        let mut parent = child.base;
        assert!(!parent.have_sidechain(&[6; 32]).expect("read"));
        parent.flush().expect("flush parent");
        assert!(!parent.base_mut().have_sidechain(&[6; 32]).expect("read"));
    }

    #[test]
    fn pulled_slot_stays_clean_through_a_child_flush() {
        let mut parent = db_cache();
        parent
            .modify_sidechain(&[7; 32], |slot| {
                *slot = Some(Sidechain::new(5, [9; 32], params()));
            })
            .expect("modify");
        parent.flush().expect("flush parent");

        let mut child = CoinsViewCache::new(parent);
        // Read-only pull through both layers.
        assert!(child.sidechain(&[7; 32]).expect("read").is_some());
        child.flush().expect("flush child");

        // The merge must not promote the unmodified slot; a second parent
        // flush then has nothing to write.
        let parent = child.base;
        let slot = parent.sidechains.get(&[7; 32]).expect("cached pull");
        assert_eq!(slot.flag, CacheFlag::Default);
    }

    #[test]
    fn failed_flush_leaves_cache_intact() {
        let store = MemoryStore::new();
        let mut cache = CoinsViewCache::new(CoinsViewDb::new(store));
        cache
            .modify_coins(&[8; 32], |coin| *coin = coin_with_value(30))
            .expect("modify");
        cache.base().store().fail_next_batch();
        assert!(cache.flush().is_err());
        // The delta survived the failure and lands on retry.
        assert!(cache.coins.contains_key(&[8; 32]));
        cache.flush().expect("flush");
        assert!(cache.base_mut().have_coins(&[8; 32]).expect("read"));
    }

    #[test]
    fn sidechain_ids_union_base_and_overlay() {
        let mut cache = db_cache();
        cache
            .modify_sidechain(&[1; 32], |slot| {
                *slot = Some(Sidechain::new(5, [9; 32], params()));
            })
            .expect("modify");
        cache.flush().expect("flush");
        cache
            .modify_sidechain(&[2; 32], |slot| {
                *slot = Some(Sidechain::new(6, [9; 32], params()));
            })
            .expect("modify");
        cache.modify_sidechain(&[1; 32], |slot| *slot = None).expect("modify");
        assert_eq!(cache.sidechain_ids().expect("scan"), vec![[2; 32]]);
    }
}
