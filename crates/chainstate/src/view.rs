//! The state-view contract shared by the durable store and the overlay cache.

use std::collections::HashMap;

use thiserror::Error;
use zend_consensus::Hash256;
use zend_primitives::{DecodeError, FieldElement, SidechainId};
use zend_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coins::Coin;
use crate::events::SidechainEvents;
use crate::sidechains::Sidechain;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("inconsistent flush: {0}")]
    InconsistentFlush(&'static str),
}

/// In-memory value may differ from the backing view.
pub const FLAG_DIRTY: u8 = 1 << 0;
/// The backing view holds no entry for this key; it can be inserted on flush
/// without merge-checking, and discarded instead of tombstoned on delete.
pub const FLAG_FRESH: u8 = 1 << 1;

/// Cache entry for the coin family. Absence and the pruned coin coincide, so
/// two flag bits suffice and they may combine.
#[derive(Clone, Debug, Default)]
pub struct CoinsCacheEntry {
    pub coin: Coin,
    pub flags: u8,
}

impl CoinsCacheEntry {
    pub fn is_dirty(&self) -> bool {
        self.flags & FLAG_DIRTY != 0
    }

    pub fn is_fresh(&self) -> bool {
        self.flags & FLAG_FRESH != 0
    }
}

/// Cache entry for presence-only families (anchors, shielded nullifiers).
#[derive(Clone, Copy, Debug, Default)]
pub struct MembershipEntry {
    pub entered: bool,
    pub flags: u8,
}

impl MembershipEntry {
    pub fn is_dirty(&self) -> bool {
        self.flags & FLAG_DIRTY != 0
    }

    pub fn is_fresh(&self) -> bool {
        self.flags & FLAG_FRESH != 0
    }
}

/// Exclusive lifecycle tag for the tombstone-capable families (sidechains,
/// events, ceased-withdrawal nullifiers).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CacheFlag {
    /// Pulled from the backing view, unchanged.
    #[default]
    Default,
    /// The backing view has no entry for this key.
    Fresh,
    /// Modified relative to the backing view.
    Dirty,
    /// The backing view holds an entry that must be removed on flush.
    Erased,
}

/// Tombstone-capable cache slot. `value == None` is the "equivalent to absent"
/// state; combined with `Fresh` it records a backing-view miss so a later
/// delete does not re-trigger a pull.
#[derive(Clone, Debug)]
pub struct CacheSlot<T> {
    pub value: Option<T>,
    pub flag: CacheFlag,
}

impl<T> CacheSlot<T> {
    pub fn fresh_miss() -> Self {
        Self {
            value: None,
            flag: CacheFlag::Fresh,
        }
    }

    pub fn pulled(value: T) -> Self {
        Self {
            value: Some(value),
            flag: CacheFlag::Default,
        }
    }
}

/// Key of a ceased-sidechain withdrawal nullifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CswNullifierKey {
    pub sc_id: SidechainId,
    pub nullifier: FieldElement,
}

impl CswNullifierKey {
    pub fn key_bytes(&self) -> [u8; 64] {
        let mut key = [0u8; 64];
        key[..32].copy_from_slice(&self.sc_id);
        key[32..].copy_from_slice(&self.nullifier);
        key
    }
}

/// The six typed delta maps of one atomic commit, plus the chain cursors.
///
/// `batch_write` consumes the data on success and leaves it untouched on
/// failure, so a failed flush never loses the caller's in-memory state.
#[derive(Default)]
pub struct CacheFlushData {
    pub coins: HashMap<Hash256, CoinsCacheEntry>,
    pub anchors: HashMap<Hash256, MembershipEntry>,
    pub nullifiers: HashMap<Hash256, MembershipEntry>,
    pub sidechains: HashMap<SidechainId, CacheSlot<Sidechain>>,
    pub events: HashMap<i32, CacheSlot<SidechainEvents>>,
    pub csw_nullifiers: HashMap<CswNullifierKey, CacheSlot<()>>,
    pub best_block: Option<Hash256>,
    pub best_anchor: Option<Hash256>,
}

impl CacheFlushData {
    pub fn clear(&mut self) {
        self.coins.clear();
        self.anchors.clear();
        self.nullifiers.clear();
        self.sidechains.clear();
        self.events.clear();
        self.csw_nullifiers.clear();
    }
}

/// Read contract plus the single atomic multi-map commit.
///
/// Reads take `&mut self` because implementations may pull lazily; they fail
/// closed, reporting absence rather than erroring on unknown keys.
pub trait CoinsView {
    fn coins(&mut self, txid: &Hash256) -> Result<Option<Coin>, ViewError>;
    fn have_coins(&mut self, txid: &Hash256) -> Result<bool, ViewError>;
    fn have_anchor(&mut self, root: &Hash256) -> Result<bool, ViewError>;
    fn have_shielded_nullifier(&mut self, nullifier: &Hash256) -> Result<bool, ViewError>;
    fn have_csw_nullifier(&mut self, key: &CswNullifierKey) -> Result<bool, ViewError>;
    fn get_sidechain(&mut self, sc_id: &SidechainId) -> Result<Option<Sidechain>, ViewError>;
    fn have_sidechain(&mut self, sc_id: &SidechainId) -> Result<bool, ViewError>;
    fn sidechain_ids(&mut self) -> Result<Vec<SidechainId>, ViewError>;
    fn get_sidechain_events(&mut self, height: i32) -> Result<Option<SidechainEvents>, ViewError>;
    fn best_block(&mut self) -> Result<Option<Hash256>, ViewError>;
    fn best_anchor(&mut self) -> Result<Option<Hash256>, ViewError>;
    fn batch_write(&mut self, data: &mut CacheFlushData) -> Result<(), ViewError>;
}

const META_BEST_BLOCK: &[u8] = b"best_block";
const META_BEST_ANCHOR: &[u8] = b"best_anchor";
const PRESENT: [u8; 1] = [1];

fn events_key(height: i32) -> [u8; 4] {
    // Big-endian so height-ordered range scans work at the store level.
    (height as u32).to_be_bytes()
}

/// Durable implementation of the view contract over a key-value store.
pub struct CoinsViewDb<S> {
    store: S,
}

impl<S> CoinsViewDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> CoinsViewDb<S> {
    fn read_meta_hash(&self, key: &[u8]) -> Result<Option<Hash256>, ViewError> {
        match self.store.get(Column::Meta, key)? {
            Some(bytes) => {
                let hash: Hash256 = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| DecodeError::InvalidLength)?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore> CoinsView for CoinsViewDb<S> {
    fn coins(&mut self, txid: &Hash256) -> Result<Option<Coin>, ViewError> {
        match self.store.get(Column::Coins, txid)? {
            Some(bytes) => Ok(Some(Coin::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn have_coins(&mut self, txid: &Hash256) -> Result<bool, ViewError> {
        Ok(self.store.get(Column::Coins, txid)?.is_some())
    }

    fn have_anchor(&mut self, root: &Hash256) -> Result<bool, ViewError> {
        Ok(self.store.get(Column::Anchors, root)?.is_some())
    }

    fn have_shielded_nullifier(&mut self, nullifier: &Hash256) -> Result<bool, ViewError> {
        Ok(self.store.get(Column::Nullifiers, nullifier)?.is_some())
    }

    fn have_csw_nullifier(&mut self, key: &CswNullifierKey) -> Result<bool, ViewError> {
        Ok(self
            .store
            .get(Column::CswNullifiers, &key.key_bytes())?
            .is_some())
    }

    fn get_sidechain(&mut self, sc_id: &SidechainId) -> Result<Option<Sidechain>, ViewError> {
        match self.store.get(Column::Sidechains, sc_id)? {
            Some(bytes) => Ok(Some(Sidechain::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn have_sidechain(&mut self, sc_id: &SidechainId) -> Result<bool, ViewError> {
        Ok(self.store.get(Column::Sidechains, sc_id)?.is_some())
    }

    fn sidechain_ids(&mut self) -> Result<Vec<SidechainId>, ViewError> {
        let mut ids = Vec::new();
        for (key, _) in self.store.scan_prefix(Column::Sidechains, &[])? {
            let id: SidechainId = key
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::InvalidLength)?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_sidechain_events(&mut self, height: i32) -> Result<Option<SidechainEvents>, ViewError> {
        match self.store.get(Column::SidechainEvents, &events_key(height))? {
            Some(bytes) => Ok(Some(SidechainEvents::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn best_block(&mut self) -> Result<Option<Hash256>, ViewError> {
        self.read_meta_hash(META_BEST_BLOCK)
    }

    fn best_anchor(&mut self) -> Result<Option<Hash256>, ViewError> {
        self.read_meta_hash(META_BEST_ANCHOR)
    }

    fn batch_write(&mut self, data: &mut CacheFlushData) -> Result<(), ViewError> {
        let mut batch = WriteBatch::new();
        for (txid, entry) in &data.coins {
            if !entry.is_dirty() {
                continue;
            }
            if entry.coin.is_pruned() {
                batch.delete(Column::Coins, txid.to_vec());
            } else {
                batch.put(Column::Coins, txid.to_vec(), entry.coin.encode());
            }
        }
        for (root, entry) in &data.anchors {
            if !entry.is_dirty() {
                continue;
            }
            if entry.entered {
                batch.put(Column::Anchors, root.to_vec(), PRESENT.to_vec());
            } else {
                batch.delete(Column::Anchors, root.to_vec());
            }
        }
        for (nullifier, entry) in &data.nullifiers {
            if !entry.is_dirty() {
                continue;
            }
            if entry.entered {
                batch.put(Column::Nullifiers, nullifier.to_vec(), PRESENT.to_vec());
            } else {
                batch.delete(Column::Nullifiers, nullifier.to_vec());
            }
        }
        for (sc_id, slot) in &data.sidechains {
            match (slot.flag, &slot.value) {
                (CacheFlag::Default, _) => {}
                (CacheFlag::Erased, _) | (_, None) => {
                    batch.delete(Column::Sidechains, sc_id.to_vec());
                }
                (_, Some(sidechain)) => {
                    batch.put(Column::Sidechains, sc_id.to_vec(), sidechain.encode());
                }
            }
        }
        for (height, slot) in &data.events {
            match (slot.flag, &slot.value) {
                (CacheFlag::Default, _) => {}
                (CacheFlag::Erased, _) | (_, None) => {
                    batch.delete(Column::SidechainEvents, events_key(*height).to_vec());
                }
                (_, Some(events)) => {
                    batch.put(
                        Column::SidechainEvents,
                        events_key(*height).to_vec(),
                        events.encode(),
                    );
                }
            }
        }
        for (key, slot) in &data.csw_nullifiers {
            match slot.flag {
                CacheFlag::Default => {}
                CacheFlag::Erased => {
                    batch.delete(Column::CswNullifiers, key.key_bytes().to_vec());
                }
                CacheFlag::Fresh | CacheFlag::Dirty => {
                    batch.put(
                        Column::CswNullifiers,
                        key.key_bytes().to_vec(),
                        PRESENT.to_vec(),
                    );
                }
            }
        }
        if let Some(best_block) = data.best_block {
            batch.put(Column::Meta, META_BEST_BLOCK.to_vec(), best_block.to_vec());
        }
        if let Some(best_anchor) = data.best_anchor {
            batch.put(Column::Meta, META_BEST_ANCHOR.to_vec(), best_anchor.to_vec());
        }
        self.store.write_batch(batch)?;
        data.clear();
        Ok(())
    }
}
