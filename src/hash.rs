// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The object index.
//!
//! Every live object (directory inode, file inode, or data block)
//! has exactly one entry here, keyed by its 32-bit id.  The id
//! space is partitioned so the id alone identifies the object
//! kind; the sentinel `ID_NONE` means "no object".  The index is a
//! fixed 256-bucket hash keyed by `id mod 256`; a successful
//! lookup promotes its entry to the front of the bucket, so each
//! bucket stays roughly MRU-ordered.

use crate::block::BlockEntry;
use crate::flash::Location;
use crate::inode::InodeEntry;

use alloc::vec::Vec;

pub(crate) const ID_NONE: u32 = 0xffff_ffff;
pub(crate) const ID_ROOT_DIR: u32 = 0;

pub(crate) const ID_DIR_MIN: u32 = 0;
pub(crate) const ID_DIR_MAX: u32 = 0x1000_0000;
pub(crate) const ID_FILE_MIN: u32 = 0x1000_0000;
pub(crate) const ID_FILE_MAX: u32 = 0x8000_0000;
pub(crate) const ID_BLOCK_MIN: u32 = 0x8000_0000;
pub(crate) const ID_BLOCK_MAX: u32 = 0xffff_ffff;

pub(crate) const HASH_SIZE: usize = 256;

pub(crate) fn id_is_dir(id: u32) -> bool {
    (ID_DIR_MIN..ID_DIR_MAX).contains(&id)
}

pub(crate) fn id_is_file(id: u32) -> bool {
    (ID_FILE_MIN..ID_FILE_MAX).contains(&id)
}

pub(crate) fn id_is_inode(id: u32) -> bool {
    id_is_dir(id) || id_is_file(id)
}

pub(crate) fn id_is_block(id: u32) -> bool {
    (ID_BLOCK_MIN..ID_BLOCK_MAX).contains(&id)
}

/// One indexed object.
pub(crate) enum Entry {
    Inode(InodeEntry),
    Block(BlockEntry),
}

impl Entry {
    pub(crate) fn id(&self) -> u32 {
        match self {
            Entry::Inode(ie) => ie.id,
            Entry::Block(be) => be.id,
        }
    }

    pub(crate) fn loc(&self) -> Location {
        match self {
            Entry::Inode(ie) => ie.loc,
            Entry::Block(be) => be.loc,
        }
    }

    pub(crate) fn set_loc(&mut self, loc: Location) {
        match self {
            Entry::Inode(ie) => ie.loc = loc,
            Entry::Block(be) => be.loc = loc,
        }
    }
}

pub(crate) struct Index {
    buckets: Vec<Vec<Entry>>,
    ninodes: usize,
    nblocks: usize,
}

impl Index {
    pub(crate) fn new() -> Index {
        let mut buckets = Vec::with_capacity(HASH_SIZE);
        for _ in 0..HASH_SIZE {
            buckets.push(Vec::new());
        }
        Index { buckets, ninodes: 0, nblocks: 0 }
    }

    fn bucket(id: u32) -> usize {
        (id as usize) % HASH_SIZE
    }

    /// Looks up an entry, promoting it to the front of its
    /// bucket.
    pub(crate) fn find(&mut self, id: u32) -> Option<&Entry> {
        let bucket = &mut self.buckets[Self::bucket(id)];
        let pos = bucket.iter().position(|e| e.id() == id)?;
        if pos != 0 {
            let entry = bucket.remove(pos);
            bucket.insert(0, entry);
        }
        bucket.first()
    }

    /// Looks up an entry for mutation, promoting it to the front
    /// of its bucket.
    pub(crate) fn find_mut(&mut self, id: u32) -> Option<&mut Entry> {
        let bucket = &mut self.buckets[Self::bucket(id)];
        let pos = bucket.iter().position(|e| e.id() == id)?;
        if pos != 0 {
            let entry = bucket.remove(pos);
            bucket.insert(0, entry);
        }
        bucket.first_mut()
    }

    /// Non-promoting membership test.
    pub(crate) fn contains(&self, id: u32) -> bool {
        self.buckets[Self::bucket(id)].iter().any(|e| e.id() == id)
    }

    pub(crate) fn insert(&mut self, entry: Entry) {
        debug_assert!(!self.contains(entry.id()));
        match &entry {
            Entry::Inode(_) => self.ninodes += 1,
            Entry::Block(_) => self.nblocks += 1,
        }
        self.buckets[Self::bucket(entry.id())].insert(0, entry);
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<Entry> {
        let bucket = &mut self.buckets[Self::bucket(id)];
        let pos = bucket.iter().position(|e| e.id() == id)?;
        let entry = bucket.remove(pos);
        match &entry {
            Entry::Inode(_) => self.ninodes -= 1,
            Entry::Block(_) => self.nblocks -= 1,
        }
        Some(entry)
    }

    pub(crate) fn inode_count(&self) -> usize {
        self.ninodes
    }

    pub(crate) fn block_count(&self) -> usize {
        self.nblocks
    }

    /// Snapshots every indexed id.  Iteration passes that mutate
    /// the index (GC, restore) work from a snapshot so lookups
    /// stay simple.
    pub(crate) fn ids(&self) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.ninodes + self.nblocks);
        for bucket in &self.buckets {
            ids.extend(bucket.iter().map(Entry::id));
        }
        ids
    }

    pub(crate) fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.ninodes = 0;
        self.nblocks = 0;
    }
}
