// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The inode/block cache.
//!
//! Finding the block holding byte N of a file means walking the
//! reverse chain from the tail, which costs one flash read per
//! block.  The cache remembers decoded block headers together
//! with the file offset each block covers, per file inode, so
//! repeated and sequential reads resolve without walking.  Two
//! fixed budgets bound it: one for cached inodes, one for cached
//! blocks across all inodes.  Both lists are LRU; the inode list
//! promotes on every access and eviction takes the coldest.
//!
//! Only metadata is cached.  Block data always comes from flash.

use crate::block::Block;
use crate::flash::{Flash, Location};
use crate::fs::State;
use crate::result::{Error, Result};

use alloc::vec::Vec;

/// One cached block: the decoded header, where its record lives,
/// and the file offset of its first data byte.
#[derive(Clone, Copy)]
pub(crate) struct CacheBlock {
    pub(crate) block: Block,
    pub(crate) loc: Location,
    pub(crate) file_offset: u32,
}

/// One cached file inode.
pub(crate) struct CacheInode {
    pub(crate) inode_id: u32,
    pub(crate) file_size: u32,
    /// Cached blocks, sorted ascending by file offset.
    pub(crate) blocks: Vec<CacheBlock>,
}

pub(crate) struct Cache {
    /// Cached inodes, most recently used first.
    pub(crate) inodes: Vec<CacheInode>,
    /// Total cached blocks across all inodes.
    pub(crate) nblocks: usize,
}

impl Cache {
    pub(crate) fn new() -> Cache {
        Cache { inodes: Vec::new(), nblocks: 0 }
    }

    pub(crate) fn clear(&mut self) {
        self.inodes.clear();
        self.nblocks = 0;
    }
}

impl<F: Flash> State<F> {
    /// Returns the cache slot for a file inode, building it if
    /// necessary.  The returned slot is always the front of the
    /// LRU list.  Building a fresh cache inode costs one walk of
    /// the block chain to learn the file size.
    pub(crate) fn cache_inode_ensure(&mut self, id: u32) -> Result<usize> {
        if let Some(pos) =
            self.cache.inodes.iter().position(|ci| ci.inode_id == id)
        {
            if pos != 0 {
                let ci = self.cache.inodes.remove(pos);
                self.cache.inodes.insert(0, ci);
            }
            return Ok(0);
        }

        if self.cache.inodes.len() >= self.config.max_cache_inodes {
            if let Some(evicted) = self.cache.inodes.pop() {
                self.cache.nblocks -= evicted.blocks.len();
            }
        }

        let file_size = self.inode_calc_data_length(id)?;
        self.cache.inodes.insert(
            0,
            CacheInode { inode_id: id, file_size, blocks: Vec::new() },
        );
        Ok(0)
    }

    /// Drops a file inode's cache entirely.
    pub(crate) fn cache_inode_delete(&mut self, id: u32) {
        if let Some(pos) =
            self.cache.inodes.iter().position(|ci| ci.inode_id == id)
        {
            let ci = self.cache.inodes.remove(pos);
            self.cache.nblocks -= ci.blocks.len();
        }
    }

    /// Drops every cached object.  Called when record locations
    /// move wholesale (garbage collection).
    pub(crate) fn cache_clear(&mut self) {
        self.cache.clear();
    }

    /// Updates a cached inode's file size without a chain walk.
    pub(crate) fn cache_set_file_size(&mut self, id: u32, size: u32) {
        if let Some(ci) =
            self.cache.inodes.iter_mut().find(|ci| ci.inode_id == id)
        {
            ci.file_size = size;
        }
    }

    /// Drops cached blocks at or beyond the given file offset.
    /// A write that supersedes a block invalidates it and
    /// everything after it.
    pub(crate) fn cache_invalidate_from(&mut self, id: u32, offset: u32) {
        if let Some(ci) =
            self.cache.inodes.iter_mut().find(|ci| ci.inode_id == id)
        {
            let before = ci.blocks.len();
            ci.blocks.retain(|cb| {
                cb.file_offset + cb.block.data_len as u32 <= offset
            });
            self.cache.nblocks -= before - ci.blocks.len();
        }
    }

    /// Inserts a cached block for the inode at the front of the
    /// LRU list, evicting from the coldest inode as needed.
    fn cache_block_insert(&mut self, cb: CacheBlock) {
        while self.cache.nblocks >= self.config.max_cache_blocks {
            let Some(pos) = self
                .cache
                .inodes
                .iter()
                .rposition(|ci| !ci.blocks.is_empty())
            else {
                break;
            };
            self.cache.inodes[pos].blocks.remove(0);
            self.cache.nblocks -= 1;
        }

        let ci = &mut self.cache.inodes[0];
        let pos = ci
            .blocks
            .iter()
            .position(|b| b.file_offset > cb.file_offset)
            .unwrap_or(ci.blocks.len());
        debug_assert!(
            pos == 0 || ci.blocks[pos - 1].file_offset != cb.file_offset
        );
        ci.blocks.insert(pos, cb);
        self.cache.nblocks += 1;
    }

    /// Returns the cached block containing the given file offset,
    /// walking the chain backward from the nearest known point and
    /// caching every block visited on the way.
    pub(crate) fn cache_seek(
        &mut self,
        id: u32,
        to: u32,
    ) -> Result<CacheBlock> {
        self.cache_inode_ensure(id)?;
        let ci = &self.cache.inodes[0];
        let file_size = ci.file_size;
        if to >= file_size {
            return Err(Error::Range);
        }

        if let Some(cb) = ci.blocks.iter().find(|cb| {
            cb.file_offset <= to
                && to < cb.file_offset + cb.block.data_len as u32
        }) {
            return Ok(*cb);
        }

        // Start the backward walk at the lowest cached block above
        // the target, or at the chain tail if nothing is cached
        // there.
        let above = ci
            .blocks
            .iter()
            .find(|cb| cb.file_offset > to)
            .map(|cb| (cb.block.prev, cb.file_offset));
        let (mut cur_id, mut end_off) = match above {
            Some((prev, file_offset)) => {
                (prev.ok_or(Error::Corrupt)?, file_offset)
            }
            None => (
                self.file_last_block(id)?.ok_or(Error::Corrupt)?,
                file_size,
            ),
        };

        loop {
            let block = self.block_from_entry(cur_id)?;
            let loc = self.block_loc(cur_id)?;
            if block.data_len as u32 > end_off {
                return Err(Error::Corrupt);
            }
            let file_offset = end_off - block.data_len as u32;
            let cb = CacheBlock { block, loc, file_offset };
            self.cache_block_insert(cb);
            if file_offset <= to {
                return Ok(cb);
            }
            cur_id = block.prev.ok_or(Error::Corrupt)?;
            end_off = file_offset;
        }
    }
}
