// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data blocks.
//!
//! A file's contents are a chain of data blocks linked in
//! reverse: the inode entry points at the newest (last) block, and
//! each block names its predecessor.  Only the tail is indexed;
//! everything else about a block is read from flash on demand.
//! The reverse linkage matches the append-only log: extending a
//! file never rewrites an existing record.

use crate::disk::{DISK_BLOCK_SZ, DiskBlock};
use crate::flash::{Flash, Location};
use crate::fs::State;
use crate::hash::Entry;
use crate::inode::InodeKind;
use crate::result::{Error, Result};

/// The long-lived in-RAM representation of one data block: just
/// enough to find the record on flash.
pub(crate) struct BlockEntry {
    pub(crate) id: u32,
    pub(crate) loc: Location,
}

/// Transient, fully-decoded view of a block record.
#[derive(Clone, Copy)]
pub(crate) struct Block {
    pub(crate) id: u32,
    pub(crate) seq: u32,
    pub(crate) inode_id: u32,
    pub(crate) prev: Option<u32>,
    pub(crate) data_len: u16,
}

impl<F: Flash> State<F> {
    /// Looks up a block entry's flash location, failing with
    /// `Corrupt` if the id is absent or does not denote a block.
    pub(crate) fn block_loc(&mut self, id: u32) -> Result<Location> {
        match self.index.find(id) {
            Some(Entry::Block(be)) => Ok(be.loc),
            _ => Err(Error::Corrupt),
        }
    }

    /// Reads and decodes a block record header.
    pub(crate) fn block_read_disk(
        &self,
        area_idx: u8,
        area_offset: u32,
    ) -> Result<DiskBlock> {
        let mut buf = [0u8; DISK_BLOCK_SZ];
        self.flash_read(area_idx, area_offset, &mut buf)?;
        DiskBlock::decode(&buf)
    }

    /// Builds the transient view of a block from its entry.
    pub(crate) fn block_from_entry(&mut self, id: u32) -> Result<Block> {
        let loc = self.block_loc(id)?;
        let disk_block =
            self.block_read_disk(loc.area_idx(), loc.offset())?;
        Ok(Block {
            id,
            seq: disk_block.seq,
            inode_id: disk_block.inode_id,
            prev: disk_block.prev_id,
            data_len: disk_block.data_len,
        })
    }

    /// Appends a block record (header, then data) to a
    /// newly-reserved span, returning where it landed.
    pub(crate) fn block_write_disk(
        &mut self,
        disk_block: &DiskBlock,
        data: &[u8],
    ) -> Result<(u8, u32)> {
        let len = DISK_BLOCK_SZ as u32 + disk_block.data_len as u32;
        let (area_idx, area_offset) = self.reserve_space(len)?;

        let raw = disk_block.encode(data);
        self.flash_write(area_idx, area_offset, &raw)?;
        if !data.is_empty() {
            self.flash_write(
                area_idx,
                area_offset + DISK_BLOCK_SZ as u32,
                data,
            )?;
        }
        Ok((area_idx, area_offset))
    }

    /// Reads a span of a block's data given the record location.
    pub(crate) fn block_data_read(
        &self,
        loc: Location,
        block_offset: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        self.flash_read(
            loc.area_idx(),
            loc.offset() + DISK_BLOCK_SZ as u32 + block_offset as u32,
            buf,
        )
    }

    /// Removes a block entry from RAM, repointing the owning
    /// inode's tail at the predecessor.  The record itself stays
    /// on flash until its area is next collected.
    pub(crate) fn block_delete_from_ram(&mut self, id: u32) -> Result<()> {
        let block = self.block_from_entry(id)?;

        if let Some(Entry::Inode(ie)) = self.index.find_mut(block.inode_id)
            && let InodeKind::File { last_block } = &mut ie.kind
            && *last_block == Some(id)
        {
            *last_block = block.prev;
        }

        self.index.remove(id);
        Ok(())
    }
}
