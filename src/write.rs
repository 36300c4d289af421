// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The write engine.
//!
//! Writes are split into chunks no larger than the block-data
//! ceiling.  A chunk that lands past the end of the file becomes a
//! brand-new block appended to the chain; a chunk that lands
//! inside existing data supersedes the block it overlaps with a
//! fresh record carrying the same id and an incremented sequence
//! number.  Nothing is ever rewritten in place, so a power cut
//! leaves the old version of every touched block intact.

use crate::area::DISK_AREA_SZ;
use crate::block::BlockEntry;
use crate::disk::{DISK_BLOCK_SZ, DiskBlock};
use crate::file::{FileHandle, OpenFlags};
use crate::flash::{Flash, Location};
use crate::fs::State;
use crate::hash::{self, Entry};
use crate::inode::InodeKind;
use crate::result::{Error, Result};

use alloc::vec;

/// Hard ceiling on the data length of a single block.
pub(crate) const BLOCK_MAX_DATA_SZ_MAX: u32 = 2048;

/// The data length of the largest block that could fit in an area
/// of the given size.
fn area_capacity_one(area_length: u32) -> u32 {
    area_length - (DISK_AREA_SZ + DISK_BLOCK_SZ) as u32
}

/// The data length of the largest block that could fit as a pair
/// in an area of the given size.
fn area_capacity_two(area_length: u32) -> u32 {
    (area_length - DISK_AREA_SZ as u32) / 2 - DISK_BLOCK_SZ as u32
}

impl<F: Flash> State<F> {
    /// Computes and sets the block-data ceiling.  The result is
    /// the greatest value satisfying all of:
    ///     o no more than half the smallest area,
    ///     o no more than `BLOCK_MAX_DATA_SZ_MAX`,
    ///     o no smaller than `min_data_len`, the largest block
    ///       already in the filesystem.
    /// Keeping two full blocks per area guarantees the collector
    /// can always relocate any single block into scratch.
    pub(crate) fn set_max_block_data(
        &mut self,
        min_data_len: u16,
    ) -> Result<()> {
        let smallest = self
            .areas
            .iter()
            .map(|a| a.length)
            .min()
            .ok_or(Error::Corrupt)?;
        if smallest < (DISK_AREA_SZ + 2 * DISK_BLOCK_SZ) as u32 + 2 {
            return Err(Error::Corrupt);
        }
        if area_capacity_one(smallest) < min_data_len as u32 {
            return Err(Error::Corrupt);
        }

        let max = area_capacity_two(smallest)
            .min(BLOCK_MAX_DATA_SZ_MAX)
            .max(min_data_len as u32);
        self.max_block_data = max as u16;
        Ok(())
    }

    /// Finds an area that can take a record of the given size,
    /// garbage-collecting if none currently can.  Returns the
    /// area index and the offset at which the record must be
    /// appended.
    pub(crate) fn reserve_space(&mut self, size: u32) -> Result<(u8, u32)> {
        for (i, area) in self.areas.iter().enumerate() {
            if i as u8 != self.scratch_idx && area.free_space() >= size {
                return Ok((i as u8, area.cur));
            }
        }

        let area_idx = self.gc_until(size)?;
        let area = &self.areas[area_idx as usize];
        // The collector just promised this much space.
        if area.free_space() < size {
            return Err(Error::Corrupt);
        }
        Ok((area_idx, area.cur))
    }

    /// Writes through a file handle at its current offset (or at
    /// the end of the file, for append handles), advancing the
    /// offset past the written bytes.
    pub(crate) fn file_write(
        &mut self,
        handle: FileHandle,
        data: &[u8],
    ) -> Result<()> {
        let state = self.file_state(handle)?;
        if !state.flags.contains(OpenFlags::WRITE) {
            return Err(Error::BadArgs);
        }
        if data.is_empty() {
            return Ok(());
        }
        let inode_id = state.inode_id;
        let append = state.flags.contains(OpenFlags::APPEND);

        let mut offset = self.file_state(handle)?.offset;
        if append {
            offset = self.inode_data_len(inode_id)?;
        }

        self.write_to_inode(inode_id, offset, data)?;

        if let Some(s) = self.files[handle.0].as_mut() {
            s.offset = offset + data.len() as u32;
        }
        Ok(())
    }

    /// Writes a byte range into a file: first superseding any
    /// overlapped blocks, then appending whatever extends past the
    /// old end.
    pub(crate) fn write_to_inode(
        &mut self,
        inode_id: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let file_size = self.inode_data_len(inode_id)?;
        if offset > file_size {
            return Err(Error::Range);
        }
        let max_data = self.max_block_data as usize;
        if max_data == 0 {
            return Err(Error::Corrupt);
        }

        let mut remaining = data;
        let mut cur_off = offset;

        while cur_off < file_size && !remaining.is_empty() {
            let cb = self.cache_seek(inode_id, cur_off)?;
            let block_start = cb.file_offset;
            let old_len = cb.block.data_len as usize;
            let block_off = (cur_off - block_start) as usize;
            let is_last = block_start + old_len as u32 == file_size;

            // The final block of the chain may grow in place, up
            // to the ceiling; interior blocks keep their length.
            let new_len = if is_last {
                max_data.min(old_len.max(block_off + remaining.len()))
            } else {
                old_len
            };
            let take = remaining.len().min(new_len - block_off);

            let mut buf = vec![0u8; new_len];
            if block_off > 0 {
                self.block_data_read(cb.loc, 0, &mut buf[..block_off])?;
            }
            buf[block_off..block_off + take]
                .copy_from_slice(&remaining[..take]);
            if block_off + take < old_len {
                self.block_data_read(
                    cb.loc,
                    (block_off + take) as u16,
                    &mut buf[block_off + take..old_len],
                )?;
            }

            let disk_block = DiskBlock {
                id: cb.block.id,
                seq: cb.block.seq + 1,
                inode_id,
                prev_id: cb.block.prev,
                data_len: new_len as u16,
            };
            let (area_idx, area_offset) =
                self.block_write_disk(&disk_block, &buf)?;
            match self.index.find_mut(cb.block.id) {
                Some(Entry::Block(be)) => {
                    be.loc = Location::new(area_idx, area_offset);
                }
                _ => return Err(Error::Corrupt),
            }
            self.cache_invalidate_from(inode_id, block_start);

            remaining = &remaining[take..];
            cur_off += take as u32;
            if is_last {
                break;
            }
        }

        while !remaining.is_empty() {
            let take = remaining.len().min(max_data);
            self.write_append(inode_id, &remaining[..take])?;
            remaining = &remaining[take..];
            cur_off += take as u32;
        }

        let final_size = file_size.max(offset + data.len() as u32);
        self.cache_set_file_size(inode_id, final_size);
        Ok(())
    }

    /// Appends one new block to the end of a file's chain.
    fn write_append(&mut self, inode_id: u32, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= self.max_block_data as usize);
        if self.index.block_count() >= self.config.max_blocks {
            return Err(Error::NoMem);
        }
        if self.next_block_id >= hash::ID_BLOCK_MAX {
            return Err(Error::NoMem);
        }
        let id = self.next_block_id;
        self.next_block_id += 1;

        let prev = self.file_last_block(inode_id)?;
        let disk_block = DiskBlock {
            id,
            seq: 0,
            inode_id,
            prev_id: prev,
            data_len: data.len() as u16,
        };
        let (area_idx, area_offset) =
            self.block_write_disk(&disk_block, data)?;

        self.index.insert(Entry::Block(BlockEntry {
            id,
            loc: Location::new(area_idx, area_offset),
        }));
        match &mut self.inode_entry_mut(inode_id)?.kind {
            InodeKind::File { last_block } => *last_block = Some(id),
            InodeKind::Dir { .. } => return Err(Error::Corrupt),
        }
        Ok(())
    }
}
