// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boot scan.
//!
//! Restore rebuilds the whole in-RAM state from flash, assuming
//! nothing about write ordering beyond per-record atomicity (a
//! record either passes its CRC or it never happened).
//!
//! The scan proceeds in passes:
//!
//! 1. Read every area header and classify the area: scratch,
//!    data, or bad.  Interrupted garbage collection shows up here
//!    as two areas sharing a logical id, or as a missing scratch;
//!    both are repaired.
//! 2. Walk each data area record by record.  The newest record
//!    wins for every object id; losers are garbage awaiting
//!    collection.  Records that fail their CRC are stepped over;
//!    an unrecognized magic ends the area.
//! 3. Link the survivors: blocks onto their owning files (the
//!    chain tail is the unique block nothing points back at),
//!    inodes into their parents' sorted child lists.  Tombstoned
//!    inodes and orphaned blocks drop out here.
//! 4. Repair and validate: inodes whose parent vanished move to
//!    `/lost+found`, the root and the scratch area are checked,
//!    and the id allocators resume above the largest ids seen.

use crate::area::{
    AREA_ID_NONE, AREA_VER, Area, AreaDesc, DISK_AREA_SCRATCH_SZ,
    DISK_AREA_SZ, DiskArea, validate_descs,
};
use crate::block::BlockEntry;
use crate::disk::{
    BLOCK_MAGIC, DISK_BLOCK_SZ, DISK_INODE_SZ, DiskBlock, DiskInode,
    INODE_MAGIC,
};
use crate::flash::{Flash, Location};
use crate::fs::State;
use crate::hash::{self, Entry, ID_ROOT_DIR};
use crate::inode::{InodeEntry, InodeKind};
use crate::result::{Error, Result};

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// The repair sink for inodes whose parent cannot be resolved.
const LOST_FOUND: &[u8] = b"/lost+found";

impl<F: Flash> State<F> {
    /// Mounts the described areas by scanning flash and
    /// rebuilding the tree.  On any `Corrupt` failure the caller
    /// may reformat.
    pub(crate) fn restore_full(&mut self, descs: &[AreaDesc]) -> Result<()> {
        let result = self.restore_inner(descs);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn restore_inner(&mut self, descs: &[AreaDesc]) -> Result<()> {
        validate_descs(descs)?;
        self.reset();

        self.discover_areas(descs)?;
        self.scan_areas()?;
        self.sweep_tombstones()?;
        let largest_data = self.link_blocks()?;
        let orphans = self.link_parents()?;

        // The root must have survived: id 0, no parent.
        match self.index.find(ID_ROOT_DIR) {
            Some(Entry::Inode(_)) => {}
            _ => return Err(Error::Corrupt),
        }
        if self.inode_from_entry(ID_ROOT_DIR)?.parent.is_some() {
            return Err(Error::Corrupt);
        }
        self.root_id = Some(ID_ROOT_DIR);

        self.validate_scratch()?;
        self.set_max_block_data(largest_data)?;

        if !orphans.is_empty() {
            let lost_found = self.ensure_lost_found()?;
            for id in orphans {
                self.inode_rename(id, lost_found, None)?;
            }
        }

        Ok(())
    }

    /// Pass 1: area discovery and repair.
    fn discover_areas(&mut self, descs: &[AreaDesc]) -> Result<()> {
        self.areas = descs
            .iter()
            .map(|d| Area {
                offset: d.offset,
                length: d.length,
                cur: 0,
                id: AREA_ID_NONE,
                gc_seq: 0,
            })
            .collect();

        let mut scratches: Vec<u8> = Vec::new();
        let mut bad: Vec<u8> = Vec::new();

        for (i, desc) in descs.iter().enumerate() {
            let mut buf = [0u8; DISK_AREA_SZ];
            self.flash.read(desc.offset, &mut buf)?;
            let Some(disk_area) = DiskArea::decode(&buf) else {
                bad.push(i as u8);
                continue;
            };
            if disk_area.ver != AREA_VER {
                return Err(Error::Corrupt);
            }
            if disk_area.length != desc.length {
                return Err(Error::Corrupt);
            }
            let area = &mut self.areas[i];
            if disk_area.is_scratch() {
                area.cur = DISK_AREA_SCRATCH_SZ as u32;
                scratches.push(i as u8);
            } else {
                area.cur = DISK_AREA_SZ as u32;
                area.id = disk_area.id;
                area.gc_seq = disk_area.gc_seq;
            }
        }

        // Two areas sharing a logical id mean a GC pass was cut
        // down after patching the scratch header but before
        // erasing the victim.  The victim (older GC sequence) is
        // the complete copy; the newer area is reformatted as
        // scratch.
        loop {
            let mut dup: Option<(u8, u8)> = None;
            'outer: for i in 0..self.areas.len() {
                for j in i + 1..self.areas.len() {
                    if self.areas[i].id != AREA_ID_NONE
                        && self.areas[i].id == self.areas[j].id
                        && !bad.contains(&(i as u8))
                        && !bad.contains(&(j as u8))
                    {
                        dup = Some((i as u8, j as u8));
                        break 'outer;
                    }
                }
            }
            let Some((i, j)) = dup else { break };
            let newer = {
                let diff = self.areas[j as usize]
                    .gc_seq
                    .wrapping_sub(self.areas[i as usize].gc_seq);
                if (diff as i8) > 0 { j } else { i }
            };
            self.format_scratch_area(newer)?;
            scratches.push(newer);
        }

        if scratches.is_empty() && bad.len() == 1 {
            // The GC erased its victim but was cut down before the
            // scratch header went out.
            let idx = bad.pop().unwrap_or(0);
            self.format_scratch_area(idx)?;
            scratches.push(idx);
        }
        if scratches.len() != 1 || !bad.is_empty() {
            return Err(Error::Corrupt);
        }
        self.scratch_idx = scratches[0];

        // Logical ids must now be unique.
        for i in 0..self.areas.len() {
            for j in i + 1..self.areas.len() {
                if self.areas[i].id != AREA_ID_NONE
                    && self.areas[i].id == self.areas[j].id
                {
                    return Err(Error::Corrupt);
                }
            }
        }
        Ok(())
    }

    /// Pass 2: walk every data area record by record, keeping the
    /// newest record for each object id.
    fn scan_areas(&mut self) -> Result<()> {
        for i in 0..self.areas.len() as u8 {
            if i == self.scratch_idx {
                continue;
            }
            let length = self.areas[i as usize].length;
            let mut offset = DISK_AREA_SZ as u32;
            loop {
                if offset + 4 > length {
                    break;
                }
                let mut magic = [0u8; 4];
                self.flash_read(i, offset, &mut magic)?;
                let advanced = match u32::from_le_bytes(magic) {
                    INODE_MAGIC => self.restore_inode(i, offset)?,
                    BLOCK_MAGIC => self.restore_block(i, offset)?,
                    _ => None,
                };
                match advanced {
                    Some(len) => offset += len,
                    None => break,
                }
            }
            self.areas[i as usize].cur = offset;
        }
        Ok(())
    }

    /// Examines one inode record.  Returns the record's total
    /// length, or `None` if the record does not fit and the area
    /// scan must stop.  A record failing its CRC is stepped over
    /// (its extent is known from the header) without being
    /// indexed.
    fn restore_inode(
        &mut self,
        area_idx: u8,
        offset: u32,
    ) -> Result<Option<u32>> {
        let length = self.areas[area_idx as usize].length;
        if offset + DISK_INODE_SZ as u32 > length {
            return Ok(None);
        }
        let mut raw = [0u8; DISK_INODE_SZ];
        self.flash_read(area_idx, offset, &mut raw)?;
        let disk_inode = DiskInode::decode(&raw)?;

        let record_len =
            DISK_INODE_SZ as u32 + disk_inode.filename_len as u32;
        if offset + record_len > length {
            return Ok(None);
        }
        if !hash::id_is_inode(disk_inode.id) {
            return Ok(None);
        }
        if self
            .crc_disk_inode_validate(
                &raw,
                disk_inode.filename_len,
                area_idx,
                offset,
            )
            .is_err()
        {
            // Typically the torn tail of the log; skip it.
            return Ok(Some(record_len));
        }

        let id = disk_inode.id;
        let loc = Location::new(area_idx, offset);
        if self.index.contains(id) {
            let old = self.inode_from_entry(id)?;
            if disk_inode.seq > old.seq
                || (disk_inode.seq == old.seq && loc > old.loc)
            {
                self.inode_entry_mut(id)?.loc = loc;
            }
        } else {
            if self.index.inode_count() >= self.config.max_inodes {
                return Err(Error::NoMem);
            }
            let kind = if hash::id_is_dir(id) {
                InodeKind::Dir { children: Vec::new() }
            } else {
                InodeKind::File { last_block: None }
            };
            self.index.insert(Entry::Inode(InodeEntry {
                id,
                loc,
                refcnt: 1,
                kind,
            }));
        }

        if hash::id_is_dir(id) {
            self.next_dir_id = self.next_dir_id.max(id + 1);
        } else {
            self.next_file_id = self.next_file_id.max(id + 1);
        }
        Ok(Some(record_len))
    }

    /// Examines one block record; the counterpart of
    /// [`State::restore_inode`].
    fn restore_block(
        &mut self,
        area_idx: u8,
        offset: u32,
    ) -> Result<Option<u32>> {
        let length = self.areas[area_idx as usize].length;
        if offset + DISK_BLOCK_SZ as u32 > length {
            return Ok(None);
        }
        let mut raw = [0u8; DISK_BLOCK_SZ];
        self.flash_read(area_idx, offset, &mut raw)?;
        let disk_block = DiskBlock::decode(&raw)?;

        let record_len = DISK_BLOCK_SZ as u32 + disk_block.data_len as u32;
        if offset + record_len > length {
            return Ok(None);
        }
        if !hash::id_is_block(disk_block.id) {
            return Ok(None);
        }
        if self
            .crc_disk_block_validate(
                &raw,
                disk_block.data_len,
                area_idx,
                offset,
            )
            .is_err()
        {
            return Ok(Some(record_len));
        }

        let id = disk_block.id;
        let loc = Location::new(area_idx, offset);
        if self.index.contains(id) {
            let old = self.block_from_entry(id)?;
            let old_loc = self.block_loc(id)?;
            if disk_block.seq > old.seq
                || (disk_block.seq == old.seq && loc > old_loc)
            {
                match self.index.find_mut(id) {
                    Some(Entry::Block(be)) => be.loc = loc,
                    _ => return Err(Error::Corrupt),
                }
            }
        } else {
            if self.index.block_count() >= self.config.max_blocks {
                return Err(Error::NoMem);
            }
            self.index.insert(Entry::Block(BlockEntry { id, loc }));
        }

        self.next_block_id = self.next_block_id.max(id + 1);
        Ok(Some(record_len))
    }

    /// Drops inodes whose newest record is a deletion tombstone.
    /// Their blocks become orphans and fall out in the next pass.
    fn sweep_tombstones(&mut self) -> Result<()> {
        for id in self.index.ids() {
            if !hash::id_is_inode(id) {
                continue;
            }
            let inode = self.inode_from_entry(id)?;
            if inode.parent.is_none() && id != ID_ROOT_DIR {
                self.index.remove(id);
            }
        }
        Ok(())
    }

    /// Pass 3: attach every surviving block to its owning file
    /// and recompute each file's chain tail (the unique block no
    /// other block names as its predecessor).  Returns the
    /// largest live block data length, which bounds the block
    /// size ceiling from below.
    fn link_blocks(&mut self) -> Result<u16> {
        let mut by_inode: BTreeMap<u32, Vec<(u32, Option<u32>)>> =
            BTreeMap::new();
        let mut largest: u16 = 0;

        for id in self.index.ids() {
            if !hash::id_is_block(id) {
                continue;
            }
            let block = self.block_from_entry(id)?;
            let owner_live = hash::id_is_file(block.inode_id)
                && self.index.contains(block.inode_id);
            if !owner_live {
                // Orphaned block: its file was deleted or never
                // survived.  Forget it; the record is garbage.
                self.index.remove(id);
                continue;
            }
            largest = largest.max(block.data_len);
            by_inode
                .entry(block.inode_id)
                .or_default()
                .push((id, block.prev));
        }

        for (inode_id, blocks) in by_inode {
            let mut last: Option<u32> = None;
            for &(id, _) in &blocks {
                let referenced =
                    blocks.iter().any(|&(_, prev)| prev == Some(id));
                if !referenced {
                    if last.is_some() {
                        return Err(Error::Corrupt);
                    }
                    last = Some(id);
                }
            }
            let Some(last) = last else {
                return Err(Error::Corrupt);
            };

            // The chain must reach every block exactly once.
            let mut seen = 0usize;
            let mut cur = Some(last);
            while let Some(id) = cur {
                seen += 1;
                if seen > blocks.len() {
                    return Err(Error::Corrupt);
                }
                let Some(&(_, prev)) =
                    blocks.iter().find(|&&(bid, _)| bid == id)
                else {
                    return Err(Error::Corrupt);
                };
                cur = prev;
            }
            if seen != blocks.len() {
                return Err(Error::Corrupt);
            }

            match &mut self.inode_entry_mut(inode_id)?.kind {
                InodeKind::File { last_block } => *last_block = Some(last),
                InodeKind::Dir { .. } => return Err(Error::Corrupt),
            }
        }
        Ok(largest)
    }

    /// Pass 3, continued: insert every non-root inode into its
    /// parent's child list.  Inodes whose parent is missing or is
    /// not a directory are returned for repair.
    fn link_parents(&mut self) -> Result<Vec<u32>> {
        let mut orphans: Vec<u32> = Vec::new();
        for id in self.index.ids() {
            if !hash::id_is_inode(id) || id == ID_ROOT_DIR {
                continue;
            }
            let inode = self.inode_from_entry(id)?;
            let parent_live = match inode.parent {
                Some(parent) => {
                    hash::id_is_dir(parent) && self.index.contains(parent)
                }
                None => false,
            };
            match inode.parent {
                Some(parent) if parent_live => {
                    self.inode_add_child(parent, id)?;
                }
                _ => orphans.push(id),
            }
        }
        Ok(orphans)
    }

    /// The scratch area must exist and be at least as long as
    /// every other area, or the collector could strand itself.
    fn validate_scratch(&self) -> Result<()> {
        if self.scratch_idx == AREA_ID_NONE {
            return Err(Error::Corrupt);
        }
        let scratch_len = self.areas[self.scratch_idx as usize].length;
        if self.areas.iter().any(|a| a.length > scratch_len) {
            return Err(Error::Corrupt);
        }
        Ok(())
    }

    /// Finds or creates the `/lost+found` directory.
    fn ensure_lost_found(&mut self) -> Result<u32> {
        if let Some(id) = self.lost_found_id {
            return Ok(id);
        }
        let id = match self.path_new_dir(LOST_FOUND) {
            Ok(id) => id,
            Err(Error::Exists) => self.path_find_inode(LOST_FOUND)?,
            Err(e) => return Err(e),
        };
        self.lost_found_id = Some(id);
        Ok(id)
    }
}
