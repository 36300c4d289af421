// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The garbage collector.
//!
//! Superseded records accumulate in every data area until the
//! collector rewrites one.  A pass picks the victim area with the
//! lowest GC sequence, converts the scratch area into the victim's
//! replacement by patching the victim's logical id into its
//! header, copies every live record across in on-flash order, and
//! finally erases the victim, which becomes the new scratch.
//!
//! The id patch is the reason scratch headers are written with
//! their trailing bytes left erased: on NOR flash an erased byte
//! can take any value in a single write, so converting scratch to
//! data never needs an erase and a power cut anywhere in the pass
//! loses nothing (the victim is intact until the copy completes).

use crate::area::{AREA_ID_NONE, DISK_AREA_OFF_GC_SEQ, DISK_AREA_OFF_ID};
use crate::disk::{DISK_BLOCK_SZ, DISK_INODE_SZ};
use crate::flash::{Flash, Location};
use crate::fs::State;
use crate::hash;
use crate::result::{Error, Result};

use alloc::vec::Vec;

impl<F: Flash> State<F> {
    /// Performs one garbage collection pass.
    pub(crate) fn gc(&mut self) -> Result<()> {
        let scratch_idx = self.scratch_idx;
        if scratch_idx == AREA_ID_NONE {
            return Err(Error::Corrupt);
        }

        // Victim: the non-scratch area with the lowest GC
        // sequence, ties broken by lowest index.
        let mut victim_idx: Option<u8> = None;
        for (i, area) in self.areas.iter().enumerate() {
            if i as u8 == scratch_idx {
                continue;
            }
            match victim_idx {
                None => victim_idx = Some(i as u8),
                Some(v) => {
                    if area.gc_seq < self.areas[v as usize].gc_seq {
                        victim_idx = Some(i as u8);
                    }
                }
            }
        }
        let victim_idx = victim_idx.ok_or(Error::Corrupt)?;
        let victim = self.areas[victim_idx as usize];

        // Convert scratch into the victim's replacement.  Both
        // bytes were left erased when the scratch header was
        // written, so this is a plain append-path write.
        let new_gc_seq = victim.gc_seq.wrapping_add(1);
        self.flash_write(scratch_idx, DISK_AREA_OFF_GC_SEQ, &[new_gc_seq])?;
        self.flash_write(scratch_idx, DISK_AREA_OFF_ID, &[victim.id])?;
        {
            let to_area = &mut self.areas[scratch_idx as usize];
            to_area.id = victim.id;
            to_area.gc_seq = new_gc_seq;
        }

        // Gather the victim's live records, preserving their
        // relative order.
        let mut records: Vec<(u32, u32, u32)> = Vec::new();
        for id in self.index.ids() {
            let Some(entry) = self.index.find(id) else {
                continue;
            };
            let loc = entry.loc();
            if loc.area_idx() != victim_idx {
                continue;
            }
            let len = if hash::id_is_inode(id) {
                let di =
                    self.inode_read_disk(victim_idx, loc.offset())?;
                (DISK_INODE_SZ + di.filename_len as usize) as u32
            } else {
                let db =
                    self.block_read_disk(victim_idx, loc.offset())?;
                (DISK_BLOCK_SZ + db.data_len as usize) as u32
            };
            records.push((id, loc.offset(), len));
        }
        records.sort_unstable_by_key(|&(_, offset, _)| offset);

        for (id, offset, len) in records {
            let dst = self.areas[scratch_idx as usize].cur;
            if self.areas[scratch_idx as usize].free_space() < len {
                // Cannot happen while the block-size invariant
                // holds; surfaced rather than asserted.
                return Err(Error::Full);
            }
            self.flash_copy(victim_idx, offset, scratch_idx, dst, len)?;
            if let Some(entry) = self.index.find_mut(id) {
                entry.set_loc(Location::new(scratch_idx, dst));
            }
        }

        // The victim becomes the new scratch.
        self.format_scratch_area(victim_idx)?;
        self.scratch_idx = victim_idx;

        // Every copied record moved; cached locations are stale.
        self.cache_clear();
        Ok(())
    }

    /// Collects until some non-scratch area has at least the
    /// given free space, returning that area's index.
    pub(crate) fn gc_until(&mut self, space: u32) -> Result<u8> {
        for _ in 0..self.areas.len() {
            if let Some(idx) = self.area_with_space(space) {
                return Ok(idx);
            }
            self.gc()?;
        }
        self.area_with_space(space).ok_or(Error::Full)
    }

    fn area_with_space(&self, space: u32) -> Option<u8> {
        for (i, area) in self.areas.iter().enumerate() {
            if i as u8 != self.scratch_idx && area.free_space() >= space {
                return Some(i as u8);
            }
        }
        None
    }
}
