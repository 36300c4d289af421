// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Formatting.
//!
//! A format erases every area, designates the largest one as
//! scratch, writes the area headers, and creates the root
//! directory.  Data areas receive sequential logical ids; the
//! scratch header is written without its GC sequence and id bytes
//! so the collector can patch them in place later.

use crate::area::{
    AREA_ID_NONE, AREA_VER, Area, AreaDesc, DISK_AREA_SCRATCH_SZ,
    DISK_AREA_SZ, DiskArea, validate_descs,
};
use crate::flash::Flash;
use crate::fs::State;
use crate::hash::ID_ROOT_DIR;
use crate::result::{Error, Result};

impl<F: Flash> State<F> {
    /// Erases an area and writes a scratch header.  The trailing
    /// bytes of the header stay erased; the append cursor rests on
    /// the GC sequence byte so the collector's patch is a legal
    /// append.
    pub(crate) fn format_scratch_area(&mut self, area_idx: u8) -> Result<()> {
        let area = self.areas[area_idx as usize];
        self.flash
            .erase_sector(area.offset)
            .map_err(|_| Error::Flash)?;
        {
            let a = &mut self.areas[area_idx as usize];
            a.cur = 0;
            a.id = AREA_ID_NONE;
            a.gc_seq = 0;
        }

        let header = DiskArea {
            length: area.length,
            ver: AREA_VER,
            gc_seq: 0,
            id: AREA_ID_NONE,
        }
        .encode();
        self.flash_write(area_idx, 0, &header[..DISK_AREA_SCRATCH_SZ])
    }

    /// Erases an area and writes a full data-area header.
    fn format_data_area(
        &mut self,
        area_idx: u8,
        id: u8,
        gc_seq: u8,
    ) -> Result<()> {
        let area = self.areas[area_idx as usize];
        self.flash
            .erase_sector(area.offset)
            .map_err(|_| Error::Flash)?;
        {
            let a = &mut self.areas[area_idx as usize];
            a.cur = 0;
            a.id = id;
            a.gc_seq = gc_seq;
        }

        let header =
            DiskArea { length: area.length, ver: AREA_VER, gc_seq, id }
                .encode();
        self.flash_write(area_idx, 0, &header)?;
        debug_assert_eq!(
            self.areas[area_idx as usize].cur,
            DISK_AREA_SZ as u32
        );
        Ok(())
    }

    /// Formats the described areas into an empty filesystem.
    pub(crate) fn format_full(&mut self, descs: &[AreaDesc]) -> Result<()> {
        validate_descs(descs)?;
        self.reset();

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

        // The largest area becomes scratch; ties go to the lowest
        // index.
        let mut scratch = 0usize;
        for (i, desc) in descs.iter().enumerate() {
            if desc.length > descs[scratch].length {
                scratch = i;
            }
        }

        let mut next_id = 0u8;
        for i in 0..descs.len() {
            if i == scratch {
                self.format_scratch_area(i as u8)?;
            } else {
                self.format_data_area(i as u8, next_id, 0)?;
                next_id += 1;
            }
        }
        self.scratch_idx = scratch as u8;

        self.set_max_block_data(0)?;

        let root = self.inode_new(None, b"", true)?;
        debug_assert_eq!(root, ID_ROOT_DIR);
        self.root_id = Some(root);
        Ok(())
    }
}
