// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The raw flash driver interface and area-relative I/O.
//!
//! The filesystem consumes exactly three driver operations: read,
//! write, and sector erase.  Everything else in this module maps
//! area-relative addresses (an area index plus a byte offset) onto
//! absolute device offsets and maintains each area's append
//! cursor.

use crate::fs::State;
use crate::result::{Error, Result};

use bitstruct::bitstruct;

/// The operations the filesystem requires of a NOR flash driver.
///
/// Writes must only transition bits from 1 to 0; transitioning a
/// bit from 0 back to 1 requires erasing the sector that contains
/// it.  Drivers are expected to be synchronous; a blocked call
/// simply stalls the filesystem operation that issued it.
pub trait Flash {
    /// Reads `buf.len()` bytes starting at the given absolute
    /// device offset.
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` starting at the given absolute device
    /// offset.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<()>;

    /// Erases the sector containing the given offset to all
    /// 0xff bytes.
    fn erase_sector(&mut self, offset: u32) -> Result<()>;
}

bitstruct! {
    /// Packed flash location of a record: the index of the area
    /// holding the record in the top byte, and the byte offset of
    /// the record within that area in the low 24 bits.
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub(crate) struct Location(u32) {
        /// Byte offset within the area.
        pub(crate) offset: u32 = 0..=23;
        /// Index of the area in the area table.
        pub(crate) area_idx: u8 = 24..=31;
    }
}

impl Location {
    pub(crate) fn new(area_idx: u8, offset: u32) -> Location {
        Location(0).with_area_idx(area_idx).with_offset(offset)
    }
}

impl core::fmt::Debug for Location {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{:#x}", self.area_idx(), self.offset())
    }
}

/// Chunk size for flash-to-flash copies and other bounded reads.
pub(crate) const FLASH_BUF_SZ: usize = 256;

impl<F: Flash> State<F> {
    /// Reads from an area.  The span must lie entirely within the
    /// area.
    pub(crate) fn flash_read(
        &self,
        area_idx: u8,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        let area = &self.areas[area_idx as usize];
        if offset + buf.len() as u32 > area.length {
            return Err(Error::Range);
        }
        self.flash.read(area.offset + offset, buf)
    }

    /// Appends to an area.  Writes must never revisit bytes below
    /// the area's append cursor; the cursor advances past the
    /// written span.
    pub(crate) fn flash_write(
        &mut self,
        area_idx: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let area = &mut self.areas[area_idx as usize];
        if offset + data.len() as u32 > area.length {
            return Err(Error::Range);
        }
        debug_assert!(offset >= area.cur);
        if offset < area.cur {
            return Err(Error::Corrupt);
        }
        let phys = area.offset + offset;
        self.flash.write(phys, data).map_err(|_| Error::Flash)?;
        self.areas[area_idx as usize].cur = offset + data.len() as u32;
        Ok(())
    }

    /// Copies a byte range from one area to another through a
    /// small stack buffer.
    pub(crate) fn flash_copy(
        &mut self,
        from_idx: u8,
        mut from_offset: u32,
        to_idx: u8,
        mut to_offset: u32,
        mut len: u32,
    ) -> Result<()> {
        let mut buf = [0u8; FLASH_BUF_SZ];

        while len > 0 {
            let chunk = len.min(FLASH_BUF_SZ as u32) as usize;
            self.flash_read(from_idx, from_offset, &mut buf[..chunk])?;
            self.flash_write(to_idx, to_offset, &buf[..chunk])?;
            from_offset += chunk as u32;
            to_offset += chunk as u32;
            len -= chunk as u32;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_packs_area_and_offset() {
        let loc = Location::new(3, 0x12_3456);
        assert_eq!(loc.area_idx(), 3);
        assert_eq!(loc.offset(), 0x12_3456);
        assert_eq!(loc.0, 0x0312_3456);
    }

    #[test]
    fn location_orders_by_area_then_offset() {
        assert!(Location::new(0, 100) < Location::new(1, 0));
        assert!(Location::new(1, 5) < Location::new(1, 6));
    }
}
