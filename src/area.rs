// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash areas.
//!
//! An area is a contiguous flash range that forms one unit of
//! garbage collection; its backing must be erasable with a single
//! sector erase at its base offset.  Every area begins with a
//! header record; the byte at offset 23 holds the area's logical
//! id, and the value 0xff there marks the scratch area.  Because
//! an erased NOR byte reads 0xff, converting the scratch area into
//! a data area only ever clears bits: the garbage collector writes
//! the new id (and GC sequence) into bytes that were left erased
//! when the scratch header was laid down.

use crate::result::{Error, Result};

/// The four magic words that begin every area header.
pub(crate) const AREA_MAGIC: [u32; 4] =
    [0xb98a_31e2, 0x7fb0_428c, 0xace0_8253, 0xb185_fc8e];

/// Current on-flash layout version.  Areas carrying any other
/// version refuse to mount.
pub(crate) const AREA_VER: u8 = 0;

/// The logical id reserved for the scratch area.
pub(crate) const AREA_ID_NONE: u8 = 0xff;

/// Size of an area header on flash.
pub(crate) const DISK_AREA_SZ: usize = 24;

/// Offset of the GC sequence byte within an area header.
pub(crate) const DISK_AREA_OFF_GC_SEQ: u32 = 21;

/// Offset of the logical id byte within an area header.
pub(crate) const DISK_AREA_OFF_ID: u32 = 23;

/// The prefix of the header written when an area is formatted as
/// scratch: the magic words, the length, and the version.  The GC
/// sequence, reserved, and id bytes stay erased (0xff) so they can
/// be patched in place later.
pub(crate) const DISK_AREA_SCRATCH_SZ: usize = 21;

/// Describes one flash range handed to `format` or `mount`.  At
/// least two areas are required so that a scratch area can exist.
#[derive(Clone, Copy, Debug)]
pub struct AreaDesc {
    /// Absolute device offset of the area.  Must be sector
    /// aligned.
    pub offset: u32,
    /// Length of the area in bytes.
    pub length: u32,
}

/// In-RAM state of one area.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Area {
    /// Absolute device offset.
    pub(crate) offset: u32,
    /// Total length in bytes, header included.
    pub(crate) length: u32,
    /// Append cursor: the offset at which the next write lands.
    pub(crate) cur: u32,
    /// Logical id; `AREA_ID_NONE` for the scratch area.
    pub(crate) id: u8,
    /// Incremented each time the area is rewritten by the GC.
    pub(crate) gc_seq: u8,
}

impl Area {
    pub(crate) fn free_space(&self) -> u32 {
        self.length - self.cur
    }
}

/// Decoded form of an on-flash area header.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DiskArea {
    pub(crate) length: u32,
    pub(crate) ver: u8,
    pub(crate) gc_seq: u8,
    pub(crate) id: u8,
}

impl DiskArea {
    /// Encodes the header.  The reserved byte is left erased so a
    /// header written with `DISK_AREA_SCRATCH_SZ` bytes and later
    /// patched is byte-identical to one written whole.
    pub(crate) fn encode(&self) -> [u8; DISK_AREA_SZ] {
        let mut buf = [0u8; DISK_AREA_SZ];
        for (i, w) in AREA_MAGIC.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20] = self.ver;
        buf[21] = self.gc_seq;
        buf[22] = 0xff;
        buf[23] = self.id;
        buf
    }

    /// Decodes a header, if the magic words are present.
    pub(crate) fn decode(buf: &[u8; DISK_AREA_SZ]) -> Option<DiskArea> {
        for (i, w) in AREA_MAGIC.iter().enumerate() {
            let got = u32::from_le_bytes([
                buf[i * 4],
                buf[i * 4 + 1],
                buf[i * 4 + 2],
                buf[i * 4 + 3],
            ]);
            if got != *w {
                return None;
            }
        }
        Some(DiskArea {
            length: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            ver: buf[20],
            gc_seq: buf[21],
            id: buf[23],
        })
    }

    pub(crate) fn is_scratch(&self) -> bool {
        self.id == AREA_ID_NONE
    }
}

/// Validates a set of area descriptors prior to format or mount.
pub(crate) fn validate_descs(descs: &[AreaDesc]) -> Result<()> {
    if descs.len() < 2 || descs.len() > (AREA_ID_NONE as usize) {
        return Err(Error::BadArgs);
    }
    for desc in descs {
        if desc.length <= DISK_AREA_SZ as u32 {
            return Err(Error::BadArgs);
        }
    }
    Ok(())
}
