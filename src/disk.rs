// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-flash record codecs.
//!
//! Two record types follow area headers in the log: inodes (files
//! and directories, trailed by the filename) and data blocks
//! (trailed by the data).  All integers are little-endian.  Each
//! record carries a CRC-16 over the header minus the CRC slot,
//! continued over the trailing bytes; records are never rewritten
//! in place, so an interrupted write leaves a record that fails
//! its CRC and is ignored by the next boot scan.

use crate::crc16::crc16;
use crate::flash::{FLASH_BUF_SZ, Flash};
use crate::fs::State;
use crate::result::{Error, Result};

use static_assertions::const_assert;

/// Magic introducing an inode record.
pub(crate) const INODE_MAGIC: u32 = 0x925f_8bc0;

/// Magic introducing a data block record.
pub(crate) const BLOCK_MAGIC: u32 = 0x53ba_23b9;

/// Size of an inode record header on flash, filename excluded.
pub(crate) const DISK_INODE_SZ: usize = 20;

/// Offset of the CRC within an inode record header.
pub(crate) const DISK_INODE_OFF_CRC: usize = 18;

/// Size of a block record header on flash, data excluded.
pub(crate) const DISK_BLOCK_SZ: usize = 24;

/// Offset of the CRC within a block record header.
pub(crate) const DISK_BLOCK_OFF_CRC: usize = 22;

const_assert!(DISK_INODE_OFF_CRC + 2 == DISK_INODE_SZ);
const_assert!(DISK_BLOCK_OFF_CRC + 2 == DISK_BLOCK_SZ);

/// Decoded form of an on-flash inode record.  A record with
/// `parent_id == None` is either the root directory (id 0) or a
/// deletion tombstone.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DiskInode {
    pub(crate) id: u32,
    pub(crate) seq: u32,
    pub(crate) parent_id: Option<u32>,
    pub(crate) filename_len: u8,
}

impl DiskInode {
    /// Encodes the record header, computing the CRC over the
    /// header and the filename that will follow it on flash.
    pub(crate) fn encode(&self, filename: &[u8]) -> [u8; DISK_INODE_SZ] {
        debug_assert_eq!(filename.len(), self.filename_len as usize);
        let mut buf = [0u8; DISK_INODE_SZ];
        buf[0..4].copy_from_slice(&INODE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seq.to_le_bytes());
        let parent = self.parent_id.unwrap_or(crate::hash::ID_NONE);
        buf[12..16].copy_from_slice(&parent.to_le_bytes());
        buf[16] = 0;
        buf[17] = self.filename_len;
        let crc = crc16(crc16(0, &buf[..DISK_INODE_OFF_CRC]), filename);
        buf[DISK_INODE_OFF_CRC..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a record header.  Fails with `Unexpected` if the
    /// magic does not identify an inode record.
    pub(crate) fn decode(buf: &[u8; DISK_INODE_SZ]) -> Result<DiskInode> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != INODE_MAGIC {
            return Err(Error::Unexpected);
        }
        let parent =
            u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        Ok(DiskInode {
            id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            seq: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            parent_id: (parent != crate::hash::ID_NONE).then_some(parent),
            filename_len: buf[17],
        })
    }

    pub(crate) fn stored_crc(buf: &[u8; DISK_INODE_SZ]) -> u16 {
        u16::from_le_bytes([buf[DISK_INODE_OFF_CRC], buf[DISK_INODE_OFF_CRC + 1]])
    }
}

/// Decoded form of an on-flash data block record.  `prev_id` is
/// `None` for the first block of a file.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DiskBlock {
    pub(crate) id: u32,
    pub(crate) seq: u32,
    pub(crate) inode_id: u32,
    pub(crate) prev_id: Option<u32>,
    pub(crate) data_len: u16,
}

impl DiskBlock {
    /// Encodes the record header, computing the CRC over the
    /// header and the data that will follow it on flash.
    pub(crate) fn encode(&self, data: &[u8]) -> [u8; DISK_BLOCK_SZ] {
        debug_assert_eq!(data.len(), self.data_len as usize);
        let mut buf = [0u8; DISK_BLOCK_SZ];
        buf[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seq.to_le_bytes());
        buf[12..16].copy_from_slice(&self.inode_id.to_le_bytes());
        let prev = self.prev_id.unwrap_or(crate::hash::ID_NONE);
        buf[16..20].copy_from_slice(&prev.to_le_bytes());
        buf[20..22].copy_from_slice(&self.data_len.to_le_bytes());
        let crc = crc16(crc16(0, &buf[..DISK_BLOCK_OFF_CRC]), data);
        buf[DISK_BLOCK_OFF_CRC..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a record header.  Fails with `Unexpected` if the
    /// magic does not identify a block record.
    pub(crate) fn decode(buf: &[u8; DISK_BLOCK_SZ]) -> Result<DiskBlock> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != BLOCK_MAGIC {
            return Err(Error::Unexpected);
        }
        let prev =
            u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        Ok(DiskBlock {
            id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            seq: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            inode_id: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            prev_id: (prev != crate::hash::ID_NONE).then_some(prev),
            data_len: u16::from_le_bytes([buf[20], buf[21]]),
        })
    }

    pub(crate) fn stored_crc(buf: &[u8; DISK_BLOCK_SZ]) -> u16 {
        u16::from_le_bytes([buf[DISK_BLOCK_OFF_CRC], buf[DISK_BLOCK_OFF_CRC + 1]])
    }
}

impl<F: Flash> State<F> {
    /// Folds a flash byte range into a running CRC, reading it
    /// back in bounded chunks.
    pub(crate) fn crc_flash(
        &self,
        initial: u16,
        area_idx: u8,
        mut offset: u32,
        mut len: u32,
    ) -> Result<u16> {
        let mut buf = [0u8; FLASH_BUF_SZ];
        let mut crc = initial;

        while len > 0 {
            let chunk = len.min(FLASH_BUF_SZ as u32) as usize;
            self.flash_read(area_idx, offset, &mut buf[..chunk])?;
            crc = crc16(crc, &buf[..chunk]);
            offset += chunk as u32;
            len -= chunk as u32;
        }

        Ok(crc)
    }

    /// Validates an inode record in place: the CRC is recomputed
    /// over the raw header and the filename read back from flash.
    pub(crate) fn crc_disk_inode_validate(
        &self,
        raw: &[u8; DISK_INODE_SZ],
        filename_len: u8,
        area_idx: u8,
        area_offset: u32,
    ) -> Result<()> {
        let crc = crc16(0, &raw[..DISK_INODE_OFF_CRC]);
        let crc = self.crc_flash(
            crc,
            area_idx,
            area_offset + DISK_INODE_SZ as u32,
            filename_len as u32,
        )?;
        if crc != DiskInode::stored_crc(raw) {
            return Err(Error::Corrupt);
        }
        Ok(())
    }

    /// Validates a block record in place: the CRC is recomputed
    /// over the raw header and the data read back from flash.
    pub(crate) fn crc_disk_block_validate(
        &self,
        raw: &[u8; DISK_BLOCK_SZ],
        data_len: u16,
        area_idx: u8,
        area_offset: u32,
    ) -> Result<()> {
        let crc = crc16(0, &raw[..DISK_BLOCK_OFF_CRC]);
        let crc = self.crc_flash(
            crc,
            area_idx,
            area_offset + DISK_BLOCK_SZ as u32,
            data_len as u32,
        )?;
        if crc != DiskBlock::stored_crc(raw) {
            return Err(Error::Corrupt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_round_trip() {
        let di = DiskInode {
            id: 0x1000_0005,
            seq: 7,
            parent_id: Some(0),
            filename_len: 3,
        };
        let raw = di.encode(b"cfg");
        let back = DiskInode::decode(&raw).expect("valid magic");
        assert_eq!(back.id, di.id);
        assert_eq!(back.seq, 7);
        assert_eq!(back.parent_id, Some(0));
        assert_eq!(back.filename_len, 3);
    }

    #[test]
    fn inode_tombstone_has_no_parent() {
        let di = DiskInode {
            id: 0x1000_0005,
            seq: 8,
            parent_id: None,
            filename_len: 0,
        };
        let raw = di.encode(b"");
        let back = DiskInode::decode(&raw).expect("valid magic");
        assert_eq!(back.parent_id, None);
    }

    #[test]
    fn block_round_trip() {
        let db = DiskBlock {
            id: 0x8000_0001,
            seq: 0,
            inode_id: 0x1000_0000,
            prev_id: None,
            data_len: 5,
        };
        let raw = db.encode(b"hello");
        let back = DiskBlock::decode(&raw).expect("valid magic");
        assert_eq!(back.id, db.id);
        assert_eq!(back.inode_id, db.inode_id);
        assert_eq!(back.prev_id, None);
        assert_eq!(back.data_len, 5);
    }

    #[test]
    fn wrong_magic_is_unexpected() {
        let db = DiskBlock {
            id: 0x8000_0001,
            seq: 0,
            inode_id: 0x1000_0000,
            prev_id: None,
            data_len: 0,
        };
        let raw = db.encode(b"");
        let mut h = [0u8; DISK_INODE_SZ];
        h.copy_from_slice(&raw[..DISK_INODE_SZ]);
        assert!(matches!(DiskInode::decode(&h), Err(Error::Unexpected)));
    }

    #[test]
    fn crc_covers_tail() {
        let db = DiskBlock {
            id: 0x8000_0002,
            seq: 1,
            inode_id: 0x1000_0001,
            prev_id: Some(0x8000_0001),
            data_len: 4,
        };
        let a = db.encode(b"abcd");
        let b = db.encode(b"abce");
        assert_ne!(DiskBlock::stored_crc(&a), DiskBlock::stored_crc(&b));
    }
}
