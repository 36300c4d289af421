// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inodes: files and directories.
//!
//! An inode entry is the long-lived in-RAM representation of a
//! file or directory.  It is deliberately small: the filename and
//! most metadata live only on flash and are decoded on demand into
//! a transient [`Inode`], which carries the first few filename
//! bytes so that most name comparisons never touch the flash.
//!
//! Directory entries own a child list sorted ascending by
//! filename; file entries point at the tail of the reverse-linked
//! block chain.  Cross references are object ids resolved through
//! the index, never pointers, which is what lets the boot scan
//! rebuild the whole tree from flash.

use crate::disk::{DISK_INODE_SZ, DiskInode};
use crate::flash::{Flash, Location};
use crate::fs::State;
use crate::hash::{self, Entry};
use crate::result::{Error, Result};

use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// Number of filename bytes cached in RAM.  Comparisons beyond
/// the prefix read the rest of the name back from flash.
pub(crate) const SHORT_FILENAME_LEN: usize = 3;

/// Longest permitted filename; the on-flash length field is a
/// single byte.
pub(crate) const MAX_FILENAME_LEN: usize = 255;

/// Chunk size for filename comparisons that spill to flash.
const FILENAME_BUF_SZ: usize = 128;

/// The long-lived representation of one file or directory.
pub(crate) struct InodeEntry {
    pub(crate) id: u32,
    /// Location of the newest inode record for this object.
    pub(crate) loc: Location,
    /// One reference per parent link plus one per open handle.
    pub(crate) refcnt: u8,
    pub(crate) kind: InodeKind,
}

/// The payload of an inode entry, keyed by the id's range.
pub(crate) enum InodeKind {
    /// Child inode ids, sorted ascending by filename.
    Dir { children: Vec<u32> },
    /// The tail of the reverse-linked block chain, if any data
    /// has been written.
    File { last_block: Option<u32> },
}

/// Transient, fully-decoded view of an inode record.
#[derive(Clone, Copy)]
pub(crate) struct Inode {
    pub(crate) loc: Location,
    pub(crate) seq: u32,
    pub(crate) parent: Option<u32>,
    pub(crate) filename_len: u8,
    pub(crate) prefix: [u8; SHORT_FILENAME_LEN],
}

impl<F: Flash> State<F> {
    /// Looks up an inode entry, failing with `Corrupt` if the id
    /// is absent or does not denote an inode.
    pub(crate) fn inode_entry(&mut self, id: u32) -> Result<&InodeEntry> {
        match self.index.find(id) {
            Some(Entry::Inode(ie)) => Ok(ie),
            _ => Err(Error::Corrupt),
        }
    }

    pub(crate) fn inode_entry_mut(
        &mut self,
        id: u32,
    ) -> Result<&mut InodeEntry> {
        match self.index.find_mut(id) {
            Some(Entry::Inode(ie)) => Ok(ie),
            _ => Err(Error::Corrupt),
        }
    }

    /// Returns a copy of a directory's child list.
    pub(crate) fn dir_children(&mut self, id: u32) -> Result<Vec<u32>> {
        match &self.inode_entry(id)?.kind {
            InodeKind::Dir { children } => Ok(children.clone()),
            InodeKind::File { .. } => Err(Error::BadArgs),
        }
    }

    /// Returns the tail of a file's block chain.
    pub(crate) fn file_last_block(&mut self, id: u32) -> Result<Option<u32>> {
        match &self.inode_entry(id)?.kind {
            InodeKind::File { last_block } => Ok(*last_block),
            InodeKind::Dir { .. } => Err(Error::BadArgs),
        }
    }

    /// Reads and decodes an inode record header.
    pub(crate) fn inode_read_disk(
        &self,
        area_idx: u8,
        area_offset: u32,
    ) -> Result<DiskInode> {
        let mut buf = [0u8; DISK_INODE_SZ];
        self.flash_read(area_idx, area_offset, &mut buf)?;
        DiskInode::decode(&buf)
    }

    /// Writes an inode record: header first, then the filename.
    pub(crate) fn inode_write_disk(
        &mut self,
        disk_inode: &DiskInode,
        filename: &[u8],
        area_idx: u8,
        area_offset: u32,
    ) -> Result<()> {
        let raw = disk_inode.encode(filename);
        self.flash_write(area_idx, area_offset, &raw)?;
        if !filename.is_empty() {
            self.flash_write(
                area_idx,
                area_offset + DISK_INODE_SZ as u32,
                filename,
            )?;
        }
        Ok(())
    }

    /// Builds the transient view of an inode from its entry.
    pub(crate) fn inode_from_entry(&mut self, id: u32) -> Result<Inode> {
        let loc = self.inode_entry(id)?.loc;
        let disk_inode =
            self.inode_read_disk(loc.area_idx(), loc.offset())?;
        let mut prefix = [0u8; SHORT_FILENAME_LEN];
        let cached = (disk_inode.filename_len as usize).min(SHORT_FILENAME_LEN);
        if cached != 0 {
            self.flash_read(
                loc.area_idx(),
                loc.offset() + DISK_INODE_SZ as u32,
                &mut prefix[..cached],
            )?;
        }
        Ok(Inode {
            loc,
            seq: disk_inode.seq,
            parent: disk_inode.parent_id,
            filename_len: disk_inode.filename_len,
            prefix,
        })
    }

    /// Reads part of an inode's filename from flash.
    fn read_filename_chunk(
        &self,
        inode: &Inode,
        filename_offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        debug_assert!(
            filename_offset + buf.len() <= inode.filename_len as usize
        );
        self.flash_read(
            inode.loc.area_idx(),
            inode.loc.offset()
                + DISK_INODE_SZ as u32
                + filename_offset as u32,
            buf,
        )
    }

    /// Returns an inode's full filename.
    pub(crate) fn inode_filename(&mut self, id: u32) -> Result<Vec<u8>> {
        let inode = self.inode_from_entry(id)?;
        let mut name = vec![0u8; inode.filename_len as usize];
        self.read_filename_chunk(&inode, 0, &mut name)?;
        Ok(name)
    }

    /// Compares an inode's filename against a name held in RAM.
    /// Bytes beyond the cached prefix are read from flash in
    /// chunks.
    pub(crate) fn filename_cmp_ram(
        &self,
        inode: &Inode,
        name: &[u8],
    ) -> Result<Ordering> {
        let short_len = (inode.filename_len as usize).min(name.len());
        let chunk = short_len.min(SHORT_FILENAME_LEN);
        let mut ord = inode.prefix[..chunk].cmp(&name[..chunk]);

        let mut off = chunk;
        while ord == Ordering::Equal && off < short_len {
            let chunk = (short_len - off).min(FILENAME_BUF_SZ);
            let mut buf = [0u8; FILENAME_BUF_SZ];
            self.read_filename_chunk(inode, off, &mut buf[..chunk])?;
            ord = buf[..chunk].cmp(&name[off..off + chunk]);
            off += chunk;
        }

        if ord == Ordering::Equal {
            ord = (inode.filename_len as usize).cmp(&name.len());
        }
        Ok(ord)
    }

    /// Compares the filenames of two inodes, reading both from
    /// flash past the cached prefixes.
    pub(crate) fn filename_cmp_flash(
        &self,
        inode1: &Inode,
        inode2: &Inode,
    ) -> Result<Ordering> {
        let short_len =
            (inode1.filename_len as usize).min(inode2.filename_len as usize);
        let chunk = short_len.min(SHORT_FILENAME_LEN);
        let mut ord = inode1.prefix[..chunk].cmp(&inode2.prefix[..chunk]);

        let mut off = chunk;
        while ord == Ordering::Equal && off < short_len {
            let chunk = (short_len - off).min(FILENAME_BUF_SZ);
            let mut buf1 = [0u8; FILENAME_BUF_SZ];
            let mut buf2 = [0u8; FILENAME_BUF_SZ];
            self.read_filename_chunk(inode1, off, &mut buf1[..chunk])?;
            self.read_filename_chunk(inode2, off, &mut buf2[..chunk])?;
            ord = buf1[..chunk].cmp(&buf2[..chunk]);
            off += chunk;
        }

        if ord == Ordering::Equal {
            ord = inode1.filename_len.cmp(&inode2.filename_len);
        }
        Ok(ord)
    }

    /// Inserts a child into a directory's list, keeping the list
    /// sorted ascending by filename.
    pub(crate) fn inode_add_child(
        &mut self,
        parent_id: u32,
        child_id: u32,
    ) -> Result<()> {
        let child = self.inode_from_entry(child_id)?;
        let kids = self.dir_children(parent_id)?;

        let mut pos = kids.len();
        for (i, &kid) in kids.iter().enumerate() {
            debug_assert_ne!(kid, child_id);
            let cur = self.inode_from_entry(kid)?;
            if self.filename_cmp_flash(&child, &cur)? == Ordering::Less {
                pos = i;
                break;
            }
        }

        match &mut self.inode_entry_mut(parent_id)?.kind {
            InodeKind::Dir { children } => children.insert(pos, child_id),
            InodeKind::File { .. } => return Err(Error::Corrupt),
        }
        Ok(())
    }

    /// Removes a child from a directory's list.
    pub(crate) fn inode_remove_child(
        &mut self,
        parent_id: u32,
        child_id: u32,
    ) -> Result<()> {
        match &mut self.inode_entry_mut(parent_id)?.kind {
            InodeKind::Dir { children } => {
                children.retain(|&c| c != child_id);
                Ok(())
            }
            InodeKind::File { .. } => Err(Error::Corrupt),
        }
    }

    /// Creates a new file or directory: allocates an id, appends
    /// the inode record, indexes the entry, and links it into the
    /// parent.  `parent` is `None` only for the root directory.
    pub(crate) fn inode_new(
        &mut self,
        parent: Option<u32>,
        filename: &[u8],
        is_dir: bool,
    ) -> Result<u32> {
        if filename.len() > MAX_FILENAME_LEN {
            return Err(Error::BadArgs);
        }
        if filename.is_empty() && parent.is_some() {
            return Err(Error::BadArgs);
        }
        if self.index.inode_count() >= self.config.max_inodes {
            return Err(Error::NoMem);
        }

        let id = if is_dir {
            if self.next_dir_id >= hash::ID_DIR_MAX {
                return Err(Error::NoMem);
            }
            let id = self.next_dir_id;
            self.next_dir_id += 1;
            id
        } else {
            if self.next_file_id >= hash::ID_FILE_MAX {
                return Err(Error::NoMem);
            }
            let id = self.next_file_id;
            self.next_file_id += 1;
            id
        };

        let (area_idx, area_offset) =
            self.reserve_space((DISK_INODE_SZ + filename.len()) as u32)?;
        let disk_inode = DiskInode {
            id,
            seq: 0,
            parent_id: parent,
            filename_len: filename.len() as u8,
        };
        self.inode_write_disk(&disk_inode, filename, area_idx, area_offset)?;

        let kind = if is_dir {
            InodeKind::Dir { children: Vec::new() }
        } else {
            InodeKind::File { last_block: None }
        };
        self.index.insert(Entry::Inode(InodeEntry {
            id,
            loc: Location::new(area_idx, area_offset),
            refcnt: 1,
            kind,
        }));

        if let Some(parent_id) = parent {
            self.inode_add_child(parent_id, id)?;
        }
        Ok(id)
    }

    /// Appends a deletion record for an inode.
    pub(crate) fn inode_delete_from_disk(&mut self, id: u32) -> Result<()> {
        let inode = self.inode_from_entry(id)?;
        debug_assert!(inode.parent.is_some());

        let (area_idx, area_offset) =
            self.reserve_space(DISK_INODE_SZ as u32)?;
        let disk_inode = DiskInode {
            id,
            seq: inode.seq + 1,
            parent_id: None,
            filename_len: 0,
        };
        self.inode_write_disk(&disk_inode, b"", area_idx, area_offset)
    }

    /// Deletes a file from RAM: its block entries, its cache, and
    /// finally the entry itself.
    fn inode_delete_from_ram(&mut self, id: u32) -> Result<()> {
        debug_assert!(hash::id_is_file(id));
        while let Some(block_id) = self.file_last_block(id)? {
            self.block_delete_from_ram(block_id)?;
        }
        self.cache_inode_delete(id);
        self.index.remove(id);
        Ok(())
    }

    /// Drops one reference to an inode.  A file whose count hits
    /// zero is deleted from RAM immediately; a directory is moved
    /// onto the unlink worklist, to be reaped by
    /// [`State::inode_reap`].  Because an entry lives either in
    /// the index or on the worklist, never both, it is removed
    /// from the index first.
    pub(crate) fn inode_dec_refcnt(&mut self, id: u32) -> Result<()> {
        let entry = self.inode_entry_mut(id)?;
        debug_assert!(entry.refcnt > 0);
        entry.refcnt -= 1;
        if entry.refcnt > 0 {
            return Ok(());
        }

        if hash::id_is_file(id) {
            self.inode_delete_from_ram(id)?;
        } else {
            self.cache_inode_delete(id);
            if let Some(Entry::Inode(ie)) = self.index.remove(id) {
                self.unlink_list.push(ie);
            }
        }
        Ok(())
    }

    /// Processes the unlink worklist: every queued directory has
    /// each of its children tombstoned and released, which may in
    /// turn queue further directories.  Without the tombstones the
    /// children would survive the next boot scan as orphans and be
    /// adopted by `/lost+found`.
    pub(crate) fn inode_reap(&mut self) -> Result<()> {
        while let Some(dir_entry) = self.unlink_list.pop() {
            debug_assert!(hash::id_is_dir(dir_entry.id));
            let InodeKind::Dir { children } = dir_entry.kind else {
                return Err(Error::Corrupt);
            };
            for child in children {
                self.inode_delete_from_disk(child)?;
                self.inode_dec_refcnt(child)?;
            }
        }
        Ok(())
    }

    /// Drops a reference and reaps any queued directories.
    pub(crate) fn inode_dec_refcnt_reap(&mut self, id: u32) -> Result<()> {
        self.inode_dec_refcnt(id)?;
        self.inode_reap()
    }

    /// Unlinks an inode from the in-RAM tree: detaches it from
    /// its parent and drops the parent's reference.  Open handles
    /// keep the entry alive until they close.
    pub(crate) fn inode_unlink_from_ram(&mut self, id: u32) -> Result<()> {
        let inode = self.inode_from_entry(id)?;
        if let Some(parent) = inode.parent
            && self.index.contains(parent)
        {
            self.inode_remove_child(parent, id)?;
        }
        self.inode_dec_refcnt_reap(id)
    }

    /// Unlinks the file or directory represented by the given
    /// inode.  A directory's descendants are released recursively.
    /// Any open handles referring to an unlinked file remain
    /// valid, and can be read from and written to.
    pub(crate) fn inode_unlink(&mut self, id: u32) -> Result<()> {
        self.inode_delete_from_disk(id)?;
        self.inode_unlink_from_ram(id)
    }

    /// Rewrites an inode record with a new parent and name,
    /// superseding the old record, and re-sorts the entry into the
    /// destination directory.  `new_filename` of `None` keeps the
    /// current name.
    pub(crate) fn inode_rename(
        &mut self,
        id: u32,
        new_parent: u32,
        new_filename: Option<&[u8]>,
    ) -> Result<()> {
        let inode = self.inode_from_entry(id)?;

        let mut namebuf = [0u8; MAX_FILENAME_LEN];
        let filename: &[u8] = match new_filename {
            Some(name) => {
                if name.len() > MAX_FILENAME_LEN || name.is_empty() {
                    return Err(Error::BadArgs);
                }
                name
            }
            None => {
                let len = inode.filename_len as usize;
                self.read_filename_chunk(&inode, 0, &mut namebuf[..len])?;
                &namebuf[..len]
            }
        };

        if let Some(parent) = inode.parent
            && self.index.contains(parent)
        {
            self.inode_remove_child(parent, id)?;
        }

        let (area_idx, area_offset) =
            self.reserve_space((DISK_INODE_SZ + filename.len()) as u32)?;
        let disk_inode = DiskInode {
            id,
            seq: inode.seq + 1,
            parent_id: Some(new_parent),
            filename_len: filename.len() as u8,
        };
        self.inode_write_disk(&disk_inode, filename, area_idx, area_offset)?;
        self.inode_entry_mut(id)?.loc = Location::new(area_idx, area_offset);

        self.inode_add_child(new_parent, id)
    }

    /// Computes a file's length by walking its block chain.
    pub(crate) fn inode_calc_data_length(&mut self, id: u32) -> Result<u32> {
        let mut len = 0u32;
        let mut cur = self.file_last_block(id)?;
        while let Some(block_id) = cur {
            let block = self.block_from_entry(block_id)?;
            len += block.data_len as u32;
            cur = block.prev;
        }
        Ok(len)
    }

    /// Returns a file's length, via the cache.
    pub(crate) fn inode_data_len(&mut self, id: u32) -> Result<u32> {
        let slot = self.cache_inode_ensure(id)?;
        Ok(self.cache.inodes[slot].file_size)
    }

    /// Reads from a file.  Returns the number of bytes read,
    /// which is short only when the read crosses the end of the
    /// file.
    pub(crate) fn inode_read(
        &mut self,
        id: u32,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.inode_data_len(id)?;
        if offset >= size {
            return Ok(0);
        }
        let end = size.min(offset + buf.len() as u32);

        let mut cur = offset;
        let mut dst = 0usize;
        while cur < end {
            let cb = self.cache_seek(id, cur)?;
            let block_off = cur - cb.file_offset;
            let n = (end - cur)
                .min(cb.block.data_len as u32 - block_off);
            self.block_data_read(
                cb.loc,
                block_off as u16,
                &mut buf[dst..dst + n as usize],
            )?;
            cur += n;
            dst += n as usize;
        }

        Ok((end - offset) as usize)
    }
}
