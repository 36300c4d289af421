// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Open files.
//!
//! A file handle is an index into a fixed pool of open-file
//! states: the inode, a byte offset, and the access flags the
//! file was opened with.  Handles pin their inode with a
//! reference, so an unlinked file stays readable and writable
//! through existing handles until the last one closes.

use crate::flash::Flash;
use crate::fs::State;
use crate::hash;
use crate::result::{Error, Result};

use bitflags::bitflags;

bitflags! {
    /// Access flags for [`open`](crate::fs::FileSystem::open).
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct OpenFlags: u8 {
        /// Open for reading.
        const READ = 0x01;
        /// Open for writing.
        const WRITE = 0x02;
        /// Every write lands at the end of the file.
        const APPEND = 0x04;
        /// Discard existing contents on open.
        const TRUNCATE = 0x08;
        /// Create the file if it does not exist.
        const CREATE = 0x10;
    }
}

/// An open file.  Handles are plain indices; they are only
/// meaningful to the filesystem that issued them.
#[derive(Clone, Copy, Debug)]
pub struct FileHandle(pub(crate) usize);

pub(crate) struct FileState {
    pub(crate) inode_id: u32,
    pub(crate) offset: u32,
    pub(crate) flags: OpenFlags,
}

impl<F: Flash> State<F> {
    pub(crate) fn file_state(&self, handle: FileHandle) -> Result<&FileState> {
        self.files
            .get(handle.0)
            .and_then(|s| s.as_ref())
            .ok_or(Error::BadArgs)
    }

    fn file_state_mut(
        &mut self,
        handle: FileHandle,
    ) -> Result<&mut FileState> {
        self.files
            .get_mut(handle.0)
            .and_then(|s| s.as_mut())
            .ok_or(Error::BadArgs)
    }

    /// Opens a file, creating or truncating it as the flags
    /// dictate, and returns a handle from the file pool.
    pub(crate) fn file_open(
        &mut self,
        path: &[u8],
        flags: OpenFlags,
    ) -> Result<FileHandle> {
        if !flags.intersects(OpenFlags::READ | OpenFlags::WRITE) {
            return Err(Error::BadArgs);
        }
        if flags
            .intersects(
                OpenFlags::APPEND | OpenFlags::TRUNCATE | OpenFlags::CREATE,
            )
            && !flags.contains(OpenFlags::WRITE)
        {
            return Err(Error::BadArgs);
        }

        let slot = self
            .files
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::NoMem)?;

        let lookup = self.path_find(path)?;
        let parent = lookup.parent;
        let leaf = lookup.leaf;

        let inode_id = match lookup.inode {
            Some(id) => {
                if !hash::id_is_file(id) {
                    return Err(Error::BadArgs);
                }
                if flags.contains(OpenFlags::TRUNCATE) {
                    // Truncation is an unlink plus a fresh create;
                    // the data blocks become garbage for the next
                    // collection.
                    let parent = parent.ok_or(Error::BadArgs)?;
                    self.inode_unlink(id)?;
                    self.inode_new(Some(parent), leaf, false)?
                } else {
                    id
                }
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(Error::NotFound);
                }
                let parent = parent.ok_or(Error::BadArgs)?;
                self.inode_new(Some(parent), leaf, false)?
            }
        };

        self.inode_entry_mut(inode_id)?.refcnt += 1;
        self.files[slot] =
            Some(FileState { inode_id, offset: 0, flags });
        Ok(FileHandle(slot))
    }

    /// Closes a handle, dropping its reference to the inode.
    pub(crate) fn file_close(&mut self, handle: FileHandle) -> Result<()> {
        let state = self.file_state(handle)?;
        let inode_id = state.inode_id;
        self.files[handle.0] = None;
        self.inode_dec_refcnt_reap(inode_id)
    }

    /// Repositions a handle.  Seeking past the end of the file is
    /// an error; seeking exactly to the end is allowed.
    pub(crate) fn file_seek(
        &mut self,
        handle: FileHandle,
        offset: u32,
    ) -> Result<()> {
        let inode_id = self.file_state(handle)?.inode_id;
        let len = self.inode_data_len(inode_id)?;
        if offset > len {
            return Err(Error::Range);
        }
        self.file_state_mut(handle)?.offset = offset;
        Ok(())
    }

    /// Returns the current length of an open file.
    pub(crate) fn file_len(&mut self, handle: FileHandle) -> Result<u32> {
        let inode_id = self.file_state(handle)?.inode_id;
        self.inode_data_len(inode_id)
    }

    /// Reads from a handle at its current offset, advancing it by
    /// the number of bytes actually read.
    pub(crate) fn file_read(
        &mut self,
        handle: FileHandle,
        buf: &mut [u8],
    ) -> Result<usize> {
        let state = self.file_state(handle)?;
        if !state.flags.contains(OpenFlags::READ) {
            return Err(Error::BadArgs);
        }
        let inode_id = state.inode_id;
        let offset = state.offset;

        let nread = self.inode_read(inode_id, offset, buf)?;
        self.file_state_mut(handle)?.offset = offset + nread as u32;
        Ok(nread)
    }
}
