// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Open directories.
//!
//! A directory handle iterates the sorted child list one entry at
//! a time.  Both the directory and the child most recently
//! returned are pinned with a reference while the handle is open,
//! so an unlink racing the iteration cannot free what the handle
//! still points at.

use crate::flash::Flash;
use crate::fs::State;
use crate::hash;
use crate::result::{Error, Result};

use alloc::vec::Vec;

/// An open directory.  Handles are plain indices; they are only
/// meaningful to the filesystem that issued them.
#[derive(Clone, Copy, Debug)]
pub struct DirHandle(pub(crate) usize);

/// One entry returned by
/// [`readdir`](crate::fs::FileSystem::readdir).
pub struct DirEntry {
    id: u32,
    name: Vec<u8>,
}

impl DirEntry {
    /// The entry's filename.  Names are byte strings; nothing
    /// guarantees UTF-8.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Whether the entry is a directory.
    pub fn is_dir(&self) -> bool {
        hash::id_is_dir(self.id)
    }
}

pub(crate) struct DirState {
    pub(crate) inode_id: u32,
    /// The child most recently handed out, still pinned.
    pub(crate) cur_child: Option<u32>,
}

impl<F: Flash> State<F> {
    fn dir_state(&self, handle: DirHandle) -> Result<&DirState> {
        self.dirs
            .get(handle.0)
            .and_then(|s| s.as_ref())
            .ok_or(Error::BadArgs)
    }

    /// Opens a directory for iteration.
    pub(crate) fn dir_open(&mut self, path: &[u8]) -> Result<DirHandle> {
        let slot = self
            .dirs
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::NoMem)?;

        let inode_id = self.path_find_inode(path)?;
        if !hash::id_is_dir(inode_id) {
            return Err(Error::BadArgs);
        }

        self.inode_entry_mut(inode_id)?.refcnt += 1;
        self.dirs[slot] = Some(DirState { inode_id, cur_child: None });
        Ok(DirHandle(slot))
    }

    /// Returns the next entry in sorted order, or `None` at the
    /// end of the directory.
    pub(crate) fn dir_read(
        &mut self,
        handle: DirHandle,
    ) -> Result<Option<DirEntry>> {
        let state = self.dir_state(handle)?;
        let dir_id = state.inode_id;
        let prev_child = state.cur_child;

        let children = self.dir_children(dir_id)?;
        let next = match prev_child {
            None => children.first().copied(),
            Some(prev) => match children.iter().position(|&c| c == prev) {
                // The pinned child was unlinked out from under the
                // iteration; there is no position to resume from.
                None => None,
                Some(pos) => children.get(pos + 1).copied(),
            },
        };

        if let Some(next_id) = next {
            self.inode_entry_mut(next_id)?.refcnt += 1;
        }
        if let Some(prev) = prev_child {
            self.inode_dec_refcnt_reap(prev)?;
        }
        if let Some(s) = self.dirs[handle.0].as_mut() {
            s.cur_child = next;
        }

        match next {
            None => Ok(None),
            Some(id) => {
                let name = self.inode_filename(id)?;
                Ok(Some(DirEntry { id, name }))
            }
        }
    }

    /// Closes a directory handle, dropping its pins.
    pub(crate) fn dir_close(&mut self, handle: DirHandle) -> Result<()> {
        let state = self.dir_state(handle)?;
        let inode_id = state.inode_id;
        let cur_child = state.cur_child;
        self.dirs[handle.0] = None;

        if let Some(child) = cur_child {
            self.inode_dec_refcnt_reap(child)?;
        }
        self.inode_dec_refcnt_reap(inode_id)
    }
}
