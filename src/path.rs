// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path resolution.
//!
//! Paths are absolute and "/"-delimited; names are compared
//! byte-wise, with no Unicode awareness.  Resolution walks the
//! directory tree one component at a time, searching each child
//! list linearly.  The lists are sorted, so a search can stop as
//! soon as it passes the sought name.

use crate::flash::Flash;
use crate::fs::State;
use crate::hash;
use crate::result::{Error, Result};

use core::cmp::Ordering;

/// Result of resolving a path: the leaf's parent directory (if
/// the path names anything below the root), the leaf inode if it
/// exists, and the leaf name.  A lookup whose intermediate
/// components all resolve but whose leaf does not yields
/// `inode: None`, which is how creation finds its parent.
pub(crate) struct PathLookup<'a> {
    pub(crate) parent: Option<u32>,
    pub(crate) inode: Option<u32>,
    pub(crate) leaf: &'a [u8],
}

/// Splits a path into its components, skipping empty ones (so
/// leading, trailing, and doubled slashes are harmless).
fn components(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|&b| b == b'/').filter(|c| !c.is_empty())
}

impl<F: Flash> State<F> {
    /// Searches a directory for a child by name.  The child list
    /// is sorted ascending, so the scan bails out early once it
    /// has passed the name.
    pub(crate) fn dir_find_child(
        &mut self,
        dir_id: u32,
        name: &[u8],
    ) -> Result<Option<u32>> {
        let kids = self.dir_children(dir_id)?;
        for kid in kids {
            let kid_inode = self.inode_from_entry(kid)?;
            match self.filename_cmp_ram(&kid_inode, name)? {
                Ordering::Less => {}
                Ordering::Equal => return Ok(Some(kid)),
                Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Resolves a path.  Fails with `NotFound` if an intermediate
    /// component is missing or is not a directory; a missing leaf
    /// is reported through the returned lookup instead.
    pub(crate) fn path_find<'a>(
        &mut self,
        path: &'a [u8],
    ) -> Result<PathLookup<'a>> {
        let root = self.root_id.ok_or(Error::Corrupt)?;

        let mut parent: Option<u32> = None;
        let mut inode: Option<u32> = Some(root);
        let mut leaf: &[u8] = b"";

        for name in components(path) {
            if name.len() > crate::inode::MAX_FILENAME_LEN {
                return Err(Error::BadArgs);
            }
            let dir_id = match inode {
                Some(id) if hash::id_is_dir(id) => id,
                // The previous component named a file, or nothing.
                _ => return Err(Error::NotFound),
            };
            parent = Some(dir_id);
            inode = self.dir_find_child(dir_id, name)?;
            leaf = name;
        }

        Ok(PathLookup { parent, inode, leaf })
    }

    /// Resolves a path that must already exist.
    pub(crate) fn path_find_inode(&mut self, path: &[u8]) -> Result<u32> {
        self.path_find(path)?.inode.ok_or(Error::NotFound)
    }

    /// Creates a new file or directory at the given path.
    pub(crate) fn path_new(
        &mut self,
        path: &[u8],
        is_dir: bool,
    ) -> Result<u32> {
        let lookup = self.path_find(path)?;
        if lookup.inode.is_some() {
            return Err(Error::Exists);
        }
        let parent = lookup.parent.ok_or(Error::BadArgs)?;
        let leaf = lookup.leaf;
        let id = self.inode_new(Some(parent), leaf, is_dir)?;
        Ok(id)
    }

    /// Unlinks the file or directory at the given path.
    pub(crate) fn path_unlink(&mut self, path: &[u8]) -> Result<()> {
        let lookup = self.path_find(path)?;
        let id = lookup.inode.ok_or(Error::NotFound)?;
        if lookup.parent.is_none() {
            // The root directory cannot be unlinked.
            return Err(Error::BadArgs);
        }
        self.inode_unlink(id)
    }

    /// Renames (and possibly moves) the object at `from` to `to`.
    /// An existing object at `to` is unlinked first; the rename
    /// itself is a single superseding inode record, so a power cut
    /// leaves either the old name or the new one, never neither.
    pub(crate) fn path_rename(
        &mut self,
        from: &[u8],
        to: &[u8],
    ) -> Result<()> {
        let from_lookup = self.path_find(from)?;
        let id = from_lookup.inode.ok_or(Error::NotFound)?;
        if from_lookup.parent.is_none() {
            return Err(Error::BadArgs);
        }

        let to_lookup = self.path_find(to)?;
        let new_parent = to_lookup.parent.ok_or(Error::BadArgs)?;
        let new_leaf = to_lookup.leaf;
        if let Some(existing) = to_lookup.inode {
            if existing == id {
                // Renaming over itself still writes a fresh
                // record.
                return self.inode_rename(id, new_parent, Some(new_leaf));
            }
            self.inode_unlink(existing)?;
        }

        self.inode_rename(id, new_parent, Some(new_leaf))
    }

    /// Creates a directory at the given path.
    pub(crate) fn path_new_dir(&mut self, path: &[u8]) -> Result<u32> {
        self.path_new(path, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn components_skip_empty() {
        let collect = |p: &'static [u8]| -> Vec<&'static [u8]> {
            components(p).collect()
        };
        assert_eq!(collect(b"/a/b"), [b"a" as &[u8], b"b"]);
        assert_eq!(collect(b"a/b/"), [b"a" as &[u8], b"b"]);
        assert_eq!(collect(b"//a//b"), [b"a" as &[u8], b"b"]);
        assert!(collect(b"/").is_empty());
        assert!(collect(b"").is_empty());
    }
}
