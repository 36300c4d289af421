// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! This is a log-structured filesystem for NOR flash parts, the
//! kind found on small microcontroller boards: erase works only
//! on whole sectors, a write can clear bits but never set them,
//! and there is no spare RAM for a journal.
//!
//! The design leans into those constraints instead of fighting
//! them.  Flash is divided into areas, each one erase unit; all
//! mutation is appending records to an area.  A file or directory
//! is an inode record; file contents are data block records
//! chained together in reverse, each naming its predecessor.
//! Updating an object means appending a fresh record with the
//! same id and a higher sequence number; the old record becomes
//! garbage where it lies.  A moving collector compacts one area
//! at a time into a reserved scratch area, reclaiming the
//! superseded records, and the areas rotate through the scratch
//! role so no sector wears faster than the rest.
//!
//! Because every record carries a CRC over its header and
//! payload, a power cut at any instant costs at most the record
//! that was being written: mounting scans every area, keeps the
//! newest valid record per object id, stitches blocks into files
//! and inodes into directories, and adopts anything whose parent
//! vanished into `/lost+found`.  There is no ordering requirement
//! between the passes of the log and the crash; consistency falls
//! out of ids, sequence numbers, and checksums alone.
//!
//! The in-RAM footprint is deliberately small and fixed: a
//! 256-bucket index of live objects, a bounded cache of decoded
//! block headers, and pools for open handles, all sized at
//! construction.  A single mutex serializes the public API.
//!
//! References:
//!
//! [Rosen92] Mendel Rosenblum and John K Ousterhout. 1992.  ``The
//! Design and Implementation of a Log-Structured File System''.
//! ACM Transactions on Computer Systems 10, 1 (Feb. 1992), 26-52.
//! https://doi.org/10.1145/146941.146943

#![cfg_attr(not(any(test, clippy)), no_std)]

extern crate alloc;

mod area;
mod block;
mod cache;
mod crc16;
mod dir;
mod disk;
mod file;
mod flash;
mod format;
mod fs;
mod gc;
mod hash;
mod inode;
mod path;
mod restore;
mod result;
mod write;

#[cfg(test)]
mod fakes;

pub use crate::area::AreaDesc;
pub use crate::dir::{DirEntry, DirHandle};
pub use crate::file::{FileHandle, OpenFlags};
pub use crate::flash::Flash;
pub use crate::fs::{Config, FileSystem};
pub use crate::result::{Error, Result};
