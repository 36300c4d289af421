// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The filesystem object.
//!
//! A [`FileSystem`] owns the flash driver and every in-RAM
//! resource: the area table, the object index, the caches, and
//! the handle pools, all sized once from the [`Config`].  A
//! single mutex serializes every public operation; there is no
//! internal parallelism, and the observable order of mutations is
//! the call order.

use crate::area::{AREA_ID_NONE, Area, AreaDesc};
use crate::cache::Cache;
use crate::dir::{DirEntry, DirHandle, DirState};
use crate::file::{FileHandle, FileState, OpenFlags};
use crate::flash::Flash;
use crate::hash::{self, Index};
use crate::inode::InodeEntry;
use crate::result::{Error, Result};

use alloc::vec::Vec;
use spin::Mutex;

/// Pool capacities, fixed at construction.  Operations that need
/// an entry from an exhausted pool fail with
/// [`NoMem`](Error::NoMem); nothing grows at runtime.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Inode entries (files plus directories).
    pub max_inodes: usize,
    /// Data block entries.
    pub max_blocks: usize,
    /// Concurrently open file handles.
    pub max_files: usize,
    /// Concurrently open directory handles.
    pub max_dirs: usize,
    /// Cached file inodes.
    pub max_cache_inodes: usize,
    /// Cached block headers, across all cached inodes.
    pub max_cache_blocks: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_inodes: 100,
            max_blocks: 100,
            max_files: 8,
            max_dirs: 4,
            max_cache_inodes: 4,
            max_cache_blocks: 64,
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.max_inodes == 0
            || self.max_blocks == 0
            || self.max_files == 0
            || self.max_dirs == 0
            || self.max_cache_inodes == 0
            || self.max_cache_blocks == 0
        {
            return Err(Error::BadArgs);
        }
        Ok(())
    }
}

/// All mutable filesystem state, guarded by the mutex in
/// [`FileSystem`].
pub(crate) struct State<F> {
    pub(crate) flash: F,
    pub(crate) config: Config,
    pub(crate) areas: Vec<Area>,
    pub(crate) scratch_idx: u8,
    pub(crate) index: Index,
    pub(crate) root_id: Option<u32>,
    pub(crate) lost_found_id: Option<u32>,
    pub(crate) next_dir_id: u32,
    pub(crate) next_file_id: u32,
    pub(crate) next_block_id: u32,
    pub(crate) max_block_data: u16,
    pub(crate) cache: Cache,
    pub(crate) files: Vec<Option<FileState>>,
    pub(crate) dirs: Vec<Option<DirState>>,
    /// Directories awaiting recursive unlink.  An inode entry is
    /// either in the index or on this list, never both.
    pub(crate) unlink_list: Vec<InodeEntry>,
}

impl<F: Flash> State<F> {
    pub(crate) fn new(flash: F, config: Config) -> State<F> {
        let mut state = State {
            flash,
            config,
            areas: Vec::new(),
            scratch_idx: AREA_ID_NONE,
            index: Index::new(),
            root_id: None,
            lost_found_id: None,
            next_dir_id: hash::ID_DIR_MIN,
            next_file_id: hash::ID_FILE_MIN,
            next_block_id: hash::ID_BLOCK_MIN,
            max_block_data: 0,
            cache: Cache::new(),
            files: Vec::new(),
            dirs: Vec::new(),
            unlink_list: Vec::new(),
        };
        state.reset();
        state
    }

    /// Fully reinitializes the RAM representation, applying the
    /// configured pool capacities.
    pub(crate) fn reset(&mut self) {
        self.cache.clear();
        self.index.clear();
        self.areas.clear();
        self.scratch_idx = AREA_ID_NONE;
        self.root_id = None;
        self.lost_found_id = None;
        self.next_dir_id = hash::ID_DIR_MIN;
        self.next_file_id = hash::ID_FILE_MIN;
        self.next_block_id = hash::ID_BLOCK_MIN;
        self.max_block_data = 0;
        self.unlink_list.clear();

        self.files.clear();
        self.files.resize_with(self.config.max_files, || None);
        self.dirs.clear();
        self.dirs.resize_with(self.config.max_dirs, || None);
    }
}

/// A mounted (or mountable) log-structured filesystem over a NOR
/// flash driver.
pub struct FileSystem<F: Flash> {
    state: Mutex<State<F>>,
}

impl<F: Flash> FileSystem<F> {
    /// Wraps a flash driver.  The filesystem is unusable until
    /// [`format`](FileSystem::format) or
    /// [`mount`](FileSystem::mount) succeeds.
    pub fn new(flash: F, config: Config) -> FileSystem<F> {
        FileSystem { state: Mutex::new(State::new(flash, config)) }
    }

    /// Erases the given areas and writes an empty filesystem:
    /// area headers, a scratch area (the largest), and the root
    /// directory.
    pub fn format(&self, areas: &[AreaDesc]) -> Result<()> {
        let mut state = self.state.lock();
        state.config.validate()?;
        let result = state.format_full(areas);
        if result.is_err() {
            state.reset();
        }
        result
    }

    /// Mounts the given areas by scanning flash and rebuilding
    /// the in-RAM state.  A [`Corrupt`](Error::Corrupt) failure
    /// means the flash does not hold a consistent filesystem; the
    /// caller may reformat.
    pub fn mount(&self, areas: &[AreaDesc]) -> Result<()> {
        let mut state = self.state.lock();
        state.config.validate()?;
        state.restore_full(areas)
    }

    /// Opens a file.  See [`OpenFlags`] for the access modes.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<FileHandle> {
        self.state.lock().file_open(path.as_bytes(), flags)
    }

    /// Closes a file handle.
    pub fn close(&self, handle: FileHandle) -> Result<()> {
        self.state.lock().file_close(handle)
    }

    /// Reads at the handle's offset; returns the number of bytes
    /// read, short only at end of file.
    pub fn read(&self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.state.lock().file_read(handle, buf)
    }

    /// Writes at the handle's offset (or at the end of the file
    /// for append handles).
    pub fn write(&self, handle: FileHandle, data: &[u8]) -> Result<()> {
        self.state.lock().file_write(handle, data)
    }

    /// Repositions a handle; seeking past the end of the file
    /// fails with [`Range`](Error::Range).
    pub fn seek(&self, handle: FileHandle, offset: u32) -> Result<()> {
        self.state.lock().file_seek(handle, offset)
    }

    /// Returns the current length of an open file.
    pub fn file_len(&self, handle: FileHandle) -> Result<u32> {
        self.state.lock().file_len(handle)
    }

    /// Creates a directory.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.state.lock().path_new_dir(path.as_bytes()).map(|_| ())
    }

    /// Unlinks a file or directory; directories are removed
    /// recursively.  Open handles to an unlinked file remain
    /// usable until closed.
    pub fn unlink(&self, path: &str) -> Result<()> {
        self.state.lock().path_unlink(path.as_bytes())
    }

    /// Renames (and possibly moves) a file or directory,
    /// replacing anything already at the destination.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.state.lock().path_rename(from.as_bytes(), to.as_bytes())
    }

    /// Opens a directory for iteration.
    pub fn opendir(&self, path: &str) -> Result<DirHandle> {
        self.state.lock().dir_open(path.as_bytes())
    }

    /// Returns the next directory entry in sorted order, or
    /// `None` at the end.
    pub fn readdir(&self, handle: DirHandle) -> Result<Option<DirEntry>> {
        self.state.lock().dir_read(handle)
    }

    /// Closes a directory handle.
    pub fn closedir(&self, handle: DirHandle) -> Result<()> {
        self.state.lock().dir_close(handle)
    }
}

#[cfg(test)]
impl<F: Flash> State<F> {
    /// Verifies the quiescent-state invariants: every indexed
    /// record validates, block chains terminate, child lists are
    /// strictly sorted, and the scratch area is the longest.
    pub(crate) fn check_invariants(&mut self) {
        use crate::disk::{DISK_BLOCK_SZ, DISK_INODE_SZ};
        use crate::hash::Entry;
        use crate::inode::InodeKind;
        use core::cmp::Ordering;

        let scratch_len = self.areas[self.scratch_idx as usize].length;
        assert!(self.areas.iter().all(|a| a.length <= scratch_len));

        for id in self.index.ids() {
            let loc = self.index.find(id).expect("indexed").loc();
            if hash::id_is_inode(id) {
                let mut raw = [0u8; DISK_INODE_SZ];
                self.flash_read(loc.area_idx(), loc.offset(), &mut raw)
                    .expect("readable record");
                let di = crate::disk::DiskInode::decode(&raw)
                    .expect("inode magic");
                assert_eq!(di.id, id);
                self.crc_disk_inode_validate(
                    &raw,
                    di.filename_len,
                    loc.area_idx(),
                    loc.offset(),
                )
                .expect("inode CRC");
            } else {
                let mut raw = [0u8; DISK_BLOCK_SZ];
                self.flash_read(loc.area_idx(), loc.offset(), &mut raw)
                    .expect("readable record");
                let db = crate::disk::DiskBlock::decode(&raw)
                    .expect("block magic");
                assert_eq!(db.id, id);
                self.crc_disk_block_validate(
                    &raw,
                    db.data_len,
                    loc.area_idx(),
                    loc.offset(),
                )
                .expect("block CRC");
            }
        }

        for id in self.index.ids() {
            if !hash::id_is_inode(id) {
                continue;
            }
            enum Payload {
                File(Option<u32>),
                Dir(Vec<u32>),
            }
            let payload = match self.index.find(id) {
                Some(Entry::Inode(ie)) => match &ie.kind {
                    InodeKind::File { last_block } => {
                        Payload::File(*last_block)
                    }
                    InodeKind::Dir { children } => {
                        Payload::Dir(children.clone())
                    }
                },
                _ => unreachable!(),
            };
            match payload {
                Payload::File(last_block) => {
                    let mut cur = last_block;
                    let mut steps = 0usize;
                    while let Some(block_id) = cur {
                        steps += 1;
                        assert!(steps <= self.index.block_count());
                        let block = self
                            .block_from_entry(block_id)
                            .expect("chained block");
                        assert_eq!(block.inode_id, id);
                        cur = block.prev;
                    }
                }
                Payload::Dir(kids) => {
                    for pair in kids.windows(2) {
                        let a = self
                            .inode_from_entry(pair[0])
                            .expect("child inode");
                        let b = self
                            .inode_from_entry(pair[1])
                            .expect("child inode");
                        assert_eq!(
                            self.filename_cmp_flash(&a, &b)
                                .expect("name cmp"),
                            Ordering::Less
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemFlash;

    fn fs_with(flash: &MemFlash) -> FileSystem<MemFlash> {
        FileSystem::new(flash.clone(), Config::default())
    }

    fn formatted(
        nsectors: usize,
        sector_len: u32,
    ) -> (FileSystem<MemFlash>, MemFlash, Vec<AreaDesc>) {
        let flash = MemFlash::uniform(nsectors, sector_len);
        let descs = flash.area_descs();
        let fs = fs_with(&flash);
        fs.format(&descs).expect("format");
        (fs, flash, descs)
    }

    fn check(fs: &FileSystem<MemFlash>) {
        fs.state.lock().check_invariants();
    }

    #[test]
    fn format_then_mount_yields_empty_root() {
        let (fs, flash, descs) = formatted(4, 16 * 1024);
        check(&fs);

        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
        let dh = fs2.opendir("/").expect("opendir root");
        assert!(fs2.readdir(dh).expect("readdir").is_none());
        fs2.closedir(dh).expect("closedir");
        check(&fs2);
    }

    #[test]
    fn create_and_read_back() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        fs.mkdir("/a").expect("mkdir");
        let fh = fs
            .open("/a/b", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"hello").expect("write");
        fs.close(fh).expect("close");

        let fh = fs.open("/a/b", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 16];
        let n = fs.read(fh, &mut buf).expect("read");
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
        fs.close(fh).expect("close");
        check(&fs);
    }

    #[test]
    fn round_trip_through_fresh_handle() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        let data = b"the quick brown fox jumps over the lazy dog";
        fs.write(fh, data).expect("write");
        fs.seek(fh, 0).expect("seek");
        let mut buf = [0u8; 64];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), data.len());
        assert_eq!(&buf[..data.len()], data);
        fs.close(fh).expect("close");
    }

    #[test]
    fn large_file_spans_blocks() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        fs.state.lock().max_block_data = 8;

        let data: Vec<u8> = (0u8..20).collect();
        let fh = fs
            .open("/big", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, &data).expect("write");
        fs.close(fh).expect("close");

        // Expect exactly three blocks of 8, 8, and 4 bytes.
        {
            let mut state = fs.state.lock();
            let id = state.path_find_inode(b"/big").expect("resolve");
            let mut lens = Vec::new();
            let mut cur = state.file_last_block(id).expect("file");
            while let Some(block_id) = cur {
                let block =
                    state.block_from_entry(block_id).expect("block");
                lens.push(block.data_len);
                cur = block.prev;
            }
            assert_eq!(lens, [4, 8, 8]);
        }

        let fh = fs.open("/big", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 32];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), 20);
        assert_eq!(&buf[..20], &data[..]);
        fs.close(fh).expect("close");
        check(&fs);
    }

    #[test]
    fn exact_block_boundaries() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        fs.state.lock().max_block_data = 8;

        let fh = fs
            .open("/x", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, &[0xaa; 8]).expect("write");
        fs.close(fh).expect("close");
        let fh = fs
            .open("/y", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, &[0xbb; 9]).expect("write");
        fs.close(fh).expect("close");

        let mut state = fs.state.lock();
        let count_blocks = |state: &mut State<MemFlash>, path: &[u8]| {
            let id = state.path_find_inode(path).expect("resolve");
            let mut lens = Vec::new();
            let mut cur = state.file_last_block(id).expect("file");
            while let Some(block_id) = cur {
                let block =
                    state.block_from_entry(block_id).expect("block");
                lens.push(block.data_len);
                cur = block.prev;
            }
            lens
        };
        assert_eq!(count_blocks(&mut state, b"/x"), [8]);
        assert_eq!(count_blocks(&mut state, b"/y"), [1, 8]);
    }

    #[test]
    fn seek_past_end_fails() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"abc").expect("write");
        assert_eq!(fs.seek(fh, 3), Ok(()));
        assert_eq!(fs.seek(fh, 4), Err(Error::Range));
        fs.close(fh).expect("close");
    }

    #[test]
    fn overwrite_in_place() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"aaaaaaaaaa").expect("write");
        fs.seek(fh, 3).expect("seek");
        fs.write(fh, b"bbb").expect("overwrite");
        fs.seek(fh, 0).expect("seek");
        let mut buf = [0u8; 16];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), 10);
        assert_eq!(&buf[..10], b"aaabbbaaaa");
        fs.close(fh).expect("close");
        check(&fs);
    }

    #[test]
    fn append_flag_always_writes_at_end() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/log", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"one").expect("write");
        fs.close(fh).expect("close");

        let fh = fs
            .open("/log", OpenFlags::WRITE | OpenFlags::APPEND)
            .expect("open");
        fs.write(fh, b"two").expect("append");
        fs.close(fh).expect("close");

        let fh = fs.open("/log", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), 6);
        assert_eq!(&buf[..6], b"onetwo");
        fs.close(fh).expect("close");
    }

    #[test]
    fn truncate_discards_contents() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"old contents").expect("write");
        fs.close(fh).expect("close");

        let fh = fs
            .open("/f", OpenFlags::WRITE | OpenFlags::TRUNCATE)
            .expect("truncate");
        assert_eq!(fs.file_len(fh).expect("len"), 0);
        fs.write(fh, b"new").expect("write");
        fs.close(fh).expect("close");

        let fh = fs.open("/f", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 16];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"new");
        fs.close(fh).expect("close");
    }

    #[test]
    fn readdir_is_sorted() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        for name in ["/m", "/a", "/zz", "/b/", "/k"] {
            fs.mkdir(name).expect("mkdir");
        }
        let dh = fs.opendir("/").expect("opendir");
        let mut names = Vec::new();
        while let Some(entry) = fs.readdir(dh).expect("readdir") {
            assert!(entry.is_dir());
            names.push(entry.name().to_vec());
        }
        fs.closedir(dh).expect("closedir");
        assert_eq!(names, [b"a".to_vec(), b"b".to_vec(), b"k".to_vec(),
            b"m".to_vec(), b"zz".to_vec()]);
        check(&fs);
    }

    #[test]
    fn long_names_compare_past_cached_prefix() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        // Same 3-byte prefix; they differ only beyond what RAM
        // caches.
        fs.mkdir("/prefix_aaaa").expect("mkdir");
        fs.mkdir("/prefix_aaab").expect("mkdir");
        fs.mkdir("/prefix_a").expect("mkdir");

        let dh = fs.opendir("/").expect("opendir");
        let mut names = Vec::new();
        while let Some(entry) = fs.readdir(dh).expect("readdir") {
            names.push(entry.name().to_vec());
        }
        fs.closedir(dh).expect("closedir");
        assert_eq!(names, [
            b"prefix_a".to_vec(),
            b"prefix_aaaa".to_vec(),
            b"prefix_aaab".to_vec(),
        ]);

        let fh = fs.open(
            "/prefix_aaab/f",
            OpenFlags::WRITE | OpenFlags::CREATE,
        );
        assert!(fh.is_ok());
        check(&fs);
    }

    #[test]
    fn unlink_then_reopen_fails() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"data").expect("write");
        fs.close(fh).expect("close");

        fs.unlink("/f").expect("unlink");
        assert_eq!(fs.open("/f", OpenFlags::READ).err(), Some(Error::NotFound));
        check(&fs);
    }

    #[test]
    fn unlinked_file_stays_readable_through_open_handle() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let wh = fs
            .open("/f", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(wh, b"still here").expect("write");
        fs.seek(wh, 0).expect("seek");

        fs.unlink("/f").expect("unlink");
        let mut buf = [0u8; 16];
        assert_eq!(fs.read(wh, &mut buf).expect("read"), 10);
        assert_eq!(&buf[..10], b"still here");
        fs.close(wh).expect("close");

        assert_eq!(fs.open("/f", OpenFlags::READ).err(), Some(Error::NotFound));
        check(&fs);
    }

    #[test]
    fn recursive_unlink_removes_descendants() {
        let (fs, flash, descs) = formatted(4, 16 * 1024);
        fs.mkdir("/d").expect("mkdir");
        fs.mkdir("/d/sub").expect("mkdir");
        let fh = fs
            .open("/d/sub/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"bytes").expect("write");
        fs.close(fh).expect("close");

        fs.unlink("/d").expect("unlink");
        assert_eq!(
            fs.open("/d/sub/f", OpenFlags::READ).err(),
            Some(Error::NotFound)
        );
        assert_eq!(fs.opendir("/d").err(), Some(Error::NotFound));
        check(&fs);

        // The descendants were tombstoned, not stranded; nothing
        // resurfaces in /lost+found after a remount.
        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
        assert_eq!(fs2.opendir("/d").err(), Some(Error::NotFound));
        assert_eq!(
            fs2.opendir("/lost+found").err(),
            Some(Error::NotFound)
        );
        check(&fs2);
    }

    #[test]
    fn rename_across_directories_survives_remount() {
        let (fs, flash, descs) = formatted(4, 16 * 1024);
        fs.mkdir("/x").expect("mkdir");
        fs.mkdir("/y").expect("mkdir");
        let fh = fs
            .open("/x/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"contents").expect("write");
        fs.close(fh).expect("close");

        fs.rename("/x/f", "/y/f").expect("rename");

        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
        let dh = fs2.opendir("/x").expect("opendir");
        assert!(fs2.readdir(dh).expect("readdir").is_none());
        fs2.closedir(dh).expect("closedir");

        let fh = fs2.open("/y/f", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 16];
        assert_eq!(fs2.read(fh, &mut buf).expect("read"), 8);
        assert_eq!(&buf[..8], b"contents");
        fs2.close(fh).expect("close");
        check(&fs2);
    }

    #[test]
    fn rename_to_same_name_writes_fresh_record() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        let fh = fs
            .open("/f", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        fs.write(fh, b"abc").expect("write");
        fs.close(fh).expect("close");

        let before = {
            let mut state = fs.state.lock();
            let id = state.path_find_inode(b"/f").expect("resolve");
            let inode = state.inode_from_entry(id).expect("inode");
            (id, inode.seq, inode.loc)
        };
        fs.rename("/f", "/f").expect("rename");
        let after = {
            let mut state = fs.state.lock();
            let id = state.path_find_inode(b"/f").expect("resolve");
            let inode = state.inode_from_entry(id).expect("inode");
            (id, inode.seq, inode.loc)
        };
        assert_eq!(before.0, after.0);
        assert_eq!(before.1 + 1, after.1);
        assert_ne!(before.2, after.2);

        let fh = fs.open("/f", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"abc");
        fs.close(fh).expect("close");
        check(&fs);
    }

    #[test]
    fn power_cut_mid_append_loses_only_the_torn_block() {
        let (fs, flash, descs) = formatted(4, 16 * 1024);
        fs.state.lock().max_block_data = 8;

        let fh = fs
            .open("/log", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        // Five whole blocks land on flash.
        for i in 0..5u8 {
            fs.write(fh, &[i; 8]).expect("write");
        }
        // The sixth is torn mid-data: header and CRC are on
        // flash, most of the data is not, and then the board is
        // dead.
        flash.set_write_limit(crate::disk::DISK_BLOCK_SZ + 3);
        assert_eq!(fs.write(fh, &[5u8; 8]).err(), Some(Error::Flash));
        flash.clear_write_limit();

        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
        {
            let mut state = fs2.state.lock();
            let id = state.path_find_inode(b"/log").expect("resolve");
            assert_eq!(state.inode_data_len(id).expect("len"), 40);
            let mut nblocks = 0;
            let mut cur = state.file_last_block(id).expect("file");
            while let Some(block_id) = cur {
                nblocks += 1;
                cur = state
                    .block_from_entry(block_id)
                    .expect("block")
                    .prev;
            }
            assert_eq!(nblocks, 5);
            state.check_invariants();
        }

        // The log keeps working after the remount.
        let fh = fs2
            .open("/log", OpenFlags::WRITE | OpenFlags::APPEND)
            .expect("open");
        fs2.write(fh, &[9u8; 8]).expect("append");
        assert_eq!(fs2.file_len(fh).expect("len"), 48);
        fs2.close(fh).expect("close");
        check(&fs2);
    }

    #[test]
    fn gc_reclaims_overwritten_blocks() {
        // Small areas so a hundred overwrites must trigger
        // collection.
        let flash = MemFlash::uniform(3, 1024);
        let descs = flash.area_descs();
        let fs = fs_with(&flash);
        fs.format(&descs).expect("format");

        let fh = fs
            .open("/c", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("create");
        let mut last = [0u8; 8];
        for i in 0..100u8 {
            last = [i; 8];
            fs.seek(fh, 0).expect("seek");
            fs.write(fh, &last).expect("write");
        }

        {
            let state = fs.state.lock();
            assert!(
                state.areas.iter().any(|a| a.gc_seq > 0),
                "a hundred overwrites must have forced a collection"
            );
        }

        fs.seek(fh, 0).expect("seek");
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(fh, &mut buf).expect("read"), 8);
        assert_eq!(buf, last);
        fs.close(fh).expect("close");
        check(&fs);

        // Live bytes stay bounded: one inode record, one block
        // record, eight data bytes, roots included.
        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
        check(&fs2);
    }

    #[test]
    fn lost_and_found_adopts_orphans() {
        let (fs, flash, descs) = formatted(4, 16 * 1024);
        {
            // Hand-craft an inode whose parent does not exist.
            let mut state = fs.state.lock();
            let (area_idx, area_offset) = state
                .reserve_space((crate::disk::DISK_INODE_SZ + 4) as u32)
                .expect("reserve");
            let disk_inode = crate::disk::DiskInode {
                id: hash::ID_FILE_MIN + 77,
                seq: 0,
                parent_id: Some(9), // no such directory
                filename_len: 4,
            };
            state
                .inode_write_disk(&disk_inode, b"lost", area_idx, area_offset)
                .expect("write record");
        }

        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
        let fh = fs2
            .open("/lost+found/lost", OpenFlags::READ)
            .expect("orphan adopted");
        assert_eq!(fs2.file_len(fh).expect("len"), 0);
        fs2.close(fh).expect("close");
        check(&fs2);
    }

    #[test]
    fn scratch_is_largest_area() {
        let flash = MemFlash::with_sectors(&[16 * 1024, 16 * 1024, 32 * 1024]);
        let descs = flash.area_descs();
        let fs = fs_with(&flash);
        fs.format(&descs).expect("format");
        assert_eq!(fs.state.lock().scratch_idx, 2);
        check(&fs);
    }

    #[test]
    fn mount_rejects_blank_flash() {
        let flash = MemFlash::uniform(4, 16 * 1024);
        let descs = flash.area_descs();
        let fs = fs_with(&flash);
        assert_eq!(fs.mount(&descs), Err(Error::Corrupt));
        // The documented recovery: format, then mount works.
        fs.format(&descs).expect("format");
        let fs2 = fs_with(&flash);
        fs2.mount(&descs).expect("mount");
    }

    #[test]
    fn open_flag_validation() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        assert_eq!(
            fs.open("/f", OpenFlags::empty()).err(),
            Some(Error::BadArgs)
        );
        assert_eq!(
            fs.open("/f", OpenFlags::READ | OpenFlags::CREATE).err(),
            Some(Error::BadArgs)
        );
        assert_eq!(fs.open("/f", OpenFlags::READ).err(), Some(Error::NotFound));
        fs.mkdir("/d").expect("mkdir");
        assert_eq!(fs.open("/d", OpenFlags::READ).err(), Some(Error::BadArgs));
    }

    #[test]
    fn file_handle_pool_is_bounded() {
        let flash = MemFlash::uniform(4, 16 * 1024);
        let descs = flash.area_descs();
        let config = Config { max_files: 2, ..Config::default() };
        let fs = FileSystem::new(flash.clone(), config);
        fs.format(&descs).expect("format");

        let a = fs
            .open("/a", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("open");
        let _b = fs
            .open("/b", OpenFlags::WRITE | OpenFlags::CREATE)
            .expect("open");
        assert_eq!(
            fs.open("/c", OpenFlags::WRITE | OpenFlags::CREATE).err(),
            Some(Error::NoMem)
        );
        fs.close(a).expect("close");
        assert!(fs.open("/c", OpenFlags::WRITE | OpenFlags::CREATE).is_ok());
    }

    #[test]
    fn mkdir_existing_fails() {
        let (fs, _flash, _descs) = formatted(4, 16 * 1024);
        fs.mkdir("/d").expect("mkdir");
        assert_eq!(fs.mkdir("/d"), Err(Error::Exists));
        assert_eq!(fs.mkdir("/missing/sub"), Err(Error::NotFound));
    }

    #[test]
    fn power_cut_resumability() {
        // Run a scripted sequence with a remount in the middle
        // and demand bit-identical contents versus the straight
        // run.
        let run = |cut: bool| -> Vec<u8> {
            let flash = MemFlash::uniform(4, 16 * 1024);
            let descs = flash.area_descs();
            let fs = fs_with(&flash);
            fs.format(&descs).expect("format");
            fs.mkdir("/d").expect("mkdir");
            let fh = fs
                .open("/d/f", OpenFlags::WRITE | OpenFlags::CREATE)
                .expect("create");
            fs.write(fh, b"first half ").expect("write");
            fs.close(fh).expect("close");

            let fs = if cut {
                let fs2 = fs_with(&flash);
                fs2.mount(&descs).expect("mount");
                fs2
            } else {
                fs
            };

            let fh = fs
                .open("/d/f", OpenFlags::WRITE | OpenFlags::APPEND)
                .expect("open");
            fs.write(fh, b"second half").expect("write");
            fs.close(fh).expect("close");

            let fh = fs.open("/d/f", OpenFlags::READ).expect("open");
            let mut buf = [0u8; 64];
            let n = fs.read(fh, &mut buf).expect("read");
            fs.close(fh).expect("close");
            buf[..n].to_vec()
        };
        assert_eq!(run(false), run(true));
    }
}
