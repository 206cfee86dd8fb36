// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! FAT12 file system driver: cluster-chain allocation, short/long
//! directory-entry codec, formatting from partition geometry, and the
//! in-memory handle table tying them together into the [`FileSystem`]
//! surface a multiplexer dispatches through.

pub mod bpb;
pub mod cluster_io;
pub mod dirent;
pub mod fat_table;
pub mod handles;

use hyrax_ds::DataStorage;
use hyrax_fs::{Dirent, Error, FileSystem, FsError, Handle, Result, Stat};
use log::{debug, error, trace};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, IntoBytes,
};

use crate::{
    bpb::{BootSector, FatVariant, FormatOptions, Geometry},
    dirent::{LongNameDirEntry, ShortDirEntry, DIR_ENTRY_SIZE},
    fat_table::FatTable,
    handles::{HandleTable, InodeRecord},
};

/// Discriminator this driver reports in a multiplexer's file system vtable.
pub const FS_TYPE: u8 = 1;

/// A mounted FAT12 volume: owns the block-I/O adapter, the derived
/// geometry, the in-memory FAT mirror, and the handle table. Every
/// [`FileSystem`] operation is composed from these four.
pub struct Fat12FileSystem<DS: DataStorage> {
    data_storage: DS,
    boot_sector: BootSector,
    geometry: Geometry,
    fat: FatTable,
    handles: HandleTable,
}

impl<DS: DataStorage> Fat12FileSystem<DS> {
    /// Attaches to an existing FAT12 volume: reads the BPB, loads the FAT
    /// in full, and seeds the handle table with the root directory.
    /// Rejects FAT16/32 volumes outright rather than silently corrupting
    /// them on first write.
    pub fn open(data_storage: DS) -> Result<Self> {
        let (boot_sector, geometry) = bpb::load(&data_storage)?;
        if geometry.variant() != FatVariant::Fat12 {
            error!("Only FAT12 volumes are supported by this driver");
            return Err(Error::Fs(FsError::Unsupported));
        }

        let fat = FatTable::load(&data_storage, &geometry)?;
        let handles = HandleTable::new_with_root(root_record());

        debug!(
            "mounted FAT12 volume: {} clusters, {} bytes/cluster",
            geometry.num_clusters, geometry.cluster_size
        );
        Ok(Self {
            data_storage,
            boot_sector,
            geometry,
            fat,
            handles,
        })
    }

    /// Formats `data_storage` as a fresh FAT12 volume sized to
    /// `num_sectors`, writing the synthesized BPB, zeroing the root
    /// directory area, and initializing FAT entries 0/1.
    pub fn format(data_storage: DS, num_sectors: u32, options: &FormatOptions) -> Result<Self> {
        let (boot_sector, geometry) = bpb::format(num_sectors, options)?;

        data_storage.write(0, boot_sector.as_bytes())?;

        let zeros = vec![0u8; cluster_io::root_size_bytes(&geometry) as usize];
        cluster_io::write_root(&data_storage, &geometry, &zeros)?;

        let fat = FatTable::new_formatted(&geometry, boot_sector.bpb_media);
        fat.flush(&data_storage, &geometry)?;

        let handles = HandleTable::new_with_root(root_record());

        debug!(
            "formatted FAT12 volume: {num_sectors} sectors, {} clusters",
            geometry.num_clusters
        );
        Ok(Self {
            data_storage,
            boot_sector,
            geometry,
            fat,
            handles,
        })
    }

    /// Flushes the in-memory FAT out to every on-disk copy and releases the
    /// volume, returning the underlying storage.
    pub fn close(self) -> Result<DS> {
        self.fat.flush(&self.data_storage, &self.geometry)?;
        Ok(self.data_storage)
    }

    /// Placeholder consistency check; always reports success, matching the
    /// scope this driver's on-disk structures are validated at mount time.
    pub fn check(&self) -> Result<()> {
        Ok(())
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Current byte size of `handle` and its materialized cluster list, or
    /// `(root_size, &[])` for the root directory, which is addressed as a
    /// single region rather than a FAT-threaded chain (§4.3).
    ///
    /// A record whose stored size is 0 reports the full extent of its
    /// cluster chain instead (directories always store 0 on disk; this is
    /// also, by the reference implementation's own conflation, how an
    /// explicitly zero-length regular file would be read back — preserved
    /// rather than special-cased).
    fn size_and_clusters(&self, handle: Handle) -> Result<(u64, Vec<u32>)> {
        if handle == Handle::ROOT {
            return Ok((cluster_io::root_size_bytes(&self.geometry) as u64, Vec::new()));
        }

        let record = *self.handles.get(handle)?;
        let clusters = self.fat.chain_clusters(record.first_cluster);
        let size = if record.size != 0 {
            record.size as u64
        } else {
            clusters.len() as u64 * self.geometry.cluster_size as u64
        };
        Ok((size, clusters))
    }

    /// Reads the entirety of a directory's contents into memory. The root
    /// area is read whole (§4.3); any other directory's cluster chain is
    /// read cluster by cluster and concatenated.
    fn read_dir_all(&self, dir: Handle) -> Result<Vec<u8>> {
        if dir == Handle::ROOT {
            let mut buffer = vec![0u8; cluster_io::root_size_bytes(&self.geometry) as usize];
            cluster_io::read_root(&self.data_storage, &self.geometry, &mut buffer)?;
            return Ok(buffer);
        }

        let record = *self.handles.get(dir)?;
        if record.attr & dirent::ATTR_DIRECTORY == 0 {
            error!("Handle does not name a directory");
            return Err(Error::Fs(FsError::NotADirectory));
        }

        let clusters = self.fat.chain_clusters(record.first_cluster);
        let cluster_size = self.geometry.cluster_size as usize;
        let mut buffer = vec![0u8; clusters.len() * cluster_size];
        for (i, &cluster) in clusters.iter().enumerate() {
            cluster_io::read_clusters(
                &self.data_storage,
                &self.geometry,
                &mut buffer[i * cluster_size..(i + 1) * cluster_size],
                cluster,
                1,
            )?;
        }
        Ok(buffer)
    }

    /// Writes a full directory buffer back, cluster by cluster (or as the
    /// single root region).
    fn write_dir_all(&self, dir: Handle, buffer: &[u8]) -> Result<()> {
        if dir == Handle::ROOT {
            return cluster_io::write_root(&self.data_storage, &self.geometry, buffer);
        }

        let record = *self.handles.get(dir)?;
        let clusters = self.fat.chain_clusters(record.first_cluster);
        let cluster_size = self.geometry.cluster_size as usize;
        for (i, &cluster) in clusters.iter().enumerate() {
            cluster_io::write_clusters(
                &self.data_storage,
                &self.geometry,
                &buffer[i * cluster_size..(i + 1) * cluster_size],
                cluster,
                1,
            )?;
        }
        Ok(())
    }

    /// Walks `dir`'s entries applying the same `.`/`..`-skipping, +2-biased
    /// counter `readdir` uses, stopping once the target's real entry is
    /// reached. Returns the byte offset of the entry's first on-disk
    /// occupant (a long-name fragment if present, else the short entry), or
    /// `None` if the directory is exhausted before reaching it.
    fn locate_entry(buffer: &[u8], dir: Handle, n: u64) -> Option<usize> {
        let mut remaining = if dir != Handle::ROOT { n + 2 } else { n };
        let mut pos = 0usize;
        loop {
            if pos + DIR_ENTRY_SIZE > buffer.len() {
                return None;
            }
            if remaining <= 2 {
                return Some(pos);
            }
            let entry = ShortDirEntry::read_from_bytes(&buffer[pos..pos + DIR_ENTRY_SIZE]).ok()?;
            if entry.is_end() {
                return None;
            }
            if !(entry.is_free() || entry.is_long_name()) {
                remaining -= 1;
            }
            pos += DIR_ENTRY_SIZE;
        }
    }

    /// From a target's first-entry offset, collects any preceding long-name
    /// fragments (disk order) and returns them alongside the short entry's
    /// offset.
    fn collect_entry_block(buffer: &[u8], start: usize) -> Option<(Vec<LongNameDirEntry>, usize)> {
        if start + DIR_ENTRY_SIZE > buffer.len() {
            return None;
        }
        if ShortDirEntry::read_from_bytes(&buffer[start..start + DIR_ENTRY_SIZE])
            .ok()?
            .is_end()
        {
            return None;
        }

        let mut long_entries = Vec::new();
        let mut pos = start;
        while pos + DIR_ENTRY_SIZE <= buffer.len() {
            let candidate = ShortDirEntry::read_from_bytes(&buffer[pos..pos + DIR_ENTRY_SIZE]).ok()?;
            if !candidate.is_long_name() {
                break;
            }
            long_entries.push(LongNameDirEntry::read_from_bytes(&buffer[pos..pos + DIR_ENTRY_SIZE]).ok()?);
            pos += DIR_ENTRY_SIZE;
        }
        if pos + DIR_ENTRY_SIZE > buffer.len() {
            return None;
        }
        Some((long_entries, pos))
    }
}

/// The root directory's record: always present at `Handle::ROOT`, parented
/// to itself since there is nowhere above it to point.
fn root_record() -> InodeRecord {
    InodeRecord {
        parent: Some(Handle::ROOT),
        attr: dirent::ATTR_DIRECTORY,
        first_cluster: 0,
        size: 0,
        atime: 0,
        ctime: 0,
        mtime: 0,
    }
}

impl<DS: DataStorage> FileSystem for Fat12FileSystem<DS> {
    fn read(&mut self, handle: Handle, buffer: &mut [u8], offset: u64) -> Result<usize> {
        let (size, clusters) = self.size_and_clusters(handle)?;
        if offset >= size {
            return Ok(0);
        }
        let len = (buffer.len() as u64).min(size - offset) as usize;
        if len == 0 {
            return Ok(0);
        }

        if handle == Handle::ROOT {
            let mut root_buffer = vec![0u8; size as usize];
            cluster_io::read_root(&self.data_storage, &self.geometry, &mut root_buffer)?;
            buffer[..len].copy_from_slice(&root_buffer[offset as usize..offset as usize + len]);
            return Ok(len);
        }

        let cluster_size = self.geometry.cluster_size as u64;
        let start = (offset / cluster_size) as usize;
        let inner = (offset % cluster_size) as usize;
        let count = (len + inner).div_ceil(cluster_size as usize);

        let mut staging = vec![0u8; count * cluster_size as usize];
        for i in 0..count {
            let cluster = *clusters.get(start + i).ok_or(Error::Fs(FsError::Inconsistent))?;
            cluster_io::read_clusters(
                &self.data_storage,
                &self.geometry,
                &mut staging[i * cluster_size as usize..(i + 1) * cluster_size as usize],
                cluster,
                1,
            )?;
        }
        buffer[..len].copy_from_slice(&staging[inner..inner + len]);
        Ok(len)
    }

    fn write(&mut self, handle: Handle, buffer: &[u8], offset: u64) -> Result<usize> {
        let (size, clusters) = self.size_and_clusters(handle)?;
        if offset >= size {
            return Ok(0);
        }
        let len = (buffer.len() as u64).min(size - offset) as usize;
        if len == 0 {
            return Ok(0);
        }

        if handle == Handle::ROOT {
            let mut root_buffer = vec![0u8; size as usize];
            cluster_io::read_root(&self.data_storage, &self.geometry, &mut root_buffer)?;
            root_buffer[offset as usize..offset as usize + len].copy_from_slice(&buffer[..len]);
            cluster_io::write_root(&self.data_storage, &self.geometry, &root_buffer)?;
            return Ok(len);
        }

        let cluster_size = self.geometry.cluster_size as u64;
        let start = (offset / cluster_size) as usize;
        let inner = (offset % cluster_size) as usize;
        let count = (len + inner).div_ceil(cluster_size as usize);

        let mut staging = vec![0u8; count * cluster_size as usize];
        for i in 0..count {
            let cluster = *clusters.get(start + i).ok_or(Error::Fs(FsError::Inconsistent))?;
            cluster_io::read_clusters(
                &self.data_storage,
                &self.geometry,
                &mut staging[i * cluster_size as usize..(i + 1) * cluster_size as usize],
                cluster,
                1,
            )?;
        }
        staging[inner..inner + len].copy_from_slice(&buffer[..len]);
        for i in 0..count {
            let cluster = clusters[start + i];
            cluster_io::write_clusters(
                &self.data_storage,
                &self.geometry,
                &staging[i * cluster_size as usize..(i + 1) * cluster_size as usize],
                cluster,
                1,
            )?;
        }
        Ok(len)
    }

    fn touch(&mut self, stat: &Stat) -> Result<Handle> {
        let cluster_count = (stat.size as u64)
            .div_ceil(self.geometry.cluster_size as u64)
            .max(1) as u32;
        let first_cluster = self.fat.alloc_chain(cluster_count, self.geometry.num_clusters)?;

        let attr = if stat.is_dir() { dirent::ATTR_DIRECTORY } else { 0 };
        let record = InodeRecord {
            parent: None,
            attr,
            first_cluster,
            size: stat.size,
            atime: stat.atime,
            ctime: stat.ctime,
            mtime: stat.mtime,
        };
        trace!("touch: allocated {cluster_count} cluster(s) at head={first_cluster}");
        Ok(self.handles.push(record))
    }

    fn readdir(&mut self, dir: Handle, n: u64) -> Result<Option<Dirent>> {
        let dir_record = *self.handles.get(dir)?;
        if dir != Handle::ROOT && dir_record.attr & dirent::ATTR_DIRECTORY == 0 {
            error!("readdir target is not a directory");
            return Err(Error::Fs(FsError::NotADirectory));
        }

        if n == 0 {
            return Ok(Some(Dirent {
                name: ".".to_string(),
                handle: dir,
            }));
        }
        if n == 1 {
            return Ok(Some(Dirent {
                name: "..".to_string(),
                handle: dir_record.parent.unwrap_or(Handle::ROOT),
            }));
        }

        let buffer = self.read_dir_all(dir)?;
        let Some(start) = Self::locate_entry(&buffer, dir, n) else {
            return Ok(None);
        };
        let Some((long_entries, short_pos)) = Self::collect_entry_block(&buffer, start) else {
            return Ok(None);
        };
        let short = ShortDirEntry::read_from_bytes(&buffer[short_pos..short_pos + DIR_ENTRY_SIZE])
            .map_err(|_| Error::Fs(FsError::Inconsistent))?;

        let name = if long_entries.is_empty() {
            dirent::parse_shortname(&short.name, short.is_directory())
        } else {
            dirent::read_long_name(&long_entries)
        };

        let cluster = short.cluster();
        let handle = match self.handles.find(dir, cluster) {
            Some(handle) => handle,
            None => {
                let record = InodeRecord {
                    parent: Some(dir),
                    attr: short.attr,
                    first_cluster: cluster,
                    size: short.file_size.get(),
                    atime: dirent::decode_date_time(short.lst_acc_date.get(), 0),
                    ctime: dirent::decode_date_time(short.crt_date.get(), short.crt_time.get()),
                    mtime: dirent::decode_date_time(short.wrt_date.get(), short.wrt_time.get()),
                };
                self.handles.push(record)
            }
        };

        Ok(Some(Dirent { name, handle }))
    }

    fn link(&mut self, handle: Handle, dir: Handle, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Fs(FsError::NameTooLong));
        }
        let inode = *self.handles.get(handle)?;

        let mut buffer = self.read_dir_all(dir)?;
        let real_len = buffer.len();
        if dir != Handle::ROOT {
            // Virtual headroom: a cluster not yet part of the chain, so the
            // scan below can propose an insertion point past the end of the
            // data currently on disk; grow_chain only runs if it's used.
            buffer.resize(real_len + self.geometry.cluster_size as usize, 0);
        }

        let is_dot = name == "." || name == "..";
        let needed_entries = if is_dot { 1 } else { name.len().div_ceil(13) + 1 };

        let mut insert_pos = None;
        let mut run_start = None;
        let mut run_len = 0usize;
        let mut pos = 0usize;
        while pos + DIR_ENTRY_SIZE <= buffer.len() {
            let entry = ShortDirEntry::read_from_bytes(&buffer[pos..pos + DIR_ENTRY_SIZE])
                .map_err(|_| Error::Fs(FsError::Inconsistent))?;
            if entry.is_end() {
                insert_pos = Some(pos);
                break;
            }
            if entry.is_free() {
                if run_start.is_none() {
                    run_start = Some(pos);
                }
                run_len += 1;
                if run_len == needed_entries {
                    insert_pos = run_start;
                    break;
                }
            } else {
                run_start = None;
                run_len = 0;
            }
            pos += DIR_ENTRY_SIZE;
        }
        let insert_pos = insert_pos.ok_or(Error::Fs(FsError::NoSpace))?;
        let end_pos = insert_pos + needed_entries * DIR_ENTRY_SIZE;
        if end_pos > buffer.len() {
            error!("Name too long to fit within one directory cluster of headroom");
            return Err(Error::Fs(FsError::NameTooLong));
        }

        if end_pos > real_len {
            if dir == Handle::ROOT {
                error!("Root directory is full and cannot grow");
                return Err(Error::Fs(FsError::NoSpace));
            }
            let dir_record = self.handles.get_mut(dir)?;
            self.fat.grow_chain(dir_record.first_cluster, self.geometry.num_clusters)?;
        } else {
            buffer.truncate(real_len);
        }

        let short_name = dirent::make_shortname(name);
        let mut write_pos = insert_pos;
        if !is_dot {
            for entry in dirent::write_long_name(name, &short_name) {
                buffer[write_pos..write_pos + DIR_ENTRY_SIZE].copy_from_slice(entry.as_bytes());
                write_pos += DIR_ENTRY_SIZE;
            }
        }

        let mut short_entry = ShortDirEntry::new_zeroed();
        short_entry.name = if is_dot {
            let mut raw = [b' '; 11];
            raw[..name.len()].copy_from_slice(name.as_bytes());
            raw
        } else {
            short_name
        };
        short_entry.attr = inode.attr;
        short_entry.ntres = 0;
        short_entry.crt_time_tenth = 0;
        let (crt_date, crt_time) = dirent::encode_date_time(inode.ctime);
        let (lst_acc_date, _) = dirent::encode_date_time(inode.atime);
        let (wrt_date, wrt_time) = dirent::encode_date_time(inode.mtime);
        short_entry.crt_date = U16::new(crt_date);
        short_entry.crt_time = U16::new(crt_time);
        short_entry.lst_acc_date = U16::new(lst_acc_date);
        short_entry.wrt_date = U16::new(wrt_date);
        short_entry.wrt_time = U16::new(wrt_time);
        short_entry.set_cluster(inode.first_cluster);
        short_entry.file_size = U32::new(inode.size);
        buffer[write_pos..write_pos + DIR_ENTRY_SIZE].copy_from_slice(short_entry.as_bytes());

        self.write_dir_all(dir, &buffer)?;

        // "." and ".." are bookkeeping entries within a directory, not a
        // real re-parenting of the inode being referenced. Unconditionally
        // overwriting `parent` here (as the reference implementation does)
        // corrupts both the child's and its real parent's parent links once
        // they get linked during mkdir — only updated on a real link.
        if !is_dot {
            self.handles.get_mut(handle)?.parent = Some(dir);
        }
        Ok(())
    }

    fn unlink(&mut self, dir: Handle, n: u64) -> Result<()> {
        if n < 2 {
            error!("Cannot unlink the synthetic . or .. entry");
            return Err(Error::Fs(FsError::InvalidHandle));
        }

        let target = self.readdir(dir, n)?.ok_or(Error::Fs(FsError::NotFound))?;

        let buffer = self.read_dir_all(dir)?;
        let Some(start) = Self::locate_entry(&buffer, dir, n) else {
            return Err(Error::Fs(FsError::NotFound));
        };
        let Some((_, short_pos)) = Self::collect_entry_block(&buffer, start) else {
            return Err(Error::Fs(FsError::NotFound));
        };
        let block_end = short_pos + DIR_ENTRY_SIZE;

        let total_len = buffer.len();
        let mut compacted = Vec::with_capacity(total_len);
        compacted.extend_from_slice(&buffer[..start]);
        compacted.extend_from_slice(&buffer[block_end..]);
        compacted.resize(total_len, 0);

        self.write_dir_all(dir, &compacted)?;

        let target_record = *self.handles.get(target.handle)?;
        self.fat.free_chain(target_record.first_cluster);
        Ok(())
    }

    fn fstat(&self, handle: Handle) -> Result<Stat> {
        let record = self.handles.get(handle)?;
        let mut mode = 0o777u16;
        if record.attr & dirent::ATTR_DIRECTORY != 0 {
            mode |= Stat::S_DIR;
        }
        Ok(Stat {
            size: record.size,
            mode,
            atime: record.atime,
            ctime: record.ctime,
            mtime: record.mtime,
        })
    }

    fn mkdir(&mut self, parent: Handle, name: &str) -> Result<Handle> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let stat = Stat {
            size: 0,
            mode: Stat::S_DIR | 0o755,
            atime: now,
            ctime: now,
            mtime: now,
        };
        let child = self.touch(&stat)?;
        self.link(child, parent, name)?;

        let cluster_size = self.geometry.cluster_size as usize;
        let zeros = vec![0u8; cluster_size];
        let first_cluster = self.handles.get(child)?.first_cluster;
        cluster_io::write_clusters(&self.data_storage, &self.geometry, &zeros, first_cluster, 1)?;

        self.link(child, child, ".")?;
        self.link(parent, child, "..")?;

        Ok(child)
    }

    fn rmdir(&mut self, dir: Handle, n: u64) -> Result<()> {
        let target = self.readdir(dir, n)?.ok_or(Error::Fs(FsError::NotFound))?;
        if self.readdir(target.handle, 2)?.is_some() {
            error!("rmdir target is not empty");
            return Err(Error::Fs(FsError::NotEmpty));
        }
        self.unlink(dir, n)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Clone)]
    struct MemoryStorage(Rc<RefCell<Vec<u8>>>);

    impl MemoryStorage {
        fn new(len: usize) -> MemoryStorage {
            MemoryStorage(Rc::new(RefCell::new(vec![0u8; len])))
        }
    }

    impl DataStorage for MemoryStorage {
        fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
            let data = self.0.borrow();
            let offset = offset as usize;
            buffer.copy_from_slice(&data[offset..offset + buffer.len()]);
            Ok(())
        }

        fn write(&self, offset: u64, buffer: &[u8]) -> Result<()> {
            let mut data = self.0.borrow_mut();
            let offset = offset as usize;
            data[offset..offset + buffer.len()].copy_from_slice(buffer);
            Ok(())
        }

        fn len(&self) -> Result<u64> {
            Ok(self.0.borrow().len() as u64)
        }
    }

    const NUM_SECTORS: u32 = 2048; // 1 MiB

    fn formatted() -> Fat12FileSystem<MemoryStorage> {
        let storage = MemoryStorage::new(NUM_SECTORS as usize * 512);
        Fat12FileSystem::format(storage, NUM_SECTORS, &FormatOptions::default()).unwrap()
    }

    fn stat(size: u32) -> Stat {
        Stat {
            size,
            mode: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
        }
    }

    #[test]
    fn format_produces_the_documented_geometry_and_reserved_fat_entries() {
        let fs = formatted();
        assert_eq!(fs.boot_sector().bpb_bytspersec.get(), 512);
        assert_eq!(fs.boot_sector().bpb_secperclus, 8);
        assert_eq!(fs.boot_sector().bpb_rsvdseccnt.get(), 4);
        assert_eq!(fs.boot_sector().bpb_numfats, 2);
        assert_eq!(fs.boot_sector().bpb_rootentcnt.get(), 240);
        assert_eq!(fs.boot_sector().bpb_media, 0xF0);
        assert_eq!(fs.fat.get(0), 0xFF0);
        assert_eq!(fs.fat.get(1), 0xFFF);
        assert_eq!(fs.fat.get(2), 0);
    }

    #[test]
    fn empty_root_readdir_returns_dot_dotdot_then_nothing() {
        let mut fs = formatted();
        let dot = fs.readdir(Handle::ROOT, 0).unwrap().unwrap();
        assert_eq!(dot.name, ".");
        assert_eq!(dot.handle, Handle::ROOT);
        let dotdot = fs.readdir(Handle::ROOT, 1).unwrap().unwrap();
        assert_eq!(dotdot.name, "..");
        assert_eq!(dotdot.handle, Handle::ROOT);
        assert!(fs.readdir(Handle::ROOT, 2).unwrap().is_none());
    }

    #[test]
    fn touch_then_fstat_reports_back_the_same_stat() {
        let mut fs = formatted();
        let handle = fs
            .touch(&Stat {
                size: 5000,
                mode: 0,
                atime: 111,
                ctime: 222,
                mtime: 333,
            })
            .unwrap();
        let got = fs.fstat(handle).unwrap();
        assert_eq!(got.size, 5000);
        assert_eq!(got.atime, 111);
        assert_eq!(got.ctime, 222);
        assert_eq!(got.mtime, 333);
    }

    #[test]
    fn touch_allocates_two_clusters_for_5000_bytes_at_4096_byte_clusters() {
        let mut fs = formatted();
        let handle = fs.touch(&stat(5000)).unwrap();
        let first_cluster = fs.handles.get(handle).unwrap().first_cluster;
        let chain = fs.fat.chain_clusters(first_cluster);
        assert_eq!(chain.len(), 2);
        assert_eq!(fs.fat.get(*chain.last().unwrap()), fat_table::FAT_END);
    }

    #[test]
    fn link_then_readdir_returns_the_same_handle() {
        let mut fs = formatted();
        let handle = fs.touch(&stat(0)).unwrap();
        fs.link(handle, Handle::ROOT, "hello-world-name.txt").unwrap();

        let dirent = fs.readdir(Handle::ROOT, 2).unwrap().unwrap();
        assert_eq!(dirent.name, "hello-world-name.txt");
        assert_eq!(dirent.handle, handle);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut fs = formatted();
        let handle = fs.touch(&stat(4096)).unwrap();
        let payload = b"hello, fat12 world";
        let written = fs.write(handle, payload, 0).unwrap();
        assert_eq!(written, payload.len());

        let mut readback = vec![0u8; payload.len()];
        let read = fs.read(handle, &mut readback, 0).unwrap();
        assert_eq!(read, payload.len());
        assert_eq!(&readback, payload);
    }

    #[test]
    fn read_clamps_at_end_of_file() {
        let mut fs = formatted();
        let handle = fs.touch(&stat(10)).unwrap();

        let mut buffer = vec![0u8; 20];
        let read = fs.read(handle, &mut buffer, 0).unwrap();
        assert_eq!(read, 10);

        let mut buffer = vec![0u8; 20];
        let read = fs.read(handle, &mut buffer, 10).unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn mkdir_then_readdir_child_gives_dot_and_dotdot() {
        let mut fs = formatted();
        let child = fs.mkdir(Handle::ROOT, "subdir").unwrap();

        let entry = fs.readdir(Handle::ROOT, 2).unwrap().unwrap();
        assert_eq!(entry.name, "subdir");
        assert_eq!(entry.handle, child);

        let dot = fs.readdir(child, 0).unwrap().unwrap();
        assert_eq!(dot.handle, child);
        let dotdot = fs.readdir(child, 1).unwrap().unwrap();
        assert_eq!(dotdot.handle, Handle::ROOT);
    }

    #[test]
    fn unlink_frees_the_clusters_and_removes_the_entry() {
        let mut fs = formatted();
        let handle = fs.touch(&stat(100)).unwrap();
        let first_cluster = fs.handles.get(handle).unwrap().first_cluster;
        fs.link(handle, Handle::ROOT, "file.txt").unwrap();

        fs.unlink(Handle::ROOT, 2).unwrap();

        assert!(fs.readdir(Handle::ROOT, 2).unwrap().is_none());
        assert_eq!(fs.fat.get(first_cluster), fat_table::FAT_FREE);
    }

    #[test]
    fn unlink_of_dot_or_dotdot_fails() {
        let mut fs = formatted();
        assert!(fs.unlink(Handle::ROOT, 0).is_err());
        assert!(fs.unlink(Handle::ROOT, 1).is_err());
    }

    #[test]
    fn rmdir_fails_when_directory_has_entries() {
        let mut fs = formatted();
        let child = fs.mkdir(Handle::ROOT, "subdir").unwrap();
        let inner = fs.touch(&stat(1)).unwrap();
        fs.link(inner, child, "inner.txt").unwrap();

        assert!(fs.rmdir(Handle::ROOT, 2).is_err());
    }

    #[test]
    fn rmdir_succeeds_on_empty_directory() {
        let mut fs = formatted();
        fs.mkdir(Handle::ROOT, "subdir").unwrap();
        fs.rmdir(Handle::ROOT, 2).unwrap();
        assert!(fs.readdir(Handle::ROOT, 2).unwrap().is_none());
    }

    #[test]
    fn close_then_reopen_preserves_the_fat() {
        let fs = formatted();
        let storage = fs.close().unwrap();
        let fs = Fat12FileSystem::open(storage).unwrap();
        assert_eq!(fs.fat.get(0), 0xFF0);
        assert_eq!(fs.fat.get(1), 0xFFF);
    }

    #[test]
    fn format_rejects_a_volume_too_large_for_fat12() {
        let num_sectors = (0x0100_0000u64 / 512) as u32;
        let storage = MemoryStorage::new(num_sectors as usize * 512);
        let err = Fat12FileSystem::format(storage, num_sectors, &FormatOptions::default());
        assert!(matches!(err, Err(Error::Fs(FsError::Unsupported))));
    }
}
