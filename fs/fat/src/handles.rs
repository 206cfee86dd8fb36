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

use hyrax_fs::{Error, FsError, Handle, Result};

/// In-memory record backing a [`Handle`]. FAT has no inode concept, so this
/// is reconstructed on first discovery (via `touch` or `readdir`) and held
/// for the life of the mount.
#[derive(Debug, Clone, Copy)]
pub struct InodeRecord {
    /// `None` until the entry has been linked somewhere; mirrors the
    /// source's `parent = -1` sentinel for a freshly touched, unlinked
    /// inode.
    pub parent: Option<Handle>,
    pub attr: u8,
    pub first_cluster: u32,
    pub size: u32,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

/// Append-only table of [`InodeRecord`]s, indexed by `Handle(i) = records[i-1]`.
///
/// Handles are never reused or reclaimed within a mount: `push` always
/// grows the table, and a handle stays valid until the volume closes. This
/// is the arena redesign of the source's linked list of inodes.
pub struct HandleTable {
    records: Vec<InodeRecord>,
}

impl HandleTable {
    /// Seeds the table with the root directory at `Handle::ROOT`, parented
    /// to itself per the source's `fat_hook_load`.
    pub fn new_with_root(root: InodeRecord) -> HandleTable {
        HandleTable {
            records: vec![root],
        }
    }

    pub fn push(&mut self, record: InodeRecord) -> Handle {
        self.records.push(record);
        Handle::new(self.records.len() as u64).expect("handle table index is always nonzero")
    }

    pub fn get(&self, handle: Handle) -> Result<&InodeRecord> {
        self.records
            .get(handle.get() as usize - 1)
            .ok_or(Error::Fs(FsError::InvalidHandle))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut InodeRecord> {
        self.records
            .get_mut(handle.get() as usize - 1)
            .ok_or(Error::Fs(FsError::InvalidHandle))
    }

    /// Looks up a handle already registered for `first_cluster` under
    /// `parent`, so repeated `readdir` calls over the same entry return the
    /// same handle instead of growing the table unboundedly.
    pub fn find(&self, parent: Handle, first_cluster: u32) -> Option<Handle> {
        self.records.iter().position(|record| {
            record.parent == Some(parent) && record.first_cluster == first_cluster
        }).and_then(|index| Handle::new((index + 1) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(parent: Option<Handle>, first_cluster: u32) -> InodeRecord {
        InodeRecord {
            parent,
            attr: 0,
            first_cluster,
            size: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
        }
    }

    #[test]
    fn root_is_preseeded_at_handle_one() {
        let table = HandleTable::new_with_root(record(Some(Handle::ROOT), 0));
        assert_eq!(table.get(Handle::ROOT).unwrap().first_cluster, 0);
    }

    #[test]
    fn push_assigns_monotonically_increasing_handles() {
        let mut table = HandleTable::new_with_root(record(Some(Handle::ROOT), 0));
        let a = table.push(record(Some(Handle::ROOT), 5));
        let b = table.push(record(Some(Handle::ROOT), 9));
        assert_eq!(a.get(), 2);
        assert_eq!(b.get(), 3);
    }

    #[test]
    fn invalid_handle_is_rejected() {
        let table = HandleTable::new_with_root(record(Some(Handle::ROOT), 0));
        let bogus = Handle::new(99).unwrap();
        assert!(table.get(bogus).is_err());
    }

    #[test]
    fn find_dedupes_by_parent_and_cluster() {
        let mut table = HandleTable::new_with_root(record(Some(Handle::ROOT), 0));
        let h = table.push(record(Some(Handle::ROOT), 5));
        assert_eq!(table.find(Handle::ROOT, 5), Some(h));
        assert_eq!(table.find(Handle::ROOT, 6), None);
    }
}
