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

use hyrax_ds::DataStorage;
use hyrax_fs::{Error, FsError, Result};
use log::trace;

use crate::bpb::{Geometry, SECTOR_SIZE};

pub const FAT_FREE: u16 = 0x000;
pub const FAT_RESERVED: u16 = 0x001;
pub const FAT_BAD: u16 = 0xFF7;
pub const FAT_END: u16 = 0xFF8;

/// In-memory mirror of the on-disk FAT12 table.
///
/// Entries straddle byte boundaries (12 bits each), so [`FatTable::get`] and
/// [`FatTable::set`] work directly on the byte buffer rather than indexing
/// it as an array of 12-bit records.
pub struct FatTable {
    data: Vec<u8>,
}

impl FatTable {
    pub fn load<DS: DataStorage>(data_storage: &DS, geometry: &Geometry) -> Result<FatTable> {
        let mut data = vec![0u8; geometry.sectors_per_fat as usize * SECTOR_SIZE as usize];
        data_storage.read(geometry.fat_start as u64 * SECTOR_SIZE, &mut data)?;
        Ok(FatTable { data })
    }

    /// Creates an empty, correctly sized FAT with entries 0 and 1 reserved
    /// per the media descriptor, as `format` requires.
    pub fn new_formatted(geometry: &Geometry, media_descriptor: u8) -> FatTable {
        let data = vec![0u8; geometry.sectors_per_fat as usize * SECTOR_SIZE as usize];
        let mut table = FatTable { data };
        table.set(0, 0xF00 | media_descriptor as u16);
        table.set(1, 0xFFF);
        table
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, cluster: u32) -> u16 {
        let offset = (cluster + cluster / 2) as usize;
        let word = u16::from_le_bytes([self.data[offset], self.data[offset + 1]]);
        if cluster & 1 != 0 {
            word >> 4
        } else {
            word & 0x0FFF
        }
    }

    pub fn set(&mut self, cluster: u32, value: u16) {
        let offset = (cluster + cluster / 2) as usize;
        let word = u16::from_le_bytes([self.data[offset], self.data[offset + 1]]);
        let word = if cluster & 1 != 0 {
            (word & 0x000F) | (value << 4)
        } else {
            (word & 0xF000) | (value & 0x0FFF)
        };
        let bytes = word.to_le_bytes();
        self.data[offset] = bytes[0];
        self.data[offset + 1] = bytes[1];
    }

    /// Scans from cluster 3 upward (cluster 2 is never returned, a quirk
    /// preserved from the reference implementation) and returns the first
    /// free cluster, or 0 if the volume is full.
    pub fn find_free(&self, num_clusters: u32) -> u32 {
        let mut i = 3;
        while i < num_clusters + 2 {
            if self.get(i) == FAT_FREE {
                return i;
            }
            i += 1;
        }
        0
    }

    pub fn chain_clusters(&self, start: u32) -> Vec<u32> {
        let mut clusters = Vec::new();
        let mut cluster = start;
        while cluster >= 2 && cluster < FAT_END as u32 {
            clusters.push(cluster);
            cluster = self.get(cluster) as u32;
        }
        clusters
    }

    pub fn chain_length(&self, start: u32) -> u32 {
        self.chain_clusters(start).len() as u32
    }

    /// Allocates a chain of `count` clusters (minimum 1), head first, and
    /// returns the head cluster. Each new cluster is appended to the tail of
    /// the chain under construction before the next one is looked up, so a
    /// caller can rely on the chain being fully linked on return.
    pub fn alloc_chain(&mut self, count: u32, num_clusters: u32) -> Result<u32> {
        let count = count.max(1);
        let head = self.find_free(num_clusters);
        if head == 0 {
            return Err(Error::Fs(FsError::NoSpace));
        }
        self.set(head, FAT_END);
        let mut current = head;
        for _ in 1..count {
            let next = self.find_free(num_clusters);
            if next == 0 {
                return Err(Error::Fs(FsError::NoSpace));
            }
            self.set(current, next);
            self.set(next, FAT_END);
            current = next;
        }
        trace!("allocated chain head={head} clusters={count}");
        Ok(head)
    }

    /// Appends one freshly allocated cluster to the tail of an existing
    /// chain and returns its number.
    pub fn grow_chain(&mut self, start: u32, num_clusters: u32) -> Result<u32> {
        let mut last = start;
        while self.get(last) < FAT_END {
            last = self.get(last) as u32;
        }
        let next = self.find_free(num_clusters);
        if next == 0 {
            return Err(Error::Fs(FsError::NoSpace));
        }
        self.set(last, next);
        self.set(next, FAT_END);
        Ok(next)
    }

    pub fn free_chain(&mut self, start: u32) {
        let clusters = self.chain_clusters(start);
        for cluster in clusters {
            self.set(cluster, FAT_FREE);
        }
    }

    pub fn flush<DS: DataStorage>(&self, data_storage: &DS, geometry: &Geometry) -> Result<()> {
        let mut offset = geometry.fat_start as u64;
        for _ in 0..geometry.fat_count {
            data_storage.write(offset * SECTOR_SIZE, &self.data)?;
            offset += geometry.sectors_per_fat as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(num_clusters: u32) -> Geometry {
        Geometry {
            fat_start: 4,
            root_start: 20,
            root_sectors: 15,
            data_start: 35,
            sectors_per_cluster: 8,
            cluster_size: 4096,
            num_clusters,
            fat_count: 2,
            sectors_per_fat: 3,
        }
    }

    #[test]
    fn reserved_entries_after_format() {
        let table = FatTable::new_formatted(&geometry(100), 0xF0);
        assert_eq!(table.get(0), 0xFF0);
        assert_eq!(table.get(1), 0xFFF);
        assert_eq!(table.get(2), 0);
    }

    #[test]
    fn set_does_not_corrupt_the_straddled_neighbor() {
        let mut table = FatTable::new_formatted(&geometry(100), 0xF0);
        table.set(3, 0x123);
        table.set(4, 0x456);
        assert_eq!(table.get(3), 0x123);
        assert_eq!(table.get(4), 0x456);
        table.set(4, 0x789);
        assert_eq!(table.get(3), 0x123);
        assert_eq!(table.get(4), 0x789);
    }

    #[test]
    fn find_free_skips_cluster_two() {
        let table = FatTable::new_formatted(&geometry(100), 0xF0);
        assert_eq!(table.find_free(100), 3);
    }

    #[test]
    fn alloc_chain_terminates_in_fat_end() {
        let mut table = FatTable::new_formatted(&geometry(100), 0xF0);
        let head = table.alloc_chain(3, 100).unwrap();
        let clusters = table.chain_clusters(head);
        assert_eq!(clusters.len(), 3);
        assert_eq!(table.get(*clusters.last().unwrap()), FAT_END);
    }

    #[test]
    fn find_free_returns_zero_when_full() {
        // num_clusters=2 ⇒ data clusters {2, 3}; the scan-from-3 quirk means
        // only cluster 3 is ever reachable through find_free.
        let mut table = FatTable::new_formatted(&geometry(2), 0xF0);
        table.alloc_chain(1, 2).unwrap();
        assert_eq!(table.find_free(2), 0);
    }
}
