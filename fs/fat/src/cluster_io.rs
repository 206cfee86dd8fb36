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
use log::error;

use crate::bpb::{Geometry, SECTOR_SIZE};

/// Translates a cluster number to its starting sector.
///
/// `0` addresses the FAT12/16 root directory area, which lives outside the
/// regular cluster heap and cannot be addressed at sub-cluster granularity.
/// `1` and anything at or past `num_clusters + 2` is not a valid data
/// cluster.
fn cluster_sector(geometry: &Geometry, cluster: u32) -> Result<u32> {
    if cluster == 0 {
        return Ok(geometry.root_start);
    }
    if cluster == 1 || cluster >= geometry.num_clusters + 2 {
        error!("Cluster {cluster} is out of range (num_clusters={})", geometry.num_clusters);
        return Err(Error::Fs(FsError::Index));
    }
    Ok(geometry.data_start + (cluster - 2) * geometry.sectors_per_cluster)
}

pub fn read_clusters<DS: DataStorage>(
    data_storage: &DS,
    geometry: &Geometry,
    buffer: &mut [u8],
    cluster: u32,
    count: u32,
) -> Result<()> {
    let start_sector = cluster_sector(geometry, cluster)?;
    data_storage.read(
        start_sector as u64 * SECTOR_SIZE,
        &mut buffer[..(count * geometry.cluster_size) as usize],
    )
}

pub fn write_clusters<DS: DataStorage>(
    data_storage: &DS,
    geometry: &Geometry,
    buffer: &[u8],
    cluster: u32,
    count: u32,
) -> Result<()> {
    let start_sector = cluster_sector(geometry, cluster)?;
    data_storage.write(
        start_sector as u64 * SECTOR_SIZE,
        &buffer[..(count * geometry.cluster_size) as usize],
    )
}

/// Size in bytes of the FAT12/16 root directory area. Not generally a
/// multiple of `cluster_size` (the root area is sized in sectors from
/// `root_count`, independent of cluster geometry), which is why the root is
/// read/written as a single region rather than cluster-by-cluster.
pub fn root_size_bytes(geometry: &Geometry) -> u32 {
    geometry.root_sectors * SECTOR_SIZE as u32
}

/// Reads the whole root directory area in one call, per the "resuming
/// mid-root is not supported" rule.
pub fn read_root<DS: DataStorage>(
    data_storage: &DS,
    geometry: &Geometry,
    buffer: &mut [u8],
) -> Result<()> {
    let size = root_size_bytes(geometry) as usize;
    data_storage.read(geometry.root_start as u64 * SECTOR_SIZE, &mut buffer[..size])
}

pub fn write_root<DS: DataStorage>(
    data_storage: &DS,
    geometry: &Geometry,
    buffer: &[u8],
) -> Result<()> {
    let size = root_size_bytes(geometry) as usize;
    data_storage.write(geometry.root_start as u64 * SECTOR_SIZE, &buffer[..size])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry {
            fat_start: 4,
            root_start: 19,
            root_sectors: 15,
            data_start: 34,
            sectors_per_cluster: 8,
            cluster_size: 4096,
            num_clusters: 100,
            fat_count: 2,
            sectors_per_fat: 3,
        }
    }

    #[test]
    fn cluster_zero_addresses_root_start() {
        assert_eq!(cluster_sector(&geometry(), 0).unwrap(), 19);
    }

    #[test]
    fn cluster_two_addresses_data_start() {
        assert_eq!(cluster_sector(&geometry(), 2).unwrap(), 34);
    }

    #[test]
    fn cluster_three_is_one_cluster_past_data_start() {
        assert_eq!(cluster_sector(&geometry(), 3).unwrap(), 34 + 8);
    }

    #[test]
    fn cluster_one_is_invalid() {
        assert!(cluster_sector(&geometry(), 1).is_err());
    }

    #[test]
    fn cluster_past_end_is_invalid() {
        assert!(cluster_sector(&geometry(), 102).is_err());
    }

    #[test]
    fn root_size_is_not_generally_a_cluster_multiple() {
        // root_sectors=15 (240 entries) against an 8-sector cluster: this is
        // exactly the mismatch that rules out addressing the root area in
        // cluster-sized units.
        let mut g = geometry();
        g.root_sectors = 15;
        assert_eq!(root_size_bytes(&g), 15 * SECTOR_SIZE as u32);
    }
}
