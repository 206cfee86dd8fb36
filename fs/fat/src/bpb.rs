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
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, IntoBytes, KnownLayout,
};

pub const SECTOR_SIZE: u64 = 512;

/// Boot Parameter Block, sector 0 of the volume.
///
/// Bytes 36..62 are the FAT12/16 Extended BPB; on a FAT32 volume this region
/// has a different meaning (`BPB_FSVer`, `BPB_RootClus`, ...), but this
/// driver never relies on it being anything other than opaque bytes until
/// [`FatVariant`] has confirmed the volume is FAT12/16.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout)]
pub struct BootSector {
    pub bs_jmpboot: [u8; 3],
    pub bs_oemname: [u8; 8],

    pub bpb_bytspersec: U16,
    pub bpb_secperclus: u8,
    pub bpb_rsvdseccnt: U16,
    pub bpb_numfats: u8,
    pub bpb_rootentcnt: U16,
    pub bpb_totsec16: U16,
    pub bpb_media: u8,
    pub bpb_fatsz16: U16,
    pub bpb_secpertrk: U16,
    pub bpb_numheads: U16,
    pub bpb_hiddsec: U32,
    pub bpb_totsec32: U32,

    pub bs_drvnum: u8,
    pub bs_reserved1: u8,
    pub bs_bootsig: u8,
    pub bs_volid: U32,
    pub bs_vollab: [u8; 11],
    pub bs_filsystype: [u8; 8],

    pub bs_boot: [u8; 448],
    pub signature_word: [u8; 2],
}

const _: () = assert!(size_of::<BootSector>() == SECTOR_SIZE as usize);

impl BootSector {
    pub fn total_sectors(&self) -> u32 {
        if self.bpb_totsec16.get() != 0 {
            self.bpb_totsec16.get() as u32
        } else {
            self.bpb_totsec32.get()
        }
    }
}

/// FAT variant, determined purely by cluster count (spec: a value stored
/// nowhere on disk is derived, not read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

impl FatVariant {
    pub fn of(num_clusters: u32) -> FatVariant {
        if num_clusters < 4085 {
            FatVariant::Fat12
        } else if num_clusters < 65525 {
            FatVariant::Fat16
        } else {
            FatVariant::Fat32
        }
    }
}

/// Geometry derived from the BPB; never stored on disk, recomputed on every
/// mount/format.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub fat_start: u32,
    pub root_start: u32,
    pub root_sectors: u32,
    pub data_start: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u32,
    pub num_clusters: u32,
    pub fat_count: u8,
    pub sectors_per_fat: u32,
}

impl Geometry {
    pub fn from_boot_sector(boot_sector: &BootSector) -> Result<Geometry> {
        let bytes_per_sector = boot_sector.bpb_bytspersec.get() as u32;
        if bytes_per_sector != SECTOR_SIZE as u32 {
            error!("Bytes per sector ({bytes_per_sector}) shall be 512");
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let fat_start = boot_sector.bpb_rsvdseccnt.get() as u32;
        let fat_count = boot_sector.bpb_numfats;
        let sectors_per_fat = boot_sector.bpb_fatsz16.get() as u32;
        let root_start = fat_start + fat_count as u32 * sectors_per_fat;
        let root_count = boot_sector.bpb_rootentcnt.get() as u32;
        let root_sectors = (root_count * 32).div_ceil(bytes_per_sector);
        let data_start = root_start + root_sectors;

        let sectors_per_cluster = boot_sector.bpb_secperclus as u32;
        if sectors_per_cluster == 0 {
            error!("Sectors per cluster shall be nonzero");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let cluster_size = sectors_per_cluster * bytes_per_sector;

        let total_sectors = boot_sector.total_sectors();
        if total_sectors <= data_start {
            error!("Total sectors ({total_sectors}) shall exceed the data region start ({data_start})");
            return Err(Error::Fs(FsError::Inconsistent));
        }
        let num_clusters = (total_sectors - data_start) / sectors_per_cluster;

        Ok(Geometry {
            fat_start,
            root_start,
            root_sectors,
            data_start,
            sectors_per_cluster,
            cluster_size,
            num_clusters,
            fat_count,
            sectors_per_fat,
        })
    }

    pub fn variant(&self) -> FatVariant {
        FatVariant::of(self.num_clusters)
    }
}

/// Reads sector 0 and validates it, returning the boot sector and its
/// derived geometry.
pub fn load<DS: DataStorage>(data_storage: &DS) -> Result<(BootSector, Geometry)> {
    let mut boot_sector = BootSector::new_zeroed();
    data_storage.read(0, boot_sector.as_mut_bytes())?;
    let geometry = Geometry::from_boot_sector(&boot_sector)?;
    Ok((boot_sector, geometry))
}

/// Options for synthesizing a fresh BPB on [`crate::Fat12FileSystem::format`].
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub oem_id: [u8; 8],
    pub volume_label: [u8; 11],
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            oem_id: *b"mkdosfs ",
            volume_label: *b"NO NAME    ",
        }
    }
}

/// Synthesizes a BPB and its geometry from partition length alone.
///
/// Ported from the reference formatting routine: cluster size doubles for
/// every halving of 16 MiB of volume size starting at 8 sectors/cluster,
/// `root_count` and `media_descriptor` both hinge on the 4 MiB threshold,
/// and `sectors_per_fat` is sized to exactly cover the resulting cluster
/// count. Returns [`FsError::Unsupported`] for volumes that would require
/// FAT16 or FAT32 — this driver only writes FAT12.
pub fn format(num_sectors: u32, options: &FormatOptions) -> Result<(BootSector, Geometry)> {
    let mut fs_size = num_sectors as u64 * SECTOR_SIZE;

    let variant = if fs_size >= 0x8000_0000 {
        FatVariant::Fat32
    } else if fs_size >= 0x0100_0000 {
        FatVariant::Fat16
    } else {
        FatVariant::Fat12
    };
    if variant != FatVariant::Fat12 {
        error!("Partition size requires FAT16 or FAT32, which this driver does not write");
        return Err(Error::Fs(FsError::Unsupported));
    }

    let mut cluster_size_sectors: u32 = 8;
    while fs_size >= 0x0100_0000 {
        cluster_size_sectors *= 2;
        fs_size /= 2;
    }

    let reserved_sectors: u32 = 4;
    let fat_count: u8 = 2;
    let fs_bytes = num_sectors as u64 * SECTOR_SIZE;
    let root_count: u16 = if fs_bytes > 0x0040_0000 { 512 } else { 240 };
    let media_descriptor: u8 = if fs_bytes > 0x0040_0000 { 0xF8 } else { 0xF0 };

    let fat_size_sectors = num_sectors / cluster_size_sectors - reserved_sectors;
    let entries_per_sector = SECTOR_SIZE as u32 * 8 / 12;
    let sectors_per_fat = fat_size_sectors.div_ceil(entries_per_sector);

    let mut boot_sector = BootSector::new_zeroed();
    boot_sector.bs_jmpboot = [0xEB, 0x3C, 0x90];
    boot_sector.bs_oemname = options.oem_id;
    boot_sector.bpb_bytspersec = U16::new(SECTOR_SIZE as u16);
    boot_sector.bpb_secperclus = cluster_size_sectors as u8;
    boot_sector.bpb_rsvdseccnt = U16::new(reserved_sectors as u16);
    boot_sector.bpb_numfats = fat_count;
    boot_sector.bpb_rootentcnt = U16::new(root_count);
    boot_sector.bpb_totsec16 = U16::new(if num_sectors > 0xFFFF {
        0
    } else {
        num_sectors as u16
    });
    boot_sector.bpb_media = media_descriptor;
    boot_sector.bpb_fatsz16 = U16::new(sectors_per_fat as u16);
    boot_sector.bpb_secpertrk = U16::new(32);
    boot_sector.bpb_numheads = U16::new(64);
    boot_sector.bpb_hiddsec = U32::new(0);
    boot_sector.bpb_totsec32 = U32::new(if num_sectors > 0xFFFF { num_sectors } else { 0 });

    boot_sector.bs_drvnum = 0x80;
    boot_sector.bs_bootsig = 0x29;
    boot_sector.bs_volid = U32::new(0);
    boot_sector.bs_vollab = options.volume_label;
    boot_sector.bs_filsystype = *b"FAT12   ";
    boot_sector.signature_word = [0x55, 0xAA];

    let geometry = Geometry::from_boot_sector(&boot_sector)?;
    Ok((boot_sector, geometry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_1mib_partition_matches_reference_geometry() {
        let (boot_sector, geometry) = format(2048, &FormatOptions::default()).unwrap();
        assert_eq!(boot_sector.bpb_bytspersec.get(), 512);
        assert_eq!(boot_sector.bpb_secperclus, 8);
        assert_eq!(boot_sector.bpb_rsvdseccnt.get(), 4);
        assert_eq!(boot_sector.bpb_numfats, 2);
        assert_eq!(boot_sector.bpb_rootentcnt.get(), 240);
        assert_eq!(boot_sector.bpb_media, 0xF0);
        assert_eq!(boot_sector.bpb_totsec16.get(), 2048);
        assert_eq!(boot_sector.bpb_totsec32.get(), 0);
        assert_eq!(geometry.variant(), FatVariant::Fat12);
    }

    #[test]
    fn format_rejects_volumes_requiring_fat16() {
        let err = format(0x0100_0000 / 512, &FormatOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::Unsupported)));
    }
}
