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

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, IntoBytes, KnownLayout,
};

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONGNAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const FREE_MARKER: u8 = 0xE5;
pub const END_MARKER: u8 = 0x00;

/// Legacy 8.3 directory entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout)]
pub struct ShortDirEntry {
    pub name: [u8; 11],
    pub attr: u8,
    pub ntres: u8,
    pub crt_time_tenth: u8,
    pub crt_time: U16,
    pub crt_date: U16,
    pub lst_acc_date: U16,
    pub fst_clus_hi: U16,
    pub wrt_time: U16,
    pub wrt_date: U16,
    pub fst_clus_lo: U16,
    pub file_size: U32,
}

const _: () = assert!(size_of::<ShortDirEntry>() == DIR_ENTRY_SIZE);

impl ShortDirEntry {
    pub fn is_free(&self) -> bool {
        self.name[0] == FREE_MARKER
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == END_MARKER
    }

    pub fn is_long_name(&self) -> bool {
        self.attr == ATTR_LONGNAME
    }

    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    /// First data cluster. Both halves are read as full 16-bit words; the
    /// reference implementation masked the low half with `0xFF`, silently
    /// truncating any file whose first cluster exceeded 255 — fixed here to
    /// `0xFFFF`.
    pub fn cluster(&self) -> u32 {
        (self.fst_clus_hi.get() as u32) << 16 | self.fst_clus_lo.get() as u32
    }

    pub fn set_cluster(&mut self, cluster: u32) {
        self.fst_clus_hi = U16::new((cluster >> 16) as u16);
        self.fst_clus_lo = U16::new((cluster & 0xFFFF) as u16);
    }
}

/// One fragment of a long (VFAT) name, always immediately preceding the
/// short entry it names.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout)]
pub struct LongNameDirEntry {
    pub ord: u8,
    pub name1: [U16; 5],
    pub attr: u8,
    pub entry_type: u8,
    pub checksum: u8,
    pub name2: [U16; 6],
    pub fst_clus_lo: U16,
    pub name3: [U16; 2],
}

const _: () = assert!(size_of::<LongNameDirEntry>() == DIR_ENTRY_SIZE);

impl LongNameDirEntry {
    pub fn is_last(&self) -> bool {
        self.ord & 0x40 != 0
    }

    pub fn sequence(&self) -> u8 {
        self.ord & 0x1F
    }
}

/// Builds the short (8.3) name FAT stores alongside a long name.
///
/// This is a literal, lossy port of the reference implementation: the stem
/// is the first up-to-8 bytes of `name`, truncated early if those 8 bytes
/// contain a `.`; the extension is up to 3 bytes following the *last* `.` in
/// the full name. Neither is uppercased, and no collision suffix is ever
/// appended — two long names that map to the same truncation collide
/// silently, same as the source.
pub fn make_shortname(name: &str) -> [u8; 11] {
    let bytes = name.as_bytes();
    let mut shortname = [b' '; 11];

    let stem_window = &bytes[..bytes.len().min(8)];
    let stem_len = stem_window
        .iter()
        .position(|&b| b == b'.')
        .unwrap_or(stem_window.len());
    shortname[..stem_len].copy_from_slice(&stem_window[..stem_len]);

    if let Some(dot) = bytes.iter().rposition(|&b| b == b'.') {
        let ext = &bytes[dot + 1..];
        let ext_len = ext.len().min(3);
        shortname[8..8 + ext_len].copy_from_slice(&ext[..ext_len]);
    }

    shortname
}

/// Reconstructs a display name from an on-disk 8.3 short name: spaces are
/// trimmed from both halves, and a `.` is inserted between them only for
/// non-directory entries (directories store an extension field but FAT
/// convention never displays one).
pub fn parse_shortname(raw: &[u8; 11], is_directory: bool) -> String {
    let stem_len = raw[..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let ext_len = raw[8..11].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);

    let mut name = String::from_utf8_lossy(&raw[..stem_len]).into_owned();
    if ext_len != 0 {
        if !is_directory {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&raw[8..8 + ext_len]));
    }
    name
}

/// 8-bit rotate-right-add checksum of an 11-byte short name.
pub fn checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in short_name {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b);
    }
    sum
}

/// Encodes `name` into the long-name entry sequence that must precede its
/// short entry, disk order first (index 0 is written to disk first).
///
/// Characters are widened from 8-bit input to 16-bit code units without
/// real UTF-16 encoding, matching the source; names longer than ASCII
/// still round-trip through [`read_long_name`] but are not validated as
/// well-formed UTF-16.
pub fn write_long_name(name: &str, short_name: &[u8; 11]) -> Vec<LongNameDirEntry> {
    let bytes = name.as_bytes();
    let num_entries = bytes.len().div_ceil(13).max(1);

    let mut units = vec![0xFFFFu16; num_entries * 13];
    for (i, &b) in bytes.iter().enumerate() {
        units[i] = b as u16;
    }
    if bytes.len() < units.len() {
        units[bytes.len()] = 0x0000;
    }

    let cksum = checksum(short_name);
    let mut entries = vec![LongNameDirEntry::new_zeroed(); num_entries];
    for disk_index in 0..num_entries {
        // Fragments are written out in reverse: the entry closest to the
        // short entry (the highest disk_index) holds the first fragment.
        let fragment_index = num_entries - 1 - disk_index;
        let chunk = &units[fragment_index * 13..fragment_index * 13 + 13];

        let entry = &mut entries[disk_index];
        for k in 0..5 {
            entry.name1[k] = U16::new(chunk[k]);
        }
        for k in 0..6 {
            entry.name2[k] = U16::new(chunk[5 + k]);
        }
        for k in 0..2 {
            entry.name3[k] = U16::new(chunk[11 + k]);
        }
        entry.attr = ATTR_LONGNAME;
        entry.entry_type = 0;
        entry.checksum = cksum;
        entry.fst_clus_lo = U16::new(0);

        let sequence = (fragment_index + 1) as u8;
        entry.ord = if disk_index == 0 {
            sequence | 0x40
        } else {
            sequence
        };
    }
    entries
}

/// Reconstructs a name from its long-name entry sequence, `entries` given
/// in disk order (index 0 first-on-disk, the entry flagged with `0x40`).
pub fn read_long_name(entries: &[LongNameDirEntry]) -> String {
    let mut units = Vec::with_capacity(entries.len() * 13);
    for entry in entries.iter().rev() {
        units.extend(entry.name1.iter().map(|u| u.get()));
        units.extend(entry.name2.iter().map(|u| u.get()));
        units.extend(entry.name3.iter().map(|u| u.get()));
    }
    while matches!(units.last(), Some(0x0000 | 0xFFFF)) {
        units.pop();
    }
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Encodes an epoch-seconds timestamp into FAT's packed date/time fields.
/// Access-time entries only ever populate the date half (hour/min/sec are
/// conventionally zero for `DIR_LstAccDate`).
pub fn encode_date_time(epoch_seconds: i64) -> (u16, u16) {
    let Some(dt) = OffsetDateTime::from_unix_timestamp(epoch_seconds).ok() else {
        return (0, 0);
    };
    (encode_date(dt.date()), encode_time(dt.time()))
}

pub fn encode_date(date: Date) -> u16 {
    let year = (date.year() - 1980).clamp(0, 0x7F) as u16;
    ((year) << 9) | ((date.month() as u16) << 5) | (date.day() as u16)
}

pub fn encode_time(time: Time) -> u16 {
    ((time.hour() as u16) << 11) | ((time.minute() as u16) << 5) | ((time.second() as u16) / 2)
}

pub fn decode_date_time(date: u16, time: u16) -> i64 {
    let year = 1980 + ((date >> 9) & 0x7F) as i32;
    let month = ((date >> 5) & 0xF).clamp(1, 12) as u8;
    let day = ((date & 0x1F).max(1)) as u8;
    let hour = ((time >> 11) & 0x1F) as u8;
    let minute = ((time >> 5) & 0x3F) as u8;
    let second = ((time & 0x1F) * 2) as u8;

    let Ok(month) = Month::try_from(month) else {
        return 0;
    };
    let Ok(date) = Date::from_calendar_date(year, month, day.max(1)) else {
        return 0;
    };
    let Ok(time) = Time::from_hms(hour, minute, second) else {
        return 0;
    };
    PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortname_is_truncated_literally_not_uppercased() {
        let shortname = make_shortname("longfile.txt");
        assert_eq!(&shortname, b"longfiletxt");
    }

    #[test]
    fn parse_shortname_inserts_dot_only_for_files() {
        let raw = make_shortname("readme.txt");
        assert_eq!(parse_shortname(&raw, false), "readme.txt");
        assert_eq!(parse_shortname(&raw, true), "readmetxt");
    }

    #[test]
    fn parse_shortname_trims_padding_with_no_extension() {
        let mut raw = [b' '; 11];
        raw[..3].copy_from_slice(b"abc");
        assert_eq!(parse_shortname(&raw, false), "abc");
    }

    #[test]
    fn shortname_stem_stops_at_dot_within_first_eight_bytes() {
        let shortname = make_shortname("abc.defghijk");
        assert_eq!(&shortname[..3], b"abc");
        assert_eq!(&shortname[3..8], b"     ");
        assert_eq!(&shortname[8..11], b"def");
    }

    #[test]
    fn checksum_is_stable_for_identical_names() {
        let a = make_shortname("readme.txt");
        let b = make_shortname("readme.txt");
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn long_name_round_trips() {
        let name = "hello-world-name.txt"; // 20 chars -> ceil(20/13) = 2 entries
        let shortname = make_shortname(name);
        let entries = write_long_name(name, &shortname);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ord, 0x42);
        assert_eq!(entries[1].ord, 0x01);
        for entry in &entries {
            assert_eq!(entry.checksum, checksum(&shortname));
        }
        assert_eq!(read_long_name(&entries), name);
    }

    #[test]
    fn long_name_exact_multiple_of_thirteen_has_no_terminator_slot() {
        let name = "a".repeat(13);
        let entries = write_long_name(&name, &make_shortname(&name));
        assert_eq!(entries.len(), 1);
        assert_eq!(read_long_name(&entries), name);
    }

    #[test]
    fn time_round_trips_at_two_second_granularity() {
        let original = Date::from_calendar_date(2023, Month::June, 15).unwrap();
        let time = Time::from_hms(10, 30, 42).unwrap();
        let epoch = PrimitiveDateTime::new(original, time).assume_utc().unix_timestamp();
        let (date_field, time_field) = encode_date_time(epoch);
        let decoded = decode_date_time(date_field, time_field);
        let (decoded_date, decoded_time) = encode_date_time(decoded);
        assert_eq!(decoded_date, date_field);
        assert_eq!(decoded_time, time_field);
    }
}
