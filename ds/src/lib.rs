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

pub use hyrax_err::*;

/// Byte-addressable backing store a file system mounts on top of.
///
/// Implementors own the mapping from a flat byte offset to whatever medium
/// backs it (a file, a partition, a ramdisk); offsets here are already
/// relative to the start of that medium.
pub trait DataStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;

    /// Size of the backing store in bytes, if known.
    fn len(&self) -> Result<u64> {
        Err(Error::Unimplemented)
    }
}
