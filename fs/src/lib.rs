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

use std::num::NonZeroU64;

/// Opaque reference to an in-memory inode record, valid for the lifetime of
/// the file system session that issued it.
///
/// Handles are assigned in discovery order (see [`FileSystem::readdir`]) and
/// are never reused within a session, but they are not guaranteed to be
/// stable across sessions: a caller that needs to address the same file
/// again after a remount must walk the directory tree again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// The handle reserved for the root directory of a mounted volume.
    pub const ROOT: Handle = match NonZeroU64::new(1) {
        Some(value) => Handle(value),
        None => unreachable!(),
    };

    pub fn new(value: u64) -> Option<Handle> {
        NonZeroU64::new(value).map(Handle)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// File/directory metadata exchanged with callers, independent of on-disk
/// format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub size: u32,
    pub mode: u16,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

impl Stat {
    /// Mode bit distinguishing directories. Permission bits are otherwise
    /// ignored on write and reported fixed on read.
    pub const S_DIR: u16 = 0x4000;

    pub fn is_dir(&self) -> bool {
        self.mode & Self::S_DIR != 0
    }
}

/// One entry produced by [`FileSystem::readdir`].
#[derive(Debug, Clone)]
pub struct Dirent {
    pub name: String,
    pub handle: Handle,
}

/// Driver-facing operations a file system implementation provides to the
/// multiplexer.
///
/// Every operation guards against an invalid handle and returns
/// [`FsError::InvalidHandle`]/[`FsError::Index`] rather than panicking; the
/// multiplexer is expected to collapse `Result` into whatever sentinel its
/// own ABI uses (a null pointer, a 0/1 status code) — that translation is
/// outside this trait.
pub trait FileSystem {
    /// Reads up to `buffer.len()` bytes starting at `offset`, returning the
    /// number of bytes actually copied. Reading past end-of-file clamps the
    /// count rather than erroring.
    fn read(&mut self, handle: Handle, buffer: &mut [u8], offset: u64) -> Result<usize>;

    /// Overwrites up to `buffer.len()` bytes starting at `offset`. Does not
    /// grow the file; writes past the current size are clamped.
    fn write(&mut self, handle: Handle, buffer: &[u8], offset: u64) -> Result<usize>;

    /// Allocates storage for a new, as yet unlinked, file or directory.
    fn touch(&mut self, stat: &Stat) -> Result<Handle>;

    /// Returns the `n`-th logical entry of `dir` (`0` => `.`, `1` => `..`),
    /// or `None` once the directory is exhausted.
    fn readdir(&mut self, dir: Handle, n: u64) -> Result<Option<Dirent>>;

    /// Links `handle` into `dir` under `name`.
    fn link(&mut self, handle: Handle, dir: Handle, name: &str) -> Result<()>;

    /// Removes the `n`-th entry of `dir` and frees its storage.
    fn unlink(&mut self, dir: Handle, n: u64) -> Result<()>;

    fn fstat(&self, handle: Handle) -> Result<Stat>;

    /// Creates and links a new, empty directory under `parent`.
    fn mkdir(&mut self, parent: Handle, name: &str) -> Result<Handle>;

    /// Removes the `n`-th entry of `dir` if it is an empty directory.
    fn rmdir(&mut self, dir: Handle, n: u64) -> Result<()>;
}

/// Client-side stub for a file system server reached over IPC.
///
/// Wiring this up to an actual transport is outside the scope of this
/// crate; every method returns [`Error::Unimplemented`] until a transport is
/// plugged in.
pub struct FileSystemClient {}

impl FileSystem for FileSystemClient {
    fn read(&mut self, _handle: Handle, _buffer: &mut [u8], _offset: u64) -> Result<usize> {
        Err(Error::Unimplemented)
    }

    fn write(&mut self, _handle: Handle, _buffer: &[u8], _offset: u64) -> Result<usize> {
        Err(Error::Unimplemented)
    }

    fn touch(&mut self, _stat: &Stat) -> Result<Handle> {
        Err(Error::Unimplemented)
    }

    fn readdir(&mut self, _dir: Handle, _n: u64) -> Result<Option<Dirent>> {
        Err(Error::Unimplemented)
    }

    fn link(&mut self, _handle: Handle, _dir: Handle, _name: &str) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn unlink(&mut self, _dir: Handle, _n: u64) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn fstat(&self, _handle: Handle) -> Result<Stat> {
        Err(Error::Unimplemented)
    }

    fn mkdir(&mut self, _parent: Handle, _name: &str) -> Result<Handle> {
        Err(Error::Unimplemented)
    }

    fn rmdir(&mut self, _dir: Handle, _n: u64) -> Result<()> {
        Err(Error::Unimplemented)
    }
}
