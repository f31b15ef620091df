// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::SeekFrom;
use std::time::SystemTime;

use crate::error::Result;
use crate::types::{DirEntry, Metadata, OpenFlags};

/// The capability set a filesystem back-end must provide. Operations take
/// cleaned, local (non-escaping) paths; callers are responsible for running
/// them through [`pathutil::check_local`] first.
///
/// Optional capabilities (symlinks, xattrs) are exposed as boolean queries
/// rather than probed via runtime type identity, so call sites branch on an
/// explicit flag instead of attempting a downcast.
pub trait FileSystem: Sized {
    type Handle: FileHandle;

    fn open(&self, name: &str) -> Result<Self::Handle>;
    fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<Self::Handle>;
    fn create(&self, name: &str) -> Result<Self::Handle> {
        self.open_file(name, OpenFlags::write_create_truncate(), 0o666)
    }

    fn stat(&self, name: &str) -> Result<Metadata>;
    fn lstat(&self, name: &str) -> Result<Metadata>;
    fn readlink(&self, name: &str) -> Result<String>;

    /// Returns a new view of this back-end rooted at `sub` (relative to
    /// this back-end's own root).
    fn open_root(&self, sub: &str) -> Result<Self>;

    fn mkdir(&self, name: &str, perm: u32) -> Result<()>;
    fn mkdir_all(&self, name: &str, perm: u32) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
    fn remove_all(&self, name: &str) -> Result<()>;
    fn rename(&self, old: &str, new: &str) -> Result<()>;
    fn link(&self, old: &str, new: &str) -> Result<()>;
    fn symlink(&self, target: &str, new: &str) -> Result<()>;
    fn chmod(&self, name: &str, mode: u32) -> Result<()>;
    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()>;
    fn lchown(&self, name: &str, uid: u32, gid: u32) -> Result<()>;
    fn chtimes(&self, name: &str, mtime: SystemTime) -> Result<()>;

    fn supports_symlinks(&self) -> bool {
        true
    }

    fn supports_lstat(&self) -> bool {
        true
    }

    fn supports_chown(&self) -> bool {
        true
    }

    fn supports_xattrs(&self) -> bool {
        false
    }

    /// Lists the user-namespace extended attribute names set on `name`.
    /// Back-ends that don't support xattrs return an empty list rather
    /// than an error, matching `supports_xattrs() == false`.
    fn list_xattrs(&self, _name: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn get_xattr(&self, name: &str, _key: &str) -> Result<Vec<u8>> {
        Err(crate::error::Error::path(
            "get_xattr",
            name,
            crate::error::ErrorKind::PlatformUnsupported,
        ))
    }
}

/// The capability set of an open file or directory handle.
pub trait FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    fn sync(&mut self) -> Result<()>;
    fn truncate(&mut self, size: u64) -> Result<()>;

    /// Reads up to `n` directory entries (`n <= 0` means "all remaining").
    fn readdir(&mut self, n: i64) -> Result<Vec<DirEntry>>;

    fn readdirnames(&mut self, n: i64) -> Result<Vec<String>> {
        Ok(self.readdir(n)?.into_iter().map(|e| e.name).collect())
    }

    fn stat(&self) -> Result<Metadata>;
    fn chmod(&self, mode: u32) -> Result<()>;
    fn chown(&self, uid: u32, gid: u32) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn name(&self) -> &str;
}
