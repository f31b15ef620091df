// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A filesystem back-end rooted at a real host directory. Containment is
//! enforced by cleaning and checking the locality of every path before it is
//! joined onto the root; there is no kernel-level containment (see the
//! platform-unsupported / TOCTOU discussion in the crate's design notes).

use std::io::SeekFrom;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{fchownat, AtFlags};

use crate::error::{Error, ErrorKind, Result};
use crate::traits::{FileHandle, FileSystem};
use crate::types::{DirEntry, FileType, Metadata, OpenFlags};

fn classify(ft: std::fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_file() {
        FileType::Regular
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else {
        FileType::Other
    }
}

fn to_metadata(m: std::fs::Metadata) -> Metadata {
    Metadata {
        file_type: classify(m.file_type()),
        mode: m.permissions().mode() & 0o7777,
        size: m.len(),
        mtime: m.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

fn io_to_kind(e: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as K;
    match e.kind() {
        K::NotFound => ErrorKind::NotFound,
        K::AlreadyExists => ErrorKind::AlreadyExists,
        K::PermissionDenied => ErrorKind::PermissionDenied,
        _ => ErrorKind::Io(std::io::Error::new(e.kind(), e.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct OsBackend {
    root: PathBuf,
}

impl OsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, op: &'static str, name: &str) -> Result<PathBuf> {
        let cleaned = pathutil::check_local(name)
            .map_err(|_| Error::path(op, name, ErrorKind::PathEscapes))?;
        Ok(self.root.join(cleaned))
    }
}

impl FileSystem for OsBackend {
    type Handle = OsHandle;

    fn open(&self, name: &str) -> Result<Self::Handle> {
        self.open_file(name, OpenFlags::read_only(), 0)
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<Self::Handle> {
        let path = self.resolve("open", name)?;
        let meta = std::fs::symlink_metadata(&path);
        let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);

        if is_dir {
            if flags.is_write() {
                return Err(Error::path("open", name, ErrorKind::IsADirectory));
            }
            return Ok(OsHandle {
                path,
                name: name.to_string(),
                file: None,
                is_dir: true,
                entries: None,
                cursor: 0,
                closed: false,
            });
        }

        let mut opts = std::fs::OpenOptions::new();
        opts.read(flags.read || !flags.is_write())
            .write(flags.write || flags.append || flags.create || flags.create_new || flags.truncate)
            .append(flags.append)
            .truncate(flags.truncate)
            .create(flags.create)
            .create_new(flags.create_new);

        let file = opts
            .open(&path)
            .map_err(|e| Error::path("open", name, io_to_kind(&e)))?;

        if flags.create || flags.create_new {
            let mut perms = file
                .metadata()
                .map_err(|e| Error::path("open", name, io_to_kind(&e)))?
                .permissions();
            perms.set_mode(perm & 0o7777);
            let _ = file.set_permissions(perms);
        }

        Ok(OsHandle {
            path,
            name: name.to_string(),
            file: Some(file),
            is_dir: false,
            entries: None,
            cursor: 0,
            closed: false,
        })
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        let path = self.resolve("stat", name)?;
        std::fs::metadata(&path)
            .map(to_metadata)
            .map_err(|e| Error::path("stat", name, io_to_kind(&e)))
    }

    fn lstat(&self, name: &str) -> Result<Metadata> {
        let path = self.resolve("lstat", name)?;
        std::fs::symlink_metadata(&path)
            .map(to_metadata)
            .map_err(|e| Error::path("lstat", name, io_to_kind(&e)))
    }

    fn readlink(&self, name: &str) -> Result<String> {
        let path = self.resolve("readlink", name)?;
        std::fs::read_link(&path)
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|e| Error::path("readlink", name, io_to_kind(&e)))
    }

    fn open_root(&self, sub: &str) -> Result<Self> {
        let path = self.resolve("open_root", sub)?;
        Ok(Self { root: path })
    }

    fn mkdir(&self, name: &str, perm: u32) -> Result<()> {
        let path = self.resolve("mkdir", name)?;
        std::fs::create_dir(&path).map_err(|e| Error::path("mkdir", name, io_to_kind(&e)))?;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(perm & 0o7777));
        Ok(())
    }

    fn mkdir_all(&self, name: &str, perm: u32) -> Result<()> {
        let path = self.resolve("mkdirall", name)?;
        std::fs::create_dir_all(&path).map_err(|e| Error::path("mkdirall", name, io_to_kind(&e)))?;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(perm & 0o7777));
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.resolve("remove", name)?;
        let meta = std::fs::symlink_metadata(&path).map_err(|e| Error::path("remove", name, io_to_kind(&e)))?;
        if meta.is_dir() {
            std::fs::remove_dir(&path).map_err(|e| Error::path("remove", name, io_to_kind(&e)))
        } else {
            std::fs::remove_file(&path).map_err(|e| Error::path("remove", name, io_to_kind(&e)))
        }
    }

    fn remove_all(&self, name: &str) -> Result<()> {
        let path = self.resolve("removeall", name)?;
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir_all(&path).map_err(|e| Error::path("removeall", name, io_to_kind(&e)))
            }
            Ok(_) => std::fs::remove_file(&path).map_err(|e| Error::path("removeall", name, io_to_kind(&e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::path("removeall", name, io_to_kind(&e))),
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_path = self.resolve("rename", old)?;
        let new_path = self.resolve("rename", new)?;
        std::fs::rename(&old_path, &new_path).map_err(|e| Error::link("rename", old, new, io_to_kind(&e)))
    }

    fn link(&self, old: &str, new: &str) -> Result<()> {
        let old_path = self.resolve("link", old)?;
        let new_path = self.resolve("link", new)?;
        std::fs::hard_link(&old_path, &new_path).map_err(|e| Error::link("link", old, new, io_to_kind(&e)))
    }

    fn symlink(&self, target: &str, new: &str) -> Result<()> {
        let new_path = self.resolve("symlink", new)?;
        std::os::unix::fs::symlink(target, &new_path)
            .map_err(|e| Error::link("symlink", target, new, io_to_kind(&e)))
    }

    fn chmod(&self, name: &str, mode: u32) -> Result<()> {
        let path = self.resolve("chmod", name)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| Error::path("chmod", name, io_to_kind(&e)))
    }

    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let path = self.resolve("chown", name)?;
        fchownat(None, &path, Some(uid.into()), Some(gid.into()), AtFlags::empty())
            .map_err(|e| Error::path("chown", name, ErrorKind::Io(std::io::Error::from_raw_os_error(e as i32))))
    }

    fn lchown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let path = self.resolve("lchown", name)?;
        fchownat(
            None,
            &path,
            Some(uid.into()),
            Some(gid.into()),
            AtFlags::AT_SYMLINK_NOFOLLOW,
        )
        .map_err(|e| Error::path("lchown", name, ErrorKind::Io(std::io::Error::from_raw_os_error(e as i32))))
    }

    fn chtimes(&self, name: &str, mtime: SystemTime) -> Result<()> {
        let path = self.resolve("chtimes", name)?;
        let dur = mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        let spec = TimeSpec::new(dur.as_secs() as i64, dur.subsec_nanos() as i64);
        utimensat(None, &path, &spec, &spec, UtimensatFlags::NoFollowSymlink)
            .map_err(|e| Error::path("chtimes", name, ErrorKind::Io(std::io::Error::from_raw_os_error(e as i32))))
    }

    fn supports_xattrs(&self) -> bool {
        true
    }

    fn list_xattrs(&self, name: &str) -> Result<Vec<String>> {
        let path = self.resolve("list_xattrs", name)?;
        let names = xattr::list(&path).map_err(|e| Error::path("list_xattrs", name, io_to_kind(&e)))?;
        Ok(names
            .filter_map(|n| n.to_str().map(str::to_string))
            .filter(|n| n.starts_with("user."))
            .collect())
    }

    fn get_xattr(&self, name: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve("get_xattr", name)?;
        xattr::get(&path, key)
            .map_err(|e| Error::path("get_xattr", name, io_to_kind(&e)))?
            .ok_or_else(|| Error::path("get_xattr", name, ErrorKind::NotFound))
    }
}

pub struct OsHandle {
    path: PathBuf,
    name: String,
    file: Option<std::fs::File>,
    is_dir: bool,
    entries: Option<Vec<DirEntry>>,
    cursor: usize,
    closed: bool,
}

impl OsHandle {
    fn ensure_entries(&mut self) -> Result<()> {
        if self.entries.is_some() {
            return Ok(());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.path).map_err(|e| Error::path("readdir", &self.name, io_to_kind(&e)))? {
            let entry = entry.map_err(|e| Error::path("readdir", &self.name, io_to_kind(&e)))?;
            let ft = entry
                .file_type()
                .map_err(|e| Error::path("readdir", &self.name, io_to_kind(&e)))?;
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                file_type: classify(ft),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        self.entries = Some(out);
        Ok(())
    }
}

impl FileHandle for OsHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use std::io::Read;
        if self.closed {
            return Err(Error::path("read", &self.name, ErrorKind::FileClosed));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::path("read", &self.name, ErrorKind::IsADirectory))?;
        file.read(buf).map_err(|e| Error::path("read", &self.name, io_to_kind(&e)))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        if self.closed {
            return Err(Error::path("write", &self.name, ErrorKind::FileClosed));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::path("write", &self.name, ErrorKind::BadFileDescriptor))?;
        file.write(buf).map_err(|e| Error::path("write", &self.name, io_to_kind(&e)))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        use std::io::Seek;
        if self.is_dir {
            match pos {
                SeekFrom::Start(0) => {
                    self.cursor = 0;
                    self.entries = None;
                    return Ok(0);
                }
                SeekFrom::Current(0) => return Ok(self.cursor as u64),
                SeekFrom::End(n) if n <= 0 => {
                    self.ensure_entries()?;
                    self.cursor = self.entries.as_ref().unwrap().len();
                    return Ok(self.cursor as u64);
                }
                _ => return Err(Error::path("seek", &self.name, ErrorKind::InvalidArgument)),
            }
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::path("seek", &self.name, ErrorKind::BadFileDescriptor))?;
        file.seek(pos).map_err(|e| Error::path("seek", &self.name, io_to_kind(&e)))
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync_all().map_err(|e| Error::path("sync", &self.name, io_to_kind(&e)))
        } else {
            Ok(())
        }
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| Error::path("truncate", &self.name, ErrorKind::IsADirectory))?;
        file.set_len(size).map_err(|e| Error::path("truncate", &self.name, io_to_kind(&e)))
    }

    fn readdir(&mut self, n: i64) -> Result<Vec<DirEntry>> {
        if !self.is_dir {
            return Err(Error::path("readdir", &self.name, ErrorKind::NotADirectory));
        }
        self.ensure_entries()?;
        let entries = self.entries.as_ref().unwrap();
        if n <= 0 {
            let out = entries[self.cursor..].to_vec();
            self.cursor = entries.len();
            return Ok(out);
        }
        let end = (self.cursor + n as usize).min(entries.len());
        let out = entries[self.cursor..end].to_vec();
        self.cursor = end;
        if out.is_empty() {
            return Err(Error::path("readdir", &self.name, ErrorKind::NotFound));
        }
        Ok(out)
    }

    fn stat(&self) -> Result<Metadata> {
        std::fs::symlink_metadata(&self.path)
            .map(to_metadata)
            .map_err(|e| Error::path("stat", &self.name, io_to_kind(&e)))
    }

    fn chmod(&self, mode: u32) -> Result<()> {
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| Error::path("chmod", &self.name, io_to_kind(&e)))
    }

    fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        fchownat(None, &self.path, Some(uid.into()), Some(gid.into()), AtFlags::empty())
            .map_err(|e| Error::path("chown", &self.name, ErrorKind::Io(std::io::Error::from_raw_os_error(e as i32))))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.file = None;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OsBackend::new(dir.path());
        backend.create("a.txt").unwrap();
        let mut h = backend.open_file("a.txt", OpenFlags::write_create_truncate(), 0o644).unwrap();
        h.write(b"hello").unwrap();
        h.close().unwrap();

        let mut h2 = backend.open("a.txt").unwrap();
        let mut buf = [0u8; 5];
        let n = h2.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn mkdir_and_readdir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OsBackend::new(dir.path());
        backend.mkdir("sub", 0o755).unwrap();
        backend.create("sub/a").unwrap();
        backend.create("sub/b").unwrap();
        let mut h = backend.open("sub").unwrap();
        let names = h.readdirnames(0).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OsBackend::new(dir.path());
        assert!(backend.stat("../escape").is_err());
    }
}
