// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::SeekFrom;

use backend::{DirEntry, Error, ErrorKind, FileHandle, Metadata, Result};

/// An open overlay file or directory.
///
/// For a regular file (or a symlink target reached through `open`) this
/// wraps a single back-end handle from the topmost contributing layer. For
/// a directory it wraps one handle per contributing layer, topmost first,
/// and lazily computes a merged, deduplicated entry list on first
/// `readdir`. A handle returned by `Overlay::open_file`'s write path wraps
/// a single handle opened directly against the top and allows writes.
pub struct OverlayHandle<H: FileHandle> {
    name: String,
    is_dir: bool,
    writable: bool,
    handles: Vec<H>,
    merged: Option<Vec<DirEntry>>,
    dir_cursor: usize,
    closed: bool,
}

impl<H: FileHandle> OverlayHandle<H> {
    pub(crate) fn new(name: String, handles: Vec<H>, is_dir: bool) -> Self {
        Self {
            name,
            is_dir,
            writable: false,
            handles,
            merged: None,
            dir_cursor: 0,
            closed: false,
        }
    }

    pub(crate) fn direct(name: String, handle: H) -> Self {
        Self {
            name,
            is_dir: false,
            writable: true,
            handles: vec![handle],
            merged: None,
            dir_cursor: 0,
            closed: false,
        }
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::path(op, &self.name, ErrorKind::FileClosed));
        }
        Ok(())
    }

    fn ensure_merged(&mut self) -> Result<()> {
        if self.merged.is_some() {
            return Ok(());
        }
        self.merged = Some(layer::merge_entries(&mut self.handles)?);
        Ok(())
    }

    fn write_denied(&self, op: &'static str) -> Error {
        if self.is_dir {
            Error::path(op, &self.name, ErrorKind::BadFileDescriptor)
        } else {
            Error::path(op, &self.name, ErrorKind::PermissionDenied)
        }
    }
}

impl<H: FileHandle> FileHandle for OverlayHandle<H> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open("read")?;
        if self.is_dir {
            return Err(Error::path("read", &self.name, ErrorKind::IsADirectory));
        }
        self.handles[0].read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open("write")?;
        if self.writable {
            return self.handles[0].write(buf);
        }
        Err(self.write_denied("write"))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open("seek")?;
        if !self.is_dir {
            return self.handles[0].seek(pos);
        }
        match pos {
            SeekFrom::Start(0) => {
                self.dir_cursor = 0;
                self.merged = None;
                Ok(0)
            }
            SeekFrom::Current(0) => Ok(self.dir_cursor as u64),
            SeekFrom::End(n) if n <= 0 => {
                self.ensure_merged()?;
                self.dir_cursor = self.merged.as_ref().unwrap().len();
                Ok(self.dir_cursor as u64)
            }
            _ => Err(Error::path("seek", &self.name, ErrorKind::InvalidArgument)),
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.ensure_open("sync")?;
        if self.writable {
            return self.handles[0].sync();
        }
        Err(self.write_denied("sync"))
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.ensure_open("truncate")?;
        if self.writable {
            return self.handles[0].truncate(size);
        }
        Err(self.write_denied("truncate"))
    }

    fn readdir(&mut self, n: i64) -> Result<Vec<DirEntry>> {
        self.ensure_open("readdir")?;
        if !self.is_dir {
            return Err(Error::path("readdir", &self.name, ErrorKind::NotADirectory));
        }
        self.ensure_merged()?;
        let entries = self.merged.as_ref().unwrap();

        if n <= 0 {
            let out = entries[self.dir_cursor..].to_vec();
            self.dir_cursor = entries.len();
            return Ok(out);
        }

        let end = (self.dir_cursor + n as usize).min(entries.len());
        let out = entries[self.dir_cursor..end].to_vec();
        self.dir_cursor = end;
        if out.is_empty() {
            return Err(Error::path("readdir", &self.name, ErrorKind::NotFound));
        }
        Ok(out)
    }

    fn stat(&self) -> Result<Metadata> {
        self.handles[0].stat()
    }

    fn chmod(&self, mode: u32) -> Result<()> {
        self.ensure_open("chmod")?;
        if self.writable {
            return self.handles[0].chmod(mode);
        }
        Err(self.write_denied("chmod"))
    }

    fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        self.ensure_open("chown")?;
        if self.writable {
            return self.handles[0].chown(uid, gid);
        }
        Err(self.write_denied("chown"))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut errors = Vec::new();
        for (idx, handle) in self.handles.iter_mut().enumerate() {
            if let Err(e) = handle.close() {
                errors.push(format!("handle {idx}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(anyhow::anyhow!("close {}: {}", self.name, errors.join("; "))))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
