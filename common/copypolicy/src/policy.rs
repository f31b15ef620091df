// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use backend::{Error, ErrorKind, FileHandle, FileSystem, Metadata};

/// Promotes a single named entry from a source back-end into a writable
/// top back-end. Implementations must leave the target either fully
/// present or fully absent: no partial writes are ever visible.
pub trait CopyPolicy<FS: FileSystem> {
    fn copy_regular_file(&self, top: &FS, source: &FS, name: &str, meta: &Metadata) -> Result<(), Error>;
    fn copy_directory(&self, top: &FS, name: &str, meta: &Metadata) -> Result<(), Error>;
    fn copy_symlink(&self, top: &FS, source: &FS, name: &str) -> Result<(), Error>;
}

pub(crate) fn parent_and_leaf(name: &str) -> (String, String) {
    match name.rsplit_once('/') {
        Some((parent, leaf)) => (parent.to_string(), leaf.to_string()),
        None => (".".to_string(), name.to_string()),
    }
}

/// The canonical promotion policy: a scoped temp file/directory in the
/// target's parent, created via the random-name generator, committed with
/// an atomic rename.
pub struct DotTmpPolicy;

const TMP_PATTERN: &str = "*.tmp";
const BUF_SIZE: usize = 64 * 1024;

impl<FS: FileSystem> CopyPolicy<FS> for DotTmpPolicy {
    fn copy_regular_file(&self, top: &FS, source: &FS, name: &str, meta: &Metadata) -> Result<(), Error> {
        let (parent, leaf) = parent_and_leaf(name);
        let dir = top.open_root(&parent)?;

        let (tmp_name, mut tmp_handle) = tempname::open_random(&dir, TMP_PATTERN, 0o600)?;

        let result = (|| -> Result<(), Error> {
            let mut src_handle = source.open(name)?;
            let mut buf = vec![0u8; BUF_SIZE];
            loop {
                let n = src_handle.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                tmp_handle.write(&buf[..n])?;
            }
            tmp_handle.chmod(meta.mode)?;
            tmp_handle.sync()?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = tmp_handle.close();
            let _ = dir.remove(&tmp_name);
            return Err(e);
        }
        tmp_handle.close()?;

        let _ = dir.chtimes(&tmp_name, meta.mtime);
        match dir.rename(&tmp_name, &leaf) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = dir.remove(&tmp_name);
                Err(e)
            }
        }
    }

    fn copy_directory(&self, top: &FS, name: &str, meta: &Metadata) -> Result<(), Error> {
        let (parent, leaf) = parent_and_leaf(name);
        let dir = top.open_root(&parent)?;

        let (tmp_name, _handle) = tempname::mkdir_random(&dir, TMP_PATTERN, meta.mode & 0o7777)?;
        let _ = dir.chmod(&tmp_name, meta.mode);
        let _ = dir.chtimes(&tmp_name, meta.mtime);

        match dir.rename(&tmp_name, &leaf) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = dir.remove_all(&tmp_name);
                Err(e)
            }
        }
    }

    fn copy_symlink(&self, top: &FS, source: &FS, name: &str) -> Result<(), Error> {
        if !source.supports_symlinks() || !top.supports_symlinks() {
            return Err(Error::path("copy_symlink", name, ErrorKind::PlatformUnsupported));
        }
        let target = source.readlink(name)?;
        let (parent, leaf) = parent_and_leaf(name);
        let dir = top.open_root(&parent)?;
        dir.symlink(&target, &leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemBackend;

    #[test]
    fn copy_regular_file_promotes_content_and_mode() {
        let source = MemBackend::new();
        let mut h = source.create("f.txt").unwrap();
        h.write(b"payload").unwrap();
        source.chmod("f.txt", 0o640).unwrap();
        let meta = source.stat("f.txt").unwrap();

        let top = MemBackend::new();
        DotTmpPolicy.copy_regular_file(&top, &source, "f.txt", &meta).unwrap();

        let mut out = top.open("f.txt").unwrap();
        let mut buf = [0u8; 7];
        out.read(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
        assert_eq!(top.stat("f.txt").unwrap().mode, 0o640);
    }

    #[test]
    fn copy_directory_creates_entry() {
        let top = MemBackend::new();
        let meta = Metadata {
            file_type: backend::FileType::Directory,
            mode: 0o750,
            size: 0,
            mtime: std::time::SystemTime::now(),
        };
        DotTmpPolicy.copy_directory(&top, "sub", &meta).unwrap();
        assert!(top.stat("sub").unwrap().file_type.is_dir());
    }
}
