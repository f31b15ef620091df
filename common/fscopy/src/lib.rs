// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Recursive filesystem-to-filesystem copying with permission preservation
//! and symlink forwarding. The walk is driven by the back-end's own
//! `readdir`, not `std::fs`, so the same code copies between two
//! in-memory back-ends in tests as it does between two real directories.

use backend::{Error, ErrorKind, FileHandle, FileSystem, FileType, Metadata};

const BUF_SIZE: usize = 64 * 1024;

/// The permission bits preserved across a copy. Unix-like: every bit in
/// the mode word, including setuid/setgid/sticky.
pub const MODE_MASK_UNIX: u32 = 0o7777;

fn join(root: &str, rel: &str) -> String {
    if root == "." || root.is_empty() {
        rel.to_string()
    } else if rel.is_empty() || rel == "." {
        root.to_string()
    } else {
        format!("{root}/{rel}")
    }
}

/// Copies one entry (file, directory, or symlink) from `src_path` on
/// `src` to `dst_path` on `dst`. Unsupported types (devices, sockets) and
/// symlinks on a back-end pair that doesn't support them are silently
/// skipped, matching the teacher's per-entry copier convention.
pub fn copy_entry<FS: FileSystem>(
    dst: &FS,
    src: &FS,
    dst_path: &str,
    src_path: &str,
    meta: &Metadata,
    chmod_mask: u32,
) -> Result<(), Error> {
    let masked_mode = meta.mode & chmod_mask;

    match meta.file_type {
        FileType::Directory => {
            match dst.mkdir(dst_path, 0o777) {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
            dst.chmod(dst_path, masked_mode)
        }
        FileType::Regular => {
            let mut src_handle = src.open(src_path)?;
            let flags = backend::OpenFlags {
                write: true,
                create: true,
                truncate: true,
                ..Default::default()
            };
            let mut dst_handle = dst.open_file(dst_path, flags, masked_mode)?;
            let mut buf = vec![0u8; BUF_SIZE];
            loop {
                let n = src_handle.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                dst_handle.write(&buf[..n])?;
            }
            dst_handle.chmod(masked_mode)?;
            dst_handle.close()
        }
        FileType::Symlink => {
            if src.supports_symlinks() && dst.supports_symlinks() {
                let target = src.readlink(src_path)?;
                dst.symlink(&target, dst_path)
            } else {
                Ok(())
            }
        }
        FileType::CharDevice | FileType::Other => Ok(()),
    }
}

/// An error encountered while walking `src` in [`copy_all`]. Passed to the
/// optional filter callback; returning `true` drops the error and
/// continues the walk, `false` aborts it.
pub type IgnoreErr<'a> = dyn Fn(&Error) -> bool + 'a;

fn walk_and_copy<FS: FileSystem>(
    dst: &FS,
    src: &FS,
    root: &str,
    rel: &str,
    chmod_mask: u32,
    ignore_err: Option<&IgnoreErr>,
) -> Result<(), Error> {
    let src_path = rel;
    let dst_path = join(root, rel);

    let meta = src.lstat(src_path)?;

    let step = || -> Result<(), Error> { copy_entry(dst, src, &dst_path, src_path, &meta, chmod_mask) };

    if let Err(e) = step() {
        match &ignore_err {
            Some(f) if f(&e) => return Ok(()),
            _ => return Err(e),
        }
    }

    if meta.file_type.is_dir() {
        let mut handle = src.open(src_path)?;
        for entry in handle.readdir(0)? {
            let child_rel = if rel == "." || rel.is_empty() {
                entry.name.clone()
            } else {
                format!("{rel}/{}", entry.name)
            };
            walk_and_copy(dst, src, root, &child_rel, chmod_mask, ignore_err)?;
        }
    }

    Ok(())
}

/// Recursively copies the entire `src` tree into `dst` at `root`.
pub fn copy_all<FS: FileSystem>(dst: &FS, src: &FS, root: &str) -> Result<(), Error> {
    copy_all_filtered(dst, src, root, MODE_MASK_UNIX, None)
}

/// As [`copy_all`], with an explicit chmod mask and an optional error
/// filter.
pub fn copy_all_filtered<FS: FileSystem>(
    dst: &FS,
    src: &FS,
    root: &str,
    chmod_mask: u32,
    ignore_err: Option<&IgnoreErr>,
) -> Result<(), Error> {
    walk_and_copy(dst, src, root, ".", chmod_mask, ignore_err)
}

/// Copies only the requested `paths` (and the ancestor directories needed
/// to hold them) from `src` into `dst` at `root`. `root` must itself be
/// local (non-absolute).
pub fn copy_path<FS: FileSystem>(dst: &FS, src: &FS, root: &str, paths: &[&str]) -> Result<(), Error> {
    pathutil::check_local(root).map_err(|_| Error::path("copy_path", root, ErrorKind::PathEscapes))?;

    let mut ancestor_dirs = std::collections::BTreeSet::new();
    let mut cleaned_paths = Vec::new();
    for path in paths {
        let cleaned = pathutil::check_local(path).map_err(|_| Error::path("copy_path", *path, ErrorKind::PathEscapes))?;
        for head in pathutil::heads(&cleaned) {
            if head != cleaned {
                ancestor_dirs.insert(head);
            }
        }
        cleaned_paths.push(cleaned);
    }

    for ancestor in &ancestor_dirs {
        let meta = src.lstat(ancestor)?;
        let dst_path = join(root, ancestor);
        match dst.mkdir_all(&dst_path, 0o777) {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
        dst.chmod(&dst_path, meta.mode & MODE_MASK_UNIX)?;
    }

    for path in &cleaned_paths {
        let meta = src.lstat(path)?;
        let dst_path = join(root, path);
        copy_entry(dst, src, &dst_path, path, &meta, MODE_MASK_UNIX)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemBackend;

    #[test]
    fn copy_all_preserves_tree() {
        let src = MemBackend::new();
        src.mkdir_all("a/b", 0o750).unwrap();
        let mut h = src.create("a/b/f.txt").unwrap();
        h.write(b"data").unwrap();
        src.chmod("a/b/f.txt", 0o640).unwrap();

        let dst = MemBackend::new();
        copy_all(&dst, &src, ".").unwrap();

        assert!(dst.stat("a").unwrap().file_type.is_dir());
        assert!(dst.stat("a/b").unwrap().file_type.is_dir());
        assert_eq!(dst.stat("a/b/f.txt").unwrap().mode, 0o640);
        let mut out = dst.open("a/b/f.txt").unwrap();
        let mut buf = [0u8; 4];
        out.read(&mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn copy_path_creates_only_requested_ancestors() {
        let src = MemBackend::new();
        src.mkdir_all("x/y", 0o755).unwrap();
        src.create("x/y/one.txt").unwrap();
        src.create("x/two.txt").unwrap();

        let dst = MemBackend::new();
        copy_path(&dst, &src, ".", &["x/y/one.txt"]).unwrap();

        assert!(dst.stat("x/y/one.txt").is_ok());
        assert!(dst.stat("x/two.txt").is_err());
    }
}
