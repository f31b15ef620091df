// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A recursive structural snapshot of a back-end's tree: mode, content
//! hash, user extended attributes, and symlink targets. Two snapshots
//! compare equal iff the trees are equal, without per-file assertion
//! boilerplate in integration tests.

use std::collections::BTreeMap;

use backend::{Error, ErrorKind, FileHandle, FileSystem, FileType};
use sha2::{Digest, Sha256};

const MODE_MASK: u32 = 0o7777;
const BUF_SIZE: usize = 64 * 1024;

/// SHA256 hash of zero bytes.
pub const EMPTY_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDescription {
    File {
        path: String,
        mode: u32,
        hash: String,
        user_xattrs: BTreeMap<String, Vec<u8>>,
    },
    Dir {
        path: String,
        mode: u32,
        user_xattrs: BTreeMap<String, Vec<u8>>,
    },
    Symlink {
        path: String,
        mode: u32,
        target: String,
    },
    Char {
        path: String,
        mode: u32,
    },
}

pub fn simple_dir(path: &str, mode: u32) -> FileDescription {
    FileDescription::Dir {
        path: path.to_string(),
        mode,
        user_xattrs: BTreeMap::new(),
    }
}

pub fn simple_file(path: &str, mode: u32, hash: &str) -> FileDescription {
    FileDescription::File {
        path: path.to_string(),
        mode,
        hash: hash.to_string(),
        user_xattrs: BTreeMap::new(),
    }
}

fn user_xattrs<FS: FileSystem>(fs: &FS, path: &str) -> Result<BTreeMap<String, Vec<u8>>, Error> {
    if !fs.supports_xattrs() {
        return Ok(BTreeMap::new());
    }
    let mut map = BTreeMap::new();
    for key in fs.list_xattrs(path)? {
        let value = fs.get_xattr(path, &key)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn describe_tree_impl<FS: FileSystem>(fs: &FS, relative_path: &str, files: &mut Vec<FileDescription>) -> Result<(), Error> {
    let meta = fs.lstat(relative_path)?;
    let mode = meta.mode & MODE_MASK;

    match meta.file_type {
        FileType::Regular => {
            let mut handle = fs.open(relative_path)?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; BUF_SIZE];
            loop {
                let n = handle.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let hash = hex::encode(hasher.finalize());
            let user_xattrs = user_xattrs(fs, relative_path)?;
            files.push(FileDescription::File {
                path: relative_path.to_string(),
                mode,
                hash,
                user_xattrs,
            });
        }
        FileType::Directory => {
            let user_xattrs = user_xattrs(fs, relative_path)?;
            files.push(FileDescription::Dir {
                path: relative_path.to_string(),
                mode,
                user_xattrs,
            });

            let mut handle = fs.open(relative_path)?;
            let mut entries = handle.readdir(0)?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                let child = if relative_path.is_empty() || relative_path == "." {
                    entry.name.clone()
                } else {
                    format!("{relative_path}/{}", entry.name)
                };
                describe_tree_impl(fs, &child, files)?;
            }
        }
        FileType::Symlink => {
            let target = fs.readlink(relative_path)?;
            files.push(FileDescription::Symlink {
                path: relative_path.to_string(),
                mode,
                target,
            });
        }
        FileType::CharDevice => {
            files.push(FileDescription::Char {
                path: relative_path.to_string(),
                mode,
            });
        }
        FileType::Other => {
            return Err(Error::path("describe_tree", relative_path, ErrorKind::UnsupportedType));
        }
    }

    Ok(())
}

/// Walks every entry under `fs`'s root (itself included), recording its
/// mode, content hash (for regular files), user xattrs, and symlink
/// target into a deterministically ordered list suitable for direct
/// equality comparison between two trees.
pub fn describe_tree<FS: FileSystem>(fs: &FS) -> Result<Vec<FileDescription>, Error> {
    let mut files = Vec::new();
    describe_tree_impl(fs, ".", &mut files)?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemBackend;

    #[test]
    fn describes_files_dirs_and_hashes() {
        let fs = MemBackend::new();
        fs.mkdir_all("a", 0o755).unwrap();
        let mut h = fs.create("a/f.txt").unwrap();
        h.write(b"hi").unwrap();
        fs.chmod("a/f.txt", 0o640).unwrap();

        let described = describe_tree(&fs).unwrap();
        assert!(described.contains(&simple_dir("a", 0o755)));
        let expected_hash = {
            let mut hasher = Sha256::new();
            hasher.update(b"hi");
            hex::encode(hasher.finalize())
        };
        assert!(described.contains(&simple_file("a/f.txt", 0o640, &expected_hash)));
    }

    #[test]
    fn identical_trees_compare_equal() {
        let a = MemBackend::new();
        a.mkdir_all("x", 0o755).unwrap();
        a.create("x/y.txt").unwrap();

        let b = MemBackend::new();
        b.mkdir_all("x", 0o755).unwrap();
        b.create("x/y.txt").unwrap();

        assert_eq!(describe_tree(&a).unwrap(), describe_tree(&b).unwrap());
    }
}
