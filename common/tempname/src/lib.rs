// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Random, retry-to-uniqueness temp name generation over a back-end's
//! write capability, mirroring the std-library idiom of substituting the
//! '*' in a pattern with a freshly drawn random suffix.

use backend::{Error, ErrorKind, FileSystem, OpenFlags};
use rand::Rng;

const MAX_ATTEMPTS: u32 = 10_000;

fn random_suffix() -> String {
    let n: u32 = rand::thread_rng().gen();
    format!("{n:010}")
}

fn substitute(pattern: &str) -> Option<String> {
    pattern
        .contains('*')
        .then(|| pattern.replacen('*', &random_suffix(), 1))
}

/// Creates a new regular file whose name is derived from `pattern` by
/// substituting '*' with a random 10-digit suffix, retrying on collision up
/// to [`MAX_ATTEMPTS`] times. If `pattern` has no '*', it is used literally
/// (a single attempt). Fails with [`ErrorKind::BadPattern`] if `pattern`
/// contains a path separator.
pub fn open_random<FS: FileSystem>(
    fs: &FS,
    pattern: &str,
    perm: u32,
) -> Result<(String, FS::Handle), Error> {
    if pattern.contains('/') {
        return Err(Error::path("open_random", pattern, ErrorKind::BadPattern));
    }

    // The created entry must always be owner-writable, regardless of `perm`.
    let perm = perm | 0o200;

    let flags = OpenFlags {
        read: true,
        write: true,
        create: true,
        create_new: true,
        ..Default::default()
    };

    if !pattern.contains('*') {
        let handle = fs.open_file(pattern, flags, perm)?;
        return Ok((pattern.to_string(), handle));
    }

    for _ in 0..MAX_ATTEMPTS {
        let name = substitute(pattern).expect("pattern contains '*'");
        match fs.open_file(&name, flags, perm) {
            Ok(handle) => return Ok((name, handle)),
            Err(e) if e.is_already_exists() => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::path("open_random", pattern, ErrorKind::MaxRetry))
}

/// Creates a new directory the same way [`open_random`] creates a file,
/// then opens it read-only.
pub fn mkdir_random<FS: FileSystem>(
    fs: &FS,
    pattern: &str,
    perm: u32,
) -> Result<(String, FS::Handle), Error> {
    if pattern.contains('/') {
        return Err(Error::path("mkdir_random", pattern, ErrorKind::BadPattern));
    }

    // The created entry must always be owner-writable, regardless of `perm`.
    let perm = perm | 0o200;

    if !pattern.contains('*') {
        fs.mkdir(pattern, perm)?;
        let handle = fs.open(pattern)?;
        return Ok((pattern.to_string(), handle));
    }

    for _ in 0..MAX_ATTEMPTS {
        let name = substitute(pattern).expect("pattern contains '*'");
        match fs.mkdir(&name, perm) {
            Ok(()) => {
                let handle = fs.open(&name)?;
                return Ok((name, handle));
            }
            Err(e) if e.is_already_exists() => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::path("mkdir_random", pattern, ErrorKind::MaxRetry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{FileHandle, MemBackend};

    #[test]
    fn open_random_creates_distinct_names() {
        let fs = MemBackend::new();
        let mut names = std::collections::HashSet::new();
        for _ in 0..50 {
            let (name, _handle) = open_random(&fs, "*.tmp", 0o644).unwrap();
            assert!(names.insert(name));
        }
    }

    #[test]
    fn literal_pattern_used_once() {
        let fs = MemBackend::new();
        let (name, _h) = open_random(&fs, "fixed.tmp", 0o644).unwrap();
        assert_eq!(name, "fixed.tmp");
        assert!(open_random(&fs, "fixed.tmp", 0o644).is_err());
    }

    #[test]
    fn bad_pattern_rejected() {
        let fs = MemBackend::new();
        assert!(open_random(&fs, "a/*.tmp", 0o644).is_err());
    }

    #[test]
    fn mkdir_random_creates_dir() {
        let fs = MemBackend::new();
        let (name, mut h) = mkdir_random(&fs, "*.tmp", 0o755).unwrap();
        assert!(name.ends_with(".tmp"));
        assert!(h.readdirnames(0).unwrap().is_empty());
    }
}
