// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bounded symlink resolution over a back-end's `lstat`/`readlink`
//! capability, with Linux-parity depth limits.

use backend::{Error, ErrorKind, FileSystem};

/// Maximum number of symlink hops resolved before giving up, matching
/// Linux's `ELOOP` behavior.
pub const MAX_SYMLINKS: u32 = 40;

/// Resolves `name` against `fs`, following every symbolic link encountered
/// along the way. If `skip_last` is set, the final path component is
/// appended without being resolved itself (used by operations that act on
/// the link rather than its target, e.g. `lstat`/`remove`).
///
/// On a not-found error, the returned [`Error::Path`] carries the best
/// partial reconstruction (resolved prefix plus the unresolved remainder)
/// in its `path` field.
pub fn resolve_path<FS: FileSystem>(fs: &FS, name: &str, skip_last: bool) -> Result<String, Error> {
    let cleaned = pathutil::check_local(name).map_err(|_| Error::path("stat", name, ErrorKind::PathEscapes))?;
    if cleaned == "." {
        return Ok(".".to_string());
    }

    let components: Vec<&str> = pathutil::split_components(&cleaned)
        .into_iter()
        .map(|(c, _)| c)
        .collect();

    let mut resolved = String::new();
    let mut consumed = 0u32;
    let mut idx = 0usize;

    while idx < components.len() {
        let is_last = idx == components.len() - 1;
        let candidate = join(&resolved, components[idx]);

        if is_last && skip_last {
            resolved = candidate;
            idx += 1;
            continue;
        }

        match fs.lstat(&candidate) {
            Ok(meta) if meta.file_type.is_symlink() => {
                let budget = MAX_SYMLINKS.saturating_sub(consumed);
                if budget == 0 {
                    return Err(Error::path("stat", name, ErrorKind::TooManySymlinks));
                }
                let (new_resolved, used) = resolve_symlink(fs, &candidate, budget)?;
                consumed += used;
                resolved = new_resolved;
            }
            Ok(_) => {
                resolved = candidate;
            }
            Err(e) if e.is_not_found() => {
                let remainder = components[idx..].join("/");
                let partial = join(&resolved, &remainder);
                return Err(Error::path("stat", partial, ErrorKind::NotFound));
            }
            Err(e) => return Err(e),
        }

        idx += 1;
    }

    Ok(if resolved.is_empty() { ".".to_string() } else { resolved })
}

/// Repeatedly reads and follows the link at `real_path` until it resolves
/// to a non-symlink, budget is exhausted (`max` hops), or the target
/// escapes the sandbox. Returns the fully-resolved local path and the
/// number of hops consumed.
pub fn resolve_symlink<FS: FileSystem>(fs: &FS, real_path: &str, max: u32) -> Result<(String, u32), Error> {
    let mut current = real_path.to_string();
    let mut hops = 0u32;

    loop {
        if hops >= max {
            return Err(Error::path("stat", real_path, ErrorKind::TooManySymlinks));
        }

        let target = fs.readlink(&current)?;
        hops += 1;

        let dir = match current.rsplit_once('/') {
            Some((d, _)) => d.to_string(),
            None => String::new(),
        };
        let joined = join(&dir, &target);
        let cleaned = pathutil::clean(&joined);

        if !pathutil::is_local(&cleaned) {
            // Escaping the sandbox is a terminal signal, not an error: the
            // caller treats an empty resolved path with consumed hops as
            // "left the root".
            return Ok((String::new(), hops));
        }

        match fs.lstat(&cleaned) {
            Ok(meta) if meta.file_type.is_symlink() => {
                current = cleaned;
                continue;
            }
            Ok(_) => return Ok((cleaned, hops)),
            Err(e) => return Err(e),
        }
    }
}

fn join(base: &str, component: &str) -> String {
    if base.is_empty() {
        component.to_string()
    } else {
        format!("{base}/{component}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{FileSystem, MemBackend};

    #[test]
    fn resolve_path_no_symlinks() {
        let fs = MemBackend::new();
        fs.mkdir_all("a/b", 0o755).unwrap();
        fs.create("a/b/c.txt").unwrap();
        assert_eq!(resolve_path(&fs, "a/b/c.txt", false).unwrap(), "a/b/c.txt");
    }

    #[test]
    fn not_found_partial_path() {
        let fs = MemBackend::new();
        fs.mkdir("a", 0o755).unwrap();
        let err = resolve_path(&fs, "a/b/c.txt", false).unwrap_err();
        match err {
            Error::Path(p) => assert_eq!(p.path, "a/b/c.txt"),
            _ => panic!("expected path error"),
        }
    }
}
