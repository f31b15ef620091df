// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Atomic write/copy against a back-end: a scoped temp entry is created,
//! populated, then committed with a single rename. Any failure before the
//! rename leaves the target untouched and the temp entry removed.
//!
//! Where the temp entry lives, and how it's named, is a pluggable
//! [`TempPolicy`] so callers can choose between a sibling of the target
//! (cheap, same-directory rename) or a single dedicated scratch directory
//! (keeps a tree free of stray `.tmp` siblings, at the cost of a
//! cross-directory rename).

use backend::{Error, ErrorKind, FileHandle, FileSystem};

const BUF_SIZE: usize = 64 * 1024;

fn parent_and_leaf(name: &str) -> (String, String) {
    match name.rsplit_once('/') {
        Some((parent, leaf)) => (parent.to_string(), leaf.to_string()),
        None => (".".to_string(), name.to_string()),
    }
}

fn join(root: &str, leaf: &str) -> String {
    if root == "." || root.is_empty() {
        leaf.to_string()
    } else {
        format!("{root}/{leaf}")
    }
}

fn ends_with_temp_suffix(name: &str) -> bool {
    let Some(without_ext) = name.strip_suffix(".tmp") else {
        return false;
    };
    if without_ext.len() < 11 {
        return false;
    }
    let (rest, digits) = without_ext.split_at(without_ext.len() - 10);
    rest.ends_with('.') && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_bare_temp_name(name: &str) -> bool {
    let Some(digits) = name.strip_suffix(".tmp") else {
        return false;
    };
    digits.len() == 10 && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A strategy for placing and naming the scratch entry a safe write
/// commits from. Implementations must guarantee `create_temp_file`/
/// `create_temp_dir` never collide with an existing entry.
pub trait TempPolicy<FS: FileSystem> {
    fn create_temp_file(&self, fs: &FS, target: &str, perm: u32) -> Result<(String, FS::Handle), Error>;
    fn create_temp_dir(&self, fs: &FS, target: &str, perm: u32) -> Result<(String, FS::Handle), Error>;

    /// True if `name` (a bare leaf name, not a full path) looks like a
    /// stray entry this policy would have created.
    fn matches(&self, name: &str) -> bool;

    /// True if [`sweep`] should never descend into subdirectories while
    /// scanning for entries this policy owns.
    fn flat_scan(&self) -> bool {
        false
    }
}

/// Places the temp entry beside the target, in the same parent directory.
/// Name: `<truncated-basename>.<10-digit>.tmp`, truncated at a UTF-8
/// boundary so the whole name stays at or under 255 bytes.
pub struct RandomSiblingPolicy;

impl RandomSiblingPolicy {
    const SUFFIX_RESERVE: usize = 15; // "." + 10 digits + ".tmp"
    const MAX_NAME: usize = 255;

    fn truncated_basename(leaf: &str) -> String {
        let max_prefix = Self::MAX_NAME.saturating_sub(Self::SUFFIX_RESERVE);
        let mut end = leaf.len().min(max_prefix);
        while end > 0 && !leaf.is_char_boundary(end) {
            end -= 1;
        }
        leaf[..end].to_string()
    }
}

impl<FS: FileSystem> TempPolicy<FS> for RandomSiblingPolicy {
    fn create_temp_file(&self, fs: &FS, target: &str, perm: u32) -> Result<(String, FS::Handle), Error> {
        let (parent, leaf) = parent_and_leaf(target);
        let dir = fs.open_root(&parent)?;
        let pattern = format!("{}.*.tmp", Self::truncated_basename(&leaf));
        let (name, handle) = tempname::open_random(&dir, &pattern, perm)?;
        Ok((join(&parent, &name), handle))
    }

    fn create_temp_dir(&self, fs: &FS, target: &str, perm: u32) -> Result<(String, FS::Handle), Error> {
        let (parent, leaf) = parent_and_leaf(target);
        let dir = fs.open_root(&parent)?;
        let pattern = format!("{}.*.tmp", Self::truncated_basename(&leaf));
        let (name, handle) = tempname::mkdir_random(&dir, &pattern, perm)?;
        Ok((join(&parent, &name), handle))
    }

    fn matches(&self, name: &str) -> bool {
        ends_with_temp_suffix(name)
    }
}

/// Places every temp entry under a single fixed directory (created on
/// first use, permission 0o755) rather than scattering them next to their
/// targets. Name: `<10-digit>.tmp`.
pub struct DedicatedDirectoryPolicy {
    root: String,
}

impl DedicatedDirectoryPolicy {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    fn ensure_root<FS: FileSystem>(&self, fs: &FS) -> Result<(), Error> {
        match fs.mkdir(&self.root, 0o755) {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl<FS: FileSystem> TempPolicy<FS> for DedicatedDirectoryPolicy {
    fn create_temp_file(&self, fs: &FS, _target: &str, perm: u32) -> Result<(String, FS::Handle), Error> {
        self.ensure_root(fs)?;
        let dir = fs.open_root(&self.root)?;
        let (name, handle) = tempname::open_random(&dir, "*.tmp", perm)?;
        Ok((join(&self.root, &name), handle))
    }

    fn create_temp_dir(&self, fs: &FS, _target: &str, perm: u32) -> Result<(String, FS::Handle), Error> {
        self.ensure_root(fs)?;
        let dir = fs.open_root(&self.root)?;
        let (name, handle) = tempname::mkdir_random(&dir, "*.tmp", perm)?;
        Ok((join(&self.root, &name), handle))
    }

    fn matches(&self, name: &str) -> bool {
        is_bare_temp_name(name)
    }

    fn flat_scan(&self) -> bool {
        true
    }
}

/// A hook invoked with the open temp handle and the eventual target name
/// (never the temp name) before or after the write body runs. Must not
/// close or rename the handle.
pub type Hook<'a, H> = dyn Fn(&mut H, &str) -> Result<(), Error> + 'a;

pub struct WriteOptions<'a, H> {
    pub perm: u32,
    pub pre_hooks: &'a [&'a Hook<'a, H>],
    pub post_hooks: &'a [&'a Hook<'a, H>],
    /// If true, a failure closing the temp handle is swallowed rather than
    /// aborting the write (the rename still proceeds).
    pub ignore_close_err: bool,
}

impl<'a, H> Default for WriteOptions<'a, H> {
    fn default() -> Self {
        Self {
            perm: 0o644,
            pre_hooks: &[],
            post_hooks: &[],
            ignore_close_err: false,
        }
    }
}

/// Atomically writes `target` by creating a temp file via `policy`,
/// running `writer` against it, then renaming it into place. On any
/// failure before the rename, the temp is closed and removed and `target`
/// is left untouched.
pub fn write<FS, W>(
    fs: &FS,
    policy: &dyn TempPolicy<FS>,
    target: &str,
    opts: &WriteOptions<FS::Handle>,
    writer: W,
) -> Result<(), Error>
where
    FS: FileSystem,
    W: FnOnce(&mut FS::Handle) -> Result<(), Error>,
{
    let cleaned = pathutil::check_local(target).map_err(|_| Error::path("write", target, ErrorKind::PathEscapes))?;
    let (tmp_path, mut handle) = policy.create_temp_file(fs, &cleaned, opts.perm)?;

    let result = (|| -> Result<(), Error> {
        for hook in opts.pre_hooks {
            hook(&mut handle, &cleaned)?;
        }
        writer(&mut handle)?;
        for hook in opts.post_hooks {
            hook(&mut handle, &cleaned)?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        let _ = handle.close();
        let _ = fs.remove(&tmp_path);
        return Err(e);
    }

    if let Err(e) = handle.close() {
        if !opts.ignore_close_err {
            let _ = fs.remove(&tmp_path);
            return Err(e);
        }
    }

    match fs.rename(&tmp_path, &cleaned) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs.remove(&tmp_path);
            Err(e)
        }
    }
}

/// As [`write`], but the body is a buffered copy from `reader`.
pub fn copy<FS, R>(
    fs: &FS,
    policy: &dyn TempPolicy<FS>,
    target: &str,
    opts: &WriteOptions<FS::Handle>,
    mut reader: R,
) -> Result<(), Error>
where
    FS: FileSystem,
    R: std::io::Read,
{
    write(fs, policy, target, opts, |handle| {
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            handle.write(&buf[..n])?;
        }
        Ok(())
    })
}

/// Atomically materializes `target` as a directory tree by copying all of
/// `source` into a temp directory, then renaming it into place.
pub fn copy_fs<FS: FileSystem>(
    fs: &FS,
    policy: &dyn TempPolicy<FS>,
    target: &str,
    perm: u32,
    source: &FS,
) -> Result<(), Error> {
    let cleaned = pathutil::check_local(target).map_err(|_| Error::path("copy_fs", target, ErrorKind::PathEscapes))?;
    let (tmp_path, mut handle) = policy.create_temp_dir(fs, &cleaned, perm)?;
    let _ = handle.close();

    let result = (|| -> Result<(), Error> {
        let dst_view = fs.open_root(&tmp_path)?;
        fscopy::copy_all(&dst_view, source, ".")
    })();

    if let Err(e) = result {
        let _ = fs.remove_all(&tmp_path);
        return Err(e);
    }

    match fs.rename(&tmp_path, &cleaned) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs.remove_all(&tmp_path);
            Err(e)
        }
    }
}

/// Removes every entry under `root` that `policy.matches` recognizes as a
/// stray temp entry, leaving everything else untouched. Directories owned
/// by the policy are removed recursively; when [`TempPolicy::flat_scan`]
/// is true, `sweep` never descends into subdirectories that aren't
/// themselves matches.
pub fn sweep<FS: FileSystem>(fs: &FS, root: &str, policy: &dyn TempPolicy<FS>) -> Result<(), Error> {
    let mut handle = fs.open(root)?;
    let entries = handle.readdir(0)?;
    for entry in entries {
        let child = join(root, &entry.name);
        if policy.matches(&entry.name) {
            if entry.file_type.is_dir() {
                fs.remove_all(&child)?;
            } else {
                fs.remove(&child)?;
            }
            continue;
        }
        if entry.file_type.is_dir() && !policy.flat_scan() {
            sweep(fs, &child, policy)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemBackend;

    #[test]
    fn write_commits_on_success() {
        let fs = MemBackend::new();
        let opts = WriteOptions::default();
        write(&fs, &RandomSiblingPolicy, "out.txt", &opts, |h| {
            h.write(b"hello")?;
            Ok(())
        })
        .unwrap();

        let mut out = fs.open("out.txt").unwrap();
        let mut buf = [0u8; 5];
        out.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_leaves_no_trace_on_failure() {
        let fs = MemBackend::new();
        let opts = WriteOptions::default();
        let err = write(&fs, &RandomSiblingPolicy, "out.txt", &opts, |_h| {
            Err(Error::path("write", "out.txt", ErrorKind::InvalidArgument))
        });
        assert!(err.is_err());
        assert!(fs.stat("out.txt").is_err());

        let mut dir = fs.open(".").unwrap();
        assert!(dir.readdirnames(0).unwrap().is_empty());
    }

    #[test]
    fn copy_fs_promotes_whole_tree() {
        let source = MemBackend::new();
        source.mkdir_all("sub", 0o755).unwrap();
        let mut h = source.create("sub/f.txt").unwrap();
        h.write(b"tree").unwrap();

        let fs = MemBackend::new();
        copy_fs(&fs, &RandomSiblingPolicy, "dest", 0o755, &source).unwrap();

        assert!(fs.stat("dest").unwrap().file_type.is_dir());
        let mut out = fs.open("dest/sub/f.txt").unwrap();
        let mut buf = [0u8; 4];
        out.read(&mut buf).unwrap();
        assert_eq!(&buf, b"tree");
    }

    #[test]
    fn dedicated_directory_policy_names_are_bare() {
        let fs = MemBackend::new();
        let policy = DedicatedDirectoryPolicy::new(".tmp");
        let (path, _h) = policy.create_temp_file(&fs, "anything", 0o600).unwrap();
        let leaf = path.rsplit_once('/').unwrap().1;
        assert!(is_bare_temp_name(leaf));
    }

    #[test]
    fn sweep_removes_only_matching_entries() {
        let fs = MemBackend::new();
        fs.create("keep.txt").unwrap();
        fs.create("stray.0123456789.tmp").unwrap();

        sweep(&fs, ".", &RandomSiblingPolicy).unwrap();

        assert!(fs.stat("keep.txt").is_ok());
        assert!(fs.stat("stray.0123456789.tmp").is_err());
    }
}
