// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::RwLock;

use backend::{Error, ErrorKind, FileHandle, FileSystem, OpenFlags};

use crate::quote;
use crate::trie::Trie;

const FILE_NAME: &str = "whiteout";
const TMP_NAME: &str = "whiteout.tmp";

/// The operations a whiteout metadata store exposes to a [`layer`](../layer)
/// or overlay. Implemented both by the persisted [`SimpleTextStore`] and by
/// [`crate::Subspace`], a decorator exposing a nested view without
/// duplicating state.
pub trait WhiteoutStore {
    /// True iff `path` itself or some ancestor has been recorded.
    fn query(&self, path: &str) -> bool;
    /// Records `path` as whited-out. Fails on "." or a non-local path.
    fn record(&self, path: &str) -> Result<(), Error>;
    /// Clears any direct record at `path`; descendants are unaffected.
    fn remove(&self, path: &str) -> Result<(), Error>;
}

fn read_all<H: FileHandle>(handle: &mut H) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = handle.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

/// A whiteout store persisted as a line-delimited, quoted-path text file,
/// with an in-memory trie mirrored for fast queries and a reader/writer
/// lock guarding mutation.
pub struct SimpleTextStore<FS: FileSystem> {
    fs: FS,
    trie: RwLock<Trie>,
}

impl<FS: FileSystem> SimpleTextStore<FS> {
    /// Loads the store from `fs`, treating a missing whiteout file as
    /// empty. Any stale temp file from a previous crashed save is removed
    /// unconditionally before load.
    pub fn open(fs: FS) -> Result<Self, Error> {
        let _ = fs.remove(TMP_NAME);

        let mut trie = Trie::new();
        match fs.open(FILE_NAME) {
            Ok(mut handle) => {
                let bytes = read_all(&mut handle)?;
                handle.close()?;
                let text = String::from_utf8_lossy(&bytes);
                for line in text.lines() {
                    if line.is_empty() {
                        continue;
                    }
                    let Some(path) = quote::unquote(line) else {
                        continue;
                    };
                    if path != "." && pathutil::is_local(&path) {
                        trie.record(&path);
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            fs,
            trie: RwLock::new(trie),
        })
    }

    fn save(&self, trie: &Trie) -> Result<(), Error> {
        let mut content = String::new();
        for path in trie.recorded_paths() {
            content.push_str(&quote::quote(&path));
            content.push('\n');
        }

        let flags = OpenFlags {
            read: false,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        };
        let mut handle = self.fs.open_file(TMP_NAME, flags, 0o644)?;

        let result = handle.write(content.as_bytes()).and_then(|_| handle.sync());
        let _ = handle.close();

        if let Err(e) = result {
            let _ = self.fs.remove(TMP_NAME);
            return Err(e);
        }

        self.fs.rename(TMP_NAME, FILE_NAME)
    }
}

impl<FS: FileSystem> WhiteoutStore for SimpleTextStore<FS> {
    fn query(&self, path: &str) -> bool {
        self.trie.read().unwrap().query(path)
    }

    fn record(&self, path: &str) -> Result<(), Error> {
        let cleaned = pathutil::check_local(path).map_err(|_| Error::path("record", path, ErrorKind::PathEscapes))?;
        if cleaned == "." {
            return Err(Error::path("record", path, ErrorKind::InvalidArgument));
        }
        let mut trie = self.trie.write().unwrap();
        trie.record(&cleaned);
        let result = self.save(&trie);
        if result.is_err() {
            trie.remove(&cleaned);
        }
        result
    }

    fn remove(&self, path: &str) -> Result<(), Error> {
        let cleaned = pathutil::check_local(path).map_err(|_| Error::path("remove", path, ErrorKind::PathEscapes))?;
        let mut trie = self.trie.write().unwrap();
        let was_present = trie.query(&cleaned);
        trie.remove(&cleaned);
        let result = self.save(&trie);
        if result.is_err() && was_present {
            trie.record(&cleaned);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemBackend;

    #[test]
    fn persists_across_reopen() {
        let fs = MemBackend::new();
        {
            let store = SimpleTextStore::open(fs.clone()).unwrap();
            store.record("p/q/r.txt").unwrap();
        }
        let store2 = SimpleTextStore::open(fs).unwrap();
        assert!(store2.query("p/q/r.txt"));
        assert!(!store2.query("p/q"));
    }

    #[test]
    fn rejects_root() {
        let fs = MemBackend::new();
        let store = SimpleTextStore::open(fs).unwrap();
        assert!(store.record(".").is_err());
    }

    #[test]
    fn remove_clears_record() {
        let fs = MemBackend::new();
        let store = SimpleTextStore::open(fs).unwrap();
        store.record("a/b").unwrap();
        store.remove("a/b").unwrap();
        assert!(!store.query("a/b"));
    }
}
