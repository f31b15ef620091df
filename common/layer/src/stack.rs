// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use backend::{DirEntry, Error, ErrorKind, FileHandle, FileSystem, Metadata};

use crate::layer::Layer;

fn is_masking(e: &Error) -> bool {
    matches!(e.kind(), Some(ErrorKind::WhitedOut) | Some(ErrorKind::NotADirectory))
}

/// The outcome of [`LayerStack::open`]: either the topmost contributing
/// layer's entry was itself a symlink (the caller must re-resolve before
/// retrying), or a set of directory/file handles was collected.
pub enum OpenResult<H> {
    Symlink,
    Handles(Vec<H>),
}

/// An ordered list of layers, index 0 being the oldest (bottom) and the
/// last index being the newest (top). Lookups search from the top down, so
/// later layers shadow earlier ones.
pub struct LayerStack<FS: FileSystem> {
    layers: Vec<Layer<FS>>,
}

impl<FS: FileSystem> LayerStack<FS> {
    pub fn new(layers: Vec<Layer<FS>>) -> Self {
        Self { layers }
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, idx: usize) -> &Layer<FS> {
        &self.layers[idx]
    }

    /// Returns the metadata of `name` and the index of the topmost layer
    /// that provides it.
    pub fn lstat(&self, name: &str) -> Result<(Metadata, usize), Error> {
        for idx in (0..self.layers.len()).rev() {
            match self.layers[idx].lstat(name) {
                Ok(meta) => return Ok((meta, idx)),
                Err(e) if is_masking(&e) => {
                    return Err(Error::path("lstat", name, ErrorKind::WhitedOut));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::path("lstat", name, ErrorKind::NotFound))
    }

    pub fn readlink(&self, name: &str) -> Result<String, Error> {
        for idx in (0..self.layers.len()).rev() {
            match self.layers[idx].lstat(name) {
                Ok(_) => return self.layers[idx].readlink(name),
                Err(e) if is_masking(&e) => {
                    return Err(Error::path("readlink", name, ErrorKind::WhitedOut));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::path("readlink", name, ErrorKind::NotFound))
    }

    /// Returns the index of the topmost layer providing `name`, without
    /// opening anything.
    pub fn layer_of(&self, name: &str) -> Result<usize, Error> {
        self.lstat(name).map(|(_, idx)| idx)
    }

    /// Opens `name`, collecting one handle per contiguous topmost run of
    /// directory layers, or a single handle for the topmost non-directory
    /// entry.
    pub fn open(&self, name: &str) -> Result<OpenResult<FS::Handle>, Error> {
        let mut handles = Vec::new();

        for idx in (0..self.layers.len()).rev() {
            match self.layers[idx].lstat(name) {
                Ok(meta) => {
                    if meta.file_type.is_symlink() {
                        if handles.is_empty() {
                            return Ok(OpenResult::Symlink);
                        }
                        break;
                    }
                    if !meta.file_type.is_dir() {
                        if handles.is_empty() {
                            handles.push(self.layers[idx].open(name)?);
                        }
                        break;
                    }
                    handles.push(self.layers[idx].open(name)?);
                }
                Err(e) if is_masking(&e) => break,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        if handles.is_empty() {
            return Err(Error::path("open", name, ErrorKind::NotFound));
        }
        Ok(OpenResult::Handles(handles))
    }
}

/// Merges `readdir` results from a set of directory handles ordered
/// topmost-first: the union of all entries keyed by name, with the
/// topmost occurrence winning, sorted lexicographically by name.
pub fn merge_entries<H: FileHandle>(handles: &mut [H]) -> Result<Vec<DirEntry>, Error> {
    use std::collections::BTreeMap;
    let mut merged: BTreeMap<String, DirEntry> = BTreeMap::new();
    for handle in handles.iter_mut() {
        for entry in handle.readdir(0)? {
            merged.entry(entry.name.clone()).or_insert(entry);
        }
    }
    Ok(merged.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{FileHandle, FileSystem, MemBackend};
    use std::rc::Rc;
    use whiteout::{SimpleTextStore, WhiteoutStore};

    fn make_layer(files: &[(&str, &str)]) -> Layer<MemBackend> {
        let fs = MemBackend::new();
        for (path, content) in files {
            if let Some((dir, _)) = path.rsplit_once('/') {
                fs.mkdir_all(dir, 0o755).unwrap();
            }
            let mut h = fs.create(path).unwrap();
            h.write(content.as_bytes()).unwrap();
        }
        let store: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(fs.clone()).unwrap());
        Layer::new(fs, store)
    }

    #[test]
    fn merged_directory_shadowing() {
        let l0 = make_layer(&[("a.txt", "A"), ("b.txt", "B0")]);
        let l1 = make_layer(&[("b.txt", "B1"), ("c.txt", "C")]);
        let stack = LayerStack::new(vec![l0, l1]);

        let (_, idx) = stack.lstat("b.txt").unwrap();
        assert_eq!(idx, 1);

        match stack.open("b.txt").unwrap() {
            OpenResult::Handles(mut hs) => {
                assert_eq!(hs.len(), 1);
                let mut buf = [0u8; 2];
                hs[0].read(&mut buf).unwrap();
                assert_eq!(&buf, b"B1");
            }
            OpenResult::Symlink => panic!("expected handle"),
        }
    }

    #[test]
    fn not_found_when_absent_everywhere() {
        let l0 = make_layer(&[]);
        let stack = LayerStack::new(vec![l0]);
        assert!(stack.lstat("nope").is_err());
    }
}
