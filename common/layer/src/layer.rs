// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use backend::{Error, ErrorKind, FileSystem, Metadata};
use whiteout::WhiteoutStore;

/// A read-only view of a back-end filtered by a whiteout metadata store.
/// Every read-like operation is masked when the path (or an ancestor) is
/// recorded as whited-out; every write-like operation fails with
/// [`ErrorKind::ReadOnlyFilesystem`].
pub struct Layer<FS: FileSystem> {
    backend: FS,
    store: Rc<dyn WhiteoutStore>,
}

impl<FS: FileSystem + Clone> Clone for Layer<FS> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            store: self.store.clone(),
        }
    }
}

impl<FS: FileSystem> Layer<FS> {
    pub fn new(backend: FS, store: Rc<dyn WhiteoutStore>) -> Self {
        Self { backend, store }
    }

    fn check_visible(&self, op: &'static str, name: &str) -> Result<(), Error> {
        if self.store.query(name) {
            return Err(Error::path(op, name, ErrorKind::WhitedOut));
        }
        Ok(())
    }

    pub fn backend(&self) -> &FS {
        &self.backend
    }

    pub fn stat(&self, name: &str) -> Result<Metadata, Error> {
        self.check_visible("stat", name)?;
        self.backend.stat(name)
    }

    pub fn lstat(&self, name: &str) -> Result<Metadata, Error> {
        self.check_visible("lstat", name)?;
        self.backend.lstat(name)
    }

    pub fn readlink(&self, name: &str) -> Result<String, Error> {
        self.check_visible("readlink", name)?;
        self.backend.readlink(name)
    }

    pub fn open(&self, name: &str) -> Result<FS::Handle, Error> {
        self.check_visible("open", name)?;
        self.backend.open(name)
    }

    /// Opens a rooted subview of this layer's back-end, wrapped in a new
    /// `Layer` sharing this layer's metadata store through a
    /// [`whiteout::Subspace`] rooted at `sub`.
    pub fn open_root(&self, sub: &str) -> Result<Layer<FS>, Error> {
        self.check_visible("open_root", sub)?;
        let backend = self.backend.open_root(sub)?;
        let store: Rc<dyn WhiteoutStore> = Rc::new(whiteout::Subspace::new(self.store.clone(), sub));
        Ok(Layer::new(backend, store))
    }

    pub fn create(&self, name: &str) -> Result<FS::Handle, Error> {
        Err(Error::path("create", name, ErrorKind::ReadOnlyFilesystem))
    }

    pub fn mkdir(&self, name: &str) -> Result<(), Error> {
        Err(Error::path("mkdir", name, ErrorKind::ReadOnlyFilesystem))
    }

    pub fn remove(&self, name: &str) -> Result<(), Error> {
        Err(Error::path("remove", name, ErrorKind::ReadOnlyFilesystem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::MemBackend;
    use whiteout::SimpleTextStore;

    #[test]
    fn whited_out_masks_read() {
        let fs = MemBackend::new();
        fs.create("a.txt").unwrap();
        let store: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(fs.clone()).unwrap());
        store.record("a.txt").unwrap();
        let layer = Layer::new(fs, store);
        assert!(layer.stat("a.txt").is_err());
    }

    #[test]
    fn write_ops_are_read_only() {
        let fs = MemBackend::new();
        let store: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(fs.clone()).unwrap());
        let layer = Layer::new(fs, store);
        assert!(layer.mkdir("x").is_err());
    }
}
