// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use backend::{Error, ErrorKind, FileSystem, FileType};
use layer::LayerStack;

use crate::policy::CopyPolicy;

/// Ensures `name` exists in `top`, promoting it (and, recursively, any
/// missing ancestor directories) from the layer stack if needed. A no-op if
/// `name` already exists in `top`.
pub fn copy_on_write<FS: FileSystem>(
    top: &FS,
    stack: &LayerStack<FS>,
    policy: &dyn CopyPolicy<FS>,
    name: &str,
) -> Result<(), Error> {
    if name == "." {
        return Ok(());
    }
    if top.lstat(name).is_ok() {
        return Ok(());
    }

    if let Some((parent, _)) = name.rsplit_once('/') {
        copy_on_write(top, stack, policy, parent)?;
    }

    // Re-check: a concurrent writer, or our own parent-promotion step, may
    // already have materialized this exact path.
    if top.lstat(name).is_ok() {
        return Ok(());
    }

    let (meta, idx) = stack.lstat(name)?;
    let source = stack.layer(idx);

    match meta.file_type {
        FileType::Directory => policy.copy_directory(top, name, &meta),
        FileType::Regular => policy.copy_regular_file(top, source.backend(), name, &meta),
        FileType::Symlink => policy.copy_symlink(top, source.backend(), name),
        _ => Err(Error::path("copy_on_write", name, ErrorKind::UnsupportedType)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DotTmpPolicy;
    use backend::{FileHandle, MemBackend};
    use layer::Layer;
    use std::rc::Rc;
    use whiteout::{SimpleTextStore, WhiteoutStore};

    #[test]
    fn promotes_deep_file_and_ancestors() {
        let lower = MemBackend::new();
        lower.mkdir_all("dir/sub", 0o755).unwrap();
        let mut h = lower.create("dir/sub/file.txt").unwrap();
        h.write(b"X").unwrap();
        let lower_store: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(lower.clone()).unwrap());
        let layer = Layer::new(lower, lower_store);
        let stack = LayerStack::new(vec![layer]);

        let top = MemBackend::new();
        copy_on_write(&top, &stack, &DotTmpPolicy, "dir/sub/file.txt").unwrap();

        assert!(top.stat("dir").unwrap().file_type.is_dir());
        assert!(top.stat("dir/sub").unwrap().file_type.is_dir());
        let mut out = top.open("dir/sub/file.txt").unwrap();
        let mut buf = [0u8; 1];
        out.read(&mut buf).unwrap();
        assert_eq!(&buf, b"X");
    }
}
