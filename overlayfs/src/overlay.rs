// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;
use std::time::SystemTime;

use backend::{Error, ErrorKind, FileHandle, FileSystem, Metadata, OpenFlags, Result};
use copypolicy::{copy_on_write, CopyPolicy, DotTmpPolicy};
use layer::{Layer, LayerStack, OpenResult};
use whiteout::{SimpleTextStore, Subspace, WhiteoutStore};

use crate::handle::OverlayHandle;

/// A writable top back-end stacked over a read-only chain of lower layers.
/// Reads are served by searching top-down through `top` and `lowers`;
/// writes promote the target into `top` via copy-on-write before mutating
/// it, and removals that still resolve through a lower layer are recorded
/// as whiteouts rather than actually deleted.
pub struct Overlay<FS: FileSystem + Clone> {
    top: FS,
    top_whiteouts: Rc<dyn WhiteoutStore>,
    lowers: LayerStack<FS>,
    policy: Rc<dyn CopyPolicy<FS>>,
}

impl<FS: FileSystem + Clone> Overlay<FS> {
    /// Builds an overlay over `top`, loading (or creating) its whiteout
    /// store and using the canonical [`DotTmpPolicy`] for promotion.
    pub fn new(top: FS, lowers: Vec<Layer<FS>>) -> Result<Self> {
        let top_whiteouts: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(top.clone())?);
        Ok(Self::with_policy(top, top_whiteouts, lowers, Rc::new(DotTmpPolicy)))
    }

    /// Builds an overlay from already-constructed parts, for callers that
    /// need a non-default copy policy or share a whiteout store across
    /// overlays rooted at the same top.
    pub fn with_policy(
        top: FS,
        top_whiteouts: Rc<dyn WhiteoutStore>,
        lowers: Vec<Layer<FS>>,
        policy: Rc<dyn CopyPolicy<FS>>,
    ) -> Self {
        Self {
            top,
            top_whiteouts,
            lowers: LayerStack::new(lowers),
            policy,
        }
    }

    /// The lower layer stack, not including `top`.
    fn full_stack(&self) -> LayerStack<FS> {
        let mut layers: Vec<Layer<FS>> = (0..self.lowers.len()).map(|i| self.lowers.layer(i).clone()).collect();
        layers.push(Layer::new(self.top.clone(), self.top_whiteouts.clone()));
        LayerStack::new(layers)
    }

    fn open_resolved(&self, resolved: &str) -> Result<OverlayHandle<FS::Handle>> {
        match self.full_stack().open(resolved)? {
            OpenResult::Symlink => Err(Error::path("open", resolved, ErrorKind::InvalidArgument)),
            OpenResult::Handles(handles) => {
                let is_dir = handles[0].stat()?.file_type.is_dir();
                Ok(OverlayHandle::new(resolved.to_string(), handles, is_dir))
            }
        }
    }

    fn promote(&self, name: &str) -> Result<()> {
        copy_on_write(&self.top, &self.lowers, self.policy.as_ref(), name)
    }
}

impl<FS: FileSystem + Clone> FileSystem for Overlay<FS> {
    type Handle = OverlayHandle<FS::Handle>;

    fn open(&self, name: &str) -> Result<Self::Handle> {
        let resolved = symlink::resolve_path(self, name, false)?;
        self.open_resolved(&resolved)
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<Self::Handle> {
        let resolved = symlink::resolve_path(self, name, false)?;
        if !flags.is_write() {
            return self.open_resolved(&resolved);
        }

        let mut created_fresh = false;
        match self.full_stack().lstat(&resolved) {
            Ok(meta) if meta.file_type.is_dir() && (flags.create || flags.create_new || flags.truncate) => {
                return Err(Error::path("open_file", &resolved, ErrorKind::AlreadyExists));
            }
            Ok(_) => self.promote(&resolved)?,
            Err(e) if (e.is_not_found() || matches!(e.kind(), Some(ErrorKind::WhitedOut)))
                && (flags.create || flags.create_new) =>
            {
                created_fresh = true;
            }
            Err(e) => return Err(e),
        }

        let handle = self.top.open_file(&resolved, flags, perm)?;
        if created_fresh {
            let _ = self.top.chmod(&resolved, perm);
        }
        self.top_whiteouts.remove(&resolved)?;
        Ok(OverlayHandle::direct(resolved, handle))
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        let resolved = symlink::resolve_path(self, name, false)?;
        self.full_stack().lstat(&resolved).map(|(meta, _)| meta)
    }

    fn lstat(&self, name: &str) -> Result<Metadata> {
        let resolved = symlink::resolve_path(self, name, true)?;
        self.full_stack().lstat(&resolved).map(|(meta, _)| meta)
    }

    fn readlink(&self, name: &str) -> Result<String> {
        let resolved = symlink::resolve_path(self, name, true)?;
        self.full_stack().readlink(&resolved)
    }

    fn open_root(&self, sub: &str) -> Result<Self> {
        let resolved = symlink::resolve_path(self, sub, false)?;
        self.promote(&resolved)?;
        let top = self.top.open_root(&resolved)?;
        let top_whiteouts: Rc<dyn WhiteoutStore> = Rc::new(Subspace::new(self.top_whiteouts.clone(), resolved.as_str()));

        let mut lowers = Vec::with_capacity(self.lowers.len());
        for idx in 0..self.lowers.len() {
            lowers.push(self.lowers.layer(idx).open_root(&resolved)?);
        }

        Ok(Self {
            top,
            top_whiteouts,
            lowers: LayerStack::new(lowers),
            policy: self.policy.clone(),
        })
    }

    fn mkdir(&self, name: &str, perm: u32) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, true)?;
        if !self.top_whiteouts.query(&resolved) {
            if let Ok(meta) = self.lowers.lstat(&resolved) {
                if !meta.file_type.is_dir() {
                    return Err(Error::path("mkdir", &resolved, ErrorKind::AlreadyExists));
                }
            }
        }
        self.top.mkdir(&resolved, perm)?;
        self.top_whiteouts.remove(&resolved)?;
        Ok(())
    }

    fn mkdir_all(&self, name: &str, perm: u32) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, true)?;
        if resolved == "." {
            return Ok(());
        }
        for head in pathutil::heads(&resolved) {
            if head == "." || self.top.lstat(&head).is_ok() {
                continue;
            }
            if !self.top_whiteouts.query(&head) {
                if let Ok(meta) = self.lowers.lstat(&head) {
                    if !meta.file_type.is_dir() {
                        return Err(Error::path("mkdir_all", &head, ErrorKind::AlreadyExists));
                    }
                }
            }
            self.top.mkdir(&head, perm)?;
            self.top_whiteouts.remove(&head)?;
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, true)?;
        if self.full_stack().lstat(&resolved).is_err() {
            return Err(Error::path("remove", &resolved, ErrorKind::NotFound));
        }
        let in_top = self.top.lstat(&resolved).is_ok();
        let in_lowers = self.lowers.lstat(&resolved).is_ok();
        if in_top {
            self.top.remove(&resolved)?;
        }
        if in_lowers {
            self.top_whiteouts.record(&resolved)?;
        }
        Ok(())
    }

    fn remove_all(&self, name: &str) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, true)?;
        self.top.remove_all(&resolved)?;
        if self.lowers.lstat(&resolved).is_ok() {
            self.top_whiteouts.record(&resolved)?;
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let resolved_old = symlink::resolve_path(self, old, true)?;
        let resolved_new = symlink::resolve_path(self, new, true)?;
        self.promote(&resolved_old)?;
        self.top_whiteouts.remove(&resolved_new)?;
        self.top.rename(&resolved_old, &resolved_new)?;
        if self.lowers.lstat(&resolved_old).is_ok() {
            self.top_whiteouts.record(&resolved_old)?;
        }
        Ok(())
    }

    fn link(&self, old: &str, new: &str) -> Result<()> {
        let resolved_old = symlink::resolve_path(self, old, true)?;
        let resolved_new = symlink::resolve_path(self, new, true)?;
        self.promote(&resolved_old)?;
        self.top.link(&resolved_old, &resolved_new)?;
        self.top_whiteouts.remove(&resolved_new)?;
        Ok(())
    }

    fn symlink(&self, target: &str, new: &str) -> Result<()> {
        let resolved_new = symlink::resolve_path(self, new, true)?;
        self.top.symlink(target, &resolved_new)?;
        self.top_whiteouts.remove(&resolved_new)?;
        Ok(())
    }

    fn chmod(&self, name: &str, mode: u32) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, false)?;
        self.promote(&resolved)?;
        self.top.chmod(&resolved, mode)
    }

    fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, false)?;
        self.promote(&resolved)?;
        self.top.chown(&resolved, uid, gid)
    }

    fn lchown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, true)?;
        self.promote(&resolved)?;
        self.top.lchown(&resolved, uid, gid)
    }

    fn chtimes(&self, name: &str, mtime: SystemTime) -> Result<()> {
        let resolved = symlink::resolve_path(self, name, false)?;
        self.promote(&resolved)?;
        self.top.chtimes(&resolved, mtime)
    }

    fn supports_symlinks(&self) -> bool {
        self.top.supports_symlinks()
    }

    fn supports_lstat(&self) -> bool {
        self.top.supports_lstat()
    }

    fn supports_chown(&self) -> bool {
        self.top.supports_chown()
    }

    fn supports_xattrs(&self) -> bool {
        self.top.supports_xattrs()
    }

    fn list_xattrs(&self, name: &str) -> Result<Vec<String>> {
        let resolved = symlink::resolve_path(self, name, false)?;
        let stack = self.full_stack();
        let idx = stack.layer_of(&resolved)?;
        stack.layer(idx).backend().list_xattrs(&resolved)
    }

    fn get_xattr(&self, name: &str, key: &str) -> Result<Vec<u8>> {
        let resolved = symlink::resolve_path(self, name, false)?;
        let stack = self.full_stack();
        let idx = stack.layer_of(&resolved)?;
        stack.layer(idx).backend().get_xattr(&resolved, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{FileSystem, MemBackend};
    use whiteout::SimpleTextStore;

    fn layer_over(fs: MemBackend) -> Layer<MemBackend> {
        let store: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(fs.clone()).unwrap());
        Layer::new(fs, store)
    }

    fn lower_with(files: &[(&str, &str)]) -> Layer<MemBackend> {
        let fs = MemBackend::new();
        for (path, content) in files {
            if let Some((dir, _)) = path.rsplit_once('/') {
                fs.mkdir_all(dir, 0o755).unwrap();
            }
            let mut h = fs.create(path).unwrap();
            h.write(content.as_bytes()).unwrap();
        }
        layer_over(fs)
    }

    #[test]
    fn reads_fall_through_to_lower_layer() {
        let lower = lower_with(&[("a.txt", "lower")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        let mut h = overlay.open("a.txt").unwrap();
        let mut buf = [0u8; 5];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"lower");
    }

    #[test]
    fn write_promotes_and_shadows_lower() {
        let lower = lower_with(&[("a.txt", "lower")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        let mut h = overlay.open_file("a.txt", OpenFlags::write_create_truncate(), 0o644).unwrap();
        h.write(b"top!!").unwrap();
        h.close().unwrap();

        let mut h = overlay.open("a.txt").unwrap();
        let mut buf = [0u8; 5];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"top!!");
    }

    #[test]
    fn remove_masks_lower_entry_with_whiteout() {
        let lower = lower_with(&[("a.txt", "lower")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        overlay.remove("a.txt").unwrap();
        assert!(overlay.stat("a.txt").is_err());
    }

    #[test]
    fn recreate_after_remove_clears_whiteout() {
        let lower = lower_with(&[("a.txt", "lower")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        overlay.remove("a.txt").unwrap();
        let mut h = overlay.create("a.txt").unwrap();
        h.write(b"new").unwrap();
        h.close().unwrap();

        let mut h = overlay.open("a.txt").unwrap();
        let mut buf = [0u8; 3];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"new");
    }

    #[test]
    fn readdir_merges_layers_with_top_shadowing() {
        let lower = lower_with(&[("a.txt", "A"), ("b.txt", "B-lower")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        let mut h = overlay.create("b.txt").unwrap();
        h.write(b"B-top").unwrap();
        h.close().unwrap();
        overlay.create("c.txt").unwrap();

        let mut dir = overlay.open(".").unwrap();
        let names = dir.readdirnames(0).unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);

        let mut h = overlay.open("b.txt").unwrap();
        let mut buf = [0u8; 5];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"B-top");
    }

    #[test]
    fn mkdir_conflicts_with_lower_file() {
        let lower = lower_with(&[("x", "file")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();
        assert!(overlay.mkdir("x", 0o755).is_err());
    }

    #[test]
    fn mkdir_over_lower_directory_succeeds() {
        let lower = lower_with(&[("dir/inner.txt", "X")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        overlay.mkdir("dir", 0o755).unwrap();
        overlay.create("dir/new.txt").unwrap();

        let mut dir = overlay.open("dir").unwrap();
        let names = dir.readdirnames(0).unwrap();
        assert_eq!(names, vec!["inner.txt", "new.txt"]);
    }

    #[test]
    fn rename_promotes_then_whiteouts_old_name() {
        let lower = lower_with(&[("a.txt", "payload")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        overlay.rename("a.txt", "b.txt").unwrap();
        assert!(overlay.stat("a.txt").is_err());

        let mut h = overlay.open("b.txt").unwrap();
        let mut buf = [0u8; 7];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn write_like_ops_fail_on_read_side_handle() {
        let lower = lower_with(&[("a.txt", "x")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        let mut h = overlay.open("a.txt").unwrap();
        assert!(h.write(b"nope").is_err());
        assert!(h.truncate(0).is_err());
        assert!(h.chmod(0o600).is_err());
    }

    #[test]
    fn closed_handle_rejects_further_use() {
        let lower = lower_with(&[("a.txt", "x")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        let mut h = overlay.open("a.txt").unwrap();
        h.close().unwrap();
        h.close().unwrap();
        let mut buf = [0u8; 1];
        assert!(h.read(&mut buf).is_err());
    }

    #[test]
    fn open_root_scopes_to_subdirectory() {
        let lower = lower_with(&[("sub/a.txt", "A"), ("other.txt", "O")]);
        let top = MemBackend::new();
        let overlay = Overlay::new(top, vec![lower]).unwrap();

        let sub = overlay.open_root("sub").unwrap();
        assert!(sub.stat("a.txt").is_ok());
        assert!(sub.stat("other.txt").is_err());

        sub.remove("a.txt").unwrap();
        assert!(sub.stat("a.txt").is_err());
        assert!(overlay.stat("sub/a.txt").is_err());
        assert!(overlay.stat("other.txt").is_ok());
    }
}
