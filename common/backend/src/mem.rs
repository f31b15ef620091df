// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! An in-memory filesystem back-end used by unit tests that want a fast,
//! deterministic back-end without touching the host filesystem. Symlinks
//! and xattrs are reported as unsupported; everything else behaves like a
//! small Unix filesystem.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::rc::Rc;
use std::time::SystemTime;

use crate::error::{Error, ErrorKind, Result};
use crate::traits::{FileHandle, FileSystem};
use crate::types::{DirEntry, FileType, Metadata, OpenFlags};

enum Kind {
    File(Vec<u8>),
    Dir(BTreeMap<String, Rc<RefCell<Node>>>),
}

struct Node {
    kind: Kind,
    mode: u32,
    mtime: SystemTime,
}

impl Node {
    fn new_dir(mode: u32) -> Rc<RefCell<Node>> {
        Rc::new(RefCell::new(Node {
            kind: Kind::Dir(BTreeMap::new()),
            mode,
            mtime: SystemTime::now(),
        }))
    }

    fn new_file(mode: u32) -> Rc<RefCell<Node>> {
        Rc::new(RefCell::new(Node {
            kind: Kind::File(Vec::new()),
            mode,
            mtime: SystemTime::now(),
        }))
    }

    fn file_type(&self) -> FileType {
        match &self.kind {
            Kind::File(_) => FileType::Regular,
            Kind::Dir(_) => FileType::Directory,
        }
    }
}

/// A back-end rooted at some node of a shared in-memory tree. Cloning
/// shares the same underlying tree (cheap `Rc` clone), mirroring how
/// [`FileSystem::open_root`] is expected to behave for real back-ends.
#[derive(Clone)]
pub struct MemBackend {
    root: Rc<RefCell<Node>>,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            root: Node::new_dir(0o755),
        }
    }

    fn lookup(&self, op: &'static str, name: &str) -> Result<Rc<RefCell<Node>>> {
        let cleaned = pathutil::check_local(name).map_err(|_| Error::path(op, name, ErrorKind::PathEscapes))?;
        let mut cur = self.root.clone();
        if cleaned == "." {
            return Ok(cur);
        }
        for (component, _) in pathutil::split_components(&cleaned) {
            let next = {
                let node = cur.borrow();
                match &node.kind {
                    Kind::Dir(children) => children
                        .get(component)
                        .cloned()
                        .ok_or_else(|| Error::path(op, name, ErrorKind::NotFound))?,
                    Kind::File(_) => return Err(Error::path(op, name, ErrorKind::NotADirectory)),
                }
            };
            cur = next;
        }
        Ok(cur)
    }

    fn lookup_parent<'a>(&self, op: &'static str, cleaned: &'a str) -> Result<(Rc<RefCell<Node>>, &'a str)> {
        match cleaned.rsplit_once('/') {
            None => Ok((self.root.clone(), cleaned)),
            Some((parent, leaf)) => {
                let parent_node = self.lookup(op, parent)?;
                Ok((parent_node, leaf))
            }
        }
    }

    fn metadata_of(node: &Node) -> Metadata {
        let size = match &node.kind {
            Kind::File(bytes) => bytes.len() as u64,
            Kind::Dir(_) => 0,
        };
        Metadata {
            file_type: node.file_type(),
            mode: node.mode & 0o7777,
            size,
            mtime: node.mtime,
        }
    }
}

impl FileSystem for MemBackend {
    type Handle = MemHandle;

    fn open(&self, name: &str) -> Result<Self::Handle> {
        self.open_file(name, OpenFlags::read_only(), 0)
    }

    fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<Self::Handle> {
        let cleaned = pathutil::check_local(name).map_err(|_| Error::path("open", name, ErrorKind::PathEscapes))?;
        let existing = self.lookup("open", name).ok();

        let node = match existing {
            Some(n) => {
                if flags.create_new {
                    return Err(Error::path("open", name, ErrorKind::AlreadyExists));
                }
                if flags.truncate {
                    if let Kind::File(bytes) = &mut n.borrow_mut().kind {
                        bytes.clear();
                    }
                }
                n
            }
            None if flags.create || flags.create_new => {
                let (parent, leaf) = self.lookup_parent("open", &cleaned)?;
                let new_node = Node::new_file(perm);
                match &mut parent.borrow_mut().kind {
                    Kind::Dir(children) => {
                        children.insert(leaf.to_string(), new_node.clone());
                    }
                    Kind::File(_) => return Err(Error::path("open", name, ErrorKind::NotADirectory)),
                }
                new_node
            }
            None => return Err(Error::path("open", name, ErrorKind::NotFound)),
        };

        let is_dir = matches!(node.borrow().kind, Kind::Dir(_));
        if is_dir && flags.is_write() {
            return Err(Error::path("open", name, ErrorKind::IsADirectory));
        }

        let cursor = if flags.append {
            if let Kind::File(bytes) = &node.borrow().kind {
                bytes.len()
            } else {
                0
            }
        } else {
            0
        };

        Ok(MemHandle {
            node,
            name: name.to_string(),
            cursor,
            dir_entries: None,
            dir_cursor: 0,
            append: flags.append,
            closed: false,
        })
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        let node = self.lookup("stat", name)?;
        let meta = Self::metadata_of(&node.borrow());
        Ok(meta)
    }

    fn lstat(&self, name: &str) -> Result<Metadata> {
        self.stat(name)
    }

    fn readlink(&self, _name: &str) -> Result<String> {
        Err(Error::path("readlink", _name, ErrorKind::PlatformUnsupported))
    }

    fn open_root(&self, sub: &str) -> Result<Self> {
        let node = self.lookup("open_root", sub)?;
        if !matches!(node.borrow().kind, Kind::Dir(_)) {
            return Err(Error::path("open_root", sub, ErrorKind::NotADirectory));
        }
        Ok(Self { root: node })
    }

    fn mkdir(&self, name: &str, perm: u32) -> Result<()> {
        let cleaned = pathutil::check_local(name).map_err(|_| Error::path("mkdir", name, ErrorKind::PathEscapes))?;
        if self.lookup("mkdir", name).is_ok() {
            return Err(Error::path("mkdir", name, ErrorKind::AlreadyExists));
        }
        let (parent, leaf) = self.lookup_parent("mkdir", &cleaned)?;
        match &mut parent.borrow_mut().kind {
            Kind::Dir(children) => {
                children.insert(leaf.to_string(), Node::new_dir(perm));
                Ok(())
            }
            Kind::File(_) => Err(Error::path("mkdir", name, ErrorKind::NotADirectory)),
        }
    }

    fn mkdir_all(&self, name: &str, perm: u32) -> Result<()> {
        let cleaned = pathutil::check_local(name).map_err(|_| Error::path("mkdirall", name, ErrorKind::PathEscapes))?;
        if cleaned == "." {
            return Ok(());
        }
        let mut acc = String::new();
        for (component, _) in pathutil::split_components(&cleaned) {
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(component);
            if self.lookup("mkdirall", &acc).is_err() {
                self.mkdir(&acc, perm)?;
            }
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let cleaned = pathutil::check_local(name).map_err(|_| Error::path("remove", name, ErrorKind::PathEscapes))?;
        let node = self.lookup("remove", name)?;
        if let Kind::Dir(children) = &node.borrow().kind {
            if !children.is_empty() {
                return Err(Error::path("remove", name, ErrorKind::InvalidArgument));
            }
        }
        let (parent, leaf) = self.lookup_parent("remove", &cleaned)?;
        match &mut parent.borrow_mut().kind {
            Kind::Dir(children) => {
                children.remove(leaf);
                Ok(())
            }
            Kind::File(_) => Err(Error::path("remove", name, ErrorKind::NotADirectory)),
        }
    }

    fn remove_all(&self, name: &str) -> Result<()> {
        let cleaned = pathutil::check_local(name).map_err(|_| Error::path("removeall", name, ErrorKind::PathEscapes))?;
        if self.lookup("removeall", name).is_err() {
            return Ok(());
        }
        let (parent, leaf) = self.lookup_parent("removeall", &cleaned)?;
        match &mut parent.borrow_mut().kind {
            Kind::Dir(children) => {
                children.remove(leaf);
                Ok(())
            }
            Kind::File(_) => Err(Error::path("removeall", name, ErrorKind::NotADirectory)),
        }
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let node = self.lookup("rename", old)?;
        let old_cleaned = pathutil::check_local(old).map_err(|_| Error::link("rename", old, new, ErrorKind::PathEscapes))?;
        let new_cleaned = pathutil::check_local(new).map_err(|_| Error::link("rename", old, new, ErrorKind::PathEscapes))?;

        let (new_parent, new_leaf) = self
            .lookup_parent("rename", &new_cleaned)
            .map_err(|_| Error::link("rename", old, new, ErrorKind::NotFound))?;
        match &mut new_parent.borrow_mut().kind {
            Kind::Dir(children) => {
                children.insert(new_leaf.to_string(), node);
            }
            Kind::File(_) => return Err(Error::link("rename", old, new, ErrorKind::NotADirectory)),
        }

        let (old_parent, old_leaf) = self.lookup_parent("rename", &old_cleaned)?;
        if let Kind::Dir(children) = &mut old_parent.borrow_mut().kind {
            children.remove(old_leaf);
        }
        Ok(())
    }

    fn link(&self, old: &str, new: &str) -> Result<()> {
        let node = self.lookup("link", old)?;
        let new_cleaned = pathutil::check_local(new).map_err(|_| Error::link("link", old, new, ErrorKind::PathEscapes))?;
        let (parent, leaf) = self
            .lookup_parent("link", &new_cleaned)
            .map_err(|_| Error::link("link", old, new, ErrorKind::NotFound))?;
        match &mut parent.borrow_mut().kind {
            Kind::Dir(children) => {
                children.insert(leaf.to_string(), node);
                Ok(())
            }
            Kind::File(_) => Err(Error::link("link", old, new, ErrorKind::NotADirectory)),
        }
    }

    fn symlink(&self, target: &str, new: &str) -> Result<()> {
        Err(Error::link("symlink", target, new, ErrorKind::PlatformUnsupported))
    }

    fn chmod(&self, name: &str, mode: u32) -> Result<()> {
        let node = self.lookup("chmod", name)?;
        node.borrow_mut().mode = mode & 0o7777;
        Ok(())
    }

    fn chown(&self, _name: &str, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    fn lchown(&self, _name: &str, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    fn chtimes(&self, name: &str, mtime: SystemTime) -> Result<()> {
        let node = self.lookup("chtimes", name)?;
        node.borrow_mut().mtime = mtime;
        Ok(())
    }

    fn supports_symlinks(&self) -> bool {
        false
    }

    fn supports_xattrs(&self) -> bool {
        false
    }
}

pub struct MemHandle {
    node: Rc<RefCell<Node>>,
    name: String,
    cursor: usize,
    dir_entries: Option<Vec<DirEntry>>,
    dir_cursor: usize,
    append: bool,
    closed: bool,
}

impl MemHandle {
    fn ensure_dir_entries(&mut self) -> Result<()> {
        if self.dir_entries.is_some() {
            return Ok(());
        }
        let node = self.node.borrow();
        let Kind::Dir(children) = &node.kind else {
            return Err(Error::path("readdir", &self.name, ErrorKind::NotADirectory));
        };
        let mut out: Vec<DirEntry> = children
            .iter()
            .map(|(name, node)| DirEntry {
                name: name.clone(),
                file_type: node.borrow().file_type(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        drop(node);
        self.dir_entries = Some(out);
        Ok(())
    }
}

impl FileHandle for MemHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::path("read", &self.name, ErrorKind::FileClosed));
        }
        let node = self.node.borrow();
        let Kind::File(bytes) = &node.kind else {
            return Err(Error::path("read", &self.name, ErrorKind::IsADirectory));
        };
        let remaining = bytes.len().saturating_sub(self.cursor);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&bytes[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::path("write", &self.name, ErrorKind::FileClosed));
        }
        let mut node = self.node.borrow_mut();
        let Kind::File(bytes) = &mut node.kind else {
            return Err(Error::path("write", &self.name, ErrorKind::BadFileDescriptor));
        };
        if self.append {
            self.cursor = bytes.len();
        }
        if self.cursor + buf.len() > bytes.len() {
            bytes.resize(self.cursor + buf.len(), 0);
        }
        bytes[self.cursor..self.cursor + buf.len()].copy_from_slice(buf);
        self.cursor += buf.len();
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let node = self.node.borrow();
        match &node.kind {
            Kind::File(bytes) => {
                let new_pos: i64 = match pos {
                    SeekFrom::Start(n) => n as i64,
                    SeekFrom::Current(n) => self.cursor as i64 + n,
                    SeekFrom::End(n) => bytes.len() as i64 + n,
                };
                if new_pos < 0 {
                    return Err(Error::path("seek", &self.name, ErrorKind::InvalidArgument));
                }
                drop(node);
                self.cursor = new_pos as usize;
                Ok(self.cursor as u64)
            }
            Kind::Dir(_) => {
                drop(node);
                match pos {
                    SeekFrom::Start(0) => {
                        self.dir_cursor = 0;
                        self.dir_entries = None;
                        Ok(0)
                    }
                    SeekFrom::Current(0) => Ok(self.dir_cursor as u64),
                    SeekFrom::End(n) if n <= 0 => {
                        self.ensure_dir_entries()?;
                        self.dir_cursor = self.dir_entries.as_ref().unwrap().len();
                        Ok(self.dir_cursor as u64)
                    }
                    _ => Err(Error::path("seek", &self.name, ErrorKind::InvalidArgument)),
                }
            }
        }
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let mut node = self.node.borrow_mut();
        let Kind::File(bytes) = &mut node.kind else {
            return Err(Error::path("truncate", &self.name, ErrorKind::IsADirectory));
        };
        bytes.resize(size as usize, 0);
        Ok(())
    }

    fn readdir(&mut self, n: i64) -> Result<Vec<DirEntry>> {
        self.ensure_dir_entries()?;
        let entries = self.dir_entries.as_ref().unwrap();
        if n <= 0 {
            let out = entries[self.dir_cursor..].to_vec();
            self.dir_cursor = entries.len();
            return Ok(out);
        }
        let end = (self.dir_cursor + n as usize).min(entries.len());
        let out = entries[self.dir_cursor..end].to_vec();
        self.dir_cursor = end;
        if out.is_empty() {
            return Err(Error::path("readdir", &self.name, ErrorKind::NotFound));
        }
        Ok(out)
    }

    fn stat(&self) -> Result<Metadata> {
        Ok(MemBackend::metadata_of(&self.node.borrow()))
    }

    fn chmod(&self, mode: u32) -> Result<()> {
        self.node.borrow_mut().mode = mode & 0o7777;
        Ok(())
    }

    fn chown(&self, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let fs = MemBackend::new();
        let mut h = fs.open_file("a.txt", OpenFlags::write_create_truncate(), 0o644).unwrap();
        h.write(b"hi").unwrap();
        drop(h);

        let mut h = fs.open("a.txt").unwrap();
        let mut buf = [0u8; 2];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn mkdir_all_and_readdir() {
        let fs = MemBackend::new();
        fs.mkdir_all("a/b/c", 0o755).unwrap();
        fs.create("a/b/x.txt").unwrap();
        let mut h = fs.open("a/b").unwrap();
        let names = h.readdirnames(0).unwrap();
        assert_eq!(names, vec!["c".to_string(), "x.txt".to_string()]);
    }

    #[test]
    fn rename_moves_node() {
        let fs = MemBackend::new();
        fs.create("a.txt").unwrap();
        fs.rename("a.txt", "b.txt").unwrap();
        assert!(fs.stat("a.txt").is_err());
        assert!(fs.stat("b.txt").is_ok());
    }
}
