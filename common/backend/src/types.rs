// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::SystemTime;

/// The kind of a filesystem entry, shared by metadata and directory
/// listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    Other,
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileType::Regular)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// Flags governing [`crate::FileSystem::open_file`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    pub fn write_create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// True if this flag set would mutate the target: any of write, append,
    /// create, create_new, or truncate.
    pub fn is_write(&self) -> bool {
        self.write || self.append || self.create || self.create_new || self.truncate
    }
}

/// Metadata about a filesystem entry, the subset common across back-ends.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub file_type: FileType,
    pub mode: u32,
    pub size: u64,
    pub mtime: SystemTime,
}

/// One entry returned from a directory read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}
