// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Back-end filesystem capability traits, the structured error taxonomy
//! used throughout the overlay engine, and two reference back-ends: one
//! rooted at a real host directory and one held entirely in memory.

mod error;
mod mem;
mod os;
mod traits;
mod types;

pub use crate::error::{Error, ErrorKind, LinkError, PathError, Result};
pub use crate::mem::{MemBackend, MemHandle};
pub use crate::os::{OsBackend, OsHandle};
pub use crate::traits::{FileHandle, FileSystem};
pub use crate::types::{DirEntry, FileType, Metadata, OpenFlags};
