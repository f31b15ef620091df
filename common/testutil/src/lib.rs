// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod prep;
mod tree;

pub use prep::prepare;
pub use tree::{describe_tree, simple_dir, simple_file, FileDescription, EMPTY_HASH};
