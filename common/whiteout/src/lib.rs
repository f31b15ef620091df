// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Persistent whiteout metadata: a set of paths that should appear absent
//! to an overlay's readers even though a lower layer still provides them.

mod quote;
mod store;
mod subspace;
mod trie;

pub use crate::store::{SimpleTextStore, WhiteoutStore};
pub use crate::subspace::Subspace;
pub use crate::trie::Trie;
