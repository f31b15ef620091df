// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Read-only layered views over a back-end: a single whiteout-filtered
//! [`Layer`], and an ordered [`LayerStack`] of them with search-newest-first
//! merge semantics.

mod layer;
mod stack;

pub use crate::layer::Layer;
pub use crate::stack::{merge_entries, LayerStack, OpenResult};
