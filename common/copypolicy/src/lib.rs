// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Copy-on-write promotion of a layer's entry into the writable top of an
//! overlay: the copy policy abstraction, its canonical "dot-tmp"
//! implementation, and the recursive driver that ensures a path's whole
//! ancestor chain exists in the top before the entry itself is promoted.

mod cow;
mod policy;

pub use crate::cow::copy_on_write;
pub use crate::policy::{CopyPolicy, DotTmpPolicy};
