// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use backend::Error;

use crate::store::WhiteoutStore;

/// Exposes a nested directory's view of a shared whiteout store without
/// duplicating state: every path is rewritten with a fixed base prefix
/// before being delegated to the wrapped store.
pub struct Subspace {
    inner: Rc<dyn WhiteoutStore>,
    base: String,
}

impl Subspace {
    pub fn new(inner: Rc<dyn WhiteoutStore>, base: impl Into<String>) -> Self {
        Self {
            inner,
            base: base.into(),
        }
    }

    fn rewrite(&self, path: &str) -> String {
        if self.base.is_empty() || self.base == "." {
            path.to_string()
        } else if path == "." {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, path)
        }
    }
}

impl WhiteoutStore for Subspace {
    fn query(&self, path: &str) -> bool {
        self.inner.query(&self.rewrite(path))
    }

    fn record(&self, path: &str) -> Result<(), Error> {
        self.inner.record(&self.rewrite(path))
    }

    fn remove(&self, path: &str) -> Result<(), Error> {
        self.inner.remove(&self.rewrite(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimpleTextStore;
    use backend::MemBackend;

    #[test]
    fn rewrites_paths() {
        let fs = MemBackend::new();
        let store: Rc<dyn WhiteoutStore> = Rc::new(SimpleTextStore::open(fs).unwrap());
        let sub = Subspace::new(store.clone(), "nested");
        sub.record("x.txt").unwrap();
        assert!(store.query("nested/x.txt"));
        assert!(sub.query("x.txt"));
    }
}
