// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Path cleaning, locality checks, and prefix iteration over forward-slash
//! paths used throughout the overlay engine.

use std::fmt;

/// Error returned when a path is not local (absolute, or escapes its root
/// via a leading "..").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEscapesError {
    pub path: String,
}

impl fmt::Display for PathEscapesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path escapes root: {:?}", self.path)
    }
}

impl std::error::Error for PathEscapesError {}

/// Lexically cleans a forward-slash path: collapses "." and ".." components
/// where possible, removes repeated slashes, and removes a trailing slash.
/// An empty input cleans to ".". Leading ".." segments that cannot be
/// resolved against a preceding real component are preserved, which is what
/// allows [`is_local`] to detect escape attempts.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if let Some(last) = out.last() {
                    if *last != ".." {
                        out.pop();
                        continue;
                    }
                }
                if !rooted {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }

    let joined = out.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// True iff the cleaned form of `path` is not absolute and does not begin
/// with a ".." component, i.e. it stays within its root.
pub fn is_local(path: &str) -> bool {
    let cleaned = clean(path);
    if cleaned.starts_with('/') {
        return false;
    }
    cleaned != ".." && !cleaned.starts_with("../")
}

/// Cleans `path` and verifies it is local, failing with
/// [`PathEscapesError`] otherwise.
pub fn check_local(path: &str) -> Result<String, PathEscapesError> {
    let cleaned = clean(path);
    if cleaned.starts_with('/') || cleaned == ".." || cleaned.starts_with("../") {
        return Err(PathEscapesError {
            path: path.to_string(),
        });
    }
    Ok(cleaned)
}

/// Splits a cleaned local path into its components together with their
/// `(start, end)` byte offsets into the original string (end exclusive of
/// any separator).
pub fn split_components(path: &str) -> Vec<(&str, (usize, usize))> {
    if path == "." || path.is_empty() {
        return Vec::new();
    }
    let mut result = Vec::new();
    let mut start = 0usize;
    for (idx, ch) in path.char_indices() {
        if ch == '/' {
            if idx > start {
                result.push((&path[start..idx], (start, idx)));
            }
            start = idx + 1;
        }
    }
    if start < path.len() {
        result.push((&path[start..], (start, path.len())));
    }
    result
}

/// Iterates the increasing prefixes of a cleaned path: for "a/b/c" yields
/// "a", "a/b", "a/b/c". An empty/"." input yields a single "." element. A
/// rooted path yields "/" first, then successively deeper absolute
/// prefixes.
pub fn heads(path: &str) -> Vec<String> {
    let cleaned = clean(path);
    if cleaned == "." {
        return vec![".".to_string()];
    }
    let rooted = cleaned.starts_with('/');
    let body = if rooted { &cleaned[1..] } else { cleaned.as_str() };
    let mut out = Vec::new();
    if rooted {
        out.push("/".to_string());
    }
    let mut acc = String::new();
    for component in body.split('/') {
        if component.is_empty() {
            continue;
        }
        if !acc.is_empty() {
            acc.push('/');
        }
        acc.push_str(component);
        if rooted {
            out.push(format!("/{acc}"));
        } else {
            out.push(acc.clone());
        }
    }
    out
}

/// Iterates the decreasing prefixes of a cleaned path: for "a/b/c" yields
/// "a/b/c", "a/b", "a". An empty/"." input yields a single "." element.
pub fn tails(path: &str) -> Vec<String> {
    let mut out = heads(path);
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_basic() {
        assert_eq!(clean(""), ".");
        assert_eq!(clean("."), ".");
        assert_eq!(clean("a/./b"), "a/b");
        assert_eq!(clean("a//b"), "a/b");
        assert_eq!(clean("a/b/"), "a/b");
        assert_eq!(clean("a/b/../c"), "a/c");
        assert_eq!(clean("../a"), "../a");
        assert_eq!(clean("a/../../b"), "../b");
        assert_eq!(clean("/a/../../b"), "/b");
    }

    #[test]
    fn locality() {
        assert!(is_local("a/b"));
        assert!(is_local("."));
        assert!(!is_local("/a"));
        assert!(!is_local("../a"));
        assert!(!is_local("a/../../b"));
        assert!(check_local("a/b").is_ok());
        assert!(check_local("../a").is_err());
    }

    #[test]
    fn heads_and_tails() {
        assert_eq!(heads("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert_eq!(tails("a/b/c"), vec!["a/b/c", "a/b", "a"]);
        assert_eq!(heads(""), vec!["."]);
        assert_eq!(heads("/a/b"), vec!["/", "/a", "/a/b"]);
    }

    #[test]
    fn split() {
        assert_eq!(
            split_components("a/bc/d"),
            vec![("a", (0, 1)), ("bc", (2, 4)), ("d", (5, 6))]
        );
        assert_eq!(split_components("."), Vec::<(&str, (usize, usize))>::new());
    }
}
