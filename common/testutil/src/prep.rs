// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A tiny line-directed language for materializing a tree in a single
//! test fixture literal instead of a chain of `mkdir`/`create`/`write`
//! calls.
//!
//! ```text
//! dir/ 0755
//! dir/file.txt: 0644 hello world
//! dir/quoted.txt: "has spaces\nand a newline"
//! dir/link -> file.txt
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Permission is
//! optional on both directory and file lines (an octal literal starting
//! with `0`); when absent, the default permission (`0o777`) applies.

use backend::{Error, ErrorKind, FileSystem, OpenFlags};

const DEFAULT_PERM: u32 = 0o777;

fn is_octal(s: &str) -> bool {
    !s.is_empty() && s.starts_with('0') && s.bytes().all(|b| (b'0'..=b'7').contains(&b))
}

fn split_perm(rest: &str) -> (Option<u32>, &str) {
    let rest = rest.trim_start();
    match rest.split_once(char::is_whitespace) {
        Some((first, remainder)) if is_octal(first) => (u32::from_str_radix(first, 8).ok(), remainder.trim_start()),
        _ if is_octal(rest) => (u32::from_str_radix(rest, 8).ok(), ""),
        _ => (None, rest),
    }
}

fn unquote(s: &str) -> String {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let inner = &s[1..s.len() - 1];
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => {}
            }
        }
        out
    } else {
        s.to_string()
    }
}

/// Parses `script` and materializes every directory, file, and symlink it
/// describes against `fs`.
pub fn prepare<FS: FileSystem>(fs: &FS, script: &str) -> Result<(), Error> {
    for raw_line in script.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((link, target)) = line.split_once("->") {
            fs.symlink(target.trim(), link.trim())?;
            continue;
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r),
            None => (line, ""),
        };

        if let Some(dir) = head.strip_suffix('/') {
            let (perm, _) = split_perm(rest);
            fs.mkdir_all(dir, perm.unwrap_or(DEFAULT_PERM))?;
            continue;
        }

        if let Some(path) = head.strip_suffix(':') {
            if let Some((parent, _)) = path.rsplit_once('/') {
                let _ = fs.mkdir_all(parent, DEFAULT_PERM);
            }
            let (perm, content_raw) = split_perm(rest);
            let content = unquote(content_raw);
            let mut handle = fs.open_file(path, OpenFlags::write_create_truncate(), perm.unwrap_or(DEFAULT_PERM))?;
            handle.write(content.as_bytes())?;
            handle.close()?;
            continue;
        }

        return Err(Error::path("prepare", line, ErrorKind::InvalidArgument));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{FileHandle, MemBackend};

    #[test]
    fn materializes_dirs_files_and_symlinks() {
        let fs = MemBackend::new();
        prepare(
            &fs,
            r#"
            sub/ 0750
            sub/plain.txt: hello
            sub/quoted.txt: 0600 "has space"
            # a comment
            "#,
        )
        .unwrap();

        assert_eq!(fs.stat("sub").unwrap().mode, 0o750);
        assert_eq!(fs.stat("sub/plain.txt").unwrap().mode, DEFAULT_PERM & 0o7777);

        let mut h = fs.open("sub/plain.txt").unwrap();
        let mut buf = [0u8; 5];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        assert_eq!(fs.stat("sub/quoted.txt").unwrap().mode, 0o600);
        let mut h = fs.open("sub/quoted.txt").unwrap();
        let mut buf = [0u8; 9];
        h.read(&mut buf).unwrap();
        assert_eq!(&buf, b"has space");
    }

    #[test]
    fn rejects_malformed_line() {
        let fs = MemBackend::new();
        assert!(prepare(&fs, "not-a-valid-line").is_err());
    }
}
