// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Small demonstration CLI for the `overlayfs` crate: composes a writable
//! top directory with an ordered list of read-only lower directories and
//! exposes `ls`/`cat`/`rm`/`write` over the resulting overlay. No kernel
//! mount is ever performed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use backend::{FileHandle, FileSystem, OpenFlags, OsBackend};
use clap::{Parser, Subcommand};
use cliutil::Config;
use overlayfs::Overlay;
use whiteout::{SimpleTextStore, WhiteoutStore};

/// Inspect a stacked copy-on-write overlay filesystem without mounting it.
#[derive(Parser)]
struct Args {
    /// Writable top directory.
    #[arg(long)]
    top: PathBuf,

    /// Read-only lower directory, oldest first. Repeat to stack more than
    /// one; the last occurrence is the topmost lower, directly beneath
    /// `--top`.
    #[arg(long = "lower")]
    lowers: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the merged contents of a directory.
    Ls { path: String },
    /// Print the contents of a file.
    Cat { path: String },
    /// Remove a path, recording a whiteout if a lower layer still provides it.
    Rm { path: String },
    /// Create or overwrite a file with the given content.
    Write { path: String, content: String },
}

fn build_overlay(args: &Args) -> Result<Overlay<OsBackend>> {
    let top = OsBackend::new(&args.top);

    let mut lowers = Vec::with_capacity(args.lowers.len());
    for dir in &args.lowers {
        let backend = OsBackend::new(dir);
        let store: Rc<dyn WhiteoutStore> = Rc::new(
            SimpleTextStore::open(backend.clone())
                .with_context(|| format!("loading whiteout store for {dir:?}"))?,
        );
        lowers.push(layer::Layer::new(backend, store));
    }

    Overlay::new(top, lowers).context("building overlay")
}

fn run(args: Args) -> Result<()> {
    let overlay = build_overlay(&args)?;

    match &args.command {
        Command::Ls { path } => {
            let mut dir = overlay.open(path).with_context(|| format!("open {path}"))?;
            for name in dir.readdirnames(0).with_context(|| format!("readdir {path}"))? {
                println!("{name}");
            }
        }
        Command::Cat { path } => {
            let mut file = overlay.open(path).with_context(|| format!("open {path}"))?;
            let mut buf = Vec::new();
            loop {
                let mut chunk = [0u8; 4096];
                let n = file.read(&mut chunk).with_context(|| format!("read {path}"))?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
        }
        Command::Rm { path } => {
            overlay.remove(path).with_context(|| format!("remove {path}"))?;
        }
        Command::Write { path, content } => {
            let mut file = overlay
                .open_file(path, OpenFlags::write_create_truncate(), 0o644)
                .with_context(|| format!("open_file {path}"))?;
            file.write(content.as_bytes()).with_context(|| format!("write {path}"))?;
            file.close().with_context(|| format!("close {path}"))?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    cliutil::cli_main(|| run(args), Config::default())
}
