//! Per-submission output archive (SPEC_FULL.md §C.1): an opportunistic `output.zip` of every
//! produced user-output file, written next to the submitted source. Disabled by default — this is
//! a debugging aid, not needed for scoring — and opt-in via a `Challenge` built with
//! [`Challenge::with_archive`].
//!
//! A single mutex guards the writer (§5 "a single write-mutex guards the optional user-output
//! archive if implemented"): `zip::ZipWriter` is not safely shared across threads on its own, and
//! Execute tasks for different testdatas of the same challenge run concurrently.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub struct OutputArchive {
    /// `None` once [`OutputArchive::finish`] has run: finishing a `ZipWriter` consumes it (it
    /// writes the central directory and returns the underlying file), so it has to be taken out
    /// of the mutex rather than called through a `&mut` borrow.
    writer: Mutex<Option<ZipWriter<File>>>,
}

impl OutputArchive {
    /// Create (or truncate) the archive at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output archive at {path:?}"))?;
        Ok(OutputArchive {
            writer: Mutex::new(Some(ZipWriter::new(file))),
        })
    }

    /// Write `data` as a new entry named `name`. Called once per testdata whose Execute produced
    /// output, regardless of whether that output ultimately scored as Accepted.
    pub fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().unwrap();
        let writer = guard
            .as_mut()
            .context("output archive already finished")?;
        writer
            .start_file(name, SimpleFileOptions::default())
            .with_context(|| format!("failed to start archive entry {name}"))?;
        std::io::Write::write_all(writer, data)
            .with_context(|| format!("failed to write archive entry {name}"))?;
        Ok(())
    }

    /// Write the central directory and close out the archive. Idempotent — a second call is a
    /// no-op, so `Summary::finish` can call it unconditionally without tracking whether it already
    /// ran.
    pub fn finish(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap();
        if let Some(writer) = guard.take() {
            writer.finish().context("failed to finalize output archive")?;
        }
        Ok(())
    }
}
