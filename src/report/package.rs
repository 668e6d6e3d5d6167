//! Evidence package and alert log writers.

use crate::models::{Alert, EvidencePackage};
use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Writes one immutable JSON file per evidence package.
#[derive(Debug)]
pub struct PackageWriter {
    dir: PathBuf,
    seq: AtomicU64,
}

impl PackageWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a package and return its path. Never overwrites an existing file.
    pub fn write(&self, package: &EvidencePackage) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}_{}_{}_{:04}.json",
            sanitize(&package.identifier),
            sanitize(&package.source),
            package.created_at.format("%Y%m%d_%H%M%S"),
            seq
        );
        let path = self.dir.join(file_name);

        let json = serde_json::to_string_pretty(package)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create package {}", path.display()))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        Ok(path)
    }
}

/// Append-only JSON Lines log of raised alerts.
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, alert: &Alert) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open alert log {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(alert)?)?;
        Ok(())
    }
}

/// Make a string safe to use in a file name.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
