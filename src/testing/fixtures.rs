//! Input fixtures: sandbox directories, sample lines and file writers.

use crate::config::ShardMap;
use crate::io::compression::auto_detect_writer;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Device types used by the production loader.
pub const DEVICE_TYPES: [&str; 4] = ["idfa", "gaid", "adid", "dvid"];

/// Shard map binding every device type in [`DEVICE_TYPES`] to a local address.
#[must_use]
pub fn default_shards() -> ShardMap {
    DEVICE_TYPES
        .iter()
        .zip(33013..)
        .map(|(label, port)| crate::config::ShardTarget {
            label: (*label).to_string(),
            address: format!("127.0.0.1:{port}"),
        })
        .collect()
}

/// Format one well-formed input line.
///
/// # Example
///
/// ```
/// use appsload::testing::line;
///
/// assert_eq!(line("idfa", "D1", 1.0, 2.0, &[42, 43]), "idfa\tD1\t1\t2\t42,43");
/// ```
#[must_use]
pub fn line(device_type: &str, device_id: &str, lat: f64, lon: f64, apps: &[u32]) -> String {
    let apps = apps
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("{device_type}\t{device_id}\t{lat}\t{lon}\t{apps}")
}

/// One valid line per device type in [`DEVICE_TYPES`].
#[must_use]
pub fn sample_lines() -> Vec<String> {
    vec![
        line("idfa", "1rfw452y52g2gq4g", 55.55, 42.42, &[1423, 43, 567, 3, 7, 23]),
        line("gaid", "7rfw452y52g2gq4g", 55.55, 42.42, &[7423, 424]),
        line("adid", "5rfw452y52g2gq4g", -12.5, 100.25, &[1, 2, 3]),
        line("dvid", "9rfw452y52g2gq4g", 0.0, 0.0, &[]),
    ]
}

/// Write `lines` to `path`, compressed according to its extension.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_lines<S: AsRef<str>>(path: impl AsRef<Path>, lines: &[S]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = auto_detect_writer(file, path)?;
    for line in lines {
        writer.write_all(line.as_ref().as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// A temporary input directory that is removed when dropped.
#[derive(Debug)]
pub struct InputDir {
    dir: TempDir,
}

impl InputDir {
    /// Create a new temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the directory.
    #[must_use]
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Glob pattern matching `glob` inside the directory.
    #[must_use]
    pub fn pattern(&self, glob: &str) -> String {
        format!("{}/{glob}", self.dir.path().display())
    }

    /// Sorted file names currently in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn file_names(&self) -> std::io::Result<Vec<String>> {
        let mut names = std::fs::read_dir(self.dir.path())?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shards_cover_device_types() {
        let shards = default_shards();
        assert_eq!(shards.len(), DEVICE_TYPES.len());
        assert_eq!(shards.address("idfa"), Some("127.0.0.1:33013"));
        assert_eq!(shards.address("dvid"), Some("127.0.0.1:33016"));
    }

    #[test]
    fn sample_lines_cover_device_types() {
        let lines = sample_lines();
        for device in DEVICE_TYPES {
            assert!(lines.iter().any(|l| l.starts_with(device)));
        }
    }
}
