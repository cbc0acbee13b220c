//! Directory-backed storage unit
//!
//! Each volume is a directory under the unit root and each shard file is a
//! regular file below it. Paths are validated so a caller can never escape
//! the unit root.

use crate::backend::{OpCounters, UnitBackend, UnitStats};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use stratum_core::error::{Result, StratumError};
use stratum_core::{ReadOutcome, StorageUnit};
use tracing::{debug, info};

/// Storage unit rooted at a local directory
pub struct PosixUnit {
    id: String,
    root: PathBuf,
    max_capacity: u64,
    counters: OpCounters,
}

impl PosixUnit {
    /// Open or create a unit at `root`
    pub fn open(id: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let id = id.into();
        let root = root.into();
        info!(unit = %id, path = ?root, "Opening POSIX storage unit");
        fs::create_dir_all(&root)?;
        Ok(Self {
            id,
            root,
            max_capacity: 0,
            counters: OpCounters::default(),
        })
    }

    /// Report a capacity in stats (0 = unlimited)
    pub fn with_max_capacity(mut self, bytes: u64) -> Self {
        self.max_capacity = bytes;
        self
    }

    /// Unit root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `volume/path` on disk
    pub fn file_path(&self, volume: &str, path: &str) -> Result<PathBuf> {
        let volume_dir = self.volume_dir(volume)?;
        check_relative(path)?;
        Ok(volume_dir.join(path))
    }

    fn volume_dir(&self, volume: &str) -> Result<PathBuf> {
        check_relative(volume)?;
        if Path::new(volume).components().count() != 1 {
            return Err(StratumError::InvalidPath(format!("volume {:?} is nested", volume)));
        }
        Ok(self.root.join(volume))
    }

    fn map_not_found(err: std::io::Error, volume: &str, path: &str) -> StratumError {
        if err.kind() == ErrorKind::NotFound {
            StratumError::FileNotFound {
                volume: volume.to_string(),
                path: path.to_string(),
            }
        } else {
            err.into()
        }
    }

    /// Remove now-empty directories between a deleted file and its volume
    fn prune_empty_dirs(&self, volume_dir: &Path, file: &Path) {
        let mut dir = file.parent();
        while let Some(current) = dir {
            if current == volume_dir || !current.starts_with(volume_dir) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// Accept only plain relative paths made of normal components
fn check_relative(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StratumError::InvalidPath("empty path".to_string()));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(StratumError::InvalidPath(path.to_string()));
    }
    Ok(())
}

impl StorageUnit for PosixUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<ReadOutcome> {
        let file_path = self.file_path(volume, path)?;
        self.counters.read();

        let mut file = File::open(&file_path).map_err(|e| Self::map_not_found(e, volume, path))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => return Ok(ReadOutcome::EndOfData(filled)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ReadOutcome::Filled(filled))
    }

    fn append_file(&self, volume: &str, path: &str, data: &[u8]) -> Result<()> {
        let file_path = self.file_path(volume, path)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        file.write_all(data)?;
        // Shards must be on disk before the record that references them.
        file.sync_data()?;
        self.counters.write();

        debug!(unit = %self.id, volume, path, bytes = data.len(), "Appended shard data");
        Ok(())
    }

    fn delete_file(&self, volume: &str, path: &str) -> Result<()> {
        let volume_dir = self.volume_dir(volume)?;
        let file_path = self.file_path(volume, path)?;

        fs::remove_file(&file_path).map_err(|e| Self::map_not_found(e, volume, path))?;
        self.counters.delete();
        self.prune_empty_dirs(&volume_dir, &file_path);
        Ok(())
    }
}

impl UnitBackend for PosixUnit {
    fn exists(&self, volume: &str, path: &str) -> Result<bool> {
        Ok(self.file_path(volume, path)?.is_file())
    }

    fn list_files(&self, volume: &str) -> Result<Vec<String>> {
        let volume_dir = self.volume_dir(volume)?;
        let mut files = Vec::new();
        if volume_dir.is_dir() {
            walk(&volume_dir, &mut |file, _| {
                if let Ok(relative) = file.strip_prefix(&volume_dir) {
                    files.push(relative.to_string_lossy().replace('\\', "/"));
                }
            })?;
        }
        files.sort();
        Ok(files)
    }

    fn stats(&self) -> Result<UnitStats> {
        let mut file_count = 0u64;
        let mut bytes_used = 0u64;
        walk(&self.root, &mut |_, len| {
            file_count += 1;
            bytes_used += len;
        })?;
        Ok(self.counters.snapshot(file_count, bytes_used, self.max_capacity))
    }
}

/// Visit every regular file below `dir` with its length
fn walk(dir: &Path, visit: &mut dyn FnMut(&Path, u64)) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&entry.path(), visit)?;
        } else if file_type.is_file() {
            visit(&entry.path(), entry.metadata()?.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit() -> (TempDir, PosixUnit) {
        let dir = TempDir::new().unwrap();
        let unit = PosixUnit::open("disk-0", dir.path().join("disk-0")).unwrap();
        (dir, unit)
    }

    #[test]
    fn test_append_read_delete() {
        let (_dir, unit) = unit();
        unit.append_file("bucket", "obj/uuid/part.1", b"abc").unwrap();
        unit.append_file("bucket", "obj/uuid/part.1", b"def").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            unit.read_file("bucket", "obj/uuid/part.1", 1, &mut buf).unwrap(),
            ReadOutcome::Filled(4)
        );
        assert_eq!(&buf, b"bcde");
        assert_eq!(
            unit.read_file("bucket", "obj/uuid/part.1", 4, &mut buf).unwrap(),
            ReadOutcome::EndOfData(2)
        );

        assert_eq!(unit.list_files("bucket").unwrap(), vec!["obj/uuid/part.1"]);
        unit.delete_file("bucket", "obj/uuid/part.1").unwrap();
        assert!(!unit.exists("bucket", "obj/uuid/part.1").unwrap());
        // Empty object directories are pruned, the volume stays.
        assert!(!unit.root().join("bucket/obj").exists());
        assert!(unit.root().join("bucket").is_dir());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let (_dir, unit) = unit();
        let mut buf = [0u8; 4];
        assert!(matches!(
            unit.read_file("bucket", "missing", 0, &mut buf),
            Err(StratumError::FileNotFound { .. })
        ));
        assert!(matches!(
            unit.delete_file("bucket", "missing"),
            Err(StratumError::FileNotFound { .. })
        ));
        assert!(unit.list_files("bucket").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_traversal() {
        let (_dir, unit) = unit();
        for path in ["../escape", "a/../../b", "/etc/passwd", "./x", ""] {
            assert!(
                matches!(
                    unit.append_file("bucket", path, b"x"),
                    Err(StratumError::InvalidPath(_))
                ),
                "accepted {:?}",
                path
            );
        }
        assert!(matches!(
            unit.append_file("..", "x", b"x"),
            Err(StratumError::InvalidPath(_))
        ));
        assert!(matches!(
            unit.append_file("a/b", "x", b"x"),
            Err(StratumError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_stats() {
        let (_dir, unit) = unit();
        let unit = unit.with_max_capacity(1000);
        unit.append_file("bucket", "a", &[1u8; 100]).unwrap();
        unit.append_file("other", "b/c", &[1u8; 50]).unwrap();
        let mut buf = [0u8; 10];
        unit.read_file("bucket", "a", 0, &mut buf).unwrap();

        let stats = unit.stats().unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.bytes_used, 150);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.usage_percent(), 15.0);
    }
}
