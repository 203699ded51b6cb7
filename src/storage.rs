//! Durable filesystem the queue and the state snapshot are written through.
//! Paths are relative to the storage root and use `/` separators.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;

pub trait Storage {
    /// Writes a new file and syncs it; fails with `AlreadyExists` when `path`
    /// is taken.
    fn create_new(&self, path: &str, bytes: &[u8]) -> io::Result<()>;

    /// `None` when the file does not exist.
    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the file contents atomically.
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()>;

    /// Deleting a missing file is not an error.
    fn delete(&self, path: &str) -> io::Result<()>;

    /// File names directly under `dir`, sorted.
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;

    fn exists(&self, path: &str) -> bool;
}

/// [`Storage`] rooted at a directory on the host filesystem.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |full, part| full.join(part))
    }

    fn ensure_parent(full: &Path) -> io::Result<()> {
        match full.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
    }
}

impl Storage for DirStorage {
    fn create_new(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let full = self.resolve(path);
        Self::ensure_parent(&full)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&full)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        debug!("created {}", full.display());
        Ok(())
    }

    fn read(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let full = self.resolve(path);
        Self::ensure_parent(&full)?;
        let mut staging = full.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let mut file = File::create(&staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&staging, &full)
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(self.resolve(dir)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }
}
