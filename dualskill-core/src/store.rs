use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;

use crate::{Result, TransplantError};

/// Where container bytes come from and go to.
pub trait ContainerStore {
    fn load_file(&self, path: &Path) -> Result<Vec<u8>>;

    fn save_file(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Write several files. Implementations should get every file ready
    /// before replacing any of them.
    fn save_files(&self, files: &[(&Path, &[u8])]) -> Result<()> {
        for (path, bytes) in files {
            self.save_file(path, bytes)?;
        }
        Ok(())
    }
}

/// Plain filesystem store. Writes land in a temporary file next to the
/// destination and are renamed over it once complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStore;

impl FsStore {
    fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

impl ContainerStore for FsStore {
    fn load_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TransplantError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                TransplantError::Io(e)
            }
        })
    }

    fn save_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.save_files(&[(path, bytes)])
    }

    fn save_files(&self, files: &[(&Path, &[u8])]) -> Result<()> {
        // Dropped temp files clean themselves up if a later stage fails.
        let staged = files
            .iter()
            .map(|(path, bytes)| Self::stage(path, bytes).map(|tmp| (*path, tmp)))
            .collect::<Result<Vec<_>>>()?;

        for (path, tmp) in staged {
            tmp.persist(path).map_err(|e| TransplantError::Io(e.error))?;
            debug!("wrote \"{}\"", path.display());
        }
        Ok(())
    }
}

/// In-memory store, handy for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
    read_only: RefCell<BTreeSet<PathBuf>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &Path, bytes: Vec<u8>) {
        self.files.borrow_mut().insert(path.to_path_buf(), bytes);
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    /// Make every later write to `path` fail.
    pub fn set_read_only(&self, path: &Path) {
        self.read_only.borrow_mut().insert(path.to_path_buf());
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        if self.read_only.borrow().contains(path) {
            return Err(TransplantError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("\"{}\" is read-only", path.display()),
            )));
        }
        Ok(())
    }
}

impl ContainerStore for MemoryStore {
    fn load_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.get(path).ok_or_else(|| TransplantError::NotFound {
            path: path.to_path_buf(),
        })
    }

    fn save_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.save_files(&[(path, bytes)])
    }

    fn save_files(&self, files: &[(&Path, &[u8])]) -> Result<()> {
        for (path, _) in files {
            self.check_writable(path)?;
        }
        let mut stored = self.files.borrow_mut();
        for (path, bytes) in files {
            stored.insert(path.to_path_buf(), bytes.to_vec());
        }
        Ok(())
    }
}
