use anyhow::{Context, Result};
use ini::Ini;
use indexmap::IndexMap;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::Runtime;

pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Ordered key/value content of one ini section.
pub type Section = IndexMap<String, String>;

/// An ini document on disk, only ever touched under its sidecar lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniFile {
    path: PathBuf,
}

impl IniFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IniFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn load<R: Runtime>(&self, runtime: &R) -> Result<Ini> {
        if !runtime.exists(&self.path) {
            return Ok(Ini::new());
        }
        let text = runtime.read_to_string(&self.path)?;
        Ini::load_from_str(&text).with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Read the document; a missing file reads as empty. Files in directories
    /// the user cannot write to (host config) are read without the lock.
    #[tracing::instrument(skip(runtime))]
    pub fn read<R: Runtime>(&self, runtime: &R) -> Result<Ini> {
        if !runtime.exists(&self.path) {
            debug!("{} does not exist", self.path.display());
            return Ok(Ini::new());
        }
        let _lock = match runtime.lock_exclusive(&self.lock_path(), LOCK_TIMEOUT) {
            Ok(lock) => Some(lock),
            Err(e) if is_permission_denied(&e) => {
                debug!("Reading {} unlocked: {:#}", self.path.display(), e);
                None
            }
            Err(e) => return Err(e),
        };
        self.load(runtime)
    }

    /// Read, edit and write back the document in one critical section.
    /// Nothing is written when `edit` fails.
    #[tracing::instrument(skip(runtime, edit))]
    pub fn update<R, T, F>(&self, runtime: &R, edit: F) -> Result<T>
    where
        R: Runtime,
        F: FnOnce(&mut Ini) -> Result<T>,
    {
        if let Some(parent) = self.path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let _lock = runtime.lock_exclusive(&self.lock_path(), LOCK_TIMEOUT)?;
        let mut ini = self.load(runtime)?;
        let result = edit(&mut ini)?;
        let mut buffer = Vec::new();
        ini.write_to(&mut buffer)?;
        runtime
            .write(&self.path, &buffer)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        debug!("Wrote {}", self.path.display());
        Ok(result)
    }

    /// Delete the document. The lock file stays so that waiting writers and
    /// later ones keep locking the same file.
    pub fn remove<R: Runtime>(&self, runtime: &R) -> Result<()> {
        let _lock = runtime.lock_exclusive(&self.lock_path(), LOCK_TIMEOUT)?;
        runtime.remove_file(&self.path)?;
        debug!("Removed {}", self.path.display());
        Ok(())
    }
}

fn is_permission_denied(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
}

pub fn section(ini: &Ini, name: &str) -> Section {
    ini.section(Some(name))
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Replace the whole section with `values`.
pub fn set_section(ini: &mut Ini, name: &str, values: &Section) {
    ini.delete(Some(name));
    let mut setter = ini.with_section(Some(name));
    for (key, value) in values {
        setter.set(key.as_str(), value.as_str());
    }
}
