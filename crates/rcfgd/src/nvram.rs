// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key/value configuration store ("nvram").
//!
//! The engine only depends on the [`Nvram`] trait; persistence is the
//! store's concern. [`NvramStore`] is the stock implementation: an
//! in-memory concurrent map, optionally backed by a plain `key=value` file
//! that `reload` re-reads and `commit` rewrites atomically.

use dashmap::DashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Errors from store operations.
#[derive(Debug)]
pub enum NvramError {
    Io(io::Error),
    /// Key is empty or contains characters the file format cannot carry.
    BadName(String),
    /// `commit` on a store without a backing file.
    NoBacking,
}

impl fmt::Display for NvramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvramError::Io(e) => write!(f, "nvram I/O error: {}", e),
            NvramError::BadName(n) => write!(f, "bad nvram key: '{}'", n),
            NvramError::NoBacking => write!(f, "nvram store has no backing file"),
        }
    }
}

impl std::error::Error for NvramError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NvramError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NvramError {
    fn from(e: io::Error) -> Self {
        NvramError::Io(e)
    }
}

/// Key/value store consulted by the master and the protocol handlers.
pub trait Nvram: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str) -> Result<(), NvramError>;
    fn unset(&self, name: &str) -> Result<(), NvramError>;
    /// All pairs, sorted by key.
    fn list(&self) -> Vec<(String, String)>;
    /// Persist the current contents.
    fn commit(&self) -> Result<(), NvramError>;
    /// Drop the current contents and re-read the backing store. Returns the
    /// number of keys loaded.
    fn reload(&self) -> Result<usize, NvramError>;
}

/// DashMap-backed store with an optional `key=value` backing file.
pub struct NvramStore {
    map: DashMap<String, String>,
    path: Option<PathBuf>,
}

impl NvramStore {
    /// Purely in-memory store; `commit` fails, `reload` empties it.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            path: None,
        }
    }

    /// Store backed by `path`. The file is not read until [`Nvram::reload`]
    /// (or [`NvramStore::load`]) is called.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            map: DashMap::new(),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Replace the map contents with the backing file's rows.
    ///
    /// Lines are `key=value`; blank lines and `#` comments are skipped, and
    /// so is any line without a `=` (a malformed row never aborts the
    /// load). A missing file loads zero keys.
    pub fn load(&self) -> Result<usize, NvramError> {
        self.map.clear();
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("[nvram] config file {} not found", path.display());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let mut loaded = 0usize;
        let mut skipped = 0usize;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    self.map
                        .insert(key.trim().to_string(), value.trim().to_string());
                    loaded += 1;
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!(
                "[nvram] {} malformed line(s) skipped in {}",
                skipped,
                path.display()
            );
        }
        log::debug!("[nvram] loaded {} key(s) from {}", loaded, path.display());
        Ok(loaded)
    }

    fn valid_name(name: &str) -> bool {
        !name.is_empty() && !name.contains('=') && !name.contains('\n')
    }
}

impl Default for NvramStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Nvram for NvramStore {
    fn get(&self, name: &str) -> Option<String> {
        self.map.get(name).map(|v| v.value().clone())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), NvramError> {
        if !Self::valid_name(name) {
            return Err(NvramError::BadName(name.to_string()));
        }
        if value.contains('\n') {
            return Err(NvramError::BadName(name.to_string()));
        }
        self.map.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&self, name: &str) -> Result<(), NvramError> {
        if !Self::valid_name(name) {
            return Err(NvramError::BadName(name.to_string()));
        }
        self.map.remove(name);
        Ok(())
    }

    fn list(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs
    }

    fn commit(&self) -> Result<(), NvramError> {
        let Some(path) = &self.path else {
            return Err(NvramError::NoBacking);
        };
        let mut body = String::new();
        for (key, value) in self.list() {
            body.push_str(&key);
            body.push('=');
            body.push_str(&value);
            body.push('\n');
        }
        // Write-then-rename so a crash mid-commit never truncates the file.
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        log::debug!("[nvram] committed {} key(s) to {}", self.map.len(), path.display());
        Ok(())
    }

    fn reload(&self) -> Result<usize, NvramError> {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_unset() {
        let store = NvramStore::new();
        store.set("lan.ipaddr", "192.168.1.1").unwrap();
        assert_eq!(store.get("lan.ipaddr").as_deref(), Some("192.168.1.1"));
        store.unset("lan.ipaddr").unwrap();
        assert_eq!(store.get("lan.ipaddr"), None);
        // Unsetting an absent key is not an error.
        store.unset("lan.ipaddr").unwrap();
    }

    #[test]
    fn test_bad_names_rejected() {
        let store = NvramStore::new();
        assert!(matches!(store.set("", "x"), Err(NvramError::BadName(_))));
        assert!(matches!(store.set("a=b", "x"), Err(NvramError::BadName(_))));
        assert!(matches!(store.set("ok", "multi\nline"), Err(NvramError::BadName(_))));
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rcfgd.conf");
        fs::write(
            &path,
            "# comment\n\nlan.ipaddr=10.0.0.1\nbroken line\n=alsobroken\nwan.proto = dhcp \n",
        )
        .unwrap();
        let store = NvramStore::with_file(&path);
        assert_eq!(store.load().unwrap(), 2);
        assert_eq!(store.get("lan.ipaddr").as_deref(), Some("10.0.0.1"));
        assert_eq!(store.get("wan.proto").as_deref(), Some("dhcp"));
        assert_eq!(store.get("broken line"), None);
    }

    #[test]
    fn test_commit_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rcfgd.conf");
        let store = NvramStore::with_file(&path);
        store.set("b.key", "2").unwrap();
        store.set("a.key", "1").unwrap();
        store.commit().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        // Sorted output keeps commits diffable.
        assert_eq!(text, "a.key=1\nb.key=2\n");

        store.set("c.key", "3").unwrap();
        assert_eq!(store.reload().unwrap(), 2);
        assert_eq!(store.get("c.key"), None);
        assert_eq!(store.get("a.key").as_deref(), Some("1"));
    }

    #[test]
    fn test_commit_without_backing_fails() {
        let store = NvramStore::new();
        store.set("k", "v").unwrap();
        assert!(matches!(store.commit(), Err(NvramError::NoBacking)));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = NvramStore::with_file(dir.path().join("absent.conf"));
        assert_eq!(store.load().unwrap(), 0);
        assert!(store.list().is_empty());
    }
}
