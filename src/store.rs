//! Persisted list of named streams.
//!
//! The list lives in a JSON file holding an array of
//! [`StreamConnection`]s. A missing, empty or unreadable file yields the
//! built-in streams, so there is always something to connect to.

use crate::error::Result;
use crate::types::{StreamConnection, StreamTarget};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name and URL of the streams offered when nothing has been saved.
pub const BUILTIN_STREAMS: [(&str, &str); 2] = [
    ("Localhost", "http://localhost:8787/"),
    ("Console Dump", "https://consoledump.io/api/sse?id=31b2fe"),
];

/// JSON-file store for stream configurations.
#[derive(Debug, Clone)]
pub struct StreamStore {
    path: PathBuf,
}

impl StreamStore {
    /// Use the file at `path`. Nothing is read until [`load`](Self::load).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `pigeon/streams.json` under the platform config directory
    /// (`~/.config` on Linux, `~/Library/Application Support` on macOS).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pigeon").join("streams.json"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh copies of the built-in streams.
    pub fn builtin_streams() -> Vec<StreamConnection> {
        BUILTIN_STREAMS
            .iter()
            .map(|(name, url)| StreamConnection::new(*name, *url))
            .collect()
    }

    /// Load the saved streams, falling back to the built-ins.
    pub fn load(&self) -> Vec<StreamConnection> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                debug!("No stream list at {}: {}", self.path.display(), e);
                return Self::builtin_streams();
            },
        };

        match serde_json::from_slice::<Vec<StreamConnection>>(&data) {
            Ok(streams) if !streams.is_empty() => streams,
            Ok(_) => Self::builtin_streams(),
            Err(e) => {
                warn!("Ignoring unreadable stream list {}: {}", self.path.display(), e);
                Self::builtin_streams()
            },
        }
    }

    /// Replace the saved list.
    pub fn save(&self, streams: &[StreamConnection]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(streams)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Forget the saved list. The next [`load`](Self::load) returns the
    /// built-ins.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Find a stream by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<StreamConnection> {
        self.load()
            .into_iter()
            .find(|stream| stream.name.eq_ignore_ascii_case(name))
    }

    /// Add a stream, replacing any stream with the same name.
    ///
    /// The URL must be a valid http(s) URL.
    pub fn add(&self, name: &str, url: &str) -> Result<StreamConnection> {
        let target = StreamTarget::parse(url)?;
        let mut streams = self.load();
        let stream = StreamConnection::new(name, target.key());

        match streams
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.url = stream.url.clone(),
            None => streams.push(stream.clone()),
        }
        self.save(&streams)?;
        Ok(stream)
    }

    /// Remove a stream by name. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut streams = self.load();
        let before = streams.len();
        streams.retain(|stream| !stream.name.eq_ignore_ascii_case(name));
        if streams.len() == before {
            return Ok(false);
        }
        self.save(&streams)?;
        Ok(true)
    }
}
