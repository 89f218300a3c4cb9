use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

use crate::constants::{AUDIO_DIR_NAME, DOWNLOAD_DIR_NAME, IMAGE_DIR_NAME};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("permission to `{0}` denied")]
    PermissionDenied(String),
    #[error("could not find directory `{0}`")]
    NotFound(String),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The data directory and the subdirectories the bots use.
#[derive(Clone, Debug)]
pub struct DataDirs {
    pub root: PathBuf,
    pub images: PathBuf,
    pub audio: PathBuf,
    pub downloads: PathBuf,
}

impl DataDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            images: root.join(IMAGE_DIR_NAME),
            audio: root.join(AUDIO_DIR_NAME),
            downloads: root.join(DOWNLOAD_DIR_NAME),
            root,
        }
    }

    pub fn create_all(&self) -> Result<(), StorageError> {
        for dir in [&self.root, &self.images, &self.audio, &self.downloads] {
            fs::create_dir_all(dir).map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Resolve `subpath` below the data root, refusing anything that escapes it.
    pub fn resolve_listing(&self, subpath: &str) -> Result<PathBuf, StorageError> {
        let root = self.root.canonicalize().map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })?;

        let directory = match root.join(subpath).canonicalize() {
            Ok(directory) if directory.is_dir() => directory,
            _ => return Err(StorageError::NotFound(subpath.to_string())),
        };

        if !directory.starts_with(&root) {
            warn!(requested = subpath, resolved = ?directory, "listing outside the data directory refused");
            return Err(StorageError::PermissionDenied(subpath.to_string()));
        }
        Ok(directory)
    }

    /// File stems inside `subpath`, sorted.
    pub fn list(&self, subpath: &str) -> Result<Vec<String>, StorageError> {
        let directory = self.resolve_listing(subpath)?;
        let entries = fs::read_dir(&directory).map_err(|source| StorageError::Io {
            path: directory.clone(),
            source,
        })?;

        let mut stems: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                entry
                    .path()
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .collect();
        stems.sort();
        Ok(stems)
    }

    /// A random image whose file name contains `query`.
    pub fn random_image<R>(&self, query: &str, rng: &mut R) -> Option<PathBuf>
    where
        R: Rng + ?Sized,
    {
        let hits = matching_files(&self.images, query);
        hits.choose(rng).cloned()
    }

    /// Path of a fixed image if it exists.
    pub fn image(&self, file_name: &str) -> Option<PathBuf> {
        let path = self.images.join(file_name);
        path.is_file().then_some(path)
    }
}

fn matching_files(directory: &Path, query: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(directory) else {
        return Vec::new();
    };
    let mut hits: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().contains(query))
        })
        .collect();
    hits.sort();
    hits
}
