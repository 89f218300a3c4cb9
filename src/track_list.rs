use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::TRACK_LIST_FILE_NAME;
use crate::track::Track;

#[derive(Debug, Error)]
pub enum TrackListError {
    #[error("a different track is already registered as `{0}`")]
    NameCollision(String),
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tracks of one directory, keyed by file stem and persisted next to them.
#[derive(Debug)]
pub struct TrackList {
    directory: PathBuf,
    file_path: PathBuf,
    tracks: BTreeMap<String, Track>,
}

impl TrackList {
    /// Read the persisted list of `directory` and reconcile it with the files on disk.
    pub fn load(directory: impl Into<PathBuf>) -> Result<Self, TrackListError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| TrackListError::Io {
            path: directory.clone(),
            source,
        })?;

        let file_path = directory.join(TRACK_LIST_FILE_NAME);
        let tracks = if file_path.is_file() {
            let content = fs::read_to_string(&file_path).map_err(|source| TrackListError::Io {
                path: file_path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| TrackListError::Json {
                path: file_path.clone(),
                source,
            })?
        } else {
            BTreeMap::new()
        };

        let mut list = Self { directory, file_path, tracks };
        list.update()?;
        Ok(list)
    }

    /// Drop entries whose file vanished and register untracked files.
    pub fn update(&mut self) -> Result<(), TrackListError> {
        let before = self.tracks.len();
        self.tracks.retain(|_, track| track.is_downloaded());
        let dropped = before - self.tracks.len();
        if dropped > 0 {
            info!(directory = ?self.directory, dropped, "dropped tracks with missing files");
        }

        let entries = fs::read_dir(&self.directory).map_err(|source| TrackListError::Io {
            path: self.directory.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if is_audio_file(&path) {
                self.add_track(Track::unplayed(path), true)?;
            }
        }

        Ok(())
    }

    /// Insert `track` under its name and return that name.
    ///
    /// Re-adding the same track is a no-op. A different track under the same
    /// name is an error unless `exist_ok` is set, in which case the registered
    /// one is kept.
    pub fn add_track(&mut self, track: Track, exist_ok: bool) -> Result<String, TrackListError> {
        let name = track.name();
        match self.tracks.get(&name) {
            None => {
                debug!(name = %name, "registering track");
                self.tracks.insert(name.clone(), track);
            }
            Some(existing) if existing.same_source(&track) || exist_ok => {}
            Some(_) => {
                warn!(name = %name, "attempt to add existing track to list");
                return Err(TrackListError::NameCollision(name));
            }
        }
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<&Track> {
        self.tracks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Track> {
        self.tracks.get_mut(name)
    }

    /// Every `(name, track)` pair accepted by `filter`.
    pub fn filter<F>(&self, mut filter: F) -> Vec<(&str, &Track)>
    where
        F: FnMut(&str, &Track) -> bool,
    {
        self.tracks
            .iter()
            .filter(|(name, track)| filter(name, track))
            .map(|(name, track)| (name.as_str(), track))
            .collect()
    }

    pub fn find_by_partial_name(&self, query: &str) -> Vec<(&str, &Track)> {
        self.filter(|name, _| name.contains(query))
    }

    pub fn find_by_url(&self, url: &str) -> Option<(&str, &Track)> {
        self.filter(|_, track| track.url == url).into_iter().next()
    }

    pub fn find_by_path(&self, path: &Path) -> Option<(&str, &Track)> {
        self.filter(|_, track| track.file_path == path).into_iter().next()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tracks.keys().map(String::as_str)
    }

    pub fn tracks(&self) -> &BTreeMap<String, Track> {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn write_to_file(&self) -> Result<(), TrackListError> {
        let json = to_json_4_spaces(&self.tracks).map_err(|source| TrackListError::Json {
            path: self.file_path.clone(),
            source,
        })?;
        fs::write(&self.file_path, json).map_err(|source| TrackListError::Io {
            path: self.file_path.clone(),
            source,
        })?;
        debug!(path = ?self.file_path, tracks = self.tracks.len(), "track list written");
        Ok(())
    }
}

/// Temporary rule: anything that is a file and not one of our JSON lists.
pub fn is_audio_file(path: &Path) -> bool {
    path.is_file()
        && !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn to_json_4_spaces<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(buffer)
}

////////////////////////////////////////////////////////////////////////////////
// Library

/// Which list a track belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Audio,
    Downloads,
}

/// Process-wide identity of a track.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub source: TrackSource,
    pub name: String,
}

impl TrackRef {
    pub fn new(source: TrackSource, name: impl Into<String>) -> Self {
        Self { source, name: name.into() }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Hand-curated clips plus downloaded ones, shared by every guild.
#[derive(Debug)]
pub struct Library {
    pub audio: TrackList,
    pub downloads: TrackList,
}

impl Library {
    pub fn load(audio_dir: &Path, download_dir: &Path) -> Result<Self, TrackListError> {
        let audio = TrackList::load(audio_dir)?;
        let downloads = TrackList::load(download_dir)?;
        info!(audio = audio.len(), downloads = downloads.len(), "library loaded");
        Ok(Self { audio, downloads })
    }

    pub fn list(&self, source: TrackSource) -> &TrackList {
        match source {
            TrackSource::Audio => &self.audio,
            TrackSource::Downloads => &self.downloads,
        }
    }

    pub fn list_mut(&mut self, source: TrackSource) -> &mut TrackList {
        match source {
            TrackSource::Audio => &mut self.audio,
            TrackSource::Downloads => &mut self.downloads,
        }
    }

    pub fn get(&self, track: &TrackRef) -> Option<&Track> {
        self.list(track.source).get(&track.name)
    }

    pub fn get_mut(&mut self, track: &TrackRef) -> Option<&mut Track> {
        self.list_mut(track.source).get_mut(&track.name)
    }

    /// Tracks whose name contains `query`; audio clips shadow downloads.
    pub fn find_by_partial_name(&self, query: &str) -> Vec<TrackRef> {
        for source in [TrackSource::Audio, TrackSource::Downloads] {
            let hits: Vec<TrackRef> = self
                .list(source)
                .find_by_partial_name(query)
                .into_iter()
                .map(|(name, _)| TrackRef::new(source, name))
                .collect();
            if !hits.is_empty() {
                return hits;
            }
        }
        Vec::new()
    }

    pub fn find_download_by_url(&self, url: &str) -> Option<TrackRef> {
        self.downloads
            .find_by_url(url)
            .map(|(name, _)| TrackRef::new(TrackSource::Downloads, name))
    }

    pub fn write_to_files(&self) -> Result<(), TrackListError> {
        self.downloads.write_to_file()?;
        self.audio.write_to_file()
    }
}
