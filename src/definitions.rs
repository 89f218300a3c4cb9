use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use poise::serenity_prelude::{ChannelId, GuildId};
use songbird::tracks::TrackHandle;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::config::Config;
use crate::download::{DownloadError, DownloadManager};
use crate::playback::{PlaybackQueue, PlaybackState};
use crate::storage::{DataDirs, StorageError};
use crate::track_list::{Library, TrackListError};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Failed preconditions and bad user input; rendered back to the channel.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("this only works in a server")]
    NotInGuild,
    #[error("no active text channel")]
    NoTextChannel,
    #[error("no active voice channel")]
    NoVoiceChannel,
    #[error("could not find anything to play for `{0}`")]
    NothingToPlay(String),
    #[error("could not find directory `{0}`")]
    UnknownDirectory(String),
    #[error("permission to `{0}` denied")]
    PermissionDenied(String),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(path) => Self::UnknownDirectory(path),
            StorageError::PermissionDenied(path) => Self::PermissionDenied(path),
            other => Self::Storage(other),
        }
    }
}

/// Voice and playback state of one guild.
pub struct GuildState {
    pub playback: PlaybackQueue,
    pub text_channel: Option<ChannelId>,
    pub voice_channel: Option<ChannelId>,
    current: Option<TrackHandle>,
}

impl GuildState {
    pub fn new(playback: PlaybackQueue) -> Self {
        Self {
            playback,
            text_channel: None,
            voice_channel: None,
            current: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.playback.state(self.voice_channel.is_some())
    }

    /// Whether `handle` belongs to the track this guild is streaming.
    pub fn is_current(&self, handle: &TrackHandle) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.uuid() == handle.uuid())
    }

    pub fn set_handle(&mut self, handle: TrackHandle) {
        self.current = Some(handle);
    }

    pub fn clear_handle(&mut self) {
        self.current = None;
    }

    /// Ask the transport to stop; its end event advances the queue.
    pub fn stop_transport(&self) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.stop() {
                warn!(error = %e, "failed to stop track");
            }
        }
    }

    /// Forget the connection and everything that was playing on it.
    pub fn reset(&mut self) {
        self.playback.stop();
        self.playback.abandon_current();
        self.current = None;
        self.voice_channel = None;
    }
}

// Defines user data; cloned into the voice event handlers as well
#[derive(Clone)]
pub struct Data {
    pub config: Arc<Config>,
    pub dirs: DataDirs,
    pub library: Arc<RwLock<Library>>,
    pub downloads: DownloadManager,
    guilds: Arc<RwLock<HashMap<GuildId, Arc<Mutex<GuildState>>>>>,
    reboot: Arc<AtomicBool>,
}

impl Data {
    pub fn new(config: Arc<Config>, library: Library, downloads: DownloadManager) -> Self {
        Self {
            dirs: config.data_dirs(),
            config,
            library: Arc::new(RwLock::new(library)),
            downloads,
            guilds: Arc::new(RwLock::new(HashMap::new())),
            reboot: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn guild(&self, guild_id: GuildId) -> Arc<Mutex<GuildState>> {
        if let Some(state) = self.guilds.read().await.get(&guild_id) {
            return state.clone();
        }
        let mut guilds = self.guilds.write().await;
        guilds
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(GuildState::new(PlaybackQueue::new(
                    self.config.cooldown(),
                ))))
            })
            .clone()
    }

    pub fn request_reboot(&self) {
        self.reboot.store(true, Ordering::SeqCst);
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot.load(Ordering::SeqCst)
    }

    pub async fn persist(&self) -> Result<(), TrackListError> {
        self.library.read().await.write_to_files()
    }
}
