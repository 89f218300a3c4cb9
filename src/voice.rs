use std::path::Path;
use std::sync::Arc;

use poise::serenity_prelude as serenity;
use serenity::{async_trait, ChannelId, CreateAttachment, CreateMessage, GuildId, Http};
use songbird::input::File as SongbirdFile;
use songbird::tracks::TrackHandle;
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_VOLUME, MSG_OUT_OF_TRACKS};
use crate::definitions::{CommandError, Context as DiscordContext, Data, Error, GuildState};
use crate::playback::{Advance, Ticket};
use crate::track::{now, Track};
use crate::track_list::{TrackRef, TrackSource};

/// The voice channel the command author sits in.
pub fn get_vc_id(ctx: DiscordContext<'_>) -> Result<ChannelId, CommandError> {
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;

    let voice_state = ctx
        .serenity_context()
        .cache
        .guild(guild_id)
        .and_then(|g| g.voice_states.get(&ctx.author().id).cloned());

    voice_state
        .and_then(|vs| vs.channel_id)
        .ok_or(CommandError::NoVoiceChannel)
}

/// Everything needed to drive one guild's voice connection outside a command.
#[derive(Clone)]
pub struct VoiceLink {
    data: Data,
    manager: Arc<Songbird>,
    http: Arc<Http>,
    guild_id: GuildId,
}

impl VoiceLink {
    pub async fn new(ctx: &serenity::Context, data: Data, guild_id: GuildId) -> Result<Self, Error> {
        let manager = songbird::get(ctx)
            .await
            .ok_or("songbird was not registered with the client")?;
        Ok(Self {
            data,
            manager,
            http: ctx.http.clone(),
            guild_id,
        })
    }

    pub async fn from_ctx(ctx: DiscordContext<'_>) -> Result<Self, Error> {
        let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
        Self::new(ctx.serenity_context(), ctx.data().clone(), guild_id).await
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Join `channel`, leaving the current one first if it differs.
    pub async fn join_vc(&self, state: &mut GuildState, channel: ChannelId) -> Result<(), Error> {
        if state.voice_channel.is_some_and(|active| active != channel) {
            self.leave_vc(state).await;
        }

        info!(guild = %self.guild_id, channel = %channel, "joining voice channel");
        self.manager.join(self.guild_id, channel).await?;
        state.voice_channel = Some(channel);
        Ok(())
    }

    pub async fn leave_vc(&self, state: &mut GuildState) {
        info!(guild = %self.guild_id, "leaving voice channel");
        state.reset();
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!(guild = %self.guild_id, error = %e, "failed to leave voice channel");
        }
    }

    /// Carry out what the queue asked for after it moved.
    pub async fn apply(&self, state: &mut GuildState, mut advance: Advance) {
        loop {
            match advance {
                Advance::Play(track) => match self.start(state, &track).await {
                    Ok(()) => return,
                    Err(e) => {
                        error!(guild = %self.guild_id, track = %track, error = %e, "failed to start track");
                        state.playback.abandon_current();
                        if self.manager.get(self.guild_id).is_none() {
                            return;
                        }
                        let library = self.data.library.read().await;
                        advance = state.playback.advance(&library, now(), &mut rand::rng());
                    }
                },
                Advance::Idle => return,
                Advance::Exhausted => {
                    self.say(state, MSG_OUT_OF_TRACKS).await;
                    return;
                }
            }
        }
    }

    /// Queue `track`, starting it right away when nothing is playing.
    pub async fn enqueue(&self, state: &mut GuildState, track: TrackRef) {
        if let Some(track) = state.playback.enqueue(track) {
            self.apply(state, Advance::Play(track)).await;
        }
    }

    async fn start(&self, state: &mut GuildState, track: &TrackRef) -> Result<(), Error> {
        let (path, volume) = {
            let library = self.data.library.read().await;
            let entry = library
                .get(track)
                .ok_or_else(|| CommandError::NothingToPlay(track.name.clone()))?;
            (entry.file_path.clone(), entry.volume)
        };

        let call = self
            .manager
            .get(self.guild_id)
            .ok_or(CommandError::NoVoiceChannel)?;
        let handle = {
            let mut call = call.lock().await;
            call.play_only_input(SongbirdFile::new(path).into())
        };

        handle.set_volume(volume as f32 / DEFAULT_VOLUME as f32)?;
        handle.add_event(
            VoiceEvent::Track(TrackEvent::End),
            TrackEndNotifier { link: self.clone(), failed: false },
        )?;
        handle.add_event(
            VoiceEvent::Track(TrackEvent::Error),
            TrackEndNotifier { link: self.clone(), failed: true },
        )?;
        state.set_handle(handle);
        Ok(())
    }

    async fn track_ended(&self, handle: &TrackHandle, failed: bool) {
        let guild = self.data.guild(self.guild_id).await;
        let mut state = guild.lock().await;
        if !state.is_current(handle) {
            debug!(guild = %self.guild_id, "ignoring end of a stale track");
            return;
        }
        state.clear_handle();
        if failed {
            warn!(guild = %self.guild_id, "track stopped on a playback error");
            state.playback.transport_failed();
        }
        debug!(guild = %self.guild_id, state = ?state.state(), "track ended");

        let advance = {
            let mut library = self.data.library.write().await;
            state.playback.finish(&mut library, now(), &mut rand::rng())
        };
        self.apply(&mut state, advance).await;
    }

    /// Wait for a download, register it and fill the place `ticket` holds.
    pub async fn play_when_downloaded(self, url: String, ticket: Ticket) {
        match self.download_track(&url).await {
            Some(track) => {
                let guild = self.data.guild(self.guild_id).await;
                let mut state = guild.lock().await;
                if let Some(track) = state.playback.fulfil(ticket, track) {
                    self.apply(&mut state, Advance::Play(track)).await;
                }
            }
            None => {
                let guild = self.data.guild(self.guild_id).await;
                let mut state = guild.lock().await;
                let advance = {
                    let library = self.data.library.read().await;
                    state.playback.cancel(ticket, &library, now(), &mut rand::rng())
                };
                self.apply(&mut state, advance).await;
            }
        }
    }

    async fn download_track(&self, url: &str) -> Option<TrackRef> {
        let handle = match self.data.downloads.enqueue(url).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(url, error = %e, "could not schedule download");
                self.say_to_active(&e.to_string()).await;
                return None;
            }
        };

        let path = match handle.wait().await {
            Ok(path) => path,
            Err(e) => {
                error!(url, error = %e, "download failed");
                self.say_to_active(&e.to_string()).await;
                return None;
            }
        };

        let mut library = self.data.library.write().await;
        let name = match library
            .downloads
            .add_track(Track::unplayed(&path).with_url(url), true)
        {
            Ok(name) => name,
            Err(e) => {
                error!(url, error = %e, "failed to register download");
                return None;
            }
        };
        if let Err(e) = library.write_to_files() {
            error!(error = %e, "failed to persist track lists");
        }
        Some(TrackRef::new(TrackSource::Downloads, name))
    }

    pub async fn say(&self, state: &GuildState, text: &str) {
        let Some(channel) = state.text_channel else {
            warn!(guild = %self.guild_id, text, "no active text channel to talk to");
            return;
        };
        if let Err(e) = channel.say(&self.http, text).await {
            error!(guild = %self.guild_id, error = %e, "failed to send message");
        }
    }

    async fn say_to_active(&self, text: &str) {
        let guild = self.data.guild(self.guild_id).await;
        let state = guild.lock().await;
        self.say(&state, text).await;
    }
}

/// Post `text` with the file at `path` attached.
pub async fn send_file(http: &Http, channel: ChannelId, text: Option<&str>, path: &Path) -> Result<(), Error> {
    let mut message = CreateMessage::new().add_file(CreateAttachment::path(path).await?);
    if let Some(text) = text {
        message = message.content(text);
    }
    channel.send_message(http, message).await?;
    Ok(())
}

struct TrackEndNotifier {
    link: VoiceLink,
    failed: bool,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(tracks) = ctx {
            for (_, handle) in tracks.iter() {
                self.link.track_ended(handle, self.failed).await;
            }
        }
        None
    }
}

/// Leave the voice channel once everybody else did.
pub async fn leave_if_alone(ctx: &serenity::Context, data: &Data, guild_id: GuildId, left: ChannelId) -> Result<(), Error> {
    let guild = data.guild(guild_id).await;
    let mut state = guild.lock().await;
    if state.voice_channel != Some(left) {
        return Ok(());
    }

    let members = ctx
        .cache
        .guild(guild_id)
        .map(|g| {
            g.voice_states
                .values()
                .filter(|vs| vs.channel_id == Some(left))
                .count()
        })
        .unwrap_or(0);

    if members <= 1 {
        let link = VoiceLink::new(ctx, data.clone(), guild_id).await?;
        link.leave_vc(&mut state).await;
    }
    Ok(())
}
