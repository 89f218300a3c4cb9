use rand::seq::IndexedRandom;
use poise::serenity_prelude::ChannelId;
use tracing::info;

use crate::constants::{MSG_OUT_OF_TRACKS, MSG_RADIO, RADIO_IMAGE};
use crate::definitions::{CommandError, Context, Error, GuildState};
use crate::download::DownloadError;
use crate::parsing::is_url;
use crate::track::now;
use crate::voice::{get_vc_id, send_file, VoiceLink};

/// Fails unless the bot sits in a voice channel of this guild.
fn require_voice(state: &GuildState) -> Result<(), CommandError> {
    state
        .voice_channel
        .map(|_| ())
        .ok_or(CommandError::NoVoiceChannel)
}

/// The channel to join before queueing anything, if the bot is not connected yet.
fn voice_to_join(state: &GuildState, requester: Option<ChannelId>) -> Result<Option<ChannelId>, CommandError> {
    match (state.voice_channel, requester) {
        (Some(_), _) => Ok(None),
        (None, Some(channel)) => Ok(Some(channel)),
        (None, None) => Err(CommandError::NoVoiceChannel),
    }
}

/// Connect to your voice channel
#[poise::command(prefix_command, guild_only)]
pub async fn connect(ctx: Context<'_>) -> Result<(), Error> {
    let link = VoiceLink::from_ctx(ctx).await?;
    let vc_id = get_vc_id(ctx)?;

    let guild = ctx.data().guild(link.guild_id()).await;
    let mut state = guild.lock().await;
    link.join_vc(&mut state, vc_id).await
}

/// Disconnect from the active voice channel
#[poise::command(prefix_command, guild_only)]
pub async fn disconnect(ctx: Context<'_>) -> Result<(), Error> {
    let link = VoiceLink::from_ctx(ctx).await?;
    let guild = ctx.data().guild(link.guild_id()).await;
    let mut state = guild.lock().await;
    require_voice(&state)?;

    link.leave_vc(&mut state).await;
    Ok(())
}

/// Play a link, a file from the audio or downloads directory, or `#` for a random pick
#[poise::command(prefix_command, guild_only)]
pub async fn play(ctx: Context<'_>, requests: Vec<String>) -> Result<(), Error> {
    let link = VoiceLink::from_ctx(ctx).await?;
    let data = ctx.data();
    let guild = data.guild(link.guild_id()).await;
    let mut state = guild.lock().await;

    if let Some(vc_id) = voice_to_join(&state, get_vc_id(ctx).ok())? {
        link.join_vc(&mut state, vc_id).await?;
    }

    for request in &requests {
        if request == "#" {
            let pick = {
                let library = data.library.read().await;
                state.playback.random_eligible(&library, now(), &mut rand::rng())
            };
            match pick {
                Some(track) => link.enqueue(&mut state, track).await,
                None => {
                    info!("none of the available tracks satisfy the cooldown rule");
                    ctx.say(MSG_OUT_OF_TRACKS).await?;
                }
            }
        } else if is_url(request) {
            let known = data.library.read().await.find_download_by_url(request);
            if let Some(track) = known {
                link.enqueue(&mut state, track).await;
            } else if !data.downloads.is_supported(request) {
                let e = CommandError::Download(DownloadError::UnsupportedUrl(request.clone()));
                ctx.say(e.to_string()).await?;
            } else {
                let ticket = state.playback.reserve(request);
                tokio::spawn(link.clone().play_when_downloaded(request.clone(), ticket));
            }
        } else {
            let pick = {
                let library = data.library.read().await;
                library
                    .find_by_partial_name(request)
                    .choose(&mut rand::rng())
                    .cloned()
            };
            match pick {
                Some(track) => link.enqueue(&mut state, track).await,
                None => info!(request, "could not find matching audio"),
            }
        }
    }
    Ok(())
}

/// Drop the current track without recording it and play the next one
#[poise::command(prefix_command, guild_only)]
pub async fn skip(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
    let guild = ctx.data().guild(guild_id).await;
    let mut state = guild.lock().await;
    require_voice(&state)?;

    if state.playback.skip() {
        state.stop_transport();
    }
    Ok(())
}

/// Play the next track; the current one keeps its play count but counts as recently played
#[poise::command(prefix_command, guild_only)]
pub async fn next(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
    let guild = ctx.data().guild(guild_id).await;
    let mut state = guild.lock().await;
    require_voice(&state)?;

    if state.playback.next() {
        state.stop_transport();
    }
    Ok(())
}

/// Stop playing, clear the queue and leave radio mode
#[poise::command(prefix_command, guild_only)]
pub async fn stop(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
    let guild = ctx.data().guild(guild_id).await;
    let mut state = guild.lock().await;
    require_voice(&state)?;

    if state.playback.stop() {
        state.stop_transport();
    }
    Ok(())
}

/// Keep playing random downloads until stopped
#[poise::command(prefix_command, guild_only)]
pub async fn radio(ctx: Context<'_>) -> Result<(), Error> {
    let link = VoiceLink::from_ctx(ctx).await?;
    let data = ctx.data();
    let guild = data.guild(link.guild_id()).await;
    let mut state = guild.lock().await;
    require_voice(&state)?;

    match data.dirs.image(RADIO_IMAGE) {
        Some(path) => send_file(ctx.http(), ctx.channel_id(), Some(MSG_RADIO), &path).await?,
        None => {
            ctx.say(MSG_RADIO).await?;
        }
    }

    let advance = {
        let library = data.library.read().await;
        state.playback.start_radio(&library, now(), &mut rand::rng())
    };
    link.apply(&mut state, advance).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackQueue;
    use chrono::TimeDelta;

    fn guild_state() -> GuildState {
        GuildState::new(PlaybackQueue::new(TimeDelta::hours(24)))
    }

    #[test]
    fn voice_guard_needs_a_connection() {
        let mut state = guild_state();
        assert!(matches!(require_voice(&state), Err(CommandError::NoVoiceChannel)));

        state.voice_channel = Some(ChannelId::new(1));
        assert!(require_voice(&state).is_ok());
    }

    #[test]
    fn play_joins_the_requesters_channel_first() {
        let state = guild_state();
        let requester = ChannelId::new(7);

        assert_eq!(voice_to_join(&state, Some(requester)).unwrap(), Some(requester));
    }

    #[test]
    fn play_without_any_voice_channel_queues_nothing() {
        let state = guild_state();

        let refused = voice_to_join(&state, None).unwrap_err();
        assert!(matches!(refused, CommandError::NoVoiceChannel));
        assert_eq!(refused.to_string(), "no active voice channel");
        assert!(!state.playback.is_playing());
        assert!(state.playback.status().queue.is_empty());
    }

    #[test]
    fn play_reuses_an_existing_connection() {
        let mut state = guild_state();
        state.voice_channel = Some(ChannelId::new(1));

        assert_eq!(voice_to_join(&state, None).unwrap(), None);
        assert_eq!(voice_to_join(&state, Some(ChannelId::new(2))).unwrap(), None);
    }
}
