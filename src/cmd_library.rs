use poise::serenity_prelude::{ChannelId, CreateAttachment, CreateMessage};
use tracing::{info, warn};

use crate::constants::{INTRUDER_IMAGE, MSG_PERMISSION_DENIED};
use crate::definitions::{CommandError, Context, Data, Error};
use crate::parsing::string_chunks;
use crate::playback::Status;
use crate::voice::send_file;

/// The channel this guild talks to, i.e. where the last command came from.
async fn require_text(ctx: Context<'_>) -> Result<ChannelId, CommandError> {
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
    let guild = ctx.data().guild(guild_id).await;
    let channel = guild.lock().await.text_channel;
    channel.ok_or(CommandError::NoTextChannel)
}

async fn say_chunks(ctx: Context<'_>, channel: ChannelId, lines: Vec<String>) -> Result<(), Error> {
    for chunk in string_chunks(lines) {
        channel.say(ctx.http(), chunk).await?;
    }
    Ok(())
}

/// Repeat every argument as its own message
#[poise::command(prefix_command, guild_only)]
pub async fn echo(ctx: Context<'_>, messages: Vec<String>) -> Result<(), Error> {
    let channel = require_text(ctx).await?;
    for message in messages {
        channel.say(ctx.http(), message).await?;
    }
    Ok(())
}

/// Post a random image whose name contains each argument
#[poise::command(prefix_command, guild_only)]
pub async fn show(ctx: Context<'_>, queries: Vec<String>) -> Result<(), Error> {
    let channel = require_text(ctx).await?;
    for query in &queries {
        let hit = ctx.data().dirs.random_image(query, &mut rand::rng());
        match hit {
            Some(path) => send_file(ctx.http(), channel, None, &path).await?,
            None => info!(query, "no hits for image request"),
        }
    }
    Ok(())
}

/// List `commands`, the `queue`, or a directory below the data directory
#[poise::command(prefix_command, guild_only)]
pub async fn list(ctx: Context<'_>, targets: Vec<String>) -> Result<(), Error> {
    let channel = require_text(ctx).await?;

    for target in &targets {
        let items = match target.as_str() {
            "commands" => command_descriptions(ctx),
            "queue" => queued_names(ctx).await?,
            subpath => match ctx.data().dirs.list(subpath).map_err(CommandError::from) {
                Ok(items) => items,
                Err(CommandError::PermissionDenied(_)) => {
                    warn!(subpath, user = %ctx.author().name, "directory listing refused");
                    deny(ctx, channel).await?;
                    continue;
                }
                Err(e @ CommandError::UnknownDirectory(_)) => {
                    info!(subpath, "no such directory to list");
                    channel.say(ctx.http(), e.to_string()).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            },
        };
        say_chunks(ctx, channel, items).await?;
    }
    Ok(())
}

/// Show what is playing, the radio flag and the queue
#[poise::command(prefix_command, guild_only)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let channel = require_text(ctx).await?;
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
    let status = ctx.data().guild(guild_id).await.lock().await.playback.status();

    channel.say(ctx.http(), format_status(&status)).await?;
    say_chunks(ctx, channel, status.queue).await
}

fn command_descriptions(ctx: Context<'_>) -> Vec<String> {
    ctx.framework()
        .options()
        .commands
        .iter()
        .filter(|command| !command.hide_in_help)
        .map(|command| {
            format!(
                "**{}**:\t{}",
                command.name,
                command.description.as_deref().unwrap_or_default()
            )
        })
        .collect()
}

async fn queued_names(ctx: Context<'_>) -> Result<Vec<String>, Error> {
    let guild_id = ctx.guild_id().ok_or(CommandError::NotInGuild)?;
    let guild = ctx.data().guild(guild_id).await;
    let state = guild.lock().await;
    Ok(state.playback.queued().map(|track| track.name.clone()).collect())
}

async fn deny(ctx: Context<'_>, channel: ChannelId) -> Result<(), Error> {
    let data: &Data = ctx.data();
    let mut message = CreateMessage::new().content(MSG_PERMISSION_DENIED);
    if let poise::Context::Prefix(prefix) = ctx {
        message = message.reference_message(prefix.msg);
    }
    if let Some(path) = data.dirs.image(INTRUDER_IMAGE) {
        message = message.add_file(CreateAttachment::path(&path).await?);
    }
    channel.send_message(ctx.http(), message).await?;
    Ok(())
}

fn format_status(status: &Status) -> String {
    let mut text = match &status.current {
        Some(name) => format!("**playing** '{name}'\n"),
        None => "**no current audio**\n".to_string(),
    };
    text.push_str(if status.radio {
        "**radio status**: on\n"
    } else {
        "**radio status**: off\n"
    });
    text.push_str("**queue**:\n");
    text
}
