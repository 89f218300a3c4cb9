////////////////////////////////////////////////////////////////////////////////
/// Imports

use std::{
    collections::HashSet,
    path::Path,
    sync::Arc,
};

use anyhow::Context as _;

use songbird::SerenityInit;

use poise::serenity_prelude as serenity;

use serenity::{
    FullEvent,
    GatewayIntents,
    UserId,
};

use tracing::{error, info, warn};

// Read the bot token from a .env
use dotenv::dotenv;

use mya_nee::{
    cmd_admin::*,
    cmd_controls::*,
    cmd_library::*,
    config::{Config, CONFIG_FILE_NAME},
    constants::{MSG_PERMISSION_DENIED, MSG_UNKNOWN_COMMAND, REACTION_SUCCESS},
    definitions::{Context, Data, Error},
    download::DownloadManager,
    extractor::YtDlp,
    logging,
    track_list::Library,
    voice::leave_if_alone,
};

////////////////////////////////////////////////////////////////////////////////
/// Function definitions

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logging::init();

    let config = Arc::new(Config::load(Path::new(CONFIG_FILE_NAME))?);
    let token = config.discord_token()?.to_string();

    let dirs = config.data_dirs();
    dirs.create_all()?;

    let extractor = YtDlp::install(&config.libs_dir)
        .await
        .context("failed to set up yt-dlp and ffmpeg")?;
    let downloads = DownloadManager::new(
        Arc::new(extractor),
        &dirs.downloads,
        config.domain_filter(),
        config.user_agents.clone(),
    );

    loop {
        let library = Library::load(&dirs.audio, &dirs.downloads)?;
        let data = Data::new(config.clone(), library, downloads.clone());

        info!("run");
        run(&token, data.clone()).await?;
        info!("stop");

        if let Err(e) = data.persist().await {
            error!(error = %e, "failed to persist track lists");
        }

        if !data.reboot_requested() {
            info!("terminate");
            break;
        }
        info!("rebooting");
    }

    Ok(())
}

/// Run one gateway session until the shards are shut down.
async fn run(token: &str, data: Data) -> anyhow::Result<()> {
    let intents =
            GatewayIntents::MESSAGE_CONTENT
        |   GatewayIntents::GUILD_VOICE_STATES
        |   GatewayIntents::GUILDS
        |   GatewayIntents::GUILD_MESSAGES;

    let owners: HashSet<UserId> = data.config.owners.iter().copied().map(UserId::new).collect();
    let prefix = data.config.prefix.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                echo(),
                show(),
                connect(),
                disconnect(),
                play(),
                skip(),
                next(),
                stop(),
                radio(),
                list(),
                status(),
                reboot(),
                shutdown(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            owners,
            pre_command: |ctx| Box::pin(remember_text_channel(ctx)),
            post_command: |ctx| Box::pin(react(ctx)),
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, _framework, data| Box::pin(event_handler(ctx, event, data)),
            ..Default::default()
        })
        .setup(|_ctx, ready, _framework| {
            Box::pin(async move {
                info!("{} is connected!", ready.user.name);
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .register_songbird()
        .framework(framework)
        .await
        .context("error creating client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => result.context("client ended")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down.");
            shard_manager.shutdown_all().await;
        }
    }
    Ok(())
}

/// Commands reply where they were issued
async fn remember_text_channel(ctx: Context<'_>) {
    if let Some(guild_id) = ctx.guild_id() {
        let guild = ctx.data().guild(guild_id).await;
        guild.lock().await.text_channel = Some(ctx.channel_id());
    }
    info!(
        command = %ctx.command().qualified_name,
        user = %ctx.author().name,
        "register command"
    );
}

async fn react(ctx: Context<'_>) {
    if ctx.command().hide_in_help {
        return;
    }
    if let poise::Context::Prefix(prefix) = ctx {
        if let Err(e) = prefix.msg.react(ctx.http(), REACTION_SUCCESS).await {
            warn!(error = %e, "failed to react");
        }
    }
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => {
            error!(error = %error, "failed to start the framework");
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            warn!(command = %ctx.command().name, error = %error, "command failed");
            if let Err(e) = ctx.say(error.to_string()).await {
                error!(error = %e, "failed to report command error");
            }
        }
        poise::FrameworkError::UnknownCommand { ctx, msg, msg_content, .. } => {
            info!(content = msg_content, "unknown command");
            if let Err(e) = msg.reply(ctx, MSG_UNKNOWN_COMMAND).await {
                error!(error = %e, "failed to answer unknown command");
            }
        }
        poise::FrameworkError::NotAnOwner { ctx, .. } => {
            warn!(command = %ctx.command().name, user = %ctx.author().name, "privileged command refused");
            if let Err(e) = ctx.say(MSG_PERMISSION_DENIED).await {
                error!(error = %e, "failed to answer privileged command");
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!(error = %e, "error while handling error");
            }
        }
    }
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    data: &Data,
) -> Result<(), Error> {
    if let FullEvent::VoiceStateUpdate { old, new } = event {
        let left = old.as_ref().and_then(|old| old.channel_id);
        if let (Some(guild_id), Some(left)) = (new.guild_id, left) {
            if new.channel_id != Some(left) {
                leave_if_alone(ctx, data, guild_id, left).await?;
            }
        }
    }
    Ok(())
}
