use tracing::info;

use crate::definitions::{Context, Error};

/// Reset mya-nee and reconnect to discord
#[poise::command(prefix_command, owners_only, hide_in_help)]
pub async fn reboot(ctx: Context<'_>) -> Result<(), Error> {
    info!(user = %ctx.author().name, "reboot requested");
    ctx.data().request_reboot();
    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}

/// Disconnect and terminate
#[poise::command(prefix_command, owners_only, hide_in_help)]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), Error> {
    info!(user = %ctx.author().name, "shutdown requested");
    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}
