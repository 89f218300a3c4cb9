use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use dotenv::dotenv;
use teloxide::Bot;
use tracing::info;

use mya_nee::config::{Config, CONFIG_FILE_NAME};
use mya_nee::download::DownloadManager;
use mya_nee::extractor::YtDlp;
use mya_nee::logging;
use mya_nee::telegram::{self, ClipBot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logging::init();

    let config = Config::load(Path::new(CONFIG_FILE_NAME))?;
    let bot = Bot::new(config.telegram_token()?);

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
    let clips = ClipBot::new(&config.prefix, &config.allowed_domains, downloads)?;

    info!("run");
    telegram::run(bot, clips).await;
    info!("terminate");
    Ok(())
}
