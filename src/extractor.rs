use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use yt_dlp::client::deps::LibraryInstaller;

use crate::parsing::TrimArgs;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("yt-dlp failed: {0}")]
    Failed(String),
    #[error("unexpected metadata for {url}: {reason}")]
    Metadata { url: String, reason: String },
    #[error("failed to install {0}: {1}")]
    Install(&'static str, String),
}

/// Metadata needed to name a download before fetching it.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
}

/// Options scoped to a single request; nothing here is shared between calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    pub user_agent: Option<String>,
    /// Fetch audio only, converted to the given codec (e.g. `mp3`).
    pub audio_format: Option<String>,
    /// Container for video downloads (e.g. `mp4`).
    pub video_format: Option<String>,
    pub trim: TrimArgs,
}

impl RequestOptions {
    pub fn audio(codec: &str) -> Self {
        Self {
            audio_format: Some(codec.to_string()),
            ..Default::default()
        }
    }

    pub fn video(container: &str) -> Self {
        Self {
            video_format: Some(container.to_string()),
            ..Default::default()
        }
    }

    pub fn with_user_agent(&self, user_agent: Option<&str>) -> Self {
        Self {
            user_agent: user_agent.map(str::to_string),
            ..self.clone()
        }
    }
}

/// The video/audio extraction tool, treated as an opaque and fallible collaborator.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn resolve(&self, url: &str, options: &RequestOptions) -> Result<MediaInfo, ExtractorError>;

    async fn fetch(&self, url: &str, destination: &Path, options: &RequestOptions) -> Result<(), ExtractorError>;
}

/// Try the request once per user agent, then once with the tool's own default.
pub async fn resolve_with_fallback(
    extractor: &dyn MediaExtractor,
    url: &str,
    options: &RequestOptions,
    user_agents: &[String],
) -> Result<MediaInfo, ExtractorError> {
    let mut last_error = None;
    for user_agent in candidate_user_agents(user_agents) {
        match extractor.resolve(url, &options.with_user_agent(user_agent)).await {
            Ok(info) => return Ok(info),
            Err(error) => {
                warn!(url, ?user_agent, %error, "resolve attempt failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| ExtractorError::Failed(format!("no attempt made for {url}"))))
}

pub async fn fetch_with_fallback(
    extractor: &dyn MediaExtractor,
    url: &str,
    destination: &Path,
    options: &RequestOptions,
    user_agents: &[String],
) -> Result<(), ExtractorError> {
    let mut last_error = None;
    for user_agent in candidate_user_agents(user_agents) {
        match extractor.fetch(url, destination, &options.with_user_agent(user_agent)).await {
            Ok(()) => return Ok(()),
            Err(error) => {
                warn!(url, ?user_agent, %error, "download attempt failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| ExtractorError::Failed(format!("no attempt made for {url}"))))
}

fn candidate_user_agents(user_agents: &[String]) -> impl Iterator<Item = Option<&str>> {
    user_agents
        .iter()
        .map(|agent| Some(agent.as_str()))
        .chain(std::iter::once(None))
}

////////////////////////////////////////////////////////////////////////////////
// yt-dlp

/// Runs the `yt-dlp` binary installed in the libraries directory.
#[derive(Clone, Debug)]
pub struct YtDlp {
    program: PathBuf,
    ffmpeg: PathBuf,
}

impl YtDlp {
    pub fn new(libs_dir: &Path) -> Self {
        Self {
            program: libs_dir.join("yt-dlp"),
            ffmpeg: libs_dir.join("ffmpeg"),
        }
    }

    /// Install yt-dlp and ffmpeg into `libs_dir` if they aren't there.
    pub async fn install(libs_dir: &Path) -> Result<Self, ExtractorError> {
        tokio::fs::create_dir_all(libs_dir)
            .await
            .map_err(|source| ExtractorError::Spawn {
                program: "mkdir".to_string(),
                source,
            })?;

        let installer = LibraryInstaller::new(libs_dir.to_path_buf());
        let tool = Self::new(libs_dir);

        if !tool.ffmpeg.exists() {
            info!(path = ?tool.ffmpeg, "installing ffmpeg");
            installer
                .install_ffmpeg(None)
                .await
                .map_err(|e| ExtractorError::Install("ffmpeg", e.to_string()))?;
        }

        if !tool.program.exists() {
            info!(path = ?tool.program, "installing yt-dlp");
            installer
                .install_youtube(None)
                .await
                .map_err(|e| ExtractorError::Install("yt-dlp", e.to_string()))?;
        }

        Ok(tool)
    }

    fn command(&self, options: &RequestOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--ffmpeg-location")
            .arg(&self.ffmpeg);
        if let Some(user_agent) = &options.user_agent {
            command.arg("--user-agent").arg(user_agent);
        }
        command
    }

    async fn run(&self, mut command: Command) -> Result<Vec<u8>, ExtractorError> {
        let output = command.output().await.map_err(|source| ExtractorError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ExtractorError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    async fn resolve(&self, url: &str, options: &RequestOptions) -> Result<MediaInfo, ExtractorError> {
        let mut command = self.command(options);
        command.arg("--dump-single-json").arg("--skip-download").arg(url);

        let stdout = self.run(command).await?;
        let info = parse_info_json(url, &stdout)?;
        debug!(url, title = %info.title, "resolved media info");
        Ok(info)
    }

    async fn fetch(&self, url: &str, destination: &Path, options: &RequestOptions) -> Result<(), ExtractorError> {
        let mut command = self.command(options);

        // yt-dlp picks the extension itself
        let template = destination.with_extension("%(ext)s");
        command.arg("-o").arg(&template);

        if let Some(codec) = &options.audio_format {
            command.arg("-x").arg("--audio-format").arg(codec);
        }
        if let Some(container) = &options.video_format {
            command
                .arg("-f")
                .arg(format!("bestvideo[ext={container}]+bestaudio/best[ext={container}]/best"))
                .arg("--merge-output-format")
                .arg(container);
        }
        if !options.trim.is_empty() {
            command.arg("--downloader").arg("ffmpeg");
            let input = options.trim.input_args();
            if !input.is_empty() {
                command.arg("--downloader-args").arg(format!("ffmpeg_i:{}", input.join(" ")));
            }
            let output = options.trim.output_args();
            if !output.is_empty() {
                command.arg("--downloader-args").arg(format!("ffmpeg_o:{}", output.join(" ")));
            }
        }
        command.arg(url);

        info!(url, destination = ?destination, "downloading");
        self.run(command).await?;
        info!(url, destination = ?destination, "finished downloading");
        Ok(())
    }
}

/// Pull the fields we care about out of yt-dlp's info JSON.
pub fn parse_info_json(url: &str, raw: &[u8]) -> Result<MediaInfo, ExtractorError> {
    let metadata_error = |reason: String| ExtractorError::Metadata {
        url: url.to_string(),
        reason,
    };

    let value: Value = serde_json::from_slice(raw).map_err(|e| metadata_error(e.to_string()))?;
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| metadata_error(format!("missing `{name}`")))
    };

    Ok(MediaInfo {
        id: field("id")?,
        title: field("title")?,
    })
}
