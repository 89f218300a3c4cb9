//! Telegram front end: reposts clips from allow-listed links as videos.
//!
//! A message either starts with the prefix (`<prefix> <url> [trim flags]`)
//! or merely contains a supported link. Both end up as a [`ClipRequest`] that
//! goes through the shared [`DownloadManager`], one download at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use teloxide::payloads::{SendMessageSetters, SendVideoSetters};
use teloxide::prelude::*;
use teloxide::types::{InputFile, ReplyParameters};
use tracing::{error, info, warn};

use crate::constants::{CLIP_EXTENSION, MSG_CLIP_FAILED};
use crate::download::{DownloadError, DownloadManager};
use crate::extractor::RequestOptions;
use crate::parsing::{ClipRequest, Invocation, ParseError, RegexMap, UrlExtractor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Clip,
    Link,
}

#[derive(Clone)]
pub struct ClipBot {
    prefix: String,
    router: Arc<RegexMap<Route>>,
    urls: UrlExtractor,
    downloads: DownloadManager,
}

impl ClipBot {
    pub fn new<S: AsRef<str>>(prefix: &str, domains: &[S], downloads: DownloadManager) -> Result<Self, regex::Error> {
        let mut router = RegexMap::new();
        router.insert(&format!(r"^\s*{}(\s|$)", regex::escape(prefix)), Route::Clip)?;
        for domain in domains {
            router.insert(&format!(r"(^|[\s/.]){}", regex::escape(domain.as_ref())), Route::Link)?;
        }

        Ok(Self {
            prefix: prefix.to_string(),
            router: Arc::new(router),
            urls: UrlExtractor::new(),
            downloads,
        })
    }

    /// What `text` asks for, if anything. Malformed trim flags are an error.
    pub fn plan(&self, text: &str) -> Result<Option<ClipRequest>, ParseError> {
        match self.router.first(text) {
            Some(Route::Clip) => {
                let invocation =
                    Invocation::parse(text.trim_start(), &self.prefix).ok_or(ParseError::MissingInput)?;
                let mut tokens = vec![invocation.command];
                tokens.extend(invocation.args);

                let request = ClipRequest::parse(&tokens)?;
                if self.downloads.is_supported(&request.url) {
                    Ok(Some(request))
                } else {
                    info!(url = %request.url, "ignoring link outside the allow-list");
                    Ok(None)
                }
            }
            Some(Route::Link) => Ok(self
                .urls
                .extract(text)
                .filter(|url| self.downloads.is_supported(url))
                .map(|url| ClipRequest {
                    url: with_scheme(url),
                    trim: Default::default(),
                })),
            None => Ok(None),
        }
    }

    /// Fetch the clip as mp4 into `directory`.
    pub async fn download(&self, request: &ClipRequest, directory: &Path) -> Result<PathBuf, DownloadError> {
        let destination = directory.join(format!("clip.{CLIP_EXTENSION}"));
        let options = RequestOptions {
            trim: request.trim.clone(),
            ..RequestOptions::video(CLIP_EXTENSION)
        };
        self.downloads
            .enqueue_to(&request.url, destination, options)
            .wait()
            .await
    }
}

fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Poll for updates until Ctrl-C.
pub async fn run(bot: Bot, clips: ClipBot) {
    let handler = Update::filter_message().endpoint(on_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![clips])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn on_message(bot: Bot, msg: Message, clips: ClipBot) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let request = match clips.plan(text) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!(chat = %msg.chat.id, error = %e, "rejected clip request");
            bot.send_message(msg.chat.id, e.to_string())
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
            return Ok(());
        }
    };

    // removed with everything in it once the reply is sent
    let directory = match tempfile::tempdir() {
        Ok(directory) => directory,
        Err(e) => {
            error!(error = %e, "failed to create scratch directory");
            return Ok(());
        }
    };

    info!(chat = %msg.chat.id, url = %request.url, "downloading clip");
    match clips.download(&request, directory.path()).await {
        Ok(path) => {
            bot.send_video(msg.chat.id, InputFile::file(path))
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
        Err(e) => {
            error!(url = %request.url, error = %e, "clip download failed");
            bot.send_message(msg.chat.id, MSG_CLIP_FAILED)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractorError, MediaExtractor, MediaInfo};
    use crate::parsing::{DomainFilter, TrimArgs};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct BrokenExtractor;

    #[async_trait]
    impl MediaExtractor for BrokenExtractor {
        async fn resolve(&self, url: &str, _options: &RequestOptions) -> Result<MediaInfo, ExtractorError> {
            Ok(MediaInfo { id: url.to_string(), title: url.to_string() })
        }

        async fn fetch(&self, _url: &str, _destination: &Path, _options: &RequestOptions) -> Result<(), ExtractorError> {
            Err(ExtractorError::Failed("HTTP Error 403: Forbidden".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingExtractor {
        requests: Mutex<Vec<(String, RequestOptions)>>,
    }

    #[async_trait]
    impl MediaExtractor for RecordingExtractor {
        async fn resolve(&self, url: &str, _options: &RequestOptions) -> Result<MediaInfo, ExtractorError> {
            Ok(MediaInfo { id: url.to_string(), title: url.to_string() })
        }

        async fn fetch(&self, url: &str, destination: &Path, options: &RequestOptions) -> Result<(), ExtractorError> {
            self.requests.lock().unwrap().push((url.to_string(), options.clone()));
            tokio::fs::write(destination, b"video").await.unwrap();
            Ok(())
        }
    }

    fn clip_bot(extractor: Arc<dyn MediaExtractor>) -> ClipBot {
        let domains = ["youtube.com", "youtu.be", "tiktok.com"];
        let downloads = DownloadManager::new(
            extractor,
            std::env::temp_dir(),
            DomainFilter::new(domains),
            Vec::new(),
        );
        ClipBot::new("mya", &domains, downloads).unwrap()
    }

    #[test]
    fn links_in_chatter_become_plain_clips() {
        let bot = clip_bot(Arc::new(RecordingExtractor::default()));

        let request = bot.plan("lol look https://vm.tiktok.com/ZMLJPCvmE/ wow").unwrap().unwrap();
        assert_eq!(request.url, "https://vm.tiktok.com/ZMLJPCvmE/");
        assert!(request.trim.is_empty());

        let request = bot.plan("vm.tiktok.com/ZMLJPCvmE/").unwrap().unwrap();
        assert_eq!(request.url, "https://vm.tiktok.com/ZMLJPCvmE/");
    }

    #[test]
    fn unrelated_messages_are_ignored() {
        let bot = clip_bot(Arc::new(RecordingExtractor::default()));

        assert_eq!(bot.plan("good morning").unwrap(), None);
        assert_eq!(bot.plan("see https://example.com/video").unwrap(), None);
        assert_eq!(bot.plan("mya https://example.com/video -ss 5").unwrap(), None);
    }

    #[test]
    fn prefixed_messages_carry_trim_flags() {
        let bot = clip_bot(Arc::new(RecordingExtractor::default()));

        let request = bot
            .plan("mya https://youtu.be/abc -ss 1:30 -t 10 -c copy")
            .unwrap()
            .unwrap();
        assert_eq!(request.url, "https://youtu.be/abc");
        assert_eq!(
            request.trim,
            TrimArgs {
                start: Some("1:30".to_string()),
                duration: Some("10".to_string()),
                end: None,
                codec_copy: true,
            }
        );
    }

    #[test]
    fn prefixed_messages_reject_other_flags() {
        let bot = clip_bot(Arc::new(RecordingExtractor::default()));

        assert_eq!(
            bot.plan("mya https://youtu.be/abc -vf hflip"),
            Err(ParseError::UnsupportedFlag("-vf".to_string()))
        );
        assert_eq!(bot.plan("mya"), Err(ParseError::MissingInput));
    }

    #[tokio::test]
    async fn downloads_clip_as_mp4_with_trim() {
        let extractor = Arc::new(RecordingExtractor::default());
        let bot = clip_bot(extractor.clone());
        let directory = tempfile::tempdir().unwrap();

        let request = bot.plan("mya -i https://youtu.be/abc -to 00:00:05").unwrap().unwrap();
        let path = bot.download(&request, directory.path()).await.unwrap();

        assert_eq!(path, directory.path().join("clip.mp4"));
        assert!(path.is_file());

        let requests = extractor.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (url, options) = &requests[0];
        assert_eq!(url, "https://youtu.be/abc");
        assert_eq!(options.video_format.as_deref(), Some("mp4"));
        assert_eq!(options.trim.end.as_deref(), Some("00:00:05"));
    }

    #[tokio::test]
    async fn failed_clip_download_is_reported() {
        let bot = clip_bot(Arc::new(BrokenExtractor));
        let directory = tempfile::tempdir().unwrap();

        let request = bot.plan("https://youtu.be/abc").unwrap().unwrap();
        assert!(bot.download(&request, directory.path()).await.is_err());
        assert!(!directory.path().join("clip.mp4").exists());
    }
}
