//! Text handling shared by both bots: command splitting, URL detection,
//! message routing and the restricted trim-argument grammar.

use std::fmt::Display;

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use url::Url;

use crate::constants::LIST_CHUNK_SIZE;

////////////////////////////////////////////////////////////////////////////////
// Commands

/// A prefixed chat message split into a command name and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// `None` if `content` does not start with `prefix` or names no command.
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let rest = content.strip_prefix(prefix)?;
        let mut words = rest.split_whitespace().map(str::to_string);
        let command = words.next()?;
        Some(Self {
            command,
            args: words.collect(),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// URLs

const URL_PATTERN: &str = r"((?:(https?|s?ftp)://)?(?:www\.)?((?:(?:[A-Z0-9][A-Z0-9-]{0,61}[A-Z0-9]\.)+)([A-Z]{2,6})|(?:\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}))(?::(\d{1,5}))?(?:(/\S+)*))";

/// Finds the first URL-looking substring of free text.
#[derive(Clone, Debug)]
pub struct UrlExtractor {
    pattern: Regex,
}

impl UrlExtractor {
    pub fn new() -> Self {
        let pattern = RegexBuilder::new(URL_PATTERN)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|e| unreachable!("URL pattern is a valid regex: {e}"));
        Self { pattern }
    }

    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.pattern.find(text).map(|m| m.as_str())
    }
}

impl Default for UrlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// True if `text` parses as an absolute URL with a scheme, a host and a path.
pub fn is_url(text: &str) -> bool {
    Url::parse(text)
        .map(|url| !url.scheme().is_empty() && url.host_str().is_some() && !url.path().is_empty())
        .unwrap_or(false)
}

/// Allow-list of hosts we are willing to download from. Subdomains match.
#[derive(Clone, Debug, Default)]
pub struct DomainFilter {
    domains: Vec<String>,
}

impl DomainFilter {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim_start_matches("www.").to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn allows(&self, url: &str) -> bool {
        // bare `host/path` either fails to parse or parses with the host as scheme
        let parsed = Url::parse(url)
            .ok()
            .filter(|u| u.host_str().is_some())
            .or_else(|| Url::parse(&format!("https://{url}")).ok());
        let Some(host) = parsed.and_then(|u| u.host_str().map(str::to_ascii_lowercase)) else {
            return false;
        };
        self.domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Message routing

/// Ordered (pattern, responder) table. Entries are tried in registration order.
#[derive(Debug)]
pub struct RegexMap<T> {
    entries: Vec<(Regex, T)>,
}

impl<T> RegexMap<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, pattern: &str, responder: T) -> Result<&mut Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        self.entries.push((regex, responder));
        Ok(self)
    }

    pub fn first(&self, text: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .map(|(_, responder)| responder)
    }

    pub fn all<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.entries
            .iter()
            .filter(move |(regex, _)| regex.is_match(text))
            .map(|(_, responder)| responder)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for RegexMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Trim arguments

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("`{0}` is not an allowed option")]
    UnsupportedFlag(String),
    #[error("`{0}` needs a value")]
    MissingValue(String),
    #[error("`{value}` is not a valid time for `{flag}`")]
    InvalidTime { flag: String, value: String },
    #[error("only `-c copy` is allowed, got `-c {0}`")]
    InvalidCodec(String),
    #[error("`{0}` given more than once")]
    DuplicateFlag(String),
    #[error("`-t` and `-to` can't be combined")]
    ConflictingFlags,
    #[error("`{0}` is not a URL")]
    InvalidInput(String),
    #[error("no URL given")]
    MissingInput,
}

/// The media-trim flags users may pass through to ffmpeg.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrimArgs {
    pub start: Option<String>,
    pub duration: Option<String>,
    pub end: Option<String>,
    pub codec_copy: bool,
}

/// A download request: the input reference plus optional trimming.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipRequest {
    pub url: String,
    pub trim: TrimArgs,
}

impl TrimArgs {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Arguments placed before ffmpeg's `-i`.
    pub fn input_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (flag, value) in [("-ss", &self.start), ("-t", &self.duration), ("-to", &self.end)] {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }
        args
    }

    /// Arguments placed after ffmpeg's input.
    pub fn output_args(&self) -> Vec<String> {
        if self.codec_copy {
            vec!["-c".to_string(), "copy".to_string()]
        } else {
            Vec::new()
        }
    }
}

impl ClipRequest {
    /// Parse `[-i] <url> [-ss T] [-t T | -to T] [-c copy]` in any order.
    ///
    /// Anything outside that grammar is rejected, so nothing the user types
    /// reaches the downloader's command line unchecked.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, ParseError> {
        let time = Regex::new(r"^\d+(?::\d{1,2}){0,2}(?:\.\d+)?$")
            .unwrap_or_else(|e| unreachable!("time pattern is a valid regex: {e}"));

        let mut url: Option<String> = None;
        let mut trim = TrimArgs::default();
        let mut tokens = tokens.iter().map(AsRef::<str>::as_ref);

        while let Some(token) = tokens.next() {
            match token {
                "-ss" | "-t" | "-to" => {
                    let value = tokens.next().ok_or_else(|| ParseError::MissingValue(token.to_string()))?;
                    if !time.is_match(value) {
                        return Err(ParseError::InvalidTime {
                            flag: token.to_string(),
                            value: value.to_string(),
                        });
                    }
                    let slot = match token {
                        "-ss" => &mut trim.start,
                        "-t" => &mut trim.duration,
                        _ => &mut trim.end,
                    };
                    if slot.replace(value.to_string()).is_some() {
                        return Err(ParseError::DuplicateFlag(token.to_string()));
                    }
                }
                "-c" => {
                    let value = tokens.next().ok_or_else(|| ParseError::MissingValue(token.to_string()))?;
                    if value != "copy" {
                        return Err(ParseError::InvalidCodec(value.to_string()));
                    }
                    if trim.codec_copy {
                        return Err(ParseError::DuplicateFlag(token.to_string()));
                    }
                    trim.codec_copy = true;
                }
                "-i" => {
                    let value = tokens.next().ok_or_else(|| ParseError::MissingValue(token.to_string()))?;
                    set_input(&mut url, value)?;
                }
                flag if flag.starts_with('-') => return Err(ParseError::UnsupportedFlag(flag.to_string())),
                positional => set_input(&mut url, positional)?,
            }
        }

        if trim.duration.is_some() && trim.end.is_some() {
            return Err(ParseError::ConflictingFlags);
        }

        Ok(Self {
            url: url.ok_or(ParseError::MissingInput)?,
            trim,
        })
    }
}

fn set_input(url: &mut Option<String>, value: &str) -> Result<(), ParseError> {
    if !is_url(value) {
        return Err(ParseError::InvalidInput(value.to_string()));
    }
    if url.replace(value.to_string()).is_some() {
        return Err(ParseError::DuplicateFlag("-i".to_string()));
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Formatting

/// Numbered listing split into messages of at most `LIST_CHUNK_SIZE` lines.
pub fn string_chunks<I>(items: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Display,
{
    let lines: Vec<String> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| format!("{index}) {item}\n"))
        .collect();
    lines.chunks(LIST_CHUNK_SIZE).map(|chunk| chunk.concat()).collect()
}

/// ASCII-only, lower-case file stem derived from a video title.
pub fn title_to_file_stem(title: &str) -> String {
    let mut stem = String::with_capacity(title.len());
    for c in title.chars() {
        let c = match c {
            c if !c.is_ascii() => '_',
            ' ' | '/' | '\\' | '.' => '_',
            c => c.to_ascii_lowercase(),
        };
        if !(c == '_' && stem.ends_with('_')) {
            stem.push(c);
        }
    }
    stem
}
