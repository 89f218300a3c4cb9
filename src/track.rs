use std::path::{Path, PathBuf};

use chrono::{DurationRound, Local, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{DATE_TIME_FORMAT, DEFAULT_VOLUME};

/// One playable file plus its play history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub file_path: PathBuf,
    #[serde(with = "last_played_format")]
    pub last_played: NaiveDateTime,
    #[serde(default)]
    pub play_count: u32,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_volume", deserialize_with = "volume_from_number_or_string")]
    pub volume: u32,
}

impl Track {
    pub fn new(file_path: impl Into<PathBuf>, last_played: NaiveDateTime) -> Self {
        Self {
            file_path: file_path.into(),
            last_played,
            play_count: 0,
            url: String::new(),
            volume: DEFAULT_VOLUME,
        }
    }

    /// A track that has never been played, dated with [`never_played`].
    pub fn unplayed(file_path: impl Into<PathBuf>) -> Self {
        Self::new(file_path, never_played())
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Track name, i.e. the file stem.
    pub fn name(&self) -> String {
        self.file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> Option<String> {
        self.file_path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
    }

    pub fn directory(&self) -> Option<&Path> {
        self.file_path.parent()
    }

    pub fn is_downloaded(&self) -> bool {
        self.file_path.is_file()
    }

    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }

    /// Record a completed playback.
    pub fn mark_played(&mut self, at: NaiveDateTime) {
        self.last_played = at;
        self.play_count += 1;
    }

    /// Refresh the timestamp without counting a play.
    pub fn touch(&mut self, at: NaiveDateTime) {
        self.last_played = at;
    }

    pub fn formatted_last_played(&self) -> String {
        format_date_time(&self.last_played)
    }

    /// True if both entries describe the same file from the same source.
    pub fn same_source(&self, other: &Track) -> bool {
        self.file_path == other.file_path && self.url == other.url
    }
}

/// Sentinel timestamp for tracks that were never played.
pub fn never_played() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 5, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Local wall-clock time, the clock every play timestamp is taken from.
/// Truncated to whole minutes, the precision track lists are stored with.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now)
}

pub fn format_date_time(date: &NaiveDateTime) -> String {
    date.format(DATE_TIME_FORMAT).to_string()
}

pub fn parse_date_time(date: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(date, DATE_TIME_FORMAT)
}

fn default_volume() -> u32 {
    DEFAULT_VOLUME
}

// Older track lists stored the volume as a string
fn volume_from_number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Volume {
        Number(u32),
        Text(String),
    }

    match Volume::deserialize(deserializer)? {
        Volume::Number(volume) => Ok(volume),
        Volume::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

mod last_played_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_date_time(date))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_date_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn sentinel_formats_as_first_of_may() {
        assert_eq!(format_date_time(&never_played()), "01-05-2021_00:00");
        assert_eq!(parse_date_time("01-05-2021_00:00").unwrap(), never_played());
    }

    #[test]
    fn derives_name_extension_and_directory_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mya-nee_!!!.webm");
        File::create(&path).unwrap();

        let track = Track::unplayed(&path).with_url("https://www.youtube.com/watch?v=cSa1DJUbVSs");

        assert!(track.is_downloaded());
        assert!(track.has_url());
        assert_eq!(track.name(), "mya-nee_!!!");
        assert_eq!(track.extension().as_deref(), Some("webm"));
        assert_eq!(track.directory(), Some(dir.path()));
        assert_eq!(track.volume, 100);
    }

    #[test]
    fn mark_played_counts_and_touch_does_not() {
        let mut track = Track::unplayed("a.mp3");
        let at = parse_date_time("02-03-2024_12:30").unwrap();

        track.mark_played(at);
        assert_eq!(track.play_count, 1);
        assert_eq!(track.last_played, at);

        let later = parse_date_time("02-03-2024_13:00").unwrap();
        track.touch(later);
        assert_eq!(track.play_count, 1);
        assert_eq!(track.last_played, later);
    }

    #[test]
    fn reads_string_volume_and_writes_number() {
        let raw = r#"{
            "filePath": "data/downloads/song.mp3",
            "lastPlayed": "24-12-2022_18:05",
            "playCount": 3,
            "url": "https://youtu.be/abc",
            "volume": "80"
        }"#;

        let track: Track = serde_json::from_str(raw).unwrap();
        assert_eq!(track.volume, 80);
        assert_eq!(track.play_count, 3);
        assert_eq!(track.formatted_last_played(), "24-12-2022_18:05");

        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["volume"], 80);
        assert_eq!(value["lastPlayed"], "24-12-2022_18:05");
        assert_eq!(value["filePath"], "data/downloads/song.mp3");
    }

    #[test]
    fn clock_readings_survive_formatting() {
        let at = now();
        assert_eq!(parse_date_time(&format_date_time(&at)).unwrap(), at);
    }

    #[test]
    fn rejects_malformed_timestamp() {
        let raw = r#"{"filePath": "a.mp3", "lastPlayed": "2022-12-24 18:05"}"#;
        assert!(serde_json::from_str::<Track>(raw).is_err());
    }
}
