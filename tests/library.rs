use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use rand::rngs::StdRng;
use rand::SeedableRng;

use mya_nee::download::DownloadManager;
use mya_nee::extractor::{ExtractorError, MediaExtractor, MediaInfo, RequestOptions};
use mya_nee::parsing::DomainFilter;
use mya_nee::playback::{Advance, PlaybackQueue};
use mya_nee::storage::DataDirs;
use mya_nee::track::{now, parse_date_time, Track};
use mya_nee::track_list::{Library, TrackRef, TrackSource};

fn data_dirs(names: &[&str]) -> (tempfile::TempDir, DataDirs) {
    let root = tempfile::tempdir().unwrap();
    let dirs = DataDirs::new(root.path());
    dirs.create_all().unwrap();
    for name in names {
        File::create(dirs.downloads.join(format!("{name}.mp3"))).unwrap();
    }
    (root, dirs)
}

#[test]
fn track_lists_survive_a_restart() {
    let (_root, dirs) = data_dirs(&["first", "second"]);
    File::create(dirs.audio.join("explosion.ogg")).unwrap();

    let mut library = Library::load(&dirs.audio, &dirs.downloads).unwrap();
    let at = parse_date_time("03-02-2024_18:45").unwrap();
    let first = TrackRef::new(TrackSource::Downloads, "first");
    library.get_mut(&first).unwrap().mark_played(at);
    library.get_mut(&first).unwrap().url = "https://youtu.be/first".to_string();
    library.write_to_files().unwrap();

    let reloaded = Library::load(&dirs.audio, &dirs.downloads).unwrap();

    assert_eq!(reloaded.audio.tracks(), library.audio.tracks());
    assert_eq!(reloaded.downloads.tracks(), library.downloads.tracks());
    assert_eq!(reloaded.find_download_by_url("https://youtu.be/first"), Some(first));
}

#[test]
fn plays_recorded_with_the_clock_survive_a_restart() {
    let (_root, dirs) = data_dirs(&["live"]);
    let live = TrackRef::new(TrackSource::Downloads, "live");

    let mut library = Library::load(&dirs.audio, &dirs.downloads).unwrap();
    library.get_mut(&live).unwrap().mark_played(now());
    library.write_to_files().unwrap();

    let reloaded = Library::load(&dirs.audio, &dirs.downloads).unwrap();
    assert_eq!(reloaded.downloads.tracks(), library.downloads.tracks());
}

#[test]
fn radio_rotates_through_every_download_before_repeating() {
    let (_root, dirs) = data_dirs(&["a", "b", "c"]);
    let mut library = Library::load(&dirs.audio, &dirs.downloads).unwrap();
    let mut queue = PlaybackQueue::new(TimeDelta::hours(24));
    let mut rng = StdRng::seed_from_u64(42);
    let start = parse_date_time("01-01-2025_12:00").unwrap();

    let mut played = HashSet::new();
    let mut advance = queue.start_radio(&library, start, &mut rng);
    while let Advance::Play(track) = advance {
        assert!(played.insert(track.name.clone()), "{track} repeated inside the cooldown");
        advance = queue.finish(&mut library, start, &mut rng);
    }

    assert_eq!(advance, Advance::Exhausted);
    assert_eq!(played.len(), 3);
    for name in ["a", "b", "c"] {
        let track = library.get(&TrackRef::new(TrackSource::Downloads, name)).unwrap();
        assert_eq!(track.play_count, 1);
    }

    let next_day = start + TimeDelta::hours(24);
    assert!(matches!(queue.advance(&library, next_day, &mut rng), Advance::Play(_)));
}

struct LocalExtractor;

#[async_trait]
impl MediaExtractor for LocalExtractor {
    async fn resolve(&self, _url: &str, _options: &RequestOptions) -> Result<MediaInfo, ExtractorError> {
        Ok(MediaInfo {
            id: "dQw4w9WgXcQ".to_string(),
            title: "Never Gonna Give You Up".to_string(),
        })
    }

    async fn fetch(&self, _url: &str, destination: &Path, options: &RequestOptions) -> Result<(), ExtractorError> {
        assert_eq!(options.audio_format.as_deref(), Some("mp3"));
        tokio::fs::write(destination, b"audio").await.unwrap();
        Ok(())
    }
}

#[tokio::test]
async fn downloaded_link_is_registered_and_played() {
    let (_root, dirs) = data_dirs(&[]);
    let downloads = DownloadManager::new(
        Arc::new(LocalExtractor),
        &dirs.downloads,
        DomainFilter::new(["youtu.be"]),
        Vec::new(),
    );
    let url = "https://youtu.be/dQw4w9WgXcQ";

    let path = downloads.enqueue(url).await.unwrap().wait().await.unwrap();
    assert_eq!(path, dirs.downloads.join("never_gonna_give_you_up.mp3"));

    let mut library = Library::load(&dirs.audio, &dirs.downloads).unwrap();
    let name = library
        .downloads
        .add_track(Track::unplayed(&path).with_url(url), true)
        .unwrap();
    let track = TrackRef::new(TrackSource::Downloads, name);

    let mut queue = PlaybackQueue::new(TimeDelta::hours(24));
    let mut rng = StdRng::seed_from_u64(0);
    assert_eq!(queue.enqueue(track.clone()), Some(track.clone()));

    let done = parse_date_time("20-07-2024_08:30").unwrap();
    assert_eq!(queue.finish(&mut library, done, &mut rng), Advance::Idle);

    let reloaded = Library::load(&dirs.audio, &dirs.downloads).unwrap();
    let persisted = reloaded.get(&track).unwrap();
    assert_eq!(persisted.play_count, 1);
    assert_eq!(persisted.last_played, done);
    assert_eq!(persisted.url, url);
}
