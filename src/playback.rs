//! Per-guild playback queue.
//!
//! The queue never talks to the voice transport itself. Every operation
//! returns what the caller has to do next (start a track, stop the current
//! one, tell the channel we ran dry), which keeps the state machine free of
//! SDK types and easy to drive from the track-end event handler.
//!
//! Links that are still downloading hold a [`Ticket`] in the queue, so they
//! play in request order and vanish with everything else on `stop`.

use std::collections::VecDeque;

use chrono::{NaiveDateTime, TimeDelta};
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, error, info};

use crate::track::Track;
use crate::track_list::{Library, TrackRef, TrackSource};

/// How the current track is settled once the transport reports its end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Played to the end: timestamp and play count are updated.
    Finished,
    /// Dropped: nothing is recorded.
    Skipped,
    /// Cut short on purpose: the timestamp is refreshed, the play isn't counted.
    Next,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Current {
    track: TrackRef,
    end: EndReason,
}

/// Place held in the queue for a link that is still downloading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Clone, Debug, PartialEq, Eq)]
enum Slot {
    Ready(TrackRef),
    Pending { ticket: Ticket, url: String },
}

/// What the caller must do after the queue moved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Start streaming this track.
    Play(TrackRef),
    /// Nothing left to play.
    Idle,
    /// Radio mode is on but no track is eligible.
    Exhausted,
}

/// Coarse state of a guild, combining the queue with the voice connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    ConnectedIdle,
    Playing,
}

/// Snapshot used by the `status` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub current: Option<String>,
    pub radio: bool,
    pub queue: Vec<String>,
}

#[derive(Debug)]
pub struct PlaybackQueue {
    queue: VecDeque<Slot>,
    current: Option<Current>,
    radio: bool,
    cooldown: TimeDelta,
    next_ticket: u64,
}

impl PlaybackQueue {
    pub fn new(cooldown: TimeDelta) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            radio: false,
            cooldown,
            next_ticket: 0,
        }
    }

    pub fn current(&self) -> Option<&TrackRef> {
        self.current.as_ref().map(|current| &current.track)
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_radio(&self) -> bool {
        self.radio
    }

    /// Queued tracks that are ready to play.
    pub fn queued(&self) -> impl Iterator<Item = &TrackRef> {
        self.queue.iter().filter_map(|slot| match slot {
            Slot::Ready(track) => Some(track),
            Slot::Pending { .. } => None,
        })
    }

    pub fn state(&self, connected: bool) -> PlaybackState {
        match (connected, self.is_playing()) {
            (_, true) => PlaybackState::Playing,
            (true, false) => PlaybackState::ConnectedIdle,
            (false, false) => PlaybackState::Idle,
        }
    }

    pub fn status(&self) -> Status {
        Status {
            current: self.current().map(|track| track.name.clone()),
            radio: self.radio,
            queue: self
                .queue
                .iter()
                .map(|slot| match slot {
                    Slot::Ready(track) => track.name.clone(),
                    Slot::Pending { url, .. } => format!("{url} (downloading)"),
                })
                .collect(),
        }
    }

    /// Append `track`. Returns it if playback has to start right away.
    pub fn enqueue(&mut self, track: TrackRef) -> Option<TrackRef> {
        if self.current.is_none() && self.queue.is_empty() {
            self.set_current(track.clone());
            Some(track)
        } else {
            debug!(track = %track, position = self.queue.len(), "queued");
            self.queue.push_back(Slot::Ready(track));
            None
        }
    }

    /// Hold a place for `url` until its download lands.
    pub fn reserve(&mut self, url: &str) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        debug!(url, position = self.queue.len(), "reserved a place for a download");
        self.queue.push_back(Slot::Pending {
            ticket,
            url: url.to_string(),
        });
        ticket
    }

    /// Fill the place held by `ticket`. A ticket dropped by `stop` plays nothing.
    pub fn fulfil(&mut self, ticket: Ticket, track: TrackRef) -> Option<TrackRef> {
        let Some(slot) = self.pending_mut(ticket) else {
            debug!(track = %track, "download finished after its request was dropped");
            return None;
        };
        *slot = Slot::Ready(track);
        self.pop_ready()
    }

    /// Give up the place held by `ticket` and move past it.
    pub fn cancel<R>(&mut self, ticket: Ticket, library: &Library, now: NaiveDateTime, rng: &mut R) -> Advance
    where
        R: Rng + ?Sized,
    {
        self.queue
            .retain(|slot| !matches!(slot, Slot::Pending { ticket: held, .. } if *held == ticket));
        self.advance(library, now, rng)
    }

    /// Track-end hook: settle the current track, persist the library and move on.
    pub fn finish<R>(&mut self, library: &mut Library, now: NaiveDateTime, rng: &mut R) -> Advance
    where
        R: Rng + ?Sized,
    {
        if let Some(current) = self.current.take() {
            if self.settle(&current, library, now) {
                if let Err(e) = library.write_to_files() {
                    error!(error = %e, "failed to persist track lists");
                }
            }
        }
        self.advance(library, now, rng)
    }

    /// Pop the next queued track, or pick one in radio mode.
    pub fn advance<R>(&mut self, library: &Library, now: NaiveDateTime, rng: &mut R) -> Advance
    where
        R: Rng + ?Sized,
    {
        if self.current.is_some() {
            // still streaming; its end event will advance again
            return Advance::Idle;
        }

        if matches!(self.queue.front(), Some(Slot::Pending { .. })) {
            debug!("waiting for a download at the head of the queue");
            return Advance::Idle;
        }

        if let Some(track) = self.pop_ready() {
            return Advance::Play(track);
        }

        if !self.radio {
            return Advance::Idle;
        }

        match self.random_eligible(library, now, rng) {
            Some(track) => {
                self.set_current(track.clone());
                Advance::Play(track)
            }
            None => {
                info!("none of the available tracks satisfy the cooldown rule");
                Advance::Exhausted
            }
        }
    }

    /// Drop the current track without recording anything.
    /// Returns true if the transport has to be stopped.
    pub fn skip(&mut self) -> bool {
        self.mark_current(EndReason::Skipped)
    }

    /// Cut the current track short without counting it as played.
    pub fn next(&mut self) -> bool {
        self.mark_current(EndReason::Next)
    }

    /// The transport gave up on the current track; settle it without a play.
    pub fn transport_failed(&mut self) -> bool {
        self.mark_current(EndReason::Skipped)
    }

    /// Clear the queue, pending downloads included, leave radio mode and drop the current track.
    pub fn stop(&mut self) -> bool {
        self.queue.clear();
        self.radio = false;
        self.mark_current(EndReason::Skipped)
    }

    /// The transport failed to start or lost the current track.
    pub fn abandon_current(&mut self) {
        self.current = None;
    }

    /// Enable radio mode, seeding playback if nothing is going on.
    pub fn start_radio<R>(&mut self, library: &Library, now: NaiveDateTime, rng: &mut R) -> Advance
    where
        R: Rng + ?Sized,
    {
        self.radio = true;
        if self.current.is_none() && self.queue.is_empty() {
            self.advance(library, now, rng)
        } else {
            Advance::Idle
        }
    }

    /// Random downloaded track that passes the eligibility rule.
    pub fn random_eligible<R>(&self, library: &Library, now: NaiveDateTime, rng: &mut R) -> Option<TrackRef>
    where
        R: Rng + ?Sized,
    {
        let hits: Vec<TrackRef> = library
            .downloads
            .filter(|name, track| {
                self.is_eligible(&TrackRef::new(TrackSource::Downloads, name), track, now)
            })
            .into_iter()
            .map(|(name, _)| TrackRef::new(TrackSource::Downloads, name))
            .collect();
        hits.choose(rng).cloned()
    }

    /// Not played within the cooldown, on disk, and not already lined up.
    pub fn is_eligible(&self, track_ref: &TrackRef, track: &Track, now: NaiveDateTime) -> bool {
        now.checked_sub_signed(self.cooldown)
            .is_some_and(|threshold| track.last_played <= threshold)
            && track.is_downloaded()
            && self.current() != Some(track_ref)
            && !self.queued().any(|queued| queued == track_ref)
    }

    fn pending_mut(&mut self, ticket: Ticket) -> Option<&mut Slot> {
        self.queue
            .iter_mut()
            .find(|slot| matches!(slot, Slot::Pending { ticket: held, .. } if *held == ticket))
    }

    // Start the head of the queue if nothing plays and it is ready
    fn pop_ready(&mut self) -> Option<TrackRef> {
        if self.current.is_some() || !matches!(self.queue.front(), Some(Slot::Ready(_))) {
            return None;
        }
        let Some(Slot::Ready(track)) = self.queue.pop_front() else {
            return None;
        };
        self.set_current(track.clone());
        Some(track)
    }

    fn set_current(&mut self, track: TrackRef) {
        info!(track = %track, "now playing");
        self.current = Some(Current {
            track,
            end: EndReason::Finished,
        });
    }

    fn mark_current(&mut self, end: EndReason) -> bool {
        match self.current.as_mut() {
            Some(current) => {
                current.end = end;
                true
            }
            None => false,
        }
    }

    fn settle(&self, current: &Current, library: &mut Library, now: NaiveDateTime) -> bool {
        let Some(track) = library.get_mut(&current.track) else {
            return false;
        };
        match current.end {
            EndReason::Finished => track.mark_played(now),
            EndReason::Next => track.touch(now),
            EndReason::Skipped => return false,
        }
        debug!(track = %current.track, plays = track.play_count, "track settled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TRACK_LIST_FILE_NAME;
    use crate::track::parse_date_time;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs::File;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _audio: TempDir,
        downloads: TempDir,
        library: Library,
        rng: StdRng,
    }

    fn fixture(downloads: &[&str]) -> Fixture {
        let audio = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        for name in downloads {
            File::create(dir.path().join(format!("{name}.mp3"))).unwrap();
        }
        let library = Library::load(audio.path(), dir.path()).unwrap();
        Fixture {
            _audio: audio,
            downloads: dir,
            library,
            rng: StdRng::seed_from_u64(7),
        }
    }

    fn dl(name: &str) -> TrackRef {
        TrackRef::new(TrackSource::Downloads, name)
    }

    fn now() -> NaiveDateTime {
        parse_date_time("15-06-2024_20:00").unwrap()
    }

    fn queue() -> PlaybackQueue {
        PlaybackQueue::new(TimeDelta::hours(24))
    }

    #[test]
    fn enqueue_starts_only_when_idle_and_keeps_fifo_order() {
        let mut f = fixture(&["a", "b", "c"]);
        let mut q = queue();

        assert_eq!(q.enqueue(dl("a")), Some(dl("a")));
        assert_eq!(q.enqueue(dl("b")), None);
        assert_eq!(q.enqueue(dl("c")), None);
        assert_eq!(q.current(), Some(&dl("a")));

        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("b")));
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("c")));
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Idle);
    }

    #[test]
    fn completed_playback_counts_once_and_is_persisted() {
        let mut f = fixture(&["a"]);
        let mut q = queue();
        q.enqueue(dl("a"));

        let completed = now();
        q.finish(&mut f.library, completed, &mut f.rng);

        let track = f.library.get(&dl("a")).unwrap();
        assert_eq!(track.play_count, 1);
        assert!(track.last_played >= completed);

        let persisted = std::fs::read_to_string(f.downloads.path().join(TRACK_LIST_FILE_NAME)).unwrap();
        assert!(persisted.contains("\"playCount\": 1"));
    }

    #[test]
    fn end_of_queue_without_radio_goes_idle() {
        let mut f = fixture(&["a"]);
        let mut q = queue();

        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Idle);
        assert!(!q.is_playing());
        assert_eq!(q.state(true), PlaybackState::ConnectedIdle);
        assert_eq!(q.state(false), PlaybackState::Idle);
    }

    #[test]
    fn skip_records_nothing_and_advances() {
        let mut f = fixture(&["a", "b"]);
        let mut q = queue();
        q.enqueue(dl("a"));
        q.enqueue(dl("b"));

        assert!(q.skip());
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("b")));

        let track = f.library.get(&dl("a")).unwrap();
        assert_eq!(track.play_count, 0);
        assert_eq!(track.formatted_last_played(), "01-05-2021_00:00");
    }

    #[test]
    fn next_keeps_play_count_but_refreshes_timestamp() {
        let mut f = fixture(&["a", "b"]);
        let mut q = queue();
        q.enqueue(dl("a"));
        q.enqueue(dl("b"));

        assert!(q.next());
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("b")));

        let track = f.library.get(&dl("a")).unwrap();
        assert_eq!(track.play_count, 0);
        assert_eq!(track.last_played, now());
    }

    #[test]
    fn stop_clears_everything() {
        let mut f = fixture(&["a", "b"]);
        let mut q = queue();
        q.start_radio(&f.library, now(), &mut f.rng);
        q.enqueue(dl("b"));

        assert!(q.stop());
        assert!(!q.is_radio());
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Idle);
        assert_eq!(q.status(), Status { current: None, radio: false, queue: vec![] });
        assert!(!q.stop());
    }

    #[test]
    fn stop_drops_links_still_downloading() {
        let mut f = fixture(&["fresh"]);
        let mut q = queue();
        let ticket = q.reserve("https://youtu.be/fresh");
        assert_eq!(q.status().queue, vec!["https://youtu.be/fresh (downloading)"]);

        q.stop();

        assert_eq!(q.fulfil(ticket, dl("fresh")), None);
        assert!(!q.is_playing());
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Idle);
    }

    #[test]
    fn downloading_links_keep_their_place_in_line() {
        let mut f = fixture(&["fresh", "nyan"]);
        let mut q = queue();
        let ticket = q.reserve("https://youtu.be/fresh");

        assert_eq!(q.enqueue(dl("nyan")), None);
        assert!(!q.is_playing());
        assert_eq!(q.advance(&f.library, now(), &mut f.rng), Advance::Idle);

        assert_eq!(q.fulfil(ticket, dl("fresh")), Some(dl("fresh")));
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("nyan")));
    }

    #[test]
    fn download_finishing_behind_the_current_track_waits() {
        let mut f = fixture(&["a", "fresh"]);
        let mut q = queue();
        q.enqueue(dl("a"));
        let ticket = q.reserve("https://youtu.be/fresh");

        assert_eq!(q.fulfil(ticket, dl("fresh")), None);
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("fresh")));
    }

    #[test]
    fn failed_download_gives_up_its_place() {
        let mut f = fixture(&["nyan"]);
        let mut q = queue();
        let ticket = q.reserve("https://youtu.be/broken");
        q.enqueue(dl("nyan"));

        assert_eq!(q.cancel(ticket, &f.library, now(), &mut f.rng), Advance::Play(dl("nyan")));
        assert_eq!(q.fulfil(ticket, dl("broken")), None);
    }

    #[test]
    fn transport_failure_is_not_counted_as_a_play() {
        let mut f = fixture(&["broken", "b"]);
        let mut q = queue();
        q.enqueue(dl("broken"));
        q.enqueue(dl("b"));

        assert!(q.transport_failed());
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Play(dl("b")));

        let track = f.library.get(&dl("broken")).unwrap();
        assert_eq!(track.play_count, 0);
        assert_eq!(track.formatted_last_played(), "01-05-2021_00:00");
    }

    #[test]
    fn cooldown_beyond_the_calendar_makes_nothing_eligible() {
        let mut f = fixture(&["a"]);
        let q = PlaybackQueue::new(TimeDelta::hours(200_000_000_000));

        assert_eq!(q.random_eligible(&f.library, now(), &mut f.rng), None);
    }

    #[test]
    fn eligibility_excludes_recent_and_queued_tracks() {
        let mut f = fixture(&["recent", "queued", "old", "missing"]);
        let now = now();
        f.library.get_mut(&dl("recent")).unwrap().mark_played(now - TimeDelta::hours(3));
        f.library.get_mut(&dl("old")).unwrap().mark_played(now - TimeDelta::hours(25));
        std::fs::remove_file(f.downloads.path().join("missing.mp3")).unwrap();

        let mut q = queue();
        q.enqueue(dl("a_placeholder_current"));
        q.enqueue(dl("queued"));

        for _ in 0..32 {
            assert_eq!(q.random_eligible(&f.library, now, &mut f.rng), Some(dl("old")));
        }
    }

    #[test]
    fn radio_seeds_playback_and_keeps_going() {
        let mut f = fixture(&["a", "b"]);
        let mut q = queue();

        let first = match q.start_radio(&f.library, now(), &mut f.rng) {
            Advance::Play(track) => track,
            other => panic!("radio did not start: {other:?}"),
        };

        let second = match q.finish(&mut f.library, now(), &mut f.rng) {
            Advance::Play(track) => track,
            other => panic!("radio did not continue: {other:?}"),
        };
        assert_ne!(first, second);

        // both played within the cooldown now
        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Exhausted);
        assert!(!q.is_playing());
        assert!(q.is_radio());
    }

    #[test]
    fn radio_does_not_interrupt_a_running_queue() {
        let mut f = fixture(&["a", "b"]);
        let mut q = queue();
        q.enqueue(dl("a"));

        assert_eq!(q.start_radio(&f.library, now(), &mut f.rng), Advance::Idle);
        assert_eq!(q.current(), Some(&dl("a")));
        assert!(q.is_radio());
    }

    #[test]
    fn settling_a_track_that_vanished_is_harmless() {
        let mut f = fixture(&[]);
        let mut q = queue();
        q.enqueue(dl("ghost"));

        assert_eq!(q.finish(&mut f.library, now(), &mut f.rng), Advance::Idle);
        assert!(!Path::new(&f.downloads.path().join(TRACK_LIST_FILE_NAME)).exists());
    }
}
