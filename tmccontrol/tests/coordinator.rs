use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use tmccontrol::{
    MediaBackend, MediaEvents, MediaState, PlaybackCoordinator, PlaybackQueue, PlaybackStatus,
    PlayerEvents, SeekTarget, Session, SessionOptions, SimulatedBackend,
};
use tmcsource::{
    Catalog, CatalogError, CatalogEvents, Credentials, LibraryMutation, RemoteCache,
    RemotePlaylist, StationRef, Track, TrackRef, TrackSource,
};
use tmcutils::TaskRunner;

const WAIT: Duration = Duration::from_secs(5);

/// Catalogue de test : `slow*` répond après un délai, `broken*` échoue.
struct StreamCatalog {
    tracks: Vec<TrackRef>,
}

impl Catalog for StreamCatalog {
    fn login(&self, _credentials: &Credentials) -> tmcsource::Result<bool> {
        Ok(true)
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn fetch_all_tracks(&self) -> tmcsource::Result<Vec<TrackRef>> {
        Ok(self.tracks.clone())
    }

    fn fetch_all_playlists(&self) -> tmcsource::Result<Vec<RemotePlaylist>> {
        Ok(Vec::new())
    }

    fn fetch_all_stations(&self) -> tmcsource::Result<Vec<StationRef>> {
        Ok(Vec::new())
    }

    fn fetch_station_tracks(&self, _id: &str, _count: usize) -> tmcsource::Result<Vec<TrackRef>> {
        Ok(Vec::new())
    }

    fn resolve_stream_url(&self, track_id: &str) -> tmcsource::Result<String> {
        if track_id.starts_with("broken") {
            return Err(CatalogError::Transport(format!("no stream for {track_id}")));
        }
        if track_id.starts_with("slow") {
            thread::sleep(Duration::from_millis(300));
        }
        Ok(format!("test://{track_id}"))
    }

    fn mutate_library(&self, _track: &Track, _mutation: LibraryMutation) -> tmcsource::Result<bool> {
        Ok(false)
    }
}

/// Backend qui enregistre les commandes ; les tests publient eux-mêmes les
/// confirmations.
struct ScriptedBackend {
    events: MediaEvents,
    calls: Mutex<Vec<String>>,
    played: crossbeam_channel::Sender<String>,
    volume: AtomicU8,
}

impl ScriptedBackend {
    fn new() -> (Arc<Self>, Receiver<String>) {
        let (tx, rx) = unbounded();
        let backend = Arc::new(Self {
            events: MediaEvents::new(),
            calls: Mutex::new(Vec::new()),
            played: tx,
            volume: AtomicU8::new(0),
        });
        (backend, rx)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn confirm_playing(&self) {
        self.events.state_changed.publish(MediaState {
            loading: false,
            playing: true,
        });
    }
}

impl MediaBackend for ScriptedBackend {
    fn play(&self, url: &str) -> anyhow::Result<()> {
        self.record(format!("play {url}"));
        let _ = self.played.send(url.to_string());
        Ok(())
    }

    fn pause(&self) -> anyhow::Result<()> {
        self.record("pause");
        Ok(())
    }

    fn resume(&self) -> anyhow::Result<()> {
        self.record("resume");
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.record("stop");
        Ok(())
    }

    fn seek(&self, target: SeekTarget) -> anyhow::Result<()> {
        self.record(format!("seek {target:?}"));
        Ok(())
    }

    fn set_volume(&self, volume: u8) -> anyhow::Result<()> {
        self.volume.store(volume, Ordering::SeqCst);
        Ok(())
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    fn equalizer_frequencies(&self) -> Vec<u32> {
        vec![60, 1000]
    }

    fn equalizer_amps(&self) -> Vec<f32> {
        vec![0.0, 0.0]
    }

    fn set_equalizer_band(&self, _band: usize, _amp: f32) -> anyhow::Result<()> {
        Ok(())
    }

    fn events(&self) -> &MediaEvents {
        &self.events
    }
}

fn track(id: &str) -> TrackRef {
    Track::new(TrackSource::Library, format!("Song {id}"), "Band")
        .with_library_id(id)
        .with_duration_ms(200_000)
        .into_ref()
}

fn tracks(ids: &[&str]) -> Vec<TrackRef> {
    ids.iter().map(|id| track(id)).collect()
}

struct Fixture {
    coordinator: PlaybackCoordinator,
    backend: Arc<ScriptedBackend>,
    played: Receiver<String>,
    runner: TaskRunner,
}

fn fixture() -> Fixture {
    let runner = TaskRunner::new();
    let catalog = Arc::new(StreamCatalog { tracks: Vec::new() });
    let cache = RemoteCache::new(catalog, runner.clone(), CatalogEvents::new(), 10);
    let (backend, played) = ScriptedBackend::new();
    let coordinator = PlaybackCoordinator::new(
        cache,
        backend.clone(),
        PlayerEvents::new(),
        PlaybackQueue::with_seed(3),
    );
    Fixture {
        coordinator,
        backend,
        played,
        runner,
    }
}

#[test]
fn test_play_current_on_empty_queue_stays_idle() -> anyhow::Result<()> {
    let f = fixture();
    let changed = f.coordinator.events().track_changed.subscribe_channel();

    f.coordinator.play_current()?;

    assert_eq!(f.coordinator.status(), PlaybackStatus::Idle);
    assert!(changed.try_recv().is_err());
    assert!(f.backend.calls().is_empty());
    Ok(())
}

#[test]
fn test_load_queue_plays_after_backend_confirms() -> anyhow::Result<()> {
    let f = fixture();
    let statuses = f.coordinator.events().status_changed.subscribe_channel();
    let changed = f.coordinator.events().track_changed.subscribe_channel();
    let queue = f.coordinator.events().queue_changed.subscribe_channel();

    f.coordinator.load_queue(tracks(&["a", "b"]), Some(1))?;

    assert_eq!(queue.recv_timeout(WAIT)?.len(), 2);
    assert_eq!(changed.recv_timeout(WAIT)?.primary_id(), Some("b"));
    assert_eq!(statuses.recv_timeout(WAIT)?, PlaybackStatus::Loading);

    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");
    // pas de Playing avant la confirmation du backend
    assert_eq!(f.coordinator.status(), PlaybackStatus::Loading);

    f.backend.confirm_playing();
    assert_eq!(statuses.recv_timeout(WAIT)?, PlaybackStatus::Playing);
    assert_eq!(f.coordinator.status(), PlaybackStatus::Playing);
    Ok(())
}

#[test]
fn test_resolve_failure_goes_idle_without_advancing() -> anyhow::Result<()> {
    let f = fixture();
    let errors = f.coordinator.events().playback_error.subscribe_channel();

    f.coordinator.load_queue(tracks(&["broken1", "ok2"]), None)?;

    let failure = errors.recv_timeout(WAIT)?;
    assert_eq!(failure.track.primary_id(), Some("broken1"));
    assert!(failure.message.contains("broken1"));
    assert!(f.runner.wait_idle(WAIT));

    assert_eq!(f.coordinator.status(), PlaybackStatus::Idle);
    assert_eq!(f.coordinator.current_index(), Some(0));
    assert!(f.played.try_recv().is_err());
    Ok(())
}

#[test]
fn test_stale_resolution_is_discarded() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["slow1", "fast2"]), None)?;
    f.coordinator.advance(true)?;

    assert_eq!(f.played.recv_timeout(WAIT)?, "test://fast2");
    assert!(f.runner.wait_idle(WAIT));
    assert!(f.played.try_recv().is_err());
    assert_eq!(f.coordinator.current_track().unwrap().primary_id(), Some("fast2"));
    Ok(())
}

#[test]
fn test_stop_cancels_pending_resolution() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["slow1"]), None)?;
    f.coordinator.stop()?;
    assert!(f.runner.wait_idle(WAIT));

    assert!(f.played.try_recv().is_err());
    assert_eq!(f.coordinator.status(), PlaybackStatus::Idle);
    assert_eq!(f.backend.calls(), vec!["stop".to_string()]);
    Ok(())
}

#[test]
fn test_end_of_track_advances() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["a", "b"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    f.backend.confirm_playing();

    f.backend.events().end_reached.publish(());
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");
    assert_eq!(f.coordinator.status(), PlaybackStatus::Loading);
    Ok(())
}

#[test]
fn test_end_of_track_with_repeat_one_replays() -> anyhow::Result<()> {
    let f = fixture();
    let flags = f.coordinator.events().playback_flags_changed.subscribe_channel();

    f.coordinator.load_queue(tracks(&["a", "b"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");

    f.backend.confirm_playing();
    assert!(f.coordinator.toggle_repeat_one());
    assert!(flags.recv_timeout(WAIT)?.repeat_one);

    f.backend.events().end_reached.publish(());
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");

    // l'avance forcée ignore la répétition
    f.coordinator.advance(true)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");
    Ok(())
}

#[test]
fn test_late_end_of_previous_track_does_not_skip() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["a", "b", "c"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    f.backend.confirm_playing();

    f.coordinator.advance(true)?;
    // fin de « a » arrivée après le passage à « b »
    f.backend.events().end_reached.publish(());

    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");
    assert!(f.runner.wait_idle(WAIT));
    assert!(f.played.try_recv().is_err());
    assert_eq!(f.coordinator.current_index(), Some(1));
    assert_eq!(f.coordinator.status(), PlaybackStatus::Loading);
    Ok(())
}

#[test]
fn test_previous_track_confirmation_does_not_mark_playing() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["a", "slowb"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    f.backend.confirm_playing();
    assert_eq!(f.coordinator.status(), PlaybackStatus::Playing);

    f.coordinator.advance(true)?;
    // « a » confirme encore pendant que l'URL de « slowb » est résolue
    f.backend.confirm_playing();
    assert_eq!(f.coordinator.status(), PlaybackStatus::Loading);

    assert_eq!(f.played.recv_timeout(WAIT)?, "test://slowb");
    f.backend.confirm_playing();
    assert_eq!(f.coordinator.status(), PlaybackStatus::Playing);
    Ok(())
}

#[test]
fn test_retreat_with_empty_history_goes_idle() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["a", "b"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");

    assert!(f.coordinator.retreat(true)?.is_none());
    assert_eq!(f.coordinator.status(), PlaybackStatus::Idle);
    assert!(f.backend.calls().contains(&"stop".to_string()));
    Ok(())
}

#[test]
fn test_retreat_returns_to_previous_track() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["a", "b", "c"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    f.coordinator.advance(true)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");

    let previous = f.coordinator.retreat(true)?;
    assert_eq!(previous.unwrap().primary_id(), Some("a"));
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    Ok(())
}

#[test]
fn test_removing_playing_track_plays_the_next_one() -> anyhow::Result<()> {
    let f = fixture();
    let removed = f.coordinator.events().track_removed.subscribe_channel();
    let list = tracks(&["a", "b"]);

    f.coordinator.load_queue(list.clone(), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    f.backend.confirm_playing();

    let gone = f.coordinator.remove_from_queue(&list[0])?;
    assert_eq!(gone.unwrap().primary_id(), Some("a"));
    assert_eq!(removed.recv_timeout(WAIT)?.primary_id(), Some("a"));
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");

    // dernière piste retirée : arrêt
    f.coordinator.remove_from_queue(&list[1])?;
    assert_eq!(f.coordinator.status(), PlaybackStatus::Idle);
    assert!(f.coordinator.current_track().is_none());
    assert!(f.backend.calls().contains(&"stop".to_string()));
    Ok(())
}

#[test]
fn test_removing_other_track_keeps_playing() -> anyhow::Result<()> {
    let f = fixture();
    let list = tracks(&["a", "b", "c"]);

    f.coordinator.load_queue(list.clone(), Some(1))?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://b");
    f.backend.confirm_playing();

    f.coordinator.remove_from_queue(&list[0])?;
    assert_eq!(f.coordinator.current_index(), Some(0));
    assert_eq!(f.coordinator.status(), PlaybackStatus::Playing);
    assert!(f.coordinator.remove_from_queue(&track("zz"))?.is_none());
    Ok(())
}

#[test]
fn test_append_does_not_start_playback() {
    let f = fixture();
    let appended = f.coordinator.events().track_appended.subscribe_channel();

    f.coordinator.append_to_queue(track("a"));

    assert!(appended.try_recv().is_ok());
    assert_eq!(f.coordinator.queue_tracks().len(), 1);
    assert_eq!(f.coordinator.status(), PlaybackStatus::Idle);
    assert!(f.backend.calls().is_empty());
}

#[test]
fn test_play_pause_toggles_through_backend() -> anyhow::Result<()> {
    let f = fixture();

    f.coordinator.load_queue(tracks(&["a"]), None)?;
    assert_eq!(f.played.recv_timeout(WAIT)?, "test://a");
    f.backend.confirm_playing();

    f.coordinator.play_pause()?;
    f.backend.events().state_changed.publish(MediaState {
        loading: false,
        playing: false,
    });
    assert_eq!(f.coordinator.status(), PlaybackStatus::Paused);

    f.coordinator.play_pause()?;
    f.backend.confirm_playing();
    assert_eq!(f.coordinator.status(), PlaybackStatus::Playing);

    let calls = f.backend.calls();
    assert_eq!(&calls[1..], &["pause".to_string(), "resume".to_string()]);
    Ok(())
}

#[test]
fn test_position_is_forwarded_with_duration() -> anyhow::Result<()> {
    let f = fixture();
    let positions = f.coordinator.events().position_changed.subscribe_channel();

    f.coordinator.load_queue(tracks(&["a"]), None)?;
    f.played.recv_timeout(WAIT)?;
    f.backend.confirm_playing();
    f.backend.events().position_changed.publish(0.5);

    let position = positions.recv_timeout(WAIT)?;
    assert_eq!(position.duration_ms, 200_000);
    assert_eq!(position.elapsed_ms, 100_000);
    assert_eq!(f.coordinator.position(), 0.5);
    Ok(())
}

#[test]
fn test_dropped_coordinator_releases_backend_subscriptions() {
    let f = fixture();
    assert_eq!(f.backend.events().end_reached.len(), 1);
    drop(f.coordinator);
    assert!(f.backend.events().end_reached.is_empty());
    assert!(f.backend.events().state_changed.is_empty());
}

#[test]
fn test_session_with_simulated_backend_plays_through() -> anyhow::Result<()> {
    let list = tracks(&["a", "b"]);
    let catalog = Arc::new(StreamCatalog {
        tracks: list.clone(),
    });
    let backend = Arc::new(SimulatedBackend::with_tick(
        Duration::from_millis(80),
        Duration::from_millis(10),
    )?);
    let session = Session::new(catalog, backend, SessionOptions::default())?;
    let coordinator = session.coordinator();
    let changed = coordinator.events().track_changed.subscribe_channel();
    let statuses = coordinator.events().status_changed.subscribe_channel();

    let all = session.cache().get_all_tracks()?;
    coordinator.load_queue(all, None)?;

    assert_eq!(changed.recv_timeout(WAIT)?.primary_id(), Some("a"));
    // fin de la première piste : la seconde enchaîne
    assert_eq!(changed.recv_timeout(WAIT)?.primary_id(), Some("b"));
    assert!(statuses.iter().take(10).any(|s| s == PlaybackStatus::Playing));
    assert_eq!(coordinator.volume(), 80);

    assert!(session.shutdown(WAIT));
    Ok(())
}
