//! Événements du lecteur et du backend média.

use serde::Serialize;
use tmcsource::TrackRef;
use tmcutils::EventHook;

/// État observable du lecteur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "IDLE",
            PlaybackStatus::Loading => "LOADING",
            PlaybackStatus::Playing => "PLAYING",
            PlaybackStatus::Paused => "PAUSED",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackFlags {
    pub shuffle: bool,
    pub repeat_one: bool,
}

/// Position dans la piste courante.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PlaybackPosition {
    /// Fraction lue, entre 0 et 1
    pub fraction: f32,
    pub elapsed_ms: u64,
    pub duration_ms: u64,
}

/// Échec de lecture d'une piste (résolution d'URL ou backend).
#[derive(Clone, Debug)]
pub struct PlaybackFailure {
    pub track: TrackRef,
    pub message: String,
}

/// État rapporté par le backend média.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MediaState {
    pub loading: bool,
    pub playing: bool,
}

/// Événements émis par un backend média, sur son propre thread.
#[derive(Clone, Debug)]
pub struct MediaEvents {
    pub state_changed: EventHook<MediaState>,
    /// Fraction lue, entre 0 et 1
    pub position_changed: EventHook<f32>,
    pub end_reached: EventHook<()>,
}

impl MediaEvents {
    pub fn new() -> Self {
        Self {
            state_changed: EventHook::named("media_state_changed"),
            position_changed: EventHook::named("media_position_changed"),
            end_reached: EventHook::named("media_end_reached"),
        }
    }
}

impl Default for MediaEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Événements publiés par le coordinateur de lecture.
///
/// Ils peuvent être publiés depuis le thread de l'appelant, depuis une
/// tâche de résolution d'URL ou depuis le thread du backend.
#[derive(Clone, Debug)]
pub struct PlayerEvents {
    pub track_changed: EventHook<TrackRef>,
    pub status_changed: EventHook<PlaybackStatus>,
    pub playback_flags_changed: EventHook<PlaybackFlags>,
    pub position_changed: EventHook<PlaybackPosition>,
    pub queue_changed: EventHook<Vec<TrackRef>>,
    pub track_appended: EventHook<TrackRef>,
    pub track_removed: EventHook<TrackRef>,
    pub playback_error: EventHook<PlaybackFailure>,
}

impl PlayerEvents {
    pub fn new() -> Self {
        Self {
            track_changed: EventHook::named("track_changed"),
            status_changed: EventHook::named("status_changed"),
            playback_flags_changed: EventHook::named("playback_flags_changed"),
            position_changed: EventHook::named("position_changed"),
            queue_changed: EventHook::named("queue_changed"),
            track_appended: EventHook::named("track_appended"),
            track_removed: EventHook::named("track_removed"),
            playback_error: EventHook::named("playback_error"),
        }
    }
}

impl Default for PlayerEvents {
    fn default() -> Self {
        Self::new()
    }
}
