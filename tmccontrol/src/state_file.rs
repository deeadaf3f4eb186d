//! Publication de l'état du lecteur dans un fichier JSON, pour les barres
//! d'état et autres outils externes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use tmcsource::TrackRef;
use tmcutils::SubscriptionId;
use tracing::{debug, warn};

use crate::events::{PlaybackPosition, PlaybackStatus, PlayerEvents};

/// Contenu du fichier d'état.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub loading: bool,
    pub playing: bool,
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Secondes écoulées
    pub progress: u64,
    /// Durée en secondes
    pub length: u64,
    pub album_name: Option<String>,
}

impl PlayerSnapshot {
    fn set_track(&mut self, track: &TrackRef) {
        self.artist = Some(track.artist.clone());
        self.title = Some(track.title.clone());
        self.album_name = Some(track.album_name.clone()).filter(|name| !name.is_empty());
        self.length = track.duration_ms / 1000;
        self.progress = 0;
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        self.loading = status == PlaybackStatus::Loading;
        self.playing = status == PlaybackStatus::Playing;
        if status == PlaybackStatus::Idle {
            self.progress = 0;
        }
    }

    /// Retourne `true` si la seconde affichée a changé.
    fn set_position(&mut self, position: &PlaybackPosition) -> bool {
        let progress = position.elapsed_ms / 1000;
        let changed = progress != self.progress;
        self.progress = progress;
        changed
    }
}

#[derive(Debug)]
struct Subscriptions {
    track: SubscriptionId,
    status: SubscriptionId,
    position: SubscriptionId,
}

/// Réécrit le fichier d'état à chaque changement de piste ou de statut,
/// et au plus une fois par seconde de lecture.
///
/// Les abonnements sont retirés quand le diffuseur est libéré.
#[derive(Debug)]
pub struct StateBroadcaster {
    path: PathBuf,
    snapshot: Mutex<PlayerSnapshot>,
    events: PlayerEvents,
    subscriptions: Subscriptions,
}

impl StateBroadcaster {
    /// Crée le diffuseur et l'abonne aux événements du lecteur.
    pub fn attach(path: impl Into<PathBuf>, events: &PlayerEvents) -> Arc<Self> {
        let path = path.into();
        let broadcaster = Arc::new_cyclic(|weak: &Weak<Self>| {
            let b = weak.clone();
            let track = events.track_changed.subscribe(move |track| {
                if let Some(b) = b.upgrade() {
                    b.update(|snapshot| {
                        snapshot.set_track(track);
                        true
                    });
                }
            });

            let b = weak.clone();
            let status = events.status_changed.subscribe(move |status| {
                if let Some(b) = b.upgrade() {
                    b.update(|snapshot| {
                        snapshot.set_status(*status);
                        true
                    });
                }
            });

            let b = weak.clone();
            let position = events.position_changed.subscribe(move |position| {
                if let Some(b) = b.upgrade() {
                    b.update(|snapshot| snapshot.set_position(position));
                }
            });

            Self {
                path,
                snapshot: Mutex::new(PlayerSnapshot::default()),
                events: events.clone(),
                subscriptions: Subscriptions {
                    track,
                    status,
                    position,
                },
            }
        });

        debug!(path = %broadcaster.path.display(), "Player state broadcaster attached");
        broadcaster
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, apply: impl FnOnce(&mut PlayerSnapshot) -> bool) {
        // Le verrou est gardé pendant l'écriture : deux écritures
        // concurrentes ne s'entrelacent pas.
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if apply(&mut snapshot) {
            if let Err(err) = self.write(&snapshot) {
                warn!(path = %self.path.display(), error = %err, "Failed to write player state");
            }
        }
    }

    fn write(&self, snapshot: &PlayerSnapshot) -> anyhow::Result<()> {
        let json = serde_json::to_string(snapshot)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl Drop for StateBroadcaster {
    fn drop(&mut self) {
        self.events.track_changed.unsubscribe(self.subscriptions.track);
        self.events.status_changed.unsubscribe(self.subscriptions.status);
        self.events
            .position_changed
            .unsubscribe(self.subscriptions.position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tmcsource::{Track, TrackSource};

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_writes_track_and_status() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let events = PlayerEvents::new();
        let broadcaster = StateBroadcaster::attach(&path, &events);

        let track = Track::new(TrackSource::Library, "Song", "Band")
            .with_library_id("l1")
            .with_album("Record", "Band", 1)
            .with_duration_ms(125_000)
            .into_ref();
        events.track_changed.publish(track);
        events.status_changed.publish(PlaybackStatus::Playing);

        let json = read(&path);
        assert_eq!(json["artist"], "Band");
        assert_eq!(json["title"], "Song");
        assert_eq!(json["album_name"], "Record");
        assert_eq!(json["length"], 125);
        assert_eq!(json["playing"], true);
        assert_eq!(json["loading"], false);
        assert_eq!(broadcaster.snapshot().length, 125);
    }

    #[test]
    fn test_position_is_throttled_to_seconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let events = PlayerEvents::new();
        let _broadcaster = StateBroadcaster::attach(&path, &events);

        let at = |elapsed_ms| PlaybackPosition {
            fraction: 0.0,
            elapsed_ms,
            duration_ms: 10_000,
        };

        events.position_changed.publish(at(400));
        // toujours la seconde 0 : rien n'est écrit
        assert!(!path.exists());

        events.position_changed.publish(at(2_100));
        assert_eq!(read(&path)["progress"], 2);
    }

    #[test]
    fn test_drop_releases_subscriptions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let events = PlayerEvents::new();
        let broadcaster = StateBroadcaster::attach(&path, &events);
        assert_eq!(events.track_changed.len(), 1);

        drop(broadcaster);
        assert!(events.track_changed.is_empty());
        assert!(events.status_changed.is_empty());
        assert!(events.position_changed.is_empty());

        events.status_changed.publish(PlaybackStatus::Playing);
        assert!(!path.exists());
    }
}
