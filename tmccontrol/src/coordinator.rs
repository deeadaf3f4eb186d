//! Coordinateur de lecture.
//!
//! Relie la file de lecture, la résolution asynchrone des URL de streaming
//! et le backend média. Les appels peuvent venir de n'importe quel thread :
//! l'interface, une tâche de résolution ou le thread du backend.
//!
//! Règles de concurrence :
//! - l'état (file, statut, numéro de requête) est sous un seul verrou, tenu
//!   brièvement, jamais pendant une publication ni un appel au backend ;
//! - chaque `play_current` incrémente le numéro de requête ; une résolution
//!   qui revient avec un numéro périmé est abandonnée ;
//! - le test « toujours d'actualité ? » puis l'appel `play` sont faits sous
//!   le verrou d'ordre du backend, que `stop` prend aussi. Ce verrou se
//!   prend toujours avant celui de l'état ;
//! - `issued` retient la requête transmise en dernier au backend : tant
//!   qu'elle n'est pas la requête courante, une confirmation de lecture ou
//!   une fin de piste vient de la piste précédente et ne change rien.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tmcsource::{CatalogError, RemoteCache, Track, TrackRef};
use tmcutils::SubscriptionId;
use tracing::{debug, info, warn};

use crate::backend::{MediaBackend, SeekTarget};
use crate::errors::Result;
use crate::events::{
    MediaState, PlaybackFailure, PlaybackFlags, PlaybackPosition, PlaybackStatus, PlayerEvents,
};
use crate::queue::PlaybackQueue;

struct PlayerState {
    queue: PlaybackQueue,
    status: PlaybackStatus,
    request: u64,
    /// Dernière requête passée à `backend.play`
    issued: Option<u64>,
    position: f32,
}

impl PlayerState {
    fn backend_is_current(&self) -> bool {
        self.issued == Some(self.request)
    }

    fn flags(&self) -> PlaybackFlags {
        PlaybackFlags {
            shuffle: self.queue.shuffle(),
            repeat_one: self.queue.repeat_one(),
        }
    }

    /// Change le statut ; retourne le nouveau statut s'il a changé.
    fn transition(&mut self, status: PlaybackStatus) -> Option<PlaybackStatus> {
        if self.status == status {
            None
        } else {
            self.status = status;
            Some(status)
        }
    }
}

struct MediaSubscriptions {
    state: SubscriptionId,
    position: SubscriptionId,
    end: SubscriptionId,
}

struct Inner {
    state: Mutex<PlayerState>,
    backend: Arc<dyn MediaBackend>,
    backend_order: Mutex<()>,
    cache: RemoteCache,
    events: PlayerEvents,
    subscriptions: Mutex<Option<MediaSubscriptions>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backend_order(&self) -> MutexGuard<'_, ()> {
        self.backend_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subs) = subscriptions {
            let events = self.backend.events();
            events.state_changed.unsubscribe(subs.state);
            events.position_changed.unsubscribe(subs.position);
            events.end_reached.unsubscribe(subs.end);
        }
    }
}

/// Pilote la lecture. Clonable : les clones partagent le même état.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    pub fn new(
        cache: RemoteCache,
        backend: Arc<dyn MediaBackend>,
        events: PlayerEvents,
        queue: PlaybackQueue,
    ) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(PlayerState {
                queue,
                status: PlaybackStatus::Idle,
                request: 0,
                issued: None,
                position: 0.0,
            }),
            backend,
            backend_order: Mutex::new(()),
            cache,
            events,
            subscriptions: Mutex::new(None),
        });

        // Les abonnements ne gardent qu'une référence faible : le backend ne
        // maintient pas le coordinateur en vie.
        let media = inner.backend.events();

        let weak = Arc::downgrade(&inner);
        let state = media.state_changed.subscribe(move |state| {
            if let Some(inner) = weak.upgrade() {
                Self::on_media_state(&inner, *state);
            }
        });

        let weak = Arc::downgrade(&inner);
        let position = media.position_changed.subscribe(move |fraction| {
            if let Some(inner) = weak.upgrade() {
                Self::on_media_position(&inner, *fraction);
            }
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let end = media.end_reached.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                let coordinator = PlaybackCoordinator { inner };
                if !Self::end_belongs_to_current(&coordinator.inner) {
                    debug!("Stale end of track ignored");
                    return;
                }
                if let Err(err) = coordinator.advance(false) {
                    warn!(error = %err, "Failed to advance after end of track");
                }
            }
        });

        *inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(MediaSubscriptions {
            state,
            position,
            end,
        });

        Self { inner }
    }

    pub fn events(&self) -> &PlayerEvents {
        &self.inner.events
    }

    pub fn cache(&self) -> &RemoteCache {
        &self.inner.cache
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.inner.backend
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner.state().status
    }

    pub fn current_track(&self) -> Option<TrackRef> {
        self.inner.state().queue.current_track()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.state().queue.current_index()
    }

    pub fn queue_tracks(&self) -> Vec<TrackRef> {
        self.inner.state().queue.tracks().to_vec()
    }

    pub fn flags(&self) -> PlaybackFlags {
        self.inner.state().flags()
    }

    /// Fraction lue de la piste courante.
    pub fn position(&self) -> f32 {
        self.inner.state().position
    }

    pub fn volume(&self) -> u8 {
        self.inner.backend.volume()
    }

    // ------------------------------------------------------------------
    // Lecture
    // ------------------------------------------------------------------

    /// Lance la lecture de la piste courante de la file.
    ///
    /// Passe en `Loading`, publie `track_changed`, puis résout l'URL en
    /// tâche de fond. Le passage en `Playing` n'a lieu qu'à la confirmation
    /// du backend. File vide : on reste (ou on repasse) en `Idle`.
    pub fn play_current(&self) -> Result<()> {
        let (track, request) = {
            let mut state = self.inner.state();
            let Some(track) = state.queue.current_track() else {
                drop(state);
                return self.go_idle();
            };
            state.request += 1;
            state.position = 0.0;
            state.transition(PlaybackStatus::Loading);
            (track, state.request)
        };

        info!(track = %track, request, "Loading track");
        self.inner.events.status_changed.publish(PlaybackStatus::Loading);
        self.inner.events.track_changed.publish(Arc::clone(&track));

        let weak = Arc::downgrade(&self.inner);
        let resolved = Arc::clone(&track);
        let spawned = self
            .inner
            .cache
            .resolve_stream_url_async(Arc::clone(&track), move |result| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_url_resolved(&inner, request, resolved, result);
                }
            });

        if let Err(err) = spawned {
            Self::fail(&self.inner, request, track, err.to_string());
            return Err(err.into());
        }
        Ok(())
    }

    /// Passe à la piste suivante et la joue. File épuisée : `Idle`.
    pub fn advance(&self, force: bool) -> Result<Option<TrackRef>> {
        let next = self.inner.state().queue.next(force);
        self.play_or_idle(next)
    }

    /// Revient à la piste précédente et la joue. Historique vide : `Idle`.
    pub fn retreat(&self, force: bool) -> Result<Option<TrackRef>> {
        let previous = self.inner.state().queue.prev(force);
        self.play_or_idle(previous)
    }

    /// Joue la piste à la position `index` de la file.
    pub fn play_index(&self, index: usize) -> Result<TrackRef> {
        let track = self.inner.state().queue.jump_to(index)?;
        self.play_current()?;
        Ok(track)
    }

    fn play_or_idle(&self, track: Option<TrackRef>) -> Result<Option<TrackRef>> {
        match track {
            Some(track) => {
                self.play_current()?;
                Ok(Some(track))
            }
            None => {
                self.go_idle()?;
                Ok(None)
            }
        }
    }

    /// Bascule lecture/pause. Depuis `Idle`, relance la piste courante.
    pub fn play_pause(&self) -> Result<()> {
        let status = self.status();
        match status {
            PlaybackStatus::Playing => {
                let _order = self.inner.backend_order();
                self.inner.backend.pause()?;
            }
            PlaybackStatus::Paused => {
                let _order = self.inner.backend_order();
                self.inner.backend.resume()?;
            }
            PlaybackStatus::Idle => self.play_current()?,
            PlaybackStatus::Loading => debug!("play_pause ignored while loading"),
        }
        Ok(())
    }

    /// Arrête la lecture ; une résolution en cours sera ignorée.
    pub fn stop(&self) -> Result<()> {
        self.go_idle()
    }

    fn go_idle(&self) -> Result<()> {
        let (changed, stopped) = {
            let _order = self.inner.backend_order();
            let changed = {
                let mut state = self.inner.state();
                state.request += 1;
                state.position = 0.0;
                state.transition(PlaybackStatus::Idle)
            };
            let stopped = match changed {
                Some(_) => self.inner.backend.stop(),
                None => Ok(()),
            };
            (changed, stopped)
        };

        self.publish_status(changed);
        stopped?;
        Ok(())
    }

    pub fn seek(&self, target: SeekTarget) -> Result<()> {
        self.inner.backend.seek(target)?;
        Ok(())
    }

    pub fn set_volume(&self, volume: u8) -> Result<()> {
        self.inner.backend.set_volume(volume.min(100))?;
        Ok(())
    }

    pub fn equalizer_frequencies(&self) -> Vec<u32> {
        self.inner.backend.equalizer_frequencies()
    }

    pub fn equalizer_amps(&self) -> Vec<f32> {
        self.inner.backend.equalizer_amps()
    }

    pub fn set_equalizer_band(&self, band: usize, amp: f32) -> Result<()> {
        self.inner.backend.set_equalizer_band(band, amp)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // File
    // ------------------------------------------------------------------

    /// Remplace la file et démarre la lecture à `start_index` (ou au début).
    pub fn load_queue(&self, tracks: Vec<TrackRef>, start_index: Option<usize>) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state();
            state.queue.load(tracks, start_index)?;
            state.queue.tracks().to_vec()
        };
        info!(tracks = snapshot.len(), start_index = ?start_index, "Queue loaded");
        self.inner.events.queue_changed.publish(snapshot);
        self.play_current()
    }

    /// Ajoute une piste en fin de file, sans toucher à la lecture.
    pub fn append_to_queue(&self, track: TrackRef) {
        self.inner.state().queue.append(Arc::clone(&track));
        debug!(track = %track, "Track appended to queue");
        self.inner.events.track_appended.publish(track);
    }

    /// Retire une piste de la file.
    ///
    /// Si c'était la piste en cours de lecture, la piste qui prend sa place
    /// est jouée ; si la file devient vide, la lecture s'arrête.
    pub fn remove_from_queue(&self, track: &Track) -> Result<Option<TrackRef>> {
        let (removed, replay) = {
            let mut state = self.inner.state();
            let current = state.queue.current_index();
            let Some((index, removed)) = state.queue.remove(track) else {
                return Ok(None);
            };
            let replay = current == Some(index) && state.status != PlaybackStatus::Idle;
            (removed, replay)
        };
        // play_current retombe sur Idle (et arrête le backend) si la file
        // est maintenant vide.

        debug!(track = %removed, "Track removed from queue");
        self.inner
            .events
            .track_removed
            .publish(Arc::clone(&removed));

        if replay {
            self.play_current()?;
        }
        Ok(Some(removed))
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    pub fn set_shuffle(&self, shuffle: bool) {
        let flags = {
            let mut state = self.inner.state();
            state.queue.set_shuffle(shuffle);
            state.flags()
        };
        self.inner.events.playback_flags_changed.publish(flags);
    }

    pub fn set_repeat_one(&self, repeat_one: bool) {
        let flags = {
            let mut state = self.inner.state();
            state.queue.set_repeat_one(repeat_one);
            state.flags()
        };
        self.inner.events.playback_flags_changed.publish(flags);
    }

    pub fn toggle_shuffle(&self) -> bool {
        let shuffle = !self.flags().shuffle;
        self.set_shuffle(shuffle);
        shuffle
    }

    pub fn toggle_repeat_one(&self) -> bool {
        let repeat_one = !self.flags().repeat_one;
        self.set_repeat_one(repeat_one);
        repeat_one
    }

    // ------------------------------------------------------------------
    // Réactions
    // ------------------------------------------------------------------

    fn on_url_resolved(
        inner: &Arc<Inner>,
        request: u64,
        track: TrackRef,
        result: std::result::Result<String, CatalogError>,
    ) {
        let url = match result {
            Ok(url) => url,
            Err(err) => {
                Self::fail(inner, request, track, err.to_string());
                return;
            }
        };

        let played = {
            let _order = inner.backend_order();
            {
                let mut state = inner.state();
                if state.request != request {
                    debug!(track = %track, request, "Stale stream URL discarded");
                    return;
                }
                state.issued = Some(request);
            }
            inner.backend.play(&url)
        };

        if let Err(err) = played {
            Self::fail(inner, request, track, err.to_string());
        }
    }

    /// Abandonne la requête `request` si elle est toujours d'actualité.
    fn fail(inner: &Arc<Inner>, request: u64, track: TrackRef, message: String) {
        let changed = {
            let _order = inner.backend_order();
            let changed = {
                let mut state = inner.state();
                if state.request != request {
                    return;
                }
                state.transition(PlaybackStatus::Idle)
            };
            // la piste précédente ne doit pas continuer à jouer
            if changed.is_some() {
                if let Err(err) = inner.backend.stop() {
                    warn!(error = %err, "Failed to stop media backend");
                }
            }
            changed
        };

        warn!(track = %track, error = %message, "Playback failed");
        if let Some(status) = changed {
            inner.events.status_changed.publish(status);
        }
        inner
            .events
            .playback_error
            .publish(PlaybackFailure { track, message });
    }

    fn on_media_state(inner: &Arc<Inner>, media: MediaState) {
        let changed = {
            let mut state = inner.state();
            let next = match (state.status, media.playing) {
                // Événements tardifs après un arrêt
                (PlaybackStatus::Idle, _) => None,
                // La nouvelle piste n'a pas encore été transmise au backend
                (PlaybackStatus::Loading, true) if !state.backend_is_current() => None,
                (_, true) => Some(PlaybackStatus::Playing),
                (PlaybackStatus::Playing, false) if !media.loading => {
                    Some(PlaybackStatus::Paused)
                }
                _ => None,
            };
            next.and_then(|status| state.transition(status))
        };

        if let Some(status) = changed {
            debug!(status = status.as_str(), "Playback status changed");
            inner.events.status_changed.publish(status);
        }
    }

    /// Une fin de piste n'est prise en compte qu'une fois la piste courante
    /// confirmée par le backend.
    fn end_belongs_to_current(inner: &Inner) -> bool {
        let state = inner.state();
        matches!(state.status, PlaybackStatus::Playing | PlaybackStatus::Paused)
            && state.backend_is_current()
    }

    fn on_media_position(inner: &Arc<Inner>, fraction: f32) {
        let position = {
            let mut state = inner.state();
            if state.status == PlaybackStatus::Idle || !state.backend_is_current() {
                return;
            }
            state.position = fraction;
            let duration_ms = state
                .queue
                .current_track()
                .map_or(0, |t| t.duration_ms);
            PlaybackPosition {
                fraction,
                elapsed_ms: (duration_ms as f64 * fraction as f64) as u64,
                duration_ms,
            }
        };
        inner.events.position_changed.publish(position);
    }

    fn publish_status(&self, changed: Option<PlaybackStatus>) {
        if let Some(status) = changed {
            self.inner.events.status_changed.publish(status);
        }
    }
}
