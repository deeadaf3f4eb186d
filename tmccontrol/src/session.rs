//! Assemblage d'une session : cache distant, coordinateur de lecture et
//! diffuseur d'état, autour d'un même exécuteur de tâches.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tmcsource::{Catalog, CatalogEvents, RemoteCache};
use tmcutils::TaskRunner;
use tracing::{info, warn};

use crate::backend::MediaBackend;
use crate::coordinator::PlaybackCoordinator;
use crate::errors::Result;
use crate::events::PlayerEvents;
use crate::queue::PlaybackQueue;
use crate::state_file::StateBroadcaster;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Nombre de pistes demandées par radio
    pub station_fetch_length: usize,
    pub volume: u8,
    pub shuffle: bool,
    pub repeat_one: bool,
    /// Fichier d'état JSON, désactivé si `None`
    pub state_file: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            station_fetch_length: 50,
            volume: 80,
            shuffle: false,
            repeat_one: false,
            state_file: None,
        }
    }
}

pub struct Session {
    runner: TaskRunner,
    cache: RemoteCache,
    coordinator: PlaybackCoordinator,
    broadcaster: Option<Arc<StateBroadcaster>>,
}

impl Session {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        backend: Arc<dyn MediaBackend>,
        options: SessionOptions,
    ) -> Result<Self> {
        let runner = TaskRunner::new();
        let cache = RemoteCache::new(
            catalog,
            runner.clone(),
            CatalogEvents::new(),
            options.station_fetch_length,
        );

        let mut queue = PlaybackQueue::new();
        queue.set_shuffle(options.shuffle);
        queue.set_repeat_one(options.repeat_one);

        let coordinator =
            PlaybackCoordinator::new(cache.clone(), backend, PlayerEvents::new(), queue);
        coordinator.set_volume(options.volume)?;

        let broadcaster = options
            .state_file
            .map(|path| StateBroadcaster::attach(path, coordinator.events()));

        info!(
            volume = options.volume,
            shuffle = options.shuffle,
            repeat_one = options.repeat_one,
            "Session ready"
        );

        Ok(Self {
            runner,
            cache,
            coordinator,
            broadcaster,
        })
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn cache(&self) -> &RemoteCache {
        &self.cache
    }

    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }

    pub fn broadcaster(&self) -> Option<&Arc<StateBroadcaster>> {
        self.broadcaster.as_ref()
    }

    /// Arrête la lecture, libère le backend et attend les tâches en cours.
    ///
    /// Retourne `false` si des tâches tournaient encore après `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if let Err(err) = self.coordinator.stop() {
            warn!(error = %err, "Failed to stop playback during shutdown");
        }
        self.coordinator.backend().shutdown();

        let idle = self.runner.wait_idle(timeout);
        if !idle {
            warn!(in_flight = self.runner.in_flight(), "Tasks still running at shutdown");
        }
        info!("Session closed");
        idle
    }
}
