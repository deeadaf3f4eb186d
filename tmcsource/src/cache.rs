//! Cache en mémoire des collections du catalogue distant.
//!
//! Chaque collection (pistes, playlists, stations) est soit non remplie,
//! soit entièrement remplie par un fetch réussi : aucun état partiel n'est
//! observable. Le remplissage de chaque collection passe par son propre
//! [`SerialGuard`], et le test "déjà rempli ?" est fait à l'intérieur de la
//! section critique : des appels concurrents ne déclenchent qu'un seul fetch
//! par époque d'invalidation.
//!
//! [`RemoteCache::invalidate`] ne prend aucun de ces verrous. Un remplissage
//! déjà en cours au moment de l'invalidation peut donc terminer et stocker
//! un résultat périmé ; la lecture suivante le servira. C'est une limite
//! connue de ce cache, sans compteur de génération.
//!
//! Les méthodes `*_async` exécutent leur version synchrone sur le
//! [`TaskRunner`] et livrent le résultat au callback, sur le thread de la
//! tâche, que le cache ait été rempli ou non.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use tmcutils::{EventHook, SerialGuard, Serialized, TaskRunner};

use crate::models::{
    Artist, Credentials, LibraryMutation, Playlist, PlaylistEntry, PlaylistKind, Rating,
    RemotePlaylist, SearchResults, Station, StationRef, Track, TrackRef,
};
use crate::views;
use crate::{Catalog, CatalogError, Result};

/// Événements publiés par le cache.
#[derive(Clone, Debug)]
pub struct CatalogEvents {
    /// Toutes les collections viennent d'être vidées.
    pub caches_invalidated: EventHook<()>,
    /// Résultat d'une tentative de connexion : authentifié ou non.
    pub auth_state_changed: EventHook<bool>,
}

impl CatalogEvents {
    pub fn new() -> Self {
        Self {
            caches_invalidated: EventHook::named("caches_invalidated"),
            auth_state_changed: EventHook::named("auth_state_changed"),
        }
    }
}

impl Default for CatalogEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Collections {
    /// Indexées par identifiant principal, dans l'ordre du catalogue
    tracks: Option<IndexMap<String, TrackRef>>,
    /// Playlists distantes seulement ; "Liked Songs" est recalculée
    playlists: Option<Vec<Playlist>>,
    stations: Option<Vec<StationRef>>,
}

/// Connexion sous son propre verrou : invalidation puis appel au catalogue.
type LoginOp = fn((&RemoteCache, &Credentials)) -> Result<bool>;

struct Inner {
    catalog: Arc<dyn Catalog>,
    runner: TaskRunner,
    events: CatalogEvents,
    collections: Mutex<Collections>,
    tracks_guard: SerialGuard,
    playlists_guard: SerialGuard,
    stations_guard: SerialGuard,
    login: Serialized<LoginOp>,
    station_fetch_length: usize,
}

/// Cache des collections distantes.
///
/// `RemoteCache` est un handle partagé : le cloner ne copie pas le cache.
#[derive(Clone)]
pub struct RemoteCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collections = self.collections();
        f.debug_struct("RemoteCache")
            .field("tracks", &collections.tracks.as_ref().map(IndexMap::len))
            .field("playlists", &collections.playlists.as_ref().map(Vec::len))
            .field("stations", &collections.stations.as_ref().map(Vec::len))
            .finish()
    }
}

impl RemoteCache {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        runner: TaskRunner,
        events: CatalogEvents,
        station_fetch_length: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                runner,
                events,
                collections: Mutex::new(Collections::default()),
                tracks_guard: SerialGuard::new("fetch_all_tracks"),
                playlists_guard: SerialGuard::new("fetch_all_playlists"),
                stations_guard: SerialGuard::new("fetch_all_stations"),
                login: Serialized::new("login", RemoteCache::login_locked as LoginOp),
                station_fetch_length,
            }),
        }
    }

    pub fn events(&self) -> &CatalogEvents {
        &self.inner.events
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.inner.catalog
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.inner.runner
    }

    fn collections(&self) -> MutexGuard<'_, Collections> {
        self.inner
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tracks_populated(&self) -> bool {
        self.collections().tracks.is_some()
    }

    pub fn playlists_populated(&self) -> bool {
        self.collections().playlists.is_some()
    }

    pub fn stations_populated(&self) -> bool {
        self.collections().stations.is_some()
    }

    /// Runs `work` on the task runner with a handle on this cache.
    fn spawn<T, W, C>(&self, name: &str, work: W, callback: C) -> Result<()>
    where
        T: Send + 'static,
        W: FnOnce(&RemoteCache) -> Result<T> + Send + 'static,
        C: FnOnce(Result<T>) + Send + 'static,
    {
        let cache = self.clone();
        self.inner.runner.run(name, move || work(&cache), callback)?;
        Ok(())
    }

    // ============ Pistes ============

    /// Toutes les pistes de la bibliothèque, depuis le cache ou le catalogue.
    pub fn get_all_tracks(&self) -> Result<Vec<TrackRef>> {
        self.inner.tracks_guard.run(|| {
            let cached = self
                .collections()
                .tracks
                .as_ref()
                .map(|tracks| tracks.values().cloned().collect::<Vec<_>>());
            if let Some(tracks) = cached {
                debug!(count = tracks.len(), "Track cache hit");
                return Ok(tracks);
            }

            debug!("Track cache miss, fetching from catalog");
            let fetched = self.inner.catalog.fetch_all_tracks()?;

            let mut map = IndexMap::with_capacity(fetched.len());
            for track in fetched {
                let Some(id) = track.primary_id().map(str::to_string) else {
                    warn!(title = %track.title, "Dropping track without identifier");
                    continue;
                };
                map.insert(id, track);
            }

            let tracks: Vec<TrackRef> = map.values().cloned().collect();
            info!(count = tracks.len(), "Track cache populated");
            self.collections().tracks = Some(map);
            Ok(tracks)
        })
    }

    pub fn get_all_tracks_async<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<TrackRef>>) + Send + 'static,
    {
        self.spawn("tracks", |cache| cache.get_all_tracks(), callback)
    }

    /// Cherche une piste en cache par n'importe lequel de ses identifiants.
    ///
    /// Ne déclenche aucun fetch : `None` si la piste est inconnue ou si les
    /// pistes ne sont pas en cache.
    pub fn get_track_by_id(&self, id: &str) -> Option<TrackRef> {
        let collections = self.collections();
        let tracks = collections.tracks.as_ref()?;
        tracks
            .get(id)
            .or_else(|| tracks.values().find(|t| t.has_id(id)))
            .cloned()
    }

    // ============ Playlists ============

    /// "Liked Songs" suivie des playlists distantes.
    ///
    /// Les pistes sont remplies d'abord : les entrées de playlist qui ne
    /// référencent qu'une piste de la bibliothèque sont résolues contre elles.
    pub fn get_all_playlists(&self) -> Result<Vec<Playlist>> {
        self.inner.playlists_guard.run(|| {
            let cached = self.collections().playlists.clone();
            let remote = match cached {
                Some(playlists) => {
                    debug!(count = playlists.len(), "Playlist cache hit");
                    playlists
                }
                None => {
                    debug!("Playlist cache miss, fetching from catalog");
                    let tracks = self.get_all_tracks()?;
                    let fetched = self.inner.catalog.fetch_all_playlists()?;
                    let playlists = resolve_playlists(fetched, &tracks);
                    info!(count = playlists.len(), "Playlist cache populated");
                    self.collections().playlists = Some(playlists.clone());
                    playlists
                }
            };

            let mut all = Vec::with_capacity(remote.len() + 1);
            all.push(self.liked_songs());
            all.extend(remote);
            Ok(all)
        })
    }

    pub fn get_all_playlists_async<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<Playlist>>) + Send + 'static,
    {
        self.spawn("playlists", |cache| cache.get_all_playlists(), callback)
    }

    /// Playlist des titres aimés, recalculée depuis les pistes en cache.
    pub fn liked_songs(&self) -> Playlist {
        let collections = self.collections();
        match collections.tracks.as_ref() {
            Some(tracks) => views::liked_songs(tracks.values()),
            None => views::liked_songs(std::iter::empty()),
        }
    }

    // ============ Stations ============

    /// Stations de l'utilisateur, précédées de "I'm Feeling Lucky".
    pub fn get_all_stations(&self) -> Result<Vec<StationRef>> {
        self.inner.stations_guard.run(|| {
            let cached = self.collections().stations.clone();
            if let Some(stations) = cached {
                debug!(count = stations.len(), "Station cache hit");
                return Ok(stations);
            }

            debug!("Station cache miss, fetching from catalog");
            let fetched = self.inner.catalog.fetch_all_stations()?;
            let mut stations = Vec::with_capacity(fetched.len() + 1);
            stations.push(Station::lucky().into_ref());
            stations.extend(fetched);

            info!(count = stations.len(), "Station cache populated");
            self.collections().stations = Some(stations.clone());
            Ok(stations)
        })
    }

    pub fn get_all_stations_async<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<StationRef>>) + Send + 'static,
    {
        self.spawn("stations", |cache| cache.get_all_stations(), callback)
    }

    /// Charge les pistes d'une station (non mis en cache côté `RemoteCache`,
    /// la station garde ses pistes).
    pub fn load_station_tracks(&self, station: &StationRef) -> Result<Vec<TrackRef>> {
        let tracks = self
            .inner
            .catalog
            .fetch_station_tracks(&station.id, self.inner.station_fetch_length)?;
        debug!(station = %station.id, count = tracks.len(), "Station tracks loaded");
        station.set_tracks(tracks.clone());
        Ok(tracks)
    }

    pub fn load_station_tracks_async<C>(&self, station: StationRef, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<TrackRef>>) + Send + 'static,
    {
        self.spawn(
            "station",
            move |cache| cache.load_station_tracks(&station),
            callback,
        )
    }

    /// Crée une station à partir d'une piste et charge ses pistes.
    pub fn create_station(&self, seed: &TrackRef) -> Result<StationRef> {
        let name = format!("Station - {}", seed.title);
        let station = self.inner.catalog.create_station(&name, seed)?;
        info!(station = %station.id, name = %station.name, "Station created");
        self.load_station_tracks(&station)?;
        Ok(station)
    }

    pub fn create_station_async<C>(&self, seed: TrackRef, callback: C) -> Result<()>
    where
        C: FnOnce(Result<StationRef>) + Send + 'static,
    {
        self.spawn(
            "create_station",
            move |cache| cache.create_station(&seed),
            callback,
        )
    }

    // ============ Artistes ============

    /// Artistes calculés depuis les pistes en cache (vide si non remplies).
    pub fn artists(&self) -> Vec<Artist> {
        let collections = self.collections();
        match collections.tracks.as_ref() {
            Some(tracks) => views::group_artists(tracks.values()),
            None => Vec::new(),
        }
    }

    pub fn get_artists(&self) -> Result<Vec<Artist>> {
        let tracks = self.get_all_tracks()?;
        Ok(views::group_artists(&tracks))
    }

    pub fn get_artists_async<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Vec<Artist>>) + Send + 'static,
    {
        self.spawn("artists", |cache| cache.get_artists(), callback)
    }

    // ============ Invalidation et authentification ============

    /// Vide toutes les collections et publie `caches_invalidated`.
    pub fn invalidate(&self) {
        {
            let mut collections = self.collections();
            collections.tracks = None;
            collections.playlists = None;
            collections.stations = None;
        }
        info!("Remote caches invalidated");
        self.inner.events.caches_invalidated.publish(());
    }

    /// Se connecte au catalogue.
    ///
    /// Les caches sont invalidés avant l'appel ; `auth_state_changed` est
    /// publié ensuite avec l'état d'authentification du catalogue, même en
    /// cas d'erreur.
    pub fn login(&self, credentials: &Credentials) -> Result<bool> {
        let outcome = self.inner.login.call((self, credentials));

        match &outcome {
            Ok(true) => info!(user = %credentials.username, "Logged in"),
            Ok(false) => warn!(user = %credentials.username, "Credentials rejected"),
            Err(err) => warn!(user = %credentials.username, error = %err, "Login failed"),
        }

        let authenticated = self.inner.catalog.is_authenticated();
        self.inner.events.auth_state_changed.publish(authenticated);
        outcome
    }

    fn login_locked((cache, credentials): (&RemoteCache, &Credentials)) -> Result<bool> {
        cache.invalidate();
        cache.inner.catalog.login(credentials)
    }

    pub fn login_async<C>(&self, credentials: Credentials, callback: C) -> Result<()>
    where
        C: FnOnce(Result<bool>) + Send + 'static,
    {
        self.spawn("login", move |cache| cache.login(&credentials), callback)
    }

    // ============ Bibliothèque ============

    fn mutate_library(&self, track: &Track, mutation: LibraryMutation) -> Result<bool> {
        match self.inner.catalog.mutate_library(track, mutation) {
            Ok(true) => {
                info!(track = %track, ?mutation, "Library changed");
                self.invalidate();
                Ok(true)
            }
            Ok(false) => {
                debug!(track = %track, ?mutation, "Library unchanged");
                Ok(false)
            }
            Err(err) => {
                warn!(track = %track, ?mutation, error = %err, "Library mutation failed");
                Err(err)
            }
        }
    }

    /// Ajoute la piste à la bibliothèque ; invalide les caches si le
    /// catalogue a effectivement changé.
    pub fn add_to_my_library(&self, track: &Track) -> Result<bool> {
        self.mutate_library(track, LibraryMutation::Add)
    }

    pub fn remove_from_my_library(&self, track: &Track) -> Result<bool> {
        self.mutate_library(track, LibraryMutation::Remove)
    }

    pub fn add_to_my_library_async<C>(&self, track: TrackRef, callback: C) -> Result<()>
    where
        C: FnOnce(Result<bool>) + Send + 'static,
    {
        self.spawn(
            "add_to_library",
            move |cache| cache.add_to_my_library(&track),
            callback,
        )
    }

    pub fn remove_from_my_library_async<C>(&self, track: TrackRef, callback: C) -> Result<()>
    where
        C: FnOnce(Result<bool>) + Send + 'static,
    {
        self.spawn(
            "remove_from_library",
            move |cache| cache.remove_from_my_library(&track),
            callback,
        )
    }

    /// Note une piste. La note locale n'est modifiée qu'après succès distant.
    pub fn rate_track(&self, track: &Track, rating: Rating) -> Result<()> {
        self.inner.catalog.rate_track(track, rating)?;
        track.set_rating(rating);
        debug!(track = %track, ?rating, "Track rated");
        Ok(())
    }

    pub fn rate_track_async<C>(&self, track: TrackRef, rating: Rating, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.spawn(
            "rate",
            move |cache| cache.rate_track(&track, rating),
            callback,
        )
    }

    // ============ Recherche et streaming ============

    pub fn search(&self, query: &str) -> Result<SearchResults> {
        let results = self.inner.catalog.search(query)?;
        debug!(query, tracks = results.tracks.len(), "Search done");
        Ok(results)
    }

    pub fn search_async<C>(&self, query: String, callback: C) -> Result<()>
    where
        C: FnOnce(Result<SearchResults>) + Send + 'static,
    {
        self.spawn("search", move |cache| cache.search(&query), callback)
    }

    /// Résout l'URL de streaming de la piste et la garde dans `cached_url`.
    pub fn resolve_stream_url(&self, track: &Track) -> Result<String> {
        let id = track.primary_id().ok_or_else(|| {
            CatalogError::InvalidData(format!("track '{}' has no identifier", track.title))
        })?;
        let url = self.inner.catalog.resolve_stream_url(id)?;
        debug!(track = id, url = %url, "Stream URL resolved");
        track.set_cached_url(url.clone());
        Ok(url)
    }

    pub fn resolve_stream_url_async<C>(&self, track: TrackRef, callback: C) -> Result<()>
    where
        C: FnOnce(Result<String>) + Send + 'static,
    {
        self.spawn(
            "resolve_url",
            move |cache| cache.resolve_stream_url(&track),
            callback,
        )
    }
}

/// Resolves library references against the track cache; unknown references
/// are dropped.
fn resolve_playlists(fetched: Vec<RemotePlaylist>, tracks: &[TrackRef]) -> Vec<Playlist> {
    let mut by_id: HashMap<&str, &TrackRef> = HashMap::new();
    for track in tracks {
        for id in track.ids() {
            by_id.entry(id).or_insert(track);
        }
    }

    fetched
        .into_iter()
        .map(|remote| {
            let tracks = remote
                .entries
                .into_iter()
                .filter_map(|entry| match entry {
                    PlaylistEntry::Track(track) => Some(track),
                    PlaylistEntry::LibraryRef(id) => match by_id.get(id.as_str()) {
                        Some(track) => Some(TrackRef::clone(track)),
                        None => {
                            warn!(playlist = %remote.id, track = %id, "Unknown library track in playlist");
                            None
                        }
                    },
                })
                .collect();

            Playlist {
                id: remote.id,
                name: remote.name,
                kind: PlaylistKind::Remote,
                tracks,
            }
        })
        .collect()
}
