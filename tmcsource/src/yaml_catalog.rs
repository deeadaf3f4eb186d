//! Catalogue servi depuis un fichier YAML.
//!
//! Le fichier décrit un compte, des pistes (dans la bibliothèque ou
//! seulement "en boutique"), des playlists et des stations. Les
//! modifications (bibliothèque, notes, nouvelles stations) restent en
//! mémoire et ne sont jamais réécrites dans le fichier.
//!
//! ```yaml
//! account:
//!   username: demo
//!   password: demo
//! tracks:
//!   - id: lib-1
//!     store_id: T1
//!     title: So What
//!     artist: Miles Davis
//!     album: Kind of Blue
//!     track_number: 1
//!     duration_ms: 562000
//!     rating: 5
//!     stream: /music/so-what.flac
//! playlists:
//!   - id: p1
//!     name: Evening
//!     tracks: [lib-1, T7]
//! stations:
//!   - id: s1
//!     name: Jazz radio
//!     seed: lib-1
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::models::{
    Credentials, LibraryMutation, PlaylistEntry, Rating, RemotePlaylist, SearchResults, Station,
    StationRef, Track, TrackRef, TrackSource, now_millis,
};
use crate::views;
use crate::{Catalog, CatalogError, Result};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Identifiant de bibliothèque
    pub id: String,
    /// Identifiant de boutique, `id` à défaut
    #[serde(default)]
    pub store_id: Option<String>,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album_artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub album_id: Option<String>,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub rating: Rating,
    /// Présente dans la bibliothèque au démarrage
    #[serde(default = "default_true")]
    pub in_library: bool,
    /// URL ou chemin du fichier audio
    #[serde(default)]
    pub stream: Option<String>,
}

impl TrackRecord {
    fn store_id(&self) -> &str {
        self.store_id.as_deref().unwrap_or(&self.id)
    }

    fn matches(&self, id: &str) -> bool {
        self.id == id || self.store_id() == id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub id: String,
    pub name: String,
    /// Identifiants de bibliothèque ou de boutique
    #[serde(default)]
    pub tracks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub seed: Option<String>,
}

/// Contenu d'un fichier de bibliothèque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryFile {
    #[serde(default)]
    pub account: Option<AccountRecord>,
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub playlists: Vec<PlaylistRecord>,
    #[serde(default)]
    pub stations: Vec<StationRecord>,
}

struct CatalogState {
    authenticated: bool,
    library: HashSet<String>,
    ratings: HashMap<String, (Rating, u64)>,
    stations: Vec<StationRecord>,
    created_stations: u64,
}

pub struct YamlCatalog {
    base_dir: Option<PathBuf>,
    account: Option<AccountRecord>,
    records: Vec<TrackRecord>,
    playlists: Vec<PlaylistRecord>,
    state: Mutex<CatalogState>,
}

impl std::fmt::Debug for YamlCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YamlCatalog")
            .field("base_dir", &self.base_dir)
            .field("tracks", &self.records.len())
            .field("playlists", &self.playlists.len())
            .finish()
    }
}

impl YamlCatalog {
    /// Charge un fichier de bibliothèque. Les chemins `stream` relatifs sont
    /// résolus par rapport au répertoire du fichier.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let library: LibraryFile = serde_yaml::from_str(&content)?;
        let mut catalog = Self::from_library(library)?;
        catalog.base_dir = path.parent().map(Path::to_path_buf);
        info!(
            file = %path.display(),
            tracks = catalog.records.len(),
            playlists = catalog.playlists.len(),
            "Library file loaded"
        );
        Ok(catalog)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::from_library(serde_yaml::from_str(content)?)
    }

    pub fn from_library(library: LibraryFile) -> Result<Self> {
        let mut seen = HashSet::new();
        for record in &library.tracks {
            if !seen.insert(record.id.as_str()) {
                return Err(CatalogError::InvalidData(format!(
                    "duplicate track id '{}'",
                    record.id
                )));
            }
        }

        let state = CatalogState {
            authenticated: false,
            library: library
                .tracks
                .iter()
                .filter(|r| r.in_library)
                .map(|r| r.id.clone())
                .collect(),
            ratings: library
                .tracks
                .iter()
                .map(|r| (r.id.clone(), (r.rating, 0)))
                .collect(),
            stations: library.stations,
            created_stations: 0,
        };

        Ok(Self {
            base_dir: None,
            account: library.account,
            records: library.tracks,
            playlists: library.playlists,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_auth(&self) -> Result<()> {
        if self.state().authenticated {
            Ok(())
        } else {
            Err(CatalogError::Unauthorized("not logged in".to_string()))
        }
    }

    fn record(&self, id: &str) -> Option<&TrackRecord> {
        self.records.iter().find(|r| r.matches(id))
    }

    /// Retrouve l'enregistrement d'une piste par l'un de ses identifiants,
    /// y compris un identifiant d'entrée de playlist (`<playlist>:<position>`).
    fn record_for_id(&self, id: &str) -> Option<&TrackRecord> {
        if let Some(record) = self.record(id) {
            return Some(record);
        }
        let (playlist_id, position) = id.rsplit_once(':')?;
        let position: usize = position.parse().ok()?;
        let playlist = self.playlists.iter().find(|p| p.id == playlist_id)?;
        self.record(playlist.tracks.get(position)?)
    }

    fn record_for_track(&self, track: &Track) -> Option<&TrackRecord> {
        track.ids().find_map(|id| self.record_for_id(id))
    }

    fn build_track(&self, record: &TrackRecord, source: TrackSource, state: &CatalogState) -> Track {
        let (rating, changed_at) = state
            .ratings
            .get(&record.id)
            .copied()
            .unwrap_or((Rating::None, 0));

        let mut track = Track::new(source, &record.title, &record.artist)
            .with_store_id(record.store_id())
            .with_album(&record.album, &record.album_artist, record.track_number)
            .with_duration_ms(record.duration_ms)
            .with_genre(&record.genre)
            .with_explicit(record.explicit)
            .with_rating(rating, changed_at);
        if source == TrackSource::Library {
            track = track.with_library_id(&record.id);
        }
        if let Some(album_id) = &record.album_id {
            track = track.with_album_id(album_id);
        }
        track
    }

    fn stream_location(&self, record: &TrackRecord) -> String {
        match &record.stream {
            Some(stream) if stream.contains("://") => stream.clone(),
            Some(stream) => {
                let path = Path::new(stream);
                match &self.base_dir {
                    Some(base) if path.is_relative() => base.join(path).to_string_lossy().to_string(),
                    _ => stream.clone(),
                }
            }
            None => format!("simulated://{}", record.id),
        }
    }
}

impl Catalog for YamlCatalog {
    fn login(&self, credentials: &Credentials) -> Result<bool> {
        let accepted = match &self.account {
            Some(account) => {
                account.username == credentials.username && account.password == credentials.password
            }
            None => !credentials.username.is_empty(),
        };
        self.state().authenticated = accepted;
        Ok(accepted)
    }

    fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    fn fetch_all_tracks(&self) -> Result<Vec<TrackRef>> {
        self.require_auth()?;
        let state = self.state();
        Ok(self
            .records
            .iter()
            .filter(|r| state.library.contains(&r.id))
            .map(|r| self.build_track(r, TrackSource::Library, &state).into_ref())
            .collect())
    }

    fn fetch_all_playlists(&self) -> Result<Vec<RemotePlaylist>> {
        self.require_auth()?;
        let state = self.state();
        Ok(self
            .playlists
            .iter()
            .map(|playlist| {
                let entries = playlist
                    .tracks
                    .iter()
                    .enumerate()
                    .map(|(position, id)| match self.record(id) {
                        Some(record) if state.library.contains(&record.id) => {
                            PlaylistEntry::LibraryRef(record.id.clone())
                        }
                        Some(record) => PlaylistEntry::Track(
                            self.build_track(record, TrackSource::Playlist, &state)
                                .with_playlist_item_id(format!("{}:{}", playlist.id, position))
                                .into_ref(),
                        ),
                        // Laissé au cache, qui l'écarte
                        None => PlaylistEntry::LibraryRef(id.clone()),
                    })
                    .collect();
                RemotePlaylist {
                    id: playlist.id.clone(),
                    name: playlist.name.clone(),
                    entries,
                }
            })
            .collect())
    }

    fn fetch_all_stations(&self) -> Result<Vec<StationRef>> {
        self.require_auth()?;
        Ok(self
            .state()
            .stations
            .iter()
            .map(|s| Station::new(&s.id, &s.name).into_ref())
            .collect())
    }

    fn fetch_station_tracks(&self, station_id: &str, count: usize) -> Result<Vec<TrackRef>> {
        self.require_auth()?;
        let state = self.state();

        let seed = if station_id == crate::models::LUCKY_STATION_ID {
            None
        } else {
            let station = state
                .stations
                .iter()
                .find(|s| s.id == station_id)
                .ok_or_else(|| CatalogError::NotFound(format!("station '{station_id}'")))?;
            station.seed.as_deref().and_then(|id| self.record(id))
        };

        // Pistes proches de la graine (même artiste ou même genre) en premier
        let related = |r: &TrackRecord| match seed {
            Some(seed) => {
                r.artist.eq_ignore_ascii_case(&seed.artist)
                    || (!seed.genre.is_empty() && r.genre.eq_ignore_ascii_case(&seed.genre))
            }
            None => true,
        };
        let ordered = self
            .records
            .iter()
            .filter(|r| related(*r))
            .chain(self.records.iter().filter(|r| !related(*r)));

        let tracks: Vec<TrackRef> = ordered
            .take(count)
            .map(|r| self.build_track(r, TrackSource::Station, &state).into_ref())
            .collect();
        debug!(station = station_id, count = tracks.len(), "Station tracks generated");
        Ok(tracks)
    }

    fn resolve_stream_url(&self, track_id: &str) -> Result<String> {
        self.require_auth()?;
        let record = self
            .record_for_id(track_id)
            .ok_or_else(|| CatalogError::NotFound(format!("track '{track_id}'")))?;
        Ok(self.stream_location(record))
    }

    fn mutate_library(&self, track: &Track, mutation: LibraryMutation) -> Result<bool> {
        self.require_auth()?;
        let record = self
            .record_for_track(track)
            .ok_or_else(|| CatalogError::NotFound(format!("track '{}'", track.title)))?;

        let mut state = self.state();
        Ok(match mutation {
            LibraryMutation::Add => state.library.insert(record.id.clone()),
            LibraryMutation::Remove => state.library.remove(&record.id),
        })
    }

    fn search(&self, query: &str) -> Result<SearchResults> {
        self.require_auth()?;
        let query = query.to_lowercase();
        let state = self.state();

        let tracks: Vec<TrackRef> = self
            .records
            .iter()
            .filter(|r| {
                r.title.to_lowercase().contains(&query)
                    || r.artist.to_lowercase().contains(&query)
                    || r.album.to_lowercase().contains(&query)
            })
            .map(|r| self.build_track(r, TrackSource::Search, &state).into_ref())
            .collect();

        let artists = views::group_artists(&tracks);
        let albums = views::regular_albums(&artists);
        Ok(SearchResults {
            tracks,
            artists,
            albums,
        })
    }

    fn rate_track(&self, track: &Track, rating: Rating) -> Result<()> {
        self.require_auth()?;
        let record = self
            .record_for_track(track)
            .ok_or_else(|| CatalogError::NotFound(format!("track '{}'", track.title)))?;
        self.state()
            .ratings
            .insert(record.id.clone(), (rating, now_millis()));
        Ok(())
    }

    fn create_station(&self, name: &str, seed: &Track) -> Result<StationRef> {
        self.require_auth()?;
        let record = self
            .record_for_track(seed)
            .ok_or_else(|| CatalogError::NotFound(format!("track '{}'", seed.title)))?;

        let mut state = self.state();
        state.created_stations += 1;
        let id = format!("created-{}", state.created_stations);
        state.stations.push(StationRecord {
            id: id.clone(),
            name: name.to_string(),
            seed: Some(record.id.clone()),
        });
        Ok(Station::new(id, name).into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"
account:
  username: demo
  password: secret
tracks:
  - id: lib-1
    store_id: T1
    title: So What
    artist: Miles Davis
    album: Kind of Blue
    track_number: 1
    genre: Jazz
    rating: 5
    stream: http://example.invalid/so-what.mp3
  - id: lib-2
    title: Blue in Green
    artist: Miles Davis
    album: Kind of Blue
    track_number: 3
    genre: Jazz
  - id: lib-3
    title: Paranoid Android
    artist: Radiohead
    album: OK Computer
    genre: Rock
  - id: store-only
    store_id: T9
    title: Naima
    artist: John Coltrane
    genre: Jazz
    in_library: false
playlists:
  - id: p1
    name: Evening
    tracks: [lib-2, T9, ghost]
stations:
  - id: s1
    name: Coltrane radio
    seed: T9
"#;

    fn logged_in() -> YamlCatalog {
        let catalog = YamlCatalog::from_yaml_str(LIBRARY).unwrap();
        assert!(catalog.login(&Credentials::new("demo", "secret")).unwrap());
        catalog
    }

    #[test]
    fn test_login_checks_account() {
        let catalog = YamlCatalog::from_yaml_str(LIBRARY).unwrap();
        assert!(!catalog.login(&Credentials::new("demo", "wrong")).unwrap());
        assert!(!catalog.is_authenticated());
        assert!(catalog.fetch_all_tracks().unwrap_err().is_auth_error());

        assert!(catalog.login(&Credentials::new("demo", "secret")).unwrap());
        assert!(catalog.is_authenticated());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let yaml = "tracks:\n  - {id: a, title: x, artist: y}\n  - {id: a, title: z, artist: y}\n";
        assert!(matches!(
            YamlCatalog::from_yaml_str(yaml),
            Err(CatalogError::InvalidData(_))
        ));
    }

    #[test]
    fn test_library_tracks_only() {
        let catalog = logged_in();
        let tracks = catalog.fetch_all_tracks().unwrap();
        let ids: Vec<_> = tracks.iter().map(|t| t.primary_id().unwrap()).collect();
        assert_eq!(ids, vec!["lib-1", "lib-2", "lib-3"]);
        assert_eq!(tracks[0].rating(), Rating::ThumbsUp);
        assert_eq!(tracks[1].store_id.as_deref(), Some("lib-2"));
    }

    #[test]
    fn test_playlist_entries() {
        let catalog = logged_in();
        let playlists = catalog.fetch_all_playlists().unwrap();
        let entries = &playlists[0].entries;

        assert!(matches!(&entries[0], PlaylistEntry::LibraryRef(id) if id == "lib-2"));
        match &entries[1] {
            PlaylistEntry::Track(track) => {
                assert_eq!(track.playlist_item_id.as_deref(), Some("p1:1"));
                assert_eq!(track.title, "Naima");
            }
            other => panic!("unexpected entry {other:?}"),
        }
        assert!(matches!(&entries[2], PlaylistEntry::LibraryRef(id) if id == "ghost"));
    }

    #[test]
    fn test_station_tracks_start_with_related() {
        let catalog = logged_in();
        let tracks = catalog.fetch_station_tracks("s1", 3).unwrap();
        let titles: Vec<_> = tracks.iter().map(|t| t.title.as_str()).collect();
        // Graine : Naima (Jazz) ; le rock vient en dernier et est coupé
        assert_eq!(titles, vec!["So What", "Blue in Green", "Naima"]);
        assert!(tracks.iter().all(|t| t.source == TrackSource::Station));

        assert_eq!(catalog.fetch_station_tracks("IFL", 50).unwrap().len(), 4);
        assert!(matches!(
            catalog.fetch_station_tracks("nope", 5),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_stream_url() {
        let catalog = logged_in();
        assert_eq!(
            catalog.resolve_stream_url("T1").unwrap(),
            "http://example.invalid/so-what.mp3"
        );
        assert_eq!(catalog.resolve_stream_url("lib-3").unwrap(), "simulated://lib-3");
        assert_eq!(catalog.resolve_stream_url("p1:1").unwrap(), "simulated://store-only");
        assert!(catalog.resolve_stream_url("unknown").is_err());
    }

    #[test]
    fn test_mutate_library_reports_change() {
        let catalog = logged_in();
        let naima = catalog.fetch_station_tracks("s1", 3).unwrap()[2].clone();

        assert!(catalog.mutate_library(&naima, LibraryMutation::Add).unwrap());
        assert!(!catalog.mutate_library(&naima, LibraryMutation::Add).unwrap());
        assert_eq!(catalog.fetch_all_tracks().unwrap().len(), 4);

        assert!(catalog.mutate_library(&naima, LibraryMutation::Remove).unwrap());
        assert!(!catalog.mutate_library(&naima, LibraryMutation::Remove).unwrap());
    }

    #[test]
    fn test_search_groups_results() {
        let catalog = logged_in();
        let results = catalog.search("miles").unwrap();
        assert_eq!(results.tracks.len(), 2);
        assert_eq!(results.artists.len(), 1);
        assert_eq!(results.albums.len(), 1);
        assert!(results.tracks.iter().all(|t| t.source == TrackSource::Search));
    }

    #[test]
    fn test_created_station_uses_seed() {
        let catalog = logged_in();
        let seed = catalog.fetch_all_tracks().unwrap()[2].clone();
        let station = catalog.create_station("Station - Paranoid Android", &seed).unwrap();

        let tracks = catalog.fetch_station_tracks(&station.id, 1).unwrap();
        assert_eq!(tracks[0].title, "Paranoid Android");
        assert_eq!(catalog.fetch_all_stations().unwrap().len(), 2);
    }

    #[test]
    fn test_open_resolves_relative_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.yaml");
        fs::write(
            &path,
            "tracks:\n  - {id: a, title: x, artist: y, stream: music/a.flac}\n",
        )
        .unwrap();

        let catalog = YamlCatalog::open(&path).unwrap();
        assert!(catalog.login(&Credentials::new("anyone", "")).unwrap());
        assert_eq!(
            catalog.resolve_stream_url("a").unwrap(),
            dir.path().join("music/a.flac").to_string_lossy()
        );
    }
}
