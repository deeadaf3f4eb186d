//! Structures de données du catalogue : pistes, playlists, stations,
//! artistes et albums.
//!
//! Une [`Track`] est partagée (`Arc`) entre le cache, les playlists et la
//! file de lecture. Seuls sa note et son URL de streaming en cache sont
//! mutables, derrière leurs propres verrous.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

pub type TrackRef = Arc<Track>;
pub type StationRef = Arc<Station>;

/// Identifiant de la station synthétique "I'm Feeling Lucky".
pub const LUCKY_STATION_ID: &str = "IFL";
/// Identifiant de la playlist synthétique des titres aimés.
pub const LIKED_SONGS_ID: &str = "LIKED";
/// Identifiant de l'album synthétique regroupant tous les titres d'un artiste.
pub const ALL_SONGS_ID: &str = "ALL";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Provenance d'une piste, qui détermine son identifiant principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Library,
    Station,
    Playlist,
    Search,
}

/// Note d'une piste : pas de note, pouce bas, pouce haut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Rating {
    #[default]
    None = 0,
    ThumbsDown = 1,
    ThumbsUp = 5,
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rating::None),
            1 => Ok(Rating::ThumbsDown),
            5 => Ok(Rating::ThumbsUp),
            other => Err(format!("invalid rating {other}, expected 0, 1 or 5")),
        }
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating as u8
    }
}

#[derive(Debug, Clone, Copy)]
struct RatingState {
    rating: Rating,
    changed_at: u64,
}

/// Piste connue du catalogue distant.
///
/// Selon sa provenance, au moins un des identifiants `library_id`,
/// `store_id` ou `playlist_item_id` est renseigné. Deux pistes sont égales
/// dès qu'elles partagent un identifiant.
#[derive(Debug)]
pub struct Track {
    pub library_id: Option<String>,
    pub store_id: Option<String>,
    pub playlist_item_id: Option<String>,
    pub source: TrackSource,
    pub title: String,
    pub artist: String,
    pub album_artist: String,
    pub album_name: String,
    pub album_id: Option<String>,
    pub track_number: u32,
    pub duration_ms: u64,
    pub genre: String,
    pub explicit: bool,
    rating: Mutex<RatingState>,
    cached_url: Mutex<Option<String>>,
}

impl Track {
    pub fn new(source: TrackSource, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            library_id: None,
            store_id: None,
            playlist_item_id: None,
            source,
            title: title.into(),
            artist: artist.into(),
            album_artist: String::new(),
            album_name: String::new(),
            album_id: None,
            track_number: 0,
            duration_ms: 0,
            genre: String::new(),
            explicit: false,
            rating: Mutex::new(RatingState {
                rating: Rating::None,
                changed_at: 0,
            }),
            cached_url: Mutex::new(None),
        }
    }

    pub fn with_library_id(mut self, id: impl Into<String>) -> Self {
        self.library_id = Some(id.into());
        self
    }

    pub fn with_store_id(mut self, id: impl Into<String>) -> Self {
        self.store_id = Some(id.into());
        self
    }

    pub fn with_playlist_item_id(mut self, id: impl Into<String>) -> Self {
        self.playlist_item_id = Some(id.into());
        self
    }

    pub fn with_album(
        mut self,
        name: impl Into<String>,
        album_artist: impl Into<String>,
        track_number: u32,
    ) -> Self {
        self.album_name = name.into();
        self.album_artist = album_artist.into();
        self.track_number = track_number;
        self
    }

    pub fn with_album_id(mut self, id: impl Into<String>) -> Self {
        self.album_id = Some(id.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    /// Note initiale et date (ms epoch) de son dernier changement.
    pub fn with_rating(self, rating: Rating, changed_at: u64) -> Self {
        *lock(&self.rating) = RatingState { rating, changed_at };
        self
    }

    pub fn into_ref(self) -> TrackRef {
        Arc::new(self)
    }

    /// Identifiant à utiliser pour les appels au catalogue.
    ///
    /// Les pistes de la bibliothèque préfèrent leur identifiant de
    /// bibliothèque, les autres leur identifiant de boutique.
    pub fn primary_id(&self) -> Option<&str> {
        let ordered = match self.source {
            TrackSource::Library => [&self.library_id, &self.store_id, &self.playlist_item_id],
            _ => [&self.store_id, &self.library_id, &self.playlist_item_id],
        };
        ordered.into_iter().find_map(|id| id.as_deref())
    }

    /// Tous les identifiants renseignés.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        [&self.library_id, &self.store_id, &self.playlist_item_id]
            .into_iter()
            .filter_map(|id| id.as_deref())
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.ids().any(|own| own == id)
    }

    pub fn rating(&self) -> Rating {
        lock(&self.rating).rating
    }

    pub fn rating_changed_at(&self) -> u64 {
        lock(&self.rating).changed_at
    }

    pub fn set_rating(&self, rating: Rating) {
        *lock(&self.rating) = RatingState {
            rating,
            changed_at: now_millis(),
        };
    }

    pub fn cached_url(&self) -> Option<String> {
        lock(&self.cached_url).clone()
    }

    /// Remplace l'URL en cache ; sa durée de validité n'est pas suivie.
    pub fn set_cached_url(&self, url: impl Into<String>) {
        *lock(&self.cached_url) = Some(url.into());
    }

    /// Artiste de l'album, ou artiste de la piste à défaut.
    pub fn display_album_artist(&self) -> &str {
        if self.album_artist.is_empty() {
            &self.artist
        } else {
            &self.album_artist
        }
    }

    /// Durée au format `m:ss`.
    pub fn duration_label(&self) -> String {
        let seconds = self.duration_ms / 1000;
        format!("{}:{:02}", seconds / 60, seconds % 60)
    }
}

fn same_id(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        same_id(&self.library_id, &other.library_id)
            || same_id(&self.store_id, &other.store_id)
            || same_id(&self.playlist_item_id, &other.playlist_item_id)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Remote,
    LikedSongs,
}

/// Playlist prête à l'affichage : les entrées sont résolues en pistes.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub kind: PlaylistKind,
    pub tracks: Vec<TrackRef>,
}

/// Entrée de playlist telle que la renvoie le catalogue.
#[derive(Debug, Clone)]
pub enum PlaylistEntry {
    /// Piste complète, portée par la playlist.
    Track(TrackRef),
    /// Référence à une piste de la bibliothèque, résolue via le cache.
    LibraryRef(String),
}

/// Playlist telle que la renvoie le catalogue.
#[derive(Debug, Clone)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
    pub entries: Vec<PlaylistEntry>,
}

/// Station radio dont les pistes sont chargées à la demande.
#[derive(Debug)]
pub struct Station {
    pub id: String,
    pub name: String,
    tracks: Mutex<Option<Vec<TrackRef>>>,
}

impl Station {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tracks: Mutex::new(None),
        }
    }

    /// La station "I'm Feeling Lucky", toujours proposée en tête de liste.
    pub fn lucky() -> Self {
        Self::new(LUCKY_STATION_ID, "I'm Feeling Lucky")
    }

    pub fn into_ref(self) -> StationRef {
        Arc::new(self)
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.tracks).is_some()
    }

    /// Pistes chargées, `None` tant que la station n'a pas été chargée.
    pub fn tracks(&self) -> Option<Vec<TrackRef>> {
        lock(&self.tracks).clone()
    }

    pub fn set_tracks(&self, tracks: Vec<TrackRef>) {
        *lock(&self.tracks) = Some(tracks);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumKind {
    Regular,
    AllSongs,
}

#[derive(Debug, Clone)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub kind: AlbumKind,
    pub tracks: Vec<TrackRef>,
}

#[derive(Debug, Clone)]
pub struct Artist {
    pub name: String,
    pub albums: Vec<Album>,
}

impl Artist {
    /// Nombre de pistes distinctes (hors album "All Songs").
    pub fn track_count(&self) -> usize {
        self.albums
            .iter()
            .filter(|a| a.kind == AlbumKind::Regular)
            .map(|a| a.tracks.len())
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub tracks: Vec<TrackRef>,
    pub artists: Vec<Artist>,
    pub albums: Vec<Album>,
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryMutation {
    Add,
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_on_any_shared_id() {
        let library = Track::new(TrackSource::Library, "Song", "Band")
            .with_library_id("lib-1")
            .with_store_id("T1");
        let station = Track::new(TrackSource::Station, "Song", "Band").with_store_id("T1");
        let other = Track::new(TrackSource::Station, "Song", "Band").with_store_id("T2");
        let bare = Track::new(TrackSource::Search, "Song", "Band");

        assert_eq!(library, station);
        assert_ne!(station, other);
        // Deux identifiants absents ne font pas une identité commune
        assert_ne!(bare, Track::new(TrackSource::Search, "Song", "Band"));
    }

    #[test]
    fn test_primary_id_follows_provenance() {
        let library = Track::new(TrackSource::Library, "a", "b")
            .with_library_id("lib-1")
            .with_store_id("T1");
        let station = Track::new(TrackSource::Station, "a", "b")
            .with_library_id("lib-1")
            .with_store_id("T1");
        let item = Track::new(TrackSource::Playlist, "a", "b").with_playlist_item_id("p1:0");

        assert_eq!(library.primary_id(), Some("lib-1"));
        assert_eq!(station.primary_id(), Some("T1"));
        assert_eq!(item.primary_id(), Some("p1:0"));
        assert_eq!(Track::new(TrackSource::Search, "a", "b").primary_id(), None);
    }

    #[test]
    fn test_rating_values() {
        assert_eq!(Rating::try_from(5), Ok(Rating::ThumbsUp));
        assert_eq!(Rating::try_from(1), Ok(Rating::ThumbsDown));
        assert_eq!(Rating::try_from(0), Ok(Rating::None));
        assert!(Rating::try_from(3).is_err());
        assert_eq!(u8::from(Rating::ThumbsUp), 5);
    }

    #[test]
    fn test_set_rating_records_change_time() {
        let track = Track::new(TrackSource::Library, "a", "b").with_rating(Rating::ThumbsDown, 10);
        assert_eq!(track.rating_changed_at(), 10);

        track.set_rating(Rating::ThumbsUp);
        assert_eq!(track.rating(), Rating::ThumbsUp);
        assert!(track.rating_changed_at() > 10);
    }

    #[test]
    fn test_cached_url_is_overwritten() {
        let track = Track::new(TrackSource::Library, "a", "b");
        assert_eq!(track.cached_url(), None);
        track.set_cached_url("http://one");
        track.set_cached_url("http://two");
        assert_eq!(track.cached_url().as_deref(), Some("http://two"));
    }

    #[test]
    fn test_duration_label() {
        let track = Track::new(TrackSource::Library, "a", "b").with_duration_ms(185_400);
        assert_eq!(track.duration_label(), "3:05");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("me", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
