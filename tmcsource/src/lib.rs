//! # TMCSource
//!
//! Accès au catalogue musical distant pour TMCMusic.
//!
//! - [`Catalog`] : le contrat attendu du catalogue (authentification,
//!   récupération des pistes, playlists et stations, URL de streaming,
//!   modification de la bibliothèque). Chaque méthode est synchrone et
//!   bloquante ; le cache les appelle depuis des tâches de fond.
//! - [`RemoteCache`] : cache des collections distantes, rempli une seule
//!   fois par époque d'invalidation.
//! - [`YamlCatalog`] : un catalogue servi depuis un fichier YAML local.
//!
//! ## Exemple
//!
//! ```no_run
//! use std::sync::Arc;
//! use tmcsource::{CatalogEvents, RemoteCache, YamlCatalog};
//! use tmcutils::TaskRunner;
//!
//! let catalog = Arc::new(YamlCatalog::open("library.yaml")?);
//! let cache = RemoteCache::new(catalog, TaskRunner::new(), CatalogEvents::new(), 50);
//! cache.get_all_tracks_async(|result| match result {
//!     Ok(tracks) => println!("{} tracks", tracks.len()),
//!     Err(e) => eprintln!("fetch failed: {e}"),
//! })?;
//! # Ok::<(), tmcsource::CatalogError>(())
//! ```

pub mod cache;
pub mod models;
pub mod views;
pub mod yaml_catalog;

pub use cache::{CatalogEvents, RemoteCache};
pub use models::{
    Album, AlbumKind, Artist, Credentials, LibraryMutation, Playlist, PlaylistEntry,
    PlaylistKind, Rating, RemotePlaylist, SearchResults, Station, StationRef, Track, TrackRef,
    TrackSource,
};
pub use yaml_catalog::YamlCatalog;

use thiserror::Error;
use tmcutils::TaskError;

/// Type Result personnalisé pour tmcsource
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Erreurs du catalogue et du cache
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Non authentifié, ou identifiants refusés
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Ressource inconnue du catalogue
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Échec de l'appel au catalogue
    #[error("Catalog transport error: {0}")]
    Transport(String),

    /// Données du catalogue inexploitables
    #[error("Invalid catalog data: {0}")]
    InvalidData(String),

    /// Opération non proposée par ce catalogue
    #[error("Operation not supported by this catalog: {0}")]
    NotSupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// La tâche de fond n'a pas pu aboutir
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl CatalogError {
    pub fn is_auth_error(&self) -> bool {
        matches!(self, CatalogError::Unauthorized(_))
    }
}

/// Catalogue musical distant.
///
/// Les méthodes sont appelées depuis des threads de fond, éventuellement
/// plusieurs à la fois : l'implémentation doit être `Send + Sync`.
pub trait Catalog: Send + Sync {
    /// Ouvre une session. `Ok(false)` signifie identifiants refusés.
    fn login(&self, credentials: &Credentials) -> Result<bool>;

    fn is_authenticated(&self) -> bool;

    /// Toutes les pistes de la bibliothèque de l'utilisateur.
    fn fetch_all_tracks(&self) -> Result<Vec<TrackRef>>;

    fn fetch_all_playlists(&self) -> Result<Vec<RemotePlaylist>>;

    fn fetch_all_stations(&self) -> Result<Vec<StationRef>>;

    /// Jusqu'à `count` pistes pour la station `station_id`.
    fn fetch_station_tracks(&self, station_id: &str, count: usize) -> Result<Vec<TrackRef>>;

    /// URL (ou chemin) lisible pour la piste. Sa validité peut être limitée.
    fn resolve_stream_url(&self, track_id: &str) -> Result<String>;

    /// Ajoute ou retire une piste de la bibliothèque.
    ///
    /// `Ok(false)` signifie que le catalogue n'a rien changé.
    fn mutate_library(&self, track: &Track, mutation: LibraryMutation) -> Result<bool>;

    fn search(&self, _query: &str) -> Result<SearchResults> {
        Err(CatalogError::NotSupported("search"))
    }

    fn rate_track(&self, _track: &Track, _rating: Rating) -> Result<()> {
        Err(CatalogError::NotSupported("rate_track"))
    }

    /// Crée une station à partir d'une piste.
    fn create_station(&self, _name: &str, _seed: &Track) -> Result<StationRef> {
        Err(CatalogError::NotSupported("create_station"))
    }
}
