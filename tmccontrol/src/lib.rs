//! # tmccontrol - Pilotage de la lecture
//!
//! Ce crate rassemble la partie « lecteur » du client :
//!
//! - [`PlaybackQueue`] : la file de lecture, son historique et ses modes
//!   (aléatoire, répétition d'une piste) ;
//! - [`PlaybackCoordinator`] : la machine à états qui relie la file, la
//!   résolution des URL de streaming et le backend média ;
//! - [`MediaBackend`] : le contrat du lecteur audio, avec une implémentation
//!   simulée ([`SimulatedBackend`]) ;
//! - [`StateBroadcaster`] : l'export de l'état du lecteur en JSON ;
//! - [`Session`] : l'assemblage de l'ensemble autour d'un catalogue.
//!
//! ## Exemple
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tmccontrol::{Session, SessionOptions, SimulatedBackend};
//! use tmcsource::YamlCatalog;
//!
//! # fn main() -> anyhow::Result<()> {
//! let catalog = Arc::new(YamlCatalog::open("library.yaml")?);
//! let backend = Arc::new(SimulatedBackend::new(Duration::from_secs(180))?);
//! let session = Session::new(catalog, backend, SessionOptions::default())?;
//!
//! let tracks = session.cache().get_all_tracks()?;
//! session.coordinator().load_queue(tracks, None)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod queue;
pub mod session;
pub mod simulated;
pub mod state_file;

pub use backend::{MediaBackend, SeekTarget};
pub use coordinator::PlaybackCoordinator;
pub use errors::{ControlError, Result};
pub use events::{
    MediaEvents, MediaState, PlaybackFailure, PlaybackFlags, PlaybackPosition, PlaybackStatus,
    PlayerEvents,
};
pub use queue::PlaybackQueue;
pub use session::{Session, SessionOptions};
pub use simulated::SimulatedBackend;
pub use state_file::{PlayerSnapshot, StateBroadcaster};
