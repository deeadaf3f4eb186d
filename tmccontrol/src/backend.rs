//! Contrat du backend média.
//!
//! Le coordinateur ne connaît le lecteur audio qu'à travers ce trait. Les
//! commandes sont asynchrones : le backend confirme les changements d'état
//! par ses [`MediaEvents`], publiés sur son propre thread.

use anyhow::Result;

use crate::events::MediaEvents;

/// Cible d'un déplacement dans la piste, en fraction de sa durée.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SeekTarget {
    /// Décalage relatif, négatif pour reculer
    Relative(f32),
    /// Position absolue entre 0 et 1
    Absolute(f32),
}

impl SeekTarget {
    /// Position résultante à partir de `position`, bornée à [0, 1].
    pub fn apply(self, position: f32) -> f32 {
        let target = match self {
            SeekTarget::Relative(delta) => position + delta,
            SeekTarget::Absolute(fraction) => fraction,
        };
        target.clamp(0.0, 1.0)
    }
}

/// Bornes des gains de l'égaliseur, en dB.
pub const EQUALIZER_MIN_DB: f32 = -20.0;
pub const EQUALIZER_MAX_DB: f32 = 20.0;

pub trait MediaBackend: Send + Sync {
    /// Démarre la lecture de `url`, en remplaçant la piste en cours.
    fn play(&self, url: &str) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn seek(&self, target: SeekTarget) -> Result<()>;

    /// Volume entre 0 et 100.
    fn set_volume(&self, volume: u8) -> Result<()>;

    fn volume(&self) -> u8;

    /// Fréquences centrales des bandes de l'égaliseur, en Hz.
    fn equalizer_frequencies(&self) -> Vec<u32>;

    /// Gain courant de chaque bande, en dB.
    fn equalizer_amps(&self) -> Vec<f32>;

    fn set_equalizer_band(&self, band: usize, amp: f32) -> Result<()>;

    fn events(&self) -> &MediaEvents;

    /// Libère les ressources du backend. Par défaut, rien à faire.
    fn shutdown(&self) {}
}
