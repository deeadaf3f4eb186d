use rand::{Rng, SeedableRng, rngs::StdRng};
use std::fmt;
use tmcsource::{Track, TrackRef};

use crate::errors::{ControlError, Result};

/// File de lecture : pistes ordonnées, position courante et historique.
///
/// Invariant : `current_index` est `None` ou désigne une position valide.
/// Une file vide n'a jamais de position ; une file remplie par `append`
/// seul n'en a pas non plus. Les entrées de l'historique peuvent devenir
/// caduques après un retrait ; `prev` les ignore.
///
/// Aucune synchronisation ici : le coordinateur protège la file par son
/// propre verrou.
pub struct PlaybackQueue {
    tracks: Vec<TrackRef>,
    current_index: Option<usize>,
    history: Vec<usize>,
    shuffle: bool,
    repeat_one: bool,
    rng: StdRng,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// File dont le tirage aléatoire est reproductible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current_index: None,
            history: Vec::new(),
            shuffle: false,
            repeat_one: false,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn history(&self) -> &[usize] {
        &self.history
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat_one(&self) -> bool {
        self.repeat_one
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
    }

    pub fn set_repeat_one(&mut self, repeat_one: bool) {
        self.repeat_one = repeat_one;
    }

    pub fn current_track(&self) -> Option<TrackRef> {
        self.current_index.and_then(|i| self.tracks.get(i)).cloned()
    }

    /// Remplace le contenu de la file et vide l'historique.
    ///
    /// Sans `start_index`, la lecture démarre à la première piste.
    pub fn load(&mut self, tracks: Vec<TrackRef>, start_index: Option<usize>) -> Result<()> {
        if let Some(index) = start_index {
            if index >= tracks.len() {
                return Err(ControlError::invalid_index(index, tracks.len()));
            }
        }

        self.current_index = match start_index {
            Some(index) => Some(index),
            None if tracks.is_empty() => None,
            None => Some(0),
        };
        self.tracks = tracks;
        self.history.clear();
        Ok(())
    }

    /// Ajoute une piste en fin de file, sans toucher à la position : pour
    /// démarrer une file vide, passer par `load`.
    pub fn append(&mut self, track: TrackRef) {
        self.tracks.push(track);
    }

    /// Retire la première piste égale à `track`.
    ///
    /// Retourne la position et la piste retirées, `None` si la piste n'est
    /// pas dans la file (rien n'est alors modifié).
    ///
    /// Retirer la piste courante laisse l'index en place : la suivante prend
    /// sa place. Si c'était la dernière, on revient au début.
    pub fn remove(&mut self, track: &Track) -> Option<(usize, TrackRef)> {
        let index = self.tracks.iter().position(|t| **t == *track)?;
        let removed = self.tracks.remove(index);

        self.current_index = match self.current_index {
            Some(current) if index < current => Some(current - 1),
            Some(_) if self.tracks.is_empty() => None,
            Some(current) if current >= self.tracks.len() => Some(0),
            other => other,
        };

        Some((index, removed))
    }

    /// Passe à la piste suivante.
    ///
    /// Avec `repeat_one` et sans `force`, la piste courante est rejouée et
    /// l'historique n'est pas touché. En mode aléatoire, la suivante est
    /// tirée uniformément (elle peut être la même).
    pub fn next(&mut self, force: bool) -> Option<TrackRef> {
        match self.current_index {
            None if self.tracks.is_empty() => return None,
            None => self.current_index = Some(0),
            Some(_) if self.repeat_one && !force => return self.current_track(),
            Some(index) => self.history.push(index),
        }

        // Première avance d'une file sans position : pas d'historique
        if self.repeat_one && !force {
            return self.current_track();
        }

        let len = self.tracks.len();
        let next = if self.shuffle {
            self.rng.random_range(0..len)
        } else {
            match self.current_index {
                Some(index) if index + 1 < len => index + 1,
                _ => 0,
            }
        };
        self.current_index = Some(next);
        self.current_track()
    }

    /// Revient à la piste précédente de l'historique.
    ///
    /// Historique vide : `None`, rien ne change. Les entrées devenues hors
    /// limites sont écartées.
    pub fn prev(&mut self, force: bool) -> Option<TrackRef> {
        if self.history.is_empty() {
            return None;
        }
        if self.repeat_one && !force {
            return self.current_track();
        }

        while let Some(index) = self.history.pop() {
            if index < self.tracks.len() {
                self.current_index = Some(index);
                return self.current_track();
            }
        }
        None
    }

    /// Saute à la position `index`, la position quittée entre dans
    /// l'historique.
    pub fn jump_to(&mut self, index: usize) -> Result<TrackRef> {
        let track = self
            .tracks
            .get(index)
            .cloned()
            .ok_or_else(|| ControlError::invalid_index(index, self.tracks.len()))?;
        if let Some(current) = self.current_index {
            self.history.push(current);
        }
        self.current_index = Some(index);
        Ok(track)
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("len", &self.tracks.len())
            .field("current_index", &self.current_index)
            .field("history", &self.history)
            .field("shuffle", &self.shuffle)
            .field("repeat_one", &self.repeat_one)
            .finish()
    }
}
