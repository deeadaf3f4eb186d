use thiserror::Error;
use tmcsource::CatalogError;
use tmcutils::TaskError;

#[derive(Error, Debug)]
pub enum ControlError {
    // Index hors de la file : erreur de programmation de l'appelant
    #[error("Invalid queue index {index} (queue has {len} tracks)")]
    InvalidIndex { index: usize, len: usize },
    #[error("Media backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ControlError {
    pub fn invalid_index(index: usize, len: usize) -> Self {
        ControlError::InvalidIndex { index, len }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
