use wabridge_common::SectorId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("contact not found: {0}")]
    ContactNotFound(String),

    #[error("invalid phone number: {0:?}")]
    InvalidNumber(String),

    #[error("sector {0} not found")]
    SectorNotFound(SectorId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
