use wabridge_common::SectorId;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sector {0} does not exist")]
    UnknownSector(SectorId),

    #[error("sector {0} is served by the official API, not the bridge")]
    UnsupportedTenantMode(SectorId),

    #[error("failed to connect sector {sector_id}: {source}")]
    ConnectFailed {
        sector_id: SectorId,
        #[source]
        source: TransportError,
    },

    #[error("sector {0} did not reconnect in time")]
    ReconnectTimeout(SectorId),

    #[error("no fresh pairing code for sector {0}")]
    PairingTimeout(SectorId),

    #[error("send failed: {0}")]
    SendFailed(#[source] TransportError),

    #[error("sector {0} is not connected")]
    NotConnected(SectorId),

    #[error("sector {0} has no live session")]
    NoSession(SectorId),

    #[error("invalid recipient {0:?}")]
    InvalidRecipient(String),

    #[error(transparent)]
    Persistence(#[from] wabridge_store::Error),

    #[error("blob storage failed: {0:#}")]
    Blob(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn connect(sector_id: SectorId, source: TransportError) -> Self {
        Self::ConnectFailed { sector_id, source }
    }
}
