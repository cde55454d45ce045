//! Instrument Directory Port (Driven Port)
//!
//! Source of instrument codes used to seed default subscriptions before any
//! view has reported what it shows.

use async_trait::async_trait;

use crate::domain::quote::InstrumentId;

/// Instrument directory error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    /// Directory backend could not be reached.
    #[error("Instrument directory unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for listing known instruments.
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    /// Instrument codes in display order.
    async fn instrument_codes(&self) -> Result<Vec<InstrumentId>, DirectoryError>;
}

/// Directory backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticInstrumentDirectory {
    codes: Vec<InstrumentId>,
}

impl StaticInstrumentDirectory {
    /// Create a directory over `codes`.
    #[must_use]
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InstrumentId>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl InstrumentDirectory for StaticInstrumentDirectory {
    async fn instrument_codes(&self) -> Result<Vec<InstrumentId>, DirectoryError> {
        Ok(self.codes.clone())
    }
}
