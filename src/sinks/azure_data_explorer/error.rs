use std::fmt;

use snafu::Snafu;

use crate::codecs::SerializeError;

/// Failures that abort a whole write.
///
/// Rejected ingestion requests are not reported here; they are logged and
/// the remaining tables of the batch are still sent.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum WriteError {
    #[snafu(display("Failed to serialize metrics: {}", source))]
    Serialize { source: SerializeError },

    #[snafu(display("Creating table {:?} failed: {}", table, source))]
    ProvisionTable {
        table: String,
        source: crate::Error,
    },

    #[snafu(display("Unable to create ingestor for table {:?}: the sink is closed", table))]
    CreateIngestor { table: String },
}

/// Every failure seen while tearing the sink down.
#[derive(Debug)]
pub struct CloseError {
    errors: Vec<crate::Error>,
}

impl CloseError {
    /// `Ok(())` when `errors` is empty.
    pub fn from_errors(errors: Vec<crate::Error>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self { errors })
        }
    }

    pub fn errors(&self) -> &[crate::Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<crate::Error> {
        self.errors
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) while closing:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}
