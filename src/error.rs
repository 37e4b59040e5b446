//! Error types for the import core.
//!
//! Only two classes of problem abort a run: an input that cannot be read and
//! a target schema that cannot be resolved. Everything else is reported as a
//! RunLog diagnostic, so [`ImportError`] stays small. [`StoreError`] is the
//! typed failure contract of a [`RecordStore`](crate::store::RecordStore).

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("File {} not found", path.display())]
    InputNotFound { path: PathBuf },

    #[error("Could not open specified csv file, {}", path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No readable .{extension} files found in {}", path.display())]
    NoInputFiles { path: PathBuf, extension: String },

    #[error("Sorry your model '{name}' could not be found, please check context.Entity")]
    UnknownEntity { name: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Duplicate entry '{value}' for key '{entity}.{field}'")]
    DuplicateKey {
        entity: String,
        field: String,
        value: String,
    },

    #[error("{message}")]
    Other { code: u32, message: String },
}

impl StoreError {
    /// Error code reported for a unique-constraint violation.
    pub const DUPLICATE_KEY_CODE: u32 = 1062;

    pub fn other(code: u32, message: impl Into<String>) -> Self {
        StoreError::Other {
            code,
            message: message.into(),
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        match self {
            StoreError::DuplicateKey { .. } => true,
            StoreError::Other { code, .. } => *code == Self::DUPLICATE_KEY_CODE,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            StoreError::DuplicateKey { .. } => Self::DUPLICATE_KEY_CODE,
            StoreError::Other { code, .. } => *code,
        }
    }
}
