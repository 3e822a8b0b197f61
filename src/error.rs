use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("an archive run is already in progress")]
    RunInProgress,
    #[error("archive lock {0} is held by another process")]
    Locked(PathBuf),
    #[error("local source root does not exist: {0}")]
    SourceRootMissing(PathBuf),
    #[error("local source root is not writable: {path}: {reason}")]
    SourceNotWritable { path: PathBuf, reason: String },
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("persisted state is corrupt: {0}")]
    StateCorrupt(String),
}

impl ArchiverError {
    pub fn code(&self) -> ArchiverErrorCode {
        match self {
            Self::RunInProgress | Self::Locked(_) => ArchiverErrorCode::E001RunLocked,
            Self::SourceRootMissing(_) => ArchiverErrorCode::E002SourceMissing,
            Self::SourceNotWritable { .. } => ArchiverErrorCode::E003SourceReadOnly,
            Self::InvalidConfig(_) => ArchiverErrorCode::E004ConfigInvalid,
            Self::StateCorrupt(_) => ArchiverErrorCode::E005StateCorrupt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiverErrorCode {
    E001RunLocked,
    E002SourceMissing,
    E003SourceReadOnly,
    E004ConfigInvalid,
    E005StateCorrupt,
}

impl ArchiverErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001RunLocked => "E001_RUN_LOCKED",
            Self::E002SourceMissing => "E002_SOURCE_MISSING",
            Self::E003SourceReadOnly => "E003_SOURCE_READ_ONLY",
            Self::E004ConfigInvalid => "E004_CONFIG_INVALID",
            Self::E005StateCorrupt => "E005_STATE_CORRUPT",
        }
    }
}
