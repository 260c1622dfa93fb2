use std::path::{Path, PathBuf};
use thiserror::Error;

mod bac;
mod bcm;
mod codec;
mod container;
mod store;
mod survey;
mod table;
mod transplant;

pub use bac::{BacEntry, BacFile, BacRules, BAC_ENTRY_SIZE};
pub use bcm::{BcmEntry, BcmFile, BcmRules, BCM_ENTRY_SIZE};
pub use codec::{Entry, RefField};
pub use container::{ContainerFile, ContainerFormat, ContainerHeader, HEADER_SIZE};
pub use store::{ContainerStore, FsStore, MemoryStore};
pub use survey::{survey, CharacterReport, CharacterStatus};
pub use table::{EntryTable, RefOffset, RelocationHazard};
pub use transplant::{
    transplant, DiagnosticSink, LogSink, Rejection, Role, TransplantConfig, TransplantJob,
    TransplantSummary,
};

#[derive(Debug, Error)]
pub enum TransplantError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input truncated: needed {needed} bytes, only {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("malformed {format} entry: {reason}")]
    MalformedEntry { format: &'static str, reason: String },

    #[error("invalid {format} header: {reason}")]
    InvalidHeader { format: &'static str, reason: String },

    #[error("entry index {index} out of range (table has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("\"{}\" doesn't qualify as {role}: {reason}", path.display())]
    ValidationFailed {
        path: PathBuf,
        role: Role,
        reason: String,
    },

    #[error("entry {entry} has {field} reference 0x{offset:X} that does not resolve inside the table")]
    InconsistentReferences {
        entry: usize,
        field: RefField,
        offset: u32,
    },

    #[error("relocation would break {count} reference(s), first: {first}")]
    RelocationHazard { count: usize, first: RelocationHazard },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransplantError>;

/// The pair of containers that make up one character's behaviour data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterFiles {
    pub code: String,
    pub bac: PathBuf,
    pub bcm: PathBuf,
}

impl CharacterFiles {
    pub fn new(dir: &Path, code: &str) -> Self {
        let stem = format!("{}_PLAYER", code);
        CharacterFiles {
            code: code.to_string(),
            bac: dir.join(format!("{}.bac", stem)),
            bcm: dir.join(format!("{}.bcm", stem)),
        }
    }
}
