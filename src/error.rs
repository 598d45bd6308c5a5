use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("corrupt index: {0}")]
    Corrupt(CorruptReason),
}

#[derive(Debug)]
pub enum CorruptReason {
    RecordDecode { folder: String, name: String, detail: &'static str },
    VersionListDecode { folder: String, name: String, detail: &'static str },
    EmptyVersionList { folder: String, name: String },
    MissingHeadRecord { folder: String, name: String },
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptReason::RecordDecode { folder, name, detail } => {
                write!(f, "record ({folder}, {name}) failed to decode: {detail}")
            }
            CorruptReason::VersionListDecode { folder, name, detail } => {
                write!(f, "version list ({folder}, {name}) failed to decode: {detail}")
            }
            CorruptReason::EmptyVersionList { folder, name } => {
                write!(f, "persisted empty version list for ({folder}, {name})")
            }
            CorruptReason::MissingHeadRecord { folder, name } => {
                write!(f, "global head record missing for ({folder}, {name})")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    // Invariant violations abort the process instead of propagating.
    pub fn into_panic(self) -> ! {
        panic!("fileindex: {self}")
    }
}
