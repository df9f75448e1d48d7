use thiserror::Error;

pub type Result<T> = std::result::Result<T, IncryptError>;

#[derive(Debug, Error)]
pub enum IncryptError {
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("corrupt ciphertext: {0}")]
    CorruptCipher(&'static str),

    #[error("incomplete object graph: {0} objects never became ready")]
    IncompleteGraph(usize),

    #[error("unexpected object type {kind} for {oid}")]
    UnexpectedType { oid: git2::Oid, kind: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("key tool failed: {0}")]
    KeyTool(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IncryptError {
    pub(crate) fn unexpected_type(oid: git2::Oid, kind: Option<git2::ObjectType>) -> Self {
        let kind = kind.map(|k| k.to_string()).unwrap_or_else(|| "unknown".into());
        IncryptError::UnexpectedType { oid, kind }
    }
}
