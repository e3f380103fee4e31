use crate::metadata::{Id, PropertyType, TypeId, TypeKind};

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("only SQLite, MySQL or PostgreSQL are supported")]
    UnsupportedDatabase,

    #[error("schema version {actual} is not supported (supported version is {expected})")]
    UnsupportedSchemaVersion { actual: i32, expected: i32 },

    #[error("there are {count} MLMDEnv records (only one record is expected)")]
    TooManyMlmdEnvRecords { count: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("{target} is not found")]
    NotFound { target: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("{item_id} has a type {type_id} that doesn't exist")]
    TypeNotFound { type_id: TypeId, item_id: Id },

    #[error("{type_kind} type with the name {type_name} already exists")]
    TypeAlreadyExists {
        type_kind: TypeKind,
        type_name: String,
    },

    #[error("{item_id} has an undefined property {property_name:?}({property_type})")]
    UndefinedProperty {
        item_id: Id,
        property_name: String,
        property_type: PropertyType,
    },

    #[error("{item_id} has a name {item_name:?} that already exists")]
    NameAlreadyExists { item_id: Id, item_name: String },

    #[error("{item_id} is not found")]
    NotFound { item_id: Id },

    #[error(transparent)]
    Get(#[from] GetError),
}

#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("{type_kind} type {type_id} is not found")]
    TypeNotFound {
        type_kind: TypeKind,
        type_id: TypeId,
    },

    #[error("new {type_kind} with the type {type_id} has an undefined property {property_name:?}")]
    UndefinedProperty {
        type_kind: TypeKind,
        type_id: TypeId,
        property_name: String,
    },

    #[error("new {type_kind} has a name {item_name:?} that already exists")]
    NameAlreadyExists {
        type_kind: TypeKind,
        item_name: String,
    },

    #[error(transparent)]
    Get(#[from] GetError),
}

/// Error kinds surfaced by the recorder, query engine and sync engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} is not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("store unavailable")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Get(#[from] GetError),

    #[error(transparent)]
    Put(#[from] PutError),

    #[error(transparent)]
    Post(#[from] PostError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if the error stems from conflicting type declarations.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch(_)
                | Self::Put(PutError::TypeAlreadyExists { .. })
                | Self::Put(PutError::UndefinedProperty { .. })
                | Self::Post(PostError::UndefinedProperty { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Get(GetError::NotFound { .. })
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
