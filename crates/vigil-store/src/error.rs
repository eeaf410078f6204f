use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema mismatch for {kind}: expected v{expected}, found v{found}")]
    Schema {
        kind: String,
        expected: u32,
        found: u32,
    },

    #[error("Payload kind mismatch: expected {expected}, found {found}")]
    Kind { expected: String, found: String },

    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("State store connection is closed")]
    Closed,
}
