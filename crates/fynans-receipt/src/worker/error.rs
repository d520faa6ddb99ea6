use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Stored job is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to serialize job data: {0}")]
    Serialize(#[from] serde_json::Error),
}
