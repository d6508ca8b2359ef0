use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("parameters 'from' and 'to' must be timestamps, got '{0}'")]
    InvalidRange(String),

    #[error("can't sort by {0}")]
    SortField(String),

    #[error("store access failed: {0}")]
    Store(#[from] StoreError),
}
