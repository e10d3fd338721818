use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("invalid build status: {0}")]
    InvalidStatus(String),

    #[error("invalid build status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

pub type Result<T> = std::result::Result<T, StoreError>;
