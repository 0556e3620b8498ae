use crate::domain::record::Session;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no trading-day document stored for {0}")]
    NotFound(NaiveDate),

    #[error("{session} close submitted without {session} open data; submit the opening event first")]
    MissingOpenData { session: Session },

    #[error("document has {session} close data without {session} open data")]
    CloseWithoutOpen { session: Session },

    #[error("invalid price event: {0}")]
    InvalidPrice(String),

    #[error("invalid event submission: {0}")]
    InvalidSubmission(String),

    #[error("document io failed for {key}: {source}")]
    Io {
        key: NaiveDate,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
