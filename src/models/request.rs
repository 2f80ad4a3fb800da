//! A single operator-invoked publish run.

use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;

/// What to publish: the calendar date selects the upload folder, the optional
/// paths override file discovery and add a third metadata layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub date: NaiveDate,
    pub explicit_file_path: Option<PathBuf>,
    pub metadata_override: Option<PathBuf>,
}

impl PublishRequest {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            explicit_file_path: None,
            metadata_override: None,
        }
    }

    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_file_path = path;
        self
    }

    pub fn with_metadata_override(mut self, path: Option<PathBuf>) -> Self {
        self.metadata_override = path;
        self
    }

    /// `YYYY/MM/DD`, the hierarchical form shared by the upload folder and
    /// the object-store key.
    pub fn date_segments(&self) -> String {
        date_segments(self.date)
    }
}

pub fn date_segments(date: NaiveDate) -> String {
    format!("{:04}/{:02}/{:02}", date.year(), date.month(), date.day())
}

/// Parse the `YYYY-MM-DD` form accepted by the CLI and the HTTP endpoint.
pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
}
