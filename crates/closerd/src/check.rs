//! Offline validation of a repository config file.

use std::path::Path;

use closer_core::config::{ConfigError, RemediationConfig};
use closer_core::filter::{Filter, ParseError};

/// Parse result for one configured filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    pub index: usize,
    pub source: String,
    pub error: Option<ParseError>,
}

impl FilterReport {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Load `path` and parse every filter in it.
///
/// Fails only when the file itself cannot be read or decoded; per-filter
/// parse errors are reported in the returned list.
pub fn check_config_file(path: &Path) -> Result<Vec<FilterReport>, ConfigError> {
    let config = RemediationConfig::from_file(path)?;
    Ok(check_filters(&config.filters))
}

pub fn check_filters(filters: &[String]) -> Vec<FilterReport> {
    filters
        .iter()
        .enumerate()
        .map(|(index, source)| FilterReport {
            index,
            source: source.clone(),
            error: Filter::parse(source).err(),
        })
        .collect()
}
