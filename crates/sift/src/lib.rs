pub mod database;
pub mod fdr;
pub mod fragment;
pub mod mass;
pub mod protein_grouping;
pub mod rescore;
pub mod scoring;
pub mod search;
pub mod spectrum;

use std::path::Path;

#[derive(Debug)]
pub enum Error {
    /// Unsupported or inconsistent configuration, reported immediately
    Config(String),
    /// Input arrays that violate a structural invariant (alignment, ordering)
    Shape(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "invalid configuration: {}", s),
            Self::Shape(s) => write!(f, "malformed input: {}", s),
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
