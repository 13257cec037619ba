//! Errors raised while configuring and clustering workflows.

use std::fmt::{Debug, Display};

use itertools::Itertools;

/// Represents an error reported by the clustering components.
///
/// Configuration errors and unknown distribution families are fatal and are raised before a simulation starts.
/// Cyclic cluster errors are recovered by the [clustering policy](crate::clustering::ClusteringPolicy) itself,
/// they are exposed for callers that build groupings manually.
pub enum Error {
    /// Malformed or missing parameters, inconsistent clustering granularity, invalid workflow.
    Configuration(String),
    /// Grouping would introduce a dependency cycle among the listed jobs.
    CyclicCluster { jobs: Vec<usize> },
    /// Distribution family tag is not supported.
    UnknownDistributionFamily(String),
    /// Configuration or workflow file can't be read.
    Io(std::io::Error),
    /// Configuration or workflow file can't be parsed.
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Error::Configuration(message.into())
    }

    /// Returns true for errors that must abort the run before the simulation starts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::CyclicCluster { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Configuration(message) => write!(f, "configuration error: {}", message),
            Error::CyclicCluster { jobs } => {
                write!(f, "clustering introduces a cycle among jobs [{}]", jobs.iter().join(", "))
            }
            Error::UnknownDistributionFamily(family) => write!(f, "unknown distribution family: {}", family),
            Error::Io(err) => write!(f, "i/o error: {}", err),
            Error::Parse(message) => write!(f, "parse error: {}", message),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
