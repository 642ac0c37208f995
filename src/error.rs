//! Error Types
//!
//! One error enum for the whole crate. Each variant corresponds to a failure
//! class with its own blast radius:
//!
//! - [`NeError::Config`] is fatal and raised before any task runs
//! - [`NeError::Download`] fails the fetch task; re-invoke to retry
//! - [`NeError::Format`], [`NeError::Estimation`] and [`NeError::Simulation`]
//!   abort only the branch that owns the offending seed/chromosome
//! - [`NeError::Plotting`] aborts only the plot output node

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for NeRunner operations.
#[derive(Error, Debug)]
pub enum NeError {
    /// Missing keys, unknown catalog identifiers, out-of-range values
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Genetic map or tool-code fetch failure
    #[error("Download of {what} failed: {message}")]
    Download { what: String, message: String },

    /// Malformed or empty simulation artifact
    #[error("Malformed input {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    /// External estimator exited non-zero or produced no output
    #[error("{tool} estimation failed: {message}")]
    Estimation { tool: String, message: String },

    /// Missing or empty table at aggregation time, or a rendering failure
    #[error("Cannot plot {}: {message}", path.display())]
    Plotting { path: PathBuf, message: String },

    /// Simulation engine failure
    #[error("Simulation failed: {message}")]
    Simulation { message: String },

    /// Task graph construction or validation failure
    #[error("Task graph error: {message}")]
    Graph { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Type alias for Results using NeError
pub type Result<T> = std::result::Result<T, NeError>;

impl NeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn download(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn format(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn estimation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Estimation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn plotting(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Plotting {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation {
            message: message.into(),
        }
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
        }
    }

    /// Short name of the failure class, used in task reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Download { .. } => "DownloadError",
            Self::Format { .. } => "FormatError",
            Self::Estimation { .. } => "EstimationError",
            Self::Plotting { .. } => "PlottingError",
            Self::Simulation { .. } => "SimulationError",
            Self::Graph { .. } => "GraphError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Yaml(_) => "YamlError",
            Self::Csv(_) => "CsvError",
        }
    }
}

impl From<String> for NeError {
    fn from(message: String) -> Self {
        Self::graph(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NeError::config("unknown species 'Foo'");
        assert_eq!(err.to_string(), "Configuration error: unknown species 'Foo'");

        let err = NeError::format("/tmp/x.vcf", "no samples");
        assert!(err.to_string().contains("/tmp/x.vcf"));
        assert!(err.to_string().contains("no samples"));

        let err = NeError::estimation("SMC++", "exit code 1");
        assert_eq!(err.to_string(), "SMC++ estimation failed: exit code 1");
    }

    #[test]
    fn test_error_category() {
        assert_eq!(NeError::config("x").category(), "ConfigError");
        assert_eq!(NeError::download("map", "x").category(), "DownloadError");
        assert_eq!(NeError::format("p", "x").category(), "FormatError");
        assert_eq!(NeError::estimation("t", "x").category(), "EstimationError");
        assert_eq!(NeError::plotting("p", "x").category(), "PlottingError");

        let io = NeError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.category(), "IoError");
    }

    #[test]
    fn test_string_converts_to_graph_error() {
        let err: NeError = "cycle".to_string().into();
        assert!(matches!(err, NeError::Graph { .. }));
    }
}
