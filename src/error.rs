//! Error types for the clustering pipeline

use thiserror::Error;

/// Errors produced while turning an uploaded CSV into a cluster report
#[derive(Debug, Error)]
pub enum Error {
    #[error("No file uploaded")]
    NoFile,

    #[error("CSV has no numeric columns. Add numbers like Spend, Age, Orders, etc.")]
    NoNumericColumns,

    #[error("CSV has {rows} rows but clustering needs at least {clusters}")]
    TooFewRows { rows: usize, clusters: usize },

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("{0}")]
    Csv(#[from] polars::prelude::PolarsError),

    #[error("Column '{0}' has no values to compute a mean from")]
    EmptyColumn(String),

    #[error("Clustering failed: {0}")]
    Clustering(String),

    #[error("Chart rendering failed: {0}")]
    Render(String),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl Error {
    /// True for problems with the caller's input rather than with processing
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NoFile
                | Error::NoNumericColumns
                | Error::TooFewRows { .. }
                | Error::InvalidUpload(_)
        )
    }
}

impl From<linfa_clustering::KMeansError> for Error {
    fn from(err: linfa_clustering::KMeansError) -> Self {
        Error::Clustering(err.to_string())
    }
}

impl<E: std::error::Error + Send + Sync> From<plotters::drawing::DrawingAreaErrorKind<E>> for Error {
    fn from(err: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        Error::Render(err.to_string())
    }
}

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::NoFile.is_client_error());
        assert!(Error::NoNumericColumns.is_client_error());
        assert!(Error::TooFewRows { rows: 2, clusters: 3 }.is_client_error());
        assert!(Error::InvalidUpload("bad boundary".to_string()).is_client_error());

        assert!(!Error::EmptyColumn("Age".to_string()).is_client_error());
        assert!(!Error::Clustering("diverged".to_string()).is_client_error());
        assert!(!Error::Render("no canvas".to_string()).is_client_error());
    }

    #[test]
    fn test_numeric_column_message() {
        let message = Error::NoNumericColumns.to_string();
        assert!(message.contains("numeric columns"));
    }

    #[test]
    fn test_too_few_rows_message() {
        let message = Error::TooFewRows { rows: 2, clusters: 3 }.to_string();
        assert!(message.contains('2'));
        assert!(message.contains('3'));
    }
}
