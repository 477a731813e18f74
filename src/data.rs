//! CSV ingestion and numeric projection using Polars

use std::borrow::Cow;
use std::io::Cursor;

use encoding_rs::{UTF_8, WINDOWS_1252};
use ndarray::Array2;
use polars::prelude::*;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Cell markers read as missing, in addition to empty fields
const MISSING_MARKERS: [&str; 5] = ["NA", "N/A", "NaN", "null", "NULL"];

/// Numeric columns of an uploaded table with missing cells imputed
#[derive(Debug, Clone)]
pub struct NumericProjection {
    /// Column names, in upload order
    pub columns: Vec<String>,
    /// Cleaned values (n_rows, n_columns)
    pub values: Array2<f64>,
    /// Number of cells replaced by their column mean
    pub imputed_cells: usize,
}

impl NumericProjection {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    /// Values of one column as an owned vector
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.values.column(index).to_vec()
    }
}

/// Decode uploaded bytes into text
///
/// UTF-8 is tried first (a BOM is dropped). Bytes that are not valid UTF-8
/// are decoded as Latin-1 instead, which accepts every byte sequence.
pub fn decode_upload(bytes: &[u8]) -> Cow<'_, str> {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
    if !had_errors {
        return text;
    }

    warn!("Upload is not valid UTF-8, falling back to {}", WINDOWS_1252.name());
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text
}

/// Parse an uploaded CSV file into a DataFrame
pub fn read_csv(bytes: &[u8]) -> Result<DataFrame> {
    let text = decode_upload(bytes).into_owned();

    let null_values = NullValues::AllColumns(
        MISSING_MARKERS
            .iter()
            .map(|&marker| marker.into())
            .collect(),
    );

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(CsvParseOptions::default().with_null_values(Some(null_values)))
        .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
        .finish()?;

    debug!("Parsed CSV: {} rows x {} columns", df.height(), df.width());
    Ok(df)
}

/// Column types the CSV reader infers for numbers
fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int32
            | DataType::Int64
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Whether a column holds no values at all
///
/// The reader has nothing to infer a number from and types such a column as
/// text (or null), but it is an empty numeric column, not a text one.
fn is_all_missing(column: &Column, n_rows: usize) -> bool {
    n_rows > 0
        && matches!(column.dtype(), DataType::String | DataType::Null)
        && column.null_count() == n_rows
}

/// Select numeric columns and replace missing cells with the column mean
pub fn numeric_projection(df: &DataFrame) -> Result<NumericProjection> {
    let n_rows = df.height();
    let mut columns = Vec::new();
    let mut raw_columns: Vec<Vec<Option<f64>>> = Vec::new();

    for column in df.get_columns() {
        if is_all_missing(column, n_rows) {
            return Err(Error::EmptyColumn(column.name().to_string()));
        }
        if !is_numeric_dtype(column.dtype()) {
            debug!("Skipping non-numeric column '{}' ({})", column.name(), column.dtype());
            continue;
        }

        let series = column.as_materialized_series().cast(&DataType::Float64)?;
        let values: Vec<Option<f64>> = series
            .f64()?
            .into_iter()
            .map(|value| value.filter(|v| !v.is_nan()))
            .collect();

        columns.push(column.name().to_string());
        raw_columns.push(values);
    }

    if columns.is_empty() {
        return Err(Error::NoNumericColumns);
    }

    let mut imputed_cells = 0;
    let mut cleaned = Vec::with_capacity(columns.len());
    for (name, values) in columns.iter().zip(raw_columns) {
        let (filled, missing) = impute_mean(name, values)?;
        imputed_cells += missing;
        cleaned.push(filled);
    }

    // Row-major layout for ndarray
    let mut data = Vec::with_capacity(n_rows * columns.len());
    for row in 0..n_rows {
        data.extend(cleaned.iter().map(|column| column[row]));
    }
    let values = Array2::from_shape_vec((n_rows, columns.len()), data)?;

    debug!(
        "Numeric projection: {} rows x {} columns, {} cells imputed",
        n_rows,
        columns.len(),
        imputed_cells
    );

    Ok(NumericProjection {
        columns,
        values,
        imputed_cells,
    })
}

/// Fill missing values with the mean of the present ones
///
/// Returns the filled column and the number of cells that were missing.
fn impute_mean(name: &str, values: Vec<Option<f64>>) -> Result<(Vec<f64>, usize)> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let missing = values.len() - present.len();

    if missing == 0 {
        return Ok((present, 0));
    }
    if present.is_empty() {
        return Err(Error::EmptyColumn(name.to_string()));
    }

    let mean = present.iter().sum::<f64>() / present.len() as f64;
    let filled = values.into_iter().map(|v| v.unwrap_or(mean)).collect();
    Ok((filled, missing))
}
