//! # Data Loading and Validation Module
//!
//! Entry point for the two source tables of a calibration run, both semicolon
//! separated with a header row:
//!
//! - the items table, which places each item of an area on a form at a position;
//! - the examinee microdata, one row per examinee with per-area columns suffixed by
//!   the area code (`CO_PROVA_MT`, `TX_RESPOSTAS_MT`, ...).
//!
//! Column names are not configurable. Every column is read as text (the source files
//! are Latin-1, decoded lossily) and converted here, so a malformed value becomes a
//! dropped row instead of a schema inference failure halfway through the file.

use crate::calibrate::layout::{ItemPlacement, LanguageOption};
use crate::calibrate::matrix::ExamineeRecord;
use crate::calibrate::model::CalibrationConfig;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "Missing or non-numeric values were found in the required column '{column}' of the items table (row {row})."
    )]
    MissingValuesFound { column: String, row: usize },
    #[error("Row {row} of the items table has language code {code}; expected 0 (English) or 1 (Spanish).")]
    InvalidLanguageCode { row: usize, code: i64 },
    #[error("Position {value} in row {row} of the items table is not a valid 1-based position.")]
    InvalidPosition { row: usize, value: i64 },
}

/// Examinees that survived filtering, plus how many rows each filter removed.
#[derive(Debug)]
pub struct ExamineeTable {
    pub records: Vec<ExamineeRecord>,
    pub summary: LoadSummary,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows_read: usize,
    /// A required field was empty or not parseable.
    pub incomplete: usize,
    pub non_standard_form: usize,
    pub absent: usize,
    pub zero_score: usize,
    pub duplicates: usize,
}

/// Reads the items table and returns the placements of `area` on standard forms.
pub fn load_item_placements(
    path: impl AsRef<Path>,
    area: &str,
    max_standard_form: i64,
) -> Result<Vec<ItemPlacement>, DataError> {
    let path = path.as_ref();
    log::info!("Loading items table from '{}'", path.display());
    let df = internal::read_table(path, None)?;
    internal::require_columns(&df, &["CO_PROVA", "CO_POSICAO", "CO_ITEM", "SG_AREA"])?;

    let areas = internal::text_column(&df, "SG_AREA")?;
    let forms = internal::integer_column(&df, "CO_PROVA")?;
    let positions = internal::integer_column(&df, "CO_POSICAO")?;
    let item_ids = internal::integer_column(&df, "CO_ITEM")?;
    // Only the foreign-language area carries this column, and only its variant rows
    // have a value.
    let languages = if internal::has_column(&df, "TP_LINGUA") {
        internal::integer_column(&df, "TP_LINGUA")?
    } else {
        vec![None; df.height()]
    };

    let mut placements = Vec::new();
    for row in 0..df.height() {
        if areas[row].as_deref() != Some(area) {
            continue;
        }
        let required = |values: &[Option<i64>], column: &str| {
            values[row].ok_or_else(|| DataError::MissingValuesFound {
                column: column.to_string(),
                row: row + 1,
            })
        };
        let form = required(forms.as_slice(), "CO_PROVA")?;
        if form > max_standard_form {
            continue;
        }
        let position = required(positions.as_slice(), "CO_POSICAO")?;
        let item = required(item_ids.as_slice(), "CO_ITEM")?;
        let position = u32::try_from(position)
            .ok()
            .filter(|&p| p > 0)
            .ok_or(DataError::InvalidPosition {
                row: row + 1,
                value: position,
            })?;
        let language = match languages[row] {
            None => None,
            Some(code) => Some(
                LanguageOption::from_code(code)
                    .ok_or(DataError::InvalidLanguageCode { row: row + 1, code })?,
            ),
        };
        placements.push(ItemPlacement {
            form,
            position,
            item,
            language,
        });
    }

    log::info!(
        "Area {area}: {} item placements on standard forms",
        placements.len()
    );
    Ok(placements)
}

/// Reads the microdata for `area`, applies the row filters, and returns the examinees
/// sorted and deduplicated by registration number.
///
/// `with_language` requests the `TP_LINGUA` column, which is only required for areas
/// with language-variant forms. An empty or unknown language code is passed through as
/// `None`, and the matrix builder then reports the row as malformed.
pub fn load_examinees(
    path: impl AsRef<Path>,
    area: &str,
    with_language: bool,
    config: &CalibrationConfig,
) -> Result<ExamineeTable, DataError> {
    let path = path.as_ref();
    log::info!("Loading microdata for area {area} from '{}'", path.display());
    let df = internal::read_table(path, config.max_rows)?;

    let id_col = "NU_INSCRICAO".to_string();
    let presence_col = format!("TP_PRESENCA_{area}");
    let form_col = format!("CO_PROVA_{area}");
    let score_col = format!("NU_NOTA_{area}");
    let answers_col = format!("TX_RESPOSTAS_{area}");
    let key_col = format!("TX_GABARITO_{area}");
    let mut required = vec![
        id_col.as_str(),
        presence_col.as_str(),
        form_col.as_str(),
        score_col.as_str(),
        answers_col.as_str(),
        key_col.as_str(),
    ];
    if with_language {
        required.push("TP_LINGUA");
    }
    internal::require_columns(&df, &required)?;

    let ids = internal::text_column(&df, &id_col)?;
    let presence = internal::integer_column(&df, &presence_col)?;
    let forms = internal::integer_column(&df, &form_col)?;
    let scores = internal::float_column(&df, &score_col)?;
    let answers = internal::text_column(&df, &answers_col)?;
    let keys = internal::text_column(&df, &key_col)?;
    let languages = if with_language {
        internal::integer_column(&df, "TP_LINGUA")?
    } else {
        vec![None; df.height()]
    };

    let mut summary = LoadSummary {
        rows_read: df.height(),
        ..LoadSummary::default()
    };
    let mut records = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let (Some(id), Some(present), Some(form), Some(score), Some(answer_string), Some(key_string)) = (
            &ids[row],
            presence[row],
            forms[row],
            scores[row],
            &answers[row],
            &keys[row],
        ) else {
            summary.incomplete += 1;
            continue;
        };
        if form > config.max_standard_form {
            summary.non_standard_form += 1;
            continue;
        }
        if present != 1 {
            summary.absent += 1;
            continue;
        }
        if !(score > 0.0) {
            summary.zero_score += 1;
            continue;
        }
        records.push(ExamineeRecord {
            id: id.clone(),
            form,
            language: languages[row].and_then(LanguageOption::from_code),
            score,
            answers: answer_string.clone(),
            key: key_string.clone(),
        });
    }

    records.sort_by(|a, b| a.id.cmp(&b.id));
    let before = records.len();
    records.dedup_by(|later, earlier| later.id == earlier.id);
    summary.duplicates = before - records.len();

    log::info!(
        "Area {area}: kept {} of {} rows ({} incomplete, {} non-standard form, {} absent, {} zero score, {} duplicates)",
        records.len(),
        summary.rows_read,
        summary.incomplete,
        summary.non_standard_form,
        summary.absent,
        summary.zero_score,
        summary.duplicates
    );
    Ok(ExamineeTable { records, summary })
}

/// Internal module for shared data loading logic.
mod internal {
    use super::*;

    pub(super) fn read_table(path: &Path, max_rows: Option<usize>) -> Result<DataFrame, DataError> {
        // Schema inference is disabled: every column arrives as text.
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(Some(0))
                    .with_n_rows(max_rows)
                    .with_parse_options(
                        CsvParseOptions::default()
                            .with_separator(b';')
                            .with_encoding(CsvEncoding::LossyUtf8),
                    ),
            )
            .finish()?;
        log::debug!("Read {} rows x {} columns", df.height(), df.width());
        Ok(df)
    }

    pub(super) fn has_column(df: &DataFrame, name: &str) -> bool {
        df.get_column_names().iter().any(|c| c.as_str() == name)
    }

    pub(super) fn require_columns(df: &DataFrame, names: &[&str]) -> Result<(), DataError> {
        let present: HashSet<&str> = df.get_column_names().iter().map(|c| c.as_str()).collect();
        for name in names {
            if !present.contains(name) {
                return Err(DataError::ColumnNotFound(name.to_string()));
            }
        }
        Ok(())
    }

    /// Trimmed, non-empty text values.
    pub(super) fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, DataError> {
        let column = df.column(name)?;
        Ok(column
            .str()?
            .into_iter()
            .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
            .collect())
    }

    /// Numeric values; anything that does not parse becomes `None`.
    pub(super) fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, DataError> {
        Ok(text_column(df, name)?
            .into_iter()
            .map(|v| v.and_then(|s| s.parse::<f64>().ok()).filter(|x| x.is_finite()))
            .collect())
    }

    /// Integer codes. Values such as `"406.0"` are accepted; fractional values are not.
    pub(super) fn integer_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, DataError> {
        Ok(float_column(df, name)?
            .into_iter()
            .map(|v| v.filter(|x| x.fract() == 0.0).map(|x| x as i64))
            .collect())
    }
}
