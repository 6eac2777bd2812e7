//! # Response Matrix
//!
//! Aligns each examinee's raw answer string with the answer key of their form and
//! scores the result into one dense row of [`ResponseCell`]s, one column per item of
//! the area (see [`ItemIndex`](crate::calibrate::layout::ItemIndex)).
//!
//! Construction is pure: the same records and layout always yield the same matrix.
//! Row-level problems never abort the area. A malformed row is skipped and counted,
//! and so is an examinee left with no administered item.

use crate::calibrate::layout::{AreaLayout, FormId, LanguageOption, SlotError};
use crate::calibrate::types::ResponseCell;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use thiserror::Error;

/// Answer character meaning "this slot was not presented to the examinee".
pub const DEFAULT_NO_ANSWER: char = '9';

/// How many row errors are logged individually before only counting them.
const LOGGED_ROW_ERRORS: usize = 10;

/// One examinee as delivered by the ingestion layer.
#[derive(Clone, Debug, PartialEq)]
pub struct ExamineeRecord {
    pub id: String,
    pub form: FormId,
    pub language: Option<LanguageOption>,
    /// Ground-truth score. Used for validation only, never for estimation.
    pub score: f64,
    pub answers: String,
    pub key: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("form {0} is not present in the items table for this area")]
    UnknownForm(FormId),
    #[error("answer string has {answers} characters but the answer key has {key}")]
    LengthMismatch { answers: usize, key: usize },
    #[error("form {form} expects {expected} answer characters, found {found}")]
    KeyLengthMismatch {
        form: FormId,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Examinees × items correctness matrix. Never resized once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseMatrix {
    cells: Array2<ResponseCell>,
}

impl ResponseMatrix {
    pub fn from_cells(cells: Array2<ResponseCell>) -> Self {
        Self { cells }
    }

    pub fn n_examinees(&self) -> usize {
        self.cells.nrows()
    }

    pub fn n_items(&self) -> usize {
        self.cells.ncols()
    }

    pub fn cells(&self) -> &Array2<ResponseCell> {
        &self.cells
    }

    pub fn row(&self, examinee: usize) -> ArrayView1<'_, ResponseCell> {
        self.cells.row(examinee)
    }

    pub fn column(&self, item: usize) -> ArrayView1<'_, ResponseCell> {
        self.cells.column(item)
    }

    /// Number of correct answers per examinee.
    pub fn correct_counts(&self) -> Array1<f64> {
        self.cells.map_axis(Axis(1), |row| {
            row.iter().filter(|&&c| c == ResponseCell::Correct).count() as f64
        })
    }

    /// Number of examinees who were not administered each item.
    pub fn not_administered_counts(&self) -> Array1<usize> {
        self.cells.map_axis(Axis(0), |column| {
            column.iter().filter(|c| !c.is_administered()).count()
        })
    }
}

/// Counters surfaced in every iteration report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub malformed_rows: usize,
    pub excluded_examinees: usize,
}

/// The matrix plus the per-row data that must stay aligned with it.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltMatrix {
    pub matrix: ResponseMatrix,
    pub examinee_ids: Vec<String>,
    pub ground_truth: Array1<f64>,
    pub summary: BuildSummary,
}

pub struct MatrixBuilder<'a> {
    layout: &'a AreaLayout,
    no_answer: char,
}

impl<'a> MatrixBuilder<'a> {
    pub fn new(layout: &'a AreaLayout) -> Self {
        Self {
            layout,
            no_answer: DEFAULT_NO_ANSWER,
        }
    }

    pub fn with_no_answer(mut self, no_answer: char) -> Self {
        self.no_answer = no_answer;
        self
    }

    /// Scores a single examinee into a full-width row.
    pub fn score_row(&self, record: &ExamineeRecord) -> Result<Array1<ResponseCell>, RowError> {
        let form = self
            .layout
            .form(record.form)
            .ok_or(RowError::UnknownForm(record.form))?;

        let answers: Vec<char> = record.answers.chars().collect();
        let key: Vec<char> = record.key.chars().collect();
        if answers.len() != key.len() {
            return Err(RowError::LengthMismatch {
                answers: answers.len(),
                key: key.len(),
            });
        }
        if key.len() != form.string_len() {
            return Err(RowError::KeyLengthMismatch {
                form: record.form,
                expected: form.string_len(),
                found: key.len(),
            });
        }

        let mut row = Array1::from_elem(self.layout.items().len(), ResponseCell::NotAdministered);
        for slot in form
            .active_slots(record.form, record.language)?
            .into_iter()
            .flatten()
        {
            let answer = answers[slot.offset];
            if answer == self.no_answer {
                continue;
            }
            row[slot.column] = if answer == key[slot.offset] {
                ResponseCell::Correct
            } else {
                ResponseCell::Incorrect
            };
        }
        Ok(row)
    }

    /// Scores every record, skipping malformed and zero-response rows.
    pub fn build(&self, records: &[ExamineeRecord]) -> BuiltMatrix {
        let n_items = self.layout.items().len();
        let mut rows = Vec::with_capacity(records.len());
        let mut examinee_ids = Vec::with_capacity(records.len());
        let mut ground_truth = Vec::with_capacity(records.len());
        let mut summary = BuildSummary::default();

        for record in records {
            let row = match self.score_row(record) {
                Ok(row) => row,
                Err(e) => {
                    summary.malformed_rows += 1;
                    if summary.malformed_rows <= LOGGED_ROW_ERRORS {
                        log::warn!("Skipping examinee {}: {}", record.id, e);
                    }
                    continue;
                }
            };
            if !row.iter().any(|c| c.is_administered()) {
                summary.excluded_examinees += 1;
                log::debug!("Excluding examinee {} with no administered items", record.id);
                continue;
            }
            rows.push(row);
            examinee_ids.push(record.id.clone());
            ground_truth.push(record.score);
        }

        if summary.malformed_rows > LOGGED_ROW_ERRORS {
            log::warn!(
                "{} malformed rows skipped in total ({} shown)",
                summary.malformed_rows,
                LOGGED_ROW_ERRORS
            );
        }

        let mut cells = Array2::from_elem((rows.len(), n_items), ResponseCell::NotAdministered);
        for (mut target, row) in cells.rows_mut().into_iter().zip(&rows) {
            target.assign(row);
        }

        BuiltMatrix {
            matrix: ResponseMatrix::from_cells(cells),
            examinee_ids,
            ground_truth: Array1::from_vec(ground_truth),
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::layout::ItemPlacement;

    fn simple_layout() -> AreaLayout {
        let placements: Vec<ItemPlacement> = (0..3)
            .map(|k| ItemPlacement {
                form: 1,
                position: k + 1,
                item: 100 + k as i64,
                language: None,
            })
            .collect();
        AreaLayout::from_placements(&placements).unwrap()
    }

    fn record(id: &str, answers: &str, key: &str) -> ExamineeRecord {
        ExamineeRecord {
            id: id.to_string(),
            form: 1,
            language: None,
            score: 500.0,
            answers: answers.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn sentinel_is_not_administered_rather_than_incorrect() {
        let layout = simple_layout();
        let builder = MatrixBuilder::new(&layout);
        let row = builder.score_row(&record("a", "A9C", "ABC")).unwrap();
        assert_eq!(
            row.to_vec(),
            vec![
                ResponseCell::Correct,
                ResponseCell::NotAdministered,
                ResponseCell::Correct
            ]
        );
    }

    #[test]
    fn malformed_rows_are_counted_not_fatal() {
        let layout = simple_layout();
        let builder = MatrixBuilder::new(&layout);
        let mut unknown = record("c", "ABC", "ABC");
        unknown.form = 99;
        let records = vec![
            record("a", "ABC", "ABC"),
            record("b", "AB", "ABC"),
            unknown,
            record("d", "ABCD", "ABCD"),
        ];
        let built = builder.build(&records);
        assert_eq!(built.matrix.n_examinees(), 1);
        assert_eq!(built.summary.malformed_rows, 3);
        assert_eq!(built.examinee_ids, vec!["a".to_string()]);

        assert_eq!(
            builder.score_row(&records[1]),
            Err(RowError::LengthMismatch { answers: 2, key: 3 })
        );
        assert_eq!(
            builder.score_row(&records[3]),
            Err(RowError::KeyLengthMismatch {
                form: 1,
                expected: 3,
                found: 4
            })
        );
    }

    #[test]
    fn zero_response_examinees_are_excluded() {
        let layout = simple_layout();
        let built = MatrixBuilder::new(&layout).build(&[
            record("a", "999", "ABC"),
            record("b", "XBC", "ABC"),
        ]);
        assert_eq!(built.summary.excluded_examinees, 1);
        assert_eq!(built.summary.malformed_rows, 0);
        assert_eq!(built.examinee_ids, vec!["b".to_string()]);
        assert_eq!(built.ground_truth.len(), 1);
    }

    #[test]
    fn custom_sentinel() {
        let layout = simple_layout();
        let builder = MatrixBuilder::new(&layout).with_no_answer('.');
        let row = builder.score_row(&record("a", ".9C", "ABC")).unwrap();
        assert_eq!(row[0], ResponseCell::NotAdministered);
        assert_eq!(row[1], ResponseCell::Incorrect);
        assert_eq!(row[2], ResponseCell::Correct);
    }

    #[test]
    fn counts_by_axis() {
        let layout = simple_layout();
        let built = MatrixBuilder::new(&layout).build(&[
            record("a", "ABC", "ABC"),
            record("b", "A9X", "ABC"),
        ]);
        assert_eq!(built.matrix.correct_counts().to_vec(), vec![3.0, 1.0]);
        assert_eq!(built.matrix.not_administered_counts().to_vec(), vec![0, 1, 0]);
    }
}
