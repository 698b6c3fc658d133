//! Dataset metadata and column type inference
//!
//! Column kinds are decided by majority vote over an evenly strided sample of
//! non-null values, so a handful of stray strings does not demote a numeric
//! column.

use crate::error::Result;
use crate::value::{coerce_number, parse_date};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Non-null values inspected per column when voting on its kind.
pub const TYPE_SAMPLE_SIZE: usize = 1_000;
pub const SAMPLE_VALUES_PER_COLUMN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Number,
    Date,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
    pub sample_values: Vec<String>,
    pub null_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnDescriptor>,
    pub numeric_columns: Vec<String>,
    pub date_columns: Vec<String>,
}

impl DatasetMetadata {
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let mut columns = Vec::with_capacity(df.width());
        for series in df.get_columns() {
            columns.push(describe_column(series)?);
        }

        let numeric_columns = names_of_kind(&columns, ColumnKind::Number);
        let date_columns = names_of_kind(&columns, ColumnKind::Date);

        Ok(Self {
            row_count: df.height(),
            column_count: df.width(),
            columns,
            numeric_columns,
            date_columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn text_columns(&self) -> Vec<String> {
        names_of_kind(&self.columns, ColumnKind::String)
    }
}

fn names_of_kind(columns: &[ColumnDescriptor], kind: ColumnKind) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.name.clone())
        .collect()
}

fn describe_column(series: &Series) -> Result<ColumnDescriptor> {
    let name = series.name().to_string();
    let null_count = series.null_count();
    let height = series.len();
    let step = (height / TYPE_SAMPLE_SIZE).max(1);

    let mut votes = KindVotes::default();
    let mut sample_values: Vec<String> = Vec::new();

    match series.dtype() {
        DataType::Float64 => {
            let values = series.f64()?;
            for idx in (0..height).step_by(step) {
                if let Some(v) = values.get(idx) {
                    votes.number += 1;
                    remember_sample(&mut sample_values, crate::value::Scalar::Number(v).to_string());
                }
            }
        }
        DataType::String => {
            let values = series.str()?;
            let mut inspected = 0usize;
            for idx in (0..height).step_by(step) {
                if inspected >= TYPE_SAMPLE_SIZE {
                    break;
                }
                let Some(cell) = values.get(idx) else { continue };
                inspected += 1;
                votes.record(classify_text(cell));
                remember_sample(&mut sample_values, cell.to_string());
            }
        }
        dtype if dtype.is_numeric() => {
            votes.number += height - null_count;
        }
        _ => {}
    }

    Ok(ColumnDescriptor {
        name,
        kind: votes.winner(),
        sample_values,
        null_count,
    })
}

fn remember_sample(samples: &mut Vec<String>, value: String) {
    if samples.len() < SAMPLE_VALUES_PER_COLUMN && !samples.contains(&value) {
        samples.push(value);
    }
}

pub fn classify_text(cell: &str) -> ColumnKind {
    if coerce_number(cell).is_some() {
        ColumnKind::Number
    } else if parse_date(cell).is_some() {
        ColumnKind::Date
    } else {
        ColumnKind::String
    }
}

#[derive(Default)]
struct KindVotes {
    number: usize,
    date: usize,
    string: usize,
}

impl KindVotes {
    fn record(&mut self, kind: ColumnKind) {
        match kind {
            ColumnKind::Number => self.number += 1,
            ColumnKind::Date => self.date += 1,
            ColumnKind::String => self.string += 1,
        }
    }

    /// Ties favour number, then date. An all-null column is a string column.
    fn winner(&self) -> ColumnKind {
        if self.number == 0 && self.date == 0 {
            ColumnKind::String
        } else if self.number >= self.date && self.number >= self.string {
            ColumnKind::Number
        } else if self.date >= self.string {
            ColumnKind::Date
        } else {
            ColumnKind::String
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_vote_tolerates_stray_text() {
        let df = DataFrame::new(vec![
            Series::new("amount", &["1", "2", "n/a", "4", "5"]),
            Series::new("when", &["2024-01-01", "2024-01-02", "2024-01-03", "soon", ""]),
            Series::new("label", &["a", "b", "c", "1", "2"]),
        ])
        .unwrap();

        let meta = DatasetMetadata::from_frame(&df).unwrap();
        assert_eq!(meta.row_count, 5);
        assert_eq!(meta.column_count, 3);
        assert_eq!(meta.column("amount").unwrap().kind, ColumnKind::Number);
        assert_eq!(meta.column("when").unwrap().kind, ColumnKind::Date);
        assert_eq!(meta.column("label").unwrap().kind, ColumnKind::String);
        assert_eq!(meta.numeric_columns, vec!["amount"]);
        assert_eq!(meta.date_columns, vec!["when"]);
    }

    #[test]
    fn test_float_columns_are_numeric_with_samples() {
        let df = DataFrame::new(vec![Series::new("v", &[Some(1.0), None, Some(1.0), Some(2.5)])]).unwrap();
        let meta = DatasetMetadata::from_frame(&df).unwrap();
        let col = meta.column("v").unwrap();
        assert_eq!(col.kind, ColumnKind::Number);
        assert_eq!(col.null_count, 1);
        assert_eq!(col.sample_values, vec!["1", "2.5"]);
    }

    #[test]
    fn test_all_null_column_is_string() {
        let df = DataFrame::new(vec![Series::new("empty", &[None::<f64>, None])]).unwrap();
        let meta = DatasetMetadata::from_frame(&df).unwrap();
        assert_eq!(meta.columns[0].kind, ColumnKind::String);
        assert!(meta.numeric_columns.is_empty());
    }
}
