//! Conversions between parsed scalars and polars columns.

use crate::error::{Result, TabulaError};
use crate::value::{coerce_number, Record, Scalar};
use polars::prelude::*;

/// Build a column from scalars: `Float64` when every non-null cell is numeric,
/// otherwise `String` with numbers rendered as text.
pub fn series_from_scalars<'a>(name: &str, cells: impl Iterator<Item = &'a Scalar> + Clone) -> Series {
    let all_numeric = cells
        .clone()
        .all(|c| matches!(c, Scalar::Null | Scalar::Number(_)));
    if all_numeric {
        let values: Vec<Option<f64>> = cells
            .map(|c| match c {
                Scalar::Number(n) => Some(*n),
                _ => None,
            })
            .collect();
        Series::new(name, values)
    } else {
        let values: Vec<Option<String>> = cells
            .map(|c| if c.is_null() { None } else { Some(c.to_string()) })
            .collect();
        Series::new(name, values)
    }
}

/// Promote a column to `String`, rendering numbers the same way
/// [`series_from_scalars`] does so a value reads identically whichever chunk it came from.
pub fn promote_to_text(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::String => Ok(series.clone()),
        DataType::Float64 => {
            let values: Vec<Option<String>> = series
                .f64()?
                .into_iter()
                .map(|v| v.map(|n| Scalar::Number(n).to_string()))
                .collect();
            Ok(Series::new(series.name(), values))
        }
        _ => Ok(series.cast(&DataType::String)?),
    }
}

pub fn any_value_to_scalar(value: AnyValue) -> Scalar {
    match value {
        AnyValue::Null => Scalar::Null,
        AnyValue::Boolean(b) => Scalar::Text(b.to_string()),
        AnyValue::String(s) => Scalar::Text(s.to_string()),
        AnyValue::StringOwned(s) => Scalar::Text(s.to_string()),
        AnyValue::Date(_) | AnyValue::Datetime(..) => Scalar::Text(value.to_string()),
        other => match other.try_extract::<f64>() {
            Ok(n) if n.is_finite() => Scalar::Number(n),
            Ok(_) => Scalar::Null,
            Err(_) => Scalar::Text(other.to_string()),
        },
    }
}

/// Every value of one column as scalars.
pub fn column_scalars(df: &DataFrame, name: &str) -> Result<Vec<Scalar>> {
    let series = df
        .column(name)
        .map_err(|_| TabulaError::Validation(format!("unknown column '{}'", name)))?;
    let mut out = Vec::with_capacity(series.len());
    for idx in 0..series.len() {
        out.push(any_value_to_scalar(series.get(idx)?));
    }
    Ok(out)
}

/// Numeric reading of one column; text cells go through numeric coercion.
pub fn column_numbers(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(name)
        .map_err(|_| TabulaError::Validation(format!("unknown column '{}'", name)))?;
    match series.dtype() {
        DataType::Float64 => Ok(series.f64()?.into_iter().collect()),
        DataType::String => Ok(series
            .str()?
            .into_iter()
            .map(|cell| cell.and_then(coerce_number))
            .collect()),
        dtype if dtype.is_numeric() => {
            let cast = series.cast(&DataType::Float64)?;
            let values = cast.f64()?.into_iter().collect();
            Ok(values)
        }
        _ => Ok(vec![None; series.len()]),
    }
}

/// Convert the first `max_rows` rows into records.
pub fn dataframe_to_records(df: &DataFrame, max_rows: usize) -> Result<Vec<Record>> {
    let limited = df.head(Some(max_rows));
    let column_names: Vec<String> = limited
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::with_capacity(limited.height());
    for row_idx in 0..limited.height() {
        let mut record = Record::with_capacity(column_names.len());
        for name in &column_names {
            let series = limited.column(name)?;
            record.insert(name.clone(), any_value_to_scalar(series.get(row_idx)?));
        }
        rows.push(record);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cells_build_float_column() {
        let cells = vec![Scalar::Number(1.0), Scalar::Null, Scalar::Number(2.5)];
        let series = series_from_scalars("v", cells.iter());
        assert_eq!(series.dtype(), &DataType::Float64);
        assert_eq!(series.null_count(), 1);
    }

    #[test]
    fn test_mixed_cells_build_string_column() {
        let cells = vec![Scalar::Number(1.0), Scalar::Text("n/a".to_string())];
        let series = series_from_scalars("v", cells.iter());
        assert_eq!(series.dtype(), &DataType::String);
    }

    #[test]
    fn test_promote_to_text_matches_scalar_rendering() {
        let series = Series::new("v", &[Some(1.0), None, Some(2.5)]);
        let promoted = promote_to_text(&series).unwrap();
        let text: Vec<Option<&str>> = promoted.str().unwrap().into_iter().collect();
        assert_eq!(text, vec![Some("1"), None, Some("2.5")]);
    }

    #[test]
    fn test_column_numbers_coerces_text() {
        let df = DataFrame::new(vec![Series::new("v", &["$5", "x", "7"])]).unwrap();
        let values = column_numbers(&df, "v").unwrap();
        assert_eq!(values, vec![Some(5.0), None, Some(7.0)]);
        assert!(column_numbers(&df, "missing").is_err());
    }
}
