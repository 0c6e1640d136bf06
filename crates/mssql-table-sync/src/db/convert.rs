//! Conversions between tiberius rows/parameters and [`SqlValue`].

use crate::core::{ColumnDescriptor, SqlNullType, SqlValue};
use crate::error::{Result, SyncError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use std::borrow::Cow;
use tiberius::{ColumnData, Row, ToSql};
use tracing::warn;
use uuid::Uuid;

/// Maximum string length (in bytes) for TDS bulk insert.
/// Tiberius bulk insert has a hard limit of 65535 bytes for UTF-16 encoded strings.
pub const BULK_INSERT_STRING_LIMIT: usize = 65535;

/// SQL Server accepts at most 2100 parameters per statement.
pub const MAX_PARAMETERS: usize = 2100;

/// Select-list expression that reads `quoted` in a shape [`read_value`] understands.
///
/// Types tiberius cannot hand back directly (xml, text, money) are cast on
/// the server.
pub fn select_expression(col: &ColumnDescriptor, quoted: &str) -> String {
    match col.type_name().as_str() {
        "xml" | "text" | "ntext" => format!("CAST({0} AS nvarchar(max)) AS {0}", quoted),
        "money" => format!("CAST({0} AS decimal(19,4)) AS {0}", quoted),
        "smallmoney" => format!("CAST({0} AS decimal(10,4)) AS {0}", quoted),
        _ => quoted.to_string(),
    }
}

fn conversion(col: &ColumnDescriptor, e: tiberius::error::Error) -> SyncError {
    SyncError::from_tiberius(e, format!("reading column {}", col.name))
}

/// Read column `idx` of `row` as a value of `col`'s type.
pub fn read_value(row: &Row, idx: usize, col: &ColumnDescriptor) -> Result<SqlValue<'static>> {
    let value = match col.type_name().as_str() {
        "bit" => row
            .try_get::<bool, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        "tinyint" => row
            .try_get::<u8, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::U8)
            .unwrap_or(SqlValue::Null(SqlNullType::U8)),
        "smallint" => row
            .try_get::<i16, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        "int" => row
            .try_get::<i32, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        "bigint" => row
            .try_get::<i64, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        "real" => row
            .try_get::<f32, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null(SqlNullType::F32)),
        "float" => row
            .try_get::<f64, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "decimal" | "numeric" | "money" | "smallmoney" => read_decimal(row, idx, col)?,
        "uniqueidentifier" => row
            .try_get::<Uuid, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        "date" => row
            .try_get::<NaiveDate, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        "time" => row
            .try_get::<NaiveTime, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        "datetime" | "datetime2" | "smalldatetime" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        "datetimeoffset" => row
            .try_get::<DateTime<FixedOffset>, _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTimeOffset)),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => row
            .try_get::<&[u8], _>(idx)
            .map_err(|e| conversion(col, e))?
            .map(|b| SqlValue::bytes_owned(b.to_vec()))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        _ => {
            // char, varchar, nchar, nvarchar, and the server-side casts of xml/text
            row.try_get::<&str, _>(idx)
                .map_err(|e| conversion(col, e))?
                .map(|s| SqlValue::text_owned(s.to_string()))
                .unwrap_or(SqlValue::Null(SqlNullType::String))
        }
    };
    Ok(value)
}

/// Decimals go through rust_decimal; values beyond its 28 digits fall back to f64.
fn read_decimal(row: &Row, idx: usize, col: &ColumnDescriptor) -> Result<SqlValue<'static>> {
    match row.try_get::<Decimal, _>(idx) {
        Ok(Some(d)) => Ok(SqlValue::Decimal(d)),
        Ok(None) => Ok(SqlValue::Null(SqlNullType::Decimal)),
        Err(_) => {
            let f = row
                .try_get::<f64, _>(idx)
                .map_err(|e| conversion(col, e))?;
            Ok(match f {
                Some(f) => Decimal::try_from(f)
                    .map(SqlValue::Decimal)
                    .unwrap_or(SqlValue::F64(f)),
                None => SqlValue::Null(SqlNullType::Decimal),
            })
        }
    }
}

/// Check if a row contains any string values that exceed the bulk insert limit.
pub fn row_has_oversized_strings(row: &[SqlValue]) -> bool {
    row.iter().any(|value| match value {
        // len_utf16() counts code units; two bytes each
        SqlValue::Text(s) => s.chars().map(|c| c.len_utf16() * 2).sum::<usize>() > BULK_INSERT_STRING_LIMIT,
        _ => false,
    })
}

/// Rows per multi-row INSERT that stay under the parameter limit.
pub fn rows_per_insert(column_count: usize) -> usize {
    if column_count == 0 {
        1
    } else {
        (MAX_PARAMETERS / column_count).max(1)
    }
}

/// Convert SqlValue to a boxed tiberius parameter.
///
/// NULLs stay typed so the server sees the right parameter type.
pub fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(Option::<bool>::None),
            SqlNullType::U8 => Box::new(Option::<u8>::None),
            SqlNullType::I16 => Box::new(Option::<i16>::None),
            SqlNullType::I32 => Box::new(Option::<i32>::None),
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::F32 => Box::new(Option::<f32>::None),
            SqlNullType::F64 => Box::new(Option::<f64>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
            SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
            SqlNullType::Uuid => Box::new(Option::<Uuid>::None),
            SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
            SqlNullType::DateTime | SqlNullType::Date => {
                Box::new(Option::<NaiveDateTime>::None)
            }
            SqlNullType::DateTimeOffset => Box::new(Option::<DateTime<FixedOffset>>::None),
            SqlNullType::Time => Box::new(Option::<NaiveTime>::None),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::U8(v) => Box::new(*v),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) if f.is_finite() => Box::new(*f),
        SqlValue::F64(f) if f.is_finite() => Box::new(*f),
        SqlValue::F32(_) => Box::new(Option::<f32>::None),
        SqlValue::F64(_) => Box::new(Option::<f64>::None),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(NaiveDateTime::new(*d, NaiveTime::MIN)),
        SqlValue::Time(t) => Box::new(*t),
    }
}

fn days_since_year_one(date: NaiveDate) -> Option<u32> {
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?;
    u32::try_from((date - epoch).num_days()).ok()
}

/// Time of day in 100ns increments (scale 7).
fn time_scale7(t: NaiveTime) -> tiberius::time::Time {
    let nanos = t.num_seconds_from_midnight() as u64 * 1_000_000_000 + t.nanosecond() as u64;
    tiberius::time::Time::new(nanos / 100, 7)
}

fn datetime2(dt: NaiveDateTime) -> Option<tiberius::time::DateTime2> {
    let days = days_since_year_one(dt.date())?;
    Some(tiberius::time::DateTime2::new(
        tiberius::time::Date::new(days),
        time_scale7(dt.time()),
    ))
}

/// Convert SqlValue to Tiberius ColumnData for bulk insert.
///
/// Staging columns for every date-like type are `datetime2(7)`, so dates
/// travel as DateTime2 at midnight.
pub fn sql_value_to_column_data(value: &SqlValue) -> ColumnData<'static> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => ColumnData::Bit(None),
            SqlNullType::U8 => ColumnData::U8(None),
            SqlNullType::I16 => ColumnData::I16(None),
            SqlNullType::I32 => ColumnData::I32(None),
            SqlNullType::I64 => ColumnData::I64(None),
            SqlNullType::F32 => ColumnData::F32(None),
            SqlNullType::F64 => ColumnData::F64(None),
            SqlNullType::String => ColumnData::String(None),
            SqlNullType::Bytes => ColumnData::Binary(None),
            SqlNullType::Uuid => ColumnData::Guid(None),
            SqlNullType::Decimal => ColumnData::Numeric(None),
            SqlNullType::DateTime | SqlNullType::Date => ColumnData::DateTime2(None),
            SqlNullType::DateTimeOffset => ColumnData::DateTimeOffset(None),
            SqlNullType::Time => ColumnData::Time(None),
        },
        SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
        SqlValue::U8(v) => ColumnData::U8(Some(*v)),
        SqlValue::I16(i) => ColumnData::I16(Some(*i)),
        SqlValue::I32(i) => ColumnData::I32(Some(*i)),
        SqlValue::I64(i) => ColumnData::I64(Some(*i)),
        SqlValue::F32(f) => {
            if f.is_finite() {
                ColumnData::F32(Some(*f))
            } else {
                warn!("Converting F32 NaN/Infinity to NULL for MSSQL compatibility");
                ColumnData::F32(None)
            }
        }
        SqlValue::F64(f) => {
            if f.is_finite() {
                ColumnData::F64(Some(*f))
            } else {
                warn!("Converting F64 NaN/Infinity to NULL for MSSQL compatibility");
                ColumnData::F64(None)
            }
        }
        SqlValue::Text(s) => ColumnData::String(Some(Cow::Owned(s.to_string()))),
        SqlValue::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b.to_vec()))),
        SqlValue::Uuid(u) => ColumnData::Guid(Some(*u)),
        SqlValue::Decimal(d) => ColumnData::Numeric(Some(
            tiberius::numeric::Numeric::new_with_scale(d.mantissa(), d.scale() as u8),
        )),
        SqlValue::DateTime(dt) => match datetime2(*dt) {
            Some(v) => ColumnData::DateTime2(Some(v)),
            None => {
                warn!("DateTime out of valid range ({}), converting to NULL", dt);
                ColumnData::DateTime2(None)
            }
        },
        SqlValue::DateTimeOffset(dto) => match datetime2(dto.naive_utc()) {
            Some(v) => {
                let offset_minutes = (dto.offset().local_minus_utc() / 60) as i16;
                ColumnData::DateTimeOffset(Some(tiberius::time::DateTimeOffset::new(
                    v,
                    offset_minutes,
                )))
            }
            None => {
                warn!("DateTimeOffset out of valid range ({}), converting to NULL", dto);
                ColumnData::DateTimeOffset(None)
            }
        },
        SqlValue::Date(d) => match datetime2(NaiveDateTime::new(*d, NaiveTime::MIN)) {
            Some(v) => ColumnData::DateTime2(Some(v)),
            None => {
                warn!("Date out of valid range ({}), converting to NULL", d);
                ColumnData::DateTime2(None)
            }
        },
        SqlValue::Time(t) => ColumnData::Time(Some(time_scale7(*t))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::fixtures::column;

    #[test]
    fn test_select_expression_casts_unreadable_types() {
        assert_eq!(
            select_expression(&column("doc", "xml"), "[doc]"),
            "CAST([doc] AS nvarchar(max)) AS [doc]"
        );
        assert_eq!(
            select_expression(&column("price", "money"), "[price]"),
            "CAST([price] AS decimal(19,4)) AS [price]"
        );
        assert_eq!(select_expression(&column("id", "int"), "[id]"), "[id]");
    }

    #[test]
    fn test_sql_value_to_column_data_nan_converts_to_null() {
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::F64(f64::NAN)),
            ColumnData::F64(None)
        ));
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::F32(f32::INFINITY)),
            ColumnData::F32(None)
        ));
    }

    #[test]
    fn test_sql_value_to_column_data_null_types() {
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::Null(SqlNullType::U8)),
            ColumnData::U8(None)
        ));
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::Null(SqlNullType::Date)),
            ColumnData::DateTime2(None)
        ));
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::Null(SqlNullType::Decimal)),
            ColumnData::Numeric(None)
        ));
    }

    #[test]
    fn test_sql_value_to_column_data_basic_types() {
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::Bool(true)),
            ColumnData::Bit(Some(true))
        ));
        assert!(matches!(
            sql_value_to_column_data(&SqlValue::U8(200)),
            ColumnData::U8(Some(200))
        ));
        match sql_value_to_column_data(&SqlValue::text_owned("hi".into())) {
            ColumnData::String(Some(s)) => assert_eq!(s, "hi"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sql_value_to_column_data_date_as_datetime2() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        match sql_value_to_column_data(&SqlValue::Date(d)) {
            ColumnData::DateTime2(Some(dt)) => {
                assert_eq!(dt.time().increments(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sql_value_to_column_data_decimal_keeps_scale() {
        let d: Decimal = "123.4500".parse().unwrap();
        match sql_value_to_column_data(&SqlValue::Decimal(d)) {
            ColumnData::Numeric(Some(n)) => {
                assert_eq!(n.scale(), 4);
                assert_eq!(n.value(), 1234500);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_row_has_oversized_strings() {
        assert!(!row_has_oversized_strings(&[]));
        let small = vec![SqlValue::I32(1), SqlValue::text_owned("a".repeat(100))];
        assert!(!row_has_oversized_strings(&small));
        // 32767 BMP chars = 65534 bytes, still fits
        let at_limit = vec![SqlValue::text_owned("a".repeat(32767))];
        assert!(!row_has_oversized_strings(&at_limit));
        let over = vec![SqlValue::I32(1), SqlValue::text_owned("a".repeat(32768))];
        assert!(row_has_oversized_strings(&over));
    }

    #[test]
    fn test_row_has_oversized_strings_with_surrogate_pairs() {
        // each emoji is a surrogate pair: 4 bytes in UTF-16
        let row = vec![SqlValue::text_owned("😀".repeat(16384))];
        assert!(row_has_oversized_strings(&row));
    }

    #[test]
    fn test_rows_per_insert_respects_parameter_limit() {
        assert_eq!(rows_per_insert(10), 210);
        assert_eq!(rows_per_insert(3000), 1);
        assert_eq!(rows_per_insert(0), 1);
    }
}
