//! Column normalization for checksum consistency.
//!
//! The target and the clone rarely declare a column identically: a
//! `varchar(50)` may be `nvarchar(30)` on the other side, a `datetime2(7)` may
//! be a `smalldatetime`, a bit may be NULL where the other side stores 0.
//! Each comparable column is projected through an expression that cancels
//! these cosmetic differences before hashing:
//!
//! - Text: NULL becomes `N''`, the value is cut to the *smaller* of the two
//!   declared lengths, trailing blanks are trimmed and the result is cast to
//!   nvarchar under a binary collation.
//! - Numeric and bit: NULL becomes 0 and every value is cast to one shared
//!   `decimal(p,s)`.
//! - Temporal: the value is rendered as a fixed-width string at the coarsest
//!   grain both sides can store, with a fixed sentinel for NULL.
//!   datetimeoffset values are shifted to UTC first.

use crate::config::{SyncConfig, TemporalPrecision};
use crate::core::{ColumnDescriptor, TypeFamily};

/// Collation every normalized string is compared under.
pub(crate) const COMPARE_COLLATION: &str = "Latin1_General_BIN2";

/// Longest nvarchar that is not `max`.
const MAX_NVARCHAR_LENGTH: i32 = 4000;

/// Settings shared by every normalization expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub numeric_precision: u8,
    pub numeric_scale: u8,
    /// Length assumed for `max` or unknown text widths.
    pub default_text_length: i32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for NormalizeOptions {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            numeric_precision: sync.numeric_precision,
            numeric_scale: sync.numeric_scale,
            default_text_length: sync.default_text_length,
        }
    }
}

/// How a comparable column is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Cut to `length` characters, trimmed.
    Text { length: i32 },
    /// Cast to the shared decimal.
    Numeric,
    /// Rendered at `grain`.
    Temporal { grain: TemporalPrecision },
}

/// Comparison length of a text column: the smaller declared length, with
/// unbounded widths counted as `sentinel`.
pub fn effective_length(target: &ColumnDescriptor, clone: &ColumnDescriptor, sentinel: i32) -> i32 {
    let len = |c: &ColumnDescriptor| match c.max_length {
        Some(n) if n > 0 => n,
        _ => sentinel,
    };
    len(target).min(len(clone))
}

/// Finest grain a temporal column can store.
pub fn native_grain(col: &ColumnDescriptor) -> TemporalPrecision {
    let fractional = |default: u8| match col.scale.unwrap_or(default) {
        0..=2 => TemporalPrecision::Second,
        _ => TemporalPrecision::Millisecond,
    };
    match col.type_name().as_str() {
        "date" => TemporalPrecision::Day,
        "smalldatetime" => TemporalPrecision::Minute,
        "datetime" => TemporalPrecision::Millisecond,
        _ => fractional(7),
    }
}

/// Grain at which a temporal column pair is compared.
///
/// The coarser native grain of the two sides, further coarsened by the
/// table override. `datetime` stores ticks of 1/300 s, which do not truncate
/// to the same milliseconds as a `datetime2`, so a mixed pair stops at seconds.
pub fn comparison_grain(
    target: &ColumnDescriptor,
    clone: &ColumnDescriptor,
    forced: Option<TemporalPrecision>,
) -> TemporalPrecision {
    let mut grain = native_grain(target).min(native_grain(clone));
    if let Some(forced) = forced {
        grain = grain.min(forced);
    }
    let is_datetime = |c: &ColumnDescriptor| c.type_name() == "datetime";
    if grain == TemporalPrecision::Millisecond && is_datetime(target) != is_datetime(clone) {
        grain = TemporalPrecision::Second;
    }
    grain
}

/// Normalization for a column pair, or `None` when the pair cannot be compared.
pub fn rule_for(
    target: &ColumnDescriptor,
    clone: &ColumnDescriptor,
    opts: &NormalizeOptions,
    forced_grain: Option<TemporalPrecision>,
) -> Option<Normalization> {
    let family = target.family();
    let numeric_like = |f: TypeFamily| matches!(f, TypeFamily::Numeric | TypeFamily::Bit);

    match (family, clone.family()) {
        (TypeFamily::Text, TypeFamily::Text) => Some(Normalization::Text {
            length: effective_length(target, clone, opts.default_text_length),
        }),
        (a, b) if numeric_like(a) && numeric_like(b) => Some(Normalization::Numeric),
        (TypeFamily::Temporal, TypeFamily::Temporal)
            if target.is_time_of_day() == clone.is_time_of_day() =>
        {
            Some(Normalization::Temporal {
                grain: comparison_grain(target, clone, forced_grain),
            })
        }
        _ => None,
    }
}

/// Normalized expression for one side's column.
///
/// `quoted` is the bracket-quoted column name as that side spells it.
pub fn normalize_expr(
    col: &ColumnDescriptor,
    quoted: &str,
    rule: &Normalization,
    opts: &NormalizeOptions,
) -> String {
    match rule {
        Normalization::Text { length } => text_expr(quoted, *length),
        Normalization::Numeric => format!(
            "CAST(ISNULL({}, 0) AS decimal({},{}))",
            quoted, opts.numeric_precision, opts.numeric_scale
        ),
        Normalization::Temporal { grain } => temporal_expr(col, quoted, *grain),
    }
}

fn text_expr(quoted: &str, length: i32) -> String {
    let target_type = if length > MAX_NVARCHAR_LENGTH {
        "nvarchar(max)".to_string()
    } else {
        format!("nvarchar({})", length)
    };
    format!(
        "CAST(RTRIM(LEFT(ISNULL({}, N''), {})) AS {}) COLLATE {}",
        quoted, length, target_type, COMPARE_COLLATION
    )
}

fn temporal_expr(col: &ColumnDescriptor, quoted: &str, grain: TemporalPrecision) -> String {
    let source = if col.type_name() == "datetimeoffset" {
        format!("CONVERT(datetime2(7), {}, 1)", quoted)
    } else {
        quoted.to_string()
    };

    let (width, style, sentinel) = if col.is_time_of_day() {
        let (width, style) = match grain {
            TemporalPrecision::Millisecond => (12, 114),
            TemporalPrecision::Second => (8, 108),
            TemporalPrecision::Minute | TemporalPrecision::Day => (5, 108),
        };
        (width, style, &"00:00:00:000"[..width])
    } else {
        let (width, style) = match grain {
            TemporalPrecision::Day => (10, 23),
            TemporalPrecision::Minute => (16, 120),
            TemporalPrecision::Second => (19, 120),
            TemporalPrecision::Millisecond => (23, 121),
        };
        (width, style, &"1900-01-01 00:00:00.000"[..width])
    };

    format!(
        "ISNULL(CONVERT(char({}), {}, {}), '{}')",
        width, source, style, sentinel
    )
}
