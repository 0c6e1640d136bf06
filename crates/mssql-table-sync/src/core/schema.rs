//! Column and table metadata as reported by catalog introspection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two databases a value or connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Authoritative, read-only database.
    Target,
    /// Writable replica.
    Clone,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Target => write!(f, "target"),
            Side::Clone => write!(f, "clone"),
        }
    }
}

/// Comparison family of a SQL Server data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    /// char, varchar, nchar, nvarchar.
    Text,
    /// text, ntext.
    LongText,
    /// Integer, decimal, floating point and money types.
    Numeric,
    Bit,
    /// date, time and datetime variants.
    Temporal,
    /// binary, varbinary, image, rowversion.
    Binary,
    UniqueIdentifier,
    Xml,
    /// Anything else (sql_variant, hierarchyid, geography, ...).
    Other,
}

impl TypeFamily {
    /// Classify a raw type name from `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE`.
    pub fn classify(data_type: &str) -> Self {
        match data_type.trim().to_lowercase().as_str() {
            "char" | "varchar" | "nchar" | "nvarchar" => TypeFamily::Text,
            "text" | "ntext" => TypeFamily::LongText,
            "int" | "bigint" | "smallint" | "tinyint" | "decimal" | "numeric" | "float"
            | "real" | "money" | "smallmoney" => TypeFamily::Numeric,
            "bit" => TypeFamily::Bit,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "time" => {
                TypeFamily::Temporal
            }
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => TypeFamily::Binary,
            "uniqueidentifier" => TypeFamily::UniqueIdentifier,
            "xml" => TypeFamily::Xml,
            _ => TypeFamily::Other,
        }
    }

    /// Whether columns of this family take part in the fingerprint.
    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            TypeFamily::Text | TypeFamily::Numeric | TypeFamily::Bit | TypeFamily::Temporal
        )
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeFamily::Text => "text",
            TypeFamily::LongText => "long_text",
            TypeFamily::Numeric => "numeric",
            TypeFamily::Bit => "bit",
            TypeFamily::Temporal => "temporal",
            TypeFamily::Binary => "binary",
            TypeFamily::UniqueIdentifier => "unique_identifier",
            TypeFamily::Xml => "xml",
            TypeFamily::Other => "other",
        };
        f.write_str(s)
    }
}

/// Column metadata for one side of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name, as spelled in the catalog.
    pub name: String,

    /// Data type (e.g., "int", "varchar", "datetime2").
    pub data_type: String,

    /// Character or byte length for string/binary types; `-1` means max.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<u8>,

    /// Numeric scale, or fractional-second precision for temporal types.
    pub scale: Option<u8>,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Computed column; never inserted, updated or used as a key.
    pub is_computed: bool,

    /// Identity column; inserts need IDENTITY_INSERT.
    pub is_identity: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl ColumnDescriptor {
    /// Comparison family of the column type.
    pub fn family(&self) -> TypeFamily {
        TypeFamily::classify(&self.data_type)
    }

    /// Lowercased type name.
    pub fn type_name(&self) -> String {
        self.data_type.trim().to_lowercase()
    }

    /// rowversion/timestamp columns are generated by the server on every write.
    pub fn is_row_version(&self) -> bool {
        matches!(self.type_name().as_str(), "timestamp" | "rowversion")
    }

    /// Declared length is `max` or unknown.
    pub fn is_unbounded(&self) -> bool {
        !matches!(self.max_length, Some(n) if n > 0)
    }

    /// Time-of-day column (no date part).
    pub fn is_time_of_day(&self) -> bool {
        self.type_name() == "time"
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Columns of one table on one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.matches(name))
    }

    /// Column names as the catalog spells them.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::ColumnDescriptor;

    /// Column descriptor with sensible defaults for tests.
    pub fn column(name: &str, data_type: &str) -> ColumnDescriptor {
        let (max_length, precision, scale) = match data_type {
            "int" => (None, Some(10), Some(0)),
            "decimal" => (None, Some(10), Some(2)),
            "datetime" => (None, None, Some(3)),
            "datetime2" => (None, None, Some(7)),
            "varchar" | "nvarchar" | "char" | "nchar" => (Some(50), None, None),
            _ => (None, None, None),
        };
        ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            max_length,
            precision,
            scale,
            is_nullable: true,
            is_computed: false,
            is_identity: false,
            ordinal_pos: 0,
        }
    }

    pub fn text(name: &str, data_type: &str, len: i32) -> ColumnDescriptor {
        ColumnDescriptor {
            max_length: Some(len),
            ..column(name, data_type)
        }
    }

    pub fn computed(name: &str, data_type: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            is_computed: true,
            ..column(name, data_type)
        }
    }
}
