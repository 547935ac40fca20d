//! The schema type system shared by every node kind
//!
//! `spec.md` §3 leaves "logical_type" abstract ("ordered list of `(name,
//! logical_type)` pairs"); [`LogicalType`] fixes the concrete set (§3 of
//! `SPEC_FULL.md`).

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};

/// A column's statically-known type, independent of the lazy engine's own
/// type representation — this is the type `schema::schema_after` reasons
/// about, and what the document format persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum LogicalType {
    Int64,
    Float64,
    Boolean,
    String,
    Date,
    Datetime,
    Duration,
    List(Box<LogicalType>),
    Null,
    /// Recorded when a `polars_code` node's output type cannot be statically
    /// derived without running the user's code.
    Unknown,
}

impl LogicalType {
    /// Map from the embedded engine's native type. Any Polars type this
    /// engine doesn't model explicitly degrades to `Unknown` rather than
    /// panicking — schema propagation must never fail just because a column
    /// has an exotic physical type.
    pub fn from_polars(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => LogicalType::Int64,
            DataType::Float32 | DataType::Float64 => LogicalType::Float64,
            DataType::Boolean => LogicalType::Boolean,
            DataType::String => LogicalType::String,
            DataType::Date => LogicalType::Date,
            DataType::Datetime(_, _) => LogicalType::Datetime,
            DataType::Duration(_) => LogicalType::Duration,
            DataType::List(inner) => LogicalType::List(Box::new(LogicalType::from_polars(inner))),
            DataType::Null => LogicalType::Null,
            _ => LogicalType::Unknown,
        }
    }

    /// Map to the embedded engine's native type, used when a node needs to
    /// cast a column to an explicitly-declared output type (e.g. `Select`'s
    /// `data_type_override`, `Formula`'s explicit output type).
    pub fn to_polars(&self) -> DataType {
        match self {
            LogicalType::Int64 => DataType::Int64,
            LogicalType::Float64 => DataType::Float64,
            LogicalType::Boolean => DataType::Boolean,
            LogicalType::String => DataType::String,
            LogicalType::Date => DataType::Date,
            LogicalType::Datetime => DataType::Datetime(polars::prelude::TimeUnit::Microseconds, None),
            LogicalType::Duration => DataType::Duration(polars::prelude::TimeUnit::Microseconds),
            LogicalType::List(inner) => DataType::List(Box::new(inner.to_polars())),
            LogicalType::Null | LogicalType::Unknown => DataType::Null,
        }
    }

    /// Whether this type is numeric (used by `Unpivot`'s `numeric` selector
    /// and basic-mode filter value coercion).
    pub fn is_numeric(&self) -> bool {
        matches!(self, LogicalType::Int64 | LogicalType::Float64)
    }
}

/// One column of a schema: its name and statically-known type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub logical_type: LogicalType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
        }
    }
}

/// An ordered schema, the unit `schema_after` and `LazyFrameHandle::schema`
/// both deal in.
pub type Schema = Vec<ColumnSchema>;

/// Look up a column by name in a schema slice.
pub fn find_column<'a>(schema: &'a [ColumnSchema], name: &str) -> Option<&'a ColumnSchema> {
    schema.iter().find(|c| c.name == name)
}
