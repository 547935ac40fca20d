//! Shared vocabulary: the enums every node kind's settings and every
//! `LazyFrameHandle` operation are built from. Keeping these in one module
//! means `settings.rs`, `compute.rs`, and `handle.rs` all speak the same
//! language instead of each re-deriving a parallel enum.

use serde::{Deserialize, Serialize};

/// Join kinds, per the glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

/// Aggregation kinds, per the glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    /// Marks a grouping key rather than an aggregation (§4.2 group-by note).
    GroupBy,
    Sum,
    Max,
    Min,
    Median,
    Mean,
    Count,
    NUnique,
    First,
    Last,
    Concat,
}

impl AggKind {
    /// Short identifier used to disambiguate pivoted columns when a pivot
    /// has more than one aggregation (§4.2: "one column per (pivot-value,
    /// aggregation) combination").
    pub fn label(&self) -> &'static str {
        match self {
            AggKind::GroupBy => "group_by",
            AggKind::Sum => "sum",
            AggKind::Max => "max",
            AggKind::Min => "min",
            AggKind::Median => "median",
            AggKind::Mean => "mean",
            AggKind::Count => "count",
            AggKind::NUnique => "n_unique",
            AggKind::First => "first",
            AggKind::Last => "last",
            AggKind::Concat => "concat",
        }
    }
}

/// Sort direction for one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// `Unique`'s duplicate-resolution strategy. `None` is resolved per the open
/// question in §9: "reject all duplicates".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueStrategy {
    First,
    Last,
    Any,
    None,
}

/// How `Concat`/`Union` align rows across inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatHow {
    /// Columns must match by position (`Concat`'s default).
    Vertical,
    /// Columns are aligned by name; missing columns are null-filled (`Union`,
    /// and `Concat` when the inputs' schemas differ).
    VerticalRelaxed,
}

/// Basic-mode filter operators, per the glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    IsNull,
    IsNotNull,
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Between,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn arity(self) -> FilterArity {
        match self {
            FilterOperator::IsNull | FilterOperator::IsNotNull => FilterArity::Unary,
            FilterOperator::Between => FilterArity::Ternary,
            FilterOperator::In | FilterOperator::NotIn => FilterArity::Set,
            _ => FilterArity::Binary,
        }
    }

    /// Migrate a legacy symbolic operator (§4.7 backward compatibility) to
    /// its canonical name. Unknown symbols are not mapped — the caller
    /// surfaces `SettingsValidationError` per the open question in §9.
    pub fn from_legacy_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "=" => FilterOperator::Equals,
            "!=" => FilterOperator::NotEquals,
            "<" => FilterOperator::LessThan,
            "<=" => FilterOperator::LessThanOrEquals,
            ">" => FilterOperator::GreaterThan,
            ">=" => FilterOperator::GreaterThanOrEquals,
            "contains" => FilterOperator::Contains,
            _ => return None,
        })
    }
}

/// Arity class of a filter operator, used to validate that `value`/`value2`
/// are populated appropriately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterArity {
    Unary,
    Binary,
    Ternary,
    Set,
}

/// File formats `Read`/`Write` (and their cloud/database variants) support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Parquet,
    Json,
    Excel,
}

/// Write collision policy for `sink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Overwrite,
    Append,
    ErrorIfExists,
}

/// `Unpivot`'s data-type selector mode, used when no explicit value-column
/// list is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTypeSelector {
    Numeric,
    String,
    Date,
    All,
}

/// Database dialect for `DatabaseRead`/`DatabaseWrite`, keeping the node-kind
/// roster closed (see `SPEC_FULL.md` §4.2) while still letting format-
/// specific option structs branch per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseDialect {
    Postgres,
    MySql,
    Snowflake,
    Sqlite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_symbol_migration_covers_spec_table() {
        assert_eq!(FilterOperator::from_legacy_symbol("="), Some(FilterOperator::Equals));
        assert_eq!(FilterOperator::from_legacy_symbol("!="), Some(FilterOperator::NotEquals));
        assert_eq!(FilterOperator::from_legacy_symbol(">="), Some(FilterOperator::GreaterThanOrEquals));
        assert_eq!(FilterOperator::from_legacy_symbol("unknown_op"), None);
    }

    #[test]
    fn operator_arity_classes() {
        assert_eq!(FilterOperator::IsNull.arity(), FilterArity::Unary);
        assert_eq!(FilterOperator::Between.arity(), FilterArity::Ternary);
        assert_eq!(FilterOperator::In.arity(), FilterArity::Set);
        assert_eq!(FilterOperator::Equals.arity(), FilterArity::Binary);
    }
}
