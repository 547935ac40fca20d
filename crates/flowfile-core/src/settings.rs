//! Typed settings payloads — one concrete type per node kind (§9: "Model
//! [settings] as a tagged union over node kinds; each variant carries a
//! concrete settings type with validation logic").
//!
//! `#[serde(deny_unknown_fields)]` throughout moves "unknown keys rejected"
//! from a runtime check into a deserialization failure; `validate()` methods
//! cover the checks serde cannot express (value bounds, cross-field
//! requirements like `between`'s `value2`).

use crate::error::{FlowfileError, Result};
use crate::ids::NodeId;
use crate::ops::{
    AggKind, ConcatHow, DataTypeSelector, DatabaseDialect, FileFormat, FilterArity, FilterOperator,
    JoinHow, SortDirection, UniqueStrategy, WriteMode,
};
use crate::types::LogicalType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed roster of transformation kinds (`SPEC_FULL.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    ManualInput,
    Read,
    CloudStorageRead,
    DatabaseRead,
    UnityCatalogRead,
    Write,
    CloudStorageWrite,
    DatabaseWrite,
    UnityCatalogWrite,
    Filter,
    Select,
    Formula,
    Sort,
    Unique,
    RecordId,
    SampleRows,
    TextToRows,
    FuzzyMatch,
    GroupBy,
    Pivot,
    Unpivot,
    Join,
    Concat,
    Union,
    PolarsCode,
    Output,
}

impl NodeKind {
    /// Whether this kind has no input edges at all (a source).
    pub fn is_source(self) -> bool {
        matches!(
            self,
            NodeKind::ManualInput
                | NodeKind::Read
                | NodeKind::CloudStorageRead
                | NodeKind::DatabaseRead
                | NodeKind::UnityCatalogRead
        )
    }
}

/// A single `(original_name, new_name?, keep, data_type_override?, position)`
/// entry in a `Select` node's projection list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectEntry {
    pub original_name: String,
    pub new_name: Option<String>,
    pub keep: bool,
    pub data_type_override: Option<LogicalType>,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectSettings {
    pub entries: Vec<SelectEntry>,
    pub keep_missing: bool,
}

impl SelectSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if !seen.insert(&entry.original_name) {
                return Err(format!("duplicate column '{}' in select entries", entry.original_name));
            }
        }
        Ok(())
    }
}

/// Basic-mode filter: a column/operator/value triple. `value2` is only
/// meaningful for `Between`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: Option<Value>,
    pub value2: Option<Value>,
}

impl BasicFilter {
    fn validate(&self) -> std::result::Result<(), String> {
        match self.operator.arity() {
            FilterArity::Unary => Ok(()),
            FilterArity::Binary | FilterArity::Set => {
                if self.value.is_none() {
                    Err(format!("operator {:?} requires 'value'", self.operator))
                } else {
                    Ok(())
                }
            }
            FilterArity::Ternary => {
                if self.value.is_none() || self.value2.is_none() {
                    Err("'between' requires both 'value' and 'value2'".into())
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum FilterSettings {
    Basic(BasicFilter),
    /// A string predicate in the embedded engine's expression language.
    Advanced { predicate: String },
}

impl FilterSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            FilterSettings::Basic(basic) => basic.validate(),
            FilterSettings::Advanced { predicate } => {
                if predicate.trim().is_empty() {
                    Err("advanced filter predicate must not be empty".into())
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormulaSettings {
    pub output_column: String,
    pub expression: String,
    /// `None` means `Auto` — let the engine infer the output type (§4.2).
    pub output_type: Option<LogicalType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortSettings {
    pub keys: Vec<SortKey>,
}

impl SortSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.keys.is_empty() {
            Err("sort requires at least one key".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniqueSettings {
    pub subset: Option<Vec<String>>,
    pub strategy: UniqueStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordIdSettings {
    pub output_name: String,
    pub offset: i64,
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleRowsSettings {
    pub n: usize,
    pub seed: Option<u64>,
}

impl SampleRowsSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.n == 0 {
            Err("sample n must be > 0".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextToRowsSettings {
    pub column: String,
    pub delimiter: String,
    pub output_column: Option<String>,
}

impl TextToRowsSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.delimiter.is_empty() {
            Err("text_to_rows delimiter must not be empty".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzyMatchSettings {
    pub left_on: String,
    pub right_on: String,
    pub threshold: f64,
    pub integrity_verify: bool,
}

impl FuzzyMatchSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) {
            Err("fuzzy_match threshold must be in [0.0, 1.0]".into())
        } else {
            Ok(())
        }
    }
}

/// One `(old_name, aggregation, new_name)` triple. `GroupBy` aggregation
/// marks a grouping key; all others aggregate (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupByEntry {
    pub old_name: String,
    pub aggregation: AggKind,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupBySettings {
    pub entries: Vec<GroupByEntry>,
}

impl GroupBySettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.entries.is_empty() {
            return Err("group_by requires at least one entry".into());
        }
        if !self.entries.iter().any(|e| e.aggregation == AggKind::GroupBy) {
            return Err("group_by requires at least one grouping key".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PivotSettings {
    pub index: Vec<String>,
    pub pivot_column: String,
    pub value_column: String,
    pub aggregations: Vec<AggKind>,
}

impl PivotSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.aggregations.is_empty() {
            Err("pivot requires at least one aggregation".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "value_selector", rename_all = "snake_case", deny_unknown_fields)]
pub enum UnpivotValueSelector {
    Explicit { columns: Vec<String> },
    ByType { selector: DataTypeSelector },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnpivotSettings {
    pub index: Vec<String>,
    pub values: UnpivotValueSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinColumnPair {
    pub left_col: String,
    pub right_col: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSettings {
    pub how: JoinHow,
    pub on: Vec<JoinColumnPair>,
    pub left_select: Option<Vec<String>>,
    pub right_select: Option<Vec<String>>,
    pub integrity_verify: bool,
}

impl JoinSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.how == JoinHow::Cross {
            if !self.on.is_empty() {
                return Err("cross join must not declare key pairs".into());
            }
        } else if self.on.is_empty() {
            return Err(format!("{:?} join requires at least one key pair", self.how));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcatSettings {
    pub how: ConcatHow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnionSettings {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolarsCodeSettings {
    pub code: String,
}

impl PolarsCodeSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.code.trim().is_empty() {
            Err("polars_code requires non-empty code".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualInputSettings {
    /// Row-oriented literal data, the shape a visual editor would hand-enter.
    pub rows: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadSettings {
    pub path: String,
    pub format: FileFormat,
    pub has_header: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteSettings {
    pub path: String,
    pub format: FileFormat,
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudStorageReadSettings {
    pub connection_name: String,
    pub location: String,
    pub format: FileFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudStorageWriteSettings {
    pub connection_name: String,
    pub location: String,
    pub format: FileFormat,
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseReadSettings {
    pub connection_name: String,
    pub dialect: DatabaseDialect,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseWriteSettings {
    pub connection_name: String,
    pub dialect: DatabaseDialect,
    pub table: String,
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnityCatalogReadSettings {
    pub connection_name: String,
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnityCatalogWriteSettings {
    pub connection_name: String,
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub write_mode: WriteMode,
}

/// The tagged union over node kinds (§9). Each variant carries the settings
/// struct above appropriate to its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSettings {
    ManualInput(ManualInputSettings),
    Read(ReadSettings),
    CloudStorageRead(CloudStorageReadSettings),
    DatabaseRead(DatabaseReadSettings),
    UnityCatalogRead(UnityCatalogReadSettings),
    Write(WriteSettings),
    CloudStorageWrite(CloudStorageWriteSettings),
    DatabaseWrite(DatabaseWriteSettings),
    UnityCatalogWrite(UnityCatalogWriteSettings),
    Filter(FilterSettings),
    Select(SelectSettings),
    Formula(FormulaSettings),
    Sort(SortSettings),
    Unique(UniqueSettings),
    RecordId(RecordIdSettings),
    SampleRows(SampleRowsSettings),
    TextToRows(TextToRowsSettings),
    FuzzyMatch(FuzzyMatchSettings),
    GroupBy(GroupBySettings),
    Pivot(PivotSettings),
    Unpivot(UnpivotSettings),
    Join(JoinSettings),
    Concat(ConcatSettings),
    Union(UnionSettings),
    PolarsCode(PolarsCodeSettings),
    Output(OutputSettings),
}

impl NodeSettings {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSettings::ManualInput(_) => NodeKind::ManualInput,
            NodeSettings::Read(_) => NodeKind::Read,
            NodeSettings::CloudStorageRead(_) => NodeKind::CloudStorageRead,
            NodeSettings::DatabaseRead(_) => NodeKind::DatabaseRead,
            NodeSettings::UnityCatalogRead(_) => NodeKind::UnityCatalogRead,
            NodeSettings::Write(_) => NodeKind::Write,
            NodeSettings::CloudStorageWrite(_) => NodeKind::CloudStorageWrite,
            NodeSettings::DatabaseWrite(_) => NodeKind::DatabaseWrite,
            NodeSettings::UnityCatalogWrite(_) => NodeKind::UnityCatalogWrite,
            NodeSettings::Filter(_) => NodeKind::Filter,
            NodeSettings::Select(_) => NodeKind::Select,
            NodeSettings::Formula(_) => NodeKind::Formula,
            NodeSettings::Sort(_) => NodeKind::Sort,
            NodeSettings::Unique(_) => NodeKind::Unique,
            NodeSettings::RecordId(_) => NodeKind::RecordId,
            NodeSettings::SampleRows(_) => NodeKind::SampleRows,
            NodeSettings::TextToRows(_) => NodeKind::TextToRows,
            NodeSettings::FuzzyMatch(_) => NodeKind::FuzzyMatch,
            NodeSettings::GroupBy(_) => NodeKind::GroupBy,
            NodeSettings::Pivot(_) => NodeKind::Pivot,
            NodeSettings::Unpivot(_) => NodeKind::Unpivot,
            NodeSettings::Join(_) => NodeKind::Join,
            NodeSettings::Concat(_) => NodeKind::Concat,
            NodeSettings::Union(_) => NodeKind::Union,
            NodeSettings::PolarsCode(_) => NodeKind::PolarsCode,
            NodeSettings::Output(_) => NodeKind::Output,
        }
    }

    /// Validate the payload, covering what `#[serde(deny_unknown_fields)]`
    /// and the type system cannot: numeric bounds and cross-field
    /// requirements (§4.2).
    pub fn validate(&self, node: NodeId) -> Result<()> {
        let outcome = match self {
            NodeSettings::Select(s) => s.validate(),
            NodeSettings::Filter(s) => s.validate(),
            NodeSettings::Sort(s) => s.validate(),
            NodeSettings::SampleRows(s) => s.validate(),
            NodeSettings::TextToRows(s) => s.validate(),
            NodeSettings::FuzzyMatch(s) => s.validate(),
            NodeSettings::GroupBy(s) => s.validate(),
            NodeSettings::Pivot(s) => s.validate(),
            NodeSettings::Join(s) => s.validate(),
            NodeSettings::PolarsCode(s) => s.validate(),
            _ => Ok(()),
        };
        outcome.map_err(|message| FlowfileError::settings_validation(node, message))
    }

    /// Default, minimal-but-valid settings for a freshly added node of this
    /// kind (used by `FlowGraph::add_node` when no initial settings are
    /// supplied).
    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::ManualInput => NodeSettings::ManualInput(ManualInputSettings { rows: vec![] }),
            NodeKind::Read => NodeSettings::Read(ReadSettings {
                path: String::new(),
                format: FileFormat::Csv,
                has_header: true,
            }),
            NodeKind::CloudStorageRead => NodeSettings::CloudStorageRead(CloudStorageReadSettings {
                connection_name: String::new(),
                location: String::new(),
                format: FileFormat::Parquet,
            }),
            NodeKind::DatabaseRead => NodeSettings::DatabaseRead(DatabaseReadSettings {
                connection_name: String::new(),
                dialect: DatabaseDialect::Postgres,
                query: String::new(),
            }),
            NodeKind::UnityCatalogRead => NodeSettings::UnityCatalogRead(UnityCatalogReadSettings {
                connection_name: String::new(),
                catalog: String::new(),
                schema: String::new(),
                table: String::new(),
            }),
            NodeKind::Write => NodeSettings::Write(WriteSettings {
                path: String::new(),
                format: FileFormat::Csv,
                write_mode: WriteMode::Overwrite,
            }),
            NodeKind::CloudStorageWrite => NodeSettings::CloudStorageWrite(CloudStorageWriteSettings {
                connection_name: String::new(),
                location: String::new(),
                format: FileFormat::Parquet,
                write_mode: WriteMode::Overwrite,
            }),
            NodeKind::DatabaseWrite => NodeSettings::DatabaseWrite(DatabaseWriteSettings {
                connection_name: String::new(),
                dialect: DatabaseDialect::Postgres,
                table: String::new(),
                write_mode: WriteMode::Append,
            }),
            NodeKind::UnityCatalogWrite => NodeSettings::UnityCatalogWrite(UnityCatalogWriteSettings {
                connection_name: String::new(),
                catalog: String::new(),
                schema: String::new(),
                table: String::new(),
                write_mode: WriteMode::Append,
            }),
            NodeKind::Filter => NodeSettings::Filter(FilterSettings::Advanced {
                predicate: "true".to_string(),
            }),
            NodeKind::Select => NodeSettings::Select(SelectSettings {
                entries: vec![],
                keep_missing: true,
            }),
            NodeKind::Formula => NodeSettings::Formula(FormulaSettings {
                output_column: "formula_result".to_string(),
                expression: String::new(),
                output_type: None,
            }),
            NodeKind::Sort => NodeSettings::Sort(SortSettings { keys: vec![] }),
            NodeKind::Unique => NodeSettings::Unique(UniqueSettings {
                subset: None,
                strategy: UniqueStrategy::First,
            }),
            NodeKind::RecordId => NodeSettings::RecordId(RecordIdSettings {
                output_name: "record_id".to_string(),
                offset: 0,
                group_by: vec![],
            }),
            NodeKind::SampleRows => NodeSettings::SampleRows(SampleRowsSettings { n: 1, seed: None }),
            NodeKind::TextToRows => NodeSettings::TextToRows(TextToRowsSettings {
                column: String::new(),
                delimiter: ",".to_string(),
                output_column: None,
            }),
            NodeKind::FuzzyMatch => NodeSettings::FuzzyMatch(FuzzyMatchSettings {
                left_on: String::new(),
                right_on: String::new(),
                threshold: 0.8,
                integrity_verify: false,
            }),
            NodeKind::GroupBy => NodeSettings::GroupBy(GroupBySettings { entries: vec![] }),
            NodeKind::Pivot => NodeSettings::Pivot(PivotSettings {
                index: vec![],
                pivot_column: String::new(),
                value_column: String::new(),
                aggregations: vec![AggKind::Sum],
            }),
            NodeKind::Unpivot => NodeSettings::Unpivot(UnpivotSettings {
                index: vec![],
                values: UnpivotValueSelector::ByType {
                    selector: DataTypeSelector::All,
                },
            }),
            NodeKind::Join => NodeSettings::Join(JoinSettings {
                how: JoinHow::Inner,
                on: vec![],
                left_select: None,
                right_select: None,
                integrity_verify: false,
            }),
            NodeKind::Concat => NodeSettings::Concat(ConcatSettings {
                how: ConcatHow::Vertical,
            }),
            NodeKind::Union => NodeSettings::Union(UnionSettings {}),
            NodeKind::PolarsCode => NodeSettings::PolarsCode(PolarsCodeSettings {
                code: "output_df = input_df".to_string(),
            }),
            NodeKind::Output => NodeSettings::Output(OutputSettings {}),
        }
    }
}
