//! # flowfile-core
//!
//! The graph engine behind flowfile: a typed DAG of tabular transform nodes,
//! backed by Polars' lazy query engine, with scheduling, undo/redo history,
//! a result cache, a run-event bus, and Python/Polars code generation.
//!
//! [`Engine`] is the entry point most callers need; the other modules are
//! public so a host application (e.g. `flowfile-cli`, or a server embedding
//! this crate) can compose the pieces directly.

mod cache;
mod codegen;
mod compute;
mod document;
mod edge;
mod engine;
mod error;
mod events;
mod expr;
mod graph;
mod handle;
mod history;
mod ids;
mod ingestion;
mod node;
mod ops;
mod sandbox;
mod scheduler;
mod schema;
mod settings;
mod types;

pub use cache::{CacheMetrics, ResultCache};
pub use codegen::generate_code;
pub use document::{EdgeRecord, FlowDocument, NodeRecord, CURRENT_DOC_VERSION};
pub use edge::{Arity, ArityDeclaration, InputLabel};
pub use engine::Engine;
pub use error::{EvalErrorKind, FlowfileError, Result};
pub use events::{EventBus, LogLevel, RunEvent, RunEventKind, RunStatus};
pub use graph::{Edge, FlowGraph};
pub use handle::LazyFrameHandle;
pub use ids::{FlowId, IdSequence, NodeId};
pub use ingestion::{ConnectionInfo, IngestionBackend, LocalIngestionBackend};
pub use node::{Fingerprint, FlowNode, FlowNodeState, NodeErrorRecord, NodeMetadata};
pub use ops::{
    AggKind, ConcatHow, DatabaseDialect, DataTypeSelector, FileFormat, FilterArity, FilterOperator, JoinHow,
    SortDirection, UniqueStrategy, WriteMode,
};
pub use sandbox::{CodeSandbox, ExprCodeSandbox};
pub use scheduler::{run_flow, SchedulerConfig};
pub use settings::{
    BasicFilter, CloudStorageReadSettings, CloudStorageWriteSettings, ConcatSettings, DatabaseReadSettings,
    DatabaseWriteSettings, FilterSettings, FormulaSettings, FuzzyMatchSettings, GroupByEntry, GroupBySettings,
    JoinColumnPair, JoinSettings, ManualInputSettings, NodeKind, NodeSettings, OutputSettings, PivotSettings,
    PolarsCodeSettings, ReadSettings, RecordIdSettings, SampleRowsSettings, SelectEntry, SelectSettings, SortKey,
    SortSettings, TextToRowsSettings, UniqueSettings, UnionSettings, UnityCatalogReadSettings,
    UnityCatalogWriteSettings, UnpivotSettings, UnpivotValueSelector, WriteSettings,
};
pub use types::{find_column, ColumnSchema, LogicalType, Schema};
