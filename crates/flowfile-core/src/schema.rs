//! `schema_after` — pure schema propagation (§4.2, §4.3).
//!
//! Resolves a node's output schema from its kind, settings, and its
//! upstream nodes' already-known schemas, without touching real data or
//! running any I/O. `FlowGraph` calls this after every structural mutation
//! to recompute the mutated node and its descendants in one topological
//! pass; a node whose schema can't be derived this way carries a
//! [`FlowfileError::Schema`] instead of panicking or leaving a stale value
//! behind (§4.3: "records its `SchemaError` and continues").
//!
//! Shape-only kinds reuse the real [`LazyFrameHandle`] operations against a
//! zero-row "probe" frame built from the upstream schema via
//! `lit(NULL).cast(..)`, so the inferred column types are exactly what the
//! embedded engine would produce for that shape — not a second,
//! hand-maintained type-inference table that can drift from `compute.rs`.
//!
//! Two kinds are data-dependent rather than schema-dependent and always
//! fail propagation: `Pivot` (its output columns are the distinct runtime
//! values of the pivot column, not derivable from a schema) and
//! `PolarsCode` (arbitrary user code, explicitly allowed by §4.2 to fail
//! propagation). `Filter` never needs a predicate's actual `Expr` at all,
//! in either mode, since filtering only removes rows; this also means
//! `Formula`'s output type is resolved with the same formula-grammar
//! compiler `ExprCodeSandbox` uses, rather than threading an async
//! `CodeSandbox` through this otherwise-synchronous pass.

use crate::compute::{agg_expr, join_key_exprs, join_type, manual_input, select_by_type};
use crate::edge::InputLabel;
use crate::error::{FlowfileError, Result};
use crate::expr::parse_expression;
use crate::handle::LazyFrameHandle;
use crate::ids::NodeId;
use crate::ops::JoinHow;
use crate::settings::*;
use crate::types::{ColumnSchema, LogicalType, Schema};
use polars::prelude::*;

fn schema_err(node: NodeId, message: impl std::fmt::Display) -> FlowfileError {
    FlowfileError::schema(node, message.to_string())
}

/// Upstream schemas for one node, keyed by input label — the schema-only
/// counterpart of `compute::NodeInputs`.
#[derive(Default)]
pub struct UpstreamSchemas {
    pub main: Vec<Schema>,
    pub left: Option<Schema>,
    pub right: Option<Schema>,
}

impl UpstreamSchemas {
    pub fn insert(&mut self, label: InputLabel, schema: Schema) {
        match label {
            InputLabel::Main => self.main.push(schema),
            InputLabel::Left => self.left = Some(schema),
            InputLabel::Right => self.right = Some(schema),
        }
    }

    fn single_main(&self, node: NodeId) -> Result<&Schema> {
        match self.main.as_slice() {
            [only] => Ok(only),
            _ => Err(schema_err(node, "main input is not connected")),
        }
    }

    fn left_and_right(&self, node: NodeId) -> Result<(&Schema, &Schema)> {
        match (&self.left, &self.right) {
            (Some(l), Some(r)) => Ok((l, r)),
            _ => Err(schema_err(node, "left/right inputs are not both connected")),
        }
    }
}

/// Build a zero-row frame with exactly `schema`'s columns and types, so a
/// real `LazyFrameHandle` operation run against it reports the Polars-exact
/// output schema without materializing any data.
fn probe_handle(schema: &Schema) -> Result<LazyFrameHandle> {
    if schema.is_empty() {
        return LazyFrameHandle::from_dataframe(DataFrame::empty());
    }
    let exprs: Vec<Expr> = schema
        .iter()
        .map(|c| lit(NULL).cast(c.logical_type.to_polars()).alias(&c.name))
        .collect();
    LazyFrameHandle::from_lazyframe(DataFrame::empty().lazy().with_columns(exprs))
}

/// Resolve `settings`'s output schema from `upstream`'s already-known
/// schemas. Pure and synchronous: no data is read or materialized, and no
/// `CodeSandbox` is consulted.
pub fn schema_after(node: NodeId, settings: &NodeSettings, upstream: &UpstreamSchemas) -> Result<Schema> {
    match settings {
        NodeSettings::ManualInput(s) => manual_input(node, s)
            .map(|h| h.schema().clone())
            .map_err(|e| schema_err(node, e)),

        NodeSettings::Read(_) | NodeSettings::CloudStorageRead(_) | NodeSettings::DatabaseRead(_) | NodeSettings::UnityCatalogRead(_) => {
            Err(schema_err(node, "source schema requires interrogating the storage backend, not just upstream schemas"))
        }

        NodeSettings::Write(_)
        | NodeSettings::CloudStorageWrite(_)
        | NodeSettings::DatabaseWrite(_)
        | NodeSettings::UnityCatalogWrite(_)
        | NodeSettings::Filter(_)
        | NodeSettings::Sort(_)
        | NodeSettings::Unique(_)
        | NodeSettings::SampleRows(_)
        | NodeSettings::Output(_) => Ok(upstream.single_main(node)?.clone()),

        NodeSettings::Select(s) => select_schema(node, upstream.single_main(node)?, s),
        NodeSettings::Formula(s) => formula_schema(node, upstream.single_main(node)?, s),
        NodeSettings::RecordId(s) => Ok(record_id_schema(upstream.single_main(node)?, s)),
        NodeSettings::TextToRows(s) => text_to_rows_schema(node, upstream.single_main(node)?, s),
        NodeSettings::FuzzyMatch(s) => fuzzy_match_schema(node, upstream, s),
        NodeSettings::GroupBy(s) => group_by_schema(node, upstream.single_main(node)?, s),

        NodeSettings::Pivot(_) => Err(schema_err(
            node,
            "pivot output columns depend on the distinct runtime values of the pivot column, not just its schema",
        )),

        NodeSettings::Unpivot(s) => unpivot_schema(node, upstream.single_main(node)?, s),
        NodeSettings::Join(s) => join_schema(node, upstream, s),
        NodeSettings::Concat(s) => concat_schema(node, upstream, s.how),
        NodeSettings::Union(_) => concat_schema(node, upstream, crate::ops::ConcatHow::VerticalRelaxed),

        NodeSettings::PolarsCode(_) => Err(schema_err(
            node,
            "polars_code output type cannot be statically derived without running the code",
        )),
    }
}

fn select_schema(node: NodeId, upstream: &Schema, settings: &SelectSettings) -> Result<Schema> {
    let probe = probe_handle(upstream)?;
    let mut entries: Vec<&SelectEntry> = settings.entries.iter().filter(|e| e.keep).collect();
    entries.sort_by_key(|e| e.position);
    let mut exprs: Vec<Expr> = Vec::new();
    for entry in &entries {
        let mut expr = col(entry.original_name.as_str());
        if let Some(dt) = &entry.data_type_override {
            expr = expr.cast(dt.to_polars());
        }
        if let Some(new_name) = &entry.new_name {
            expr = expr.alias(new_name);
        }
        exprs.push(expr);
    }
    if settings.keep_missing {
        let mentioned: std::collections::HashSet<&str> =
            settings.entries.iter().map(|e| e.original_name.as_str()).collect();
        for column in upstream {
            if !mentioned.contains(column.name.as_str()) {
                exprs.push(col(column.name.as_str()));
            }
        }
    }
    probe
        .select(exprs)
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

fn formula_schema(node: NodeId, upstream: &Schema, settings: &FormulaSettings) -> Result<Schema> {
    let probe = probe_handle(upstream)?;
    let mut expr = parse_expression(&settings.expression).map_err(|e| schema_err(node, e))?;
    if let Some(output_type) = &settings.output_type {
        expr = expr.cast(output_type.to_polars());
    }
    probe
        .with_columns(vec![expr.alias(&settings.output_column)])
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

/// `record_id` always appends one `Int64` row-index column; this holds
/// regardless of whether a `group_by` partition is configured, so no probe
/// frame is needed (§4.2).
fn record_id_schema(upstream: &Schema, settings: &RecordIdSettings) -> Schema {
    let mut schema: Schema = upstream
        .iter()
        .filter(|c| c.name != settings.output_name)
        .cloned()
        .collect();
    schema.push(ColumnSchema::new(settings.output_name.clone(), LogicalType::Int64));
    schema
}

fn text_to_rows_schema(node: NodeId, upstream: &Schema, settings: &TextToRowsSettings) -> Result<Schema> {
    let probe = probe_handle(upstream)?;
    let output = settings.output_column.clone().unwrap_or_else(|| settings.column.clone());
    let exploded = probe
        .plan()
        .clone()
        .with_columns([col(&settings.column)
            .str()
            .split(lit(settings.delimiter.as_str()))
            .alias(&output)])
        .explode([col(&output)]);
    LazyFrameHandle::from_lazyframe(exploded)
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

fn fuzzy_match_schema(node: NodeId, upstream: &UpstreamSchemas, settings: &FuzzyMatchSettings) -> Result<Schema> {
    let (left, right) = upstream.left_and_right(node)?;
    let left = probe_handle(left)?;
    let right = probe_handle(right)?;
    let similarity = col(format!("{}_left", settings.left_on).as_str())
        .eq(col(format!("{}_right", settings.right_on).as_str()))
        .cast(DataType::Float64);
    let renamed_left = left
        .rename(&[(settings.left_on.clone(), format!("{}_left", settings.left_on))])
        .map_err(|e| schema_err(node, e))?;
    let renamed_right = right
        .rename(&[(settings.right_on.clone(), format!("{}_right", settings.right_on))])
        .map_err(|e| schema_err(node, e))?;
    let joined = renamed_left.cross_join(&renamed_right).map_err(|e| schema_err(node, e))?;
    joined
        .with_columns(vec![similarity.alias("__similarity")])
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

fn group_by_schema(node: NodeId, upstream: &Schema, settings: &GroupBySettings) -> Result<Schema> {
    let probe = probe_handle(upstream)?;
    let keys: Vec<Expr> = settings
        .entries
        .iter()
        .filter(|e| e.aggregation == crate::ops::AggKind::GroupBy)
        .map(|e| col(e.old_name.as_str()).alias(&e.new_name))
        .collect();
    let aggs: Vec<Expr> = settings
        .entries
        .iter()
        .filter(|e| e.aggregation != crate::ops::AggKind::GroupBy)
        .map(agg_expr)
        .collect();
    probe
        .group_by_agg(keys, aggs)
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

fn unpivot_schema(node: NodeId, upstream: &Schema, settings: &UnpivotSettings) -> Result<Schema> {
    let probe = probe_handle(upstream)?;
    let value_vars = match &settings.values {
        UnpivotValueSelector::Explicit { columns } => columns.clone(),
        UnpivotValueSelector::ByType { selector } => select_by_type(upstream, *selector),
    };
    probe
        .unpivot(&settings.index, &value_vars)
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

fn select_columns_if(node: NodeId, handle: LazyFrameHandle, columns: &Option<Vec<String>>) -> Result<LazyFrameHandle> {
    match columns {
        Some(cols) => handle
            .select(cols.iter().map(|c| col(c.as_str())).collect())
            .map_err(|e| schema_err(node, e)),
        None => Ok(handle),
    }
}

fn join_schema(node: NodeId, upstream: &UpstreamSchemas, settings: &JoinSettings) -> Result<Schema> {
    let (left, right) = upstream.left_and_right(node)?;
    let left = select_columns_if(node, probe_handle(left)?, &settings.left_select)?;
    let right = select_columns_if(node, probe_handle(right)?, &settings.right_select)?;
    if settings.how == JoinHow::Cross {
        return left
            .cross_join(&right)
            .map(|h| h.schema().clone())
            .map_err(|e| schema_err(node, e));
    }
    let (left_on, right_on) = join_key_exprs(&settings.on);
    left.join(&right, left_on, right_on, join_type(settings.how))
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

fn concat_schema(node: NodeId, upstream: &UpstreamSchemas, how: crate::ops::ConcatHow) -> Result<Schema> {
    if upstream.main.is_empty() {
        return Err(schema_err(node, "concat/union requires at least one connected input"));
    }
    let probes: Vec<LazyFrameHandle> = upstream
        .main
        .iter()
        .map(|schema| probe_handle(schema))
        .collect::<Result<_>>()?;
    LazyFrameHandle::concat(&probes, how)
        .map(|h| h.schema().clone())
        .map_err(|e| schema_err(node, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(cols: &[(&str, LogicalType)]) -> Schema {
        cols.iter().map(|(n, t)| ColumnSchema::new(*n, t.clone())).collect()
    }

    #[test]
    fn manual_input_schema_reflects_rows() {
        let settings = NodeSettings::ManualInput(ManualInputSettings {
            rows: vec![serde_json::json!({"a": 1, "b": "x"}).as_object().unwrap().clone()],
        });
        let out = schema_after(NodeId(1), &settings, &UpstreamSchemas::default()).unwrap();
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn filter_passes_schema_through_unchanged() {
        let upstream = schema(&[("a", LogicalType::Int64)]);
        let mut upstream_schemas = UpstreamSchemas::default();
        upstream_schemas.main.push(upstream.clone());
        let settings = NodeSettings::Filter(FilterSettings::Advanced { predicate: "a > 0".into() });
        let out = schema_after(NodeId(1), &settings, &upstream_schemas).unwrap();
        assert_eq!(out, upstream);
    }

    #[test]
    fn formula_schema_infers_numeric_output() {
        let upstream = schema(&[("a", LogicalType::Int64)]);
        let mut upstream_schemas = UpstreamSchemas::default();
        upstream_schemas.main.push(upstream);
        let settings = NodeSettings::Formula(FormulaSettings {
            output_column: "doubled".into(),
            expression: "a * 2".into(),
            output_type: None,
        });
        let out = schema_after(NodeId(1), &settings, &upstream_schemas).unwrap();
        let doubled = crate::types::find_column(&out, "doubled").unwrap();
        assert_eq!(doubled.logical_type, LogicalType::Int64);
    }

    #[test]
    fn formula_referencing_missing_column_is_a_schema_error() {
        let upstream = schema(&[("a", LogicalType::Int64)]);
        let mut upstream_schemas = UpstreamSchemas::default();
        upstream_schemas.main.push(upstream);
        let settings = NodeSettings::Formula(FormulaSettings {
            output_column: "out".into(),
            expression: "missing_column + 1".into(),
            output_type: None,
        });
        let err = schema_after(NodeId(1), &settings, &upstream_schemas).unwrap_err();
        assert!(matches!(err, FlowfileError::Schema { .. }));
    }

    #[test]
    fn record_id_appends_int64_column() {
        let upstream = schema(&[("a", LogicalType::String)]);
        let mut upstream_schemas = UpstreamSchemas::default();
        upstream_schemas.main.push(upstream);
        let settings = NodeSettings::RecordId(RecordIdSettings {
            output_name: "idx".into(),
            offset: 0,
            group_by: vec![],
        });
        let out = schema_after(NodeId(1), &settings, &upstream_schemas).unwrap();
        assert_eq!(crate::types::find_column(&out, "idx").unwrap().logical_type, LogicalType::Int64);
    }

    #[test]
    fn pivot_always_fails_schema_propagation() {
        let upstream = schema(&[("k", LogicalType::String), ("v", LogicalType::Int64)]);
        let mut upstream_schemas = UpstreamSchemas::default();
        upstream_schemas.main.push(upstream);
        let settings = NodeSettings::Pivot(PivotSettings {
            index: vec!["k".into()],
            pivot_column: "k".into(),
            value_column: "v".into(),
            aggregations: vec![crate::ops::AggKind::Sum],
        });
        let err = schema_after(NodeId(1), &settings, &upstream_schemas).unwrap_err();
        assert!(matches!(err, FlowfileError::Schema { .. }));
    }

    #[test]
    fn group_by_schema_types_sum_as_numeric() {
        let upstream = schema(&[("region", LogicalType::String), ("amt", LogicalType::Int64)]);
        let mut upstream_schemas = UpstreamSchemas::default();
        upstream_schemas.main.push(upstream);
        let settings = NodeSettings::GroupBy(GroupBySettings {
            entries: vec![
                GroupByEntry {
                    old_name: "region".into(),
                    aggregation: crate::ops::AggKind::GroupBy,
                    new_name: "region".into(),
                },
                GroupByEntry {
                    old_name: "amt".into(),
                    aggregation: crate::ops::AggKind::Sum,
                    new_name: "total".into(),
                },
            ],
        });
        let out = schema_after(NodeId(1), &settings, &upstream_schemas).unwrap();
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"region"));
        assert!(names.contains(&"total"));
    }

    #[test]
    fn missing_main_input_is_a_schema_error_not_a_panic() {
        let settings = NodeSettings::Sort(SortSettings {
            keys: vec![SortKey {
                column: "a".into(),
                direction: crate::ops::SortDirection::Ascending,
            }],
        });
        let err = schema_after(NodeId(1), &settings, &UpstreamSchemas::default()).unwrap_err();
        assert!(matches!(err, FlowfileError::Schema { .. }));
    }
}
