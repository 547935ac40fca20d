//! Emits a standalone Python script reproducing a flow's computation using
//! the embedded engine's native API (§4.6). This is documentation/export
//! tooling, not something the engine runs itself — the generated script is
//! meant to be handed to a human, or run outside this process entirely.

use crate::edge::InputLabel;
use crate::error::Result;
use crate::graph::FlowGraph;
use crate::ids::NodeId;
use crate::ops::{AggKind, ConcatHow, FileFormat, JoinHow, SortDirection, WriteMode};
use crate::settings::{NodeSettings, UnpivotValueSelector};
use std::fmt::Write as _;

fn var(id: NodeId) -> String {
    format!("node_{}", id.0)
}

fn py_str(value: &str) -> String {
    format!("{:?}", value)
}

fn format_repr(format: FileFormat) -> &'static str {
    match format {
        FileFormat::Csv => "csv",
        FileFormat::Parquet => "parquet",
        FileFormat::Json => "json",
        FileFormat::Excel => "excel",
    }
}

fn agg_call(entry_old: &str, kind: AggKind, new_name: &str) -> String {
    let method = match kind {
        AggKind::GroupBy => return format!("pl.col({})", py_str(entry_old)),
        AggKind::Sum => "sum",
        AggKind::Max => "max",
        AggKind::Min => "min",
        AggKind::Median => "median",
        AggKind::Mean => "mean",
        AggKind::Count => "count",
        AggKind::NUnique => "n_unique",
        AggKind::First => "first",
        AggKind::Last => "last",
        AggKind::Concat => "implode",
    };
    format!("pl.col({}).{}().alias({})", py_str(entry_old), method, py_str(new_name))
}

/// Emit a Python script that reproduces `graph`'s computation using the
/// embedded engine's Python API, in topological order.
pub fn generate_code(graph: &FlowGraph) -> Result<String> {
    let order = graph.topological_order()?;
    let mut out = String::new();
    writeln!(out, "import polars as pl").ok();
    writeln!(out).ok();

    for node_id in order {
        let node = graph.node(node_id)?;
        let inputs = graph.inputs_of(node_id)?;
        let v = var(node_id);
        writeln!(out, "# node {node_id} ({:?})", node.kind()).ok();
        emit_node(&mut out, node_id, &node.settings, &inputs);
        writeln!(out).ok();
        let _ = v;
    }

    Ok(out)
}

fn input_var(inputs: &[(InputLabel, NodeId)], label: InputLabel) -> Option<String> {
    inputs.iter().find(|(l, _)| *l == label).map(|(_, id)| var(*id))
}

fn emit_node(out: &mut String, id: NodeId, settings: &NodeSettings, inputs: &[(InputLabel, NodeId)]) {
    let v = var(id);
    let main = input_var(inputs, InputLabel::Main);
    match settings {
        NodeSettings::ManualInput(s) => {
            writeln!(out, "{v} = pl.DataFrame({:?}).lazy()", s.rows.len()).ok();
            writeln!(out, "# manual_input literal rows omitted from generated source").ok();
        }
        NodeSettings::Read(s) => {
            let reader = match s.format {
                FileFormat::Csv => format!("pl.scan_csv({}, has_header={})", py_str(&s.path), s.has_header),
                FileFormat::Parquet => format!("pl.scan_parquet({})", py_str(&s.path)),
                FileFormat::Json => format!("pl.scan_ndjson({})", py_str(&s.path)),
                FileFormat::Excel => format!("pl.read_excel({}).lazy()", py_str(&s.path)),
            };
            writeln!(out, "{v} = {reader}").ok();
        }
        NodeSettings::Write(s) => {
            if let Some(m) = &main {
                let method = match s.format {
                    FileFormat::Csv => "sink_csv",
                    FileFormat::Parquet => "sink_parquet",
                    FileFormat::Json => "sink_ndjson",
                    FileFormat::Excel => "write_excel",
                };
                writeln!(out, "{v} = {m}").ok();
                writeln!(out, "{v}.{method}({})  # write_mode={:?}", py_str(&s.path), s.write_mode).ok();
            }
        }
        NodeSettings::CloudStorageRead(s) => {
            writeln!(
                out,
                "{v} = pl.scan_{}({})  # via connection {}",
                format_repr(s.format),
                py_str(&s.location),
                py_str(&s.connection_name)
            )
            .ok();
        }
        NodeSettings::CloudStorageWrite(s) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}").ok();
                writeln!(
                    out,
                    "{v}.sink_{}({})  # via connection {}, write_mode={:?}",
                    format_repr(s.format),
                    py_str(&s.location),
                    py_str(&s.connection_name),
                    s.write_mode
                )
                .ok();
            }
        }
        NodeSettings::DatabaseRead(s) => {
            writeln!(
                out,
                "{v} = pl.read_database({}, connection={}).lazy()  # dialect={:?}",
                py_str(&s.query),
                py_str(&s.connection_name),
                s.dialect
            )
            .ok();
        }
        NodeSettings::DatabaseWrite(s) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}").ok();
                writeln!(
                    out,
                    "{v}.collect().write_database({}, connection={})  # dialect={:?}, write_mode={:?}",
                    py_str(&s.table),
                    py_str(&s.connection_name),
                    s.dialect,
                    s.write_mode
                )
                .ok();
            }
        }
        NodeSettings::UnityCatalogRead(s) => {
            writeln!(
                out,
                "{v} = unity_catalog_scan({}, {}, {}, {})",
                py_str(&s.connection_name),
                py_str(&s.catalog),
                py_str(&s.schema),
                py_str(&s.table)
            )
            .ok();
        }
        NodeSettings::UnityCatalogWrite(s) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}").ok();
                writeln!(
                    out,
                    "unity_catalog_write({v}, {}, {}, {}, {})",
                    py_str(&s.connection_name),
                    py_str(&s.catalog),
                    py_str(&s.schema),
                    py_str(&s.table)
                )
                .ok();
            }
        }
        NodeSettings::Filter(crate::settings::FilterSettings::Basic(f)) => {
            if let Some(m) = &main {
                let predicate = format!(
                    "pl.col({}).{}",
                    py_str(&f.column),
                    basic_predicate_method(f)
                );
                writeln!(out, "{v} = {m}.filter({predicate})").ok();
            }
        }
        NodeSettings::Filter(crate::settings::FilterSettings::Advanced { predicate }) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}.filter({})  # advanced predicate", py_str(predicate)).ok();
            }
        }
        NodeSettings::Select(s) => {
            if let Some(m) = &main {
                let mut entries: Vec<_> = s.entries.iter().filter(|e| e.keep).collect();
                entries.sort_by_key(|e| e.position);
                let cols: Vec<String> = entries
                    .iter()
                    .map(|e| match &e.new_name {
                        Some(new_name) => format!("pl.col({}).alias({})", py_str(&e.original_name), py_str(new_name)),
                        None => format!("pl.col({})", py_str(&e.original_name)),
                    })
                    .collect();
                writeln!(out, "{v} = {m}.select([{}])", cols.join(", ")).ok();
            }
        }
        NodeSettings::Formula(s) => {
            if let Some(m) = &main {
                writeln!(
                    out,
                    "{v} = {m}.with_columns((pl_expr({})).alias({}))",
                    py_str(&s.expression),
                    py_str(&s.output_column)
                )
                .ok();
            }
        }
        NodeSettings::Sort(s) => {
            if let Some(m) = &main {
                let by: Vec<String> = s.keys.iter().map(|k| py_str(&k.column)).collect();
                let descending: Vec<String> = s
                    .keys
                    .iter()
                    .map(|k| (k.direction == SortDirection::Descending).to_string())
                    .collect();
                writeln!(
                    out,
                    "{v} = {m}.sort([{}], descending=[{}])",
                    by.join(", "),
                    descending.join(", ")
                )
                .ok();
            }
        }
        NodeSettings::Unique(s) => {
            if let Some(m) = &main {
                let subset = match &s.subset {
                    Some(cols) => format!("[{}]", cols.iter().map(|c| py_str(c)).collect::<Vec<_>>().join(", ")),
                    None => "None".to_string(),
                };
                writeln!(out, "{v} = {m}.unique(subset={subset}, keep={:?})", s.strategy).ok();
            }
        }
        NodeSettings::RecordId(s) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}.with_row_index({}, offset={})", py_str(&s.output_name), s.offset).ok();
            }
        }
        NodeSettings::SampleRows(s) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}.collect().sample(n={})", s.n).ok();
            }
        }
        NodeSettings::TextToRows(s) => {
            if let Some(m) = &main {
                writeln!(
                    out,
                    "{v} = {m}.with_columns(pl.col({}).str.split({})).explode({})",
                    py_str(&s.column),
                    py_str(&s.delimiter),
                    py_str(&s.column)
                )
                .ok();
            }
        }
        NodeSettings::FuzzyMatch(s) => {
            let left = input_var(inputs, InputLabel::Left);
            let right = input_var(inputs, InputLabel::Right);
            if let (Some(l), Some(r)) = (left, right) {
                writeln!(
                    out,
                    "{v} = fuzzy_match({l}, {r}, left_on={}, right_on={}, threshold={})",
                    py_str(&s.left_on),
                    py_str(&s.right_on),
                    s.threshold
                )
                .ok();
            }
        }
        NodeSettings::GroupBy(s) => {
            if let Some(m) = &main {
                let keys: Vec<String> = s
                    .entries
                    .iter()
                    .filter(|e| e.aggregation == AggKind::GroupBy)
                    .map(|e| py_str(&e.old_name))
                    .collect();
                let aggs: Vec<String> = s
                    .entries
                    .iter()
                    .filter(|e| e.aggregation != AggKind::GroupBy)
                    .map(|e| agg_call(&e.old_name, e.aggregation, &e.new_name))
                    .collect();
                writeln!(out, "{v} = {m}.group_by([{}]).agg([{}])", keys.join(", "), aggs.join(", ")).ok();
            }
        }
        NodeSettings::Pivot(s) => {
            if let Some(m) = &main {
                let agg_fns = s.aggregations.iter().map(|k| py_str(k.label())).collect::<Vec<_>>().join(", ");
                writeln!(
                    out,
                    "{v} = {m}.collect().pivot(index={:?}, on={}, values={}, aggregate_function=[{agg_fns}])",
                    s.index,
                    py_str(&s.pivot_column),
                    py_str(&s.value_column)
                )
                .ok();
            }
        }
        NodeSettings::Unpivot(s) => {
            if let Some(m) = &main {
                let value_vars = match &s.values {
                    UnpivotValueSelector::Explicit { columns } => {
                        format!("[{}]", columns.iter().map(|c| py_str(c)).collect::<Vec<_>>().join(", "))
                    }
                    UnpivotValueSelector::ByType { selector } => format!("# selected by type: {selector:?}"),
                };
                writeln!(out, "{v} = {m}.unpivot(index={:?}, on={})", s.index, value_vars).ok();
            }
        }
        NodeSettings::Join(s) => {
            let left = input_var(inputs, InputLabel::Left);
            let right = input_var(inputs, InputLabel::Right);
            if let (Some(l), Some(r)) = (left, right) {
                if s.how == JoinHow::Cross {
                    writeln!(out, "{v} = {l}.join({r}, how='cross')").ok();
                } else {
                    let left_on: Vec<String> = s.on.iter().map(|p| py_str(&p.left_col)).collect();
                    let right_on: Vec<String> = s.on.iter().map(|p| py_str(&p.right_col)).collect();
                    writeln!(
                        out,
                        "{v} = {l}.join({r}, left_on=[{}], right_on=[{}], how={})",
                        left_on.join(", "),
                        right_on.join(", "),
                        py_str(join_how_repr(s.how))
                    )
                    .ok();
                }
            }
        }
        NodeSettings::Concat(s) => {
            let mains: Vec<String> = inputs
                .iter()
                .filter(|(l, _)| *l == InputLabel::Main)
                .map(|(_, id)| var(*id))
                .collect();
            let how = match s.how {
                ConcatHow::Vertical => "vertical",
                ConcatHow::VerticalRelaxed => "vertical_relaxed",
            };
            writeln!(out, "{v} = pl.concat([{}], how={})", mains.join(", "), py_str(how)).ok();
        }
        NodeSettings::Union(_) => {
            let mains: Vec<String> = inputs
                .iter()
                .filter(|(l, _)| *l == InputLabel::Main)
                .map(|(_, id)| var(*id))
                .collect();
            writeln!(out, "{v} = pl.concat([{}], how='vertical_relaxed')", mains.join(", ")).ok();
        }
        NodeSettings::PolarsCode(s) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}").ok();
                for line in s.code.lines() {
                    writeln!(out, "# {line}").ok();
                }
            }
        }
        NodeSettings::Output(_) => {
            if let Some(m) = &main {
                writeln!(out, "{v} = {m}").ok();
            }
        }
    }
}

fn basic_predicate_method(filter: &crate::settings::BasicFilter) -> String {
    use crate::ops::FilterOperator::*;
    match filter.operator {
        IsNull => "is_null()".to_string(),
        IsNotNull => "is_not_null()".to_string(),
        Equals => format!("eq({:?})", filter.value),
        NotEquals => format!("ne({:?})", filter.value),
        GreaterThan => format!("gt({:?})", filter.value),
        GreaterThanOrEquals => format!("ge({:?})", filter.value),
        LessThan => format!("lt({:?})", filter.value),
        LessThanOrEquals => format!("le({:?})", filter.value),
        Contains => format!("str.contains({:?})", filter.value),
        NotContains => format!("str.contains({:?}) == False", filter.value),
        StartsWith => format!("str.starts_with({:?})", filter.value),
        EndsWith => format!("str.ends_with({:?})", filter.value),
        Between => format!("is_between({:?}, {:?})", filter.value, filter.value2),
        In => format!("is_in({:?})", filter.value),
        NotIn => format!("is_in({:?}) == False", filter.value),
    }
}

fn join_how_repr(how: JoinHow) -> &'static str {
    match how {
        JoinHow::Inner => "inner",
        JoinHow::Left => "left",
        JoinHow::Right => "right",
        JoinHow::Full => "full",
        JoinHow::Semi => "semi",
        JoinHow::Anti => "anti",
        JoinHow::Cross => "cross",
    }
}
