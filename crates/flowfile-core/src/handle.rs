//! `LazyFrameHandle` — the opaque lazy-computation value (§4.1)
//!
//! A handle bundles a not-yet-materialized computation with its statically
//! known schema. `FlowNode` and `FlowGraph` only ever touch tabular data
//! through this type; swapping the embedded engine means reimplementing this
//! one module, nothing upstream of it.
//!
//! The concrete backend is Polars' lazy `LazyFrame`. This is not "the core
//! implementing a query engine" (a Non-goal) — it is the core *delegating*
//! to one, which is exactly what §1 asks for.

use crate::error::{EvalErrorKind, FlowfileError, Result};
use crate::ops::{ConcatHow, FileFormat, UniqueStrategy, WriteMode};
use crate::types::{ColumnSchema, LogicalType, Schema};
use polars::prelude::*;
use std::path::Path;

fn eval_err(message: impl Into<String>) -> FlowfileError {
    // Node-less engine errors are wrapped into a node-scoped `Eval` error by
    // the caller (`FlowNode::compute`) where node context is available; here
    // we only have the generic engine error.
    FlowfileError::Engine(message.into())
}

/// An opaque reference to a not-yet-materialized tabular computation.
///
/// Cloning a handle is cheap: it clones the underlying query plan, not any
/// data (§3, "Handles are value-like; copying does not copy data").
#[derive(Clone)]
pub struct LazyFrameHandle {
    plan: LazyFrame,
    schema: Schema,
}

impl std::fmt::Debug for LazyFrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyFrameHandle")
            .field("schema", &self.schema)
            .finish()
    }
}

impl LazyFrameHandle {
    /// Wrap a Polars `LazyFrame`, eagerly resolving its schema so that
    /// `schema()` is a total, synchronous lookup afterwards (§4.1: "total").
    pub fn from_lazyframe(plan: LazyFrame) -> Result<Self> {
        let resolved = plan
            .clone()
            .collect_schema()
            .map_err(|e| eval_err(format!("failed to resolve schema: {e}")))?;
        let schema = resolved
            .iter()
            .map(|(name, dtype)| ColumnSchema::new(name.as_str(), LogicalType::from_polars(dtype)))
            .collect();
        Ok(Self { plan, schema })
    }

    /// Construct a handle directly from an already-materialized frame
    /// (used by `ManualInput` and by tests).
    pub fn from_dataframe(df: DataFrame) -> Result<Self> {
        Self::from_lazyframe(df.lazy())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn plan(&self) -> &LazyFrame {
        &self.plan
    }

    pub fn select(&self, exprs: Vec<Expr>) -> Result<Self> {
        Self::from_lazyframe(self.plan.clone().select(exprs))
    }

    pub fn rename(&self, pairs: &[(String, String)]) -> Result<Self> {
        if pairs.is_empty() {
            return Ok(self.clone());
        }
        let existing: Vec<&str> = pairs.iter().map(|(from, _)| from.as_str()).collect();
        let renamed: Vec<&str> = pairs.iter().map(|(_, to)| to.as_str()).collect();
        Self::from_lazyframe(self.plan.clone().rename(existing, renamed, true))
    }

    pub fn filter(&self, predicate: Expr) -> Result<Self> {
        Self::from_lazyframe(self.plan.clone().filter(predicate))
    }

    pub fn with_columns(&self, exprs: Vec<Expr>) -> Result<Self> {
        Self::from_lazyframe(self.plan.clone().with_columns(exprs))
    }

    pub fn sort(&self, by: &[String], descending: &[bool]) -> Result<Self> {
        let options = SortMultipleOptions::default()
            .with_order_descending_multi(descending.to_vec())
            .with_maintain_order(true);
        Self::from_lazyframe(self.plan.clone().sort(by, options))
    }

    pub fn group_by_agg(&self, keys: Vec<Expr>, aggs: Vec<Expr>) -> Result<Self> {
        Self::from_lazyframe(self.plan.clone().group_by(keys).agg(aggs))
    }

    pub fn join(
        &self,
        other: &Self,
        left_on: Vec<Expr>,
        right_on: Vec<Expr>,
        join_type: JoinType,
    ) -> Result<Self> {
        let args = JoinArgs::new(join_type);
        Self::from_lazyframe(
            self.plan
                .clone()
                .join(other.plan.clone(), left_on, right_on, args),
        )
    }

    pub fn cross_join(&self, other: &Self) -> Result<Self> {
        Self::from_lazyframe(
            self.plan
                .clone()
                .join(other.plan.clone(), [], [], JoinArgs::new(JoinType::Cross)),
        )
    }

    /// Concatenate this handle with `others`, aligning by column name and
    /// null-filling missing columns when `how` is `VerticalRelaxed` (§4.2's
    /// n-ary concat note).
    pub fn concat(frames: &[Self], how: ConcatHow) -> Result<Self> {
        if frames.is_empty() {
            return Err(eval_err("concat requires at least one input"));
        }
        let plans: Vec<LazyFrame> = frames.iter().map(|f| f.plan.clone()).collect();
        let union_args = match how {
            ConcatHow::Vertical => UnionArgs::default(),
            ConcatHow::VerticalRelaxed => UnionArgs {
                rechunk: true,
                parallel: true,
                to_supertypes: true,
                ..Default::default()
            },
        };
        let combined =
            concat(plans.as_slice(), union_args).map_err(|e| eval_err(format!("concat failed: {e}")))?;
        Self::from_lazyframe(combined)
    }

    /// Pivot. Polars does not expose a lazy pivot, so this materializes the
    /// input — a documented, internal cost of this one operation, not a
    /// hand-rolled query engine.
    ///
    /// `aggregations` emits one column per (pivot-value, aggregation)
    /// combination (§4.2): with more than one aggregation, each pivoted
    /// column is suffixed with the aggregation's label so `sum` and `max`
    /// of the same pivot value don't collide, and the per-aggregation
    /// pivots are joined back together on `index`.
    pub fn pivot(
        &self,
        index: &[String],
        pivot_col: &str,
        value_col: &str,
        aggregations: &[(crate::ops::AggKind, Expr)],
    ) -> Result<Self> {
        if aggregations.is_empty() {
            return Err(eval_err("pivot requires at least one aggregation"));
        }
        let df = self
            .plan
            .clone()
            .collect()
            .map_err(|e| eval_err(format!("pivot: failed to materialize input: {e}")))?;

        let mut combined: Option<Self> = None;
        for (kind, agg_expr) in aggregations {
            let pivoted = polars::prelude::pivot::pivot_stable(
                &df,
                [pivot_col],
                Some(index),
                Some([value_col]),
                true,
                Some(agg_expr.clone()),
                None,
            )
            .map_err(|e| eval_err(format!("pivot failed: {e}")))?;
            let mut handle = Self::from_dataframe(pivoted)?;
            if aggregations.len() > 1 {
                let suffix = format!("_{}", kind.label());
                let renames: Vec<(String, String)> = handle
                    .schema
                    .iter()
                    .filter(|c| !index.contains(&c.name))
                    .map(|c| (c.name.clone(), format!("{}{}", c.name, suffix)))
                    .collect();
                handle = handle.rename(&renames)?;
            }
            combined = Some(match combined {
                None => handle,
                Some(acc) => {
                    let index_cols: Vec<Expr> = index.iter().map(|c| col(c.as_str())).collect();
                    acc.join(&handle, index_cols.clone(), index_cols, JoinType::Inner)?
                }
            });
        }
        Ok(combined.unwrap())
    }

    pub fn unpivot(&self, index: &[String], value_vars: &[String]) -> Result<Self> {
        let args = UnpivotArgsIR {
            on: value_vars.iter().map(|s| s.as_str().into()).collect(),
            index: index.iter().map(|s| s.as_str().into()).collect(),
            value_name: Some("value".into()),
            variable_name: Some("variable".into()),
        };
        Self::from_lazyframe(self.plan.clone().unpivot(args))
    }

    pub fn unique(&self, subset: Option<Vec<String>>, strategy: UniqueStrategy) -> Result<Self> {
        let keep = match strategy {
            UniqueStrategy::First => UniqueKeepStrategy::First,
            UniqueStrategy::Last => UniqueKeepStrategy::Last,
            UniqueStrategy::Any => UniqueKeepStrategy::Any,
            // §9 open question: `none` means "reject all duplicates".
            UniqueStrategy::None => UniqueKeepStrategy::None,
        };
        Self::from_lazyframe(self.plan.clone().unique_generic(subset, keep))
    }

    pub fn head(&self, n: u32) -> Result<Self> {
        Self::from_lazyframe(self.plan.clone().limit(n))
    }

    pub fn sample(&self, n: usize, seed: u64) -> Result<Self> {
        let df = self
            .plan
            .clone()
            .collect()
            .map_err(|e| eval_err(format!("sample: failed to materialize input: {e}")))?;
        let sampled = df
            .sample_n_literal(n.min(df.height()), false, false, Some(seed))
            .map_err(|e| eval_err(format!("sample failed: {e}")))?;
        Self::from_dataframe(sampled)
    }

    /// Materialize the plan, optionally stopping after `limit` rows.
    pub fn collect(&self, limit: Option<u32>) -> Result<DataFrame> {
        let plan = match limit {
            Some(n) => self.plan.clone().limit(n),
            None => self.plan.clone(),
        };
        plan.collect().map_err(|e| eval_err(format!("collect failed: {e}")))
    }

    /// Write the materialized result to storage.
    pub fn sink(&self, path: &Path, format: FileFormat, write_mode: WriteMode) -> Result<()> {
        if write_mode == WriteMode::ErrorIfExists && path.exists() {
            return Err(eval_err(format!("{} already exists", path.display())));
        }
        let mut df = self
            .plan
            .clone()
            .collect()
            .map_err(|e| eval_err(format!("sink: failed to materialize: {e}")))?;
        match format {
            FileFormat::Csv => {
                let file = std::fs::File::create(path).map_err(|e| eval_err(e.to_string()))?;
                CsvWriter::new(file)
                    .finish(&mut df)
                    .map_err(|e| eval_err(format!("csv write failed: {e}")))?;
            }
            FileFormat::Parquet => {
                let file = std::fs::File::create(path).map_err(|e| eval_err(e.to_string()))?;
                ParquetWriter::new(file)
                    .finish(&mut df)
                    .map_err(|e| eval_err(format!("parquet write failed: {e}")))?;
            }
            FileFormat::Json => {
                let file = std::fs::File::create(path).map_err(|e| eval_err(e.to_string()))?;
                JsonWriter::new(file)
                    .finish(&mut df)
                    .map_err(|e| eval_err(format!("json write failed: {e}")))?;
            }
            FileFormat::Excel => {
                return Err(eval_err("excel sink is not supported by the embedded engine"));
            }
        }
        Ok(())
    }

    /// Row-count hint without a full collect, when the plan makes it cheap;
    /// falls back to `None` ("may be unknown", §3).
    pub fn row_count_hint(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn sample_frame() -> LazyFrameHandle {
        let df = df![
            "region" => ["N", "S", "N"],
            "amt" => [100i64, 0, 50],
        ]
        .unwrap();
        LazyFrameHandle::from_dataframe(df).unwrap()
    }

    #[test]
    fn schema_reflects_columns() {
        let handle = sample_frame();
        let names: Vec<&str> = handle.schema().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["region", "amt"]);
    }

    #[test]
    fn filter_then_group_by_sum() {
        let handle = sample_frame();
        let filtered = handle.filter(col("amt").gt(lit(0))).unwrap();
        let grouped = filtered
            .group_by_agg(vec![col("region")], vec![col("amt").sum().alias("total")])
            .unwrap();
        let collected = grouped.collect(None).unwrap();
        assert_eq!(collected.height(), 2);
    }

    #[test]
    fn clone_is_cheap_and_independent() {
        let handle = sample_frame();
        let cloned = handle.clone();
        assert_eq!(handle.schema(), cloned.schema());
    }

    #[test]
    fn head_limits_rows() {
        let handle = sample_frame();
        let limited = handle.head(1).unwrap();
        assert_eq!(limited.collect(None).unwrap().height(), 1);
    }
}
