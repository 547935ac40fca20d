//! `CodeSandbox` — the escape-hatch code surface for `Formula`, `Filter`'s
//! advanced mode, and `PolarsCode` (§4.2, §4.6).
//!
//! This is a trait, not a single hard-wired implementation, the same way
//! `IngestionBackend` abstracts storage: a deployment that embeds a real
//! Python/Polars interpreter can swap in its own `CodeSandbox` without
//! touching `compute.rs`. [`ExprCodeSandbox`] is the default: it compiles
//! the formula-bar grammar from [`crate::expr`] and, for `PolarsCode`, a
//! small `name = expression` statement list — not a general interpreter,
//! which building one is explicitly out of scope.

use crate::error::{EvalErrorKind, FlowfileError, Result};
use crate::expr::parse_expression;
use crate::handle::LazyFrameHandle;
use async_trait::async_trait;
use polars::prelude::Expr;

fn compile_err(message: impl std::fmt::Display) -> FlowfileError {
    FlowfileError::Engine(message.to_string())
}

#[async_trait]
pub trait CodeSandbox: Send + Sync {
    /// Compile a `Formula` node's expression into an `Expr` to alias as the
    /// new column.
    async fn compile_formula(&self, expression: &str) -> Result<Expr>;

    /// Compile a `Filter` advanced-mode predicate into a boolean `Expr`.
    async fn compile_predicate(&self, predicate: &str) -> Result<Expr>;

    /// Execute a `PolarsCode` node's source against its input, producing the
    /// output handle.
    async fn execute(&self, code: &str, input: &LazyFrameHandle) -> Result<LazyFrameHandle>;
}

/// The default sandbox: the formula grammar for expressions, and a
/// line-oriented `name = expression` statement list (with an optional
/// trailing `select: a, b, c` line) for `PolarsCode`.
pub struct ExprCodeSandbox;

#[async_trait]
impl CodeSandbox for ExprCodeSandbox {
    async fn compile_formula(&self, expression: &str) -> Result<Expr> {
        parse_expression(expression).map_err(compile_err)
    }

    async fn compile_predicate(&self, predicate: &str) -> Result<Expr> {
        parse_expression(predicate).map_err(compile_err)
    }

    async fn execute(&self, code: &str, input: &LazyFrameHandle) -> Result<LazyFrameHandle> {
        let mut current = input.clone();
        for (lineno, raw_line) in code.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("select:") {
                let columns: Vec<Expr> = rest
                    .split(',')
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .map(polars::prelude::col)
                    .collect();
                current = current.select(columns)?;
                continue;
            }
            let (name, expr_src) = line.split_once('=').ok_or_else(|| {
                compile_err(format!("line {}: expected 'name = expression', found '{line}'", lineno + 1))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(compile_err(format!("line {}: missing column name", lineno + 1)));
            }
            let expr = parse_expression(expr_src.trim()).map_err(compile_err)?;
            current = current.with_columns(vec![expr.alias(name)])?;
        }
        Ok(current)
    }
}

impl ExprCodeSandbox {
    pub fn into_eval_error(error: FlowfileError, node: crate::ids::NodeId) -> FlowfileError {
        FlowfileError::eval(node, EvalErrorKind::UserCode, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn sample() -> LazyFrameHandle {
        LazyFrameHandle::from_dataframe(df!["a" => [1i64, 2, 3]].unwrap()).unwrap()
    }

    #[tokio::test]
    async fn execute_runs_assignment_statements() {
        let sandbox = ExprCodeSandbox;
        let out = sandbox.execute("b = a * 2", &sample()).await.unwrap();
        let df = out.collect(None).unwrap();
        assert!(df.column("b").is_ok());
    }

    #[tokio::test]
    async fn execute_applies_trailing_select() {
        let sandbox = ExprCodeSandbox;
        let out = sandbox
            .execute("b = a * 2\nselect: b", &sample())
            .await
            .unwrap();
        let df = out.collect(None).unwrap();
        assert_eq!(df.get_column_names().len(), 1);
    }

    #[tokio::test]
    async fn execute_rejects_malformed_statement() {
        let sandbox = ExprCodeSandbox;
        assert!(sandbox.execute("not an assignment", &sample()).await.is_err());
    }
}
