//! Async expression evaluation.
//!
//! Evaluation may suspend at any function call: built-ins are synchronous,
//! but subroutines, library functions, and the external dispatch fallback
//! run through the driver. Argument values are always materialized before
//! dispatch, so handlers never observe partially evaluated state.

use async_recursion::async_recursion;
use indexmap::IndexMap;
use rexon_parser::ast::{BinaryOp, CallArgs, Expr, UnaryOp};
use rexon_core::Value;

use crate::builtins::{collection_set, BuiltinCtx};
use crate::error::RunError;
use crate::{DynamicFunction, Interpreter};

impl Interpreter {
    #[async_recursion]
    pub(crate) async fn eval_expr(&mut self, expr: &Expr) -> Result<Value, RunError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::StringLit(s) => Ok(Value::String(s.clone())),
            Expr::Symbol(name) => Ok(self.resolve_symbol(name)),
            Expr::ArrayLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item).await?);
                }
                Ok(Value::Array(values))
            }
            Expr::ObjectLit(entries) => {
                let mut map = IndexMap::new();
                for (key, value_expr) in entries {
                    let value = self.eval_expr(value_expr).await?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand).await?;
                self.apply_unary(*op, value)
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval_expr(lhs).await?;
                let right = self.eval_expr(rhs).await?;
                self.apply_binary(*op, left, right)
            }
            Expr::Call { name, args } => self.eval_call(name, args).await,
        }
    }

    /// Bare symbols resolve to the variable if defined, then as a dot-path
    /// into a defined head variable, and finally to their own (uppercase)
    /// name, classical REXX style.
    pub(crate) fn resolve_symbol(&self, name: &str) -> Value {
        if let Some(value) = self.store.get(name) {
            return value.clone();
        }
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(base) = self.store.get(head) {
                let mut current = base.clone();
                for segment in rest.split('.') {
                    match current.lookup_segment(segment) {
                        Some(next) => current = next,
                        None => return Value::Undefined,
                    }
                }
                return current;
            }
        }
        Value::String(name.to_string())
    }

    /// Evaluate call arguments. A named call becomes one parameter object
    /// whose keys are the labels as written; labels are never resolved
    /// through the variable store.
    pub(crate) async fn eval_call_values(
        &mut self,
        args: &CallArgs,
    ) -> Result<Vec<Value>, RunError> {
        match args {
            CallArgs::Positional(exprs) => {
                let mut values = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    values.push(self.eval_expr(expr).await?);
                }
                Ok(values)
            }
            CallArgs::Named(entries) => {
                let mut map = IndexMap::new();
                for (label, expr) in entries {
                    let value = self.eval_expr(expr).await?;
                    map.insert(label.clone(), value);
                }
                Ok(vec![Value::Object(map)])
            }
        }
    }

    /// True for the store-mutating collection forms the evaluator applies
    /// in place (`ARRAY_SET(arr, i, v)` and friends).
    pub(crate) fn is_mutation_form(name: &str, args: &CallArgs) -> bool {
        match args {
            CallArgs::Positional(pos) => matches!(
                (name, pos.len()),
                ("ARRAY_SET", 3) | ("ARRAY_PUSH", 2) | ("ARRAY_POP", 1)
            ),
            CallArgs::Named(_) => false,
        }
    }

    /// Function dispatch in expression position: built-in registry, then
    /// the subroutine table, then dynamically registered functions, then
    /// the external dispatch fallback. Built-ins never reach the fallback.
    pub(crate) async fn eval_call(&mut self, name: &str, args: &CallArgs) -> Result<Value, RunError> {
        if let CallArgs::Positional(pos) = args {
            match name {
                "ARRAY_SET" if pos.len() == 3 => {
                    return self.eval_array_set(&pos[0], &pos[1], &pos[2]).await;
                }
                "ARRAY_PUSH" if pos.len() == 2 => {
                    return self.eval_array_push(&pos[0], &pos[1]).await;
                }
                "ARRAY_POP" if pos.len() == 1 => {
                    return self.eval_array_pop(&pos[0]).await;
                }
                _ => {}
            }
        }

        let argv = self.eval_call_values(args).await?;

        if let Some(result) = self.call_builtin(name, &argv) {
            return result;
        }
        if let Some(&index) = self.current_unit.labels.get(name) {
            let unit = self.current_unit.clone();
            let fresh = self.label_is_procedure(&unit, index);
            return self.call_in_unit(unit, index, argv, fresh).await;
        }
        if let Some(result) = self.call_dynamic(name, &argv).await {
            return result;
        }
        if let Some(dispatch) = self.external_dispatch.clone() {
            let namespace = self
                .router
                .current_name()
                .map(str::to_string)
                .unwrap_or_default();
            return dispatch.send(&namespace, name, &argv).await;
        }
        Err(RunError::FunctionNotFound {
            name: name.to_string(),
        })
    }

    /// Invoke a built-in if one is registered under `name`.
    pub(crate) fn call_builtin(
        &self,
        name: &str,
        argv: &[Value],
    ) -> Option<Result<Value, RunError>> {
        let f = self.builtins.get(name)?;
        let frame = self.frame_args.last().cloned().unwrap_or_default();
        let ctx = BuiltinCtx {
            frame_args: &frame,
            store: &self.store,
            line: self.current_line,
        };
        Some(f(&ctx, argv))
    }

    /// Invoke a dynamically registered function if one exists.
    pub(crate) async fn call_dynamic(
        &mut self,
        name: &str,
        argv: &[Value],
    ) -> Option<Result<Value, RunError>> {
        let func = self.dynamic.get(name).cloned()?;
        match func {
            DynamicFunction::Native(f) => {
                let frame = self.frame_args.last().cloned().unwrap_or_default();
                let ctx = BuiltinCtx {
                    frame_args: &frame,
                    store: &self.store,
                    line: self.current_line,
                };
                Some(f(&ctx, argv))
            }
            DynamicFunction::Library { library, index } => {
                let unit = self.libraries[library].unit.clone();
                // Library functions always run in a fresh frame.
                Some(self.call_in_unit(unit, index, argv.to_vec(), true).await)
            }
        }
    }

    // ========== ARRAY_SET and friends ==========
    //
    // The documented replacement for the forbidden `arr[i] = ...`: when the
    // collection argument is a variable, the mutation writes back to the
    // store so the language keeps reference-like update semantics.

    async fn eval_array_set(
        &mut self,
        target: &Expr,
        key_expr: &Expr,
        value_expr: &Expr,
    ) -> Result<Value, RunError> {
        let key = self.eval_expr(key_expr).await?;
        let value = self.eval_expr(value_expr).await?;
        let line = self.current_line;
        match target {
            Expr::Symbol(var) => {
                let mut collection = self.defined_collection("ARRAY_SET", var)?;
                collection_set(&mut collection, &key, value, line)?;
                self.store.set(var.clone(), collection.clone());
                Ok(collection)
            }
            other => {
                let mut collection = self.eval_expr(other).await?;
                collection_set(&mut collection, &key, value, line)?;
                Ok(collection)
            }
        }
    }

    async fn eval_array_push(&mut self, target: &Expr, item: &Expr) -> Result<Value, RunError> {
        let value = self.eval_expr(item).await?;
        let line = self.current_line;
        let push = |collection: &mut Value| -> Result<(), RunError> {
            match collection {
                Value::Array(items) => {
                    items.push(value.clone());
                    Ok(())
                }
                other => Err(RunError::expression(
                    format!("ARRAY_PUSH expects an array, got {}", other.type_name()),
                    line,
                )),
            }
        };
        match target {
            Expr::Symbol(var) => {
                let mut collection = self.defined_collection("ARRAY_PUSH", var)?;
                push(&mut collection)?;
                self.store.set(var.clone(), collection.clone());
                Ok(collection)
            }
            other => {
                let mut collection = self.eval_expr(other).await?;
                push(&mut collection)?;
                Ok(collection)
            }
        }
    }

    async fn eval_array_pop(&mut self, target: &Expr) -> Result<Value, RunError> {
        let line = self.current_line;
        let pop = |collection: &mut Value| -> Result<Value, RunError> {
            match collection {
                Value::Array(items) => Ok(items.pop().unwrap_or(Value::Undefined)),
                other => Err(RunError::expression(
                    format!("ARRAY_POP expects an array, got {}", other.type_name()),
                    line,
                )),
            }
        };
        match target {
            Expr::Symbol(var) => {
                let mut collection = self.defined_collection("ARRAY_POP", var)?;
                let popped = pop(&mut collection)?;
                self.store.set(var.clone(), collection);
                Ok(popped)
            }
            other => {
                let mut collection = self.eval_expr(other).await?;
                pop(&mut collection)
            }
        }
    }

    fn defined_collection(&self, op: &str, var: &str) -> Result<Value, RunError> {
        self.store.get(var).cloned().ok_or_else(|| {
            RunError::expression(
                format!("{}: variable {} is not defined", op, var),
                self.current_line,
            )
        })
    }

    // ========== Operators ==========

    fn apply_unary(&self, op: UnaryOp, value: Value) -> Result<Value, RunError> {
        match op {
            UnaryOp::Minus => Ok(Value::Number(-self.numeric(&value)?)),
            UnaryOp::Plus => Ok(Value::Number(self.numeric(&value)?)),
            UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
        }
    }

    fn apply_binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, RunError> {
        match op {
            BinaryOp::Add => Ok(Value::Number(self.numeric(&lhs)? + self.numeric(&rhs)?)),
            BinaryOp::Subtract => Ok(Value::Number(self.numeric(&lhs)? - self.numeric(&rhs)?)),
            BinaryOp::Multiply => Ok(Value::Number(self.numeric(&lhs)? * self.numeric(&rhs)?)),
            BinaryOp::Divide => {
                let divisor = self.nonzero(&rhs)?;
                Ok(Value::Number(self.numeric(&lhs)? / divisor))
            }
            BinaryOp::IntDivide => {
                let divisor = self.nonzero(&rhs)?;
                Ok(Value::Number((self.numeric(&lhs)? / divisor).trunc()))
            }
            BinaryOp::Remainder => {
                let divisor = self.nonzero(&rhs)?;
                Ok(Value::Number(self.numeric(&lhs)? % divisor))
            }
            BinaryOp::Power => Ok(Value::Number(
                self.numeric(&lhs)?.powf(self.numeric(&rhs)?),
            )),
            BinaryOp::Concat => Ok(Value::String(format!(
                "{}{}",
                lhs.to_display_string(),
                rhs.to_display_string()
            ))),
            BinaryOp::Equal => Ok(Value::Boolean(loose_equal(&lhs, &rhs))),
            BinaryOp::NotEqual => Ok(Value::Boolean(!loose_equal(&lhs, &rhs))),
            BinaryOp::StrictEqual => Ok(Value::Boolean(strict_equal(&lhs, &rhs))),
            BinaryOp::Greater => Ok(Value::Boolean(compare(&lhs, &rhs).is_gt())),
            BinaryOp::Less => Ok(Value::Boolean(compare(&lhs, &rhs).is_lt())),
            BinaryOp::GreaterEqual => Ok(Value::Boolean(compare(&lhs, &rhs).is_ge())),
            BinaryOp::LessEqual => Ok(Value::Boolean(compare(&lhs, &rhs).is_le())),
            BinaryOp::And => Ok(Value::Boolean(lhs.is_truthy() && rhs.is_truthy())),
            BinaryOp::Or => Ok(Value::Boolean(lhs.is_truthy() || rhs.is_truthy())),
        }
    }

    fn numeric(&self, value: &Value) -> Result<f64, RunError> {
        value.as_number().ok_or_else(|| {
            RunError::expression(
                format!(
                    "Non-numeric value in arithmetic: '{}'",
                    value.to_display_string()
                ),
                self.current_line,
            )
        })
    }

    fn nonzero(&self, value: &Value) -> Result<f64, RunError> {
        let n = self.numeric(value)?;
        if n == 0.0 {
            Err(RunError::expression("Division by zero", self.current_line))
        } else {
            Ok(n)
        }
    }
}

/// Non-strict `=`: numeric when both operands are numeric, structural for
/// composite values, otherwise trimmed string comparison.
fn loose_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return a == b;
    }
    match (lhs, rhs) {
        (Value::Array(_) | Value::Object(_) | Value::Opaque(_), _)
        | (_, Value::Array(_) | Value::Object(_) | Value::Opaque(_)) => lhs == rhs,
        _ => lhs.to_display_string().trim() == rhs.to_display_string().trim(),
    }
}

/// Strict `==`: exact character equality for strings, structural equality
/// otherwise.
fn strict_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> std::cmp::Ordering {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
    }
    lhs.to_display_string()
        .trim()
        .cmp(rhs.to_display_string().trim())
}
