// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The evaluator adapter and the `createProgram`/`Program.eval`
//! collaborator it's built on. The real CEL evaluator is an external,
//! opaque collaborator; [`ReferenceEvaluator`] is a minimal,
//! side-effect-free tree-walking implementation of just enough of CEL's
//! operator and comprehension semantics to fold the constant subtrees the
//! optimizer hands it — not a general-purpose CEL runtime.

use std::collections::HashMap;

use cel_common::eval_err;
use cel_common::error::Result;
use cel_expr::source::Source;
use cel_expr::{Call, CheckedAst, Comprehension, Expr, ExprKind, Select};

use crate::value::Value;

/// Compiles a checked AST down to a runnable [`Program`].
pub trait ProgramFactory {
    fn create_program(&self, ast: &CheckedAst) -> Result<Box<dyn Program>>;
}

/// A compiled program: evaluates against a variable binding, producing a
/// value or an error.
pub trait Program {
    fn eval(&self, binding: &HashMap<String, Value>) -> Result<Value>;
}

/// The evaluator adapter: wraps a [`ProgramFactory`] to fold one subtree
/// at a time by building a throwaway single-node `CheckedAst` around it.
pub struct EvaluatorAdapter<'a> {
    factory: &'a dyn ProgramFactory,
}

impl<'a> EvaluatorAdapter<'a> {
    pub fn new(factory: &'a dyn ProgramFactory) -> Self {
        EvaluatorAdapter { factory }
    }

    /// Side-effect free by construction: `binding` is the only state the
    /// program may read.
    pub fn fold_subtree(&self, expr: &Expr, binding: &HashMap<String, Value>) -> Result<Value> {
        let ast = CheckedAst::new(expr.clone(), Source::default());
        let program = self.factory.create_program(&ast)?;
        program.eval(binding)
    }
}

/// A minimal reference implementation of the evaluator collaborator:
/// a direct tree-walking interpreter over CEL's standard operators,
/// string/list/map built-ins, and comprehension semantics. Sufficient to
/// fold the constant subtrees the optimizer passes identify as
/// foldable; not a substitute for a production CEL runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceEvaluator;

impl ProgramFactory for ReferenceEvaluator {
    fn create_program(&self, ast: &CheckedAst) -> Result<Box<dyn Program>> {
        Ok(Box::new(ReferenceProgram {
            root: ast.root.clone(),
        }))
    }
}

struct ReferenceProgram {
    root: Expr,
}

impl Program for ReferenceProgram {
    fn eval(&self, binding: &HashMap<String, Value>) -> Result<Value> {
        eval(&self.root, binding)
    }
}

fn eval(expr: &Expr, binding: &HashMap<String, Value>) -> Result<Value> {
    match &expr.kind {
        ExprKind::NotSet => eval_err!("cannot evaluate a NOT_SET node"),
        ExprKind::Constant(c) => Ok(Value::from_constant(c)),
        ExprKind::Ident(name) => Ok(binding.get(name).cloned().unwrap_or(Value::Unknown)),
        ExprKind::Select(s) => eval_select(s, binding),
        ExprKind::Call(c) => eval_call(c, binding),
        ExprKind::List(l) => {
            let mut items = Vec::with_capacity(l.elements.len());
            for e in &l.elements {
                let v = eval(e, binding)?;
                if matches!(v, Value::Unknown) {
                    return Ok(Value::Unknown);
                }
                items.push(v);
            }
            Ok(Value::List(items))
        }
        ExprKind::Map(m) => {
            let mut entries = Vec::with_capacity(m.entries.len());
            for e in &m.entries {
                let k = eval(&e.key, binding)?;
                let v = eval(&e.value, binding)?;
                if matches!(k, Value::Unknown) || matches!(v, Value::Unknown) {
                    return Ok(Value::Unknown);
                }
                entries.push((k, v));
            }
            Ok(Value::Map(entries))
        }
        ExprKind::Struct(s) => {
            let mut entries = Vec::with_capacity(s.entries.len());
            for e in &s.entries {
                let v = eval(&e.value, binding)?;
                if matches!(v, Value::Unknown) {
                    return Ok(Value::Unknown);
                }
                entries.push((Value::Str(e.field.clone()), v));
            }
            Ok(Value::Map(entries))
        }
        ExprKind::Comprehension(c) => eval_comprehension(c, binding),
    }
}

fn eval_select(s: &Select, binding: &HashMap<String, Value>) -> Result<Value> {
    let operand = eval(&s.operand, binding)?;
    if matches!(operand, Value::Unknown) {
        return Ok(Value::Unknown);
    }
    let Value::Map(entries) = &operand else {
        return eval_err!("select requires a map/struct-shaped operand");
    };
    let found = entries
        .iter()
        .find(|(k, _)| matches!(k, Value::Str(f) if f == &s.field));
    if s.test_only {
        Ok(Value::Bool(found.is_some()))
    } else {
        match found {
            Some((_, v)) => Ok(v.clone()),
            None => eval_err!("no such field `{}`", s.field),
        }
    }
}

fn eval_call(c: &Call, binding: &HashMap<String, Value>) -> Result<Value> {
    let mut args = Vec::with_capacity(c.args.len() + 1);
    if let Some(t) = &c.target {
        args.push(eval(t, binding)?);
    }
    for a in &c.args {
        args.push(eval(a, binding)?);
    }
    if args.iter().any(|v| matches!(v, Value::Unknown)) {
        return Ok(Value::Unknown);
    }

    match c.function.as_str() {
        "_+_" | "_-_" | "_*_" | "_/_" | "_%_" => arith(&c.function, &args[0], &args[1]),
        "_<_" | "_<=_" | "_>_" | "_>=_" => compare(&c.function, &args[0], &args[1]),
        "_==_" => Ok(Value::Bool(args[0] == args[1])),
        "_!=_" => Ok(Value::Bool(args[0] != args[1])),
        "_!_" => match args[0].as_bool() {
            Some(b) => Ok(Value::Bool(!b)),
            None => eval_err!("`!` requires a bool operand"),
        },
        "-_" => match &args[0] {
            Value::Int(x) => Ok(Value::Int(-x)),
            Value::Double(x) => Ok(Value::Double(-x)),
            _ => eval_err!("unary `-` requires a numeric operand"),
        },
        "_in_" => match &args[1] {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|v| *v == args[0]))),
            Value::Map(entries) => Ok(Value::Bool(entries.iter().any(|(k, _)| *k == args[0]))),
            _ => eval_err!("`in` requires a list or map"),
        },
        "size" => match &args[0] {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Bytes(b) => Ok(Value::Int(b.len() as i64)),
            Value::List(l) => Ok(Value::Int(l.len() as i64)),
            Value::Map(m) => Ok(Value::Int(m.len() as i64)),
            _ => eval_err!("`size` requires a string, bytes, list, or map"),
        },
        "startsWith" => match (&args[0], &args[1]) {
            (Value::Str(s), Value::Str(p)) => Ok(Value::Bool(s.starts_with(p.as_str()))),
            _ => eval_err!("`startsWith` requires two strings"),
        },
        "endsWith" => match (&args[0], &args[1]) {
            (Value::Str(s), Value::Str(p)) => Ok(Value::Bool(s.ends_with(p.as_str()))),
            _ => eval_err!("`endsWith` requires two strings"),
        },
        "contains" => match (&args[0], &args[1]) {
            (Value::Str(s), Value::Str(p)) => Ok(Value::Bool(s.contains(p.as_str()))),
            _ => eval_err!("`contains` requires two strings"),
        },
        "_[_]" => match (&args[0], &args[1]) {
            (Value::List(l), Value::Int(i)) => l
                .get(*i as usize)
                .cloned()
                .map(Ok)
                .unwrap_or_else(|| eval_err!("index {i} out of range")),
            (Value::Map(m), key) => m
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| Ok(v.clone()))
                .unwrap_or_else(|| eval_err!("no such key")),
            _ => eval_err!("unsupported operands for indexing"),
        },
        "optional.of" => Ok(Value::Optional(Some(Box::new(args[0].clone())))),
        "optional.none" => Ok(Value::Optional(None)),
        "optional.ofNonZeroValue" => Ok(Value::Optional(if args[0].is_zero() {
            None
        } else {
            Some(Box::new(args[0].clone()))
        })),
        other => eval_err!("unsupported function `{other}` in the reference evaluator"),
    }
}

fn arith(op: &str, a: &Value, b: &Value) -> Result<Value> {
    use cel_common::error::Error;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let r = match op {
                "_+_" => x.checked_add(*y),
                "_-_" => x.checked_sub(*y),
                "_*_" => x.checked_mul(*y),
                "_/_" if *y == 0 => return eval_err!("division by zero"),
                "_/_" => x.checked_div(*y),
                "_%_" if *y == 0 => return eval_err!("modulus by zero"),
                "_%_" => x.checked_rem(*y),
                _ => unreachable!(),
            };
            r.map(Value::Int).ok_or_else(|| Error::evaluation("integer overflow"))
        }
        (Value::Uint(x), Value::Uint(y)) => {
            let r = match op {
                "_+_" => x.checked_add(*y),
                "_-_" => x.checked_sub(*y),
                "_*_" => x.checked_mul(*y),
                "_/_" if *y == 0 => return eval_err!("division by zero"),
                "_/_" => x.checked_div(*y),
                "_%_" if *y == 0 => return eval_err!("modulus by zero"),
                "_%_" => x.checked_rem(*y),
                _ => unreachable!(),
            };
            r.map(Value::Uint).ok_or_else(|| Error::evaluation("integer overflow"))
        }
        (Value::Double(x), Value::Double(y)) => Ok(Value::Double(match op {
            "_+_" => x + y,
            "_-_" => x - y,
            "_*_" => x * y,
            "_/_" => x / y,
            "_%_" => x % y,
            _ => unreachable!(),
        })),
        (Value::Str(x), Value::Str(y)) if op == "_+_" => Ok(Value::Str(format!("{x}{y}"))),
        (Value::Bytes(x), Value::Bytes(y)) if op == "_+_" => {
            let mut v = x.clone();
            v.extend_from_slice(y);
            Ok(Value::Bytes(v))
        }
        (Value::List(x), Value::List(y)) if op == "_+_" => {
            let mut v = x.clone();
            v.extend(y.clone());
            Ok(Value::List(v))
        }
        _ => eval_err!("unsupported operand types for `{op}`"),
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> Result<Value> {
    use cel_common::error::Error;
    use std::cmp::Ordering;
    let ord: Ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Uint(x), Value::Uint(y)) => x.cmp(y),
        (Value::Double(x), Value::Double(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| Error::evaluation("NaN is not ordered"))?,
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => return eval_err!("unsupported operand types for `{op}`"),
    };
    Ok(Value::Bool(match op {
        "_<_" => ord.is_lt(),
        "_<=_" => ord.is_le(),
        "_>_" => ord.is_gt(),
        "_>=_" => ord.is_ge(),
        _ => unreachable!(),
    }))
}

fn eval_comprehension(c: &Comprehension, binding: &HashMap<String, Value>) -> Result<Value> {
    let range = eval(&c.iter_range, binding)?;
    let items: Vec<(Value, Option<Value>)> = match range {
        Value::List(items) => items.into_iter().map(|v| (v, None)).collect(),
        Value::Map(entries) => entries.into_iter().map(|(k, v)| (k, Some(v))).collect(),
        Value::Unknown => return Ok(Value::Unknown),
        _ => return eval_err!("comprehension range must be a list or map"),
    };

    let mut scope = binding.clone();
    scope.insert(c.accu_var.clone(), eval(&c.accu_init, binding)?);

    for (k, v2) in items {
        scope.insert(c.iter_var.clone(), k);
        if let Some(name2) = &c.iter_var2 {
            if let Some(v2) = v2 {
                scope.insert(name2.clone(), v2);
            }
        }
        match eval(&c.loop_condition, &scope)?.as_bool() {
            Some(true) => {}
            Some(false) => break,
            None => return Ok(Value::Unknown),
        }
        let next_accu = eval(&c.loop_step, &scope)?;
        scope.insert(c.accu_var.clone(), next_accu);
    }

    eval(&c.result, &scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel_expr::{Constant, Expr};

    fn run(expr: &Expr) -> Result<Value> {
        eval(expr, &HashMap::new())
    }

    #[test]
    fn folds_integer_addition() {
        let expr = Expr::call(
            1,
            None,
            "_+_",
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::Int(1)),
            ],
        );
        assert_eq!(run(&expr).unwrap(), Value::Int(2));
    }

    #[test]
    fn division_by_zero_is_evaluation_failure() {
        let expr = Expr::call(
            1,
            None,
            "_/_",
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::Int(0)),
            ],
        );
        assert_eq!(run(&expr).unwrap_err().kind(), "EVALUATION_FAILURE");
    }

    #[test]
    fn unbound_ident_is_unknown() {
        assert_eq!(run(&Expr::ident(1, "x")).unwrap(), Value::Unknown);
    }

    #[test]
    fn optional_of_non_zero_value_respects_zero() {
        let of_zero = Expr::call(
            1,
            None,
            "optional.ofNonZeroValue",
            vec![Expr::constant(2, Constant::Int(0))],
        );
        assert_eq!(run(&of_zero).unwrap(), Value::Optional(None));

        let of_five = Expr::call(
            1,
            None,
            "optional.ofNonZeroValue",
            vec![Expr::constant(2, Constant::Int(5))],
        );
        assert_eq!(
            run(&of_five).unwrap(),
            Value::Optional(Some(Box::new(Value::Int(5))))
        );
    }

    #[test]
    fn comprehension_sums_a_list() {
        // [1,2,3].fold(i, 0, true, acc + i, acc)
        let comp = Expr::comprehension(
            1,
            Comprehension {
                iter_var: "i".into(),
                iter_var2: None,
                accu_var: "acc".into(),
                iter_range: Expr::list(
                    2,
                    vec![
                        Expr::constant(3, Constant::Int(1)),
                        Expr::constant(4, Constant::Int(2)),
                        Expr::constant(5, Constant::Int(3)),
                    ],
                    vec![],
                ),
                accu_init: Expr::constant(6, Constant::Int(0)),
                loop_condition: Expr::constant(7, Constant::Bool(true)),
                loop_step: Expr::call(
                    8,
                    None,
                    "_+_",
                    vec![Expr::ident(9, "acc"), Expr::ident(10, "i")],
                ),
                result: Expr::ident(11, "acc"),
            },
        );
        assert_eq!(run(&comp).unwrap(), Value::Int(6));
    }
}
