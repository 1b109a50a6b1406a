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

//! Constant folding: branch pruning on short-circuiting operators,
//! evaluation folding of fully-constant subtrees and top-level
//! comprehensions, and pruning of `optional.none`/`optional.of` literals
//! out of container literals.

use std::collections::{HashMap, HashSet};

use cel_common::error::Result;
use cel_common::internal_err;
use cel_expr::mutator::{collect_all_ids, IdGenerator};
use cel_expr::{
    Call, CheckedAst, Comprehension, Constant, Expr, ExprId, ExprKind, ListExpr, MapEntry,
    MapExpr, Select, StructEntry, StructExpr,
};

use crate::config::OptimizerConfig;
use crate::evaluator::{EvaluatorAdapter, ProgramFactory};
use crate::rule::{ExprOptimizerRule, RuleOutcome};
use crate::value::Value;

/// Folds constant subtrees of a `CheckedAst`, driven by a caller-supplied
/// evaluator ([`ProgramFactory`]) — the optimizer never evaluates
/// anything itself beyond the structural branch-pruning rules that don't
/// need a real evaluator at all.
pub struct ConstantFoldOptimizer<'a> {
    factory: &'a dyn ProgramFactory,
}

impl<'a> ConstantFoldOptimizer<'a> {
    pub fn new(factory: &'a dyn ProgramFactory) -> Self {
        ConstantFoldOptimizer { factory }
    }
}

impl<'a> ExprOptimizerRule for ConstantFoldOptimizer<'a> {
    fn name(&self) -> &str {
        "constant_fold"
    }

    fn try_optimize(&self, ast: &CheckedAst, config: &OptimizerConfig) -> Result<Option<RuleOutcome>> {
        config.validate()?;

        let mut gen = IdGenerator::seeded_after(&ast.root);
        let mut current = ast.root.clone();
        let mut changed_overall = false;
        let mut converged = false;

        for _ in 0..config.max_fold_iterations {
            let mut changed = false;
            current = fold_tree(
                current,
                config,
                self.factory,
                &HashSet::new(),
                &mut gen,
                &mut changed,
            )?;
            if changed {
                changed_overall = true;
            } else {
                converged = true;
                break;
            }
        }
        if !converged {
            return internal_err!(
                "constant folding did not converge within {} iterations",
                config.max_fold_iterations
            );
        }

        let mut optionals_changed = false;
        current = prune_optionals(current, self.factory, &mut gen, &mut optionals_changed)?;
        changed_overall |= optionals_changed;

        if !changed_overall {
            log::trace!("constant_fold: no foldable subtree found");
            return Ok(None);
        }
        log::debug!("constant_fold: rewrote AST via branch pruning/evaluation/optional pruning");

        let mut live_ids = HashSet::new();
        collect_all_ids(&current, &mut live_ids);

        let mut new_ast = ast.clone();
        new_ast.root = current;
        new_ast.type_map.retain(|id, _| live_ids.contains(id));
        new_ast.reference_map.retain(|id, _| live_ids.contains(id));
        new_ast.source.retain_ids(&live_ids);

        Ok(Some(RuleOutcome::unchanged(new_ast)))
    }
}

fn fold_tree(
    expr: Expr,
    config: &OptimizerConfig,
    factory: &dyn ProgramFactory,
    scope: &HashSet<String>,
    gen: &mut IdGenerator,
    changed: &mut bool,
) -> Result<Expr> {
    let Expr { id, kind } = expr;
    match kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => Ok(Expr::new(id, kind)),
        ExprKind::Select(s) => {
            let operand = fold_tree(*s.operand, config, factory, scope, gen, changed)?;
            let folded = Expr::new(
                id,
                ExprKind::Select(Select {
                    operand: Box::new(operand),
                    field: s.field,
                    test_only: s.test_only,
                }),
            );
            try_fold_select(folded, config, factory, gen, changed)
        }
        ExprKind::Call(c) => {
            let target = match c.target {
                Some(t) => Some(Box::new(fold_tree(*t, config, factory, scope, gen, changed)?)),
                None => None,
            };
            let args = c
                .args
                .into_iter()
                .map(|a| fold_tree(a, config, factory, scope, gen, changed))
                .collect::<Result<Vec<_>>>()?;
            let folded = Expr::new(
                id,
                ExprKind::Call(Call {
                    target,
                    function: c.function,
                    args,
                }),
            );
            try_fold_call(folded, config, factory, scope, gen, changed)
        }
        ExprKind::List(l) => {
            let elements = l
                .elements
                .into_iter()
                .map(|e| fold_tree(e, config, factory, scope, gen, changed))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::new(
                id,
                ExprKind::List(ListExpr {
                    elements,
                    optional_indices: l.optional_indices,
                }),
            ))
        }
        ExprKind::Map(m) => {
            let entries = m
                .entries
                .into_iter()
                .map(|e| {
                    Ok(MapEntry {
                        id: e.id,
                        key: fold_tree(e.key, config, factory, scope, gen, changed)?,
                        value: fold_tree(e.value, config, factory, scope, gen, changed)?,
                        optional_entry: e.optional_entry,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::new(id, ExprKind::Map(MapExpr { entries })))
        }
        ExprKind::Struct(s) => {
            let entries = s
                .entries
                .into_iter()
                .map(|e| {
                    Ok(StructEntry {
                        id: e.id,
                        field: e.field,
                        value: fold_tree(e.value, config, factory, scope, gen, changed)?,
                        optional_entry: e.optional_entry,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::new(
                id,
                ExprKind::Struct(StructExpr {
                    message_name: s.message_name,
                    entries,
                }),
            ))
        }
        ExprKind::Comprehension(c) => {
            let Comprehension {
                iter_var,
                iter_var2,
                accu_var,
                iter_range,
                accu_init,
                loop_condition,
                loop_step,
                result,
            } = *c;
            let iter_range = fold_tree(iter_range, config, factory, scope, gen, changed)?;
            let accu_init = fold_tree(accu_init, config, factory, scope, gen, changed)?;

            let mut inner_scope = scope.clone();
            inner_scope.insert(iter_var.clone());
            if let Some(v2) = &iter_var2 {
                inner_scope.insert(v2.clone());
            }
            inner_scope.insert(accu_var.clone());

            let loop_condition = fold_tree(loop_condition, config, factory, &inner_scope, gen, changed)?;
            let loop_step = fold_tree(loop_step, config, factory, &inner_scope, gen, changed)?;
            let result = fold_tree(result, config, factory, &inner_scope, gen, changed)?;

            let folded = Expr::new(
                id,
                ExprKind::Comprehension(Box::new(Comprehension {
                    iter_var,
                    iter_var2,
                    accu_var,
                    iter_range,
                    accu_init,
                    loop_condition,
                    loop_step,
                    result,
                })),
            );
            try_fold_comprehension(folded, config, factory, scope, gen, changed)
        }
    }
}

fn try_fold_select(
    expr: Expr,
    config: &OptimizerConfig,
    factory: &dyn ProgramFactory,
    gen: &mut IdGenerator,
    changed: &mut bool,
) -> Result<Expr> {
    let Expr { id, kind } = expr;
    let ExprKind::Select(s) = kind else {
        unreachable!("try_fold_select called on a non-Select node");
    };
    if !is_constant_subtree(&s.operand) {
        return Ok(Expr::new(id, ExprKind::Select(s)));
    }

    let node = Expr::new(id, ExprKind::Select(s.clone()));
    let adapter = EvaluatorAdapter::new(factory);
    match adapter.fold_subtree(&node, &HashMap::new()) {
        Ok(value) => match value_to_expr(&value, id, gen) {
            Some(folded) => {
                *changed = true;
                Ok(folded)
            }
            None => Ok(node),
        },
        Err(_) if s.test_only => {
            // `has(x.field)` on a constant operand missing `field`: absence
            // is `false`, not an evaluation failure.
            *changed = true;
            Ok(Expr::constant(id, Constant::Bool(false)))
        }
        Err(_) if config.ignore_foldable_failures => Ok(node),
        Err(e) => Err(e.into_internal()),
    }
}

fn try_fold_call(
    expr: Expr,
    config: &OptimizerConfig,
    factory: &dyn ProgramFactory,
    scope: &HashSet<String>,
    gen: &mut IdGenerator,
    changed: &mut bool,
) -> Result<Expr> {
    let Expr { id, kind } = expr;
    let ExprKind::Call(c) = kind else {
        unreachable!("try_fold_call called on a non-Call node");
    };
    if !config.foldable_functions.contains(&c.function) {
        return Ok(Expr::new(id, ExprKind::Call(c)));
    }

    if let Some(pruned) = try_prune_call(&c, scope, gen) {
        *changed = true;
        return Ok(pruned);
    }

    if !can_fold_call_generic(&c) {
        return Ok(Expr::new(id, ExprKind::Call(c)));
    }

    let node = Expr::new(id, ExprKind::Call(c));
    let adapter = EvaluatorAdapter::new(factory);
    match adapter.fold_subtree(&node, &HashMap::new()) {
        Ok(value) => match value_to_expr(&value, id, gen) {
            Some(folded) => {
                *changed = true;
                Ok(folded)
            }
            None => Ok(node),
        },
        Err(_) if config.ignore_foldable_failures => Ok(node),
        Err(e) => Err(e.into_internal()),
    }
}

/// Folds a whole comprehension via the evaluator once it is not nested
/// inside another comprehension (its bound variables would otherwise be
/// unresolvable against the empty top-level binding `fold_subtree` uses)
/// and references no identifier besides its own `iter_var`/`iter_var2`/
/// `accu_var`.
fn try_fold_comprehension(
    expr: Expr,
    config: &OptimizerConfig,
    factory: &dyn ProgramFactory,
    scope: &HashSet<String>,
    gen: &mut IdGenerator,
    changed: &mut bool,
) -> Result<Expr> {
    let Expr { id, kind } = expr;
    let ExprKind::Comprehension(c) = kind else {
        unreachable!("try_fold_comprehension called on a non-Comprehension node");
    };
    let node = Expr::new(id, ExprKind::Comprehension(c));
    if !scope.is_empty() || !free_idents(&node).is_empty() {
        return Ok(node);
    }

    let adapter = EvaluatorAdapter::new(factory);
    match adapter.fold_subtree(&node, &HashMap::new()) {
        Ok(value) => match value_to_expr(&value, id, gen) {
            Some(folded) => {
                *changed = true;
                Ok(folded)
            }
            None => Ok(node),
        },
        Err(_) if config.ignore_foldable_failures => Ok(node),
        Err(e) => Err(e.into_internal()),
    }
}

/// Free identifiers of `expr`, respecting comprehension-scoped binding of
/// `iter_var`/`iter_var2`/`accu_var` within `loop_condition`/`loop_step`/
/// `result`.
fn free_idents(expr: &Expr) -> HashSet<String> {
    let mut bound = Vec::new();
    let mut out = HashSet::new();
    collect_free(expr, &mut bound, &mut out);
    out
}

fn collect_free(expr: &Expr, bound: &mut Vec<String>, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) => {}
        ExprKind::Ident(name) => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        ExprKind::Select(s) => collect_free(&s.operand, bound, out),
        ExprKind::Call(c) => {
            if let Some(t) = &c.target {
                collect_free(t, bound, out);
            }
            for a in &c.args {
                collect_free(a, bound, out);
            }
        }
        ExprKind::List(l) => {
            for e in &l.elements {
                collect_free(e, bound, out);
            }
        }
        ExprKind::Map(m) => {
            for e in &m.entries {
                collect_free(&e.key, bound, out);
                collect_free(&e.value, bound, out);
            }
        }
        ExprKind::Struct(s) => {
            for e in &s.entries {
                collect_free(&e.value, bound, out);
            }
        }
        ExprKind::Comprehension(c) => {
            collect_free(&c.iter_range, bound, out);
            collect_free(&c.accu_init, bound, out);
            bound.push(c.iter_var.clone());
            if let Some(v2) = &c.iter_var2 {
                bound.push(v2.clone());
            }
            bound.push(c.accu_var.clone());
            collect_free(&c.loop_condition, bound, out);
            collect_free(&c.loop_step, bound, out);
            collect_free(&c.result, bound, out);
            bound.pop();
            if c.iter_var2.is_some() {
                bound.pop();
            }
            bound.pop();
        }
    }
}

/// Rule 1: short-circuit/branch pruning. Purely structural — never calls
/// the evaluator.
fn try_prune_call(c: &Call, scope: &HashSet<String>, gen: &mut IdGenerator) -> Option<Expr> {
    match c.function.as_str() {
        "_&&_" => prune_logical(c, true),
        "_||_" => prune_logical(c, false),
        "_?_:_" if c.args.len() == 3 => {
            let cond = c.args[0].as_bool_constant()?;
            Some(if cond { c.args[1].clone() } else { c.args[2].clone() })
        }
        "_in_" => prune_in(c, scope),
        "_==_" | "_!=_" => prune_bool_equality(c, gen),
        _ => None,
    }
}

fn prune_logical(c: &Call, is_and: bool) -> Option<Expr> {
    if c.args.len() != 2 {
        return None;
    }
    let identity_value = is_and;
    let absorbing_value = !is_and;
    for (i, other) in [(0, 1), (1, 0)] {
        if let Some(b) = c.args[i].as_bool_constant() {
            if b == absorbing_value {
                return Some(Expr::constant(c.args[i].id, Constant::Bool(absorbing_value)));
            }
            if b == identity_value {
                return Some(c.args[other].clone());
            }
        }
    }
    None
}

fn prune_in(c: &Call, scope: &HashSet<String>) -> Option<Expr> {
    if c.args.len() != 2 {
        return None;
    }
    let needle = &c.args[0];
    let haystack = &c.args[1];
    if references_bound_var(needle, scope) || references_bound_var(haystack, scope) {
        return None;
    }
    if let ExprKind::List(l) = &haystack.kind {
        if l.elements.is_empty() {
            return Some(Expr::constant(haystack.id, Constant::Bool(false)));
        }
        if is_constant_subtree(needle) && l.elements.iter().all(is_constant_subtree) {
            let found = l
                .elements
                .iter()
                .any(|e| e.as_constant() == needle.as_constant());
            if found {
                return Some(Expr::constant(haystack.id, Constant::Bool(true)));
            }
            // Not found: absence among the listed constants does not imply
            // the needle is absent in general, so leave unrewritten.
        }
    }
    None
}

fn prune_bool_equality(c: &Call, gen: &mut IdGenerator) -> Option<Expr> {
    if c.args.len() != 2 {
        return None;
    }
    let (bool_val, other) = if let Some(b) = c.args[0].as_bool_constant() {
        (b, &c.args[1])
    } else if let Some(b) = c.args[1].as_bool_constant() {
        (b, &c.args[0])
    } else {
        return None;
    };
    let want_identity = if c.function == "_==_" { bool_val } else { !bool_val };
    if want_identity {
        Some(other.clone())
    } else {
        Some(Expr::call(gen.next_id(), None, "_!_", vec![other.clone()]))
    }
}

fn references_bound_var(expr: &Expr, scope: &HashSet<String>) -> bool {
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) => false,
        ExprKind::Ident(name) => scope.contains(name),
        ExprKind::Select(s) => references_bound_var(&s.operand, scope),
        ExprKind::Call(c) => {
            c.target
                .as_deref()
                .map(|t| references_bound_var(t, scope))
                .unwrap_or(false)
                || c.args.iter().any(|a| references_bound_var(a, scope))
        }
        ExprKind::List(l) => l.elements.iter().any(|e| references_bound_var(e, scope)),
        ExprKind::Map(m) => m
            .entries
            .iter()
            .any(|e| references_bound_var(&e.key, scope) || references_bound_var(&e.value, scope)),
        ExprKind::Struct(s) => s.entries.iter().any(|e| references_bound_var(&e.value, scope)),
        ExprKind::Comprehension(c) => {
            references_bound_var(&c.iter_range, scope)
                || references_bound_var(&c.accu_init, scope)
                || references_bound_var(&c.loop_condition, scope)
                || references_bound_var(&c.loop_step, scope)
                || references_bound_var(&c.result, scope)
        }
    }
}

/// True for a `Constant`, or a `List`/`Map` literal built entirely of
/// (recursively) constant, non-optional elements/entries.
fn is_constant_subtree(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Constant(_) => true,
        ExprKind::List(l) => l.elements.iter().all(is_constant_subtree),
        ExprKind::Map(m) => m
            .entries
            .iter()
            .all(|e| !e.optional_entry && is_constant_subtree(&e.key) && is_constant_subtree(&e.value)),
        _ => false,
    }
}

/// Rule 2's eligibility check once branch pruning (rule 1) has already
/// had its chance: every argument (and target, if any) is constant, and
/// the function isn't one of the optional-producing builtins, whose
/// result (`Value::Optional`) has no `Constant` representation — those
/// are left for the container-pruning pass instead.
fn can_fold_call_generic(c: &Call) -> bool {
    if matches!(
        c.function.as_str(),
        "optional.of" | "optional.none" | "optional.ofNonZeroValue"
    ) {
        return false;
    }
    c.target.as_deref().map(is_constant_subtree).unwrap_or(true) && c.args.iter().all(is_constant_subtree)
}

/// Converts an evaluator result back into an `Expr`, or `None` if the
/// value has no `Constant`/literal representation (`Optional`, `Unknown`).
fn value_to_expr(value: &Value, id: ExprId, gen: &mut IdGenerator) -> Option<Expr> {
    match value {
        Value::Null => Some(Expr::constant(id, Constant::Null)),
        Value::Bool(b) => Some(Expr::constant(id, Constant::Bool(*b))),
        Value::Int(i) => Some(Expr::constant(id, Constant::Int(*i))),
        Value::Uint(u) => Some(Expr::constant(id, Constant::Uint(*u))),
        Value::Double(d) => Some(Expr::constant(id, Constant::Double(*d))),
        Value::Str(s) => Some(Expr::constant(id, Constant::String(s.clone()))),
        Value::Bytes(b) => Some(Expr::constant(id, Constant::Bytes(b.clone()))),
        Value::List(items) => {
            let elements = items
                .iter()
                .map(|v| value_to_expr(v, gen.next_id(), gen))
                .collect::<Option<Vec<_>>>()?;
            Some(Expr::new(
                id,
                ExprKind::List(ListExpr {
                    elements,
                    optional_indices: Vec::new(),
                }),
            ))
        }
        Value::Map(entries) => {
            let entries = entries
                .iter()
                .map(|(k, v)| {
                    let key = value_to_expr(k, gen.next_id(), gen)?;
                    let value = value_to_expr(v, gen.next_id(), gen)?;
                    Some(MapEntry {
                        id: gen.next_id(),
                        key,
                        value,
                        optional_entry: false,
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            Some(Expr::new(id, ExprKind::Map(MapExpr { entries })))
        }
        Value::Optional(_) | Value::Unknown => None,
    }
}

/// What a constant-argumented `optional.*` builtin call resolves to, for
/// the purpose of pruning it out of a container literal.
enum OptionalOutcome {
    Drop,
    Unwrap(Expr),
}

/// Evaluates `expr` if it's a constant-argumented call to `optional.of`,
/// `optional.none`, or `optional.ofNonZeroValue` — `ofNonZeroValue`'s
/// none-vs-some outcome depends on the argument's runtime value, so it
/// genuinely needs the evaluator, not just pattern matching.
fn try_resolve_optional_call(
    expr: &Expr,
    factory: &dyn ProgramFactory,
    gen: &mut IdGenerator,
) -> Result<Option<OptionalOutcome>> {
    let ExprKind::Call(c) = &expr.kind else {
        return Ok(None);
    };
    if c.target.is_some()
        || !matches!(
            c.function.as_str(),
            "optional.of" | "optional.none" | "optional.ofNonZeroValue"
        )
        || !c.args.iter().all(is_constant_subtree)
    {
        return Ok(None);
    }
    let adapter = EvaluatorAdapter::new(factory);
    match adapter.fold_subtree(expr, &HashMap::new())? {
        Value::Optional(None) => Ok(Some(OptionalOutcome::Drop)),
        Value::Optional(Some(inner)) => {
            let e = value_to_expr(&inner, gen.next_id(), gen).ok_or_else(|| {
                cel_common::error::Error::internal(
                    "optional value has no literal representation",
                )
            })?;
            Ok(Some(OptionalOutcome::Unwrap(e)))
        }
        _ => Ok(None),
    }
}

/// Rule 4: prune `optional.none()`/zero-valued `optional.ofNonZeroValue`
/// out of, and unwrap constant non-empty optionals within,
/// `LIST`/`MAP`/`STRUCT` literals.
fn prune_optionals(
    expr: Expr,
    factory: &dyn ProgramFactory,
    gen: &mut IdGenerator,
    changed: &mut bool,
) -> Result<Expr> {
    let Expr { id, kind } = expr;
    let kind = match kind {
        ExprKind::List(l) => {
            let mut elements = Vec::with_capacity(l.elements.len());
            let mut optional_indices = Vec::new();
            for (i, e) in l.elements.into_iter().enumerate() {
                let e = prune_optionals(e, factory, gen, changed)?;
                if l.optional_indices.contains(&(i as i32)) {
                    match try_resolve_optional_call(&e, factory, gen)? {
                        Some(OptionalOutcome::Drop) => {
                            *changed = true;
                            continue;
                        }
                        Some(OptionalOutcome::Unwrap(inner)) => {
                            *changed = true;
                            elements.push(inner);
                            continue;
                        }
                        None => optional_indices.push(elements.len() as i32),
                    }
                }
                elements.push(e);
            }
            ExprKind::List(ListExpr {
                elements,
                optional_indices,
            })
        }
        ExprKind::Map(m) => {
            let mut entries = Vec::with_capacity(m.entries.len());
            for e in m.entries {
                let key = prune_optionals(e.key, factory, gen, changed)?;
                let value = prune_optionals(e.value, factory, gen, changed)?;
                if e.optional_entry {
                    match try_resolve_optional_call(&value, factory, gen)? {
                        Some(OptionalOutcome::Drop) => {
                            *changed = true;
                            continue;
                        }
                        Some(OptionalOutcome::Unwrap(inner)) => {
                            *changed = true;
                            entries.push(MapEntry {
                                id: e.id,
                                key,
                                value: inner,
                                optional_entry: false,
                            });
                            continue;
                        }
                        None => {}
                    }
                }
                entries.push(MapEntry {
                    id: e.id,
                    key,
                    value,
                    optional_entry: e.optional_entry,
                });
            }
            ExprKind::Map(MapExpr { entries })
        }
        ExprKind::Struct(s) => {
            let mut entries = Vec::with_capacity(s.entries.len());
            for e in s.entries {
                let value = prune_optionals(e.value, factory, gen, changed)?;
                if e.optional_entry {
                    match try_resolve_optional_call(&value, factory, gen)? {
                        Some(OptionalOutcome::Drop) => {
                            *changed = true;
                            continue;
                        }
                        Some(OptionalOutcome::Unwrap(inner)) => {
                            *changed = true;
                            entries.push(StructEntry {
                                id: e.id,
                                field: e.field,
                                value: inner,
                                optional_entry: false,
                            });
                            continue;
                        }
                        None => {}
                    }
                }
                entries.push(StructEntry {
                    id: e.id,
                    field: e.field,
                    value,
                    optional_entry: e.optional_entry,
                });
            }
            ExprKind::Struct(StructExpr {
                message_name: s.message_name,
                entries,
            })
        }
        ExprKind::Select(s) => ExprKind::Select(Select {
            operand: Box::new(prune_optionals(*s.operand, factory, gen, changed)?),
            field: s.field,
            test_only: s.test_only,
        }),
        ExprKind::Call(c) => ExprKind::Call(Call {
            target: match c.target {
                Some(t) => Some(Box::new(prune_optionals(*t, factory, gen, changed)?)),
                None => None,
            },
            function: c.function,
            args: c
                .args
                .into_iter()
                .map(|a| prune_optionals(a, factory, gen, changed))
                .collect::<Result<Vec<_>>>()?,
        }),
        ExprKind::Comprehension(c) => ExprKind::Comprehension(Box::new(Comprehension {
            iter_var: c.iter_var,
            iter_var2: c.iter_var2,
            accu_var: c.accu_var,
            iter_range: prune_optionals(c.iter_range, factory, gen, changed)?,
            accu_init: prune_optionals(c.accu_init, factory, gen, changed)?,
            loop_condition: prune_optionals(c.loop_condition, factory, gen, changed)?,
            loop_step: prune_optionals(c.loop_step, factory, gen, changed)?,
            result: prune_optionals(c.result, factory, gen, changed)?,
        })),
        other @ (ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_)) => other,
    };
    Ok(Expr::new(id, kind))
}
