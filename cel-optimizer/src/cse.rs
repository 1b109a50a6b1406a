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

//! Common-subexpression elimination: mangle comprehension variable names,
//! repeatedly find the first pair of semantically-equal
//! eliminable nodes and extract the whole equal set behind a fresh
//! `@index<K>`/`@r<K>` identifier, then emit either a flat `cel.@block` or
//! nested `cel.bind` macros depending on [`OptimizerConfig::enable_cel_block`].
//!
//! A node is never extracted if doing so would let it escape the scope of
//! a comprehension whose mangled `iter_var`/`iter_var2`/`accu_var` it
//! references — see the scope-safety note in `DESIGN.md`. This is a
//! conservative reading of the "still-enclosing comprehension" rule: it
//! never hoists a subexpression above the comprehension that binds a name
//! it depends on, even when CEL's lazy block evaluation would technically
//! permit it.

use std::collections::{HashMap, HashSet};

use cel_common::error::Result;
use cel_common::internal_err;
use cel_expr::mutator::{
    clear_expr_ids, collect_all_ids, mangle_comprehension_identifier_names,
    renumber_ids_consecutively, replace_subtree_with_new_bind_macro, wrap_ast_with_new_cel_block,
    IdGenerator, MangledVarInfo,
};
use cel_expr::{
    Call, CheckedAst, Comprehension, Expr, ExprId, ExprKind, ListExpr, MapEntry, MapExpr, Select,
    StructEntry, StructExpr,
};

use crate::config::OptimizerConfig;
use crate::rule::{ExprOptimizerRule, RuleOutcome};
use crate::type_checker::{Env, TypeChecker};

/// Common-subexpression elimination, driven by a caller-supplied
/// [`TypeChecker`] used only in the finishing phase to type each extracted
/// `@index<K>` subexpression in the environment built up so far.
pub struct SubexpressionOptimizer<'a> {
    type_checker: &'a dyn TypeChecker,
}

impl<'a> SubexpressionOptimizer<'a> {
    pub fn new(type_checker: &'a dyn TypeChecker) -> Self {
        SubexpressionOptimizer { type_checker }
    }
}

impl<'a> ExprOptimizerRule for SubexpressionOptimizer<'a> {
    fn name(&self) -> &str {
        "subexpression_elimination"
    }

    fn try_optimize(
        &self,
        ast: &CheckedAst,
        config: &OptimizerConfig,
    ) -> Result<Option<RuleOutcome>> {
        config.validate()?;

        let (mangled_ast, mangled_info) = mangle_comprehension_identifier_names(
            ast,
            &config.iter_var_prefix,
            &config.iter_var2_prefix,
            &config.accu_var_prefix,
        )?;
        let mangled_var_names = mangled_var_names(&mangled_info);

        let prefix = if config.enable_cel_block { "@index" } else { "@r" };

        let mut current = mangled_ast.root.clone();
        let mut gen = IdGenerator::seeded_after(&current);
        let mut subexpressions: Vec<Expr> = Vec::new();
        let mut converged = false;

        for _ in 0..config.max_cse_iterations {
            let mut nodes = Vec::new();
            collect_eligible(&current, Ctx::root(), config, &mut nodes);

            let restricted: Vec<(ExprId, Expr)> = match config.max_recursion_depth {
                Some(depth) => nodes
                    .iter()
                    .filter(|(_, e)| height(e) <= depth)
                    .cloned()
                    .collect(),
                None => nodes.clone(),
            };

            let chosen = find_first_duplicate(&restricted).or_else(|| {
                config.max_recursion_depth.and_then(|depth| {
                    nodes
                        .iter()
                        .filter(|(_, e)| height(e) > depth)
                        .max_by_key(|(_, e)| height(e))
                        .map(|(id, e)| vec![(*id, e.clone())])
                })
            });

            let Some(candidate_set) = chosen else {
                converged = true;
                break;
            };

            let idx = subexpressions.len();
            let canonical = candidate_set[0].1.clone();
            subexpressions.push(canonical);
            let ident_name = format!("{prefix}{idx}");
            let member_ids: HashSet<ExprId> = candidate_set.iter().map(|(id, _)| *id).collect();
            current = replace_members(current, &member_ids, &ident_name, &mut gen);
        }

        if !converged {
            return internal_err!(
                "subexpression elimination did not converge within {} iterations",
                config.max_cse_iterations
            );
        }

        if subexpressions.is_empty() {
            log::trace!("subexpression_elimination: no duplicate subexpressions found");
            return Ok(None);
        }
        log::debug!(
            "subexpression_elimination: extracted {} common subexpression(s)",
            subexpressions.len()
        );

        verify_no_dangling_mangled_vars(&subexpressions, &mangled_var_names)?;

        let mut scoped_ast = mangled_ast;
        scoped_ast.root = current.clone();

        let outcome = if config.enable_cel_block {
            verify_index_references(&subexpressions, &current, "@index")?;

            let mut indexed_env: Env = HashMap::new();
            let mut added_variable_decls = Vec::new();
            for (k, sub) in subexpressions.iter().enumerate() {
                let ty = self.type_checker.check(sub, &scoped_ast, &indexed_env)?;
                let name = format!("@index{k}");
                indexed_env.insert(name.clone(), ty.clone());
                added_variable_decls.push((name, ty));
            }

            let mut block_ast = wrap_ast_with_new_cel_block("cel.@block", &scoped_ast, subexpressions)?;
            block_ast.source.add_extension_once(cel_expr::Extension::cel_block());
            block_ast = renumber_ids_consecutively(&block_ast)?;

            if !matches!(&block_ast.root.kind, ExprKind::Call(c) if c.function == "cel.@block") {
                return internal_err!(
                    "subexpression elimination post-condition violated: root is not cel.@block"
                );
            }

            retain_live(&mut block_ast);

            RuleOutcome {
                ast: block_ast,
                added_variable_decls,
                added_function_decls: Vec::new(),
            }
        } else {
            let mut wrapped_ast = scoped_ast;
            for k in (0..subexpressions.len()).rev() {
                let root_id = wrapped_ast.root.id;
                let value_expr = subexpressions[k].clone();
                let scope_expr = wrapped_ast.root.clone();
                wrapped_ast = replace_subtree_with_new_bind_macro(
                    &wrapped_ast,
                    &format!("@r{k}"),
                    value_expr,
                    scope_expr,
                    root_id,
                )?;
            }
            wrapped_ast = renumber_ids_consecutively(&wrapped_ast)?;
            retain_live(&mut wrapped_ast);

            RuleOutcome::unchanged(wrapped_ast)
        };

        Ok(Some(outcome))
    }
}

fn retain_live(ast: &mut CheckedAst) {
    let mut live_ids = HashSet::new();
    collect_all_ids(&ast.root, &mut live_ids);
    ast.type_map.retain(|id, _| live_ids.contains(id));
    ast.reference_map.retain(|id, _| live_ids.contains(id));
    ast.source.retain_ids(&live_ids);
}

fn mangled_var_names(info: &HashMap<ExprId, MangledVarInfo>) -> HashSet<String> {
    let mut out = HashSet::new();
    for v in info.values() {
        out.insert(v.iter_var.clone());
        if let Some(v2) = &v.iter_var2 {
            out.insert(v2.clone());
        }
        out.insert(v.accu_var.clone());
    }
    out
}

/// Traversal context threaded top-down while enumerating eliminable nodes:
/// whether the current position is inside some ancestor comprehension's
/// `accu_init`/`loop_condition` (a forbidden zone extraction must never
/// reach into), and the union of mangled variable names bound by all
/// ancestor comprehensions.
struct Ctx {
    forbidden: bool,
    ancestor_vars: HashSet<String>,
}

impl Ctx {
    fn root() -> Self {
        Ctx {
            forbidden: false,
            ancestor_vars: HashSet::new(),
        }
    }

    fn child(&self, forbidden: bool) -> Self {
        Ctx {
            forbidden,
            ancestor_vars: self.ancestor_vars.clone(),
        }
    }
}

fn collect_eligible(expr: &Expr, ctx: Ctx, config: &OptimizerConfig, out: &mut Vec<(ExprId, Expr)>) {
    if node_is_eligible(expr, &ctx, config) {
        out.push((expr.id, expr.clone()));
    }
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => {}
        ExprKind::Select(s) => collect_eligible(&s.operand, ctx.child(ctx.forbidden), config, out),
        ExprKind::Call(c) => {
            if let Some(t) = &c.target {
                collect_eligible(t, ctx.child(ctx.forbidden), config, out);
            }
            for a in &c.args {
                collect_eligible(a, ctx.child(ctx.forbidden), config, out);
            }
        }
        ExprKind::List(l) => {
            for e in &l.elements {
                collect_eligible(e, ctx.child(ctx.forbidden), config, out);
            }
        }
        ExprKind::Map(m) => {
            for e in &m.entries {
                collect_eligible(&e.key, ctx.child(ctx.forbidden), config, out);
                collect_eligible(&e.value, ctx.child(ctx.forbidden), config, out);
            }
        }
        ExprKind::Struct(s) => {
            for e in &s.entries {
                collect_eligible(&e.value, ctx.child(ctx.forbidden), config, out);
            }
        }
        ExprKind::Comprehension(c) => {
            collect_eligible(&c.iter_range, ctx.child(ctx.forbidden), config, out);
            collect_eligible(&c.accu_init, ctx.child(true), config, out);

            let mut new_vars = ctx.ancestor_vars.clone();
            new_vars.insert(c.iter_var.clone());
            if let Some(v2) = &c.iter_var2 {
                new_vars.insert(v2.clone());
            }
            new_vars.insert(c.accu_var.clone());

            collect_eligible(
                &c.loop_condition,
                Ctx {
                    forbidden: true,
                    ancestor_vars: new_vars.clone(),
                },
                config,
                out,
            );
            collect_eligible(
                &c.loop_step,
                Ctx {
                    forbidden: ctx.forbidden,
                    ancestor_vars: new_vars.clone(),
                },
                config,
                out,
            );
            collect_eligible(
                &c.result,
                Ctx {
                    forbidden: ctx.forbidden,
                    ancestor_vars: new_vars,
                },
                config,
                out,
            );
        }
    }
}

fn node_is_eligible(expr: &Expr, ctx: &Ctx, config: &OptimizerConfig) -> bool {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Ident(_) | ExprKind::NotSet => return false,
        ExprKind::Select(s) if s.test_only => return false,
        ExprKind::List(l) if l.elements.is_empty() => return false,
        _ => {}
    }
    if ctx.forbidden {
        return false;
    }
    if !all_functions_eliminable(expr, &config.eliminable_functions) {
        return false;
    }
    let free = free_idents(expr);
    if !free.is_disjoint(&ctx.ancestor_vars) {
        return false;
    }
    true
}

fn all_functions_eliminable(expr: &Expr, set: &HashSet<String>) -> bool {
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => true,
        ExprKind::Select(s) => all_functions_eliminable(&s.operand, set),
        ExprKind::Call(c) => {
            set.contains(&c.function)
                && c.target
                    .as_deref()
                    .map(|t| all_functions_eliminable(t, set))
                    .unwrap_or(true)
                && c.args.iter().all(|a| all_functions_eliminable(a, set))
        }
        ExprKind::List(l) => l.elements.iter().all(|e| all_functions_eliminable(e, set)),
        ExprKind::Map(m) => m
            .entries
            .iter()
            .all(|e| all_functions_eliminable(&e.key, set) && all_functions_eliminable(&e.value, set)),
        ExprKind::Struct(s) => s.entries.iter().all(|e| all_functions_eliminable(&e.value, set)),
        ExprKind::Comprehension(c) => {
            all_functions_eliminable(&c.iter_range, set)
                && all_functions_eliminable(&c.accu_init, set)
                && all_functions_eliminable(&c.loop_condition, set)
                && all_functions_eliminable(&c.loop_step, set)
                && all_functions_eliminable(&c.result, set)
        }
    }
}

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

/// The equivalence normalization for semantic equality `≡`: clear every
/// id and force every `SELECT.test_only` to `false`, so `has(x.y)` and
/// `x.y` compare equal.
fn canonical_key(expr: &Expr) -> Expr {
    clear_expr_ids(collapse_test_only(expr.clone()))
}

fn collapse_test_only(expr: Expr) -> Expr {
    let Expr { id, kind } = expr;
    let kind = match kind {
        ExprKind::Select(s) => ExprKind::Select(Select {
            operand: Box::new(collapse_test_only(*s.operand)),
            field: s.field,
            test_only: false,
        }),
        ExprKind::Call(c) => ExprKind::Call(Call {
            target: c.target.map(|t| Box::new(collapse_test_only(*t))),
            function: c.function,
            args: c.args.into_iter().map(collapse_test_only).collect(),
        }),
        ExprKind::List(l) => ExprKind::List(ListExpr {
            elements: l.elements.into_iter().map(collapse_test_only).collect(),
            optional_indices: l.optional_indices,
        }),
        ExprKind::Map(m) => ExprKind::Map(MapExpr {
            entries: m
                .entries
                .into_iter()
                .map(|e| MapEntry {
                    id: e.id,
                    key: collapse_test_only(e.key),
                    value: collapse_test_only(e.value),
                    optional_entry: e.optional_entry,
                })
                .collect(),
        }),
        ExprKind::Struct(s) => ExprKind::Struct(StructExpr {
            message_name: s.message_name,
            entries: s
                .entries
                .into_iter()
                .map(|e| StructEntry {
                    id: e.id,
                    field: e.field,
                    value: collapse_test_only(e.value),
                    optional_entry: e.optional_entry,
                })
                .collect(),
        }),
        ExprKind::Comprehension(c) => ExprKind::Comprehension(Box::new(Comprehension {
            iter_var: c.iter_var,
            iter_var2: c.iter_var2,
            accu_var: c.accu_var,
            iter_range: collapse_test_only(c.iter_range),
            accu_init: collapse_test_only(c.accu_init),
            loop_condition: collapse_test_only(c.loop_condition),
            loop_step: collapse_test_only(c.loop_step),
            result: collapse_test_only(c.result),
        })),
        other @ (ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_)) => other,
    };
    Expr::new(id, kind)
}

/// Scans `nodes` (already in pre-order) for the first index with a later
/// `≡`-equal node, and returns every node in `nodes` equal to it: the
/// first pair of `≡`-equal nodes in the list, plus every other node
/// `≡`-equal to them.
fn find_first_duplicate(nodes: &[(ExprId, Expr)]) -> Option<Vec<(ExprId, Expr)>> {
    for i in 0..nodes.len() {
        let key_i = canonical_key(&nodes[i].1);
        let has_match = nodes[(i + 1)..].iter().any(|(_, e)| canonical_key(e) == key_i);
        if has_match {
            return Some(
                nodes
                    .iter()
                    .filter(|(_, e)| canonical_key(e) == key_i)
                    .cloned()
                    .collect(),
            );
        }
    }
    None
}

fn replace_members(
    expr: Expr,
    member_ids: &HashSet<ExprId>,
    ident_name: &str,
    gen: &mut IdGenerator,
) -> Expr {
    if member_ids.contains(&expr.id) {
        return Expr::ident(gen.next_id(), ident_name.to_string());
    }
    let Expr { id, kind } = expr;
    let kind = match kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => kind,
        ExprKind::Select(s) => ExprKind::Select(Select {
            operand: Box::new(replace_members(*s.operand, member_ids, ident_name, gen)),
            field: s.field,
            test_only: s.test_only,
        }),
        ExprKind::Call(c) => ExprKind::Call(Call {
            target: c
                .target
                .map(|t| Box::new(replace_members(*t, member_ids, ident_name, gen))),
            function: c.function,
            args: c
                .args
                .into_iter()
                .map(|a| replace_members(a, member_ids, ident_name, gen))
                .collect(),
        }),
        ExprKind::List(l) => ExprKind::List(ListExpr {
            elements: l
                .elements
                .into_iter()
                .map(|e| replace_members(e, member_ids, ident_name, gen))
                .collect(),
            optional_indices: l.optional_indices,
        }),
        ExprKind::Map(m) => ExprKind::Map(MapExpr {
            entries: m
                .entries
                .into_iter()
                .map(|e| MapEntry {
                    id: e.id,
                    key: replace_members(e.key, member_ids, ident_name, gen),
                    value: replace_members(e.value, member_ids, ident_name, gen),
                    optional_entry: e.optional_entry,
                })
                .collect(),
        }),
        ExprKind::Struct(s) => ExprKind::Struct(StructExpr {
            message_name: s.message_name,
            entries: s
                .entries
                .into_iter()
                .map(|e| StructEntry {
                    id: e.id,
                    field: e.field,
                    value: replace_members(e.value, member_ids, ident_name, gen),
                    optional_entry: e.optional_entry,
                })
                .collect(),
        }),
        ExprKind::Comprehension(c) => ExprKind::Comprehension(Box::new(Comprehension {
            iter_var: c.iter_var,
            iter_var2: c.iter_var2,
            accu_var: c.accu_var,
            iter_range: replace_members(c.iter_range, member_ids, ident_name, gen),
            accu_init: replace_members(c.accu_init, member_ids, ident_name, gen),
            loop_condition: replace_members(c.loop_condition, member_ids, ident_name, gen),
            loop_step: replace_members(c.loop_step, member_ids, ident_name, gen),
            result: replace_members(c.result, member_ids, ident_name, gen),
        })),
    };
    Expr::new(id, kind)
}

fn children_of(expr: &Expr) -> Vec<&Expr> {
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => Vec::new(),
        ExprKind::Select(s) => vec![s.operand.as_ref()],
        ExprKind::Call(c) => {
            let mut v = Vec::new();
            if let Some(t) = &c.target {
                v.push(t.as_ref());
            }
            v.extend(c.args.iter());
            v
        }
        ExprKind::List(l) => l.elements.iter().collect(),
        ExprKind::Map(m) => m.entries.iter().flat_map(|e| [&e.key, &e.value]).collect(),
        ExprKind::Struct(s) => s.entries.iter().map(|e| &e.value).collect(),
        ExprKind::Comprehension(c) => {
            vec![&c.iter_range, &c.accu_init, &c.loop_condition, &c.loop_step, &c.result]
        }
    }
}

fn height(expr: &Expr) -> usize {
    children_of(expr).iter().map(|c| 1 + height(c)).max().unwrap_or(0)
}

fn verify_no_dangling_mangled_vars(subexpressions: &[Expr], mangled: &HashSet<String>) -> Result<()> {
    for sub in subexpressions {
        let free = free_idents(sub);
        if !free.is_disjoint(mangled) {
            return internal_err!(
                "subexpression elimination post-condition violated: an extracted subexpression \
                 references a mangled comprehension variable outside the scope that defines it"
            );
        }
    }
    Ok(())
}

/// Post-invariants for the flat block form: every `@index<K>` reference
/// inside the `K`-th subexpression refers to a strictly smaller index;
/// every `@index<K>` reference in the block result has `K < N`; the block
/// result references at least one `@index<K>`.
fn verify_index_references(subexpressions: &[Expr], result: &Expr, prefix: &str) -> Result<()> {
    let n = subexpressions.len();
    for (k, sub) in subexpressions.iter().enumerate() {
        for j in index_refs(sub, prefix) {
            if j >= k {
                return internal_err!(
                    "subexpression elimination post-condition violated: {prefix}{k} references \
                     {prefix}{j}, which is not a strictly smaller index"
                );
            }
        }
    }

    let result_refs: HashSet<usize> = index_refs(result, prefix).into_iter().collect();
    if result_refs.iter().any(|j| *j >= n) {
        return internal_err!(
            "subexpression elimination post-condition violated: block result references an \
             out-of-range index"
        );
    }
    if result_refs.is_empty() {
        return internal_err!(
            "subexpression elimination post-condition violated: block result contains no \
             {prefix} reference"
        );
    }
    Ok(())
}

fn index_refs(expr: &Expr, prefix: &str) -> Vec<usize> {
    use itertools::Itertools;

    let mut names = Vec::new();
    collect_idents_matching(expr, prefix, &mut names);
    names
        .into_iter()
        .filter_map(|n| n.trim_start_matches(prefix).parse::<usize>().ok())
        .unique()
        .collect_vec()
}

fn collect_idents_matching(expr: &Expr, prefix: &str, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::Ident(name) if name.starts_with(prefix) => out.push(name.clone()),
        ExprKind::Ident(_) | ExprKind::NotSet | ExprKind::Constant(_) => {}
        ExprKind::Select(s) => collect_idents_matching(&s.operand, prefix, out),
        ExprKind::Call(c) => {
            if let Some(t) = &c.target {
                collect_idents_matching(t, prefix, out);
            }
            for a in &c.args {
                collect_idents_matching(a, prefix, out);
            }
        }
        ExprKind::List(l) => {
            for e in &l.elements {
                collect_idents_matching(e, prefix, out);
            }
        }
        ExprKind::Map(m) => {
            for e in &m.entries {
                collect_idents_matching(&e.key, prefix, out);
                collect_idents_matching(&e.value, prefix, out);
            }
        }
        ExprKind::Struct(s) => {
            for e in &s.entries {
                collect_idents_matching(&e.value, prefix, out);
            }
        }
        ExprKind::Comprehension(c) => {
            collect_idents_matching(&c.iter_range, prefix, out);
            collect_idents_matching(&c.accu_init, prefix, out);
            collect_idents_matching(&c.loop_condition, prefix, out);
            collect_idents_matching(&c.loop_step, prefix, out);
            collect_idents_matching(&c.result, prefix, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel_common::types::Type;
    use cel_expr::{Constant, Source};

    #[ctor::ctor]
    fn init() {
        let _ = env_logger::try_init();
    }

    fn ast_of(root: Expr) -> CheckedAst {
        CheckedAst::new(root, Source::default())
    }

    // m.c.t[x]
    fn index_expr(base: ExprId) -> Expr {
        let m = Expr::ident(base, "m");
        let c = Expr::select(base + 1, m, "c", false);
        let t = Expr::select(base + 2, c, "t", false);
        let x = Expr::ident(base + 3, "x");
        Expr::call(base + 4, None, "_[_]", vec![t, x])
    }

    struct AlwaysDyn;
    impl TypeChecker for AlwaysDyn {
        fn check(&self, _expr: &Expr, _ast: &CheckedAst, _env: &Env) -> Result<Type> {
            Ok(Type::Dyn)
        }
    }

    #[test]
    fn flat_block_extracts_repeated_index_expression() {
        // m.c.t[x].startsWith("hi") && m.c.t[x].endsWith("!")
        let lhs = Expr::call(
            100,
            Some(index_expr(1)),
            "startsWith",
            vec![Expr::constant(101, Constant::String("hi".into()))],
        );
        let rhs = Expr::call(
            200,
            Some(index_expr(10)),
            "endsWith",
            vec![Expr::constant(201, Constant::String("!".into()))],
        );
        let root = Expr::call(300, None, "_&&_", vec![lhs, rhs]);
        let ast = ast_of(root);
        let checker = AlwaysDyn;
        let rule = SubexpressionOptimizer::new(&checker);

        let outcome = rule
            .try_optimize(&ast, &OptimizerConfig::default())
            .unwrap()
            .expect("cse should fire");

        match &outcome.ast.root.kind {
            ExprKind::Call(c) => {
                assert_eq!(c.function, "cel.@block");
                let ExprKind::List(list) = &c.args[0].kind else {
                    panic!("expected list of subexpressions");
                };
                assert_eq!(list.elements.len(), 1);
                assert!(matches!(&list.elements[0].kind, ExprKind::Call(inner) if inner.function == "_[_]"));

                let body = &c.args[1];
                let ExprKind::Call(and_call) = &body.kind else {
                    panic!("expected &&")
                };
                for side in &and_call.args {
                    let ExprKind::Call(side_call) = &side.kind else {
                        panic!("expected call")
                    };
                    match side_call.target.as_deref() {
                        Some(Expr {
                            kind: ExprKind::Ident(name),
                            ..
                        }) => assert_eq!(name, "@index0"),
                        other => panic!("expected @index0 receiver, got {other:?}"),
                    }
                }
            }
            other => panic!("expected cel.@block call, got {other:?}"),
        }
        assert!(outcome.ast.source.has_extension("cel_block"));
    }

    #[test]
    fn bind_macro_form_nests_cel_bind_when_block_disabled() {
        let lhs = Expr::call(
            100,
            Some(index_expr(1)),
            "startsWith",
            vec![Expr::constant(101, Constant::String("hi".into()))],
        );
        let rhs = Expr::call(
            200,
            Some(index_expr(10)),
            "endsWith",
            vec![Expr::constant(201, Constant::String("!".into()))],
        );
        let root = Expr::call(300, None, "_&&_", vec![lhs, rhs]);
        let ast = ast_of(root);
        let checker = AlwaysDyn;
        let rule = SubexpressionOptimizer::new(&checker);

        let mut config = OptimizerConfig::default();
        config.enable_cel_block = false;

        let outcome = rule
            .try_optimize(&ast, &config)
            .unwrap()
            .expect("cse should fire");

        match &outcome.ast.root.kind {
            ExprKind::Comprehension(comp) => {
                assert_eq!(comp.accu_var, "@r0");
                assert!(outcome.ast.source.macro_calls.contains_key(&outcome.ast.root.id));
            }
            other => panic!("expected a bind comprehension root, got {other:?}"),
        }
        assert!(!outcome.ast.source.has_extension("cel_block"));
    }

    #[test]
    fn no_duplicate_eliminable_subtrees_is_unchanged() {
        let root = Expr::call(
            1,
            None,
            "_+_",
            vec![
                Expr::ident(2, "a"),
                Expr::ident(3, "b"),
            ],
        );
        let ast = ast_of(root);
        let checker = AlwaysDyn;
        let rule = SubexpressionOptimizer::new(&checker);
        let outcome = rule.try_optimize(&ast, &OptimizerConfig::default()).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn node_referencing_enclosing_comprehension_var_is_ineligible() {
        // [1, 2].exists(i, i > 0) desugared directly: a comprehension whose
        // result is `i > 0`. The `i > 0` node must never be eliminable,
        // since `i` is the comprehension's own (mangled) iter_var.
        let comp = Expr::comprehension(
            1,
            Comprehension {
                iter_var: "i".into(),
                iter_var2: None,
                accu_var: "__result__".into(),
                iter_range: Expr::list(
                    2,
                    vec![Expr::constant(3, Constant::Int(1)), Expr::constant(4, Constant::Int(2))],
                    vec![],
                ),
                accu_init: Expr::constant(5, Constant::Bool(false)),
                loop_condition: Expr::constant(6, Constant::Bool(true)),
                loop_step: Expr::call(
                    7,
                    None,
                    "_||_",
                    vec![
                        Expr::ident(8, "__result__"),
                        Expr::call(
                            9,
                            None,
                            "_>_",
                            vec![Expr::ident(10, "i"), Expr::constant(11, Constant::Int(0))],
                        ),
                    ],
                ),
                result: Expr::ident(12, "__result__"),
            },
        );

        let ctx = Ctx {
            forbidden: false,
            ancestor_vars: ["@it0".to_string()].into_iter().collect(),
        };
        let inner_gt = Expr::call(
            9,
            None,
            "_>_",
            vec![Expr::ident(10, "@it0"), Expr::constant(11, Constant::Int(0))],
        );
        assert!(!node_is_eligible(&inner_gt, &ctx, &OptimizerConfig::default()));

        // Sanity: the whole comprehension is still structurally intact and
        // would be eligible at the true top level (no ancestor vars, not
        // forbidden) since `size`/comparison/boolean ops are eliminable by
        // default and it references no outer name.
        let root_ctx = Ctx::root();
        assert!(node_is_eligible(&comp, &root_ctx, &OptimizerConfig::default()));
    }

    #[test]
    fn accu_init_and_loop_condition_are_forbidden_zones() {
        let comp = Expr::comprehension(
            1,
            Comprehension {
                iter_var: "@it0".into(),
                iter_var2: None,
                accu_var: "@ac0".into(),
                iter_range: Expr::list(2, vec![], vec![]),
                accu_init: Expr::call(
                    3,
                    None,
                    "_+_",
                    vec![Expr::ident(4, "a"), Expr::ident(5, "b")],
                ),
                loop_condition: Expr::call(
                    6,
                    None,
                    "_&&_",
                    vec![Expr::ident(7, "x"), Expr::ident(8, "y")],
                ),
                loop_step: Expr::ident(9, "@ac0"),
                result: Expr::ident(10, "@ac0"),
            },
        );

        let mut out = Vec::new();
        collect_eligible(&comp, Ctx::root(), &OptimizerConfig::default(), &mut out);
        let eligible_ids: HashSet<ExprId> = out.into_iter().map(|(id, _)| id).collect();
        assert!(!eligible_ids.contains(&3), "accu_init node must not be eliminable");
        assert!(!eligible_ids.contains(&6), "loop_condition node must not be eliminable");
    }
}
