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

//! The AST mutator: `replace_subtree`, `renumber_ids_consecutively`,
//! `clear_expr_ids`, `mangle_comprehension_identifier_names`,
//! `wrap_ast_with_new_cel_block`, and `replace_subtree_with_new_bind_macro`.
//!
//! Every operation here is pure: it consumes (a clone of) its input and
//! returns a new `CheckedAst`, the same way the teacher's `expr_rewriter`
//! helpers (`normalize_col`, `replace_col`, ...) never mutate their input in
//! place.

use std::collections::{HashMap, HashSet};

use cel_common::error::Result;
use cel_common::internal_err;
use cel_common::tree_node::{Transformed, TransformedResult, TreeNode, TreeNodeRecursion};
use cel_common::types::Type;

use crate::checked_ast::CheckedAst;
use crate::expr::{
    Call, Comprehension, Constant, Expr, ExprId, ExprKind, ListExpr, MapEntry, MapExpr, Select,
    StructEntry, StructExpr,
};

/// A monotonic id generator, seeded at `max(existing ids) + 1` so newly
/// synthesized nodes never collide with an existing id.
pub struct IdGenerator {
    next: ExprId,
}

impl IdGenerator {
    pub fn seeded_at(next: ExprId) -> Self {
        IdGenerator { next }
    }

    pub fn seeded_after(expr: &Expr) -> Self {
        let mut ids = HashSet::new();
        collect_all_ids(expr, &mut ids);
        IdGenerator {
            next: ids.into_iter().max().unwrap_or(0) + 1,
        }
    }

    pub fn next_id(&mut self) -> ExprId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Collects every id in `expr`'s tree, including `MapEntry`/`StructEntry`
/// entry ids — ids are unique within an AST, so this is the full set a
/// caller must avoid colliding with.
pub fn collect_all_ids(expr: &Expr, out: &mut HashSet<ExprId>) {
    out.insert(expr.id);
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => {}
        ExprKind::Select(s) => collect_all_ids(&s.operand, out),
        ExprKind::Call(c) => {
            if let Some(t) = &c.target {
                collect_all_ids(t, out);
            }
            for a in &c.args {
                collect_all_ids(a, out);
            }
        }
        ExprKind::List(l) => {
            for e in &l.elements {
                collect_all_ids(e, out);
            }
        }
        ExprKind::Map(m) => {
            for e in &m.entries {
                out.insert(e.id);
                collect_all_ids(&e.key, out);
                collect_all_ids(&e.value, out);
            }
        }
        ExprKind::Struct(s) => {
            for e in &s.entries {
                out.insert(e.id);
                collect_all_ids(&e.value, out);
            }
        }
        ExprKind::Comprehension(c) => {
            collect_all_ids(&c.iter_range, out);
            collect_all_ids(&c.accu_init, out);
            collect_all_ids(&c.loop_condition, out);
            collect_all_ids(&c.loop_step, out);
            collect_all_ids(&c.result, out);
        }
    }
}

fn find_node(expr: &Expr, id: ExprId) -> Option<&Expr> {
    if expr.id == id {
        return Some(expr);
    }
    match &expr.kind {
        ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => None,
        ExprKind::Select(s) => find_node(&s.operand, id),
        ExprKind::Call(c) => c
            .target
            .as_deref()
            .and_then(|t| find_node(t, id))
            .or_else(|| c.args.iter().find_map(|a| find_node(a, id))),
        ExprKind::List(l) => l.elements.iter().find_map(|e| find_node(e, id)),
        ExprKind::Map(m) => m
            .entries
            .iter()
            .find_map(|e| find_node(&e.key, id).or_else(|| find_node(&e.value, id))),
        ExprKind::Struct(s) => s.entries.iter().find_map(|e| find_node(&e.value, id)),
        ExprKind::Comprehension(c) => [
            &c.iter_range,
            &c.accu_init,
            &c.loop_condition,
            &c.loop_step,
            &c.result,
        ]
        .into_iter()
        .find_map(|e| find_node(e, id)),
    }
}

/// Returns `expr` with every collision against `used` replaced by a fresh
/// id from `gen`, recording old -> new in `remap`. Ids that don't collide
/// are kept and added to `used` so later siblings can't collide with them
/// either.
fn renumber_collisions(
    expr: Expr,
    used: &mut HashSet<ExprId>,
    gen: &mut IdGenerator,
    remap: &mut HashMap<ExprId, ExprId>,
) -> Expr {
    let new_id = reserve_id(expr.id, used, gen, remap);
    let kind = match expr.kind {
        ExprKind::NotSet => ExprKind::NotSet,
        ExprKind::Constant(c) => ExprKind::Constant(c),
        ExprKind::Ident(s) => ExprKind::Ident(s),
        ExprKind::Select(s) => ExprKind::Select(Select {
            operand: Box::new(renumber_collisions(*s.operand, used, gen, remap)),
            field: s.field,
            test_only: s.test_only,
        }),
        ExprKind::Call(c) => ExprKind::Call(Call {
            target: c
                .target
                .map(|t| Box::new(renumber_collisions(*t, used, gen, remap))),
            function: c.function,
            args: c
                .args
                .into_iter()
                .map(|a| renumber_collisions(a, used, gen, remap))
                .collect(),
        }),
        ExprKind::List(l) => ExprKind::List(ListExpr {
            elements: l
                .elements
                .into_iter()
                .map(|e| renumber_collisions(e, used, gen, remap))
                .collect(),
            optional_indices: l.optional_indices,
        }),
        ExprKind::Map(m) => ExprKind::Map(MapExpr {
            entries: m
                .entries
                .into_iter()
                .map(|e| MapEntry {
                    id: reserve_id(e.id, used, gen, remap),
                    key: renumber_collisions(e.key, used, gen, remap),
                    value: renumber_collisions(e.value, used, gen, remap),
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
                    id: reserve_id(e.id, used, gen, remap),
                    field: e.field,
                    value: renumber_collisions(e.value, used, gen, remap),
                    optional_entry: e.optional_entry,
                })
                .collect(),
        }),
        ExprKind::Comprehension(c) => ExprKind::Comprehension(Box::new(Comprehension {
            iter_var: c.iter_var,
            iter_var2: c.iter_var2,
            accu_var: c.accu_var,
            iter_range: renumber_collisions(c.iter_range, used, gen, remap),
            accu_init: renumber_collisions(c.accu_init, used, gen, remap),
            loop_condition: renumber_collisions(c.loop_condition, used, gen, remap),
            loop_step: renumber_collisions(c.loop_step, used, gen, remap),
            result: renumber_collisions(c.result, used, gen, remap),
        })),
    };
    Expr::new(new_id, kind)
}

fn reserve_id(
    id: ExprId,
    used: &mut HashSet<ExprId>,
    gen: &mut IdGenerator,
    remap: &mut HashMap<ExprId, ExprId>,
) -> ExprId {
    if used.contains(&id) {
        let fresh = gen.next_id();
        remap.insert(id, fresh);
        used.insert(fresh);
        fresh
    } else {
        used.insert(id);
        id
    }
}

/// Locates the unique node with id `target_id`, substitutes `new_subtree`
/// for it, renumbers any id collision between `new_subtree` and the
/// surviving part of `ast` to a fresh id, and drops every `type_map` /
/// `reference_map` / `Source` sidecar entry keyed by an id that no longer
/// appears in the result.
pub fn replace_subtree(ast: &CheckedAst, new_subtree: Expr, target_id: ExprId) -> Result<CheckedAst> {
    let mut all_ids = HashSet::new();
    collect_all_ids(&ast.root, &mut all_ids);
    if !all_ids.contains(&target_id) {
        return internal_err!("replace_subtree: no node with id {target_id} in the AST");
    }

    let mut target_subtree_ids = HashSet::new();
    if let Some(target_node) = find_node(&ast.root, target_id) {
        collect_all_ids(target_node, &mut target_subtree_ids);
    }
    let remaining_ids: HashSet<ExprId> =
        all_ids.difference(&target_subtree_ids).copied().collect();

    let mut new_subtree_ids = HashSet::new();
    collect_all_ids(&new_subtree, &mut new_subtree_ids);
    let max_existing = all_ids
        .iter()
        .chain(new_subtree_ids.iter())
        .copied()
        .max()
        .unwrap_or(0);
    let mut gen = IdGenerator::seeded_at(max_existing + 1);

    let mut used = remaining_ids.clone();
    let mut remap = HashMap::new();
    let new_subtree = renumber_collisions(new_subtree, &mut used, &mut gen, &mut remap);

    let new_root = ast
        .root
        .clone()
        .transform(|e| {
            if e.id == target_id {
                Ok(Transformed::new(
                    new_subtree.clone(),
                    true,
                    TreeNodeRecursion::Jump,
                ))
            } else {
                Ok(Transformed::no(e))
            }
        })
        .data()?;

    let mut live_ids = HashSet::new();
    collect_all_ids(&new_root, &mut live_ids);

    let type_map = ast
        .type_map
        .iter()
        .filter(|(id, _)| live_ids.contains(id))
        .map(|(id, t)| (*id, t.clone()))
        .collect();
    let reference_map = ast
        .reference_map
        .iter()
        .filter(|(id, _)| live_ids.contains(id))
        .map(|(id, r)| (*id, r.clone()))
        .collect();

    let mut source = ast.source.clone();
    source.retain_ids(&live_ids);

    Ok(CheckedAst {
        root: new_root,
        source,
        type_map,
        reference_map,
    })
}

/// Replaces every id in `expr`, including `MapEntry`/`StructEntry` entry
/// ids, with `0`. Used to compute structural equality modulo ids, CSE's
/// semantic-equality check on extracted subexpressions.
pub fn clear_expr_ids(expr: Expr) -> Expr {
    let kind = match expr.kind {
        ExprKind::NotSet => ExprKind::NotSet,
        ExprKind::Constant(c) => ExprKind::Constant(c),
        ExprKind::Ident(s) => ExprKind::Ident(s),
        ExprKind::Select(s) => ExprKind::Select(Select {
            operand: Box::new(clear_expr_ids(*s.operand)),
            field: s.field,
            test_only: s.test_only,
        }),
        ExprKind::Call(c) => ExprKind::Call(Call {
            target: c.target.map(|t| Box::new(clear_expr_ids(*t))),
            function: c.function,
            args: c.args.into_iter().map(clear_expr_ids).collect(),
        }),
        ExprKind::List(l) => ExprKind::List(ListExpr {
            elements: l.elements.into_iter().map(clear_expr_ids).collect(),
            optional_indices: l.optional_indices,
        }),
        ExprKind::Map(m) => ExprKind::Map(MapExpr {
            entries: m
                .entries
                .into_iter()
                .map(|e| MapEntry {
                    id: 0,
                    key: clear_expr_ids(e.key),
                    value: clear_expr_ids(e.value),
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
                    id: 0,
                    field: e.field,
                    value: clear_expr_ids(e.value),
                    optional_entry: e.optional_entry,
                })
                .collect(),
        }),
        ExprKind::Comprehension(c) => ExprKind::Comprehension(Box::new(Comprehension {
            iter_var: c.iter_var,
            iter_var2: c.iter_var2,
            accu_var: c.accu_var,
            iter_range: clear_expr_ids(c.iter_range),
            accu_init: clear_expr_ids(c.accu_init),
            loop_condition: clear_expr_ids(c.loop_condition),
            loop_step: clear_expr_ids(c.loop_step),
            result: clear_expr_ids(c.result),
        })),
    };
    Expr::new(0, kind)
}

/// Produces a tree whose ids are `1..N` in pre-order, with `type_map`,
/// `reference_map`, and `Source`'s id-keyed sidecars remapped accordingly.
pub fn renumber_ids_consecutively(ast: &CheckedAst) -> Result<CheckedAst> {
    let mut gen = IdGenerator::seeded_at(1);
    let mut used = HashSet::new();
    let mut remap = HashMap::new();
    // Every id is fresh relative to an empty `used` set, so every node is
    // unconditionally renumbered in pre-order.
    let new_root = renumber_collisions(ast.root.clone(), &mut used, &mut gen, &mut remap);

    let type_map = ast
        .type_map
        .iter()
        .filter_map(|(id, t)| remap.get(id).map(|new_id| (*new_id, t.clone())))
        .collect();
    let reference_map = ast
        .reference_map
        .iter()
        .filter_map(|(id, r)| remap.get(id).map(|new_id| (*new_id, r.clone())))
        .collect();

    let mut source = ast.source.clone();
    source.remap_ids(&remap);

    Ok(CheckedAst {
        root: new_root,
        source,
        type_map,
        reference_map,
    })
}

/// Per-comprehension bookkeeping produced by
/// [`mangle_comprehension_identifier_names`]: the generated names and the
/// original types of `iter_var`, optional `iter_var2`, and the
/// comprehension's result, so an extracted subexpression can be
/// re-type-checked later.
#[derive(Debug, Clone)]
pub struct MangledVarInfo {
    pub iter_var: String,
    pub iter_var2: Option<String>,
    pub accu_var: String,
    pub iter_var_type: Type,
    pub iter_var2_type: Option<Type>,
    pub result_type: Type,
}

struct Mangler<'a> {
    iter_prefix: &'a str,
    iter_prefix2: &'a str,
    accu_prefix: &'a str,
    iter_counter: usize,
    iter2_counter: usize,
    accu_counter: usize,
    info: HashMap<ExprId, MangledVarInfo>,
}

impl<'a> Mangler<'a> {
    fn mangle(
        &mut self,
        expr: Expr,
        scopes: &mut Vec<HashMap<String, String>>,
        ast: &CheckedAst,
    ) -> Expr {
        let Expr { id, kind } = expr;
        match kind {
            ExprKind::NotSet | ExprKind::Constant(_) => Expr::new(id, kind),
            ExprKind::Ident(name) => {
                let mangled = scopes.iter().rev().find_map(|frame| frame.get(&name)).cloned();
                Expr::new(id, ExprKind::Ident(mangled.unwrap_or(name)))
            }
            ExprKind::Select(s) => Expr::new(
                id,
                ExprKind::Select(Select {
                    operand: Box::new(self.mangle(*s.operand, scopes, ast)),
                    field: s.field,
                    test_only: s.test_only,
                }),
            ),
            ExprKind::Call(c) => Expr::new(
                id,
                ExprKind::Call(Call {
                    target: c.target.map(|t| Box::new(self.mangle(*t, scopes, ast))),
                    function: c.function,
                    args: c
                        .args
                        .into_iter()
                        .map(|a| self.mangle(a, scopes, ast))
                        .collect(),
                }),
            ),
            ExprKind::List(l) => Expr::new(
                id,
                ExprKind::List(ListExpr {
                    elements: l
                        .elements
                        .into_iter()
                        .map(|e| self.mangle(e, scopes, ast))
                        .collect(),
                    optional_indices: l.optional_indices,
                }),
            ),
            ExprKind::Map(m) => Expr::new(
                id,
                ExprKind::Map(MapExpr {
                    entries: m
                        .entries
                        .into_iter()
                        .map(|e| MapEntry {
                            id: e.id,
                            key: self.mangle(e.key, scopes, ast),
                            value: self.mangle(e.value, scopes, ast),
                            optional_entry: e.optional_entry,
                        })
                        .collect(),
                }),
            ),
            ExprKind::Struct(s) => Expr::new(
                id,
                ExprKind::Struct(StructExpr {
                    message_name: s.message_name,
                    entries: s
                        .entries
                        .into_iter()
                        .map(|e| StructEntry {
                            id: e.id,
                            field: e.field,
                            value: self.mangle(e.value, scopes, ast),
                            optional_entry: e.optional_entry,
                        })
                        .collect(),
                }),
            ),
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

                let iter_range_id = iter_range.id;
                // iter_range and accu_init are evaluated outside this
                // comprehension's scope, so they're mangled with the
                // *current* (not-yet-pushed) scope stack.
                let iter_range = self.mangle(iter_range, scopes, ast);
                let accu_init = self.mangle(accu_init, scopes, ast);

                let mangled_iter = format!("{}{}", self.iter_prefix, self.iter_counter);
                self.iter_counter += 1;
                let mangled_iter2 = iter_var2.as_ref().map(|_| {
                    let n = format!("{}{}", self.iter_prefix2, self.iter2_counter);
                    self.iter2_counter += 1;
                    n
                });
                let mangled_accu = format!("{}{}", self.accu_prefix, self.accu_counter);
                self.accu_counter += 1;

                let mut frame = HashMap::new();
                frame.insert(iter_var.clone(), mangled_iter.clone());
                if let (Some(orig2), Some(mangled2)) = (&iter_var2, &mangled_iter2) {
                    frame.insert(orig2.clone(), mangled2.clone());
                }
                frame.insert(accu_var.clone(), mangled_accu.clone());
                scopes.push(frame);

                let loop_condition = self.mangle(loop_condition, scopes, ast);
                let loop_step = self.mangle(loop_step, scopes, ast);
                let result = self.mangle(result, scopes, ast);

                scopes.pop();

                let (iter_var_type, iter_var2_type) = match ast.type_of(iter_range_id) {
                    Some(Type::List(elem)) => ((**elem).clone(), mangled_iter2.as_ref().map(|_| Type::Dyn)),
                    Some(Type::Map(key, value)) => {
                        ((**key).clone(), mangled_iter2.as_ref().map(|_| (**value).clone()))
                    }
                    _ => (Type::Dyn, mangled_iter2.as_ref().map(|_| Type::Dyn)),
                };
                let result_type = ast.type_of(id).cloned().unwrap_or(Type::Dyn);

                self.info.insert(
                    id,
                    MangledVarInfo {
                        iter_var: mangled_iter.clone(),
                        iter_var2: mangled_iter2.clone(),
                        accu_var: mangled_accu.clone(),
                        iter_var_type,
                        iter_var2_type,
                        result_type,
                    },
                );

                Expr::new(
                    id,
                    ExprKind::Comprehension(Box::new(Comprehension {
                        iter_var: mangled_iter,
                        iter_var2: mangled_iter2,
                        accu_var: mangled_accu,
                        iter_range,
                        accu_init,
                        loop_condition,
                        loop_step,
                        result,
                    })),
                )
            }
        }
    }
}

/// Renames every comprehension's `iter_var`/`iter_var2`/`accu_var` to a
/// unique `prefix<index>` name and rewrites every in-scope `IDENT` that
/// refers to it. Sibling comprehensions sharing an original name get
/// distinct mangled names because the per-prefix counters are global to
/// the call.
pub fn mangle_comprehension_identifier_names(
    ast: &CheckedAst,
    iter_prefix: &str,
    iter_prefix2: &str,
    accu_prefix: &str,
) -> Result<(CheckedAst, HashMap<ExprId, MangledVarInfo>)> {
    let mut mangler = Mangler {
        iter_prefix,
        iter_prefix2,
        accu_prefix,
        iter_counter: 0,
        iter2_counter: 0,
        accu_counter: 0,
        info: HashMap::new(),
    };
    let mut scopes = Vec::new();
    let new_root = mangler.mangle(ast.root.clone(), &mut scopes, ast);

    let mut new_ast = ast.clone();
    new_ast.root = new_root;
    Ok((new_ast, mangler.info))
}

/// Builds a new root `function_name([sub0, sub1, ...], original_expr)`,
/// with fresh ids for the wrapper list and call nodes.
pub fn wrap_ast_with_new_cel_block(
    function_name: &str,
    ast: &CheckedAst,
    subexpressions: Vec<Expr>,
) -> Result<CheckedAst> {
    let mut all_ids = HashSet::new();
    collect_all_ids(&ast.root, &mut all_ids);
    for s in &subexpressions {
        collect_all_ids(s, &mut all_ids);
    }
    let mut gen = IdGenerator::seeded_at(all_ids.into_iter().max().unwrap_or(0) + 1);

    let list_id = gen.next_id();
    let call_id = gen.next_id();
    let list_expr = Expr::list(list_id, subexpressions, Vec::new());
    let new_root = Expr::call(call_id, None, function_name, vec![list_expr, ast.root.clone()]);

    let mut new_ast = ast.clone();
    new_ast.root = new_root;
    Ok(new_ast)
}

/// Replaces the subtree at `scope_id` with a one-iteration comprehension
/// encoding the canonical let-binding `cel.bind(identifier, value_expr,
/// scope_expr)`, and records the original macro-call shape in `Source`.
pub fn replace_subtree_with_new_bind_macro(
    ast: &CheckedAst,
    identifier: &str,
    value_expr: Expr,
    scope_expr: Expr,
    scope_id: ExprId,
) -> Result<CheckedAst> {
    let mut all_ids = HashSet::new();
    collect_all_ids(&ast.root, &mut all_ids);
    collect_all_ids(&value_expr, &mut all_ids);
    collect_all_ids(&scope_expr, &mut all_ids);
    let mut gen = IdGenerator::seeded_at(all_ids.into_iter().max().unwrap_or(0) + 1);

    let macro_value = value_expr.clone();
    let macro_scope = scope_expr.clone();

    let comp_id = gen.next_id();
    let iter_range_id = gen.next_id();
    let loop_condition_id = gen.next_id();
    let loop_step_id = gen.next_id();

    let comprehension = Expr::comprehension(
        comp_id,
        Comprehension {
            // Never bound to any value: `iterRange` is the empty list, so
            // this comprehension iterates zero times and `iter_var` is
            // never read.
            iter_var: "#unused".to_string(),
            iter_var2: None,
            accu_var: identifier.to_string(),
            iter_range: Expr::list(iter_range_id, Vec::new(), Vec::new()),
            accu_init: value_expr,
            loop_condition: Expr::constant(loop_condition_id, Constant::Bool(false)),
            loop_step: Expr::ident(loop_step_id, identifier),
            result: scope_expr,
        },
    );

    let macro_shape = Expr::call(
        gen.next_id(),
        None,
        "cel.bind",
        vec![Expr::ident(gen.next_id(), identifier), macro_value, macro_scope],
    );

    let mut new_ast = replace_subtree(ast, comprehension, scope_id)?;
    new_ast.source.macro_calls.insert(comp_id, macro_shape);
    Ok(new_ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    fn ast_of(root: Expr) -> CheckedAst {
        CheckedAst::new(root, Source::default())
    }

    #[test]
    fn replace_subtree_substitutes_unique_node() {
        let root = Expr::call(
            1,
            None,
            "f",
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::Int(2)),
            ],
        );
        let ast = ast_of(root);
        let replaced = replace_subtree(&ast, Expr::constant(100, Constant::Int(42)), 2).unwrap();
        match &replaced.root.kind {
            ExprKind::Call(c) => {
                assert_eq!(c.args[0].as_constant(), Some(&Constant::Int(42)));
                assert_eq!(c.args[1].as_constant(), Some(&Constant::Int(2)));
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn replace_subtree_renumbers_colliding_ids() {
        let root = Expr::call(
            1,
            None,
            "f",
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::Int(2)),
            ],
        );
        let ast = ast_of(root);
        // id 3 collides with a node that survives the replacement (arg[1]).
        let colliding = Expr::constant(3, Constant::Int(99));
        let replaced = replace_subtree(&ast, colliding, 2).unwrap();

        let mut ids = HashSet::new();
        collect_all_ids(&replaced.root, &mut ids);
        assert_eq!(ids.len(), 3, "no id collisions should survive: {ids:?}");
    }

    #[test]
    fn replace_subtree_missing_id_is_internal_error() {
        let ast = ast_of(Expr::constant(1, Constant::Bool(true)));
        let err = replace_subtree(&ast, Expr::constant(2, Constant::Bool(false)), 999)
            .expect_err("missing id");
        assert_eq!(err.kind(), "INTERNAL_ERROR");
    }

    #[test]
    fn replace_subtree_drops_sidecars_for_removed_ids() {
        let root = Expr::call(1, None, "f", vec![Expr::constant(2, Constant::Int(1))]);
        let mut ast = ast_of(root);
        ast.type_map.insert(1, Type::Int);
        ast.type_map.insert(2, Type::Int);
        ast.source.positions.insert(2, 5);

        let replaced = replace_subtree(&ast, Expr::constant(50, Constant::Int(7)), 2).unwrap();
        assert!(!replaced.type_map.contains_key(&2));
        assert!(!replaced.source.positions.contains_key(&2));
        assert!(replaced.type_map.contains_key(&1));
    }

    #[test]
    fn clear_expr_ids_zeroes_every_id_including_entries() {
        let entry = MapEntry {
            id: 5,
            key: Expr::constant(6, Constant::String("k".into())),
            value: Expr::constant(7, Constant::Int(1)),
            optional_entry: false,
        };
        let m = Expr::map(8, vec![entry]);
        let cleared = clear_expr_ids(m);
        assert_eq!(cleared.id, 0);
        match cleared.kind {
            ExprKind::Map(m) => {
                assert_eq!(m.entries[0].id, 0);
                assert_eq!(m.entries[0].key.id, 0);
                assert_eq!(m.entries[0].value.id, 0);
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn clear_ids_equivalence_law() {
        let a = Expr::call(10, None, "f", vec![Expr::ident(11, "x")]);
        let b = Expr::call(20, None, "f", vec![Expr::ident(21, "x")]);
        let c = Expr::call(30, None, "f", vec![Expr::ident(31, "y")]);
        assert_eq!(clear_expr_ids(a), clear_expr_ids(b));
        assert_ne!(clear_expr_ids(b), clear_expr_ids(c));
    }

    #[test]
    fn renumber_is_pre_order_1_to_n() {
        let root = Expr::call(
            50,
            None,
            "f",
            vec![
                Expr::constant(51, Constant::Int(1)),
                Expr::constant(52, Constant::Int(2)),
            ],
        );
        let ast = ast_of(root);
        let renumbered = renumber_ids_consecutively(&ast).unwrap();
        match &renumbered.root.kind {
            ExprKind::Call(c) => {
                assert_eq!(renumbered.root.id, 1);
                assert_eq!(c.args[0].id, 2);
                assert_eq!(c.args[1].id, 3);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn renumber_is_idempotent_up_to_relabelling() {
        let root = Expr::call(
            50,
            None,
            "f",
            vec![
                Expr::constant(51, Constant::Int(1)),
                Expr::constant(52, Constant::Int(2)),
            ],
        );
        let ast = ast_of(root);
        let once = renumber_ids_consecutively(&ast).unwrap();
        let twice = renumber_ids_consecutively(&once).unwrap();
        assert_eq!(once.root, twice.root);
    }

    #[test]
    fn mangle_gives_sibling_comprehensions_distinct_names() {
        let make_comp = |id, result_id| {
            Expr::comprehension(
                id,
                Comprehension {
                    iter_var: "i".into(),
                    iter_var2: None,
                    accu_var: "__result__".into(),
                    iter_range: Expr::ident(id + 1, "range"),
                    accu_init: Expr::constant(id + 2, Constant::Bool(false)),
                    loop_condition: Expr::constant(id + 3, Constant::Bool(true)),
                    loop_step: Expr::ident(id + 4, "i"),
                    result: Expr::ident(result_id, "__result__"),
                },
            )
        };
        let root = Expr::call(
            100,
            None,
            "f",
            vec![make_comp(1, 5), make_comp(10, 14)],
        );
        let ast = ast_of(root);
        let (mangled, info) =
            mangle_comprehension_identifier_names(&ast, "@it", "@it2", "@ac").unwrap();
        assert_eq!(info.len(), 2);
        assert_ne!(info[&1].iter_var, info[&10].iter_var);

        match &mangled.root.kind {
            ExprKind::Call(c) => {
                for comp in &c.args {
                    if let ExprKind::Comprehension(comp) = &comp.kind {
                        match &comp.loop_step.kind {
                            ExprKind::Ident(name) => assert_eq!(*name, comp.iter_var),
                            _ => panic!("expected ident"),
                        }
                    } else {
                        panic!("expected comprehension");
                    }
                }
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn wrap_with_cel_block_produces_call_of_list_and_original() {
        let root = Expr::ident(1, "x");
        let ast = ast_of(root.clone());
        let subs = vec![Expr::ident(2, "y")];
        let wrapped = wrap_ast_with_new_cel_block("cel.@block", &ast, subs).unwrap();
        match &wrapped.root.kind {
            ExprKind::Call(c) => {
                assert_eq!(c.function, "cel.@block");
                assert!(c.target.is_none());
                assert_eq!(c.args.len(), 2);
                assert!(matches!(c.args[0].kind, ExprKind::List(_)));
                assert_eq!(c.args[1], root);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn bind_macro_wraps_scope_in_one_iteration_comprehension() {
        let root = Expr::call(1, None, "f", vec![Expr::ident(2, "y")]);
        let ast = ast_of(root);
        let value = Expr::constant(10, Constant::Int(1));
        let scope = Expr::ident(2, "y");
        let bound = replace_subtree_with_new_bind_macro(&ast, "@r0", value, scope, 2).unwrap();
        match &bound.root.kind {
            ExprKind::Call(c) => match &c.args[0].kind {
                ExprKind::Comprehension(comp) => {
                    assert_eq!(comp.accu_var, "@r0");
                    assert!(matches!(&comp.iter_range.kind, ExprKind::List(l) if l.elements.is_empty()));
                    assert_eq!(comp.loop_condition.as_bool_constant(), Some(false));
                    assert!(bound.source.macro_calls.contains_key(&c.args[0].id));
                }
                _ => panic!("expected comprehension"),
            },
            _ => panic!("expected call"),
        }
    }
}
