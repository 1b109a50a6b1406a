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

//! The `Expr` data model: a tagged-variant AST node, one arm per kind
//! (`CONSTANT`, `IDENT`, `SELECT`, `CALL`, `LIST`, `MAP`, `STRUCT`,
//! `COMPREHENSION`, `NOT_SET`), each carrying a unique non-negative 64-bit
//! `id`.

use cel_common::error::Result;
use cel_common::tree_node::{Transformed, TreeNode, TreeNodeIterator, TreeNodeRecursion};

/// A non-negative 64-bit id, unique within a single `Expr` tree.
pub type ExprId = u64;

/// A tagged scalar constant: `null`, `bool`, `int64`, `uint64`, `double`,
/// `string` or `bytes`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// `x.field`, or `has(x.field)` when `test_only` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub operand: Box<Expr>,
    pub field: String,
    pub test_only: bool,
}

/// `target.function(args...)`, or `function(args...)` when `target` is
/// `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: Option<Box<Expr>>,
    pub function: String,
    pub args: Vec<Expr>,
}

/// `[elements...]`, with a subset of indices flagged `?element` (optional).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListExpr {
    pub elements: Vec<Expr>,
    /// A subset of `{0, .., elements.len()-1}`.
    pub optional_indices: Vec<i32>,
}

/// One `key: value` (or `?key: value`) entry of a `MAP` literal.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub id: ExprId,
    pub key: Expr,
    pub value: Expr,
    pub optional_entry: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapExpr {
    pub entries: Vec<MapEntry>,
}

/// One `field: value` (or `?field: value`) entry of a `STRUCT` literal.
#[derive(Debug, Clone, PartialEq)]
pub struct StructEntry {
    pub id: ExprId,
    pub field: String,
    pub value: Expr,
    pub optional_entry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructExpr {
    pub message_name: String,
    pub entries: Vec<StructEntry>,
}

/// A CEL comprehension: the general iterator construct macros like
/// `exists`, `all`, `map`, and `cel.bind` desugar to.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub iter_var: String,
    pub iter_var2: Option<String>,
    pub accu_var: String,
    pub iter_range: Expr,
    pub accu_init: Expr,
    pub loop_condition: Expr,
    pub loop_step: Expr,
    pub result: Expr,
}

/// The tagged variant over `Expr`'s nine kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    NotSet,
    Constant(Constant),
    Ident(String),
    Select(Select),
    Call(Call),
    List(ListExpr),
    Map(MapExpr),
    Struct(StructExpr),
    Comprehension(Box<Comprehension>),
}

impl ExprKind {
    /// A stable kind tag, e.g. for logging and for messages that want a
    /// name independent of `Debug` formatting.
    pub fn tag(&self) -> &'static str {
        match self {
            ExprKind::NotSet => "NOT_SET",
            ExprKind::Constant(_) => "CONSTANT",
            ExprKind::Ident(_) => "IDENT",
            ExprKind::Select(_) => "SELECT",
            ExprKind::Call(_) => "CALL",
            ExprKind::List(_) => "LIST",
            ExprKind::Map(_) => "MAP",
            ExprKind::Struct(_) => "STRUCT",
            ExprKind::Comprehension(_) => "COMPREHENSION",
        }
    }
}

/// A single AST node: an id plus kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(id: ExprId, kind: ExprKind) -> Self {
        Expr { id, kind }
    }

    pub fn not_set(id: ExprId) -> Self {
        Expr::new(id, ExprKind::NotSet)
    }

    pub fn constant(id: ExprId, c: Constant) -> Self {
        Expr::new(id, ExprKind::Constant(c))
    }

    pub fn ident(id: ExprId, name: impl Into<String>) -> Self {
        Expr::new(id, ExprKind::Ident(name.into()))
    }

    pub fn select(id: ExprId, operand: Expr, field: impl Into<String>, test_only: bool) -> Self {
        Expr::new(
            id,
            ExprKind::Select(Select {
                operand: Box::new(operand),
                field: field.into(),
                test_only,
            }),
        )
    }

    pub fn call(
        id: ExprId,
        target: Option<Expr>,
        function: impl Into<String>,
        args: Vec<Expr>,
    ) -> Self {
        Expr::new(
            id,
            ExprKind::Call(Call {
                target: target.map(Box::new),
                function: function.into(),
                args,
            }),
        )
    }

    pub fn list(id: ExprId, elements: Vec<Expr>, optional_indices: Vec<i32>) -> Self {
        Expr::new(
            id,
            ExprKind::List(ListExpr {
                elements,
                optional_indices,
            }),
        )
    }

    pub fn map(id: ExprId, entries: Vec<MapEntry>) -> Self {
        Expr::new(id, ExprKind::Map(MapExpr { entries }))
    }

    pub fn strukt(id: ExprId, message_name: impl Into<String>, entries: Vec<StructEntry>) -> Self {
        Expr::new(
            id,
            ExprKind::Struct(StructExpr {
                message_name: message_name.into(),
                entries,
            }),
        )
    }

    pub fn comprehension(id: ExprId, c: Comprehension) -> Self {
        Expr::new(id, ExprKind::Comprehension(Box::new(c)))
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            ExprKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bool_constant(&self) -> Option<bool> {
        match self.as_constant() {
            Some(Constant::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

impl TreeNode for Expr {
    fn apply_children<F>(&self, f: F) -> Result<TreeNodeRecursion>
    where
        F: FnMut(&Self) -> Result<TreeNodeRecursion>,
    {
        match &self.kind {
            ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => {
                Ok(TreeNodeRecursion::Continue)
            }
            ExprKind::Select(s) => [s.operand.as_ref()].into_iter().apply_until_stop(f),
            ExprKind::Call(c) => {
                let mut nodes: Vec<&Expr> = Vec::with_capacity(c.args.len() + 1);
                if let Some(t) = &c.target {
                    nodes.push(t);
                }
                nodes.extend(c.args.iter());
                nodes.into_iter().apply_until_stop(f)
            }
            ExprKind::List(l) => l.elements.iter().apply_until_stop(f),
            ExprKind::Map(m) => {
                let mut nodes = Vec::with_capacity(m.entries.len() * 2);
                for e in &m.entries {
                    nodes.push(&e.key);
                    nodes.push(&e.value);
                }
                nodes.into_iter().apply_until_stop(f)
            }
            ExprKind::Struct(s) => s.entries.iter().map(|e| &e.value).apply_until_stop(f),
            ExprKind::Comprehension(c) => [
                &c.iter_range,
                &c.accu_init,
                &c.loop_condition,
                &c.loop_step,
                &c.result,
            ]
            .into_iter()
            .apply_until_stop(f),
        }
    }

    fn map_children<F>(self, f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        let Expr { id, kind } = self;
        match kind {
            ExprKind::NotSet | ExprKind::Constant(_) | ExprKind::Ident(_) => {
                Ok(Transformed::no(Expr { id, kind }))
            }
            ExprKind::Select(s) => {
                let Select {
                    operand,
                    field,
                    test_only,
                } = s;
                vec![*operand]
                    .into_iter()
                    .map_until_stop_and_collect(f)?
                    .map_data(|mut v| {
                        let operand = Box::new(v.pop().unwrap());
                        Ok(Expr::new(
                            id,
                            ExprKind::Select(Select {
                                operand,
                                field,
                                test_only,
                            }),
                        ))
                    })
            }
            ExprKind::Call(c) => {
                let Call {
                    target,
                    function,
                    args,
                } = c;
                let has_target = target.is_some();
                let mut nodes = Vec::with_capacity(args.len() + 1);
                if let Some(t) = target {
                    nodes.push(*t);
                }
                nodes.extend(args);
                nodes
                    .into_iter()
                    .map_until_stop_and_collect(f)?
                    .map_data(|mut v| {
                        let new_target = if has_target {
                            Some(Box::new(v.remove(0)))
                        } else {
                            None
                        };
                        Ok(Expr::new(
                            id,
                            ExprKind::Call(Call {
                                target: new_target,
                                function,
                                args: v,
                            }),
                        ))
                    })
            }
            ExprKind::List(l) => {
                let ListExpr {
                    elements,
                    optional_indices,
                } = l;
                elements
                    .into_iter()
                    .map_until_stop_and_collect(f)?
                    .map_data(|elements| {
                        Ok(Expr::new(
                            id,
                            ExprKind::List(ListExpr {
                                elements,
                                optional_indices,
                            }),
                        ))
                    })
            }
            ExprKind::Map(m) => {
                let metas: Vec<(ExprId, bool)> =
                    m.entries.iter().map(|e| (e.id, e.optional_entry)).collect();
                let flat: Vec<Expr> = m
                    .entries
                    .into_iter()
                    .flat_map(|e| [e.key, e.value])
                    .collect();
                flat.into_iter()
                    .map_until_stop_and_collect(f)?
                    .map_data(|flat| {
                        let mut entries = Vec::with_capacity(metas.len());
                        let mut it = flat.into_iter();
                        for (entry_id, optional_entry) in metas {
                            let key = it.next().unwrap();
                            let value = it.next().unwrap();
                            entries.push(MapEntry {
                                id: entry_id,
                                key,
                                value,
                                optional_entry,
                            });
                        }
                        Ok(Expr::new(id, ExprKind::Map(MapExpr { entries })))
                    })
            }
            ExprKind::Struct(s) => {
                let StructExpr {
                    message_name,
                    entries,
                } = s;
                let metas: Vec<(ExprId, String, bool)> = entries
                    .iter()
                    .map(|e| (e.id, e.field.clone(), e.optional_entry))
                    .collect();
                let values: Vec<Expr> = entries.into_iter().map(|e| e.value).collect();
                values
                    .into_iter()
                    .map_until_stop_and_collect(f)?
                    .map_data(|values| {
                        let entries = metas
                            .into_iter()
                            .zip(values)
                            .map(|((entry_id, field, optional_entry), value)| StructEntry {
                                id: entry_id,
                                field,
                                value,
                                optional_entry,
                            })
                            .collect();
                        Ok(Expr::new(
                            id,
                            ExprKind::Struct(StructExpr {
                                message_name,
                                entries,
                            }),
                        ))
                    })
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
                vec![iter_range, accu_init, loop_condition, loop_step, result]
                    .into_iter()
                    .map_until_stop_and_collect(f)?
                    .map_data(|mut v| {
                        let result = v.pop().unwrap();
                        let loop_step = v.pop().unwrap();
                        let loop_condition = v.pop().unwrap();
                        let accu_init = v.pop().unwrap();
                        let iter_range = v.pop().unwrap();
                        Ok(Expr::new(
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
                        ))
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel_common::tree_node::TransformedResult;

    #[test]
    fn apply_children_visits_call_receiver_then_args() {
        let recv = Expr::ident(1, "x");
        let a0 = Expr::constant(2, Constant::Int(1));
        let a1 = Expr::constant(3, Constant::Int(2));
        let call = Expr::call(4, Some(recv), "f", vec![a0, a1]);

        let mut seen = Vec::new();
        call.apply_children(|c| {
            seen.push(c.id);
            Ok(TreeNodeRecursion::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn apply_children_visits_comprehension_in_spec_order() {
        let comp = Expr::comprehension(
            100,
            Comprehension {
                iter_var: "i".into(),
                iter_var2: None,
                accu_var: "__result__".into(),
                iter_range: Expr::ident(1, "range"),
                accu_init: Expr::constant(2, Constant::Bool(false)),
                loop_condition: Expr::constant(3, Constant::Bool(true)),
                loop_step: Expr::ident(4, "step"),
                result: Expr::ident(5, "__result__"),
            },
        );
        let mut seen = Vec::new();
        comp.apply_children(|c| {
            seen.push(c.id);
            Ok(TreeNodeRecursion::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn map_children_rebuilds_map_entries_key_before_value() {
        let entry = MapEntry {
            id: 10,
            key: Expr::constant(1, Constant::String("k".into())),
            value: Expr::constant(2, Constant::Int(1)),
            optional_entry: false,
        };
        let m = Expr::map(20, vec![entry]);
        let out = m
            .transform(|e| {
                if let ExprKind::Constant(Constant::Int(v)) = &e.kind {
                    let v = *v;
                    return Ok(Transformed::yes(Expr::constant(e.id, Constant::Int(v * 10))));
                }
                Ok(Transformed::no(e))
            })
            .data()
            .unwrap();
        match out.kind {
            ExprKind::Map(m) => {
                assert_eq!(m.entries.len(), 1);
                assert_eq!(m.entries[0].value.as_constant(), Some(&Constant::Int(10)));
            }
            _ => panic!("expected map"),
        }
    }
}
