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

//! The lazy `Expr` navigator.
//!
//! A [`Navigator`] is a thin, cheap-to-clone view over an `Expr` and a
//! parent chain; it never re-implements tree walking itself, it drives
//! `Expr`'s `TreeNode::apply_children`, the same separation of "generic
//! traversal" from "domain child order" the teacher's
//! `datafusion/expr/src/tree_node/plan.rs` and
//! `datafusion/physical-expr/src/tree_node/physical_expr.rs` establish.

use std::rc::Rc;

use cel_common::tree_node::{TreeNode, TreeNodeRecursion};

use crate::expr::{Expr, ExprId};

/// Deterministic traversal order over an `Expr` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    PreOrder,
    PostOrder,
}

/// A lazy navigable view over one node of an `Expr` tree: its parent chain,
/// its depth from the navigator's construction root, and (computed on
/// demand) its children, descendants, and height.
#[derive(Clone)]
pub struct Navigator<'a> {
    expr: &'a Expr,
    parent: Option<Rc<Navigator<'a>>>,
    depth: usize,
}

impl<'a> Navigator<'a> {
    /// Builds a navigator rooted at `root`; `root.parent()` is `None` and
    /// `root.depth()` is `0`.
    pub fn new(root: &'a Expr) -> Self {
        Navigator {
            expr: root,
            parent: None,
            depth: 0,
        }
    }

    pub fn expr(&self) -> &'a Expr {
        self.expr
    }

    pub fn id(&self) -> ExprId {
        self.expr.id
    }

    pub fn kind(&self) -> &'static str {
        self.expr.tag()
    }

    /// Distance from the navigator's construction root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<Navigator<'a>> {
        self.parent.as_deref().cloned()
    }

    /// Direct children, in `Expr`'s per-kind declared order.
    pub fn children(&self) -> Vec<Navigator<'a>> {
        let self_rc = Rc::new(self.clone());
        let mut out = Vec::new();
        self.expr
            .apply_children(|c| {
                out.push(Navigator {
                    expr: c,
                    parent: Some(self_rc.clone()),
                    depth: self.depth + 1,
                });
                Ok(TreeNodeRecursion::Continue)
            })
            .expect("apply_children over a borrowed tree never fails");
        out
    }

    /// Strict descendants (not including `self`), pre-order.
    pub fn descendants(&self) -> Vec<Navigator<'a>> {
        let mut out = Vec::new();
        self.collect_pre_order(&mut out, false);
        out
    }

    /// `self` followed by its strict descendants, pre-order.
    pub fn all_nodes(&self) -> Vec<Navigator<'a>> {
        let mut out = Vec::new();
        self.collect_pre_order(&mut out, true);
        out
    }

    fn collect_pre_order(&self, out: &mut Vec<Navigator<'a>>, include_self: bool) {
        if include_self {
            out.push(self.clone());
        }
        for child in self.children() {
            out.push(child.clone());
            child.collect_pre_order(out, false);
        }
    }

    /// `self` followed by its strict descendants, post-order (children
    /// before the node that owns them).
    pub fn all_nodes_post_order(&self) -> Vec<Navigator<'a>> {
        let mut out = Vec::new();
        self.collect_post_order(&mut out);
        out
    }

    fn collect_post_order(&self, out: &mut Vec<Navigator<'a>>) {
        for child in self.children() {
            child.collect_post_order(out);
        }
        out.push(self.clone());
    }

    /// `self` and its descendants in the requested order.
    pub fn nodes_in_order(&self, order: Order) -> Vec<Navigator<'a>> {
        match order {
            Order::PreOrder => self.all_nodes(),
            Order::PostOrder => self.all_nodes_post_order(),
        }
    }

    /// Longest path to a leaf: `0` for a childless node.
    pub fn height(&self) -> usize {
        self.children()
            .iter()
            .map(|c| 1 + c.height())
            .max()
            .unwrap_or(0)
    }
}
