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

//! Generic tree traversal and rewrite machinery.
//!
//! The navigator (`cel_expr::navigator`) and the mutator
//! (`cel_expr::mutator`) are both thin, domain-specific layers on top of this
//! module: they never walk an `Expr` tree by hand, they implement
//! [`TreeNode`] for `Expr` once (with a fixed per-kind child order) and get
//! `apply`/`transform` for free.

use crate::error::Result;

/// Controls how a traversal continues after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNodeRecursion {
    /// Continue the recursion into this node's children.
    Continue,
    /// Skip this node's children but continue with its siblings.
    Jump,
    /// Stop the entire traversal immediately.
    Stop,
}

/// The result of applying a rewrite to a single node: the (possibly new)
/// data, whether anything actually changed, and how the caller should keep
/// recursing.
#[derive(Debug, Clone)]
pub struct Transformed<T> {
    pub data: T,
    pub transformed: bool,
    pub tnr: TreeNodeRecursion,
}

impl<T> Transformed<T> {
    pub fn new(data: T, transformed: bool, tnr: TreeNodeRecursion) -> Self {
        Self {
            data,
            transformed,
            tnr,
        }
    }

    /// The node was rewritten; keep recursing into its (new) children.
    pub fn yes(data: T) -> Self {
        Self::new(data, true, TreeNodeRecursion::Continue)
    }

    /// The node was left untouched; keep recursing into its children.
    pub fn no(data: T) -> Self {
        Self::new(data, false, TreeNodeRecursion::Continue)
    }

    pub fn update_data<U>(self, f: impl FnOnce(T) -> U) -> Transformed<U> {
        Transformed::new(f(self.data), self.transformed, self.tnr)
    }

    pub fn map_data<U, F>(self, f: F) -> Result<Transformed<U>>
    where
        F: FnOnce(T) -> Result<U>,
    {
        Ok(Transformed::new(f(self.data)?, self.transformed, self.tnr))
    }
}

/// Unwraps a `Result<Transformed<T>>` down to `Result<T>`, discarding the
/// bookkeeping once a rewrite has finished.
pub trait TransformedResult<T> {
    fn data(self) -> Result<T>;
}

impl<T> TransformedResult<T> for Result<Transformed<T>> {
    fn data(self) -> Result<T> {
        self.map(|t| t.data)
    }
}

/// A type that can be walked and rewritten as a tree.
///
/// Implementors provide exactly two primitives — `apply_children` (visit,
/// read-only) and `map_children` (rewrite, owned) — and get pre-order
/// `apply`/`transform_down` traversal for free. The navigator needs both
/// pre-order and post-order traversal and layers both on top of `apply`.
pub trait TreeNode: Sized {
    /// Visits every direct child with `f`, stopping early if `f` returns
    /// [`TreeNodeRecursion::Stop`].
    fn apply_children<F>(&self, f: F) -> Result<TreeNodeRecursion>
    where
        F: FnMut(&Self) -> Result<TreeNodeRecursion>;

    /// Rewrites every direct child with `f` and rebuilds `self` from the
    /// results, combining each child's `transformed`/`tnr` into the result.
    fn map_children<F>(self, f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>;

    /// Pre-order, read-only traversal: visits `self`, then (unless told to
    /// jump past them) its children, recursively.
    fn apply<F>(&self, mut f: F) -> Result<TreeNodeRecursion>
    where
        F: FnMut(&Self) -> Result<TreeNodeRecursion>,
    {
        self.apply_with(&mut f)
    }

    fn apply_with<F>(&self, f: &mut F) -> Result<TreeNodeRecursion>
    where
        F: FnMut(&Self) -> Result<TreeNodeRecursion>,
    {
        match f(self)? {
            TreeNodeRecursion::Continue => self.apply_children(|c| c.apply_with(f)),
            TreeNodeRecursion::Jump => Ok(TreeNodeRecursion::Continue),
            TreeNodeRecursion::Stop => Ok(TreeNodeRecursion::Stop),
        }
    }

    /// Pre-order rewrite: `f` runs on `self` before its children. If `f`
    /// requests `Jump`, children are left untouched; if `Stop`, the whole
    /// traversal halts and no further node (including siblings already in
    /// flight) is visited.
    fn transform_down<F>(self, mut f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        self.transform_down_with(&mut f)
    }

    fn transform_down_with<F>(self, f: &mut F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        let after_self = f(self)?;
        match after_self.tnr {
            TreeNodeRecursion::Jump => Ok(Transformed::new(
                after_self.data,
                after_self.transformed,
                TreeNodeRecursion::Continue,
            )),
            TreeNodeRecursion::Stop => Ok(after_self),
            TreeNodeRecursion::Continue => {
                let self_transformed = after_self.transformed;
                let mapped = after_self
                    .data
                    .map_children(|c| c.transform_down_with(f))?;
                Ok(Transformed::new(
                    mapped.data,
                    self_transformed || mapped.transformed,
                    mapped.tnr,
                ))
            }
        }
    }

    /// Alias for [`TreeNode::transform_down`]; the core only ever needs
    /// pre-order rewrites, but the name documents intent at call sites the
    /// way the teacher's `Expr::transform` does.
    fn transform<F>(self, f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        self.transform_down(f)
    }
}

/// Iterator combinators used when a node's `apply_children`/`map_children`
/// is implemented in terms of "do this to each of my owned children".
pub trait TreeNodeIterator: Iterator {
    fn apply_until_stop<F>(self, f: F) -> Result<TreeNodeRecursion>
    where
        F: FnMut(Self::Item) -> Result<TreeNodeRecursion>;

    fn map_until_stop_and_collect<F>(self, f: F) -> Result<Transformed<Vec<Self::Item>>>
    where
        F: FnMut(Self::Item) -> Result<Transformed<Self::Item>>;
}

impl<I: Iterator> TreeNodeIterator for I {
    fn apply_until_stop<F>(self, mut f: F) -> Result<TreeNodeRecursion>
    where
        F: FnMut(Self::Item) -> Result<TreeNodeRecursion>,
    {
        for item in self {
            match f(item)? {
                TreeNodeRecursion::Continue => continue,
                TreeNodeRecursion::Jump => continue,
                TreeNodeRecursion::Stop => return Ok(TreeNodeRecursion::Stop),
            }
        }
        Ok(TreeNodeRecursion::Continue)
    }

    fn map_until_stop_and_collect<F>(self, mut f: F) -> Result<Transformed<Vec<Self::Item>>>
    where
        F: FnMut(Self::Item) -> Result<Transformed<Self::Item>>,
    {
        let mut transformed = false;
        let mut tnr = TreeNodeRecursion::Continue;
        let mut out = Vec::new();
        let mut stopped = false;
        for item in self {
            if stopped {
                out.push(item);
                continue;
            }
            let t = f(item)?;
            transformed |= t.transformed;
            tnr = t.tnr;
            if matches!(tnr, TreeNodeRecursion::Stop) {
                stopped = true;
            }
            out.push(t.data);
        }
        Ok(Transformed::new(out, transformed, tnr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal binary tree used to exercise the traversal combinators
    /// without pulling in `cel_expr::Expr`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum T {
        Leaf(i32),
        Node(Box<T>, Box<T>),
    }

    impl TreeNode for T {
        fn apply_children<F>(&self, f: F) -> Result<TreeNodeRecursion>
        where
            F: FnMut(&Self) -> Result<TreeNodeRecursion>,
        {
            match self {
                T::Leaf(_) => Ok(TreeNodeRecursion::Continue),
                T::Node(l, r) => [l.as_ref(), r.as_ref()].into_iter().apply_until_stop(f),
            }
        }

        fn map_children<F>(self, f: F) -> Result<Transformed<Self>>
        where
            F: FnMut(Self) -> Result<Transformed<Self>>,
        {
            match self {
                T::Leaf(_) => Ok(Transformed::no(self)),
                T::Node(l, r) => vec![*l, *r].into_iter().map_until_stop_and_collect(f)?.map_data(
                    |mut v| {
                        let r = v.pop().unwrap();
                        let l = v.pop().unwrap();
                        Ok(T::Node(Box::new(l), Box::new(r)))
                    },
                ),
            }
        }
    }

    #[test]
    fn apply_visits_pre_order() {
        let tree = T::Node(Box::new(T::Leaf(1)), Box::new(T::Leaf(2)));
        let mut seen = Vec::new();
        tree.apply(|n| {
            if let T::Leaf(v) = n {
                seen.push(*v);
            }
            Ok(TreeNodeRecursion::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn apply_stop_halts_traversal() {
        let tree = T::Node(
            Box::new(T::Leaf(1)),
            Box::new(T::Node(Box::new(T::Leaf(2)), Box::new(T::Leaf(3)))),
        );
        let mut seen = Vec::new();
        tree.apply(|n| {
            if let T::Leaf(v) = n {
                seen.push(*v);
                if *v == 2 {
                    return Ok(TreeNodeRecursion::Stop);
                }
            }
            Ok(TreeNodeRecursion::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn transform_rewrites_every_leaf() {
        let tree = T::Node(Box::new(T::Leaf(1)), Box::new(T::Leaf(2)));
        let out = tree
            .transform(|n| match n {
                T::Leaf(v) => Ok(Transformed::yes(T::Leaf(v * 10))),
                other => Ok(Transformed::no(other)),
            })
            .data()
            .unwrap();
        assert_eq!(
            out,
            T::Node(Box::new(T::Leaf(10)), Box::new(T::Leaf(20)))
        );
    }

    #[test]
    fn transform_jump_skips_children() {
        let tree = T::Node(Box::new(T::Leaf(1)), Box::new(T::Leaf(2)));
        let out = tree
            .transform(|n| match n {
                T::Node(..) => Ok(Transformed::new(n, false, TreeNodeRecursion::Jump)),
                other => Ok(Transformed::yes(other)),
            })
            .data()
            .unwrap();
        // Jump at the root means the leaves below it are never visited.
        assert_eq!(out, T::Node(Box::new(T::Leaf(1)), Box::new(T::Leaf(2))));
    }
}
