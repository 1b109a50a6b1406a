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

//! `Source`: the sidecar that travels alongside an `Expr` tree, carrying
//! original text, id-keyed provenance, and extension tags.

use std::collections::{HashMap, HashSet};

use crate::expr::{Expr, ExprId};

/// Which CEL component requires an [`Extension`] to process an AST
/// correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Unspecified,
    Parser,
    TypeChecker,
    Runtime,
}

/// A marker attached to [`Source`] announcing that processing this AST
/// needs support for a CEL feature beyond the baseline language, e.g.
/// `cel.@block`.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub id: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub component: Component,
}

impl Extension {
    /// The extension tag required when an AST's root is a `cel.@block`
    /// call: `(id="cel_block", version=1.1, component=RUNTIME)`.
    pub fn cel_block() -> Self {
        Extension {
            id: "cel_block".to_string(),
            version_major: 1,
            version_minor: 1,
            component: Component::Runtime,
        }
    }
}

/// The source-info sidecar of a checked AST: original content, per-line
/// start offsets, an `id -> byte-offset` map, an `id -> macro-call-Expr`
/// map, and an extension tag set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Source {
    pub content: String,
    /// Byte offset of the start of each line; `line_offsets[0] == 0`.
    pub line_offsets: Vec<u32>,
    /// `id -> byte-offset` of the start of the expression with that id.
    pub positions: HashMap<ExprId, u32>,
    /// `id -> Expr` recording which nodes originated from macro expansion
    /// (`has`, `exists`, `cel.bind`, ...), keyed by the id of the call-shaped
    /// subexpression the macro was originally written as.
    pub macro_calls: HashMap<ExprId, Expr>,
    pub extensions: Vec<Extension>,
}

impl Source {
    pub fn from_content(content: impl Into<String>) -> Self {
        let content = content.into();
        let mut line_offsets = vec![0u32];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_offsets.push((i + 1) as u32);
            }
        }
        Source {
            content,
            line_offsets,
            positions: HashMap::new(),
            macro_calls: HashMap::new(),
            extensions: Vec::new(),
        }
    }

    pub fn has_extension(&self, id: &str) -> bool {
        self.extensions.iter().any(|e| e.id == id)
    }

    pub fn add_extension_once(&mut self, ext: Extension) {
        if !self.has_extension(&ext.id) {
            self.extensions.push(ext);
        }
    }

    /// Drops every `positions`/`macro_calls` entry keyed by an id that no
    /// longer appears in the tree. Used by the mutator after any rewrite
    /// that removes nodes, so the id-keyed sidecars never dangle.
    pub fn retain_ids(&mut self, live_ids: &HashSet<ExprId>) {
        self.positions.retain(|id, _| live_ids.contains(id));
        self.macro_calls.retain(|id, _| live_ids.contains(id));
    }

    /// Rekeys `positions`/`macro_calls` entries through `remap`, dropping
    /// any entry whose id has no mapping. Used by
    /// `renumberIdsConsecutively`.
    pub fn remap_ids(&mut self, remap: &HashMap<ExprId, ExprId>) {
        self.positions = self
            .positions
            .drain()
            .filter_map(|(id, pos)| remap.get(&id).map(|new_id| (*new_id, pos)))
            .collect();
        self.macro_calls = self
            .macro_calls
            .drain()
            .filter_map(|(id, expr)| remap.get(&id).map(|new_id| (*new_id, expr)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_offsets_track_newlines() {
        let s = Source::from_content("a\nbc\nd");
        assert_eq!(s.line_offsets, vec![0, 2, 5]);
    }

    #[test]
    fn retain_ids_drops_removed_sidecars() {
        let mut s = Source::from_content("x");
        s.positions.insert(1, 0);
        s.positions.insert(2, 1);
        let mut live = HashSet::new();
        live.insert(1);
        s.retain_ids(&live);
        assert_eq!(s.positions.len(), 1);
        assert!(s.positions.contains_key(&1));
    }

    #[test]
    fn add_extension_once_is_idempotent() {
        let mut s = Source::default();
        s.add_extension_once(Extension::cel_block());
        s.add_extension_once(Extension::cel_block());
        assert_eq!(s.extensions.len(), 1);
    }
}
