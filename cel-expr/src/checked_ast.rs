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

//! The checked AST: `(root Expr, Source, id -> Type map, id -> Reference
//! map)`.

use std::collections::HashMap;

use cel_common::types::Type;

use crate::expr::{Constant, Expr, ExprId};
use crate::source::Source;

/// Either a constant value (an enum literal resolved at check time) or an
/// ordered list of candidate overload ids a `CALL`/`SELECT` node might
/// resolve to.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Value(Constant),
    OverloadIds(Vec<String>),
}

/// A parsed-and-checked CEL expression: the root node, its source-info
/// sidecar, and the checker's per-id type and reference annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedAst {
    pub root: Expr,
    pub source: Source,
    pub type_map: HashMap<ExprId, Type>,
    pub reference_map: HashMap<ExprId, Reference>,
}

impl CheckedAst {
    pub fn new(root: Expr, source: Source) -> Self {
        CheckedAst {
            root,
            source,
            type_map: HashMap::new(),
            reference_map: HashMap::new(),
        }
    }

    /// An AST is checked iff its type map is non-empty.
    pub fn is_checked(&self) -> bool {
        !self.type_map.is_empty()
    }

    pub fn type_of(&self, id: ExprId) -> Option<&Type> {
        self.type_map.get(&id)
    }

    pub fn reference_of(&self, id: ExprId) -> Option<&Reference> {
        self.reference_map.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Constant;

    #[test]
    fn unchecked_ast_has_empty_type_map() {
        let ast = CheckedAst::new(Expr::constant(1, Constant::Bool(true)), Source::default());
        assert!(!ast.is_checked());
    }

    #[test]
    fn checked_ast_reports_checked_once_typed() {
        let mut ast = CheckedAst::new(Expr::constant(1, Constant::Bool(true)), Source::default());
        ast.type_map.insert(1, Type::Bool);
        assert!(ast.is_checked());
        assert_eq!(ast.type_of(1), Some(&Type::Bool));
    }
}
