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

//! `ExprOptimizerRule`: the shape every pass in this crate implements,
//! the same `try_optimize`/`name`/`apply_order` triad the teacher's
//! `datafusion_optimizer::OptimizerRule` exposes for rewriting a
//! `LogicalPlan`, specialized to rewriting a `CheckedAst`.

use cel_common::error::Result;
use cel_common::types::Type;
use cel_expr::CheckedAst;

use crate::config::OptimizerConfig;

/// Traversal order a rule prefers, mirroring the teacher's
/// `datafusion_optimizer::ApplyOrder`. Informational only in this crate:
/// every rule here manages its own fixed-point loop rather than being
/// driven top-down/bottom-up by a shared walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrder {
    TopDown,
    BottomUp,
}

/// A rule's result when it fires: the rewritten AST plus any new
/// variable/function declarations the caller's environment must learn
/// about before the next pass or before handing the AST back.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub ast: CheckedAst,
    pub added_variable_decls: Vec<(String, Type)>,
    pub added_function_decls: Vec<String>,
}

impl RuleOutcome {
    pub fn unchanged(ast: CheckedAst) -> Self {
        RuleOutcome {
            ast,
            added_variable_decls: Vec::new(),
            added_function_decls: Vec::new(),
        }
    }
}

pub trait ExprOptimizerRule {
    /// Returns `Ok(None)` when the rule made no change, `Ok(Some(..))`
    /// with the rewritten AST and any new declarations when it fired,
    /// and `Err` on `INTERNAL_ERROR`/`VALIDATION_FAILURE`/etc.
    fn try_optimize(
        &self,
        ast: &CheckedAst,
        config: &OptimizerConfig,
    ) -> Result<Option<RuleOutcome>>;

    fn name(&self) -> &str;

    fn apply_order(&self) -> Option<ApplyOrder> {
        None
    }
}
