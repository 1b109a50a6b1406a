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

//! The optimizer driver: runs a fixed sequence of
//! [`ExprOptimizerRule`]s over a `CheckedAst`, threading a shared
//! environment so that a rule's new variable declarations (e.g. CSE's
//! `@index<K>` bindings) are visible to every later rule, and
//! re-type-checking the whole tree whenever a rule declares anything new
//! so `CheckedAst::type_map` never goes stale. Mirrors the shape of the
//! teacher's `datafusion_optimizer::Optimizer::optimize`, which likewise
//! runs a rule list to a per-rule fixed point and re-validates the plan
//! schema after each pass.

use std::collections::HashMap;

use cel_common::error::Result;
use cel_common::internal_err;
use cel_common::types::Type;
use cel_expr::CheckedAst;

use crate::config::OptimizerConfig;
use crate::rule::{ExprOptimizerRule, RuleOutcome};
use crate::type_checker::{annotate_tree, Env};

/// What the driver produced: the final AST plus the accumulated set of
/// variable/function declarations any rule introduced along the way,
/// matching `RuleOutcome`'s per-rule shape but aggregated over the whole
/// pipeline.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub ast: CheckedAst,
    pub added_variable_decls: Vec<(String, Type)>,
    pub added_function_decls: Vec<String>,
}

/// Runs each rule in registration order, in a single pass, over the AST
/// that the previous rule left behind. A rule that reports new
/// declarations gets its declarations folded into the environment
/// immediately, so later rules in the same pass see them. Chaining the
/// whole pipeline to a fixed point is left out of scope for this driver;
/// each individual rule still iterates itself to its own fixed point
/// internally.
pub struct OptimizerDriver<'a> {
    rules: Vec<Box<dyn ExprOptimizerRule + 'a>>,
}

impl<'a> OptimizerDriver<'a> {
    pub fn new(rules: Vec<Box<dyn ExprOptimizerRule + 'a>>) -> Self {
        OptimizerDriver { rules }
    }

    pub fn optimize(
        &self,
        ast: &CheckedAst,
        config: &OptimizerConfig,
        base_env: &Env,
    ) -> Result<OptimizationResult> {
        config.validate()?;

        let mut current = ast.clone();
        let mut env = base_env.clone();
        let mut added_variable_decls = Vec::new();
        let mut added_function_decls = Vec::new();

        for rule in &self.rules {
            log::trace!("optimizer driver: applying rule '{}'", rule.name());
            match rule.try_optimize(&current, config)? {
                None => {
                    log::trace!("optimizer driver: rule '{}' made no change", rule.name());
                    continue;
                }
                Some(RuleOutcome {
                    ast: new_ast,
                    added_variable_decls: decls,
                    added_function_decls: funcs,
                }) => {
                    log::debug!(
                        "optimizer driver: rule '{}' fired, {} new variable decl(s)",
                        rule.name(),
                        decls.len()
                    );
                    current = new_ast;

                    if !decls.is_empty() || !funcs.is_empty() {
                        for (name, ty) in &decls {
                            env.insert(name.clone(), ty.clone());
                        }
                        current.type_map = annotate_tree(&current.root, &env);
                        if !current.is_checked() {
                            return internal_err!(
                                "optimizer driver post-condition violated: rule '{}' produced an \
                                 AST with an empty type map after re-annotation",
                                rule.name()
                            );
                        }
                    }

                    added_variable_decls.extend(decls);
                    added_function_decls.extend(funcs);
                }
            }
        }

        Ok(OptimizationResult {
            ast: current,
            added_variable_decls,
            added_function_decls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant_fold::ConstantFoldOptimizer;
    use crate::cse::SubexpressionOptimizer;
    use crate::evaluator::ReferenceEvaluator;
    use crate::type_checker::StructuralTypeChecker;
    use cel_expr::{Constant, Expr, ExprKind, Source};

    #[ctor::ctor]
    fn init() {
        let _ = env_logger::try_init();
    }

    fn ast_of(root: Expr) -> CheckedAst {
        CheckedAst::new(root, Source::default())
    }

    #[test]
    fn pipeline_folds_then_eliminates_common_subexpressions() {
        // (1 + 1 == 2) && (1 + 1 == 2)
        let side = |base: cel_expr::ExprId| {
            Expr::call(
                base,
                None,
                "_==_",
                vec![
                    Expr::call(
                        base + 1,
                        None,
                        "_+_",
                        vec![
                            Expr::constant(base + 2, Constant::Int(1)),
                            Expr::constant(base + 3, Constant::Int(1)),
                        ],
                    ),
                    Expr::constant(base + 4, Constant::Int(2)),
                ],
            )
        };
        let root = Expr::call(100, None, "_&&_", vec![side(1), side(10)]);
        let ast = ast_of(root);

        let evaluator = ReferenceEvaluator;
        let checker = StructuralTypeChecker;
        let fold = ConstantFoldOptimizer::new(&evaluator);
        let cse = SubexpressionOptimizer::new(&checker);
        let driver = OptimizerDriver::new(vec![Box::new(fold), Box::new(cse)]);

        let result = driver
            .optimize(&ast, &OptimizerConfig::default(), &Env::new())
            .unwrap();

        match &result.ast.root.kind {
            ExprKind::Constant(Constant::Bool(true)) => {}
            other => panic!("expected constant folding to collapse to `true`, got {other:?}"),
        }
    }

    #[test]
    fn no_rules_returns_ast_unchanged() {
        let ast = ast_of(Expr::constant(1, Constant::Int(1)));
        let driver: OptimizerDriver = OptimizerDriver::new(Vec::new());
        let result = driver
            .optimize(&ast, &OptimizerConfig::default(), &Env::new())
            .unwrap();
        assert_eq!(result.ast.root, ast.root);
        assert!(result.added_variable_decls.is_empty());
    }
}
