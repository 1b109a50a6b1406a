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

//! Cross-crate scenarios run through the full `OptimizerDriver` pipeline,
//! the way `datafusion-optimizer`'s `tests/integration-test.rs` exercises
//! its whole rule list against a `LogicalPlan` built from SQL rather than
//! unit-testing each rule in isolation.

use std::collections::HashMap;

use cel_expr::{CheckedAst, Constant, Expr, ExprId, ExprKind, Source};
use cel_optimizer::{
    ConstantFoldOptimizer, Env, ExprOptimizerRule, OptimizerConfig, OptimizerDriver,
    ReferenceEvaluator, StructuralTypeChecker, SubexpressionOptimizer,
};

fn ast_of(root: Expr) -> CheckedAst {
    CheckedAst::new(root, Source::default())
}

fn default_pipeline<'a>(
    evaluator: &'a ReferenceEvaluator,
    checker: &'a StructuralTypeChecker,
) -> OptimizerDriver<'a> {
    let rules: Vec<Box<dyn ExprOptimizerRule + 'a>> = vec![
        Box::new(ConstantFoldOptimizer::new(evaluator)),
        Box::new(SubexpressionOptimizer::new(checker)),
    ];
    OptimizerDriver::new(rules)
}

#[test]
fn branch_pruning_short_circuits_without_touching_the_other_side() {
    // true || (x > 0)
    let root = Expr::call(
        1,
        None,
        "_||_",
        vec![
            Expr::constant(2, Constant::Bool(true)),
            Expr::call(
                3,
                None,
                "_>_",
                vec![Expr::ident(4, "x"), Expr::constant(5, Constant::Int(0))],
            ),
        ],
    );
    let ast = ast_of(root);
    let evaluator = ReferenceEvaluator;
    let checker = StructuralTypeChecker;
    let driver = default_pipeline(&evaluator, &checker);

    let result = driver
        .optimize(&ast, &OptimizerConfig::default(), &Env::new())
        .unwrap();
    assert_eq!(result.ast.root.as_bool_constant(), Some(true));
}

// m.c.t[x]
fn index_expr(base: ExprId) -> Expr {
    let m = Expr::ident(base, "m");
    let c = Expr::select(base + 1, m, "c", false);
    let t = Expr::select(base + 2, c, "t", false);
    let x = Expr::ident(base + 3, "x");
    Expr::call(base + 4, None, "_[_]", vec![t, x])
}

#[test]
fn cse_flat_block_factors_out_the_shared_index_expression() {
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

    let evaluator = ReferenceEvaluator;
    let checker = StructuralTypeChecker;
    let driver = default_pipeline(&evaluator, &checker);

    let result = driver
        .optimize(&ast, &OptimizerConfig::default(), &Env::new())
        .unwrap();

    let ExprKind::Call(block_call) = &result.ast.root.kind else {
        panic!("expected cel.@block root");
    };
    assert_eq!(block_call.function, "cel.@block");
    let ExprKind::List(subexprs) = &block_call.args[0].kind else {
        panic!("expected subexpression list");
    };
    assert_eq!(subexprs.elements.len(), 1);
    assert!(result.ast.source.has_extension("cel_block"));
    assert_eq!(result.added_variable_decls.len(), 1);
    assert_eq!(result.added_variable_decls[0].0, "@index0");
}

#[test]
fn cse_does_not_hoist_across_comprehension_boundaries() {
    // [1, 2].exists(i, i > 0 && [3, 4].exists(j, i > 0 && j > 0))
    //
    // Desugared directly (rather than via the `exists` macro's own
    // comprehension-building helper, which this crate doesn't implement):
    // both `i > 0` occurrences inside the inner comprehension's result
    // reference `i`, an outer-comprehension variable, so they must never
    // be extracted above the inner comprehension; the conservative
    // eligibility rule this crate implements also keeps them from being
    // extracted above the *outer* comprehension, since they still
    // reference its mangled iteration variable.
    let inner_exists = |iter_id: ExprId| {
        Expr::comprehension(
            iter_id,
            cel_expr::Comprehension {
                iter_var: "j".into(),
                iter_var2: None,
                accu_var: "__inner__".into(),
                iter_range: Expr::list(
                    iter_id + 1,
                    vec![
                        Expr::constant(iter_id + 2, Constant::Int(3)),
                        Expr::constant(iter_id + 3, Constant::Int(4)),
                    ],
                    vec![],
                ),
                accu_init: Expr::constant(iter_id + 4, Constant::Bool(false)),
                loop_condition: Expr::call(
                    iter_id + 5,
                    None,
                    "_!_",
                    vec![Expr::ident(iter_id + 6, "__inner__")],
                ),
                loop_step: Expr::call(
                    iter_id + 7,
                    None,
                    "_&&_",
                    vec![
                        Expr::call(
                            iter_id + 8,
                            None,
                            "_>_",
                            vec![Expr::ident(iter_id + 9, "i"), Expr::constant(iter_id + 10, Constant::Int(0))],
                        ),
                        Expr::call(
                            iter_id + 11,
                            None,
                            "_>_",
                            vec![Expr::ident(iter_id + 12, "j"), Expr::constant(iter_id + 13, Constant::Int(0))],
                        ),
                    ],
                ),
                result: Expr::ident(iter_id + 14, "__inner__"),
            },
        )
    };

    let outer = Expr::comprehension(
        1,
        cel_expr::Comprehension {
            iter_var: "i".into(),
            iter_var2: None,
            accu_var: "__outer__".into(),
            iter_range: Expr::list(
                2,
                vec![
                    Expr::constant(3, Constant::Int(1)),
                    Expr::constant(4, Constant::Int(2)),
                ],
                vec![],
            ),
            accu_init: Expr::constant(5, Constant::Bool(false)),
            loop_condition: Expr::call(6, None, "_!_", vec![Expr::ident(7, "__outer__")]),
            loop_step: Expr::call(8, None, "_&&_", vec![
                Expr::call(9, None, "_>_", vec![Expr::ident(10, "i"), Expr::constant(11, Constant::Int(0))]),
                inner_exists(100),
            ]),
            result: Expr::ident(200, "__outer__"),
        },
    );

    let ast = ast_of(outer);
    let evaluator = ReferenceEvaluator;
    let checker = StructuralTypeChecker;
    let driver = default_pipeline(&evaluator, &checker);

    let result = driver
        .optimize(&ast, &OptimizerConfig::default(), &Env::new())
        .unwrap();

    // Constant folding cannot touch an `i`/`j`-dependent comparison, and
    // CSE must find no extractable duplicate since both `i > 0` nodes each
    // sit inside a scope their free variables can't escape: the root stays
    // a comprehension, never a `cel.@block` call.
    assert!(matches!(result.ast.root.kind, ExprKind::Comprehension(_)));
}

#[test]
fn pipeline_accumulates_declarations_for_downstream_consumers() {
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

    let evaluator = ReferenceEvaluator;
    let checker = StructuralTypeChecker;
    let driver = default_pipeline(&evaluator, &checker);

    let mut base_env: Env = HashMap::new();
    base_env.insert("m".to_string(), cel_common::types::Type::Dyn);
    base_env.insert("x".to_string(), cel_common::types::Type::Int);

    let result = driver
        .optimize(&ast, &OptimizerConfig::default(), &base_env)
        .unwrap();

    assert!(!result.added_variable_decls.is_empty());
    assert!(result.ast.is_checked());
}
