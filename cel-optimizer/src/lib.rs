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

//! Two optimizer passes over a checked CEL AST — constant folding and
//! common-subexpression elimination — plus the collaborators they share:
//! an evaluator adapter, a structural type checker, and a driver that
//! chains passes while threading a shared environment.

pub mod config;
pub mod constant_fold;
pub mod cse;
pub mod driver;
pub mod evaluator;
pub mod rule;
pub mod type_checker;
pub mod value;

pub use config::OptimizerConfig;
pub use constant_fold::ConstantFoldOptimizer;
pub use cse::SubexpressionOptimizer;
pub use driver::{OptimizationResult, OptimizerDriver};
pub use evaluator::{EvaluatorAdapter, Program, ProgramFactory, ReferenceEvaluator};
pub use rule::{ApplyOrder, ExprOptimizerRule, RuleOutcome};
pub use type_checker::{annotate_tree, Env, StructuralTypeChecker, TypeChecker};
pub use value::Value;
