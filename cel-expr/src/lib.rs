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

//! The CEL checked-AST data model: `Expr`, `Source`, `CheckedAst`, the
//! lazy `Navigator`, and the pure-rewrite `mutator` operations.

pub mod checked_ast;
pub mod expr;
pub mod mutator;
pub mod navigator;
pub mod source;

pub use checked_ast::{CheckedAst, Reference};
pub use expr::{
    Call, Comprehension, Constant, Expr, ExprId, ExprKind, ListExpr, MapEntry, MapExpr, Select,
    StructEntry, StructExpr,
};
pub use navigator::{Navigator, Order};
pub use source::{Component, Extension, Source};
