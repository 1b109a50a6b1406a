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

//! Configuration shared by both optimizer passes: fixed-point iteration
//! bounds, the foldable/eliminable function sets (explicit configuration,
//! never inferred from the environment), and the block-vs-bind-macro
//! output form.

use std::collections::HashSet;

use cel_common::error::{Error, Result};

/// The CEL standard operators and library functions safe to fold or
/// eliminate by default. Callers extending the environment with custom
/// functions must opt them in explicitly.
pub fn standard_functions() -> HashSet<String> {
    [
        "_&&_", "_||_", "_?_:_", "_in_", "_==_", "_!=_", "_<_", "_<=_", "_>_", "_>=_", "_+_",
        "_-_", "_*_", "_/_", "_%_", "_!_", "-_", "size", "startsWith", "endsWith", "contains",
        "matches", "_[_]", "optional.of", "optional.none", "optional.ofNonZeroValue",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Constant folding's fixed-point iteration bound.
    pub max_fold_iterations: usize,
    /// CSE's fixed-point iteration bound.
    pub max_cse_iterations: usize,
    /// Restricts extraction to nodes whose height is within this bound;
    /// `None` means unrestricted.
    pub max_recursion_depth: Option<usize>,
    /// Functions the constant folder may fold through.
    pub foldable_functions: HashSet<String>,
    /// Functions CSE may extract through.
    pub eliminable_functions: HashSet<String>,
    /// Emit a flat `cel.@block` (true, default) or nested `cel.bind`
    /// macros (false) for the retained compatibility path.
    pub enable_cel_block: bool,
    /// Whether `EVALUATION_FAILURE`/`VALIDATION_FAILURE` while folding
    /// are swallowed (skip the subtree) instead of propagated.
    pub ignore_foldable_failures: bool,
    pub iter_var_prefix: String,
    pub iter_var2_prefix: String,
    pub accu_var_prefix: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_fold_iterations: 400,
            max_cse_iterations: 500,
            max_recursion_depth: None,
            foldable_functions: standard_functions(),
            eliminable_functions: standard_functions(),
            enable_cel_block: true,
            ignore_foldable_failures: false,
            iter_var_prefix: "@it".to_string(),
            iter_var2_prefix: "@it2".to_string(),
            accu_var_prefix: "@ac".to_string(),
        }
    }
}

impl OptimizerConfig {
    /// Returns `CONFIG_ERROR` for negative limits or an empty iterable
    /// where a non-empty one is required.
    pub fn validate(&self) -> Result<()> {
        if self.max_fold_iterations == 0 {
            return Err(Error::config("max_fold_iterations must be positive"));
        }
        if self.max_cse_iterations == 0 {
            return Err(Error::config("max_cse_iterations must be positive"));
        }
        if self.foldable_functions.is_empty() {
            return Err(Error::config("foldable_functions must be non-empty"));
        }
        if self.eliminable_functions.is_empty() {
            return Err(Error::config("eliminable_functions must be non-empty"));
        }
        Ok(())
    }
}
