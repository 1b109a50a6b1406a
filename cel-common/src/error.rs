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

//! Error taxonomy for the optimization core.
//!
//! Callers need at least four kinds of failure to be distinguishable:
//! `VALIDATION_FAILURE`, `EVALUATION_FAILURE`, `INTERNAL_ERROR` and
//! `CONFIG_ERROR`. They are represented here as variants of a single
//! [`Error`] enum, the same shape `datafusion_common::DataFusionError` uses
//! rather than one error type per crate.

use std::fmt;

/// Result alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The four-kind error taxonomy shared by every pass in the workspace.
#[derive(Debug, Clone)]
pub enum Error {
    /// Re-type-checking an extracted or synthesized subtree failed.
    Validation(String),
    /// The evaluator raised an error while folding a subtree.
    Evaluation(String),
    /// Iteration limit exceeded, a mutator invariant was violated, a
    /// verification post-condition failed, or some other condition the
    /// caller cannot recover from was hit.
    Internal(String),
    /// The caller supplied invalid options: a negative limit, an empty
    /// iterable where a non-empty one was required, and so on.
    Config(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Error::Evaluation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// `EVALUATION_FAILURE` and `VALIDATION_FAILURE` encountered while
    /// folding are surfaced as `INTERNAL_ERROR` to the driver by default.
    pub fn into_internal(self) -> Self {
        match self {
            Error::Validation(msg) => {
                Error::Internal(format!("validation failure while folding: {msg}"))
            }
            Error::Evaluation(msg) => {
                Error::Internal(format!("evaluation failure while folding: {msg}"))
            }
            other => other,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_FAILURE",
            Error::Evaluation(_) => "EVALUATION_FAILURE",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation failure: {msg}"),
            Error::Evaluation(msg) => write!(f, "Evaluation failure: {msg}"),
            Error::Internal(msg) => write!(f, "Internal error: {msg}"),
            Error::Config(msg) => write!(f, "Config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Builds an `Err(Error::Internal(..))`, formatting arguments like `format!`.
#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::internal(format!($($arg)*)))
    };
}

/// Builds an `Err(Error::Config(..))`, formatting arguments like `format!`.
#[macro_export]
macro_rules! config_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::config(format!($($arg)*)))
    };
}

/// Builds an `Err(Error::Validation(..))`, formatting arguments like `format!`.
#[macro_export]
macro_rules! validation_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::validation(format!($($arg)*)))
    };
}

/// Builds an `Err(Error::Evaluation(..))`, formatting arguments like `format!`.
#[macro_export]
macro_rules! eval_err {
    ($($arg:tt)*) => {
        Err($crate::error::Error::evaluation(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_reports_taxonomy() {
        assert_eq!(Error::internal("x").kind(), "INTERNAL_ERROR");
        assert_eq!(Error::config("x").kind(), "CONFIG_ERROR");
        assert_eq!(Error::validation("x").kind(), "VALIDATION_FAILURE");
        assert_eq!(Error::evaluation("x").kind(), "EVALUATION_FAILURE");
    }

    #[test]
    fn validation_and_evaluation_surface_as_internal() {
        assert_eq!(
            Error::validation("bad type").into_internal().kind(),
            "INTERNAL_ERROR"
        );
        assert_eq!(
            Error::evaluation("boom").into_internal().kind(),
            "INTERNAL_ERROR"
        );
        // INTERNAL_ERROR and CONFIG_ERROR are passed through unchanged.
        assert_eq!(Error::internal("x").into_internal().kind(), "INTERNAL_ERROR");
        assert_eq!(Error::config("x").into_internal().kind(), "CONFIG_ERROR");
    }
}
