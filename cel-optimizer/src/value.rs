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

//! The evaluator's result representation: a constant-representable value,
//! a container of such values, an *unknown* sentinel, or an evaluation
//! failure.

use cel_expr::Constant;

/// A folded value. Mirrors `Constant` for scalars and adds the
/// container/optional/unknown cases `Constant` can't express.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered to stay deterministic; CEL map key order is not
    /// observable but a stable order keeps folded output reproducible.
    Map(Vec<(Value, Value)>),
    Optional(Option<Box<Value>>),
    /// The evaluator could not determine a value (e.g. a free variable
    /// with no binding). Not an error: the caller skips the fold.
    Unknown,
}

impl Value {
    pub fn from_constant(c: &Constant) -> Self {
        match c {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Uint(u) => Value::Uint(*u),
            Constant::Double(d) => Value::Double(*d),
            Constant::String(s) => Value::Str(s.clone()),
            Constant::Bytes(b) => Value::Bytes(b.clone()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(
            self,
            Value::Int(0) | Value::Uint(0) | Value::Null
        ) || matches!(self, Value::Double(d) if *d == 0.0)
    }
}
