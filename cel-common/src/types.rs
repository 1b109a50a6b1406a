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

//! The CEL static type lattice.
//!
//! The type checker that produces this lattice is an external collaborator;
//! this enum is only as rich as the checked-AST's `id -> Type` map needs to
//! be so the optimizer can reason about it (type mangled comprehension
//! variables, type extracted CSE subexpressions, decide what a `Value` from
//! the evaluator adapter should look like).

use std::fmt;

/// A CEL type, as it would appear in a checked AST's `id -> Type` map.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Null,
    Bool,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Optional(Box<Type>),
    /// `google.protobuf.Any`/`dyn`-equivalent: unifies with anything.
    Dyn,
    /// A type-checker type parameter, e.g. the element type of an empty
    /// list literal before unification.
    TypeParam(String),
    /// The type of a type value itself, e.g. `type(1) == int`.
    TypeType(Box<Type>),
    Function {
        result: Box<Type>,
        args: Vec<Type>,
    },
    /// A named type with type parameters that isn't one of the built-ins
    /// above, e.g. `optional_type` before desugaring.
    Opaque {
        name: String,
        params: Vec<Type>,
    },
    /// A structured message type, resolved through a `TypeProvider`.
    MessageType(String),
    /// The checker failed to assign a type; distinct from `Dyn` so a
    /// re-type-check can detect and reject it.
    Error,
    /// The evaluator adapter's "not evaluable, unknown at fold time"
    /// sentinel lifted into the type domain.
    Unknown,
}

impl Type {
    pub fn list_of(elem: Type) -> Type {
        Type::List(Box::new(elem))
    }

    pub fn map_of(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    /// `Dyn` and `Error` unify with anything; otherwise two types must be
    /// structurally identical. This is intentionally much simpler than a
    /// real CEL checker's unifier — `cel-optimizer`'s re-type-checking only
    /// ever needs to confirm "does this extracted subexpression still have
    /// the type the original checker gave it", not general inference.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        matches!(self, Type::Dyn) || matches!(other, Type::Dyn) || self == other
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Null => write!(f, "null_type"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Uint => write!(f, "uint"),
            Type::Double => write!(f, "double"),
            Type::String => write!(f, "string"),
            Type::Bytes => write!(f, "bytes"),
            Type::List(elem) => write!(f, "list({elem})"),
            Type::Map(k, v) => write!(f, "map({k}, {v})"),
            Type::Optional(inner) => write!(f, "optional_type({inner})"),
            Type::Dyn => write!(f, "dyn"),
            Type::TypeParam(name) => write!(f, "{name}"),
            Type::TypeType(inner) => write!(f, "type({inner})"),
            Type::Function { result, args } => {
                write!(f, "(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ") -> {result}")
            }
            Type::Opaque { name, params } => {
                write!(f, "{name}")?;
                if !params.is_empty() {
                    write!(f, "<")?;
                    for (i, p) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{p}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::MessageType(name) => write!(f, "{name}"),
            Type::Error => write!(f, "<error>"),
            Type::Unknown => write!(f, "<unknown>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyn_unifies_with_anything() {
        assert!(Type::Dyn.is_assignable_from(&Type::Int));
        assert!(Type::Int.is_assignable_from(&Type::Dyn));
    }

    #[test]
    fn identical_types_are_assignable() {
        assert!(Type::list_of(Type::Int).is_assignable_from(&Type::list_of(Type::Int)));
    }

    #[test]
    fn mismatched_types_are_not_assignable() {
        assert!(!Type::Int.is_assignable_from(&Type::String));
    }
}
