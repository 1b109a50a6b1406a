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

//! The type-checker collaborator consumed alongside the evaluator:
//! re-type-checking an extracted or synthesized subtree in an environment
//! extended with new variable declarations, used by the
//! subexpression optimizer's finishing phase ("type-check the Kth
//! extracted subexpression in the original environment") and by the
//! mutator-adjacent verification that a rewrite didn't silently change
//! the AST's type. [`StructuralTypeChecker`] is a minimal, non-exhaustive
//! implementation — `matches`/custom functions and message-typed structs
//! fall back to `Dyn` rather than consulting a real proto descriptor
//! pool or function registry.

use std::collections::HashMap;

use cel_common::error::Result;
use cel_common::types::Type;
use cel_expr::{CheckedAst, Constant, Expr, ExprKind};

/// An environment extension: variable declarations visible in addition
/// to whatever the original `CheckedAst::type_map` already recorded.
pub type Env = HashMap<String, Type>;

pub trait TypeChecker {
    /// Infers the type of `expr` given the original checked AST (for
    /// already-resolved sibling ids) and an environment extension.
    fn check(&self, expr: &Expr, ast: &CheckedAst, env: &Env) -> Result<Type>;
}

/// Structural-only type inference: walks the expression bottom-up
/// without a function-overload registry or message descriptor pool.
/// Good enough to confirm "did this rewrite change the type" for the
/// standard operators and container literals the optimizer itself
/// introduces or touches.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralTypeChecker;

impl TypeChecker for StructuralTypeChecker {
    fn check(&self, expr: &Expr, ast: &CheckedAst, env: &Env) -> Result<Type> {
        if let Some(t) = ast.type_of(expr.id) {
            return Ok(t.clone());
        }
        infer(expr, ast, env)
    }
}

fn infer(expr: &Expr, ast: &CheckedAst, env: &Env) -> Result<Type> {
    match &expr.kind {
        ExprKind::NotSet => Ok(Type::Dyn),
        ExprKind::Constant(c) => Ok(constant_type(c)),
        ExprKind::Ident(name) => Ok(env.get(name).cloned().unwrap_or(Type::Dyn)),
        ExprKind::Select(s) => {
            if s.test_only {
                Ok(Type::Bool)
            } else {
                infer(&s.operand, ast, env)?;
                Ok(Type::Dyn)
            }
        }
        ExprKind::Call(c) => infer_call(&c.function, &c.args, ast, env),
        ExprKind::List(l) => {
            let mut elem = None;
            for e in &l.elements {
                let t = infer(e, ast, env)?;
                elem = Some(match elem {
                    None => t,
                    Some(prev) if prev == t => prev,
                    Some(_) => Type::Dyn,
                });
            }
            Ok(Type::List(Box::new(elem.unwrap_or(Type::Dyn))))
        }
        ExprKind::Map(m) => {
            let mut key = None;
            let mut value = None;
            for e in &m.entries {
                let kt = infer(&e.key, ast, env)?;
                let vt = infer(&e.value, ast, env)?;
                key = Some(match key {
                    None => kt,
                    Some(prev) if prev == kt => prev,
                    Some(_) => Type::Dyn,
                });
                value = Some(match value {
                    None => vt,
                    Some(prev) if prev == vt => prev,
                    Some(_) => Type::Dyn,
                });
            }
            Ok(Type::Map(
                Box::new(key.unwrap_or(Type::Dyn)),
                Box::new(value.unwrap_or(Type::Dyn)),
            ))
        }
        ExprKind::Struct(s) => {
            for e in &s.entries {
                infer(&e.value, ast, env)?;
            }
            Ok(Type::MessageType(s.message_name.clone()))
        }
        ExprKind::Comprehension(c) => {
            infer(&c.iter_range, ast, env)?;
            let mut inner = env.clone();
            inner.insert(c.iter_var.clone(), Type::Dyn);
            if let Some(v2) = &c.iter_var2 {
                inner.insert(v2.clone(), Type::Dyn);
            }
            let accu_ty = infer(&c.accu_init, ast, env)?;
            inner.insert(c.accu_var.clone(), accu_ty);
            infer(&c.loop_condition, ast, &inner)?;
            infer(&c.loop_step, ast, &inner)?;
            infer(&c.result, ast, &inner)
        }
    }
}

/// Full per-node type map for `expr` under `env`, used by the optimizer
/// driver to rebuild `CheckedAst::type_map` after a rule introduces new
/// variable declarations. Unlike [`infer`], which only
/// returns the root's type, this records every subexpression's inferred
/// type as it recurses.
pub fn annotate_tree(expr: &Expr, env: &Env) -> HashMap<cel_expr::ExprId, Type> {
    let mut out = HashMap::new();
    annotate(expr, env, &mut out);
    out
}

fn annotate(expr: &Expr, env: &Env, out: &mut HashMap<cel_expr::ExprId, Type>) -> Type {
    let ty = match &expr.kind {
        ExprKind::NotSet => Type::Dyn,
        ExprKind::Constant(c) => constant_type(c),
        ExprKind::Ident(name) => env.get(name).cloned().unwrap_or(Type::Dyn),
        ExprKind::Select(s) => {
            annotate(&s.operand, env, out);
            if s.test_only {
                Type::Bool
            } else {
                Type::Dyn
            }
        }
        ExprKind::Call(c) => {
            if let Some(t) = &c.target {
                annotate(t, env, out);
            }
            call_result_type(&c.function, &c.args, env, out)
        }
        ExprKind::List(l) => {
            let mut elem = None;
            for e in &l.elements {
                let t = annotate(e, env, out);
                elem = Some(match elem {
                    None => t,
                    Some(prev) if prev == t => prev,
                    Some(_) => Type::Dyn,
                });
            }
            Type::List(Box::new(elem.unwrap_or(Type::Dyn)))
        }
        ExprKind::Map(m) => {
            let mut key = None;
            let mut value = None;
            for e in &m.entries {
                let kt = annotate(&e.key, env, out);
                let vt = annotate(&e.value, env, out);
                key = Some(match key {
                    None => kt,
                    Some(prev) if prev == kt => prev,
                    Some(_) => Type::Dyn,
                });
                value = Some(match value {
                    None => vt,
                    Some(prev) if prev == vt => prev,
                    Some(_) => Type::Dyn,
                });
            }
            Type::Map(Box::new(key.unwrap_or(Type::Dyn)), Box::new(value.unwrap_or(Type::Dyn)))
        }
        ExprKind::Struct(s) => {
            for e in &s.entries {
                annotate(&e.value, env, out);
            }
            Type::MessageType(s.message_name.clone())
        }
        ExprKind::Comprehension(c) => {
            annotate(&c.iter_range, env, out);
            let mut inner = env.clone();
            inner.insert(c.iter_var.clone(), Type::Dyn);
            if let Some(v2) = &c.iter_var2 {
                inner.insert(v2.clone(), Type::Dyn);
            }
            let accu_ty = annotate(&c.accu_init, env, out);
            inner.insert(c.accu_var.clone(), accu_ty);
            annotate(&c.loop_condition, &inner, out);
            annotate(&c.loop_step, &inner, out);
            annotate(&c.result, &inner, out)
        }
    };
    out.insert(expr.id, ty.clone());
    ty
}

fn call_result_type(
    function: &str,
    args: &[Expr],
    env: &Env,
    out: &mut HashMap<cel_expr::ExprId, Type>,
) -> Type {
    for a in args {
        annotate(a, env, out);
    }
    match function {
        "_==_" | "_!=_" | "_<_" | "_<=_" | "_>_" | "_>=_" | "_&&_" | "_||_" | "_!_" | "_in_"
        | "startsWith" | "endsWith" | "contains" | "matches" => Type::Bool,
        "size" => Type::Int,
        "_?_:_" => {
            let then_ty = out.get(&args[1].id).cloned().unwrap_or(Type::Dyn);
            let else_ty = out.get(&args[2].id).cloned().unwrap_or(Type::Dyn);
            if then_ty == else_ty {
                then_ty
            } else {
                Type::Dyn
            }
        }
        "_+_" | "_-_" | "_*_" | "_/_" | "_%_" | "-_" => {
            out.get(&args[0].id).cloned().unwrap_or(Type::Dyn)
        }
        "optional.of" | "optional.ofNonZeroValue" => {
            Type::Optional(Box::new(out.get(&args[0].id).cloned().unwrap_or(Type::Dyn)))
        }
        "optional.none" => Type::Optional(Box::new(Type::Dyn)),
        _ => Type::Dyn,
    }
}

fn constant_type(c: &Constant) -> Type {
    match c {
        Constant::Null => Type::Null,
        Constant::Bool(_) => Type::Bool,
        Constant::Int(_) => Type::Int,
        Constant::Uint(_) => Type::Uint,
        Constant::Double(_) => Type::Double,
        Constant::String(_) => Type::String,
        Constant::Bytes(_) => Type::Bytes,
    }
}

fn infer_call(function: &str, args: &[Expr], ast: &CheckedAst, env: &Env) -> Result<Type> {
    for a in args {
        infer(a, ast, env)?;
    }
    Ok(match function {
        "_==_" | "_!=_" | "_<_" | "_<=_" | "_>_" | "_>=_" | "_&&_" | "_||_" | "_!_" | "_in_"
        | "startsWith" | "endsWith" | "contains" | "matches" => Type::Bool,
        "size" => Type::Int,
        "_?_:_" => {
            let then_ty = infer(&args[1], ast, env)?;
            let else_ty = infer(&args[2], ast, env)?;
            if then_ty == else_ty {
                then_ty
            } else {
                Type::Dyn
            }
        }
        "_+_" | "_-_" | "_*_" | "_/_" | "_%_" | "-_" => infer(&args[0], ast, env)?,
        "optional.of" | "optional.ofNonZeroValue" => {
            Type::Optional(Box::new(infer(&args[0], ast, env)?))
        }
        "optional.none" => Type::Optional(Box::new(Type::Dyn)),
        _ => Type::Dyn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel_expr::Source;

    fn ast_for(root: Expr) -> CheckedAst {
        CheckedAst::new(root, Source::default())
    }

    #[test]
    fn infers_scalar_constants() {
        let checker = StructuralTypeChecker;
        let ast = ast_for(Expr::constant(1, Constant::Int(1)));
        assert_eq!(
            checker.check(&ast.root, &ast, &Env::new()).unwrap(),
            Type::Int
        );
    }

    #[test]
    fn unbound_ident_is_dyn() {
        let checker = StructuralTypeChecker;
        let ast = ast_for(Expr::ident(1, "x"));
        assert_eq!(
            checker.check(&ast.root, &ast, &Env::new()).unwrap(),
            Type::Dyn
        );
    }

    #[test]
    fn env_extension_resolves_ident_type() {
        let checker = StructuralTypeChecker;
        let ast = ast_for(Expr::ident(1, "x"));
        let mut env = Env::new();
        env.insert("x".to_string(), Type::String);
        assert_eq!(checker.check(&ast.root, &ast, &env).unwrap(), Type::String);
    }

    #[test]
    fn comparison_call_is_bool() {
        let checker = StructuralTypeChecker;
        let expr = Expr::call(
            1,
            None,
            "_<_",
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::Int(2)),
            ],
        );
        let ast = ast_for(expr);
        assert_eq!(
            checker.check(&ast.root, &ast, &Env::new()).unwrap(),
            Type::Bool
        );
    }

    #[test]
    fn list_of_mixed_element_types_is_dyn_elem() {
        let checker = StructuralTypeChecker;
        let expr = Expr::list(
            1,
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::String("x".into())),
            ],
            vec![],
        );
        let ast = ast_for(expr);
        assert_eq!(
            checker.check(&ast.root, &ast, &Env::new()).unwrap(),
            Type::List(Box::new(Type::Dyn))
        );
    }

    #[test]
    fn annotate_tree_records_every_subexpression() {
        let expr = Expr::call(
            1,
            None,
            "_<_",
            vec![
                Expr::constant(2, Constant::Int(1)),
                Expr::constant(3, Constant::Int(2)),
            ],
        );
        let map = annotate_tree(&expr, &Env::new());
        assert_eq!(map.get(&1), Some(&Type::Bool));
        assert_eq!(map.get(&2), Some(&Type::Int));
        assert_eq!(map.get(&3), Some(&Type::Int));
    }
}
