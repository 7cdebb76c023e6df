//! Verification for Karst functions.
//!
//! Verifies that a function body satisfies the key invariants:
//! - Every referenced variable is a parameter or was bound earlier
//! - Every variable is defined at most once
//! - Projections stay within the arity of the projected tuple
//!
//! `tuple_free_violations` separately checks the post-unfolding
//! invariant: no parameter, binding, call operand, or result value may
//! have tuple type.

use std::collections::HashSet;

use super::{Expr, Function, Module, VarId};
use crate::types::TypeExt;

/// Verification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// A variable was used before it was defined.
    UseBeforeDef { var: String, binding: usize },

    /// A variable was defined more than once.
    Redefined { var: String, binding: usize },

    /// An operand references a variable outside the table.
    UnknownVar { id: u32, binding: usize },

    /// A projection from a non-tuple value.
    ProjectNonTuple { var: String, binding: usize },

    /// A projection index outside the tuple's arity.
    ProjectOutOfRange {
        var: String,
        index: usize,
        arity: usize,
        binding: usize,
    },

    /// A parameter still has tuple type.
    ResidualTupleParam { var: String },

    /// A binding still defines a tuple-typed value.
    ResidualTupleBinding { var: String },

    /// A call still passes a tuple-typed operand.
    TupleCallOperand { callee: String, var: String },

    /// A result value still has tuple type.
    TupleResult { var: String },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::UseBeforeDef { var, binding } => {
                write!(f, "`{}` used before definition at binding {}", var, binding)
            }
            VerifyError::Redefined { var, binding } => {
                write!(f, "`{}` redefined at binding {}", var, binding)
            }
            VerifyError::UnknownVar { id, binding } => {
                write!(f, "Unknown variable v{} at binding {}", id, binding)
            }
            VerifyError::ProjectNonTuple { var, binding } => {
                write!(f, "Projection from non-tuple `{}` at binding {}", var, binding)
            }
            VerifyError::ProjectOutOfRange {
                var,
                index,
                arity,
                binding,
            } => {
                write!(
                    f,
                    "Projection index {} out of range for `{}` (arity {}) at binding {}",
                    index, var, arity, binding
                )
            }
            VerifyError::ResidualTupleParam { var } => {
                write!(f, "Parameter `{}` has tuple type", var)
            }
            VerifyError::ResidualTupleBinding { var } => {
                write!(f, "Binding `{}` has tuple type", var)
            }
            VerifyError::TupleCallOperand { callee, var } => {
                write!(f, "Call to `{}` passes tuple-typed operand `{}`", callee, var)
            }
            VerifyError::TupleResult { var } => {
                write!(f, "Result value `{}` has tuple type", var)
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Verify that a function satisfies the single-assignment invariants.
pub fn verify_function(func: &Function) -> Result<(), Vec<VerifyError>> {
    let mut verifier = Verifier::new(func);
    verifier.verify();

    if verifier.errors.is_empty() {
        Ok(())
    } else {
        Err(verifier.errors)
    }
}

/// Verify every function in a module. Errors are tagged with the
/// offending function's name.
pub fn verify_module(module: &Module) -> Result<(), Vec<(String, VerifyError)>> {
    let mut errors = Vec::new();
    for func in module.functions() {
        if let Err(errs) = verify_function(func) {
            errors.extend(errs.into_iter().map(|e| (func.name.clone(), e)));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Report every place a tuple-typed value survives in the module:
/// parameters, bindings, call operands, and result values.
///
/// An empty result means the module satisfies the flat-call invariant.
pub fn tuple_free_violations(module: &Module) -> Vec<(String, VerifyError)> {
    let mut violations = Vec::new();
    for func in module.functions() {
        let name_of = |v: VarId| func.body.var(v).name.clone();
        for &param in &func.params {
            if func.body.var_ty(param).is_tuple() {
                violations.push((
                    func.name.clone(),
                    VerifyError::ResidualTupleParam { var: name_of(param) },
                ));
            }
        }
        for binding in &func.body.bindings {
            if func.body.var_ty(binding.var).is_tuple() {
                violations.push((
                    func.name.clone(),
                    VerifyError::ResidualTupleBinding {
                        var: name_of(binding.var),
                    },
                ));
            }
            if let Expr::Call { callee, args } = &binding.expr {
                for &arg in args {
                    if func.body.var_ty(arg).is_tuple() {
                        violations.push((
                            func.name.clone(),
                            VerifyError::TupleCallOperand {
                                callee: callee.clone(),
                                var: name_of(arg),
                            },
                        ));
                    }
                }
            }
        }
        for &r in &func.body.result {
            if func.body.var_ty(r).is_tuple() {
                violations.push((
                    func.name.clone(),
                    VerifyError::TupleResult { var: name_of(r) },
                ));
            }
        }
    }
    violations
}

struct Verifier<'a> {
    func: &'a Function,
    /// Variables defined so far.
    defined: HashSet<VarId>,
    /// Collected errors.
    errors: Vec<VerifyError>,
}

impl<'a> Verifier<'a> {
    fn new(func: &'a Function) -> Self {
        Verifier {
            func,
            defined: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn verify(&mut self) {
        // Register parameters as defined
        for &param in &self.func.params {
            if !self.defined.insert(param) {
                self.errors.push(VerifyError::Redefined {
                    var: self.func.body.var(param).name.clone(),
                    binding: 0,
                });
            }
        }

        // Verify each binding in order
        for (idx, binding) in self.func.body.bindings.iter().enumerate() {
            for operand in binding.expr.operands() {
                self.check_use(operand, idx);
            }
            self.check_projection(&binding.expr, idx);

            if !self.defined.insert(binding.var) {
                self.errors.push(VerifyError::Redefined {
                    var: self.func.body.var(binding.var).name.clone(),
                    binding: idx,
                });
            }
        }

        // Result values must be defined
        let last = self.func.body.bindings.len();
        for &r in &self.func.body.result {
            self.check_use(r, last);
        }
    }

    fn check_use(&mut self, var: VarId, binding: usize) {
        if var.index() >= self.func.body.num_vars() {
            self.errors.push(VerifyError::UnknownVar { id: var.0, binding });
            return;
        }
        if !self.defined.contains(&var) {
            self.errors.push(VerifyError::UseBeforeDef {
                var: self.func.body.var(var).name.clone(),
                binding,
            });
        }
    }

    fn check_projection(&mut self, expr: &Expr, binding: usize) {
        if let Expr::Project { tuple, index } = expr {
            if tuple.index() >= self.func.body.num_vars() {
                return; // reported by check_use
            }
            match self.func.body.var_ty(*tuple).tuple_elems() {
                None => {
                    self.errors.push(VerifyError::ProjectNonTuple {
                        var: self.func.body.var(*tuple).name.clone(),
                        binding,
                    });
                }
                Some(elems) if *index >= elems.len() => {
                    self.errors.push(VerifyError::ProjectOutOfRange {
                        var: self.func.body.var(*tuple).name.clone(),
                        index: *index,
                        arity: elems.len(),
                        binding,
                    });
                }
                Some(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FuncBuilder;
    use crate::ir::{Binding, Expr, Module};
    use crate::types::{tensor, unit, Type, TypeName};

    fn f32_ty() -> Type {
        Type::Constructed(TypeName::Float(32), vec![])
    }

    fn t32() -> Type {
        tensor(f32_ty(), &[4])
    }

    #[test]
    fn test_valid_function() {
        let mut builder = FuncBuilder::new(
            "f",
            vec![(t32(), "x".to_string()), (t32(), "y".to_string())],
        );
        let x = builder.param(0);
        let y = builder.param(1);
        let t = builder.push_tuple("t", vec![x, y]).unwrap();
        let p = builder.push_project("p", t, 0).unwrap();
        let func = builder.finish(vec![p]);

        assert!(verify_function(&func).is_ok());
    }

    #[test]
    fn test_use_before_def() {
        let mut builder = FuncBuilder::new("f", vec![(t32(), "x".to_string())]);
        let x = builder.param(0);
        let a = builder.push_alias("a", x).unwrap();
        let b = builder.push_alias("b", a).unwrap();
        let mut func = builder.finish(vec![b]);

        // Swap the bindings so `b = a` precedes `a = x`.
        func.body.bindings.swap(0, 1);

        let errors = verify_function(&func).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::UseBeforeDef { var, .. } if var == "a")));
    }

    #[test]
    fn test_redefinition() {
        let mut builder = FuncBuilder::new("f", vec![(t32(), "x".to_string())]);
        let x = builder.param(0);
        let a = builder.push_alias("a", x).unwrap();
        let mut func = builder.finish(vec![a]);

        // Duplicate the binding of `a`.
        let dup = Binding {
            var: a,
            expr: Expr::Alias(x),
        };
        func.body.bindings.push(dup);

        let errors = verify_function(&func).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::Redefined { var, .. } if var == "a")));
    }

    #[test]
    fn test_projection_out_of_range() {
        let mut builder = FuncBuilder::new("f", vec![(t32(), "x".to_string())]);
        let x = builder.param(0);
        let t = builder.push_tuple("t", vec![x]).unwrap();
        let p = builder.push_project("p", t, 0).unwrap();
        let mut func = builder.finish(vec![p]);

        func.body.bindings[1].expr = Expr::Project { tuple: t, index: 3 };

        let errors = verify_function(&func).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            VerifyError::ProjectOutOfRange { index: 3, arity: 1, .. }
        )));
    }

    #[test]
    fn test_tuple_free_violations() {
        let mut module = Module::new();

        let mut builder = FuncBuilder::new(
            "caller",
            vec![(t32(), "x".to_string()), (t32(), "y".to_string())],
        );
        let x = builder.param(0);
        let y = builder.param(1);
        let t = builder.push_tuple("t", vec![x, y]).unwrap();
        builder.push_call("_r", "callee", vec![t], unit()).unwrap();
        module.define(builder.finish(vec![]));

        let violations = tuple_free_violations(&module);
        assert_eq!(violations.len(), 2); // the binding and the operand
        assert!(violations
            .iter()
            .any(|(_, e)| matches!(e, VerifyError::ResidualTupleBinding { var } if var == "t")));
        assert!(violations
            .iter()
            .any(|(_, e)| matches!(e, VerifyError::TupleCallOperand { callee, .. } if callee == "callee")));
    }
}
