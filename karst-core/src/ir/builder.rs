//! Function builder for the Karst IR.
//!
//! Provides a safe API for constructing functions, ensuring:
//! - Operands name variables that exist
//! - Binding types are derived from their operands where possible
//! - Projections stay within the arity of the projected tuple

use super::{Binding, Body, Expr, Function, VarDecl, VarId};
use crate::types::{tuple_of, Type, TypeExt};

/// Error during function building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// An operand references a variable that was never allocated.
    UnknownVar(VarId),
    /// Tried to project from a non-tuple value.
    ProjectNonTuple { var: String },
    /// Projection index outside the tuple's arity.
    ProjectOutOfRange {
        var: String,
        index: usize,
        arity: usize,
    },
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderError::UnknownVar(id) => write!(f, "Unknown variable v{}", id.0),
            BuilderError::ProjectNonTuple { var } => {
                write!(f, "Cannot project from non-tuple value `{}`", var)
            }
            BuilderError::ProjectOutOfRange { var, index, arity } => {
                write!(
                    f,
                    "Projection index {} out of range for `{}` (arity {})",
                    index, var, arity
                )
            }
        }
    }
}

impl std::error::Error for BuilderError {}

/// Builder for constructing Karst functions.
///
/// # Example
///
/// ```ignore
/// let mut builder = FuncBuilder::new(
///     "main",
///     vec![(tensor(f32_ty(), &[5, 7]), "x".to_string())],
/// );
///
/// let x = builder.param(0);
/// let t = builder.push_tuple("t", vec![x, x])?;
/// let p = builder.push_project("p", t, 1)?;
/// let func = builder.finish(vec![p]);
/// ```
pub struct FuncBuilder {
    name: String,
    params: Vec<VarId>,
    body: Body,
}

impl FuncBuilder {
    /// Create a new function builder with the given parameters.
    pub fn new(name: &str, params: Vec<(Type, String)>) -> Self {
        let mut body = Body::new();
        let param_ids = params
            .into_iter()
            .map(|(ty, name)| body.alloc_var(VarDecl { name, ty }))
            .collect();
        FuncBuilder {
            name: name.to_string(),
            params: param_ids,
            body,
        }
    }

    /// Get the variable for a parameter by index.
    pub fn param(&self, index: usize) -> VarId {
        self.params[index]
    }

    /// Get the type of a variable.
    pub fn var_ty(&self, var: VarId) -> &Type {
        self.body.var_ty(var)
    }

    fn check(&self, var: VarId) -> Result<(), BuilderError> {
        if var.index() < self.body.num_vars() {
            Ok(())
        } else {
            Err(BuilderError::UnknownVar(var))
        }
    }

    fn push(&mut self, name: &str, ty: Type, expr: Expr) -> VarId {
        let var = self.body.alloc_var(VarDecl {
            name: name.to_string(),
            ty,
        });
        self.body.bindings.push(Binding { var, expr });
        var
    }

    /// Push a tuple construction. The tuple's type is derived from its
    /// element types.
    pub fn push_tuple(&mut self, name: &str, elems: Vec<VarId>) -> Result<VarId, BuilderError> {
        for &e in &elems {
            self.check(e)?;
        }
        let ty = tuple_of(elems.iter().map(|&e| self.body.var_ty(e).clone()).collect());
        Ok(self.push(name, ty, Expr::Tuple(elems)))
    }

    /// Push a tuple projection. The result type is the projected element's
    /// type.
    pub fn push_project(
        &mut self,
        name: &str,
        tuple: VarId,
        index: usize,
    ) -> Result<VarId, BuilderError> {
        self.check(tuple)?;
        let tuple_ty = self.body.var_ty(tuple);
        let elems = tuple_ty.tuple_elems().ok_or_else(|| BuilderError::ProjectNonTuple {
            var: self.body.var(tuple).name.clone(),
        })?;
        let elem_ty = elems.get(index).cloned().ok_or_else(|| BuilderError::ProjectOutOfRange {
            var: self.body.var(tuple).name.clone(),
            index,
            arity: elems.len(),
        })?;
        Ok(self.push(name, elem_ty, Expr::Project { tuple, index }))
    }

    /// Push a call addressed by symbol name.
    pub fn push_call(
        &mut self,
        name: &str,
        callee: &str,
        args: Vec<VarId>,
        ty: Type,
    ) -> Result<VarId, BuilderError> {
        for &a in &args {
            self.check(a)?;
        }
        Ok(self.push(
            name,
            ty,
            Expr::Call {
                callee: callee.to_string(),
                args,
            },
        ))
    }

    /// Push an alias of an existing value. The alias has its source's type.
    pub fn push_alias(&mut self, name: &str, source: VarId) -> Result<VarId, BuilderError> {
        self.check(source)?;
        let ty = self.body.var_ty(source).clone();
        Ok(self.push(name, ty, Expr::Alias(source)))
    }

    /// Push an opaque intrinsic call (e.g. a tensor allocation).
    pub fn push_intrinsic(
        &mut self,
        name: &str,
        op: &str,
        args: Vec<VarId>,
        ty: Type,
    ) -> Result<VarId, BuilderError> {
        for &a in &args {
            self.check(a)?;
        }
        Ok(self.push(
            name,
            ty,
            Expr::Intrinsic {
                name: op.to_string(),
                args,
            },
        ))
    }

    /// Finish building and return the function with the given result list.
    pub fn finish(mut self, result: Vec<VarId>) -> Function {
        self.body.result = result;
        Function {
            name: self.name,
            params: self.params,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{tensor, tuple_of, TypeName};

    fn f32_ty() -> Type {
        Type::Constructed(TypeName::Float(32), vec![])
    }

    #[test]
    fn test_simple_function() {
        let mut builder = FuncBuilder::new(
            "pair_up",
            vec![
                (tensor(f32_ty(), &[2]), "x".to_string()),
                (tensor(f32_ty(), &[3]), "y".to_string()),
            ],
        );

        let x = builder.param(0);
        let y = builder.param(1);
        let t = builder.push_tuple("t", vec![x, y]).unwrap();
        let p = builder.push_project("p", t, 1).unwrap();
        let func = builder.finish(vec![p]);

        assert_eq!(func.params.len(), 2);
        assert_eq!(func.body.bindings.len(), 2);
        assert_eq!(func.body.result, vec![p]);
        assert_eq!(
            *func.body.var_ty(t),
            tuple_of(vec![tensor(f32_ty(), &[2]), tensor(f32_ty(), &[3])])
        );
        assert_eq!(*func.body.var_ty(p), tensor(f32_ty(), &[3]));
    }

    #[test]
    fn test_project_out_of_range() {
        let mut builder = FuncBuilder::new("f", vec![(tensor(f32_ty(), &[2]), "x".to_string())]);
        let x = builder.param(0);
        let t = builder.push_tuple("t", vec![x]).unwrap();
        let err = builder.push_project("p", t, 1).unwrap_err();
        assert_eq!(
            err,
            BuilderError::ProjectOutOfRange {
                var: "t".to_string(),
                index: 1,
                arity: 1,
            }
        );
    }

    #[test]
    fn test_project_non_tuple() {
        let mut builder = FuncBuilder::new("f", vec![(tensor(f32_ty(), &[2]), "x".to_string())]);
        let x = builder.param(0);
        let err = builder.push_project("p", x, 0).unwrap_err();
        assert!(matches!(err, BuilderError::ProjectNonTuple { .. }));
    }

    #[test]
    fn test_unknown_var() {
        let mut builder = FuncBuilder::new("f", vec![]);
        let err = builder.push_tuple("t", vec![VarId(7)]).unwrap_err();
        assert_eq!(err, BuilderError::UnknownVar(VarId(7)));
    }
}
