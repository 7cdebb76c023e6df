//! Diagnostic formatting for Karst IR.
//!
//! Provides human-readable formatters for types, functions, and modules,
//! outputting something close to the front-end syntax.

use std::fmt::{self, Display, Formatter};

use crate::ir::{Body, Expr, Function, Module, VarId};
use crate::types::{Type, TypeName};

/// Pretty-print a type to a human-readable string.
///
/// Converts `Constructed(Tensor, [f32, Size(5), Size(7)])` to
/// `"[5x7]f32"`, tuples to `"(a, b)"`, etc.
pub fn format_type(ty: &Type) -> String {
    match ty {
        Type::Variable(id) => format!("?{}", id),
        Type::Constructed(name, args) => format_constructed_type(name, args),
    }
}

fn format_constructed_type(name: &TypeName, args: &[Type]) -> String {
    match name {
        TypeName::Float(bits) => format!("f{}", bits),
        TypeName::UInt(bits) => format!("u{}", bits),
        TypeName::Int(bits) => format!("i{}", bits),
        TypeName::Tensor => {
            // Tensor[elem, dims...] - shape-erased tensors have no dims
            let elem = args.first().map(format_type).unwrap_or_else(|| "?".to_string());
            if args.len() <= 1 {
                format!("[*]{}", elem)
            } else {
                let dims: Vec<_> = args[1..].iter().map(format_type).collect();
                format!("[{}]{}", dims.join("x"), elem)
            }
        }
        TypeName::Size(n) => format!("{}", n),
        TypeName::Unit => "()".to_string(),
        TypeName::Tuple(_n) => {
            let items: Vec<_> = args.iter().map(format_type).collect();
            format!("({})", items.join(", "))
        }
        TypeName::Arrow => {
            let items: Vec<_> = args.iter().map(format_type).collect();
            items.join(" -> ")
        }
    }
}

// =============================================================================
// IR Display implementations
// =============================================================================

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "def {}", self.name)?;
        for &param in &self.params {
            let decl = self.body.var(param);
            write!(f, " ({}: {})", decl.name, format_type(&decl.ty))?;
        }
        writeln!(f, " =")?;
        for binding in &self.body.bindings {
            let name = &self.body.var(binding.var).name;
            writeln!(f, "  {} = {}", name, fmt_expr(&self.body, &binding.expr))?;
        }
        if self.body.result.is_empty() {
            writeln!(f, "  return")
        } else {
            let names: Vec<_> = self
                .body
                .result
                .iter()
                .map(|&r| self.body.var(r).name.clone())
                .collect();
            writeln!(f, "  return {}", names.join(", "))
        }
    }
}

fn fmt_expr(body: &Body, expr: &Expr) -> String {
    let name = |v: VarId| body.var(v).name.clone();
    let list = |vs: &[VarId]| vs.iter().map(|&v| name(v)).collect::<Vec<_>>().join(", ");
    match expr {
        Expr::Tuple(elems) => format!("({})", list(elems)),
        Expr::Project { tuple, index } => format!("{}.{}", name(*tuple), index),
        Expr::Call { callee, args } => format!("{}({})", callee, list(args)),
        Expr::Alias(source) => name(*source),
        Expr::Intrinsic { name: op, args } => format!("@{}({})", op, list(args)),
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "v{}", e.0)?;
                }
                write!(f, ")")
            }
            Expr::Project { tuple, index } => write!(f, "v{}.{}", tuple.0, index),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "v{}", a.0)?;
                }
                write!(f, ")")
            }
            Expr::Alias(source) => write!(f, "v{}", source.0),
            Expr::Intrinsic { name, args } => {
                write!(f, "@{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "v{}", a.0)?;
                }
                write!(f, ")")
            }
        }
    }
}
