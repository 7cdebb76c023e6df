//! Structural equality for Karst functions and modules.
//!
//! Two functions are structurally equal when their parameters, bindings,
//! and results have the same shapes and types under a positional variable
//! correspondence: parameter i maps to parameter i, binding i to binding
//! i. Variable names are not compared, so compiler-generated names never
//! affect equality. Rewrite passes are checked against hand-built
//! expected modules with these functions.

use std::collections::HashMap;

use super::{Expr, Function, Module, VarId};

/// Compare two modules for structural equality. Functions must appear
/// under the same symbol names in the same declaration order.
pub fn module_structurally_equal(a: &Module, b: &Module) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.functions().zip(b.functions()).all(|(fa, fb)| {
        fa.name == fb.name && function_structurally_equal(fa, fb)
    })
}

/// Compare two functions for structural equality (names ignored).
pub fn function_structurally_equal(a: &Function, b: &Function) -> bool {
    if a.params.len() != b.params.len()
        || a.body.bindings.len() != b.body.bindings.len()
        || a.body.result.len() != b.body.result.len()
    {
        return false;
    }

    // Positional variable correspondence, built from params and extended
    // binding by binding.
    let mut map: HashMap<VarId, VarId> = HashMap::new();

    for (&pa, &pb) in a.params.iter().zip(&b.params) {
        if a.body.var_ty(pa) != b.body.var_ty(pb) {
            return false;
        }
        map.insert(pa, pb);
    }

    for (ba, bb) in a.body.bindings.iter().zip(&b.body.bindings) {
        if a.body.var_ty(ba.var) != b.body.var_ty(bb.var) {
            return false;
        }
        if !exprs_match(&ba.expr, &bb.expr, &map) {
            return false;
        }
        map.insert(ba.var, bb.var);
    }

    a.body
        .result
        .iter()
        .zip(&b.body.result)
        .all(|(&ra, &rb)| map.get(&ra) == Some(&rb))
}

fn exprs_match(a: &Expr, b: &Expr, map: &HashMap<VarId, VarId>) -> bool {
    let operands_match = |xs: &[VarId], ys: &[VarId]| {
        xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| map.get(x) == Some(y))
    };

    match (a, b) {
        (Expr::Tuple(xs), Expr::Tuple(ys)) => operands_match(xs, ys),
        (
            Expr::Project { tuple: ta, index: ia },
            Expr::Project { tuple: tb, index: ib },
        ) => ia == ib && map.get(ta) == Some(tb),
        (
            Expr::Call { callee: ca, args: xs },
            Expr::Call { callee: cb, args: ys },
        ) => ca == cb && operands_match(xs, ys),
        (Expr::Alias(sa), Expr::Alias(sb)) => map.get(sa) == Some(sb),
        (
            Expr::Intrinsic { name: na, args: xs },
            Expr::Intrinsic { name: nb, args: ys },
        ) => na == nb && operands_match(xs, ys),
        _ => false,
    }
}
