//! Tuple unfolding pass.
//!
//! The runtime's calling convention addresses callees purely by symbol
//! name and transmits a flat, ordered list of leaf operands; it cannot
//! carry nested tuple structure. This pass removes tuple values from
//! every function signature and every call operand list:
//!
//! - each tuple-typed parameter becomes its flattened leaf parameters,
//!   named through a module-wide uniquifier
//! - every call to a rewritten function has its tuple operands expanded
//!   into the leaf references that constitute them
//! - leaf-typed projections collapse into aliases of the values they
//!   select
//! - tuple construct, alias, and projection bindings left without uses
//!   are removed
//!
//! Resolution is purely structural. A value is chased through alias and
//! projection chains to its leaf references, recording the number of
//! projection hops needed to reach each leaf. A leaf reached with zero
//! hops was a direct tuple element and is passed by its original
//! reference; a leaf behind at least one hop is re-materialized as a
//! fresh alias binding inserted just before the use. Flattenings are
//! memoized per function, keyed by the defining variable of the resolved
//! tuple, so repeated uses of one tuple value share one set of bindings
//! and one reference list.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::ir::{Binding, Body, Expr, Function, Module, VarDecl, VarId};
use crate::names::NameUniquifier;
use crate::types::{flatten_type, Type, TypeExt};

pub type Result<T> = std::result::Result<T, UnfoldError>;

/// Error during tuple unfolding. Both variants indicate an invariant
/// violation in the input module; there is no partial output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnfoldError {
    /// A projection index outside the arity of the resolved tuple type.
    MalformedProjection {
        func: String,
        var: String,
        index: usize,
        arity: usize,
    },
    /// An alias or construct chain that reaches back into itself.
    AliasCycle { func: String, var: String },
}

impl std::fmt::Display for UnfoldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnfoldError::MalformedProjection {
                func,
                var,
                index,
                arity,
            } => {
                write!(
                    f,
                    "Malformed projection in `{}`: `{}` selects element {} of a tuple with arity {}",
                    func, var, index, arity
                )
            }
            UnfoldError::AliasCycle { func, var } => {
                write!(f, "Alias cycle in `{}` involving `{}`", func, var)
            }
        }
    }
}

impl std::error::Error for UnfoldError {}

/// Remove tuple values from every signature and call operand list in the
/// module.
///
/// Functions are processed in declaration order: first every signature is
/// rewritten, then every body (a function can be both a rewrite target
/// and a caller of other targets, including itself). Calls to symbols not
/// defined in the module are left untouched.
pub fn unfold_tuples(mut module: Module) -> Result<Module> {
    // One name registry for the whole rewrite, seeded with every name
    // already present so fresh names can never collide.
    let mut names = NameUniquifier::new();
    for func in module.functions() {
        names.reserve(&func.name);
        for decl in &func.body.vars {
            names.reserve(&decl.name);
        }
    }

    // Signatures first, in declaration order. The registry is shared
    // across all functions, so flattened parameter names depend on this
    // order: a later function whose parameter collides picks up an extra
    // digit.
    let mut replaced: HashMap<String, HashMap<VarId, Vec<VarId>>> = HashMap::new();
    for func in module.functions_mut() {
        let map = rewrite_signature(func, &mut names);
        if !map.is_empty() {
            replaced.insert(func.name.clone(), map);
        }
    }
    let rewritten: HashSet<String> = replaced.keys().cloned().collect();

    // Then every body, including the rewritten functions' own.
    let no_replacements = HashMap::new();
    for func in module.functions_mut() {
        let params = replaced.get(&func.name).unwrap_or(&no_replacements);
        FuncRewriter::new(func, params, &rewritten, &mut names).run()?;
    }

    Ok(module)
}

/// Replace each tuple-typed parameter with its flattened leaf parameters,
/// in place, preserving the positions of untouched parameters. Returns
/// the replacement leaves per replaced parameter.
fn rewrite_signature(
    func: &mut Function,
    names: &mut NameUniquifier,
) -> HashMap<VarId, Vec<VarId>> {
    let mut replaced = HashMap::new();
    let params = func.params.clone();
    let mut new_params = Vec::with_capacity(params.len());

    for param in params {
        if !func.body.var_ty(param).is_tuple() {
            new_params.push(param);
            continue;
        }
        let decl = func.body.var(param).clone();
        let leaf_tys = flatten_type(&decl.ty);
        let mut leaves = Vec::with_capacity(leaf_tys.len());
        for (j, leaf_ty) in leaf_tys.into_iter().enumerate() {
            let name = names.indexed(&decl.name, j);
            let leaf = func.body.alloc_var(VarDecl { name, ty: leaf_ty });
            new_params.push(leaf);
            leaves.push(leaf);
        }
        debug!(
            "`{}`: parameter `{}` flattened into {} leaf parameters",
            func.name,
            decl.name,
            leaves.len()
        );
        replaced.insert(param, leaves);
    }

    func.params = new_params;
    replaced
}

/// Rewrites one function body. Holds the per-function state: the
/// definition map over the original bindings, the replacement leaves for
/// this function's own rewritten parameters, and the flattening memo.
struct FuncRewriter<'a> {
    func: &'a mut Function,
    /// Replacement leaves for this function's rewritten parameters.
    replaced: &'a HashMap<VarId, Vec<VarId>>,
    /// Symbols whose signatures were rewritten (call targets to expand).
    rewritten: &'a HashSet<String>,
    names: &'a mut NameUniquifier,
    /// Binding index per defined variable, over the original body.
    defs: HashMap<VarId, usize>,
    /// Flattened reference list per resolved tuple variable.
    memo: HashMap<VarId, Vec<VarId>>,
}

impl<'a> FuncRewriter<'a> {
    fn new(
        func: &'a mut Function,
        replaced: &'a HashMap<VarId, Vec<VarId>>,
        rewritten: &'a HashSet<String>,
        names: &'a mut NameUniquifier,
    ) -> Self {
        let defs = func
            .body
            .bindings
            .iter()
            .enumerate()
            .map(|(idx, binding)| (binding.var, idx))
            .collect();
        FuncRewriter {
            func,
            replaced,
            rewritten,
            names,
            defs,
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<()> {
        // The original binding list stays in place until the end: value
        // resolution reads it, and only tuple-typed bindings matter for
        // resolution, which the rewrite below never modifies.
        let count = self.func.body.bindings.len();
        let mut out: Vec<Binding> = Vec::with_capacity(count);

        for idx in 0..count {
            let Binding { var, expr } = self.func.body.bindings[idx].clone();
            let new_expr = match expr {
                // A leaf-typed projection collapses into an alias of the
                // element it selects, once the tuple it projects from is
                // resolved away.
                Expr::Project { tuple, index } if !self.ty(var).is_tuple() => {
                    match self.project_leaf(tuple, index)? {
                        Some(leaf) => {
                            trace!(
                                "`{}`: projection `{}` collapsed to alias of `{}`",
                                self.func.name,
                                self.func.body.var(var).name,
                                self.func.body.var(leaf).name
                            );
                            Expr::Alias(leaf)
                        }
                        None => Expr::Project { tuple, index },
                    }
                }
                Expr::Call { callee, args } if self.rewritten.contains(&callee) => {
                    let mut new_args = Vec::with_capacity(args.len());
                    for arg in args {
                        if self.ty(arg).is_tuple() {
                            new_args.extend(self.flat_refs(arg, &mut out)?);
                        } else {
                            new_args.push(arg);
                        }
                    }
                    Expr::Call {
                        callee,
                        args: new_args,
                    }
                }
                other => other,
            };
            out.push(Binding { var, expr: new_expr });
        }

        // Result values flatten like call operands; their alias bindings
        // land at the end of the body, just before the return.
        let result = std::mem::take(&mut self.func.body.result);
        let mut new_result = Vec::with_capacity(result.len());
        for r in result {
            if self.ty(r).is_tuple() {
                new_result.extend(self.flat_refs(r, &mut out)?);
            } else {
                new_result.push(r);
            }
        }

        self.func.body.bindings = out;
        self.func.body.result = new_result;

        let removed = sweep_dead_tuple_bindings(&mut self.func.body);
        if removed > 0 {
            debug!("`{}`: removed {} dead tuple bindings", self.func.name, removed);
        }
        Ok(())
    }

    fn ty(&self, var: VarId) -> &Type {
        self.func.body.var_ty(var)
    }

    fn def_expr(&self, var: VarId) -> Option<&Expr> {
        self.defs.get(&var).map(|&idx| &self.func.body.bindings[idx].expr)
    }

    /// Follow alias bindings to the defining variable of the underlying
    /// value. The hop count is bounded by the binding count; exceeding it
    /// means the chain loops.
    fn resolve_root(&self, var: VarId) -> Result<VarId> {
        let mut current = var;
        let mut hops = 0;
        while let Some(Expr::Alias(source)) = self.def_expr(current) {
            current = *source;
            hops += 1;
            if hops > self.func.body.bindings.len() {
                return Err(UnfoldError::AliasCycle {
                    func: self.func.name.clone(),
                    var: self.func.body.var(var).name.clone(),
                });
            }
        }
        Ok(current)
    }

    /// Flatten a value into its ordered leaf references, each with the
    /// number of projection hops required to reach it.
    fn flatten_value(&self, var: VarId) -> Result<Vec<(VarId, u32)>> {
        let mut visiting = HashSet::new();
        self.flatten_value_rec(var, &mut visiting)
    }

    fn flatten_value_rec(
        &self,
        var: VarId,
        visiting: &mut HashSet<VarId>,
    ) -> Result<Vec<(VarId, u32)>> {
        if !self.ty(var).is_tuple() {
            return Ok(vec![(var, 0)]);
        }
        let root = self.resolve_root(var)?;
        if !visiting.insert(root) {
            return Err(UnfoldError::AliasCycle {
                func: self.func.name.clone(),
                var: self.func.body.var(root).name.clone(),
            });
        }
        let leaves = match self.def_expr(root) {
            // No defining binding: a parameter or a foreign reference.
            // Parameters replaced by the signature rewrite flatten to
            // their replacement leaves; anything else is atomic.
            None => match self.replaced.get(&root) {
                Some(leaves) => leaves.iter().map(|&leaf| (leaf, 0)).collect(),
                None => vec![(root, 0)],
            },
            Some(Expr::Tuple(elems)) => {
                let elems = elems.clone();
                let mut all = Vec::new();
                for op in elems {
                    all.extend(self.flatten_value_rec(op, visiting)?);
                }
                all
            }
            Some(&Expr::Project { tuple, index }) => {
                match self.project_range(tuple, index, visiting)? {
                    Some(range) => range,
                    None => vec![(root, 0)],
                }
            }
            // Call and intrinsic results are atomic producers.
            Some(_) => vec![(root, 0)],
        };
        visiting.remove(&root);
        Ok(leaves)
    }

    /// The slice of `flatten_value(tuple)` that corresponds to element
    /// `index`, with every depth incremented for the projection hop.
    ///
    /// Returns `None` when the tuple is not decomposable (an opaque
    /// producer somewhere below it); the projection is then left alone.
    fn project_range(
        &self,
        tuple: VarId,
        index: usize,
        visiting: &mut HashSet<VarId>,
    ) -> Result<Option<Vec<(VarId, u32)>>> {
        let tuple_ty = self.ty(tuple).clone();
        let elems = match tuple_ty.tuple_elems() {
            Some(elems) => elems,
            None => {
                return Err(UnfoldError::MalformedProjection {
                    func: self.func.name.clone(),
                    var: self.func.body.var(tuple).name.clone(),
                    index,
                    arity: 0,
                });
            }
        };
        if index >= elems.len() {
            return Err(UnfoldError::MalformedProjection {
                func: self.func.name.clone(),
                var: self.func.body.var(tuple).name.clone(),
                index,
                arity: elems.len(),
            });
        }

        let whole = self.flatten_value_rec(tuple, visiting)?;
        if whole.len() != flatten_type(&tuple_ty).len() {
            return Ok(None);
        }

        let offset: usize = elems[..index].iter().map(|e| flatten_type(e).len()).sum();
        let len = flatten_type(&elems[index]).len();
        let range = whole[offset..offset + len]
            .iter()
            .map(|&(leaf, depth)| (leaf, depth + 1))
            .collect();
        Ok(Some(range))
    }

    /// Resolve a leaf-typed projection to the single leaf it selects, or
    /// `None` when the projected tuple is not decomposable.
    fn project_leaf(&self, tuple: VarId, index: usize) -> Result<Option<VarId>> {
        let mut visiting = HashSet::new();
        match self.project_range(tuple, index, &mut visiting)? {
            Some(range) if range.len() == 1 => Ok(Some(range[0].0)),
            _ => Ok(None),
        }
    }

    /// The flattened operand references for a tuple-typed value, creating
    /// alias bindings for leaves behind projections. Memoized per
    /// resolved tuple, so a value flattened for an earlier use is reused
    /// verbatim with no duplicate bindings.
    fn flat_refs(&mut self, arg: VarId, out: &mut Vec<Binding>) -> Result<Vec<VarId>> {
        let root = self.resolve_root(arg)?;
        if let Some(cached) = self.memo.get(&root) {
            trace!(
                "`{}`: reusing flattened value of `{}`",
                self.func.name,
                self.func.body.var(root).name
            );
            return Ok(cached.clone());
        }

        let leaves = self.flatten_value(arg)?;
        let mut refs = Vec::with_capacity(leaves.len());
        for (leaf, depth) in leaves {
            if depth == 0 {
                // A direct tuple element: passed by its original reference.
                refs.push(leaf);
            } else {
                // Reached through at least one projection: re-materialize
                // as a fresh alias just before the use.
                let name = self.names.temp("gv");
                let ty = self.ty(leaf).clone();
                let alias = self.func.body.alloc_var(VarDecl { name, ty });
                out.push(Binding {
                    var: alias,
                    expr: Expr::Alias(leaf),
                });
                refs.push(alias);
            }
        }
        self.memo.insert(root, refs.clone());
        Ok(refs)
    }
}

/// Remove tuple-typed construct, alias, and projection bindings that
/// nothing references anymore. Iterates until a fixpoint since tuple
/// bindings reference each other. Calls and intrinsics are never removed:
/// opaque producers keep their effects and their position.
fn sweep_dead_tuple_bindings(body: &mut Body) -> usize {
    let mut removed = 0;
    loop {
        let mut used: HashSet<VarId> = body.result.iter().copied().collect();
        for binding in &body.bindings {
            used.extend(binding.expr.operands());
        }

        let keep: Vec<bool> = body
            .bindings
            .iter()
            .map(|binding| {
                let pure = matches!(
                    binding.expr,
                    Expr::Tuple(_) | Expr::Alias(_) | Expr::Project { .. }
                );
                !pure || !body.var_ty(binding.var).is_tuple() || used.contains(&binding.var)
            })
            .collect();
        if keep.iter().all(|&k| k) {
            return removed;
        }

        let mut idx = 0;
        body.bindings.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        removed += keep.iter().filter(|&&k| !k).count();
    }
}
