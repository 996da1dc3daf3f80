//! Integer expressions.
//!
//! A minimal expression algebra over [`IntVar`](crate::intvar::IntVar): a variable or a constant.
//! Constraints that need to treat "a variable or a fixed number" uniformly (element, sums) take
//! `IntExpr` instead of requiring every argument to be a variable. `cast_to_var` materializes a
//! constant as a fresh singleton variable on demand, mirroring the original's `Expr::Var()` cache.

use crate::intvar::IntVar;
use crate::reversible::Trail;

/// An integer-valued expression: either a variable or a compile-time constant.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IntExpr {
    Var(IntVar),
    Const(i64),
}

impl From<IntVar> for IntExpr {
    fn from(v: IntVar) -> IntExpr {
        IntExpr::Var(v)
    }
}

impl From<i64> for IntExpr {
    fn from(c: i64) -> IntExpr {
        IntExpr::Const(c)
    }
}

impl IntExpr {
    pub fn min(self, trail: &Trail, vars: &crate::intvar::IntVarStore) -> i64 {
        match self {
            IntExpr::Var(v) => vars.min(trail, v),
            IntExpr::Const(c) => c,
        }
    }

    pub fn max(self, trail: &Trail, vars: &crate::intvar::IntVarStore) -> i64 {
        match self {
            IntExpr::Var(v) => vars.max(trail, v),
            IntExpr::Const(c) => c,
        }
    }

    pub fn is_bound(self, trail: &Trail, vars: &crate::intvar::IntVarStore) -> bool {
        match self {
            IntExpr::Var(v) => vars.is_bound(trail, v),
            IntExpr::Const(_) => true,
        }
    }

    /// Materializes this expression as a variable, allocating a fresh singleton variable for a
    /// constant. The caller is responsible for linking the returned variable back to the
    /// expression (e.g. by posting an equality constraint) when `self` was not already a
    /// variable; callers that only read `self.min()/max()` never need this.
    pub fn cast_to_var(self, trail: &mut Trail, vars: &mut crate::intvar::IntVarStore) -> IntVar {
        match self {
            IntExpr::Var(v) => v,
            IntExpr::Const(c) => vars.new_var(trail, c, c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intvar::IntVarStore;

    #[test]
    fn const_cast_to_var_is_a_singleton() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let e: IntExpr = 5.into();
        let v = e.cast_to_var(&mut trail, &mut vars);
        assert_eq!(vars.min(&trail, v), 5);
        assert_eq!(vars.max(&trail, v), 5);
    }
}
