//! Model visitor protocol (component I): a closed tag/argument vocabulary for describing a model
//! independently of any one front-end, plus a recording visitor and a loader that replays a
//! recorded trace back into an equivalent [`Model`].
//!
//! Grounded on two things at once: the closed constraint/argument/expression tag vocabulary is
//! given verbatim by the design document's external-interfaces section, and the
//! builder-as-visitor shape (a small trait that a container implements so callers can both
//! *build* a structure and *walk* it through the same closed set of operations) is the same shape
//! as `ccsat_formula::cnf::ExtendFormula`. Unlike `ExtendFormula`'s single `add_clause` operation,
//! the model vocabulary is a whole tagged-union of constraint/expression kinds, which is exactly
//! the case the design document's "Polymorphism over demons/constraints/decisions" note sanctions
//! a closed tagged enum for.
//!
//! Only the constraint/expression tags backed by a real propagator in [`crate::propagators`]
//! (`AllDifferent`, and `ElementEqual` in both its variable-array and constant-array forms) can be
//! turned into a posted constraint via [`Model::to_propagators`]; every other tag in the
//! vocabulary still round-trips at the data level (a loaded trace always reconstructs an
//! `Model` equal, up to argument ordering, to the one that produced it), it just has nothing to
//! post against the engine yet. `to_propagators` reports that gap as
//! [`LoadError::UnsupportedConstraintTag`] rather than silently dropping the constraint.

use std::rc::Rc;

use crate::constraint::Constraint;
use crate::error::LoadError;
use crate::intvar::IntVar;
use crate::propagators::{AllDifferent, ElementConstBool, ElementVar};

/// The closed set of constraint kinds a model visitor can dispatch over.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ConstraintTag {
    AllDifferent,
    AllowedAssignments,
    Between,
    CountEqual,
    Cumulative,
    ElementEqual,
    Equality,
    FalseConstraint,
    Greater,
    GreaterOrEqual,
    IntervalDisjunction,
    IsBetween,
    IsEqual,
    IsLessOrEqual,
    IsMember,
    Less,
    LessOrEqual,
    MapDomain,
    Max,
    MaxEqual,
    Member,
    Min,
    MinEqual,
    NoCycle,
    NonEqual,
    Pack,
    PathCumul,
    ScalarProduct,
    ScalarProductEqual,
    ScalarProductGreaterOrEqual,
    ScalarProductLessOrEqual,
    Sequence,
    SumEqual,
    SumGreater,
    SumGreaterOrEqual,
    SumLess,
    SumLessOrEqual,
    Transition,
    TrueConstraint,
}

/// The closed set of expression kinds a model visitor can dispatch over. `Delegate` is the
/// "linking tag that references a delegate target variable" the design document's expression
/// section mentions: the node produced by an expression's `cast-to-var` operation, which names the
/// auxiliary variable the expression has been constrained to equal.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ExprTag {
    Abs,
    Difference,
    Divide,
    Element,
    Max,
    Min,
    Opposite,
    Product,
    Square,
    Sum,
    Delegate,
}

/// The closed set of argument names a constraint or expression tag may carry.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ArgName {
    Active,
    Cardinalities,
    Coefficients,
    Count,
    Cumuls,
    Expression,
    FinalStates,
    Index,
    Index2,
    InitialState,
    Interval,
    Intervals,
    Left,
    MaxValue,
    MinValue,
    Nexts,
    Range,
    Relation,
    Right,
    Size,
    Step,
    TargetVariable,
    Transits,
    Tuples,
    Value,
    Values,
    Variables,
}

/// A nested expression argument: its own tag plus its own named arguments, recursively.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModelExpr {
    pub tag: ExprTag,
    pub args: Vec<(ArgName, ArgValue)>,
}

/// A value carried by one named argument. Scalars and arrays of the engine's two leaf types
/// (integers and the `IntVar` handles the engine addresses variables by), plus a nested
/// expression for arguments like `Element`'s `expression`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ArgValue {
    Var(IntVar),
    VarArray(Vec<IntVar>),
    Int(i64),
    IntArray(Vec<i64>),
    Bool(bool),
    BoolArray(Vec<bool>),
    Expr(Box<ModelExpr>),
}

/// One posted constraint: its tag plus its named arguments.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModelConstraint {
    pub tag: ConstraintTag,
    pub args: Vec<(ArgName, ArgValue)>,
}

/// Implemented by anything that wants to walk a [`Model`]'s constraints (and the expressions
/// nested inside their arguments) through the closed tag vocabulary, e.g. [`TraceRecorder`].
pub trait ModelVisitor {
    fn visit_constraint(&mut self, tag: ConstraintTag, args: &[(ArgName, ArgValue)]);
    fn visit_expression(&mut self, tag: ExprTag, args: &[(ArgName, ArgValue)]);
}

fn accept_args(visitor: &mut dyn ModelVisitor, args: &[(ArgName, ArgValue)]) {
    for (_, value) in args {
        if let ArgValue::Expr(expr) = value {
            accept_args(visitor, &expr.args);
            visitor.visit_expression(expr.tag, &expr.args);
        }
    }
}

/// A model: a sequence of posted constraints, independent of any one front-end's AST. Built up
/// through `add_*` helpers (direct Rust constructors, per the scope this core actually exercises)
/// and walked through the visitor protocol via [`Model::accept`].
#[derive(Default, Clone, Debug)]
pub struct Model {
    constraints: Vec<ModelConstraint>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    pub fn constraints(&self) -> &[ModelConstraint] {
        &self.constraints
    }

    /// `AllDifferent(variables)`.
    pub fn add_all_different(&mut self, variables: Vec<IntVar>) {
        self.constraints.push(ModelConstraint {
            tag: ConstraintTag::AllDifferent,
            args: vec![(ArgName::Variables, ArgValue::VarArray(variables))],
        });
    }

    /// `ElementEqual(variables, index, target_variable)`: `target_variable == variables[index]`
    /// over an array of variables.
    pub fn add_element_equal_vars(
        &mut self,
        variables: Vec<IntVar>,
        index: IntVar,
        target_variable: IntVar,
    ) {
        self.constraints.push(ModelConstraint {
            tag: ConstraintTag::ElementEqual,
            args: vec![
                (ArgName::Variables, ArgValue::VarArray(variables)),
                (ArgName::Index, ArgValue::Var(index)),
                (ArgName::TargetVariable, ArgValue::Var(target_variable)),
            ],
        });
    }

    /// `ElementEqual(values, index, target_variable)`: `target_variable == values[index]` over a
    /// constant 0/1 table.
    pub fn add_element_equal_const_bools(
        &mut self,
        values: Vec<bool>,
        index: IntVar,
        target_variable: IntVar,
    ) {
        self.constraints.push(ModelConstraint {
            tag: ConstraintTag::ElementEqual,
            args: vec![
                (ArgName::Values, ArgValue::BoolArray(values)),
                (ArgName::Index, ArgValue::Var(index)),
                (ArgName::TargetVariable, ArgValue::Var(target_variable)),
            ],
        });
    }

    /// Walks every constraint (and, within each constraint's arguments, every nested expression,
    /// visited before the constraint that contains it) through `visitor`.
    pub fn accept(&self, visitor: &mut dyn ModelVisitor) {
        for constraint in &self.constraints {
            accept_args(visitor, &constraint.args);
            visitor.visit_constraint(constraint.tag, &constraint.args);
        }
    }

    /// The normalized visitor trace `self.accept` produces: one event per constraint (and nested
    /// expression), each event's arguments sorted by [`ArgName`] so two models differing only in
    /// argument order compare equal.
    pub fn trace(&self) -> Vec<VisitorEvent> {
        let mut recorder = TraceRecorder::default();
        self.accept(&mut recorder);
        recorder.events
    }

    /// Reconstructs a `Model` from a trace produced by [`Model::trace`]. Every constraint tag in
    /// the vocabulary round-trips at this level, regardless of whether the core has a propagator
    /// for it; `retrace().trace() == original` for any `Model` (up to argument ordering, already
    /// normalized by `trace`).
    pub fn from_trace(events: &[VisitorEvent]) -> Model {
        let mut model = Model::new();
        for event in events {
            if let VisitorEvent::Constraint(tag, args) = event {
                model.constraints.push(ModelConstraint {
                    tag: *tag,
                    args: args.clone(),
                });
            }
        }
        model
    }

    /// Builds the posted-constraint objects this core actually knows how to propagate
    /// (`AllDifferent`, and `ElementEqual` in its variable-array and constant-bool-array forms).
    /// Any other tag, or a supported tag whose arguments don't have the expected shape, is
    /// reported through `LoadError` rather than silently skipped.
    pub fn to_propagators(&self) -> Result<Vec<Box<dyn Constraint>>, LoadError> {
        self.constraints
            .iter()
            .map(ModelConstraint::to_propagator)
            .collect()
    }
}

fn find<'a>(
    args: &'a [(ArgName, ArgValue)],
    name: ArgName,
) -> Option<&'a ArgValue> {
    args.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
}

fn require<'a>(
    tag: ConstraintTag,
    args: &'a [(ArgName, ArgValue)],
    name: ArgName,
) -> Result<&'a ArgValue, LoadError> {
    find(args, name).ok_or(LoadError::MissingArgument {
        constraint: tag,
        arg: name,
    })
}

fn expect_var(tag: ConstraintTag, name: ArgName, value: &ArgValue) -> Result<IntVar, LoadError> {
    match value {
        ArgValue::Var(v) => Ok(*v),
        _ => Err(LoadError::WrongArgumentType {
            constraint: tag,
            arg: name,
        }),
    }
}

impl ModelConstraint {
    fn to_propagator(&self) -> Result<Box<dyn Constraint>, LoadError> {
        match self.tag {
            ConstraintTag::AllDifferent => {
                let variables = require(self.tag, &self.args, ArgName::Variables)?;
                let variables = match variables {
                    ArgValue::VarArray(vs) => vs.clone(),
                    _ => {
                        return Err(LoadError::WrongArgumentType {
                            constraint: self.tag,
                            arg: ArgName::Variables,
                        })
                    }
                };
                Ok(Box::new(AllDifferent::new(variables)?))
            }
            ConstraintTag::ElementEqual => {
                let index = expect_var(
                    self.tag,
                    ArgName::Index,
                    require(self.tag, &self.args, ArgName::Index)?,
                )?;
                let target_variable = expect_var(
                    self.tag,
                    ArgName::TargetVariable,
                    require(self.tag, &self.args, ArgName::TargetVariable)?,
                )?;
                if let Some(ArgValue::VarArray(variables)) = find(&self.args, ArgName::Variables) {
                    return Ok(Box::new(ElementVar::new(
                        variables.clone(),
                        index,
                        target_variable,
                    )?));
                }
                if let Some(ArgValue::BoolArray(values)) = find(&self.args, ArgName::Values) {
                    return Ok(Box::new(ElementConstBool::new(
                        values.clone(),
                        index,
                        target_variable,
                    )?));
                }
                Err(LoadError::MissingArgument {
                    constraint: self.tag,
                    arg: ArgName::Variables,
                })
            }
            other => Err(LoadError::UnsupportedConstraintTag(other)),
        }
    }
}

/// One step of a recorded model-visitor walk: either a posted constraint or a nested expression,
/// each carrying its tag and its arguments sorted by [`ArgName`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum VisitorEvent {
    Constraint(ConstraintTag, Vec<(ArgName, ArgValue)>),
    Expression(ExprTag, Vec<(ArgName, ArgValue)>),
}

/// A [`ModelVisitor`] that records a normalized trace of every call it receives, used both to
/// serialize a [`Model`] and to check the round-trip law in `tests` below.
#[derive(Default)]
pub struct TraceRecorder {
    pub events: Vec<VisitorEvent>,
}

impl ModelVisitor for TraceRecorder {
    fn visit_constraint(&mut self, tag: ConstraintTag, args: &[(ArgName, ArgValue)]) {
        let mut args = args.to_vec();
        args.sort_by_key(|(name, _)| *name);
        self.events.push(VisitorEvent::Constraint(tag, args));
    }

    fn visit_expression(&mut self, tag: ExprTag, args: &[(ArgName, ArgValue)]) {
        let mut args = args.to_vec();
        args.sort_by_key(|(name, _)| *name);
        self.events.push(VisitorEvent::Expression(tag, args));
    }
}

/// Builds the `Element` expression form (as opposed to the `ElementEqual` constraint form): an
/// `array[index]` node linked, via `cast-to-var`, to the variable `delegate`. Not used by any
/// propagator in this core (no expression object graph is built for it), but part of the closed
/// expression vocabulary and exercised by the round-trip test below.
pub fn element_expr(array: Rc<Vec<IntVar>>, index: IntVar, delegate: IntVar) -> ModelExpr {
    ModelExpr {
        tag: ExprTag::Element,
        args: vec![
            (ArgName::Variables, ArgValue::VarArray((*array).clone())),
            (ArgName::Index, ArgValue::Var(index)),
            (
                ArgName::Expression,
                ArgValue::Expr(Box::new(ModelExpr {
                    tag: ExprTag::Delegate,
                    args: vec![(ArgName::TargetVariable, ArgValue::Var(delegate))],
                })),
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intvar::IntVarStore;
    use crate::queue::PropagationQueue;
    use crate::reversible::Trail;

    fn three_vars(trail: &mut Trail, vars: &mut IntVarStore) -> (IntVar, IntVar, IntVar) {
        (
            vars.new_var(trail, 0, 3),
            vars.new_var(trail, 0, 3),
            vars.new_var(trail, 0, 3),
        )
    }

    #[test]
    fn trace_round_trips_through_from_trace() {
        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let (x0, x1, x2) = three_vars(&mut trail, &mut vars);
        let index = vars.new_var(&mut trail, 0, 2);
        let target = vars.new_var(&mut trail, 0, 3);

        let mut model = Model::new();
        model.add_all_different(vec![x0, x1, x2]);
        model.add_element_equal_vars(vec![x0, x1, x2], index, target);
        model.add_element_equal_const_bools(vec![false, true, true], index, target);

        let original_trace = model.trace();
        let reloaded = Model::from_trace(&original_trace);
        let reloaded_trace = reloaded.trace();

        assert_eq!(original_trace, reloaded_trace);
    }

    #[test]
    fn trace_is_insensitive_to_argument_order() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let index = vars.new_var(&mut trail, 0, 1);
        let target = vars.new_var(&mut trail, 0, 1);

        let mut forward = Model::new();
        forward.constraints.push(ModelConstraint {
            tag: ConstraintTag::ElementEqual,
            args: vec![
                (ArgName::Index, ArgValue::Var(index)),
                (ArgName::TargetVariable, ArgValue::Var(target)),
                (ArgName::Values, ArgValue::BoolArray(vec![true, false])),
            ],
        });

        let mut shuffled = Model::new();
        shuffled.constraints.push(ModelConstraint {
            tag: ConstraintTag::ElementEqual,
            args: vec![
                (ArgName::Values, ArgValue::BoolArray(vec![true, false])),
                (ArgName::TargetVariable, ArgValue::Var(target)),
                (ArgName::Index, ArgValue::Var(index)),
            ],
        });

        assert_eq!(forward.trace(), shuffled.trace());
    }

    #[test]
    fn nested_expression_is_visited_before_its_owning_constraint() {
        let mut trail = Trail::new(8);
        let mut vars = IntVarStore::new();
        let array = Rc::new(vec![vars.new_var(&mut trail, 0, 1), vars.new_var(&mut trail, 0, 1)]);
        let index = vars.new_var(&mut trail, 0, 1);
        let delegate = vars.new_var(&mut trail, 0, 1);

        let mut model = Model::new();
        model.constraints.push(ModelConstraint {
            tag: ConstraintTag::IsEqual,
            args: vec![
                (ArgName::Left, ArgValue::Expr(Box::new(element_expr(array, index, delegate)))),
                (ArgName::Right, ArgValue::Int(1)),
            ],
        });

        let trace = model.trace();
        assert_eq!(trace.len(), 3);
        assert!(matches!(trace[0], VisitorEvent::Expression(ExprTag::Delegate, _)));
        assert!(matches!(trace[1], VisitorEvent::Expression(ExprTag::Element, _)));
        assert!(matches!(trace[2], VisitorEvent::Constraint(ConstraintTag::IsEqual, _)));
    }

    #[test]
    fn unsupported_tag_round_trips_as_data_but_rejects_as_a_propagator() {
        let mut model = Model::new();
        model.constraints.push(ModelConstraint {
            tag: ConstraintTag::Cumulative,
            args: vec![(ArgName::Cumuls, ArgValue::IntArray(vec![1, 2, 3]))],
        });

        let reloaded = Model::from_trace(&model.trace());
        assert_eq!(model.trace(), reloaded.trace());

        match reloaded.to_propagators() {
            Err(LoadError::UnsupportedConstraintTag(ConstraintTag::Cumulative)) => {}
            Err(other) => panic!("expected UnsupportedConstraintTag(Cumulative), got {:?}", other),
            Ok(_) => panic!("expected UnsupportedConstraintTag(Cumulative), got Ok"),
        }
    }

    #[test]
    fn to_propagators_builds_a_working_constraint() {
        use crate::constraint::ConstraintStore;

        let mut trail = Trail::new(64);
        let mut vars = IntVarStore::new();
        let mut queue = PropagationQueue::new();
        let mut store = ConstraintStore::new();
        let (x0, x1, x2) = three_vars(&mut trail, &mut vars);
        vars.set_value(&mut trail, &mut queue, x0, 0).unwrap();

        let mut model = Model::new();
        model.add_all_different(vec![x0, x1, x2]);
        let mut propagators = model.to_propagators().unwrap();
        assert_eq!(propagators.len(), 1);

        store
            .post_and_propagate(&mut trail, &mut vars, &mut queue, propagators.remove(0))
            .unwrap();

        assert!(!vars.contains(&trail, x1, 0));
        assert!(!vars.contains(&trail, x2, 0));
    }
}
