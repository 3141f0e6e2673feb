use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clause::{normalize, Clause};
use crate::config::EngineConfig;
use crate::context::{BindingStore, Context};
use crate::error::{ClauseError, EngineError, Result};
use crate::store::{ClauseProvider, ClauseStore, DynamicClauses, Theory};
use crate::term::{indicator, Struct, Term, Var};
use crate::unify::Unifier;

/// What a listener wants the engine to do after a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep searching for more solutions
    Continue,
    /// Stop the whole search now
    Abort,
}

/// Receives solutions as the engine finds them.
///
/// The callback runs on the engine's own stack; the search is suspended until
/// it returns.
pub trait SolutionListener {
    /// Called once per solution.
    fn on_solution(&mut self, solution: &Solution<'_>) -> Signal;
}

impl<F> SolutionListener for F
where
    F: FnMut(&Solution<'_>) -> Signal,
{
    fn on_solution(&mut self, solution: &Solution<'_>) -> Signal {
        self(solution)
    }
}

/// A solution: the context reached at success and the query's variables.
#[derive(Debug, Clone, Copy)]
pub struct Solution<'a> {
    ctx: Context<'a>,
    variables: &'a [Var],
}

impl<'a> Solution<'a> {
    /// The substitution at this solution.
    #[must_use]
    pub fn context(&self) -> Context<'a> {
        self.ctx
    }

    /// The value of query variable `name`, fully substituted.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Term> {
        self.variables
            .iter()
            .find(|var| var.name() == name)
            .map(|var| self.ctx.reify(&Term::Var(var.clone())))
    }

    /// Every query variable with its value, in order of first occurrence.
    ///
    /// Variables are keyed by name. Distinct variables can share a name when
    /// already indexed terms are passed back in; each later one is keyed
    /// `name#slot` with its slot in the query.
    #[must_use]
    pub fn bindings(&self) -> IndexMap<String, Term> {
        let mut bindings = IndexMap::new();
        for (slot, var) in self.variables.iter().enumerate() {
            let value = self.ctx.reify(&Term::Var(var.clone()));
            let name = var.name();
            if bindings.contains_key(name) {
                bindings.insert(format!("{name}#{slot}"), value);
            } else {
                bindings.insert(name.to_string(), value);
            }
        }
        bindings
    }

    /// Applies the solution's substitution to `term`.
    #[must_use]
    pub fn reify(&self, term: &Term) -> Term {
        self.ctx.reify(term)
    }
}

/// Result of a query - the variable bindings of one solution
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueryResult {
    /// Query variables and their values
    pub bindings: IndexMap<String, Term>,
}

/// Summary of a finished search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolveOutcome {
    /// Number of solutions delivered to the listener
    pub solutions: usize,
    /// Number of user predicate calls
    pub inferences: u64,
    /// Whether the listener stopped the search
    pub aborted: bool,
}

#[derive(Debug)]
enum Step {
    Call(Term),
    /// Drop every choice point above the given height
    CutTo(usize),
}

/// A pending goal. Frames form a persistent list shared between the current
/// continuation and the choice points that captured it.
#[derive(Debug)]
struct Frame {
    step: Step,
    /// Choice-stack height a cut in this goal returns to
    cut_barrier: usize,
    /// Number of clause activations enclosing this goal
    depth: usize,
    next: Cont,
}

type Cont = Option<Rc<Frame>>;

impl Drop for Frame {
    fn drop(&mut self) {
        // Unlink iteratively; long continuations would overflow the stack.
        let mut next = self.next.take();
        while let Some(frame) = next {
            match Rc::try_unwrap(frame) {
                Ok(mut frame) => next = frame.next.take(),
                Err(_) => break,
            }
        }
    }
}

fn push(step: Step, cut_barrier: usize, depth: usize, next: Cont) -> Cont {
    Some(Rc::new(Frame {
        step,
        cut_barrier,
        depth,
        next,
    }))
}

#[derive(Debug)]
enum Alternative {
    /// Remaining clauses of a predicate call
    Clauses {
        goal: Term,
        clauses: Rc<[Arc<Clause>]>,
        next: usize,
        depth: usize,
        cont: Cont,
    },
    /// The untried branch of a disjunction
    Goal {
        goal: Term,
        cut_barrier: usize,
        depth: usize,
        cont: Cont,
    },
}

#[derive(Debug)]
struct ChoicePoint<'s> {
    ctx: Context<'s>,
    /// Binding store length when the choice point was created
    mark: usize,
    alternative: Alternative,
}

enum Flow {
    Proceed,
    Backtrack,
}

fn if_then(term: &Term) -> Option<(&Term, &Term)> {
    match term {
        Term::Struct(s) if s.arity() == 2 && s.functor().name() == "->" => {
            Some((&s.args()[0], &s.args()[1]))
        }
        _ => None,
    }
}

/// The search state of one query.
struct Machine<'e, 's> {
    engine: &'e Engine,
    unifier: Unifier,
    bindings: &'s BindingStore,
    ctx: Context<'s>,
    cont: Cont,
    choices: Vec<ChoicePoint<'s>>,
    outcome: SolveOutcome,
}

impl<'s> Machine<'_, 's> {
    fn run<L: SolutionListener>(&mut self, variables: &[Var], listener: &mut L) -> Result<()> {
        loop {
            if self.engine.interrupted.load(Ordering::Relaxed) {
                return Err(EngineError::Interrupted);
            }

            let flow = match self.cont.take() {
                None => {
                    self.outcome.solutions += 1;
                    let solution = Solution {
                        ctx: self.ctx,
                        variables,
                    };
                    if listener.on_solution(&solution) == Signal::Abort {
                        self.outcome.aborted = true;
                        return Ok(());
                    }
                    Flow::Backtrack
                }
                Some(frame) => self.step(&frame)?,
            };

            if matches!(flow, Flow::Backtrack) && !self.backtrack() {
                return Ok(());
            }
        }
    }

    fn step(&mut self, frame: &Frame) -> Result<Flow> {
        match &frame.step {
            Step::CutTo(height) => {
                self.cut(*height);
                self.cont = frame.next.clone();
                Ok(Flow::Proceed)
            }
            Step::Call(goal) => self.call(goal, frame),
        }
    }

    fn call(&mut self, goal: &Term, frame: &Frame) -> Result<Flow> {
        let goal = self.ctx.deref(goal);
        let (name, args): (&str, &[Term]) = match &goal {
            Term::Atom(atom) => (atom.name(), &[]),
            Term::Struct(s) => (s.functor().name(), s.args()),
            Term::Var(_) => return Err(EngineError::Instantiation),
            Term::Number(_) => return Err(EngineError::NotCallable(goal.clone())),
        };
        let next = frame.next.clone();
        let cut = frame.cut_barrier;
        let depth = frame.depth;

        match (name, args) {
            ("true", []) => {
                self.cont = next;
                Ok(Flow::Proceed)
            }
            ("fail" | "false", []) => Ok(Flow::Backtrack),
            ("!", []) => {
                self.cut(cut);
                self.cont = next;
                Ok(Flow::Proceed)
            }
            (",", [left, right]) => {
                let rest = push(Step::Call(right.clone()), cut, depth, next);
                self.cont = push(Step::Call(left.clone()), cut, depth, rest);
                Ok(Flow::Proceed)
            }
            (";", [left, right]) => {
                if let Some((condition, then)) = if_then(left) {
                    self.if_then_else(condition, then, Some(right), cut, depth, next);
                } else {
                    self.push_choice(Alternative::Goal {
                        goal: right.clone(),
                        cut_barrier: cut,
                        depth,
                        cont: next.clone(),
                    });
                    self.cont = push(Step::Call(left.clone()), cut, depth, next);
                }
                Ok(Flow::Proceed)
            }
            ("->", [condition, then]) => {
                self.if_then_else(condition, then, None, cut, depth, next);
                Ok(Flow::Proceed)
            }
            ("\\+" | "not", [inner]) => {
                let height = self.choices.len();
                self.push_choice(Alternative::Goal {
                    goal: Term::atom("true"),
                    cut_barrier: cut,
                    depth,
                    cont: next,
                });
                let barrier = self.choices.len();
                let fail = push(Step::Call(Term::atom("fail")), cut, depth, None);
                let commit = push(Step::CutTo(height), cut, depth, fail);
                self.cont = push(Step::Call(inner.clone()), barrier, depth, commit);
                Ok(Flow::Proceed)
            }
            ("call", [target, extra @ ..]) => {
                let callee = self.callee(target, extra)?;
                let height = self.choices.len();
                self.cont = push(Step::Call(callee), height, depth, next);
                Ok(Flow::Proceed)
            }
            ("=", [left, right]) => match self.unifier.unify(self.ctx, left, right) {
                Some(ctx) => {
                    self.ctx = ctx;
                    self.cont = next;
                    Ok(Flow::Proceed)
                }
                None => Ok(Flow::Backtrack),
            },
            ("\\=", [left, right]) => {
                if self.unifier.unify(self.ctx, left, right).is_some() {
                    Ok(Flow::Backtrack)
                } else {
                    self.cont = next;
                    Ok(Flow::Proceed)
                }
            }
            ("," | ";" | "->" | "\\+" | "!" | "call", _) => Err(EngineError::MalformedControl {
                indicator: indicator(name, args.len()),
            }),
            _ => self.resolve(&goal, &indicator(name, args.len()), depth, next),
        }
    }

    /// `C -> T ; E`: the condition runs behind its own barrier and the first
    /// solution commits, discarding the condition's alternatives and `E`.
    fn if_then_else(
        &mut self,
        condition: &Term,
        then: &Term,
        otherwise: Option<&Term>,
        cut: usize,
        depth: usize,
        next: Cont,
    ) {
        let height = self.choices.len();
        if let Some(otherwise) = otherwise {
            self.push_choice(Alternative::Goal {
                goal: otherwise.clone(),
                cut_barrier: cut,
                depth,
                cont: next.clone(),
            });
        }
        // A cut in the condition stays above the else branch.
        let barrier = self.choices.len();
        let then = push(Step::Call(then.clone()), cut, depth, next);
        let commit = push(Step::CutTo(height), cut, depth, then);
        self.cont = push(Step::Call(condition.clone()), barrier, depth, commit);
    }

    /// The goal run by `call(Target, Extra...)`.
    fn callee(&self, target: &Term, extra: &[Term]) -> Result<Term> {
        match self.ctx.deref(target) {
            Term::Var(_) => Err(EngineError::Instantiation),
            number @ Term::Number(_) => Err(EngineError::NotCallable(number)),
            Term::Atom(atom) if extra.is_empty() => Ok(Term::Atom(atom)),
            Term::Atom(atom) => Ok(Struct::new(atom, extra.to_vec()).into()),
            Term::Struct(s) if extra.is_empty() => Ok(Term::Struct(s)),
            Term::Struct(s) => {
                let mut args = s.args().to_vec();
                args.extend_from_slice(extra);
                Ok(Struct::new(s.functor().clone(), args).into())
            }
        }
    }

    fn resolve(&mut self, goal: &Term, key: &str, depth: usize, next: Cont) -> Result<Flow> {
        let limit = self.engine.config.max_depth;
        if depth >= limit {
            return Err(EngineError::DepthExceeded { limit });
        }
        self.outcome.inferences += 1;
        if let Some(limit) = self.engine.config.max_inferences {
            if self.outcome.inferences > limit {
                return Err(EngineError::InferenceLimit { limit });
            }
        }

        let clauses: Rc<[Arc<Clause>]> = self.engine.store.matching_clauses(key).into();
        if clauses.is_empty() {
            log::trace!("no clauses for {key}");
            return Ok(Flow::Backtrack);
        }
        let goal: Term = match goal {
            Term::Atom(atom) => Struct::new(atom.clone(), Vec::new()).into(),
            other => other.clone(),
        };
        Ok(self.try_clauses(goal, clauses, 0, depth, next))
    }

    /// Tries `clauses[start..]` in order and commits to the first whose head
    /// unifies with `goal`, leaving a choice point for the rest.
    fn try_clauses(
        &mut self,
        goal: Term,
        clauses: Rc<[Arc<Clause>]>,
        start: usize,
        depth: usize,
        next: Cont,
    ) -> Flow {
        let barrier = self.choices.len();
        let mark = self.bindings.len();

        for position in start..clauses.len() {
            let clause = &clauses[position];
            let (renamed, head, body) = clause.rename(self.ctx);
            log::trace!("trying {} clause #{position} for {goal}", clause.key());
            let Some(ctx) = self.unifier.unify(renamed, &goal, &head) else {
                self.reclaim(mark);
                continue;
            };

            if position + 1 < clauses.len() {
                self.choices.push(ChoicePoint {
                    ctx: self.ctx,
                    mark,
                    alternative: Alternative::Clauses {
                        goal: goal.clone(),
                        clauses: Rc::clone(&clauses),
                        next: position + 1,
                        depth,
                        cont: next.clone(),
                    },
                });
            }
            self.ctx = ctx;
            self.cont = if clause.is_fact() {
                next
            } else {
                push(Step::Call(body), barrier, depth + 1, next)
            };
            return Flow::Proceed;
        }

        Flow::Backtrack
    }

    /// Resumes the most recent choice point. Returns `false` when none is left.
    fn backtrack(&mut self) -> bool {
        while let Some(choice) = self.choices.pop() {
            self.reclaim(choice.mark);
            self.ctx = choice.ctx;
            match choice.alternative {
                Alternative::Goal {
                    goal,
                    cut_barrier,
                    depth,
                    cont,
                } => {
                    log::trace!("backtracking into {goal}");
                    self.cont = push(Step::Call(goal), cut_barrier, depth, cont);
                    return true;
                }
                Alternative::Clauses {
                    goal,
                    clauses,
                    next,
                    depth,
                    cont,
                } => {
                    if let Flow::Proceed = self.try_clauses(goal, clauses, next, depth, cont) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn push_choice(&mut self, alternative: Alternative) {
        self.choices.push(ChoicePoint {
            ctx: self.ctx,
            mark: self.bindings.len(),
            alternative,
        });
    }

    fn cut(&mut self, height: usize) {
        if self.choices.len() > height {
            log::trace!("cut drops {} choice points", self.choices.len() - height);
            self.choices.truncate(height);
        }
    }

    fn reclaim(&self, mark: usize) {
        if self.engine.config.reclaim_bindings {
            self.bindings.truncate(mark);
        }
    }
}

/// The resolution engine.
///
/// Clauses come from the engine's own static theory, its dynamic database and
/// any provider registered afterwards, consulted in that order.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: ClauseStore,
    theory: Arc<Theory>,
    database: Arc<DynamicClauses>,
    interrupted: Arc<AtomicBool>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create a new engine with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new engine with `config`
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let theory = Arc::new(Theory::new());
        let database = Arc::new(DynamicClauses::new());
        let mut store = ClauseStore::new();
        store.register_global(theory.clone());
        store.register_global(database.clone());
        Self {
            config,
            store,
            theory,
            database,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adds a fact or rule (`Head :- Body`) to the static theory.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when `term` is not a valid clause.
    pub fn add_clause(&mut self, term: &Term) -> Result<(), ClauseError> {
        let clause = Clause::new(term)?;
        log::debug!("adding clause for {}", clause.key());
        self.theory.add(clause);
        Ok(())
    }

    /// Adds the rule `head :- body` to the static theory.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when the head is not callable or the body is a
    /// number.
    pub fn add_rule(&mut self, head: &Term, body: &Term) -> Result<(), ClauseError> {
        let clause = Clause::rule(head, body)?;
        log::debug!("adding rule for {}", clause.key());
        self.theory.add(clause);
        Ok(())
    }

    /// The static theory.
    #[must_use]
    pub fn theory(&self) -> &Arc<Theory> {
        &self.theory
    }

    /// The dynamic database, for sharing with code that asserts at run time.
    #[must_use]
    pub fn database(&self) -> &Arc<DynamicClauses> {
        &self.database
    }

    /// Appends a clause to the dynamic database and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`ClauseError`] when `term` is not a valid clause.
    pub fn assert_clause(&self, term: &Term) -> Result<usize, ClauseError> {
        let index = self.database.assert_clause(term)?;
        log::debug!("asserted {term} at {index}");
        Ok(index)
    }

    /// Retracts the dynamic clause at `index`. Returns whether one was there.
    pub fn retract_at(&self, index: usize) -> bool {
        let removed = self.database.retract_at(index).is_some();
        log::debug!("retract at {index}: {removed}");
        removed
    }

    /// Drops dynamic clause `index` and every later one.
    pub fn retract_to_before_index(&self, index: usize) {
        log::debug!("retracting dynamic clauses from {index}");
        self.database.retract_to_before_index(index);
    }

    /// Drops every dynamic clause.
    pub fn retract_all(&self) {
        log::debug!("retracting all dynamic clauses");
        self.database.retract_all();
    }

    /// Registers an external provider for predicate indicator `key`.
    pub fn register(&mut self, key: impl Into<String>, provider: Arc<dyn ClauseProvider>) {
        let key = key.into();
        log::debug!("registering provider for {key}");
        self.store.register(key, provider);
    }

    /// Registers an external provider consulted for every predicate.
    pub fn register_global(&mut self, provider: Arc<dyn ClauseProvider>) {
        log::debug!("registering global provider");
        self.store.register_global(provider);
    }

    /// All clauses the engine would try for predicate indicator `key`.
    #[must_use]
    pub fn clauses(&self, key: &str) -> Vec<Arc<Clause>> {
        self.store.matching_clauses(key)
    }

    /// A flag that stops the running query with
    /// [`EngineError::Interrupted`] when set. Cleared when a query starts.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Enumerates the solutions of `goal`, handing each to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for malformed goals and when a limit or the
    /// interrupt flag ends the search. Solutions already delivered stand.
    pub fn solve<L: SolutionListener>(&self, goal: &Term, mut listener: L) -> Result<SolveOutcome> {
        let query = normalize(goal);
        let bindings = BindingStore::new();
        let (ctx, _) = bindings.context().allocate(query.var_count());
        self.interrupted.store(false, Ordering::Relaxed);
        log::debug!("solving {goal}");

        let mut machine = Machine {
            engine: self,
            unifier: if self.config.occurs_check {
                Unifier::with_occurs_check()
            } else {
                Unifier::new()
            },
            bindings: &bindings,
            ctx,
            cont: push(Step::Call(query.term.clone()), 0, 0, None),
            choices: Vec::new(),
            outcome: SolveOutcome::default(),
        };

        match machine.run(&query.variables, &mut listener) {
            Ok(()) => {
                log::debug!(
                    "solved {goal}: {} solutions, {} inferences",
                    machine.outcome.solutions,
                    machine.outcome.inferences
                );
                Ok(machine.outcome)
            }
            Err(error) => {
                log::warn!("query {goal} stopped: {error}");
                Err(error)
            }
        }
    }

    /// Returns the bindings of every solution of `goal`, in order.
    ///
    /// # Errors
    ///
    /// See [`Engine::solve`].
    pub fn query(&self, goal: &Term) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        self.solve(goal, |solution: &Solution<'_>| {
            results.push(QueryResult {
                bindings: solution.bindings(),
            });
            Signal::Continue
        })?;
        Ok(results)
    }

    /// Returns whether `goal` has at least one solution.
    ///
    /// # Errors
    ///
    /// See [`Engine::solve`].
    pub fn ask(&self, goal: &Term) -> Result<bool> {
        let outcome = self.solve(goal, |_: &Solution<'_>| Signal::Abort)?;
        Ok(outcome.solutions > 0)
    }
}
