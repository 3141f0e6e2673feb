use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::{smallvec, SmallVec};

/// Name of the anonymous variable.
pub const ANONYMOUS: &str = "_";

/// Functor used for list cells (`'.'(Head, Tail)`).
pub const LIST_FUNCTOR: &str = ".";

/// Atom terminating a proper list.
pub const NIL: &str = "[]";

/// Arity marker used by variadic predicate indicators (`name/*`).
pub const VARIADIC_ARITY: &str = "*";

fn symbols() -> &'static RwLock<HashSet<Arc<str>>> {
    static SYMBOLS: OnceLock<RwLock<HashSet<Arc<str>>>> = OnceLock::new();
    SYMBOLS.get_or_init(|| RwLock::new(HashSet::new()))
}

/// An interned symbolic name.
///
/// Two atoms are equal iff they share the same interned string, so comparing
/// functors never touches the characters.
#[derive(Clone)]
pub struct Atom(Arc<str>);

impl Atom {
    /// Interns `name` and returns its canonical atom.
    #[must_use]
    pub fn new(name: &str) -> Self {
        {
            let table = symbols().read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = table.get(name) {
                return Self(Arc::clone(existing));
            }
        }

        let mut table = symbols().write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(name) {
            return Self(Arc::clone(existing));
        }
        let interned: Arc<str> = Arc::from(name);
        table.insert(Arc::clone(&interned));
        Self(interned)
    }

    /// The atom's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    fn needs_quotes(&self) -> bool {
        let name = self.name();
        if matches!(name, NIL | "!" | ";" | "{}") {
            return false;
        }
        let mut chars = name.chars();
        match chars.next() {
            None => true,
            Some(first) if first.is_ascii_lowercase() => {
                !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            Some(_) => !name.chars().all(|c| "+-*/\\^<>=~:.?@#&$".contains(c)),
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).cast::<u8>().hash(state);
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.name())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.needs_quotes() {
            f.write_str("'")?;
            for c in self.name().chars() {
                match c {
                    '\'' => f.write_str("\\'")?,
                    '\\' => f.write_str("\\\\")?,
                    _ => write!(f, "{c}")?,
                }
            }
            f.write_str("'")
        } else {
            f.write_str(self.name())
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::new(&name))
    }
}

/// A numeric constant. Equality is by value and kind, so `1` and `1.0` differ.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Number {
    /// A signed integer
    Int(i64),
    /// A double precision float
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

/// A logical variable.
///
/// The index is the variable's slot, assigned by normalization (for clause
/// and query variables) or by renaming (for fresh clause instances). Indexed
/// variables are identified by their index alone; the name is only for
/// display.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Var {
    name: Arc<str>,
    index: Option<usize>,
}

impl Var {
    /// A named variable without an index, as produced by a parser.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            index: None,
        }
    }

    /// A variable occupying slot `index`.
    #[must_use]
    pub fn indexed(name: Arc<str>, index: usize) -> Self {
        Self {
            name,
            index: Some(index),
        }
    }

    /// The anonymous variable `_`.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS)
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    /// Slot index, or `None` for unnormalized and anonymous variables.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Whether this is the anonymous variable.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        &*self.name == ANONYMOUS
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        match (self.index, other.index) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A compound term: a functor applied to an ordered argument list.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Struct {
    functor: Atom,
    args: Vec<Term>,
    var_count: usize,
}

impl Struct {
    /// Builds a struct. Its variable count is zero until normalized.
    #[must_use]
    pub fn new(functor: Atom, args: Vec<Term>) -> Self {
        Self {
            functor,
            args,
            var_count: 0,
        }
    }

    pub(crate) fn with_var_count(functor: Atom, args: Vec<Term>, var_count: usize) -> Self {
        Self {
            functor,
            args,
            var_count,
        }
    }

    /// The functor.
    #[must_use]
    pub fn functor(&self) -> &Atom {
        &self.functor
    }

    /// The arguments, in order.
    #[must_use]
    pub fn args(&self) -> &[Term] {
        &self.args
    }

    /// Number of arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Number of distinct variables below this struct, as computed by
    /// normalization. Zero for a normalized struct means it is ground.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.var_count
    }

    /// The predicate indicator `functor/arity`.
    #[must_use]
    pub fn indicator(&self) -> String {
        indicator(self.functor.name(), self.arity())
    }

    /// Whether `other` has the same functor and arity.
    #[must_use]
    pub fn same_indicator(&self, other: &Struct) -> bool {
        self.functor == other.functor && self.arity() == other.arity()
    }

    fn is_list_cell(&self) -> bool {
        self.arity() == 2 && self.functor.name() == LIST_FUNCTOR
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        let mut pending: SmallVec<[(&Struct, &Struct); 16]> = smallvec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            if std::ptr::eq(left, right) {
                continue;
            }
            if !left.same_indicator(right) {
                return false;
            }
            for pair in left.args.iter().zip(&right.args) {
                match pair {
                    (Term::Struct(a), Term::Struct(b)) => pending.push((a, b)),
                    (a, b) => {
                        if a != b {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}

impl Drop for Struct {
    fn drop(&mut self) {
        // Drain uniquely owned children here; long lists would overflow the
        // stack through nested drops.
        let mut pending = std::mem::take(&mut self.args);
        while let Some(term) = pending.pop() {
            if let Term::Struct(child) = term {
                if let Ok(mut child) = Arc::try_unwrap(child) {
                    pending.append(&mut child.args);
                }
            }
        }
    }
}

/// How [`fold`] treats a subterm it enters.
pub(crate) enum Fold<R> {
    /// The subterm's value, without looking at its children
    Done(R),
    /// Visit the struct's arguments, then combine them
    Descend(Arc<Struct>),
}

struct Pending<R> {
    node: Arc<Struct>,
    done: Vec<R>,
}

/// Rebuilds a term bottom-up on an explicit stack.
///
/// `enter` sees each subterm before its arguments, left to right. `exit`
/// receives a struct entered with [`Fold::Descend`] together with the values of
/// its arguments.
pub(crate) fn fold<R>(
    term: &Term,
    mut enter: impl FnMut(&Term) -> Fold<R>,
    mut exit: impl FnMut(&Arc<Struct>, Vec<R>) -> R,
) -> R {
    let mut stack: Vec<Pending<R>> = Vec::new();
    let mut step = enter(term);
    loop {
        let mut value = match step {
            Fold::Descend(node) if node.arity() > 0 => {
                step = enter(&node.args[0]);
                stack.push(Pending {
                    done: Vec::with_capacity(node.arity()),
                    node,
                });
                continue;
            }
            Fold::Descend(node) => exit(&node, Vec::new()),
            Fold::Done(value) => value,
        };
        loop {
            let Some(mut top) = stack.pop() else {
                return value;
            };
            top.done.push(value);
            let index = top.done.len();
            if index < top.node.arity() {
                step = enter(&top.node.args[index]);
                stack.push(top);
                break;
            }
            value = exit(&top.node, top.done);
        }
    }
}

/// Formats a predicate indicator.
#[must_use]
pub fn indicator(name: &str, arity: usize) -> String {
    format!("{name}/{arity}")
}

/// Formats the variadic indicator `name/*`.
#[must_use]
pub fn variadic_indicator(name: &str) -> String {
    format!("{name}/{VARIADIC_ARITY}")
}

/// A logic term.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Term {
    /// A symbolic constant
    Atom(Atom),
    /// A numeric constant
    Number(Number),
    /// A logical variable
    Var(Var),
    /// A compound term
    Struct(Arc<Struct>),
}

impl Term {
    /// An atom term.
    #[must_use]
    pub fn atom(name: &str) -> Self {
        Self::Atom(Atom::new(name))
    }

    /// An integer term.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::Number(Number::Int(value))
    }

    /// A float term.
    #[must_use]
    pub fn float(value: f64) -> Self {
        Self::Number(Number::Float(value))
    }

    /// An unnormalized named variable.
    #[must_use]
    pub fn var(name: &str) -> Self {
        Self::Var(Var::new(name))
    }

    /// The anonymous variable.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::Var(Var::anonymous())
    }

    /// `functor(args...)`. With no arguments this is still a struct of
    /// arity zero; use [`Term::atom`] for a plain atom.
    #[must_use]
    pub fn compound(functor: &str, args: Vec<Term>) -> Self {
        Self::Struct(Arc::new(Struct::new(Atom::new(functor), args)))
    }

    /// The empty list `[]`.
    #[must_use]
    pub fn nil() -> Self {
        Self::atom(NIL)
    }

    /// A proper list of `items`.
    #[must_use]
    pub fn list(items: Vec<Term>) -> Self {
        Self::list_with_tail(items, Self::nil())
    }

    /// A list of `items` ending in `tail`.
    #[must_use]
    pub fn list_with_tail(items: Vec<Term>, tail: Term) -> Self {
        items.into_iter().rev().fold(tail, |rest, item| {
            Self::compound(LIST_FUNCTOR, vec![item, rest])
        })
    }

    /// Right-nested conjunction of `goals`; `true` when empty.
    #[must_use]
    pub fn conjunction(goals: Vec<Term>) -> Self {
        let mut goals = goals.into_iter().rev();
        match goals.next() {
            None => Self::atom("true"),
            Some(last) => goals.fold(last, |rest, goal| Self::compound(",", vec![goal, rest])),
        }
    }

    /// Whether this term can be used as a goal.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Atom(_) | Self::Struct(_))
    }

    /// Whether this is the atom named `name`.
    #[must_use]
    pub fn is_atom_named(&self, name: &str) -> bool {
        matches!(self, Self::Atom(atom) if atom.name() == name)
    }

    /// The struct behind this term, if any.
    #[must_use]
    pub fn as_struct(&self) -> Option<&Arc<Struct>> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The variable behind this term, if any.
    #[must_use]
    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Self::Var(var) => Some(var),
            _ => None,
        }
    }

    /// The predicate indicator of a callable term.
    #[must_use]
    pub fn indicator(&self) -> Option<String> {
        match self {
            Self::Atom(atom) => Some(indicator(atom.name(), 0)),
            Self::Struct(s) => Some(s.indicator()),
            _ => None,
        }
    }

    /// Reference identity: the same struct allocation, the same atom, or the
    /// same indexed variable.
    #[must_use]
    pub fn same_ref(&self, other: &Term) -> bool {
        match (self, other) {
            (Self::Struct(a), Self::Struct(b)) => Arc::ptr_eq(a, b),
            (Self::Atom(a), Self::Atom(b)) => a == b,
            (Self::Var(a), Self::Var(b)) => a.index.is_some() && a.index == b.index,
            _ => false,
        }
    }

    /// Collects the elements of a proper list.
    #[must_use]
    pub fn list_items(&self) -> Option<Vec<Term>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Self::Atom(atom) if atom.name() == NIL => return Some(items),
                Self::Struct(cell) if cell.is_list_cell() => {
                    items.push(cell.args[0].clone());
                    current = &cell.args[1];
                }
                _ => return None,
            }
        }
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<Atom> for Term {
    fn from(atom: Atom) -> Self {
        Self::Atom(atom)
    }
}

impl From<Struct> for Term {
    fn from(s: Struct) -> Self {
        Self::Struct(Arc::new(s))
    }
}

/// Pieces of a term still to be written by `Display`.
enum Piece<'a> {
    Term(&'a Term),
    /// What follows the first element of a list
    ListTail(&'a Term),
    Text(&'static str),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending: SmallVec<[Piece<'_>; 16]> = smallvec![Piece::Term(self)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Term(Self::Atom(atom)) => write!(f, "{atom}")?,
                Piece::Term(Self::Number(number)) => write!(f, "{number}")?,
                Piece::Term(Self::Var(var)) => write!(f, "{var}")?,
                Piece::Term(Self::Struct(s)) if s.is_list_cell() => {
                    f.write_str("[")?;
                    pending.push(Piece::Text("]"));
                    pending.push(Piece::ListTail(&s.args[1]));
                    pending.push(Piece::Term(&s.args[0]));
                }
                Piece::Term(Self::Struct(s)) => {
                    write!(f, "{}(", s.functor)?;
                    pending.push(Piece::Text(")"));
                    for (position, arg) in s.args.iter().enumerate().rev() {
                        pending.push(Piece::Term(arg));
                        if position > 0 {
                            pending.push(Piece::Text(","));
                        }
                    }
                }
                Piece::ListTail(Self::Struct(cell)) if cell.is_list_cell() => {
                    pending.push(Piece::ListTail(&cell.args[1]));
                    pending.push(Piece::Term(&cell.args[0]));
                    pending.push(Piece::Text(","));
                }
                Piece::ListTail(Self::Atom(atom)) if atom.name() == NIL => {}
                Piece::ListTail(other) => {
                    pending.push(Piece::Term(other));
                    pending.push(Piece::Text("|"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms_are_interned() {
        let first = Atom::new("parent");
        let second = Atom::new(&String::from("parent"));
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first.0, &second.0));
        assert_ne!(first, Atom::new("child"));
    }

    #[test]
    fn test_number_equality_respects_kind() {
        assert_eq!(Term::int(1), Term::int(1));
        assert_ne!(Term::int(1), Term::float(1.0));
        assert_eq!(Term::float(2.5), Term::float(2.5));
    }

    #[test]
    fn test_indicator_format() {
        let goal = Term::compound("edge", vec![Term::atom("a"), Term::var("X")]);
        assert_eq!(goal.indicator().as_deref(), Some("edge/2"));
        assert_eq!(Term::atom("halt").indicator().as_deref(), Some("halt/0"));
        assert_eq!(Term::int(3).indicator(), None);
        assert_eq!(variadic_indicator("format"), "format/*");
    }

    #[test]
    fn test_var_identity_uses_index() {
        let x = Var::indexed(Arc::from("X"), 4);
        let renamed = Var::indexed(Arc::from("Y"), 4);
        assert_eq!(x, renamed, "Indexed variables are identified by slot");
        assert_ne!(Var::new("X"), Var::new("Y"));
        assert!(Var::anonymous().is_anonymous());
        assert_eq!(Var::anonymous().index(), None);
    }

    #[test]
    fn test_list_round_trip_through_items() {
        let list = Term::list(vec![Term::atom("a"), Term::atom("b"), Term::atom("c")]);
        let items = list.list_items().unwrap();
        assert_eq!(items, vec![Term::atom("a"), Term::atom("b"), Term::atom("c")]);
        assert_eq!(Term::nil().list_items(), Some(Vec::new()));
        assert_eq!(Term::var("T").list_items(), None);
    }

    #[test]
    fn test_conjunction_nests_to_the_right() {
        let goal = Term::conjunction(vec![Term::atom("a"), Term::atom("b"), Term::atom("c")]);
        assert_eq!(goal.to_string(), "','(a,','(b,c))");
        assert!(Term::conjunction(Vec::new()).is_atom_named("true"));
    }

    #[test]
    fn test_display() {
        let term = Term::compound(
            "point",
            vec![Term::int(1), Term::float(2.0), Term::var("Z"), Term::atom("Hello world")],
        );
        assert_eq!(term.to_string(), "point(1,2.0,Z,'Hello world')");

        let partial = Term::list_with_tail(vec![Term::int(1), Term::int(2)], Term::var("T"));
        assert_eq!(partial.to_string(), "[1,2|T]");
        assert_eq!(Term::nil().to_string(), "[]");
        assert_eq!(Term::atom("=..").to_string(), "=..");
        assert_eq!(Term::atom("it's").to_string(), "'it\\'s'");
    }

    #[test]
    fn test_same_ref() {
        let shared = Term::compound("f", vec![Term::atom("a")]);
        let copy = Term::compound("f", vec![Term::atom("a")]);
        assert!(shared.same_ref(&shared.clone()));
        assert!(!shared.same_ref(&copy), "Structurally equal but distinct allocations");
        assert_eq!(shared, copy);
        assert!(!Term::var("X").same_ref(&Term::var("X")), "Unindexed vars are never identical");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_reinterns_atoms() {
        let term = Term::compound("likes", vec![Term::atom("alice"), Term::int(3)]);
        let json = serde_json::to_string(&term).unwrap();
        let back: Term = serde_json::from_str(&json).unwrap();
        assert_eq!(back, term);
        let Term::Struct(s) = back else {
            panic!("expected a struct");
        };
        assert_eq!(s.functor(), &Atom::new("likes"));
    }

    #[test]
    fn test_deep_terms_compare_display_and_drop() {
        let long = Term::list((0..200_000).map(Term::int).collect());
        let copy = Term::list((0..200_000).map(Term::int).collect());
        assert!(long == copy, "Structural equality walks the whole list");
        let text = long.to_string();
        assert!(text.starts_with("[0,1,2,"));
        assert!(text.ends_with(",199999]"));

        let mut nested = Term::atom("z");
        for _ in 0..200_000 {
            nested = Term::compound("f", vec![nested]);
        }
        assert!(nested.to_string().starts_with("f(f(f("));
        assert!(nested != Term::atom("z"));
        drop((long, copy, nested));
    }

    #[test]
    fn test_display_of_partial_lists_and_operators() {
        let partial = Term::list_with_tail(vec![Term::int(1), Term::int(2)], Term::var("T"));
        assert_eq!(partial.to_string(), "[1,2|T]");
        let goal = Term::compound(",", vec![Term::atom("a"), Term::compound("g", vec![])]);
        assert_eq!(goal.to_string(), "','(a,g())");
    }
}
