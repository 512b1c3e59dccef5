//! Abstract syntax tree produced by the parser and mutated in place by the
//! two resolver passes.
//!
//! The reference implementation threads a generic `Ast<T>` consuming
//! transform through its passes. This crate instead mutates `Send` and
//! `Block` nodes through `&mut` in place (see DESIGN.md) — simpler for a
//! fixed two-pass, non-generic pipeline.

use crate::position::Position;

pub mod symbol;

pub use symbol::symbol_arity;

pub type Tag = i64;

/// A block's slot: a named, optionally mutable field.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Slot {
    pub name: String,
    pub mutable: bool,
    pub index: usize,
}

impl Slot {
    pub fn setter_symbol(&self) -> String {
        format!("{}:", self.name)
    }
}

/// Where a resolved `Send` with no explicit receiver ultimately points.
/// Populated by the resolver; absent before resolution and absent for sends
/// that keep an explicit receiver expression.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum ResolvedTarget {
    /// A read of a local variable (or method argument) in the innermost
    /// enclosing method — never capturable across a block literal boundary,
    /// since these live on the call stack, not on a heap object.
    Local(usize),
    /// A read of `self`'s own slot, or (when the index is `>= ` the owning
    /// block's slot count) a direct self-send to one of its own methods.
    SelfSlot(usize),
    /// A capture of a slot belonging to an ancestor block, `depth` frames
    /// above the block the `Send` lexically sits in (`depth >= 1`). Pass B
    /// walks this many block boundaries outward, adding a synthetic slot of
    /// the same name to every block in the chain.
    Capture(usize),
    /// The bare `self` keyword: the current method's receiver itself, not a
    /// lookup of any kind.
    SelfObject,
    /// The bare `true`/`false` keywords, parsed into references to the
    /// fixed built-in `True`/`False` constants.
    BuiltinConstant(&'static str),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Method {
    pub symbol: String,
    pub arg_names: Vec<String>,
    pub body: Expr,
}

impl Method {
    pub fn new(symbol: impl Into<String>, arg_names: Vec<String>, body: Expr) -> Self {
        Method { symbol: symbol.into(), arg_names, body }
    }
}

/// A user-defined object literal: a set of slots plus a set of methods.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Block {
    pub slots: Vec<Slot>,
    pub methods: Vec<Method>,
    /// Set once tag allocation runs (C4): `true` when this block has no
    /// slots, or is otherwise provably singleton, and is therefore encoded
    /// as a constant rather than allocated on the heap.
    pub is_constant: bool,
    pub tag: Option<Tag>,
    /// Set by allocate_ids when `is_constant` holds: the small per-constant
    /// id distinct from (and narrower than) `tag`.
    pub tag_constant: Option<i64>,
}

impl Block {
    pub fn new(slots: Vec<Slot>, methods: Vec<Method>) -> Self {
        let is_constant = slots.is_empty();
        Block { slots, methods, is_constant, tag: None, tag_constant: None }
    }

    pub fn empty() -> Self {
        Block::new(Vec::new(), Vec::new())
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    /// Add a synthetic capture slot (pass B); returns its index.
    pub fn push_capture_slot(&mut self, name: impl Into<String>) -> usize {
        let index = self.slots.len();
        self.slots.push(Slot { name: name.into(), mutable: false, index });
        self.is_constant = false;
        index
    }

    /// Whether `symbol` is bound somewhere in this block's namespace: a slot
    /// (or its setter), or a method. Slots and methods share one namespace
    /// (spec §3), so "does this block define `main`" has to check both —
    /// grounded in `compiler.py`'s `'main' not in toplevel_block.symbols`,
    /// where `symbols` is exactly this union.
    pub fn defines(&self, symbol: &str) -> bool {
        self.slots.iter().any(|s| s.name == symbol || (s.mutable && s.setter_symbol() == symbol)) || self.methods.iter().any(|m| m.symbol == symbol)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Number {
    pub significand: i64,
    pub exponent: i32,
    pub position: Position,
}

/// A message-send expression, the fundamental operation.
///
/// `receiver: None` denotes either a bare name lookup (resolved by the
/// resolver into `target`) or, once resolved, stays `None` with `target`
/// set; a `Some` receiver is always a dynamic send to that expression's
/// value and is never touched by the resolver.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Send {
    pub receiver: Option<Box<Expr>>,
    pub symbol: String,
    pub args: Vec<Expr>,
    pub position: Position,
    /// Set by the resolver (pass A) for receiver-less sends; `None` for
    /// sends with an explicit receiver or before resolution runs.
    pub target: Option<ResolvedTarget>,
    /// Set by the program builder (C5) when the receiver's tag is known
    /// statically, enabling a direct-call IR lowering instead of dynamic
    /// dispatch.
    pub receiver_block_tag: Option<Tag>,
}

impl Send {
    pub fn new(receiver: Option<Expr>, symbol: impl Into<String>, args: Vec<Expr>, position: Position) -> Self {
        Send {
            receiver: receiver.map(Box::new),
            symbol: symbol.into(),
            args,
            position,
            target: None,
            receiver_block_tag: None,
        }
    }

    pub fn is_private(&self) -> bool {
        self.symbol.starts_with('~')
    }

    pub fn arity(&self) -> usize {
        symbol_arity(&self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Expr {
    Send(Send),
    Number(Number),
    String(String),
    Array(Vec<Expr>),
    Block(Box<Block>),
    /// Statement list; value is the last statement. Produced by parenthesised
    /// groups and method bodies with more than one statement.
    Sequence(Vec<Expr>),
    /// `name = value` or `name := value` inside a block or statement list.
    LocalVariable { name: String, mutable: bool, value: Box<Expr> },
}

impl Expr {
    pub fn position(&self) -> Option<&Position> {
        match self {
            Expr::Send(s) => Some(&s.position),
            Expr::Number(n) => Some(&n.position),
            _ => None,
        }
    }
}

/// The synthetic wrapper placed around the toplevel block so it can be
/// treated uniformly as a zero-argument method by every later stage.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TopLevelMethod {
    pub symbol: String,
    pub arg_names: Vec<String>,
    pub body: Expr,
}

impl TopLevelMethod {
    pub fn wrap(body: Expr) -> Self {
        TopLevelMethod { symbol: String::new(), arg_names: Vec::new(), body }
    }
}

/// Generic AST walk, dispatching on node variant. Used by the program
/// builder to collect every `Block`/`Send` in the program (C5).
pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Send(send) => {
            if let Some(receiver) = &send.receiver {
                walk_expr(receiver, visit);
            }
            for arg in &send.args {
                walk_expr(arg, visit);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                walk_expr(e, visit);
            }
        }
        Expr::Block(block) => {
            for method in &block.methods {
                walk_expr(&method.body, visit);
            }
        }
        Expr::LocalVariable { value, .. } => walk_expr(value, visit),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

pub fn walk_expr_mut(expr: &mut Expr, visit: &mut dyn FnMut(&mut Expr)) {
    visit(expr);
    match expr {
        Expr::Send(send) => {
            if let Some(receiver) = send.receiver.as_deref_mut() {
                walk_expr_mut(receiver, visit);
            }
            for arg in &mut send.args {
                walk_expr_mut(arg, visit);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                walk_expr_mut(e, visit);
            }
        }
        Expr::Block(block) => {
            for method in &mut block.methods {
                walk_expr_mut(&mut method.body, visit);
            }
        }
        Expr::LocalVariable { value, .. } => walk_expr_mut(value, visit),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Position {
        Position::new("<test>", 1, 0, "")
    }

    #[test]
    fn empty_block_is_constant() {
        let b = Block::empty();
        assert!(b.is_constant);
    }

    #[test]
    fn block_with_slots_is_not_constant() {
        let b = Block::new(vec![Slot { name: "x".into(), mutable: false, index: 0 }], vec![]);
        assert!(!b.is_constant);
    }

    #[test]
    fn push_capture_slot_assigns_sequential_indices() {
        let mut b = Block::empty();
        let i0 = b.push_capture_slot("a");
        let i1 = b.push_capture_slot("b");
        assert_eq!((i0, i1), (0, 1));
        assert!(!b.is_constant);
    }

    #[test]
    fn walk_expr_visits_nested_sends() {
        let inner = Expr::Send(Send::new(None, "foo", vec![], pos()));
        let outer = Expr::Send(Send::new(Some(inner), "bar", vec![], pos()));
        let mut count = 0;
        walk_expr(&outer, &mut |_| count += 1);
        assert_eq!(count, 2);
    }
}
