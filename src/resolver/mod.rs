//! Two-pass name resolution: free-variable resolution (pass A) followed by
//! block-reference resolution (pass B), closing the object graph (spec §4.3).
//!
//! Grounded in the teacher's scope push/pop idiom
//! (`typechecker/mod.rs: Typechecker::check_block`), adapted to OME's
//! nested-block/capture semantics rather than Y's lexical type scopes.

use crate::ast::{Block, Expr, ResolvedTarget, TopLevelMethod};
use crate::error::OmeError;

/// One entry on the scope stack: the set of names visible in a single block,
/// plus a back-pointer to the block node itself so pass B can add capture
/// slots to it in place.
struct ScopeFrame {
    /// Raw pointer-free index into the block arena would be ideal, but
    /// resolution mutates blocks in place through the AST itself, so this
    /// frame only needs to answer "is `name` visible here, and at what
    /// slot/arg index."
    names: Vec<(String, usize)>,
}

impl ScopeFrame {
    fn lookup(&self, name: &str) -> Option<usize> {
        self.names.iter().rev().find(|(n, _)| n == name).map(|(_, i)| *i)
    }
}

pub struct Resolver {
    scopes: Vec<ScopeFrame>,
    /// Flat bindings of the current method's arguments and statement-level
    /// locals — never capturable across a block literal boundary, since
    /// these live on the call stack rather than on a heap object. Reset on
    /// entry to every method body.
    locals: Vec<(String, usize)>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver { scopes: Vec::new(), locals: Vec::new() }
    }

    /// Run both passes over the toplevel method's body in sequence, seeded
    /// by the built-in block's slot names.
    pub fn resolve(&mut self, method: &mut TopLevelMethod, builtin_names: &[String]) -> Result<(), OmeError> {
        self.scopes.push(ScopeFrame { names: builtin_names.iter().cloned().enumerate().map(|(i, n)| (n, i)).collect() });
        self.resolve_free_vars(&mut method.body)?;
        self.scopes.pop();
        Ok(())
    }

    /// Pass A. Walk the tree carrying a scope stack; rewrite receiver-less
    /// sends into resolved local/self/capture references.
    fn resolve_free_vars(&mut self, expr: &mut Expr) -> Result<(), OmeError> {
        match expr {
            Expr::Send(send) => {
                if send.receiver.is_none() && send.args.is_empty() {
                    match send.symbol.as_str() {
                        "self" => {
                            send.target = Some(ResolvedTarget::SelfObject);
                            return Ok(());
                        }
                        "True" => {
                            send.target = Some(ResolvedTarget::BuiltinConstant("True"));
                            return Ok(());
                        }
                        "False" => {
                            send.target = Some(ResolvedTarget::BuiltinConstant("False"));
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                if let Some(receiver) = send.receiver.as_deref_mut() {
                    self.resolve_free_vars(receiver)?;
                    for arg in &mut send.args {
                        self.resolve_free_vars(arg)?;
                    }
                    return Ok(());
                }
                // Receiver-less send, whether zero-arg (a variable reference)
                // or keyword-with-args (an implicit self-send, e.g. `fib: 1`):
                // both resolve the same way, to whatever binds the symbol in
                // the current scope chain (a local/self-slot/capture, or, for
                // a keyword send, the self-method of that name).
                for arg in &mut send.args {
                    self.resolve_free_vars(arg)?;
                }
                let depth_from_innermost = self.find_binding(&send.symbol, send.is_private())?;
                send.target = Some(depth_from_innermost);
                Ok(())
            }
            Expr::Array(elems) | Expr::Sequence(elems) => {
                for e in elems {
                    self.resolve_free_vars(e)?;
                }
                Ok(())
            }
            Expr::Block(block) => self.resolve_block(block),
            Expr::LocalVariable { name, value, .. } => {
                self.resolve_free_vars(value)?;
                let index = self.locals.len();
                self.locals.push((name.clone(), index));
                Ok(())
            }
            Expr::Number(_) | Expr::String(_) => Ok(()),
        }
    }

    fn resolve_block(&mut self, block: &mut Block) -> Result<(), OmeError> {
        let mut names: Vec<(String, usize)> = block.slots.iter().map(|s| (s.name.clone(), s.index)).collect();
        for (i, m) in block.methods.iter().enumerate() {
            names.push((m.symbol.clone(), block.slots.len() + i));
        }
        self.scopes.push(ScopeFrame { names });
        let mut err = None;
        for method in &mut block.methods {
            let saved_locals = std::mem::take(&mut self.locals);
            self.locals = method.arg_names.iter().cloned().enumerate().map(|(i, n)| (n, i)).collect();
            let result = self.resolve_free_vars(&mut method.body);
            self.locals = saved_locals;
            if let Err(e) = result {
                err = Some(e);
                break;
            }
        }
        self.scopes.pop();
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Search the current method's flat locals first (innermost shadowing
    /// wins), then the scope stack inner-to-outer. `depth` counts how many
    /// block frames separate the reference's own block from the one that
    /// actually binds `name` — `0` for a direct self-slot, `>=1` for a
    /// capture pass B must thread through that many intermediate blocks.
    fn find_binding(&self, name: &str, private: bool) -> Result<ResolvedTarget, OmeError> {
        if let Some((_, index)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(ResolvedTarget::Local(*index));
        }
        for (depth, frame) in self.scopes.iter().rev().enumerate() {
            if private && depth > 0 {
                // Private symbols may only match the innermost block.
                continue;
            }
            if let Some(index) = frame.lookup(name) {
                return Ok(if depth == 0 { ResolvedTarget::SelfSlot(index) } else { ResolvedTarget::Capture(depth) });
            }
        }
        Err(OmeError::UnboundName {
            name: name.to_string(),
            position: crate::position::Position::new("<unknown>", 0, 0, ""),
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new()
    }
}

/// Pass B: rewrite every capture discovered by pass A into a chain of
/// synthetic self-slots, one per block between the reference and its
/// binder, and repoint the original `Send` at the innermost one.
///
/// A capture at `depth == 1` is resolved entirely locally: the block the
/// `Send` sits in gains a synthetic slot of the same name, filled in at
/// block-creation time by reading the name directly from the surrounding
/// method (where, by construction, it resolves as a plain self-slot). A
/// capture at `depth > 1` additionally needs the surrounding block itself
/// to capture the name from one level further out — so each block along
/// the chain processes its own method bodies fully (bottom-up, via the
/// return value below) before deciding whether *it* still needs to ask its
/// own lexical container for anything.
///
/// Operates on the AST directly: `resolve_block_captures` never holds a
/// mutable borrow of a block at the same time as a mutable borrow of one of
/// its descendants — each level finishes and returns before its caller
/// touches anything.
pub fn resolve_block_refs(method: &mut TopLevelMethod) -> Result<(), OmeError> {
    resolve_expr_captures_toplevel(&mut method.body);
    Ok(())
}

fn resolve_expr_captures_toplevel(expr: &mut Expr) {
    match expr {
        Expr::Block(block) => {
            let leftover = resolve_block_captures(block);
            debug_assert!(leftover.is_empty(), "unresolved capture escaped the toplevel block");
        }
        Expr::Sequence(elems) | Expr::Array(elems) => {
            for e in elems {
                resolve_expr_captures_toplevel(e);
            }
        }
        Expr::LocalVariable { value, .. } => resolve_expr_captures_toplevel(value),
        Expr::Send(_) | Expr::Number(_) | Expr::String(_) => {}
    }
}

/// Process every method body of `block`, resolving what can be resolved
/// locally and collecting what still needs to come from further out.
/// Returns `(name, depth)` pairs with `depth` re-based to `block`'s own
/// frame — i.e. what `block`'s own lexical container still owes it.
fn resolve_block_captures(block: &mut Block) -> Vec<(String, usize)> {
    let mut bubbled_out = Vec::new();
    let mut methods = std::mem::take(&mut block.methods);
    for method in &mut methods {
        resolve_expr_captures(&mut method.body, block, &mut bubbled_out);
    }
    block.methods = methods;
    bubbled_out
}

fn resolve_expr_captures(expr: &mut Expr, block: &mut Block, bubbled_out: &mut Vec<(String, usize)>) {
    match expr {
        Expr::Send(send) => {
            if let Some(ResolvedTarget::Capture(depth)) = send.target {
                let name = send.symbol.clone();
                let index = block.slot_index(&name).unwrap_or_else(|| block.push_capture_slot(name.clone()));
                send.target = Some(ResolvedTarget::SelfSlot(index));
                if depth > 1 {
                    bubbled_out.push((name, depth - 1));
                }
            }
            if let Some(receiver) = send.receiver.as_deref_mut() {
                resolve_expr_captures(receiver, block, bubbled_out);
            }
            for arg in &mut send.args {
                resolve_expr_captures(arg, block, bubbled_out);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                resolve_expr_captures(e, block, bubbled_out);
            }
        }
        Expr::Block(nested) => {
            let nested_bubbled = resolve_block_captures(nested);
            for (name, depth) in nested_bubbled {
                block.slot_index(&name).unwrap_or_else(|| block.push_capture_slot(name.clone()));
                if depth > 1 {
                    bubbled_out.push((name, depth - 1));
                }
            }
        }
        Expr::LocalVariable { value, .. } => resolve_expr_captures(value, block, bubbled_out),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Send, Slot};
    use crate::position::Position;

    fn pos() -> Position {
        Position::new("<test>", 1, 0, "")
    }

    fn wrap(body: Expr) -> TopLevelMethod {
        TopLevelMethod::wrap(body)
    }

    #[test]
    fn resolves_self_slot_read() {
        let slot = Slot { name: "x".into(), mutable: false, index: 0 };
        let body = Expr::Send(Send::new(None, "x", vec![], pos()));
        let block = Block::new(vec![slot], vec![crate::ast::Method::new("main", vec![], body)]);
        let mut method = wrap(Expr::Block(Box::new(block)));
        let mut resolver = Resolver::new();
        resolver.resolve(&mut method, &[]).unwrap();
        match &method.body {
            Expr::Block(b) => match &b.methods[0].body {
                Expr::Send(s) => assert_eq!(s.target, Some(ResolvedTarget::SelfSlot(0))),
                other => panic!("expected send, got {:?}", other),
            },
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn receiver_less_keyword_send_resolves_as_an_implicit_self_send() {
        // { | n | fib: n } with a sibling `fib:` method, e.g. `fib: n = ...`.
        let arg = Expr::Send(Send::new(None, "n", vec![], pos()));
        let call = Expr::Send(Send::new(None, "fib:", vec![arg], pos()));
        let block = Block::new(
            vec![],
            vec![
                crate::ast::Method::new("main", vec![], call),
                crate::ast::Method::new("fib:", vec!["n".into()], Expr::Number(crate::ast::Number { significand: 0, exponent: 0, position: pos() })),
            ],
        );
        let mut method = wrap(Expr::Block(Box::new(block)));
        let mut resolver = Resolver::new();
        resolver.resolve(&mut method, &[]).unwrap();
        match &method.body {
            Expr::Block(b) => match &b.methods[0].body {
                Expr::Send(s) => assert_eq!(s.target, Some(ResolvedTarget::SelfSlot(1))),
                other => panic!("expected send, got {:?}", other),
            },
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn unbound_name_fails() {
        let body = Expr::Send(Send::new(None, "missing", vec![], pos()));
        let mut method = wrap(body);
        let mut resolver = Resolver::new();
        let err = resolver.resolve(&mut method, &[]).unwrap_err();
        assert_eq!(err.category(), "UnboundName");
    }

    #[test]
    fn captures_rewritten_to_synthetic_self_slot() {
        // { x = 1 | m | { | n | x } }
        let outer_slot = Slot { name: "x".into(), mutable: false, index: 0 };
        let inner_ref = Expr::Send(Send::new(None, "x", vec![], pos()));
        let inner_block = Block::new(vec![], vec![crate::ast::Method::new("n", vec![], inner_ref)]);
        let outer_method_body = Expr::Block(Box::new(inner_block));
        let outer_block = Block::new(vec![outer_slot], vec![crate::ast::Method::new("m", vec![], outer_method_body)]);
        let mut method = wrap(Expr::Block(Box::new(outer_block)));

        let mut resolver = Resolver::new();
        resolver.resolve(&mut method, &[]).unwrap();
        resolve_block_refs(&mut method).unwrap();

        match &method.body {
            Expr::Block(outer) => match &outer.methods[0].body {
                Expr::Block(inner) => {
                    assert_eq!(inner.slots.len(), 1);
                    match &inner.methods[0].body {
                        Expr::Send(s) => assert_eq!(s.target, Some(ResolvedTarget::SelfSlot(0))),
                        other => panic!("expected send, got {:?}", other),
                    }
                }
                other => panic!("expected inner block, got {:?}", other),
            },
            other => panic!("expected outer block, got {:?}", other),
        }
    }

    #[test]
    fn capture_chain_threads_through_two_intermediate_blocks() {
        // outer { x = 1 | m | mid { | p | inner { | n | x } } }
        let innermost_ref = Expr::Send(Send::new(None, "x", vec![], pos()));
        let inner_block = Block::new(vec![], vec![crate::ast::Method::new("n", vec![], innermost_ref)]);
        let mid_body = Expr::Block(Box::new(inner_block));
        let mid_block = Block::new(vec![], vec![crate::ast::Method::new("p", vec![], mid_body)]);
        let outer_method_body = Expr::Block(Box::new(mid_block));
        let outer_slot = Slot { name: "x".into(), mutable: false, index: 0 };
        let outer_block = Block::new(vec![outer_slot], vec![crate::ast::Method::new("m", vec![], outer_method_body)]);
        let mut method = wrap(Expr::Block(Box::new(outer_block)));

        let mut resolver = Resolver::new();
        resolver.resolve(&mut method, &[]).unwrap();
        resolve_block_refs(&mut method).unwrap();

        let outer = match &method.body {
            Expr::Block(b) => b.as_ref(),
            other => panic!("expected outer block, got {:?}", other),
        };
        assert_eq!(outer.slots.len(), 1, "outer keeps only its real slot");
        let mid = match &outer.methods[0].body {
            Expr::Block(b) => b.as_ref(),
            other => panic!("expected mid block, got {:?}", other),
        };
        assert_eq!(mid.slots.len(), 1, "mid gains one synthetic capture slot");
        assert_eq!(mid.slots[0].name, "x");
        let inner = match &mid.methods[0].body {
            Expr::Block(b) => b.as_ref(),
            other => panic!("expected inner block, got {:?}", other),
        };
        assert_eq!(inner.slots.len(), 1, "inner gains its own synthetic capture slot");
        match &inner.methods[0].body {
            Expr::Send(s) => assert_eq!(s.target, Some(ResolvedTarget::SelfSlot(0))),
            other => panic!("expected send, got {:?}", other),
        }
    }
}
