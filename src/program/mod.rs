//! Program builder (spec §4.5): ties tag allocation, static-receiver
//! resolution, reachability, and per-method codegen together into one
//! emitted assembly listing.
//!
//! Grounded in `examples/original_source/ome/compiler.py: Program`, whose
//! `__init__` runs, in order: collect every `Block`/`Send` node, allocate
//! tag/constant ids, compile traceback info, compute `find_used_methods`,
//! build the per-symbol code table, then emit constants/data/declarations/
//! definitions/toplevel in that fixed layout (`emit_program_text`).
//!
//! Departure from the original (see DESIGN.md): `find_used_methods` there is
//! a single fixed pass seeded with every send symbol in the program, so a
//! built-in method's own transitive sends never widen the reachable set
//! beyond what the source text already mentions by name. Here the built-ins'
//! `sent_messages` are chased to a true fixed point, so a reachable built-in
//! that itself sends a message neither the source nor any other built-in
//! names is still correctly pulled in.

use std::collections::{HashMap, HashSet};

use crate::ast::{Block, Expr, Method, ResolvedTarget, Tag, TopLevelMethod};
use crate::builtin::{self, BuiltInMethod};
use crate::error::OmeError;
use crate::ir::builder::{lower_method, LowerCx, TraceBackEntry};
use crate::ir::{make_method_label, IrMethod};
use crate::optimizer::optimise;
use crate::regalloc::allocate;
use crate::tags::{IdAllocator, NUM_TAG_BITS};
use crate::target::x86_64;

/// One lowered, optimised, register-allocated method ready for emission,
/// keyed by the (possibly synthetic, see [`synthetic_tag_for_block`]) tag of
/// the block it's defined on.
struct CompiledMethod {
    tag: Tag,
    symbol: String,
    ir: IrMethod,
}

/// Walk `expr` collecting every `Block` node in post-order (a block's own
/// nested block literals are collected before the block itself), the same
/// list `tags::IdAllocator::allocate_ids` expects.
fn collect_blocks_mut<'a>(expr: &'a mut Expr, out: &mut Vec<&'a mut Block>) {
    match expr {
        Expr::Send(send) => {
            if let Some(receiver) = send.receiver.as_deref_mut() {
                collect_blocks_mut(receiver, out);
            }
            for arg in &mut send.args {
                collect_blocks_mut(arg, out);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                collect_blocks_mut(e, out);
            }
        }
        Expr::Block(block) => {
            for method in block.methods.iter_mut() {
                collect_blocks_mut(&mut method.body, out);
            }
            out.push(block.as_mut());
        }
        Expr::LocalVariable { value, .. } => collect_blocks_mut(value, out),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

/// The block a toplevel body ultimately evaluates to: the program's
/// outermost object, whose methods include (required) `main`.
fn find_toplevel_block(expr: &Expr) -> Option<&Block> {
    match expr {
        Expr::Block(b) => Some(b),
        Expr::Sequence(items) => items.last().and_then(find_toplevel_block),
        _ => None,
    }
}

/// A block's dispatch-table identity: its own tag for an ordinary heap
/// block, or a synthetic id above `MAX_TAG` for a constant-tagged one, since
/// every constant shares the single reserved `Tag_Constant` and can only be
/// told apart by constant id (spec §4.9, the dispatcher's `.constant`
/// redirect bucket).
fn synthetic_tag_for_block(block: &Block) -> Tag {
    if block.is_constant {
        (1i64 << NUM_TAG_BITS) + block.tag_constant.expect("tag allocation runs before codegen")
    } else {
        block.tag.expect("tag allocation runs before codegen")
    }
}

/// Rewrite every `Send`'s `receiver_block_tag` when its receiver is either a
/// block literal (whose tag is now known) or the bare `self` keyword (whose
/// tag is the enclosing block's own), letting the lowering pass emit a
/// direct call instead of a dynamic dispatch (spec §4.5/§4.6).
fn resolve_static_receivers(expr: &mut Expr, self_tag: Tag) {
    match expr {
        Expr::Send(send) => {
            if let Some(receiver) = send.receiver.as_deref_mut() {
                resolve_static_receivers(receiver, self_tag);
                match &**send.receiver.as_ref().unwrap() {
                    Expr::Block(b) => send.receiver_block_tag = Some(synthetic_tag_for_block(b)),
                    Expr::Send(inner) if inner.target == Some(ResolvedTarget::SelfObject) => {
                        send.receiver_block_tag = Some(self_tag);
                    }
                    _ => {}
                }
            }
            for arg in &mut send.args {
                resolve_static_receivers(arg, self_tag);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                resolve_static_receivers(e, self_tag);
            }
        }
        Expr::Block(block) => {
            let tag = synthetic_tag_for_block(block);
            for method in block.methods.iter_mut() {
                resolve_static_receivers(&mut method.body, tag);
            }
        }
        Expr::LocalVariable { value, .. } => resolve_static_receivers(value, self_tag),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

/// Every symbol a dynamic (not statically resolved) send targets, collected
/// so reachability can be seeded correctly (spec §4.5).
fn collect_dynamic_send_symbols(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Send(send) => {
            if let Some(receiver) = send.receiver.as_deref() {
                if send.receiver_block_tag.is_none() {
                    out.insert(send.symbol.clone());
                }
                collect_dynamic_send_symbols(receiver, out);
            }
            for arg in &send.args {
                collect_dynamic_send_symbols(arg, out);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                collect_dynamic_send_symbols(e, out);
            }
        }
        Expr::Block(block) => {
            for method in &block.methods {
                collect_dynamic_send_symbols(&method.body, out);
            }
        }
        Expr::LocalVariable { value, .. } => collect_dynamic_send_symbols(value, out),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

/// Every `(tag, symbol)` pair reached only through a statically-known
/// receiver — a block-literal receiver or `self` (explicit `self foo:` or an
/// implicit keyword self-send like `fib: n`) — matching the reference
/// `find_used_methods`'s `called_methods` (compiler.py:147-161). Lowering
/// already emits a direct `CALL` to these labels regardless of whether the
/// symbol is ever sent dynamically, so a method reached only this way must
/// still keep its definition.
fn collect_called_methods(expr: &Expr, self_tag: Tag, out: &mut HashSet<(Tag, String)>) {
    match expr {
        Expr::Send(send) => {
            match send.receiver.as_deref() {
                Some(receiver) => {
                    if let Some(tag) = send.receiver_block_tag {
                        out.insert((tag, send.symbol.clone()));
                    }
                    collect_called_methods(receiver, self_tag, out);
                }
                None => {
                    if matches!(send.target, Some(ResolvedTarget::SelfSlot(_))) {
                        out.insert((self_tag, send.symbol.clone()));
                    }
                }
            }
            for arg in &send.args {
                collect_called_methods(arg, self_tag, out);
            }
        }
        Expr::Array(elems) | Expr::Sequence(elems) => {
            for e in elems {
                collect_called_methods(e, self_tag, out);
            }
        }
        Expr::Block(block) => {
            let tag = synthetic_tag_for_block(block);
            for method in &block.methods {
                collect_called_methods(&method.body, tag, out);
            }
        }
        Expr::LocalVariable { value, .. } => collect_called_methods(value, self_tag, out),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

/// Chase `sent_messages` to a fixed point over the built-in methods table:
/// whenever a built-in whose own symbol is already reachable sends further
/// messages, those become reachable too, and so on until nothing changes.
fn compute_reachable_messages(mut sent: HashSet<String>, builtin_methods: &[BuiltInMethod]) -> HashSet<String> {
    loop {
        let mut changed = false;
        for bm in builtin_methods {
            if sent.contains(bm.symbol) {
                for msg in bm.sent_messages {
                    if sent.insert(msg.to_string()) {
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    sent
}

/// Whether a built-in's `symbol` should keep a method definition that exists
/// for it: either the message is actually sent somewhere reachable, or it's
/// one of the small set of messages the runtime calls implicitly (spec
/// §4.5). Built-ins are never reached through a statically-known block
/// receiver (their receivers are always primitive values, never `Block`
/// literals or `self`), so `called_methods` plays no part here.
fn should_include_method(symbol: &str, sent_messages: &HashSet<String>) -> bool {
    sent_messages.contains(symbol) || builtin::OPTIONAL_MESSAGES.contains(&symbol)
}

/// As `should_include_method`, for a user method defined on block `tag`:
/// also kept if reached only through a statically-known receiver
/// (`called_methods`), never widened into `sent_messages` itself.
fn should_include_user_method(tag: Tag, symbol: &str, sent_messages: &HashSet<String>, called_methods: &HashSet<(Tag, String)>) -> bool {
    should_include_method(symbol, sent_messages) || called_methods.contains(&(tag, symbol.to_string()))
}

/// One compiled method as handed to [`compile_with_ir`]'s caller: the
/// post-optimisation, post-register-allocation IR a `--dump-ir` run renders
/// instead of final assembly text.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IrMethodDump {
    pub symbol: String,
    pub tag: Tag,
    pub ir: IrMethod,
}

/// Every lowered method plus the synthetic toplevel method, the complete
/// picture `--dump-ir` renders (spec §10).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IrDump {
    pub methods: Vec<IrMethodDump>,
    pub toplevel: IrMethod,
}

/// Compile an already two-pass-resolved toplevel method into a complete
/// assembly listing ready to hand to the assembler (spec §4.5 through §4.9,
/// §6 emitted layout), also returning the lowered IR for `--dump-ir`.
pub fn compile_with_ir(method: &mut TopLevelMethod, stream_name: &str) -> Result<(String, IrDump), OmeError> {
    let mut block_refs: Vec<&mut Block> = Vec::new();
    collect_blocks_mut(&mut method.body, &mut block_refs);
    let mut ids = IdAllocator::new(&builtin::OPAQUE_TAG_NAMES, &builtin::POINTER_TAG_NAMES, &builtin::CONSTANT_NAMES);
    ids.allocate_ids(&mut block_refs)?;
    drop(block_refs);

    let toplevel_block = find_toplevel_block(&method.body).expect("toplevel body is always a block literal");
    if !toplevel_block.defines("main") {
        return Err(OmeError::NoMainMethod { stream_name: stream_name.to_string() });
    }
    let toplevel_tag = synthetic_tag_for_block(toplevel_block);

    resolve_static_receivers(&mut method.body, toplevel_tag);

    let mut dynamic_sends = HashSet::new();
    dynamic_sends.insert("main".to_string());
    dynamic_sends.insert("string".to_string());
    collect_dynamic_send_symbols(&method.body, &mut dynamic_sends);

    let mut called_methods: HashSet<(Tag, String)> = HashSet::new();
    collect_called_methods(&method.body, toplevel_tag, &mut called_methods);

    let all_builtin_methods = x86_64::builtin_methods();
    let sent_messages = compute_reachable_messages(dynamic_sends, &all_builtin_methods);
    // Only a reachable built-in earns a dispatcher/body; an unreachable one
    // (e.g. an arithmetic method when no source line ever sends it) would
    // otherwise widen the emitted listing for nothing (spec §4.5).
    let builtin_methods: Vec<BuiltInMethod> = all_builtin_methods.into_iter().filter(|bm| should_include_method(bm.symbol, &sent_messages)).collect();

    let mut data_table: Vec<(String, String)> = Vec::new();
    let mut traceback_table: Vec<TraceBackEntry> = Vec::new();
    let mut compiled: Vec<CompiledMethod> = Vec::new();

    fn compile_block_methods(
        block: &Block,
        tags: &HashMap<String, Tag>,
        constants: &HashMap<String, i64>,
        stream_name: &str,
        sent_messages: &HashSet<String>,
        called_methods: &HashSet<(Tag, String)>,
        data_table: &mut Vec<(String, String)>,
        traceback_table: &mut Vec<TraceBackEntry>,
        compiled: &mut Vec<CompiledMethod>,
    ) -> Result<(), OmeError> {
        let tag = synthetic_tag_for_block(block);
        for method in &block.methods {
            if should_include_user_method(tag, &method.symbol, sent_messages, called_methods) {
                let mut cx = LowerCx {
                    self_tag: tag,
                    self_slots: &block.slots,
                    tags,
                    constants,
                    data_table,
                    traceback_table,
                    stream_name: stream_name.to_string(),
                    current_method_symbol: method.symbol.clone(),
                };
                let mut ir = lower_method(method, &mut cx)?;
                optimise(&mut ir);
                allocate(&mut ir, &x86_64::conventions());
                compiled.push(CompiledMethod { tag, symbol: method.symbol.clone(), ir });
            }
            collect_nested_blocks(&method.body, tags, constants, stream_name, sent_messages, called_methods, data_table, traceback_table, compiled)?;
        }
        Ok(())
    }

    fn collect_nested_blocks(
        expr: &Expr,
        tags: &HashMap<String, Tag>,
        constants: &HashMap<String, i64>,
        stream_name: &str,
        sent_messages: &HashSet<String>,
        called_methods: &HashSet<(Tag, String)>,
        data_table: &mut Vec<(String, String)>,
        traceback_table: &mut Vec<TraceBackEntry>,
        compiled: &mut Vec<CompiledMethod>,
    ) -> Result<(), OmeError> {
        match expr {
            Expr::Send(send) => {
                if let Some(r) = send.receiver.as_deref() {
                    collect_nested_blocks(r, tags, constants, stream_name, sent_messages, called_methods, data_table, traceback_table, compiled)?;
                }
                for arg in &send.args {
                    collect_nested_blocks(arg, tags, constants, stream_name, sent_messages, called_methods, data_table, traceback_table, compiled)?;
                }
                Ok(())
            }
            Expr::Array(elems) | Expr::Sequence(elems) => {
                for e in elems {
                    collect_nested_blocks(e, tags, constants, stream_name, sent_messages, called_methods, data_table, traceback_table, compiled)?;
                }
                Ok(())
            }
            Expr::Block(block) => compile_block_methods(block, tags, constants, stream_name, sent_messages, called_methods, data_table, traceback_table, compiled),
            Expr::LocalVariable { value, .. } => collect_nested_blocks(value, tags, constants, stream_name, sent_messages, called_methods, data_table, traceback_table, compiled),
            Expr::Number(_) | Expr::String(_) => Ok(()),
        }
    }

    collect_nested_blocks(&method.body, &ids.tags, &ids.constants, stream_name, &sent_messages, &called_methods, &mut data_table, &mut traceback_table, &mut compiled)?;

    // The toplevel body itself, lowered as a bare zero-argument method that
    // constructs and returns the program's outermost object (`OME_toplevel`,
    // called once from `_start` before the first `main` dispatch).
    let toplevel_method = Method::new(String::new(), Vec::new(), method.body.clone());
    let mut toplevel_cx = LowerCx {
        self_tag: toplevel_tag,
        self_slots: &[],
        tags: &ids.tags,
        constants: &ids.constants,
        data_table: &mut data_table,
        traceback_table: &mut traceback_table,
        stream_name: stream_name.to_string(),
        current_method_symbol: "<toplevel>".to_string(),
    };
    let mut toplevel_ir = lower_method(&toplevel_method, &mut toplevel_cx)?;
    optimise(&mut toplevel_ir);
    allocate(&mut toplevel_ir, &x86_64::conventions());

    let text = emit_program_text(&ids, &data_table, &traceback_table, &compiled, &toplevel_ir, &builtin_methods);
    let ir_dump = IrDump {
        methods: compiled.iter().map(|m| IrMethodDump { symbol: m.symbol.clone(), tag: m.tag, ir: m.ir.clone() }).collect(),
        toplevel: toplevel_ir,
    };
    Ok((text, ir_dump))
}

/// Compile an already two-pass-resolved toplevel method straight to its
/// assembly listing, discarding the intermediate IR (the common case; see
/// [`compile_with_ir`] for the `--dump-ir` variant).
pub fn compile(method: &mut TopLevelMethod, stream_name: &str) -> Result<String, OmeError> {
    compile_with_ir(method, stream_name).map(|(text, _)| text)
}

/// Group compiled methods by symbol, sorted for byte-identical output
/// between runs (spec §5): symbols alphabetically, tags within a symbol
/// numerically.
fn build_code_table(compiled: &[CompiledMethod]) -> Vec<(String, Vec<(Tag, &IrMethod)>)> {
    let mut by_symbol: HashMap<&str, Vec<(Tag, &IrMethod)>> = HashMap::new();
    for m in compiled {
        by_symbol.entry(&m.symbol).or_default().push((m.tag, &m.ir));
    }
    let mut symbols: Vec<&str> = by_symbol.keys().copied().collect();
    symbols.sort_unstable();
    symbols
        .into_iter()
        .map(|symbol| {
            let mut methods = by_symbol.remove(symbol).unwrap();
            methods.sort_by_key(|(tag, _)| *tag);
            (symbol.to_string(), methods)
        })
        .collect()
}

fn emit_program_text(
    ids: &IdAllocator,
    data_table: &[(String, String)],
    traceback_table: &[TraceBackEntry],
    compiled: &[CompiledMethod],
    toplevel_ir: &IrMethod,
    builtin_methods: &[BuiltInMethod],
) -> String {
    let mut e = crate::target::Emitter::new();
    e.raw("bits 64\ndefault rel\n\n");
    e.raw(&x86_64::builtin_macros());
    e.raw("\n");
    emit_constants(&mut e, ids);
    e.raw("\n");
    e.raw("section .text\n\n");
    emit_code_declarations(&mut e, &build_code_table(compiled), builtin_methods);
    e.raw("\n");
    x86_64::emit_declaration(&mut e, "OME_toplevel");
    e.raw("\n");
    e.raw(x86_64::BUILTIN_CODE);
    e.raw("\n");
    emit_code_definitions(&mut e, &build_code_table(compiled), builtin_methods, &ids.tags);
    emit_toplevel(&mut e, toplevel_ir, &ids.tags);
    e.raw("\nsection .data\n\n");
    emit_data(&mut e, data_table);
    e.raw(x86_64::builtin_data());
    x86_64::emit_traceback_table(&mut e, traceback_table);
    x86_64::emit_constant_names_table(&mut e, &ids.constant_list);
    e.finish()
}

/// `%define OME_Tag_<Name>`/`OME_Constant_<Name>` lines, one per allocated
/// tag/constant id, in allocation order (spec §6 Constants block).
fn emit_constants(e: &mut crate::target::Emitter, ids: &IdAllocator) {
    for (name, tag) in &ids.tag_list {
        e.raw(x86_64::define_constant(&format!("Tag_{}", mangled(name)), *tag));
    }
    e.raw(x86_64::define_constant("Pointer_Tag", ids.pointer_tag_id));
    for (name, id) in &ids.constant_list {
        e.raw(x86_64::define_constant(&format!("Constant_{}", mangled(name)), *id));
    }
}

fn mangled(name: &str) -> String {
    name.replace('-', "_")
}

/// Every interned string is laid out as an 8-byte length followed by its raw
/// bytes, matching what `print:`'s hand-written body reads (`[rsi]` for the
/// length, then `rsi+8` for the data).
fn emit_data(e: &mut crate::target::Emitter, data_table: &[(String, String)]) {
    for (label, value) in data_table {
        e.label(label);
        e.raw(format!("\tdq {}\n", value.len()));
        if value.is_empty() {
            e.raw("\tdb 0\n");
        } else {
            let bytes: Vec<String> = value.bytes().map(|b| b.to_string()).collect();
            e.raw(format!("\tdb {}\n", bytes.join(",")));
        }
    }
}

/// Every symbol that needs a dispatcher: one with at least one compiled
/// user method, a built-in method, or both — a built-in-only symbol (no
/// source line ever defines e.g. `plus:` as a user method) still needs its
/// dispatcher and body emitted, exactly as a user-defined one would.
fn all_symbols<'a>(code_table: &'a [(String, Vec<(Tag, &IrMethod)>)], builtin_methods: &'a [BuiltInMethod]) -> Vec<&'a str> {
    let mut symbols: std::collections::BTreeSet<&str> = code_table.iter().map(|(s, _)| s.as_str()).collect();
    symbols.extend(builtin_methods.iter().map(|bm| bm.symbol));
    symbols.into_iter().collect()
}

/// `global` declarations for every per-symbol dispatcher label, ahead of the
/// bodies themselves, matching a NASM header section.
fn emit_code_declarations(e: &mut crate::target::Emitter, code_table: &[(String, Vec<(Tag, &IrMethod)>)], builtin_methods: &[BuiltInMethod]) {
    for symbol in all_symbols(code_table, builtin_methods) {
        x86_64::emit_declaration(e, &crate::ir::make_message_label(symbol));
    }
}

fn emit_code_definitions(e: &mut crate::target::Emitter, code_table: &[(String, Vec<(Tag, &IrMethod)>)], builtin_methods: &[BuiltInMethod], tags: &HashMap<String, Tag>) {
    let compiled_by_symbol: HashMap<&str, &Vec<(Tag, &IrMethod)>> = code_table.iter().map(|(s, m)| (s.as_str(), m)).collect();
    for symbol in all_symbols(code_table, builtin_methods) {
        let compiled_methods = compiled_by_symbol.get(symbol).copied();
        let mut tag_list: Vec<Tag> = compiled_methods.map(|m| m.iter().map(|(t, _)| *t).collect()).unwrap_or_default();
        for bm in builtin_methods.iter().filter(|bm| bm.symbol == symbol) {
            if let Some(&t) = tags.get(bm.tag_name) {
                tag_list.push(t);
            }
        }
        tag_list.sort_unstable();
        tag_list.dedup();
        e.raw(&x86_64::generate_dispatcher(symbol, &tag_list));
        e.raw("\n");
        if let Some(methods) = compiled_methods {
            for (tag, ir) in methods {
                x86_64::emit_method_body(e, &make_method_label(*tag, symbol), ir, tags);
            }
        }
        for bm in builtin_methods.iter().filter(|bm| bm.symbol == symbol) {
            if let Some(&t) = tags.get(bm.tag_name) {
                e.label(make_method_label(t, symbol));
                e.raw(bm.code);
            }
        }
    }
}

fn emit_toplevel(e: &mut crate::target::Emitter, toplevel_ir: &IrMethod, tags: &HashMap<String, Tag>) {
    x86_64::emit_method_body(e, "OME_toplevel", toplevel_ir, tags);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Method, Slot};
    use crate::parser::Parser;
    use crate::resolver::{resolve_block_refs, Resolver};

    fn compile_source(src: &str) -> Result<String, OmeError> {
        let mut toplevel = Parser::new(src, "<test>").parse_toplevel().unwrap();
        let builtin_names: Vec<String> = vec![];
        Resolver::new().resolve(&mut toplevel, &builtin_names).unwrap();
        resolve_block_refs(&mut toplevel).unwrap();
        compile(&mut toplevel, "<test>")
    }

    #[test]
    fn missing_main_method_is_rejected() {
        let err = compile_source("| helper | 1").unwrap_err();
        assert_eq!(err.category(), "NoMainMethod");
    }

    #[test]
    fn program_with_main_compiles_to_text_containing_its_dispatcher() {
        let text = compile_source("| main | 1").unwrap();
        assert!(text.contains("OME_message_main"));
        assert!(text.contains("OME_toplevel"));
    }

    #[test]
    fn statically_self_dispatched_method_keeps_its_body_even_when_never_dynamically_sent() {
        // `fib:` is never sent to anything but `self` (first from `main`, then
        // recursively from within `fib:` itself), so it never enters
        // `sent_messages` — only `called_methods` keeps its definition alive.
        let text = compile_source("| main | self fib: 5 | fib: n | self fib: n").unwrap();
        assert!(text.contains("OME_message_fib_:"));
        // A compiled method body's label is `OME_method_<tag>_fib_`; its
        // dispatcher alone (checked above) would also exist for a dangling
        // call with no body, so this is the assertion that actually matters.
        assert!(text.contains("OME_method_") && text.contains("_fib_"));
    }

    #[test]
    fn code_table_groups_and_sorts_by_symbol() {
        let a = CompiledMethod { tag: 5, symbol: "foo".into(), ir: IrMethod { num_args: 1, num_locals: 1, instructions: vec![], labels: vec![], num_stack_slots: 0 } };
        let b = CompiledMethod { tag: 2, symbol: "foo".into(), ir: IrMethod { num_args: 1, num_locals: 1, instructions: vec![], labels: vec![], num_stack_slots: 0 } };
        let table = build_code_table(&[a, b]);
        assert_eq!(table[0].0, "foo");
        assert_eq!(table[0].1[0].0, 2);
        assert_eq!(table[0].1[1].0, 5);
    }

    #[test]
    fn synthetic_tag_distinguishes_constant_blocks_from_the_shared_constant_tag() {
        let mut constant_block = Block::new(vec![], vec![Method::new("main", vec![], Expr::Number(crate::ast::Number { significand: 1, exponent: 0, position: crate::position::Position::new("<test>", 1, 0, "") }))]);
        constant_block.tag = Some(0);
        constant_block.tag_constant = Some(7);
        let mut heap_block = Block::new(vec![Slot { name: "x".into(), mutable: false, index: 0 }], vec![]);
        heap_block.tag = Some(3);
        assert_ne!(synthetic_tag_for_block(&constant_block), synthetic_tag_for_block(&heap_block));
        assert!(synthetic_tag_for_block(&constant_block) >= 1i64 << NUM_TAG_BITS);
    }
}
