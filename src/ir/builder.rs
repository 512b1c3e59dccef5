//! `MethodCodeBuilder`: accumulates one method's raw IR and lowers an
//! already-resolved AST body into it.
//!
//! Grounded in `examples/original_source/ome/builder.py`'s
//! `MethodCodeBuilder` (temp/label bookkeeping, `optimise` pipeline entry
//! point) for the builder shape, and `compiler.py`'s `compile_method`/
//! `Program` for what drives a lowering pass (slot reads vs. self-sends vs.
//! dynamic dispatch, string/array/block literal construction).

use std::collections::HashMap;

use crate::ast::{Block, Expr, Method, ResolvedTarget, Send, Slot, Tag};
use crate::error::OmeError;
use crate::ir::{make_message_label, make_method_label, Instruction, IrMethod, Label, Operand};

/// One method's working IR before optimisation/register allocation.
pub struct MethodCodeBuilder {
    pub num_args: usize,
    pub num_locals: usize,
    pub instructions: Vec<Instruction>,
    pub labels: Vec<Label>,
    /// Reserved up front, matching the reference builder; lowering does not
    /// rely on it beyond keeping temp numbering identical in shape.
    pub dest: Operand,
}

impl MethodCodeBuilder {
    /// `num_user_args` excludes the implicit `self`, which always occupies
    /// temp `0`.
    pub fn new(num_user_args: usize) -> Self {
        let num_args = num_user_args + 1;
        let mut builder = MethodCodeBuilder { num_args, num_locals: num_args, instructions: Vec::new(), labels: Vec::new(), dest: Operand::Temp(0) };
        builder.dest = builder.add_temp();
        builder
    }

    pub fn add_temp(&mut self) -> Operand {
        let t = Operand::Temp(self.num_locals);
        self.num_locals += 1;
        t
    }

    pub fn here(&self) -> usize {
        self.instructions.len()
    }

    pub fn add_label(&mut self, name: impl Into<String>) -> Label {
        let label = Label { name: name.into(), location: self.here() };
        self.labels.push(label.clone());
        label
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn into_ir_method(self) -> IrMethod {
        IrMethod { num_args: self.num_args, num_locals: self.num_locals, instructions: self.instructions, labels: self.labels, num_stack_slots: 0 }
    }
}

/// Everything lowering needs to know about the block the method being
/// lowered belongs to, plus the string/traceback tables it feeds into.
pub struct LowerCx<'a> {
    pub self_tag: Tag,
    pub self_slots: &'a [Slot],
    /// Opaque/pointer/user-block tag ids, e.g. `tags["Small-Integer"]`.
    pub tags: &'a HashMap<String, Tag>,
    /// Built-in constant ids, e.g. `constants["True"]`.
    pub constants: &'a HashMap<String, i64>,
    pub data_table: &'a mut Vec<(String, String)>,
    pub traceback_table: &'a mut Vec<TraceBackEntry>,
    pub stream_name: String,
    /// The symbol of the method currently being lowered, attributed to every
    /// traceback entry it records (spec §4.5 `TraceBackInfo.method_name`).
    pub current_method_symbol: String,
}

/// Spec §4.5 `TraceBackInfo`, minus `index` (implicit: its position in
/// `traceback_table`).
#[derive(Debug, Clone)]
pub struct TraceBackEntry {
    pub stream_name: String,
    pub line_number: u32,
    pub column: u32,
    pub method_name: String,
    pub source_line: String,
    /// Width of the caret underline at the call site: the position of the
    /// first `:` in a keyword symbol (so the caret lines up with the
    /// symbol's first keyword part), else the symbol's length, minimum 1.
    pub underline: usize,
}

/// Per-method lowering state: the current flat locals-by-name map (shadows
/// on rebind, matching the resolver's last-match-wins lookup) and the
/// instruction builder being filled in.
struct Frame {
    locals: HashMap<String, Operand>,
    self_temp: Operand,
}

/// Lower one already-resolved method body into raw (pre-optimised,
/// pre-register-allocated) IR.
pub fn lower_method(method: &Method, cx: &mut LowerCx) -> Result<IrMethod, OmeError> {
    cx.current_method_symbol = method.symbol.clone();
    let mut builder = MethodCodeBuilder::new(method.arg_names.len());
    let self_temp = Operand::Temp(0);
    let mut frame = Frame { locals: HashMap::new(), self_temp };
    for (i, name) in method.arg_names.iter().enumerate() {
        frame.locals.insert(name.clone(), Operand::Temp(i + 1));
    }
    let result = lower_expr(&method.body, cx, &mut builder, &mut frame)?;
    builder.push(Instruction::Return { src: result });
    Ok(builder.into_ir_method())
}

fn lower_expr(expr: &Expr, cx: &mut LowerCx, b: &mut MethodCodeBuilder, frame: &mut Frame) -> Result<Operand, OmeError> {
    match expr {
        Expr::Number(n) => {
            let dest = b.add_temp();
            // Decimal scaling (`exponent != 0`) is a target/runtime concern
            // beyond this IR's scope; the significand is loaded as-is.
            b.push(Instruction::LoadValue { dest, tag: small_integer_tag(cx), value: n.significand });
            Ok(dest)
        }
        Expr::String(s) => {
            let dest = b.add_temp();
            let label = intern_string(cx, s);
            b.push(Instruction::LoadString { dest, data_label: label });
            Ok(dest)
        }
        Expr::Array(elems) => {
            let dest = b.add_temp();
            b.push(Instruction::CreateArray { dest, size: elems.len() });
            for (i, elem) in elems.iter().enumerate() {
                let value = lower_expr(elem, cx, b, frame)?;
                b.push(Instruction::SetSlot { object: dest, slot_index: i, value });
            }
            Ok(dest)
        }
        Expr::Sequence(items) => lower_sequence(items, cx, b, frame),
        Expr::LocalVariable { name, value, .. } => {
            let value_temp = lower_expr(value, cx, b, frame)?;
            frame.locals.insert(name.clone(), value_temp);
            Ok(value_temp)
        }
        Expr::Block(block) => lower_block_literal(block, None, cx, b, frame),
        Expr::Send(send) => lower_send(send, cx, b, frame),
    }
}

/// A `Sequence` is a run of `LocalVariable` bindings followed by a final
/// value expression. When that final expression is itself a `Block`
/// literal, the preceding bindings are exactly its declared slots'
/// initialisers, in order (the parser only ever builds this shape that
/// way) — `lower_block_literal` is handed them directly instead of having
/// to rediscover the association from names alone.
fn lower_sequence(items: &[Expr], cx: &mut LowerCx, b: &mut MethodCodeBuilder, frame: &mut Frame) -> Result<Operand, OmeError> {
    let mut result = None;
    for (i, item) in items.iter().enumerate() {
        let is_last = i + 1 == items.len();
        if is_last {
            if let Expr::Block(block) = item {
                let initializers: Vec<Operand> = items[..i]
                    .iter()
                    .filter_map(|it| match it {
                        Expr::LocalVariable { name, .. } => frame.locals.get(name).copied(),
                        _ => None,
                    })
                    .collect();
                result = Some(lower_block_literal(block, Some(&initializers), cx, b, frame)?);
                break;
            }
        }
        result = Some(lower_expr(item, cx, b, frame)?);
    }
    result.ok_or_else(|| OmeError::Backend { program: "lowering".into(), code: -1 })
}

/// Construct a block literal's runtime value: `LOAD_VALUE` under
/// `Tag_Constant` for a constant block, otherwise `CREATE` plus one
/// `SET_SLOT` per slot. `leading_initializers`, when present, supplies the
/// values for the block's originally-declared slots in order; every slot
/// beyond that is a capture, whose value is read directly out of the
/// current self/locals (pass B guarantees the name resolves there).
fn lower_block_literal(block: &Block, leading_initializers: Option<&[Operand]>, cx: &mut LowerCx, b: &mut MethodCodeBuilder, frame: &mut Frame) -> Result<Operand, OmeError> {
    if block.is_constant {
        let dest = b.add_temp();
        let constant_id = block.tag_constant.expect("tag allocation runs before lowering");
        b.push(Instruction::LoadValue { dest, tag: crate::tags::TAG_CONSTANT, value: constant_id });
        return Ok(dest);
    }
    let dest = b.add_temp();
    let tag = block.tag.expect("tag allocation runs before lowering");
    b.push(Instruction::Create { dest, tag, num_slots: block.slots.len() });
    let leading = leading_initializers.unwrap_or(&[]);
    for (i, slot) in block.slots.iter().enumerate() {
        let value = if let Some(v) = leading.get(i) {
            *v
        } else {
            read_captured_name(&slot.name, cx, b, frame)?
        };
        b.push(Instruction::SetSlot { object: dest, slot_index: i, value });
    }
    Ok(dest)
}

/// Read a name a capture slot needs its value from, in the *enclosing*
/// lowering context — always either a local/argument or one of the
/// current block's own slots, never a further capture, since pass B leaves
/// every intermediate block able to resolve its own contribution locally.
fn read_captured_name(name: &str, cx: &mut LowerCx, b: &mut MethodCodeBuilder, frame: &mut Frame) -> Result<Operand, OmeError> {
    if let Some(temp) = frame.locals.get(name) {
        return Ok(*temp);
    }
    // Not a local: must be one of the current block's own slots — pass B
    // guarantees this lookup succeeds for every name it left to bubble out.
    let dest = b.add_temp();
    let slot_index = cx.self_slots.iter().position(|s| s.name == name).expect("pass B guarantees captured names are self-slots");
    b.push(Instruction::GetSlot { dest, object: frame.self_temp, slot_index });
    Ok(dest)
}

fn lower_send(send: &Send, cx: &mut LowerCx, b: &mut MethodCodeBuilder, frame: &mut Frame) -> Result<Operand, OmeError> {
    match &send.target {
        Some(ResolvedTarget::SelfObject) => Ok(frame.self_temp),
        Some(ResolvedTarget::BuiltinConstant(name)) => {
            let dest = b.add_temp();
            let constant_id = *cx.constants.get(*name).unwrap_or(&0);
            b.push(Instruction::LoadValue { dest, tag: crate::tags::TAG_CONSTANT, value: constant_id });
            Ok(dest)
        }
        Some(ResolvedTarget::Local(_)) => {
            // The resolver's ordinal is re-derived here by name: lowering
            // and resolution walk the identical tree, so the most recent
            // binding of this name is always the right one.
            frame.locals.get(&send.symbol).copied().ok_or_else(|| OmeError::UnboundName { name: send.symbol.clone(), position: send.position.clone() })
        }
        Some(ResolvedTarget::SelfSlot(index)) => {
            if *index < cx.self_slots.len() {
                let dest = b.add_temp();
                b.push(Instruction::GetSlot { dest, object: frame.self_temp, slot_index: *index });
                Ok(dest)
            } else {
                // A direct, statically known self-send to one of this
                // block's own methods (e.g. `fib: (n minus: 1)` inside the
                // method that defines `fib:`) — same shape as any other
                // static dispatch, just with `self` as the implicit receiver.
                let mut args = Vec::with_capacity(send.args.len() + 1);
                args.push(frame.self_temp);
                for arg in &send.args {
                    args.push(lower_expr(arg, cx, b, frame)?);
                }
                let dest = b.add_temp();
                let traceback_index = record_traceback(cx, send);
                let call_label = make_method_label(cx.self_tag, &send.symbol);
                b.push(Instruction::Call { dest, call_label, args, traceback_index, num_stack_args: 0 });
                Ok(dest)
            }
        }
        Some(ResolvedTarget::Capture(_)) => unreachable!("pass B rewrites every capture before lowering runs"),
        None => {
            let receiver = send.receiver.as_deref().expect("unresolved, receiver-less send reached lowering");
            let recv_temp = lower_expr(receiver, cx, b, frame)?;
            let mut args = Vec::with_capacity(send.args.len() + 1);
            args.push(recv_temp);
            for arg in &send.args {
                args.push(lower_expr(arg, cx, b, frame)?);
            }
            let dest = b.add_temp();
            let traceback_index = record_traceback(cx, send);
            let call_label = match send.receiver_block_tag {
                Some(tag) => make_method_label(tag, &send.symbol),
                None => make_message_label(&send.symbol),
            };
            b.push(Instruction::Call { dest, call_label, args, traceback_index, num_stack_args: 0 });
            Ok(dest)
        }
    }
}

/// Dedup key is `(stream_name, line, column)` (spec §4.5): distinct sends at
/// the same call site — e.g. inside a loop unrolled by the optimiser, or a
/// dynamic send reached through more than one static dispatch path — share
/// one traceback entry.
fn record_traceback(cx: &mut LowerCx, send: &Send) -> Option<usize> {
    if let Some(index) = cx.traceback_table.iter().position(|e| e.stream_name == cx.stream_name && e.line_number == send.position.line_number && e.column == send.position.column) {
        return Some(index);
    }
    let line_unstripped = send.position.source_line.trim_end();
    let line = line_unstripped.trim_start();
    let indent = (line_unstripped.len() - line.len()) as u32;
    let underline = match send.symbol.find(':') {
        Some(i) => i + 1,
        None => send.symbol.len().max(1),
    };
    let index = cx.traceback_table.len();
    cx.traceback_table.push(TraceBackEntry {
        stream_name: cx.stream_name.clone(),
        line_number: send.position.line_number,
        column: send.position.column.saturating_sub(indent),
        method_name: cx.current_method_symbol.clone(),
        source_line: line.to_string(),
        underline,
    });
    Some(index)
}

fn intern_string(cx: &mut LowerCx, s: &str) -> String {
    if let Some((label, _)) = cx.data_table.iter().find(|(_, existing)| existing == s) {
        return label.clone();
    }
    let label = format!("OME_data_{}", cx.data_table.len());
    cx.data_table.push((label.clone(), s.to_string()));
    label
}

fn small_integer_tag(cx: &LowerCx) -> Tag {
    *cx.tags.get("Small-Integer").unwrap_or(&1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Method, Number, Slot};
    use crate::position::Position;

    fn pos() -> Position {
        Position::new("<test>", 1, 0, "")
    }

    fn cx<'a>(slots: &'a [Slot], tags: &'a HashMap<String, Tag>, constants: &'a HashMap<String, i64>, data: &'a mut Vec<(String, String)>, tb: &'a mut Vec<TraceBackEntry>) -> LowerCx<'a> {
        LowerCx { self_tag: 5, self_slots: slots, tags, constants, data_table: data, traceback_table: tb, stream_name: "<test>".into(), current_method_symbol: "main".into() }
    }

    #[test]
    fn lowers_number_literal() {
        let slots: Vec<Slot> = vec![];
        let tags = HashMap::new();
        let constants = HashMap::new();
        let mut data = Vec::new();
        let mut tb = Vec::new();
        let mut c = cx(&slots, &tags, &constants, &mut data, &mut tb);
        let method = Method::new("main", vec![], Expr::Number(Number { significand: 42, exponent: 0, position: pos() }));
        let ir = lower_method(&method, &mut c).unwrap();
        assert!(matches!(ir.instructions[0], Instruction::LoadValue { value: 42, .. }));
        assert!(matches!(ir.instructions.last().unwrap(), Instruction::Return { .. }));
    }

    #[test]
    fn lowers_self_slot_read_as_get_slot() {
        let slots = vec![Slot { name: "x".into(), mutable: false, index: 0 }];
        let tags = HashMap::new();
        let constants = HashMap::new();
        let mut data = Vec::new();
        let mut tb = Vec::new();
        let mut c = cx(&slots, &tags, &constants, &mut data, &mut tb);
        let body = Expr::Send(Send { receiver: None, symbol: "x".into(), args: vec![], position: pos(), target: Some(ResolvedTarget::SelfSlot(0)), receiver_block_tag: None });
        let method = Method::new("main", vec![], body);
        let ir = lower_method(&method, &mut c).unwrap();
        assert!(matches!(ir.instructions[0], Instruction::GetSlot { slot_index: 0, .. }));
    }

    #[test]
    fn lowers_self_send_beyond_slots_as_static_call() {
        let slots = vec![Slot { name: "x".into(), mutable: false, index: 0 }];
        let tags = HashMap::new();
        let constants = HashMap::new();
        let mut data = Vec::new();
        let mut tb = Vec::new();
        let mut c = cx(&slots, &tags, &constants, &mut data, &mut tb);
        let body = Expr::Send(Send { receiver: None, symbol: "helper".into(), args: vec![], position: pos(), target: Some(ResolvedTarget::SelfSlot(1)), receiver_block_tag: None });
        let method = Method::new("main", vec![], body);
        let ir = lower_method(&method, &mut c).unwrap();
        match &ir.instructions[0] {
            Instruction::Call { call_label, args, .. } => {
                assert_eq!(call_label, &make_method_label(5, "helper"));
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn lowers_method_argument_as_direct_temp() {
        let slots: Vec<Slot> = vec![];
        let tags = HashMap::new();
        let constants = HashMap::new();
        let mut data = Vec::new();
        let mut tb = Vec::new();
        let mut c = cx(&slots, &tags, &constants, &mut data, &mut tb);
        let body = Expr::Send(Send { receiver: None, symbol: "n".into(), args: vec![], position: pos(), target: Some(ResolvedTarget::Local(0)), receiver_block_tag: None });
        let method = Method::new("identity", vec!["n".into()], body);
        let ir = lower_method(&method, &mut c).unwrap();
        // No instructions needed beyond the final return of the arg temp.
        assert_eq!(ir.instructions.len(), 1);
        assert!(matches!(ir.instructions[0], Instruction::Return { src: Operand::Temp(1) }));
    }

    #[test]
    fn interns_identical_strings_once() {
        let slots: Vec<Slot> = vec![];
        let tags = HashMap::new();
        let constants = HashMap::new();
        let mut data = Vec::new();
        let mut tb = Vec::new();
        let mut c = cx(&slots, &tags, &constants, &mut data, &mut tb);
        let body = Expr::Sequence(vec![Expr::String("hi".into()), Expr::String("hi".into())]);
        let method = Method::new("main", vec![], body);
        let _ = lower_method(&method, &mut c).unwrap();
        assert_eq!(data.len(), 1);
    }
}
