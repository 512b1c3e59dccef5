//! x86-64 NASM backend (spec §4.9/§6/§10).
//!
//! Grounded in `examples/original_source/ome/target_x86_64.py` for register
//! conventions, the `print:` built-in, and the dispatcher/tagged-value
//! shape; `dispatcher.py` itself was not present in the retrieved source
//! (only imported by `compiler.py`), so the binary-search dispatcher body is
//! authored here from spec §4.9's textual description. The thread-context
//! layout, `_start`, and the allocation/GC/traceback-printing runtime stubs
//! are likewise self-authored in the same hand-written-NASM-text idiom,
//! since the retrieved original only sketches one built-in method and falls
//! through `OME_collect_nursery`/`OME_panic` without ever defining a real
//! nursery or traceback printer (see DESIGN.md open question 4).

use std::collections::HashMap;

use crate::ast::Tag;
use crate::builtin::BuiltInMethod;
use crate::ir::builder::TraceBackEntry;
use crate::ir::{Instruction, IrMethod, Operand};
use crate::regalloc::RegisterConventions;
use crate::tags::{NUM_DATA_BITS, NUM_TAG_BITS, TAG_CONSTANT};

use super::Emitter;

/// Data-bits mask: the low `NUM_DATA_BITS` bits of a tagged 64-bit value.
const DATA_MASK: u64 = (1u64 << NUM_DATA_BITS) - 1;

/// First tag id above the real tag space, used as a synthetic dispatch key
/// for constant-tagged blocks (spec §4.9's ".constant" redirect bucket):
/// every constant shares the one reserved `Tag_Constant`, so the dispatcher
/// re-derives a key from the constant id payload instead.
const CONSTANT_SYNTHETIC_BASE: Tag = 1i64 << NUM_TAG_BITS;

// --- Thread-context layout (spec §6) ---------------------------------
//
// `rbp` holds the base of one mmap'd region per spec §6/§10, laid out as:
//   [0..8)                      traceback frame count
//   [8..8+MAX*8)                traceback frame indices (into OME_traceback_table)
//   [STACK_TOP..STACK_TOP+SIZE) the program's own call stack (rsp starts here, grows down)
//   [NURSERY_BASE..+SIZE)       the bump-allocated nursery (rbx/r12 bracket it)
const CTX_TRACEBACK_COUNT_OFFSET: usize = 0;
const CTX_TRACEBACK_BASE_OFFSET: usize = 8;
const CTX_TRACEBACK_MAX_DEPTH: usize = 256;
const CTX_STACK_TOP: usize = CTX_TRACEBACK_BASE_OFFSET + CTX_TRACEBACK_MAX_DEPTH * 8;
const STACK_SIZE: usize = 0x4000;
const CTX_NURSERY_BASE: usize = CTX_STACK_TOP + STACK_SIZE;
const NURSERY_SIZE: usize = 0x20000;
const CTX_TOTAL_SIZE: usize = CTX_NURSERY_BASE + NURSERY_SIZE;

/// The x86-64 register convention the allocator targets (spec §4.8).
pub fn conventions() -> RegisterConventions {
    RegisterConventions::x86_64()
}

/// `%define` lines the rest of the listing (built-ins, `_start`, method
/// bodies) all assume are in scope, matching
/// `target_x86_64.py: TAGGED_VALUE_MACROS`'s role.
pub fn builtin_macros() -> String {
    format!(
        "%define OME_NUM_TAG_BITS {num_tag_bits}\n\
         %define OME_NUM_DATA_BITS {num_data_bits}\n\
         %define OME_Value(value, tag) (((tag) << OME_NUM_DATA_BITS) | (value))\n\
         %define OME_Constant(value) OME_Value(value, OME_Tag_Constant)\n\
         %define OME_Error_Tag(tag) ((tag) | (1 << (OME_NUM_TAG_BITS - 1)))\n\
         %define OME_Error_Constant(value) OME_Value(value, OME_Error_Tag(OME_Tag_Constant))\n\
         \n\
         %define SYS_write 1\n\
         %define SYS_mmap 9\n\
         %define SYS_exit 60\n\
         \n\
         %define PROT_READ 0x1\n\
         %define PROT_WRITE 0x2\n\
         %define MAP_PRIVATE 0x2\n\
         %define MAP_ANONYMOUS 0x20\n\
         \n\
         %define OME_CTX_TRACEBACK_COUNT {tb_count}\n\
         %define OME_CTX_TRACEBACK_BASE {tb_base}\n\
         %define OME_CTX_TRACEBACK_MAX_DEPTH {tb_max}\n\
         %define OME_CTX_STACK_TOP {stack_top}\n\
         %define OME_CTX_NURSERY_BASE {nursery_base}\n\
         %define OME_CTX_NURSERY_SIZE {nursery_size}\n\
         %define OME_CTX_TOTAL_SIZE {total_size}\n",
        num_tag_bits = NUM_TAG_BITS,
        num_data_bits = NUM_DATA_BITS,
        tb_count = CTX_TRACEBACK_COUNT_OFFSET,
        tb_base = CTX_TRACEBACK_BASE_OFFSET,
        tb_max = CTX_TRACEBACK_MAX_DEPTH,
        stack_top = CTX_STACK_TOP,
        nursery_base = CTX_NURSERY_BASE,
        nursery_size = NURSERY_SIZE,
        total_size = CTX_TOTAL_SIZE,
    )
}

/// `%define OME_<name> <value>` (spec §6 Constants block): tag ids, the
/// pointer-tag threshold, and constant ids all share this one shape.
pub fn define_constant(name: &str, value: i64) -> String {
    format!("%define OME_{} {}\n", name, value)
}

/// `global <label>` ahead of its definition.
pub fn emit_declaration(e: &mut Emitter, label: &str) {
    e.raw(format!("global {}\n", label));
}

fn encode_tagged_value(tag: Tag, value: i64) -> String {
    let encoded = ((tag as u64) << NUM_DATA_BITS) | (value as u64 & DATA_MASK);
    format!("0x{:x}", encoded)
}

fn reg(op: Operand) -> &'static str {
    match op {
        Operand::Reg(r) => r,
        other => unreachable!("operand used where a register was required: {:?}", other),
    }
}

/// Render a plain value operand (register or stack slot) as a NASM operand
/// text. Only ever read, never used as an address base — see
/// `reg` for the latter.
fn operand_text(op: Operand) -> String {
    operand_text_offset(op, 0)
}

/// As `operand_text`, but for code emitted after `extra_words` pushes have
/// shifted `rsp` since register allocation fixed this operand's stack slot.
fn operand_text_offset(op: Operand, extra_words: usize) -> String {
    match op {
        Operand::Reg(r) => r.to_string(),
        Operand::Stack(slot) => format!("qword [rsp+{}]", (slot + extra_words) * 8),
        Operand::Temp(_) => unreachable!("register allocation leaves no bare Temp operands"),
    }
}

/// Reverse-lookup a tag's name for a debug comment; absent for tags that
/// aren't in the table at all (shouldn't happen, but a missing comment is
/// harmless).
fn tag_comment(tags: &HashMap<String, Tag>, tag: Tag) -> String {
    match tags.iter().find(|(_, &v)| v == tag) {
        Some((name, _)) => format!(" ; {}", name),
        None => String::new(),
    }
}

/// Emit the bump-allocation sequence for `num_slots` payload words plus a
/// one-word GC header at `object - 8`, tagging the result with `tag`. The
/// slow path (nursery exhausted) is deferred to a tail emitter so the fast
/// path stays straight-line.
fn emit_alloc(e: &mut Emitter, dest: Operand, tag: Tag, num_slots: usize, idx: usize) {
    let dest_reg = reg(dest);
    let total_bytes = (num_slots + 1) * 8;
    let retry = format!(".alloc_retry_{}", idx);
    let full = format!(".alloc_full_{}", idx);
    e.label(&retry);
    e.line(format!("mov {}, rbx", dest_reg));
    e.line(format!("add {}, 8", dest_reg));
    e.line(format!("add rbx, {}", total_bytes));
    e.line(format!("mov qword [{}-8], {}", dest_reg, num_slots));
    e.line("cmp rbx, r12");
    e.line(format!("jae {}", full));
    // `dest_reg` itself (freshly claimed, never a live allocator register at
    // this point) supplies the only scratch space this sequence needs, so
    // the tag bits land via an immediate `or` rather than a borrowed register.
    e.line(format!("or {}, 0x{:x}", dest_reg, (tag as u64) << NUM_DATA_BITS));
    let tail = e.tail_emitter(full);
    e.tail_line(tail, "call OME_collect_nursery");
    e.tail_line(tail, format!("jmp {}", retry));
}

/// Lower one method's post-optimisation, post-register-allocation IR into
/// NASM text under `label` (spec §4.9). `tags` is consulted only to annotate
/// allocation sites with the tag's name as a comment.
pub fn emit_method_body(e: &mut Emitter, label: &str, ir: &IrMethod, tags: &HashMap<String, Tag>) {
    e.label(label);

    let conv = conventions();
    let num_reg_args = conv.arg_registers.len().min(ir.num_args);
    let num_stack_args_in = ir.num_args.saturating_sub(num_reg_args);
    // Incoming arguments beyond the register convention's width were pushed
    // by the caller, in order, directly above its own `call`'s return
    // address; copy them into this method's own spill-slot area (the
    // allocator always assigns them slots `0..num_stack_args_in`, see
    // `regalloc::allocate`'s argument-seeding loop) before `rsp` moves.
    if num_stack_args_in > 0 {
        for k in 0..num_stack_args_in {
            e.line(format!("mov rax, [rsp+{}]", 8 * (k + 1)));
            let dst_offset = (ir.num_stack_slots - k) * 8;
            e.line(format!("mov [rsp-{}], rax", dst_offset));
        }
    }
    if ir.num_stack_slots > 0 {
        e.line(format!("sub rsp, {}", ir.num_stack_slots * 8));
    }

    for (i, instr) in ir.instructions.iter().enumerate() {
        match instr {
            Instruction::Call { call_label, traceback_index, num_stack_args, .. } => {
                e.line(format!("call {}", call_label));
                if *num_stack_args > 0 {
                    e.line(format!("add rsp, {}", num_stack_args * 8));
                }
                e.line("test rax, rax");
                let ok = format!(".call_ok_{}", i);
                e.line(format!("jns {}", ok));
                match traceback_index {
                    Some(tb_index) => {
                        let append = format!(".tb_append_{}", i);
                        e.line(format!("jmp {}", append));
                        let tail = e.tail_emitter(append);
                        let skip = format!(".tb_full_{}", i);
                        e.tail_line(tail, format!("mov rcx, [rbp+{}]", CTX_TRACEBACK_COUNT_OFFSET));
                        e.tail_line(tail, format!("cmp rcx, {}", CTX_TRACEBACK_MAX_DEPTH));
                        e.tail_line(tail, format!("jae {}", skip));
                        e.tail_line(tail, format!("mov qword [rbp+{}+rcx*8], {}", CTX_TRACEBACK_BASE_OFFSET, tb_index));
                        e.tail_line(tail, format!("inc qword [rbp+{}]", CTX_TRACEBACK_COUNT_OFFSET));
                        e.tail_raw(tail, format!("{}:\n", skip));
                        e.tail_line(tail, "jmp .epilogue");
                    }
                    None => e.line("jmp .epilogue"),
                }
                e.label(&ok);
            }
            Instruction::LoadValue { dest, tag, value } => {
                e.line(format!("mov {}, {}{}", reg(*dest), encode_tagged_value(*tag, *value), tag_comment(tags, *tag)));
            }
            Instruction::LoadString { dest, data_label } => {
                e.line(format!("lea {}, [rel {}]", reg(*dest), data_label));
            }
            Instruction::Create { dest, tag, num_slots } => {
                emit_alloc(e, *dest, *tag, *num_slots, i);
            }
            Instruction::CreateArray { dest, size } => {
                let array_tag = *tags.get("Array").unwrap_or(&0);
                emit_alloc(e, *dest, array_tag, *size, i);
            }
            Instruction::Tag { dest, src, tag } => {
                // `tag` is a compile-time constant, so the shifted bits fold
                // into the `or`'s immediate rather than needing a second
                // register to build them in (every other register may be
                // holding a live temp at this point).
                e.line(format!("mov {}, {}", reg(*dest), reg(*src)));
                e.line(format!("and {}, 0x{:x}", reg(*dest), DATA_MASK));
                e.line(format!("or {}, 0x{:x}", reg(*dest), (*tag as u64) << NUM_DATA_BITS));
            }
            Instruction::Untag { dest, src } => {
                e.line(format!("mov {}, {}", reg(*dest), reg(*src)));
                e.line(format!("and {}, 0x{:x}", reg(*dest), DATA_MASK));
            }
            Instruction::GetSlot { dest, object, slot_index } => {
                // `dest` was just claimed fresh by the allocator, so it
                // doubles as scratch space for the untag — no other
                // register (every one of which may hold a live temp right
                // now) needs to be touched.
                e.line(format!("mov {}, {}", reg(*dest), operand_text(*object)));
                e.line(format!("and {}, 0x{:x}", reg(*dest), DATA_MASK));
                e.line(format!("mov {}, [{}+{}]", reg(*dest), reg(*dest), slot_index * 8));
            }
            Instruction::SetSlot { object, slot_index, value } => {
                // No destination register to borrow here, so the untag
                // scratch is saved/restored around the store instead; a live
                // temp pinned to r10 (or r11, if `value` also needs loading
                // out of a stack slot) survives either way. Each push shifts
                // `rsp` by a word, so any stack-resident operand's offset is
                // adjusted to match.
                let needs_value_scratch = matches!(*value, Operand::Stack(_));
                e.line("push r10");
                if needs_value_scratch {
                    e.line("push r11");
                }
                let shift = if needs_value_scratch { 2 } else { 1 };
                e.line(format!("mov r10, {}", operand_text_offset(*object, shift)));
                e.line(format!("and r10, 0x{:x}", DATA_MASK));
                if needs_value_scratch {
                    e.line(format!("mov r11, {}", operand_text_offset(*value, shift)));
                    e.line(format!("mov [r10+{}], r11", slot_index * 8));
                    e.line("pop r11");
                } else {
                    e.line(format!("mov [r10+{}], {}", slot_index * 8, reg(*value)));
                }
                e.line("pop r10");
            }
            Instruction::Return { src } => {
                if *src != Operand::Reg("rax") {
                    e.line(format!("mov rax, {}", operand_text(*src)));
                }
                e.line("jmp .epilogue");
            }
            Instruction::Alias { .. } => unreachable!("alias elimination runs before codegen"),
            Instruction::Spill { reg: r, stack_slot } => {
                e.line(format!("mov [rsp+{}], {}", stack_slot * 8, reg(*r)));
            }
            Instruction::Unspill { reg: r, stack_slot } => {
                e.line(format!("mov {}, [rsp+{}]", reg(*r), stack_slot * 8));
            }
            Instruction::Move { dest, src } => {
                if dest != src {
                    e.line(format!("mov {}, {}", reg(*dest), operand_text(*src)));
                }
            }
            Instruction::Push { src } => {
                e.line(format!("push {}", operand_text(*src)));
            }
        }
    }

    e.flush_tails();
    e.label(".epilogue");
    if ir.num_stack_slots > 0 {
        e.line(format!("add rsp, {}", ir.num_stack_slots * 8));
    }
    e.line("ret");
}

/// A sorted sequence of `cmp`/`jae` binary-search branches over `tags`, one
/// per reachable dispatch table (spec §4.9). A single tag collapses to a
/// direct comparison; an empty one is unreachable code a caller never emits
/// for (but still falls through safely to `OME_not_understood`).
pub fn generate_dispatcher(symbol: &str, tags: &[Tag]) -> String {
    let label = crate::ir::make_message_label(symbol);
    let mut out = format!("{}:\n", label);

    let mut real: Vec<Tag> = tags.iter().copied().filter(|t| *t < CONSTANT_SYNTHETIC_BASE).collect();
    let mut constants: Vec<Tag> = tags.iter().copied().filter(|t| *t >= CONSTANT_SYNTHETIC_BASE).collect();
    real.sort_unstable();
    real.dedup();
    constants.sort_unstable();
    constants.dedup();

    out.push_str("\tmov rax, rdi\n");
    out.push_str(&format!("\tshr rax, {}\n", NUM_DATA_BITS));

    let mut counter = 0usize;
    if !constants.is_empty() {
        out.push_str(&format!("\tcmp rax, {}\n", TAG_CONSTANT));
        out.push_str("\tje .ome_dispatch_constant\n");
    }
    emit_compare_chain(&mut out, &real, symbol, &mut counter);

    if !constants.is_empty() {
        out.push_str(".ome_dispatch_constant:\n");
        out.push_str("\tmov rax, rdi\n");
        out.push_str(&format!("\tand rax, 0x{:x}\n", DATA_MASK));
        out.push_str(&format!("\tadd rax, {}\n", CONSTANT_SYNTHETIC_BASE));
        emit_compare_chain(&mut out, &constants, symbol, &mut counter);
    }
    out
}

fn emit_compare_chain(out: &mut String, tags: &[Tag], symbol: &str, counter: &mut usize) {
    if tags.is_empty() {
        out.push_str("\tjmp OME_not_understood\n");
        return;
    }
    if tags.len() == 1 {
        out.push_str(&format!("\tcmp rax, {}\n", tags[0]));
        out.push_str("\tjne OME_not_understood\n");
        out.push_str(&format!("\tjmp {}\n", crate::ir::make_method_label(tags[0], symbol)));
        return;
    }
    let mid = tags.len() / 2;
    let pivot = tags[mid];
    let id = *counter;
    *counter += 1;
    let upper = format!(".ome_dispatch_{}", id);
    out.push_str(&format!("\tcmp rax, {}\n", pivot));
    out.push_str(&format!("\tjae {}\n", upper));
    emit_compare_chain(out, &tags[..mid], symbol, counter);
    out.push_str(&format!("{}:\n", upper));
    emit_compare_chain(out, &tags[mid..], symbol, counter);
}

/// One data label per traceback entry (`OME_tb_site_<i>`: a human-readable
/// "file:line:column: in method" string) plus the packed `{site_ptr,
/// source_ptr}` array `OME_traceback_table` the runtime indexes into when
/// printing an uncaught error (spec §4.5/§6).
pub fn emit_traceback_table(e: &mut Emitter, table: &[TraceBackEntry]) {
    for (i, entry) in table.iter().enumerate() {
        let site = format!("{}:{}:{}: in {}", entry.stream_name, entry.line_number, entry.column, entry.method_name);
        emit_length_prefixed_string(e, &format!("OME_tb_site_{}", i), &site);
        let underline: String = std::iter::repeat('^').take(entry.underline.max(1)).collect();
        let source = format!("{}\n{}{}", entry.source_line, " ".repeat(entry.column as usize), underline);
        emit_length_prefixed_string(e, &format!("OME_tb_source_{}", i), &source);
    }
    e.label("OME_traceback_table");
    if table.is_empty() {
        e.raw("\tdq 0\n");
    } else {
        for i in 0..table.len() {
            e.raw(format!("\tdq OME_tb_site_{}, OME_tb_source_{}\n", i, i));
        }
    }
}

/// One data label per allocated constant id (`OME_constant_name_<id>`, the
/// human-readable, unmangled name) plus the `OME_constant_names` pointer
/// array `OME_print_traceback` indexes by constant id when naming the
/// uncaught error at the bottom of a trace (spec §7).
pub fn emit_constant_names_table(e: &mut Emitter, constant_list: &[(String, i64)]) {
    let mut by_id: Vec<(i64, &str)> = constant_list.iter().map(|(name, id)| (*id, name.as_str())).collect();
    by_id.sort_by_key(|(id, _)| *id);
    for (id, name) in &by_id {
        emit_length_prefixed_string(e, &format!("OME_constant_name_{}", id), name);
    }
    e.label("OME_constant_names");
    for (id, _) in &by_id {
        e.raw(format!("\tdq OME_constant_name_{}\n", id));
    }
}

fn emit_length_prefixed_string(e: &mut Emitter, label: &str, value: &str) {
    e.label(label);
    e.raw(format!("\tdq {}\n", value.len()));
    if value.is_empty() {
        e.raw("\tdb 0\n");
    } else {
        let bytes: Vec<String> = value.bytes().map(|b| b.to_string()).collect();
        e.raw(format!("\tdb {}\n", bytes.join(",")));
    }
}

/// Fixed runtime-owned data the hand-written stubs in [`BUILTIN_CODE`] read:
/// the three messages `OME_panic` can be asked to print, independent of any
/// source-specific interned string.
pub fn builtin_data() -> String {
    let mut e = Emitter::new();
    emit_length_prefixed_string(&mut e, "OME_msg_mmap_failed", "ome: failed to allocate thread context\n");
    emit_length_prefixed_string(&mut e, "OME_msg_nursery_exhausted", "ome: out of memory (nursery exhausted)\n");
    emit_length_prefixed_string(&mut e, "OME_msg_not_understood", "ome: message not understood\n");
    emit_length_prefixed_string(&mut e, "OME_msg_traceback_header", "Traceback (most recent call last):\n");
    e.finish()
}

/// `_start` plus the runtime trampolines the reference leaves for a target
/// to supply itself (spec §6, DESIGN.md open question 4): thread-context
/// allocation, nursery collection (a hard stop — no actual GC, spec
/// Non-goal), the `OME_not_understood` fallthrough, and traceback printing
/// on an uncaught error.
pub const BUILTIN_CODE: &str = "\
global _start
_start:
\tcall OME_allocate_thread_context
\tmov rbp, rax
\tlea rsp, [rbp+OME_CTX_NURSERY_BASE]
\tmov qword [rbp+OME_CTX_TRACEBACK_COUNT], 0
\tlea rbx, [rbp+OME_CTX_NURSERY_BASE]
\tlea r12, [rbp+OME_CTX_NURSERY_BASE+OME_CTX_NURSERY_SIZE]
\tcall OME_toplevel
\tmov rdi, rax
\tcall OME_message_main
\ttest rax, rax
\tjns .ome_start_ok
\tmov rdi, rax
\tcall OME_print_traceback
\tmov rdi, 1
\tjmp .ome_start_exit
.ome_start_ok:
\txor rdi, rdi
.ome_start_exit:
\tmov rax, SYS_exit
\tsyscall

global OME_allocate_thread_context
OME_allocate_thread_context:
\txor rdi, rdi
\tmov rsi, OME_CTX_TOTAL_SIZE
\tmov rdx, PROT_READ | PROT_WRITE
\tmov r10, MAP_PRIVATE | MAP_ANONYMOUS
\tmov r8, -1
\txor r9, r9
\tmov rax, SYS_mmap
\tsyscall
\tcmp rax, 0
\tjl .ome_mmap_failed
\tret
.ome_mmap_failed:
\tlea rsi, [rel OME_msg_mmap_failed]
\tmov rdx, [rsi]
\tadd rsi, 8
\tjmp OME_panic

global OME_collect_nursery
OME_collect_nursery:
\tlea rsi, [rel OME_msg_nursery_exhausted]
\tmov rdx, [rsi]
\tadd rsi, 8
\tjmp OME_panic

global OME_not_understood
OME_not_understood:
\tlea rsi, [rel OME_msg_not_understood]
\tmov rdx, [rsi]
\tadd rsi, 8
\tjmp OME_panic

global OME_panic
OME_panic:
\tmov rax, SYS_write
\tmov rdi, 2
\tsyscall
\tmov rax, SYS_exit
\tmov rdi, 1
\tsyscall

global OME_write_newline
OME_write_newline:
\tpush qword 10
\tmov rsi, rsp
\tmov rdx, 1
\tmov rax, SYS_write
\tmov rdi, 2
\tsyscall
\tadd rsp, 8
\tret

global OME_print_traceback
OME_print_traceback:
\tpush rdi
\tmov rcx, [rbp+OME_CTX_TRACEBACK_COUNT]
\ttest rcx, rcx
\tjz .ome_traceback_no_frames
\tlea rsi, [rel OME_msg_traceback_header]
\tmov rdx, [rsi]
\tadd rsi, 8
\tmov rax, SYS_write
\tmov rdi, 2
\tsyscall
.ome_traceback_loop:
\tdec rcx
\tmov r13, rcx
\tmov rax, [rbp+OME_CTX_TRACEBACK_BASE+rcx*8]
\tlea r10, [rel OME_traceback_table]
\tlea r14, [r10+rax*16]
\tmov rax, [r14]
\tmov rdx, [rax]
\tlea rsi, [rax+8]
\tmov rax, SYS_write
\tmov rdi, 2
\tsyscall
\tcall OME_write_newline
\tmov rax, [r14+8]
\tmov rdx, [rax]
\tlea rsi, [rax+8]
\tmov rax, SYS_write
\tmov rdi, 2
\tsyscall
\tcall OME_write_newline
\tmov rcx, r13
\ttest rcx, rcx
\tjnz .ome_traceback_loop
.ome_traceback_no_frames:
\tpop rdi
\tmov rax, rdi
\tand rax, 0x0000ffffffffffff
\tlea r10, [rel OME_constant_names]
\tmov rax, [r10+rax*8]
\tmov rdx, [rax]
\tlea rsi, [rax+8]
\tmov rax, SYS_write
\tmov rdi, 2
\tsyscall
\tcall OME_write_newline
\tret
";

/// Built-in methods this target supplies directly as hand-written assembly,
/// bypassing the AST/IR lowering pipeline entirely: `Small-Integer`
/// arithmetic plus unary `print` on `Small-Integer`/`String`, the only
/// messages the built-in block needs to support (spec §3 `BuiltInBlock`;
/// the receiver-tag checks and `Type-Error`/`Overflow` fallbacks follow
/// `target_x86_64.py`'s `print:` shape).
pub fn builtin_methods() -> Vec<BuiltInMethod> {
    vec![
        BuiltInMethod {
            tag_name: "Small-Integer",
            symbol: "plus:",
            arg_names: &["other"],
            sent_messages: &[],
            code: SMALL_INTEGER_PLUS,
        },
        BuiltInMethod {
            tag_name: "Small-Integer",
            symbol: "minus:",
            arg_names: &["other"],
            sent_messages: &[],
            code: SMALL_INTEGER_MINUS,
        },
        BuiltInMethod {
            tag_name: "Small-Integer",
            symbol: "times:",
            arg_names: &["other"],
            sent_messages: &[],
            code: SMALL_INTEGER_TIMES,
        },
        BuiltInMethod {
            tag_name: "Small-Integer",
            symbol: "print",
            arg_names: &[],
            sent_messages: &[],
            code: SMALL_INTEGER_PRINT,
        },
        BuiltInMethod {
            tag_name: "String",
            symbol: "print",
            arg_names: &[],
            sent_messages: &[],
            code: STRING_PRINT,
        },
    ]
}

// Every `Small-Integer` binary-arithmetic built-in shares the same shape:
// check the argument (in `rsi`) is itself a `Small-Integer`, sign-extend
// both operands out of their tagged representation (spec §6 tagged-value
// layout: the payload occupies the low `NUM_DATA_BITS` bits, so a logical
// shift-left-then-arithmetic-shift-right recovers the signed 48-bit value),
// apply the operator, then check the result still fits the 48-bit signed
// payload before retagging it under `Tag_Small_Integer`. `concat!` only
// accepts literals, not named `const`s, so the shared prologue/epilogue text
// is duplicated across the three operators rather than factored out.
const SMALL_INTEGER_PLUS: &str = concat!(
    "\tmov rax, rsi\n\tshr rax, OME_NUM_DATA_BITS\n\tcmp rax, OME_Tag_Small_Integer\n\tjne .type_error\n",
    "\tmov rax, rdi\n\tshl rax, OME_NUM_TAG_BITS\n\tsar rax, OME_NUM_TAG_BITS\n",
    "\tmov rcx, rsi\n\tshl rcx, OME_NUM_TAG_BITS\n\tsar rcx, OME_NUM_TAG_BITS\n",
    "\tadd rax, rcx\n",
    "\tmov rdx, rax\n\tsar rdx, (OME_NUM_DATA_BITS - 1)\n\tadd rdx, 1\n\tcmp rdx, 1\n\tja .overflow\n",
    "\tand rax, 0x0000ffffffffffff\n\tmov rdx, OME_Tag_Small_Integer\n\tshl rdx, OME_NUM_DATA_BITS\n\tor rax, rdx\n\tret\n",
    ".type_error:\n\tmov rax, OME_Error_Constant(OME_Constant_Type_Error)\n\tret\n",
    ".overflow:\n\tmov rax, OME_Error_Constant(OME_Constant_Overflow)\n\tret\n",
);

const SMALL_INTEGER_MINUS: &str = concat!(
    "\tmov rax, rsi\n\tshr rax, OME_NUM_DATA_BITS\n\tcmp rax, OME_Tag_Small_Integer\n\tjne .type_error\n",
    "\tmov rax, rdi\n\tshl rax, OME_NUM_TAG_BITS\n\tsar rax, OME_NUM_TAG_BITS\n",
    "\tmov rcx, rsi\n\tshl rcx, OME_NUM_TAG_BITS\n\tsar rcx, OME_NUM_TAG_BITS\n",
    "\tsub rax, rcx\n",
    "\tmov rdx, rax\n\tsar rdx, (OME_NUM_DATA_BITS - 1)\n\tadd rdx, 1\n\tcmp rdx, 1\n\tja .overflow\n",
    "\tand rax, 0x0000ffffffffffff\n\tmov rdx, OME_Tag_Small_Integer\n\tshl rdx, OME_NUM_DATA_BITS\n\tor rax, rdx\n\tret\n",
    ".type_error:\n\tmov rax, OME_Error_Constant(OME_Constant_Type_Error)\n\tret\n",
    ".overflow:\n\tmov rax, OME_Error_Constant(OME_Constant_Overflow)\n\tret\n",
);

const SMALL_INTEGER_TIMES: &str = concat!(
    "\tmov rax, rsi\n\tshr rax, OME_NUM_DATA_BITS\n\tcmp rax, OME_Tag_Small_Integer\n\tjne .type_error\n",
    "\tmov rax, rdi\n\tshl rax, OME_NUM_TAG_BITS\n\tsar rax, OME_NUM_TAG_BITS\n",
    "\tmov rcx, rsi\n\tshl rcx, OME_NUM_TAG_BITS\n\tsar rcx, OME_NUM_TAG_BITS\n",
    "\timul rax, rcx\n",
    "\tmov rdx, rax\n\tsar rdx, (OME_NUM_DATA_BITS - 1)\n\tadd rdx, 1\n\tcmp rdx, 1\n\tja .overflow\n",
    "\tand rax, 0x0000ffffffffffff\n\tmov rdx, OME_Tag_Small_Integer\n\tshl rdx, OME_NUM_DATA_BITS\n\tor rax, rdx\n\tret\n",
    ".type_error:\n\tmov rax, OME_Error_Constant(OME_Constant_Type_Error)\n\tret\n",
    ".overflow:\n\tmov rax, OME_Error_Constant(OME_Constant_Overflow)\n\tret\n",
);

/// Writes `self` (a tagged `Small-Integer`) to stdout in decimal, newline
/// terminated, via a small on-stack itoa buffer (spec §3 `print`).
const SMALL_INTEGER_PRINT: &str = "\
\tmov rax, rdi\n\
\tshl rax, OME_NUM_TAG_BITS\n\
\tsar rax, OME_NUM_TAG_BITS\n\
\tsub rsp, 32\n\
\tmov r10, rsp\n\
\tadd r10, 31\n\
\tmov byte [r10], 10\n\
\tdec r10\n\
\tmov rcx, 0\n\
\tmov r9, 0\n\
\tcmp rax, 0\n\
\tjge .ome_itoa_nonneg\n\
\tmov r9, 1\n\
\tneg rax\n\
.ome_itoa_nonneg:\n\
\tmov r8, 10\n\
.ome_itoa_loop:\n\
\txor rdx, rdx\n\
\tdiv r8\n\
\tadd rdx, '0'\n\
\tmov byte [r10], dl\n\
\tdec r10\n\
\tinc rcx\n\
\ttest rax, rax\n\
\tjnz .ome_itoa_loop\n\
\tcmp r9, 0\n\
\tje .ome_itoa_write\n\
\tmov byte [r10], '-'\n\
\tdec r10\n\
\tinc rcx\n\
.ome_itoa_write:\n\
\tinc r10\n\
\tinc rcx\n\
\tlea rsi, [r10]\n\
\tmov rdx, rcx\n\
\tmov rax, SYS_write\n\
\tmov rdi, 1\n\
\tsyscall\n\
\tadd rsp, 32\n\
\tmov rax, rdi\n\
\tret\n\
";

/// Writes `self` (a tagged, length-prefixed `String` pointer) to stdout,
/// newline terminated (grounded directly in `target_x86_64.py: print:`).
const STRING_PRINT: &str = "\
\tmov rax, rdi\n\
\tshr rax, OME_NUM_DATA_BITS\n\
\tcmp rax, OME_Tag_String\n\
\tjne .type_error\n\
\tmov r10, rdi\n\
\tand r10, 0x0000ffffffffffff\n\
\tmov rdx, [r10]\n\
\tlea rsi, [r10+8]\n\
\tmov rax, SYS_write\n\
\tmov rdi, 1\n\
\tsyscall\n\
\tcall OME_write_newline\n\
\tmov rax, rdi\n\
\tret\n\
.type_error:\n\
\tmov rax, OME_Error_Constant(OME_Constant_Type_Error)\n\
\tret\n\
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_on_a_single_tag_is_a_direct_compare() {
        let text = generate_dispatcher("print", &[5]);
        assert!(text.starts_with("OME_message_print:\n"));
        assert!(text.contains("jmp OME_method_5_print"));
    }

    #[test]
    fn dispatcher_on_several_tags_binary_searches() {
        let text = generate_dispatcher("plus:", &[1, 2, 3, 4]);
        assert!(text.contains("jae .ome_dispatch_"));
    }

    #[test]
    fn dispatcher_redirects_constant_tags_through_the_payload() {
        let synthetic = CONSTANT_SYNTHETIC_BASE + 3;
        let text = generate_dispatcher("foo", &[5, synthetic]);
        assert!(text.contains(".ome_dispatch_constant:"));
        assert!(text.contains(&format!("jmp {}", crate::ir::make_method_label(synthetic, "foo"))));
    }

    #[test]
    fn empty_dispatcher_falls_through_to_not_understood() {
        let text = generate_dispatcher("never_sent:", &[]);
        assert!(text.contains("jmp OME_not_understood"));
    }

    #[test]
    fn builtin_methods_cover_small_integer_arithmetic_and_print() {
        let methods = builtin_methods();
        assert!(methods.iter().any(|m| m.symbol == "plus:" && m.tag_name == "Small-Integer"));
        assert!(methods.iter().any(|m| m.symbol == "print" && m.tag_name == "String"));
        for m in &methods {
            assert!(m.code.contains("OME_Error_Constant(OME_Constant_Type_Error)"));
        }
    }

    #[test]
    fn get_slot_untags_through_its_own_dest_register_not_a_borrowed_scratch() {
        let mut e = Emitter::new();
        let ir = IrMethod {
            num_args: 1,
            num_locals: 2,
            instructions: vec![
                Instruction::GetSlot { dest: Operand::Reg("r9"), object: Operand::Reg("rdi"), slot_index: 1 },
                Instruction::Return { src: Operand::Reg("r9") },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        emit_method_body(&mut e, "OME_method_0_x", &ir, &HashMap::new());
        let text = e.finish();
        assert!(text.contains("mov r9, rdi"));
        assert!(text.contains("and r9, "));
        assert!(text.contains("mov r9, [r9+8]"));
        assert!(!text.contains("r10"), "GetSlot must not touch a register the allocator could have live elsewhere: {}", text);
    }

    #[test]
    fn set_slot_saves_and_restores_its_borrowed_scratch_register() {
        let mut e = Emitter::new();
        let ir = IrMethod {
            num_args: 1,
            num_locals: 1,
            instructions: vec![
                Instruction::SetSlot { object: Operand::Reg("rdi"), slot_index: 0, value: Operand::Reg("rsi") },
                Instruction::Return { src: Operand::Reg("rdi") },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        emit_method_body(&mut e, "OME_method_0_y", &ir, &HashMap::new());
        let text = e.finish();
        let push_pos = text.find("push r10").expect("scratch saved");
        let pop_pos = text.find("pop r10").expect("scratch restored");
        assert!(push_pos < pop_pos);
        assert!(text.contains("mov [r10+0], rsi"));
    }

    #[test]
    fn emit_method_body_renders_a_return_through_the_shared_epilogue() {
        let mut e = Emitter::new();
        let ir = IrMethod { num_args: 1, num_locals: 1, instructions: vec![Instruction::Return { src: Operand::Reg("rax") }], labels: vec![], num_stack_slots: 0 };
        emit_method_body(&mut e, "OME_method_0_main", &ir, &HashMap::new());
        let text = e.finish();
        assert!(text.contains("OME_method_0_main:"));
        assert!(text.contains(".epilogue:"));
        assert!(text.trim_end().ends_with("ret"));
    }
}
