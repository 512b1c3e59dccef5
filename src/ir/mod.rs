//! IR instruction set and per-method code builder (spec §4.6).
//!
//! Grounded in `examples/original_source/ome/instructions.py` (the
//! instruction shapes) and `examples/original_source/ome/builder.py` (the
//! label-carrying `MethodCodeBuilder` variant, see DESIGN.md open question 1).

pub mod builder;

use crate::ast::Tag;

/// A value an instruction reads or writes. Before register allocation every
/// destination is a fresh `Temp`; the allocator rewrites `Temp` in place to
/// `Reg`/`Stack` and introduces `Spill`/`Unspill`/`Move`/`Push` instructions
/// that only ever use `Reg`/`Stack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Operand {
    Temp(usize),
    Reg(&'static str),
    Stack(usize),
}

impl Operand {
    pub fn as_temp(&self) -> Option<usize> {
        match self {
            Operand::Temp(t) => Some(*t),
            _ => None,
        }
    }
}

/// A deferred label bound to an instruction offset, the way the reference
/// `MethodCodeBuilder.add_label` records `(name, location)` pairs ahead of
/// the optimiser/register-allocator passes that consume final offsets.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Label {
    pub name: String,
    pub location: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Instruction {
    Call {
        dest: Operand,
        call_label: String,
        args: Vec<Operand>,
        traceback_index: Option<usize>,
        /// Overflow arguments pushed onto the stack beyond the register
        /// convention's argument registers. `0` until the register
        /// allocator runs; set there to the number of `PUSH`es it
        /// synthesised immediately before this call, so the target emitter
        /// knows how many words to pop on return (spec §4.8/§4.9).
        num_stack_args: usize,
    },
    Tag {
        dest: Operand,
        src: Operand,
        tag: Tag,
    },
    Untag {
        dest: Operand,
        src: Operand,
    },
    Create {
        dest: Operand,
        tag: Tag,
        num_slots: usize,
    },
    CreateArray {
        dest: Operand,
        size: usize,
    },
    /// Removed by the alias-elimination optimiser pass.
    Alias {
        dest: Operand,
        src: Operand,
    },
    LoadValue {
        dest: Operand,
        tag: Tag,
        value: i64,
    },
    LoadString {
        dest: Operand,
        data_label: String,
    },
    GetSlot {
        dest: Operand,
        object: Operand,
        slot_index: usize,
    },
    SetSlot {
        object: Operand,
        slot_index: usize,
        value: Operand,
    },
    Return {
        src: Operand,
    },
    /// Introduced by the register allocator only.
    Spill {
        reg: Operand,
        stack_slot: usize,
    },
    Unspill {
        reg: Operand,
        stack_slot: usize,
    },
    Move {
        dest: Operand,
        src: Operand,
    },
    Push {
        src: Operand,
    },
}

impl Instruction {
    /// The operand this instruction writes, if any. `SetSlot`/`Return`/
    /// `Spill`/`Push` have no destination.
    pub fn dest(&self) -> Option<Operand> {
        match self {
            Instruction::Call { dest, .. }
            | Instruction::Tag { dest, .. }
            | Instruction::Untag { dest, .. }
            | Instruction::Create { dest, .. }
            | Instruction::CreateArray { dest, .. }
            | Instruction::Alias { dest, .. }
            | Instruction::LoadValue { dest, .. }
            | Instruction::LoadString { dest, .. }
            | Instruction::GetSlot { dest, .. }
            | Instruction::Move { dest, .. } => Some(*dest),
            Instruction::Unspill { reg, .. } => Some(*reg),
            Instruction::SetSlot { .. }
            | Instruction::Return { .. }
            | Instruction::Spill { .. }
            | Instruction::Push { .. } => None,
        }
    }

    pub fn set_dest(&mut self, new_dest: Operand) {
        match self {
            Instruction::Call { dest, .. }
            | Instruction::Tag { dest, .. }
            | Instruction::Untag { dest, .. }
            | Instruction::Create { dest, .. }
            | Instruction::CreateArray { dest, .. }
            | Instruction::Alias { dest, .. }
            | Instruction::LoadValue { dest, .. }
            | Instruction::LoadString { dest, .. }
            | Instruction::GetSlot { dest, .. }
            | Instruction::Move { dest, .. } => *dest = new_dest,
            Instruction::Unspill { reg, .. } => *reg = new_dest,
            _ => {}
        }
    }

    /// Every operand this instruction reads (not including its destination).
    pub fn inputs(&self) -> Vec<Operand> {
        match self {
            Instruction::Call { args, .. } => args.clone(),
            Instruction::Tag { src, .. } | Instruction::Untag { src, .. } | Instruction::Alias { src, .. } => vec![*src],
            Instruction::GetSlot { object, .. } => vec![*object],
            Instruction::SetSlot { object, value, .. } => vec![*object, *value],
            Instruction::Return { src } => vec![*src],
            Instruction::Move { src, .. } => vec![*src],
            Instruction::Push { src } => vec![*src],
            Instruction::Spill { reg, .. } => vec![*reg],
            Instruction::Create { .. }
            | Instruction::CreateArray { .. }
            | Instruction::LoadValue { .. }
            | Instruction::LoadString { .. }
            | Instruction::Unspill { .. } => vec![],
        }
    }

    /// Rewrite every input operand through `f`. Used by alias elimination.
    pub fn map_inputs(&mut self, mut f: impl FnMut(Operand) -> Operand) {
        match self {
            Instruction::Call { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Instruction::Tag { src, .. } | Instruction::Untag { src, .. } | Instruction::Alias { src, .. } => *src = f(*src),
            Instruction::GetSlot { object, .. } => *object = f(*object),
            Instruction::SetSlot { object, value, .. } => {
                *object = f(*object);
                *value = f(*value);
            }
            Instruction::Return { src } => *src = f(*src),
            Instruction::Move { src, .. } => *src = f(*src),
            Instruction::Push { src } => *src = f(*src),
            Instruction::Spill { reg, .. } => *reg = f(*reg),
            Instruction::Create { .. } | Instruction::CreateArray { .. } | Instruction::LoadValue { .. } | Instruction::LoadString { .. } | Instruction::Unspill { .. } => {}
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Instruction::Call { .. })
    }
}

/// Per-method IR state (spec §4.6): `num_args` counts the implicit `self` as
/// arg 0, `num_locals` is the running temp counter.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IrMethod {
    pub num_args: usize,
    pub num_locals: usize,
    pub instructions: Vec<Instruction>,
    pub labels: Vec<Label>,
    /// Set by the register allocator: peak stack-slot allocation.
    pub num_stack_slots: usize,
}

/// Labels the receiver's tag is statically known for a direct dispatch, or a
/// dynamically dispatched symbol otherwise (spec §4.6 AST-to-IR lowering).
pub fn make_method_label(tag: Tag, symbol: &str) -> String {
    format!("OME_method_{}_{}", tag, mangle_symbol(symbol))
}

pub fn make_message_label(symbol: &str) -> String {
    format!("OME_message_{}", mangle_symbol(symbol))
}

pub fn make_lookup_label(symbol: &str) -> String {
    format!("OME_lookup_{}", mangle_symbol(symbol))
}

/// Symbols may contain `:`, `,`, `~`, and `-`, none of which are valid in a
/// target assembly label; replace them with underscores in a way that keeps
/// distinct symbols distinct (colons/commas only ever appear at fixed
/// positions dictated by the arity law, so this mapping is injective for the
/// symbols the parser can actually produce).
fn mangle_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| match c {
            ':' => '_',
            ',' => 'c',
            '~' => 'p',
            '-' => 'h',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_is_injective_for_common_symbols() {
        assert_ne!(mangle_symbol("foo:bar:"), mangle_symbol("foo:,"));
        assert_ne!(make_method_label(1, "at:"), make_method_label(2, "at:"));
    }

    #[test]
    fn instruction_inputs_and_dest() {
        let call = Instruction::Call {
            dest: Operand::Temp(3),
            call_label: "OME_message_print".into(),
            args: vec![Operand::Temp(0), Operand::Temp(1)],
            traceback_index: None,
            num_stack_args: 0,
        };
        assert_eq!(call.dest(), Some(Operand::Temp(3)));
        assert_eq!(call.inputs(), vec![Operand::Temp(0), Operand::Temp(1)]);
    }
}
