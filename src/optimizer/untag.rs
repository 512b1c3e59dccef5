//! Pass 3: redundant-untag elimination.
//!
//! Grounded in `examples/original_source/ome/builder.py:
//! eliminate_redundant_untags`. A value produced by `TAG dest, src, tag` and
//! then immediately `UNTAG`ged again is exactly `src`; this pass collapses
//! that `TAG`/`UNTAG` pair, rewriting every later read of the untagged
//! result to read `src` directly.

use std::collections::HashMap;

use crate::ir::{Instruction, IrMethod, Operand};

pub fn eliminate_redundant_untags(method: &mut IrMethod) {
    let mut tag_sources: HashMap<Operand, Operand> = HashMap::new();
    for instr in &method.instructions {
        if let Instruction::Tag { dest, src, .. } = instr {
            tag_sources.insert(*dest, *src);
        }
    }
    if tag_sources.is_empty() {
        return;
    }
    let mut replacements: HashMap<Operand, Operand> = HashMap::new();
    method.instructions.retain(|instr| {
        if let Instruction::Untag { dest, src } = instr {
            if let Some(original) = tag_sources.get(src) {
                replacements.insert(*dest, *original);
                return false;
            }
        }
        true
    });
    for instr in method.instructions.iter_mut() {
        instr.map_inputs(|op| *replacements.get(&op).unwrap_or(&op));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_tag_then_untag_of_the_same_value() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 3,
            instructions: vec![
                Instruction::Tag { dest: Operand::Temp(1), src: Operand::Temp(0), tag: 1 },
                Instruction::Untag { dest: Operand::Temp(2), src: Operand::Temp(1) },
                Instruction::Return { src: Operand::Temp(2) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        eliminate_redundant_untags(&mut method);
        assert_eq!(method.instructions.len(), 2);
        assert_eq!(method.instructions[1], Instruction::Return { src: Operand::Temp(0) });
    }

    #[test]
    fn leaves_unrelated_untags_alone() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 2,
            instructions: vec![Instruction::Untag { dest: Operand::Temp(1), src: Operand::Temp(0) }, Instruction::Return { src: Operand::Temp(1) }],
            labels: vec![],
            num_stack_slots: 0,
        };
        eliminate_redundant_untags(&mut method);
        assert_eq!(method.instructions.len(), 2);
    }
}
