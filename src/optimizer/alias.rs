//! Pass 1: alias elimination.
//!
//! Grounded in `examples/original_source/ome/builder.py: eliminate_aliases`.
//! An `ALIAS dest, src` instruction means "`dest` is just another name for
//! `src`"; this pass follows every alias chain back to its root operand,
//! rewrites every later instruction's inputs to read the root directly, and
//! drops the now-redundant `Alias` instructions.

use std::collections::HashMap;

use crate::ir::{Instruction, IrMethod, Operand};

pub fn eliminate_aliases(method: &mut IrMethod) {
    let mut roots: HashMap<Operand, Operand> = HashMap::new();
    for instr in &method.instructions {
        if let Instruction::Alias { dest, src } = instr {
            let resolved = resolve(&roots, *src);
            roots.insert(*dest, resolved);
        }
    }
    if roots.is_empty() {
        return;
    }
    method.instructions.retain_mut(|instr| {
        if matches!(instr, Instruction::Alias { .. }) {
            return false;
        }
        instr.map_inputs(|op| resolve(&roots, op));
        true
    });
}

fn resolve(roots: &HashMap<Operand, Operand>, mut op: Operand) -> Operand {
    let mut seen = 0;
    while let Some(next) = roots.get(&op) {
        if *next == op || seen > roots.len() {
            break;
        }
        op = *next;
        seen += 1;
    }
    op
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_alias_chain_and_removes_alias_instructions() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 4,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 10 },
                Instruction::Alias { dest: Operand::Temp(2), src: Operand::Temp(1) },
                Instruction::Alias { dest: Operand::Temp(3), src: Operand::Temp(2) },
                Instruction::Return { src: Operand::Temp(3) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        eliminate_aliases(&mut method);
        assert_eq!(method.instructions.len(), 2);
        assert_eq!(method.instructions[1], Instruction::Return { src: Operand::Temp(1) });
    }

    #[test]
    fn no_op_when_no_aliases_present() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 1,
            instructions: vec![Instruction::Return { src: Operand::Temp(0) }],
            labels: vec![],
            num_stack_slots: 0,
        };
        eliminate_aliases(&mut method);
        assert_eq!(method.instructions.len(), 1);
    }
}
