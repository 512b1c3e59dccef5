//! Pass 4: local renumbering.
//!
//! Grounded in `examples/original_source/ome/builder.py: renumber_locals`.
//! Earlier passes can retire instructions (and the temps they defined),
//! leaving gaps in the temp numbering; this pass walks the method in
//! definition order and assigns a dense run of ids starting right after the
//! argument temps, so the register allocator sees a compact range to work
//! over instead of whatever was left behind.

use std::collections::HashMap;

use crate::ir::{IrMethod, Operand};

pub fn renumber_locals(method: &mut IrMethod) {
    let num_args = method.num_args;
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let mut next = num_args;

    let mut touch = |t: usize, mapping: &mut HashMap<usize, usize>, next: &mut usize| {
        if t < num_args {
            return;
        }
        mapping.entry(t).or_insert_with(|| {
            let id = *next;
            *next += 1;
            id
        });
    };

    for instr in &method.instructions {
        if let Some(Operand::Temp(t)) = instr.dest() {
            touch(t, &mut mapping, &mut next);
        }
        for input in instr.inputs() {
            if let Operand::Temp(t) = input {
                touch(t, &mut mapping, &mut next);
            }
        }
    }

    let remap = |op: Operand| match op {
        Operand::Temp(t) if t >= num_args => Operand::Temp(*mapping.get(&t).expect("every temp was visited above")),
        other => other,
    };

    for instr in method.instructions.iter_mut() {
        if let Some(dest) = instr.dest() {
            instr.set_dest(remap(dest));
        }
        instr.map_inputs(remap);
    }
    method.num_locals = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instruction;

    #[test]
    fn compacts_gaps_left_by_earlier_passes() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 10,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(7), tag: 1, value: 1 },
                Instruction::Return { src: Operand::Temp(7) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        renumber_locals(&mut method);
        assert_eq!(method.instructions[0], Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 1 });
        assert_eq!(method.instructions[1], Instruction::Return { src: Operand::Temp(1) });
        assert_eq!(method.num_locals, 2);
    }

    #[test]
    fn leaves_argument_temps_untouched() {
        let mut method = IrMethod { num_args: 2, num_locals: 2, instructions: vec![Instruction::Return { src: Operand::Temp(1) }], labels: vec![], num_stack_slots: 0 };
        renumber_locals(&mut method);
        assert_eq!(method.instructions[0], Instruction::Return { src: Operand::Temp(1) });
        assert_eq!(method.num_locals, 2);
    }
}
