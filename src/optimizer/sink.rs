//! Pass 2: constant sinking.
//!
//! Grounded in `examples/original_source/ome/builder.py:
//! move_constants_to_usage_points`, tightened per the resolved open question
//! in DESIGN.md: sinking a constant load past a `CALL` is never legal here,
//! since the register allocator must be free to reuse any register across a
//! call boundary without worrying about a constant load that was moved
//! across it.
//!
//! A `LoadValue`/`LoadString` whose destination is read exactly once in the
//! entire method is moved to sit immediately before that use, shortening its
//! live range, as long as no `Call` instruction lies between its current
//! position and that use. A destination read more than once is left where
//! it is — sinking it to one use would not shorten its live range anyway,
//! since it must still be live for the other reads.

use crate::ir::{Instruction, IrMethod};

pub fn sink_constants(method: &mut IrMethod) {
    let mut i = 0;
    while i < method.instructions.len() {
        if !is_constant_load(&method.instructions[i]) {
            i += 1;
            continue;
        }
        let dest = method.instructions[i].dest().expect("constant loads always define a destination");
        let mut use_at = None;
        let mut use_count = 0;
        for j in (i + 1)..method.instructions.len() {
            if method.instructions[j].inputs().contains(&dest) {
                use_count += 1;
                use_at.get_or_insert(j);
            }
        }
        let call_between = match use_at {
            Some(j) => method.instructions[i + 1..j].iter().any(Instruction::is_call),
            None => false,
        };
        match use_at {
            Some(j) if use_count == 1 && j > i + 1 && !call_between => {
                let instr = method.instructions.remove(i);
                method.instructions.insert(j - 1, instr);
                // Re-examine the same index: something else may now sit here.
            }
            _ => i += 1,
        }
    }
}

fn is_constant_load(instr: &Instruction) -> bool {
    matches!(instr, Instruction::LoadValue { .. } | Instruction::LoadString { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;

    fn nop_touching(dest: Operand, src: Operand) -> Instruction {
        Instruction::Alias { dest, src }
    }

    #[test]
    fn sinks_constant_to_just_before_its_use() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 5,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 42 },
                nop_touching(Operand::Temp(2), Operand::Temp(0)),
                nop_touching(Operand::Temp(3), Operand::Temp(0)),
                Instruction::Return { src: Operand::Temp(1) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        sink_constants(&mut method);
        assert_eq!(method.instructions[2], Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 42 });
        assert_eq!(method.instructions[3], Instruction::Return { src: Operand::Temp(1) });
    }

    #[test]
    fn does_not_sink_across_a_call() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 5,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 42 },
                Instruction::Call { dest: Operand::Temp(2), call_label: "OME_message_foo".into(), args: vec![Operand::Temp(0)], traceback_index: None, num_stack_args: 0 },
                Instruction::Return { src: Operand::Temp(1) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        let before = method.instructions.clone();
        sink_constants(&mut method);
        assert_eq!(method.instructions, before);
    }

    #[test]
    fn leaves_a_constant_read_more_than_once_in_place() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 5,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 42 },
                nop_touching(Operand::Temp(2), Operand::Temp(1)),
                nop_touching(Operand::Temp(3), Operand::Temp(1)),
                Instruction::Return { src: Operand::Temp(3) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        let before = method.instructions.clone();
        sink_constants(&mut method);
        assert_eq!(method.instructions, before);
    }
}
