//! Linear-scan register allocator (spec §4.8).
//!
//! Grounded in spec §4.8's description of the allocator and
//! `examples/original_source/ome/target_x86_64.py`'s register lists (the
//! concrete `RegisterConventions` a target hands in). Runs after the
//! optimiser; rewrites every `Operand::Temp` to `Operand::Reg`/`Operand::Stack`
//! and introduces `Spill`/`Unspill`/`Move`/`Push` instructions.

use std::collections::HashMap;

use crate::ir::{Instruction, IrMethod, Operand};

/// The register conventions a target supplies to the allocator: which
/// registers carry the first N arguments, which one carries the return
/// value, and which extra scratch registers are available for temps beyond
/// those. Fixed data per target, not allocator policy.
#[derive(Debug, Clone)]
pub struct RegisterConventions {
    pub arg_registers: Vec<&'static str>,
    pub return_register: &'static str,
    pub temp_registers: Vec<&'static str>,
}

impl RegisterConventions {
    /// The x86-64 target's conventions (spec §4.8/§10): `rdi, rsi, rdx, rcx,
    /// r8, r9` carry arguments, `rax` the return value, `r10, r11` are free
    /// scratch registers; `rsp`/`rbp`/`rbx`/`r12` are reserved for the stack
    /// pointer, context pointer, and nursery bump/limit pointers and are
    /// never handed to the allocator.
    pub fn x86_64() -> Self {
        RegisterConventions {
            arg_registers: vec!["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
            return_register: "rax",
            temp_registers: vec!["r10", "r11"],
        }
    }

    /// Every register the allocator may hand out, in preferred assignment
    /// order: argument registers first (so an argument already sitting in
    /// its incoming register rarely needs to move), then scratch temps,
    /// then the return register (free between calls).
    fn allocatable(&self) -> Vec<&'static str> {
        let mut regs = self.arg_registers.clone();
        regs.extend(self.temp_registers.iter().copied());
        regs.push(self.return_register);
        regs
    }
}

struct LiveRange {
    def: usize,
    last_use: usize,
}

/// `def`/`last_use` are instruction indices; a temp never read after its
/// definition has `last_use == def`. Incoming arguments are defined at
/// virtual index `0` (before the first real instruction) regardless of
/// where in the arg list they sit.
fn compute_live_ranges(method: &IrMethod) -> HashMap<usize, LiveRange> {
    let mut ranges: HashMap<usize, LiveRange> = HashMap::new();
    for t in 0..method.num_args {
        ranges.insert(t, LiveRange { def: 0, last_use: 0 });
    }
    for (i, instr) in method.instructions.iter().enumerate() {
        if let Some(Operand::Temp(t)) = instr.dest() {
            ranges.entry(t).or_insert(LiveRange { def: i, last_use: i }).def = i;
        }
        for input in instr.inputs() {
            if let Operand::Temp(t) = input {
                let r = ranges.entry(t).or_insert(LiveRange { def: i, last_use: i });
                r.last_use = r.last_use.max(i);
            }
        }
    }
    ranges
}

/// Allocate registers and stack slots for `method` in place, per spec §4.8:
/// LIFO reuse of just-freed registers, furthest-next-use eviction when
/// every register is live, and caller-saved spill/restore bracketing every
/// `Call`.
pub fn allocate(method: &mut IrMethod, conv: &RegisterConventions) {
    let ranges = compute_live_ranges(method);
    let pool = conv.allocatable();

    let mut free: Vec<&'static str> = Vec::new();
    let mut active: HashMap<usize, &'static str> = HashMap::new();
    let mut stack_slot_of: HashMap<usize, usize> = HashMap::new();
    let mut next_stack_slot = 0usize;
    let mut used_regs: std::collections::HashSet<&'static str> = std::collections::HashSet::new();

    // Seed incoming argument registers.
    for t in 0..method.num_args {
        if let Some(reg) = conv.arg_registers.get(t) {
            active.insert(t, *reg);
            used_regs.insert(*reg);
        } else {
            stack_slot_of.insert(t, next_stack_slot);
            next_stack_slot += 1;
        }
    }

    let mut new_instructions = Vec::with_capacity(method.instructions.len());

    for (i, instr) in method.instructions.iter().enumerate() {
        // Free every register whose temp's live range ended before this
        // instruction — most-recently-freed first, so the next allocation
        // prefers it (LIFO reuse, spec §4.8).
        let expired: Vec<usize> = active.keys().copied().filter(|t| ranges[t].last_use < i).collect();
        for t in expired {
            if let Some(reg) = active.remove(&t) {
                free.push(reg);
            }
        }

        let mut spilled_here = Vec::new();
        if instr.is_call() {
            // Every temp still live past this call must survive it in
            // memory: the callee may clobber any caller-saved register.
            let still_live: Vec<usize> = active.keys().copied().filter(|t| ranges[t].last_use > i).collect();
            for t in still_live {
                let reg = active.remove(&t).expect("still_live temps are active by construction");
                let slot = *stack_slot_of.entry(t).or_insert_with(|| {
                    let s = next_stack_slot;
                    next_stack_slot += 1;
                    s
                });
                new_instructions.push(Instruction::Spill { reg: Operand::Reg(reg), stack_slot: slot });
                spilled_here.push((t, reg, slot));
                free.retain(|r| *r != reg);
            }
        }

        let locate_input = |t: usize, active: &HashMap<usize, &'static str>, stack_slot_of: &HashMap<usize, usize>| -> Operand {
            if let Some(reg) = active.get(&t) {
                Operand::Reg(reg)
            } else if let Some(slot) = stack_slot_of.get(&t) {
                Operand::Stack(*slot)
            } else {
                // A temp defined and consumed within the same instruction
                // (e.g. an instruction reading its own not-yet-live dest)
                // never occurs in this IR; fall back to the return register
                // rather than panic on malformed input.
                Operand::Reg(conv.return_register)
            }
        };

        if let Instruction::Call { call_label, args, traceback_index, .. } = instr {
            // Outgoing-argument placement (spec §4.8): the first
            // `arg_registers.len()` arguments move into those fixed
            // registers (a parallel-copy shuffle, since two arguments can
            // simply want each other's register), the remainder are pushed
            // right-to-left immediately before the call. Register-sourced
            // moves read their operands before any push shifts `rsp`, so
            // existing `[rsp+slot*8]` spill addressing stays valid; a push
            // that reads a still-spilled source instead compensates for
            // every prior push's stack growth explicitly.
            let arg_locs: Vec<Operand> = args
                .iter()
                .map(|op| match op {
                    Operand::Temp(t) => locate_input(*t, &active, &stack_slot_of),
                    other => *other,
                })
                .collect();

            let num_reg_args = arg_locs.len().min(conv.arg_registers.len());
            let moves: Vec<(Operand, &'static str)> = arg_locs[..num_reg_args].iter().zip(conv.arg_registers.iter()).map(|(src, dst)| (*src, *dst)).collect();
            new_instructions.extend(sequentialize_moves(moves, conv.temp_registers[0]));

            let mut pushed = 0usize;
            for arg in arg_locs[num_reg_args..].iter().rev() {
                let src = match arg {
                    Operand::Stack(slot) => Operand::Stack(slot + pushed),
                    other => *other,
                };
                new_instructions.push(Instruction::Push { src });
                pushed += 1;
            }

            new_instructions.push(Instruction::Call {
                dest: Operand::Reg(conv.return_register),
                call_label: call_label.clone(),
                args: conv.arg_registers[..num_reg_args].iter().map(|r| Operand::Reg(*r)).collect(),
                traceback_index: *traceback_index,
                num_stack_args: pushed,
            });

            // The call's result always lands in the return register; the
            // allocator then decides which register keeps it live,
            // synthesising a `MOVE` only when that differs (spec §4.8).
            if let Some(Operand::Temp(dest_temp)) = instr.dest() {
                let reg = free.pop().unwrap_or_else(|| evict_furthest_next_use(&mut active, &ranges, i, &pool, &used_regs));
                used_regs.insert(reg);
                active.insert(dest_temp, reg);
                stack_slot_of.remove(&dest_temp);
                if reg != conv.return_register {
                    new_instructions.push(Instruction::Move { dest: Operand::Reg(reg), src: Operand::Reg(conv.return_register) });
                }
            }
        } else {
            let mut rewritten = instr.clone();
            rewritten.map_inputs(|op| match op {
                Operand::Temp(t) => locate_input(t, &active, &stack_slot_of),
                other => other,
            });

            if let Some(Operand::Temp(dest_temp)) = instr.dest() {
                let reg = free.pop().unwrap_or_else(|| evict_furthest_next_use(&mut active, &ranges, i, &pool, &used_regs));
                used_regs.insert(reg);
                active.insert(dest_temp, reg);
                stack_slot_of.remove(&dest_temp);
                rewritten.set_dest(Operand::Reg(reg));
            }

            new_instructions.push(rewritten);
        }

        for (t, reg, slot) in spilled_here {
            if ranges[&t].last_use > i {
                new_instructions.push(Instruction::Unspill { reg: Operand::Reg(reg), stack_slot: slot });
                active.insert(t, reg);
                used_regs.insert(reg);
            }
        }
    }

    method.instructions = new_instructions;
    method.num_stack_slots = next_stack_slot;
}

/// No free register: evict whichever currently-active temp is read
/// furthest in the future (or never again), spilling it to a fresh stack
/// slot and handing its register to the new destination.
fn evict_furthest_next_use(active: &mut HashMap<usize, &'static str>, ranges: &HashMap<usize, LiveRange>, at: usize, pool: &[&'static str], used_regs: &std::collections::HashSet<&'static str>) -> &'static str {
    let victim = active
        .iter()
        .filter(|(t, _)| ranges[t].last_use >= at)
        .max_by_key(|(t, _)| ranges[t].last_use)
        .map(|(t, r)| (*t, *r));
    if let Some((victim_temp, reg)) = victim {
        active.remove(&victim_temp);
        return reg;
    }
    // First time this register in the pool is needed.
    for r in pool {
        if !used_regs.contains(r) {
            return *r;
        }
    }
    pool[0]
}

/// Resolve a set of simultaneous `src -> register` argument moves into an
/// ordered sequence of `MOVE`s (spec §4.8 "parallel" argument placement):
/// a move is safe to emit immediately once no other pending move still needs
/// to read its destination register. When every remaining move is part of a
/// cycle (e.g. two arguments trading registers), break it by routing one
/// move through `scratch` — a register the calling convention never assigns
/// to an argument, so it can never collide with a pending destination.
fn sequentialize_moves(mut moves: Vec<(Operand, &'static str)>, scratch: &'static str) -> Vec<Instruction> {
    let mut result = Vec::new();
    while !moves.is_empty() {
        let safe = moves.iter().enumerate().find(|(i, (_, dst))| moves.iter().enumerate().all(|(j, (src, _))| j == *i || !matches!(src, Operand::Reg(r) if r == dst))).map(|(i, _)| i);
        if let Some(i) = safe {
            let (src, dst) = moves.remove(i);
            if src != Operand::Reg(dst) {
                result.push(Instruction::Move { dest: Operand::Reg(dst), src });
            }
        } else {
            // Every remaining move's destination is read by some other
            // pending move: stash the first one's source in `scratch`: and
            // patch every move that wanted to read its old register to read
            // `scratch` instead, which frees that register for its own move.
            let (src, dst) = moves.remove(0);
            result.push(Instruction::Move { dest: Operand::Reg(scratch), src });
            for (s, _) in moves.iter_mut() {
                if matches!(s, Operand::Reg(r) if *r == dst) {
                    *s = Operand::Reg(scratch);
                }
            }
            moves.push((Operand::Reg(scratch), dst));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_incoming_self_to_first_arg_register() {
        let mut method = IrMethod { num_args: 1, num_locals: 1, instructions: vec![Instruction::Return { src: Operand::Temp(0) }], labels: vec![], num_stack_slots: 0 };
        let conv = RegisterConventions::x86_64();
        allocate(&mut method, &conv);
        assert_eq!(method.instructions[0], Instruction::Return { src: Operand::Reg("rdi") });
    }

    #[test]
    fn spills_live_temp_across_a_call() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 3,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 7 },
                Instruction::Call { dest: Operand::Temp(2), call_label: "OME_message_foo".into(), args: vec![Operand::Temp(0)], traceback_index: None, num_stack_args: 0 },
                Instruction::Return { src: Operand::Temp(1) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        let conv = RegisterConventions::x86_64();
        allocate(&mut method, &conv);
        let has_spill = method.instructions.iter().any(|i| matches!(i, Instruction::Spill { .. }));
        let has_unspill = method.instructions.iter().any(|i| matches!(i, Instruction::Unspill { .. }));
        assert!(has_spill, "{:?}", method.instructions);
        assert!(has_unspill, "{:?}", method.instructions);
        assert!(method.num_stack_slots >= 1);
    }

    #[test]
    fn reuses_freed_register_for_a_later_temp() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 3,
            instructions: vec![
                Instruction::LoadValue { dest: Operand::Temp(1), tag: 1, value: 1 },
                Instruction::Return { src: Operand::Temp(1) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        let conv = RegisterConventions::x86_64();
        allocate(&mut method, &conv);
        assert!(matches!(method.instructions[0], Instruction::LoadValue { dest: Operand::Reg(_), .. }));
    }

    #[test]
    fn call_places_overflow_args_on_the_stack_and_counts_them() {
        let conv = RegisterConventions::x86_64();
        let args: Vec<Operand> = (0..7).map(Operand::Temp).collect();
        let mut method = IrMethod {
            num_args: 7,
            num_locals: 8,
            instructions: vec![Instruction::Call { dest: Operand::Temp(7), call_label: "OME_message_foo".into(), args, traceback_index: None, num_stack_args: 0 }, Instruction::Return { src: Operand::Temp(7) }],
            labels: vec![],
            num_stack_slots: 0,
        };
        allocate(&mut method, &conv);
        let pushes = method.instructions.iter().filter(|i| matches!(i, Instruction::Push { .. })).count();
        assert_eq!(pushes, 1, "{:?}", method.instructions);
        let call = method.instructions.iter().find_map(|i| match i {
            Instruction::Call { num_stack_args, .. } => Some(*num_stack_args),
            _ => None,
        });
        assert_eq!(call, Some(1), "{:?}", method.instructions);
    }

    #[test]
    fn call_result_is_moved_out_of_the_return_register_when_kept_live() {
        let conv = RegisterConventions::x86_64();
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 3,
            instructions: vec![
                Instruction::Call { dest: Operand::Temp(1), call_label: "OME_message_foo".into(), args: vec![Operand::Temp(0)], traceback_index: None, num_stack_args: 0 },
                Instruction::Call { dest: Operand::Temp(2), call_label: "OME_message_bar".into(), args: vec![Operand::Temp(0)], traceback_index: None, num_stack_args: 0 },
                Instruction::Return { src: Operand::Temp(1) },
            ],
            labels: vec![],
            num_stack_slots: 0,
        };
        allocate(&mut method, &conv);
        // Temp(1) must survive the second call, made across a call that also
        // lands its result in `rax`: it cannot still be sitting in `rax`.
        let has_move_out_of_rax = method.instructions.iter().any(|i| matches!(i, Instruction::Move { src: Operand::Reg("rax"), .. }) || matches!(i, Instruction::Spill { reg: Operand::Reg("rax"), .. }));
        assert!(has_move_out_of_rax, "{:?}", method.instructions);
    }
}
