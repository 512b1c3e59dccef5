//! Pass 0: label application.
//!
//! The reference pipeline's first pass resolves jump-target labels to
//! concrete instruction offsets before the later passes start moving
//! instructions around. OME method bodies have no intra-method branches —
//! every control-flow decision is a dynamic dispatch, not a jump — so the
//! `labels` a method carries are purely informational (debug-dump
//! annotations pointing at call sites). This pass still runs, for fidelity
//! with the reference ordering and so a later pass that *does* reorder
//! instructions has a clear hook to keep `Label::location` in sync.

use crate::ir::IrMethod;

pub fn apply_labels(method: &mut IrMethod) {
    // No jump instructions exist in this IR to resolve; nothing to rewrite.
    // Kept as an explicit pass (rather than folded away) because later
    // passes that splice instructions (`sink`) must not silently invalidate
    // `Label::location` — if this crate ever grows control-flow labels,
    // this is where their offsets get fixed up.
    let _ = method;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Label, Operand};

    #[test]
    fn leaves_instructions_and_labels_untouched() {
        let mut method = IrMethod {
            num_args: 1,
            num_locals: 1,
            instructions: vec![Instruction::Return { src: Operand::Temp(0) }],
            labels: vec![Label { name: "OME_method_1_foo".into(), location: 0 }],
            num_stack_slots: 0,
        };
        apply_labels(&mut method);
        assert_eq!(method.instructions.len(), 1);
        assert_eq!(method.labels.len(), 1);
    }
}
