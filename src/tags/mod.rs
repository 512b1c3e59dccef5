//! Tag & constant allocator (spec §4.4).
//!
//! Grounded in `examples/original_source/ome/compiler.py: IdAllocator` (the
//! variant actually used by `Program`, with the `Tag_Constant`/
//! `Constant_BuiltIn` assertions) and `idalloc.py`'s standalone algorithm.

use crate::ast::{Block, Tag};
use crate::error::OmeError;

/// The fixed tag id the runtime reserves for the constant encoding
/// (`value = constant_id`, `tag = Tag_Constant`). `OPAQUE_TAG_NAMES`
/// necessarily lists `Constant` first, so this is always `0`.
pub const TAG_CONSTANT: Tag = 0;

/// The fixed constant id the runtime expects the built-in block to occupy.
/// `CONSTANT_NAMES` necessarily lists `BuiltIn` fourth (after
/// False/True/Empty), so this is always `3`.
pub const CONSTANT_BUILT_IN: i64 = 3;

/// Ceiling on the number of distinct (non-constant) tags a program may use.
/// Tags are packed into the high bits of a 64-bit tagged value alongside a
/// payload; this bound reflects that the tag field itself is narrow.
pub const MAX_TAG: i64 = (1 << 16) - 1;

/// Ceiling on the number of distinct constant ids, packed into the payload
/// bits under `Tag_Constant`.
pub const MAX_CONSTANT_TAG: i64 = (1 << 16) - 1;

/// Width of the tag field in a tagged 64-bit value: the high `NUM_TAG_BITS`
/// bits hold the tag, the low remaining bits hold the payload (spec §4.3
/// data model). Consumed by the target emitter's `TAG`/`UNTAG`/`LOAD_VALUE`
/// instruction lowering, which extracts the tag with `shr rax, NUM_DATA_BITS`
/// and packs it back in with a shift-or-rotate sequence.
pub const NUM_TAG_BITS: u32 = 16;

/// Remaining payload bits once the tag field is subtracted from a 64-bit word.
pub const NUM_DATA_BITS: u32 = 64 - NUM_TAG_BITS;

/// Ceiling on the number of elements an array literal may hold (spec §3
/// Non-goals: arbitrary-size literals are out of scope). Shared between the
/// parser (which rejects oversized literals up front) and the target
/// emitter's `OME_MAX_ARRAY_SIZE` declaration.
pub const MAX_ARRAY_SIZE: usize = 65536;

pub fn constant_to_tag(_constant_id: i64) -> Tag {
    TAG_CONSTANT
}

/// Assigns stable numeric identities to every opaque kind, pointer kind,
/// user block, built-in constant, and constant user block.
pub struct IdAllocator {
    opaque_tag_names: Vec<String>,
    pointer_tag_names: Vec<String>,
    constant_names: Vec<String>,

    pub tags: std::collections::HashMap<String, Tag>,
    pub tag_list: Vec<(String, Tag)>,
    pub pointer_tag_id: Tag,
    pub constants: std::collections::HashMap<String, i64>,
    pub constant_list: Vec<(String, i64)>,
    pub last_tag_id: Tag,
    pub last_constant_id: i64,
}

impl IdAllocator {
    pub fn new(opaque_tag_names: &[&str], pointer_tag_names: &[&str], constant_names: &[&str]) -> Self {
        IdAllocator {
            opaque_tag_names: opaque_tag_names.iter().map(|s| s.to_string()).collect(),
            pointer_tag_names: pointer_tag_names.iter().map(|s| s.to_string()).collect(),
            constant_names: constant_names.iter().map(|s| s.to_string()).collect(),
            tags: Default::default(),
            tag_list: Vec::new(),
            pointer_tag_id: 0,
            constants: Default::default(),
            constant_list: Vec::new(),
            last_tag_id: 0,
            last_constant_id: 0,
        }
    }

    /// Allocate ids for every opaque/pointer kind, every non-constant block
    /// in `block_list` (in list order), every built-in constant name, and
    /// every constant block in `block_list` (in list order). Mutates each
    /// `Block`'s `tag`/`tag_constant` fields in place.
    pub fn allocate_ids(&mut self, block_list: &mut [&mut Block]) -> Result<(), OmeError> {
        self.tags.clear();
        self.tag_list.clear();
        let mut tag_id: Tag = 0;
        for name in &self.opaque_tag_names {
            self.tags.insert(name.clone(), tag_id);
            self.tag_list.push((name.clone(), tag_id));
            tag_id += 1;
        }
        self.pointer_tag_id = tag_id;
        for name in &self.pointer_tag_names {
            self.tags.insert(name.clone(), tag_id);
            self.tag_list.push((name.clone(), tag_id));
            tag_id += 1;
        }
        for block in block_list.iter_mut() {
            if !block.is_constant {
                block.tag = Some(tag_id);
                tag_id += 1;
            }
        }
        if tag_id > MAX_TAG {
            return Err(OmeError::TagSpaceExhausted);
        }

        self.constants.clear();
        self.constant_list.clear();
        let mut constant_id: i64 = 0;
        for name in &self.constant_names {
            self.constants.insert(name.clone(), constant_id);
            self.constant_list.push((name.clone(), constant_id));
            self.tags.insert(name.clone(), constant_to_tag(constant_id));
            constant_id += 1;
        }
        for block in block_list.iter_mut() {
            if block.is_constant {
                block.tag = Some(constant_to_tag(constant_id));
                block.tag_constant = Some(constant_id);
                constant_id += 1;
            }
        }
        if constant_id > MAX_CONSTANT_TAG {
            return Err(OmeError::ConstantSpaceExhausted);
        }

        self.last_tag_id = tag_id;
        self.last_constant_id = constant_id;

        debug_assert_eq!(TAG_CONSTANT, *self.tags.get("Constant").expect("Constant is always an opaque tag"));
        debug_assert_eq!(CONSTANT_BUILT_IN, *self.constants.get("BuiltIn").expect("BuiltIn is always a constant"));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Block;

    fn allocator() -> IdAllocator {
        IdAllocator::new(
            &["Constant", "Small-Integer"],
            &["String", "Array"],
            &["False", "True", "Empty", "BuiltIn"],
        )
    }

    #[test]
    fn opaque_and_pointer_tags_are_allocated_first() {
        let mut ids = allocator();
        let mut blocks: Vec<Block> = vec![];
        let mut refs: Vec<&mut Block> = blocks.iter_mut().collect();
        ids.allocate_ids(&mut refs).unwrap();
        assert_eq!(ids.tags["Constant"], 0);
        assert_eq!(ids.tags["Small-Integer"], 1);
        assert_eq!(ids.tags["String"], 2);
        assert_eq!(ids.tags["Array"], 3);
        assert_eq!(ids.pointer_tag_id, 2);
    }

    #[test]
    fn user_blocks_get_distinct_tags_in_order() {
        let mut ids = allocator();
        let mut b1 = Block::new(vec![crate::ast::Slot { name: "x".into(), mutable: false, index: 0 }], vec![]);
        let mut b2 = Block::new(vec![crate::ast::Slot { name: "y".into(), mutable: false, index: 0 }], vec![]);
        let mut refs: Vec<&mut Block> = vec![&mut b1, &mut b2];
        ids.allocate_ids(&mut refs).unwrap();
        assert_ne!(b1.tag, b2.tag);
        assert!(b1.tag.unwrap() >= ids.pointer_tag_id + 2);
    }

    #[test]
    fn constant_blocks_get_constant_tag_and_distinct_ids() {
        let mut ids = allocator();
        let mut b1 = Block::empty();
        let mut b2 = Block::empty();
        let mut refs: Vec<&mut Block> = vec![&mut b1, &mut b2];
        ids.allocate_ids(&mut refs).unwrap();
        assert_eq!(b1.tag, Some(TAG_CONSTANT));
        assert_eq!(b2.tag, Some(TAG_CONSTANT));
        assert_ne!(b1.tag_constant, b2.tag_constant);
    }

    #[test]
    fn built_in_maps_to_fixed_id() {
        let mut ids = allocator();
        let mut refs: Vec<&mut Block> = vec![];
        ids.allocate_ids(&mut refs).unwrap();
        assert_eq!(ids.constants["BuiltIn"], CONSTANT_BUILT_IN);
    }
}
