//! Built-in name tables and the synthetic outermost scope they populate.
//!
//! Grounded in `examples/original_source/ome/idalloc.py`'s module-level name
//! lists (the compiler.py `IdAllocator` variant, which is the one actually
//! wired into `Program`).

use once_cell::sync::Lazy;

/// Opaque tags: runtime-provided immediate values, never heap pointers.
pub static OPAQUE_TAG_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["Constant", "Small-Integer"]);

/// Pointer tags: values with these tags are heap pointers the GC must trace.
pub static POINTER_TAG_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "String",
        "String-Buffer",
        "Byte-Array",
        "Byte-Array-Mutable",
        "Byte-Array-Buffer",
        "Array",
        "Array-Mutable",
        "Array-Buffer",
    ]
});

/// Built-in constants, encoded as immediates under the reserved `Tag_Constant`
/// tag rather than as heap pointers.
pub static CONSTANT_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "False",
        "True",
        "Empty",
        "BuiltIn",
        "Stack-Overflow",
        "Not-Understood",
        "Type-Error",
        "Index-Error",
        "Overflow",
        "Divide-By-Zero",
    ]
});

/// Messages that are permitted to have zero implementing methods without
/// triggering the "no methods defined for message" warning (§4.5).
pub static OPTIONAL_MESSAGES: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["return"]);

/// The implicit outermost enclosing block: a synthetic scope whose slots are
/// the built-in method symbols the target supplies, seeding pass A's scope
/// stack (spec §3's `BuiltInBlock`).
pub struct BuiltInBlock {
    pub tag: crate::ast::Tag,
    pub names: Vec<String>,
}

impl BuiltInBlock {
    /// `tag` is fixed to the `Constant` opaque tag's id (0): the built-in
    /// block itself is addressed as a constant, matching the reference
    /// `BuiltInBlock` whose tag is the target's `Tag_Constant`-adjacent
    /// `Constant_BuiltIn` id rather than a user block tag.
    pub fn new(names: Vec<String>) -> Self {
        BuiltInBlock { tag: 0, names }
    }
}

/// A built-in method the target supplies directly as hand-written assembly,
/// bypassing the AST/IR lowering pipeline entirely (spec §4.9/§10).
///
/// Grounded in `examples/original_source/ome/ome_types.py: BuiltInMethod`
/// (`tag_name`/`symbol`/`arg_names`/`sent_messages`/`code`); `code` here is
/// already target-specific assembly text rather than a generator callback,
/// since this crate only ever targets x86-64.
#[derive(Debug, Clone)]
pub struct BuiltInMethod {
    /// Name of the tag this method is defined on, looked up in
    /// `IdAllocator::tags` once ids are allocated (e.g. `"Small-Integer"`).
    pub tag_name: &'static str,
    pub symbol: &'static str,
    pub arg_names: &'static [&'static str],
    /// Messages this method's body itself sends, feeding reachability (spec
    /// §4.5): if this method is ever reachable, these become reachable too.
    pub sent_messages: &'static [&'static str],
    /// Raw assembly body, indented and newline-terminated, ready to paste
    /// between this method's label and the next declaration.
    pub code: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_tables_have_no_duplicates() {
        let mut all = OPAQUE_TAG_NAMES.clone();
        all.extend(POINTER_TAG_NAMES.iter());
        all.extend(CONSTANT_NAMES.iter());
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(all.len(), sorted.len());
    }

    #[test]
    fn builtin_precedes_reserved_error_constants() {
        let idx = CONSTANT_NAMES.iter().position(|n| *n == "BuiltIn").unwrap();
        assert!(CONSTANT_NAMES[..idx].contains(&"False"));
    }
}
