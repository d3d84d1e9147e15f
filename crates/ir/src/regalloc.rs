use crate::value::ValueId;

/// Maps SSA values to the registers they live in once code is lowered.
pub trait RegisterAllocator {
    /// The register holding `value` at the instruction numbered
    /// `inst_number`.
    fn register_for_value(&self, value: ValueId, inst_number: i32) -> u32;

    /// Returns `false` for values that never occupy a register, such as
    /// constants folded into their users.
    fn needs_register(&self, value: ValueId) -> bool {
        let _ = value;
        true
    }
}
