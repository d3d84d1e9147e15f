//! SSA values and debug local metadata.
use std::{fmt, ops::Deref, sync::Arc};

use cranelift_entity::entity_impl;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    factory::{DexString, DexType},
    inst::InstId,
    BlockId,
};

/// An opaque reference to [`ValueData`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);
entity_impl!(ValueId, "v");

/// Register class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveType {
    Single,
    Wide,
    Object,
}

impl MoveType {
    pub fn required_registers(self) -> u32 {
        match self {
            Self::Wide => 2,
            Self::Single | Self::Object => 1,
        }
    }

    /// # Panics
    /// Panics on `V` and on an empty descriptor; neither has a register class.
    pub fn from_descriptor(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'J' | b'D') => Self::Wide,
            Some(b'L' | b'[') => Self::Object,
            Some(b'V') => panic!("void has no move type"),
            Some(_) => Self::Single,
            None => panic!("empty type descriptor"),
        }
    }
}

impl fmt::Display for MoveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Single => "single",
            Self::Wide => "wide",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

/// A source level local variable: name, declared type and optional generic
/// signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebugLocalInfo {
    pub name: DexString,
    pub ty: DexType,
    pub signature: Option<DexString>,
}

impl DebugLocalInfo {
    pub fn new(name: DexString, ty: DexType, signature: Option<DexString>) -> Self {
        Self {
            name,
            ty,
            signature,
        }
    }
}

/// Shared handle to a canonical [`DebugLocalInfo`].
///
/// Two handles are equal only if they point at the same instance. Use
/// [`LocalInterner`] to obtain canonical handles; structurally equal locals
/// created outside an interner compare unequal.
#[derive(Clone)]
pub struct DebugLocal(Arc<DebugLocalInfo>);

impl DebugLocal {
    pub fn new(info: DebugLocalInfo) -> Self {
        Self(Arc::new(info))
    }

    pub fn info(&self) -> &DebugLocalInfo {
        &self.0
    }
}

impl PartialEq for DebugLocal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DebugLocal {}

impl Deref for DebugLocal {
    type Target = DebugLocalInfo;

    fn deref(&self) -> &DebugLocalInfo {
        &self.0
    }
}

impl fmt::Debug for DebugLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Canonicalizes locals so that equal triples share one [`DebugLocal`].
#[derive(Debug, Default)]
pub struct LocalInterner {
    locals: FxHashMap<DebugLocalInfo, DebugLocal>,
}

impl LocalInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canonicalize(&mut self, info: DebugLocalInfo) -> DebugLocal {
        self.locals
            .entry(info)
            .or_insert_with(|| DebugLocal::new(info))
            .clone()
    }

    pub fn local(
        &mut self,
        name: DexString,
        ty: DexType,
        signature: Option<DexString>,
    ) -> DebugLocal {
        self.canonicalize(DebugLocalInfo::new(name, ty, signature))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiData {
    pub block: BlockId,
    /// One operand per predecessor of `block`, in predecessor order.
    pub operands: SmallVec<[ValueId; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// Defined by an instruction.
    Inst(InstId),
    /// Defined by a phi at the head of a block.
    Phi(PhiData),
    /// Not attached to a definition yet.
    Undefined,
}

/// A value data definition.
#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: MoveType,
    pub kind: ValueKind,
    /// Printable number, unique within one code object.
    pub number: u32,
    pub local: Option<DebugLocal>,
    /// The value that occupied the same local before this one.
    pub previous_local_value: Option<ValueId>,
    never_null: bool,
    is_this: bool,
    is_argument: bool,
}

impl ValueData {
    pub fn new(ty: MoveType, number: u32) -> Self {
        Self {
            ty,
            kind: ValueKind::Undefined,
            number,
            local: None,
            previous_local_value: None,
            never_null: false,
            is_this: false,
            is_argument: false,
        }
    }

    pub fn with_local(mut self, local: DebugLocal) -> Self {
        self.local = Some(local);
        self
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, ValueKind::Phi(_))
    }

    pub fn phi(&self) -> Option<&PhiData> {
        match &self.kind {
            ValueKind::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    pub fn definition(&self) -> Option<InstId> {
        match self.kind {
            ValueKind::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn has_local_info(&self) -> bool {
        self.local.is_some()
    }

    pub fn mark_as_argument(&mut self) {
        self.is_argument = true;
    }

    /// Marks the receiver argument. The receiver is an argument and never null.
    pub fn mark_as_this(&mut self) {
        self.is_this = true;
        self.is_argument = true;
        self.never_null = true;
    }

    pub fn mark_never_null(&mut self) {
        self.never_null = true;
    }

    pub fn is_this(&self) -> bool {
        self.is_this
    }

    pub fn is_argument(&self) -> bool {
        self.is_argument
    }

    pub fn is_never_null(&self) -> bool {
        self.never_null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DexItemFactory;

    #[test]
    fn move_types() {
        assert_eq!(MoveType::from_descriptor("J"), MoveType::Wide);
        assert_eq!(MoveType::from_descriptor("D"), MoveType::Wide);
        assert_eq!(MoveType::from_descriptor("[I"), MoveType::Object);
        assert_eq!(MoveType::from_descriptor("LA;"), MoveType::Object);
        assert_eq!(MoveType::from_descriptor("Z"), MoveType::Single);
        assert_eq!(MoveType::Wide.required_registers(), 2);
        assert_eq!(MoveType::Object.required_registers(), 1);
    }

    #[test]
    fn locals_compare_by_identity() {
        let factory = DexItemFactory::new();
        let name = factory.create_string("x");
        let info = DebugLocalInfo::new(name, factory.int_type, None);

        let mut interner = LocalInterner::new();
        let a = interner.canonicalize(info);
        let b = interner.canonicalize(info);
        assert_eq!(a, b);

        let fresh = DebugLocal::new(info);
        assert_ne!(a, fresh);
        assert_eq!(*a, *fresh);
    }

    #[test]
    fn this_is_never_null() {
        let mut value = ValueData::new(MoveType::Object, 0);
        assert!(!value.is_never_null());
        value.mark_as_this();
        assert!(value.is_this() && value.is_argument() && value.is_never_null());
    }
}
