//! Instruction kinds of the SSA IR.
use std::{collections::BTreeMap, collections::BTreeSet, fmt};

use cranelift_entity::{entity_impl, packed_option::PackedOption};
use smallvec::SmallVec;

use crate::{
    factory::{DexField, DexMethod, DexString, DexType},
    value::{DebugLocal, MoveType, ValueId},
};

/// An opaque reference to [`InstData`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstId(pub u32);
entity_impl!(InstId, "inst");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericType {
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl NumericType {
    pub fn is_floating_point(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn move_type(self) -> MoveType {
        match self {
            Self::Long | Self::Double => MoveType::Wide,
            _ => MoveType::Single,
        }
    }
}

/// Type of a constant literal. The `*Or*` variants are used when the
/// bytecode does not tell which of the two interpretations is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstType {
    Int,
    Long,
    Float,
    Double,
    Object,
    IntOrFloat,
    LongOrDouble,
}

impl ConstType {
    pub fn move_type(self) -> MoveType {
        match self {
            Self::Long | Self::Double | Self::LongOrDouble => MoveType::Wide,
            Self::Object => MoveType::Object,
            Self::Int | Self::Float | Self::IntOrFloat => MoveType::Single,
        }
    }
}

/// Width class of a field or array element access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    Object,
    Boolean,
    Byte,
    Char,
    Short,
    Single,
    Wide,
}

impl MemberType {
    pub fn move_type(self) -> MoveType {
        match self {
            Self::Object => MoveType::Object,
            Self::Wide => MoveType::Wide,
            _ => MoveType::Single,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinopKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnopKind {
    Neg,
    Not,
    /// Converts from the instruction type to the given type.
    Convert(NumericType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfCondition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeType {
    Direct,
    Interface,
    Static,
    Super,
    Virtual,
    Polymorphic,
}

impl InvokeType {
    pub fn has_receiver(self) -> bool {
        !matches!(self, Self::Static)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorKind {
    Enter,
    Exit,
}

/// Locals that end and start at a debug locals change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalsChange {
    pub ending: BTreeMap<u32, DebugLocal>,
    pub starting: BTreeMap<u32, DebugLocal>,
}

/// The operation performed by an instruction.
///
/// Jump targets are not stored in the instruction. They are taken from the
/// successor list of the containing block: a `Goto` continues at the last
/// successor, an `If` branches to the second to last successor and falls
/// through to the last one, and a `Switch` lists successor indices for its
/// keys and falls through to the last successor.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Argument,
    ConstNumber {
        ty: ConstType,
        value: i64,
    },
    ConstString(DexString),
    ConstClass(DexType),
    Binop {
        op: BinopKind,
        ty: NumericType,
    },
    Unop {
        op: UnopKind,
        ty: NumericType,
    },
    InstanceGet {
        field: DexField,
        ty: MemberType,
    },
    InstancePut {
        field: DexField,
        ty: MemberType,
    },
    StaticGet {
        field: DexField,
        ty: MemberType,
    },
    StaticPut {
        field: DexField,
        ty: MemberType,
    },
    ArrayGet(MemberType),
    ArrayPut(MemberType),
    ArrayLength,
    NewInstance(DexType),
    NewArrayEmpty(DexType),
    NewArrayFilledData {
        element_width: u16,
        size: u64,
    },
    CheckCast(DexType),
    InstanceOf(DexType),
    Invoke {
        ty: InvokeType,
        method: DexMethod,
    },
    Goto,
    If(IfCondition),
    Switch {
        keys: Box<[i32]>,
        /// Successor index for each key.
        targets: Box<[u32]>,
    },
    /// `None` for a void return.
    Return(Option<MoveType>),
    Throw,
    Monitor(MonitorKind),
    MoveException,
    DebugPosition {
        line: u32,
        file: Option<DexString>,
    },
    DebugLocalsChange(Box<LocalsChange>),
    DebugLocalRead,
}

impl InstKind {
    pub fn can_throw(&self) -> bool {
        match self {
            Self::Binop { op, ty } => {
                matches!(op, BinopKind::Div | BinopKind::Rem) && !ty.is_floating_point()
            }
            Self::ConstString(_)
            | Self::ConstClass(_)
            | Self::InstanceGet { .. }
            | Self::InstancePut { .. }
            | Self::StaticGet { .. }
            | Self::StaticPut { .. }
            | Self::ArrayGet(_)
            | Self::ArrayPut(_)
            | Self::ArrayLength
            | Self::NewInstance(_)
            | Self::NewArrayEmpty(_)
            | Self::CheckCast(_)
            | Self::InstanceOf(_)
            | Self::Invoke { .. }
            | Self::Throw
            | Self::Monitor(_) => true,
            // Filling an array allocated right before it never throws.
            Self::NewArrayFilledData { .. } => false,
            Self::Argument
            | Self::ConstNumber { .. }
            | Self::Unop { .. }
            | Self::Goto
            | Self::If(_)
            | Self::Switch { .. }
            | Self::Return(_)
            | Self::MoveException
            | Self::DebugPosition { .. }
            | Self::DebugLocalsChange(_)
            | Self::DebugLocalRead => false,
        }
    }

    /// Returns `true` if the instruction has an effect besides producing its
    /// output.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Self::Argument
                | Self::InstancePut { .. }
                | Self::StaticPut { .. }
                | Self::ArrayPut(_)
                | Self::NewArrayFilledData { .. }
                | Self::Invoke { .. }
                | Self::Monitor(_)
                | Self::MoveException
        ) || self.is_jump()
            || self.is_exit()
            || self.is_debug()
    }

    pub fn can_be_dead_code(&self) -> bool {
        !self.can_throw() && !self.has_side_effects()
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Goto | Self::If(_) | Self::Switch { .. })
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Return(_) | Self::Throw)
    }

    pub fn is_block_end(&self) -> bool {
        self.is_jump() || self.is_exit()
    }

    pub fn is_debug(&self) -> bool {
        matches!(
            self,
            Self::DebugPosition { .. } | Self::DebugLocalsChange(_) | Self::DebugLocalRead
        )
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Self::ConstNumber { .. } | Self::ConstString(_) | Self::ConstClass(_)
        )
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self, Self::Invoke { .. })
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument)
    }

    pub fn is_goto(&self) -> bool {
        matches!(self, Self::Goto)
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return(_))
    }

    pub fn is_throw(&self) -> bool {
        matches!(self, Self::Throw)
    }

    pub fn is_move_exception(&self) -> bool {
        matches!(self, Self::MoveException)
    }

    pub fn is_zero_const(&self) -> bool {
        matches!(self, Self::ConstNumber { value: 0, .. })
    }

    pub fn as_text(&self) -> &'static str {
        match self {
            Self::Argument => "argument",
            Self::ConstNumber { .. } => "const",
            Self::ConstString(_) => "const-string",
            Self::ConstClass(_) => "const-class",
            Self::Binop { op, .. } => match op {
                BinopKind::Add => "add",
                BinopKind::Sub => "sub",
                BinopKind::Mul => "mul",
                BinopKind::Div => "div",
                BinopKind::Rem => "rem",
                BinopKind::And => "and",
                BinopKind::Or => "or",
                BinopKind::Xor => "xor",
                BinopKind::Shl => "shl",
                BinopKind::Shr => "shr",
                BinopKind::Ushr => "ushr",
            },
            Self::Unop { op, .. } => match op {
                UnopKind::Neg => "neg",
                UnopKind::Not => "not",
                UnopKind::Convert(_) => "convert",
            },
            Self::InstanceGet { .. } => "iget",
            Self::InstancePut { .. } => "iput",
            Self::StaticGet { .. } => "sget",
            Self::StaticPut { .. } => "sput",
            Self::ArrayGet(_) => "aget",
            Self::ArrayPut(_) => "aput",
            Self::ArrayLength => "array-length",
            Self::NewInstance(_) => "new-instance",
            Self::NewArrayEmpty(_) => "new-array",
            Self::NewArrayFilledData { .. } => "fill-array-data",
            Self::CheckCast(_) => "check-cast",
            Self::InstanceOf(_) => "instance-of",
            Self::Invoke { ty, .. } => match ty {
                InvokeType::Direct => "invoke-direct",
                InvokeType::Interface => "invoke-interface",
                InvokeType::Static => "invoke-static",
                InvokeType::Super => "invoke-super",
                InvokeType::Virtual => "invoke-virtual",
                InvokeType::Polymorphic => "invoke-polymorphic",
            },
            Self::Goto => "goto",
            Self::If(cond) => match cond {
                IfCondition::Eq => "if-eq",
                IfCondition::Ne => "if-ne",
                IfCondition::Lt => "if-lt",
                IfCondition::Ge => "if-ge",
                IfCondition::Gt => "if-gt",
                IfCondition::Le => "if-le",
            },
            Self::Switch { .. } => "switch",
            Self::Return(_) => "return",
            Self::Throw => "throw",
            Self::Monitor(MonitorKind::Enter) => "monitor-enter",
            Self::Monitor(MonitorKind::Exit) => "monitor-exit",
            Self::MoveException => "move-exception",
            Self::DebugPosition { .. } => "position",
            Self::DebugLocalsChange(_) => "locals-change",
            Self::DebugLocalRead => "local-read",
        }
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

/// An instruction: its kind, inputs, optional output and pinned debug values.
#[derive(Debug, Clone)]
pub struct InstData {
    pub kind: InstKind,
    pub(crate) args: SmallVec<[ValueId; 3]>,
    pub(crate) result: PackedOption<ValueId>,
    pub(crate) debug_values: BTreeSet<ValueId>,
    /// Linear number assigned by `IrCode::number_instructions`, `-1` before.
    pub number: i32,
}

impl InstData {
    pub fn new(kind: InstKind, args: &[ValueId]) -> Self {
        Self {
            kind,
            args: args.into(),
            result: PackedOption::default(),
            debug_values: BTreeSet::new(),
            number: -1,
        }
    }

    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn arg(&self, idx: usize) -> ValueId {
        self.args[idx]
    }

    pub fn result(&self) -> Option<ValueId> {
        self.result.expand()
    }

    pub fn debug_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.debug_values.iter().copied()
    }

    pub fn can_throw(&self) -> bool {
        self.kind.can_throw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throwing_kinds() {
        let div = InstKind::Binop {
            op: BinopKind::Div,
            ty: NumericType::Int,
        };
        let fdiv = InstKind::Binop {
            op: BinopKind::Div,
            ty: NumericType::Double,
        };
        assert!(div.can_throw());
        assert!(!fdiv.can_throw());
        assert!(fdiv.can_be_dead_code());
        assert!(!InstKind::NewArrayFilledData {
            element_width: 4,
            size: 2
        }
        .can_throw());
        assert!(!InstKind::Argument.can_be_dead_code());
        assert!(!InstKind::DebugLocalRead.can_be_dead_code());
        assert!(InstKind::ConstNumber {
            ty: ConstType::Int,
            value: 3
        }
        .can_be_dead_code());
    }

    #[test]
    fn block_end_kinds() {
        assert!(InstKind::Goto.is_jump());
        assert!(InstKind::Throw.is_exit() && InstKind::Throw.can_throw());
        assert!(InstKind::Return(None).is_block_end());
        assert!(!InstKind::MoveException.is_block_end());
    }
}
