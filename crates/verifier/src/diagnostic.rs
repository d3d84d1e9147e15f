use std::fmt;

use dexopt_ir::{BlockId, InstId, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    InvalidValueRef,
    InvalidBlockRef,
    InvalidInstRef,
    InstBlockMismatch,
    MissingEntryBlock,
    DuplicateBlockNumber,
    EmptyBlock,
    MissingBlockEnd,
    BlockEndNotLast,
    BranchToNonInsertedBlock,
    EdgeMismatch,
    EntryHasPredecessors,
    UnreachableBlock,
    SuccessorCountMismatch,
    DuplicateSuccessor,
    CatchTargetOutOfRange,
    CatchSuccessorsNotFirst,
    CatchAllNotLast,
    MultipleThrowingInsts,
    NormalExitWithoutReturn,
    PhiNotListed,
    PhiArgCountMismatchPreds,
    UsersSetMismatch,
    PhiUsersMismatch,
    DebugUsersMismatch,
    UndefinedValueUsed,
}

impl DiagnosticCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::InvalidValueRef => 1,
            Self::InvalidBlockRef => 2,
            Self::InvalidInstRef => 5,
            Self::InstBlockMismatch => 102,
            Self::MissingEntryBlock => 105,
            Self::DuplicateBlockNumber => 106,
            Self::EmptyBlock => 200,
            Self::MissingBlockEnd => 201,
            Self::BlockEndNotLast => 202,
            Self::BranchToNonInsertedBlock => 301,
            Self::EdgeMismatch => 302,
            Self::EntryHasPredecessors => 303,
            Self::UnreachableBlock => 304,
            Self::SuccessorCountMismatch => 305,
            Self::DuplicateSuccessor => 306,
            Self::CatchTargetOutOfRange => 350,
            Self::CatchSuccessorsNotFirst => 351,
            Self::CatchAllNotLast => 352,
            Self::MultipleThrowingInsts => 353,
            Self::NormalExitWithoutReturn => 360,
            Self::PhiNotListed => 400,
            Self::PhiArgCountMismatchPreds => 402,
            Self::UsersSetMismatch => 700,
            Self::PhiUsersMismatch => 701,
            Self::DebugUsersMismatch => 702,
            Self::UndefinedValueUsed => 703,
        }
    }

    pub fn as_str(self) -> String {
        format!("IR{:04}", self.as_u16())
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => "error".fmt(f),
            Self::Warning => "warning".fmt(f),
        }
    }
}

/// Where a diagnostic points. Blocks are shown by their printable number
/// when it is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Code,
    Block { block: BlockId, number: Option<u32> },
    Inst { block: Option<BlockId>, inst: InstId },
    Value { value: ValueId, number: Option<u32> },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => "code".fmt(f),
            Self::Block {
                number: Some(number),
                ..
            } => write!(f, "block{number}"),
            Self::Block { block, .. } => write!(f, "{block:?}"),
            Self::Inst {
                block: Some(block),
                inst,
            } => write!(f, "{block:?}:{inst:?}"),
            Self::Inst { inst, .. } => write!(f, "{inst:?}"),
            Self::Value {
                number: Some(number),
                ..
            } => write!(f, "v{number}"),
            Self::Value { value, .. } => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub primary: Location,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn new(
        code: DiagnosticCode,
        severity: Severity,
        message: impl Into<String>,
        primary: Location,
    ) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            primary,
            notes: Vec::new(),
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>, primary: Location) -> Self {
        Self::new(code, Severity::Error, message, primary)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>, primary: Location) -> Self {
        Self::new(code, Severity::Warning, message, primary)
    }

    pub fn with_note(mut self, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            message: message.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} [{}] {} @ {}",
            self.severity, self.code, self.message, self.primary
        )?;
        for note in &self.notes {
            writeln!(f, "  note: {}", note.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_format() {
        assert_eq!(DiagnosticCode::EdgeMismatch.as_str(), "IR0302");
        assert_eq!(DiagnosticCode::InvalidValueRef.to_string(), "IR0001");
    }

    #[test]
    fn display_with_notes() {
        let diag = Diagnostic::error(
            DiagnosticCode::PhiArgCountMismatchPreds,
            "phi operand count does not match predecessor count",
            Location::Value {
                value: ValueId(3),
                number: Some(7),
            },
        )
        .with_note("expected 2, found 1");
        assert_eq!(
            diag.to_string(),
            "error [IR0402] phi operand count does not match predecessor count @ v7\n  note: expected 2, found 1\n"
        );
    }
}
