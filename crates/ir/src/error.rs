use thiserror::Error;

/// Errors raised for malformed or unsupported input.
///
/// These abort the processing of the current class or method. Broken
/// internal invariants are never reported through this type; they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("Class {0} cannot extend itself")]
    ClassExtendsItself(String),

    #[error("Interface {0} cannot implement itself")]
    InterfaceImplementsItself(String),

    #[error("Class descriptor '{0}' cannot be represented in dex format.")]
    InvalidClassDescriptor(String),

    #[error(
        "Undefined value encountered during compilation. This is typically caused by invalid \
         dex input that uses a register that is not defined on all control-flow paths leading \
         to the use."
    )]
    UndefinedValue,

    #[error("Invalid use of register {0}")]
    InvalidRegister(u32),

    #[error("Malformed debug info: {0}")]
    MalformedDebugInfo(String),

    #[error(
        "Duplicate default methods named {method} are inherited from the types {first} and {second}"
    )]
    DuplicateDefaultMethods {
        method: String,
        first: String,
        second: String,
    },
}

pub type CompilationResult<T> = Result<T, CompilationError>;
