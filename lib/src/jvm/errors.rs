use super::verifier::{BlockId, VerifierType};
use super::{BinaryName, FieldType, RefType, RenderDescriptor};
use crate::jvm::code::InsnIndex;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The code of a method is malformed in a way that makes dataflow analysis meaningless
///
/// These are detected either while decoding a raw code array, or while building the control flow
/// graph (before any types are inferred).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// There are no instructions at all
    EmptyCode,

    /// Code array ends in the middle of an instruction
    TruncatedCode { offset: u32 },

    /// Opcode is not a JVM opcode
    UnknownOpcode { offset: u32, opcode: u8 },

    /// Opcode cannot follow `wide`
    InvalidWideOpcode { offset: u32, opcode: u8 },

    /// Operand of `newarray` is not a primitive array type code
    InvalidArrayType { offset: u32, atype: u8 },

    /// `tableswitch` with `high < low`, or `lookupswitch` with a negative number of pairs
    MalformedSwitch { offset: u32 },

    /// Byte offset (of a jump, an exception range, etc.) that isn't the start of an instruction
    InvalidOffset { offset: u32, target: i64 },

    /// `invokeinterface` operands disagree with the method descriptor
    InvalidInterfaceCall { offset: u32, count: u8, expected: usize },

    /// Exception table entry refers to a byte offset that isn't an instruction boundary
    InvalidExceptionOffset { entry: usize, pc: u16 },

    /// Constant pool entry is missing or is not of the expected kind
    MissingConstant {
        offset: u32,
        index: u16,
        expected: &'static str,
    },

    /// Jump or switch target outside of the method
    InvalidJumpTarget { index: InsnIndex, target: InsnIndex },

    /// Exception range must be non-empty and inside the method
    InvalidExceptionRange {
        entry: usize,
        start: InsnIndex,
        end: InsnIndex,
    },

    /// Exception handler entry outside of the method
    InvalidHandlerTarget { entry: usize, handler: InsnIndex },

    /// Local variable (or the second half of a `long`/`double` local) is beyond `max_locals`
    LocalOutOfRange {
        index: InsnIndex,
        local: u16,
        max_locals: u16,
    },

    /// `this` and the parameters do not fit in the local variables
    ArgumentsExceedLocals { required: usize, max_locals: u16 },

    /// Last instruction can fall through past the end of the code
    FallsOffEnd { index: InsnIndex },

    /// `jsr`/`ret` subroutines are not supported
    Subroutine { index: InsnIndex },
}

impl StructuralError {
    /// Instruction at which the error was detected, if there is one
    pub fn instruction(&self) -> Option<InsnIndex> {
        match self {
            StructuralError::InvalidJumpTarget { index, .. }
            | StructuralError::LocalOutOfRange { index, .. }
            | StructuralError::FallsOffEnd { index }
            | StructuralError::Subroutine { index } => Some(*index),
            StructuralError::InvalidExceptionRange { start, .. } => Some(*start),
            _ => None,
        }
    }
}

impl Display for StructuralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StructuralError::EmptyCode => write!(f, "Method has no instructions"),
            StructuralError::TruncatedCode { offset } => {
                write!(f, "Code ends in the middle of the instruction at offset {}", offset)
            }
            StructuralError::UnknownOpcode { offset, opcode } => {
                write!(f, "Unknown opcode 0x{:02x} at offset {}", opcode, offset)
            }
            StructuralError::InvalidWideOpcode { offset, opcode } => {
                write!(f, "Opcode 0x{:02x} at offset {} cannot be widened", opcode, offset)
            }
            StructuralError::InvalidArrayType { offset, atype } => {
                write!(f, "Invalid `newarray` type {} at offset {}", atype, offset)
            }
            StructuralError::MalformedSwitch { offset } => {
                write!(f, "Malformed switch at offset {}", offset)
            }
            StructuralError::InvalidOffset { offset, target } => write!(
                f,
                "Offset {} (referenced at offset {}) is not the start of an instruction",
                target, offset
            ),
            StructuralError::InvalidInterfaceCall {
                offset,
                count,
                expected,
            } => write!(
                f,
                "`invokeinterface` at offset {} has count {} but its arguments need {}",
                offset, count, expected
            ),
            StructuralError::InvalidExceptionOffset { entry, pc } => write!(
                f,
                "Exception handler #{} refers to offset {}, which is not the start of an instruction",
                entry, pc
            ),
            StructuralError::MissingConstant {
                offset,
                index,
                expected,
            } => write!(
                f,
                "Constant #{} (referenced at offset {}) is not a {}",
                index, offset, expected
            ),
            StructuralError::InvalidJumpTarget { index, target } => write!(
                f,
                "Instruction {} jumps to nonexistent instruction {}",
                index, target
            ),
            StructuralError::InvalidExceptionRange { entry, start, end } => write!(
                f,
                "Exception handler #{} has an invalid range [{}, {})",
                entry, start, end
            ),
            StructuralError::InvalidHandlerTarget { entry, handler } => write!(
                f,
                "Exception handler #{} starts at nonexistent instruction {}",
                entry, handler
            ),
            StructuralError::LocalOutOfRange {
                index,
                local,
                max_locals,
            } => write!(
                f,
                "Instruction {} uses local {} but max locals is {}",
                index, local, max_locals
            ),
            StructuralError::ArgumentsExceedLocals {
                required,
                max_locals,
            } => write!(
                f,
                "Arguments need {} locals but max locals is {}",
                required, max_locals
            ),
            StructuralError::FallsOffEnd { index } => {
                write!(f, "Execution falls off the end of the code after instruction {}", index)
            }
            StructuralError::Subroutine { index } => {
                write!(f, "Instruction {} is a subroutine (`jsr`/`ret`)", index)
            }
        }
    }
}

impl std::error::Error for StructuralError {}

/// Type error found while interpreting one instruction (or merging into one)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    EmptyStack,
    StackOverflow {
        max_stack: u16,
    },
    InvalidWidth(usize),
    NotArrayType(VerifierType),
    NotReferenceType(VerifierType),
    NotThrowable(VerifierType),
    UnsetLocal(u16),
    IncompatibleTypes {
        found: VerifierType,
        expected: VerifierType,
    },

    /// Stack values from different paths have no common type
    IncompatibleMerge {
        slot: usize,
        left: VerifierType,
        right: VerifierType,
    },

    /// Stacks from different paths have a different number of values
    MismatchedStackHeights {
        left: usize,
        right: usize,
    },

    /// `<init>` called on something that is not uninitialized, or for the wrong class
    WrongConstructor {
        owner: RefType<BinaryName>,
        found: VerifierType,
    },

    /// A `new` is executed again while its previous result is still uninitialized
    StaleUninitialized(InsnIndex),

    /// `new` of an array type
    NotClassType(RefType<BinaryName>),

    /// `multianewarray` with zero dimensions or more dimensions than the type has
    InvalidDimensions(u8),

    /// `invokeinterface` of a class method, or `invokevirtual` of an interface method
    InterfaceMismatch,

    ReturnTypeMismatch {
        expected: Option<FieldType<BinaryName>>,
    },

    /// Constructor returns before calling a super or this constructor
    ReturnBeforeSuperInit,
}

impl Display for VerifierErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VerifierErrorKind::EmptyStack => write!(f, "Cannot pop from an empty stack"),
            VerifierErrorKind::StackOverflow { max_stack } => {
                write!(f, "Stack exceeds max stack of {}", max_stack)
            }
            VerifierErrorKind::InvalidWidth(width) => {
                write!(f, "Unexpected value of width {}", width)
            }
            VerifierErrorKind::NotArrayType(found) => write!(f, "Expected an array but found {}", found),
            VerifierErrorKind::NotReferenceType(found) => {
                write!(f, "Expected a reference but found {}", found)
            }
            VerifierErrorKind::NotThrowable(found) => {
                write!(f, "Expected a throwable but found {}", found)
            }
            VerifierErrorKind::UnsetLocal(local) => write!(f, "Local {} is not set", local),
            VerifierErrorKind::IncompatibleTypes { found, expected } => {
                write!(f, "Expected {} but found {}", expected, found)
            }
            VerifierErrorKind::IncompatibleMerge { slot, left, right } => write!(
                f,
                "Cannot merge {} with {} in stack slot {}",
                left, right, slot
            ),
            VerifierErrorKind::MismatchedStackHeights { left, right } => write!(
                f,
                "Cannot merge stacks of different heights ({} and {})",
                left, right
            ),
            VerifierErrorKind::WrongConstructor { owner, found } => write!(
                f,
                "Cannot call {}.<init> on {}",
                owner.render(),
                found
            ),
            VerifierErrorKind::StaleUninitialized(origin) => write!(
                f,
                "Value created by `new` at {} is still uninitialized",
                origin
            ),
            VerifierErrorKind::NotClassType(ref_type) => {
                write!(f, "Cannot use `new` on {}", ref_type.render())
            }
            VerifierErrorKind::InvalidDimensions(dimensions) => {
                write!(f, "Invalid number of array dimensions {}", dimensions)
            }
            VerifierErrorKind::InterfaceMismatch => {
                write!(f, "Invoke instruction does not match interface-ness of the method")
            }
            VerifierErrorKind::ReturnTypeMismatch { expected: None } => {
                write!(f, "Method returns void")
            }
            VerifierErrorKind::ReturnTypeMismatch {
                expected: Some(expected),
            } => write!(f, "Method returns {}", expected.render()),
            VerifierErrorKind::ReturnBeforeSuperInit => {
                write!(f, "Constructor returns before `this` is initialized")
            }
        }
    }
}

impl std::error::Error for VerifierErrorKind {}

/// Invariant of the analysis itself was violated
///
/// These indicate a bug in the verifier (or in a custom interpreter) rather than in the code being
/// verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalFault {
    /// A block was in the worklist without a frame
    UnvisitedBlockQueued(BlockId),

    /// The fixed point was not reached within the iteration ceiling
    IterationLimit { limit: usize },

    /// Local variable index beyond the frame (should have been caught structurally)
    LocalOutOfRange { local: usize, max_locals: usize },

    /// A block has no instructions
    EmptyBlock(BlockId),

    /// `jsr`/`ret` reached the interpreter (these should have been rejected structurally)
    UnexpectedSubroutine,
}

impl InternalFault {
    /// Short name of the fault
    pub fn name(&self) -> &'static str {
        match self {
            InternalFault::UnvisitedBlockQueued(_) => "UnvisitedBlockQueued",
            InternalFault::IterationLimit { .. } => "IterationLimit",
            InternalFault::LocalOutOfRange { .. } => "LocalOutOfRange",
            InternalFault::EmptyBlock(_) => "EmptyBlock",
            InternalFault::UnexpectedSubroutine => "UnexpectedSubroutine",
        }
    }
}

impl Display for InternalFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            InternalFault::UnvisitedBlockQueued(block) => {
                write!(f, "Block {:?} was queued without a frame", block)
            }
            InternalFault::IterationLimit { limit } => {
                write!(f, "No fixed point after {} iterations", limit)
            }
            InternalFault::LocalOutOfRange { local, max_locals } => write!(
                f,
                "Local {} is outside of the {} locals of the frame",
                local, max_locals
            ),
            InternalFault::EmptyBlock(block) => write!(f, "Block {:?} is empty", block),
            InternalFault::UnexpectedSubroutine => write!(f, "Cannot interpret a subroutine"),
        }
    }
}

impl std::error::Error for InternalFault {}

/// Failure of one analysis run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    Structural(StructuralError),
    Type {
        index: InsnIndex,
        kind: VerifierErrorKind,
    },
    Internal {
        index: Option<InsnIndex>,
        fault: InternalFault,
    },
}

impl AnalysisError {
    /// Instruction the error is attributed to
    pub fn instruction(&self) -> Option<InsnIndex> {
        match self {
            AnalysisError::Structural(err) => err.instruction(),
            AnalysisError::Type { index, .. } => Some(*index),
            AnalysisError::Internal { index, .. } => *index,
        }
    }
}

impl From<StructuralError> for AnalysisError {
    fn from(err: StructuralError) -> AnalysisError {
        AnalysisError::Structural(err)
    }
}

impl Display for AnalysisError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AnalysisError::Structural(err) => err.fmt(f),
            AnalysisError::Type { index, kind } => write!(f, "Instruction {}: {}", index, kind),
            AnalysisError::Internal {
                index: Some(index),
                fault,
            } => write!(f, "Instruction {}: {}", index, fault),
            AnalysisError::Internal { index: None, fault } => fault.fmt(f),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Structural(err) => Some(err),
            AnalysisError::Type { kind, .. } => Some(kind),
            AnalysisError::Internal { fault, .. } => Some(fault),
        }
    }
}

/// Broad category of a verification failure
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Structural,
    Type,
    Internal,
}

/// User facing verification failure, positioned at an instruction (and source line if known)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    pub instruction: Option<InsnIndex>,
    pub line: Option<u32>,
    pub kind: FailureKind,
    pub message: String,
    pub cause: AnalysisError,
}

impl VerificationFailure {
    /// Position and render an analysis error
    ///
    /// Internal faults render as `Verifier crashed: (Fault) detail`, everything else renders as
    /// `Verification failed on line: N` followed by the detail on the next line.
    pub fn new(cause: AnalysisError, line: Option<u32>) -> VerificationFailure {
        let instruction = cause.instruction();
        let (kind, message) = match &cause {
            AnalysisError::Internal { fault, .. } => (
                FailureKind::Internal,
                format!("Verifier crashed: ({}) {}", fault.name(), fault),
            ),
            AnalysisError::Structural(err) => (
                FailureKind::Structural,
                Self::positioned_message(instruction, line, err),
            ),
            AnalysisError::Type { kind, .. } => (
                FailureKind::Type,
                Self::positioned_message(instruction, line, kind),
            ),
        };
        VerificationFailure {
            instruction,
            line,
            kind,
            message,
            cause,
        }
    }

    fn positioned_message(
        instruction: Option<InsnIndex>,
        line: Option<u32>,
        detail: &dyn Display,
    ) -> String {
        match (line, instruction) {
            (Some(line), _) => format!("Verification failed on line: {}\n{}", line, detail),
            (None, Some(index)) => {
                format!("Verification failed at instruction: {}\n{}", index, detail)
            }
            (None, None) => format!("Verification failed\n{}", detail),
        }
    }
}

impl Display for VerificationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.message)
    }
}

impl std::error::Error for VerificationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
