use super::{CodeInstruction, InsnIndex};
use crate::jvm::BinaryName;

/// Body of one method, ready to be verified
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCode {
    /// Instructions, in order (jump targets are indices into this vector)
    pub instructions: Vec<CodeInstruction>,

    /// Maximum height of the operand stack (in slots)
    pub max_stack: u16,

    /// Number of local variable slots
    pub max_locals: u16,

    /// Exception table, in order of priority
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodCode {
    /// Code without exception handlers
    pub fn new(instructions: Vec<CodeInstruction>, max_stack: u16, max_locals: u16) -> MethodCode {
        MethodCode {
            instructions,
            max_stack,
            max_locals,
            exception_handlers: vec![],
        }
    }

    /// Add an exception handler (with lower priority than those already added)
    pub fn with_handler(mut self, handler: ExceptionHandler) -> MethodCode {
        self.exception_handlers.push(handler);
        self
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Entry in the exception table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// First covered instruction
    pub start: InsnIndex,

    /// First instruction after the covered range
    pub end: InsnIndex,

    /// Entry point of the handler
    pub handler: InsnIndex,

    /// Type of exception caught (`None` catches everything, as for `finally`)
    pub catch_type: Option<BinaryName>,
}

impl ExceptionHandler {
    /// Does this handler cover the instruction?
    pub fn covers(&self, index: InsnIndex) -> bool {
        self.start <= index && index < self.end
    }
}
