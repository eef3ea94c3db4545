//! Bytecode verification
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`VerifierFrame`]). The "types" used in verification (represented
//! using [`VerificationType`]) are slightly augmented to take into account initialization, null,
//! and failure.
//!
//! Knowing the frame at a point in the code makes it possible to verify that the next instruction
//! makes sense (eg. `dadd` only makes sense if the top two elements on the stack are of type
//! `double`). That part is the job of an [`Interpreter`]. Things get more complicated when an
//! instruction can be reached from multiple locations (eg. it is the target of jumps, or the entry
//! of an exception handler). In those cases, the frames from the different source locations need
//! to be unified. This ends up being a fix-point algorithm which converges towards the right
//! answer (if there is one):
//!
//!   1. [`ControlFlowGraph`] checks the structure of the code and splits it into basic blocks
//!   2. [`Analyzer`] runs the interpreter over the blocks until no block entry frame changes
//!   3. [`MethodVerifier`] ties it together and turns errors into positioned
//!      [`VerificationFailure`](crate::jvm::VerificationFailure)s
//!
//! Unlike the JVM's own [verification by type-checking][0], no `StackMapTable` is required: the
//! frames are inferred.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod analyzer;
mod cfg;
mod frame;
mod interpreter;
mod method_verifier;
mod settings;
mod types;

pub use analyzer::*;
pub use cfg::*;
pub use frame::*;
pub use interpreter::*;
pub use method_verifier::*;
pub use settings::*;
pub use types::*;
