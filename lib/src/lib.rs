//! Dataflow verification of JVM method bytecode
//!
//! Given the code of one method, compute the abstract operand stack and local variables at every
//! instruction, rejecting code that is not type-safe or not structurally sound. See
//! [`jvm::verifier`] for the engine itself and [`jvm::code`] for the instruction model and the
//! decoder for raw code arrays.
//!
//! ### Simple example
//!
//! ```
//! use jverify::jvm::class_graph::ClassGraph;
//! use jverify::jvm::code::{BranchInstruction::*, CodeInstruction, Instruction::*, LineNumbers, MethodCode};
//! use jverify::jvm::verifier::{MethodContext, MethodVerifier};
//! use jverify::jvm::*;
//!
//! let class_graph = ClassGraph::new();
//! class_graph.insert_java_library_types();
//!
//! // static int inc(int x) { return x + 1; }
//! let method = MethodContext::new(
//!     BinaryName::from_str("com/example/Counter").unwrap(),
//!     UnqualifiedName::from_str("inc").unwrap(),
//!     MethodDescriptor::parse("(I)I").unwrap(),
//!     MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
//! );
//! let code = MethodCode::new(
//!     vec![
//!         CodeInstruction::Regular(ILoad(0)),
//!         CodeInstruction::Regular(IConst1),
//!         CodeInstruction::Regular(IAdd),
//!         CodeInstruction::Branch(IReturn),
//!     ],
//!     2,
//!     1,
//! );
//!
//! let verifier = MethodVerifier::new(&class_graph);
//! let verified = verifier.verify(&method, &code, &LineNumbers::default()).unwrap();
//! assert_eq!(verified.stack_depths(), vec![Some(0), Some(1), Some(2), Some(1)]);
//! ```

pub mod jvm;
pub mod util;
