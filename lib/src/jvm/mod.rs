//! JVM types, names, and method code
//!
//! The pieces here model just enough of the JVM to verify a method body:
//!
//!   - [names](BinaryName) and [descriptors](MethodDescriptor) for the types that flow through
//!     the verifier
//!   - a [class graph](class_graph::ClassGraph) answering subtyping queries
//!   - the [instruction model](code) along with a decoder for raw code arrays
//!   - the [verifier] itself
//!
//! Loading whole class files is not something this crate does: callers hand over one method's
//! code (decoded or raw, with a constant pool resolver) at a time.

mod access_flags;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
