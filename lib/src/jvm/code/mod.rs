//! Bytecode representation and decoding
//!
//! ### Structure
//!
//! The bytecode of a method is the most interesting part of the class file for verification - it
//! contains the actual executable instructions, executed on an operand stack and an array of
//! local variables. We split up the [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions (the body of basic blocks)
//!   - [`BranchInstruction`] for instructions that may branch (the end of basic blocks)
//!
//! A [`MethodCode`] is then just an ordered sequence of [`CodeInstruction`]s, along with the
//! limits on the stack and locals, and an exception table. Jumps and exception ranges refer to
//! instructions by their position in that sequence.
//!
//! ### Decoding
//!
//! Code coming straight out of a class file is a byte array whose constant pool operands still
//! need resolving. [`decode_code`] turns those bytes into instructions (resolving operands
//! through a [`ConstantPool`]), and keeps track of the byte offset of each instruction so that
//! the exception table and the line number table can be translated too.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod constants;
mod decode;
mod instructions;
mod lines;
mod method;

pub use constants::*;
pub use decode::*;
pub use instructions::*;
pub use lines::*;
pub use method::*;
