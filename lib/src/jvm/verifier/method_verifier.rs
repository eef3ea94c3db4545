use super::*;
use crate::jvm::class_graph::TypeHierarchy;
use crate::jvm::code::{
    decode_code, ConstantPool, InsnIndex, LineLookup, LineNumbers, MethodCode, RawExceptionHandler,
};
use crate::jvm::{
    AnalysisError, BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName,
    VerificationFailure,
};
use std::ops::Range;

/// The method being verified, in the context of its declaring class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodContext {
    /// Declaring class
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,
}

impl MethodContext {
    pub fn new(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor<BinaryName>,
        access_flags: MethodAccessFlags,
    ) -> MethodContext {
        MethodContext {
            class,
            name,
            descriptor,
            access_flags,
        }
    }

    /// Is this an instance initialization method?
    pub fn is_constructor(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

/// Result of successfully verifying a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMethod {
    /// Frame before each instruction (`None` for dead code)
    pub frames: Vec<Option<VerifierFrame>>,

    /// Frame after each instruction (`None` for dead code)
    pub frames_after: Vec<Option<VerifierFrame>>,

    /// Instruction ranges that can never execute
    pub dead_code: Vec<Range<InsnIndex>>,
}

impl VerifiedMethod {
    /// Frame before an instruction
    pub fn frame(&self, index: InsnIndex) -> Option<&VerifierFrame> {
        self.frames.get(index)?.as_ref()
    }

    /// Frame after an instruction
    pub fn frame_after(&self, index: InsnIndex) -> Option<&VerifierFrame> {
        self.frames_after.get(index)?.as_ref()
    }

    /// Stack height (in slots) before each instruction
    pub fn stack_depths(&self) -> Vec<Option<usize>> {
        self.frames
            .iter()
            .map(|frame| frame.as_ref().map(VerifierFrame::stack_depth))
            .collect()
    }

    /// Highest stack (in slots) reached anywhere in the method
    pub fn max_stack_depth(&self) -> usize {
        self.frames
            .iter()
            .chain(self.frames_after.iter())
            .flatten()
            .map(VerifierFrame::stack_depth)
            .max()
            .unwrap_or(0)
    }

    pub fn is_dead(&self, index: InsnIndex) -> bool {
        self.dead_code.iter().any(|range| range.contains(&index))
    }
}

/// Method code straight out of a `Code` attribute
#[derive(Debug, Clone, Copy)]
pub struct RawMethodCode<'b> {
    pub code: &'b [u8],
    pub max_stack: u16,
    pub max_locals: u16,
    pub exception_table: &'b [RawExceptionHandler],

    /// `LineNumberTable` entries as `(start_pc, line_number)`
    pub line_numbers: &'b [(u16, u16)],
}

/// Verifies methods against a type hierarchy
///
/// A verifier holds no state between calls, so one verifier can be shared by many threads
/// verifying different methods (as long as the hierarchy is `Sync`).
pub struct MethodVerifier<'a, H: ?Sized> {
    hierarchy: &'a H,
    settings: Settings,
}

impl<'a, H: TypeHierarchy + ?Sized> MethodVerifier<'a, H> {
    pub fn new(hierarchy: &'a H) -> Self {
        MethodVerifier {
            hierarchy,
            settings: Settings::new(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Verify the code of a method
    ///
    /// On failure, `lines` is used to find the source line of the offending instruction.
    pub fn verify<L: LineLookup + ?Sized>(
        &self,
        method: &MethodContext,
        code: &MethodCode,
        lines: &L,
    ) -> Result<VerifiedMethod, VerificationFailure> {
        let interpreter = TypeInterpreter::new(self.hierarchy, method, code.max_stack);
        self.verify_with(&interpreter, method, code, lines)
    }

    /// Verify the code of a method using a custom interpreter
    pub fn verify_with<I: Interpreter + ?Sized, L: LineLookup + ?Sized>(
        &self,
        interpreter: &I,
        method: &MethodContext,
        code: &MethodCode,
        lines: &L,
    ) -> Result<VerifiedMethod, VerificationFailure> {
        self.analyze(interpreter, method, code).map_err(|cause| {
            let line = cause.instruction().and_then(|index| lines.line_of(index));
            let failure = VerificationFailure::new(cause, line);
            log::debug!(
                "Failed to verify {}.{}: {}",
                method.class,
                method.name,
                failure
            );
            failure
        })
    }

    /// Decode and verify a raw code array
    ///
    /// Operands are resolved through the constant pool, and the exception table and line number
    /// table are translated from byte offsets to instruction indices first.
    pub fn verify_bytecode<C: ConstantPool + ?Sized>(
        &self,
        method: &MethodContext,
        raw: RawMethodCode<'_>,
        constants: &C,
    ) -> Result<VerifiedMethod, VerificationFailure> {
        let decoded = decode_code(raw.code, constants)
            .map_err(|err| VerificationFailure::new(AnalysisError::Structural(err), None))?;
        let lines = LineNumbers::from_byte_offsets(raw.line_numbers, &decoded);
        let code = decoded
            .into_method_code(raw.max_stack, raw.max_locals, raw.exception_table, constants)
            .map_err(|err| VerificationFailure::new(AnalysisError::Structural(err), None))?;
        self.verify(method, &code, &lines)
    }

    fn analyze<I: Interpreter + ?Sized>(
        &self,
        interpreter: &I,
        method: &MethodContext,
        code: &MethodCode,
    ) -> Result<VerifiedMethod, AnalysisError> {
        let cfg = ControlFlowGraph::build(code)?;
        let entry_frame = VerifierFrame::entry(method, code.max_locals)?;
        let analysis =
            Analyzer::new(interpreter, self.hierarchy, &self.settings).run(&cfg, code, entry_frame)?;

        let dead_code = cfg.dead_code();
        if self.settings.log_dead_code {
            for range in &dead_code {
                log::warn!(
                    "Dead code in {}.{}: instructions {}..{}",
                    method.class,
                    method.name,
                    range.start,
                    range.end
                );
            }
        }

        Ok(VerifiedMethod {
            frames: analysis.frames,
            frames_after: analysis.frames_after,
            dead_code,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassGraph;
    use crate::jvm::code::BranchInstruction::*;
    use crate::jvm::code::CodeInstruction::{Branch, Regular};
    use crate::jvm::code::Instruction::*;
    use crate::jvm::code::{ConstantEntry, ConstantTable, MethodRef};
    use crate::jvm::{FailureKind, Name, ParseDescriptor, RefType, StructuralError};

    fn method(descriptor: &str, access_flags: MethodAccessFlags) -> MethodContext {
        MethodContext::new(
            BinaryName::from_str("Test").unwrap(),
            UnqualifiedName::from_str("test").unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            access_flags,
        )
    }

    #[test]
    fn failures_are_positioned() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();
        let verifier = MethodVerifier::new(&class_graph);

        let method = method("()I", MethodAccessFlags::STATIC);
        let code = MethodCode::new(vec![Regular(FConst0), Branch(IReturn)], 1, 0);
        let lines = |index: InsnIndex| Some(40 + index as u32);
        let failure = verifier.verify(&method, &code, &lines).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Type);
        assert_eq!(failure.instruction, Some(1));
        assert_eq!(failure.line, Some(41));
        assert!(failure
            .message
            .starts_with("Verification failed on line: 41\n"));

        // Without a line, the instruction is used
        let failure = verifier
            .verify(&method, &code, &LineNumbers::default())
            .unwrap_err();
        assert!(failure
            .message
            .starts_with("Verification failed at instruction: 1\n"));
    }

    #[test]
    fn dead_code_is_reported() {
        let class_graph = ClassGraph::new();
        let settings = Settings {
            log_dead_code: false,
            ..Settings::new()
        };
        let verifier = MethodVerifier::new(&class_graph).with_settings(settings);

        let method = method("()V", MethodAccessFlags::STATIC);
        let code = MethodCode::new(vec![Branch(Return), Regular(Nop), Branch(Return)], 0, 0);
        let verified = verifier.verify(&method, &code, &LineNumbers::default()).unwrap();
        assert_eq!(verified.dead_code, vec![1..3]);
        assert_eq!(verified.stack_depths(), vec![Some(0), None, None]);
        assert!(verified.is_dead(2));
        assert!(!verified.is_dead(0));
    }

    #[test]
    fn raw_bytecode() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();
        let verifier = MethodVerifier::new(&class_graph);

        let mut constants = ConstantTable::new();
        constants.insert(
            1,
            ConstantEntry::Method(MethodRef {
                class: RefType::OBJECT,
                name: UnqualifiedName::INIT,
                descriptor: MethodDescriptor::parse("()V").unwrap(),
                is_interface: false,
            }),
        );

        // aload_0; invokespecial #1; return
        let constructor = MethodContext::new(
            BinaryName::from_str("Test").unwrap(),
            UnqualifiedName::INIT,
            MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        let raw = RawMethodCode {
            code: &[0x2a, 0xb7, 0x00, 0x01, 0xb1],
            max_stack: 1,
            max_locals: 1,
            exception_table: &[],
            line_numbers: &[(0, 3), (4, 4)],
        };
        let verified = verifier.verify_bytecode(&constructor, raw, &constants).unwrap();
        assert_eq!(verified.stack_depths(), vec![Some(0), Some(1), Some(0)]);
        assert_eq!(verified.max_stack_depth(), 1);

        // Dropping the constructor call leaves `this` uninitialized at line 4
        let raw = RawMethodCode {
            code: &[0xb1],
            line_numbers: &[(0, 4)],
            ..raw
        };
        let failure = verifier
            .verify_bytecode(&constructor, raw, &constants)
            .unwrap_err();
        assert_eq!(failure.line, Some(4));
        assert_eq!(
            failure.message,
            "Verification failed on line: 4\nConstructor returns before `this` is initialized"
        );

        // Undecodable code
        let raw = RawMethodCode {
            code: &[0xb7, 0x00, 0x02],
            ..raw
        };
        let failure = verifier
            .verify_bytecode(&constructor, raw, &constants)
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Structural);
        assert_eq!(
            failure.cause,
            AnalysisError::Structural(StructuralError::MissingConstant {
                offset: 0,
                index: 2,
                expected: "method reference"
            })
        );
    }
}
