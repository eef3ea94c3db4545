use jverify::jvm::class_graph::{ClassData, ClassGraph};
use jverify::jvm::code::BranchInstruction::*;
use jverify::jvm::code::CodeInstruction::{Branch, Regular};
use jverify::jvm::code::Instruction::*;
use jverify::jvm::code::{
    CodeInstruction, ConstantEntry, ConstantTable, ExceptionHandler, FieldRef, InsnIndex,
    Instruction, InvokeType, LineNumbers, MethodCode, MethodRef, OrdComparison, RawExceptionHandler,
};
use jverify::jvm::verifier::*;
use jverify::jvm::*;
use jverify::util::Width;

fn java_graph() -> ClassGraph {
    let class_graph = ClassGraph::new();
    class_graph.insert_java_library_types();
    class_graph
}

fn method(
    class: &str,
    name: &str,
    descriptor: &str,
    access_flags: MethodAccessFlags,
) -> MethodContext {
    MethodContext::new(
        BinaryName::from_str(class).unwrap(),
        UnqualifiedName::from_str(name).unwrap(),
        MethodDescriptor::parse(descriptor).unwrap(),
        access_flags,
    )
}

fn static_method(descriptor: &str) -> MethodContext {
    method(
        "com/example/Test",
        "test",
        descriptor,
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
    )
}

fn object_init() -> CodeInstruction {
    Regular(Invoke(
        InvokeType::Special,
        MethodRef {
            class: RefType::OBJECT,
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor::parse("()V").unwrap(),
            is_interface: false,
        },
    ))
}

fn stack_of(frame: &VerifierFrame) -> Vec<VerifierType> {
    frame.stack.iter().map(|(_, _, typ)| typ.clone()).collect()
}

#[test]
fn integer_addition() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // static int inc(int x) { return x + 1; }
    let method = static_method("(I)I");
    let code = MethodCode::new(
        vec![
            Regular(ILoad(0)),
            Regular(IConst1),
            Regular(IAdd),
            Branch(IReturn),
        ],
        2,
        1,
    );
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();

    assert_eq!(verified.frames.len(), code.len());
    assert_eq!(
        verified.stack_depths(),
        vec![Some(0), Some(1), Some(2), Some(1)]
    );
    assert_eq!(verified.frame_after(3).unwrap().stack_depth(), 0);
    assert_eq!(
        stack_of(verified.frame(2).unwrap()),
        vec![VerificationType::Integer, VerificationType::Integer]
    );
    assert!(verified.dead_code.is_empty());

    // Every frame respects the limits
    for frame in verified.frames.iter().flatten() {
        assert!(frame.stack_depth() <= code.max_stack as usize);
        assert_eq!(frame.locals.len(), code.max_locals as usize);
    }
}

#[test]
fn int_and_float_do_not_merge() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // return x == 0 ? 1 : 1.0f;
    let method = static_method("(I)I");
    let code = MethodCode::new(
        vec![
            Regular(ILoad(0)),
            Branch(If(OrdComparison::EQ, 4)),
            Regular(IConst1),
            Branch(Goto(5)),
            Regular(FConst1),
            Branch(IReturn),
        ],
        1,
        1,
    );
    let lines = LineNumbers::new(vec![(0, 10), (4, 11), (5, 12)]);
    let failure = verifier.verify(&method, &code, &lines).unwrap_err();

    assert_eq!(failure.kind, FailureKind::Type);
    assert_eq!(failure.instruction, Some(5));
    assert_eq!(failure.line, Some(12));
    assert_eq!(
        failure.message,
        "Verification failed on line: 12\nCannot merge I with F in stack slot 0"
    );
    assert!(matches!(
        failure.cause,
        AnalysisError::Type {
            index: 5,
            kind: VerifierErrorKind::IncompatibleMerge { .. }
        }
    ));
}

#[test]
fn new_dup_init() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // static Object make() { return new Object(); }
    let method = static_method("()Ljava/lang/Object;");
    let code = MethodCode::new(
        vec![
            Regular(New(RefType::OBJECT)),
            Regular(Dup),
            object_init(),
            Branch(AReturn),
        ],
        2,
        0,
    );
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();

    let uninitialized = VerificationType::Uninitialized(UninitializedRefType {
        verification_type: RefType::OBJECT,
        origin: 0,
    });
    assert_eq!(
        stack_of(verified.frame(2).unwrap()),
        vec![uninitialized.clone(), uninitialized]
    );
    assert_eq!(
        stack_of(verified.frame_after(2).unwrap()),
        vec![VerifierType::OBJECT]
    );
}

#[test]
fn constructor_with_fields() {
    let class_graph = java_graph();
    let point = BinaryName::from_str("com/example/Point").unwrap();
    class_graph.add_class(ClassData::new(
        point.clone(),
        BinaryName::OBJECT,
        ClassAccessFlags::PUBLIC,
    ));
    let verifier = MethodVerifier::new(&class_graph);

    // Point(int x) { this.x = x; super(); }
    let method = method(
        "com/example/Point",
        "<init>",
        "(I)V",
        MethodAccessFlags::PUBLIC,
    );
    let field = FieldRef {
        class: point.clone(),
        name: UnqualifiedName::from_str("x").unwrap(),
        descriptor: FieldType::int(),
    };
    let code = MethodCode::new(
        vec![
            Regular(ALoad(0)),
            Regular(ILoad(1)),
            Regular(PutField(field)),
            Regular(ALoad(0)),
            object_init(),
            Branch(Return),
        ],
        2,
        2,
    );
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();
    assert_eq!(
        verified.frame(0).unwrap().locals[0],
        VerificationType::UninitializedThis
    );
    assert_eq!(
        verified.frame(5).unwrap().locals[0],
        VerificationType::Object(RefType::Object(point))
    );

    // Skipping `super()` is caught at the return
    let mut skipped = code.clone();
    skipped.instructions.drain(3..5);
    let failure = verifier
        .verify(&method, &skipped, &LineNumbers::default())
        .unwrap_err();
    assert_eq!(
        failure.cause,
        AnalysisError::Type {
            index: 3,
            kind: VerifierErrorKind::ReturnBeforeSuperInit
        }
    );
}

#[test]
fn dead_code_stays_unvisited() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph).with_settings(Settings {
        log_dead_code: false,
        ..Settings::new()
    });

    let method = static_method("()I");
    let code = MethodCode::new(
        vec![
            Regular(IConst0),
            Branch(IReturn),
            Regular(IConst1),
            Regular(IConst2),
            Branch(IReturn),
        ],
        2,
        0,
    );
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();
    assert_eq!(verified.dead_code, vec![2..5]);
    assert_eq!(
        verified.stack_depths(),
        vec![Some(0), Some(1), None, None, None]
    );
}

#[test]
fn verification_is_deterministic() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // static int sum(int n) { int s = 0; while (n > 0) { s += n; n--; } return s; }
    let method = static_method("(I)I");
    let code = MethodCode::new(
        vec![
            Regular(IConst0),
            Regular(IStore(1)),
            Regular(ILoad(0)),
            Branch(If(OrdComparison::LE, 10)),
            Regular(ILoad(1)),
            Regular(ILoad(0)),
            Regular(IAdd),
            Regular(IStore(1)),
            Regular(IInc(0, -1)),
            Branch(Goto(2)),
            Regular(ILoad(1)),
            Branch(IReturn),
        ],
        2,
        2,
    );
    let first = verifier.verify(&method, &code, &LineNumbers::default());
    let second = verifier.verify(&method, &code, &LineNumbers::default());
    assert!(first.is_ok());
    assert_eq!(first, second);
}

#[test]
fn concurrent_verification() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);
    let method = static_method("(J)J");
    let code = MethodCode::new(
        vec![
            Regular(LLoad(0)),
            Regular(LLoad(0)),
            Regular(LMul),
            Branch(LReturn),
        ],
        4,
        2,
    );

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| verifier.verify(&method, &code, &LineNumbers::default())))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let expected = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();
    assert_eq!(expected.stack_depths(), vec![Some(0), Some(2), Some(4), Some(2)]);
    for result in results {
        assert_eq!(result.unwrap(), expected);
    }
}

#[test]
fn raw_bytecode_with_handler() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    let mut constants = ConstantTable::new();
    constants.insert(3, ConstantEntry::Class(RefType::Object(BinaryName::ARITHMETICEXCEPTION)));

    // static int div(int a, int b) {
    //     try { return a / b; } catch (ArithmeticException e) { return 0; }
    // }
    let bytes = [
        0x1a, // 0: iload_0
        0x1b, // 1: iload_1
        0x6c, // 2: idiv
        0xac, // 3: ireturn
        0x4c, // 4: astore_1
        0x03, // 5: iconst_0
        0xac, // 6: ireturn
    ];
    let handlers = [RawExceptionHandler {
        start_pc: 0,
        end_pc: 4,
        handler_pc: 4,
        catch_type: 3,
    }];
    let raw = RawMethodCode {
        code: &bytes,
        max_stack: 2,
        max_locals: 2,
        exception_table: &handlers,
        line_numbers: &[(0, 2), (4, 3)],
    };
    let verified = verifier
        .verify_bytecode(&static_method("(II)I"), raw, &constants)
        .unwrap();

    let handler_frame = verified.frame(4).unwrap();
    assert_eq!(
        stack_of(handler_frame),
        vec![VerificationType::Object(RefType::Object(
            BinaryName::ARITHMETICEXCEPTION
        ))]
    );
    assert_eq!(
        verified.frame_after(4).unwrap().locals[1],
        VerificationType::Object(RefType::Object(BinaryName::ARITHMETICEXCEPTION))
    );

    // Handler reading a local that was never set on the exceptional path
    let bytes = [
        0x1a, // 0: iload_0
        0x3d, // 1: istore_2
        0x1c, // 2: iload_2
        0xac, // 3: ireturn
        0x1c, // 4: iload_2
        0xac, // 5: ireturn
    ];
    let handlers = [RawExceptionHandler {
        start_pc: 0,
        end_pc: 1,
        handler_pc: 4,
        catch_type: 0,
    }];
    let raw = RawMethodCode {
        code: &bytes,
        max_stack: 1,
        max_locals: 3,
        exception_table: &handlers,
        line_numbers: &[(0, 20), (4, 21)],
    };
    let failure = verifier
        .verify_bytecode(&static_method("(II)I"), raw, &constants)
        .unwrap_err();
    assert_eq!(failure.line, Some(21));
    assert_eq!(
        failure.cause,
        AnalysisError::Type {
            index: 4,
            kind: VerifierErrorKind::UnsetLocal(2)
        }
    );
}

#[test]
fn structural_failures() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);
    let method = static_method("(I)V");

    let verify = |code: MethodCode| {
        verifier
            .verify(&method, &code, &LineNumbers::default())
            .unwrap_err()
    };

    let failure = verify(MethodCode::new(vec![Regular(IConst0), Regular(Pop)], 1, 1));
    assert_eq!(failure.kind, FailureKind::Structural);
    assert_eq!(failure.instruction, Some(1));
    assert_eq!(
        failure.message,
        "Verification failed at instruction: 1\nExecution falls off the end of the code after instruction 1"
    );

    let failure = verify(MethodCode::new(vec![Branch(Return)], 0, 0));
    assert_eq!(
        failure.cause,
        AnalysisError::Structural(StructuralError::ArgumentsExceedLocals {
            required: 1,
            max_locals: 0
        })
    );
    assert_eq!(
        failure.message,
        "Verification failed\nArguments need 1 locals but max locals is 0"
    );

    let failure = verify(
        MethodCode::new(vec![Branch(Return)], 0, 1).with_handler(ExceptionHandler {
            start: 0,
            end: 2,
            handler: 0,
            catch_type: None,
        }),
    );
    assert!(matches!(
        failure.cause,
        AnalysisError::Structural(StructuralError::InvalidExceptionRange { .. })
    ));
}

/// Interpreter that gives up on any `nop`
struct NoNops<'a>(TypeInterpreter<'a, ClassGraph>);

impl<'a> Interpreter for NoNops<'a> {
    fn execute(
        &self,
        index: InsnIndex,
        instruction: &CodeInstruction,
        frame: &mut VerifierFrame,
    ) -> Result<(), StepError> {
        if *instruction == Regular(Nop) {
            return Err(StepError::Internal(InternalFault::EmptyBlock(BlockId(0))));
        }
        self.0.execute(index, instruction, frame)
    }

    fn exception_value(&self, handler: &ExceptionHandler) -> VerifierType {
        self.0.exception_value(handler)
    }
}

#[test]
fn internal_faults_crash() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);
    let method = static_method("()V");
    let code = MethodCode::new(vec![Regular(Nop), Branch(Return)], 0, 0);

    let interpreter = NoNops(TypeInterpreter::new(&class_graph, &method, code.max_stack));
    let failure = verifier
        .verify_with(&interpreter, &method, &code, &|_: InsnIndex| Some(7u32))
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Internal);
    assert_eq!(failure.instruction, Some(0));
    assert_eq!(
        failure.message,
        "Verifier crashed: (EmptyBlock) Block BlockId(0) is empty"
    );

    // Runaway iteration
    let verifier = MethodVerifier::new(&class_graph).with_settings(Settings {
        iteration_factor: 0,
        ..Settings::new()
    });
    let failure = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap_err();
    assert_eq!(
        failure.to_string(),
        "Verifier crashed: (IterationLimit) No fixed point after 0 iterations"
    );
}

/// Stack of the join of several frames, slot by slot
fn joined_stack(frames: &[&VerifierFrame], hierarchy: &ClassGraph) -> Vec<VerifierType> {
    let mut stacks = frames.iter().map(|frame| stack_of(frame));
    let first = stacks.next().unwrap();
    stacks.fold(first, |joined, stack| {
        assert_eq!(joined.len(), stack.len());
        joined
            .iter()
            .zip(stack.iter())
            .map(|(left, right)| left.join(right, hierarchy))
            .collect()
    })
}

/// Every `long`/`double` local is followed by its `top` half
fn assert_no_split_locals(verified: &VerifiedMethod) {
    for frame in verified.frames.iter().chain(verified.frames_after.iter()).flatten() {
        for (index, local) in frame.locals.iter().enumerate() {
            if local.width() == 2 {
                assert_eq!(
                    frame.locals.get(index + 1),
                    Some(&VerificationType::Top),
                    "second half of local {} in {:?}",
                    index,
                    frame
                );
            }
        }
    }
}

#[test]
fn tableswitch_joins_references() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // static Number pick(int i, Integer a, Long b, Double c) {
    //     switch (i) { case 0: return a; case 1: return b; default: return c; }
    // }
    let method = static_method(
        "(ILjava/lang/Integer;Ljava/lang/Long;Ljava/lang/Double;)Ljava/lang/Number;",
    );
    let code = MethodCode::new(
        vec![
            Regular(ILoad(0)),
            Branch(TableSwitch {
                default: 6,
                low: 0,
                targets: vec![2, 4],
            }),
            Regular(ALoad(1)),
            Branch(Goto(7)),
            Regular(ALoad(2)),
            Branch(Goto(7)),
            Regular(ALoad(3)),
            Branch(AReturn),
        ],
        1,
        4,
    );
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();

    let number = VerificationType::Object(RefType::Object(BinaryName::NUMBER));
    assert_eq!(stack_of(verified.frame(7).unwrap()), vec![number]);
    assert!(verified.dead_code.is_empty());

    // The frame at the join is the join of what every predecessor leaves behind
    let predecessors: Vec<&VerifierFrame> = [3, 5, 6]
        .iter()
        .map(|index| verified.frame_after(*index).unwrap())
        .collect();
    assert_eq!(
        stack_of(verified.frame(7).unwrap()),
        joined_stack(&predecessors, &class_graph)
    );
    assert_eq!(verified.frame(7).unwrap().locals, predecessors[0].locals);
}

#[test]
fn lookupswitch_kills_mismatched_wide_locals() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // static long pick(int i, long x) {
    //     long/double y;
    //     switch (i) { case 1: y = x; break; case 10: y = 1L; break; default: y = 0.0; }
    //     return x;
    // }
    let method = static_method("(IJ)J");
    let instructions = |last_load: u16| {
        vec![
            Regular(ILoad(0)),
            Branch(LookupSwitch {
                default: 8,
                targets: vec![(1, 2), (10, 5)],
            }),
            Regular(LLoad(1)),
            Regular(LStore(3)),
            Branch(Goto(10)),
            Regular(LConst1),
            Regular(LStore(3)),
            Branch(Goto(10)),
            Regular(DConst0),
            Regular(DStore(3)),
            Regular(LLoad(last_load)),
            Branch(LReturn),
        ]
    };

    let code = MethodCode::new(instructions(1), 2, 5);
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();
    let join = verified.frame(10).unwrap();
    assert_eq!(
        join.locals,
        vec![
            VerificationType::Integer,
            VerificationType::Long,
            VerificationType::Top,
            VerificationType::Top,
            VerificationType::Top,
        ]
    );
    assert_eq!(join.stack_depth(), 0);
    assert_eq!(verified.frame_after(10).unwrap().stack_depth(), 2);
    assert_no_split_locals(&verified);

    // Reading the merged slot is an error at the read
    let code = MethodCode::new(instructions(3), 2, 5);
    let failure = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::Type);
    assert_eq!(failure.instruction, Some(10));
    assert!(matches!(
        failure.cause,
        AnalysisError::Type {
            index: 10,
            kind: VerifierErrorKind::UnsetLocal(_)
        }
    ));
}

#[test]
fn wide_stack_values_merge_whole() {
    let class_graph = java_graph();
    let verifier = MethodVerifier::new(&class_graph);

    // static long f(int i, long x) { return i == 0 ? 0L : x; }
    let method = static_method("(IJ)J");
    let instructions = |other: Instruction| {
        vec![
            Regular(ILoad(0)),
            Branch(If(OrdComparison::EQ, 4)),
            Regular(LLoad(1)),
            Branch(Goto(5)),
            Regular(other),
            Branch(LReturn),
        ]
    };

    let code = MethodCode::new(instructions(LConst0), 2, 3);
    let verified = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap();
    let join = verified.frame(5).unwrap();
    assert_eq!(stack_of(join), vec![VerificationType::Long]);
    assert_eq!(join.stack_depth(), 2);
    assert_eq!(
        stack_of(join),
        joined_stack(
            &[verified.frame_after(3).unwrap(), verified.frame_after(4).unwrap()],
            &class_graph
        )
    );
    assert_no_split_locals(&verified);

    // A `double` on one path can't stand in for the `long`
    let code = MethodCode::new(instructions(DConst0), 2, 3);
    let failure = verifier
        .verify(&method, &code, &LineNumbers::default())
        .unwrap_err();
    assert_eq!(failure.instruction, Some(5));
    assert!(matches!(
        failure.cause,
        AnalysisError::Type {
            index: 5,
            kind: VerifierErrorKind::IncompatibleMerge { .. }
        }
    ));
}
