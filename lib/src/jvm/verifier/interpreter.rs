use super::*;
use crate::jvm::class_graph::TypeHierarchy;
use crate::jvm::code::{
    BranchInstruction, CodeInstruction, ConstantData, ExceptionHandler, InsnIndex, Instruction,
    InvokeType, MethodRef,
};
use crate::jvm::{
    BaseType, BinaryName, FieldType, InternalFault, RefType, RenderDescriptor, UnqualifiedName,
    VerifierErrorKind,
};
use crate::util::{OffsetVec, Width};

/// Failure to interpret one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The code is not type-safe
    Type(VerifierErrorKind),

    /// The interpreter itself is in a state it should never be in
    Internal(InternalFault),
}

impl From<VerifierErrorKind> for StepError {
    fn from(kind: VerifierErrorKind) -> StepError {
        StepError::Type(kind)
    }
}

impl From<InternalFault> for StepError {
    fn from(fault: InternalFault) -> StepError {
        StepError::Internal(fault)
    }
}

/// Transfer function used by the analyzer
pub trait Interpreter {
    /// Update the frame to reflect the effects of executing an instruction
    fn execute(
        &self,
        index: InsnIndex,
        instruction: &CodeInstruction,
        frame: &mut VerifierFrame,
    ) -> Result<(), StepError>;

    /// Value on the stack on entry to an exception handler
    fn exception_value(&self, handler: &ExceptionHandler) -> VerifierType;
}

/// Interpreter tracking the verification types of the stack and locals
pub struct TypeInterpreter<'a, H: ?Sized> {
    hierarchy: &'a H,
    method: &'a MethodContext,
    max_stack: u16,
}

impl<'a, H: TypeHierarchy + ?Sized> TypeInterpreter<'a, H> {
    pub fn new(hierarchy: &'a H, method: &'a MethodContext, max_stack: u16) -> Self {
        TypeInterpreter {
            hierarchy,
            method,
            max_stack,
        }
    }

    fn this_class(&self) -> VerifierType {
        VerificationType::Object(RefType::Object(self.method.class.clone()))
    }
}

impl<'a, H: TypeHierarchy + ?Sized> Interpreter for TypeInterpreter<'a, H> {
    fn execute(
        &self,
        index: InsnIndex,
        instruction: &CodeInstruction,
        frame: &mut VerifierFrame,
    ) -> Result<(), StepError> {
        match instruction {
            CodeInstruction::Regular(insn) => self.verify_instruction(index, insn, frame)?,
            CodeInstruction::Branch(insn) => self.verify_branch_instruction(insn, frame)?,
        }

        if frame.stack_depth() > self.max_stack as usize {
            return Err(StepError::Type(VerifierErrorKind::StackOverflow {
                max_stack: self.max_stack,
            }));
        }
        Ok(())
    }

    fn exception_value(&self, handler: &ExceptionHandler) -> VerifierType {
        let catch_type = handler
            .catch_type
            .clone()
            .unwrap_or(BinaryName::THROWABLE);
        VerificationType::Object(RefType::Object(catch_type))
    }
}

impl<'a, H: TypeHierarchy + ?Sized> TypeInterpreter<'a, H> {
    /// Update the frame to reflect the effects of the given (non-branching) instruction
    fn verify_instruction(
        &self,
        index: InsnIndex,
        insn: &Instruction,
        frame: &mut VerifierFrame,
    ) -> Result<(), StepError> {
        use Instruction::*;
        use VerificationType::*;

        let hierarchy = self.hierarchy;

        match insn {
            Nop => (),
            AConstNull => {
                frame.stack.push(Null);
            }
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
                frame.stack.push(Integer);
            }
            LConst0 | LConst1 => {
                frame.stack.push(Long);
            }
            FConst0 | FConst1 | FConst2 => {
                frame.stack.push(Float);
            }
            DConst0 | DConst1 => {
                frame.stack.push(Double);
            }
            BiPush(_) | SiPush(_) => {
                frame.stack.push(Integer);
            }
            Ldc(constant) => {
                let loaded = constant_type(constant);
                if loaded.width() != 1 {
                    return Err(VerifierErrorKind::InvalidWidth(loaded.width()).into());
                }
                frame.stack.push(loaded);
            }
            Ldc2(constant) => {
                let loaded = constant_type(constant);
                if loaded.width() != 2 {
                    return Err(VerifierErrorKind::InvalidWidth(loaded.width()).into());
                }
                frame.stack.push(loaded);
            }

            ILoad(local) => {
                get_local_expecting_type(frame, *local, Integer)?;
                frame.stack.push(Integer);
            }
            LLoad(local) => {
                get_local_expecting_type(frame, *local, Long)?;
                frame.stack.push(Long);
            }
            FLoad(local) => {
                get_local_expecting_type(frame, *local, Float)?;
                frame.stack.push(Float);
            }
            DLoad(local) => {
                get_local_expecting_type(frame, *local, Double)?;
                frame.stack.push(Double);
            }
            ALoad(local) => {
                let typ = get_local(frame, *local)?;
                if !typ.is_reference() {
                    return Err(VerifierErrorKind::NotReferenceType(typ).into());
                }
                frame.stack.push(typ);
            }

            IALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::int()])?;
                frame.stack.push(Integer);
            }
            LALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::long()])?;
                frame.stack.push(Long);
            }
            FALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::float()])?;
                frame.stack.push(Float);
            }
            DALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::double()])?;
                frame.stack.push(Double);
            }
            AALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                let loaded = match pop_reference_array(&mut frame.stack)? {
                    None => Null,
                    Some(element_type) => Object(element_type),
                };
                frame.stack.push(loaded);
            }
            BALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::byte(), FieldType::boolean()])?;
                frame.stack.push(Integer);
            }
            CALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::char()])?;
                frame.stack.push(Integer);
            }
            SALoad => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::short()])?;
                frame.stack.push(Integer);
            }

            IStore(local) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame.set_local(*local as usize, Integer)?;
            }
            FStore(local) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.set_local(*local as usize, Float)?;
            }
            LStore(local) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.set_local(*local as usize, Long)?;
            }
            DStore(local) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.set_local(*local as usize, Double)?;
            }
            AStore(local) => {
                let popped_type = pop_offset_vec(&mut frame.stack)?;
                if !popped_type.is_reference() {
                    return Err(VerifierErrorKind::NotReferenceType(popped_type).into());
                }
                frame.set_local(*local as usize, popped_type)?;
            }

            IAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::int()])?;
            }
            LAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::long()])?;
            }
            FAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::float()])?;
            }
            DAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::double()])?;
            }
            AAStore => {
                let elem_type = pop_initialized_reference(&mut frame.stack)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                if let Some(expected_elem_type) = pop_reference_array(&mut frame.stack)? {
                    let expected_elem_type = Object(expected_elem_type);
                    if !VerifierType::is_assignable(&elem_type, &expected_elem_type, hierarchy) {
                        return Err(VerifierErrorKind::IncompatibleTypes {
                            found: elem_type,
                            expected: expected_elem_type,
                        }
                        .into());
                    }
                }
            }
            BAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::byte(), FieldType::boolean()])?;
            }
            CAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::char()])?;
            }
            SAStore => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_array_expecting(&mut frame.stack, &[FieldType::short()])?;
            }

            Pop => {
                let _ = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
            }

            Pop2 => {
                let arg1 = pop_offset_vec(&mut frame.stack)?;
                match arg1.width() {
                    // Form 1
                    1 => {
                        let _ = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                    }

                    // Form 2
                    2 => (),

                    other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                }
            }

            Dup => {
                let arg1 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                frame.stack.push(arg1.clone());
                frame.stack.push(arg1);
            }

            DupX1 => {
                let arg1 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                let arg2 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                frame.stack.push(arg1.clone());
                frame.stack.push(arg2);
                frame.stack.push(arg1);
            }

            DupX2 => {
                let arg1 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                let arg2 = pop_offset_vec(&mut frame.stack)?;
                match arg2.width() {
                    // Form 1
                    1 => {
                        let arg3 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                        frame.stack.push(arg1.clone());
                        frame.stack.push(arg3);
                        frame.stack.push(arg2);
                        frame.stack.push(arg1);
                    }

                    // Form 2
                    2 => {
                        frame.stack.push(arg1.clone());
                        frame.stack.push(arg2);
                        frame.stack.push(arg1);
                    }

                    other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                }
            }

            Dup2 => {
                let arg1 = pop_offset_vec(&mut frame.stack)?;
                match arg1.width() {
                    // Form 1
                    1 => {
                        let arg2 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                        frame.stack.push(arg2.clone());
                        frame.stack.push(arg1.clone());
                        frame.stack.push(arg2);
                        frame.stack.push(arg1);
                    }

                    // Form 2
                    2 => {
                        frame.stack.push(arg1.clone());
                        frame.stack.push(arg1);
                    }

                    other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                }
            }

            Dup2X1 => {
                let arg1 = pop_offset_vec(&mut frame.stack)?;
                match arg1.width() {
                    // Form 1
                    1 => {
                        let arg2 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                        let arg3 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                        frame.stack.push(arg2.clone());
                        frame.stack.push(arg1.clone());
                        frame.stack.push(arg3);
                        frame.stack.push(arg2);
                        frame.stack.push(arg1);
                    }

                    // Form 2
                    2 => {
                        let arg2 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                        frame.stack.push(arg1.clone());
                        frame.stack.push(arg2);
                        frame.stack.push(arg1);
                    }

                    other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                }
            }

            Dup2X2 => {
                let arg1 = pop_offset_vec(&mut frame.stack)?;
                match arg1.width() {
                    1 => {
                        let arg2 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                        let arg3 = pop_offset_vec(&mut frame.stack)?;
                        match arg3.width() {
                            // Form 1
                            1 => {
                                let arg4 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                                frame.stack.push(arg2.clone());
                                frame.stack.push(arg1.clone());
                                frame.stack.push(arg4);
                                frame.stack.push(arg3);
                                frame.stack.push(arg2);
                                frame.stack.push(arg1);
                            }

                            // Form 3
                            2 => {
                                frame.stack.push(arg2.clone());
                                frame.stack.push(arg1.clone());
                                frame.stack.push(arg3);
                                frame.stack.push(arg2);
                                frame.stack.push(arg1);
                            }

                            other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                        }
                    }

                    2 => {
                        let arg2 = pop_offset_vec(&mut frame.stack)?;
                        match arg2.width() {
                            // Form 2
                            1 => {
                                let arg3 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                                frame.stack.push(arg1.clone());
                                frame.stack.push(arg3);
                                frame.stack.push(arg2);
                                frame.stack.push(arg1);
                            }

                            // Form 4
                            2 => {
                                frame.stack.push(arg1.clone());
                                frame.stack.push(arg2);
                                frame.stack.push(arg1);
                            }

                            other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                        }
                    }

                    other => return Err(VerifierErrorKind::InvalidWidth(other).into()),
                }
            }

            Swap => {
                let arg1 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                let arg2 = pop_offset_vec_expecting_width(&mut frame.stack, 1)?;
                frame.stack.push(arg1);
                frame.stack.push(arg2);
            }

            IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame.stack.push(Integer);
            }

            LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Long);
            }

            FAdd | FSub | FDiv | FMul | FRem => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.stack.push(Float);
            }

            DAdd | DSub | DDiv | DMul | DRem => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.stack.push(Double);
            }

            INeg | I2B | I2C | I2S => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame.stack.push(Integer);
            }

            LNeg => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Long);
            }

            FNeg => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.stack.push(Float);
            }

            DNeg => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.stack.push(Double);
            }

            LSh(_) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Long);
            }

            IInc(local, _) => {
                get_local_expecting_type(frame, *local, Integer)?;
            }

            I2L => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame.stack.push(Long);
            }
            I2F => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame.stack.push(Float);
            }
            I2D => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame.stack.push(Double);
            }

            L2I => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Integer);
            }
            L2F => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Float);
            }
            L2D => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Double);
            }

            F2I => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.stack.push(Integer);
            }
            F2L => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.stack.push(Long);
            }
            F2D => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.stack.push(Double);
            }

            D2I => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.stack.push(Integer);
            }
            D2L => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.stack.push(Long);
            }
            D2F => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.stack.push(Float);
            }

            LCmp => {
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Long)?;
                frame.stack.push(Integer);
            }
            FCmp(_) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Float)?;
                frame.stack.push(Integer);
            }
            DCmp(_) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Double)?;
                frame.stack.push(Integer);
            }

            GetStatic(field) => {
                frame.stack.push(VerifierType::from(field.descriptor.clone()));
            }
            PutStatic(field) => {
                let field_type = VerifierType::from(field.descriptor.clone());
                pop_offset_vec_expecting_assignable(&mut frame.stack, field_type, hierarchy)?;
            }

            GetField(field) => {
                let object_type = Object(RefType::Object(field.class.clone()));
                pop_offset_vec_expecting_assignable(&mut frame.stack, object_type, hierarchy)?;
                frame.stack.push(VerifierType::from(field.descriptor.clone()));
            }
            PutField(field) => {
                let field_type = VerifierType::from(field.descriptor.clone());
                pop_offset_vec_expecting_assignable(&mut frame.stack, field_type, hierarchy)?;

                // Constructors may set their own fields before calling the super constructor
                let sets_own_field = self.method.is_constructor() && field.class == self.method.class;
                if sets_own_field && frame.stack.last() == Some(&UninitializedThis) {
                    let _ = pop_offset_vec(&mut frame.stack)?;
                } else {
                    let object_type = Object(RefType::Object(field.class.clone()));
                    pop_offset_vec_expecting_assignable(&mut frame.stack, object_type, hierarchy)?;
                }
            }

            Invoke(invoke_type, method) => self.verify_invoke(*invoke_type, method, frame)?,

            InvokeDynamic(invoke_dynamic) => {
                let desc = &invoke_dynamic.descriptor;

                // Check that all the arguments match
                for expected_arg_type in desc.parameters.iter().rev() {
                    let expected = VerifierType::from(expected_arg_type.clone());
                    pop_offset_vec_expecting_assignable(&mut frame.stack, expected, hierarchy)?;
                }

                // Push the return type
                if let Some(return_type) = &desc.return_type {
                    frame.stack.push(VerifierType::from(return_type.clone()));
                }
            }

            New(ref_type) => {
                if ref_type.is_array() {
                    return Err(VerifierErrorKind::NotClassType(ref_type.clone()).into());
                }

                // A previous execution of this `new` must have been initialized by now
                if frame.contains(|value| value.is_uninitialized_from(index)) {
                    return Err(VerifierErrorKind::StaleUninitialized(index).into());
                }

                let uninitialized_ref_type = UninitializedRefType {
                    verification_type: ref_type.clone(),
                    origin: index,
                };
                frame.stack.push(Uninitialized(uninitialized_ref_type));
            }
            NewArray(base_type) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame
                    .stack
                    .push(Object(RefType::array(FieldType::Base(*base_type))));
            }
            ANewArray(ref_type) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                frame
                    .stack
                    .push(Object(RefType::array(FieldType::Ref(ref_type.clone()))));
            }
            MultiANewArray(ref_type, dimensions) => {
                if *dimensions == 0 || *dimensions as usize > ref_type.dimensions() {
                    return Err(VerifierErrorKind::InvalidDimensions(*dimensions).into());
                }
                for _ in 0..*dimensions {
                    pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                }
                frame.stack.push(Object(ref_type.clone()));
            }
            ArrayLength => {
                match pop_offset_vec(&mut frame.stack)? {
                    Null => (),
                    Object(ref_type) if ref_type.is_array() => (),
                    other => return Err(VerifierErrorKind::NotArrayType(other).into()),
                }
                frame.stack.push(Integer);
            }

            CheckCast(ref_type) => {
                pop_initialized_reference(&mut frame.stack)?;
                frame.stack.push(Object(ref_type.clone()));
            }
            InstanceOf(_) => {
                pop_initialized_reference(&mut frame.stack)?;
                frame.stack.push(Integer);
            }

            MonitorEnter | MonitorExit => {
                pop_initialized_reference(&mut frame.stack)?;
            }
        }

        Ok(())
    }

    fn verify_invoke(
        &self,
        invoke_type: InvokeType,
        method: &MethodRef,
        frame: &mut VerifierFrame,
    ) -> Result<(), StepError> {
        use VerificationType::*;

        let hierarchy = self.hierarchy;
        let is_init = method.name == UnqualifiedName::INIT;
        let desc = &method.descriptor;

        // Check that all the arguments match
        for expected_arg_type in desc.parameters.iter().rev() {
            let found_arg_type = pop_offset_vec(&mut frame.stack)?;
            let expected = VerifierType::from(expected_arg_type.clone());
            if !VerifierType::is_assignable(&found_arg_type, &expected, hierarchy) {
                log::error!(
                    "Incompatible argument types: found {} but expected {} (for {})",
                    found_arg_type,
                    expected,
                    desc.render(),
                );
                return Err(VerifierErrorKind::IncompatibleTypes {
                    found: found_arg_type,
                    expected,
                }
                .into());
            }
        }

        if let (InvokeType::Special, true) = (invoke_type, is_init) {
            if method.is_interface {
                return Err(VerifierErrorKind::InterfaceMismatch.into());
            }
            if desc.return_type.is_some() {
                return Err(VerifierErrorKind::ReturnTypeMismatch { expected: None }.into());
            }

            // Initialize
            let receiver = pop_offset_vec(&mut frame.stack)?;
            let initialized = match &receiver {
                UninitializedThis => {
                    // Every class with a constructor (other than `Object`) has a superclass, so
                    // classes missing from the hierarchy are assumed to extend `Object`
                    let this_class = RefType::Object(self.method.class.clone());
                    let super_class = RefType::Object(
                        self.hierarchy
                            .superclass(&self.method.class)
                            .unwrap_or(BinaryName::OBJECT),
                    );
                    if method.class != this_class && method.class != super_class {
                        return Err(VerifierErrorKind::WrongConstructor {
                            owner: method.class.clone(),
                            found: receiver,
                        }
                        .into());
                    }
                    self.this_class()
                }

                Uninitialized(uninitialized) => {
                    if uninitialized.verification_type != method.class {
                        return Err(VerifierErrorKind::WrongConstructor {
                            owner: method.class.clone(),
                            found: receiver,
                        }
                        .into());
                    }
                    Object(uninitialized.verification_type.clone())
                }

                _ => {
                    return Err(VerifierErrorKind::WrongConstructor {
                        owner: method.class.clone(),
                        found: receiver,
                    }
                    .into())
                }
            };
            frame.replace_all(&receiver, &initialized);
        } else {
            let (expects_interface, needs_receiver) = match invoke_type {
                InvokeType::Static => (None, false),
                InvokeType::Special => (None, true),
                InvokeType::Virtual => (Some(false), true),
                InvokeType::Interface(_) => (Some(true), true),
            };

            if expects_interface.map_or(false, |expected| expected != method.is_interface) {
                return Err(VerifierErrorKind::InterfaceMismatch.into());
            }

            // Pop off the receiver type
            if needs_receiver {
                let found_receiver = pop_offset_vec(&mut frame.stack)?;
                let expected = Object(method.class.clone());
                if !VerifierType::is_assignable(&found_receiver, &expected, hierarchy) {
                    log::error!(
                        "Incompatible receiver: found {} but expected {} (for {})",
                        found_receiver,
                        expected,
                        desc.render(),
                    );
                    return Err(VerifierErrorKind::IncompatibleTypes {
                        found: found_receiver,
                        expected,
                    }
                    .into());
                }
            }

            // Push the return type
            if let Some(return_type) = &desc.return_type {
                frame.stack.push(VerifierType::from(return_type.clone()));
            }
        }

        Ok(())
    }

    /// Update the frame to reflect the effects of the given branching instruction
    fn verify_branch_instruction(
        &self,
        insn: &BranchInstruction,
        frame: &mut VerifierFrame,
    ) -> Result<(), StepError> {
        use BranchInstruction::*;
        use VerificationType::*;

        let return_type = &self.method.descriptor.return_type;

        match insn {
            If(_, _) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
            }
            IfICmp(_, _) => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
            }
            IfACmp(_, _) => {
                pop_reference(&mut frame.stack)?;
                pop_reference(&mut frame.stack)?;
            }
            Goto(_) => (),
            TableSwitch { .. } | LookupSwitch { .. } => {
                pop_offset_vec_expecting_type(&mut frame.stack, Integer)?;
            }
            IReturn | LReturn | FReturn | DReturn | AReturn | Return => {
                self.check_initialized_before_return(frame)?;

                let expected = return_type.clone().map(VerifierType::from);
                let matches_return_type = match (insn, &expected) {
                    (IReturn, Some(Integer))
                    | (LReturn, Some(Long))
                    | (FReturn, Some(Float))
                    | (DReturn, Some(Double))
                    | (AReturn, Some(Object(_)))
                    | (Return, None) => true,
                    _ => false,
                };
                if !matches_return_type {
                    return Err(VerifierErrorKind::ReturnTypeMismatch {
                        expected: return_type.clone(),
                    }
                    .into());
                }
                if let Some(expected) = expected {
                    pop_offset_vec_expecting_assignable(&mut frame.stack, expected, self.hierarchy)?;
                }
            }
            AThrow => {
                let atype = pop_offset_vec(&mut frame.stack)?;
                match &atype {
                    Null => (),
                    Object(RefType::Object(exception_type))
                        if self
                            .hierarchy
                            .is_assignable(exception_type, &BinaryName::THROWABLE) => {}
                    _ => return Err(VerifierErrorKind::NotThrowable(atype).into()),
                }
                frame.stack.clear();
                frame.stack.push(atype);
            }
            IfNull(_, _) => {
                pop_reference(&mut frame.stack)?;
            }
            Jsr(_) | Ret(_) => return Err(InternalFault::UnexpectedSubroutine.into()),
        }

        Ok(())
    }

    /// Constructors must call a super or this constructor before returning
    fn check_initialized_before_return(&self, frame: &VerifierFrame) -> Result<(), StepError> {
        let is_object_constructor = self.method.class == BinaryName::OBJECT;
        if self.method.is_constructor()
            && !is_object_constructor
            && frame
                .locals
                .iter()
                .any(|local| *local == VerificationType::UninitializedThis)
        {
            return Err(VerifierErrorKind::ReturnBeforeSuperInit.into());
        }
        Ok(())
    }
}

/// Type of a loaded constant
fn constant_type(constant: &ConstantData) -> VerifierType {
    match constant {
        ConstantData::String(_) => VerifierType::STRING,
        ConstantData::Class(_) => VerificationType::Object(RefType::Object(BinaryName::CLASS)),
        ConstantData::Integer(_) => VerificationType::Integer,
        ConstantData::Float(_) => VerificationType::Float,
        ConstantData::Long(_) => VerificationType::Long,
        ConstantData::Double(_) => VerificationType::Double,
        ConstantData::MethodHandle { .. } => {
            VerificationType::Object(RefType::Object(BinaryName::METHODHANDLE))
        }
        ConstantData::MethodType(_) => {
            VerificationType::Object(RefType::Object(BinaryName::METHODTYPE))
        }
        ConstantData::Dynamic { descriptor, .. } => VerifierType::from(descriptor.clone()),
    }
}

fn get_local(frame: &VerifierFrame, local: u16) -> Result<VerifierType, StepError> {
    match frame.local(local as usize)? {
        VerificationType::Top => Err(VerifierErrorKind::UnsetLocal(local).into()),
        typ => Ok(typ.clone()),
    }
}

fn get_local_expecting_type(
    frame: &VerifierFrame,
    local: u16,
    expected_type: VerifierType,
) -> Result<(), StepError> {
    let found = get_local(frame, local)?;
    if found == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found,
            expected: expected_type,
        }
        .into())
    }
}

fn pop_offset_vec(stack: &mut OffsetVec<VerifierType>) -> Result<VerifierType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, _, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

fn pop_offset_vec_expecting_width(
    stack: &mut OffsetVec<VerifierType>,
    expected_width: usize,
) -> Result<VerifierType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let found_width = typ.width();
    if found_width == expected_width {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::InvalidWidth(found_width))
    }
}

fn pop_offset_vec_expecting_type(
    stack: &mut OffsetVec<VerifierType>,
    expected_type: VerifierType,
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found: typ,
            expected: expected_type,
        })
    }
}

fn pop_offset_vec_expecting_assignable<H: TypeHierarchy + ?Sized>(
    stack: &mut OffsetVec<VerifierType>,
    expected_type: VerifierType,
    hierarchy: &H,
) -> Result<VerifierType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if VerifierType::is_assignable(&typ, &expected_type, hierarchy) {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::IncompatibleTypes {
            found: typ,
            expected: expected_type,
        })
    }
}

/// Pop any reference (including uninitialized ones)
fn pop_reference(stack: &mut OffsetVec<VerifierType>) -> Result<VerifierType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    if typ.is_reference() {
        Ok(typ)
    } else {
        Err(VerifierErrorKind::NotReferenceType(typ))
    }
}

/// Pop `null` or an initialized object
fn pop_initialized_reference(
    stack: &mut OffsetVec<VerifierType>,
) -> Result<VerifierType, VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    match typ {
        VerificationType::Null | VerificationType::Object(_) => Ok(typ),
        _ => Err(VerifierErrorKind::NotReferenceType(typ)),
    }
}

/// Pop an array whose elements have one of the expected (primitive) types, or `null`
fn pop_array_expecting(
    stack: &mut OffsetVec<VerifierType>,
    element_types: &[FieldType<BinaryName>],
) -> Result<(), VerifierErrorKind> {
    let typ = pop_offset_vec(stack)?;
    let matches = match &typ {
        VerificationType::Null => true,
        VerificationType::Object(ref_type) => ref_type
            .element_type()
            .map_or(false, |element_type| element_types.contains(&element_type)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        let expected_element = element_types
            .first()
            .cloned()
            .unwrap_or(FieldType::Base(BaseType::Int));
        Err(VerifierErrorKind::IncompatibleTypes {
            found: typ,
            expected: VerificationType::Object(RefType::array(expected_element)),
        })
    }
}

/// Pop an array of references, returning the element type (or `None` if the array was `null`)
fn pop_reference_array(
    stack: &mut OffsetVec<VerifierType>,
) -> Result<Option<RefType<BinaryName>>, VerifierErrorKind> {
    match pop_offset_vec(stack)? {
        VerificationType::Null => Ok(None),
        VerificationType::Object(ref_type) => match ref_type.element_type() {
            Some(FieldType::Ref(element_type)) => Ok(Some(element_type)),
            _ => Err(VerifierErrorKind::NotArrayType(VerificationType::Object(
                ref_type,
            ))),
        },
        other => Err(VerifierErrorKind::NotArrayType(other)),
    }
}
