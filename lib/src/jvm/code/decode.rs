use super::*;
use crate::jvm::{BaseType, BinaryName, RefType, StructuralError};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

/// Instructions decoded from a raw code array
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    pub instructions: Vec<CodeInstruction>,

    /// Byte offset of each instruction (ascending, same length as `instructions`)
    pub offsets: Vec<u32>,

    /// Length of the code array in bytes
    pub code_length: u32,
}

impl DecodedCode {
    /// Index of the instruction starting at a byte offset
    pub fn index_of(&self, offset: u32) -> Option<InsnIndex> {
        self.offsets.binary_search(&offset).ok()
    }

    /// Like `index_of`, but also accepts the offset just past the last instruction
    ///
    /// This is what exception range ends (which are exclusive) can point to.
    pub fn boundary_of(&self, offset: u32) -> Option<InsnIndex> {
        if offset == self.code_length {
            Some(self.instructions.len())
        } else {
            self.index_of(offset)
        }
    }

    /// Translate an exception table entry from byte offsets to instruction indices
    ///
    /// `entry_index` is the position of the entry in the exception table. A `catch_type` of 0
    /// means the handler catches everything.
    pub fn exception_handler<C: ConstantPool + ?Sized>(
        &self,
        entry_index: usize,
        entry: &RawExceptionHandler,
        constants: &C,
    ) -> Result<ExceptionHandler, StructuralError> {
        let offset = entry.handler_pc as u32;
        let to_boundary = |pc: u16| {
            self.boundary_of(pc as u32)
                .ok_or(StructuralError::InvalidExceptionOffset {
                    entry: entry_index,
                    pc,
                })
        };

        let catch_type = match entry.catch_type {
            0 => None,
            index => match constants.class(index) {
                Some(RefType::Object(name)) => Some(name),
                _ => {
                    return Err(StructuralError::MissingConstant {
                        offset,
                        index,
                        expected: "class",
                    })
                }
            },
        };

        Ok(ExceptionHandler {
            start: to_boundary(entry.start_pc)?,
            end: to_boundary(entry.end_pc)?,
            handler: to_boundary(entry.handler_pc)?,
            catch_type,
        })
    }

    /// Bundle the instructions into method code
    pub fn into_method_code<C: ConstantPool + ?Sized>(
        self,
        max_stack: u16,
        max_locals: u16,
        exception_table: &[RawExceptionHandler],
        constants: &C,
    ) -> Result<MethodCode, StructuralError> {
        let exception_handlers = exception_table
            .iter()
            .enumerate()
            .map(|(entry_index, entry)| self.exception_handler(entry_index, entry, constants))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MethodCode {
            instructions: self.instructions,
            max_stack,
            max_locals,
            exception_handlers,
        })
    }
}

/// Exception table entry, exactly as it appears in a `Code` attribute
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Decode a raw code array
///
/// Jump targets are checked to land on the start of an instruction, but not otherwise validated
/// (this happens when building the control flow graph).
pub fn decode_code<C: ConstantPool + ?Sized>(
    code: &[u8],
    constants: &C,
) -> Result<DecodedCode, StructuralError> {
    let mut decoder = Decoder {
        cursor: Cursor::new(code),
        constants,
        offset: 0,
    };

    let mut raw_instructions: Vec<CodeInstruction<i64>> = vec![];
    let mut offsets: Vec<u32> = vec![];
    while (decoder.cursor.position() as usize) < code.len() {
        decoder.offset = decoder.cursor.position() as u32;
        offsets.push(decoder.offset);
        raw_instructions.push(decoder.instruction()?);
    }

    let mut decoded = DecodedCode {
        instructions: Vec::with_capacity(raw_instructions.len()),
        offsets,
        code_length: code.len() as u32,
    };
    for (index, raw_instruction) in raw_instructions.into_iter().enumerate() {
        let instruction = match raw_instruction {
            CodeInstruction::Regular(insn) => CodeInstruction::Regular(insn),
            CodeInstruction::Branch(branch) => {
                let offset = decoded.offsets[index];
                let branch = branch.map_labels(|target| {
                    u32::try_from(*target)
                        .ok()
                        .and_then(|target| decoded.index_of(target))
                        .ok_or(StructuralError::InvalidOffset {
                            offset,
                            target: *target,
                        })
                })?;
                CodeInstruction::Branch(branch)
            }
        };
        decoded.instructions.push(instruction);
    }

    Ok(decoded)
}

struct Decoder<'a, C: ?Sized> {
    cursor: Cursor<&'a [u8]>,
    constants: &'a C,

    /// Offset of the instruction being decoded
    offset: u32,
}

impl<'a, C: ConstantPool + ?Sized> Decoder<'a, C> {
    fn truncated(&self) -> StructuralError {
        StructuralError::TruncatedCode {
            offset: self.offset,
        }
    }

    fn u8(&mut self) -> Result<u8, StructuralError> {
        self.cursor.read_u8().map_err(|_| self.truncated())
    }

    fn i8(&mut self) -> Result<i8, StructuralError> {
        self.cursor.read_i8().map_err(|_| self.truncated())
    }

    fn u16(&mut self) -> Result<u16, StructuralError> {
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| self.truncated())
    }

    fn i16(&mut self) -> Result<i16, StructuralError> {
        self.cursor
            .read_i16::<BigEndian>()
            .map_err(|_| self.truncated())
    }

    fn i32(&mut self) -> Result<i32, StructuralError> {
        self.cursor
            .read_i32::<BigEndian>()
            .map_err(|_| self.truncated())
    }

    /// Jump target from a 2-byte relative offset
    fn target16(&mut self) -> Result<i64, StructuralError> {
        Ok(self.offset as i64 + self.i16()? as i64)
    }

    /// Jump target from a 4-byte relative offset
    fn target32(&mut self) -> Result<i64, StructuralError> {
        Ok(self.offset as i64 + self.i32()? as i64)
    }

    fn missing(&self, index: u16, expected: &'static str) -> StructuralError {
        StructuralError::MissingConstant {
            offset: self.offset,
            index,
            expected,
        }
    }

    fn class(&mut self) -> Result<RefType<BinaryName>, StructuralError> {
        let index = self.u16()?;
        self.constants
            .class(index)
            .ok_or_else(|| self.missing(index, "class"))
    }

    fn loadable(&mut self, index: u16) -> Result<ConstantData, StructuralError> {
        self.constants
            .loadable(index)
            .ok_or_else(|| self.missing(index, "loadable constant"))
    }

    fn field(&mut self) -> Result<FieldRef, StructuralError> {
        let index = self.u16()?;
        self.constants
            .field(index)
            .ok_or_else(|| self.missing(index, "field reference"))
    }

    fn method(&mut self) -> Result<MethodRef, StructuralError> {
        let index = self.u16()?;
        self.constants
            .method(index)
            .ok_or_else(|| self.missing(index, "method reference"))
    }

    /// Skip the padding that aligns switch operands to a multiple of 4 bytes (counted from the
    /// start of the code array)
    fn skip_switch_padding(&mut self) -> Result<(), StructuralError> {
        while self.cursor.position() % 4 != 0 {
            self.u8()?;
        }
        Ok(())
    }

    fn instruction(&mut self) -> Result<CodeInstruction<i64>, StructuralError> {
        use BranchInstruction::*;
        use CodeInstruction::{Branch, Regular};
        use Instruction::*;

        let opcode = self.u8()?;
        let instruction = match opcode {
            0x00 => Regular(Nop),
            0x01 => Regular(AConstNull),
            0x02 => Regular(IConstM1),
            0x03 => Regular(IConst0),
            0x04 => Regular(IConst1),
            0x05 => Regular(IConst2),
            0x06 => Regular(IConst3),
            0x07 => Regular(IConst4),
            0x08 => Regular(IConst5),
            0x09 => Regular(LConst0),
            0x0a => Regular(LConst1),
            0x0b => Regular(FConst0),
            0x0c => Regular(FConst1),
            0x0d => Regular(FConst2),
            0x0e => Regular(DConst0),
            0x0f => Regular(DConst1),
            0x10 => Regular(BiPush(self.i8()?)),
            0x11 => Regular(SiPush(self.i16()?)),
            0x12 => {
                let index = self.u8()? as u16;
                Regular(Ldc(self.loadable(index)?))
            }
            0x13 => {
                let index = self.u16()?;
                Regular(Ldc(self.loadable(index)?))
            }
            0x14 => {
                let index = self.u16()?;
                Regular(Ldc2(self.loadable(index)?))
            }
            0x15 => Regular(ILoad(self.u8()? as u16)),
            0x16 => Regular(LLoad(self.u8()? as u16)),
            0x17 => Regular(FLoad(self.u8()? as u16)),
            0x18 => Regular(DLoad(self.u8()? as u16)),
            0x19 => Regular(ALoad(self.u8()? as u16)),
            0x1a..=0x1d => Regular(ILoad((opcode - 0x1a) as u16)),
            0x1e..=0x21 => Regular(LLoad((opcode - 0x1e) as u16)),
            0x22..=0x25 => Regular(FLoad((opcode - 0x22) as u16)),
            0x26..=0x29 => Regular(DLoad((opcode - 0x26) as u16)),
            0x2a..=0x2d => Regular(ALoad((opcode - 0x2a) as u16)),
            0x2e => Regular(IALoad),
            0x2f => Regular(LALoad),
            0x30 => Regular(FALoad),
            0x31 => Regular(DALoad),
            0x32 => Regular(AALoad),
            0x33 => Regular(BALoad),
            0x34 => Regular(CALoad),
            0x35 => Regular(SALoad),
            0x36 => Regular(IStore(self.u8()? as u16)),
            0x37 => Regular(LStore(self.u8()? as u16)),
            0x38 => Regular(FStore(self.u8()? as u16)),
            0x39 => Regular(DStore(self.u8()? as u16)),
            0x3a => Regular(AStore(self.u8()? as u16)),
            0x3b..=0x3e => Regular(IStore((opcode - 0x3b) as u16)),
            0x3f..=0x42 => Regular(LStore((opcode - 0x3f) as u16)),
            0x43..=0x46 => Regular(FStore((opcode - 0x43) as u16)),
            0x47..=0x4a => Regular(DStore((opcode - 0x47) as u16)),
            0x4b..=0x4e => Regular(AStore((opcode - 0x4b) as u16)),
            0x4f => Regular(IAStore),
            0x50 => Regular(LAStore),
            0x51 => Regular(FAStore),
            0x52 => Regular(DAStore),
            0x53 => Regular(AAStore),
            0x54 => Regular(BAStore),
            0x55 => Regular(CAStore),
            0x56 => Regular(SAStore),
            0x57 => Regular(Pop),
            0x58 => Regular(Pop2),
            0x59 => Regular(Dup),
            0x5a => Regular(DupX1),
            0x5b => Regular(DupX2),
            0x5c => Regular(Dup2),
            0x5d => Regular(Dup2X1),
            0x5e => Regular(Dup2X2),
            0x5f => Regular(Swap),
            0x60 => Regular(IAdd),
            0x61 => Regular(LAdd),
            0x62 => Regular(FAdd),
            0x63 => Regular(DAdd),
            0x64 => Regular(ISub),
            0x65 => Regular(LSub),
            0x66 => Regular(FSub),
            0x67 => Regular(DSub),
            0x68 => Regular(IMul),
            0x69 => Regular(LMul),
            0x6a => Regular(FMul),
            0x6b => Regular(DMul),
            0x6c => Regular(IDiv),
            0x6d => Regular(LDiv),
            0x6e => Regular(FDiv),
            0x6f => Regular(DDiv),
            0x70 => Regular(IRem),
            0x71 => Regular(LRem),
            0x72 => Regular(FRem),
            0x73 => Regular(DRem),
            0x74 => Regular(INeg),
            0x75 => Regular(LNeg),
            0x76 => Regular(FNeg),
            0x77 => Regular(DNeg),
            0x78 => Regular(ISh(ShiftType::Left)),
            0x79 => Regular(LSh(ShiftType::Left)),
            0x7a => Regular(ISh(ShiftType::ArithmeticRight)),
            0x7b => Regular(LSh(ShiftType::ArithmeticRight)),
            0x7c => Regular(ISh(ShiftType::LogicalRight)),
            0x7d => Regular(LSh(ShiftType::LogicalRight)),
            0x7e => Regular(IAnd),
            0x7f => Regular(LAnd),
            0x80 => Regular(IOr),
            0x81 => Regular(LOr),
            0x82 => Regular(IXor),
            0x83 => Regular(LXor),
            0x84 => {
                let local = self.u8()? as u16;
                Regular(IInc(local, self.i8()? as i16))
            }
            0x85 => Regular(I2L),
            0x86 => Regular(I2F),
            0x87 => Regular(I2D),
            0x88 => Regular(L2I),
            0x89 => Regular(L2F),
            0x8a => Regular(L2D),
            0x8b => Regular(F2I),
            0x8c => Regular(F2L),
            0x8d => Regular(F2D),
            0x8e => Regular(D2I),
            0x8f => Regular(D2L),
            0x90 => Regular(D2F),
            0x91 => Regular(I2B),
            0x92 => Regular(I2C),
            0x93 => Regular(I2S),
            0x94 => Regular(LCmp),
            0x95 => Regular(FCmp(CompareMode::L)),
            0x96 => Regular(FCmp(CompareMode::G)),
            0x97 => Regular(DCmp(CompareMode::L)),
            0x98 => Regular(DCmp(CompareMode::G)),
            0x99..=0x9e => {
                let target = self.target16()?;
                Branch(If(ord_comparison(opcode - 0x99), target))
            }
            0x9f..=0xa4 => {
                let target = self.target16()?;
                Branch(IfICmp(ord_comparison(opcode - 0x9f), target))
            }
            0xa5 => Branch(IfACmp(EqComparison::EQ, self.target16()?)),
            0xa6 => Branch(IfACmp(EqComparison::NE, self.target16()?)),
            0xa7 => Branch(Goto(self.target16()?)),
            0xa8 => Branch(Jsr(self.target16()?)),
            0xa9 => Branch(Ret(self.u8()? as u16)),
            0xaa => {
                self.skip_switch_padding()?;
                let default = self.target32()?;
                let low = self.i32()?;
                let high = self.i32()?;
                if high < low {
                    return Err(StructuralError::MalformedSwitch {
                        offset: self.offset,
                    });
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    targets.push(self.target32()?);
                }
                Branch(TableSwitch {
                    default,
                    low,
                    targets,
                })
            }
            0xab => {
                self.skip_switch_padding()?;
                let default = self.target32()?;
                let npairs = self.i32()?;
                if npairs < 0 {
                    return Err(StructuralError::MalformedSwitch {
                        offset: self.offset,
                    });
                }
                let mut targets = Vec::with_capacity((npairs as usize).min(1024));
                for _ in 0..npairs {
                    let key = self.i32()?;
                    targets.push((key, self.target32()?));
                }
                Branch(LookupSwitch { default, targets })
            }
            0xac => Branch(IReturn),
            0xad => Branch(LReturn),
            0xae => Branch(FReturn),
            0xaf => Branch(DReturn),
            0xb0 => Branch(AReturn),
            0xb1 => Branch(Return),
            0xb2 => Regular(GetStatic(self.field()?)),
            0xb3 => Regular(PutStatic(self.field()?)),
            0xb4 => Regular(GetField(self.field()?)),
            0xb5 => Regular(PutField(self.field()?)),
            0xb6 => Regular(Invoke(InvokeType::Virtual, self.method()?)),
            0xb7 => Regular(Invoke(InvokeType::Special, self.method()?)),
            0xb8 => Regular(Invoke(InvokeType::Static, self.method()?)),
            0xb9 => {
                let method = self.method()?;
                let count = self.u8()?;
                let zero = self.u8()?;
                let expected = method.descriptor.parameter_length(true);
                if count as usize != expected || zero != 0 {
                    return Err(StructuralError::InvalidInterfaceCall {
                        offset: self.offset,
                        count,
                        expected,
                    });
                }
                Regular(Invoke(InvokeType::Interface(count), method))
            }
            0xba => {
                let index = self.u16()?;
                let _zeros = self.u16()?;
                let indy = self
                    .constants
                    .invoke_dynamic(index)
                    .ok_or_else(|| self.missing(index, "invokedynamic"))?;
                Regular(InvokeDynamic(indy))
            }
            0xbb => Regular(New(self.class()?)),
            0xbc => {
                let atype = self.u8()?;
                let base_type = BaseType::from_array_type_code(atype).ok_or(
                    StructuralError::InvalidArrayType {
                        offset: self.offset,
                        atype,
                    },
                )?;
                Regular(NewArray(base_type))
            }
            0xbd => Regular(ANewArray(self.class()?)),
            0xbe => Regular(ArrayLength),
            0xbf => Branch(AThrow),
            0xc0 => Regular(CheckCast(self.class()?)),
            0xc1 => Regular(InstanceOf(self.class()?)),
            0xc2 => Regular(MonitorEnter),
            0xc3 => Regular(MonitorExit),
            0xc4 => self.wide_instruction()?,
            0xc5 => {
                let class = self.class()?;
                Regular(MultiANewArray(class, self.u8()?))
            }
            0xc6 => Branch(IfNull(EqComparison::EQ, self.target16()?)),
            0xc7 => Branch(IfNull(EqComparison::NE, self.target16()?)),
            0xc8 => Branch(Goto(self.target32()?)),
            0xc9 => Branch(Jsr(self.target32()?)),
            _ => {
                return Err(StructuralError::UnknownOpcode {
                    offset: self.offset,
                    opcode,
                })
            }
        };
        Ok(instruction)
    }

    /// Instruction following a `wide` prefix
    fn wide_instruction(&mut self) -> Result<CodeInstruction<i64>, StructuralError> {
        use CodeInstruction::{Branch, Regular};
        use Instruction::*;

        let opcode = self.u8()?;
        let instruction = match opcode {
            0x15 => Regular(ILoad(self.u16()?)),
            0x16 => Regular(LLoad(self.u16()?)),
            0x17 => Regular(FLoad(self.u16()?)),
            0x18 => Regular(DLoad(self.u16()?)),
            0x19 => Regular(ALoad(self.u16()?)),
            0x36 => Regular(IStore(self.u16()?)),
            0x37 => Regular(LStore(self.u16()?)),
            0x38 => Regular(FStore(self.u16()?)),
            0x39 => Regular(DStore(self.u16()?)),
            0x3a => Regular(AStore(self.u16()?)),
            0x84 => {
                let local = self.u16()?;
                Regular(IInc(local, self.i16()?))
            }
            0xa9 => Branch(BranchInstruction::Ret(self.u16()?)),
            _ => {
                return Err(StructuralError::InvalidWideOpcode {
                    offset: self.offset,
                    opcode,
                })
            }
        };
        Ok(instruction)
    }
}

/// Comparison for `if<cond>` and `if_icmp<cond>`, by distance from the `eq` opcode
fn ord_comparison(delta: u8) -> OrdComparison {
    match delta {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{FieldType, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};

    #[test]
    fn straight_line() {
        // iload_0, iconst_1, iadd, ireturn
        let decoded = decode_code(&[0x1a, 0x04, 0x60, 0xac], &ConstantTable::new()).unwrap();
        assert_eq!(
            decoded.instructions,
            vec![
                CodeInstruction::Regular(Instruction::ILoad(0)),
                CodeInstruction::Regular(Instruction::IConst1),
                CodeInstruction::Regular(Instruction::IAdd),
                CodeInstruction::Branch(BranchInstruction::IReturn),
            ]
        );
        assert_eq!(decoded.offsets, vec![0, 1, 2, 3]);
        assert_eq!(decoded.code_length, 4);
    }

    #[test]
    fn jumps_become_indices() {
        // 0: iload_0
        // 1: ifeq +6 (to 7)
        // 4: iconst_1
        // 5: goto +3 (to 8)
        // 8 is past the end: invalid
        let code = [0x1a, 0x99, 0x00, 0x06, 0x04, 0xa7, 0x00, 0x03];
        assert_eq!(
            decode_code(&code, &ConstantTable::new()),
            Err(StructuralError::InvalidOffset {
                offset: 1,
                target: 7
            })
        );

        // 0: iload_0
        // 1: ifeq +7 (to 8)
        // 4: iconst_1
        // 5: goto +4 (to 9)
        // 8: iconst_0
        // 9: ireturn
        let code = [0x1a, 0x99, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x03, 0xac];
        let decoded = decode_code(&code, &ConstantTable::new()).unwrap();
        assert_eq!(
            decoded.instructions[1],
            CodeInstruction::Branch(BranchInstruction::If(OrdComparison::EQ, 4))
        );
        assert_eq!(
            decoded.instructions[3],
            CodeInstruction::Branch(BranchInstruction::Goto(5))
        );
        assert_eq!(decoded.index_of(8), Some(4));
        assert_eq!(decoded.index_of(2), None);
    }

    #[test]
    fn tableswitch_padding() {
        // 0: iload_0
        // 1: tableswitch (2 bytes of padding), default +15, low 0, high 0, +15
        // 20: return
        let mut code = vec![0x1a, 0xaa, 0x00, 0x00];
        code.extend_from_slice(&19i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&19i32.to_be_bytes());
        code.push(0xb1);
        let decoded = decode_code(&code, &ConstantTable::new()).unwrap();
        assert_eq!(
            decoded.instructions[1],
            CodeInstruction::Branch(BranchInstruction::TableSwitch {
                default: 2,
                low: 0,
                targets: vec![2],
            })
        );
        assert_eq!(decoded.offsets, vec![0, 1, 20]);
    }

    #[test]
    fn wide_and_constants() {
        let mut constants = ConstantTable::new();
        constants.insert(3, ConstantEntry::Loadable(ConstantData::Long(1)));
        constants.insert(
            4,
            ConstantEntry::Field(FieldRef {
                class: BinaryName::from_str("com/example/Point").unwrap(),
                name: UnqualifiedName::from_str("x").unwrap(),
                descriptor: FieldType::int(),
            }),
        );

        // wide iinc 300 -2, ldc2_w #3, getstatic #4
        let code = [0xc4, 0x84, 0x01, 0x2c, 0xff, 0xfe, 0x14, 0x00, 0x03, 0xb2, 0x00, 0x04];
        let decoded = decode_code(&code, &constants).unwrap();
        assert_eq!(
            decoded.instructions[0],
            CodeInstruction::Regular(Instruction::IInc(300, -2))
        );
        assert_eq!(
            decoded.instructions[1],
            CodeInstruction::Regular(Instruction::Ldc2(ConstantData::Long(1)))
        );
        assert_eq!(decoded.offsets, vec![0, 6, 9]);

        // ldc of a missing constant
        assert_eq!(
            decode_code(&[0x12, 0x09], &constants),
            Err(StructuralError::MissingConstant {
                offset: 0,
                index: 9,
                expected: "loadable constant"
            })
        );
    }

    #[test]
    fn malformed_code() {
        let constants = ConstantTable::new();
        assert_eq!(
            decode_code(&[0x04, 0x11, 0x01], &constants),
            Err(StructuralError::TruncatedCode { offset: 1 })
        );
        assert_eq!(
            decode_code(&[0xfe], &constants),
            Err(StructuralError::UnknownOpcode {
                offset: 0,
                opcode: 0xfe
            })
        );
        assert_eq!(
            decode_code(&[0xc4, 0x60], &constants),
            Err(StructuralError::InvalidWideOpcode {
                offset: 0,
                opcode: 0x60
            })
        );
        assert_eq!(
            decode_code(&[0x04, 0xbc, 0x02], &constants),
            Err(StructuralError::InvalidArrayType {
                offset: 1,
                atype: 2
            })
        );
    }

    #[test]
    fn exception_table() {
        let mut constants = ConstantTable::new();
        constants.insert(2, ConstantEntry::Class(RefType::THROWABLE));
        constants.insert(5, ConstantEntry::Loadable(ConstantData::Integer(5)));

        // 0: iconst_1, 1: ireturn, 2: pop (handler), 3: iconst_0, 4: ireturn
        let code = [0x04, 0xac, 0x57, 0x03, 0xac];
        let decoded = decode_code(&code, &constants).unwrap();

        let entry = RawExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: 2,
        };
        assert_eq!(
            decoded.exception_handler(0, &entry, &constants),
            Ok(ExceptionHandler {
                start: 0,
                end: 2,
                handler: 2,
                catch_type: Some(BinaryName::THROWABLE),
            })
        );

        let catch_all = RawExceptionHandler {
            catch_type: 0,
            end_pc: 5,
            ..entry
        };
        assert_eq!(
            decoded.exception_handler(0, &catch_all, &constants).map(|h| h.end),
            Ok(5)
        );

        let not_a_class = RawExceptionHandler {
            catch_type: 5,
            ..entry
        };
        assert!(decoded.exception_handler(0, &not_a_class, &constants).is_err());

        // The offending pc is reported, not the handler
        let mid_instruction = RawExceptionHandler {
            end_pc: 6,
            ..entry
        };
        assert_eq!(
            decoded.exception_handler(3, &mid_instruction, &constants),
            Err(StructuralError::InvalidExceptionOffset { entry: 3, pc: 6 })
        );

        let code = decoded
            .into_method_code(1, 1, &[entry], &constants)
            .unwrap();
        assert_eq!(code.exception_handlers.len(), 1);
        assert_eq!(code.len(), 5);
    }

    #[test]
    fn interface_call_count() {
        let mut constants = ConstantTable::new();
        constants.insert(
            1,
            ConstantEntry::Method(MethodRef {
                class: RefType::Object(BinaryName::COMPARABLE),
                name: UnqualifiedName::from_str("compareTo").unwrap(),
                descriptor: MethodDescriptor::parse("(Ljava/lang/Object;)I").unwrap(),
                is_interface: true,
            }),
        );

        // invokeinterface #1, 2, 0
        let decoded = decode_code(&[0xb9, 0x00, 0x01, 0x02, 0x00], &constants).unwrap();
        assert!(matches!(
            decoded.instructions[0],
            CodeInstruction::Regular(Instruction::Invoke(InvokeType::Interface(2), _))
        ));

        assert_eq!(
            decode_code(&[0xb9, 0x00, 0x01, 0x01, 0x00], &constants),
            Err(StructuralError::InvalidInterfaceCall {
                offset: 0,
                count: 1,
                expected: 2
            })
        );
        assert!(decode_code(&[0xb9, 0x00, 0x01, 0x02, 0x07], &constants).is_err());
    }
}
