//! This module contains the AST of JVM bytecode, with every constant pool operand resolved. The
//! representation is slightly different from the usual presentation to make it more convenient
//! to analyze. For instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches.
//!
//!   - Jump targets are instruction indices (not byte offsets), so `goto` and `goto_w` are the
//!     same instruction.
//!

use crate::jvm::{
    BaseType, BinaryName, FieldType, MethodDescriptor, RefType, RenderDescriptor, UnqualifiedName,
};
use std::fmt;

/// Position of an instruction in a method (not its byte offset)
pub type InsnIndex = usize;

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantData), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantData),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    Invoke(InvokeType, MethodRef),
    InvokeDynamic(InvokeDynamicRef),
    New(RefType<BinaryName>),
    NewArray(BaseType),
    ANewArray(RefType<BinaryName>),
    MultiANewArray(RefType<BinaryName>, u8),
    ArrayLength,
    CheckCast(RefType<BinaryName>),
    InstanceOf(RefType<BinaryName>),
    MonitorEnter,
    MonitorExit,
}

impl Instruction {
    /// Local variable slots used by the instruction (and the width of the value there)
    pub fn local_access(&self) -> Option<(u16, usize)> {
        match self {
            Instruction::ILoad(local)
            | Instruction::FLoad(local)
            | Instruction::ALoad(local)
            | Instruction::IStore(local)
            | Instruction::FStore(local)
            | Instruction::AStore(local)
            | Instruction::IInc(local, _) => Some((*local, 1)),
            Instruction::LLoad(local)
            | Instruction::DLoad(local)
            | Instruction::LStore(local)
            | Instruction::DStore(local) => Some((*local, 2)),
            _ => None,
        }
    }

    /// Does the instruction change the local variables?
    pub fn writes_local(&self) -> bool {
        matches!(
            self,
            Instruction::IStore(_)
                | Instruction::LStore(_)
                | Instruction::FStore(_)
                | Instruction::DStore(_)
                | Instruction::AStore(_)
                | Instruction::IInc(_, _)
        )
    }
}

/// Branching JVM bytecode instruction
///
/// The type parameter is the representation of jump targets: while decoding, these are byte
/// offsets into the code array. Afterwards, they are instruction indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction<Lbl = InsnIndex> {
    If(OrdComparison, Lbl), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Lbl), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, Lbl), // covers `if_acmpeq`, `if_acmpne`
    Goto(Lbl),                 // covers `goto` and `goto_w`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: Lbl,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<Lbl>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: Lbl,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, Lbl)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
    IfNull(EqComparison, Lbl), // covers `ifnull`, `ifnonnull`

    /// Subroutines are recognized (so they can be rejected), never verified
    Jsr(Lbl), // covers `jsr` and `jsr_w`
    Ret(u16),
}

impl<Lbl: Copy> BranchInstruction<Lbl> {
    /// Can the instruction fall through to the next instruction?
    pub fn can_fall_through(&self) -> bool {
        match self {
            BranchInstruction::Goto(_)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow
            | BranchInstruction::Ret(_) => false,

            BranchInstruction::If(_, _)
            | BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::IfNull(_, _)
            | BranchInstruction::Jsr(_) => true,
        }
    }

    /// Targets the instruction can jump to (excluding fall through)
    ///
    /// Switch targets are listed with the default first, duplicates included.
    pub fn jump_targets(&self) -> Vec<Lbl> {
        match self {
            BranchInstruction::If(_, lbl)
            | BranchInstruction::IfICmp(_, lbl)
            | BranchInstruction::IfACmp(_, lbl)
            | BranchInstruction::IfNull(_, lbl)
            | BranchInstruction::Goto(lbl)
            | BranchInstruction::Jsr(lbl) => vec![*lbl],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                ts
            }
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow
            | BranchInstruction::Ret(_) => vec![],
        }
    }

    /// Is this a `jsr`/`ret`?
    pub fn is_subroutine(&self) -> bool {
        matches!(self, BranchInstruction::Jsr(_) | BranchInstruction::Ret(_))
    }

    pub fn map_labels<Lbl2, E>(
        &self,
        mut map_label: impl FnMut(&Lbl) -> Result<Lbl2, E>,
    ) -> Result<BranchInstruction<Lbl2>, E> {
        use BranchInstruction::*;

        Ok(match self {
            If(op, lbl) => If(*op, map_label(lbl)?),
            IfICmp(op, lbl) => IfICmp(*op, map_label(lbl)?),
            IfACmp(op, lbl) => IfACmp(*op, map_label(lbl)?),
            Goto(lbl) => Goto(map_label(lbl)?),
            TableSwitch {
                default,
                low,
                targets,
            } => TableSwitch {
                default: map_label(default)?,
                low: *low,
                targets: targets.iter().map(&mut map_label).collect::<Result<_, E>>()?,
            },
            LookupSwitch { default, targets } => LookupSwitch {
                default: map_label(default)?,
                targets: targets
                    .iter()
                    .map(|(key, lbl)| Ok((*key, map_label(lbl)?)))
                    .collect::<Result<_, E>>()?,
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
            IfNull(op, lbl) => IfNull(*op, map_label(lbl)?),
            Jsr(lbl) => Jsr(map_label(lbl)?),
            Ret(local) => Ret(*local),
        })
    }
}

/// Instruction inside a method body
#[derive(Clone, Debug, PartialEq)]
pub enum CodeInstruction<Lbl = InsnIndex> {
    Regular(Instruction),
    Branch(BranchInstruction<Lbl>),
}

impl<Lbl: Copy> CodeInstruction<Lbl> {
    /// Can control continue to the next instruction?
    pub fn can_fall_through(&self) -> bool {
        match self {
            CodeInstruction::Regular(_) => true,
            CodeInstruction::Branch(branch) => branch.can_fall_through(),
        }
    }

    /// Does this instruction end a basic block?
    pub fn is_branch(&self) -> bool {
        matches!(self, CodeInstruction::Branch(_))
    }

    pub fn jump_targets(&self) -> Vec<Lbl> {
        match self {
            CodeInstruction::Regular(_) => vec![],
            CodeInstruction::Branch(branch) => branch.jump_targets(),
        }
    }
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}

/// Resolved `CONSTANT_Fieldref`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}:{}",
            self.class,
            self.name,
            self.descriptor.render(),
        ))
    }
}

/// Resolved `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Class on which the method is declared (array types show up for calls like `clone`)
    pub class: RefType<BinaryName>,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,

    /// Was this an interface method reference?
    pub is_interface: bool,
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match &self.class {
            RefType::Object(class) => class.to_string(),
            other => other.render(),
        };
        f.write_fmt(format_args!(
            "{}.{}:{}",
            class,
            self.name,
            self.descriptor.render(),
        ))
    }
}

/// Resolved `CONSTANT_InvokeDynamic`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InvokeDynamicRef {
    /// Index into the bootstrap methods table
    pub bootstrap: u16,

    /// Name of the dynamically invoked method
    pub name: UnqualifiedName,

    /// Type of the dynamically invoked method
    pub descriptor: MethodDescriptor<BinaryName>,
}

impl fmt::Debug for InvokeDynamicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "[{}]{}:{}",
            self.bootstrap,
            self.name,
            self.descriptor.render(),
        ))
    }
}

/// Loadable constant (the operand of `ldc`, `ldc_w`, and `ldc2_w`)
#[derive(Debug, PartialEq, Clone)]
pub enum ConstantData {
    String(String),
    Class(RefType<BinaryName>),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(MethodDescriptor<BinaryName>),

    /// Handle to a field or method (`kind` is the reference kind, from 1 to 9)
    MethodHandle {
        kind: u8,
        class: BinaryName,
        name: UnqualifiedName,
    },

    /// Dynamically-computed constant
    Dynamic {
        name: UnqualifiedName,
        descriptor: FieldType<BinaryName>,
    },
}

impl ConstantData {
    /// Number of stack slots the constant takes once loaded
    pub fn width(&self) -> usize {
        use crate::util::Width;
        match self {
            ConstantData::Long(_) | ConstantData::Double(_) => 2,
            ConstantData::Dynamic { descriptor, .. } => descriptor.width(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branch_targets() {
        let switch: BranchInstruction = BranchInstruction::LookupSwitch {
            default: 7,
            targets: vec![(1, 3), (5, 7)],
        };
        assert_eq!(switch.jump_targets(), vec![7, 3, 7]);
        assert!(!switch.can_fall_through());

        let cond: BranchInstruction = BranchInstruction::If(OrdComparison::LT, 2);
        assert_eq!(cond.jump_targets(), vec![2]);
        assert!(cond.can_fall_through());

        assert!(BranchInstruction::<InsnIndex>::Ret(1).is_subroutine());
        assert!(BranchInstruction::<InsnIndex>::AThrow.jump_targets().is_empty());
    }

    #[test]
    fn relabel() {
        let offsets: BranchInstruction<u32> = BranchInstruction::TableSwitch {
            default: 10,
            low: 0,
            targets: vec![20, 30],
        };
        let indices: Result<BranchInstruction, ()> =
            offsets.map_labels(|off| Ok(*off as usize / 10));
        assert_eq!(
            indices,
            Ok(BranchInstruction::TableSwitch {
                default: 1,
                low: 0,
                targets: vec![2, 3],
            })
        );
        let failed: Result<BranchInstruction, u32> =
            offsets.map_labels(|off| if *off == 30 { Err(*off) } else { Ok(0) });
        assert_eq!(failed, Err(30));
    }

    #[test]
    fn local_accesses() {
        assert_eq!(Instruction::DStore(3).local_access(), Some((3, 2)));
        assert_eq!(Instruction::IInc(1, -1).local_access(), Some((1, 1)));
        assert!(Instruction::IInc(1, -1).writes_local());
        assert!(!Instruction::ALoad(0).writes_local());
        assert_eq!(Instruction::IAdd.local_access(), None);
    }
}
