use super::*;
use crate::jvm::class_graph::TypeHierarchy;
use crate::jvm::{BinaryName, InternalFault, RefType, StructuralError, VerifierErrorKind};
use crate::util::{OffsetVec, Width};

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals are a fixed size array of slots (one per local variable, so `long` and `double` take up
/// two entries: the value followed by `Top`). The stack holds one entry per value, and is measured
/// in slots through its offsets.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Frame<Cls, U> {
    /// Local variables, exactly `max_locals` of them
    pub locals: Vec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

/// Stack map frame stored during verification
pub type VerifierFrame = Frame<RefType<BinaryName>, UninitializedRefType>;

impl VerifierFrame {
    /// Frame with every local unset and an empty stack
    pub fn new(max_locals: u16) -> VerifierFrame {
        Frame {
            locals: vec![VerificationType::Top; max_locals as usize],
            stack: OffsetVec::new(),
        }
    }

    /// Frame on entry to a method: the receiver and the arguments are in the first locals
    ///
    /// Inside a constructor (other than the one of `java/lang/Object`), the receiver starts out
    /// as `UninitializedThis`.
    pub fn entry(method: &MethodContext, max_locals: u16) -> Result<VerifierFrame, StructuralError> {
        let has_receiver = method.access_flags.has_receiver();
        let required = method.descriptor.parameter_length(has_receiver);
        if required > max_locals as usize {
            return Err(StructuralError::ArgumentsExceedLocals {
                required,
                max_locals,
            });
        }

        let mut frame = VerifierFrame::new(max_locals);
        let mut next_local = 0;
        if has_receiver {
            frame.locals[0] = if method.is_constructor() && method.class != BinaryName::OBJECT {
                VerificationType::UninitializedThis
            } else {
                VerificationType::Object(RefType::Object(method.class.clone()))
            };
            next_local += 1;
        }
        for parameter in &method.descriptor.parameters {
            let value = VerifierType::from(parameter.clone());
            let width = value.width();
            frame.locals[next_local] = value;
            next_local += width;
        }

        Ok(frame)
    }

    /// Height of the stack, in slots
    pub fn stack_depth(&self) -> usize {
        self.stack.offset_len().0
    }

    /// Read a local variable
    pub fn local(&self, index: usize) -> Result<&VerifierType, InternalFault> {
        self.locals.get(index).ok_or(InternalFault::LocalOutOfRange {
            local: index,
            max_locals: self.locals.len(),
        })
    }

    /// Write a local variable
    ///
    /// Category 2 values also claim the next slot. Overwriting either half of a category 2 value
    /// kills the other half.
    pub fn set_local(&mut self, index: usize, value: VerifierType) -> Result<(), InternalFault> {
        let width = value.width();
        if index + width > self.locals.len() {
            return Err(InternalFault::LocalOutOfRange {
                local: index + width - 1,
                max_locals: self.locals.len(),
            });
        }

        if index > 0 && self.locals[index - 1].width() == 2 {
            self.locals[index - 1] = VerificationType::Top;
        }
        if width == 1 && self.locals[index].width() == 2 {
            // We were the first half of a `long`/`double`
            if let Some(second_half) = self.locals.get_mut(index + 1) {
                *second_half = VerificationType::Top;
            }
        }
        if width == 2 && self.locals.get(index + 1).map_or(false, |next| next.width() == 2) {
            if let Some(after) = self.locals.get_mut(index + 2) {
                *after = VerificationType::Top;
            }
        }

        self.locals[index] = value;
        if width == 2 {
            self.locals[index + 1] = VerificationType::Top;
        }
        Ok(())
    }

    /// Replace every occurrence of a value (in the stack and locals)
    pub fn replace_all(&mut self, original: &VerifierType, updated: &VerifierType) {
        self.stack.update_each(|value| {
            if value == original {
                *value = updated.clone();
            }
        });
        for value in &mut self.locals {
            if value == original {
                *value = updated.clone();
            }
        }
    }

    /// Does any slot (stack or locals) contain this value?
    pub fn contains(&self, needle: impl Fn(&VerifierType) -> bool) -> bool {
        self.stack.iter().any(|(_, _, value)| needle(value)) || self.locals.iter().any(needle)
    }

    /// Merge another frame into this one, returning whether this frame changed
    ///
    /// Stacks must have matching heights, and every pair of stack values must have a common
    /// super type. Locals that can't be reconciled are turned into `Top`.
    pub fn merge_from<H: TypeHierarchy + ?Sized>(
        &mut self,
        other: &VerifierFrame,
        hierarchy: &H,
    ) -> Result<bool, VerifierErrorKind> {
        if self.stack.len() != other.stack.len() || self.stack_depth() != other.stack_depth() {
            return Err(VerifierErrorKind::MismatchedStackHeights {
                left: self.stack_depth(),
                right: other.stack_depth(),
            });
        }

        let mut stack = OffsetVec::new();
        for ((offset, _, left), (_, _, right)) in self.stack.iter().zip(other.stack.iter()) {
            let joined = left.join(right, hierarchy);
            if joined == VerificationType::Bottom {
                return Err(VerifierErrorKind::IncompatibleMerge {
                    slot: offset.0,
                    left: left.clone(),
                    right: right.clone(),
                });
            }
            stack.push(joined);
        }

        let locals: Vec<VerifierType> = self
            .locals
            .iter()
            .zip(other.locals.iter())
            .map(|(left, right)| match left.join(right, hierarchy) {
                VerificationType::Bottom => VerificationType::Top,
                joined => joined,
            })
            .collect();

        let changed = stack != self.stack || locals != self.locals;
        self.stack = stack;
        self.locals = locals;
        Ok(changed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ClassGraph;
    use crate::jvm::{MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName};
    use VerificationType::*;

    fn new_frame<const N: usize, const M: usize>(
        locals: [VerifierType; N],
        stack: [VerifierType; M],
    ) -> VerifierFrame {
        Frame {
            locals: locals.to_vec(),
            stack: OffsetVec::from(stack),
        }
    }

    fn method(name: &str, descriptor: &str, access_flags: MethodAccessFlags) -> MethodContext {
        MethodContext::new(
            BinaryName::from_str("com/example/Point").unwrap(),
            UnqualifiedName::from_str(name).unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            access_flags,
        )
    }

    #[test]
    fn entry_frames() {
        let point = Object(RefType::Object(BinaryName::from_str("com/example/Point").unwrap()));

        let static_method = method("f", "(JI)V", MethodAccessFlags::STATIC);
        assert_eq!(
            VerifierFrame::entry(&static_method, 4).unwrap(),
            new_frame([Long, Top, Integer, Top], [])
        );

        let instance_method = method("g", "(D)I", MethodAccessFlags::PUBLIC);
        assert_eq!(
            VerifierFrame::entry(&instance_method, 3).unwrap(),
            new_frame([point, Double, Top], [])
        );

        let constructor = method("<init>", "()V", MethodAccessFlags::PUBLIC);
        assert_eq!(
            VerifierFrame::entry(&constructor, 1).unwrap(),
            new_frame([UninitializedThis], [])
        );

        assert_eq!(
            VerifierFrame::entry(&instance_method, 2),
            Err(StructuralError::ArgumentsExceedLocals {
                required: 3,
                max_locals: 2
            })
        );
    }

    #[test]
    fn object_constructor_starts_initialized() {
        let constructor = MethodContext::new(
            BinaryName::OBJECT,
            UnqualifiedName::INIT,
            MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        assert_eq!(
            VerifierFrame::entry(&constructor, 1).unwrap(),
            new_frame([VerifierType::OBJECT], [])
        );
    }

    #[test]
    fn category_two_locals() {
        let mut frame = VerifierFrame::new(4);
        frame.set_local(1, Double).unwrap();
        assert_eq!(frame.locals, vec![Top, Double, Top, Top]);

        // Overwriting the second half kills the first
        frame.set_local(2, Integer).unwrap();
        assert_eq!(frame.locals, vec![Top, Top, Integer, Top]);

        // Overwriting the first half kills the second
        frame.set_local(0, Long).unwrap();
        frame.set_local(0, Float).unwrap();
        assert_eq!(frame.locals, vec![Float, Top, Integer, Top]);

        // Wide value overlapping the first half of another wide value
        frame.set_local(2, Long).unwrap();
        frame.set_local(1, Double).unwrap();
        assert_eq!(frame.locals, vec![Float, Double, Top, Top]);

        assert_eq!(
            frame.set_local(3, Long),
            Err(InternalFault::LocalOutOfRange {
                local: 4,
                max_locals: 4
            })
        );
        assert!(frame.local(4).is_err());
    }

    #[test]
    fn merges() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();

        let integer = Object(RefType::Object(BinaryName::INTEGER));
        let long = Object(RefType::Object(BinaryName::from_str("java/lang/Long").unwrap()));
        let number = Object(RefType::Object(BinaryName::NUMBER));

        let mut frame = new_frame([Integer, Long, Top], [integer]);
        let same = frame.clone();
        assert_eq!(frame.merge_from(&same, &class_graph), Ok(false));

        let other = new_frame([Float, Long, Top], [long]);
        assert_eq!(frame.merge_from(&other, &class_graph), Ok(true));
        assert_eq!(frame, new_frame([Top, Long, Top], [number]));

        let mismatched = new_frame([Top, Top, Top], [Integer]);
        assert_eq!(
            frame.merge_from(&mismatched, &class_graph),
            Err(VerifierErrorKind::IncompatibleMerge {
                slot: 0,
                left: Object(RefType::Object(BinaryName::NUMBER)),
                right: Integer,
            })
        );

        let taller = new_frame([Top, Top, Top], [Integer, Integer]);
        assert_eq!(
            frame.merge_from(&taller, &class_graph),
            Err(VerifierErrorKind::MismatchedStackHeights { left: 1, right: 2 })
        );
    }

    #[test]
    fn replace_uninitialized() {
        let point = Object(RefType::Object(BinaryName::from_str("com/example/Point").unwrap()));
        let mut frame = new_frame(
            [UninitializedThis, Integer],
            [UninitializedThis, Null, UninitializedThis],
        );
        frame.replace_all(&UninitializedThis, &point);
        assert_eq!(
            frame,
            new_frame([point.clone(), Integer], [point.clone(), Null, point])
        );
        assert!(!frame.contains(|value| *value == UninitializedThis));
        assert!(frame.contains(|value| *value == Null));
    }
}
