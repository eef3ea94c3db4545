use crate::jvm::class_graph::{Assignable, TypeHierarchy};
use crate::jvm::code::InsnIndex;
use crate::jvm::{ArrayType, BaseType, BinaryName, FieldType, RefType, RenderDescriptor};
use crate::util::Width;
use std::collections::HashSet;
use std::fmt;

/// These types are from [this hierarchy][0], extended with a top and a bottom element
///
/// The types form a lattice (see [`VerifierType::join`]):
///
///   - `Top` is an unassigned (or unusable) slot. It joins only with itself.
///   - `Bottom` is the result of joining incompatible types. It absorbs everything.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Local variable slot holding nothing usable (also the second half of a `long`/`double`)
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not been called
    Uninitialized(U),

    /// Values that can't be reconciled
    Bottom,
}

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long
            | VerificationType::Bottom => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }
}

impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

/// Value produced by a `new` instruction, before its `<init>` is called
///
/// Two of these are the same value only if they come from the same `new` instruction. That is
/// what makes it possible to initialize exactly the right copies when `<init>` is called.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct UninitializedRefType {
    /// Once the type is initialized, what will it be?
    pub verification_type: RefType<BinaryName>,

    /// Index of the `new` instruction
    pub origin: InsnIndex,
}

/// Type tracked in frames during verification
pub type VerifierType = VerificationType<RefType<BinaryName>, UninitializedRefType>;

impl VerifierType {
    /// Check if one verification type is assignable to another
    pub fn is_assignable<H: TypeHierarchy + ?Sized>(
        sub_type: &Self,
        super_type: &Self,
        hierarchy: &H,
    ) -> bool {
        match (sub_type, super_type) {
            (Self::Bottom, _) => false,
            (_, Self::Top) => true,
            (Self::Null, Self::Object(_)) => true,
            (Self::Object(t1), Self::Object(t2)) => t1.is_assignable(t2, hierarchy),
            (t1, t2) => t1 == t2,
        }
    }

    /// Least upper bound of two types
    ///
    /// This is commutative, associative, and idempotent. Incompatible types join to `Bottom`.
    pub fn join<H: TypeHierarchy + ?Sized>(&self, other: &Self, hierarchy: &H) -> Self {
        match (self, other) {
            (t1, t2) if t1 == t2 => t1.clone(),
            (Self::Bottom, _) | (_, Self::Bottom) => Self::Bottom,
            (Self::Null, Self::Object(t)) | (Self::Object(t), Self::Null) => {
                Self::Object(t.clone())
            }
            (Self::Object(t1), Self::Object(t2)) => Self::Object(join_ref_types(t1, t2, hierarchy)),
            _ => Self::Bottom,
        }
    }

    /// Is this the uninitialized value of `new` at the given instruction?
    pub fn is_uninitialized_from(&self, new_index: InsnIndex) -> bool {
        matches!(self, Self::Uninitialized(uninit) if uninit.origin == new_index)
    }

    pub const OBJECT: Self = Self::Object(RefType::OBJECT);
    pub const STRING: Self = Self::Object(RefType::STRING);
    pub const THROWABLE: Self = Self::Object(RefType::THROWABLE);
}

/// Common super type of reference types
///
/// Object arrays of the same dimension join element-wise, every other array mix ends up as
/// `java/lang/Object`.
fn join_ref_types<H: TypeHierarchy + ?Sized>(
    ref1: &RefType<BinaryName>,
    ref2: &RefType<BinaryName>,
    hierarchy: &H,
) -> RefType<BinaryName> {
    match (ref1, ref2) {
        (RefType::Object(cls1), RefType::Object(cls2)) => {
            RefType::Object(join_classes(cls1, cls2, hierarchy))
        }
        (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2))
            if arr1.additional_dimensions == arr2.additional_dimensions =>
        {
            RefType::ObjectArray(ArrayType {
                additional_dimensions: arr1.additional_dimensions,
                element_type: join_classes(&arr1.element_type, &arr2.element_type, hierarchy),
            })
        }
        _ if ref1 == ref2 => ref1.clone(),
        _ => RefType::OBJECT,
    }
}

/// Nearest common superclass, walking up the superclass chain of the first class
///
/// Interfaces don't take part: as in the JVM's own verifier, a join involving an interface is
/// `java/lang/Object` (interface types are checked leniently at use sites instead). A superclass
/// chain that loops back on itself also ends at `java/lang/Object`.
fn join_classes<H: TypeHierarchy + ?Sized>(
    cls1: &BinaryName,
    cls2: &BinaryName,
    hierarchy: &H,
) -> BinaryName {
    if cls1 == cls2 {
        return cls1.clone();
    }
    if hierarchy.is_interface(cls1) || hierarchy.is_interface(cls2) {
        return BinaryName::OBJECT;
    }
    if hierarchy.is_assignable(cls1, cls2) {
        return cls2.clone();
    }
    if hierarchy.is_assignable(cls2, cls1) {
        return cls1.clone();
    }

    let mut visited: HashSet<BinaryName> = HashSet::new();
    visited.insert(cls1.clone());
    let mut ancestor = hierarchy.superclass(cls1);
    while let Some(candidate) = ancestor {
        if !visited.insert(candidate.clone()) {
            log::warn!("Cyclic superclass chain through {}", candidate);
            break;
        }
        if hierarchy.is_assignable(cls2, &candidate) {
            return candidate;
        }
        ancestor = hierarchy.superclass(&candidate);
    }
    BinaryName::OBJECT
}

impl fmt::Display for VerifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationType::Top => f.write_str("top"),
            VerificationType::Integer => f.write_str("I"),
            VerificationType::Float => f.write_str("F"),
            VerificationType::Long => f.write_str("J"),
            VerificationType::Double => f.write_str("D"),
            VerificationType::Null => f.write_str("null"),
            VerificationType::UninitializedThis => f.write_str("uninitialized this"),
            VerificationType::Object(ref_type) => f.write_str(&ref_type.render()),
            VerificationType::Uninitialized(uninit) => write!(
                f,
                "uninitialized {} (new at {})",
                uninit.verification_type.render(),
                uninit.origin
            ),
            VerificationType::Bottom => f.write_str("bottom"),
        }
    }
}
