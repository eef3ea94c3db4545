use super::TypeHierarchy;
use crate::jvm::{BinaryName, RefType};
use std::cmp::Ordering;

/// Subtyping relationship between types
pub trait Assignable {
    /// Is the first type assignable to the second?
    fn is_assignable<H: TypeHierarchy + ?Sized>(&self, super_type: &Self, hierarchy: &H) -> bool;
}

/// This matches the semantics of the prolog predicate `isJavaAssignable(sub_type, super_type)` in
/// the JVM verification rules.
///
/// In particular, every class type is assignable to every interface type: the verifier leaves
/// interface checks to run time.
impl Assignable for RefType<BinaryName> {
    fn is_assignable<H: TypeHierarchy + ?Sized>(
        &self,
        super_type: &RefType<BinaryName>,
        hierarchy: &H,
    ) -> bool {
        match (self, super_type) {
            // Special superclass and interfaces of all arrays
            (
                RefType::PrimitiveArray(_) | RefType::ObjectArray(_),
                RefType::Object(object_type),
            ) => is_array_type_assignable(object_type),

            // Primitive arrays must match in dimension and type
            (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => arr1 == arr2,

            // Higher dimensional primitive arrays can be subtypes of object arrays
            (RefType::PrimitiveArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less | Ordering::Equal => false,
                    Ordering::Greater => is_array_type_assignable(&arr2.element_type),
                }
            }

            // Cursed (unsound) covariance of arrays
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less => false,
                    Ordering::Equal => {
                        is_class_assignable(&arr1.element_type, &arr2.element_type, hierarchy)
                    }
                    Ordering::Greater => is_array_type_assignable(&arr2.element_type),
                }
            }

            // Object-to-object assignability holds if there is a path through super type edges
            (RefType::Object(cls1), RefType::Object(cls2)) => {
                is_class_assignable(cls1, cls2, hierarchy)
            }

            _ => false,
        }
    }
}

fn is_class_assignable<H: TypeHierarchy + ?Sized>(
    sub_type: &BinaryName,
    super_type: &BinaryName,
    hierarchy: &H,
) -> bool {
    sub_type == super_type
        || hierarchy.is_interface(super_type)
        || hierarchy.is_assignable(sub_type, super_type)
}

/// Check if arrays can be assigned to a super type
///
/// This bakes in knowledge of the small, finite set of super types arrays have.
fn is_array_type_assignable(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}
