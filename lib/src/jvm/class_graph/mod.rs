//! Type hierarchy used to answer subtyping queries during verification
//!
//! The verifier never loads classes. Whatever it needs to know about the classes a method refers to
//! comes through [`TypeHierarchy`]. [`ClassGraph`] is the ready-made implementation: an append-only
//! map of class names to their superclass and interfaces, seeded with the handful of JDK types
//! that bytecode verification inherently reasons about.

use super::{BinaryName, ClassAccessFlags, Name};
use elsa::sync::FrozenMap;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Debug;

mod assignable;
mod java_classes;

pub use assignable::*;

/// Queries about classes the verifier needs answered
///
/// Implementations must be consistent for the duration of a verification run. Unknown classes are
/// allowed: they have no superclass and are assignable only to themselves and `java/lang/Object`.
pub trait TypeHierarchy {
    /// Superclass of a class (`None` for `java/lang/Object`, interfaces, and unknown classes)
    fn superclass(&self, class: &BinaryName) -> Option<BinaryName>;

    /// Is this class known to be an interface?
    fn is_interface(&self, class: &BinaryName) -> bool;

    /// Is the first class a subtype of the second?
    fn is_assignable(&self, sub_type: &BinaryName, super_type: &BinaryName) -> bool;
}

impl<'a, H: TypeHierarchy + ?Sized> TypeHierarchy for &'a H {
    fn superclass(&self, class: &BinaryName) -> Option<BinaryName> {
        (**self).superclass(class)
    }

    fn is_interface(&self, class: &BinaryName) -> bool {
        (**self).is_interface(class)
    }

    fn is_assignable(&self, sub_type: &BinaryName, super_type: &BinaryName) -> bool {
        (**self).is_assignable(sub_type, super_type)
    }
}

/// Tracks the superclass/interface relationships between classes
///
/// Classes can be added at any point (including while other threads are verifying methods
/// against the graph) but never removed or updated.
pub struct ClassGraph {
    classes: FrozenMap<BinaryName, Box<ClassData>>,
}

impl ClassGraph {
    /// New empty graph
    pub fn new() -> Self {
        ClassGraph {
            classes: FrozenMap::new(),
        }
    }

    /// Look up a class by name
    pub fn lookup_class(&self, name: &BinaryName) -> Option<&ClassData> {
        self.classes.get(name)
    }

    /// Add a new class to the class graph
    ///
    /// If a class by the same name is already present, the existing class is kept and returned.
    pub fn add_class(&self, data: ClassData) -> &ClassData {
        log::trace!("Adding {:?} to the class graph", data);
        self.classes.insert(data.name.clone(), Box::new(data))
    }

    /// Add standard types to the class graph
    pub fn insert_java_library_types(&self) {
        java_classes::add_to_graph(self)
    }
}

impl Default for ClassGraph {
    fn default() -> Self {
        ClassGraph::new()
    }
}

/// This does a traversal of super types in the class graph to determine assignability
impl TypeHierarchy for ClassGraph {
    fn superclass(&self, class: &BinaryName) -> Option<BinaryName> {
        self.lookup_class(class)
            .and_then(|class_data| class_data.superclass.clone())
    }

    fn is_interface(&self, class: &BinaryName) -> bool {
        self.lookup_class(class)
            .map_or(false, |class_data| class_data.is_interface())
    }

    fn is_assignable(&self, sub_type: &BinaryName, super_type: &BinaryName) -> bool {
        if sub_type == super_type || super_type == &BinaryName::OBJECT {
            return true;
        }

        let mut supertypes_to_visit: Vec<&BinaryName> = vec![sub_type];
        let mut dont_revisit: HashSet<&BinaryName> = HashSet::new();
        dont_revisit.insert(sub_type);

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = !self.is_interface(super_type);

        while let Some(class_name) = supertypes_to_visit.pop() {
            if class_name == super_type {
                return true;
            }
            let class_data = match self.lookup_class(class_name) {
                Some(class_data) => class_data,
                None => continue,
            };

            // Enqueue next types to visit
            if let Some(superclass) = &class_data.superclass {
                if dont_revisit.insert(superclass) {
                    supertypes_to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in &class_data.interfaces {
                    if dont_revisit.insert(interface) {
                        supertypes_to_visit.push(interface);
                    }
                }
            }
        }

        false
    }
}

pub struct ClassData {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is only ever missing for `java/lang/Object` itself
    pub superclass: Option<BinaryName>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: Vec<BinaryName>,

    /// Access flags
    pub access_flags: ClassAccessFlags,
}

impl ClassData {
    pub fn new(
        name: BinaryName,
        superclass: BinaryName,
        access_flags: ClassAccessFlags,
    ) -> ClassData {
        ClassData {
            name,
            superclass: Some(superclass),
            interfaces: vec![],
            access_flags,
        }
    }

    /// Add implemented interfaces
    pub fn with_interfaces(mut self, interfaces: impl IntoIterator<Item = BinaryName>) -> Self {
        self.interfaces.extend(interfaces);
        self
    }

    /// Is this an interface?
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }
}

impl PartialEq for ClassData {
    fn eq(&self, other: &ClassData) -> bool {
        self.name == other.name
    }
}

impl Eq for ClassData {}

impl Debug for ClassData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())?;
        if let Some(superclass) = &self.superclass {
            write!(f, " extends {}", superclass.as_str())?;
        }
        if !self.interfaces.is_empty() {
            f.write_str(" implements")?;
            for interface in &self.interfaces {
                write!(f, " {}", interface.as_str())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn user_class(name: &str, superclass: BinaryName) -> ClassData {
        ClassData::new(
            BinaryName::from_str(name).unwrap(),
            superclass,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        )
    }

    #[test]
    fn simple_classes() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();

        let object_cls = &BinaryName::OBJECT;
        let string_cls = &BinaryName::STRING;

        assert!(
            class_graph.is_assignable(object_cls, object_cls),
            "java.lang.Object <: java.lang.Object"
        );
        assert!(
            class_graph.is_assignable(string_cls, string_cls),
            "java.lang.String <: java.lang.String"
        );
        assert!(
            class_graph.is_assignable(string_cls, object_cls),
            "java.lang.String <: java.lang.Object"
        );
        assert!(
            !class_graph.is_assignable(object_cls, string_cls),
            "java.lang.Object </: java.lang.String"
        );
    }

    #[test]
    fn transitive_classes() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();

        let object_cls = &BinaryName::OBJECT;
        let number_cls = &BinaryName::NUMBER;
        let integer_cls = &BinaryName::INTEGER;

        assert!(
            class_graph.is_assignable(integer_cls, number_cls),
            "java.lang.Integer <: java.lang.Number"
        );
        assert!(
            class_graph.is_assignable(integer_cls, object_cls),
            "java.lang.Integer <: java.lang.Object"
        );
        assert!(
            !class_graph.is_assignable(number_cls, integer_cls),
            "java.lang.Number </: java.lang.Integer"
        );
        assert_eq!(class_graph.superclass(integer_cls), Some(BinaryName::NUMBER));
        assert_eq!(class_graph.superclass(object_cls), None);
    }

    #[test]
    fn simple_interfaces() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();

        let string_cls = &BinaryName::STRING;
        let charsequence_cls = &BinaryName::CHARSEQUENCE;

        assert!(class_graph.is_interface(charsequence_cls));
        assert!(!class_graph.is_interface(string_cls));
        assert!(
            class_graph.is_assignable(string_cls, charsequence_cls),
            "java.lang.String <: java.lang.CharSequence"
        );
        assert!(
            !class_graph.is_assignable(charsequence_cls, string_cls),
            "java.lang.CharSequence </: java.lang.String"
        );
        assert!(
            class_graph.is_assignable(&BinaryName::INTEGER, &BinaryName::SERIALIZABLE),
            "java.lang.Integer <: java.io.Serializable (through java.lang.Number)"
        );
    }

    #[test]
    fn user_classes() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();

        let base = class_graph.add_class(user_class("com/example/Base", BinaryName::EXCEPTION));
        let base_name = base.name.clone();
        class_graph.add_class(user_class("com/example/Derived", base_name.clone()));
        let derived_name = BinaryName::from_str("com/example/Derived").unwrap();
        let unknown_name = BinaryName::from_str("com/example/Unknown").unwrap();

        assert!(class_graph.is_assignable(&derived_name, &base_name));
        assert!(class_graph.is_assignable(&derived_name, &BinaryName::THROWABLE));
        assert!(!class_graph.is_assignable(&base_name, &derived_name));

        // Unknown classes only have `java/lang/Object` as a super type
        assert!(class_graph.is_assignable(&unknown_name, &BinaryName::OBJECT));
        assert!(!class_graph.is_assignable(&unknown_name, &base_name));
        assert_eq!(class_graph.superclass(&unknown_name), None);

        // Re-adding a class keeps the first definition
        let again = class_graph.add_class(user_class("com/example/Base", BinaryName::OBJECT));
        assert_eq!(again.superclass, Some(BinaryName::EXCEPTION));
    }

    #[test]
    fn shared_between_threads() {
        let class_graph = ClassGraph::new();
        class_graph.insert_java_library_types();

        std::thread::scope(|scope| {
            for i in 0..4 {
                let class_graph = &class_graph;
                scope.spawn(move || {
                    let name = BinaryName::from_string(format!("com/example/C{}", i)).unwrap();
                    class_graph.add_class(ClassData::new(
                        name.clone(),
                        BinaryName::RUNTIMEEXCEPTION,
                        ClassAccessFlags::PUBLIC,
                    ));
                    assert!(class_graph.is_assignable(&name, &BinaryName::EXCEPTION));
                });
            }
        });
    }
}
