use super::{ClassData, ClassGraph};
use crate::jvm::{BinaryName, ClassAccessFlags};

const CLASS: ClassAccessFlags = ClassAccessFlags::from_bits_truncate(
    ClassAccessFlags::PUBLIC.bits() | ClassAccessFlags::SUPER.bits(),
);
const FINAL_CLASS: ClassAccessFlags = ClassAccessFlags::from_bits_truncate(
    CLASS.bits() | ClassAccessFlags::FINAL.bits(),
);
const ABSTRACT_CLASS: ClassAccessFlags = ClassAccessFlags::from_bits_truncate(
    CLASS.bits() | ClassAccessFlags::ABSTRACT.bits(),
);
const INTERFACE: ClassAccessFlags = ClassAccessFlags::from_bits_truncate(
    ClassAccessFlags::PUBLIC.bits()
        | ClassAccessFlags::INTERFACE.bits()
        | ClassAccessFlags::ABSTRACT.bits(),
);

/// Classes inside `java.*` which bytecode verification reasons about, along with the exceptions
/// that most commonly show up as catch types
///
/// Entries are `(name, superclass, interfaces, flags)` and must come after their super types.
const JAVA_CLASSES: &[(&str, &str, &[&str], ClassAccessFlags)] = &[
    ("java/io/Serializable", "java/lang/Object", &[], INTERFACE),
    ("java/lang/Cloneable", "java/lang/Object", &[], INTERFACE),
    ("java/lang/Comparable", "java/lang/Object", &[], INTERFACE),
    ("java/lang/CharSequence", "java/lang/Object", &[], INTERFACE),
    ("java/lang/Runnable", "java/lang/Object", &[], INTERFACE),
    ("java/lang/AutoCloseable", "java/lang/Object", &[], INTERFACE),
    ("java/lang/Iterable", "java/lang/Object", &[], INTERFACE),
    (
        "java/lang/String",
        "java/lang/Object",
        &[
            "java/io/Serializable",
            "java/lang/Comparable",
            "java/lang/CharSequence",
        ],
        FINAL_CLASS,
    ),
    (
        "java/lang/StringBuilder",
        "java/lang/Object",
        &["java/io/Serializable", "java/lang/CharSequence"],
        FINAL_CLASS,
    ),
    ("java/lang/Class", "java/lang/Object", &["java/io/Serializable"], FINAL_CLASS),
    ("java/lang/System", "java/lang/Object", &[], FINAL_CLASS),
    ("java/lang/Math", "java/lang/Object", &[], FINAL_CLASS),
    (
        "java/lang/Enum",
        "java/lang/Object",
        &["java/lang/Comparable", "java/io/Serializable"],
        ABSTRACT_CLASS,
    ),
    ("java/lang/Number", "java/lang/Object", &["java/io/Serializable"], ABSTRACT_CLASS),
    ("java/lang/Byte", "java/lang/Number", &["java/lang/Comparable"], FINAL_CLASS),
    ("java/lang/Short", "java/lang/Number", &["java/lang/Comparable"], FINAL_CLASS),
    ("java/lang/Integer", "java/lang/Number", &["java/lang/Comparable"], FINAL_CLASS),
    ("java/lang/Long", "java/lang/Number", &["java/lang/Comparable"], FINAL_CLASS),
    ("java/lang/Float", "java/lang/Number", &["java/lang/Comparable"], FINAL_CLASS),
    ("java/lang/Double", "java/lang/Number", &["java/lang/Comparable"], FINAL_CLASS),
    (
        "java/lang/Boolean",
        "java/lang/Object",
        &["java/io/Serializable", "java/lang/Comparable"],
        FINAL_CLASS,
    ),
    (
        "java/lang/Character",
        "java/lang/Object",
        &["java/io/Serializable", "java/lang/Comparable"],
        FINAL_CLASS,
    ),
    ("java/lang/Void", "java/lang/Object", &[], FINAL_CLASS),
    ("java/lang/invoke/MethodType", "java/lang/Object", &["java/io/Serializable"], FINAL_CLASS),
    ("java/lang/invoke/MethodHandle", "java/lang/Object", &[], ABSTRACT_CLASS),
    ("java/lang/invoke/CallSite", "java/lang/Object", &[], ABSTRACT_CLASS),
    // Throwables
    ("java/lang/Throwable", "java/lang/Object", &["java/io/Serializable"], CLASS),
    ("java/lang/Error", "java/lang/Throwable", &[], CLASS),
    ("java/lang/AssertionError", "java/lang/Error", &[], CLASS),
    ("java/lang/LinkageError", "java/lang/Error", &[], CLASS),
    ("java/lang/VirtualMachineError", "java/lang/Error", &[], ABSTRACT_CLASS),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError", &[], CLASS),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError", &[], CLASS),
    ("java/lang/Exception", "java/lang/Throwable", &[], CLASS),
    ("java/lang/InterruptedException", "java/lang/Exception", &[], CLASS),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception", &[], CLASS),
    ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException", &[], CLASS),
    ("java/lang/CloneNotSupportedException", "java/lang/Exception", &[], CLASS),
    ("java/io/IOException", "java/lang/Exception", &[], CLASS),
    ("java/io/FileNotFoundException", "java/io/IOException", &[], CLASS),
    ("java/lang/RuntimeException", "java/lang/Exception", &[], CLASS),
    ("java/io/UncheckedIOException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/ClassCastException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/NumberFormatException", "java/lang/IllegalArgumentException", &[], CLASS),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException", &[], CLASS),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
        &[],
        CLASS,
    ),
    (
        "java/lang/StringIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
        &[],
        CLASS,
    ),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/NullPointerException", "java/lang/RuntimeException", &[], CLASS),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException", &[], CLASS),
];

pub fn add_to_graph(class_graph: &ClassGraph) {
    class_graph.add_class(ClassData {
        name: BinaryName::OBJECT,
        superclass: None,
        interfaces: vec![],
        access_flags: CLASS,
    });

    for (name, superclass, interfaces, access_flags) in JAVA_CLASSES {
        let class = ClassData::new(
            BinaryName::name(*name),
            BinaryName::name(*superclass),
            *access_flags,
        )
        .with_interfaces(interfaces.iter().map(|interface| BinaryName::name(*interface)));
        class_graph.add_class(class);
    }
}
