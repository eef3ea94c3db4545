use super::{ConstantData, FieldRef, InvokeDynamicRef, MethodRef};
use crate::jvm::{BinaryName, RefType};
use std::collections::HashMap;

/// Resolution of the constant pool operands of instructions
///
/// Indices are the raw `u16` indices found in the code array. `None` means the entry is either
/// missing or is not of the requested kind.
pub trait ConstantPool {
    /// `CONSTANT_Class` (for `new`, `anewarray`, `checkcast`, `instanceof`, `multianewarray`)
    fn class(&self, index: u16) -> Option<RefType<BinaryName>>;

    /// Loadable constant (for `ldc`, `ldc_w`, `ldc2_w`)
    fn loadable(&self, index: u16) -> Option<ConstantData>;

    /// `CONSTANT_Fieldref`
    fn field(&self, index: u16) -> Option<FieldRef>;

    /// `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`
    fn method(&self, index: u16) -> Option<MethodRef>;

    /// `CONSTANT_InvokeDynamic`
    fn invoke_dynamic(&self, index: u16) -> Option<InvokeDynamicRef>;
}

/// Entry in a [`ConstantTable`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantEntry {
    Class(RefType<BinaryName>),
    Loadable(ConstantData),
    Field(FieldRef),
    Method(MethodRef),
    InvokeDynamic(InvokeDynamicRef),
}

/// Constant pool holding already resolved entries
///
/// This is enough to verify code that was assembled or decoded elsewhere, without carrying around
/// the raw `CONSTANT_Utf8`/`CONSTANT_NameAndType` indirections of a class file.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    entries: HashMap<u16, ConstantEntry>,
}

impl ConstantTable {
    pub fn new() -> ConstantTable {
        ConstantTable {
            entries: HashMap::new(),
        }
    }

    /// Set the entry at an index, returning the previous entry there
    pub fn insert(&mut self, index: u16, entry: ConstantEntry) -> Option<ConstantEntry> {
        self.entries.insert(index, entry)
    }

    pub fn get(&self, index: u16) -> Option<&ConstantEntry> {
        self.entries.get(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConstantPool for ConstantTable {
    fn class(&self, index: u16) -> Option<RefType<BinaryName>> {
        match self.get(index)? {
            ConstantEntry::Class(class) => Some(class.clone()),
            _ => None,
        }
    }

    fn loadable(&self, index: u16) -> Option<ConstantData> {
        match self.get(index)? {
            ConstantEntry::Class(class) => Some(ConstantData::Class(class.clone())),
            ConstantEntry::Loadable(constant) => Some(constant.clone()),
            _ => None,
        }
    }

    fn field(&self, index: u16) -> Option<FieldRef> {
        match self.get(index)? {
            ConstantEntry::Field(field) => Some(field.clone()),
            _ => None,
        }
    }

    fn method(&self, index: u16) -> Option<MethodRef> {
        match self.get(index)? {
            ConstantEntry::Method(method) => Some(method.clone()),
            _ => None,
        }
    }

    fn invoke_dynamic(&self, index: u16) -> Option<InvokeDynamicRef> {
        match self.get(index)? {
            ConstantEntry::InvokeDynamic(indy) => Some(indy.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entries_by_kind() {
        let mut table = ConstantTable::new();
        table.insert(1, ConstantEntry::Class(RefType::STRING));
        table.insert(2, ConstantEntry::Loadable(ConstantData::Integer(42)));

        assert_eq!(table.class(1), Some(RefType::STRING));
        assert_eq!(table.loadable(1), Some(ConstantData::Class(RefType::STRING)));
        assert_eq!(table.loadable(2), Some(ConstantData::Integer(42)));
        assert_eq!(table.class(2), None);
        assert_eq!(table.field(1), None);
        assert_eq!(table.method(3), None);
        assert_eq!(table.len(), 2);
    }
}
