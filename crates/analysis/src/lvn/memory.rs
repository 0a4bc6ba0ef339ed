//! Memory versions of the value numbering state.
//!
//! A load is numbered by its location and the version of the memory it
//! reads. Locations reachable through a possibly aliased reference share a
//! version per field (or per array access kind) regardless of the base, so a
//! store through one alias invalidates loads through every other. References
//! that have not escaped the method keep per-base maps which calls and
//! aliasing stores never touch.

use mirflow_ir::Opcode;
use rustc_hash::FxHashMap;

use super::{
    value_table::{KeyOp, ValueKey, ValueTable, NO_VALUE},
    ValueNumber,
};

/// Array accesses of different kinds never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ArrayKind {
    Narrow,
    Wide,
    Object,
    Boolean,
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    pub(crate) fn of(opcode: Opcode) -> Option<Self> {
        use Opcode::*;
        Some(match opcode {
            Aget | Aput => ArrayKind::Narrow,
            AgetWide | AputWide => ArrayKind::Wide,
            AgetObject | AputObject => ArrayKind::Object,
            AgetBoolean | AputBoolean => ArrayKind::Boolean,
            AgetByte | AputByte => ArrayKind::Byte,
            AgetChar | AputChar => ArrayKind::Char,
            AgetShort | AputShort => ArrayKind::Short,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MemoryState {
    global_version: ValueNumber,

    /// "Any base" version per instance field.
    ifield_versions: FxHashMap<u32, ValueNumber>,
    /// Known values of `(base, field)` under the current field version.
    ifield_values: FxHashMap<(ValueNumber, u32), ValueNumber>,
    non_aliasing_ifield_values: FxHashMap<(ValueNumber, u32), ValueNumber>,

    sfield_versions: FxHashMap<u32, ValueNumber>,
    sfield_values: FxHashMap<u32, ValueNumber>,

    array_versions: FxHashMap<ArrayKind, ValueNumber>,
    array_values: FxHashMap<(ValueNumber, ValueNumber, ArrayKind), ValueNumber>,
    non_aliasing_array_versions: FxHashMap<ValueNumber, ValueNumber>,
    non_aliasing_array_values: FxHashMap<(ValueNumber, ValueNumber), ValueNumber>,
}

impl MemoryState {
    pub(crate) fn new(table: &mut ValueTable) -> Self {
        Self {
            global_version: table.fresh(),
            ifield_versions: FxHashMap::default(),
            ifield_values: FxHashMap::default(),
            non_aliasing_ifield_values: FxHashMap::default(),
            sfield_versions: FxHashMap::default(),
            sfield_values: FxHashMap::default(),
            array_versions: FxHashMap::default(),
            array_values: FxHashMap::default(),
            non_aliasing_array_versions: FxHashMap::default(),
            non_aliasing_array_values: FxHashMap::default(),
        }
    }

    /// Any aliased location may have been written.
    pub(crate) fn bump_global(&mut self, table: &mut ValueTable) {
        self.global_version = table.fresh();
        self.ifield_versions.clear();
        self.ifield_values.clear();
        self.sfield_versions.clear();
        self.sfield_values.clear();
        self.array_versions.clear();
        self.array_values.clear();
    }

    pub(crate) fn ifield_version(&mut self, table: &mut ValueTable, field: u32) -> ValueNumber {
        let global = self.global_version.0;
        *self.ifield_versions.entry(field).or_insert_with(|| {
            table.lookup(ValueKey::new(KeyOp::IFieldVersionStart, field, global, NO_VALUE))
        })
    }

    pub(crate) fn bump_ifield(&mut self, table: &mut ValueTable, field: u32) {
        self.ifield_versions.insert(field, table.fresh());
        self.ifield_values.retain(|&(_, f), _| f != field);
    }

    pub(crate) fn iget(
        &mut self,
        table: &mut ValueTable,
        base: ValueNumber,
        field: u32,
    ) -> ValueNumber {
        if let Some(&vn) = self.ifield_values.get(&(base, field)) {
            return vn;
        }
        let version = self.ifield_version(table, field);
        let vn = table.lookup(ValueKey::new(KeyOp::IGet, base.0, field, version.0));
        self.ifield_values.insert((base, field), vn);
        vn
    }

    pub(crate) fn iput(
        &mut self,
        table: &mut ValueTable,
        base: ValueNumber,
        field: u32,
        value: ValueNumber,
    ) {
        if self.ifield_values.get(&(base, field)) == Some(&value) {
            return;
        }
        self.bump_ifield(table, field);
        self.ifield_values.insert((base, field), value);
    }

    pub(crate) fn non_aliasing_iget(
        &mut self,
        table: &mut ValueTable,
        base: ValueNumber,
        field: u32,
    ) -> ValueNumber {
        *self
            .non_aliasing_ifield_values
            .entry((base, field))
            .or_insert_with(|| {
                table.lookup(ValueKey::new(KeyOp::NonAliasingIGet, base.0, field, NO_VALUE))
            })
    }

    pub(crate) fn non_aliasing_iput(&mut self, base: ValueNumber, field: u32, value: ValueNumber) {
        self.non_aliasing_ifield_values.insert((base, field), value);
    }

    /// `base` escaped: its known field values stay valid under the current
    /// aliasing versions, its array contents are forgotten.
    pub(crate) fn escape(&mut self, table: &mut ValueTable, base: ValueNumber) {
        let fields: Vec<_> = self
            .non_aliasing_ifield_values
            .iter()
            .filter(|(&(b, _), _)| b == base)
            .map(|(&(_, f), &value)| (f, value))
            .collect();
        for (field, value) in fields {
            self.non_aliasing_ifield_values.remove(&(base, field));
            // Make sure the version the values are recorded under exists.
            self.ifield_version(table, field);
            self.ifield_values.insert((base, field), value);
        }
        self.non_aliasing_array_versions.remove(&base);
        self.non_aliasing_array_values.retain(|&(array, _), _| array != base);
    }

    pub(crate) fn sget(&mut self, table: &mut ValueTable, field: u32) -> ValueNumber {
        if let Some(&vn) = self.sfield_values.get(&field) {
            return vn;
        }
        let global = self.global_version.0;
        let version = *self.sfield_versions.entry(field).or_insert_with(|| {
            table.lookup(ValueKey::new(KeyOp::SFieldVersionStart, field, global, NO_VALUE))
        });
        let vn = table.lookup(ValueKey::new(KeyOp::SGet, field, version.0, NO_VALUE));
        self.sfield_values.insert(field, vn);
        vn
    }

    pub(crate) fn sput(&mut self, table: &mut ValueTable, field: u32, value: ValueNumber) {
        if self.sfield_values.get(&field) == Some(&value) {
            return;
        }
        self.sfield_versions.insert(field, table.fresh());
        self.sfield_values.insert(field, value);
    }

    /// Opaque static access: the field gets a new version.
    pub(crate) fn bump_sfield(&mut self, table: &mut ValueTable, field: u32) {
        self.sfield_versions.insert(field, table.fresh());
        self.sfield_values.remove(&field);
    }

    fn array_version(&mut self, table: &mut ValueTable, kind: ArrayKind) -> ValueNumber {
        let global = self.global_version.0;
        *self.array_versions.entry(kind).or_insert_with(|| {
            table.lookup(ValueKey::new(KeyOp::ArrayVersionStart, kind as u32, global, NO_VALUE))
        })
    }

    pub(crate) fn aget(
        &mut self,
        table: &mut ValueTable,
        array: ValueNumber,
        index: ValueNumber,
        kind: ArrayKind,
    ) -> ValueNumber {
        if let Some(&vn) = self.array_values.get(&(array, index, kind)) {
            return vn;
        }
        let version = self.array_version(table, kind);
        let vn = table.lookup(ValueKey::new(KeyOp::AGet, array.0, index.0, version.0));
        self.array_values.insert((array, index, kind), vn);
        vn
    }

    pub(crate) fn aput(
        &mut self,
        table: &mut ValueTable,
        array: ValueNumber,
        index: ValueNumber,
        kind: ArrayKind,
        value: ValueNumber,
    ) {
        if self.array_values.get(&(array, index, kind)) == Some(&value) {
            return;
        }
        self.array_versions.insert(kind, table.fresh());
        self.array_values.retain(|&(_, _, k), _| k != kind);
        self.array_values.insert((array, index, kind), value);
    }

    pub(crate) fn non_aliasing_aget(
        &mut self,
        table: &mut ValueTable,
        array: ValueNumber,
        index: ValueNumber,
    ) -> ValueNumber {
        if let Some(&vn) = self.non_aliasing_array_values.get(&(array, index)) {
            return vn;
        }
        let version = *self
            .non_aliasing_array_versions
            .entry(array)
            .or_insert_with(|| {
                table.lookup(ValueKey::new(
                    KeyOp::NonAliasingArrayVersionStart,
                    array.0,
                    NO_VALUE,
                    NO_VALUE,
                ))
            });
        let vn = table.lookup(ValueKey::new(KeyOp::NonAliasingAGet, array.0, index.0, version.0));
        self.non_aliasing_array_values.insert((array, index), vn);
        vn
    }

    pub(crate) fn non_aliasing_aput(
        &mut self,
        table: &mut ValueTable,
        array: ValueNumber,
        index: ValueNumber,
        value: ValueNumber,
    ) {
        if self.non_aliasing_array_values.get(&(array, index)) == Some(&value) {
            return;
        }
        // Indexes with different value numbers may still be equal.
        self.non_aliasing_array_versions.insert(array, table.fresh());
        self.non_aliasing_array_values.retain(|&(a, _), _| a != array);
        self.non_aliasing_array_values.insert((array, index), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_through_alias_invalidates_field() {
        let mut table = ValueTable::default();
        let mut mem = MemoryState::new(&mut table);
        let (a, b, v) = (table.fresh(), table.fresh(), table.fresh());

        let before = mem.iget(&mut table, b, 3);
        mem.iput(&mut table, a, 3, v);
        assert_eq!(mem.iget(&mut table, a, 3), v);
        assert_ne!(mem.iget(&mut table, b, 3), before);

        // Other fields are unaffected.
        let other = mem.iget(&mut table, b, 4);
        let w = table.fresh();
        mem.iput(&mut table, a, 3, w);
        assert_eq!(mem.iget(&mut table, b, 4), other);

        mem.bump_global(&mut table);
        assert_ne!(mem.iget(&mut table, b, 4), other);
    }

    #[test]
    fn redundant_store_keeps_version() {
        let mut table = ValueTable::default();
        let mut mem = MemoryState::new(&mut table);
        let (a, b) = (table.fresh(), table.fresh());

        let loaded = mem.iget(&mut table, a, 0);
        let other = mem.iget(&mut table, b, 0);
        mem.iput(&mut table, a, 0, loaded);
        assert_eq!(mem.iget(&mut table, b, 0), other);
    }

    #[test]
    fn escaped_values_survive_until_aliasing_write() {
        let mut table = ValueTable::default();
        let mut mem = MemoryState::new(&mut table);
        let (obj, v, other_base, w) = (table.fresh(), table.fresh(), table.fresh(), table.fresh());

        mem.non_aliasing_iput(obj, 1, v);
        mem.bump_global(&mut table);
        assert_eq!(mem.non_aliasing_iget(&mut table, obj, 1), v);

        mem.escape(&mut table, obj);
        assert_eq!(mem.iget(&mut table, obj, 1), v);
        mem.iput(&mut table, other_base, 1, w);
        assert_ne!(mem.iget(&mut table, obj, 1), v);
    }

    #[test]
    fn array_kinds_do_not_alias() {
        let mut table = ValueTable::default();
        let mut mem = MemoryState::new(&mut table);
        let (arr, idx, v) = (table.fresh(), table.fresh(), table.fresh());

        let ints = mem.aget(&mut table, arr, idx, ArrayKind::Narrow);
        mem.aput(&mut table, arr, idx, ArrayKind::Object, v);
        assert_eq!(mem.aget(&mut table, arr, idx, ArrayKind::Narrow), ints);
        assert_eq!(mem.aget(&mut table, arr, idx, ArrayKind::Object), v);
    }
}
