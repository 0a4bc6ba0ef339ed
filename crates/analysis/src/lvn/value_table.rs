use mirflow_ir::{Opcode, SsaReg};
use rustc_hash::FxHashMap;

use super::ValueNumber;

/// Operation part of a congruence key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum KeyOp {
    /// A computation by the opcode itself.
    Op(Opcode),
    Const,
    ConstWide,
    ConstString,
    ConstClass,
    /// Value of an SSA register read before any definition in scope.
    Reg,
    ArrayLength,
    IFieldVersionStart,
    SFieldVersionStart,
    ArrayVersionStart,
    NonAliasingArrayVersionStart,
    IGet,
    NonAliasingIGet,
    SGet,
    AGet,
    NonAliasingAGet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ValueKey {
    op: KeyOp,
    a: u32,
    b: u32,
    modifier: u32,
}

impl ValueKey {
    pub(crate) fn new(op: KeyOp, a: u32, b: u32, modifier: u32) -> Self {
        Self { op, a, b, modifier }
    }

    pub(crate) fn reg(reg: SsaReg) -> Self {
        Self::new(KeyOp::Reg, reg.0, 0, 0)
    }
}

/// Placeholder operand of keys that use fewer than three operands.
pub(crate) const NO_VALUE: u32 = u32::MAX;

/// The congruence table: equal keys map to equal value numbers.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValueTable {
    values: FxHashMap<ValueKey, ValueNumber>,
    next: u32,
}

impl ValueTable {
    pub(crate) fn lookup(&mut self, key: ValueKey) -> ValueNumber {
        if let Some(&vn) = self.values.get(&key) {
            return vn;
        }
        let vn = self.fresh();
        self.values.insert(key, vn);
        vn
    }

    /// Records `vn` as the value of `key` unless the key is already known.
    pub(crate) fn insert(&mut self, key: ValueKey, vn: ValueNumber) {
        self.values.entry(key).or_insert(vn);
    }

    /// A value number not congruent to any other.
    pub(crate) fn fresh(&mut self) -> ValueNumber {
        let vn = ValueNumber(self.next);
        self.next += 1;
        vn
    }

    /// Number of value numbers allocated so far.
    pub(crate) fn watermark(&self) -> u32 {
        self.next
    }

    /// Continues numbering at `watermark` so that values allocated on a
    /// sibling path are never reused.
    pub(crate) fn resume_from(&mut self, watermark: u32) {
        self.next = self.next.max(watermark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_share_values() {
        let mut table = ValueTable::default();
        let add = ValueKey::new(KeyOp::Op(Opcode::AddInt), 1, 2, NO_VALUE);
        let a = table.lookup(add);
        let b = table.lookup(ValueKey::new(KeyOp::Op(Opcode::SubInt), 1, 2, NO_VALUE));
        assert_ne!(a, b);
        assert_eq!(table.lookup(add), a);

        let fresh = table.fresh();
        assert!(fresh != a && fresh != b);

        let mut sibling = table.clone();
        let taken = table.fresh();
        sibling.resume_from(table.watermark());
        assert!(sibling.fresh() > taken);
    }
}
