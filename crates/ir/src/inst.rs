use bitflags::bitflags;
use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{
    lowering::{FieldInfoId, MethodInfoId, TypeIdx},
    opcode::{DfAttr, Opcode},
    SsaReg,
};

/// An opaque reference to [`InstData`].
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);
entity_impl!(InstId);

/// Marker for instructions without a lowering info record.
pub const NO_META: u32 = u32::MAX;

bitflags! {
    /// Per-instruction optimization flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptFlags: u16 {
        /// The null check of this instruction is redundant.
        const IGNORE_NULL_CHECK = 1 << 0;
        /// The range check of this instruction is redundant.
        const IGNORE_RANGE_CHECK = 1 << 1;
        /// A const or move inserted by the inliner in place of a call; its
        /// result carries the return type of the inlined method.
        const INLINED = 1 << 2;
        const IGNORE_SUSPEND_CHECK = 1 << 3;
        const IGNORE_DIV_ZERO_CHECK = 1 << 4;
    }
}

/// A MIR instruction.
///
/// Operand slots follow the bytecode formats: `v_a` is the destination or
/// first operand register, `v_b` the second register or a literal/index,
/// `v_b_wide` a 64-bit literal and `v_c` the third register or a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstData {
    pub opcode: Opcode,
    pub v_a: u32,
    pub v_b: u32,
    pub v_b_wide: u64,
    pub v_c: u32,
    pub uses: SmallVec<[SsaReg; 4]>,
    pub defs: SmallVec<[SsaReg; 2]>,
    pub opt_flags: OptFlags,
    /// Index of the field or method lowering info, or [`NO_META`].
    pub meta: u32,
    pub offset: u32,
}

impl InstData {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            v_a: 0,
            v_b: 0,
            v_b_wide: 0,
            v_c: 0,
            uses: SmallVec::new(),
            defs: SmallVec::new(),
            opt_flags: OptFlags::empty(),
            meta: NO_META,
            offset: 0,
        }
    }

    pub fn attrs(&self) -> DfAttr {
        self.opcode.attrs()
    }

    pub fn def(&self) -> Option<SsaReg> {
        self.defs.first().copied()
    }

    pub fn field_info(&self) -> Option<FieldInfoId> {
        let attrs = self.attrs();
        (attrs.intersects(DfAttr::IFIELD | DfAttr::SFIELD) && self.meta != NO_META)
            .then(|| FieldInfoId(self.meta))
    }

    pub fn method_info(&self) -> Option<MethodInfoId> {
        (self.opcode.is_invoke() && self.meta != NO_META).then(|| MethodInfoId(self.meta))
    }

    /// The type operand of allocation, cast and class-constant instructions.
    pub fn type_idx(&self) -> Option<TypeIdx> {
        match self.opcode {
            Opcode::NewInstance
            | Opcode::CheckCast
            | Opcode::ConstClass
            | Opcode::FilledNewArray => Some(TypeIdx(self.v_b)),
            Opcode::NewArray | Opcode::InstanceOf => Some(TypeIdx(self.v_c)),
            _ => None,
        }
    }

    /// The literal operand, sign extended to 64 bits.
    pub fn literal(&self) -> Option<i64> {
        match self.opcode {
            Opcode::Const => Some(i64::from(self.v_b as i32)),
            Opcode::ConstWide => Some(self.v_b_wide as i64),
            Opcode::AddIntLit
            | Opcode::RsubIntLit
            | Opcode::MulIntLit
            | Opcode::DivIntLit
            | Opcode::RemIntLit
            | Opcode::AndIntLit
            | Opcode::OrIntLit
            | Opcode::XorIntLit
            | Opcode::ShlIntLit
            | Opcode::ShrIntLit
            | Opcode::UshrIntLit => Some(i64::from(self.v_c as i32)),
            _ => None,
        }
    }

    /// Returns `true` for a `const` that loads the null reference.
    pub fn is_zero_const(&self) -> bool {
        matches!(self.opcode, Opcode::Const) && self.v_b == 0
    }

    pub fn is_phi(&self) -> bool {
        self.opcode == Opcode::Phi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_sign_extended() {
        let mut inst = InstData::new(Opcode::Const);
        inst.v_b = (-3i32) as u32;
        assert_eq!(inst.literal(), Some(-3));

        let mut inst = InstData::new(Opcode::AddIntLit);
        inst.v_c = 7;
        assert_eq!(inst.literal(), Some(7));
        assert_eq!(InstData::new(Opcode::Move).literal(), None);
    }

    #[test]
    fn meta_lookups_respect_opcode() {
        let mut inst = InstData::new(Opcode::Iget);
        inst.meta = 2;
        assert_eq!(inst.field_info(), Some(FieldInfoId(2)));
        assert_eq!(inst.method_info(), None);

        let mut inst = InstData::new(Opcode::InvokeStatic);
        assert_eq!(inst.method_info(), None);
        inst.meta = 0;
        assert_eq!(inst.method_info(), Some(MethodInfoId(0)));
    }
}
