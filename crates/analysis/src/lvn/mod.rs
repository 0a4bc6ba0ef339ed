//! Local value numbering.
//!
//! Instructions are numbered in program order over an extended basic block.
//! Two instructions computing the same operation on congruent operands, and
//! loads of the same location under the same memory version, receive the
//! same [`ValueNumber`]. As a side effect, null and range checks proven
//! redundant are marked on the instructions through [`OptFlags`]; nothing
//! is removed from the graph.

mod driver;
mod memory;
mod value_table;

pub use driver::{run_local_value_numbering, LvnResult};

use cranelift_entity::entity_impl;
use mirflow_ir::{DfAttr, InstData, InstId, MirGraph, Opcode, OptFlags, SsaReg};
use rustc_hash::{FxHashMap, FxHashSet};

use memory::{ArrayKind, MemoryState};
use value_table::{KeyOp, ValueKey, ValueTable, NO_VALUE};

/// A value number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueNumber(u32);
entity_impl!(ValueNumber, "v");

#[derive(Debug, Clone)]
pub struct LocalValueNumbering {
    table: ValueTable,
    sreg_values: FxHashMap<SsaReg, ValueNumber>,
    /// References that cannot be reached from anywhere but this method.
    non_aliasing_refs: FxHashSet<ValueNumber>,
    null_checked: FxHashSet<ValueNumber>,
    range_checked: FxHashSet<(ValueNumber, ValueNumber)>,
    /// Values held by some register.
    available: FxHashSet<ValueNumber>,
    memory: MemoryState,
    /// The previous instruction was a `filled-new-array`.
    pending_filled_new_array: bool,
}

impl LocalValueNumbering {
    pub fn new(graph: &MirGraph) -> Self {
        let mut table = ValueTable::default();
        let memory = MemoryState::new(&mut table);
        let mut lvn = Self {
            table,
            sreg_values: FxHashMap::default(),
            non_aliasing_refs: FxHashSet::default(),
            null_checked: FxHashSet::default(),
            range_checked: FxHashSet::default(),
            available: FxHashSet::default(),
            memory,
            pending_filled_new_array: false,
        };

        if !graph.method.is_static {
            let this = lvn.operand_value(SsaReg(graph.in_regs().start));
            lvn.null_checked.insert(this);
        }
        lvn
    }

    /// The value number of `reg`. A register not defined in the scope seen
    /// so far gets a value unique to it.
    pub fn operand_value(&mut self, reg: SsaReg) -> ValueNumber {
        if let Some(&vn) = self.sreg_values.get(&reg) {
            return vn;
        }
        let vn = self.table.lookup(ValueKey::reg(reg));
        self.set_operand_value(reg, vn);
        vn
    }

    pub fn set_operand_value(&mut self, reg: SsaReg, vn: ValueNumber) {
        self.sreg_values.insert(reg, vn);
        self.available.insert(vn);
    }

    pub fn is_null_checked(&self, vn: ValueNumber) -> bool {
        self.null_checked.contains(&vn)
    }

    pub fn is_non_aliasing(&self, vn: ValueNumber) -> bool {
        self.non_aliasing_refs.contains(&vn)
    }

    pub(crate) fn watermark(&self) -> u32 {
        self.table.watermark()
    }

    pub(crate) fn resume_from(&mut self, watermark: u32) {
        self.table.resume_from(watermark);
    }

    /// Numbers `inst` and records its value on the defined register.
    ///
    /// Returns `None` for instructions without a result. Redundant null and
    /// range checks are flagged on the instruction.
    pub fn get_value_number(&mut self, graph: &mut MirGraph, inst: InstId) -> Option<ValueNumber> {
        self.number(graph, inst).0
    }

    /// Like [`Self::get_value_number`], also telling whether the result was
    /// already held by a register before `inst`.
    pub(crate) fn number(
        &mut self,
        graph: &mut MirGraph,
        inst: InstId,
    ) -> (Option<ValueNumber>, bool) {
        let data = graph.inst(inst).clone();
        let [a, b, c] = slot_uses(&data);
        let after_filled_new_array = std::mem::take(&mut self.pending_filled_new_array);
        let mut flags = OptFlags::empty();

        use Opcode::*;
        let res = match data.opcode {
            Nop | MirNop | Goto | ReturnVoid | Return | ReturnWide | ReturnObject | PackedSwitch
            | SparseSwitch | IfEq | IfNe | IfLt | IfGe | IfGt | IfLe | IfEqz | IfNez | IfLtz
            | IfGez | IfGtz | IfLez | FusedCmplFloat | FusedCmpgFloat | FusedCmplDouble
            | FusedCmpgDouble | FusedCmpLong | CheckCast => None,

            Const => Some(self.lookup(KeyOp::Const, data.v_b, NO_VALUE, NO_VALUE)),
            ConstWide => {
                let bits = data.v_b_wide;
                Some(self.lookup(KeyOp::ConstWide, bits as u32, (bits >> 32) as u32, NO_VALUE))
            }
            ConstString | ConstClass => {
                let op = if data.opcode == ConstString {
                    KeyOp::ConstString
                } else {
                    KeyOp::ConstClass
                };
                let vn = self.lookup(op, data.v_b, NO_VALUE, NO_VALUE);
                self.null_checked.insert(vn);
                self.non_aliasing_refs.insert(vn);
                Some(vn)
            }

            Move | MoveWide | MoveObject | Copy => Some(self.operand_value(operand(b))),
            MoveResultObject if after_filled_new_array => {
                Some(self.mark_non_aliasing_non_null(&data))
            }
            MoveResult | MoveResultWide | MoveResultObject | InstanceOf => {
                Some(self.unique_value(&data))
            }
            MoveException | NewInstance => Some(self.mark_non_aliasing_non_null(&data)),
            NewArray => {
                let array = self.mark_non_aliasing_non_null(&data);
                let length = self.operand_value(operand(b));
                self.table
                    .insert(ValueKey::new(KeyOp::ArrayLength, array.0, NO_VALUE, NO_VALUE), length);
                Some(array)
            }
            ArrayLength => {
                let array = self.operand_value(operand(b));
                self.null_check(array, &mut flags);
                Some(self.lookup(KeyOp::ArrayLength, array.0, NO_VALUE, NO_VALUE))
            }

            Phi => {
                let inputs: Vec<_> = data.uses.iter().map(|&r| self.operand_value(r)).collect();
                match inputs.split_first() {
                    Some((&first, rest)) if rest.iter().all(|&vn| vn == first) => Some(first),
                    _ => Some(self.unique_value(&data)),
                }
            }

            NullCheck => {
                let obj = self.operand_value(operand(a));
                self.null_check(obj, &mut flags);
                None
            }
            MonitorEnter | MonitorExit => {
                let obj = self.operand_value(operand(a));
                self.null_check(obj, &mut flags);
                self.memory.bump_global(&mut self.table);
                None
            }
            Throw => {
                let obj = self.operand_value(operand(a));
                self.escape(obj);
                None
            }
            FilledNewArray => {
                for &arg in &data.uses {
                    let vn = self.operand_value(arg);
                    self.escape(vn);
                }
                self.pending_filled_new_array = true;
                None
            }
            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeStatic | InvokeInterface => {
                self.handle_invoke(&data, &mut flags);
                None
            }

            Aget | AgetWide | AgetObject | AgetBoolean | AgetByte | AgetChar | AgetShort => {
                Some(self.handle_aget(&data, operand(b), operand(c), &mut flags))
            }
            Aput | AputWide | AputObject | AputBoolean | AputByte | AputChar | AputShort => {
                self.handle_aput(&data, operand(a), operand(b), operand(c), &mut flags);
                None
            }
            Iget | IgetWide | IgetObject | IgetBoolean | IgetByte | IgetChar | IgetShort => {
                Some(self.handle_iget(graph, inst, &data, operand(b), &mut flags))
            }
            Iput | IputWide | IputObject | IputBoolean | IputByte | IputChar | IputShort => {
                self.handle_iput(graph, inst, &data, operand(a), operand(b), &mut flags);
                None
            }
            Sget | SgetWide | SgetObject | SgetBoolean | SgetByte | SgetChar | SgetShort => {
                Some(self.handle_sget(graph, inst, &data))
            }
            Sput | SputWide | SputObject | SputBoolean | SputByte | SputChar | SputShort => {
                self.handle_sput(graph, inst, &data, operand(a));
                None
            }

            NegInt | NotInt | NegLong | NotLong | NegFloat | NegDouble | IntToLong | IntToFloat
            | IntToDouble | LongToInt | LongToFloat | LongToDouble | FloatToInt | FloatToLong
            | FloatToDouble | DoubleToInt | DoubleToLong | DoubleToFloat | IntToByte
            | IntToChar | IntToShort => {
                let src = self.operand_value(operand(b));
                Some(self.lookup(KeyOp::Op(data.opcode), src.0, NO_VALUE, NO_VALUE))
            }

            AddIntLit | RsubIntLit | MulIntLit | DivIntLit | RemIntLit | AndIntLit | OrIntLit
            | XorIntLit | ShlIntLit | ShrIntLit | UshrIntLit => {
                let src = self.operand_value(operand(b));
                Some(self.lookup(KeyOp::Op(data.opcode), src.0, NO_VALUE, data.v_c))
            }

            CmplFloat | CmpgFloat | CmplDouble | CmpgDouble | CmpLong | AddInt | SubInt
            | MulInt | DivInt | RemInt | AndInt | OrInt | XorInt | ShlInt | ShrInt | UshrInt
            | AddLong | SubLong | MulLong | DivLong | RemLong | AndLong | OrLong | XorLong
            | ShlLong | ShrLong | UshrLong | AddFloat | SubFloat | MulFloat | DivFloat
            | RemFloat | AddDouble | SubDouble | MulDouble | DivDouble | RemDouble => {
                let mut lhs = self.operand_value(operand(b));
                let mut rhs = self.operand_value(operand(c));
                if data.opcode.is_commutative() && rhs < lhs {
                    std::mem::swap(&mut lhs, &mut rhs);
                }
                Some(self.lookup(KeyOp::Op(data.opcode), lhs.0, rhs.0, NO_VALUE))
            }
        };

        if !flags.is_empty() {
            graph.inst_mut(inst).opt_flags |= flags;
        }
        let mut was_available = false;
        if let (Some(vn), Some(def)) = (res, data.def()) {
            was_available = self.available.contains(&vn);
            self.set_operand_value(def, vn);
        }
        (res, was_available)
    }

    fn lookup(&mut self, op: KeyOp, a: u32, b: u32, modifier: u32) -> ValueNumber {
        self.table.lookup(ValueKey::new(op, a, b, modifier))
    }

    /// Records a null check of `vn`; flags it if already performed.
    fn null_check(&mut self, vn: ValueNumber, flags: &mut OptFlags) {
        if !self.null_checked.insert(vn) {
            *flags |= OptFlags::IGNORE_NULL_CHECK;
        }
    }

    fn range_check(&mut self, array: ValueNumber, index: ValueNumber, flags: &mut OptFlags) {
        if !self.range_checked.insert((array, index)) {
            *flags |= OptFlags::IGNORE_RANGE_CHECK;
        }
    }

    fn mark_non_aliasing_non_null(&mut self, data: &InstData) -> ValueNumber {
        let vn = self.unique_value(data);
        self.null_checked.insert(vn);
        self.non_aliasing_refs.insert(vn);
        vn
    }

    fn escape(&mut self, vn: ValueNumber) {
        if self.non_aliasing_refs.remove(&vn) {
            self.memory.escape(&mut self.table, vn);
        }
    }

    fn handle_invoke(&mut self, data: &InstData, flags: &mut OptFlags) {
        if data.attrs().contains(DfAttr::NULL_CHK_OUT0) {
            if let Some(&receiver) = data.uses.first() {
                let vn = self.operand_value(receiver);
                self.null_check(vn, flags);
            }
        }
        for &arg in &data.uses {
            let vn = self.operand_value(arg);
            self.escape(vn);
        }
        self.memory.bump_global(&mut self.table);
    }

    fn handle_aget(
        &mut self,
        data: &InstData,
        array: SsaReg,
        index: SsaReg,
        flags: &mut OptFlags,
    ) -> ValueNumber {
        let array = self.operand_value(array);
        let index = self.operand_value(index);
        self.null_check(array, flags);
        self.range_check(array, index, flags);

        let kind = ArrayKind::of(data.opcode).expect("array access opcode");
        if self.is_non_aliasing(array) {
            self.memory.non_aliasing_aget(&mut self.table, array, index)
        } else {
            self.memory.aget(&mut self.table, array, index, kind)
        }
    }

    fn handle_aput(
        &mut self,
        data: &InstData,
        value: SsaReg,
        array: SsaReg,
        index: SsaReg,
        flags: &mut OptFlags,
    ) {
        let value = self.operand_value(value);
        let array = self.operand_value(array);
        let index = self.operand_value(index);
        self.null_check(array, flags);
        self.range_check(array, index, flags);

        let kind = ArrayKind::of(data.opcode).expect("array access opcode");
        if kind == ArrayKind::Object {
            self.escape(value);
        }
        if self.is_non_aliasing(array) {
            self.memory.non_aliasing_aput(&mut self.table, array, index, value);
        } else {
            self.memory.aput(&mut self.table, array, index, kind, value);
        }
    }

    fn handle_iget(
        &mut self,
        graph: &MirGraph,
        inst: InstId,
        data: &InstData,
        base: SsaReg,
        flags: &mut OptFlags,
    ) -> ValueNumber {
        let base = self.operand_value(base);
        self.null_check(base, flags);

        match graph.field_info_of(inst) {
            Some(info) if !info.is_opaque() => {
                if self.is_non_aliasing(base) {
                    self.memory.non_aliasing_iget(&mut self.table, base, info.field_idx)
                } else {
                    self.memory.iget(&mut self.table, base, info.field_idx)
                }
            }
            info => {
                // A volatile load has acquire semantics.
                if info.is_some_and(|info| info.is_volatile) {
                    self.memory.bump_global(&mut self.table);
                }
                self.unique_value(data)
            }
        }
    }

    fn handle_iput(
        &mut self,
        graph: &MirGraph,
        inst: InstId,
        data: &InstData,
        value: SsaReg,
        base: SsaReg,
        flags: &mut OptFlags,
    ) {
        let value = self.operand_value(value);
        let base = self.operand_value(base);
        self.null_check(base, flags);
        if data.opcode == Opcode::IputObject {
            self.escape(value);
        }

        match graph.field_info_of(inst) {
            Some(info) if !info.is_opaque() => {
                if self.is_non_aliasing(base) {
                    self.memory.non_aliasing_iput(base, info.field_idx, value);
                } else {
                    self.memory.iput(&mut self.table, base, info.field_idx, value);
                }
            }
            Some(info) if info.is_resolved => {
                self.escape(base);
                self.memory.bump_ifield(&mut self.table, info.field_idx);
            }
            _ => {
                self.escape(base);
                self.memory.bump_global(&mut self.table);
            }
        }
    }

    fn handle_sget(&mut self, graph: &MirGraph, inst: InstId, data: &InstData) -> ValueNumber {
        match graph.field_info_of(inst) {
            Some(info) if !info.is_opaque() => self.memory.sget(&mut self.table, info.field_idx),
            info => {
                if info.is_some_and(|info| info.is_volatile) {
                    self.memory.bump_global(&mut self.table);
                }
                self.unique_value(data)
            }
        }
    }

    fn handle_sput(&mut self, graph: &MirGraph, inst: InstId, data: &InstData, value: SsaReg) {
        let value = self.operand_value(value);
        if data.opcode == Opcode::SputObject {
            self.escape(value);
        }

        match graph.field_info_of(inst) {
            Some(info) if !info.is_opaque() => {
                self.memory.sput(&mut self.table, info.field_idx, value)
            }
            Some(info) if info.is_resolved => {
                self.memory.bump_sfield(&mut self.table, info.field_idx)
            }
            _ => self.memory.bump_global(&mut self.table),
        }
    }

    /// A value that is never congruent to any other. The defined register
    /// may already have been read by a loop-head phi, so the register key
    /// must not be reused.
    fn unique_value(&mut self, data: &InstData) -> ValueNumber {
        debug_assert!(data.def().is_some(), "instruction without a result register");
        self.table.fresh()
    }
}

/// The low SSA name used by each of the `A`, `B` and `C` slots.
fn slot_uses(data: &InstData) -> [Option<SsaReg>; 3] {
    let attrs = data.attrs();
    if attrs.intersects(DfAttr::FORMAT_35C | DfAttr::NULL_TRANSFER_N) {
        return [None; 3];
    }

    let a_wide = !attrs.contains(DfAttr::DA) && attrs.contains(DfAttr::A_WIDE);
    let layout = [
        (DfAttr::UA, a_wide),
        (DfAttr::UB, attrs.contains(DfAttr::B_WIDE)),
        (DfAttr::UC, attrs.contains(DfAttr::C_WIDE)),
    ];
    let mut slots = [None; 3];
    let mut pos = 0;
    for (slot, (used, wide)) in slots.iter_mut().zip(layout) {
        if !attrs.contains(used) {
            continue;
        }
        *slot = data.uses.get(pos).copied();
        pos += if wide { 2 } else { 1 };
    }
    slots
}

fn operand(slot: Option<SsaReg>) -> SsaReg {
    slot.expect("operand slot without an SSA use")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirflow_ir::{builder::test_util::TestGraphBuilder, FieldLoweringInfo, MethodDesc};

    fn number_block(graph: &mut MirGraph) -> Vec<Option<ValueNumber>> {
        let block = graph.entry().unwrap();
        let insts = graph.block(block).insts.clone();
        let mut lvn = LocalValueNumbering::new(graph);
        insts
            .into_iter()
            .map(|inst| lvn.get_value_number(graph, inst))
            .collect()
    }

    #[test]
    fn congruent_arithmetic() {
        let mut b = TestGraphBuilder::new(2);
        let entry = b.entry();
        b.op(entry, Opcode::AddInt, 2, &[0, 1]);
        b.op(entry, Opcode::AddInt, 3, &[1, 0]);
        b.op(entry, Opcode::SubInt, 4, &[0, 1]);
        b.op(entry, Opcode::SubInt, 5, &[1, 0]);
        b.move_(entry, Opcode::Move, 6, 4);
        b.const_(entry, 7, 5);
        b.const_(entry, 8, 5);
        b.const_wide(entry, 9, 5);
        let mut graph = b.build();

        let vns = number_block(&mut graph);
        assert_eq!(vns[0], vns[1]);
        assert_ne!(vns[2], vns[3]);
        assert_eq!(vns[4], vns[2]);
        assert_eq!(vns[5], vns[6]);
        assert_ne!(vns[5], vns[7]);
    }

    #[test]
    fn redundant_null_and_range_checks() {
        let mut b = TestGraphBuilder::new(2);
        let entry = b.entry();
        let f = b.field("LFoo;", "I");
        let g = b.field("LFoo;", "I");
        // s0: object, s1: int[] array
        let first = b.iget(entry, Opcode::Iget, 2, 0, f);
        let second = b.iget(entry, Opcode::Iget, 3, 0, g);
        b.const_(entry, 4, 1);
        let load = b.aget(entry, Opcode::Aget, 5, 1, 4);
        let store = b.aput(entry, Opcode::Aput, 2, 1, 4);
        let length = b.array_length(entry, 6, 1);
        let mut graph = b.build();

        number_block(&mut graph);
        assert_eq!(graph.inst(first).opt_flags, OptFlags::empty());
        assert_eq!(graph.inst(second).opt_flags, OptFlags::IGNORE_NULL_CHECK);
        assert_eq!(graph.inst(load).opt_flags, OptFlags::empty());
        assert_eq!(
            graph.inst(store).opt_flags,
            OptFlags::IGNORE_NULL_CHECK | OptFlags::IGNORE_RANGE_CHECK
        );
        assert_eq!(graph.inst(length).opt_flags, OptFlags::IGNORE_NULL_CHECK);
    }

    #[test]
    fn receiver_is_non_null() {
        let method = MethodDesc::new("get", "LFoo;", false, &[], "I");
        let mut b = TestGraphBuilder::with_method(method, 1);
        let entry = b.entry();
        let f = b.field("LFoo;", "I");
        let load = b.iget(entry, Opcode::Iget, 1, 0, f);
        let mut graph = b.build();

        number_block(&mut graph);
        assert_eq!(graph.inst(load).opt_flags, OptFlags::IGNORE_NULL_CHECK);
    }

    #[test]
    fn store_forwarding_and_aliasing() {
        let mut b = TestGraphBuilder::new(3);
        let entry = b.entry();
        let f = b.field("LFoo;", "I");
        // s0, s1: possibly aliasing objects, s2: value
        b.iput(entry, Opcode::Iput, 2, 0, f);
        b.iget(entry, Opcode::Iget, 3, 0, f);
        b.iget(entry, Opcode::Iget, 4, 1, f);
        b.iput(entry, Opcode::Iput, 2, 1, f);
        b.iget(entry, Opcode::Iget, 5, 0, f);
        b.iget(entry, Opcode::Iget, 6, 1, f);
        let mut graph = b.build();

        let mut lvn = LocalValueNumbering::new(&graph);
        let insts = graph.block(graph.entry().unwrap()).insts.clone();
        let vns: Vec<_> = insts
            .iter()
            .map(|&inst| lvn.get_value_number(&mut graph, inst))
            .collect();
        let value = lvn.operand_value(SsaReg(2));

        assert_eq!(vns[1], Some(value));
        assert_ne!(vns[2], Some(value));
        // s0.f may have been overwritten by the store through s1.
        assert_ne!(vns[4], Some(value));
        assert_ne!(vns[4], vns[2]);
        assert_eq!(vns[5], Some(value));
    }

    #[test]
    fn calls_clobber_aliased_memory_only() {
        let mut b = TestGraphBuilder::new(1);
        let entry = b.entry();
        let f = b.field("LFoo;", "I");
        let m = b.method("LBar;", &[], "V");
        b.new_instance(entry, 1, "LFoo;");
        b.iget(entry, Opcode::Iget, 2, 1, f);
        b.iget(entry, Opcode::Iget, 3, 0, f);
        b.invoke(entry, Opcode::InvokeStatic, m, &[]);
        b.iget(entry, Opcode::Iget, 4, 1, f);
        b.iget(entry, Opcode::Iget, 5, 0, f);
        b.invoke(entry, Opcode::InvokeStatic, m, &[1]);
        b.invoke(entry, Opcode::InvokeStatic, m, &[]);
        b.iget(entry, Opcode::Iget, 6, 1, f);
        let mut graph = b.build();

        let vns = number_block(&mut graph);
        assert_eq!(vns[1], vns[4]);
        assert_ne!(vns[2], vns[5]);
        assert_ne!(vns[1], vns[8]);
    }

    #[test]
    fn volatile_and_unresolved_fields_are_fresh() {
        let mut b = TestGraphBuilder::new(1);
        let entry = b.entry();
        let v = b.field_info(FieldLoweringInfo::instance(0, "LFoo;", "I").volatile());
        let u = b.field_info(FieldLoweringInfo::static_field(1, "LFoo;", "I").unresolved());
        let s = b.static_field("LFoo;", "I");
        b.iget(entry, Opcode::Iget, 1, 0, v);
        b.iget(entry, Opcode::Iget, 2, 0, v);
        b.sget(entry, Opcode::Sget, 3, s);
        b.sget(entry, Opcode::Sget, 4, u);
        b.sget(entry, Opcode::Sget, 5, u);
        b.sget(entry, Opcode::Sget, 6, s);
        b.sput(entry, Opcode::Sput, 1, u);
        b.sget(entry, Opcode::Sget, 7, s);
        let mut graph = b.build();

        let vns = number_block(&mut graph);
        assert_ne!(vns[0], vns[1]);
        assert_ne!(vns[3], vns[4]);
        assert_eq!(vns[2], vns[5]);
        assert_ne!(vns[5], vns[7]);
    }

    #[test]
    fn new_array_length_is_known() {
        let mut b = TestGraphBuilder::new(1);
        let entry = b.entry();
        b.new_array(entry, 1, 0, "[I");
        let length = b.array_length(entry, 2, 1);
        b.move_(entry, Opcode::MoveObject, 3, 1);
        b.array_length(entry, 4, 3);
        let mut graph = b.build();

        let block = graph.entry().unwrap();
        let insts = graph.block(block).insts.clone();
        let mut lvn = LocalValueNumbering::new(&graph);
        let vns: Vec<_> = insts
            .iter()
            .map(|&inst| lvn.get_value_number(&mut graph, inst))
            .collect();
        let size = lvn.operand_value(SsaReg(0));
        assert_eq!(vns[1], Some(size));
        assert_eq!(vns[3], Some(size));
        assert_eq!(graph.inst(length).opt_flags, OptFlags::IGNORE_NULL_CHECK);
    }

    #[test]
    fn filled_new_array_result_is_non_aliasing() {
        let mut b = TestGraphBuilder::new(1);
        let entry = b.entry();
        b.new_instance(entry, 1, "LFoo;");
        b.filled_new_array(entry, "[LFoo;", &[1]);
        b.def(entry, Opcode::MoveResultObject, 2);
        let mut graph = b.build();

        let block = graph.entry().unwrap();
        let insts = graph.block(block).insts.clone();
        let mut lvn = LocalValueNumbering::new(&graph);
        let vns: Vec<_> = insts
            .iter()
            .map(|&inst| lvn.get_value_number(&mut graph, inst))
            .collect();

        let (object, array) = (vns[0].unwrap(), vns[2].unwrap());
        assert!(!lvn.is_non_aliasing(object));
        assert!(lvn.is_non_aliasing(array));
        assert!(lvn.is_null_checked(array));
    }
}
