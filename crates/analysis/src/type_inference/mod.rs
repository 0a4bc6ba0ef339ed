//! Type inference of SSA registers.
//!
//! Bytecode registers carry no declared type, so the width, category and
//! array shape of every SSA register is reconstructed from its definitions
//! and uses. The first phase makes a single pass over the reachable blocks
//! and seeds the types that instruction semantics fix directly. The second
//! phase propagates types through phis, moves and array accesses until no
//! type changes; every merge only adds bits, so the iteration terminates.
//!
//! Registers used both as 32-bit and 64-bit values make the method fall back
//! to the interpreter. Registers used in more than one category only disable
//! the optimizations relying on consistent types.

mod check_cast;
mod signature;
mod ty;

pub use check_cast::CheckCastData;
pub use signature::Signature;
pub use ty::{SsaType, TypeFlags, ARRAY_TYPE_SHIFT, MAX_ARRAY_DEPTH};

use cranelift_entity::SecondaryMap;
use mirflow_ir::{
    BlockId, DfAttr, DisableOpt, FieldInfoId, InstData, InstId, MethodInfoId, MirGraph, Opcode,
    OptFlags, RegLocation, SsaReg,
};
use smallvec::SmallVec;

use crate::{domtree::DFSet, liveness::Liveness, topo_order::TopologicalOrder};

/// Attributes of the instructions the propagation phase looks at.
const PROPAGATING: DfAttr = DfAttr::NULL_TRANSFER_N
    .union(DfAttr::CHK_CAST)
    .union(DfAttr::IS_MOVE)
    .union(DfAttr::HAS_RANGE_CHKS)
    .union(DfAttr::SAME_TYPE_AB);

/// Upper bound on the number of times a single register can change.
const LATTICE_HEIGHT: u32 = 16;

pub struct TypeInference {
    types: SecondaryMap<SsaReg, SsaType>,
    /// Names below this bound come from the graph; the rest are synthetic.
    num_original: u32,
    check_casts: CheckCastData,
    block_attrs: SecondaryMap<BlockId, DfAttr>,
    method_signature: Signature,
    signatures: SecondaryMap<MethodInfoId, Signature>,
    field_types: SecondaryMap<FieldInfoId, SsaType>,
    rounds: u32,
}

impl TypeInference {
    /// Splits registers at check-casts and seeds the initial types.
    pub fn new(graph: &MirGraph, frontiers: &DFSet, topo: &TopologicalOrder) -> Self {
        let mut liveness = Liveness::new();
        liveness.compute(graph);

        let num_original = graph.num_ssa_regs();
        let mut check_casts = CheckCastData::new(num_original);
        for &block in topo.order() {
            for &inst in &graph.block(block).insts {
                let data = graph.inst(inst);
                if data.opcode == Opcode::CheckCast {
                    let cast_type = descriptor_type(graph, data);
                    check_casts.add_check_cast(graph, &liveness, block, inst, cast_type);
                }
            }
        }
        if !check_casts.is_empty() {
            check_casts.add_pseudo_phis(graph, frontiers, &liveness, topo);
        }

        let mut signatures = SecondaryMap::new();
        for (id, info) in graph.method_infos.iter() {
            signatures[id] = Signature::of_callee(info);
        }
        let mut field_types = SecondaryMap::new();
        for (id, info) in graph.field_infos.iter() {
            field_types[id] = SsaType::from_descriptor(&info.field_type);
        }

        let mut inference = Self {
            types: SecondaryMap::new(),
            num_original,
            check_casts,
            block_attrs: SecondaryMap::with_default(DfAttr::empty()),
            method_signature: Signature::of_method(&graph.method),
            signatures,
            field_types,
            rounds: 0,
        };
        inference.initialize_regs(graph);
        inference.seed(graph, topo);
        inference
    }

    pub fn type_of(&self, reg: SsaReg) -> SsaType {
        self.types[reg]
    }

    /// Number of register names, synthetic ones included.
    pub fn num_regs(&self) -> u32 {
        self.check_casts.num_regs()
    }

    /// A bound on the propagation rounds that a monotone iteration can
    /// never reach.
    pub fn round_bound(&self) -> u32 {
        LATTICE_HEIGHT.saturating_mul(self.num_regs().max(1))
    }

    fn initialize_regs(&mut self, graph: &MirGraph) {
        let mut reg = graph.in_regs().start;
        if !graph.method.is_static {
            self.types[SsaReg(reg)] = SsaType::non_array_ref().as_non_null();
            reg += 1;
        }
        for word in self.method_signature.word_types() {
            self.types[SsaReg(reg)] = word.as_non_null();
            reg += 1;
        }

        for (reg, cast_type) in self.check_casts.cast_types() {
            self.types[reg] = cast_type;
        }
    }

    /// The forward pass of the first phase.
    fn seed(&mut self, graph: &MirGraph, topo: &TopologicalOrder) {
        for &block in topo.order() {
            self.check_casts.start(block);
            let mut block_attrs = DfAttr::empty();
            if self.check_casts.has_pseudo_phis(block) {
                block_attrs |= DfAttr::NULL_TRANSFER_N;
            }

            for (pos, &inst) in graph.block(block).insts.iter().enumerate() {
                let data = graph.inst(inst);
                self.seed_from_semantics(graph, block, pos, data);
                self.seed_from_attrs(data);
                if data.opcode == Opcode::CheckCast {
                    self.check_casts.process_check_cast(inst);
                }
                block_attrs |= data.attrs() & PROPAGATING;
            }
            self.block_attrs[block] = block_attrs;
        }
    }

    fn seed_from_semantics(
        &mut self,
        graph: &MirGraph,
        block: BlockId,
        pos: usize,
        data: &InstData,
    ) {
        let attrs = data.attrs();
        match data.opcode {
            Opcode::Const
            | Opcode::ConstWide
            | Opcode::Move
            | Opcode::MoveWide
            | Opcode::MoveObject
                if data.opt_flags.contains(OptFlags::INLINED) =>
            {
                // The value returned by an inlined call.
                let return_type = self
                    .signatures
                    .get(MethodInfoId(data.meta))
                    .map_or(SsaType::unknown(), |sig| sig.return_type);
                self.define(data, return_type);
            }
            Opcode::MoveException | Opcode::ConstString | Opcode::ConstClass => {
                self.define(data, SsaType::non_array_ref());
            }
            Opcode::NewInstance | Opcode::NewArray => {
                self.define(data, descriptor_type(graph, data));
            }
            Opcode::ArrayLength => {
                self.refine_use(&data.uses, 0, SsaType::unknown_array());
            }
            Opcode::FilledNewArray => {
                let array = descriptor_type(graph, data);
                if array.array_depth() == 0 {
                    return;
                }
                if let Some(result) = graph.find_move_result(block, pos) {
                    self.define(graph.inst(result), array);
                }
                let component = array.component_type();
                let mut arg = 0;
                while arg < data.uses.len() {
                    arg += self.refine_use(&data.uses, arg, component);
                }
            }
            Opcode::Return | Opcode::ReturnWide | Opcode::ReturnObject => {
                let return_type = self.method_signature.return_type;
                self.refine_use(&data.uses, 0, return_type);
            }
            op if op.is_invoke() => {
                let Some(id) = data.method_info() else {
                    return;
                };
                let signature = self.signatures[id].clone();
                if let Some(result) = graph.find_move_result(block, pos) {
                    self.define(graph.inst(result), signature.return_type);
                }

                let mut arg = 0;
                if op != Opcode::InvokeStatic {
                    arg += self.refine_use(&data.uses, 0, SsaType::non_array_ref());
                }
                for &param in &signature.params {
                    if arg >= data.uses.len() {
                        break;
                    }
                    arg += self.refine_use(&data.uses, arg, param);
                }
            }
            _ if attrs.intersects(DfAttr::IFIELD | DfAttr::SFIELD) => {
                let Some(field_type) = data.field_info().map(|id| self.field_types[id]) else {
                    return;
                };
                if attrs.contains(DfAttr::DA) {
                    self.define(data, field_type);
                } else {
                    self.refine_use(&data.uses, 0, field_type);
                }
            }
            _ if attrs.contains(DfAttr::HAS_RANGE_CHKS) => {
                if let Some(base) = data.uses.len().checked_sub(2) {
                    self.refine_use(&data.uses, base, access_array_type(data.opcode));
                }
            }
            _ => {}
        }
    }

    /// Types the defined and used slots by the data-flow attributes.
    fn seed_from_attrs(&mut self, data: &InstData) {
        // Phis are typed by propagation only.
        if data.is_phi() {
            return;
        }

        let attrs = data.attrs();
        if attrs.contains(DfAttr::DA) {
            if let Some(def) = data.def() {
                let wide = attrs.contains(DfAttr::A_WIDE);
                let low = type_slot(&mut self.types[def], attrs, Slot::A, wide);
                if let (true, Some(&high)) = (wide, data.defs.get(1)) {
                    self.types[high].merge_high_word(low);
                }
            }
        }

        if attrs.contains(DfAttr::FORMAT_35C) {
            return;
        }
        let layout = [
            (DfAttr::UA, Slot::A, !attrs.contains(DfAttr::DA) && attrs.contains(DfAttr::A_WIDE)),
            (DfAttr::UB, Slot::B, attrs.contains(DfAttr::B_WIDE)),
            (DfAttr::UC, Slot::C, attrs.contains(DfAttr::C_WIDE)),
        ];
        let mut next = 0;
        for (used, slot, wide) in layout {
            if !attrs.contains(used) {
                continue;
            }
            let Some(&reg) = data.uses.get(next) else {
                break;
            };
            let reg = self.check_casts.modified_reg(reg);
            let low = type_slot(&mut self.types[reg], attrs, slot, wide);
            if wide {
                if let Some(&high) = data.uses.get(next + 1) {
                    let high = self.check_casts.modified_reg(high);
                    self.types[high].merge_high_word(low);
                }
                next += 2;
            } else {
                next += 1;
            }
        }
    }

    /// Merges a definitely defined `ty` into the defs of `data`.
    fn define(&mut self, data: &InstData, ty: SsaType) {
        if !ty.is_defined() {
            return;
        }
        let Some(def) = data.def() else {
            return;
        };
        let ty = ty.as_non_null();
        self.types[def].merge_strong(ty);
        if let (true, Some(&high)) = (ty.wide(), data.defs.get(1)) {
            self.types[high].merge_strong(ty.to_high_word());
        }
    }

    /// Merges `ty` into the use at `pos`; returns the number of words the
    /// use occupies.
    fn refine_use(&mut self, uses: &[SsaReg], pos: usize, ty: SsaType) -> usize {
        let Some(&reg) = uses.get(pos) else {
            return 1;
        };
        if !ty.is_defined() {
            return 1;
        }
        let reg = self.check_casts.modified_reg(reg);
        self.types[reg].merge_strong(ty);
        if !ty.wide() {
            return 1;
        }
        if let Some(&high) = uses.get(pos + 1) {
            let high = self.check_casts.modified_reg(high);
            self.types[high].merge_strong(ty.to_high_word());
        }
        2
    }

    /// Propagates types through the instructions of `block`; returns `true`
    /// if any type changed.
    pub fn apply(&mut self, graph: &MirGraph, block: BlockId) -> bool {
        let block_attrs = self.block_attrs[block];
        if block_attrs.is_empty() {
            return false;
        }

        self.check_casts.start(block);
        let mut changed = false;
        if block_attrs.contains(DfAttr::NULL_TRANSFER_N) {
            changed |= self
                .check_casts
                .process_pseudo_phis(graph, block, &mut self.types);
        }

        for &inst in &graph.block(block).insts {
            let data = graph.inst(inst);
            let attrs = data.attrs();
            if data.is_phi() {
                changed |= self.apply_phi(graph, block, data);
            } else if attrs.contains(DfAttr::IS_MOVE) {
                changed |= self.apply_move(data);
            } else if attrs.contains(DfAttr::HAS_RANGE_CHKS) {
                changed |= self.apply_array_access(data);
            } else if attrs.contains(DfAttr::CHK_CAST) {
                self.check_casts.process_check_cast(inst);
            } else if attrs.contains(DfAttr::SAME_TYPE_AB) {
                changed |= self.apply_same_type(data);
            }
        }
        changed
    }

    fn apply_phi(&mut self, graph: &MirGraph, block: BlockId, data: &InstData) -> bool {
        let Some(def) = data.def() else {
            return false;
        };
        let inputs: SmallVec<[SsaReg; 4]> = data
            .uses
            .iter()
            .zip(graph.preds_of(block))
            .map(|(&reg, pred)| self.check_casts.phi_input_reg(reg, pred))
            .collect();

        let mut merged = self.types[def];
        for &input in &inputs {
            merged.merge_weak(self.types[input]);
        }

        if !merged.is_defined() {
            false
        } else if merged.high_word() {
            // The high word of a pair; only the size matters.
            if merged.low_word() {
                let before = self.types[def];
                self.types[def].mark_size_conflict();
                self.types[def] != before
            } else {
                false
            }
        } else {
            // Down fully, up without the non-null flag.
            let mut changed = self.types[def].copy_from(merged);
            let merged = merged.as_null();
            for &input in &inputs {
                changed |= self.update_from_low_word(input, merged);
            }
            changed
        }
    }

    fn apply_move(&mut self, data: &InstData) -> bool {
        let (Some(def), Some(&src)) = (data.def(), data.uses.first()) else {
            return false;
        };
        let src = self.check_casts.modified_reg(src);

        let mut changed = false;
        let def_type = self.types[def];
        if def_type.low_word() {
            changed |= self.update_from_low_word(src, def_type.as_null());
        }
        let src_type = self.types[src];
        if src_type.low_word() {
            changed |= self.update_from_low_word(def, src_type);
        }

        // A reference moved by a non-object move.
        if matches!(data.opcode, Opcode::Move | Opcode::MoveWide) && self.types[src].is_ref() {
            changed |= self.mark_type_conflict(src);
        }
        changed
    }

    fn apply_array_access(&mut self, data: &InstData) -> bool {
        let Some(base) = data.uses.len().checked_sub(2) else {
            return false;
        };
        let base = self.check_casts.modified_reg(data.uses[base]);
        let value = match data.def() {
            Some(def) => def,
            None => self.check_casts.modified_reg(data.uses[0]),
        };

        let mut changed = false;
        let base_type = self.types[base];
        // A possibly null base contributed everything it could in the first
        // phase.
        if base_type.non_null() && base_type.array_depth() != 0 {
            changed |= self.update_from_low_word(value, base_type.component_type());
            let array_type = SsaType::array_type_from_component(self.types[value]);
            changed |= if data.def().is_some() {
                self.types[base].merge_strong(array_type)
            } else {
                self.types[base].merge_weak(array_type)
            };
        }

        // A reference accessed by a non-object aget/aput.
        if !data.attrs().contains(DfAttr::REF_A) && self.types[value].is_ref() {
            changed |= self.mark_type_conflict(value);
        }
        changed
    }

    fn apply_same_type(&mut self, data: &InstData) -> bool {
        let [a, b] = match data.uses.as_slice() {
            &[a, b, ..] => [a, b].map(|reg| self.check_casts.modified_reg(reg)),
            _ => return false,
        };
        let (a_type, b_type) = (self.types[a], self.types[b]);
        let mut changed = self.types[a].merge_weak(b_type.as_null());
        changed |= self.types[b].merge_weak(a_type.as_null());
        changed
    }

    fn update_from_low_word(&mut self, reg: SsaReg, low_word: SsaType) -> bool {
        debug_assert!(low_word.low_word());
        let mut changed = self.types[reg].merge_strong(low_word);
        let merged = self.types[reg];
        if merged.wide() && !merged.narrow() && reg.0 < self.num_original {
            changed |= self.types[reg.high_word()].merge_high_word(merged);
        }
        changed
    }

    fn mark_type_conflict(&mut self, reg: SsaReg) -> bool {
        let before = self.types[reg];
        self.types[reg].mark_type_conflict();
        self.types[reg] != before
    }

    /// Repeats loop-aware passes over `topo` until a whole pass changes no
    /// type or `max_rounds` passes were made. Returns the number of passes.
    pub fn run_to_fixed_point(
        &mut self,
        graph: &MirGraph,
        topo: &TopologicalOrder,
        max_rounds: u32,
    ) -> u32 {
        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut any_change = false;
            let mut iter = topo.loop_repeating_iter(graph);
            let mut changed = false;
            while let Some(block) = iter.next(changed) {
                changed = self.apply(graph, block);
                any_change |= changed;
            }
            tracing::trace!(round = rounds, any_change, "type propagation pass");

            if !any_change {
                break;
            }
            if rounds >= max_rounds {
                tracing::warn!(
                    method = %graph.method.pretty(),
                    rounds,
                    "type inference stopped before reaching a fixed point"
                );
                break;
            }
        }

        self.rounds += rounds;
        tracing::debug!(method = %graph.method.pretty(), rounds, "type inference converged");
        rounds
    }

    /// Records the inferred types on `graph`, punting the method on a size
    /// conflict and disabling type-dependent optimizations on a type
    /// conflict.
    pub fn finish(mut self, graph: &mut MirGraph) -> TypeInferenceResult {
        self.check_casts.merge_conflicts(&mut self.types);

        let originals = (0..self.num_original).map(SsaReg);
        let size_conflict = originals.clone().find(|&reg| self.types[reg].size_conflict());
        let type_conflict = originals.clone().find(|&reg| self.types[reg].type_conflict());
        let method = graph.method.pretty();

        if let Some(reg) = size_conflict {
            tracing::warn!(%method, %reg, "size conflict, punting to the interpreter");
            graph.punt_to_interpreter = true;
        } else {
            graph.reg_locations = originals.map(|reg| reg_location(self.types[reg])).collect();
            if let Some(reg) = type_conflict {
                tracing::warn!(
                    %method,
                    %reg,
                    "type conflict, disabling type-dependent optimizations"
                );
                graph.disable_opt |= DisableOpt::TYPE_CONFLICT;
            }
        }

        TypeInferenceResult {
            types: self.types,
            num_original: self.num_original,
            check_casts: self.check_casts,
            rounds: self.rounds,
            size_conflict,
            type_conflict: type_conflict.filter(|_| size_conflict.is_none()),
        }
    }
}

/// Runs both phases of type inference on `graph`.
///
/// Without `max_rounds`, the propagation is bounded by
/// [`TypeInference::round_bound`].
pub fn infer_types(
    graph: &mut MirGraph,
    frontiers: &DFSet,
    topo: &TopologicalOrder,
    max_rounds: Option<u32>,
) -> TypeInferenceResult {
    let mut inference = TypeInference::new(graph, frontiers, topo);
    let max_rounds = max_rounds.unwrap_or_else(|| inference.round_bound());
    inference.run_to_fixed_point(graph, topo, max_rounds);
    inference.finish(graph)
}

/// The inferred types of one method.
#[derive(Debug)]
pub struct TypeInferenceResult {
    types: SecondaryMap<SsaReg, SsaType>,
    num_original: u32,
    check_casts: CheckCastData,
    rounds: u32,
    size_conflict: Option<SsaReg>,
    type_conflict: Option<SsaReg>,
}

impl TypeInferenceResult {
    pub fn type_of(&self, reg: SsaReg) -> SsaType {
        self.types[reg]
    }

    /// Number of registers of the graph, synthetic names excluded.
    pub fn num_original_regs(&self) -> u32 {
        self.num_original
    }

    pub fn num_regs(&self) -> u32 {
        self.check_casts.num_regs()
    }

    /// The synthetic name holding the value narrowed by a check-cast.
    pub fn check_cast_reg(&self, inst: InstId) -> Option<SsaReg> {
        self.check_casts.check_cast_reg(inst)
    }

    /// The synthetic name of the pseudo-phi merging `original` in `block`.
    pub fn pseudo_phi_reg(&self, block: BlockId, original: SsaReg) -> Option<SsaReg> {
        self.check_casts
            .pseudo_phis()
            .find(|&(b, reg, _)| b == block && reg == original)
            .map(|(_, _, phi)| phi)
    }

    /// Pseudo-phis as `(block, original register, synthetic name)`.
    pub fn pseudo_phis(&self) -> impl Iterator<Item = (BlockId, SsaReg, SsaReg)> + '_ {
        self.check_casts.pseudo_phis()
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn size_conflict(&self) -> Option<SsaReg> {
        self.size_conflict
    }

    pub fn type_conflict(&self) -> Option<SsaReg> {
        self.type_conflict
    }
}

#[derive(Clone, Copy)]
enum Slot {
    A,
    B,
    C,
}

/// Applies the width and category a slot attribute implies; returns the
/// resulting type.
fn type_slot(ty: &mut SsaType, attrs: DfAttr, slot: Slot, wide: bool) -> SsaType {
    let (fp, core, reference) = match slot {
        Slot::A => (DfAttr::FP_A, DfAttr::CORE_A, DfAttr::REF_A),
        Slot::B => (DfAttr::FP_B, DfAttr::CORE_B, DfAttr::REF_B),
        Slot::C => (DfAttr::FP_C, DfAttr::CORE_C, DfAttr::REF_C),
    };
    ty.set_low_word();
    if attrs.contains(fp) {
        ty.set_fp();
    }
    if attrs.contains(core) {
        ty.set_core();
    }
    if attrs.contains(reference) {
        ty.set_ref();
    }
    if wide {
        ty.set_wide();
    } else {
        ty.set_narrow();
    }
    *ty
}

fn descriptor_type(graph: &MirGraph, data: &InstData) -> SsaType {
    data.type_idx()
        .map_or(SsaType::unknown(), |idx| SsaType::from_descriptor(graph.type_descriptor(idx)))
}

/// The array type implied by the opcode of an array access.
fn access_array_type(opcode: Opcode) -> SsaType {
    match opcode {
        Opcode::AgetWide | Opcode::AputWide => SsaType::wide_array(),
        Opcode::AgetObject | Opcode::AputObject => SsaType::object_array(),
        Opcode::Aget | Opcode::Aput => SsaType::narrow_array(),
        _ => SsaType::narrow_core_array(),
    }
}

fn reg_location(ty: SsaType) -> RegLocation {
    RegLocation {
        defined: ty.is_defined(),
        wide: ty.wide(),
        fp: ty.fp(),
        core: ty.core(),
        is_ref: ty.is_ref(),
        high_word: ty.high_word(),
        non_null: ty.non_null(),
        array_depth: ty.array_depth(),
    }
}
