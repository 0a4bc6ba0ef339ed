mod graph_builder;

pub use graph_builder::GraphBuilder;

/// Helpers for building small graphs with explicit SSA names in tests.
pub mod test_util {
    use super::*;

    use crate::{
        block::SuccessorKind,
        inst::InstData,
        lowering::{
            FieldInfoId, FieldLoweringInfo, InvokeType, MethodDesc, MethodInfoId,
            MethodLoweringInfo, TypeIdx,
        },
        opcode::{DfAttr, Opcode},
        writer::GraphWriter,
        BlockId, InstId, MirGraph, SsaReg,
    };

    pub fn dump_graph(graph: &MirGraph) -> String {
        GraphWriter::new(graph).dump_string()
    }

    pub struct TestGraphBuilder {
        builder: GraphBuilder,
        next_field_idx: u32,
        next_method_idx: u32,
    }

    impl TestGraphBuilder {
        /// A builder for a static `()V` method.
        pub fn new(num_vregs: u32) -> Self {
            Self::with_method(MethodDesc::new("test", "LTest;", true, &[], "V"), num_vregs)
        }

        pub fn with_method(method: MethodDesc, num_vregs: u32) -> Self {
            Self {
                builder: GraphBuilder::new(method, num_vregs),
                next_field_idx: 0,
                next_method_idx: 0,
            }
        }

        pub fn entry(&self) -> BlockId {
            self.builder.entry_block()
        }

        pub fn exit(&self) -> BlockId {
            self.builder.exit_block()
        }

        pub fn block(&mut self) -> BlockId {
            self.builder.append_block()
        }

        pub fn code_blocks<const N: usize>(&mut self) -> [BlockId; N] {
            std::array::from_fn(|_| self.builder.append_block())
        }

        pub fn handler_block(&mut self) -> BlockId {
            self.builder.append_handler_block()
        }

        pub fn goto(&mut self, from: BlockId, to: BlockId) {
            self.builder.jump(from, to).unwrap();
        }

        pub fn branch(&mut self, from: BlockId, fall_through: BlockId, taken: BlockId) {
            self.builder.branch(from, fall_through, taken).unwrap();
        }

        /// A packed switch with keys `0..cases.len()`.
        pub fn switch(&mut self, from: BlockId, cases: &[BlockId], default: BlockId) {
            let cases: Vec<_> = cases.iter().enumerate().map(|(k, &b)| (k as i32, b)).collect();
            self.builder
                .switch(from, SuccessorKind::PackedSwitch, &cases, default)
                .unwrap();
        }

        pub fn catch(&mut self, from: BlockId, handler: BlockId) {
            self.builder.catch(from, handler, -1).unwrap();
        }

        pub fn type_idx(&mut self, descriptor: &str) -> TypeIdx {
            self.builder.declare_type(descriptor)
        }

        pub fn field(&mut self, class: &str, ty: &str) -> FieldInfoId {
            let idx = self.next_field_idx;
            self.field_info(FieldLoweringInfo::instance(idx, class, ty))
        }

        pub fn static_field(&mut self, class: &str, ty: &str) -> FieldInfoId {
            let idx = self.next_field_idx;
            self.field_info(FieldLoweringInfo::static_field(idx, class, ty))
        }

        pub fn field_info(&mut self, info: FieldLoweringInfo) -> FieldInfoId {
            self.next_field_idx = self.next_field_idx.max(info.field_idx + 1);
            self.builder.declare_field(info)
        }

        /// A resolved static method.
        pub fn method(&mut self, class: &str, params: &[&str], ret: &str) -> MethodInfoId {
            let idx = self.next_method_idx;
            self.method_info(MethodLoweringInfo::new(
                idx,
                InvokeType::Static,
                class,
                params,
                ret,
            ))
        }

        pub fn method_info(&mut self, info: MethodLoweringInfo) -> MethodInfoId {
            self.next_method_idx = self.next_method_idx.max(info.method_idx + 1);
            self.builder.declare_method(info)
        }

        /// Emits `opcode` with an optional low def and one register per used
        /// slot; wide slots are expanded to consecutive SSA names.
        pub fn emit(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            def: Option<u32>,
            slots: &[u32],
        ) -> InstId {
            let attrs = opcode.attrs();
            let mut data = InstData::new(opcode);

            if let Some(def) = def {
                data.defs.push(SsaReg(def));
                if opcode.num_defs() == 2 {
                    data.defs.push(SsaReg(def + 1));
                }
                data.v_a = def;
            }

            if attrs.intersects(DfAttr::FORMAT_35C | DfAttr::NULL_TRANSFER_N) {
                data.uses.extend(slots.iter().map(|&s| SsaReg(s)));
                data.v_a = slots.len() as u32;
            } else {
                let a_wide = !attrs.contains(DfAttr::DA) && attrs.contains(DfAttr::A_WIDE);
                let layout = [
                    (DfAttr::UA, a_wide),
                    (DfAttr::UB, attrs.contains(DfAttr::B_WIDE)),
                    (DfAttr::UC, attrs.contains(DfAttr::C_WIDE)),
                ];
                let mut slots = slots.iter();
                for (used, wide) in layout {
                    if !attrs.contains(used) {
                        continue;
                    }
                    let reg = *slots.next().unwrap();
                    data.uses.push(SsaReg(reg));
                    if wide {
                        data.uses.push(SsaReg(reg + 1));
                    }
                }
                assert!(slots.next().is_none(), "too many operands for {opcode}");
            }

            self.builder.push_inst(block, data)
        }

        pub fn inst_mut(&mut self, inst: InstId) -> &mut InstData {
            self.builder.graph_mut().inst_mut(inst)
        }

        pub fn def(&mut self, block: BlockId, opcode: Opcode, def: u32) -> InstId {
            self.emit(block, opcode, Some(def), &[])
        }

        pub fn op(&mut self, block: BlockId, opcode: Opcode, def: u32, slots: &[u32]) -> InstId {
            self.emit(block, opcode, Some(def), slots)
        }

        pub fn use_(&mut self, block: BlockId, opcode: Opcode, slots: &[u32]) -> InstId {
            self.emit(block, opcode, None, slots)
        }

        pub fn const_(&mut self, block: BlockId, def: u32, value: i32) -> InstId {
            let inst = self.def(block, Opcode::Const, def);
            self.inst_mut(inst).v_b = value as u32;
            inst
        }

        pub fn const_wide(&mut self, block: BlockId, def: u32, value: i64) -> InstId {
            let inst = self.def(block, Opcode::ConstWide, def);
            self.inst_mut(inst).v_b_wide = value as u64;
            inst
        }

        pub fn lit_op(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            def: u32,
            src: u32,
            lit: i32,
        ) -> InstId {
            let inst = self.op(block, opcode, def, &[src]);
            self.inst_mut(inst).v_c = lit as u32;
            inst
        }

        pub fn move_(&mut self, block: BlockId, opcode: Opcode, def: u32, src: u32) -> InstId {
            self.op(block, opcode, def, &[src])
        }

        pub fn iget(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            def: u32,
            obj: u32,
            field: FieldInfoId,
        ) -> InstId {
            let inst = self.op(block, opcode, def, &[obj]);
            self.inst_mut(inst).meta = field.0;
            inst
        }

        pub fn iput(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            src: u32,
            obj: u32,
            field: FieldInfoId,
        ) -> InstId {
            let inst = self.use_(block, opcode, &[src, obj]);
            self.inst_mut(inst).meta = field.0;
            inst
        }

        pub fn sget(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            def: u32,
            field: FieldInfoId,
        ) -> InstId {
            let inst = self.def(block, opcode, def);
            self.inst_mut(inst).meta = field.0;
            inst
        }

        pub fn sput(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            src: u32,
            field: FieldInfoId,
        ) -> InstId {
            let inst = self.use_(block, opcode, &[src]);
            self.inst_mut(inst).meta = field.0;
            inst
        }

        pub fn aget(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            def: u32,
            array: u32,
            index: u32,
        ) -> InstId {
            self.op(block, opcode, def, &[array, index])
        }

        pub fn aput(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            src: u32,
            array: u32,
            index: u32,
        ) -> InstId {
            self.use_(block, opcode, &[src, array, index])
        }

        /// Emits an invoke; `args` lists every argument word.
        pub fn invoke(
            &mut self,
            block: BlockId,
            opcode: Opcode,
            method: MethodInfoId,
            args: &[u32],
        ) -> InstId {
            let inst = self.use_(block, opcode, args);
            self.inst_mut(inst).meta = method.0;
            inst
        }

        pub fn filled_new_array(
            &mut self,
            block: BlockId,
            descriptor: &str,
            args: &[u32],
        ) -> InstId {
            let ty = self.type_idx(descriptor);
            let inst = self.use_(block, Opcode::FilledNewArray, args);
            self.inst_mut(inst).v_b = ty.0;
            inst
        }

        pub fn new_instance(&mut self, block: BlockId, def: u32, descriptor: &str) -> InstId {
            let ty = self.type_idx(descriptor);
            let inst = self.def(block, Opcode::NewInstance, def);
            self.inst_mut(inst).v_b = ty.0;
            inst
        }

        pub fn new_array(
            &mut self,
            block: BlockId,
            def: u32,
            size: u32,
            descriptor: &str,
        ) -> InstId {
            let ty = self.type_idx(descriptor);
            let inst = self.op(block, Opcode::NewArray, def, &[size]);
            self.inst_mut(inst).v_c = ty.0;
            inst
        }

        pub fn const_string(&mut self, block: BlockId, def: u32, string_idx: u32) -> InstId {
            let inst = self.def(block, Opcode::ConstString, def);
            self.inst_mut(inst).v_b = string_idx;
            inst
        }

        pub fn const_class(&mut self, block: BlockId, def: u32, descriptor: &str) -> InstId {
            let ty = self.type_idx(descriptor);
            let inst = self.def(block, Opcode::ConstClass, def);
            self.inst_mut(inst).v_b = ty.0;
            inst
        }

        pub fn check_cast(&mut self, block: BlockId, reg: u32, descriptor: &str) -> InstId {
            let ty = self.type_idx(descriptor);
            let inst = self.use_(block, Opcode::CheckCast, &[reg]);
            self.inst_mut(inst).v_b = ty.0;
            inst
        }

        pub fn instance_of(
            &mut self,
            block: BlockId,
            def: u32,
            obj: u32,
            descriptor: &str,
        ) -> InstId {
            let ty = self.type_idx(descriptor);
            let inst = self.op(block, Opcode::InstanceOf, def, &[obj]);
            self.inst_mut(inst).v_c = ty.0;
            inst
        }

        pub fn array_length(&mut self, block: BlockId, def: u32, array: u32) -> InstId {
            self.op(block, Opcode::ArrayLength, def, &[array])
        }

        /// Emits a phi whose inputs follow the predecessor order of `block`.
        pub fn phi(&mut self, block: BlockId, def: u32, inputs: &[u32]) -> InstId {
            self.emit(block, Opcode::Phi, Some(def), inputs)
        }

        pub fn ret(&mut self, block: BlockId, opcode: Opcode, src: Option<u32>) -> InstId {
            self.use_(block, opcode, src.as_slice())
        }

        pub fn graph(&self) -> &MirGraph {
            self.builder.graph()
        }

        pub fn build(self) -> MirGraph {
            self.builder.finish()
        }
    }
}
