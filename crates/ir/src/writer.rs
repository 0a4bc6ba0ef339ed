use std::{fmt::Write as _, io};

use crate::{block::BlockKind, inst::InstData, BlockId, InstId, MirGraph};

/// Writes a human readable listing of a [`MirGraph`].
pub struct GraphWriter<'a> {
    graph: &'a MirGraph,
}

impl<'a> GraphWriter<'a> {
    pub fn new(graph: &'a MirGraph) -> Self {
        Self { graph }
    }

    pub fn write(&self, mut w: impl io::Write) -> io::Result<()> {
        let method = &self.graph.method;
        writeln!(
            w,
            "method {}{} vregs={} ssa={}",
            method.pretty(),
            if method.is_static { " static" } else { "" },
            self.graph.num_vregs(),
            self.graph.num_ssa_regs()
        )?;

        for block in self.graph.blocks.keys() {
            if self.graph.block(block).kind == BlockKind::Null {
                continue;
            }
            self.write_block(block, &mut w)?;
        }
        Ok(())
    }

    pub fn dump_string(&self) -> String {
        let mut s = Vec::new();
        // Writing into a `Vec` cannot fail.
        let _ = self.write(&mut s);
        String::from_utf8_lossy(&s).into_owned()
    }

    fn write_block(&self, block: BlockId, mut w: impl io::Write) -> io::Result<()> {
        let data = self.graph.block(block);
        write!(w, "{block} {} @{:04x}", data.kind, data.start_offset)?;
        write_block_list(&mut w, " preds=", data.preds.iter().copied())?;
        write_block_list(&mut w, " succs=", data.succs())?;
        writeln!(w)?;

        for &inst in &data.insts {
            writeln!(w, "    {}", self.inst_line(inst))?;
        }
        Ok(())
    }

    /// Formats one instruction as `offset defs = opcode uses extras`.
    pub fn inst_line(&self, inst: InstId) -> String {
        let data = self.graph.inst(inst);
        let mut line = format!("{:04x} ", data.offset);

        if !data.defs.is_empty() {
            for def in &data.defs {
                let _ = write!(line, "{def} ");
            }
            line.push_str("= ");
        }
        line.push_str(data.opcode.name());
        for reg in &data.uses {
            let _ = write!(line, " {reg}");
        }

        self.write_extras(data, &mut line);

        if !data.opt_flags.is_empty() {
            let names: Vec<_> = data.opt_flags.iter_names().map(|(name, _)| name).collect();
            let _ = write!(line, " [{}]", names.join("|"));
        }
        line
    }

    fn write_extras(&self, data: &InstData, line: &mut String) {
        if let Some(lit) = data.literal() {
            let _ = write!(line, " #{lit}");
        }
        if let Some(idx) = data.type_idx() {
            if let Some(desc) = self.graph.types.get(idx) {
                let _ = write!(line, " {desc}");
            }
        }
        if let Some(info) = data.field_info().and_then(|id| self.graph.field_infos.get(id)) {
            let _ = write!(
                line,
                " {}.f{}:{}",
                info.declaring_class, info.field_idx, info.field_type
            );
        }
        if let Some(info) = data.method_info().and_then(|id| self.graph.method_infos.get(id)) {
            let _ = write!(
                line,
                " {}.m{}({}){}",
                info.declaring_class,
                info.method_idx,
                info.params.join(""),
                info.return_type
            );
        }
    }
}

fn write_block_list(
    mut w: impl io::Write,
    label: &str,
    blocks: impl Iterator<Item = BlockId>,
) -> io::Result<()> {
    let blocks: Vec<_> = blocks.map(|b| b.to_string()).collect();
    if !blocks.is_empty() {
        write!(w, "{label}[{}]", blocks.join(", "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{builder::test_util::*, inst::OptFlags, opcode::Opcode};

    #[test]
    fn dump_lists_blocks_and_instructions() {
        let mut b = TestGraphBuilder::new(2);
        let [body] = b.code_blocks();
        b.goto(b.entry(), body);
        b.goto(body, b.exit());
        let field = b.field("LFoo;", "I");
        b.new_instance(body, 2, "LFoo;");
        let get = b.iget(body, Opcode::Iget, 3, 2, field);
        b.inst_mut(get).opt_flags = OptFlags::IGNORE_NULL_CHECK;
        b.lit_op(body, Opcode::AddIntLit, 4, 3, -1);
        b.ret(body, Opcode::ReturnVoid, None);
        let graph = b.build();

        insta::assert_snapshot!(dump_graph(&graph), @r"
        method LTest;.test static vregs=2 ssa=5
        bb1 entry @0000 succs=[bb3]
        bb2 exit @0000 preds=[bb3]
        bb3 code @0000 preds=[bb1] succs=[bb2]
            0000 s2 = new-instance LFoo;
            0002 s3 = iget s2 LFoo;.f0:I [IGNORE_NULL_CHECK]
            0004 s4 = add-int/lit s3 #-1
            0006 return-void
        ");
    }
}
