//! Textual dumps of analysis results, keyed by block and bytecode offset.
use std::fmt::Write as _;

use mirflow_ir::{BlockKind, GraphWriter, MirGraph, SsaReg};

use crate::{lvn::LvnResult, type_inference::TypeInferenceResult};

/// Lists every instruction with its value number; instructions whose result
/// was already available are marked `redundant`.
pub fn dump_value_numbers(graph: &MirGraph, result: &LvnResult) -> String {
    let writer = GraphWriter::new(graph);
    let mut s = String::new();
    for (block, data) in graph.blocks.iter() {
        if data.kind == BlockKind::Null || data.insts.is_empty() {
            continue;
        }
        let _ = writeln!(s, "{block}:");
        for &inst in &data.insts {
            let _ = write!(s, "    {}", writer.inst_line(inst));
            if let Some(vn) = result.value_of(inst) {
                let _ = write!(s, " => {vn}");
            }
            if result.is_redundant(inst) {
                s.push_str(" redundant");
            }
            s.push('\n');
        }
    }
    s
}

/// Lists the types of the incoming arguments, of every definition and of
/// the synthetic check-cast and pseudo-phi names.
pub fn dump_types(graph: &MirGraph, result: &TypeInferenceResult) -> String {
    let mut s = String::new();
    let in_regs = graph.in_regs();
    if !in_regs.is_empty() {
        s.push_str("in:\n");
        for reg in in_regs.map(SsaReg) {
            let _ = writeln!(s, "    {reg}: {}", result.type_of(reg));
        }
    }

    for (block, data) in graph.blocks.iter() {
        if data.kind == BlockKind::Null {
            continue;
        }
        let mut lines = Vec::new();
        for (phi_block, original, phi) in result.pseudo_phis() {
            if phi_block == block {
                lines.push(format!("pseudo-phi {phi} ({original}): {}", result.type_of(phi)));
            }
        }
        for &inst in &data.insts {
            let inst_data = graph.inst(inst);
            for &def in &inst_data.defs {
                lines.push(format!("{:04x} {def}: {}", inst_data.offset, result.type_of(def)));
            }
            if let Some(cast) = result.check_cast_reg(inst) {
                lines.push(format!(
                    "{:04x} {cast} (check-cast {}): {}",
                    inst_data.offset,
                    inst_data.uses[0],
                    result.type_of(cast)
                ));
            }
        }

        if !lines.is_empty() {
            let _ = writeln!(s, "{block}:");
            for line in lines {
                let _ = writeln!(s, "    {line}");
            }
        }
    }
    s
}
