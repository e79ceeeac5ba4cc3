// Listing emission: renders a program back into the assembly-like text form
// accepted by `parse`. Parse → display round-trips, which is what lets the
// "bytes unchanged" scenarios be asserted as listing equality.

use std::fmt::Write as _;

use super::instruction::{Instruction, Operand, Reg};
use super::opcode::Opcode;
use super::{Program, SymbolTable};
use crate::outline::predicates::memory_scale;

/// AArch64 condition-code names, indexed by the encoded condition value.
pub(super) const COND_NAMES: [&str; 15] =
    ["eq", "ne", "hs", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "al"];

fn xreg(op: &Operand) -> String {
    match op {
        Operand::Reg(Reg::SP) => "sp".to_string(),
        Operand::Reg(Reg(n)) => format!("x{n}"),
        _ => "?".to_string(),
    }
}

fn wreg(op: &Operand) -> String {
    match op {
        Operand::Reg(Reg::SP) => "wsp".to_string(),
        Operand::Reg(Reg(n)) => format!("w{n}"),
        _ => "?".to_string(),
    }
}

fn qreg(op: &Operand) -> String {
    match op {
        Operand::Reg(Reg(n)) => format!("q{n}"),
        _ => "?".to_string(),
    }
}

fn imm(op: &Operand) -> i64 {
    op.as_imm().unwrap_or(0)
}

fn sym(op: &Operand, symbols: &SymbolTable) -> String {
    match op.as_sym() {
        Some(id) => symbols.name(id).to_string(),
        None => "?".to_string(),
    }
}

/// Render one instruction in listing syntax.
///
/// Load/store displacements are stored in scaled immediate-field units and
/// shown as byte offsets.
#[must_use]
pub fn format_instruction(inst: &Instruction, symbols: &SymbolTable) -> String {
    let ops = &inst.operands;
    let bytes = |op: &Operand| imm(op) * memory_scale(inst.opcode);
    match inst.opcode {
        Opcode::Invalid => "invalid".to_string(),
        Opcode::Cfi => ".cfi".to_string(),
        Opcode::Nop => "nop".to_string(),

        Opcode::MovZXi => format!("mov {}, #{}", xreg(&ops[0]), imm(&ops[1])),
        Opcode::AddXrr => format!("add {}, {}, {}", xreg(&ops[0]), xreg(&ops[1]), xreg(&ops[2])),
        Opcode::SubXrr => format!("sub {}, {}, {}", xreg(&ops[0]), xreg(&ops[1]), xreg(&ops[2])),
        Opcode::AndXrr => format!("and {}, {}, {}", xreg(&ops[0]), xreg(&ops[1]), xreg(&ops[2])),
        Opcode::OrrXrr => format!("orr {}, {}, {}", xreg(&ops[0]), xreg(&ops[1]), xreg(&ops[2])),
        Opcode::EorXrr => format!("eor {}, {}, {}", xreg(&ops[0]), xreg(&ops[1]), xreg(&ops[2])),
        Opcode::MulXrr => format!("mul {}, {}, {}", xreg(&ops[0]), xreg(&ops[1]), xreg(&ops[2])),
        Opcode::AddXri => format!("add {}, {}, #{}", xreg(&ops[0]), xreg(&ops[1]), imm(&ops[2])),
        Opcode::SubXri => format!("sub {}, {}, #{}", xreg(&ops[0]), xreg(&ops[1]), imm(&ops[2])),

        Opcode::LslXri => format!("lsl {}, {}, #{}", xreg(&ops[0]), xreg(&ops[1]), imm(&ops[2])),
        Opcode::LsrXri => format!("lsr {}, {}, #{}", xreg(&ops[0]), xreg(&ops[1]), imm(&ops[2])),
        Opcode::AsrXri => format!("asr {}, {}, #{}", xreg(&ops[0]), xreg(&ops[1]), imm(&ops[2])),
        Opcode::RorXri => format!("ror {}, {}, #{}", xreg(&ops[0]), xreg(&ops[1]), imm(&ops[2])),

        Opcode::LdrXui => {
            format!("ldr {}, [{}, #{}]", xreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::LdrWui => {
            format!("ldr {}, [{}, #{}]", wreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::LdrHui => {
            format!("ldrh {}, [{}, #{}]", wreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::LdrBui => {
            format!("ldrb {}, [{}, #{}]", wreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::LdrQui => {
            format!("ldr {}, [{}, #{}]", qreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::LdurXi => {
            format!("ldur {}, [{}, #{}]", xreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }

        Opcode::StrXui => {
            format!("str {}, [{}, #{}]", xreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::StrWui => {
            format!("str {}, [{}, #{}]", wreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::StrHui => {
            format!("strh {}, [{}, #{}]", wreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::StrBui => {
            format!("strb {}, [{}, #{}]", wreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::StrQui => {
            format!("str {}, [{}, #{}]", qreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }
        Opcode::SturXi => {
            format!("stur {}, [{}, #{}]", xreg(&ops[0]), xreg(&ops[1]), bytes(&ops[2]))
        }

        Opcode::LdpXi => format!(
            "ldp {}, {}, [{}, #{}]",
            xreg(&ops[0]),
            xreg(&ops[1]),
            xreg(&ops[2]),
            bytes(&ops[3])
        ),
        Opcode::LdpWi => format!(
            "ldp {}, {}, [{}, #{}]",
            wreg(&ops[0]),
            wreg(&ops[1]),
            xreg(&ops[2]),
            bytes(&ops[3])
        ),
        Opcode::LdpQi => format!(
            "ldp {}, {}, [{}, #{}]",
            qreg(&ops[0]),
            qreg(&ops[1]),
            xreg(&ops[2]),
            bytes(&ops[3])
        ),
        Opcode::StpXi => format!(
            "stp {}, {}, [{}, #{}]",
            xreg(&ops[0]),
            xreg(&ops[1]),
            xreg(&ops[2]),
            bytes(&ops[3])
        ),
        Opcode::StpWi => format!(
            "stp {}, {}, [{}, #{}]",
            wreg(&ops[0]),
            wreg(&ops[1]),
            xreg(&ops[2]),
            bytes(&ops[3])
        ),
        Opcode::StpQi => format!(
            "stp {}, {}, [{}, #{}]",
            qreg(&ops[0]),
            qreg(&ops[1]),
            xreg(&ops[2]),
            bytes(&ops[3])
        ),
        // Writeback displacements are stored in 8-byte units.
        Opcode::StpXpre => format!(
            "stp {}, {}, [{}, #{}]!",
            xreg(&ops[1]),
            xreg(&ops[2]),
            xreg(&ops[3]),
            imm(&ops[4]) * 8
        ),
        Opcode::LdpXpost => format!(
            "ldp {}, {}, [{}], #{}",
            xreg(&ops[1]),
            xreg(&ops[2]),
            xreg(&ops[3]),
            imm(&ops[4]) * 8
        ),

        Opcode::Adr => format!("adr {}, {}", xreg(&ops[0]), sym(&ops[1], symbols)),
        Opcode::Adrp => format!("adrp {}, {}", xreg(&ops[0]), sym(&ops[1], symbols)),
        Opcode::LdrXlit => format!("ldr {}, ={}", xreg(&ops[0]), sym(&ops[1], symbols)),

        Opcode::B => format!("b {}", sym(&ops[0], symbols)),
        Opcode::BCond => {
            let cond = usize::try_from(imm(&ops[0])).unwrap_or(14).min(14);
            format!("b.{} {}", COND_NAMES[cond], sym(&ops[1], symbols))
        }
        Opcode::Cbzx => format!("cbz {}, {}", xreg(&ops[0]), sym(&ops[1], symbols)),
        Opcode::Cbnzx => format!("cbnz {}, {}", xreg(&ops[0]), sym(&ops[1], symbols)),
        Opcode::Bl => format!("bl {}", sym(&ops[0], symbols)),
        Opcode::Blr => format!("blr {}", xreg(&ops[0])),
        Opcode::Ret => "ret".to_string(),
    }
}

impl Program {
    /// Render the whole program as a listing. Ignored functions are dropped,
    /// mirroring host emission.
    #[must_use]
    pub fn to_listing(&self) -> String {
        let mut out = String::new();
        for function in self.functions() {
            if function.ignored {
                continue;
            }
            write!(out, "func {}", function.name).unwrap();
            if let Some(count) = function.exec_count {
                write!(out, " count={count}").unwrap();
            }
            out.push_str(" {\n");
            for block in &function.blocks {
                if let Some(label) = block.label {
                    write!(out, "{}:", self.symbols.name(label)).unwrap();
                    if let Some(count) = block.exec_count {
                        write!(out, " count={count}").unwrap();
                    }
                    if block.landing_pad {
                        out.push_str(" landingpad");
                    }
                    out.push('\n');
                }
                for inst in &block.instructions {
                    writeln!(out, "  {}", format_instruction(inst, &self.symbols)).unwrap();
                }
                if !block.successors.is_empty() {
                    let targets: Vec<&str> = block
                        .successors
                        .iter()
                        .filter_map(|edge| {
                            function.blocks[edge.target].label.map(|l| self.symbols.name(l))
                        })
                        .collect();
                    if !targets.is_empty() {
                        writeln!(out, "  succ {}", targets.join(", ")).unwrap();
                    }
                }
            }
            out.push_str("}\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::instruction::{make_pop_pair, make_push_pair};

    #[test]
    fn formats_scaled_displacements_as_bytes() {
        let mut symbols = SymbolTable::new();
        // ldr x0, [sp, #8] is stored with immediate 1 (8-byte scale).
        let inst = Instruction::new(
            Opcode::LdrXui,
            vec![Operand::Reg(Reg::x(0)), Operand::Reg(Reg::SP), Operand::Imm(1)],
        );
        assert_eq!(format_instruction(&inst, &symbols), "ldr x0, [sp, #8]");

        let inst = Instruction::new(
            Opcode::StrWui,
            vec![Operand::Reg(Reg::x(3)), Operand::Reg(Reg::SP), Operand::Imm(2)],
        );
        assert_eq!(format_instruction(&inst, &symbols), "str w3, [sp, #8]");

        let target = symbols.get_or_create("callee");
        let call = Instruction::new(Opcode::Bl, vec![Operand::Sym(target)]);
        assert_eq!(format_instruction(&call, &symbols), "bl callee");
    }

    #[test]
    fn formats_writeback_pairs() {
        let symbols = SymbolTable::new();
        assert_eq!(
            format_instruction(&make_push_pair(Reg::FP, Reg::LR), &symbols),
            "stp x29, x30, [sp, #-16]!"
        );
        assert_eq!(
            format_instruction(&make_pop_pair(Reg::FP, Reg::LR), &symbols),
            "ldp x29, x30, [sp], #16"
        );
    }

    #[test]
    fn formats_conditional_branch() {
        let mut symbols = SymbolTable::new();
        let target = symbols.get_or_create("exit");
        let inst =
            Instruction::new(Opcode::BCond, vec![Operand::Imm(0), Operand::Sym(target)]);
        assert_eq!(format_instruction(&inst, &symbols), "b.eq exit");
    }
}
