// Listing parser: the assembly-like text form used by fixtures and the CLI.
//
// Grammar (one item per line, `//` starts a comment):
//
//   func <name> [count=<n>] [eh] {
//     [<label>: [count=<n>] [landingpad]]
//     <instruction>
//     [succ <label>[, <label>...]]
//   }
//
// Successor edges default to branch targets plus textual fallthrough; an
// explicit `succ` line overrides them for the current block.

use std::collections::HashMap;

use super::display::COND_NAMES;
use super::instruction::{Instruction, Operand, Reg};
use super::opcode::Opcode;
use super::{Arch, BasicBlock, Function, Program, SuccessorEdge, SymbolId, SymbolTable};
use crate::error::{Error, Result};
use crate::outline::predicates::memory_scale;

/// Parse a whole program listing.
pub fn parse_program(src: &str) -> Result<Program> {
    let mut program = Program::new();
    program.arch = Arch::Aarch64;

    let mut current: Option<FunctionInProgress> = None;

    for (idx, raw) in src.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("func ") {
            if current.is_some() {
                return Err(err(line_no, "nested 'func' without closing '}'"));
            }
            current = Some(FunctionInProgress::open(rest, line_no)?);
        } else if line == "}" {
            let fip = current
                .take()
                .ok_or_else(|| err(line_no, "'}' without an open function"))?;
            let function = fip.close(&mut program.symbols, line_no)?;
            program.add_function(function);
        } else if let Some(rest) = line.strip_prefix("succ ") {
            let fip = current
                .as_mut()
                .ok_or_else(|| err(line_no, "'succ' outside a function"))?;
            fip.set_explicit_successors(rest);
        } else if let Some((label, attrs)) = split_label(line) {
            let fip = current
                .as_mut()
                .ok_or_else(|| err(line_no, "label outside a function"))?;
            fip.start_block(label, attrs, &mut program.symbols, line_no)?;
        } else {
            let fip = current
                .as_mut()
                .ok_or_else(|| err(line_no, "instruction outside a function"))?;
            let inst = parse_instruction(line, &mut program.symbols)
                .map_err(|e| err(line_no, &e.to_string()))?;
            fip.push_instruction(inst);
        }
    }

    if current.is_some() {
        return Err(err(src.lines().count(), "unterminated function at end of input"));
    }
    Ok(program)
}

fn err(line: usize, message: &str) -> Error {
    Error::Parse { line, message: message.to_string() }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// `label:` lines, with optional attributes after the colon.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let label = &line[..colon];
    if label.is_empty() || !label.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return None;
    }
    Some((label, line[colon + 1..].trim()))
}

struct FunctionInProgress {
    function: Function,
    /// Explicit `succ` label lists, by block index.
    explicit_succs: HashMap<usize, Vec<String>>,
    entry_is_eh: bool,
}

impl FunctionInProgress {
    fn open(header: &str, line_no: usize) -> Result<Self> {
        let header = header
            .strip_suffix('{')
            .ok_or_else(|| err(line_no, "expected '{' at end of 'func' line"))?
            .trim();
        let mut parts = header.split_whitespace();
        let name = parts.next().ok_or_else(|| err(line_no, "missing function name"))?;
        let mut function = Function::new(name);
        let mut entry_is_eh = false;
        for attr in parts {
            if let Some(value) = attr.strip_prefix("count=") {
                let count = value
                    .parse::<u64>()
                    .map_err(|_| err(line_no, "invalid count attribute"))?;
                function.exec_count = Some(count);
            } else if attr == "eh" {
                entry_is_eh = true;
            } else {
                return Err(err(line_no, &format!("unknown function attribute '{attr}'")));
            }
        }
        Ok(Self { function, explicit_succs: HashMap::new(), entry_is_eh })
    }

    fn start_block(
        &mut self,
        label: &str,
        attrs: &str,
        symbols: &mut SymbolTable,
        line_no: usize,
    ) -> Result<()> {
        let label_sym = symbols.get_or_create(label);
        // A label on an untouched implicit entry block renames it in place.
        let reuse = matches!(
            self.function.blocks.last(),
            Some(bb) if bb.label.is_none() && bb.is_empty()
        );
        if reuse {
            let last = self.function.blocks.last_mut().unwrap();
            last.label = Some(label_sym);
        } else {
            self.function.blocks.push(BasicBlock::new(Some(label_sym)));
        }
        let block = self.function.blocks.last_mut().unwrap();
        for attr in attrs.split_whitespace() {
            if let Some(value) = attr.strip_prefix("count=") {
                let count =
                    value.parse::<u64>().map_err(|_| err(line_no, "invalid block count"))?;
                block.exec_count = Some(count);
            } else if attr == "landingpad" {
                block.landing_pad = true;
            } else {
                return Err(err(line_no, &format!("unknown block attribute '{attr}'")));
            }
        }
        Ok(())
    }

    fn push_instruction(&mut self, inst: Instruction) {
        if self.function.blocks.is_empty() {
            self.function.blocks.push(BasicBlock::new(None));
        }
        self.function.blocks.last_mut().unwrap().instructions.push(inst);
    }

    fn set_explicit_successors(&mut self, rest: &str) {
        if self.function.blocks.is_empty() {
            self.function.blocks.push(BasicBlock::new(None));
        }
        let labels = rest.split(',').map(|s| s.trim().to_string()).collect();
        self.explicit_succs.insert(self.function.blocks.len() - 1, labels);
    }

    fn close(mut self, symbols: &mut SymbolTable, line_no: usize) -> Result<Function> {
        if self.entry_is_eh {
            if let Some(entry) = self.function.blocks.first_mut() {
                entry.landing_pad = true;
            }
        }

        let by_label: HashMap<SymbolId, usize> = self
            .function
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, bb)| bb.label.map(|l| (l, i)))
            .collect();

        // Resolve successor edges block by block.
        let num_blocks = self.function.blocks.len();
        for index in 0..num_blocks {
            let targets: Vec<usize> = if let Some(labels) = self.explicit_succs.get(&index) {
                let mut resolved = Vec::new();
                for label in labels {
                    let sym = symbols.get_or_create(label);
                    let target = by_label.get(&sym).copied().ok_or_else(|| {
                        err(line_no, &format!("unknown successor label '{label}'"))
                    })?;
                    resolved.push(target);
                }
                resolved
            } else {
                default_successors(&self.function, index, &by_label)
            };
            let edges: Vec<SuccessorEdge> = targets
                .into_iter()
                .map(|target| SuccessorEdge {
                    target,
                    count: self.function.blocks[target].known_execution_count(),
                })
                .collect();
            self.function.blocks[index].successors = edges;
        }

        self.function.recompute_landing_pads();
        Ok(self.function)
    }
}

/// Fallthrough plus intra-function branch targets.
fn default_successors(
    function: &Function,
    index: usize,
    by_label: &HashMap<SymbolId, usize>,
) -> Vec<usize> {
    let block = &function.blocks[index];
    let next = (index + 1 < function.blocks.len()).then_some(index + 1);
    let Some(last) = block.instructions.last() else {
        return next.into_iter().collect();
    };

    let branch_target = || {
        last.target_sym().and_then(|sym| by_label.get(&sym).copied())
    };

    if last.opcode.is_return() {
        Vec::new()
    } else if last.opcode.is_unconditional_branch() {
        branch_target().into_iter().collect()
    } else if last.opcode.is_conditional_branch() {
        let mut succs: Vec<usize> = branch_target().into_iter().collect();
        if let Some(next) = next
            && !succs.contains(&next)
        {
            succs.push(next);
        }
        succs
    } else {
        next.into_iter().collect()
    }
}

/// Parse a single instruction in listing syntax.
pub fn parse_instruction(text: &str, symbols: &mut SymbolTable) -> Result<Instruction> {
    let bad = |message: &str| Error::Instruction {
        text: text.to_string(),
        message: message.to_string(),
    };

    let text = text.trim();
    let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
        Some((m, r)) => (m, r.trim()),
        None => (text, ""),
    };

    match mnemonic {
        "nop" => return Ok(Instruction::new(Opcode::Nop, Vec::new())),
        "ret" => return Ok(Instruction::new(Opcode::Ret, Vec::new())),
        ".cfi" => return Ok(Instruction::new(Opcode::Cfi, Vec::new())),
        "invalid" => return Ok(Instruction::new(Opcode::Invalid, Vec::new())),
        _ => {}
    }

    // Conditional branch: b.<cond> <label>
    if let Some(cond_name) = mnemonic.strip_prefix("b.") {
        let cond = COND_NAMES
            .iter()
            .position(|&c| c == cond_name)
            .ok_or_else(|| bad("unknown condition code"))?;
        let target = symbols.get_or_create(rest);
        return Ok(Instruction::new(
            Opcode::BCond,
            vec![Operand::Imm(i64::try_from(cond).unwrap()), Operand::Sym(target)],
        ));
    }

    let args: Vec<&str> = split_args(rest);
    match mnemonic {
        "b" => {
            let target = symbols.get_or_create(rest);
            Ok(Instruction::new(Opcode::B, vec![Operand::Sym(target)]))
        }
        "bl" => {
            let target = symbols.get_or_create(rest);
            Ok(Instruction::new(Opcode::Bl, vec![Operand::Sym(target)]))
        }
        "blr" => {
            let (reg, _) = parse_reg(rest).ok_or_else(|| bad("expected register"))?;
            Ok(Instruction::new(Opcode::Blr, vec![Operand::Reg(reg)]))
        }
        "cbz" | "cbnz" => {
            if args.len() != 2 {
                return Err(bad("expected 'reg, label'"));
            }
            let (reg, _) = parse_reg(args[0]).ok_or_else(|| bad("expected register"))?;
            let target = symbols.get_or_create(args[1]);
            let opcode = if mnemonic == "cbz" { Opcode::Cbzx } else { Opcode::Cbnzx };
            Ok(Instruction::new(opcode, vec![Operand::Reg(reg), Operand::Sym(target)]))
        }
        "adr" | "adrp" => {
            if args.len() != 2 {
                return Err(bad("expected 'reg, symbol'"));
            }
            let (reg, _) = parse_reg(args[0]).ok_or_else(|| bad("expected register"))?;
            let sym = symbols.get_or_create(args[1]);
            let opcode = if mnemonic == "adr" { Opcode::Adr } else { Opcode::Adrp };
            Ok(Instruction::new(opcode, vec![Operand::Reg(reg), Operand::Sym(sym)]))
        }
        "mov" => {
            if args.len() != 2 {
                return Err(bad("expected 'reg, #imm'"));
            }
            let (reg, _) = parse_reg(args[0]).ok_or_else(|| bad("expected register"))?;
            let value = parse_imm(args[1]).ok_or_else(|| bad("expected immediate"))?;
            Ok(Instruction::new(Opcode::MovZXi, vec![Operand::Reg(reg), Operand::Imm(value)]))
        }
        "add" | "sub" | "and" | "orr" | "eor" | "mul" | "lsl" | "lsr" | "asr" | "ror" => {
            parse_alu(mnemonic, &args, &bad)
        }
        "ldr" | "str" | "ldrh" | "ldrb" | "strh" | "strb" | "ldur" | "stur" => {
            parse_load_store(mnemonic, rest, &args, symbols, &bad)
        }
        "ldp" | "stp" => parse_pair(mnemonic, rest, &bad),
        _ => Err(bad("unknown mnemonic")),
    }
}

fn parse_alu(
    mnemonic: &str,
    args: &[&str],
    bad: &dyn Fn(&str) -> Error,
) -> Result<Instruction> {
    if args.len() != 3 {
        return Err(bad("expected three operands"));
    }
    let (dst, _) = parse_reg(args[0]).ok_or_else(|| bad("expected destination register"))?;
    let (src, _) = parse_reg(args[1]).ok_or_else(|| bad("expected source register"))?;

    if let Some(imm) = parse_imm(args[2]) {
        let opcode = match mnemonic {
            "add" => Opcode::AddXri,
            "sub" => Opcode::SubXri,
            "lsl" => Opcode::LslXri,
            "lsr" => Opcode::LsrXri,
            "asr" => Opcode::AsrXri,
            "ror" => Opcode::RorXri,
            _ => return Err(bad("immediate form not supported for this mnemonic")),
        };
        return Ok(Instruction::new(
            opcode,
            vec![Operand::Reg(dst), Operand::Reg(src), Operand::Imm(imm)],
        ));
    }

    let (rhs, _) = parse_reg(args[2]).ok_or_else(|| bad("expected register or immediate"))?;
    let opcode = match mnemonic {
        "add" => Opcode::AddXrr,
        "sub" => Opcode::SubXrr,
        "and" => Opcode::AndXrr,
        "orr" => Opcode::OrrXrr,
        "eor" => Opcode::EorXrr,
        "mul" => Opcode::MulXrr,
        _ => return Err(bad("register form not supported for this mnemonic")),
    };
    Ok(Instruction::new(
        opcode,
        vec![Operand::Reg(dst), Operand::Reg(src), Operand::Reg(rhs)],
    ))
}

fn parse_load_store(
    mnemonic: &str,
    rest: &str,
    args: &[&str],
    symbols: &mut SymbolTable,
    bad: &dyn Fn(&str) -> Error,
) -> Result<Instruction> {
    // Literal-pool form: ldr xN, =sym
    if mnemonic == "ldr"
        && let Some((reg_text, sym_text)) = rest.split_once(',')
        && let Some(sym_name) = sym_text.trim().strip_prefix('=')
    {
        let (reg, _) = parse_reg(reg_text.trim()).ok_or_else(|| bad("expected register"))?;
        let sym = symbols.get_or_create(sym_name);
        return Ok(Instruction::new(Opcode::LdrXlit, vec![Operand::Reg(reg), Operand::Sym(sym)]));
    }

    if args.is_empty() {
        return Err(bad("expected 'reg, [base, #imm]'"));
    }
    let (reg, width) = parse_reg(args[0]).ok_or_else(|| bad("expected register"))?;
    let mem = rest[rest.find('[').ok_or_else(|| bad("expected memory operand"))?..].trim();
    let (base, offset, writeback) = parse_mem(mem).ok_or_else(|| bad("bad memory operand"))?;
    if writeback != Writeback::None {
        return Err(bad("writeback is only supported on register pairs"));
    }

    let opcode = match (mnemonic, width) {
        ("ldr", 'x') => Opcode::LdrXui,
        ("ldr", 'w') => Opcode::LdrWui,
        ("ldr", 'q') => Opcode::LdrQui,
        ("ldrh", 'w') => Opcode::LdrHui,
        ("ldrb", 'w') => Opcode::LdrBui,
        ("ldur", 'x') => Opcode::LdurXi,
        ("str", 'x') => Opcode::StrXui,
        ("str", 'w') => Opcode::StrWui,
        ("str", 'q') => Opcode::StrQui,
        ("strh", 'w') => Opcode::StrHui,
        ("strb", 'w') => Opcode::StrBui,
        ("stur", 'x') => Opcode::SturXi,
        _ => return Err(bad("unsupported load/store width")),
    };
    let scaled = scale_displacement(opcode, offset, bad)?;
    Ok(Instruction::new(
        opcode,
        vec![Operand::Reg(reg), Operand::Reg(base), Operand::Imm(scaled)],
    ))
}

fn parse_pair(mnemonic: &str, rest: &str, bad: &dyn Fn(&str) -> Error) -> Result<Instruction> {
    let bracket = rest.find('[').ok_or_else(|| bad("expected memory operand"))?;
    let regs: Vec<&str> = split_args(rest[..bracket].trim().trim_end_matches(','));
    if regs.len() != 2 {
        return Err(bad("expected two registers"));
    }
    let (r1, w1) = parse_reg(regs[0]).ok_or_else(|| bad("expected register"))?;
    let (r2, w2) = parse_reg(regs[1]).ok_or_else(|| bad("expected register"))?;
    if w1 != w2 {
        return Err(bad("mismatched register widths"));
    }
    let (base, offset, writeback) = parse_mem(rest[bracket..].trim())
        .ok_or_else(|| bad("bad memory operand"))?;

    match writeback {
        Writeback::None => {
            let opcode = match (mnemonic, w1) {
                ("ldp", 'x') => Opcode::LdpXi,
                ("ldp", 'w') => Opcode::LdpWi,
                ("ldp", 'q') => Opcode::LdpQi,
                ("stp", 'x') => Opcode::StpXi,
                ("stp", 'w') => Opcode::StpWi,
                ("stp", 'q') => Opcode::StpQi,
                _ => return Err(bad("unsupported pair width")),
            };
            let scaled = scale_displacement(opcode, offset, bad)?;
            Ok(Instruction::new(
                opcode,
                vec![
                    Operand::Reg(r1),
                    Operand::Reg(r2),
                    Operand::Reg(base),
                    Operand::Imm(scaled),
                ],
            ))
        }
        Writeback::Pre if mnemonic == "stp" && w1 == 'x' => {
            if offset % 8 != 0 {
                return Err(bad("pre-index displacement must be 8-byte aligned"));
            }
            Ok(Instruction::new(
                Opcode::StpXpre,
                vec![
                    Operand::Reg(base),
                    Operand::Reg(r1),
                    Operand::Reg(r2),
                    Operand::Reg(base),
                    Operand::Imm(offset / 8),
                ],
            ))
        }
        Writeback::Post if mnemonic == "ldp" && w1 == 'x' => {
            if offset % 8 != 0 {
                return Err(bad("post-index displacement must be 8-byte aligned"));
            }
            Ok(Instruction::new(
                Opcode::LdpXpost,
                vec![
                    Operand::Reg(base),
                    Operand::Reg(r1),
                    Operand::Reg(r2),
                    Operand::Reg(base),
                    Operand::Imm(offset / 8),
                ],
            ))
        }
        _ => Err(bad("unsupported writeback form")),
    }
}

fn scale_displacement(
    opcode: Opcode,
    offset: i64,
    bad: &dyn Fn(&str) -> Error,
) -> Result<i64> {
    let scale = memory_scale(opcode);
    if offset % scale != 0 {
        return Err(bad("displacement not divisible by access scale"));
    }
    Ok(offset / scale)
}

#[derive(PartialEq, Eq)]
enum Writeback {
    None,
    Pre,
    Post,
}

/// `[base, #imm]`, `[base]`, `[base, #imm]!` or `[base], #imm`.
fn parse_mem(text: &str) -> Option<(Reg, i64, Writeback)> {
    let close = text.find(']')?;
    let inner = &text[1..close];
    let tail = text[close + 1..].trim();

    let (base_text, inner_off) = match inner.split_once(',') {
        Some((b, o)) => (b.trim(), Some(o.trim())),
        None => (inner.trim(), None),
    };
    let (base, _) = parse_reg(base_text)?;

    if tail == "!" {
        return Some((base, parse_imm(inner_off?)?, Writeback::Pre));
    }
    if let Some(post) = tail.strip_prefix(',') {
        if inner_off.is_some() {
            return None;
        }
        return Some((base, parse_imm(post.trim())?, Writeback::Post));
    }
    if !tail.is_empty() {
        return None;
    }
    let offset = match inner_off {
        Some(o) => parse_imm(o)?,
        None => 0,
    };
    Some((base, offset, Writeback::None))
}

/// Split a comma-separated operand list that contains no bracketed operands.
fn split_args(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').map(str::trim).collect()
}

fn parse_reg(text: &str) -> Option<(Reg, char)> {
    match text {
        "sp" | "wsp" => return Some((Reg::SP, 'x')),
        "fp" => return Some((Reg::FP, 'x')),
        "lr" => return Some((Reg::LR, 'x')),
        _ => {}
    }
    if text.len() < 2 || !text.is_ascii() {
        return None;
    }
    let (prefix, digits) = text.split_at(1);
    let width = prefix.chars().next()?;
    if !matches!(width, 'x' | 'w' | 'q') {
        return None;
    }
    let n: u8 = digits.parse().ok()?;
    if n > 30 {
        return None;
    }
    Some((Reg(n), width))
}

fn parse_imm(text: &str) -> Option<i64> {
    text.strip_prefix('#')?.parse().ok()
}
