// Host program model: functions, basic blocks, symbols.
//
// This is the stand-in for the binary rewriter's in-memory program. Blocks
// and functions are addressed by plain indices rather than pointers so that
// call-site rewriting cannot invalidate references held elsewhere in the
// same episode.

mod display;
mod instruction;
mod opcode;
mod parse;

pub use display::format_instruction;
pub use instruction::{
    Instruction, Operand, Reg, make_call, make_pop_pair, make_push_pair, make_return,
    make_unconditional_branch,
};
pub use opcode::{Opcode, OpcodeInfo, OpcodeKind};
pub use parse::{parse_instruction, parse_program};

/// Target architecture of a program. The outliner only understands the
/// AArch64-like ISA and is a no-op elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arch {
    #[default]
    Aarch64,
    Other,
}

/// Interned symbol handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

/// Interning symbol table for function names, block labels and temp labels.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    by_name: std::collections::HashMap<String, SymbolId>,
    next_temp: u32,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = SymbolId(u32::try_from(self.names.len()).expect("symbol table overflow"));
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    /// Create a fresh uniquely-named symbol with the given prefix.
    pub fn create_named_temp(&mut self, prefix: &str) -> SymbolId {
        loop {
            self.next_temp += 1;
            let name = format!("{prefix}{}", self.next_temp);
            if !self.by_name.contains_key(&name) {
                return self.get_or_create(&name);
            }
        }
    }

    #[must_use]
    pub fn name(&self, id: SymbolId) -> &str {
        &self.names[id.0 as usize]
    }
}

/// One control-flow edge with its execution count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessorEdge {
    /// Block index within the enclosing function.
    pub target: usize,
    pub count: u64,
}

/// A basic block: an instruction run plus its successor edges.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub label: Option<SymbolId>,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<SuccessorEdge>,
    /// Execution count from the profile; `None` when no profile covers the
    /// block.
    pub exec_count: Option<u64>,
    /// True when this block is an exception landing pad.
    pub landing_pad: bool,
}

impl BasicBlock {
    #[must_use]
    pub fn new(label: Option<SymbolId>) -> Self {
        Self { label, ..Self::default() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[must_use]
    pub const fn has_profile(&self) -> bool {
        self.exec_count.is_some()
    }

    #[must_use]
    pub fn known_execution_count(&self) -> u64 {
        self.exec_count.unwrap_or(0)
    }
}

/// A function: blocks in layout order plus profile and origin metadata.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    pub exec_count: Option<u64>,
    /// True for functions created by the outliner itself.
    pub injected: bool,
    /// Ignored functions are dropped by the host during emission.
    pub ignored: bool,
    /// Code section this function is emitted into.
    pub code_section: String,
    landing_pads: Vec<usize>,
}

impl Function {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blocks: Vec::new(),
            exec_count: None,
            injected: false,
            ignored: false,
            code_section: ".text".to_string(),
            landing_pads: Vec::new(),
        }
    }

    #[must_use]
    pub const fn has_profile(&self) -> bool {
        self.exec_count.is_some()
    }

    #[must_use]
    pub fn known_execution_count(&self) -> u64 {
        self.exec_count.unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(BasicBlock::is_empty)
    }

    #[must_use]
    pub fn has_eh_ranges(&self) -> bool {
        !self.landing_pads.is_empty()
    }

    #[must_use]
    pub fn landing_pads(&self) -> &[usize] {
        &self.landing_pads
    }

    /// Refresh the cached landing-pad set from the block flags. Invoked
    /// after every structural mutation of the block list.
    pub fn recompute_landing_pads(&mut self) {
        self.landing_pads = self
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, bb)| bb.landing_pad.then_some(i))
            .collect();
    }

    /// Total instruction count across all blocks.
    #[must_use]
    pub fn num_instructions(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }

    /// Block index carrying the given label.
    #[must_use]
    pub fn block_by_label(&self, label: SymbolId) -> Option<usize> {
        self.blocks.iter().position(|bb| bb.label == Some(label))
    }
}

/// The whole program: functions in deterministic id order plus the symbol
/// table shared by call and branch operands.
#[derive(Debug, Default, Clone)]
pub struct Program {
    pub arch: Arch,
    functions: Vec<Function>,
    pub symbols: SymbolTable,
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function and its name symbol. Returns the function index.
    pub fn add_function(&mut self, function: Function) -> usize {
        self.symbols.get_or_create(&function.name);
        self.functions.push(function);
        self.functions.len() - 1
    }

    /// Create an empty injected function placed in its own text section.
    /// Returns the function index.
    pub fn add_injected_function(&mut self, name: &str) -> usize {
        let mut function = Function::new(name);
        function.injected = true;
        function.code_section = format!(".text.{name}");
        self.add_function(function)
    }

    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    #[must_use]
    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    #[must_use]
    pub fn function(&self, index: usize) -> &Function {
        &self.functions[index]
    }

    #[must_use]
    pub fn function_mut(&mut self, index: usize) -> &mut Function {
        &mut self.functions[index]
    }

    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }
}
