pub mod error;
pub mod outline;
pub mod program;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use error::{Error, Result};
pub use outline::{OutlineOptions, OutliningPass, PassStats};
pub use program::{
    Arch, Function, Instruction, Opcode, Operand, Program, Reg, parse_program,
};
