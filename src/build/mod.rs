//! Cross-platform build matrix.
//!
//! Each [`BuildTarget`](crate::target::BuildTarget) is compiled by an
//! independent job in its own working directory. The version and the
//! accelerator-log capability flag are injected into the binary's metadata
//! by the compiler; file names depend on the target alone.

mod compiler;
mod coordinator;

pub use compiler::{CommandCompiler, CompileRequest, Compiler, PlatformFlags};
pub use coordinator::{BuildMatrixCoordinator, MatrixReport};
