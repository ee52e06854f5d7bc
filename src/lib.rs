//! Object memory and bytecode interpreter for the QSIL virtual machine.
//!
//! A QSIL image is a heap of uniformly tagged objects — classes, methods,
//! and activation records are themselves ordinary objects — interpreted by
//! a small stack-oriented bytecode machine. This crate owns the object
//! model, the context (activation record) machinery, the bytecode
//! dispatch loop, method lookup, the mark-and-compact collector, and the
//! on-disk image codec. Command-line glue lives in the `qsil` binary.

pub mod bytecode;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gc;
pub mod ids;
pub mod image;
pub mod interpreter;
pub mod memory;
pub mod object;

pub use error::{Error, Result};
pub use interpreter::Interpreter;
