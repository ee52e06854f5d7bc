//! Fatal error taxonomy for the object memory and interpreter.

use std::{error, fmt, io};

use crate::ids::ObjectId;

/// A bytecode position, used to annotate fatal errors raised mid-interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodePosition {
    pub context_id: ObjectId,
    pub pc: i32,
}

impl fmt::Display for BytecodePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context {} at pc {}", self.context_id, self.pc)
    }
}

/// Every fatal failure mode the core can raise.
#[derive(Debug)]
pub enum Error {
    MalformedImage(&'static str),
    DanglingReference(ObjectId),
    UnknownBytecode { opcode: u8, at: BytecodePosition },
    DoesNotUnderstand { selector: String, at: BytecodePosition },
    TypeError { reason: &'static str, at: BytecodePosition },
    StackUnderflow { at: BytecodePosition },
    IndexOutOfRange { index: u32, len: usize, at: BytecodePosition },
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedImage(reason) => write!(f, "malformed image: {reason}"),
            Self::DanglingReference(id) => write!(f, "dangling reference to object {id}"),
            Self::UnknownBytecode { opcode, at } => {
                write!(f, "unknown bytecode {opcode} at {at}")
            }
            Self::DoesNotUnderstand { selector, at } => {
                write!(f, "{at}: does not understand `{selector}`")
            }
            Self::TypeError { reason, at } => write!(f, "{at}: type error: {reason}"),
            Self::StackUnderflow { at } => write!(f, "{at}: stack underflow"),
            Self::IndexOutOfRange { index, len, at } => {
                write!(f, "{at}: index {index} out of range (len {len})")
            }
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
