//! Opcode table and method visibility flags.

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

/// A single bytecode instruction. Operand-carrying opcodes (`PUSH_LITERAL`,
/// `PUSH_ARG`, `PUSH_TEMP`, `PUSH_INSTVAR`, `POP_INTO_TEMP`,
/// `POP_INTO_INSTVAR`) take a one-byte immediate following the opcode;
/// `PUSH_OBJ_REF`, `JUMP`, `JUMP_IF_TRUE` take a four-byte little-endian
/// immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    PushSelf = 0,
    PushSuper = 1,
    PushNil = 2,
    PushTrue = 3,
    PushFalse = 4,
    PushLiteral = 5,
    PushArg = 6,
    PushTemp = 7,
    PushInstVar = 8,
    Return = 9,
    Pop = 10,
    PopIntoTemp = 11,
    PopIntoInstVar = 12,
    PushObjRef = 13,
    Call = 14,
    Jump = 15,
    JumpIfTrue = 16,
    BecomeActiveContext = 17,
    AllocNew = 18,
    AllocNewWithSize = 19,
    PrimAdd = 64,
    /// Reserved, not specified: `rcvr - arg`. Always rejected with `UnknownBytecode`.
    PrimSub = 65,
    /// Reserved, not specified: `rcvr * arg`.
    PrimMul = 66,
    /// Reserved, not specified: `rcvr / arg`.
    PrimDiv = 67,
    /// Reserved, not specified: `rcvr > arg`.
    PrimGt = 68,
    /// Reserved, not specified: `rcvr < arg`.
    PrimLt = 69,
    /// Reserved, not specified: `rcvr <= arg`.
    PrimLe = 70,
    /// Reserved, not specified: `rcvr >= arg`.
    PrimGe = 71,
}

impl Opcode {
    /// Opcodes that are decoded (for wire-format stability) but never executed.
    #[must_use]
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            Opcode::PrimSub
                | Opcode::PrimMul
                | Opcode::PrimDiv
                | Opcode::PrimGt
                | Opcode::PrimLt
                | Opcode::PrimLe
                | Opcode::PrimGe
        )
    }
}

bitflags! {
    /// The three-bit access-control field on a method, stored as the low
    /// three bits of the `visibility` instance variable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Visibility: u8 {
        /// Bit 0: the method is a class-side (static) method.
        const STATIC = 0b001;
        /// Bit 1: prevents non-subclass instance access (protected).
        const BLOCKS_NON_SUBCLASS_ACCESS = 0b010;
        /// Bit 2: prevents subclass access (combined with bit 1, this is private).
        const BLOCKS_SUBCLASS_ACCESS = 0b100;
    }
}

impl Visibility {
    pub const PROTECTED: Visibility = Visibility::BLOCKS_NON_SUBCLASS_ACCESS;
    pub const PRIVATE: Visibility =
        Visibility::from_bits_truncate(Visibility::BLOCKS_SUBCLASS_ACCESS.bits() | Visibility::BLOCKS_NON_SUBCLASS_ACCESS.bits());

    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Visibility::STATIC)
    }

    #[must_use]
    pub fn is_private_or_protected(self) -> bool {
        self.intersects(Visibility::BLOCKS_NON_SUBCLASS_ACCESS | Visibility::BLOCKS_SUBCLASS_ACCESS)
    }
}

/// Selectors with this spelling always take exactly one argument, regardless
/// of how many `:` characters they happen to contain.
pub const BINARY_SELECTORS: &[&[u8]] = &[
    b"+", b",", b"-", b"/", b"*", b">", b"<", b"<=", b">=", b"=", b"~=", b"==", b"~==", b"&&",
    b"||", b"\\",
];

/// Arity of a send to `selector`: 1 for the reserved binary-operator
/// spellings, otherwise the number of `:` characters in the name.
#[must_use]
pub fn selector_arity(selector: &[u8]) -> usize {
    if BINARY_SELECTORS.contains(&selector) {
        1
    } else {
        selector.iter().filter(|&&b| b == b':').count()
    }
}

#[test]
fn visibility_constants_match_bit_layout() {
    assert_eq!(Visibility::STATIC.bits(), 0b001);
    assert_eq!(Visibility::PROTECTED.bits(), 0b010);
    assert_eq!(Visibility::PRIVATE.bits(), 0b110);
}

#[test]
fn arity_counts_colons_except_for_binary_selectors() {
    assert_eq!(selector_arity(b"foo:bar:"), 2);
    assert_eq!(selector_arity(b"foo"), 0);
    assert_eq!(selector_arity(b"+"), 1);
    assert_eq!(selector_arity(b"<="), 1);
}

#[test]
fn reserved_opcodes_are_flagged() {
    assert!(Opcode::PrimSub.is_reserved());
    assert!(!Opcode::PrimAdd.is_reserved());
}
