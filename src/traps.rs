use core::sync::atomic::{AtomicI32, Ordering};

/// A WebAssembly trap.
///
/// The numeric codes are part of the contract with the embedder: they are
/// what the trampoline returns after a `sigsetjmp` return and what
/// [`get_trap_code`] reports.
#[derive(onlyerror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// An out-of-bounds memory or table access.
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    /// The current call stack was exhausted.
    #[error("call stack exhausted")]
    StackExhausted,
    /// Code that was supposed to have been unreachable was reached.
    #[error("unreachable code executed")]
    UnreachableCodeReached,
    /// Signature mismatch on indirect call or failed `ref.cast`.
    #[error("indirect call signature mismatch")]
    BadSignature,
    /// Failed float-to-int conversion.
    #[error("invalid conversion to integer")]
    BadConversionToInteger,
    /// An integer division by zero.
    #[error("integer division by zero")]
    IntegerDivisionByZero,
    /// An integer arithmetic operation caused an overflow.
    #[error("integer overflow")]
    IntegerOverflow,
    /// A machine fault that could not be attributed to wasm semantics.
    #[error("unknown trap")]
    Unknown,
}

impl From<Trap> for u8 {
    fn from(value: Trap) -> Self {
        match value {
            Trap::MemoryOutOfBounds => 1,
            Trap::StackExhausted => 2,
            Trap::UnreachableCodeReached => 3,
            Trap::BadSignature => 4,
            Trap::BadConversionToInteger => 5,
            Trap::IntegerDivisionByZero => 6,
            Trap::IntegerOverflow => 7,
            Trap::Unknown => 99,
        }
    }
}

impl TryFrom<u8> for Trap {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::MemoryOutOfBounds),
            2 => Ok(Self::StackExhausted),
            3 => Ok(Self::UnreachableCodeReached),
            4 => Ok(Self::BadSignature),
            5 => Ok(Self::BadConversionToInteger),
            6 => Ok(Self::IntegerDivisionByZero),
            7 => Ok(Self::IntegerOverflow),
            99 => Ok(Self::Unknown),
            _ => Err(()),
        }
    }
}

impl Trap {
    /// The numeric code surfaced to the embedder.
    #[inline]
    pub fn code(self) -> i32 {
        i32::from(u8::from(self))
    }

    /// Maps a BRK immediate emitted by the code generator to its trap.
    ///
    /// This is the §BRK half of the codegen contract: the generator
    /// encodes trap kinds in the 16-bit immediate of the AArch64 `BRK`
    /// instruction.
    pub fn from_brk_immediate(imm: u16) -> Self {
        match imm {
            0 => Self::UnreachableCodeReached,
            1 => Self::MemoryOutOfBounds,
            2 => Self::BadSignature,
            3 => Self::BadConversionToInteger,
            4 => Self::IntegerDivisionByZero,
            5 => Self::IntegerOverflow,
            _ => Self::Unknown,
        }
    }
}

/// Decodes an AArch64 instruction word, returning the BRK immediate if the
/// word is a BRK.
///
/// Encoding: `0xD420_0000 | imm16 << 5`.
pub(crate) fn decode_brk(insn: u32) -> Option<u16> {
    if insn & 0xFFE0_001F == 0xD420_0000 {
        Some(((insn >> 5) & 0xFFFF) as u16)
    } else {
        None
    }
}

/// Code of the most recent trap caught by the trampoline, 0 if none.
static LAST_TRAP: AtomicI32 = AtomicI32::new(0);

pub(crate) fn record_trap(trap: Trap) {
    LAST_TRAP.store(trap.code(), Ordering::SeqCst);
}

/// Returns the code of the most recently caught trap, or 0.
pub fn get_trap_code() -> i32 {
    LAST_TRAP.load(Ordering::SeqCst)
}

/// Clears the recorded trap code.
pub fn clear_trap() {
    LAST_TRAP.store(0, Ordering::SeqCst);
}
