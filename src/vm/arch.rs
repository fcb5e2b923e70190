//! The AArch64 side of the codegen contract, as data.
//!
//! The code generator and this runtime agree on a small set of encodings
//! and register assignments; keeping them here as constants and tiny
//! encoders lets both the trap substrate and the tests speak the same
//! dialect instead of scattering magic numbers.

/// General-purpose registers carrying the callee and caller contexts.
pub const REG_VMCTX: u8 = 0;
pub const REG_CALLER_VMCTX: u8 = 1;

/// First and last general-purpose argument registers of an entry call.
pub const REG_FIRST_ARG: u8 = 2;
pub const REG_LAST_ARG: u8 = 7;

/// Register carrying the excess-result buffer when a function returns
/// more values than fit the return registers; the callee prologue saves
/// it here.
pub const REG_EXCESS_RESULTS: u8 = 23;

/// How many integer/float results return in registers (X0/X1, D0/D1).
pub const MAX_REG_RESULTS: usize = 2;

/// Callee-saved general-purpose registers the generated code must
/// preserve.
pub const CALLEE_SAVED_GPRS: core::ops::RangeInclusive<u8> = 19..=28;

/// BRK immediates the code generator emits for each trap kind; the
/// SIGTRAP handler maps them back through
/// [`crate::Trap::from_brk_immediate`].
pub const BRK_UNREACHABLE: u16 = 0;
pub const BRK_OUT_OF_BOUNDS: u16 = 1;
pub const BRK_BAD_SIGNATURE: u16 = 2;
pub const BRK_BAD_CONVERSION: u16 = 3;
pub const BRK_DIVIDE_BY_ZERO: u16 = 4;
pub const BRK_INTEGER_OVERFLOW: u16 = 5;

/// `BRK #imm16`.
pub fn brk(imm: u16) -> u32 {
    0xD420_0000 | u32::from(imm) << 5
}

/// `RET` (to X30).
pub const RET: u32 = 0xD65F_03C0;

/// `NOP`.
pub const NOP: u32 = 0xD503_201F;

/// `MOVZ Wd, #imm16` — enough constant materialization for smoke tests.
pub fn movz_w(rd: u8, imm: u16) -> u32 {
    debug_assert!(rd < 31);
    0x5280_0000 | u32::from(imm) << 5 | u32::from(rd)
}

/// `ADD Wd, Wn, Wm`.
pub fn add_w(rd: u8, rn: u8, rm: u8) -> u32 {
    debug_assert!(rd < 31 && rn < 31 && rm < 31);
    0x0B00_0000 | u32::from(rm) << 16 | u32::from(rn) << 5 | u32::from(rd)
}

/// Flattens instruction words into the little-endian byte image the
/// executable-memory manager installs.
pub fn assemble(insns: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(insns.len() * 4);
    for insn in insns {
        bytes.extend_from_slice(&insn.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Trap;

    #[test]
    fn brk_encodings_decode_to_their_traps() {
        let pairs = [
            (BRK_UNREACHABLE, Trap::UnreachableCodeReached),
            (BRK_OUT_OF_BOUNDS, Trap::MemoryOutOfBounds),
            (BRK_BAD_SIGNATURE, Trap::BadSignature),
            (BRK_BAD_CONVERSION, Trap::BadConversionToInteger),
            (BRK_DIVIDE_BY_ZERO, Trap::IntegerDivisionByZero),
            (BRK_INTEGER_OVERFLOW, Trap::IntegerOverflow),
        ];
        for (imm, trap) in pairs {
            assert_eq!(Trap::from_brk_immediate(imm), trap);
            // the instruction the generator emits round-trips through the
            // handler's decoder
            assert_eq!(crate::traps::decode_brk(brk(imm)), Some(imm));
        }
    }

    #[test]
    fn encoder_spot_checks() {
        assert_eq!(movz_w(0, 42), 0x5280_0540);
        assert_eq!(add_w(0, 2, 3), 0x0B03_0040);
        assert_eq!(brk(0), 0xD420_0000);
        assert_eq!(assemble(&[NOP, RET]).len(), 8);
        assert_eq!(&assemble(&[RET])[..], &0xD65F_03C0u32.to_le_bytes());
    }

    #[test]
    fn register_contract_is_internally_consistent() {
        assert!(REG_FIRST_ARG > REG_CALLER_VMCTX);
        assert!(REG_LAST_ARG < *CALLEE_SAVED_GPRS.start());
        assert!(CALLEE_SAVED_GPRS.contains(&REG_EXCESS_RESULTS));
        assert_eq!(REG_VMCTX, 0);
        assert_eq!(MAX_REG_RESULTS, 2);
    }
}
