use crate::vm::{VMVal, WasmValType};
use crate::{enum_accessors, gc};
use core::ffi::c_void;

/// A value the host passes into or receives from compiled code.
///
/// Floats carry raw bits; use `f32::from_bits`/`f64::from_bits` at the
/// edges. References carry the tagged 64-bit encoding of
/// [`crate::gc`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// The raw bits of a 32-bit float.
    F32(u32),
    /// The raw bits of a 64-bit float.
    F64(u64),
    /// A function reference: a tagged native code pointer or null.
    FuncRef(*const c_void),
    /// Any reference value in the tagged 64-bit encoding.
    Ref(u64),
}

impl Val {
    /// The null function reference.
    #[inline]
    pub const fn null_func_ref() -> Self {
        Self::FuncRef(core::ptr::null())
    }

    /// The null reference.
    #[inline]
    pub const fn null_ref() -> Self {
        Self::Ref(0)
    }

    #[inline]
    pub fn ty(&self) -> WasmValType {
        match self {
            Val::I32(_) => WasmValType::I32,
            Val::I64(_) | Val::FuncRef(_) | Val::Ref(_) => WasmValType::I64,
            Val::F32(_) => WasmValType::F32,
            Val::F64(_) => WasmValType::F64,
        }
    }

    /// Converts into the value slot shared with JIT code.
    pub fn to_vmval(self) -> VMVal {
        match self {
            Val::I32(i) => VMVal::i32(i),
            Val::I64(i) => VMVal::i64(i),
            Val::F32(bits) => VMVal::f32(bits),
            Val::F64(bits) => VMVal::f64(bits),
            Val::FuncRef(ptr) => {
                if ptr.is_null() {
                    VMVal::u64(0)
                } else {
                    VMVal::u64(gc::encode_native_funcref(ptr))
                }
            }
            Val::Ref(bits) => VMVal::u64(bits),
        }
    }

    /// Reads a value slot back under a known type.
    pub fn from_vmval(raw: VMVal, ty: WasmValType) -> Self {
        match ty {
            WasmValType::I32 => Self::I32(raw.get_i32()),
            WasmValType::I64 => Self::I64(raw.get_i64()),
            WasmValType::F32 => Self::F32(raw.get_f32()),
            WasmValType::F64 => Self::F64(raw.get_f64()),
        }
    }

    /// Is this value the null of its class?
    #[inline]
    pub fn is_null(&self) -> bool {
        match self {
            Val::FuncRef(ptr) => ptr.is_null(),
            Val::Ref(bits) => *bits == 0,
            _ => false,
        }
    }

    enum_accessors! {
        e
        (I32(i32) get_i32 unwrap_i32 *e)
        (I64(i64) get_i64 unwrap_i64 *e)
        (F32(f32) get_f32 unwrap_f32 f32::from_bits(*e))
        (F64(f64) get_f64 unwrap_f64 f64::from_bits(*e))
        (Ref(u64) get_ref unwrap_ref *e)
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmval_round_trip_by_type() {
        let cases = [
            (Val::I32(-7), WasmValType::I32),
            (Val::I64(1 << 40), WasmValType::I64),
            (Val::F32(3.5f32.to_bits()), WasmValType::F32),
            (Val::F64(f64::NAN.to_bits()), WasmValType::F64),
        ];
        for (val, ty) in cases {
            assert_eq!(Val::from_vmval(val.to_vmval(), ty), val);
            assert_eq!(val.ty(), ty);
        }
    }

    #[test]
    fn funcrefs_tag_on_the_way_in() {
        let ptr = 0x6000 as *const c_void;
        let raw = Val::FuncRef(ptr).to_vmval();
        assert_eq!(
            gc::decode(raw.get_u64()),
            gc::RefValue::NativeFunc(ptr)
        );
        assert_eq!(Val::null_func_ref().to_vmval().get_u64(), 0);
        assert!(Val::null_func_ref().is_null());
        assert!(Val::null_ref().is_null());
        assert!(!Val::I32(0).is_null());
    }

    #[test]
    fn accessors() {
        assert_eq!(Val::I32(3).get_i32(), Some(3));
        assert_eq!(Val::I32(3).get_i64(), None);
        assert_eq!(Val::from(2.0f32).unwrap_f32().to_bits(), 2.0f32.to_bits());
        assert_eq!(Val::from(-1i64).unwrap_i64(), -1);
    }
}
