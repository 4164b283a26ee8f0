//! The fault model: #UD, #GP, #NM, #PF as a single non-local-exit error type.
//!
//! A handler that needs to abort the current instruction returns `Err(Exception)`
//! instead of unwinding an exception; the outer loop (or, in tests, the caller of
//! `step`) sees the `Result` and stops applying further side effects.

use thiserror::Error;

/// The four fault kinds this core can raise, plus `InvalidOpcode` for decode-time
/// dead ends (undefined opcode slots, lock-prefix misuse) that precede any
/// architectural exception classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Exception {
    /// #UD — invalid/undefined opcode.
    #[error("#UD invalid opcode")]
    InvalidOpcode,

    /// #GP(error_code) — general protection fault.
    #[error("#GP(0x{error_code:x})")]
    GeneralProtection { error_code: u32 },

    /// #NM — device not available (FPU/SSE state unavailable, CR0.TS set).
    #[error("#NM device not available")]
    DeviceNotAvailable,

    /// #PF(addr, error_code) — page fault during a linear memory access.
    #[error("#PF at {addr:#x} (error_code=0x{error_code:x})")]
    PageFault { addr: u32, error_code: u32 },
}

impl Exception {
    /// Shorthand for the extremely common `#GP(0)` (privilege/encoding violations
    /// that carry no meaningful selector error code).
    pub const fn gp0() -> Self {
        Exception::GeneralProtection { error_code: 0 }
    }

    pub const fn gp(error_code: u32) -> Self {
        Exception::GeneralProtection { error_code }
    }
}

/// Raise #UD.
pub fn trigger_ud<T>() -> Result<T, Exception> {
    Err(Exception::InvalidOpcode)
}

/// Raise #GP(error_code).
pub fn trigger_gp<T>(error_code: u32) -> Result<T, Exception> {
    Err(Exception::GeneralProtection { error_code })
}

/// Raise #NM.
pub fn trigger_nm<T>() -> Result<T, Exception> {
    Err(Exception::DeviceNotAvailable)
}

/// Raise #PF.
pub fn trigger_pf<T>(addr: u32, error_code: u32) -> Result<T, Exception> {
    Err(Exception::PageFault { addr, error_code })
}

/// An unreachable dispatch slot or an unknown-but-required MSR index: an
/// implementation defect in the emulator itself, not an architectural fault.
/// `spec.md` calls this out explicitly as a fatal assertion.
#[track_caller]
pub fn fatal(msg: &str) -> ! {
    tracing::error!(target: "ia32_cpu_core", "{msg}");
    panic!("ia32-cpu-core: {msg}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gp0_is_general_protection_with_zero_code() {
        assert_eq!(Exception::gp0(), Exception::GeneralProtection { error_code: 0 });
    }

    #[test]
    fn gp_carries_the_supplied_error_code() {
        assert_eq!(
            Exception::gp(0x13),
            Exception::GeneralProtection { error_code: 0x13 }
        );
    }

    #[test]
    fn trigger_helpers_return_the_matching_variant() {
        assert_eq!(trigger_ud::<()>(), Err(Exception::InvalidOpcode));
        assert_eq!(trigger_gp::<()>(7), Err(Exception::gp(7)));
        assert_eq!(trigger_nm::<()>(), Err(Exception::DeviceNotAvailable));
        assert_eq!(
            trigger_pf::<()>(0x1000, 2),
            Err(Exception::PageFault {
                addr: 0x1000,
                error_code: 2
            })
        );
    }
}
