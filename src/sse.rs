//! The SSE/MMX register file: eight 128-bit XMM registers and MXCSR. Full
//! floating-point semantics (SSE/SSE2 FP ops, x87) are explicit non-goals;
//! this module only carries the state the integer SSE2 subset and the 0FAE
//! management instructions (FXSAVE/FXRSTOR/LDMXCSR/STMXCSR/fences) touch.

use crate::fault::Exception;

pub const MXCSR_IE: u32 = 1 << 0;
pub const MXCSR_DE: u32 = 1 << 1;
pub const MXCSR_ZE: u32 = 1 << 2;
pub const MXCSR_OE: u32 = 1 << 3;
pub const MXCSR_UE: u32 = 1 << 4;
pub const MXCSR_PE: u32 = 1 << 5;
pub const MXCSR_DAZ: u32 = 1 << 6;
pub const MXCSR_IM: u32 = 1 << 7;
pub const MXCSR_DM: u32 = 1 << 8;
pub const MXCSR_ZM: u32 = 1 << 9;
pub const MXCSR_OM: u32 = 1 << 10;
pub const MXCSR_UM: u32 = 1 << 11;
pub const MXCSR_PM: u32 = 1 << 12;
pub const MXCSR_FZ: u32 = 1 << 15;
const MXCSR_RC_SHIFT: u32 = 13;
const MXCSR_RC_MASK: u32 = 0b11 << MXCSR_RC_SHIFT;

/// Bits an SSE2 implementation without denormal/exception-precision support
/// can legally set in MXCSR; LDMXCSR faults (#GP) if the guest sets a
/// reserved bit outside this mask.
const MXCSR_VALID_MASK: u32 = MXCSR_IE
    | MXCSR_DE
    | MXCSR_ZE
    | MXCSR_OE
    | MXCSR_UE
    | MXCSR_PE
    | MXCSR_DAZ
    | MXCSR_IM
    | MXCSR_DM
    | MXCSR_ZM
    | MXCSR_OM
    | MXCSR_UM
    | MXCSR_PM
    | MXCSR_RC_MASK
    | MXCSR_FZ;

const MXCSR_INIT: u32 = MXCSR_IM | MXCSR_DM | MXCSR_ZM | MXCSR_OM | MXCSR_UM | MXCSR_PM;

#[derive(Clone, Debug)]
pub struct SseState {
    pub xmm: [u128; 8],
    mxcsr: u32,
}

impl Default for SseState {
    fn default() -> Self {
        SseState {
            xmm: [0; 8],
            mxcsr: MXCSR_INIT,
        }
    }
}

impl SseState {
    pub fn mxcsr(&self) -> u32 {
        self.mxcsr
    }

    /// LDMXCSR: #GP(0) if any reserved bit is set.
    pub fn set_mxcsr(&mut self, value: u32) -> Result<(), Exception> {
        if value & !MXCSR_VALID_MASK != 0 {
            return Err(Exception::gp0());
        }
        self.mxcsr = value;
        Ok(())
    }

    pub fn read_xmm(&self, i: usize) -> u128 {
        self.xmm[i]
    }

    pub fn write_xmm(&mut self, i: usize, value: u128) {
        self.xmm[i] = value;
    }
}

/// Gate for any MMX/SSE-touching instruction: #NM if CR0.TS is set (lazy
/// FPU-context switch pending), #UD if CR0.EM is set (FPU/SSE emulated away
/// entirely). Named after the teacher's `task_switch_test_mmx` convention for
/// the same two-check gate ahead of an EMMS/MOVQ/MOVDQA body.
pub fn task_switch_test_mmx(cr0_ts: bool, cr0_em: bool) -> Result<(), Exception> {
    if cr0_em {
        return Err(Exception::InvalidOpcode);
    }
    if cr0_ts {
        return Err(Exception::DeviceNotAvailable);
    }
    Ok(())
}

/// FXSAVE: serialize the subset of the 512-byte legacy save area this crate
/// models (MXCSR at offset 24, XMM0..XMM7 at offset 160) into `out`. The x87
/// environment portion (offsets 0..32 besides MXCSR, and the ST(i)/MMX
/// registers at 32..160) is an explicit non-goal and is left zeroed.
pub fn fxsave(sse: &SseState, out: &mut [u8; 512]) {
    out.fill(0);
    out[24..28].copy_from_slice(&sse.mxcsr().to_le_bytes());
    out[28..32].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // MXCSR_MASK
    for i in 0..8 {
        let off = 160 + i * 16;
        out[off..off + 16].copy_from_slice(&sse.xmm[i].to_le_bytes());
    }
}

/// FXRSTOR: inverse of `fxsave`; #GP(0) if the saved MXCSR carries a reserved
/// bit (spec.md's invariant that a corrupt save area must not be silently
/// accepted).
pub fn fxrstor(sse: &mut SseState, data: &[u8; 512]) -> Result<(), Exception> {
    let mxcsr = u32::from_le_bytes(data[24..28].try_into().unwrap());
    sse.set_mxcsr(mxcsr)?;
    for i in 0..8 {
        let off = 160 + i * 16;
        sse.xmm[i] = u128::from_le_bytes(data[off..off + 16].try_into().unwrap());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ldmxcsr_rejects_reserved_bits() {
        let mut sse = SseState::default();
        assert!(sse.set_mxcsr(1 << 31).is_err());
    }

    #[test]
    fn fxsave_fxrstor_round_trips_xmm_and_mxcsr() {
        let mut sse = SseState::default();
        sse.write_xmm(3, 0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00);
        sse.set_mxcsr(MXCSR_INIT | MXCSR_PE).unwrap();
        let mut buf = [0u8; 512];
        fxsave(&sse, &mut buf);

        let mut restored = SseState::default();
        fxrstor(&mut restored, &buf).unwrap();
        assert_eq!(restored.read_xmm(3), sse.read_xmm(3));
        assert_eq!(restored.mxcsr(), sse.mxcsr());
    }

    #[test]
    fn task_switch_gate_prefers_ud_over_nm() {
        assert!(matches!(
            task_switch_test_mmx(true, true),
            Err(Exception::InvalidOpcode)
        ));
        assert!(matches!(
            task_switch_test_mmx(true, false),
            Err(Exception::DeviceNotAvailable)
        ));
        assert!(task_switch_test_mmx(false, false).is_ok());
    }
}
