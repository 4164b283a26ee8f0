//! CMOVcc / Jcc / SETcc end-to-end through the real dispatch tables,
//! including the 16-bit-mode EIP wraparound invariant for Jcc.

use ia32_cpu_core::flags::FLAG_ZF;
use ia32_cpu_core::registers::{EAX, ECX};
use ia32_cpu_core::{CpuCore, CpuMode, CpuState, Exception, FlatTestBus};

fn core() -> CpuCore<FlatTestBus> {
    CpuCore::new(CpuState::new(CpuMode::Protected), FlatTestBus::new(0x100))
}

fn fetch_from(bytes: &'static [u8]) -> impl FnMut() -> Result<u8, Exception> {
    let mut idx = 0usize;
    move || {
        let b = bytes[idx];
        idx += 1;
        Ok(b)
    }
}

#[test]
fn cmovz_commits_the_move_only_when_zf_is_set() {
    let mut core = core();
    core.state.set_flag(FLAG_ZF, true);
    core.state.gp.write32(EAX, 0);
    core.state.gp.write32(ECX, 0x77);
    let mut fetch = fetch_from(&[0b11_000_001]); // reg=EAX (dest), rm=ECX (source)
    core.step_0f_32(0x44, 0, &mut fetch).unwrap(); // CMOVZ
    assert_eq!(core.state.gp.read32(EAX), 0x77);
}

#[test]
fn jz_taken_in_16_bit_mode_wraps_eip_within_16_bits() {
    let mut core = core();
    core.state.set_flag(FLAG_ZF, true);
    core.state.set_eip(0xFFF0);
    let mut fetch = fetch_from(&[0x20, 0x00]); // rel16 = +0x20
    core.step_0f_16(0x84, 0, &mut fetch).unwrap(); // JZ
    assert_eq!(core.state.eip, 0x10);
}

#[test]
fn setz_writes_one_when_zf_set() {
    let mut core = core();
    core.state.set_flag(FLAG_ZF, true);
    let mut fetch = fetch_from(&[0b11_000_000]); // rm=AL
    core.step_0f_32(0x94, 0, &mut fetch).unwrap(); // SETZ
    assert_eq!(core.state.gp.read8(0), 1);
}
