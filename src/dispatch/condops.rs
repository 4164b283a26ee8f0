//! CMOVcc (0F40-4F), Jcc (0F80-8F), SETcc (0F90-9F). Grounded in spec.md
//! §4.8: all three pull their condition from `eval_condition` on the low
//! nibble of the opcode.

use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::flags::eval_condition;
use crate::mem::CpuBus;
use crate::modrm::{self, read_modrm_byte};
use crate::state::OperandSize;

use super::Fetch;

pub fn op_cmovcc<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let cc = opcode & 0x0F;
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    if eval_condition(&core.state.flags, cc) {
        if size == OperandSize::Bits32 {
            let src = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
            modrm::write_g32(modrm, &mut core.state.gp, src);
        } else {
            let src = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
            modrm::write_g16(modrm, &mut core.state.gp, src);
        }
    } else {
        // Still must read a memory operand for its side effects (a faulting
        // access must fault whether or not the move commits).
        if size == OperandSize::Bits32 {
            modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        } else {
            modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        }
    }
    Ok(())
}

pub fn op_jcc<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let cc = opcode & 0x0F;
    let rel: i32 = if size == OperandSize::Bits32 {
        let mut bytes = [0u8; 4];
        for b in bytes.iter_mut() {
            *b = fetch()?;
        }
        i32::from_le_bytes(bytes)
    } else {
        let lo = fetch()?;
        let hi = fetch()?;
        i16::from_le_bytes([lo, hi]) as i32
    };
    if eval_condition(&core.state.flags, cc) {
        let target = core.state.eip.wrapping_add(rel as u32);
        let target = if size == OperandSize::Bits16 {
            target & 0xFFFF
        } else {
            target
        };
        core.state.set_eip(target);
    }
    Ok(())
}

pub fn op_setcc<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let cc = opcode & 0x0F;
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let value = eval_condition(&core.state.flags, cc) as u8;
    modrm::write_e8(op, &mut core.state.gp, &mut core.bus, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FLAG_ZF;
    use crate::mem::FlatTestBus;
    use crate::registers::{EAX, ECX};
    use crate::state::{CpuMode, CpuState};

    fn core() -> CpuCore<FlatTestBus> {
        CpuCore::new(CpuState::new(CpuMode::Protected), FlatTestBus::new(0x20))
    }

    fn fetch_from(bytes: &[u8]) -> impl FnMut() -> Result<u8, Exception> + '_ {
        let mut idx = 0usize;
        move || {
            let b = bytes[idx];
            idx += 1;
            Ok(b)
        }
    }

    #[test]
    fn cmovz_moves_when_zf_set() {
        let mut core = core();
        core.state.set_flag(FLAG_ZF, true);
        core.state.gp.write32(EAX, 0);
        core.state.gp.write32(ECX, 0x55);
        let modrm = 0b11_000_001u8; // reg=EAX (dest), rm=ECX (source)
        let mut fetch = fetch_from(&[modrm]);
        op_cmovcc(&mut core, 0x44, 0, OperandSize::Bits32, &mut fetch).unwrap(); // 0x44 & 0xF = 4 (CMOVZ)
        assert_eq!(core.state.gp.read32(EAX), 0x55);
    }

    #[test]
    fn cmovz_does_not_move_when_zf_clear() {
        let mut core = core();
        core.state.set_flag(FLAG_ZF, false);
        core.state.gp.write32(EAX, 0xAAAA);
        core.state.gp.write32(ECX, 0x55);
        let modrm = 0b11_000_001u8;
        let mut fetch = fetch_from(&[modrm]);
        op_cmovcc(&mut core, 0x44, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 0xAAAA);
    }

    #[test]
    fn jcc_taken_in_16_bit_mode_wraps_eip_to_16_bits() {
        let mut core = core();
        core.state.set_flag(FLAG_ZF, true);
        core.state.set_eip(0xFFFE);
        let mut fetch = fetch_from(&[0x10, 0x00]); // rel16 = +0x10
        op_jcc(&mut core, 0x84, 0, OperandSize::Bits16, &mut fetch).unwrap(); // JZ
        assert_eq!(core.state.eip, 0x000E);
    }

    #[test]
    fn jcc_not_taken_leaves_eip_untouched() {
        let mut core = core();
        core.state.set_flag(FLAG_ZF, false);
        core.state.set_eip(0x1000);
        let mut fetch = fetch_from(&[0x10, 0x00, 0x00, 0x00]);
        op_jcc(&mut core, 0x84, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.eip, 0x1000);
    }

    #[test]
    fn setcc_writes_one_when_condition_holds_else_zero() {
        let mut core = core();
        core.state.set_flag(FLAG_ZF, true);
        core.state.gp.write8(0, 0xFF); // AL
        let modrm = 0b11_000_000u8; // rm=AL
        let mut fetch = fetch_from(&[modrm]);
        op_setcc(&mut core, 0x94, 0, OperandSize::Bits32, &mut fetch).unwrap(); // SETZ
        assert_eq!(core.state.gp.read8(0), 1);
    }
}
