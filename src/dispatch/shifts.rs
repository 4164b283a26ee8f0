//! Double-precision shifts: 0FA4/A5 (SHLD) and 0FAC/AD (SHRD), imm8 and CL
//! count forms. Grounded in spec.md §4.4; the 5-bit count mask is enforced
//! inside `alu::shld16/32`/`shrd16/32` regardless of operand width.

use crate::alu;
use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::mem::CpuBus;
use crate::modrm::{self, read_modrm_byte};
use crate::registers::ECX;
use crate::state::OperandSize;

use super::Fetch;

fn shld_common<B: CpuBus>(core: &mut CpuCore<B>, size: OperandSize, fetch: Fetch, count: u8) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    if size == OperandSize::Bits32 {
        let dest = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g32(modrm, &core.state.gp);
        let result = alu::shld32(&mut core.state.flags, dest, fill, count);
        modrm::write_e32(op, &mut core.state.gp, &mut core.bus, result)?;
    } else {
        let dest = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g16(modrm, &core.state.gp);
        let result = alu::shld16(&mut core.state.flags, dest, fill, count);
        modrm::write_e16(op, &mut core.state.gp, &mut core.bus, result)?;
    }
    Ok(())
}

fn shrd_common<B: CpuBus>(core: &mut CpuCore<B>, size: OperandSize, fetch: Fetch, count: u8) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    if size == OperandSize::Bits32 {
        let dest = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g32(modrm, &core.state.gp);
        let result = alu::shrd32(&mut core.state.flags, dest, fill, count);
        modrm::write_e32(op, &mut core.state.gp, &mut core.bus, result)?;
    } else {
        let dest = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g16(modrm, &core.state.gp);
        let result = alu::shrd16(&mut core.state.flags, dest, fill, count);
        modrm::write_e16(op, &mut core.state.gp, &mut core.bus, result)?;
    }
    Ok(())
}

/// imm8 follows ModR/M (and any displacement) in program order.
pub fn op_shld_imm8<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let count = fetch()?;
    if size == OperandSize::Bits32 {
        let dest = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g32(modrm, &core.state.gp);
        let result = alu::shld32(&mut core.state.flags, dest, fill, count);
        modrm::write_e32(op, &mut core.state.gp, &mut core.bus, result)?;
    } else {
        let dest = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g16(modrm, &core.state.gp);
        let result = alu::shld16(&mut core.state.flags, dest, fill, count);
        modrm::write_e16(op, &mut core.state.gp, &mut core.bus, result)?;
    }
    Ok(())
}

pub fn op_shld_cl<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let count = core.state.gp.read8(ECX) as u8;
    shld_common(core, size, fetch, count)
}

pub fn op_shrd_imm8<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let count = fetch()?;
    if size == OperandSize::Bits32 {
        let dest = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g32(modrm, &core.state.gp);
        let result = alu::shrd32(&mut core.state.flags, dest, fill, count);
        modrm::write_e32(op, &mut core.state.gp, &mut core.bus, result)?;
    } else {
        let dest = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        let fill = modrm::read_g16(modrm, &core.state.gp);
        let result = alu::shrd16(&mut core.state.flags, dest, fill, count);
        modrm::write_e16(op, &mut core.state.gp, &mut core.bus, result)?;
    }
    Ok(())
}

pub fn op_shrd_cl<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let count = core.state.gp.read8(ECX) as u8;
    shrd_common(core, size, fetch, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::FlatTestBus;
    use crate::registers::{EAX, EDX};
    use crate::state::{CpuMode, CpuState};

    fn core() -> CpuCore<FlatTestBus> {
        CpuCore::new(CpuState::new(CpuMode::Protected), FlatTestBus::new(0x10))
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
    fn shld_imm8_shifts_in_fill_bits_from_the_source_register() {
        let mut core = core();
        core.state.gp.write32(EAX, 1);
        core.state.gp.write32(EDX, 0);
        let modrm = 0b11_010_000u8; // reg=EDX (fill), rm=EAX (dest)
        let mut fetch = fetch_from(&[modrm, 1]);
        op_shld_imm8(&mut core, 0xA4, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 2);
    }

    #[test]
    fn shld_cl_masks_the_count_to_five_bits() {
        let mut core = core();
        core.state.gp.write32(EAX, 1);
        core.state.gp.write32(EDX, 0);
        core.state.gp.write32(ECX, 0x21); // 33, masked to 1
        let modrm = 0b11_010_000u8;
        let mut fetch = fetch_from(&[modrm]);
        op_shld_cl(&mut core, 0xA5, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 2);
    }

    #[test]
    fn shrd_imm8_shifts_in_fill_bits_from_the_source_register() {
        let mut core = core();
        core.state.gp.write32(EAX, 2);
        core.state.gp.write32(EDX, 0);
        let modrm = 0b11_010_000u8; // reg=EDX (fill), rm=EAX (dest)
        let mut fetch = fetch_from(&[modrm, 1]);
        op_shrd_imm8(&mut core, 0xAC, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 1);
    }

    #[test]
    fn shrd_cl_masks_the_count_to_five_bits() {
        let mut core = core();
        core.state.gp.write32(EAX, 2);
        core.state.gp.write32(EDX, 0);
        core.state.gp.write32(ECX, 0x21); // 33, masked to 1
        let modrm = 0b11_010_000u8;
        let mut fetch = fetch_from(&[modrm]);
        op_shrd_cl(&mut core, 0xAD, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 1);
    }

    #[test]
    fn shld_with_zero_count_leaves_destination_and_flags_unchanged() {
        let mut core = core();
        core.state.gp.write32(EAX, 0x1234);
        core.state.gp.write32(EDX, 0xFFFF_FFFF);
        let modrm = 0b11_010_000u8;
        let mut fetch = fetch_from(&[modrm, 0]);
        op_shld_imm8(&mut core, 0xA4, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 0x1234);
    }
}
