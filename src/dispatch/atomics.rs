//! Compare-and-exchange and XADD: 0FB0/B1 (CMPXCHG), 0FC0/C1 (XADD), 0FC7
//! (group: CMPXCHG8B at /1, RDRAND at /6). Grounded in spec.md §4.5 and
//! §4.12.

use crate::alu;
use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::flags::{FLAG_AF, FLAG_CF, FLAG_OF, FLAG_PF, FLAG_SF, FLAG_ZF};
use crate::mem::CpuBus;
use crate::modrm::{self, read_modrm_byte, Operand};
use crate::registers::{EAX, EDX};
use crate::state::OperandSize;

use super::Fetch;

pub fn op_cmpxchg8<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    if let Operand::Mem(addr) = op {
        core.bus.writable_or_pagefault(addr, 1)?;
    }
    let acc = core.state.gp.read8(EAX);
    let src = modrm::read_g8(modrm, &core.state.gp);
    let current = modrm::read_e8(op, &core.state.gp, &mut core.bus)?;
    alu::cmp8(&mut core.state.flags, acc, current);
    if acc == current {
        modrm::write_e8(op, &mut core.state.gp, &mut core.bus, src)?;
    } else {
        modrm::write_e8(op, &mut core.state.gp, &mut core.bus, current)?;
        core.state.gp.write8(EAX, current);
    }
    Ok(())
}

pub fn op_cmpxchg<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    if size == OperandSize::Bits32 {
        if let Operand::Mem(addr) = op {
            core.bus.writable_or_pagefault(addr, 4)?;
        }
        let acc = core.state.gp.read32(EAX);
        let src = modrm::read_g32(modrm, &core.state.gp);
        let current = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        alu::cmp32(&mut core.state.flags, acc, current);
        if acc == current {
            modrm::write_e32(op, &mut core.state.gp, &mut core.bus, src)?;
        } else {
            modrm::write_e32(op, &mut core.state.gp, &mut core.bus, current)?;
            core.state.gp.write32(EAX, current);
        }
    } else {
        if let Operand::Mem(addr) = op {
            core.bus.writable_or_pagefault(addr, 2)?;
        }
        let acc = core.state.gp.read16(EAX);
        let src = modrm::read_g16(modrm, &core.state.gp);
        let current = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        alu::cmp16(&mut core.state.flags, acc, current);
        if acc == current {
            modrm::write_e16(op, &mut core.state.gp, &mut core.bus, src)?;
        } else {
            modrm::write_e16(op, &mut core.state.gp, &mut core.bus, current)?;
            core.state.gp.write16(EAX, current);
        }
    }
    Ok(())
}

pub fn op_xadd8<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let dest = modrm::read_e8(op, &core.state.gp, &mut core.bus)?;
    let src = modrm::read_g8(modrm, &core.state.gp);
    let (sum, pre) = alu::xadd8(&mut core.state.flags, dest, src);
    modrm::write_e8(op, &mut core.state.gp, &mut core.bus, sum)?;
    modrm::write_g8(modrm, &mut core.state.gp, pre);
    Ok(())
}

pub fn op_xadd<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    if size == OperandSize::Bits32 {
        let dest = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        let src = modrm::read_g32(modrm, &core.state.gp);
        let (sum, pre) = alu::xadd32(&mut core.state.flags, dest, src);
        modrm::write_e32(op, &mut core.state.gp, &mut core.bus, sum)?;
        modrm::write_g32(modrm, &mut core.state.gp, pre);
    } else {
        let dest = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        let src = modrm::read_g16(modrm, &core.state.gp);
        let (sum, pre) = alu::xadd16(&mut core.state.flags, dest, src);
        modrm::write_e16(op, &mut core.state.gp, &mut core.bus, sum)?;
        modrm::write_g16(modrm, &mut core.state.gp, pre);
    }
    Ok(())
}

/// 0FC7: /1 CMPXCHG8B (memory only), /6 RDRAND (register only). Every other
/// reg field in this group belongs to SSE state-management opcodes this
/// crate does not implement (VMPTRLD/VMCLEAR/VMXON live outside IA-32,
/// already excluded by the 64-bit/virtualization non-goals).
pub fn op_group_c7<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    match modrm.reg {
        1 => {
            let Operand::Mem(addr) = op else {
                return Err(Exception::InvalidOpcode);
            };
            core.bus.writable_or_pagefault(addr, 8)?;
            let low = core.bus.read_u32(addr)?;
            let high = core.bus.read_u32(addr + 4)?;
            let edx = core.state.gp.read32(EDX);
            let eax = core.state.gp.read32(EAX);
            if edx == high && eax == low {
                core.state.set_flag(FLAG_ZF, true);
                let ebx = core.state.gp.read32(crate::registers::EBX);
                let ecx = core.state.gp.read32(crate::registers::ECX);
                core.bus.write_u32(addr, ebx)?;
                core.bus.write_u32(addr + 4, ecx)?;
            } else {
                core.state.set_flag(FLAG_ZF, false);
                core.bus.write_u32(addr, low)?;
                core.bus.write_u32(addr + 4, high)?;
                core.state.gp.write32(EAX, low);
                core.state.gp.write32(EDX, high);
            }
            core.state.flags.flags_changed &= !FLAG_ZF;
            Ok(())
        }
        6 => {
            let Operand::Reg(i) = op else {
                return Err(Exception::InvalidOpcode);
            };
            let available = core.has_rand_int();
            let value = if available { core.get_rand_int() } else { 0 };
            core.state.gp.write32(i, value);
            core.state.set_flag(FLAG_CF, available);
            core.state.set_flag(FLAG_OF, false);
            core.state.set_flag(FLAG_SF, false);
            core.state.set_flag(FLAG_ZF, false);
            core.state.set_flag(FLAG_AF, false);
            core.state.set_flag(FLAG_PF, false);
            Ok(())
        }
        _ => Err(Exception::InvalidOpcode),
    }
}
