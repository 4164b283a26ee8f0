//! The implemented SSE2 integer subset (spec.md §4.9), the BSWAP group
//! (§4.10), the 0FAE management group (§4.11), PREFETCH/NOP (§4.13), and the
//! single "unimplemented SSE trap" every other SSE-opcode-space slot falls
//! through to (§2 component 5, §9's "preserve the two-tier design" note).

use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::mem::CpuBus;
use crate::modrm::{self, read_modrm_byte, Operand};
use crate::sse;
use crate::state::OperandSize;

use super::{variant, Fetch, Handler};

/// Every SSE opcode slot that isn't one of the handlers below routes here:
/// the task-switch gate still applies (a trap must still distinguish #NM/#UD
/// from "simply not implemented"), then it is a pragmatic no-op/fatal per
/// spec.md's open design note — this crate chooses fatal, since a guest
/// reaching an unimplemented SSE opcode during testing is a gap worth
/// surfacing loudly rather than silently misexecuting.
pub fn unimplemented_sse_trap<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    sse::task_switch_test_mmx(
        core.state.control.cr0 & crate::state::CR0_TS != 0,
        core.state.control.cr0 & crate::state::CR0_EM != 0,
    )?;
    crate::fault::fatal(&format!("unimplemented SSE opcode 0F{opcode:02X}"))
}

pub fn variant_entry<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let trap = unimplemented_sse_trap::<B>;
    let (p66, pf3, pf2): (Handler<B>, Handler<B>, Handler<B>) = match opcode {
        0x60 => (punpcklbw, trap, trap),
        0x6E => (movd_load, trap, trap),
        0x6F => (movdqa_load, movdqu_load, trap),
        0x70 => (pshufd, trap, trap),
        0x74 => (pcmpeqb, trap, trap),
        0x7E => (movd_store, movq_load, trap),
        0x7F => (movdqa_store, movdqu_store, trap),
        0xD6 => (movq_store, trap, trap),
        0xD7 => (pmovmskb, trap, trap),
        0xE7 => (movntdq, trap, trap),
        0xEF => (pxor, trap, trap),
        _ => (trap, trap, trap),
    };
    variant(core, opcode, prefixes, size, fetch, p66, pf3, pf2, trap)
}

fn gate_mmx<B: CpuBus>(core: &CpuCore<B>) -> Result<(), Exception> {
    sse::task_switch_test_mmx(
        core.state.control.cr0 & crate::state::CR0_TS != 0,
        core.state.control.cr0 & crate::state::CR0_EM != 0,
    )
}

fn read_xmm_operand<B: CpuBus>(op: Operand, core: &mut CpuCore<B>) -> Result<u128, Exception> {
    match op {
        Operand::Reg(i) => Ok(core.state.sse.read_xmm(i)),
        Operand::Mem(addr) => core.bus.read_u128(addr),
    }
}

fn write_xmm_operand<B: CpuBus>(
    op: Operand,
    core: &mut CpuCore<B>,
    value: u128,
) -> Result<(), Exception> {
    match op {
        Operand::Reg(i) => {
            core.state.sse.write_xmm(i, value);
            Ok(())
        }
        Operand::Mem(addr) => core.bus.write_u128(addr, value),
    }
}

fn decode_xmm_op<B: CpuBus>(
    core: &mut CpuCore<B>,
    fetch: Fetch,
) -> Result<(crate::modrm::ModRm, Operand), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    Ok((modrm, op))
}

pub fn op_movaps_store<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let Operand::Mem(addr) = op else {
        return Err(Exception::InvalidOpcode);
    };
    let value = core.state.sse.read_xmm(modrm.reg as usize);
    core.bus.write_u128(addr, value)
}

fn punpcklbw<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let dest = core.state.sse.read_xmm(modrm.reg as usize).to_le_bytes();
    let src = read_xmm_operand(op, core)?.to_le_bytes();
    let mut out = [0u8; 16];
    for i in 0..8 {
        out[2 * i] = dest[i];
        out[2 * i + 1] = src[i];
    }
    core.state.sse.write_xmm(modrm.reg as usize, u128::from_le_bytes(out));
    Ok(())
}

fn movd_load<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let src = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
    core.state.sse.write_xmm(modrm.reg as usize, src as u128);
    Ok(())
}

fn movd_store<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let value = core.state.sse.read_xmm(modrm.reg as usize) as u32;
    modrm::write_e32(op, &mut core.state.gp, &mut core.bus, value)
}

fn movq_load<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let low64 = match op {
        Operand::Reg(i) => core.state.sse.read_xmm(i) as u64,
        Operand::Mem(addr) => core.bus.read_u64(addr)?,
    };
    core.state.sse.write_xmm(modrm.reg as usize, low64 as u128);
    Ok(())
}

fn movdqa_load<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let value = read_xmm_operand(op, core)?;
    core.state.sse.write_xmm(modrm.reg as usize, value);
    Ok(())
}

fn movdqu_load<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    movdqa_load(core, opcode, prefixes, size, fetch)
}

fn movdqa_store<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let Operand::Mem(addr) = op else {
        return Err(Exception::InvalidOpcode);
    };
    let value = core.state.sse.read_xmm(modrm.reg as usize);
    core.bus.write_u128(addr, value)
}

fn movdqu_store<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    movdqa_store(core, opcode, prefixes, size, fetch)
}

fn pshufd<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let imm8 = fetch()?;
    let src = read_xmm_operand(op, core)?.to_le_bytes();
    let mut lanes = [0u32; 4];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = u32::from_le_bytes(src[i * 4..i * 4 + 4].try_into().unwrap());
    }
    let mut out = [0u8; 16];
    for i in 0..4 {
        let sel = ((imm8 >> (2 * i)) & 3) as usize;
        out[i * 4..i * 4 + 4].copy_from_slice(&lanes[sel].to_le_bytes());
    }
    core.state.sse.write_xmm(modrm.reg as usize, u128::from_le_bytes(out));
    Ok(())
}

fn pcmpeqb<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let dest = core.state.sse.read_xmm(modrm.reg as usize).to_le_bytes();
    let src = read_xmm_operand(op, core)?.to_le_bytes();
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = if dest[i] == src[i] { 0xFF } else { 0x00 };
    }
    core.state.sse.write_xmm(modrm.reg as usize, u128::from_le_bytes(out));
    Ok(())
}

fn movq_store<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let Operand::Mem(addr) = op else {
        return Err(Exception::InvalidOpcode);
    };
    let value = core.state.sse.read_xmm(modrm.reg as usize) as u64;
    core.bus.write_u64(addr, value)
}

fn pmovmskb<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let Operand::Reg(src_i) = op else {
        return Err(Exception::InvalidOpcode);
    };
    let bytes = core.state.sse.read_xmm(src_i).to_le_bytes();
    let mut mask: u32 = 0;
    for (i, b) in bytes.iter().enumerate() {
        if b & 0x80 != 0 {
            mask |= 1 << i;
        }
    }
    modrm::write_g32(modrm, &mut core.state.gp, mask);
    Ok(())
}

fn movntdq<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let Operand::Mem(addr) = op else {
        return Err(Exception::InvalidOpcode);
    };
    let value = core.state.sse.read_xmm(modrm.reg as usize);
    core.bus.write_u128(addr, value)
}

fn pxor<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    gate_mmx(core)?;
    let (modrm, op) = decode_xmm_op(core, fetch)?;
    let dest = core.state.sse.read_xmm(modrm.reg as usize);
    let src = read_xmm_operand(op, core)?;
    core.state.sse.write_xmm(modrm.reg as usize, dest ^ src);
    Ok(())
}

/// 0F77 EMMS: reject the rep/opsize prefixes (spec.md §4.9's explicit
/// rejection), gate on TS/EM, then mark the x87 tag word all-empty. This
/// crate has no x87 tag word of its own (x87 is a non-goal), so the "all
/// empty" effect is a no-op beyond the gate itself.
pub fn op_emms<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    if prefixes & (crate::cpu::PREFIX_REP_MASK | crate::cpu::PREFIX_OPSIZE_MASK) != 0 {
        return Err(Exception::InvalidOpcode);
    }
    gate_mmx(core)
}

/// BSWAP EAX..EDI (0FC8..CF): byte-reverse the register indexed by
/// `opcode - 0xC8`, in canonical GpRegs order.
pub fn op_bswap<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    let idx = (opcode - 0xC8) as usize;
    let value = core.state.gp.read32(idx);
    core.state.gp.write32(idx, crate::alu::bswap(value));
    Ok(())
}

/// 0F18 PREFETCH*: resolve the effective address (for its fault side
/// effects) and discard. Register form is a plain multi-byte NOP.
pub fn op_prefetch<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    Ok(())
}

/// 0F1F multi-byte NOP: same ModR/M-resolve-and-discard shape as PREFETCH.
pub fn op_nop<B: CpuBus>(
    core: &mut CpuCore<B>,
    opcode: u8,
    prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    op_prefetch(core, opcode, prefixes, size, fetch)
}

/// 0FAE group, dispatched on the ModR/M reg field: /0 FXSAVE, /1 FXRSTOR,
/// /2 LDMXCSR, /3 STMXCSR, /5..7 the fence encodings (register form only).
pub fn op_ae_group<B: CpuBus>(
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
        0 => {
            let Operand::Mem(addr) = op else {
                return Err(Exception::InvalidOpcode);
            };
            core.bus.writable_or_pagefault(addr, 512)?;
            let mut buf = [0u8; 512];
            sse::fxsave(&core.state.sse, &mut buf);
            for (i, chunk) in buf.chunks(4).enumerate() {
                let word = u32::from_le_bytes(chunk.try_into().unwrap());
                core.bus.write_u32(addr + (i * 4) as u32, word)?;
            }
            Ok(())
        }
        1 => {
            let Operand::Mem(addr) = op else {
                return Err(Exception::InvalidOpcode);
            };
            let mut buf = [0u8; 512];
            for i in 0..128 {
                let word = core.bus.read_u32(addr + (i * 4) as u32)?;
                buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            sse::fxrstor(&mut core.state.sse, &buf)
        }
        2 => {
            let Operand::Mem(_) = op else {
                return Err(Exception::InvalidOpcode);
            };
            let value = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
            core.state.sse.set_mxcsr(value)
        }
        3 => {
            let Operand::Mem(_) = op else {
                return Err(Exception::InvalidOpcode);
            };
            let value = core.state.sse.mxcsr();
            modrm::write_e32(op, &mut core.state.gp, &mut core.bus, value)
        }
        5 | 6 | 7 => {
            if !matches!(op, Operand::Reg(_)) {
                return Err(Exception::InvalidOpcode);
            }
            // LFENCE/MFENCE/SFENCE: this single-threaded, non-reordering
            // model has nothing to order, so they are no-ops beyond the
            // register-form encoding check above.
            Ok(())
        }
        _ => Err(Exception::InvalidOpcode),
    }
}
