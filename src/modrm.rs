//! ModR/M decode and effective-address resolution (16-bit Table 2-1 and
//! 32-bit Table 2-2 including SIB). Byte fetch from the instruction stream is
//! the "byte-fetch/prefix decode" external collaborator spec.md names; this
//! module only needs a way to pull the *next* raw byte, so it takes a
//! `FnMut() -> Result<u8, Exception>` fetcher rather than owning a code
//! pointer/cursor itself.

use crate::fault::Exception;
use crate::mem::CpuBus;
use crate::registers::{GpRegs, EAX, EBP, EBX, ECX, EDI, EDX, ESI, ESP};
use crate::segmentation::{Seg, Segments};
use crate::state::OperandSize;

/// The decoded mod/reg/rm fields of a ModR/M byte.
#[derive(Clone, Copy, Debug)]
pub struct ModRm {
    pub md: u8,
    pub reg: u8,
    pub rm: u8,
}

pub fn read_modrm_byte(byte: u8) -> ModRm {
    ModRm {
        md: byte >> 6,
        reg: (byte >> 3) & 0b111,
        rm: byte & 0b111,
    }
}

/// Where a decoded r/m operand lives: a register (by canonical GpRegs index)
/// or a linear memory address (already relocated through the active segment
/// base).
#[derive(Clone, Copy, Debug)]
pub enum Operand {
    Reg(usize),
    Mem(u32),
}

/// Resolve the r/m field of an already-read ModR/M byte to an `Operand`,
/// fetching any trailing SIB/displacement bytes via `fetch`. `addr32` selects
/// 32-bit (SIB-capable) vs 16-bit addressing; `seg_override` is `None` to use
/// the rm-implied default segment (SS for EBP/ESP-based addressing, DS
/// otherwise).
pub fn modrm_resolve(
    modrm: ModRm,
    addr32: bool,
    gp: &GpRegs,
    segs: &Segments,
    seg_override: Option<Seg>,
    mut fetch: impl FnMut() -> Result<u8, Exception>,
) -> Result<Operand, Exception> {
    if modrm.md == 0b11 {
        return Ok(Operand::Reg(modrm.rm as usize));
    }

    let (addr, default_seg) = if addr32 {
        resolve32(modrm, gp, &mut fetch)?
    } else {
        resolve16(modrm, gp, &mut fetch)?
    };

    let seg = seg_override.unwrap_or(default_seg);
    let base = segs.get(seg).base;
    Ok(Operand::Mem(base.wrapping_add(addr)))
}

fn fetch_disp8(fetch: &mut impl FnMut() -> Result<u8, Exception>) -> Result<i32, Exception> {
    Ok(fetch()? as i8 as i32)
}

fn fetch_disp32(fetch: &mut impl FnMut() -> Result<u8, Exception>) -> Result<i32, Exception> {
    let mut bytes = [0u8; 4];
    for b in bytes.iter_mut() {
        *b = fetch()?;
    }
    Ok(i32::from_le_bytes(bytes))
}

/// 32-bit addressing (Table 2-2), including the SIB byte. Returns the
/// effective address and the rm-implied default segment.
fn resolve32(
    modrm: ModRm,
    gp: &GpRegs,
    fetch: &mut impl FnMut() -> Result<u8, Exception>,
) -> Result<(u32, Seg), Exception> {
    if modrm.rm == 0b100 {
        let sib = fetch()?;
        let scale = 1u32 << (sib >> 6);
        let index = (sib >> 3) & 0b111;
        let base = sib & 0b111;

        let index_val = if index == 0b100 {
            0
        } else {
            gp.read32(index as usize)
        };

        let (base_val, default_seg, disp) = if base == 0b101 && modrm.md == 0b00 {
            (0u32, Seg::Ds, fetch_disp32(fetch)?)
        } else {
            let seg = if base == ESP || base == EBP {
                Seg::Ss
            } else {
                Seg::Ds
            };
            (gp.read32(base as usize), seg, 0)
        };

        let disp = disp
            + match modrm.md {
                0b01 => fetch_disp8(fetch)?,
                0b10 => fetch_disp32(fetch)?,
                _ => 0,
            };

        let addr = base_val
            .wrapping_add(index_val.wrapping_mul(scale))
            .wrapping_add(disp as u32);
        return Ok((addr, default_seg));
    }

    if modrm.rm == 0b101 && modrm.md == 0b00 {
        let disp = fetch_disp32(fetch)?;
        return Ok((disp as u32, Seg::Ds));
    }

    let default_seg = if modrm.rm as usize == EBP {
        Seg::Ss
    } else {
        Seg::Ds
    };
    let base = gp.read32(modrm.rm as usize);
    let disp = match modrm.md {
        0b01 => fetch_disp8(fetch)?,
        0b10 => fetch_disp32(fetch)?,
        _ => 0,
    };
    Ok((base.wrapping_add(disp as u32), default_seg))
}

/// 16-bit addressing (Table 2-1): seven base+index combinations, direct
/// disp16 for mod=00/rm=110, and BP-relative forms default to SS.
fn resolve16(
    modrm: ModRm,
    gp: &GpRegs,
    fetch: &mut impl FnMut() -> Result<u8, Exception>,
) -> Result<(u32, Seg), Exception> {
    if modrm.md == 0b00 && modrm.rm == 0b110 {
        let mut bytes = [0u8; 2];
        bytes[0] = fetch()?;
        bytes[1] = fetch()?;
        return Ok((u16::from_le_bytes(bytes) as u32, Seg::Ds));
    }

    let (base_idx, index_idx, default_seg): (Option<usize>, Option<usize>, Seg) = match modrm.rm {
        0b000 => (Some(EBX), Some(ESI), Seg::Ds),
        0b001 => (Some(EBX), Some(EDI), Seg::Ds),
        0b010 => (Some(EBP), Some(ESI), Seg::Ss),
        0b011 => (Some(EBP), Some(EDI), Seg::Ss),
        0b100 => (Some(ESI), None, Seg::Ds),
        0b101 => (Some(EDI), None, Seg::Ds),
        0b110 => (Some(EBP), None, Seg::Ss),
        0b111 => (Some(EBX), None, Seg::Ds),
        _ => unreachable!(),
    };

    let mut addr = 0u16;
    if let Some(b) = base_idx {
        addr = addr.wrapping_add(gp.read16(b));
    }
    if let Some(i) = index_idx {
        addr = addr.wrapping_add(gp.read16(i));
    }

    let disp = match modrm.md {
        0b01 => fetch()? as i8 as i16,
        0b10 => {
            let mut bytes = [0u8; 2];
            bytes[0] = fetch()?;
            bytes[1] = fetch()?;
            i16::from_le_bytes(bytes)
        }
        _ => 0,
    };
    addr = addr.wrapping_add(disp as u16);
    Ok((addr as u32, default_seg))
}

/// Read the r/m operand at the given width, resolving memory through `bus`.
pub fn read_e8(op: Operand, gp: &GpRegs, bus: &mut impl CpuBus) -> Result<u8, Exception> {
    match op {
        Operand::Reg(i) => Ok(gp.read8(i)),
        Operand::Mem(addr) => bus.read_u8(addr),
    }
}

pub fn read_e16(op: Operand, gp: &GpRegs, bus: &mut impl CpuBus) -> Result<u16, Exception> {
    match op {
        Operand::Reg(i) => Ok(gp.read16(i)),
        Operand::Mem(addr) => bus.read_u16(addr),
    }
}

pub fn read_e32(op: Operand, gp: &GpRegs, bus: &mut impl CpuBus) -> Result<u32, Exception> {
    match op {
        Operand::Reg(i) => Ok(gp.read32(i)),
        Operand::Mem(addr) => bus.read_u32(addr),
    }
}

pub fn write_e8(
    op: Operand,
    gp: &mut GpRegs,
    bus: &mut impl CpuBus,
    value: u8,
) -> Result<(), Exception> {
    match op {
        Operand::Reg(i) => {
            gp.write8(i, value);
            Ok(())
        }
        Operand::Mem(addr) => bus.write_u8(addr, value),
    }
}

pub fn write_e16(
    op: Operand,
    gp: &mut GpRegs,
    bus: &mut impl CpuBus,
    value: u16,
) -> Result<(), Exception> {
    match op {
        Operand::Reg(i) => {
            gp.write16(i, value);
            Ok(())
        }
        Operand::Mem(addr) => bus.write_u16(addr, value),
    }
}

pub fn write_e32(
    op: Operand,
    gp: &mut GpRegs,
    bus: &mut impl CpuBus,
    value: u32,
) -> Result<(), Exception> {
    match op {
        Operand::Reg(i) => {
            gp.write32(i, value);
            Ok(())
        }
        Operand::Mem(addr) => bus.write_u32(addr, value),
    }
}

/// The `reg` field always names a register operand, never memory.
pub fn read_g8(modrm: ModRm, gp: &GpRegs) -> u8 {
    gp.read8(modrm.reg as usize)
}
pub fn read_g16(modrm: ModRm, gp: &GpRegs) -> u16 {
    gp.read16(modrm.reg as usize)
}
pub fn read_g32(modrm: ModRm, gp: &GpRegs) -> u32 {
    gp.read32(modrm.reg as usize)
}
pub fn write_g8(modrm: ModRm, gp: &mut GpRegs, value: u8) {
    gp.write8(modrm.reg as usize, value);
}
pub fn write_g16(modrm: ModRm, gp: &mut GpRegs, value: u16) {
    gp.write16(modrm.reg as usize, value);
}
pub fn write_g32(modrm: ModRm, gp: &mut GpRegs, value: u32) {
    gp.write32(modrm.reg as usize, value);
}

/// CR/DR move instructions (0F20-23) always treat `rm` as a direct register,
/// ignoring `md` entirely — there is no memory form.
pub fn read_reg_e32(modrm: ModRm, gp: &GpRegs) -> u32 {
    gp.read32(modrm.rm as usize)
}
pub fn write_reg_e32(modrm: ModRm, gp: &mut GpRegs, value: u32) {
    gp.write32(modrm.rm as usize, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_form_never_consumes_trailing_bytes() {
        let gp = GpRegs::default();
        let segs = Segments::default();
        let modrm = read_modrm_byte(0b11_000_001); // mod=11, reg=EAX, rm=ECX
        let op = modrm_resolve(modrm, true, &gp, &segs, None, || {
            panic!("register form must not fetch")
        })
        .unwrap();
        assert!(matches!(op, Operand::Reg(i) if i == ECX));
        let _ = EAX;
    }

    #[test]
    fn disp32_only_form_reads_four_bytes() {
        let gp = GpRegs::default();
        let segs = Segments::default();
        let modrm = read_modrm_byte(0b00_000_101); // mod=00, rm=101 -> disp32
        let bytes = [0x78u8, 0x56, 0x34, 0x12];
        let mut idx = 0usize;
        let op = modrm_resolve(modrm, true, &gp, &segs, None, || {
            let b = bytes[idx];
            idx += 1;
            Ok(b)
        })
        .unwrap();
        assert!(matches!(op, Operand::Mem(0x1234_5678)));
    }

    #[test]
    fn sib_base_index_scale_combine() {
        let mut gp = GpRegs::default();
        gp.write32(EAX, 0x1000); // base
        gp.write32(ECX, 0x2); // index
        let segs = Segments::default();
        let modrm = read_modrm_byte(0b00_000_100); // mod=00, rm=100 -> SIB
        // SIB: scale=2 (x4), index=ECX(001), base=EAX(000)
        let sib = 0b01_001_000u8;
        let mut fed = false;
        let op = modrm_resolve(modrm, true, &gp, &segs, None, || {
            fed = true;
            Ok(sib)
        })
        .unwrap();
        assert!(fed);
        assert!(matches!(op, Operand::Mem(addr) if addr == 0x1000 + 0x2 * 4));
    }
}
