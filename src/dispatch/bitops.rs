//! Bit manipulation: BT/BTS/BTR/BTC (register and memory-bit-string forms),
//! the 0FBA immediate-index group, BSF/BSR, and POPCNT. Grounded in spec.md
//! §4.3.

use crate::alu;
use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::flags::FLAG_CF;
use crate::mem::CpuBus;
use crate::modrm::{self, read_modrm_byte, Operand};
use crate::state::OperandSize;

use super::Fetch;

#[derive(Clone, Copy)]
enum BitOp {
    Test,
    Set,
    Reset,
    Complement,
}

/// Resolve the (byte-address-or-register-word, bit-within-word) pair for a
/// BT-family op. Register form masks `index` to the operand width (15/31);
/// memory form treats `index` as a signed bit displacement that can select
/// any aligned byte, per spec.md's "memory-bit-string" rule.
fn bit_target(op: Operand, index: i32, size: OperandSize) -> (Operand, u32) {
    match op {
        Operand::Reg(_) => {
            let mask = if size == OperandSize::Bits32 { 31 } else { 15 };
            (op, (index & mask) as u32)
        }
        Operand::Mem(addr) => {
            let bit = index.rem_euclid(8) as u32;
            let byte_addr = addr.wrapping_add((index >> 3) as u32);
            (Operand::Mem(byte_addr), bit)
        }
    }
}

fn apply_bit<B: CpuBus>(
    core: &mut CpuCore<B>,
    target: Operand,
    bit: u32,
    size: OperandSize,
    which: BitOp,
) -> Result<(), Exception> {
    match target {
        Operand::Reg(i) => {
            if size == OperandSize::Bits32 {
                let word = core.state.gp.read32(i);
                let cf = (word >> bit) & 1 != 0;
                core.state.set_flag(FLAG_CF, cf);
                let new = match which {
                    BitOp::Test => word,
                    BitOp::Set => word | (1 << bit),
                    BitOp::Reset => word & !(1 << bit),
                    BitOp::Complement => word ^ (1 << bit),
                };
                core.state.gp.write32(i, new);
            } else {
                let word = core.state.gp.read16(i);
                let cf = (word >> bit) & 1 != 0;
                core.state.set_flag(FLAG_CF, cf);
                let new = match which {
                    BitOp::Test => word,
                    BitOp::Set => word | (1 << bit),
                    BitOp::Reset => word & !(1 << bit),
                    BitOp::Complement => word ^ (1 << bit),
                };
                core.state.gp.write16(i, new);
            }
        }
        Operand::Mem(addr) => {
            let byte = core.bus.read_u8(addr)?;
            let cf = (byte >> bit) & 1 != 0;
            core.state.set_flag(FLAG_CF, cf);
            let new = match which {
                BitOp::Test => byte,
                BitOp::Set => byte | (1 << bit),
                BitOp::Reset => byte & !(1 << bit),
                BitOp::Complement => byte ^ (1 << bit),
            };
            if !matches!(which, BitOp::Test) {
                core.bus.write_u8(addr, new)?;
            }
        }
    }
    Ok(())
}

fn bt_family<B: CpuBus>(
    core: &mut CpuCore<B>,
    size: OperandSize,
    fetch: Fetch,
    which: BitOp,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let index = modrm::read_g32(modrm, &core.state.gp) as i32;
    let index = if size == OperandSize::Bits16 {
        (index as i16) as i32
    } else {
        index
    };
    let (target, bit) = bit_target(op, index, size);
    apply_bit(core, target, bit, size, which)
}

pub fn op_bt<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    bt_family(core, size, fetch, BitOp::Test)
}

pub fn op_bts<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    bt_family(core, size, fetch, BitOp::Set)
}

pub fn op_btr<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    bt_family(core, size, fetch, BitOp::Reset)
}

pub fn op_btc<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    bt_family(core, size, fetch, BitOp::Complement)
}

/// 0FBA /4..7: same four operations, but the bit index is an immediate byte
/// masked to 15/31 regardless of register-vs-memory form.
pub fn op_bt_group_imm8<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    size: OperandSize,
    fetch: Fetch,
) -> Result<(), Exception> {
    let byte = fetch()?;
    let modrm = read_modrm_byte(byte);
    let op = modrm::modrm_resolve(modrm, true, &core.state.gp, &core.state.segments, None, fetch)?;
    let imm = fetch()?;
    let mask = if size == OperandSize::Bits32 { 31 } else { 15 };
    let bit = (imm & mask) as u32;
    let which = match modrm.reg {
        4 => BitOp::Test,
        5 => BitOp::Set,
        6 => BitOp::Reset,
        7 => BitOp::Complement,
        _ => return Err(Exception::InvalidOpcode),
    };
    apply_bit(core, op, bit, size, which)
}

pub fn op_bsf<B: CpuBus>(
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
        let src = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        if let Some(idx) = alu::bsf32(&mut core.state.flags, src) {
            modrm::write_g32(modrm, &mut core.state.gp, idx);
        }
    } else {
        let src = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        if let Some(idx) = alu::bsf16(&mut core.state.flags, src) {
            modrm::write_g16(modrm, &mut core.state.gp, idx);
        }
    }
    Ok(())
}

pub fn op_bsr<B: CpuBus>(
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
        let src = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        if let Some(idx) = alu::bsr32(&mut core.state.flags, src) {
            modrm::write_g32(modrm, &mut core.state.gp, idx);
        }
    } else {
        let src = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        if let Some(idx) = alu::bsr16(&mut core.state.flags, src) {
            modrm::write_g16(modrm, &mut core.state.gp, idx);
        }
    }
    Ok(())
}

pub fn op_popcnt<B: CpuBus>(
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
        let src = modrm::read_e32(op, &core.state.gp, &mut core.bus)?;
        let count = alu::popcnt(src);
        set_popcnt_flags(core, count == 0);
        modrm::write_g32(modrm, &mut core.state.gp, count);
    } else {
        let src = modrm::read_e16(op, &core.state.gp, &mut core.bus)?;
        let count = alu::popcnt(src as u32);
        set_popcnt_flags(core, count == 0);
        modrm::write_g16(modrm, &mut core.state.gp, count as u16);
    }
    Ok(())
}

/// POPCNT clears CF/OF/SF/AF/PF and sets ZF from the result — every
/// arithmetic flag bit is written (and its dirty bit cleared), not just ZF.
fn set_popcnt_flags<B: CpuBus>(core: &mut CpuCore<B>, zero: bool) {
    core.state.set_flag(crate::flags::FLAG_ZF, zero);
    core.state.set_flag(crate::flags::FLAG_CF, false);
    core.state.set_flag(crate::flags::FLAG_OF, false);
    core.state.set_flag(crate::flags::FLAG_SF, false);
    core.state.set_flag(crate::flags::FLAG_AF, false);
    core.state.set_flag(crate::flags::FLAG_PF, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FLAG_ZF;
    use crate::mem::FlatTestBus;
    use crate::registers::{EAX, ECX};
    use crate::state::{CpuMode, CpuState};

    fn core() -> CpuCore<FlatTestBus> {
        CpuCore::new(CpuState::new(CpuMode::Protected), FlatTestBus::new(0x100))
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
    fn bt_register_form_reports_clear_bit_without_mutating() {
        let mut core = core();
        core.state.gp.write32(EAX, 0);
        core.state.gp.write32(ECX, 3);
        let modrm = 0b11_001_000u8; // reg=ECX (index), rm=EAX (target)
        let mut fetch = fetch_from(&[modrm]);
        op_bt(&mut core, 0xA3, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert!(!core.state.flags.get(FLAG_CF));
        assert_eq!(core.state.gp.read32(EAX), 0);
    }

    #[test]
    fn bts_register_form_sets_the_targeted_bit() {
        let mut core = core();
        core.state.gp.write32(EAX, 0);
        core.state.gp.write32(ECX, 3);
        let modrm = 0b11_001_000u8;
        let mut fetch = fetch_from(&[modrm]);
        op_bts(&mut core, 0xAB, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert!(!core.state.flags.get(FLAG_CF));
        assert_eq!(core.state.gp.read32(EAX), 0b1000);
    }

    #[test]
    fn bt_group_imm8_masks_the_index_to_operand_width() {
        let mut core = core();
        core.state.gp.write32(EAX, 1 << 1);
        let modrm = 0b11_100_000u8; // /4 = Test, rm = EAX
        let mut fetch = fetch_from(&[modrm, 0b0010_0001]); // imm8 = 33, masked to 1 (mod 32)
        op_bt_group_imm8(&mut core, 0xBA, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert!(core.state.flags.get(FLAG_CF));
    }

    #[test]
    fn bsf_on_zero_source_leaves_destination_untouched() {
        let mut core = core();
        core.state.gp.write32(EAX, 0xDEAD);
        core.state.gp.write32(ECX, 0);
        let modrm = 0b11_000_001u8; // reg=EAX (dest), rm=ECX (source=0)
        let mut fetch = fetch_from(&[modrm]);
        op_bsf(&mut core, 0xBC, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 0xDEAD);
    }

    #[test]
    fn bsr_finds_the_highest_set_bit_index() {
        let mut core = core();
        core.state.gp.write32(ECX, 0x8000_0000);
        let modrm = 0b11_000_001u8; // reg=EAX (dest), rm=ECX (source)
        let mut fetch = fetch_from(&[modrm]);
        op_bsr(&mut core, 0xBD, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 31);
    }

    #[test]
    fn popcnt_counts_set_bits_and_sets_zf_only_when_zero() {
        let mut core = core();
        core.state.gp.write32(ECX, 0b1111);
        let modrm = 0b11_000_001u8; // reg=EAX (dest), rm=ECX (source)
        let mut fetch = fetch_from(&[modrm]);
        op_popcnt(&mut core, 0xB8, 0, OperandSize::Bits32, &mut fetch).unwrap();
        assert_eq!(core.state.gp.read32(EAX), 4);
        assert!(!core.state.flags.get(FLAG_ZF));
    }

    #[test]
    fn popcnt_clears_the_other_arithmetic_flags_and_their_dirty_bits() {
        use crate::flags::{FLAG_AF, FLAG_OF, FLAG_PF, FLAG_SF};

        let mut core = core();
        // Leave every arithmetic flag set and dirty from a prior op, so a
        // stale true value would survive if POPCNT didn't clear it.
        core.state.flags.set_raw(FLAG_CF | FLAG_OF | FLAG_SF | FLAG_AF | FLAG_PF);
        core.state
            .flags
            .mark_dirty(FLAG_CF | FLAG_OF | FLAG_SF | FLAG_AF | FLAG_PF);
        core.state.gp.write32(ECX, 0b1111);
        let modrm = 0b11_000_001u8;
        let mut fetch = fetch_from(&[modrm]);
        op_popcnt(&mut core, 0xB8, 0, OperandSize::Bits32, &mut fetch).unwrap();

        assert!(!core.state.flags.get(FLAG_CF));
        assert!(!core.state.flags.get(FLAG_OF));
        assert!(!core.state.flags.get(FLAG_SF));
        assert!(!core.state.flags.get(FLAG_AF));
        assert!(!core.state.flags.get(FLAG_PF));
        let dirty = FLAG_CF | FLAG_OF | FLAG_SF | FLAG_AF | FLAG_PF;
        assert_eq!(core.state.flags.flags_changed & dirty, 0);
    }
}
