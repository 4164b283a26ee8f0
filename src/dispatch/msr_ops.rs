//! MSR access (0F30 WRMSR, 0F32 RDMSR) and the SYSENTER/SYSEXIT fast
//! privilege-transition pair (0F34, 0F35). Grounded in spec.md §4.6/§4.7.

use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::mem::CpuBus;
use crate::msr::{self, Msrs};
use crate::registers::{EAX, ECX, EDX};
use crate::segmentation::{load_seg_direct, Seg};
use crate::state::OperandSize;

use super::Fetch;

fn require_cpl0<B: CpuBus>(core: &CpuCore<B>) -> Result<(), Exception> {
    if core.state.cpl == 0 {
        Ok(())
    } else {
        Err(Exception::gp0())
    }
}

pub fn op_wrmsr<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    require_cpl0(core)?;
    let index = core.state.gp.read32(ECX);
    let low = core.state.gp.read32(EAX);
    let high = core.state.gp.read32(EDX);
    let value = ((high as u64) << 32) | low as u64;

    match index {
        msr::IA32_SYSENTER_CS => core.state.msr.sysenter_cs = low & 0xFFFF,
        msr::IA32_SYSENTER_EIP => core.state.msr.sysenter_eip = low,
        msr::IA32_SYSENTER_ESP => core.state.msr.sysenter_esp = low,
        msr::IA32_APIC_BASE => {
            if high != 0 {
                return Err(Exception::gp0());
            }
            if value & 0xFFFF_F000 != msr::APIC_BASE_ADDR {
                return Err(Exception::gp0());
            }
            core.state.msr.apic_base = value;
            core.state.msr.apic_enabled = value & msr::APIC_BASE_EN != 0;
        }
        msr::IA32_TSC => {
            let tick = core.microtick();
            core.state.msr.tsc_offset = tick as i64 - (value / msr::TSC_RATE) as i64;
        }
        idx if Msrs::is_accepted_no_effect(idx) => {
            core.state.msr.write_accepted(idx, value);
        }
        _ => crate::fault::fatal(&format!("WRMSR to unrecognized index {index:#x}")),
    }
    Ok(())
}

pub fn op_rdmsr<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    require_cpl0(core)?;
    let index = core.state.gp.read32(ECX);

    let value: u64 = match index {
        msr::IA32_SYSENTER_CS => core.state.msr.sysenter_cs as u64,
        msr::IA32_SYSENTER_EIP => core.state.msr.sysenter_eip as u64,
        msr::IA32_SYSENTER_ESP => core.state.msr.sysenter_esp as u64,
        msr::IA32_APIC_BASE => {
            let mut v = msr::APIC_BASE_ADDR | msr::APIC_BASE_BSP;
            if core.state.msr.apic_enabled {
                v |= msr::APIC_BASE_EN;
            }
            v
        }
        msr::IA32_TSC => {
            let tick = core.microtick();
            ((tick as i64 - core.state.msr.tsc_offset) as u64).wrapping_mul(msr::TSC_RATE)
        }
        idx if Msrs::is_accepted_no_effect(idx) => core.state.msr.read_accepted(idx).unwrap_or(0),
        _ => crate::fault::fatal(&format!("RDMSR from unrecognized index {index:#x}")),
    };

    core.state.gp.write32(EAX, value as u32);
    core.state.gp.write32(EDX, (value >> 32) as u32);
    Ok(())
}

pub fn op_sysenter<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    if !core.state.is_protected_not_vm86() {
        return Err(Exception::gp0());
    }
    let cs_sel = core.state.msr.sysenter_cs & !0b11;
    if cs_sel == 0 {
        return Err(Exception::gp0());
    }

    load_seg_direct(&mut core.state.segments, Seg::Cs, cs_sel, 0, 0xFFFF_FFFF, false);
    load_seg_direct(
        &mut core.state.segments,
        Seg::Ss,
        cs_sel + 8,
        0,
        0xFFFF_FFFF,
        false,
    );
    core.state.segments.stack_size_32 = true;
    core.state.segments.update_cs_size(true);
    core.state.cpl = 0;
    core.state.cpl_changed();
    core.state.set_flag(crate::flags::FLAG_VM, false);
    core.state.set_flag(crate::flags::FLAG_IF, false);
    core.state.gp.write32(crate::registers::ESP, core.state.msr.sysenter_esp);
    core.state.set_eip(core.state.msr.sysenter_eip);
    core.state.diverged = true;
    Ok(())
}

pub fn op_sysexit<B: CpuBus>(
    core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    if !core.state.is_protected_not_vm86() {
        return Err(Exception::gp0());
    }
    let cs_sel = core.state.msr.sysenter_cs & !0b11;
    if cs_sel == 0 {
        return Err(Exception::gp0());
    }
    require_cpl0(core)?;

    load_seg_direct(
        &mut core.state.segments,
        Seg::Cs,
        (cs_sel + 16) | 3,
        0,
        0xFFFF_FFFF,
        false,
    );
    load_seg_direct(
        &mut core.state.segments,
        Seg::Ss,
        (cs_sel + 24) | 3,
        0,
        0xFFFF_FFFF,
        false,
    );
    core.state.segments.stack_size_32 = true;
    core.state.segments.update_cs_size(true);
    core.state.cpl = 3;
    core.state.cpl_changed();
    let edx = core.state.gp.read32(EDX);
    let ecx = core.state.gp.read32(ECX);
    core.state.gp.write32(crate::registers::ESP, ecx);
    core.state.set_eip(edx);
    core.state.diverged = true;
    Ok(())
}
