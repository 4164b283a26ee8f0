//! The CPU State Bank: general/segment/control/debug registers, EFLAGS, the
//! descriptor-table registers, MSRs, and the SSE/MMX register file, all owned
//! by one `CpuState` passed into every handler (spec.md §9's "single owning
//! CPU context" design note — no process-wide globals).

use crate::flags::Flags;
use crate::msr::Msrs;
use crate::registers::{GpRegs, Register};
use crate::segmentation::{Seg, Segments, Tables};
use crate::sse::SseState;

pub const CR0_PE: u32 = 1 << 0;
pub const CR0_MP: u32 = 1 << 1;
pub const CR0_EM: u32 = 1 << 2;
pub const CR0_TS: u32 = 1 << 3;
pub const CR0_ET: u32 = 1 << 4;
pub const CR0_NE: u32 = 1 << 5;
pub const CR0_WP: u32 = 1 << 16;
pub const CR0_AM: u32 = 1 << 18;
pub const CR0_NW: u32 = 1 << 29;
pub const CR0_CD: u32 = 1 << 30;
pub const CR0_PG: u32 = 1 << 31;

pub const CR4_VME: u32 = 1 << 0;
pub const CR4_PVI: u32 = 1 << 1;
pub const CR4_TSD: u32 = 1 << 2;
pub const CR4_DE: u32 = 1 << 3;
pub const CR4_PSE: u32 = 1 << 4;
pub const CR4_PAE: u32 = 1 << 5;
pub const CR4_MCE: u32 = 1 << 6;
pub const CR4_PGE: u32 = 1 << 7;
pub const CR4_PCE: u32 = 1 << 8;
pub const CR4_OSFXSR: u32 = 1 << 9;
pub const CR4_OSXMMEXCPT: u32 = 1 << 10;

/// Bits 11,12,15,16,19 and 22..31, per spec.md's CR4 reserved-bit list.
pub const CR4_RESERVED: u32 = (1 << 11)
    | (1 << 12)
    | (1 << 15)
    | (1 << 16)
    | (1 << 19)
    | 0xFFC0_0000;

#[derive(Clone, Copy, Debug, Default)]
pub struct ControlRegs {
    pub cr0: u32,
    pub cr2: u32,
    pub cr3: u32,
    pub cr4: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DebugRegs {
    pub dr: [u32; 8],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuMode {
    Real,
    Protected,
    Vm86,
}

/// Operand/address-size context for the currently-executing instruction, as
/// decoded by the (external) prefix decoder and handed to
/// `run_instruction0f_16/32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandSize {
    Bits16,
    Bits32,
}

impl OperandSize {
    pub fn mask(self) -> u32 {
        match self {
            OperandSize::Bits16 => 0xFFFF,
            OperandSize::Bits32 => 0xFFFF_FFFF,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            OperandSize::Bits16 => 16,
            OperandSize::Bits32 => 32,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CpuState {
    pub gp: GpRegs,
    pub eip: u32,
    pub flags: Flags,
    pub segments: Segments,
    pub tables: Tables,
    pub control: ControlRegs,
    pub debug: DebugRegs,
    pub msr: Msrs,
    pub sse: SseState,
    pub mode: CpuMode,
    pub cpl: u8,
    /// Set by SYSENTER/SYSEXIT (and, in a full interpreter, far jumps/calls)
    /// to tell the outer loop that control flow left program order and the
    /// next fetch must restart from `eip` rather than continuing decode.
    pub diverged: bool,
}

impl Default for CpuState {
    fn default() -> Self {
        CpuState {
            gp: GpRegs::default(),
            eip: 0,
            flags: Flags::new(),
            segments: Segments::default(),
            tables: Tables::default(),
            control: ControlRegs::default(),
            debug: DebugRegs::default(),
            msr: Msrs::default(),
            sse: SseState::default(),
            mode: CpuMode::Real,
            cpl: 0,
            diverged: false,
        }
    }
}

impl CpuState {
    pub fn new(mode: CpuMode) -> Self {
        let mut state = CpuState {
            mode,
            ..Default::default()
        };
        if mode == CpuMode::Protected {
            state.control.cr0 |= CR0_PE;
        }
        if mode == CpuMode::Vm86 {
            state.control.cr0 |= CR0_PE;
            state.flags.set(crate::flags::FLAG_VM, true);
        }
        state
    }

    pub fn read_reg(&self, reg: Register) -> u32 {
        self.gp.read_reg(reg)
    }

    pub fn write_reg(&mut self, reg: Register, value: u32) {
        self.gp.write_reg(reg, value)
    }

    pub fn get_flag(&self, mask: u32) -> bool {
        self.flags.get(mask)
    }

    pub fn set_flag(&mut self, mask: u32, on: bool) {
        self.flags.set(mask, on)
    }

    pub fn set_eip(&mut self, eip: u32) {
        self.eip = eip;
    }

    /// Protected mode and not running under VM86 — the gate spec.md's
    /// "Real-mode gate" invariant names for 0F00/01/02/03.
    pub fn is_protected_not_vm86(&self) -> bool {
        self.control.cr0 & CR0_PE != 0 && !self.flags.get(crate::flags::FLAG_VM)
    }

    pub fn cpl_changed(&mut self) {
        // Hook point for a consumer that caches CPL-derived decode state;
        // this crate recomputes from `self.cpl` directly so there is nothing
        // to invalidate here.
    }

    pub fn seg(&self, seg: Seg) -> crate::segmentation::SegmentRegister {
        self.segments.get(seg)
    }

    /// CR0-write routine (§4.2): recompute derived mode/size state after PE
    /// changes, matching the invariant that CPL/segment-size consistency
    /// holds before the next instruction retires. Does not itself touch the
    /// TLB — CR0.PG transitions without a CR3 reload are architecturally odd
    /// and this crate leaves the TLB untouched for them, matching the
    /// teacher's narrow "only CR3/CR4.PGE/INVLPG invalidate" contract.
    pub fn write_cr0(&mut self, value: u32) {
        self.control.cr0 = value;
        let pe = value & CR0_PE != 0;
        self.mode = if self.flags.get(crate::flags::FLAG_VM) {
            CpuMode::Vm86
        } else if pe {
            CpuMode::Protected
        } else {
            CpuMode::Real
        };
        if !pe {
            self.cpl = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_real_mode_has_pe_clear_and_cpl0() {
        let state = CpuState::new(CpuMode::Real);
        assert_eq!(state.mode, CpuMode::Real);
        assert_eq!(state.control.cr0 & CR0_PE, 0);
        assert_eq!(state.cpl, 0);
        assert!(!state.is_protected_not_vm86());
    }

    #[test]
    fn new_protected_mode_sets_pe_and_gate_passes() {
        let state = CpuState::new(CpuMode::Protected);
        assert_ne!(state.control.cr0 & CR0_PE, 0);
        assert!(state.is_protected_not_vm86());
    }

    #[test]
    fn new_vm86_mode_sets_pe_and_vm_flag_but_gate_fails() {
        let state = CpuState::new(CpuMode::Vm86);
        assert_ne!(state.control.cr0 & CR0_PE, 0);
        assert!(state.get_flag(crate::flags::FLAG_VM));
        assert!(!state.is_protected_not_vm86());
    }

    #[test]
    fn write_cr0_clearing_pe_resets_cpl_and_mode() {
        let mut state = CpuState::new(CpuMode::Protected);
        state.cpl = 3;
        state.write_cr0(0);
        assert_eq!(state.mode, CpuMode::Real);
        assert_eq!(state.cpl, 0);
    }

    #[test]
    fn write_cr0_setting_pe_while_vm_flag_set_yields_vm86() {
        let mut state = CpuState::new(CpuMode::Real);
        state.flags.set(crate::flags::FLAG_VM, true);
        state.write_cr0(CR0_PE);
        assert_eq!(state.mode, CpuMode::Vm86);
    }
}
