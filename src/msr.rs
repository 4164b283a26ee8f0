//! Model-specific register storage: the SYSENTER trio, TSC, APIC_BASE, and the
//! sparse set of accepted-but-unmodelled indices `spec.md` names explicitly.

use std::collections::BTreeMap;

pub const IA32_SYSENTER_CS: u32 = 0x174;
pub const IA32_SYSENTER_ESP: u32 = 0x175;
pub const IA32_SYSENTER_EIP: u32 = 0x176;
pub const IA32_TSC: u32 = 0x10;
pub const IA32_APIC_BASE: u32 = 0x1B;
pub const IA32_BIOS_SIGN_ID: u32 = 0x8B;
pub const IA32_MISC_ENABLE: u32 = 0x1A0;
pub const IA32_MCG_CAP: u32 = 0x179;
pub const IA32_KERNEL_GS_BASE: u32 = 0xC0000102;
pub const MSR_PLATFORM_ID: u32 = 0x17;
pub const MSR_RTIT_CTL: u32 = 0x570;
pub const MSR_SMI_COUNT: u32 = 0x34;
pub const MSR_PKG_C2_RESIDENCY: u32 = 0x60D;

/// Fixed fake physical base used for APIC_BASE sanity checks, matching
/// `spec.md` §4.6's "the address bits must equal the fixed APIC address
/// (implementation constant)".
pub const APIC_BASE_ADDR: u64 = 0xFEE0_0000;

/// APIC_BASE.EN (bit 11).
pub const APIC_BASE_EN: u64 = 1 << 11;
/// APIC_BASE.BSP (bit 8), set for a single-CPU emulated machine.
pub const APIC_BASE_BSP: u64 = 1 << 8;

const ACCEPTED_NO_SIDE_EFFECT: &[u32] = &[
    IA32_BIOS_SIGN_ID,
    IA32_MISC_ENABLE,
    IA32_MCG_CAP,
    IA32_KERNEL_GS_BASE,
    MSR_PLATFORM_ID,
    MSR_RTIT_CTL,
    MSR_SMI_COUNT,
    MSR_PKG_C2_RESIDENCY,
];

#[derive(Clone, Debug, Default)]
pub struct Msrs {
    pub sysenter_cs: u32,
    pub sysenter_eip: u32,
    pub sysenter_esp: u32,
    /// `microtick() - tsc_offset` scaled by `TSC_RATE` reproduces the guest-visible TSC.
    pub tsc_offset: i64,
    pub apic_base: u64,
    pub apic_enabled: bool,
    accepted: BTreeMap<u32, u64>,
}

/// Fixed TSC scale factor (emulated ticks per microtick); matches the teacher's
/// `microtick`-based TSC reconstruction contract in spec.md §4.6/§6.
pub const TSC_RATE: u64 = 1;

impl Msrs {
    pub fn is_accepted_no_effect(index: u32) -> bool {
        ACCEPTED_NO_SIDE_EFFECT.contains(&index)
    }

    pub fn read_accepted(&self, index: u32) -> Option<u64> {
        if Self::is_accepted_no_effect(index) {
            Some(*self.accepted.get(&index).unwrap_or(&0))
        } else {
            None
        }
    }

    pub fn write_accepted(&mut self, index: u32, value: u64) -> bool {
        if Self::is_accepted_no_effect(index) {
            self.accepted.insert(index, value);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_indices_round_trip() {
        let mut msrs = Msrs::default();
        assert!(msrs.write_accepted(IA32_MISC_ENABLE, 0xDEAD_BEEF));
        assert_eq!(msrs.read_accepted(IA32_MISC_ENABLE), Some(0xDEAD_BEEF));
    }

    #[test]
    fn unread_accepted_index_defaults_to_zero() {
        let msrs = Msrs::default();
        assert_eq!(msrs.read_accepted(IA32_KERNEL_GS_BASE), Some(0));
    }

    #[test]
    fn unrecognized_index_is_not_accepted() {
        assert!(!Msrs::is_accepted_no_effect(IA32_TSC));
        let mut msrs = Msrs::default();
        assert!(!msrs.write_accepted(IA32_TSC, 1));
        assert_eq!(msrs.read_accepted(IA32_TSC), None);
    }
}
