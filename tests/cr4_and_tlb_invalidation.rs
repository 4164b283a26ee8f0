//! CR4's reserved-bit mask and the PGE-transition TLB-invalidation contract:
//! setting PGE calls `clear_tlb` exactly once, clearing it calls
//! `full_clear_tlb` exactly once, and toggling an unrelated bit calls
//! neither. Grounded in the teacher's `tests/tier0_atomics.rs` `CountingBus`
//! wrapper, narrowed to the TLB-maintenance hooks this crate defines.

use ia32_cpu_core::registers::EAX;
use ia32_cpu_core::{CpuBus, CpuCore, CpuMode, CpuState, Exception, FlatTestBus};

struct CountingBus {
    inner: FlatTestBus,
    clear_tlb_calls: u32,
    full_clear_tlb_calls: u32,
}

impl CountingBus {
    fn new(size: usize) -> Self {
        CountingBus {
            inner: FlatTestBus::new(size),
            clear_tlb_calls: 0,
            full_clear_tlb_calls: 0,
        }
    }
}

impl CpuBus for CountingBus {
    fn read_u8(&mut self, addr: u32) -> Result<u8, Exception> {
        self.inner.read_u8(addr)
    }
    fn read_u16(&mut self, addr: u32) -> Result<u16, Exception> {
        self.inner.read_u16(addr)
    }
    fn read_u32(&mut self, addr: u32) -> Result<u32, Exception> {
        self.inner.read_u32(addr)
    }
    fn read_u64(&mut self, addr: u32) -> Result<u64, Exception> {
        self.inner.read_u64(addr)
    }
    fn read_u128(&mut self, addr: u32) -> Result<u128, Exception> {
        self.inner.read_u128(addr)
    }
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<(), Exception> {
        self.inner.write_u8(addr, val)
    }
    fn write_u16(&mut self, addr: u32, val: u16) -> Result<(), Exception> {
        self.inner.write_u16(addr, val)
    }
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), Exception> {
        self.inner.write_u32(addr, val)
    }
    fn write_u64(&mut self, addr: u32, val: u64) -> Result<(), Exception> {
        self.inner.write_u64(addr, val)
    }
    fn write_u128(&mut self, addr: u32, val: u128) -> Result<(), Exception> {
        self.inner.write_u128(addr, val)
    }
    fn writable_or_pagefault(&mut self, addr: u32, bytes: u32) -> Result<(), Exception> {
        self.inner.writable_or_pagefault(addr, bytes)
    }
    fn clear_tlb(&mut self) {
        self.clear_tlb_calls += 1;
    }
    fn full_clear_tlb(&mut self) {
        self.full_clear_tlb_calls += 1;
    }
}

fn core() -> CpuCore<CountingBus> {
    CpuCore::new(CpuState::new(CpuMode::Protected), CountingBus::new(0x100))
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
fn setting_cr4_pge_invalidates_the_tlb_exactly_once() {
    let mut core = core();
    core.state.gp.write32(EAX, ia32_cpu_core::state::CR4_PGE);
    let mut fetch = fetch_from(&[0b11_100_000]); // reg=/4 (CR4), rm=EAX
    core.step_0f_32(0x22, 0, &mut fetch).unwrap();
    assert_eq!(core.bus.clear_tlb_calls, 1);
    assert_eq!(core.bus.full_clear_tlb_calls, 0);
}

#[test]
fn clearing_cr4_pge_does_a_full_tlb_invalidation_exactly_once() {
    let mut core = core();
    core.state.gp.write32(EAX, ia32_cpu_core::state::CR4_PGE);
    let mut fetch = fetch_from(&[0b11_100_000]);
    core.step_0f_32(0x22, 0, &mut fetch).unwrap(); // CR4.PGE set -> clear_tlb

    core.state.gp.write32(EAX, 0);
    let mut fetch = fetch_from(&[0b11_100_000]);
    core.step_0f_32(0x22, 0, &mut fetch).unwrap(); // CR4.PGE cleared -> full_clear_tlb
    assert_eq!(core.bus.clear_tlb_calls, 1);
    assert_eq!(core.bus.full_clear_tlb_calls, 1);
}

#[test]
fn toggling_an_unrelated_cr4_bit_does_not_touch_the_tlb() {
    let mut core = core();
    core.state.gp.write32(EAX, ia32_cpu_core::state::CR4_TSD);
    let mut fetch = fetch_from(&[0b11_100_000]);
    core.step_0f_32(0x22, 0, &mut fetch).unwrap();
    assert_eq!(core.bus.clear_tlb_calls, 0);
    assert_eq!(core.bus.full_clear_tlb_calls, 0);
}

#[test]
fn writing_a_reserved_cr4_bit_faults_and_leaves_cr4_unchanged() {
    let mut core = core();
    let before = core.state.control.cr4;
    core.state.gp.write32(EAX, 0x00F8_F800); // every documented reserved bit
    let mut fetch = fetch_from(&[0b11_100_000]);
    let result = core.step_0f_32(0x22, 0, &mut fetch);
    assert_eq!(result, Err(Exception::gp0()));
    assert_eq!(core.state.control.cr4, before);
}
