//! `CpuCore`: the owning context a caller drives the dispatcher through.
//! Bundles `CpuState` with the bus the current instruction operates against
//! and the small utility surface (`microtick`, `has_rand_int`/`get_rand_int`)
//! spec.md's External Interfaces section lists as downstream collaborators.
//! There is no sibling decode-loop crate in this workspace, so
//! `step_0f_16`/`step_0f_32` stand in for "the outer loop calls
//! `run_instruction0f_16/32`".

use crate::dispatch;
use crate::fault::Exception;
use crate::mem::CpuBus;
use crate::state::CpuState;

pub const PREFIX_66: u32 = 1 << 0;
pub const PREFIX_F2: u32 = 1 << 1;
pub const PREFIX_F3: u32 = 1 << 2;
pub const PREFIX_LOCK: u32 = 1 << 3;
pub const PREFIX_REP_MASK: u32 = PREFIX_F2 | PREFIX_F3;
pub const PREFIX_OPSIZE_MASK: u32 = PREFIX_66;

pub struct CpuCore<B> {
    pub state: CpuState,
    pub bus: B,
    tick: u64,
}

impl<B: CpuBus> CpuCore<B> {
    pub fn new(state: CpuState, bus: B) -> Self {
        CpuCore { state, bus, tick: 0 }
    }

    /// A strictly-increasing counter standing in for the external timer
    /// source (`microtick`); advanced once per dispatched instruction so TSC
    /// reads observe forward progress across WRMSR/RDMSR pairs.
    pub fn microtick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// The random source is an external collaborator; this crate never
    /// claims hardware RNG is available, so RDRAND always reports
    /// unavailable (CF=0) rather than fabricating entropy.
    pub fn has_rand_int(&self) -> bool {
        false
    }

    pub fn get_rand_int(&mut self) -> u32 {
        0
    }

    /// Entry point for the 16-bit-operand-size 0F dispatch table. `fetch`
    /// pulls the next raw byte from the instruction stream (ModR/M, SIB,
    /// displacement, or immediate) — owned by the caller, since byte fetch
    /// and prefix decode are external collaborators this crate does not
    /// implement.
    pub fn step_0f_16(
        &mut self,
        opcode: u8,
        prefixes: u32,
        fetch: &mut dyn FnMut() -> Result<u8, Exception>,
    ) -> Result<(), Exception> {
        dispatch::dispatch16(self, opcode, prefixes, fetch)
    }

    /// Entry point for the 32-bit-operand-size 0F dispatch table.
    pub fn step_0f_32(
        &mut self,
        opcode: u8,
        prefixes: u32,
        fetch: &mut dyn FnMut() -> Result<u8, Exception>,
    ) -> Result<(), Exception> {
        dispatch::dispatch32(self, opcode, prefixes, fetch)
    }
}
