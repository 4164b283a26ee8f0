//! Capability stubs: fixed-behavior handlers for the explicitly-undefined
//! opcode slots (spec.md §2 component 5). The single "unimplemented SSE
//! trap" catch-all lives in `sse2` alongside the subset it's the fallback
//! for.

use crate::cpu::CpuCore;
use crate::fault::Exception;
use crate::mem::CpuBus;
use crate::state::OperandSize;

use super::Fetch;

pub fn ud_stub<B: CpuBus>(
    _core: &mut CpuCore<B>,
    _opcode: u8,
    _prefixes: u32,
    _size: OperandSize,
    _fetch: Fetch,
) -> Result<(), Exception> {
    Err(Exception::InvalidOpcode)
}
