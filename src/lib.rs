//! An IA-32 two-byte (0F) opcode core: ModR/M decode, the lazy-EFLAGS
//! contract, a 32-bit linear memory bus with an optional non-PAE paging
//! layer, and the dispatch tables that interpret every 0F-prefixed
//! instruction this crate covers. There is no decode loop or prefix
//! scanner here — `CpuCore::step_0f_16`/`step_0f_32` are the entry points
//! an outer fetch/decode loop calls once it has already consumed the
//! legacy prefixes and the 0F escape byte.

pub mod alu;
pub mod cpu;
pub mod dispatch;
pub mod fault;
pub mod flags;
pub mod mem;
pub mod modrm;
pub mod msr;
pub mod paging;
pub mod registers;
pub mod segmentation;
pub mod sse;
pub mod state;

pub use cpu::CpuCore;
pub use fault::Exception;
pub use mem::{CpuBus, FlatTestBus};
pub use paging::PagingBus;
pub use state::{CpuMode, CpuState, OperandSize};
