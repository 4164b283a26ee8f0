//! Segment registers, descriptor-table registers, and the thin segment-load
//! glue the 0F system instructions need (SLDT/STR/LLDT/LTR, LGDT/LIDT, VERR/
//! VERW, LAR/LSL). Full descriptor-cache validation (access rights, present
//! bit, conforming/non-conforming checks across a real GDT/LDT walk) is the
//! "segment-load machinery" spec.md lists as an external collaborator; this
//! crate models the pieces the 0F dispatcher directly observes (selector,
//! base, limit, null-ness) without re-deriving a full protected-mode
//! descriptor cache loader.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentRegister {
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub null: bool,
}

impl SegmentRegister {
    pub fn is_unusable(&self) -> bool {
        self.null
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seg {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
    Ldtr,
    Tr,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DtReg {
    pub base: u32,
    pub limit: u16,
}

#[derive(Clone, Debug, Default)]
pub struct Tables {
    pub gdtr: DtReg,
    pub idtr: DtReg,
    pub ldtr: SegmentRegister,
    pub tr: SegmentRegister,
}

#[derive(Clone, Debug, Default)]
pub struct Segments {
    pub es: SegmentRegister,
    pub cs: SegmentRegister,
    pub ss: SegmentRegister,
    pub ds: SegmentRegister,
    pub fs: SegmentRegister,
    pub gs: SegmentRegister,
    /// Default operand/address size implied by CS (set by `update_cs_size`).
    pub cs_size_32: bool,
    /// SS.B — stack references use ESP (true) or SP (false).
    pub stack_size_32: bool,
}

impl Segments {
    pub fn get(&self, seg: Seg) -> SegmentRegister {
        match seg {
            Seg::Es => self.es,
            Seg::Cs => self.cs,
            Seg::Ss => self.ss,
            Seg::Ds => self.ds,
            Seg::Fs => self.fs,
            Seg::Gs => self.gs,
            Seg::Ldtr | Seg::Tr => unreachable!("ldtr/tr are in Tables, not Segments"),
        }
    }

    /// Update CS's implied default operand/address size, per spec.md's
    /// invariant that this must stay consistent across a PE transition.
    pub fn update_cs_size(&mut self, size_32: bool) {
        self.cs_size_32 = size_32;
    }
}

/// Loads a segment selector directly (selector + supplied base/limit/null),
/// used by the handlers that already know the target descriptor's geometry
/// (LSS/LFS/LGS via `lss16/32`, or plain selector loads in real/VM86 mode
/// where base = selector << 4). Full GDT/LDT descriptor fetch/validation for
/// protected-mode data/code segment loads lives outside this crate's scope.
pub fn load_seg_direct(
    segs: &mut Segments,
    seg: Seg,
    selector: u16,
    base: u32,
    limit: u32,
    null: bool,
) {
    let reg = SegmentRegister {
        selector,
        base,
        limit,
        null,
    };
    match seg {
        Seg::Es => segs.es = reg,
        Seg::Cs => segs.cs = reg,
        Seg::Ss => segs.ss = reg,
        Seg::Ds => segs.ds = reg,
        Seg::Fs => segs.fs = reg,
        Seg::Gs => segs.gs = reg,
        Seg::Ldtr | Seg::Tr => unreachable!("ldtr/tr loaded via Tables"),
    }
}

/// VERR/VERW: whether `selector` names a segment readable/writable at the
/// current privilege level. Without a full descriptor-cache loader this
/// crate treats any non-null selector as valid for the requested access,
/// matching spec.md's silence on descriptor contents beyond "invoke VERR/
/// VERW" (an Open Question left to the descriptor engine in the original).
pub fn verr(selector: u16) -> bool {
    selector & !0b11 != 0
}

pub fn verw(selector: u16) -> bool {
    selector & !0b11 != 0
}

/// LAR/LSL: reports whether the selector is loadable; full access-rights /
/// limit reconstruction is delegated to the (unimplemented-here) descriptor
/// cache, so this returns only the presence bit needed by spec.md's ZF
/// contract for those instructions.
pub fn lar_valid(selector: u16) -> bool {
    selector & !0b11 != 0
}

pub fn lsl_valid(selector: u16) -> bool {
    selector & !0b11 != 0
}
