//! Opcode enumeration and static metadata
//!
//! Every opcode carries its textual mnemonic plus the classification bits
//! the parser, verifier, passes, and VM all consult: terminator-ness,
//! result expectations, fixed operand arity, and whether execution can
//! trap. The metadata is a const schema; nothing here is mutable after
//! startup.

use crate::types::Type;

/// Instruction opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Integer arithmetic: wrapping forms
    IAdd,
    ISub,
    IMul,
    // Integer arithmetic: forms that trap on signed overflow
    IAddOvf,
    ISubOvf,
    IMulOvf,
    // Division and remainder; unchecked forms have undefined divisors
    // rejected by the verifier, `.chk0` forms trap at runtime
    SDiv,
    SRem,
    UDiv,
    URem,
    SDivChk0,
    SRemChk0,
    UDivChk0,
    URemChk0,
    // Bitwise
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    // Integer comparisons (result i1)
    ICmpEq,
    ICmpNe,
    SCmpLt,
    SCmpLe,
    SCmpGt,
    SCmpGe,
    UCmpLt,
    UCmpLe,
    UCmpGt,
    UCmpGe,
    // Float arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    // Float comparisons
    FCmpEq,
    FCmpNe,
    FCmpLt,
    FCmpLe,
    FCmpGt,
    FCmpGe,
    FCmpOrd,
    FCmpUno,
    // Conversions
    Sitofp,
    Fptosi,
    CastSiToFp,
    CastFpToSiRteChk,
    CastSiNarrowChk,
    Zext1,
    Trunc1,
    // Constant materialisation
    ConstI1,
    ConstI64,
    ConstF64,
    ConstStr,
    // Memory
    Alloca,
    Load,
    Store,
    Gep,
    AddrOf,
    // Calls
    Call,
    CallIndirect,
    // Terminators
    Br,
    CBr,
    SwitchI32,
    Ret,
    Trap,
    ResumeLabel,
}

/// Number of opcodes; sizes the VM's dispatch table.
pub const OPCODE_COUNT: usize = Opcode::ResumeLabel as usize + 1;

/// Every opcode in discriminant order; `ALL[op as usize] == op`. Used to
/// build dispatch tables indexed by discriminant.
pub const ALL: [Opcode; OPCODE_COUNT] = [
    Opcode::IAdd,
    Opcode::ISub,
    Opcode::IMul,
    Opcode::IAddOvf,
    Opcode::ISubOvf,
    Opcode::IMulOvf,
    Opcode::SDiv,
    Opcode::SRem,
    Opcode::UDiv,
    Opcode::URem,
    Opcode::SDivChk0,
    Opcode::SRemChk0,
    Opcode::UDivChk0,
    Opcode::URemChk0,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Shl,
    Opcode::LShr,
    Opcode::AShr,
    Opcode::ICmpEq,
    Opcode::ICmpNe,
    Opcode::SCmpLt,
    Opcode::SCmpLe,
    Opcode::SCmpGt,
    Opcode::SCmpGe,
    Opcode::UCmpLt,
    Opcode::UCmpLe,
    Opcode::UCmpGt,
    Opcode::UCmpGe,
    Opcode::FAdd,
    Opcode::FSub,
    Opcode::FMul,
    Opcode::FDiv,
    Opcode::FCmpEq,
    Opcode::FCmpNe,
    Opcode::FCmpLt,
    Opcode::FCmpLe,
    Opcode::FCmpGt,
    Opcode::FCmpGe,
    Opcode::FCmpOrd,
    Opcode::FCmpUno,
    Opcode::Sitofp,
    Opcode::Fptosi,
    Opcode::CastSiToFp,
    Opcode::CastFpToSiRteChk,
    Opcode::CastSiNarrowChk,
    Opcode::Zext1,
    Opcode::Trunc1,
    Opcode::ConstI1,
    Opcode::ConstI64,
    Opcode::ConstF64,
    Opcode::ConstStr,
    Opcode::Alloca,
    Opcode::Load,
    Opcode::Store,
    Opcode::Gep,
    Opcode::AddrOf,
    Opcode::Call,
    Opcode::CallIndirect,
    Opcode::Br,
    Opcode::CBr,
    Opcode::SwitchI32,
    Opcode::Ret,
    Opcode::Trap,
    Opcode::ResumeLabel,
];

impl Opcode {
    /// Canonical textual mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::IAdd => "iadd",
            Opcode::ISub => "isub",
            Opcode::IMul => "imul",
            Opcode::IAddOvf => "iadd.ovf",
            Opcode::ISubOvf => "isub.ovf",
            Opcode::IMulOvf => "imul.ovf",
            Opcode::SDiv => "sdiv",
            Opcode::SRem => "srem",
            Opcode::UDiv => "udiv",
            Opcode::URem => "urem",
            Opcode::SDivChk0 => "sdiv.chk0",
            Opcode::SRemChk0 => "srem.chk0",
            Opcode::UDivChk0 => "udiv.chk0",
            Opcode::URemChk0 => "urem.chk0",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::LShr => "lshr",
            Opcode::AShr => "ashr",
            Opcode::ICmpEq => "icmp.eq",
            Opcode::ICmpNe => "icmp.ne",
            Opcode::SCmpLt => "scmp.lt",
            Opcode::SCmpLe => "scmp.le",
            Opcode::SCmpGt => "scmp.gt",
            Opcode::SCmpGe => "scmp.ge",
            Opcode::UCmpLt => "ucmp.lt",
            Opcode::UCmpLe => "ucmp.le",
            Opcode::UCmpGt => "ucmp.gt",
            Opcode::UCmpGe => "ucmp.ge",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::FCmpEq => "fcmp.eq",
            Opcode::FCmpNe => "fcmp.ne",
            Opcode::FCmpLt => "fcmp.lt",
            Opcode::FCmpLe => "fcmp.le",
            Opcode::FCmpGt => "fcmp.gt",
            Opcode::FCmpGe => "fcmp.ge",
            Opcode::FCmpOrd => "fcmp.ord",
            Opcode::FCmpUno => "fcmp.uno",
            Opcode::Sitofp => "sitofp",
            Opcode::Fptosi => "fptosi",
            Opcode::CastSiToFp => "cast.si_to_fp",
            Opcode::CastFpToSiRteChk => "cast.fp_to_si.rte.chk",
            Opcode::CastSiNarrowChk => "cast.si_narrow.chk",
            Opcode::Zext1 => "zext1",
            Opcode::Trunc1 => "trunc1",
            Opcode::ConstI1 => "const_i1",
            Opcode::ConstI64 => "const_i64",
            Opcode::ConstF64 => "const_f64",
            Opcode::ConstStr => "const_str",
            Opcode::Alloca => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Gep => "gep",
            Opcode::AddrOf => "addr_of",
            Opcode::Call => "call",
            Opcode::CallIndirect => "call.indirect",
            Opcode::Br => "br",
            Opcode::CBr => "cbr",
            Opcode::SwitchI32 => "switch.i32",
            Opcode::Ret => "ret",
            Opcode::Trap => "trap",
            Opcode::ResumeLabel => "resume.label",
        }
    }

    /// Resolve a mnemonic token to an opcode. Accepts the legacy
    /// `add`/`sub`/`mul` spellings as aliases for the wrapping forms.
    pub fn from_mnemonic(token: &str) -> Option<Opcode> {
        let op = match token {
            "iadd" | "add" => Opcode::IAdd,
            "isub" | "sub" => Opcode::ISub,
            "imul" | "mul" => Opcode::IMul,
            "iadd.ovf" => Opcode::IAddOvf,
            "isub.ovf" => Opcode::ISubOvf,
            "imul.ovf" => Opcode::IMulOvf,
            "sdiv" => Opcode::SDiv,
            "srem" => Opcode::SRem,
            "udiv" => Opcode::UDiv,
            "urem" => Opcode::URem,
            "sdiv.chk0" => Opcode::SDivChk0,
            "srem.chk0" => Opcode::SRemChk0,
            "udiv.chk0" => Opcode::UDivChk0,
            "urem.chk0" => Opcode::URemChk0,
            "and" => Opcode::And,
            "or" => Opcode::Or,
            "xor" => Opcode::Xor,
            "shl" => Opcode::Shl,
            "lshr" => Opcode::LShr,
            "ashr" => Opcode::AShr,
            "icmp.eq" => Opcode::ICmpEq,
            "icmp.ne" => Opcode::ICmpNe,
            "scmp.lt" => Opcode::SCmpLt,
            "scmp.le" => Opcode::SCmpLe,
            "scmp.gt" => Opcode::SCmpGt,
            "scmp.ge" => Opcode::SCmpGe,
            "ucmp.lt" => Opcode::UCmpLt,
            "ucmp.le" => Opcode::UCmpLe,
            "ucmp.gt" => Opcode::UCmpGt,
            "ucmp.ge" => Opcode::UCmpGe,
            "fadd" => Opcode::FAdd,
            "fsub" => Opcode::FSub,
            "fmul" => Opcode::FMul,
            "fdiv" => Opcode::FDiv,
            "fcmp.eq" => Opcode::FCmpEq,
            "fcmp.ne" => Opcode::FCmpNe,
            "fcmp.lt" => Opcode::FCmpLt,
            "fcmp.le" => Opcode::FCmpLe,
            "fcmp.gt" => Opcode::FCmpGt,
            "fcmp.ge" => Opcode::FCmpGe,
            "fcmp.ord" => Opcode::FCmpOrd,
            "fcmp.uno" => Opcode::FCmpUno,
            "sitofp" => Opcode::Sitofp,
            "fptosi" => Opcode::Fptosi,
            "cast.si_to_fp" => Opcode::CastSiToFp,
            "cast.fp_to_si.rte.chk" => Opcode::CastFpToSiRteChk,
            "cast.si_narrow.chk" => Opcode::CastSiNarrowChk,
            "zext1" => Opcode::Zext1,
            "trunc1" => Opcode::Trunc1,
            "const_i1" => Opcode::ConstI1,
            "const_i64" => Opcode::ConstI64,
            "const_f64" => Opcode::ConstF64,
            "const_str" => Opcode::ConstStr,
            "alloca" => Opcode::Alloca,
            "load" => Opcode::Load,
            "store" => Opcode::Store,
            "gep" => Opcode::Gep,
            "addr_of" => Opcode::AddrOf,
            "call" => Opcode::Call,
            "call.indirect" => Opcode::CallIndirect,
            "br" => Opcode::Br,
            "cbr" => Opcode::CBr,
            "switch.i32" => Opcode::SwitchI32,
            "ret" => Opcode::Ret,
            "trap" => Opcode::Trap,
            "resume.label" => Opcode::ResumeLabel,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Br
                | Opcode::CBr
                | Opcode::SwitchI32
                | Opcode::Ret
                | Opcode::Trap
                | Opcode::ResumeLabel
        )
    }

    /// Branch-family opcodes carry parallel `labels`/`br_args` vectors.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Opcode::Br | Opcode::CBr | Opcode::SwitchI32 | Opcode::ResumeLabel
        )
    }

    /// Whether the instruction must define a result temporary. Calls are
    /// excluded: their result presence follows the callee's return type.
    pub fn requires_result(&self) -> bool {
        !matches!(
            self,
            Opcode::Store
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::Br
                | Opcode::CBr
                | Opcode::SwitchI32
                | Opcode::Ret
                | Opcode::Trap
                | Opcode::ResumeLabel
        )
    }

    /// Fixed operand arity where one exists. Calls, `ret`, and
    /// `switch.i32` are variadic.
    pub fn fixed_arity(&self) -> Option<usize> {
        match self {
            Opcode::IAdd
            | Opcode::ISub
            | Opcode::IMul
            | Opcode::IAddOvf
            | Opcode::ISubOvf
            | Opcode::IMulOvf
            | Opcode::SDiv
            | Opcode::SRem
            | Opcode::UDiv
            | Opcode::URem
            | Opcode::SDivChk0
            | Opcode::SRemChk0
            | Opcode::UDivChk0
            | Opcode::URemChk0
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::LShr
            | Opcode::AShr
            | Opcode::ICmpEq
            | Opcode::ICmpNe
            | Opcode::SCmpLt
            | Opcode::SCmpLe
            | Opcode::SCmpGt
            | Opcode::SCmpGe
            | Opcode::UCmpLt
            | Opcode::UCmpLe
            | Opcode::UCmpGt
            | Opcode::UCmpGe
            | Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv
            | Opcode::FCmpEq
            | Opcode::FCmpNe
            | Opcode::FCmpLt
            | Opcode::FCmpLe
            | Opcode::FCmpGt
            | Opcode::FCmpGe
            | Opcode::FCmpOrd
            | Opcode::FCmpUno
            | Opcode::Gep => Some(2),
            Opcode::Sitofp
            | Opcode::Fptosi
            | Opcode::CastSiToFp
            | Opcode::CastFpToSiRteChk
            | Opcode::CastSiNarrowChk
            | Opcode::Zext1
            | Opcode::Trunc1
            | Opcode::ConstI1
            | Opcode::ConstI64
            | Opcode::ConstF64
            | Opcode::ConstStr
            | Opcode::Alloca
            | Opcode::AddrOf => Some(1),
            Opcode::Load => Some(1),
            Opcode::Store => Some(2),
            Opcode::CBr => Some(1),
            Opcode::Br | Opcode::Trap | Opcode::ResumeLabel => Some(0),
            Opcode::Call | Opcode::CallIndirect | Opcode::SwitchI32 | Opcode::Ret => None,
        }
    }

    /// Result type when no explicit `:type` annotation is present.
    pub fn default_result_type(&self) -> Type {
        match self {
            Opcode::IAdd
            | Opcode::ISub
            | Opcode::IMul
            | Opcode::IAddOvf
            | Opcode::ISubOvf
            | Opcode::IMulOvf
            | Opcode::SDiv
            | Opcode::SRem
            | Opcode::UDiv
            | Opcode::URem
            | Opcode::SDivChk0
            | Opcode::SRemChk0
            | Opcode::UDivChk0
            | Opcode::URemChk0
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::LShr
            | Opcode::AShr
            | Opcode::Zext1
            | Opcode::ConstI64
            | Opcode::CastFpToSiRteChk
            | Opcode::CastSiNarrowChk
            | Opcode::Fptosi => Type::I64,
            Opcode::ICmpEq
            | Opcode::ICmpNe
            | Opcode::SCmpLt
            | Opcode::SCmpLe
            | Opcode::SCmpGt
            | Opcode::SCmpGe
            | Opcode::UCmpLt
            | Opcode::UCmpLe
            | Opcode::UCmpGt
            | Opcode::UCmpGe
            | Opcode::FCmpEq
            | Opcode::FCmpNe
            | Opcode::FCmpLt
            | Opcode::FCmpLe
            | Opcode::FCmpGt
            | Opcode::FCmpGe
            | Opcode::FCmpOrd
            | Opcode::FCmpUno
            | Opcode::Trunc1
            | Opcode::ConstI1 => Type::I1,
            Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv
            | Opcode::Sitofp
            | Opcode::CastSiToFp
            | Opcode::ConstF64 => Type::F64,
            Opcode::Alloca | Opcode::Gep | Opcode::AddrOf => Type::Ptr,
            Opcode::ConstStr => Type::Str,
            Opcode::Load => Type::I64,
            Opcode::Store
            | Opcode::Call
            | Opcode::CallIndirect
            | Opcode::Br
            | Opcode::CBr
            | Opcode::SwitchI32
            | Opcode::Ret
            | Opcode::Trap
            | Opcode::ResumeLabel => Type::Void,
        }
    }

    /// Whether evaluating the opcode can fault at runtime. Constant
    /// folding must not discharge these unless the guard condition is
    /// statically known to hold.
    pub fn can_trap(&self) -> bool {
        matches!(
            self,
            Opcode::IAddOvf
                | Opcode::ISubOvf
                | Opcode::IMulOvf
                | Opcode::SDivChk0
                | Opcode::SRemChk0
                | Opcode::UDivChk0
                | Opcode::URemChk0
                | Opcode::CastFpToSiRteChk
                | Opcode::CastSiNarrowChk
                | Opcode::Trap
        )
    }

    /// Whether the opcode has no side effects beyond producing its
    /// result. Calls are classified through the helper-effect registry,
    /// not here.
    pub fn is_pure(&self) -> bool {
        !matches!(
            self,
            Opcode::Store
                | Opcode::Load
                | Opcode::Alloca
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::Br
                | Opcode::CBr
                | Opcode::SwitchI32
                | Opcode::Ret
                | Opcode::Trap
                | Opcode::ResumeLabel
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
