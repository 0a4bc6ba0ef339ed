//! MIR opcodes and their data-flow attributes.
//!
//! The opcode set is closed: bytecode opcodes come first, followed by the
//! extended MIR opcodes that only exist inside the compiler.
use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Data-flow attributes of an opcode.
    ///
    /// `A`, `B` and `C` name the operand slots of the instruction. SSA uses
    /// are laid out in slot order, a wide slot contributing two names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DfAttr: u64 {
        /// Slot A is defined.
        const DA = 1 << 0;
        /// Slot A is used.
        const UA = 1 << 1;
        /// Slot B is used.
        const UB = 1 << 2;
        /// Slot C is used.
        const UC = 1 << 3;
        const A_WIDE = 1 << 4;
        const B_WIDE = 1 << 5;
        const C_WIDE = 1 << 6;
        /// Defines a constant from the literal operand.
        const SETS_CONST = 1 << 7;
        /// Variable-length argument list (invoke, filled-new-array).
        const FORMAT_35C = 1 << 8;
        const NULL_CHK_A = 1 << 9;
        const NULL_CHK_B = 1 << 10;
        /// Null check on the first argument of the argument list.
        const NULL_CHK_OUT0 = 1 << 11;
        const NON_NULL_DST = 1 << 12;
        /// The result delivered to the following move-result is non-null.
        const NON_NULL_RET = 1 << 13;
        /// Nullness of the source is transferred to the destination.
        const NULL_TRANSFER_0 = 1 << 14;
        /// Nullness is merged from all uses (phi).
        const NULL_TRANSFER_N = 1 << 15;
        const RANGE_CHK_C = 1 << 16;
        const FP_A = 1 << 17;
        const FP_B = 1 << 18;
        const FP_C = 1 << 19;
        const CORE_A = 1 << 20;
        const CORE_B = 1 << 21;
        const CORE_C = 1 << 22;
        const REF_A = 1 << 23;
        const REF_B = 1 << 24;
        const REF_C = 1 << 25;
        const IFIELD = 1 << 26;
        const SFIELD = 1 << 27;
        const IS_MOVE = 1 << 28;
        /// Slots A and B hold values of the same (unknown) type.
        const SAME_TYPE_AB = 1 << 29;
        const CHK_CAST = 1 << 30;
        const IS_INVOKE = 1 << 31;
        const IS_RETURN = 1 << 32;
        /// May write memory or observe writes made elsewhere.
        const MEM_BARRIER = 1 << 33;

        const HAS_NULL_CHKS = Self::NULL_CHK_A.bits()
            | Self::NULL_CHK_B.bits()
            | Self::NULL_CHK_OUT0.bits();
        const HAS_RANGE_CHKS = Self::RANGE_CHK_C.bits();
        const HAS_DEFS = Self::DA.bits();
        const HAS_USES = Self::UA.bits() | Self::UB.bits() | Self::UC.bits();
    }
}

macro_rules! opcodes {
    ($($name:ident => $text:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $($name,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text,)*
                }
            }
        }
    };
}

opcodes! {
    Nop => "nop",
    Move => "move",
    MoveWide => "move-wide",
    MoveObject => "move-object",
    MoveResult => "move-result",
    MoveResultWide => "move-result-wide",
    MoveResultObject => "move-result-object",
    MoveException => "move-exception",
    ReturnVoid => "return-void",
    Return => "return",
    ReturnWide => "return-wide",
    ReturnObject => "return-object",
    Const => "const",
    ConstWide => "const-wide",
    ConstString => "const-string",
    ConstClass => "const-class",
    MonitorEnter => "monitor-enter",
    MonitorExit => "monitor-exit",
    CheckCast => "check-cast",
    InstanceOf => "instance-of",
    ArrayLength => "array-length",
    NewInstance => "new-instance",
    NewArray => "new-array",
    FilledNewArray => "filled-new-array",
    Throw => "throw",
    Goto => "goto",
    PackedSwitch => "packed-switch",
    SparseSwitch => "sparse-switch",
    CmplFloat => "cmpl-float",
    CmpgFloat => "cmpg-float",
    CmplDouble => "cmpl-double",
    CmpgDouble => "cmpg-double",
    CmpLong => "cmp-long",
    IfEq => "if-eq",
    IfNe => "if-ne",
    IfLt => "if-lt",
    IfGe => "if-ge",
    IfGt => "if-gt",
    IfLe => "if-le",
    IfEqz => "if-eqz",
    IfNez => "if-nez",
    IfLtz => "if-ltz",
    IfGez => "if-gez",
    IfGtz => "if-gtz",
    IfLez => "if-lez",
    Aget => "aget",
    AgetWide => "aget-wide",
    AgetObject => "aget-object",
    AgetBoolean => "aget-boolean",
    AgetByte => "aget-byte",
    AgetChar => "aget-char",
    AgetShort => "aget-short",
    Aput => "aput",
    AputWide => "aput-wide",
    AputObject => "aput-object",
    AputBoolean => "aput-boolean",
    AputByte => "aput-byte",
    AputChar => "aput-char",
    AputShort => "aput-short",
    Iget => "iget",
    IgetWide => "iget-wide",
    IgetObject => "iget-object",
    IgetBoolean => "iget-boolean",
    IgetByte => "iget-byte",
    IgetChar => "iget-char",
    IgetShort => "iget-short",
    Iput => "iput",
    IputWide => "iput-wide",
    IputObject => "iput-object",
    IputBoolean => "iput-boolean",
    IputByte => "iput-byte",
    IputChar => "iput-char",
    IputShort => "iput-short",
    Sget => "sget",
    SgetWide => "sget-wide",
    SgetObject => "sget-object",
    SgetBoolean => "sget-boolean",
    SgetByte => "sget-byte",
    SgetChar => "sget-char",
    SgetShort => "sget-short",
    Sput => "sput",
    SputWide => "sput-wide",
    SputObject => "sput-object",
    SputBoolean => "sput-boolean",
    SputByte => "sput-byte",
    SputChar => "sput-char",
    SputShort => "sput-short",
    InvokeVirtual => "invoke-virtual",
    InvokeSuper => "invoke-super",
    InvokeDirect => "invoke-direct",
    InvokeStatic => "invoke-static",
    InvokeInterface => "invoke-interface",
    NegInt => "neg-int",
    NotInt => "not-int",
    NegLong => "neg-long",
    NotLong => "not-long",
    NegFloat => "neg-float",
    NegDouble => "neg-double",
    IntToLong => "int-to-long",
    IntToFloat => "int-to-float",
    IntToDouble => "int-to-double",
    LongToInt => "long-to-int",
    LongToFloat => "long-to-float",
    LongToDouble => "long-to-double",
    FloatToInt => "float-to-int",
    FloatToLong => "float-to-long",
    FloatToDouble => "float-to-double",
    DoubleToInt => "double-to-int",
    DoubleToLong => "double-to-long",
    DoubleToFloat => "double-to-float",
    IntToByte => "int-to-byte",
    IntToChar => "int-to-char",
    IntToShort => "int-to-short",
    AddInt => "add-int",
    SubInt => "sub-int",
    MulInt => "mul-int",
    DivInt => "div-int",
    RemInt => "rem-int",
    AndInt => "and-int",
    OrInt => "or-int",
    XorInt => "xor-int",
    ShlInt => "shl-int",
    ShrInt => "shr-int",
    UshrInt => "ushr-int",
    AddLong => "add-long",
    SubLong => "sub-long",
    MulLong => "mul-long",
    DivLong => "div-long",
    RemLong => "rem-long",
    AndLong => "and-long",
    OrLong => "or-long",
    XorLong => "xor-long",
    ShlLong => "shl-long",
    ShrLong => "shr-long",
    UshrLong => "ushr-long",
    AddFloat => "add-float",
    SubFloat => "sub-float",
    MulFloat => "mul-float",
    DivFloat => "div-float",
    RemFloat => "rem-float",
    AddDouble => "add-double",
    SubDouble => "sub-double",
    MulDouble => "mul-double",
    DivDouble => "div-double",
    RemDouble => "rem-double",
    AddIntLit => "add-int/lit",
    RsubIntLit => "rsub-int/lit",
    MulIntLit => "mul-int/lit",
    DivIntLit => "div-int/lit",
    RemIntLit => "rem-int/lit",
    AndIntLit => "and-int/lit",
    OrIntLit => "or-int/lit",
    XorIntLit => "xor-int/lit",
    ShlIntLit => "shl-int/lit",
    ShrIntLit => "shr-int/lit",
    UshrIntLit => "ushr-int/lit",
    // Extended MIR opcodes.
    Phi => "phi",
    Copy => "copy",
    NullCheck => "null-check",
    FusedCmplFloat => "fused-cmpl-float",
    FusedCmpgFloat => "fused-cmpg-float",
    FusedCmplDouble => "fused-cmpl-double",
    FusedCmpgDouble => "fused-cmpg-double",
    FusedCmpLong => "fused-cmp-long",
    MirNop => "mir-nop",
}

impl Opcode {
    /// Returns the data-flow attributes of the opcode.
    pub fn attrs(self) -> DfAttr {
        use DfAttr as F;
        use Opcode::*;

        let int_binop = F::DA | F::UB | F::UC | F::CORE_A | F::CORE_B | F::CORE_C;
        let long_binop = int_binop | F::A_WIDE | F::B_WIDE | F::C_WIDE;
        let long_shift = int_binop | F::A_WIDE | F::B_WIDE;
        let float_binop = F::DA | F::UB | F::UC | F::FP_A | F::FP_B | F::FP_C;
        let double_binop = float_binop | F::A_WIDE | F::B_WIDE | F::C_WIDE;
        let int_lit = F::DA | F::UB | F::CORE_A | F::CORE_B;
        let aget = F::DA | F::UB | F::UC | F::NULL_CHK_B | F::RANGE_CHK_C | F::REF_B | F::CORE_C;
        let aput = F::UA | F::UB | F::UC | F::NULL_CHK_B | F::RANGE_CHK_C | F::REF_B | F::CORE_C;
        let iget = F::DA | F::UB | F::NULL_CHK_B | F::REF_B | F::IFIELD;
        let iput = F::UA | F::UB | F::NULL_CHK_B | F::REF_B | F::IFIELD;
        let sget = F::DA | F::SFIELD;
        let sput = F::UA | F::SFIELD;
        let invoke = F::FORMAT_35C | F::IS_INVOKE | F::MEM_BARRIER;

        match self {
            Nop | MirNop | Goto => F::empty(),
            ReturnVoid => F::IS_RETURN,

            Move => F::DA | F::UB | F::IS_MOVE,
            MoveWide => F::DA | F::A_WIDE | F::UB | F::B_WIDE | F::IS_MOVE,
            MoveObject => F::DA | F::UB | F::NULL_TRANSFER_0 | F::IS_MOVE | F::REF_A | F::REF_B,
            Copy => F::DA | F::UB | F::IS_MOVE,
            MoveResult => F::DA,
            MoveResultWide => F::DA | F::A_WIDE,
            MoveResultObject => F::DA | F::REF_A,
            MoveException => F::DA | F::REF_A | F::NON_NULL_DST,

            Return => F::UA | F::IS_RETURN,
            ReturnWide => F::UA | F::A_WIDE | F::IS_RETURN,
            ReturnObject => F::UA | F::REF_A | F::IS_RETURN,

            Const => F::DA | F::SETS_CONST,
            ConstWide => F::DA | F::A_WIDE | F::SETS_CONST,
            ConstString | ConstClass => F::DA | F::REF_A | F::NON_NULL_DST,

            MonitorEnter | MonitorExit => F::UA | F::NULL_CHK_A | F::REF_A | F::MEM_BARRIER,
            CheckCast => F::UA | F::REF_A | F::CHK_CAST,
            InstanceOf => F::DA | F::UB | F::CORE_A | F::REF_B,
            ArrayLength => F::DA | F::UB | F::NULL_CHK_B | F::CORE_A | F::REF_B,
            NewInstance => F::DA | F::REF_A | F::NON_NULL_DST,
            NewArray => F::DA | F::UB | F::REF_A | F::CORE_B | F::NON_NULL_DST,
            FilledNewArray => F::FORMAT_35C | F::NON_NULL_RET,
            Throw => F::UA | F::REF_A,
            PackedSwitch | SparseSwitch => F::UA | F::CORE_A,

            CmplFloat | CmpgFloat => F::DA | F::UB | F::UC | F::CORE_A | F::FP_B | F::FP_C,
            CmplDouble | CmpgDouble => {
                F::DA | F::UB | F::B_WIDE | F::UC | F::C_WIDE | F::CORE_A | F::FP_B | F::FP_C
            }
            CmpLong => long_binop - F::A_WIDE,

            IfEq | IfNe => F::UA | F::UB | F::SAME_TYPE_AB,
            IfLt | IfGe | IfGt | IfLe => F::UA | F::UB | F::CORE_A | F::CORE_B,
            IfEqz | IfNez => F::UA,
            IfLtz | IfGez | IfGtz | IfLez => F::UA | F::CORE_A,

            Aget => aget,
            AgetWide => aget | F::A_WIDE,
            AgetObject => aget | F::REF_A,
            AgetBoolean | AgetByte | AgetChar | AgetShort => aget | F::CORE_A,
            Aput => aput,
            AputWide => aput | F::A_WIDE,
            AputObject => aput | F::REF_A,
            AputBoolean | AputByte | AputChar | AputShort => aput | F::CORE_A,

            Iget => iget,
            IgetWide => iget | F::A_WIDE,
            IgetObject => iget | F::REF_A,
            IgetBoolean | IgetByte | IgetChar | IgetShort => iget | F::CORE_A,
            Iput => iput,
            IputWide => iput | F::A_WIDE,
            IputObject => iput | F::REF_A,
            IputBoolean | IputByte | IputChar | IputShort => iput | F::CORE_A,

            Sget => sget,
            SgetWide => sget | F::A_WIDE,
            SgetObject => sget | F::REF_A,
            SgetBoolean | SgetByte | SgetChar | SgetShort => sget | F::CORE_A,
            Sput => sput,
            SputWide => sput | F::A_WIDE,
            SputObject => sput | F::REF_A,
            SputBoolean | SputByte | SputChar | SputShort => sput | F::CORE_A,

            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeInterface => {
                invoke | F::NULL_CHK_OUT0
            }
            InvokeStatic => invoke,

            NegInt | NotInt | IntToByte | IntToChar | IntToShort => {
                F::DA | F::UB | F::CORE_A | F::CORE_B
            }
            NegLong | NotLong => F::DA | F::A_WIDE | F::UB | F::B_WIDE | F::CORE_A | F::CORE_B,
            NegFloat => F::DA | F::UB | F::FP_A | F::FP_B,
            NegDouble => F::DA | F::A_WIDE | F::UB | F::B_WIDE | F::FP_A | F::FP_B,
            IntToLong => F::DA | F::A_WIDE | F::UB | F::CORE_A | F::CORE_B,
            IntToFloat => F::DA | F::UB | F::FP_A | F::CORE_B,
            IntToDouble => F::DA | F::A_WIDE | F::UB | F::FP_A | F::CORE_B,
            LongToInt => F::DA | F::UB | F::B_WIDE | F::CORE_A | F::CORE_B,
            LongToFloat => F::DA | F::UB | F::B_WIDE | F::FP_A | F::CORE_B,
            LongToDouble => F::DA | F::A_WIDE | F::UB | F::B_WIDE | F::FP_A | F::CORE_B,
            FloatToInt => F::DA | F::UB | F::CORE_A | F::FP_B,
            FloatToLong => F::DA | F::A_WIDE | F::UB | F::CORE_A | F::FP_B,
            FloatToDouble => F::DA | F::A_WIDE | F::UB | F::FP_A | F::FP_B,
            DoubleToInt => F::DA | F::UB | F::B_WIDE | F::CORE_A | F::FP_B,
            DoubleToLong => F::DA | F::A_WIDE | F::UB | F::B_WIDE | F::CORE_A | F::FP_B,
            DoubleToFloat => F::DA | F::UB | F::B_WIDE | F::FP_A | F::FP_B,

            AddInt | SubInt | MulInt | DivInt | RemInt | AndInt | OrInt | XorInt | ShlInt
            | ShrInt | UshrInt => int_binop,
            AddLong | SubLong | MulLong | DivLong | RemLong | AndLong | OrLong | XorLong => {
                long_binop
            }
            ShlLong | ShrLong | UshrLong => long_shift,
            AddFloat | SubFloat | MulFloat | DivFloat | RemFloat => float_binop,
            AddDouble | SubDouble | MulDouble | DivDouble | RemDouble => double_binop,
            AddIntLit | RsubIntLit | MulIntLit | DivIntLit | RemIntLit | AndIntLit | OrIntLit
            | XorIntLit | ShlIntLit | ShrIntLit | UshrIntLit => int_lit,

            Phi => F::DA | F::NULL_TRANSFER_N,
            NullCheck => F::UA | F::REF_A | F::NULL_CHK_A,
            FusedCmplFloat | FusedCmpgFloat => F::UA | F::UB | F::FP_A | F::FP_B,
            FusedCmplDouble | FusedCmpgDouble => {
                F::UA | F::A_WIDE | F::UB | F::B_WIDE | F::FP_A | F::FP_B
            }
            FusedCmpLong => F::UA | F::A_WIDE | F::UB | F::B_WIDE | F::CORE_A | F::CORE_B,
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(
            self,
            Opcode::Phi
                | Opcode::Copy
                | Opcode::NullCheck
                | Opcode::FusedCmplFloat
                | Opcode::FusedCmpgFloat
                | Opcode::FusedCmplDouble
                | Opcode::FusedCmpgDouble
                | Opcode::FusedCmpLong
                | Opcode::MirNop
        )
    }

    pub fn is_invoke(self) -> bool {
        self.attrs().contains(DfAttr::IS_INVOKE)
    }

    pub fn is_move_result(self) -> bool {
        matches!(
            self,
            Opcode::MoveResult | Opcode::MoveResultWide | Opcode::MoveResultObject
        )
    }

    /// Returns `true` if `self(a, b) == self(b, a)`.
    pub fn is_commutative(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            AddInt
                | MulInt
                | AndInt
                | OrInt
                | XorInt
                | AddLong
                | MulLong
                | AndLong
                | OrLong
                | XorLong
                | AddFloat
                | MulFloat
                | AddDouble
                | MulDouble
        )
    }

    /// The number of SSA uses implied by the slot attributes, or `None` for
    /// variable-length forms.
    pub fn fixed_num_uses(self) -> Option<usize> {
        let attrs = self.attrs();
        if attrs.intersects(DfAttr::FORMAT_35C | DfAttr::NULL_TRANSFER_N) {
            return None;
        }

        let slot = |used: DfAttr, wide: DfAttr| match (attrs.contains(used), attrs.contains(wide)) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        };
        // A defined wide slot does not make a used slot A wide.
        let a_wide = if attrs.contains(DfAttr::DA) {
            DfAttr::empty()
        } else {
            DfAttr::A_WIDE
        };
        Some(
            slot(DfAttr::UA, a_wide)
                + slot(DfAttr::UB, DfAttr::B_WIDE)
                + slot(DfAttr::UC, DfAttr::C_WIDE),
        )
    }

    /// The number of SSA definitions.
    pub fn num_defs(self) -> usize {
        let attrs = self.attrs();
        match (
            attrs.contains(DfAttr::DA),
            attrs.contains(DfAttr::A_WIDE),
        ) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_counts() {
        assert_eq!(Opcode::AddLong.fixed_num_uses(), Some(4));
        assert_eq!(Opcode::AddLong.num_defs(), 2);
        assert_eq!(Opcode::ShlLong.fixed_num_uses(), Some(3));
        assert_eq!(Opcode::AputWide.fixed_num_uses(), Some(4));
        assert_eq!(Opcode::AgetWide.fixed_num_uses(), Some(2));
        assert_eq!(Opcode::AgetWide.num_defs(), 2);
        assert_eq!(Opcode::ReturnWide.fixed_num_uses(), Some(2));
        assert_eq!(Opcode::InvokeStatic.fixed_num_uses(), None);
        assert_eq!(Opcode::Phi.fixed_num_uses(), None);
        assert_eq!(Opcode::CmpLong.num_defs(), 1);
    }

    #[test]
    fn every_opcode_has_a_name() {
        for op in Opcode::ALL {
            assert!(!op.name().is_empty());
            // Touch the attribute table for every opcode.
            let _ = op.attrs();
        }
    }
}
