//! The opcode vocabulary shared by `ValidationStack`, `CompilerStack`, and
//! `Backend::emit_deferred_action`.
//!
//! Wasm 1.0 plus the post-MVP opcodes named in scope (§1): sign-extension,
//! non-trapping float-to-int (`*.trunc_sat_*`), and bulk `memory.copy`/
//! `memory.fill`. SIMD and multi-memory/table opcodes are out of scope and
//! have no representation here (§1 Non-goals).

use wasmc_core::ValType;

/// Opcodes whose semantics are "pop N, compute, push 1" with no visible
/// side effect other than producing a value — these are exactly the
/// opcodes `DEFERREDACTION` stack elements may wrap (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    // --- integer arithmetic ---
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // --- integer unary ---
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I32Eqz,
    I64Eqz,

    // --- integer comparisons (push i32 0/1) ---
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // --- float arithmetic ---
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // --- float unary ---
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,

    // --- float comparisons ---
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // --- conversions ---
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F32DemoteF64,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // --- sign-extension proposal (in scope, §1) ---
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // --- non-trapping float-to-int, runtime-only flag (in scope, §1) ---
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

impl NumericOp {
    /// Number of values this operator pops (1 for unary/conversion, 2 for
    /// binary arithmetic/comparison).
    pub fn arity(self) -> usize {
        use NumericOp::*;
        match self {
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr | I64Add | I64Sub
            | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or | I64Xor
            | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr | I32Eq | I32Ne | I32LtS | I32LtU
            | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU | I64Eq | I64Ne | I64LtS
            | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU | F32Add | F32Sub
            | F32Mul | F32Div | F32Min | F32Max | F32Copysign | F64Add | F64Sub | F64Mul
            | F64Div | F64Min | F64Max | F64Copysign | F32Eq | F32Ne | F32Lt | F32Gt | F32Le
            | F32Ge | F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => 2,
            _ => 1,
        }
    }

    /// `(operand_type, result_type)` for a unary operator's single operand,
    /// or the shared operand type for a binary operator (result type for
    /// binary arithmetic is the same as the operand type; comparisons
    /// always produce `i32`).
    pub fn operand_type(self) -> ValType {
        use NumericOp::*;
        match self {
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr | I32Clz | I32Ctz
            | I32Popcnt | I32Eqz | I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS
            | I32LeU | I32GeS | I32GeU | I32WrapI64 | I64ExtendI32S | I64ExtendI32U
            | F32ConvertI32S | F32ConvertI32U | F64ConvertI32S | F64ConvertI32U
            | I32ReinterpretF32 | F32ReinterpretI32 | I32Extend8S | I32Extend16S
            | I32TruncSatF32S | I32TruncSatF32U | I32TruncSatF64S | I32TruncSatF64U => ValType::I32,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr | I64Clz | I64Ctz
            | I64Popcnt | I64Eqz | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS
            | I64LeU | I64GeS | I64GeU | I64ReinterpretF64 | F64ReinterpretI64 | I64Extend8S
            | I64Extend16S | I64Extend32S => ValType::I64,
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign | F32Abs | F32Neg
            | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt | F32Eq | F32Ne | F32Lt
            | F32Gt | F32Le | F32Ge | I32TruncF32S | I32TruncF32U | I64TruncF32S | I64TruncF32U
            | F64PromoteF32 => ValType::F32,
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign | F64Abs | F64Neg
            | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt | F64Eq | F64Ne | F64Lt
            | F64Gt | F64Le | F64Ge | I32TruncF64S | I32TruncF64U | I64TruncF64S | I64TruncF64U
            | F32DemoteF64 => ValType::F64,
            F32ConvertI64S | F32ConvertI64U | F64ConvertI64S | F64ConvertI64U => ValType::I64,
        }
    }

    pub fn result_type(self) -> ValType {
        use NumericOp::*;
        match self {
            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU
            | I64GeS | I64GeU | F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge | F64Eq | F64Ne
            | F64Lt | F64Gt | F64Le | F64Ge | I32Eqz | I64Eqz => ValType::I32,
            I64ExtendI32S | I64ExtendI32U | I64TruncF32S | I64TruncF32U | I64TruncF64S
            | I64TruncF64U | I64ReinterpretF64 | I64Extend8S | I64Extend16S | I64Extend32S
            | I64TruncSatF32S | I64TruncSatF32U | I64TruncSatF64S | I64TruncSatF64U => ValType::I64,
            F32ConvertI32S | F32ConvertI32U | F32ConvertI64S | F32ConvertI64U
            | F32ReinterpretI32 | F32DemoteF64 => ValType::F32,
            F64ConvertI32S | F64ConvertI32U | F64ConvertI64S | F64ConvertI64U
            | F64ReinterpretI64 | F64PromoteF32 => ValType::F64,
            I32WrapI64 | I32TruncF32S | I32TruncF32U | I32TruncF64S | I32TruncF64U
            | I32ReinterpretF32 | I32Extend8S | I32Extend16S | I32TruncSatF32S
            | I32TruncSatF32U | I32TruncSatF64S | I32TruncSatF64U => ValType::I32,
            _ => self.operand_type(),
        }
    }

    /// Whether this opcode can trap (division/remainder by zero, overflow,
    /// or truncation of a NaN/out-of-range float — §1's "non-trapping"
    /// variants never trap by construction).
    pub fn can_trap(self) -> bool {
        use NumericOp::*;
        matches!(
            self,
            I32DivS
                | I32DivU
                | I32RemS
                | I32RemU
                | I64DivS
                | I64DivU
                | I64RemS
                | I64RemU
                | I32TruncF32S
                | I32TruncF32U
                | I32TruncF64S
                | I32TruncF64U
                | I64TruncF32S
                | I64TruncF32U
                | I64TruncF64S
                | I64TruncF64U
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemWidth {
    Byte,
    Half,
    Word,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadExtend {
    /// No extension: the load width equals the result's full width.
    None,
    SignExtend,
    ZeroExtend,
}

#[derive(Debug, Clone, Copy)]
pub struct MemArg {
    pub offset: u32,
    pub align: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

impl Cond {
    pub fn negate(self) -> Self {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::LtS => Cond::GeS,
            Cond::LtU => Cond::GeU,
            Cond::GtS => Cond::LeS,
            Cond::GtU => Cond::LeU,
            Cond::LeS => Cond::GtS,
            Cond::LeU => Cond::GtU,
            Cond::GeS => Cond::LtS,
            Cond::GeU => Cond::LtU,
        }
    }
}
