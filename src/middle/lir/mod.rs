//! LIR (Low-level Intermediate Representation). In this form loops and
//! conditionals are reduced to labelled blocks and branches, expression trees
//! are flattened into ordered instructions over virtual registers and every
//! reference count operation is explicit. The textual form follows LLVM
//! syntax so an external backend can consume it directly.

use std::rc::Rc;

use crate::{
    frontend::ast::BinaryOperatorKind,
    index::{IndexVec, simple_index},
    middle::primitive::IntKind,
};

pub mod pretty_print;
pub mod runtime;
pub mod tir_lowering;

#[derive(Debug, Default)]
pub struct Module {
    pub globals: Vec<GlobalDefinition>,
    pub declarations: Vec<FunctionDeclaration>,
    pub functions: Vec<FunctionDefinition>,
}

impl Module {
    pub fn function(&self, symbol: &str) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.symbol == symbol)
    }
}

/// A module level variable or constant
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDefinition {
    pub symbol: String,
    pub is_constant: bool,
    pub is_private: bool,
    pub ty: Type,
    pub initializer: Constant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Zero,
    /// NUL terminated when it is meant to be read as a C string
    Bytes(Vec<u8>),
    Array(Type, Vec<Constant>),
    Int(Type, i64),
    Global(String),
}

/// An external function provided by the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub symbol: String,
    pub return_type: Type,
    pub parameters: Vec<Type>,
    pub is_variadic: bool,
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub symbol: String,
    pub return_type: Type,
    pub parameters: Vec<RegisterId>,
    /// Type of every virtual register, parameters included
    pub registers: IndexVec<RegisterId, Type>,
    pub blocks: IndexVec<BlockId, Block>,
}

#[derive(Debug, Default)]
pub struct Block {
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminator)
    }
}

simple_index! {
    /// Identifies an LIR block
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

simple_index! {
    /// Identifies a virtual LIR register which holds a temporary value
    pub struct RegisterId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// `i1` for booleans, otherwise the width of an integer kind
    Int(u32),
    Ptr,
    Struct(Rc<[Type]>),
    Array(Rc<Type>, u64),
}

impl Type {
    pub const BOOL: Type = Type::Int(1);
    pub const I8: Type = Type::Int(8);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);

    pub fn int(kind: IntKind) -> Self {
        Type::Int(kind.bit_width())
    }

    pub fn structure(fields: impl IntoIterator<Item = Type>) -> Self {
        Type::Struct(fields.into_iter().collect())
    }

    /// Allocation size on a 64 bit target with natural alignment
    pub fn size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::Int(bits) => u64::from(bits.div_ceil(8)),
            Type::Ptr => 8,
            Type::Struct(fields) => {
                let end = fields.iter().fold(0u64, |offset, field| {
                    offset.next_multiple_of(field.align()) + field.size()
                });
                end.next_multiple_of(self.align())
            }
            Type::Array(element, length) => element.size() * length,
        }
    }

    pub fn align(&self) -> u64 {
        match self {
            Type::Void => 1,
            Type::Int(_) | Type::Ptr => self.size().max(1),
            Type::Struct(fields) => fields.iter().map(Type::align).max().unwrap_or(1),
            Type::Array(element, _) => element.align(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(RegisterId),
    Immediate(i64),
    Null,
    Undef,
    Zero,
    Global(String),
}

impl From<RegisterId> for Operand {
    fn from(register: RegisterId) -> Self {
        Operand::Register(register)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperation {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
}

impl BinaryOperation {
    /// Arithmetic operators only, comparisons lower to [`Predicate`]s
    pub fn for_operator(operator: BinaryOperatorKind, is_signed: bool) -> Option<Self> {
        Some(match (operator, is_signed) {
            (BinaryOperatorKind::Add, _) => Self::Add,
            (BinaryOperatorKind::Subtract, _) => Self::Sub,
            (BinaryOperatorKind::Multiply, _) => Self::Mul,
            (BinaryOperatorKind::Divide, true) => Self::SDiv,
            (BinaryOperatorKind::Divide, false) => Self::UDiv,
            (BinaryOperatorKind::Modulus, true) => Self::SRem,
            (BinaryOperatorKind::Modulus, false) => Self::URem,
            (BinaryOperatorKind::BitwiseAnd, _) => Self::And,
            (BinaryOperatorKind::BitwiseOr, _) => Self::Or,
            (BinaryOperatorKind::BitwiseXor, _) => Self::Xor,
            (BinaryOperatorKind::ShiftLeft, _) => Self::Shl,
            (BinaryOperatorKind::ShiftRight, true) => Self::AShr,
            (BinaryOperatorKind::ShiftRight, false) => Self::LShr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl Predicate {
    pub fn for_operator(operator: BinaryOperatorKind, is_signed: bool) -> Option<Self> {
        Some(match (operator, is_signed) {
            (BinaryOperatorKind::Equals, _) => Self::Eq,
            (BinaryOperatorKind::NotEquals, _) => Self::Ne,
            (BinaryOperatorKind::LessThan, true) => Self::Slt,
            (BinaryOperatorKind::LessThan, false) => Self::Ult,
            (BinaryOperatorKind::LessThanOrEqualTo, true) => Self::Sle,
            (BinaryOperatorKind::LessThanOrEqualTo, false) => Self::Ule,
            (BinaryOperatorKind::GreaterThan, true) => Self::Sgt,
            (BinaryOperatorKind::GreaterThan, false) => Self::Ugt,
            (BinaryOperatorKind::GreaterThanOrEqualTo, true) => Self::Sge,
            (BinaryOperatorKind::GreaterThanOrEqualTo, false) => Self::Uge,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Trunc,
    SExt,
    ZExt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Alloca {
        destination: RegisterId,
        ty: Type,
    },
    Load {
        destination: RegisterId,
        ty: Type,
        pointer: Operand,
    },
    Store {
        ty: Type,
        value: Operand,
        pointer: Operand,
    },
    /// Pointer to field `index` of the struct behind `pointer`
    FieldPointer {
        destination: RegisterId,
        ty: Type,
        pointer: Operand,
        index: u32,
    },
    ExtractValue {
        destination: RegisterId,
        ty: Type,
        aggregate: Operand,
        index: u32,
    },
    InsertValue {
        destination: RegisterId,
        ty: Type,
        aggregate: Operand,
        field_type: Type,
        value: Operand,
        index: u32,
    },
    Binary {
        operation: BinaryOperation,
        destination: RegisterId,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Compare {
        predicate: Predicate,
        destination: RegisterId,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Cast {
        kind: CastKind,
        destination: RegisterId,
        from: Type,
        value: Operand,
        to: Type,
    },
    Select {
        destination: RegisterId,
        condition: Operand,
        ty: Type,
        positive: Operand,
        negative: Operand,
    },
    Call {
        destination: Option<RegisterId>,
        return_type: Type,
        /// Parameter types of a variadic callee, printed as its signature
        variadic_parameters: Option<Vec<Type>>,
        callee: Operand,
        arguments: Vec<(Type, Operand)>,
    },
    Branch {
        condition: Operand,
        positive: BlockId,
        negative: BlockId,
    },
    Jump {
        destination: BlockId,
    },
    Return {
        value: Option<(Type, Operand)>,
    },
    Phi {
        destination: RegisterId,
        ty: Type,
        sources: Vec<(Operand, BlockId)>,
    },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. } | Instruction::Jump { .. } | Instruction::Return { .. }
        )
    }

    /// Blocks named by a terminator or a phi
    pub fn blocks_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Instruction::Branch {
                positive, negative, ..
            } => vec![positive, negative],
            Instruction::Jump { destination } => vec![destination],
            Instruction::Phi { sources, .. } => sources.iter_mut().map(|(_, block)| block).collect(),
            _ => Vec::new(),
        }
    }

    /// Blocks control may continue to
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instruction::Branch {
                positive, negative, ..
            } => vec![*positive, *negative],
            Instruction::Jump { destination } => vec![*destination],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_follow_natural_alignment() {
        let header = Type::structure([Type::I32, Type::I32, Type::Ptr]);
        assert_eq!(header.size(), 16);

        let padded = Type::structure([Type::I32, Type::I32, Type::Ptr, Type::BOOL]);
        assert_eq!(padded.size(), 24);
        assert_eq!(padded.align(), 8);

        let bytes = Type::structure([Type::I8, Type::Int(16)]);
        assert_eq!(bytes.size(), 4);

        assert_eq!(Type::Array(Rc::new(Type::I8), 5).size(), 5);
    }

    #[test]
    fn operators_pick_signed_or_unsigned_forms() {
        assert_eq!(
            BinaryOperation::for_operator(BinaryOperatorKind::Divide, false),
            Some(BinaryOperation::UDiv)
        );
        assert_eq!(
            BinaryOperation::for_operator(BinaryOperatorKind::ShiftRight, true),
            Some(BinaryOperation::AShr)
        );
        assert_eq!(BinaryOperation::for_operator(BinaryOperatorKind::LessThan, true), None);
        assert_eq!(
            Predicate::for_operator(BinaryOperatorKind::LessThan, false),
            Some(Predicate::Ult)
        );
    }
}
