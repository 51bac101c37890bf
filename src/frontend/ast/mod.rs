//! Surface syntax tree handed to the middle end by the parser. The tree is
//! assumed to be well formed; every node carries the span it was parsed from.

use strum::{Display, EnumString};

use super::{Span, SourceId, intern::InternedSymbol};

pub mod visit;

/// One parsed source file
#[derive(Debug)]
pub struct SourceUnit {
    pub source: SourceId,
    pub package: Identifier,
    pub imports: Vec<Identifier>,
    /// Top level items in the file (nested items are in the tree and not in
    /// this list)
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub span: Span,
    pub symbol: InternedSymbol,
}

/// `name` or `package::name`
#[derive(Debug, Clone)]
pub struct Path {
    pub span: Span,
    pub package: Option<Identifier>,
    pub name: Identifier,
}

#[derive(Debug)]
pub struct Item {
    pub span: Span,
    pub kind: ItemKind,
}

#[derive(Debug)]
pub enum ItemKind {
    Function(Box<FunctionDefinition>),
    Class(Box<ClassDefinition>),
    Global(Box<VariableDeclaration>),
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub span: Span,
    pub signature: FunctionSignature,
    pub body: Block,
}

#[derive(Debug)]
pub struct FunctionSignature {
    pub span: Span,
    pub name: Identifier,
    pub parameters: Vec<Parameter>,
    pub is_variadic: bool,
    /// `None` means `void`
    pub return_type: Option<Type>,
}

#[derive(Debug)]
pub struct Parameter {
    pub span: Span,
    pub name: Identifier,
    pub ty: Type,
}

#[derive(Debug)]
pub struct ClassDefinition {
    pub span: Span,
    pub name: Identifier,
    pub superclass: Option<Path>,
    pub properties: Vec<Property>,
    /// A missing constructor behaves like an empty one without parameters
    pub constructor: Option<Constructor>,
    pub destructor: Option<Block>,
    pub methods: Vec<Method>,
}

#[derive(Debug)]
pub struct Property {
    pub span: Span,
    pub name: Identifier,
    pub ty: Type,
}

#[derive(Debug)]
pub struct Constructor {
    pub span: Span,
    pub parameters: Vec<Parameter>,
    pub body: Block,
}

#[derive(Debug)]
pub struct Method {
    pub span: Span,
    pub modifier: MethodModifier,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodModifier {
    /// Statically dispatched
    None,
    /// `virtual`: gets a per-instance function slot
    Virtual,
    /// `override`: replaces an inherited function slot
    Override,
}

#[derive(Debug)]
pub struct Type {
    pub span: Span,
    pub kind: TypeKind,
}

#[derive(Debug)]
pub enum TypeKind {
    /// A primitive (`void`, `bool`, `i32`, ...) or a class name
    Named(Path),
    /// T[]
    Array(Box<Type>),
    /// T?
    Nullable(Box<Type>),
    /// (a: T, b: U)
    Tuple(Vec<TupleTypeField>),
    /// func(T, U, ...) -> V
    Function {
        parameters: Vec<Type>,
        is_variadic: bool,
        return_type: Option<Box<Type>>,
    },
}

#[derive(Debug)]
pub struct TupleTypeField {
    pub name: Identifier,
    pub ty: Type,
}

/// `var a, b: T = x, y` at the top level or inside a block
#[derive(Debug)]
pub struct VariableDeclaration {
    pub span: Span,
    /// `val` instead of `var`
    pub is_constant: bool,
    pub targets: Vec<DeclarationTarget>,
    /// May contain [`ExpressionKind::Spread`] entries
    pub values: Option<Vec<Expression>>,
}

#[derive(Debug)]
pub struct DeclarationTarget {
    pub name: Identifier,
    pub ty: Option<Type>,
}

/// A block's value is its last statement when that statement is a bare
/// expression.
#[derive(Debug)]
pub struct Block {
    pub span: Span,
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn split_tail(&self) -> Option<(&[Statement], &Expression)> {
        match self.statements.split_last() {
            Some((
                Statement {
                    kind: StatementKind::Expression(tail),
                    ..
                },
                rest,
            )) => Some((rest, &**tail)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Statement {
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    Declaration(Box<VariableDeclaration>),
    /// `a, b = x, y`. Values may contain [`ExpressionKind::Spread`] entries
    Assignment {
        targets: Vec<Expression>,
        values: Vec<Expression>,
    },
    OperatorAssignment {
        operator: AssignmentOperator,
        target: Box<Expression>,
        value: Box<Expression>,
    },
    While {
        condition: Box<Expression>,
        body: Box<Block>,
    },
    For {
        initializer: Option<Box<Statement>>,
        condition: Option<Box<Expression>>,
        step: Option<Box<Statement>>,
        body: Box<Block>,
    },
    Return(Option<Box<Expression>>),
    Break,
    Continue,
    Expression(Box<Expression>),
}

#[derive(Debug)]
pub struct Expression {
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    /// Decimal digits, validated against the target type during elaboration
    IntegerLiteral(InternedSymbol),
    StringLiteral(InternedSymbol),
    BooleanLiteral(bool),
    Null,
    This,
    Path(Path),
    Member {
        object: Box<Expression>,
        name: Identifier,
    },
    Call {
        target: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Intrinsic {
        intrinsic: Intrinsic,
        arguments: Vec<Expression>,
    },
    New {
        class: Path,
        arguments: Vec<Expression>,
    },
    ArrayLiteral {
        element_type: Option<Box<Type>>,
        elements: Vec<Expression>,
    },
    /// `array<T>(length) { generator }`
    ArrayGenerator {
        element_type: Option<Box<Type>>,
        length: Box<Expression>,
        generator: Box<Expression>,
    },
    Index {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    Tuple(Vec<TupleField>),
    /// `t...`: expands a tuple into one value per field
    Spread(Box<Expression>),
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperator,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    /// `x++` / `x--`, evaluates to the old value
    PostIncrement {
        target: Box<Expression>,
        is_decrement: bool,
    },
    Cast {
        expression: Box<Expression>,
        ty: Box<Type>,
    },
    Is {
        expression: Box<Expression>,
        ty: Box<Type>,
    },
    /// `x!!`
    NonNullAssertion(Box<Expression>),
    Lambda(Box<Lambda>),
    Block(Box<Block>),
    If {
        branches: Vec<ConditionalBranch>,
        otherwise: Option<Box<Block>>,
    },
}

#[derive(Debug)]
pub struct TupleField {
    pub name: Identifier,
    pub value: Expression,
}

#[derive(Debug)]
pub struct ConditionalBranch {
    pub condition: Expression,
    pub block: Block,
}

#[derive(Debug)]
pub struct Lambda {
    pub parameters: Vec<LambdaParameter>,
    pub return_type: Option<Type>,
    pub body: Block,
}

#[derive(Debug)]
pub struct LambdaParameter {
    pub name: Identifier,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Intrinsic {
    Println,
    Len,
    Type,
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryOperator {
    pub span: Span,
    pub kind: BinaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Comparison,
    Logical,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Modulus
            | Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::ShiftLeft
            | Self::ShiftRight => BinaryOperatorClass::Arithmetic,
            Self::Equals
            | Self::NotEquals
            | Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Comparison,
            Self::LogicalAnd | Self::LogicalOr => BinaryOperatorClass::Logical,
        }
    }
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnaryOperator {
    pub span: Span,
    pub kind: UnaryOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperatorKind {
    LogicalNot, // !
    BitwiseNot, // ~
    Negate,     // -
    Plus,       // +
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
            Self::Negate => write!(f, "-"),
            Self::Plus => write!(f, "+"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssignmentOperator {
    pub span: Span,
    pub kind: AssignmentOperatorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOperatorKind {
    Add,        // +=
    Subtract,   // -=
    Multiply,   // *=
    Divide,     // /=
    Modulus,    // %=
    BitwiseAnd, // &=
    BitwiseOr,  // |=
    BitwiseXor, // ^=
    ShiftLeft,  // <<=
    ShiftRight, // >>=
}

impl AssignmentOperatorKind {
    /// The binary operator applied between the old value and the operand
    pub fn binary_operator(self) -> BinaryOperatorKind {
        match self {
            Self::Add => BinaryOperatorKind::Add,
            Self::Subtract => BinaryOperatorKind::Subtract,
            Self::Multiply => BinaryOperatorKind::Multiply,
            Self::Divide => BinaryOperatorKind::Divide,
            Self::Modulus => BinaryOperatorKind::Modulus,
            Self::BitwiseAnd => BinaryOperatorKind::BitwiseAnd,
            Self::BitwiseOr => BinaryOperatorKind::BitwiseOr,
            Self::BitwiseXor => BinaryOperatorKind::BitwiseXor,
            Self::ShiftLeft => BinaryOperatorKind::ShiftLeft,
            Self::ShiftRight => BinaryOperatorKind::ShiftRight,
        }
    }
}
