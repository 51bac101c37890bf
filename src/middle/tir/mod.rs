//! TIR (Typed Intermediate Representation). Every name is resolved, every
//! expression carries its type, implicit conversions are explicit nodes and
//! tuple spreads are expanded into field accesses sharing one tuple node.

use std::rc::Rc;

use crate::{
    frontend::{Span, ast::BinaryOperatorKind, ast::UnaryOperatorKind, intern::InternedSymbol},
    index::{IndexVec, simple_index},
    middle::{
        primitive::IntKind,
        session::{FunctionId, GlobalId},
        ty::{ClassId, Type},
    },
};

simple_index! {
    /// Identifies an expression node within one function body. Lowering
    /// memoizes the value of each node by this id.
    pub struct ExprId;
}

simple_index! {
    /// Identifies a local variable (or parameter) within one function body
    pub struct LocalId;
}

#[derive(Debug)]
pub struct FunctionBody {
    pub parameters: Vec<LocalId>,
    pub locals: IndexVec<LocalId, Local>,
    pub block: Block,
}

#[derive(Debug)]
pub struct Local {
    pub name: InternedSymbol,
    pub ty: Type,
    pub is_constant: bool,
    pub span: Span,
}

/// A lexical scope. Its declared locals are released on every exit.
#[derive(Debug, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub declared: Vec<LocalId>,
}

/// A block producing a value. `value` is `None` for `void` blocks and for
/// blocks which never complete.
#[derive(Debug)]
pub struct ValueBlock {
    pub block: Block,
    pub value: Option<Rc<Expression>>,
}

#[derive(Debug)]
pub enum Statement {
    Expression(Rc<Expression>),
    Declare {
        local: LocalId,
        value: Option<Rc<Expression>>,
    },
    /// Every value is evaluated before the first store
    Assign {
        places: Vec<Place>,
        values: Vec<Rc<Expression>>,
    },
    CompoundAssign {
        place: Place,
        operator: BinaryOperatorKind,
        value: Rc<Expression>,
    },
    If {
        condition: Rc<Expression>,
        then: Block,
        otherwise: Option<Block>,
    },
    /// `while` and `for`. A missing condition loops until `break`. `step`
    /// runs after the body and on `continue`.
    Loop {
        condition: Option<Rc<Expression>>,
        body: Block,
        step: Option<Block>,
    },
    Return(Option<Rc<Expression>>),
    Break,
    Continue,
    Block(Block),
}

#[derive(Debug, Clone)]
pub enum Place {
    Variable(Variable),
    Member {
        object: Rc<Expression>,
        class: ClassId,
        property: usize,
    },
    Index {
        array: Rc<Expression>,
        index: Rc<Expression>,
        span: Span,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Local(LocalId),
    Global(GlobalId),
    /// A stored property of `this`
    ReceiverMember { class: ClassId, property: usize },
}

#[derive(Debug)]
pub struct Expression {
    pub id: ExprId,
    pub span: Span,
    pub ty: Type,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    /// Two's complement bits of the value
    Integer(u64),
    Bool(bool),
    /// An `i8[]` built from the literal bytes
    String(InternedSymbol),
    Null,
    This,
    Variable(Variable),
    FunctionRef(FunctionId),
    Member {
        object: Rc<Expression>,
        class: ClassId,
        property: usize,
    },
    TupleField {
        tuple: Rc<Expression>,
        index: usize,
    },
    Tuple(Vec<Rc<Expression>>),
    Call {
        callee: Callee,
        arguments: Vec<Rc<Expression>>,
    },
    New {
        class: ClassId,
        constructor: FunctionId,
        arguments: Vec<Rc<Expression>>,
    },
    ArrayLiteral(Vec<Rc<Expression>>),
    ArrayGenerator {
        length: Rc<Expression>,
        generator: Rc<Expression>,
    },
    Index {
        array: Rc<Expression>,
        index: Rc<Expression>,
    },
    /// Integer arithmetic and comparisons. Both operands have the same type.
    Binary {
        operator: BinaryOperatorKind,
        lhs: Rc<Expression>,
        rhs: Rc<Expression>,
    },
    /// Short circuiting `&&` and `||`
    Logical {
        is_and: bool,
        lhs: Rc<Expression>,
        rhs: Rc<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Rc<Expression>,
    },
    /// Converts to the node's integer type
    IntCast(Rc<Expression>),
    /// Traps at runtime unless the object is an instance of `class`
    ClassCast {
        operand: Rc<Expression>,
        class: ClassId,
    },
    Is {
        operand: Rc<Expression>,
        class: ClassId,
    },
    /// Traps at runtime on null
    NonNull(Rc<Expression>),
    Block(Box<ValueBlock>),
    If {
        condition: Rc<Expression>,
        then: Box<ValueBlock>,
        otherwise: Box<ValueBlock>,
    },
    /// Evaluates to the value before the update
    PostIncrement {
        place: Place,
        is_decrement: bool,
    },
    Len(Rc<Expression>),
    TypeTag(Rc<Expression>),
    Println {
        pieces: Vec<FormatPiece>,
        arguments: Vec<Rc<Expression>>,
    },
}

#[derive(Debug, Clone)]
pub enum Callee {
    Function(FunctionId),
    /// Statically dispatched method
    Method {
        function: FunctionId,
        receiver: Rc<Expression>,
    },
    /// Call through the per instance function slot of `property`
    Virtual {
        receiver: Rc<Expression>,
        class: ClassId,
        property: usize,
    },
    Indirect(Rc<Expression>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatPiece {
    Text(String),
    /// Index into the arguments
    Argument { index: usize, style: FormatStyle },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStyle {
    Integer(IntKind),
    Hex(IntKind),
    Char,
    Bool,
    Text,
}

impl Expression {
    /// The local behind a bare variable read, the only kind of expression
    /// flow facts can refine
    pub fn as_local(&self) -> Option<LocalId> {
        match self.kind {
            ExpressionKind::Variable(Variable::Local(local)) => Some(local),
            _ => None,
        }
    }
}

impl Block {
    pub fn new(statements: Vec<Statement>, declared: Vec<LocalId>) -> Self {
        Self {
            statements,
            declared,
        }
    }
}
