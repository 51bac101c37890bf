//! Builders for surface trees and drivers which compile them, shared by the
//! unit tests of every pass.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    CompilationOutput, compile,
    frontend::{
        SourceId, SourceMap, Span,
        ast::{self, BinaryOperatorKind, ExpressionKind, StatementKind},
        intern::InternedSymbol,
    },
    index::Index,
    middle::{
        elaborate::elaborate,
        error::SemanticResult,
        lir,
        session::{CompilationSession, CompileOptions},
    },
};

static NEXT_OFFSET: AtomicUsize = AtomicUsize::new(0);

/// A fresh one byte span, distinct from every other span handed out
pub fn span() -> Span {
    let start = NEXT_OFFSET.fetch_add(1, Ordering::Relaxed);
    Span::new(SourceId::new(0), start, start + 1)
}

fn identifier(name: &str) -> ast::Identifier {
    ast::Identifier {
        span: span(),
        symbol: InternedSymbol::new(name),
    }
}

pub fn path(name: &str) -> ast::Path {
    ast::Path {
        span: span(),
        package: None,
        name: identifier(name),
    }
}

pub fn qualified_path(package: &str, name: &str) -> ast::Path {
    ast::Path {
        span: span(),
        package: Some(identifier(package)),
        name: identifier(name),
    }
}

// items

pub fn unit(package: &str, items: Vec<ast::Item>) -> ast::SourceUnit {
    ast::SourceUnit {
        source: SourceId::new(0),
        package: identifier(package),
        imports: Vec::new(),
        items,
    }
}

fn function_definition(
    name: &str,
    parameters: Vec<ast::Parameter>,
    return_type: Option<ast::Type>,
    body: ast::Block,
) -> ast::FunctionDefinition {
    ast::FunctionDefinition {
        span: span(),
        signature: ast::FunctionSignature {
            span: span(),
            name: identifier(name),
            parameters,
            is_variadic: false,
            return_type,
        },
        body,
    }
}

pub fn function(
    name: &str,
    parameters: Vec<ast::Parameter>,
    return_type: Option<ast::Type>,
    body: ast::Block,
) -> ast::Item {
    ast::Item {
        span: span(),
        kind: ast::ItemKind::Function(Box::new(function_definition(
            name,
            parameters,
            return_type,
            body,
        ))),
    }
}

/// `fn main() { statements }`
pub fn main_function(statements: Vec<ast::Statement>) -> ast::Item {
    function("main", Vec::new(), None, block(statements))
}

pub fn parameter(name: &str, ty: ast::Type) -> ast::Parameter {
    ast::Parameter {
        span: span(),
        name: identifier(name),
        ty,
    }
}

pub fn global_var(name: &str, ty: Option<ast::Type>, value: Option<ast::Expression>) -> ast::Item {
    ast::Item {
        span: span(),
        kind: ast::ItemKind::Global(Box::new(declaration(false, &[name], ty, value.map(|v| vec![v])))),
    }
}

pub fn class(
    name: &str,
    superclass: Option<&str>,
    properties: Vec<ast::Property>,
    constructor: Option<ast::Constructor>,
    methods: Vec<ast::Method>,
) -> ast::Item {
    ast::Item {
        span: span(),
        kind: ast::ItemKind::Class(Box::new(ast::ClassDefinition {
            span: span(),
            name: identifier(name),
            superclass: superclass.map(path),
            properties,
            constructor,
            destructor: None,
            methods,
        })),
    }
}

pub fn property(name: &str, ty: ast::Type) -> ast::Property {
    ast::Property {
        span: span(),
        name: identifier(name),
        ty,
    }
}

pub fn constructor(parameters: Vec<ast::Parameter>, body: ast::Block) -> ast::Constructor {
    ast::Constructor {
        span: span(),
        parameters,
        body,
    }
}

pub fn method(
    modifier: ast::MethodModifier,
    name: &str,
    parameters: Vec<ast::Parameter>,
    return_type: Option<ast::Type>,
    body: ast::Block,
) -> ast::Method {
    ast::Method {
        span: span(),
        modifier,
        function: function_definition(name, parameters, return_type, body),
    }
}

// types

fn ty(kind: ast::TypeKind) -> ast::Type {
    ast::Type { span: span(), kind }
}

pub fn named(name: &str) -> ast::Type {
    ty(ast::TypeKind::Named(path(name)))
}

pub fn nullable(inner: ast::Type) -> ast::Type {
    ty(ast::TypeKind::Nullable(Box::new(inner)))
}

pub fn array_of(element: ast::Type) -> ast::Type {
    ty(ast::TypeKind::Array(Box::new(element)))
}

// expressions

fn expression(kind: ExpressionKind) -> ast::Expression {
    ast::Expression { span: span(), kind }
}

pub fn int(digits: &str) -> ast::Expression {
    expression(ExpressionKind::IntegerLiteral(InternedSymbol::new(digits)))
}

pub fn negative(operand: ast::Expression) -> ast::Expression {
    expression(ExpressionKind::Unary {
        operator: ast::UnaryOperator {
            span: span(),
            kind: ast::UnaryOperatorKind::Negate,
        },
        operand: Box::new(operand),
    })
}

pub fn boolean(value: bool) -> ast::Expression {
    expression(ExpressionKind::BooleanLiteral(value))
}

pub fn null() -> ast::Expression {
    expression(ExpressionKind::Null)
}

pub fn string(text: &str) -> ast::Expression {
    expression(ExpressionKind::StringLiteral(InternedSymbol::new(text)))
}

pub fn this() -> ast::Expression {
    expression(ExpressionKind::This)
}

pub fn var(name: &str) -> ast::Expression {
    expression(ExpressionKind::Path(path(name)))
}

pub fn array_literal(elements: Vec<ast::Expression>) -> ast::Expression {
    expression(ExpressionKind::ArrayLiteral {
        element_type: None,
        elements,
    })
}

/// `array<element>(length) { generator }`
pub fn array_generator(element: ast::Type, length: ast::Expression, generator: ast::Expression) -> ast::Expression {
    expression(ExpressionKind::ArrayGenerator {
        element_type: Some(Box::new(element)),
        length: Box::new(length),
        generator: Box::new(generator),
    })
}

pub fn tuple(fields: Vec<(&str, ast::Expression)>) -> ast::Expression {
    expression(ExpressionKind::Tuple(
        fields
            .into_iter()
            .map(|(name, value)| ast::TupleField {
                name: identifier(name),
                value,
            })
            .collect(),
    ))
}

pub fn spread(tuple: ast::Expression) -> ast::Expression {
    expression(ExpressionKind::Spread(Box::new(tuple)))
}

pub fn binary(lhs: ast::Expression, operator: BinaryOperatorKind, rhs: ast::Expression) -> ast::Expression {
    expression(ExpressionKind::Binary {
        lhs: Box::new(lhs),
        operator: ast::BinaryOperator {
            span: span(),
            kind: operator,
        },
        rhs: Box::new(rhs),
    })
}

pub fn if_else(condition: ast::Expression, then: ast::Block, otherwise: Option<ast::Block>) -> ast::Expression {
    expression(ExpressionKind::If {
        branches: vec![ast::ConditionalBranch {
            condition,
            block: then,
        }],
        otherwise: otherwise.map(Box::new),
    })
}

pub fn block(statements: Vec<ast::Statement>) -> ast::Block {
    ast::Block {
        span: span(),
        statements,
    }
}

pub fn new(class: &str, arguments: Vec<ast::Expression>) -> ast::Expression {
    expression(ExpressionKind::New {
        class: path(class),
        arguments,
    })
}

pub fn is(operand: ast::Expression, ty: ast::Type) -> ast::Expression {
    expression(ExpressionKind::Is {
        expression: Box::new(operand),
        ty: Box::new(ty),
    })
}

pub fn cast(operand: ast::Expression, ty: ast::Type) -> ast::Expression {
    expression(ExpressionKind::Cast {
        expression: Box::new(operand),
        ty: Box::new(ty),
    })
}

pub fn call(target: ast::Expression, arguments: Vec<ast::Expression>) -> ast::Expression {
    expression(ExpressionKind::Call {
        target: Box::new(target),
        arguments,
    })
}

pub fn member(object: ast::Expression, name: &str) -> ast::Expression {
    expression(ExpressionKind::Member {
        object: Box::new(object),
        name: identifier(name),
    })
}

/// Lambda whose parameter types come from the expected type
pub fn lambda(parameters: Vec<&str>, body: ast::Block) -> ast::Expression {
    expression(ExpressionKind::Lambda(Box::new(ast::Lambda {
        parameters: parameters
            .into_iter()
            .map(|name| ast::LambdaParameter {
                name: identifier(name),
                ty: None,
            })
            .collect(),
        return_type: None,
        body,
    })))
}

pub fn println(arguments: Vec<ast::Expression>) -> ast::Expression {
    expression(ExpressionKind::Intrinsic {
        intrinsic: ast::Intrinsic::Println,
        arguments,
    })
}

pub fn post_increment(target: ast::Expression) -> ast::Expression {
    expression(ExpressionKind::PostIncrement {
        target: Box::new(target),
        is_decrement: false,
    })
}

// statements

fn statement(kind: StatementKind) -> ast::Statement {
    ast::Statement { span: span(), kind }
}

fn declaration(
    is_constant: bool,
    names: &[&str],
    ty: Option<ast::Type>,
    values: Option<Vec<ast::Expression>>,
) -> ast::VariableDeclaration {
    let mut ty = ty;

    ast::VariableDeclaration {
        span: span(),
        is_constant,
        targets: names
            .iter()
            .map(|name| ast::DeclarationTarget {
                name: identifier(name),
                ty: ty.take(),
            })
            .collect(),
        values,
    }
}

pub fn expr_stmt(expression: ast::Expression) -> ast::Statement {
    statement(StatementKind::Expression(Box::new(expression)))
}

/// `val name: ty = value`
pub fn val(name: &str, ty: Option<ast::Type>, value: ast::Expression) -> ast::Statement {
    statement(StatementKind::Declaration(Box::new(declaration(
        true,
        &[name],
        ty,
        Some(vec![value]),
    ))))
}

/// `var name: ty = value`
pub fn var_decl(name: &str, ty: Option<ast::Type>, value: Option<ast::Expression>) -> ast::Statement {
    statement(StatementKind::Declaration(Box::new(declaration(
        false,
        &[name],
        ty,
        value.map(|v| vec![v]),
    ))))
}

/// `var a, b, ... = values...` without annotations
pub fn multi_decl(names: &[&str], values: Vec<ast::Expression>) -> ast::Statement {
    statement(StatementKind::Declaration(Box::new(declaration(false, names, None, Some(values)))))
}

pub fn assign(target: ast::Expression, value: ast::Expression) -> ast::Statement {
    statement(StatementKind::Assignment {
        targets: vec![target],
        values: vec![value],
    })
}

pub fn compound_assign(
    target: ast::Expression,
    operator: ast::AssignmentOperatorKind,
    value: ast::Expression,
) -> ast::Statement {
    statement(StatementKind::OperatorAssignment {
        operator: ast::AssignmentOperator {
            span: span(),
            kind: operator,
        },
        target: Box::new(target),
        value: Box::new(value),
    })
}

pub fn return_void() -> ast::Statement {
    statement(StatementKind::Return(None))
}

pub fn return_value(value: ast::Expression) -> ast::Statement {
    statement(StatementKind::Return(Some(Box::new(value))))
}

pub fn while_loop(condition: ast::Expression, body: ast::Block) -> ast::Statement {
    statement(StatementKind::While {
        condition: Box::new(condition),
        body: Box::new(body),
    })
}

pub fn for_loop(
    initializer: Option<ast::Statement>,
    condition: Option<ast::Expression>,
    step: Option<ast::Statement>,
    body: ast::Block,
) -> ast::Statement {
    statement(StatementKind::For {
        initializer: initializer.map(Box::new),
        condition: condition.map(Box::new),
        step: step.map(Box::new),
        body: Box::new(body),
    })
}

pub fn break_stmt() -> ast::Statement {
    statement(StatementKind::Break)
}

pub fn continue_stmt() -> ast::Statement {
    statement(StatementKind::Continue)
}

// drivers

fn leaked_context() -> (&'static SourceMap, &'static CompileOptions) {
    (
        Box::leak(Box::new(SourceMap::new())),
        Box::leak(Box::new(CompileOptions::default())),
    )
}

/// Runs the whole pipeline, lowering included
pub fn compile_units(units: Vec<ast::SourceUnit>) -> SemanticResult<CompilationOutput> {
    let (sources, options) = leaked_context();
    compile(sources, &units, options)
}

/// Elaborates without lowering and hands back the session for inspection
pub fn elaborate_units(units: Vec<ast::SourceUnit>) -> SemanticResult<CompilationSession<'static>> {
    let (sources, options) = leaked_context();
    let mut session = CompilationSession::new(sources, options);

    elaborate(&mut session, &units)?;
    Ok(session)
}

pub fn elaborate_main(statements: Vec<ast::Statement>) -> SemanticResult<CompilationSession<'static>> {
    elaborate_units(vec![unit("main", vec![main_function(statements)])])
}

/// `main` next to `fn use_value(v: i32)`
pub fn elaborate_with_helper(statements: Vec<ast::Statement>) -> SemanticResult<CompilationSession<'static>> {
    let helper = function(
        "use_value",
        vec![parameter("v", named("i32"))],
        None,
        block(Vec::new()),
    );

    elaborate_units(vec![unit("main", vec![main_function(statements), helper])])
}

pub fn elaborate_program(
    classes: Vec<ast::Item>,
    statements: Vec<ast::Statement>,
) -> SemanticResult<CompilationSession<'static>> {
    let mut items = classes;
    items.push(main_function(statements));

    elaborate_units(vec![unit("main", items)])
}

/// Types of the locals of `main::main` in declaration order
pub fn main_local_types(session: &CompilationSession) -> Vec<String> {
    let main = session
        .functions
        .iter()
        .find(|f| f.symbol == "main::main")
        .and_then(|f| f.body.as_ref())
        .expect("main::main was elaborated");

    main.locals.iter().map(|local| local.ty.to_string()).collect()
}

pub fn lower_units(units: Vec<ast::SourceUnit>) -> lir::Module {
    match compile_units(units) {
        Ok(output) => output.module,
        Err(err) => panic!("compilation failed: {err}"),
    }
}
