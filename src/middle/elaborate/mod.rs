//! Elaboration turns the surface tree into TIR while enforcing every static
//! rule of the language. It runs in passes over an explicit session:
//!
//! 1. Register every package, class, function and global so bodies can refer
//!    to declarations appearing later or in other files
//! 2. Resolve signatures: class layouts (superclasses first), function types
//!    and global types, elaborating global initializers on the way
//! 3. Elaborate every function, method, constructor and destructor body
//! 4. Locate the entry point

use std::rc::Rc;

use log::{debug, trace};

use crate::{
    frontend::{Span, ast},
    index::{Index, IndexVec},
    middle::{
        error::{SemanticErrorKind, SemanticResult, error},
        resolve::ResolutionContext,
        scope::{FlowFacts, FlowKey, Scope, ScopeKind, ScopeStack},
        session::{CompilationSession, FunctionId, FunctionKind},
        tir::{self, ExprId, LocalId},
        ty::{ClassId, PropertyKind, Type},
    },
};

mod expr;
mod items;
mod stmt;

/// A flow refinement which holds while a condition is known to be true
pub(crate) type Narrowing = (FlowKey, Type);

pub fn elaborate(session: &mut CompilationSession, units: &[ast::SourceUnit]) -> SemanticResult<()> {
    debug!("registering declarations of {} source units", units.len());
    let mut registry = items::Registry::register(session, units)?;

    debug!("resolving signatures");
    registry.resolve_signatures(session)?;

    debug!("elaborating bodies");
    registry.elaborate_bodies(session)?;

    items::find_entry_point(session, units)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Function,
    Constructor,
    Destructor,
    GlobalInitializer,
}

/// Elaboration state of one function body
pub(crate) struct BodyElaborator<'s, 'a> {
    session: &'s mut CompilationSession<'a>,
    context: &'s ResolutionContext,
    kind: BodyKind,
    receiver: Option<ClassId>,
    return_type: Type,
    scopes: ScopeStack,
    locals: IndexVec<LocalId, tir::Local>,
    next_expression: ExprId,
}

impl<'s, 'a> BodyElaborator<'s, 'a> {
    pub fn new(
        session: &'s mut CompilationSession<'a>,
        context: &'s ResolutionContext,
        kind: BodyKind,
        receiver: Option<ClassId>,
        return_type: Type,
    ) -> Self {
        Self {
            session,
            context,
            kind,
            receiver,
            return_type,
            scopes: ScopeStack::new(),
            locals: IndexVec::new(),
            next_expression: ExprId::new(0),
        }
    }

    fn expression(
        &mut self,
        span: Span,
        ty: Type,
        kind: tir::ExpressionKind,
    ) -> Rc<tir::Expression> {
        let id = self.next_expression;
        self.next_expression.increment_by(1);

        Rc::new(tir::Expression { id, span, ty, kind })
    }

    fn declare_local(
        &mut self,
        name: &ast::Identifier,
        ty: Type,
        is_constant: bool,
        facts: FlowFacts,
    ) -> SemanticResult<LocalId> {
        let local = self.locals.push(tir::Local {
            name: name.symbol,
            ty,
            is_constant,
            span: name.span,
        });

        self.scopes
            .declare(name.symbol, local, facts)
            .map_err(|existing| {
                error(
                    SemanticErrorKind::DuplicateDeclaration,
                    name.span,
                    format!("'{}' is already declared in this scope", name.symbol),
                )
                .with_span(self.locals[existing].span)
            })?;

        Ok(local)
    }

    /// Runs `f` inside a new scope in which `narrowings` hold. The popped
    /// scope is returned so the caller decides how its flow continues.
    fn in_scope<T>(
        &mut self,
        kind: ScopeKind,
        narrowings: &[Narrowing],
        f: impl FnOnce(&mut Self) -> SemanticResult<T>,
    ) -> SemanticResult<(T, Scope)> {
        self.scopes.push(kind);

        for (key, ty) in narrowings {
            self.scopes.narrow(*key, ty.clone());
        }

        let value = f(self)?;
        Ok((value, self.scopes.pop()))
    }

    #[track_caller]
    fn check_type(&self, value: &tir::Expression, expected: &Type) -> SemanticResult<()> {
        if self.session.types.is_type(&value.ty, expected) {
            return Ok(());
        }

        Err(error(
            SemanticErrorKind::TypeMismatch,
            value.span,
            format!("expected {expected}, found {}", value.ty),
        ))
    }

    fn receiver_class(&self, span: Span) -> SemanticResult<ClassId> {
        self.receiver.ok_or_else(|| {
            error(
                SemanticErrorKind::UnknownIdentifier,
                span,
                "'this' is only available in methods, constructors and destructors",
            )
        })
    }

    fn finish(self, parameters: Vec<LocalId>, block: tir::Block) -> tir::FunctionBody {
        tir::FunctionBody {
            parameters,
            locals: self.locals,
            block,
        }
    }
}

/// Elaborates the body of a function whose signature is already resolved
/// and stores the result in the session
pub(crate) fn elaborate_function(
    session: &mut CompilationSession,
    context: &ResolutionContext,
    function: FunctionId,
    parameter_names: &[&ast::Identifier],
    body: &ast::Block,
) -> SemanticResult<()> {
    let definition = &session.functions[function];
    let span = definition.span;
    let function_kind = definition.kind;
    let Some(function_type) = session.function_type(function).as_function().cloned() else {
        unreachable!("functions always have a function type")
    };

    trace!("elaborating body of '{}'", definition.symbol);

    let (kind, return_type) = match function_kind {
        FunctionKind::Constructor(_) => (BodyKind::Constructor, session.types.void()),
        FunctionKind::Destructor(_) => (BodyKind::Destructor, session.types.void()),
        _ => (BodyKind::Function, function_type.return_type.clone()),
    };
    let receiver = function_kind.receiver_class();

    let mut elaborator = BodyElaborator::new(session, context, kind, receiver, return_type);

    if let (BodyKind::Constructor, Some(class)) = (kind, receiver) {
        for (index, _) in elaborator.session.types.classes[class]
            .stored_properties()
            .filter(|(_, p)| p.kind == PropertyKind::Field)
            .collect::<Vec<_>>()
        {
            elaborator
                .scopes
                .set_facts(FlowKey::Member(index), FlowFacts::uninitialized());
        }
    }

    let mut parameters = Vec::with_capacity(parameter_names.len());
    for (name, ty) in parameter_names.iter().zip(function_type.parameters.iter()) {
        parameters.push(elaborator.declare_local(
            name,
            ty.clone(),
            false,
            FlowFacts::initialized(None),
        )?);
    }

    // a lambda returns the value of its trailing expression
    let tail = body
        .split_tail()
        .filter(|_| function_kind == FunctionKind::Lambda && !elaborator.return_type.is_void());

    let (statements, scope) = elaborator.in_scope(ScopeKind::Block, &[], |this| match tail {
        Some((statements, tail)) => {
            let mut statements = this.elaborate_statements(statements)?;
            statements.push(this.return_statement(tail.span, Some(tail))?);
            Ok(statements)
        }
        None => this.elaborate_statements(&body.statements),
    })?;
    elaborator.scopes.adopt(&scope);

    if kind == BodyKind::Function
        && !elaborator.return_type.is_void()
        && !elaborator.scopes.all_paths_return()
    {
        return Err(error(
            SemanticErrorKind::MissingReturn,
            body.span,
            format!(
                "function must return a value of type {} on every path",
                elaborator.return_type
            ),
        )
        .with_span(span));
    }

    if let (BodyKind::Constructor, Some(class)) = (kind, receiver) {
        let class = &elaborator.session.types.classes[class];

        if let Some((_, property)) = class
            .stored_properties()
            .filter(|(_, p)| p.kind == PropertyKind::Field)
            .find(|(index, _)| !elaborator.scopes.is_initialized(FlowKey::Member(*index)))
        {
            return Err(error(
                SemanticErrorKind::UninitializedProperty,
                span,
                format!(
                    "property '{}' is not initialized on every path through the constructor",
                    property.name
                ),
            )
            .with_span(property.span));
        }
    }

    let body = elaborator.finish(parameters, tir::Block::new(statements, scope.declared));
    session.functions[function].body = Some(body);

    Ok(())
}
