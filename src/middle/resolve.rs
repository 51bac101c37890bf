//! Name resolution for values and types.
//!
//! An unqualified value name is looked up in the enclosing scopes, then among
//! the members of the implicit receiver, then in the current package and
//! finally in the imported packages, where it has to be unique. A qualified
//! name (`package::name`) skips straight to the named package.

use std::{rc::Rc, str::FromStr};

use itertools::Itertools;

use crate::{
    frontend::{
        Span,
        ast::{self, TypeKind},
        intern::InternedSymbol,
    },
    middle::{
        error::{SemanticErrorKind, SemanticResult, error},
        primitive::PrimitiveKind,
        scope::ScopeStack,
        session::{CompilationSession, GlobalId, PackageId},
        tir::LocalId,
        ty::{ClassId, FunctionType, TupleField, Type},
    },
};

/// The packages visible from one source unit
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub package: PackageId,
    pub imports: Vec<PackageId>,
}

impl ResolutionContext {
    pub fn for_unit(
        session: &mut CompilationSession,
        unit: &ast::SourceUnit,
    ) -> SemanticResult<Self> {
        let package = session.get_or_create_package(unit.package.symbol);
        let imports = unit
            .imports
            .iter()
            .map(|import| {
                session.package_by_name(import.symbol).ok_or_else(|| {
                    error(
                        SemanticErrorKind::UnknownIdentifier,
                        import.span,
                        format!("unknown package '{}'", import.symbol),
                    )
                })
            })
            .collect::<SemanticResult<Vec<_>>>()?;

        Ok(Self { package, imports })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueResolution {
    Local(LocalId),
    /// A property of the implicit receiver, stored or not
    ReceiverMember { class: ClassId, property: usize },
    Global(GlobalId),
}

pub fn resolve_value(
    session: &CompilationSession,
    context: &ResolutionContext,
    scopes: &ScopeStack,
    receiver: Option<ClassId>,
    path: &ast::Path,
) -> SemanticResult<ValueResolution> {
    let name = path.name.symbol;

    if let Some(package) = &path.package {
        let id = resolve_package(session, package)?;

        return session.packages[id]
            .globals
            .get(&name)
            .map(|global| ValueResolution::Global(*global))
            .ok_or_else(|| unknown_identifier(path.span, name));
    }

    if let Some(local) = scopes.lookup(name) {
        return Ok(ValueResolution::Local(local));
    }

    if let Some(class) = receiver {
        if let Some(property) = session.types.classes[class].property_index(name) {
            return Ok(ValueResolution::ReceiverMember { class, property });
        }
    }

    if let Some(global) = session.packages[context.package].globals.get(&name) {
        return Ok(ValueResolution::Global(*global));
    }

    let imported = context
        .imports
        .iter()
        .filter_map(|package| session.packages[*package].globals.get(&name).copied())
        .unique()
        .collect::<Vec<_>>();

    match imported.as_slice() {
        [global] => Ok(ValueResolution::Global(*global)),
        [] => Err(unknown_identifier(path.span, name)),
        _ => {
            let mut err = error(
                SemanticErrorKind::AmbiguousIdentifier,
                path.span,
                format!("'{name}' is declared in more than one imported package"),
            );

            for global in &imported {
                err = err.with_span(session.globals[*global].span);
            }

            Err(err)
        }
    }
}

pub fn resolve_class(
    session: &CompilationSession,
    context: &ResolutionContext,
    path: &ast::Path,
) -> SemanticResult<ClassId> {
    let name = path.name.symbol;
    let unresolved = || {
        error(
            SemanticErrorKind::UnresolvedType,
            path.span,
            format!("unknown type '{name}'"),
        )
    };

    if let Some(package) = &path.package {
        let id = resolve_package(session, package)?;

        return session.packages[id]
            .classes
            .get(&name)
            .copied()
            .ok_or_else(unresolved);
    }

    if let Some(class) = session.packages[context.package].classes.get(&name) {
        return Ok(*class);
    }

    let imported = context
        .imports
        .iter()
        .filter_map(|package| session.packages[*package].classes.get(&name).copied())
        .unique()
        .collect::<Vec<_>>();

    match imported.as_slice() {
        [class] => Ok(*class),
        [] => Err(unresolved()),
        _ => Err(error(
            SemanticErrorKind::AmbiguousIdentifier,
            path.span,
            format!("type '{name}' is declared in more than one imported package"),
        )),
    }
}

/// Resolves a type written in the source. `void` is accepted here, use
/// [`resolve_data_type`] where a value has to be stored.
pub fn resolve_type(
    session: &mut CompilationSession,
    context: &ResolutionContext,
    ty: &ast::Type,
) -> SemanticResult<Type> {
    match &ty.kind {
        TypeKind::Named(path) => {
            if path.package.is_none() {
                if let Ok(primitive) = PrimitiveKind::from_str(path.name.symbol.value()) {
                    return Ok(match primitive {
                        PrimitiveKind::Void => session.types.void(),
                        PrimitiveKind::Bool => session.types.bool(),
                        PrimitiveKind::Int(kind) => session.types.int(kind),
                    });
                }
            }

            let class = resolve_class(session, context, path)?;
            Ok(session.types.class(class))
        }
        TypeKind::Array(element) => {
            let element = resolve_data_type(session, context, element)?;
            Ok(session.types.array(element))
        }
        TypeKind::Nullable(inner) => {
            let inner = resolve_type(session, context, inner)?;

            session.types.nullable(inner.clone()).ok_or_else(|| {
                error(
                    SemanticErrorKind::IllegalNullable,
                    ty.span,
                    format!("{inner} cannot be nullable, only arrays and classes can"),
                )
            })
        }
        TypeKind::Tuple(fields) => {
            let mut resolved = Vec::with_capacity(fields.len());

            for field in fields {
                if let Some(previous) = fields
                    .iter()
                    .take_while(|f| !std::ptr::eq(*f, field))
                    .find(|f| f.name.symbol == field.name.symbol)
                {
                    return Err(error(
                        SemanticErrorKind::DuplicateDeclaration,
                        field.name.span,
                        format!("tuple field '{}' is declared twice", field.name.symbol),
                    )
                    .with_span(previous.name.span));
                }

                resolved.push(TupleField {
                    name: field.name.symbol,
                    ty: resolve_data_type(session, context, &field.ty)?,
                });
            }

            Ok(session.types.tuple(resolved))
        }
        TypeKind::Function {
            parameters,
            is_variadic,
            return_type,
        } => {
            let parameters = parameters
                .iter()
                .map(|p| resolve_data_type(session, context, p))
                .collect::<SemanticResult<Rc<[Type]>>>()?;
            let return_type = match return_type {
                Some(ty) => resolve_type(session, context, ty)?,
                None => session.types.void(),
            };

            Ok(session.types.function(FunctionType {
                parameters,
                is_variadic: *is_variadic,
                return_type,
                receiver: None,
            }))
        }
    }
}

/// Like [`resolve_type`] but rejects `void`
pub fn resolve_data_type(
    session: &mut CompilationSession,
    context: &ResolutionContext,
    ty: &ast::Type,
) -> SemanticResult<Type> {
    let resolved = resolve_type(session, context, ty)?;

    if resolved.is_void() {
        return Err(error(
            SemanticErrorKind::TypeMismatch,
            ty.span,
            "'void' cannot be used as the type of a value",
        ));
    }

    Ok(resolved)
}

fn resolve_package(
    session: &CompilationSession,
    package: &ast::Identifier,
) -> SemanticResult<PackageId> {
    session.package_by_name(package.symbol).ok_or_else(|| {
        error(
            SemanticErrorKind::UnknownIdentifier,
            package.span,
            format!("unknown package '{}'", package.symbol),
        )
    })
}

#[track_caller]
fn unknown_identifier(span: Span, name: InternedSymbol) -> crate::middle::error::SemanticError {
    error(
        SemanticErrorKind::UnknownIdentifier,
        span,
        format!("cannot find '{name}' in this scope"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::SourceMap,
        middle::{
            scope::FlowFacts,
            session::{CompileOptions, GlobalKind, GlobalVariable},
        },
        index::Index,
        test_util::{path, qualified_path, span},
    };

    fn add_global(session: &mut CompilationSession, package: PackageId, name: &str) -> GlobalId {
        let symbol = InternedSymbol::new(name);
        let id = session.globals.push(GlobalVariable {
            name: symbol,
            package,
            ty: None,
            kind: GlobalKind::Variable { is_constant: false },
            span: span(),
            symbol: session.qualified_name(package, symbol),
        });

        session.packages[package].globals.insert(symbol, id);
        id
    }

    #[test]
    fn locals_shadow_package_globals() {
        let sources = SourceMap::new();
        let options = CompileOptions::default();
        let mut session = CompilationSession::new(&sources, &options);
        let main = session.get_or_create_package(InternedSymbol::new("main"));
        let global = add_global(&mut session, main, "value");
        let context = ResolutionContext {
            package: main,
            imports: Vec::new(),
        };

        let mut scopes = ScopeStack::new();
        assert_eq!(
            resolve_value(&session, &context, &scopes, None, &path("value")),
            Ok(ValueResolution::Global(global))
        );

        scopes
            .declare(
                InternedSymbol::new("value"),
                LocalId::new(0),
                FlowFacts::uninitialized(),
            )
            .unwrap();
        assert_eq!(
            resolve_value(&session, &context, &scopes, None, &path("value")),
            Ok(ValueResolution::Local(LocalId::new(0)))
        );
    }

    #[test]
    fn imports_must_not_be_ambiguous() {
        let sources = SourceMap::new();
        let options = CompileOptions::default();
        let mut session = CompilationSession::new(&sources, &options);
        let main = session.get_or_create_package(InternedSymbol::new("main"));
        let left = session.get_or_create_package(InternedSymbol::new("left"));
        let right = session.get_or_create_package(InternedSymbol::new("right"));
        add_global(&mut session, left, "shared");
        let right_shared = add_global(&mut session, right, "shared");
        let only_right = add_global(&mut session, right, "only");
        let context = ResolutionContext {
            package: main,
            imports: vec![left, right],
        };
        let scopes = ScopeStack::new();

        let err = resolve_value(&session, &context, &scopes, None, &path("shared")).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::AmbiguousIdentifier);

        assert_eq!(
            resolve_value(&session, &context, &scopes, None, &path("only")),
            Ok(ValueResolution::Global(only_right))
        );
        assert_eq!(
            resolve_value(
                &session,
                &context,
                &scopes,
                None,
                &qualified_path("right", "shared")
            ),
            Ok(ValueResolution::Global(right_shared))
        );

        let err = resolve_value(&session, &context, &scopes, None, &path("missing")).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::UnknownIdentifier);
    }
}
