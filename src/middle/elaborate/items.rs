use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use log::trace;

use crate::{
    frontend::{
        SourceId, Span,
        ast::{self, ItemKind, MethodModifier},
    },
    index::Index,
    middle::{
        elaborate::{BodyElaborator, BodyKind, elaborate_function},
        error::{SemanticErrorKind, SemanticResult, error},
        resolve::{ResolutionContext, resolve_class, resolve_data_type, resolve_type},
        session::{
            CompilationSession, Dispatch, FunctionDefinition, FunctionId, FunctionKind, GlobalId,
            GlobalKind, GlobalVariable, PackageId,
        },
        tir::{self, Place, Variable},
        ty::{ClassDefinition, ClassId, ClassProperty, FunctionType, PropertyKind, Type, TypeKind},
    },
};

/// Declarations of one source unit, in source order
struct UnitEntry<'ast> {
    context: ResolutionContext,
    functions: Vec<(FunctionId, GlobalId, &'ast ast::FunctionDefinition)>,
    classes: Vec<ClassId>,
    globals: Vec<(&'ast ast::VariableDeclaration, Vec<GlobalId>)>,
}

struct ClassEntry<'ast> {
    definition: &'ast ast::ClassDefinition,
    unit: usize,
    /// Parallel to `definition.methods`
    methods: Vec<FunctionId>,
    constructor: FunctionId,
    destructor: FunctionId,
}

/// Every top level declaration, registered before any signature is resolved
/// so that declarations can refer to each other regardless of order
pub(super) struct Registry<'ast> {
    units: Vec<UnitEntry<'ast>>,
    classes: HashMap<ClassId, ClassEntry<'ast>>,
}

impl<'ast> Registry<'ast> {
    pub fn register(
        session: &mut CompilationSession,
        units: &'ast [ast::SourceUnit],
    ) -> SemanticResult<Self> {
        // imports may name packages declared by any unit
        for unit in units {
            session.get_or_create_package(unit.package.symbol);
        }

        let mut registry = Self {
            units: Vec::with_capacity(units.len()),
            classes: HashMap::new(),
        };

        for (index, unit) in units.iter().enumerate() {
            let context = ResolutionContext::for_unit(session, unit)?;
            let package = context.package;
            let mut entry = UnitEntry {
                context,
                functions: Vec::new(),
                classes: Vec::new(),
                globals: Vec::new(),
            };

            for item in &unit.items {
                match &item.kind {
                    ItemKind::Function(function) => {
                        let name = &function.signature.name;
                        let symbol = session.qualified_name(package, name.symbol);
                        let id = session.functions.push(FunctionDefinition {
                            name: name.symbol,
                            package,
                            symbol,
                            span: function.signature.span,
                            kind: FunctionKind::Free,
                            ty: None,
                            body: None,
                        });
                        let global = declare_global(session, package, name, GlobalKind::Function(id))?;

                        entry.functions.push((id, global, function));
                    }
                    ItemKind::Class(class) => {
                        let id = register_class(session, package, class)?;
                        let class_entry = register_class_members(session, package, id, class, index);

                        registry.classes.insert(id, class_entry);
                        entry.classes.push(id);
                    }
                    ItemKind::Global(declaration) => {
                        let kind = GlobalKind::Variable {
                            is_constant: declaration.is_constant,
                        };
                        let globals = declaration
                            .targets
                            .iter()
                            .map(|target| declare_global(session, package, &target.name, kind))
                            .collect::<SemanticResult<Vec<_>>>()?;

                        entry.globals.push((declaration, globals));
                    }
                }
            }

            registry.units.push(entry);
        }

        Ok(registry)
    }

    pub fn resolve_signatures(&mut self, session: &mut CompilationSession) -> SemanticResult<()> {
        let mut in_progress = HashSet::new();
        for unit in &self.units {
            for class in &unit.classes {
                self.resolve_class_signature(session, *class, &mut in_progress)?;
            }
        }

        for unit in &self.units {
            for (function, global, definition) in &unit.functions {
                let ty = resolve_signature(session, &unit.context, &definition.signature, None)?;

                session.functions[*function].ty = Some(ty.clone());
                session.globals[*global].ty = Some(ty);
            }
        }

        for unit in &self.units {
            for (declaration, globals) in &unit.globals {
                for (target, global) in declaration.targets.iter().zip(globals) {
                    if let Some(ty) = &target.ty {
                        session.globals[*global].ty =
                            Some(resolve_data_type(session, &unit.context, ty)?);
                    }
                }
            }
        }

        for unit in &self.units {
            for (declaration, globals) in &unit.globals {
                elaborate_global_initializer(session, &unit.context, declaration, globals)?;
            }
        }

        Ok(())
    }

    /// Fills in the superclass and property list of `id`, resolving its
    /// superclass chain first
    fn resolve_class_signature(
        &self,
        session: &mut CompilationSession,
        id: ClassId,
        in_progress: &mut HashSet<ClassId>,
    ) -> SemanticResult<()> {
        if session.types.classes[id].signatures_resolved {
            return Ok(());
        }

        let entry = &self.classes[&id];
        let class = entry.definition;
        let context = &self.units[entry.unit].context;

        if !in_progress.insert(id) {
            return Err(error(
                SemanticErrorKind::CyclicInheritance,
                class.name.span,
                format!("class '{}' inherits from itself", class.name.symbol),
            ));
        }

        let (superclass, mut properties) = match &class.superclass {
            Some(path) => {
                let superclass = resolve_class(session, context, path)?;
                self.resolve_class_signature(session, superclass, in_progress)?;

                (
                    Some(superclass),
                    session.types.classes[superclass].properties.clone(),
                )
            }
            None => (None, Vec::new()),
        };
        let inherited = properties.len();

        for property in &class.properties {
            check_member_name(&properties, &property.name)?;

            properties.push(ClassProperty {
                name: property.name.symbol,
                ty: resolve_data_type(session, context, &property.ty)?,
                kind: PropertyKind::Field,
                span: property.name.span,
            });
        }

        // override checks walk the subclass chain starting at this class
        session.types.classes[id].superclass = superclass;
        let class_type = session.types.class(id);

        for (method, function) in class.methods.iter().zip(&entry.methods) {
            let signature = &method.function.signature;
            let ty = resolve_signature(session, context, signature, Some(class_type.clone()))?;
            session.functions[*function].ty = Some(ty.clone());

            let name = signature.name.symbol;
            let existing = properties.iter().position(|p| p.name == name);
            let overridable = existing.filter(|index| {
                *index < inherited && matches!(properties[*index].kind, PropertyKind::VirtualMethod(_))
            });

            let property = ClassProperty {
                name,
                ty: ty.clone(),
                kind: PropertyKind::Method(*function),
                span: signature.name.span,
            };

            match (method.modifier, existing, overridable) {
                (MethodModifier::Override, _, Some(index)) => {
                    if !session.types.is_type(&ty, &properties[index].ty) {
                        return Err(error(
                            SemanticErrorKind::IllegalOverride,
                            signature.span,
                            format!(
                                "{ty} is not compatible with the overridden method of type {}",
                                properties[index].ty
                            ),
                        )
                        .with_span(properties[index].span));
                    }

                    properties[index] = ClassProperty {
                        kind: PropertyKind::VirtualMethod(*function),
                        ..property
                    };
                }
                (MethodModifier::Override, Some(index), None) if index < inherited => {
                    return Err(error(
                        SemanticErrorKind::IllegalOverride,
                        signature.name.span,
                        format!("'{name}' overrides a member which is not virtual"),
                    )
                    .with_span(properties[index].span));
                }
                (_, Some(index), None) => {
                    return Err(error(
                        SemanticErrorKind::DuplicateDeclaration,
                        signature.name.span,
                        format!("'{name}' is already a member of class '{}'", class.name.symbol),
                    )
                    .with_span(properties[index].span));
                }
                (MethodModifier::Override, None, None) => {
                    return Err(error(
                        SemanticErrorKind::IllegalOverride,
                        signature.name.span,
                        format!("'{name}' does not override a virtual method of a superclass"),
                    ));
                }
                (_, _, Some(index)) => {
                    return Err(error(
                        SemanticErrorKind::IllegalOverride,
                        signature.name.span,
                        format!("'{name}' hides a virtual method and must be declared 'override'"),
                    )
                    .with_span(properties[index].span));
                }
                (MethodModifier::Virtual, None, None) => properties.push(ClassProperty {
                    kind: PropertyKind::VirtualMethod(*function),
                    ..property
                }),
                (MethodModifier::None, None, None) => properties.push(property),
            }
        }

        let parameters = match &class.constructor {
            Some(constructor) => resolve_parameters(session, context, &constructor.parameters)?,
            None => Rc::from([]),
        };
        let constructor_type = session.types.function(FunctionType {
            parameters,
            is_variadic: false,
            return_type: class_type.clone(),
            receiver: None,
        });
        let void = session.types.void();
        let destructor_type = session.types.function(FunctionType {
            parameters: Rc::from([]),
            is_variadic: false,
            return_type: void,
            receiver: Some(class_type),
        });
        session.functions[entry.constructor].ty = Some(constructor_type);
        session.functions[entry.destructor].ty = Some(destructor_type);

        let definition = &mut session.types.classes[id];
        definition.properties = properties;
        definition.constructor = Some(entry.constructor);
        definition.destructor = Some(entry.destructor);
        definition.signatures_resolved = true;

        in_progress.remove(&id);
        trace!("resolved layout of class '{}'", class.name.symbol);

        Ok(())
    }

    pub fn elaborate_bodies(&self, session: &mut CompilationSession) -> SemanticResult<()> {
        for unit in &self.units {
            for (function, _, definition) in &unit.functions {
                let names = parameter_names(&definition.signature.parameters);
                elaborate_function(session, &unit.context, *function, &names, &definition.body)?;
            }

            for class in &unit.classes {
                let entry = &self.classes[class];
                let empty = ast::Block {
                    span: entry.definition.name.span,
                    statements: Vec::new(),
                };

                match &entry.definition.constructor {
                    Some(constructor) => elaborate_function(
                        session,
                        &unit.context,
                        entry.constructor,
                        &parameter_names(&constructor.parameters),
                        &constructor.body,
                    )?,
                    None => elaborate_function(session, &unit.context, entry.constructor, &[], &empty)?,
                }

                let destructor = entry.definition.destructor.as_ref().unwrap_or(&empty);
                elaborate_function(session, &unit.context, entry.destructor, &[], destructor)?;

                for (method, function) in entry.definition.methods.iter().zip(&entry.methods) {
                    let names = parameter_names(&method.function.signature.parameters);
                    elaborate_function(session, &unit.context, *function, &names, &method.function.body)?;
                }
            }
        }

        Ok(())
    }
}

fn declare_global(
    session: &mut CompilationSession,
    package: PackageId,
    name: &ast::Identifier,
    kind: GlobalKind,
) -> SemanticResult<GlobalId> {
    if let Some(existing) = session.packages[package].globals.get(&name.symbol) {
        return Err(error(
            SemanticErrorKind::DuplicateDeclaration,
            name.span,
            format!(
                "'{}' is already declared in package '{}'",
                name.symbol, session.packages[package].name
            ),
        )
        .with_span(session.globals[*existing].span));
    }

    let symbol = session.qualified_name(package, name.symbol);
    let id = session.globals.push(GlobalVariable {
        name: name.symbol,
        package,
        ty: None,
        kind,
        span: name.span,
        symbol,
    });
    session.packages[package].globals.insert(name.symbol, id);

    Ok(id)
}

fn register_class(
    session: &mut CompilationSession,
    package: PackageId,
    class: &ast::ClassDefinition,
) -> SemanticResult<ClassId> {
    let name = &class.name;

    if let Some(existing) = session.packages[package].classes.get(&name.symbol) {
        return Err(error(
            SemanticErrorKind::DuplicateDeclaration,
            name.span,
            format!(
                "class '{}' is already declared in package '{}'",
                name.symbol, session.packages[package].name
            ),
        )
        .with_span(session.types.classes[*existing].span));
    }

    let id = session.types.classes.push(ClassDefinition {
        name: name.symbol,
        package,
        span: name.span,
        superclass: None,
        properties: Vec::new(),
        constructor: None,
        destructor: None,
        signatures_resolved: false,
    });
    session.packages[package].classes.insert(name.symbol, id);

    Ok(id)
}

fn register_class_members<'ast>(
    session: &mut CompilationSession,
    package: PackageId,
    id: ClassId,
    class: &'ast ast::ClassDefinition,
    unit: usize,
) -> ClassEntry<'ast> {
    let class_symbol = session.qualified_name(package, class.name.symbol);
    let mut function = |name: &str, span: Span, kind: FunctionKind| {
        session.functions.push(FunctionDefinition {
            name: name.into(),
            package,
            symbol: format!("{class_symbol}::{name}"),
            span,
            kind,
            ty: None,
            body: None,
        })
    };

    let constructor_span = class.constructor.as_ref().map_or(class.span, |c| c.span);
    let constructor = function("constructor", constructor_span, FunctionKind::Constructor(id));
    let destructor_span = class.destructor.as_ref().map_or(class.span, |d| d.span);
    let destructor = function("destructor", destructor_span, FunctionKind::Destructor(id));

    let methods = class
        .methods
        .iter()
        .map(|method| {
            let dispatch = match method.modifier {
                MethodModifier::None => Dispatch::Static,
                MethodModifier::Virtual | MethodModifier::Override => Dispatch::Virtual,
            };
            let signature = &method.function.signature;

            function(
                signature.name.symbol.value(),
                signature.span,
                FunctionKind::Method { class: id, dispatch },
            )
        })
        .collect();

    ClassEntry {
        definition: class,
        unit,
        methods,
        constructor,
        destructor,
    }
}

fn check_member_name(properties: &[ClassProperty], name: &ast::Identifier) -> SemanticResult<()> {
    match properties.iter().find(|p| p.name == name.symbol) {
        Some(existing) => Err(error(
            SemanticErrorKind::DuplicateDeclaration,
            name.span,
            format!("'{}' is already a member of this class", name.symbol),
        )
        .with_span(existing.span)),
        None => Ok(()),
    }
}

fn parameter_names(parameters: &[ast::Parameter]) -> Vec<&ast::Identifier> {
    parameters.iter().map(|p| &p.name).collect()
}

fn resolve_parameters(
    session: &mut CompilationSession,
    context: &ResolutionContext,
    parameters: &[ast::Parameter],
) -> SemanticResult<Rc<[Type]>> {
    for (index, parameter) in parameters.iter().enumerate() {
        if let Some(previous) = parameters[..index]
            .iter()
            .find(|p| p.name.symbol == parameter.name.symbol)
        {
            return Err(error(
                SemanticErrorKind::DuplicateDeclaration,
                parameter.name.span,
                format!("parameter '{}' is declared twice", parameter.name.symbol),
            )
            .with_span(previous.name.span));
        }
    }

    parameters
        .iter()
        .map(|p| resolve_data_type(session, context, &p.ty))
        .collect()
}

fn resolve_signature(
    session: &mut CompilationSession,
    context: &ResolutionContext,
    signature: &ast::FunctionSignature,
    receiver: Option<Type>,
) -> SemanticResult<Type> {
    let parameters = resolve_parameters(session, context, &signature.parameters)?;
    let return_type = match &signature.return_type {
        Some(ty) => resolve_type(session, context, ty)?,
        None => session.types.void(),
    };

    Ok(session.types.function(FunctionType {
        parameters,
        is_variadic: signature.is_variadic,
        return_type,
        receiver,
    }))
}

/// Whether storage of this type may start out zeroed
fn has_zero_value(ty: &Type) -> bool {
    match &**ty {
        TypeKind::Bool | TypeKind::Integer(_) | TypeKind::Nullable(_) => true,
        TypeKind::Tuple(fields) => fields.iter().all(|f| has_zero_value(&f.ty)),
        TypeKind::Void | TypeKind::Array(_) | TypeKind::Function(_) | TypeKind::Class { .. } => {
            false
        }
    }
}

fn elaborate_global_initializer(
    session: &mut CompilationSession,
    context: &ResolutionContext,
    declaration: &ast::VariableDeclaration,
    globals: &[GlobalId],
) -> SemanticResult<()> {
    let Some(values) = &declaration.values else {
        for (target, global) in declaration.targets.iter().zip(globals) {
            let Some(ty) = &session.globals[*global].ty else {
                return Err(error(
                    SemanticErrorKind::UnresolvedType,
                    target.name.span,
                    format!(
                        "global '{}' needs a type annotation or an initializer",
                        target.name.symbol
                    ),
                ));
            };

            if !has_zero_value(ty) {
                return Err(error(
                    SemanticErrorKind::UninitializedUse,
                    target.name.span,
                    format!(
                        "global '{}' of type {ty} has no default value and must be initialized",
                        target.name.symbol
                    ),
                ));
            }
        }

        return Ok(());
    };

    let expected = globals
        .iter()
        .map(|global| session.globals[*global].ty.clone())
        .collect::<Vec<_>>();
    let void = session.types.void();

    let mut elaborator =
        BodyElaborator::new(session, context, BodyKind::GlobalInitializer, None, void);
    let values = elaborator.elaborate_expanded(values, &expected)?;

    if values.len() != globals.len() {
        return Err(error(
            SemanticErrorKind::ArityMismatch,
            declaration.span,
            format!("expected {} values, found {}", globals.len(), values.len()),
        ));
    }

    for (value, global) in values.iter().zip(globals) {
        let global = &mut elaborator.session.globals[*global];

        if global.ty.is_none() {
            global.ty = Some(value.ty.clone());
        }
    }

    let places = globals
        .iter()
        .map(|global| Place::Variable(Variable::Global(*global)))
        .collect();
    let block = tir::Block::new(vec![tir::Statement::Assign { places, values }], Vec::new());
    let body = elaborator.finish(Vec::new(), block);

    session.global_initializers.push(body);

    Ok(())
}

/// Locates the configured entry function. Its absence is only an error when
/// an entry point is required.
pub(super) fn find_entry_point(
    session: &mut CompilationSession,
    units: &[ast::SourceUnit],
) -> SemanticResult<()> {
    let options = session.options;
    let fallback_span = units
        .first()
        .map_or(Span::new(SourceId::new(0), 0, 0), |u| u.package.span);

    let entry = session
        .packages
        .iter()
        .find(|p| p.name.value() == options.entry_package)
        .and_then(|p| {
            p.globals
                .iter()
                .find(|(name, _)| name.value() == options.entry_function)
                .map(|(_, global)| *global)
        });

    let function = match entry.map(|global| (global, session.globals[global].kind)) {
        Some((_, GlobalKind::Function(function))) => function,
        Some((global, GlobalKind::Variable { .. })) => {
            return Err(error(
                SemanticErrorKind::MissingEntryPoint,
                session.globals[global].span,
                format!("entry point '{}' must be a function", options.entry_function),
            ));
        }
        None if !options.require_entry_point => return Ok(()),
        None => {
            return Err(error(
                SemanticErrorKind::MissingEntryPoint,
                fallback_span,
                format!(
                    "no function '{}' found in package '{}'",
                    options.entry_function, options.entry_package
                ),
            ));
        }
    };

    let Some(ty) = session.function_type(function).as_function() else {
        unreachable!("functions always have a function type")
    };

    let valid_return = ty.return_type.is_void() || ty.return_type.as_integer().is_some();
    if !ty.parameters.is_empty() || ty.is_variadic || !valid_return {
        return Err(error(
            SemanticErrorKind::MissingEntryPoint,
            session.functions[function].span,
            format!(
                "entry point must take no parameters and return 'void' or an integer, found {}",
                session.function_type(function)
            ),
        ));
    }

    session.entry_point = Some(function);
    Ok(())
}
