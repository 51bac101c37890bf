//! Everything one compilation run knows about: packages, classes, functions,
//! globals and collected warnings. The session is threaded explicitly through
//! elaboration and lowering instead of living in process wide state.

use hashbrown::HashMap;
use log::warn;

use crate::{
    frontend::{SourceMap, Span, intern::InternedSymbol},
    index::{IndexVec, simple_index},
    middle::{
        error::{Warning, WarningKind},
        tir,
        ty::{ClassId, Type, TypeContext},
    },
};

simple_index! {
    /// Identifies a package (all source units declaring the same package name)
    pub struct PackageId;
}

simple_index! {
    /// Identifies a top level `var`, `val` or function
    pub struct GlobalId;
}

simple_index! {
    /// Identifies any function with a body: free functions, methods,
    /// constructors, destructors and lambdas
    pub struct FunctionId;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub entry_package: String,
    pub entry_function: String,
    /// When disabled a missing entry function omits the `main` wrapper
    /// instead of failing
    pub require_entry_point: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            entry_package: "main".to_owned(),
            entry_function: "main".to_owned(),
            require_entry_point: true,
        }
    }
}

#[derive(Debug)]
pub struct Package {
    pub name: InternedSymbol,
    pub globals: HashMap<InternedSymbol, GlobalId>,
    pub classes: HashMap<InternedSymbol, ClassId>,
}

#[derive(Debug)]
pub struct GlobalVariable {
    pub name: InternedSymbol,
    pub package: PackageId,
    /// `None` until signatures are resolved
    pub ty: Option<Type>,
    pub kind: GlobalKind,
    pub span: Span,
    /// Symbol used in the emitted module
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Variable { is_constant: bool },
    Function(FunctionId),
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub name: InternedSymbol,
    pub package: PackageId,
    pub symbol: String,
    pub span: Span,
    pub kind: FunctionKind,
    /// `None` until signatures are resolved. Methods carry their receiver.
    pub ty: Option<Type>,
    /// `None` until the body has been elaborated
    pub body: Option<tir::FunctionBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Free,
    Method { class: ClassId, dispatch: Dispatch },
    Constructor(ClassId),
    Destructor(ClassId),
    Lambda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Static,
    Virtual,
}

impl FunctionKind {
    /// The class whose instance is the implicit receiver
    pub fn receiver_class(self) -> Option<ClassId> {
        match self {
            FunctionKind::Method { class, .. }
            | FunctionKind::Constructor(class)
            | FunctionKind::Destructor(class) => Some(class),
            FunctionKind::Free | FunctionKind::Lambda => None,
        }
    }
}

#[derive(Debug)]
pub struct CompilationSession<'a> {
    pub sources: &'a SourceMap,
    pub options: &'a CompileOptions,
    pub types: TypeContext,
    pub packages: IndexVec<PackageId, Package>,
    pub globals: IndexVec<GlobalId, GlobalVariable>,
    pub functions: IndexVec<FunctionId, FunctionDefinition>,
    /// Global initializers in declaration order, run by the entry point
    pub global_initializers: Vec<tir::FunctionBody>,
    /// The user function called by the synthesized `main`
    pub entry_point: Option<FunctionId>,
    pub warnings: Vec<Warning>,
    lambda_counter: u32,
}

impl<'a> CompilationSession<'a> {
    pub fn new(sources: &'a SourceMap, options: &'a CompileOptions) -> Self {
        Self {
            sources,
            options,
            types: TypeContext::new(),
            packages: IndexVec::new(),
            globals: IndexVec::new(),
            functions: IndexVec::new(),
            global_initializers: Vec::new(),
            entry_point: None,
            warnings: Vec::new(),
            lambda_counter: 0,
        }
    }

    pub fn package_by_name(&self, name: InternedSymbol) -> Option<PackageId> {
        self.packages
            .enumerate()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| id)
    }

    pub fn get_or_create_package(&mut self, name: InternedSymbol) -> PackageId {
        match self.package_by_name(name) {
            Some(id) => id,
            None => self.packages.push(Package {
                name,
                globals: HashMap::new(),
                classes: HashMap::new(),
            }),
        }
    }

    /// `<lambda0>`, `<lambda1>`, ... unique for the whole run
    pub fn next_lambda_name(&mut self) -> InternedSymbol {
        let name = format!("<lambda{}>", self.lambda_counter);
        self.lambda_counter += 1;
        InternedSymbol::new(&name)
    }

    pub fn warn(&mut self, kind: WarningKind, span: Span, message: impl Into<String>) {
        let warning = Warning {
            kind,
            message: message.into(),
            span,
        };

        warn!(
            "{}: {warning}",
            self.sources.format_span_position(warning.span)
        );

        self.warnings.push(warning);
    }

    pub fn qualified_name(&self, package: PackageId, name: InternedSymbol) -> String {
        format!("{}::{}", self.packages[package].name, name)
    }

    pub fn class_qualified_name(&self, class: ClassId) -> String {
        let class = &self.types.classes[class];
        self.qualified_name(class.package, class.name)
    }

    pub fn function_type(&self, function: FunctionId) -> &Type {
        self.functions[function]
            .ty
            .as_ref()
            .unwrap_or_else(|| unreachable!("function signatures are resolved before use"))
    }

    pub fn global_type(&self, global: GlobalId) -> &Type {
        self.globals[global]
            .ty
            .as_ref()
            .unwrap_or_else(|| unreachable!("global signatures are resolved before use"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_are_created_once() {
        let sources = SourceMap::new();
        let options = CompileOptions::default();
        let mut session = CompilationSession::new(&sources, &options);

        let first = session.get_or_create_package(InternedSymbol::new("main"));
        let other = session.get_or_create_package(InternedSymbol::new("util"));
        let again = session.get_or_create_package(InternedSymbol::new("main"));

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(session.packages.len(), 2);
    }

    #[test]
    fn lambda_names_are_unique() {
        let sources = SourceMap::new();
        let options = CompileOptions::default();
        let mut session = CompilationSession::new(&sources, &options);

        assert_eq!(session.next_lambda_name().value(), "<lambda0>");
        assert_eq!(session.next_lambda_name().value(), "<lambda1>");
    }
}
