use std::rc::Rc;

use hashbrown::HashSet;

use crate::{
    frontend::{Span, intern::InternedSymbol},
    index::{IndexVec, simple_index},
    middle::{
        primitive::IntKind,
        session::{FunctionId, PackageId},
    },
};

#[doc(hidden)]
mod private {
    #[doc(hidden)]
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct PrivateZst;
}

/// Thin pointer to an interned type kind. Do not construct directly. Instead,
/// use [`TypeContext::intern_type`] or one of its shorthands.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type(Rc<TypeKind>, private::PrivateZst);

impl Type {
    fn new_from_reference_only_for_interning(kind: Rc<TypeKind>) -> Self {
        Self(kind, private::PrivateZst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// void
    ///
    /// Only valid as a function return type
    Void,
    /// true, false
    Bool,
    /// i8 through u64
    Integer(IntKind),
    /// T[]
    ///
    /// Reference counted, heap allocated, invariant in its element type
    Array(Type),
    /// T?
    ///
    /// Always wraps an array or class type
    Nullable(Type),
    /// (a: T, b: U)
    ///
    /// Stored inline. Field names do not take part in compatibility checks.
    Tuple(Rc<[TupleField]>),
    /// func(T, U) -> V
    Function(FunctionType),
    /// A reference counted class instance
    Class { id: ClassId, name: InternedSymbol },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleField {
    pub name: InternedSymbol,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub parameters: Rc<[Type]>,
    pub is_variadic: bool,
    pub return_type: Type,
    /// Class instance passed as the hidden first argument of methods
    pub receiver: Option<Type>,
}

simple_index! {
    /// Identifies a class. The runtime type tag of a class is its index plus
    /// one so that zero can mark "no superclass".
    pub struct ClassId;
}

impl ClassId {
    pub fn tag(self) -> u32 {
        use crate::index::Index;

        self.index() as u32 + 1
    }
}

impl core::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Type").field(&self.0).finish()
    }
}

impl core::ops::Deref for Type {
    type Target = TypeKind;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl TypeKind {
    pub fn is_void(&self) -> bool {
        matches!(self, TypeKind::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, TypeKind::Bool)
    }

    pub fn as_integer(&self) -> Option<IntKind> {
        match self {
            TypeKind::Integer(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            TypeKind::Class { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            TypeKind::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Heap allocated, reference counted types which carry a destructor
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            TypeKind::Array(_) | TypeKind::Class { .. } | TypeKind::Nullable(_)
        )
    }

    /// Whether holding a value of this type owns references which have to be
    /// released. Tuples are managed when any of their fields are.
    pub fn is_managed(&self) -> bool {
        match self {
            TypeKind::Tuple(fields) => fields.iter().any(|f| f.ty.is_managed()),
            kind => kind.is_complex(),
        }
    }

    /// The class behind `A` or `A?`
    pub fn class_behind_nullable(&self) -> Option<ClassId> {
        match self {
            TypeKind::Nullable(inner) => inner.as_class(),
            kind => kind.as_class(),
        }
    }
}

impl core::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Bool => write!(f, "bool"),
            Self::Integer(kind) => write!(f, "{kind}"),
            Self::Array(ty) => write!(f, "{}[]", **ty),
            Self::Nullable(ty) => write!(f, "{}?", **ty),
            Self::Tuple(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    write!(f, "{}: {}", field.name, *field.ty)?;

                    if i != fields.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, ")")
            }
            Self::Function(function) => {
                if let Some(receiver) = &function.receiver {
                    write!(f, "{}.", **receiver)?;
                }

                write!(f, "func(")?;
                for (i, parameter) in function.parameters.iter().enumerate() {
                    write!(f, "{}", **parameter)?;

                    if i != function.parameters.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                if function.is_variadic {
                    if !function.parameters.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ") -> {}", *function.return_type)
            }
            Self::Class { name, .. } => write!(f, "{name}"),
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", **self)
    }
}

/// Number of header fields ahead of the properties of every class instance:
/// reference count, type tag and destructor
pub const CLASS_HEADER_FIELDS: u32 = 3;
/// Header field holding the runtime type tag
pub const CLASS_TAG_FIELD: u32 = 1;
/// Header field holding the destructor function pointer
pub const CLASS_DESTRUCTOR_FIELD: u32 = 2;

#[derive(Debug)]
pub struct ClassDefinition {
    pub name: InternedSymbol,
    pub package: PackageId,
    pub span: Span,
    /// Filled in once signatures are resolved
    pub superclass: Option<ClassId>,
    /// Inherited properties first (with overridden slots replaced), then own
    /// properties in declaration order, then own methods. Filled in once
    /// signatures are resolved.
    pub properties: Vec<ClassProperty>,
    pub constructor: Option<FunctionId>,
    pub destructor: Option<FunctionId>,
    pub signatures_resolved: bool,
}

#[derive(Debug, Clone)]
pub struct ClassProperty {
    pub name: InternedSymbol,
    pub ty: Type,
    pub kind: PropertyKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Data stored in the instance
    Field,
    /// Per instance function slot, filled in by the constructor with the most
    /// derived implementation
    VirtualMethod(FunctionId),
    /// Statically dispatched method. Not part of the instance layout.
    Method(FunctionId),
}

impl PropertyKind {
    pub fn is_stored(self) -> bool {
        !matches!(self, PropertyKind::Method(_))
    }
}

impl ClassDefinition {
    pub fn property_index(&self, name: InternedSymbol) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Position of a stored property within the instance struct, header
    /// included
    pub fn field_index(&self, property: usize) -> Option<u32> {
        if !self.properties.get(property)?.kind.is_stored() {
            return None;
        }

        let stored_before = self.properties[..property]
            .iter()
            .filter(|p| p.kind.is_stored())
            .count() as u32;

        Some(CLASS_HEADER_FIELDS + stored_before)
    }

    pub fn stored_properties(&self) -> impl Iterator<Item = (usize, &ClassProperty)> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind.is_stored())
    }
}

/// Owns the type interning table and every class known to the compilation
#[derive(Debug, Default)]
pub struct TypeContext {
    /// Type interning table to prevent duplicate types
    type_table: HashSet<Rc<TypeKind>>,
    pub classes: IndexVec<ClassId, ClassDefinition>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_type(&mut self, kind: TypeKind) -> Type {
        let rc = self.type_table.get_or_insert(Rc::new(kind));
        Type::new_from_reference_only_for_interning(rc.clone())
    }

    pub fn void(&mut self) -> Type {
        self.intern_type(TypeKind::Void)
    }

    pub fn bool(&mut self) -> Type {
        self.intern_type(TypeKind::Bool)
    }

    pub fn int(&mut self, kind: IntKind) -> Type {
        self.intern_type(TypeKind::Integer(kind))
    }

    pub fn array(&mut self, element: Type) -> Type {
        self.intern_type(TypeKind::Array(element))
    }

    /// `None` when `inner` is not an array or class type
    pub fn nullable(&mut self, inner: Type) -> Option<Type> {
        matches!(&*inner, TypeKind::Array(_) | TypeKind::Class { .. })
            .then(|| self.intern_type(TypeKind::Nullable(inner)))
    }

    /// `T?` for array and class types, `T` itself when it already is nullable
    /// and `None` otherwise
    pub fn nullable_or_self(&mut self, ty: Type) -> Option<Type> {
        match &*ty {
            TypeKind::Nullable(_) => Some(ty),
            _ => self.nullable(ty),
        }
    }

    pub fn tuple(&mut self, fields: impl IntoIterator<Item = TupleField>) -> Type {
        self.intern_type(TypeKind::Tuple(fields.into_iter().collect()))
    }

    pub fn function(&mut self, function: FunctionType) -> Type {
        self.intern_type(TypeKind::Function(function))
    }

    pub fn class(&mut self, id: ClassId) -> Type {
        let name = self.classes[id].name;
        self.intern_type(TypeKind::Class { id, name })
    }

    /// Walks from `id` up to the root of its hierarchy, `id` included
    pub fn superclass_chain(&self, id: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::successors(Some(id), |c| self.classes[*c].superclass)
    }

    /// Whether `ancestor` is `class` or one of its superclasses
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.superclass_chain(class).any(|c| c == ancestor)
    }

    /// The subtype relation used for every assignment-like check: can a value
    /// of type `a` be used where `b` is expected?
    pub fn is_type(&self, a: &Type, b: &Type) -> bool {
        if a == b {
            return true;
        }

        if let TypeKind::Nullable(inner) = &**b {
            if self.is_type(a, inner) {
                return true;
            }
        }

        match (&**a, &**b) {
            (TypeKind::Class { id: a, .. }, TypeKind::Class { id: b, .. }) => {
                self.is_subclass(*a, *b)
            }
            (TypeKind::Function(a), TypeKind::Function(b)) => {
                let receivers_match = match (&a.receiver, &b.receiver) {
                    (None, None) => true,
                    (Some(a), Some(b)) => self.is_type(a, b),
                    _ => false,
                };

                a.parameters.len() == b.parameters.len()
                    && a.is_variadic == b.is_variadic
                    && receivers_match
                    && self.is_type(&a.return_type, &b.return_type)
                    && a.parameters.iter().zip(b.parameters.iter()).all(|(a, b)| a == b)
            }
            (TypeKind::Tuple(a), TypeKind::Tuple(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(a, b)| self.is_type(&a.ty, &b.ty))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frontend::SourceId, index::Index};

    fn declare_class(types: &mut TypeContext, name: &str, superclass: Option<ClassId>) -> Type {
        let id = types.classes.push(ClassDefinition {
            name: InternedSymbol::new(name),
            package: PackageId::new(0),
            span: Span::new(SourceId::new(0), 0, 0),
            superclass,
            properties: Vec::new(),
            constructor: None,
            destructor: None,
            signatures_resolved: true,
        });

        types.class(id)
    }

    #[test]
    fn is_type_is_reflexive() {
        let mut types = TypeContext::new();
        let a = declare_class(&mut types, "A", None);
        let i32 = types.int(IntKind::I32);
        let array = types.array(i32.clone());
        let nullable = types.nullable(a.clone()).unwrap();
        let tuple = types.tuple([TupleField {
            name: InternedSymbol::new("x"),
            ty: nullable.clone(),
        }]);

        for ty in [a, i32, array, nullable, tuple] {
            assert!(types.is_type(&ty, &ty), "{ty} should be a subtype of itself");
        }
    }

    #[test]
    fn class_subtyping_follows_the_superclass_chain() {
        let mut types = TypeContext::new();
        let a = declare_class(&mut types, "A", None);
        let b = declare_class(&mut types, "B", a.as_class());
        let c = declare_class(&mut types, "C", b.as_class());

        assert!(types.is_type(&c, &a));
        assert!(types.is_type(&b, &a));
        assert!(!types.is_type(&a, &b));
        assert!(!types.is_type(&a, &c));
    }

    #[test]
    fn values_wrap_into_nullable_which_stays_invariant() {
        let mut types = TypeContext::new();
        let a = declare_class(&mut types, "A", None);
        let b = declare_class(&mut types, "B", a.as_class());
        let nullable_a = types.nullable(a.clone()).unwrap();
        let nullable_b = types.nullable(b.clone()).unwrap();

        assert!(types.is_type(&b, &nullable_a));
        assert!(!types.is_type(&nullable_b, &nullable_a));
        assert!(types.is_type(&nullable_b, &nullable_b));
        assert!(!types.is_type(&nullable_a, &a));
    }

    #[test]
    fn nullable_only_wraps_complex_types() {
        let mut types = TypeContext::new();
        let i32 = types.int(IntKind::I32);
        let array = types.array(i32.clone());
        let nullable_array = types.nullable(array.clone());

        assert!(types.nullable(i32).is_none());
        assert!(nullable_array.is_some());
        assert!(types.nullable(nullable_array.unwrap()).is_none());
    }

    #[test]
    fn integers_and_arrays_are_invariant() {
        let mut types = TypeContext::new();
        let a = declare_class(&mut types, "A", None);
        let b = declare_class(&mut types, "B", a.as_class());
        let i32 = types.int(IntKind::I32);
        let u32 = types.int(IntKind::U32);
        let i64 = types.int(IntKind::I64);
        let array_a = types.array(a);
        let array_b = types.array(b);

        assert!(!types.is_type(&i32, &u32));
        assert!(!types.is_type(&i32, &i64));
        assert!(!types.is_type(&array_b, &array_a));
    }

    #[test]
    fn functions_have_covariant_returns_and_exact_parameters() {
        let mut types = TypeContext::new();
        let a = declare_class(&mut types, "A", None);
        let b = declare_class(&mut types, "B", a.as_class());

        let function = |types: &mut TypeContext, parameter: &Type, return_type: &Type| {
            types.function(FunctionType {
                parameters: Rc::from([parameter.clone()]),
                is_variadic: false,
                return_type: return_type.clone(),
                receiver: None,
            })
        };

        let a_to_b = function(&mut types, &a, &b);
        let a_to_a = function(&mut types, &a, &a);
        let b_to_a = function(&mut types, &b, &a);

        assert!(types.is_type(&a_to_b, &a_to_a));
        assert!(!types.is_type(&a_to_a, &a_to_b));
        assert!(!types.is_type(&b_to_a, &a_to_a));
        assert!(!types.is_type(&a_to_a, &b_to_a));
    }

    #[test]
    fn tuples_compare_positionally() {
        let mut types = TypeContext::new();
        let a = declare_class(&mut types, "A", None);
        let b = declare_class(&mut types, "B", a.as_class());
        let left = types.tuple([TupleField {
            name: InternedSymbol::new("first"),
            ty: b,
        }]);
        let right = types.tuple([TupleField {
            name: InternedSymbol::new("other"),
            ty: a,
        }]);

        assert!(types.is_type(&left, &right));
        assert!(!types.is_type(&right, &left));
    }

    #[test]
    fn types_are_interned() {
        let mut types = TypeContext::new();
        let first = types.int(IntKind::U8);
        let second = types.int(IntKind::U8);

        assert!(Rc::ptr_eq(&first.0, &second.0));
        assert_eq!(first.to_string(), "'u8'");
    }
}
