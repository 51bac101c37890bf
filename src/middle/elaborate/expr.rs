use std::rc::Rc;

use crate::{
    frontend::{
        Span,
        ast::{self, BinaryOperatorClass, BinaryOperatorKind, ExpressionKind, Intrinsic, UnaryOperatorKind},
        intern::InternedSymbol,
    },
    middle::{
        elaborate::{BodyElaborator, Narrowing, elaborate_function},
        error::{SemanticErrorKind, SemanticResult, WarningKind, error},
        primitive::IntKind,
        resolve::{ValueResolution, resolve_class, resolve_data_type, resolve_type, resolve_value},
        scope::{FlowKey, Scope, ScopeKind},
        session::{FunctionDefinition, FunctionKind, GlobalId, GlobalKind},
        tir::{self, Callee, Expression, FormatPiece, FormatStyle, LocalId, Place, ValueBlock, Variable},
        ty::{ClassId, ClassProperty, FunctionType, PropertyKind, TupleField, Type, TypeKind},
    },
};

/// A member access resolves either to a value or to a bound method which can
/// only be called
pub(super) enum MemberAccess {
    Value(Rc<Expression>),
    Method { callee: Callee, ty: FunctionType },
}

impl BodyElaborator<'_, '_> {
    /// Elaborates an expression whose value is used. The result satisfies
    /// `expected` when one is given.
    pub(super) fn elaborate_value(
        &mut self,
        expression: &ast::Expression,
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let value = self.elaborate_expression(expression, expected)?;

        if value.ty.is_void() {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                value.span,
                "expression of type 'void' has no value",
            ));
        }

        if let Some(expected) = expected {
            self.check_type(&value, expected)?;
        }

        Ok(value)
    }

    /// Elaborates a list of values in which tuple spreads expand into one
    /// value per field. `expected` gives the type of each resulting value by
    /// position, values past its end are unconstrained.
    pub(super) fn elaborate_expanded(
        &mut self,
        expressions: &[ast::Expression],
        expected: &[Option<Type>],
    ) -> SemanticResult<Vec<Rc<Expression>>> {
        let mut values = Vec::with_capacity(expressions.len());

        for expression in expressions {
            let ExpressionKind::Spread(inner) = &expression.kind else {
                let expected = expected.get(values.len()).and_then(Option::as_ref);
                values.push(self.elaborate_value(expression, expected)?);
                continue;
            };

            let tuple = self.elaborate_value(inner, None)?;
            let TypeKind::Tuple(fields) = &*tuple.ty else {
                return Err(error(
                    SemanticErrorKind::TypeMismatch,
                    expression.span,
                    format!("only tuples can be spread, found {}", tuple.ty),
                ));
            };

            for (index, field) in fields.iter().enumerate() {
                let value = self.expression(
                    expression.span,
                    field.ty.clone(),
                    tir::ExpressionKind::TupleField {
                        tuple: Rc::clone(&tuple),
                        index,
                    },
                );

                if let Some(Some(expected)) = expected.get(values.len()) {
                    self.check_type(&value, expected)?;
                }

                values.push(value);
            }
        }

        Ok(values)
    }

    /// Elaborates any expression, `void` calls included
    pub(super) fn elaborate_expression(
        &mut self,
        expression: &ast::Expression,
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let span = expression.span;

        match &expression.kind {
            ExpressionKind::IntegerLiteral(digits) => {
                self.integer_literal(span, *digits, false, expected)
            }
            ExpressionKind::StringLiteral(text) => {
                let i8 = self.session.types.int(IntKind::I8);
                let ty = self.session.types.array(i8);
                Ok(self.expression(span, ty, tir::ExpressionKind::String(*text)))
            }
            ExpressionKind::BooleanLiteral(value) => {
                let ty = self.session.types.bool();
                Ok(self.expression(span, ty, tir::ExpressionKind::Bool(*value)))
            }
            ExpressionKind::Null => match expected {
                Some(ty) if matches!(**ty, TypeKind::Nullable(_)) => {
                    Ok(self.expression(span, ty.clone(), tir::ExpressionKind::Null))
                }
                _ => Err(error(
                    SemanticErrorKind::TypeMismatch,
                    span,
                    "'null' can only be used where a nullable type is expected",
                )),
            },
            ExpressionKind::This => {
                let class = self.receiver_class(span)?;
                let ty = self.session.types.class(class);
                Ok(self.expression(span, ty, tir::ExpressionKind::This))
            }
            ExpressionKind::Path(path) => {
                match resolve_value(self.session, self.context, &self.scopes, self.receiver, path)? {
                    ValueResolution::Local(local) => self.read_local(span, local),
                    ValueResolution::ReceiverMember { class, property } => {
                        self.read_receiver_member(span, class, property)
                    }
                    ValueResolution::Global(global) => self.read_global(span, global),
                }
            }
            ExpressionKind::Member { object, name } => match self.member_access(span, object, name)? {
                MemberAccess::Value(value) => Ok(value),
                MemberAccess::Method { .. } => Err(error(
                    SemanticErrorKind::TypeMismatch,
                    name.span,
                    format!("method '{}' can only be called", name.symbol),
                )),
            },
            ExpressionKind::Call { target, arguments } => self.elaborate_call(span, target, arguments),
            ExpressionKind::Intrinsic {
                intrinsic,
                arguments,
            } => self.elaborate_intrinsic(span, *intrinsic, arguments),
            ExpressionKind::New { class, arguments } => {
                let class = resolve_class(self.session, self.context, class)?;
                let Some(constructor) = self.session.types.classes[class].constructor else {
                    unreachable!("every class has a constructor once signatures are resolved")
                };
                let function = self.function_signature(self.session.function_type(constructor));
                let arguments = self.elaborate_arguments(span, &function, arguments)?;

                Ok(self.expression(
                    span,
                    function.return_type,
                    tir::ExpressionKind::New {
                        class,
                        constructor,
                        arguments,
                    },
                ))
            }
            ExpressionKind::ArrayLiteral {
                element_type,
                elements,
            } => self.elaborate_array_literal(span, element_type.as_deref(), elements, expected),
            ExpressionKind::ArrayGenerator {
                element_type,
                length,
                generator,
            } => {
                let element = self
                    .array_element_type(element_type.as_deref(), expected)?
                    .ok_or_else(|| {
                        error(
                            SemanticErrorKind::UnresolvedType,
                            span,
                            "cannot infer the element type of the array generator",
                        )
                    })?;
                let u32 = self.session.types.int(IntKind::U32);
                let generator_type = self.session.types.function(FunctionType {
                    parameters: Rc::from([u32.clone()]),
                    is_variadic: false,
                    return_type: element.clone(),
                    receiver: None,
                });
                let ty = self.session.types.array(element);

                let length = self.elaborate_value(length, Some(&u32))?;
                let generator = self.elaborate_value(generator, Some(&generator_type))?;

                Ok(self.expression(
                    span,
                    ty,
                    tir::ExpressionKind::ArrayGenerator { length, generator },
                ))
            }
            ExpressionKind::Index { array, index } => {
                let (array, index, element) = self.elaborate_index(array, index)?;
                Ok(self.expression(span, element, tir::ExpressionKind::Index { array, index }))
            }
            ExpressionKind::Tuple(fields) => self.elaborate_tuple(span, fields, expected),
            ExpressionKind::Spread(_) => Err(error(
                SemanticErrorKind::TypeMismatch,
                span,
                "a spread is only allowed in argument, declaration and assignment lists",
            )),
            ExpressionKind::Binary { operator, .. }
                if operator.kind == BinaryOperatorKind::LogicalAnd =>
            {
                Ok(self.elaborate_condition(expression)?.0)
            }
            ExpressionKind::Binary { lhs, operator, rhs }
                if operator.kind == BinaryOperatorKind::LogicalOr =>
            {
                let bool = self.session.types.bool();
                let lhs = self.elaborate_value(lhs, Some(&bool))?;
                let (rhs, _) = self.in_scope(ScopeKind::Branch, &[], |this| {
                    this.elaborate_value(rhs, Some(&bool))
                })?;

                Ok(self.expression(
                    span,
                    bool,
                    tir::ExpressionKind::Logical {
                        is_and: false,
                        lhs,
                        rhs,
                    },
                ))
            }
            ExpressionKind::Binary { lhs, operator, rhs } => {
                self.elaborate_binary(span, lhs, *operator, rhs)
            }
            ExpressionKind::Unary { operator, operand } => {
                self.elaborate_unary(span, *operator, operand, expected)
            }
            ExpressionKind::PostIncrement {
                target,
                is_decrement,
            } => {
                let (place, ty) = self.elaborate_integer_place(target)?;
                Ok(self.expression(
                    span,
                    ty,
                    tir::ExpressionKind::PostIncrement {
                        place,
                        is_decrement: *is_decrement,
                    },
                ))
            }
            ExpressionKind::Cast { expression, ty } => self.elaborate_cast(span, expression, ty),
            ExpressionKind::Is { expression, ty } => Ok(self.elaborate_is(span, expression, ty)?.0),
            ExpressionKind::NonNullAssertion(operand) => {
                let value = self.elaborate_value(operand, None)?;
                let TypeKind::Nullable(inner) = &*value.ty else {
                    return Err(error(
                        SemanticErrorKind::TypeMismatch,
                        span,
                        format!("'!!' needs a nullable operand, found {}", value.ty),
                    ));
                };
                let inner = inner.clone();

                if let Some(local) = value.as_local() {
                    self.scopes.narrow(FlowKey::Local(local), inner.clone());
                }

                Ok(self.expression(span, inner, tir::ExpressionKind::NonNull(value)))
            }
            ExpressionKind::Lambda(lambda) => self.elaborate_lambda(span, lambda, expected),
            ExpressionKind::Block(block) => {
                let (value, scope) = self.value_block(ScopeKind::Block, &[], block, expected)?;
                self.scopes.adopt(&scope);

                let ty = self.block_type(&value, expected);
                Ok(self.expression(span, ty, tir::ExpressionKind::Block(Box::new(value))))
            }
            ExpressionKind::If {
                branches,
                otherwise,
            } => {
                let Some(otherwise) = otherwise else {
                    return Err(error(
                        SemanticErrorKind::MissingElseBranch,
                        span,
                        "'if' used as a value needs an 'else' branch",
                    ));
                };

                self.elaborate_if_value(span, branches, otherwise, expected)
            }
        }
    }

    fn integer_literal(
        &mut self,
        span: Span,
        digits: InternedSymbol,
        is_negative: bool,
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let out_of_range = |message: String| error(SemanticErrorKind::IntegerLiteralOutOfRange, span, message);
        let sign = if is_negative { "-" } else { "" };

        let magnitude = digits
            .value()
            .replace('_', "")
            .parse::<u64>()
            .map_err(|_| out_of_range(format!("{sign}{digits} does not fit in any integer type")))?;
        let fits = |kind: &IntKind| {
            if is_negative {
                kind.fits_negated(magnitude)
            } else {
                kind.fits(magnitude)
            }
        };

        let kind = match expected.and_then(|ty| ty.as_integer()) {
            Some(kind) if fits(&kind) => kind,
            Some(kind) => {
                return Err(out_of_range(format!("{sign}{digits} does not fit in '{kind}'")));
            }
            None if is_negative => [IntKind::I32, IntKind::I64]
                .into_iter()
                .find(fits)
                .ok_or_else(|| out_of_range(format!("-{digits} does not fit in any integer type")))?,
            None => IntKind::for_unconstrained_literal(magnitude)
                .ok_or_else(|| out_of_range(format!("{digits} does not fit in any integer type")))?,
        };

        let bits = if is_negative {
            magnitude.wrapping_neg()
        } else {
            magnitude
        };
        let ty = self.session.types.int(kind);

        Ok(self.expression(span, ty, tir::ExpressionKind::Integer(bits)))
    }

    fn read_local(&mut self, span: Span, local: LocalId) -> SemanticResult<Rc<Expression>> {
        let key = FlowKey::Local(local);

        if !self.scopes.is_initialized(key) {
            return Err(error(
                SemanticErrorKind::UninitializedUse,
                span,
                format!("'{}' is used before being initialized", self.locals[local].name),
            )
            .with_span(self.locals[local].span));
        }

        let ty = self
            .scopes
            .narrowed_type(key)
            .cloned()
            .unwrap_or_else(|| self.locals[local].ty.clone());

        Ok(self.expression(span, ty, tir::ExpressionKind::Variable(Variable::Local(local))))
    }

    fn read_receiver_member(
        &mut self,
        span: Span,
        class: ClassId,
        property: usize,
    ) -> SemanticResult<Rc<Expression>> {
        let ClassProperty { name, ty, kind, .. } =
            self.session.types.classes[class].properties[property].clone();

        if kind != PropertyKind::Field {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                span,
                format!("method '{name}' can only be called"),
            ));
        }

        if !self.scopes.is_initialized(FlowKey::Member(property)) {
            return Err(error(
                SemanticErrorKind::UninitializedUse,
                span,
                format!("property '{name}' is used before being initialized"),
            ));
        }

        Ok(self.expression(
            span,
            ty,
            tir::ExpressionKind::Variable(Variable::ReceiverMember { class, property }),
        ))
    }

    fn read_global(&mut self, span: Span, global: GlobalId) -> SemanticResult<Rc<Expression>> {
        let definition = &self.session.globals[global];
        let Some(ty) = definition.ty.clone() else {
            return Err(error(
                SemanticErrorKind::UnresolvedType,
                span,
                format!(
                    "the type of '{}' is not known here, annotate it or declare it earlier",
                    definition.name
                ),
            )
            .with_span(definition.span));
        };

        let kind = match definition.kind {
            GlobalKind::Function(function) => tir::ExpressionKind::FunctionRef(function),
            GlobalKind::Variable { .. } => tir::ExpressionKind::Variable(Variable::Global(global)),
        };

        Ok(self.expression(span, ty, kind))
    }

    pub(super) fn class_property(
        &self,
        class: ClassId,
        name: &ast::Identifier,
    ) -> SemanticResult<(usize, ClassProperty)> {
        let definition = &self.session.types.classes[class];

        definition
            .property_index(name.symbol)
            .map(|index| (index, definition.properties[index].clone()))
            .ok_or_else(|| {
                error(
                    SemanticErrorKind::UnknownIdentifier,
                    name.span,
                    format!("class '{}' has no member '{}'", definition.name, name.symbol),
                )
            })
    }

    fn member_access(
        &mut self,
        span: Span,
        object: &ast::Expression,
        name: &ast::Identifier,
    ) -> SemanticResult<MemberAccess> {
        let object = self.elaborate_value(object, None)?;

        match &*object.ty {
            TypeKind::Class { id, .. } => {
                let class = *id;
                let (property, definition) = self.class_property(class, name)?;

                match definition.kind {
                    PropertyKind::Field if matches!(object.kind, tir::ExpressionKind::This) => {
                        self.read_receiver_member(span, class, property).map(MemberAccess::Value)
                    }
                    PropertyKind::Field => Ok(MemberAccess::Value(self.expression(
                        span,
                        definition.ty,
                        tir::ExpressionKind::Member {
                            object,
                            class,
                            property,
                        },
                    ))),
                    PropertyKind::VirtualMethod(_) => Ok(MemberAccess::Method {
                        ty: self.function_signature(&definition.ty),
                        callee: Callee::Virtual {
                            receiver: object,
                            class,
                            property,
                        },
                    }),
                    PropertyKind::Method(function) => Ok(MemberAccess::Method {
                        ty: self.function_signature(&definition.ty),
                        callee: Callee::Method {
                            function,
                            receiver: object,
                        },
                    }),
                }
            }
            TypeKind::Tuple(fields) => {
                let Some((index, field)) = fields
                    .iter()
                    .enumerate()
                    .find(|(_, f)| f.name == name.symbol)
                else {
                    return Err(error(
                        SemanticErrorKind::UnknownIdentifier,
                        name.span,
                        format!("{} has no field '{}'", object.ty, name.symbol),
                    ));
                };
                let ty = field.ty.clone();

                Ok(MemberAccess::Value(self.expression(
                    span,
                    ty,
                    tir::ExpressionKind::TupleField {
                        tuple: object,
                        index,
                    },
                )))
            }
            TypeKind::Nullable(_) => Err(error(
                SemanticErrorKind::TypeMismatch,
                span,
                format!(
                    "cannot access '{}' on a value of nullable type {}",
                    name.symbol, object.ty
                ),
            )),
            _ => Err(error(
                SemanticErrorKind::UnknownIdentifier,
                name.span,
                format!("{} has no member '{}'", object.ty, name.symbol),
            )),
        }
    }

    fn function_signature(&self, ty: &Type) -> FunctionType {
        match ty.as_function() {
            Some(function) => function.clone(),
            None => unreachable!("methods and constructors always have function types"),
        }
    }

    fn elaborate_call(
        &mut self,
        span: Span,
        target: &ast::Expression,
        arguments: &[ast::Expression],
    ) -> SemanticResult<Rc<Expression>> {
        let (callee, function) = self.elaborate_callee(target)?;
        let arguments = self.elaborate_arguments(span, &function, arguments)?;

        Ok(self.expression(
            span,
            function.return_type,
            tir::ExpressionKind::Call { callee, arguments },
        ))
    }

    fn elaborate_callee(&mut self, target: &ast::Expression) -> SemanticResult<(Callee, FunctionType)> {
        match &target.kind {
            ExpressionKind::Path(path) => {
                let resolution =
                    resolve_value(self.session, self.context, &self.scopes, self.receiver, path)?;

                if let Some(callee) = self.direct_callee(target.span, resolution) {
                    return Ok(callee);
                }
            }
            ExpressionKind::Member { object, name } => {
                return match self.member_access(target.span, object, name)? {
                    MemberAccess::Method { callee, ty } => Ok((callee, ty)),
                    MemberAccess::Value(value) => self.indirect_callee(value),
                };
            }
            _ => {}
        }

        let value = self.elaborate_value(target, None)?;
        self.indirect_callee(value)
    }

    /// Named functions and methods of the receiver are called without going
    /// through a function value
    fn direct_callee(
        &mut self,
        span: Span,
        resolution: ValueResolution,
    ) -> Option<(Callee, FunctionType)> {
        match resolution {
            ValueResolution::Global(global) => match self.session.globals[global].kind {
                GlobalKind::Function(function) => Some((
                    Callee::Function(function),
                    self.function_signature(self.session.function_type(function)),
                )),
                GlobalKind::Variable { .. } => None,
            },
            ValueResolution::ReceiverMember { class, property } => {
                let definition = self.session.types.classes[class].properties[property].clone();
                let receiver_type = self.session.types.class(class);
                let ty = self.function_signature(&definition.ty);

                let callee = match definition.kind {
                    PropertyKind::Field => return None,
                    PropertyKind::VirtualMethod(_) => Callee::Virtual {
                        receiver: self.expression(span, receiver_type, tir::ExpressionKind::This),
                        class,
                        property,
                    },
                    PropertyKind::Method(function) => Callee::Method {
                        function,
                        receiver: self.expression(span, receiver_type, tir::ExpressionKind::This),
                    },
                };

                Some((callee, ty))
            }
            ValueResolution::Local(_) => None,
        }
    }

    fn indirect_callee(&mut self, value: Rc<Expression>) -> SemanticResult<(Callee, FunctionType)> {
        let Some(function) = value
            .ty
            .as_function()
            .filter(|f| f.receiver.is_none())
            .cloned()
        else {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                value.span,
                format!("expected a function, found {}", value.ty),
            ));
        };

        Ok((Callee::Indirect(value), function))
    }

    fn elaborate_arguments(
        &mut self,
        span: Span,
        function: &FunctionType,
        arguments: &[ast::Expression],
    ) -> SemanticResult<Vec<Rc<Expression>>> {
        let expected = function
            .parameters
            .iter()
            .cloned()
            .map(Some)
            .collect::<Vec<_>>();
        let values = self.elaborate_expanded(arguments, &expected)?;

        let count = function.parameters.len();
        let matches = if function.is_variadic {
            values.len() >= count
        } else {
            values.len() == count
        };

        if !matches {
            let at_least = if function.is_variadic { "at least " } else { "" };

            return Err(error(
                SemanticErrorKind::ArityMismatch,
                span,
                format!("expected {at_least}{count} arguments, found {}", values.len()),
            ));
        }

        Ok(values)
    }

    /// The element type given by an annotation or by the expected array type
    fn array_element_type(
        &mut self,
        annotation: Option<&ast::Type>,
        expected: Option<&Type>,
    ) -> SemanticResult<Option<Type>> {
        if let Some(annotation) = annotation {
            return resolve_data_type(self.session, self.context, annotation).map(Some);
        }

        let expected = expected.map(|ty| match &**ty {
            TypeKind::Nullable(inner) => inner,
            _ => ty,
        });

        Ok(expected.and_then(|ty| match &**ty {
            TypeKind::Array(element) => Some(element.clone()),
            _ => None,
        }))
    }

    fn elaborate_array_literal(
        &mut self,
        span: Span,
        annotation: Option<&ast::Type>,
        elements: &[ast::Expression],
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let mut element = self.array_element_type(annotation, expected)?;
        let mut values = Vec::with_capacity(elements.len());

        for expression in elements {
            let value = self.elaborate_value(expression, element.as_ref())?;

            if element.is_none() {
                element = Some(value.ty.clone());
            }

            values.push(value);
        }

        let Some(element) = element else {
            return Err(error(
                SemanticErrorKind::UnresolvedType,
                span,
                "cannot infer the element type of an empty array literal",
            ));
        };
        let ty = self.session.types.array(element);

        Ok(self.expression(span, ty, tir::ExpressionKind::ArrayLiteral(values)))
    }

    fn elaborate_index(
        &mut self,
        array: &ast::Expression,
        index: &ast::Expression,
    ) -> SemanticResult<(Rc<Expression>, Rc<Expression>, Type)> {
        let array = self.elaborate_value(array, None)?;
        let TypeKind::Array(element) = &*array.ty else {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                array.span,
                format!("cannot index into a value of type {}", array.ty),
            ));
        };
        let element = element.clone();

        let i32 = self.session.types.int(IntKind::I32);
        let index = self.elaborate_value(index, Some(&i32))?;

        Ok((array, index, element))
    }

    fn elaborate_tuple(
        &mut self,
        span: Span,
        fields: &[ast::TupleField],
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let hints = match expected.map(|ty| &**ty) {
            Some(TypeKind::Tuple(fields)) => fields.iter().map(|f| f.ty.clone()).collect(),
            _ => Vec::new(),
        };
        let mut values = Vec::with_capacity(fields.len());
        let mut types = Vec::with_capacity(fields.len());

        for (index, field) in fields.iter().enumerate() {
            if let Some(previous) = fields[..index].iter().find(|f| f.name.symbol == field.name.symbol) {
                return Err(error(
                    SemanticErrorKind::DuplicateDeclaration,
                    field.name.span,
                    format!("tuple field '{}' is declared twice", field.name.symbol),
                )
                .with_span(previous.name.span));
            }

            let value = self.elaborate_value(&field.value, hints.get(index))?;
            types.push(TupleField {
                name: field.name.symbol,
                ty: value.ty.clone(),
            });
            values.push(value);
        }

        let ty = self.session.types.tuple(types);
        Ok(self.expression(span, ty, tir::ExpressionKind::Tuple(values)))
    }

    fn elaborate_binary(
        &mut self,
        span: Span,
        lhs: &ast::Expression,
        operator: ast::BinaryOperator,
        rhs: &ast::Expression,
    ) -> SemanticResult<Rc<Expression>> {
        // a literal operand takes its type from the other side
        let (lhs, rhs) = match (is_integer_literal(lhs), is_integer_literal(rhs)) {
            (true, false) => {
                let rhs = self.elaborate_value(rhs, None)?;
                let hint = rhs.ty.as_integer().map(|_| rhs.ty.clone());
                (self.elaborate_value(lhs, hint.as_ref())?, rhs)
            }
            (_, true) => {
                let lhs = self.elaborate_value(lhs, None)?;
                let hint = lhs.ty.as_integer().map(|_| lhs.ty.clone());
                let rhs = self.elaborate_value(rhs, hint.as_ref())?;
                (lhs, rhs)
            }
            (false, false) => (self.elaborate_value(lhs, None)?, self.elaborate_value(rhs, None)?),
        };

        let (Some(left), Some(right)) = (lhs.ty.as_integer(), rhs.ty.as_integer()) else {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                operator.span,
                format!(
                    "operator '{}' needs integer operands, found {} and {}",
                    operator.kind, lhs.ty, rhs.ty
                ),
            ));
        };

        if left.bit_width() == right.bit_width() && left != right {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                operator.span,
                format!(
                    "operands of '{}' mix signedness: {} and {}",
                    operator.kind, lhs.ty, rhs.ty
                ),
            ));
        }

        let (lhs, rhs) = if left.bit_width() < right.bit_width() {
            (self.widen(lhs, &rhs.ty), rhs)
        } else if right.bit_width() < left.bit_width() {
            let rhs = self.widen(rhs, &lhs.ty);
            (lhs, rhs)
        } else {
            (lhs, rhs)
        };

        let ty = match operator.kind.class() {
            BinaryOperatorClass::Arithmetic => lhs.ty.clone(),
            BinaryOperatorClass::Comparison => self.session.types.bool(),
            BinaryOperatorClass::Logical => unreachable!("logical operators are elaborated separately"),
        };

        Ok(self.expression(
            span,
            ty,
            tir::ExpressionKind::Binary {
                operator: operator.kind,
                lhs,
                rhs,
            },
        ))
    }

    fn widen(&mut self, value: Rc<Expression>, to: &Type) -> Rc<Expression> {
        self.expression(value.span, to.clone(), tir::ExpressionKind::IntCast(value))
    }

    /// Elaborates a `bool` condition together with the narrowings which hold
    /// while it is true
    pub(super) fn elaborate_condition(
        &mut self,
        condition: &ast::Expression,
    ) -> SemanticResult<(Rc<Expression>, Vec<Narrowing>)> {
        match &condition.kind {
            ExpressionKind::Binary { lhs, operator, rhs }
                if operator.kind == BinaryOperatorKind::LogicalAnd =>
            {
                let (lhs, mut narrowings) = self.elaborate_condition(lhs)?;
                let ((rhs, more), _) = self.in_scope(ScopeKind::Branch, &narrowings, |this| {
                    this.elaborate_condition(rhs)
                })?;
                narrowings.extend(more);

                let bool = self.session.types.bool();
                let value = self.expression(
                    condition.span,
                    bool,
                    tir::ExpressionKind::Logical {
                        is_and: true,
                        lhs,
                        rhs,
                    },
                );

                Ok((value, narrowings))
            }
            ExpressionKind::Is { expression, ty } => {
                let (value, narrowing) = self.elaborate_is(condition.span, expression, ty)?;
                Ok((value, narrowing.into_iter().collect()))
            }
            _ => {
                let bool = self.session.types.bool();
                Ok((self.elaborate_value(condition, Some(&bool))?, Vec::new()))
            }
        }
    }

    fn elaborate_unary(
        &mut self,
        span: Span,
        operator: ast::UnaryOperator,
        operand: &ast::Expression,
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        if let (UnaryOperatorKind::Negate, ExpressionKind::IntegerLiteral(digits)) =
            (operator.kind, &operand.kind)
        {
            return self.integer_literal(span, *digits, true, expected);
        }

        let (operand, ty) = if operator.kind == UnaryOperatorKind::LogicalNot {
            let bool = self.session.types.bool();
            (self.elaborate_value(operand, Some(&bool))?, bool)
        } else {
            let hint = expected.filter(|ty| ty.as_integer().is_some());
            let operand = self.elaborate_value(operand, hint)?;

            match operand.ty.as_integer() {
                Some(kind) if kind.supports_unary_op(operator.kind) => {
                    let ty = operand.ty.clone();
                    (operand, ty)
                }
                _ => {
                    return Err(error(
                        SemanticErrorKind::TypeMismatch,
                        operator.span,
                        format!("operator '{}' is not supported by {}", operator.kind, operand.ty),
                    ));
                }
            }
        };

        Ok(self.expression(
            span,
            ty,
            tir::ExpressionKind::Unary {
                operator: operator.kind,
                operand,
            },
        ))
    }

    fn elaborate_cast(
        &mut self,
        span: Span,
        operand: &ast::Expression,
        ty: &ast::Type,
    ) -> SemanticResult<Rc<Expression>> {
        let target = resolve_data_type(self.session, self.context, ty)?;
        let value = self.elaborate_value(operand, None)?;

        if let (Some(from), Some(to)) = (value.ty.as_integer(), target.as_integer()) {
            if from == to {
                self.session.warn(
                    WarningKind::RedundantCast,
                    span,
                    format!("value already has type {target}"),
                );
                return Ok(value);
            }

            return Ok(self.expression(span, target, tir::ExpressionKind::IntCast(value)));
        }

        let (Some(from), Some(to)) = (value.ty.as_class(), target.as_class()) else {
            return Err(error(
                SemanticErrorKind::IllegalCast,
                span,
                format!(
                    "cannot cast {} to {target}, only integer and class casts are allowed",
                    value.ty
                ),
            ));
        };

        if self.session.types.is_subclass(from, to) {
            self.session.warn(
                WarningKind::RedundantCast,
                span,
                format!("{} is always an instance of {target}", value.ty),
            );
        } else if self.session.types.is_subclass(to, from) {
            if let Some(local) = value.as_local() {
                self.scopes.narrow(FlowKey::Local(local), target.clone());
            }
        } else {
            return Err(error(
                SemanticErrorKind::IllegalCast,
                span,
                format!("cannot cast {} to unrelated class {target}", value.ty),
            ));
        }

        Ok(self.expression(
            span,
            target,
            tir::ExpressionKind::ClassCast {
                operand: value,
                class: to,
            },
        ))
    }

    /// The check together with the narrowing it establishes when true
    fn elaborate_is(
        &mut self,
        span: Span,
        operand: &ast::Expression,
        ty: &ast::Type,
    ) -> SemanticResult<(Rc<Expression>, Option<Narrowing>)> {
        let target = resolve_data_type(self.session, self.context, ty)?;
        let value = self.elaborate_value(operand, None)?;

        let (Some(from), Some(to)) = (value.ty.as_class(), target.as_class()) else {
            return Err(error(
                SemanticErrorKind::IllegalIsCheck,
                span,
                format!("'is' needs class operands, found {} and {target}", value.ty),
            ));
        };

        if self.session.types.is_subclass(from, to) {
            self.session.warn(
                WarningKind::RedundantTypeCheck,
                span,
                format!("{} is always an instance of {target}", value.ty),
            );
        } else if !self.session.types.is_subclass(to, from) {
            return Err(error(
                SemanticErrorKind::IllegalIsCheck,
                span,
                format!("{} can never be an instance of unrelated class {target}", value.ty),
            ));
        }

        let narrowing = value.as_local().map(|local| (FlowKey::Local(local), target));
        let bool = self.session.types.bool();
        let check = self.expression(
            span,
            bool,
            tir::ExpressionKind::Is {
                operand: value,
                class: to,
            },
        );

        Ok((check, narrowing))
    }

    /// Lambdas become functions of their own. Omitted parameter and return
    /// types come from the expected function type.
    fn elaborate_lambda(
        &mut self,
        span: Span,
        lambda: &ast::Lambda,
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let expected = expected
            .and_then(|ty| ty.as_function())
            .filter(|f| f.receiver.is_none())
            .cloned();

        if let Some(expected) = &expected {
            if expected.parameters.len() != lambda.parameters.len() {
                return Err(error(
                    SemanticErrorKind::ArityMismatch,
                    span,
                    format!(
                        "expected a function of {} parameters, found {}",
                        expected.parameters.len(),
                        lambda.parameters.len()
                    ),
                ));
            }
        }

        let mut parameters = Vec::with_capacity(lambda.parameters.len());
        for (index, parameter) in lambda.parameters.iter().enumerate() {
            if let Some(previous) = lambda.parameters[..index]
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

            let ty = match (&parameter.ty, &expected) {
                (Some(ty), _) => resolve_data_type(self.session, self.context, ty)?,
                (None, Some(expected)) => expected.parameters[index].clone(),
                (None, None) => {
                    return Err(error(
                        SemanticErrorKind::UnresolvedType,
                        parameter.name.span,
                        format!("cannot infer the type of parameter '{}'", parameter.name.symbol),
                    ));
                }
            };
            parameters.push(ty);
        }

        let return_type = match (&lambda.return_type, &expected) {
            (Some(ty), _) => resolve_type(self.session, self.context, ty)?,
            (None, Some(expected)) => expected.return_type.clone(),
            (None, None) => self.session.types.void(),
        };
        let ty = self.session.types.function(FunctionType {
            parameters: parameters.into(),
            is_variadic: false,
            return_type,
            receiver: None,
        });

        let name = self.session.next_lambda_name();
        let package = self.context.package;
        let symbol = self.session.qualified_name(package, name);
        let function = self.session.functions.push(FunctionDefinition {
            name,
            package,
            symbol,
            span,
            kind: FunctionKind::Lambda,
            ty: Some(ty.clone()),
            body: None,
        });

        let names = lambda.parameters.iter().map(|p| &p.name).collect::<Vec<_>>();
        elaborate_function(self.session, self.context, function, &names, &lambda.body)?;

        Ok(self.expression(span, ty, tir::ExpressionKind::FunctionRef(function)))
    }

    /// Elaborates a block whose trailing expression is its value. A trailing
    /// `void` expression or `if` without `else` is a plain statement and
    /// leaves the block without a value.
    pub(super) fn value_block(
        &mut self,
        kind: ScopeKind,
        narrowings: &[Narrowing],
        block: &ast::Block,
        expected: Option<&Type>,
    ) -> SemanticResult<(ValueBlock, Scope)> {
        let ((statements, value), scope) = self.in_scope(kind, narrowings, |this| {
            let tail = block.split_tail().filter(|(_, tail)| {
                !matches!(tail.kind, ExpressionKind::If { otherwise: None, .. })
            });
            let Some((statements, tail)) = tail else {
                return Ok((this.elaborate_statements(&block.statements)?, None));
            };

            let mut statements = this.elaborate_statements(statements)?;
            let value = this.elaborate_expression(tail, expected)?;

            if value.ty.is_void() {
                statements.push(tir::Statement::Expression(value));
                return Ok((statements, None));
            }

            if let Some(expected) = expected {
                this.check_type(&value, expected)?;
            }

            Ok((statements, Some(value)))
        })?;

        let block = tir::Block::new(statements, scope.declared.clone());
        Ok((ValueBlock { block, value }, scope))
    }

    fn block_type(&mut self, block: &ValueBlock, expected: Option<&Type>) -> Type {
        match (&block.value, expected) {
            (Some(value), _) => value.ty.clone(),
            (None, Some(expected)) => expected.clone(),
            (None, None) => self.session.types.void(),
        }
    }

    fn elaborate_if_value(
        &mut self,
        span: Span,
        branches: &[ast::ConditionalBranch],
        otherwise: &ast::Block,
        expected: Option<&Type>,
    ) -> SemanticResult<Rc<Expression>> {
        let Some((first, rest)) = branches.split_first() else {
            unreachable!("an 'if' has at least one conditional branch")
        };

        let (condition, narrowings) = self.elaborate_condition(&first.condition)?;
        let before = self.scopes.current_flow();

        let (then, then_scope) =
            self.value_block(ScopeKind::Branch, &narrowings, &first.block, expected)?;

        // the first branch with a value decides the type of the others
        let expected = match (expected, &then.value) {
            (Some(expected), _) => Some(expected.clone()),
            (None, Some(value)) if !then_scope.all_paths_return => Some(value.ty.clone()),
            _ => None,
        };

        let (otherwise, otherwise_scope) = if rest.is_empty() {
            self.value_block(ScopeKind::Branch, &[], otherwise, expected.as_ref())?
        } else {
            let (value, scope) = self.in_scope(ScopeKind::Branch, &[], |this| {
                this.elaborate_if_value(span, rest, otherwise, expected.as_ref())
            })?;
            let block = ValueBlock {
                block: tir::Block::new(Vec::new(), scope.declared.clone()),
                value: Some(value),
            };

            (block, scope)
        };

        let ty = match expected {
            Some(ty) => ty,
            None => match (&otherwise.value, otherwise_scope.all_paths_return) {
                (Some(value), false) => value.ty.clone(),
                _ => self.block_type(&then, None),
            },
        };

        for (block, scope) in [(&then, &then_scope), (&otherwise, &otherwise_scope)] {
            if scope.all_paths_return {
                continue;
            }

            match &block.value {
                Some(value) => self.check_type(value, &ty)?,
                None => {
                    return Err(error(
                        SemanticErrorKind::TypeMismatch,
                        span,
                        format!("every branch of this 'if' must produce a value of type {ty}"),
                    ));
                }
            }
        }

        self.scopes
            .merge_branches(before, &[then_scope, otherwise_scope], true);

        Ok(self.expression(
            span,
            ty,
            tir::ExpressionKind::If {
                condition,
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        ))
    }

    /// Resolves an assignment target to a place and its declared type
    pub(super) fn elaborate_place(&mut self, target: &ast::Expression) -> SemanticResult<(Place, Type)> {
        let illegal = |message: String| error(SemanticErrorKind::IllegalAssignment, target.span, message);

        match &target.kind {
            ExpressionKind::Path(path) => {
                match resolve_value(self.session, self.context, &self.scopes, self.receiver, path)? {
                    ValueResolution::Local(local) => {
                        let definition = &self.locals[local];

                        if definition.is_constant {
                            return Err(illegal(format!("cannot assign to constant '{}'", definition.name))
                                .with_span(definition.span));
                        }

                        Ok((Place::Variable(Variable::Local(local)), definition.ty.clone()))
                    }
                    ValueResolution::ReceiverMember { class, property } => {
                        let definition = &self.session.types.classes[class].properties[property];

                        if definition.kind != PropertyKind::Field {
                            return Err(illegal(format!("cannot assign to method '{}'", definition.name)));
                        }

                        Ok((
                            Place::Variable(Variable::ReceiverMember { class, property }),
                            definition.ty.clone(),
                        ))
                    }
                    ValueResolution::Global(global) => {
                        let definition = &self.session.globals[global];
                        let (name, span, kind) = (definition.name, definition.span, definition.kind);

                        match kind {
                            GlobalKind::Function(_) => {
                                Err(illegal(format!("cannot assign to function '{name}'")))
                            }
                            GlobalKind::Variable { is_constant: true } => {
                                Err(illegal(format!("cannot assign to constant '{name}'")).with_span(span))
                            }
                            GlobalKind::Variable { is_constant: false } => {
                                let ty = self.read_global(target.span, global)?.ty.clone();
                                Ok((Place::Variable(Variable::Global(global)), ty))
                            }
                        }
                    }
                }
            }
            ExpressionKind::Member { object, name } => {
                let object = self.elaborate_value(object, None)?;
                let Some(class) = object.ty.as_class() else {
                    return Err(illegal(format!("cannot assign to a member of {}", object.ty)));
                };
                let (property, definition) = self.class_property(class, name)?;

                if definition.kind != PropertyKind::Field {
                    return Err(illegal(format!("cannot assign to method '{}'", definition.name)));
                }

                let place = if matches!(object.kind, tir::ExpressionKind::This) {
                    Place::Variable(Variable::ReceiverMember { class, property })
                } else {
                    Place::Member {
                        object,
                        class,
                        property,
                    }
                };

                Ok((place, definition.ty))
            }
            ExpressionKind::Index { array, index } => {
                let (array, index, element) = self.elaborate_index(array, index)?;

                Ok((
                    Place::Index {
                        array,
                        index,
                        span: target.span,
                    },
                    element,
                ))
            }
            _ => Err(illegal("this expression cannot be assigned to".to_owned())),
        }
    }

    /// A place updated in place by `+=` or `++`: it has to hold an
    /// initialized integer
    pub(super) fn elaborate_integer_place(
        &mut self,
        target: &ast::Expression,
    ) -> SemanticResult<(Place, Type)> {
        let (place, ty) = self.elaborate_place(target)?;

        let key = match &place {
            Place::Variable(Variable::Local(local)) => Some(FlowKey::Local(*local)),
            Place::Variable(Variable::ReceiverMember { property, .. }) => Some(FlowKey::Member(*property)),
            _ => None,
        };

        if key.is_some_and(|key| !self.scopes.is_initialized(key)) {
            return Err(error(
                SemanticErrorKind::UninitializedUse,
                target.span,
                "cannot update a variable before it is initialized",
            ));
        }

        if ty.as_integer().is_none() {
            return Err(error(
                SemanticErrorKind::TypeMismatch,
                target.span,
                format!("expected an integer, found {ty}"),
            ));
        }

        Ok((place, ty))
    }

    fn elaborate_intrinsic(
        &mut self,
        span: Span,
        intrinsic: Intrinsic,
        arguments: &[ast::Expression],
    ) -> SemanticResult<Rc<Expression>> {
        let invalid = |message: String| error(SemanticErrorKind::InvalidIntrinsicCall, span, message);

        match intrinsic {
            Intrinsic::Len | Intrinsic::Type => {
                let [argument] = arguments else {
                    return Err(invalid(format!(
                        "'{intrinsic}' takes exactly one argument, found {}",
                        arguments.len()
                    )));
                };
                let value = self.elaborate_value(argument, None)?;
                let i32 = self.session.types.int(IntKind::I32);

                let kind = match (intrinsic, &*value.ty) {
                    (Intrinsic::Len, TypeKind::Array(_)) => tir::ExpressionKind::Len(value),
                    (Intrinsic::Type, TypeKind::Class { .. }) => tir::ExpressionKind::TypeTag(value),
                    _ => {
                        return Err(error(
                            SemanticErrorKind::TypeMismatch,
                            value.span,
                            format!("'{intrinsic}' cannot be applied to {}", value.ty),
                        ));
                    }
                };

                Ok(self.expression(span, i32, kind))
            }
            Intrinsic::Println => {
                let Some((format, arguments)) = arguments.split_first() else {
                    return Err(invalid("'println' needs a format string".to_owned()));
                };
                let ExpressionKind::StringLiteral(text) = &format.kind else {
                    return Err(invalid("the format of 'println' must be a string literal".to_owned()));
                };

                let tokens = parse_format(text.value())
                    .map_err(|message| error(SemanticErrorKind::InvalidIntrinsicCall, format.span, message))?;
                let values = self.elaborate_expanded(arguments, &[])?;

                let placeholders = tokens
                    .iter()
                    .filter(|t| matches!(t, FormatToken::Placeholder(_)))
                    .count();
                if placeholders != values.len() {
                    return Err(invalid(format!(
                        "the format has {placeholders} placeholders but {} values were given",
                        values.len()
                    )));
                }

                let mut pieces = Vec::with_capacity(tokens.len());
                let mut index = 0;
                for token in tokens {
                    match token {
                        FormatToken::Text(text) => pieces.push(FormatPiece::Text(text)),
                        FormatToken::Placeholder(modifier) => {
                            let value = &values[index];
                            let style = format_style(modifier, &value.ty).ok_or_else(|| {
                                error(
                                    SemanticErrorKind::InvalidIntrinsicCall,
                                    value.span,
                                    format!(
                                        "{} cannot be formatted with '{{{}}}'",
                                        value.ty,
                                        modifier.map(String::from).unwrap_or_default()
                                    ),
                                )
                            })?;

                            pieces.push(FormatPiece::Argument { index, style });
                            index += 1;
                        }
                    }
                }

                let void = self.session.types.void();
                Ok(self.expression(
                    span,
                    void,
                    tir::ExpressionKind::Println {
                        pieces,
                        arguments: values,
                    },
                ))
            }
        }
    }
}

fn is_integer_literal(expression: &ast::Expression) -> bool {
    match &expression.kind {
        ExpressionKind::IntegerLiteral(_) => true,
        ExpressionKind::Unary { operator, operand } => {
            operator.kind == UnaryOperatorKind::Negate && is_integer_literal(operand)
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FormatToken {
    Text(String),
    /// `{}` or `{x}` with the modifier letter
    Placeholder(Option<char>),
}

/// Splits a `println` format into text and placeholders. `{{` and `}}`
/// escape literal braces.
fn parse_format(format: &str) -> Result<Vec<FormatToken>, String> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                text.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                text.push('}');
            }
            '{' => {
                let modifier = match chars.next() {
                    Some('}') => None,
                    Some(letter) if chars.next() == Some('}') => Some(letter),
                    _ => return Err("unterminated placeholder in format string".to_owned()),
                };

                if !text.is_empty() {
                    tokens.push(FormatToken::Text(std::mem::take(&mut text)));
                }
                tokens.push(FormatToken::Placeholder(modifier));
            }
            '}' => return Err("unmatched '}' in format string, use '}}' for a literal brace".to_owned()),
            c => text.push(c),
        }
    }

    if !text.is_empty() {
        tokens.push(FormatToken::Text(text));
    }

    Ok(tokens)
}

fn format_style(modifier: Option<char>, ty: &Type) -> Option<FormatStyle> {
    let is_text = matches!(&**ty, TypeKind::Array(element) if element.as_integer() == Some(IntKind::I8));

    match (modifier, &**ty) {
        (None, TypeKind::Bool) => Some(FormatStyle::Bool),
        (None, TypeKind::Integer(kind)) => Some(FormatStyle::Integer(*kind)),
        (None | Some('s'), _) if is_text => Some(FormatStyle::Text),
        (Some('x'), TypeKind::Integer(kind)) => Some(FormatStyle::Hex(*kind)),
        (Some('c'), TypeKind::Integer(IntKind::I8 | IntKind::U8)) => Some(FormatStyle::Char),
        _ => None,
    }
}
