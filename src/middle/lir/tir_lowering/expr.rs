use std::rc::Rc;

use crate::{
    frontend::{Span, ast::UnaryOperatorKind},
    middle::{
        lir::{self, Operand, runtime::RuntimeFunction},
        primitive::IntKind,
        tir::{self, Callee, ExpressionKind, FormatPiece, FormatStyle, Place, Variable},
        ty::{self, CLASS_TAG_FIELD, ClassId, PropertyKind, TypeKind},
    },
};

use super::{
    FunctionLowering, array_record,
    class::{INHERITANCES_SYMBOL, NAMES_SYMBOL},
    class_header, lower_type,
};

/// Sign extends the low bits of a literal so it prints as a signed value of
/// its own width
fn integer_immediate(bits: u64, kind: IntKind) -> Operand {
    let shift = 64 - kind.bit_width();
    Operand::Immediate(((bits << shift) as i64) >> shift)
}

fn element_type(array: &ty::Type) -> &ty::Type {
    match &**array {
        TypeKind::Array(element) => element,
        TypeKind::Nullable(inner) => element_type(inner),
        _ => unreachable!("indexing needs an array, found {array}"),
    }
}

fn integer_kind(ty: &ty::Type) -> IntKind {
    ty.as_integer()
        .unwrap_or_else(|| unreachable!("expected an integer, found {ty}"))
}

impl FunctionLowering<'_, '_, '_> {
    /// Lowers `expression` once, later visits of the same node reuse the value
    pub(super) fn lower_expression(&mut self, expression: &tir::Expression) -> Operand {
        if let Some(value) = self.values.get(&expression.id) {
            return value.clone();
        }

        let value = self.lower_expression_kind(expression);
        self.values.insert(expression.id, value.clone());
        value
    }

    fn lower_expression_kind(&mut self, expression: &tir::Expression) -> Operand {
        let ty = &expression.ty;

        match &expression.kind {
            ExpressionKind::Integer(bits) => integer_immediate(*bits, integer_kind(ty)),
            ExpressionKind::Bool(value) => Operand::Immediate(i64::from(*value)),
            ExpressionKind::String(text) => {
                let bytes = text.value().as_bytes().to_vec();
                let length = bytes.len() as i64;
                let data = self.module.constant(bytes);

                let string = self.call_runtime(
                    RuntimeFunction::StringConstructor,
                    vec![(lir::Type::I32, Operand::Immediate(length)), (lir::Type::Ptr, data)],
                );
                self.own_temporary(string.clone(), ty, true);
                string
            }
            ExpressionKind::Null => Operand::Null,
            ExpressionKind::This => self.receiver(),
            ExpressionKind::Variable(variable) => {
                let (pointer, ty) = self.variable_pointer(*variable);
                self.load(lower_type(&ty), pointer)
            }
            ExpressionKind::FunctionRef(function) => self.module.function_symbol(*function),
            ExpressionKind::Member {
                object,
                class,
                property,
            } => {
                let object = self.lower_expression(object);
                let kind = self.session.types.classes[*class].properties[*property].kind;

                match kind {
                    PropertyKind::Method(function) => self.module.function_symbol(function),
                    PropertyKind::Field | PropertyKind::VirtualMethod(_) => {
                        let (pointer, ty) = self.member_pointer(object, *class, *property);
                        self.load(lower_type(&ty), pointer)
                    }
                }
            }
            ExpressionKind::TupleField { tuple, index } => {
                let value = self.lower_expression(tuple);
                self.extract_value(lower_type(&tuple.ty), value, *index as u32)
            }
            ExpressionKind::Tuple(elements) => {
                let values = elements
                    .iter()
                    .map(|e| self.lower_expression(e))
                    .collect::<Vec<_>>();
                let layout = lower_type(ty);
                let lir::Type::Struct(fields) = &layout else {
                    unreachable!("tuples lower to structs")
                };

                let mut aggregate = Operand::Undef;
                for (index, value) in values.into_iter().enumerate() {
                    let destination = self.create_register(layout.clone());
                    self.push_instruction(lir::Instruction::InsertValue {
                        destination,
                        ty: layout.clone(),
                        aggregate,
                        field_type: fields[index].clone(),
                        value,
                        index: index as u32,
                    });
                    aggregate = destination.into();
                }

                aggregate
            }
            ExpressionKind::Call { callee, arguments } => self.lower_call(callee, arguments, ty),
            ExpressionKind::New {
                constructor,
                arguments,
                ..
            } => {
                let arguments = self.lower_arguments(arguments);
                let callee = self.module.function_symbol(*constructor);

                // constructed objects start out with one reference
                let object = self.call(lir::Type::Ptr, callee, arguments);
                self.own_temporary(object.clone(), ty, false);
                object
            }
            ExpressionKind::ArrayLiteral(elements) => {
                let values = elements
                    .iter()
                    .map(|e| self.lower_expression(e))
                    .collect::<Vec<_>>();
                self.lower_array_literal(expression, values)
            }
            ExpressionKind::ArrayGenerator { length, generator } => {
                self.lower_array_generator(expression, length, generator)
            }
            ExpressionKind::Index { array, index } => {
                let element = lower_type(element_type(&array.ty));
                let array_value = self.lower_expression(array);
                let index = self.lower_expression(index);

                let pointer = self.element_pointer(array_value, element.size(), index, expression.span);
                self.load(element, pointer)
            }
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let lhs_value = self.lower_expression(lhs);
                let rhs_value = self.lower_expression(rhs);
                let is_signed = integer_kind(&lhs.ty).is_signed();
                let operand_type = lower_type(&lhs.ty);

                if let Some(operation) = lir::BinaryOperation::for_operator(*operator, is_signed) {
                    self.binary(operation, operand_type, lhs_value, rhs_value)
                } else if let Some(predicate) = lir::Predicate::for_operator(*operator, is_signed) {
                    self.compare(predicate, operand_type, lhs_value, rhs_value)
                } else {
                    unreachable!("'{operator}' is not an integer operator")
                }
            }
            ExpressionKind::Logical { is_and, lhs, rhs } => self.lower_logical(*is_and, lhs, rhs),
            ExpressionKind::Unary { operator, operand } => {
                let value = self.lower_expression(operand);
                let operand_type = lower_type(&operand.ty);

                match operator {
                    UnaryOperatorKind::Plus => value,
                    UnaryOperatorKind::Negate => {
                        self.binary(lir::BinaryOperation::Sub, operand_type, Operand::Immediate(0), value)
                    }
                    UnaryOperatorKind::BitwiseNot => {
                        self.binary(lir::BinaryOperation::Xor, operand_type, value, Operand::Immediate(-1))
                    }
                    UnaryOperatorKind::LogicalNot => {
                        self.binary(lir::BinaryOperation::Xor, operand_type, value, Operand::Immediate(1))
                    }
                }
            }
            ExpressionKind::IntCast(operand) => {
                let value = self.lower_expression(operand);
                self.resize_integer(value, integer_kind(&operand.ty), integer_kind(ty).bit_width())
            }
            ExpressionKind::ClassCast { operand, class } => {
                let value = self.lower_expression(operand);
                let location = self.module.location(expression.span);

                self.call_runtime(
                    RuntimeFunction::IsSubclassAssert,
                    vec![
                        (lir::Type::Ptr, value.clone()),
                        (lir::Type::I32, class_tag(*class)),
                        (lir::Type::Ptr, Operand::Global(INHERITANCES_SYMBOL.to_owned())),
                        (lir::Type::Ptr, Operand::Global(NAMES_SYMBOL.to_owned())),
                        (lir::Type::Ptr, location),
                    ],
                );
                value
            }
            ExpressionKind::Is { operand, class } => {
                let value = self.lower_expression(operand);

                self.call_runtime(
                    RuntimeFunction::IsSubclass,
                    vec![
                        (lir::Type::Ptr, value),
                        (lir::Type::I32, class_tag(*class)),
                        (lir::Type::Ptr, Operand::Global(INHERITANCES_SYMBOL.to_owned())),
                    ],
                )
            }
            ExpressionKind::NonNull(operand) => {
                let value = self.lower_expression(operand);
                let location = self.module.location(expression.span);

                self.call_runtime(
                    RuntimeFunction::NullAssert,
                    vec![(lir::Type::Ptr, value.clone()), (lir::Type::Ptr, location)],
                );
                value
            }
            ExpressionKind::Block(block) => {
                let value = self.lower_value_block(block).unwrap_or(Operand::Undef);
                self.own_temporary(value.clone(), ty, false);
                value
            }
            ExpressionKind::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.lower_expression(condition);
                let then_block = self.create_block();
                let else_block = self.create_block();
                let merge = self.create_block();
                self.branch(condition, then_block, else_block);

                let mut sources = Vec::with_capacity(2);
                for (block, branch) in [(then_block, then), (else_block, otherwise)] {
                    self.switch_to(block);
                    let value = self.lower_value_block(branch);

                    if self.reachable {
                        sources.push((value.unwrap_or(Operand::Undef), self.current_block));
                        self.jump(merge);
                    }
                }

                let value = self.merge_values(merge, lower_type(ty), sources);
                self.own_temporary(value.clone(), ty, false);
                value
            }
            ExpressionKind::PostIncrement { place, is_decrement } => {
                let (pointer, place_type) = self.place_pointer(place);
                let lowered = lower_type(&place_type);
                let operation = if *is_decrement {
                    lir::BinaryOperation::Sub
                } else {
                    lir::BinaryOperation::Add
                };

                let old = self.load(lowered.clone(), pointer.clone());
                let new = self.binary(operation, lowered.clone(), old.clone(), Operand::Immediate(1));
                self.store(lowered, new, pointer);
                old
            }
            ExpressionKind::Len(array) => {
                let value = self.lower_expression(array);
                let length = self.field_pointer(array_record(), value, 1);
                self.load(lir::Type::I32, length)
            }
            ExpressionKind::TypeTag(object) => {
                let value = self.lower_expression(object);
                let tag = self.field_pointer(class_header(), value, CLASS_TAG_FIELD);
                self.load(lir::Type::I32, tag)
            }
            ExpressionKind::Println { pieces, arguments } => {
                let values = arguments
                    .iter()
                    .map(|a| self.lower_expression(a))
                    .collect::<Vec<_>>();
                self.lower_println(pieces, &values);
                Operand::Undef
            }
        }
    }

    fn receiver(&self) -> Operand {
        self.receiver
            .clone()
            .unwrap_or_else(|| unreachable!("'this' is only elaborated inside classes"))
    }

    /// Lowers the statements of a value block in their own scope. The value
    /// is retained before the scope is released since it outlives it.
    pub(super) fn lower_value_block(&mut self, block: &tir::ValueBlock) -> Option<Operand> {
        self.enter_scope();
        self.declare_locals(&block.block.declared);

        for statement in &block.block.statements {
            self.lower_statement(statement);
        }

        let value = block.value.as_ref().map(|expression| {
            let value = self.lower_expression(expression);
            self.retain_value(value.clone(), &expression.ty);
            value
        });

        self.exit_scope();
        value
    }

    fn lower_logical(&mut self, is_and: bool, lhs: &tir::Expression, rhs: &tir::Expression) -> Operand {
        let lhs = self.lower_expression(lhs);
        let right = self.create_block();
        let merge = self.create_block();

        let mut sources = Vec::with_capacity(2);
        if self.reachable {
            // the result when `rhs` is skipped
            sources.push((Operand::Immediate(i64::from(!is_and)), self.current_block));
        }

        if is_and {
            self.branch(lhs, right, merge);
        } else {
            self.branch(lhs, merge, right);
        }

        self.switch_to(right);
        let rhs = self.lower_expression(rhs);
        if self.reachable {
            sources.push((rhs, self.current_block));
            self.jump(merge);
        }

        self.merge_values(merge, lir::Type::BOOL, sources)
    }

    fn lower_arguments(&mut self, arguments: &[Rc<tir::Expression>]) -> Vec<(lir::Type, Operand)> {
        arguments
            .iter()
            .map(|argument| (lower_type(&argument.ty), self.lower_expression(argument)))
            .collect()
    }

    fn lower_call(&mut self, callee: &Callee, arguments: &[Rc<tir::Expression>], ty: &ty::Type) -> Operand {
        let (target, callee_type, mut lowered) = match callee {
            Callee::Function(function) => (
                self.module.function_symbol(*function),
                self.session.function_type(*function).clone(),
                Vec::new(),
            ),
            Callee::Method { function, receiver } => {
                let receiver = self.lower_expression(receiver);
                (
                    self.module.function_symbol(*function),
                    self.session.function_type(*function).clone(),
                    vec![(lir::Type::Ptr, receiver)],
                )
            }
            Callee::Virtual {
                receiver,
                class,
                property,
            } => {
                let receiver = self.lower_expression(receiver);
                let (slot, slot_type) = self.member_pointer(receiver.clone(), *class, *property);
                let target = self.load(lir::Type::Ptr, slot);
                (target, slot_type, vec![(lir::Type::Ptr, receiver)])
            }
            Callee::Indirect(function) => {
                let target = self.lower_expression(function);
                (target, function.ty.clone(), Vec::new())
            }
        };

        lowered.extend(self.lower_arguments(arguments));

        let variadic_parameters = callee_type
            .as_function()
            .filter(|f| f.is_variadic)
            .map(|f| f.receiver.iter().chain(f.parameters.iter()).map(lower_type).collect());

        let result = self.call_with(lower_type(ty), variadic_parameters, target, lowered);
        // results come back owned by the caller
        self.own_temporary(result.clone(), ty, false);
        result
    }

    fn lower_array_literal(&mut self, expression: &tir::Expression, values: Vec<Operand>) -> Operand {
        let element = element_type(&expression.ty);
        let lowered = lower_type(element);
        let release = self.release_function(element);

        let array = self.call_runtime(
            RuntimeFunction::ArrayConstructor,
            vec![
                (lir::Type::I32, Operand::Immediate(values.len() as i64)),
                (lir::Type::I64, Operand::Immediate(lowered.size() as i64)),
                (lir::Type::Ptr, release),
            ],
        );
        self.own_temporary(array.clone(), &expression.ty, true);

        for (index, value) in values.into_iter().enumerate() {
            let pointer = self.element_pointer(
                array.clone(),
                lowered.size(),
                Operand::Immediate(index as i64),
                expression.span,
            );
            self.store(lowered.clone(), value, pointer.clone());
            self.retain_slot(pointer, element);
        }

        array
    }

    /// Fills a fresh array by calling the generator with every index. Results
    /// are moved into the elements.
    fn lower_array_generator(
        &mut self,
        expression: &tir::Expression,
        length: &tir::Expression,
        generator: &tir::Expression,
    ) -> Operand {
        let element = element_type(&expression.ty);
        let lowered = lower_type(element);
        let length = self.lower_expression(length);
        let generator = self.lower_expression(generator);
        let release = self.release_function(element);
        let location = self.module.location(expression.span);

        let array = self.call_runtime(
            RuntimeFunction::ArrayConstructor2,
            vec![
                (lir::Type::I32, length.clone()),
                (lir::Type::I64, Operand::Immediate(lowered.size() as i64)),
                (lir::Type::Ptr, release),
                (lir::Type::Ptr, location),
            ],
        );
        self.own_temporary(array.clone(), &expression.ty, true);

        let before = self.current_block;
        let condition = self.create_block();
        let body = self.create_block();
        let end = self.create_block();
        self.jump(condition);

        self.switch_to(condition);
        let index = self.create_register(lir::Type::I32);
        let next = self.create_register(lir::Type::I32);
        self.push_instruction(lir::Instruction::Phi {
            destination: index,
            ty: lir::Type::I32,
            sources: vec![(Operand::Immediate(0), before), (next.into(), body)],
        });
        let in_bounds = self.compare(lir::Predicate::Ult, lir::Type::I32, index.into(), length);
        self.branch(in_bounds, body, end);

        self.switch_to(body);
        let value = self.call(lowered.clone(), generator, vec![(lir::Type::I32, index.into())]);
        let pointer = self.element_pointer(array.clone(), lowered.size(), index.into(), expression.span);
        self.store(lowered, value, pointer);
        self.push_instruction(lir::Instruction::Binary {
            operation: lir::BinaryOperation::Add,
            destination: next,
            ty: lir::Type::I32,
            lhs: index.into(),
            rhs: Operand::Immediate(1),
        });
        self.jump(condition);

        self.switch_to(end);
        array
    }

    /// Bounds checked pointer to an array element
    fn element_pointer(&mut self, array: Operand, element_size: u64, index: Operand, span: Span) -> Operand {
        let location = self.module.location(span);

        self.call_runtime(
            RuntimeFunction::ArrayGet,
            vec![
                (lir::Type::Ptr, array),
                (lir::Type::I32, Operand::Immediate(element_size as i64)),
                (lir::Type::I32, index),
                (lir::Type::Ptr, location),
            ],
        )
    }

    pub(super) fn member_pointer(&mut self, object: Operand, class: ClassId, property: usize) -> (Operand, ty::Type) {
        let session = self.session;
        let definition = &session.types.classes[class];
        let Some(field) = definition.field_index(property) else {
            unreachable!("methods have no storage")
        };

        let layout = self.module.class_layout(class);
        let pointer = self.field_pointer(layout, object, field);
        (pointer, definition.properties[property].ty.clone())
    }

    fn variable_pointer(&mut self, variable: Variable) -> (Operand, ty::Type) {
        match variable {
            Variable::Local(local) => {
                let slot = self.local_slot(local);
                (slot.into(), self.local(local).ty.clone())
            }
            Variable::Global(global) => (
                Operand::Global(self.session.globals[global].symbol.clone()),
                self.session.global_type(global).clone(),
            ),
            Variable::ReceiverMember { class, property } => {
                let receiver = self.receiver();
                self.member_pointer(receiver, class, property)
            }
        }
    }

    /// Address of an assignable place and the type stored there
    pub(super) fn place_pointer(&mut self, place: &Place) -> (Operand, ty::Type) {
        match place {
            Place::Variable(variable) => self.variable_pointer(*variable),
            Place::Member {
                object,
                class,
                property,
            } => {
                let object = self.lower_expression(object);
                self.member_pointer(object, *class, *property)
            }
            Place::Index { array, index, span } => {
                let element = element_type(&array.ty).clone();
                let array = self.lower_expression(array);
                let index = self.lower_expression(index);

                let pointer = self.element_pointer(array, lower_type(&element).size(), index, *span);
                (pointer, element)
            }
        }
    }

    fn lower_println(&mut self, pieces: &[FormatPiece], values: &[Operand]) {
        let mut format = Vec::new();
        let mut arguments = Vec::new();

        for piece in pieces {
            let (index, style) = match piece {
                FormatPiece::Text(text) => {
                    format.extend_from_slice(text.replace('%', "%%").as_bytes());
                    continue;
                }
                FormatPiece::Argument { index, style } => (*index, *style),
            };
            let value = values[index].clone();

            match style {
                FormatStyle::Integer(kind) => {
                    let specifier = match (kind.is_signed(), kind.bit_width()) {
                        (true, 64) => "%lld",
                        (false, 64) => "%llu",
                        (true, _) => "%d",
                        (false, _) => "%u",
                    };
                    format.extend_from_slice(specifier.as_bytes());
                    arguments.push(self.variadic_integer(value, kind, kind.is_signed()));
                }
                FormatStyle::Hex(kind) => {
                    let specifier = if kind.bit_width() == 64 { "%llx" } else { "%x" };
                    format.extend_from_slice(specifier.as_bytes());
                    arguments.push(self.variadic_integer(value, kind, false));
                }
                FormatStyle::Char => {
                    format.extend_from_slice(b"%c");
                    arguments.push(self.variadic_integer(value, IntKind::U8, false));
                }
                FormatStyle::Bool => {
                    format.extend_from_slice(b"%s");
                    let yes = self.module.c_string("true");
                    let no = self.module.c_string("false");

                    let destination = self.create_register(lir::Type::Ptr);
                    self.push_instruction(lir::Instruction::Select {
                        destination,
                        condition: value,
                        ty: lir::Type::Ptr,
                        positive: yes,
                        negative: no,
                    });
                    arguments.push((lir::Type::Ptr, destination.into()));
                }
                FormatStyle::Text => {
                    format.extend_from_slice(b"%.*s");
                    let length = self.field_pointer(array_record(), value.clone(), 1);
                    let length = self.load(lir::Type::I32, length);
                    let data = self.field_pointer(array_record(), value, 2);
                    let data = self.load(lir::Type::Ptr, data);

                    arguments.push((lir::Type::I32, length));
                    arguments.push((lir::Type::Ptr, data));
                }
            }
        }

        format.extend_from_slice(b"\n\0");
        let format = self.module.constant(format);

        arguments.insert(0, (lir::Type::Ptr, format));
        self.call_runtime(RuntimeFunction::Printf, arguments);
    }

    /// C promotes variadic integers narrower than `int`
    fn variadic_integer(&mut self, value: Operand, kind: IntKind, is_signed: bool) -> (lir::Type, Operand) {
        if kind.bit_width() >= 32 {
            return (lir::Type::int(kind), value);
        }

        let promoted = IntKind::from_parts(is_signed, kind.bit_width())
            .unwrap_or_else(|| unreachable!("integer kinds exist for every width"));
        (lir::Type::I32, self.resize_integer(value, promoted, 32))
    }
}

fn class_tag(class: ClassId) -> Operand {
    Operand::Immediate(i64::from(class.tag()))
}

#[cfg(test)]
mod tests {
    use crate::{
        frontend::ast::{self, BinaryOperatorKind},
        test_util::*,
    };

    fn main_text(classes: Vec<ast::Item>, statements: Vec<ast::Statement>) -> String {
        let mut items = classes;
        items.push(main_function(statements));

        let module = lower_units(vec![unit("main", items)]);
        module
            .function("main::main")
            .map(|f| strip_ansi_escapes::strip_str(f.to_string()))
            .unwrap_or_default()
    }

    #[test]
    fn literals_print_as_signed_values_of_their_width() {
        let text = main_text(
            vec![],
            vec![
                val("a", Some(named("u8")), int("255")),
                val("b", Some(named("i16")), negative(int("2"))),
            ],
        );

        assert!(text.contains("store i8 -1, ptr"));
        assert!(text.contains("store i16 -2, ptr"));
    }

    #[test]
    fn unsigned_operands_pick_unsigned_instructions() {
        let text = main_text(
            vec![],
            vec![
                val("a", Some(named("u32")), int("7")),
                val("b", None, binary(var("a"), BinaryOperatorKind::Divide, int("2"))),
                val("c", None, binary(var("a"), BinaryOperatorKind::LessThan, int("2"))),
            ],
        );

        assert!(text.contains("udiv i32"));
        assert!(text.contains("icmp ult i32"));
    }

    #[test]
    fn narrower_operands_extend_by_their_own_signedness() {
        let text = main_text(
            vec![],
            vec![
                val("byte", Some(named("u8")), int("200")),
                val("small", Some(named("i8")), negative(int("1"))),
                val("word", Some(named("i32")), int("1")),
                val("wide", Some(named("i64")), int("1")),
                val("a", None, binary(var("byte"), BinaryOperatorKind::Add, var("word"))),
                val("b", None, binary(var("wide"), BinaryOperatorKind::Add, var("small"))),
            ],
        );

        assert!(text.contains("= zext i8 %r"));
        assert!(text.contains("= sext i8 %r"));
        assert!(text.contains("add i32"));
        assert!(text.contains("add i64"));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let text = main_text(
            vec![],
            vec![
                val("a", None, boolean(true)),
                val(
                    "b",
                    None,
                    binary(var("a"), BinaryOperatorKind::LogicalAnd, boolean(false)),
                ),
            ],
        );

        assert!(text.contains("br i1 %r"));
        assert!(text.contains("phi i1 [ 0, %bb0 ], [ 0, %bb1 ]"));
    }

    #[test]
    fn if_values_merge_through_a_phi() {
        let text = main_text(
            vec![],
            vec![
                val("c", None, boolean(true)),
                val(
                    "x",
                    None,
                    if_else(
                        var("c"),
                        block(vec![expr_stmt(int("1"))]),
                        Some(block(vec![expr_stmt(int("2"))])),
                    ),
                ),
            ],
        );

        assert!(text.contains("phi i32 [ 1, %bb1 ], [ 2, %bb2 ]"));
    }

    #[test]
    fn string_literals_are_built_by_the_runtime() {
        let module = lower_units(vec![unit(
            "main",
            vec![main_function(vec![val("s", None, string("hi"))])],
        )]);
        let text = module.emit();

        assert!(text.contains(r#"@"str.0" = private constant [2 x i8] c"hi""#));
        assert!(text.contains(r#"call ptr @"String_constructor"(i32 2, ptr @"str.0")"#));
    }

    #[test]
    fn class_casts_assert_at_runtime() {
        let classes = vec![
            class("A", None, vec![], None, vec![]),
            class("B", Some("A"), vec![], None, vec![]),
        ];
        let text = main_text(
            classes,
            vec![
                val("a", Some(named("A")), new("B", vec![])),
                val("b", None, cast(var("a"), named("B"))),
                val("check", None, is(var("a"), named("B"))),
            ],
        );

        assert!(text.contains(
            r#"call void @"is_subclass_assert"(ptr %r"#
        ));
        assert!(text.contains(r#"i32 2, ptr @"class.inheritances", ptr @"class.names", ptr @"loc.0")"#));
        assert!(text.contains(r#"call i1 @"is_subclass"(ptr %r"#));
    }

    #[test]
    fn virtual_methods_are_called_through_the_instance() {
        let base = class(
            "A",
            None,
            vec![],
            None,
            vec![method(
                ast::MethodModifier::Virtual,
                "run",
                vec![],
                Some(named("i32")),
                block(vec![return_value(int("1"))]),
            )],
        );
        let text = main_text(
            vec![base],
            vec![
                val("a", None, new("A", vec![])),
                val("x", None, call(member(var("a"), "run"), vec![])),
            ],
        );

        assert!(text.contains("getelementptr { i32, i32, ptr, ptr }, ptr %r"));
        assert!(text.contains(", i32 0, i32 3"));
        assert!(text.contains("= call i32 %r"));
    }

    #[test]
    fn println_becomes_printf() {
        let module = lower_units(vec![unit(
            "main",
            vec![main_function(vec![expr_stmt(println(vec![
                string("{} is {}, 100%"),
                int("1"),
                boolean(true),
            ]))])],
        )]);
        let text = module.emit();

        assert!(text.contains(r#"c"%d is %s, 100%%\0A\00""#));
        assert!(text.contains(r#"select i1 1, ptr @"str."#));
        assert!(text.contains(r#"call i32 (ptr, ...) @"printf"(ptr @"str."#));
    }
}
