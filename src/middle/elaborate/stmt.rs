use hashbrown::HashSet;

use crate::{
    frontend::{
        Span,
        ast::{
            self, ExpressionKind, StatementKind,
            visit::Visitor,
        },
        intern::InternedSymbol,
    },
    middle::{
        elaborate::{BodyElaborator, BodyKind, Narrowing},
        error::{SemanticErrorKind, SemanticResult, error},
        resolve::resolve_data_type,
        scope::{FlowFacts, FlowKey, Scope, ScopeKind},
        tir::{self, Expression, Place, Statement, Variable},
        ty::Type,
    },
};

/// Names assigned anywhere in a loop. Narrowings of these locals cannot be
/// trusted on the second iteration.
#[derive(Default)]
struct AssignedNames(HashSet<InternedSymbol>);

impl<'ast> Visitor<'ast> for AssignedNames {
    fn visit_assignment_target(&mut self, target: &'ast ast::Expression) {
        if let ExpressionKind::Path(ast::Path {
            package: None, name, ..
        }) = &target.kind
        {
            self.0.insert(name.symbol);
        }
    }

    // lambdas cannot see the locals of the enclosing body
    fn visit_lambda(&mut self, _lambda: &'ast ast::Lambda) {}
}

impl BodyElaborator<'_, '_> {
    pub(super) fn elaborate_statements(
        &mut self,
        statements: &[ast::Statement],
    ) -> SemanticResult<Vec<Statement>> {
        let mut output = Vec::with_capacity(statements.len());

        for statement in statements {
            self.elaborate_statement(statement, &mut output)?;
        }

        Ok(output)
    }

    fn elaborate_statement(
        &mut self,
        statement: &ast::Statement,
        output: &mut Vec<Statement>,
    ) -> SemanticResult<()> {
        match &statement.kind {
            StatementKind::Declaration(declaration) => self.elaborate_declaration(declaration, output)?,
            StatementKind::Assignment { targets, values } => {
                let places = targets
                    .iter()
                    .map(|target| self.elaborate_place(target))
                    .collect::<SemanticResult<Vec<_>>>()?;
                let expected = places
                    .iter()
                    .map(|(_, ty)| Some(ty.clone()))
                    .collect::<Vec<_>>();
                let values = self.elaborate_expanded(values, &expected)?;

                if values.len() != places.len() {
                    return Err(error(
                        SemanticErrorKind::ArityMismatch,
                        statement.span,
                        format!(
                            "{} targets are assigned {} values",
                            places.len(),
                            values.len()
                        ),
                    ));
                }

                for ((place, ty), value) in places.iter().zip(&values) {
                    self.record_assignment(place, ty, value);
                }

                output.push(Statement::Assign {
                    places: places.into_iter().map(|(place, _)| place).collect(),
                    values,
                });
            }
            StatementKind::OperatorAssignment {
                operator,
                target,
                value,
            } => {
                let (place, ty) = self.elaborate_integer_place(target)?;
                let value = self.elaborate_value(value, Some(&ty))?;

                output.push(Statement::CompoundAssign {
                    place,
                    operator: operator.kind.binary_operator(),
                    value,
                });
            }
            StatementKind::While { condition, body } => {
                self.reset_loop_narrowings(&[&**condition], &[], body);

                let (condition, narrowings) = self.elaborate_condition(condition)?;
                let (body, _) = self.scoped_block(ScopeKind::LoopBody, &narrowings, body)?;

                output.push(Statement::Loop {
                    condition: Some(condition),
                    body,
                    step: None,
                });
            }
            StatementKind::For {
                initializer,
                condition,
                step,
                body,
            } => {
                let (statements, scope) = self.in_scope(ScopeKind::Block, &[], |this| {
                    let mut output = Vec::new();

                    if let Some(initializer) = initializer {
                        this.elaborate_statement(initializer, &mut output)?;
                    }

                    let conditions = condition.iter().map(|c| &**c).collect::<Vec<_>>();
                    let steps = step.iter().map(|s| &**s).collect::<Vec<_>>();
                    this.reset_loop_narrowings(&conditions, &steps, body);

                    let (condition, narrowings) = match condition {
                        Some(condition) => {
                            let (condition, narrowings) = this.elaborate_condition(condition)?;
                            (Some(condition), narrowings)
                        }
                        None => (None, Vec::new()),
                    };
                    let (body, _) = this.scoped_block(ScopeKind::LoopBody, &narrowings, body)?;

                    let step = match step {
                        Some(step) => {
                            let (statements, scope) = this.in_scope(ScopeKind::Block, &[], |this| {
                                this.elaborate_statements(std::slice::from_ref(&**step))
                            })?;
                            Some(tir::Block::new(statements, scope.declared))
                        }
                        None => None,
                    };

                    output.push(Statement::Loop {
                        condition,
                        body,
                        step,
                    });

                    Ok(output)
                })?;
                self.scopes.adopt(&scope);

                output.push(Statement::Block(tir::Block::new(statements, scope.declared)));
            }
            StatementKind::Return(value) => {
                let statement = self.return_statement(statement.span, value.as_deref())?;
                output.push(statement);
            }
            StatementKind::Break | StatementKind::Continue => {
                if !self.scopes.in_loop() {
                    return Err(error(
                        SemanticErrorKind::IllegalControlTransfer,
                        statement.span,
                        "'break' and 'continue' are only allowed inside a loop",
                    ));
                }

                self.scopes.mark_returning();
                output.push(match statement.kind {
                    StatementKind::Break => Statement::Break,
                    _ => Statement::Continue,
                });
            }
            StatementKind::Expression(expression) => match &expression.kind {
                ExpressionKind::If {
                    branches,
                    otherwise,
                } => output.push(self.if_statement(branches, otherwise.as_deref())?),
                ExpressionKind::Block(block) => {
                    let (block, scope) = self.scoped_block(ScopeKind::Block, &[], block)?;
                    self.scopes.adopt(&scope);
                    output.push(Statement::Block(block));
                }
                _ => {
                    let value = self.elaborate_expression(expression, None)?;
                    output.push(Statement::Expression(value));
                }
            },
        }

        Ok(())
    }

    fn elaborate_declaration(
        &mut self,
        declaration: &ast::VariableDeclaration,
        output: &mut Vec<Statement>,
    ) -> SemanticResult<()> {
        let annotations = declaration
            .targets
            .iter()
            .map(|target| {
                target
                    .ty
                    .as_ref()
                    .map(|ty| resolve_data_type(self.session, self.context, ty))
                    .transpose()
            })
            .collect::<SemanticResult<Vec<_>>>()?;

        let Some(values) = &declaration.values else {
            if declaration.is_constant {
                return Err(error(
                    SemanticErrorKind::IllegalAssignment,
                    declaration.span,
                    "a 'val' must be initialized where it is declared",
                ));
            }

            for (target, annotation) in declaration.targets.iter().zip(annotations) {
                let Some(ty) = annotation else {
                    return Err(error(
                        SemanticErrorKind::UnresolvedType,
                        target.name.span,
                        format!(
                            "'{}' needs a type annotation or an initializer",
                            target.name.symbol
                        ),
                    ));
                };

                let local = self.declare_local(&target.name, ty, false, FlowFacts::uninitialized())?;
                output.push(Statement::Declare { local, value: None });
            }

            return Ok(());
        };

        let values = self.elaborate_expanded(values, &annotations)?;

        if values.len() != declaration.targets.len() {
            return Err(error(
                SemanticErrorKind::ArityMismatch,
                declaration.span,
                format!(
                    "{} variables are declared with {} values",
                    declaration.targets.len(),
                    values.len()
                ),
            ));
        }

        for ((target, annotation), value) in declaration.targets.iter().zip(annotations).zip(values) {
            let ty = annotation.unwrap_or_else(|| value.ty.clone());
            let narrowed = (value.ty != ty).then(|| value.ty.clone());

            let local = self.declare_local(
                &target.name,
                ty,
                declaration.is_constant,
                FlowFacts::initialized(narrowed),
            )?;
            output.push(Statement::Declare {
                local,
                value: Some(value),
            });
        }

        Ok(())
    }

    /// A stored value refines locals to its own type and initializes
    /// properties of the receiver
    fn record_assignment(&mut self, place: &Place, ty: &Type, value: &Expression) {
        match place {
            Place::Variable(Variable::Local(local)) => {
                let narrowed = (value.ty != *ty).then(|| value.ty.clone());
                self.scopes.assign(FlowKey::Local(*local), narrowed);
            }
            Place::Variable(Variable::ReceiverMember { property, .. }) => {
                self.scopes.assign(FlowKey::Member(*property), None);
            }
            _ => {}
        }
    }

    pub(super) fn return_statement(
        &mut self,
        span: Span,
        value: Option<&ast::Expression>,
    ) -> SemanticResult<Statement> {
        if self.kind != BodyKind::Function {
            return Err(error(
                SemanticErrorKind::IllegalControlTransfer,
                span,
                "'return' is not allowed in constructors, destructors and initializers",
            ));
        }

        let return_type = self.return_type.clone();
        let value = match value {
            Some(value) if return_type.is_void() => {
                return Err(error(
                    SemanticErrorKind::TypeMismatch,
                    value.span,
                    "a 'void' function cannot return a value",
                ));
            }
            Some(value) => Some(self.elaborate_value(value, Some(&return_type))?),
            None if return_type.is_void() => None,
            None => {
                return Err(error(
                    SemanticErrorKind::TypeMismatch,
                    span,
                    format!("expected a return value of type {return_type}"),
                ));
            }
        };

        self.scopes.mark_returning();
        Ok(Statement::Return(value))
    }

    fn scoped_block(
        &mut self,
        kind: ScopeKind,
        narrowings: &[Narrowing],
        block: &ast::Block,
    ) -> SemanticResult<(tir::Block, Scope)> {
        let (statements, scope) =
            self.in_scope(kind, narrowings, |this| this.elaborate_statements(&block.statements))?;

        Ok((tir::Block::new(statements, scope.declared.clone()), scope))
    }

    fn if_statement(
        &mut self,
        branches: &[ast::ConditionalBranch],
        otherwise: Option<&ast::Block>,
    ) -> SemanticResult<Statement> {
        let Some((first, rest)) = branches.split_first() else {
            unreachable!("an 'if' has at least one conditional branch")
        };

        let (condition, narrowings) = self.elaborate_condition(&first.condition)?;
        let before = self.scopes.current_flow();
        let (then, then_scope) = self.scoped_block(ScopeKind::Branch, &narrowings, &first.block)?;

        let (otherwise, otherwise_scope) = if !rest.is_empty() {
            let (statement, scope) =
                self.in_scope(ScopeKind::Branch, &[], |this| this.if_statement(rest, otherwise))?;
            let block = tir::Block::new(vec![statement], scope.declared.clone());

            (Some(block), Some(scope))
        } else if let Some(otherwise) = otherwise {
            let (block, scope) = self.scoped_block(ScopeKind::Branch, &[], otherwise)?;
            (Some(block), Some(scope))
        } else {
            (None, None)
        };

        let is_exhaustive = otherwise_scope.is_some();
        let scopes = std::iter::once(then_scope)
            .chain(otherwise_scope)
            .collect::<Vec<_>>();
        self.scopes.merge_branches(before, &scopes, is_exhaustive);

        Ok(Statement::If {
            condition,
            then,
            otherwise,
        })
    }

    /// Drops narrowings of every local a loop may assign, since the loop
    /// condition and body see values from previous iterations
    fn reset_loop_narrowings(
        &mut self,
        expressions: &[&ast::Expression],
        statements: &[&ast::Statement],
        body: &ast::Block,
    ) {
        let mut assigned = AssignedNames::default();

        for expression in expressions {
            assigned.visit_expression(expression);
        }
        for statement in statements {
            assigned.visit_statement(statement);
        }
        assigned.visit_block(body);

        for name in assigned.0 {
            if let Some(local) = self.scopes.lookup(name) {
                self.scopes.reset_narrowing(FlowKey::Local(local));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frontend::ast::BinaryOperatorKind, test_util::*};

    #[test]
    fn locals_must_be_initialized_on_every_path() {
        let body = vec![
            var_decl("x", Some(named("i32")), None),
            expr_stmt(if_else(
                boolean(true),
                block(vec![assign(var("x"), int("1"))]),
                None,
            )),
            expr_stmt(call(var("use_value"), vec![var("x")])),
        ];
        let err = elaborate_with_helper(body).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::UninitializedUse);

        let body = vec![
            var_decl("x", Some(named("i32")), None),
            expr_stmt(if_else(
                boolean(true),
                block(vec![assign(var("x"), int("1"))]),
                Some(block(vec![assign(var("x"), int("2"))])),
            )),
            expr_stmt(call(var("use_value"), vec![var("x")])),
        ];
        assert!(elaborate_with_helper(body).is_ok());
    }

    #[test]
    fn returning_branches_do_not_count_as_paths() {
        let body = vec![
            var_decl("x", Some(named("i32")), None),
            expr_stmt(if_else(boolean(true), block(vec![return_void()]), None)),
            assign(var("x"), int("3")),
            expr_stmt(call(var("use_value"), vec![var("x")])),
        ];
        assert!(elaborate_with_helper(body).is_ok());

        let body = vec![
            var_decl("x", Some(named("i32")), None),
            expr_stmt(if_else(
                boolean(true),
                block(vec![return_void()]),
                Some(block(vec![assign(var("x"), int("1"))])),
            )),
            expr_stmt(call(var("use_value"), vec![var("x")])),
        ];
        assert!(elaborate_with_helper(body).is_ok());
    }

    #[test]
    fn loops_do_not_initialize_the_enclosing_scope() {
        let body = vec![
            var_decl("x", Some(named("i32")), None),
            while_loop(boolean(true), block(vec![assign(var("x"), int("1")), break_stmt()])),
            expr_stmt(call(var("use_value"), vec![var("x")])),
        ];

        assert_eq!(
            elaborate_with_helper(body).unwrap_err().kind,
            SemanticErrorKind::UninitializedUse
        );
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        let err = elaborate_main(vec![val("x", None, int("1")), assign(var("x"), int("2"))]).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::IllegalAssignment);

        let err = elaborate_main(vec![var_decl("x", None, None)]).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::UnresolvedType);
    }

    #[test]
    fn declarations_take_spread_tuples() {
        let session = elaborate_main(vec![
            val(
                "pair",
                None,
                tuple(vec![("a", int("1")), ("b", boolean(false))]),
            ),
            multi_decl(&["x", "y"], vec![spread(var("pair"))]),
        ])
        .unwrap();

        assert_eq!(
            main_local_types(&session),
            ["'(a: i32, b: bool)'", "'i32'", "'bool'"]
        );

        let err = elaborate_main(vec![multi_decl(&["x", "y"], vec![int("1")])]).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::ArityMismatch);
    }

    #[test]
    fn assignments_narrow_declared_types() {
        let classes = vec![
            class("A", None, vec![], None, vec![]),
            class(
                "B",
                Some("A"),
                vec![],
                None,
                vec![method(ast::MethodModifier::None, "only_b", vec![], None, block(vec![]))],
            ),
        ];
        let body = vec![
            var_decl("a", Some(nullable(named("A"))), Some(null())),
            assign(var("a"), new("B", vec![])),
            expr_stmt(call(member(var("a"), "only_b"), vec![])),
        ];

        assert!(elaborate_program(classes, body).is_ok());
    }

    #[test]
    fn nullable_class_types_do_not_convert() {
        let classes = || vec![class("A", None, vec![], None, vec![]), class("B", Some("A"), vec![], None, vec![])];

        let err = elaborate_program(
            classes(),
            vec![
                var_decl("b", Some(nullable(named("B"))), Some(null())),
                val("a", Some(nullable(named("A"))), var("b")),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::TypeMismatch);

        assert!(elaborate_program(
            classes(),
            vec![val("a", Some(nullable(named("A"))), new("B", vec![]))],
        )
        .is_ok());
    }

    #[test]
    fn loops_forget_narrowings_of_assigned_locals() {
        let classes = || {
            vec![
                class("A", None, vec![], None, vec![]),
                class(
                    "B",
                    Some("A"),
                    vec![],
                    None,
                    vec![method(ast::MethodModifier::None, "only_b", vec![], None, block(vec![]))],
                ),
            ]
        };
        let loop_body = |assigns: bool| {
            let mut statements = vec![expr_stmt(call(member(var("a"), "only_b"), vec![]))];
            if assigns {
                statements.push(assign(var("a"), new("A", vec![])));
            }
            statements.push(break_stmt());
            block(statements)
        };

        let body = vec![
            var_decl("a", Some(named("A")), Some(new("B", vec![]))),
            while_loop(boolean(true), loop_body(false)),
        ];
        assert!(elaborate_program(classes(), body).is_ok());

        let body = vec![
            var_decl("a", Some(named("A")), Some(new("B", vec![]))),
            while_loop(boolean(true), loop_body(true)),
        ];
        assert_eq!(
            elaborate_program(classes(), body).unwrap_err().kind,
            SemanticErrorKind::UnknownIdentifier
        );
    }

    #[test]
    fn control_transfer_is_checked() {
        let err = elaborate_main(vec![break_stmt()]).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::IllegalControlTransfer);

        let err = elaborate_main(vec![continue_stmt()]).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::IllegalControlTransfer);

        let err = elaborate_main(vec![return_value(int("1"))]).unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::TypeMismatch);

        let err = compile_units(vec![unit(
            "main",
            vec![
                main_function(vec![]),
                function(
                    "f",
                    vec![],
                    Some(named("i32")),
                    block(vec![expr_stmt(if_else(
                        boolean(true),
                        block(vec![return_value(int("1"))]),
                        None,
                    ))]),
                ),
            ],
        )])
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::MissingReturn);
    }

    #[test]
    fn nested_loops_only_leave_the_innermost_loop() {
        let inner = || while_loop(boolean(true), block(vec![break_stmt()]));

        assert!(elaborate_main(vec![while_loop(
            boolean(true),
            block(vec![inner(), continue_stmt(), inner(), break_stmt()]),
        )])
        .is_ok());

        let err = elaborate_main(vec![
            while_loop(boolean(true), block(vec![inner(), break_stmt()])),
            continue_stmt(),
        ])
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::IllegalControlTransfer);
    }

    #[test]
    fn compound_assignment_needs_an_initialized_integer() {
        let err = elaborate_main(vec![
            var_decl("x", Some(named("i32")), None),
            compound_assign(var("x"), ast::AssignmentOperatorKind::Add, int("1")),
        ])
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::UninitializedUse);

        let err = elaborate_main(vec![
            var_decl("x", None, Some(boolean(true))),
            compound_assign(var("x"), ast::AssignmentOperatorKind::Add, int("1")),
        ])
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::TypeMismatch);

        assert!(elaborate_main(vec![
            var_decl("x", None, Some(int("1"))),
            for_loop(
                Some(var_decl("i", None, Some(int("0")))),
                Some(binary(var("i"), BinaryOperatorKind::LessThan, int("10"))),
                Some(expr_stmt(post_increment(var("i")))),
                block(vec![compound_assign(
                    var("x"),
                    ast::AssignmentOperatorKind::Multiply,
                    int("2")
                )]),
            ),
        ])
        .is_ok());
    }

    #[test]
    fn constructors_must_initialize_every_field() {
        let err = compile_units(vec![unit(
            "main",
            vec![
                main_function(vec![]),
                class(
                    "Point",
                    None,
                    vec![property("x", named("i32")), property("y", named("i32"))],
                    Some(constructor(
                        vec![parameter("x", named("i32"))],
                        block(vec![assign(member(this(), "x"), var("x"))]),
                    )),
                    vec![],
                ),
            ],
        )])
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::UninitializedProperty);

        let err = compile_units(vec![unit(
            "main",
            vec![
                main_function(vec![]),
                class(
                    "Point",
                    None,
                    vec![property("x", named("i32")), property("y", named("i32"))],
                    Some(constructor(
                        vec![],
                        block(vec![
                            assign(var("y"), var("x")),
                            assign(var("x"), int("1")),
                        ]),
                    )),
                    vec![],
                ),
            ],
        )])
        .unwrap_err();
        assert_eq!(err.kind, SemanticErrorKind::UninitializedUse);
    }

    #[test]
    fn fields_assigned_in_some_branches_stay_uninitialized() {
        let flagged = |otherwise: Option<ast::Block>| {
            compile_units(vec![unit(
                "main",
                vec![
                    main_function(vec![]),
                    class(
                        "Flag",
                        None,
                        vec![property("x", named("i32"))],
                        Some(constructor(
                            vec![parameter("on", named("bool"))],
                            block(vec![expr_stmt(if_else(
                                var("on"),
                                block(vec![assign(var("x"), int("1"))]),
                                otherwise,
                            ))]),
                        )),
                        vec![],
                    ),
                ],
            )])
        };

        assert_eq!(
            flagged(None).unwrap_err().kind,
            SemanticErrorKind::UninitializedProperty
        );
        assert!(flagged(Some(block(vec![assign(var("x"), int("2"))]))).is_ok());
    }

    #[test]
    fn assigned_names_skip_lambda_bodies() {
        let body = block(vec![
            assign(var("a"), int("1")),
            expr_stmt(lambda(vec![], block(vec![assign(var("b"), int("2"))]))),
            compound_assign(var("c"), ast::AssignmentOperatorKind::Add, int("1")),
        ]);

        let mut assigned = AssignedNames::default();
        assigned.visit_block(&body);

        let mut names = assigned.0.iter().map(|n| n.value()).collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, ["a", "c"]);
    }
}
