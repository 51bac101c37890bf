use crate::middle::{
    lir::{self, Operand},
    tir::{self, Statement},
    ty,
};

use super::{FunctionLowering, LoopTargets, lower_type, zero_value};

impl FunctionLowering<'_, '_, '_> {
    /// Lowers `block` in a scope of its own which owns its declared locals
    pub(super) fn lower_block(&mut self, block: &tir::Block) {
        self.enter_scope();
        self.declare_locals(&block.declared);

        for statement in &block.statements {
            self.lower_statement(statement);
        }

        self.exit_scope();
    }

    pub(super) fn lower_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Expression(expression) => {
                self.lower_expression(expression);
            }
            Statement::Declare { local, value } => {
                let ty = &self.local(*local).ty;
                let lowered = lower_type(ty);
                let slot = self.local_slot(*local);

                match value {
                    Some(value) => {
                        let value = self.lower_expression(value);
                        self.store(lowered, value, slot.into());
                        self.retain_slot(slot.into(), ty);
                    }
                    // loops run a declaration more than once
                    None => self.store(lowered.clone(), zero_value(&lowered), slot.into()),
                }
            }
            Statement::Assign { places, values } => {
                let pointers = places
                    .iter()
                    .map(|place| self.place_pointer(place))
                    .collect::<Vec<_>>();
                let values = values
                    .iter()
                    .map(|value| self.lower_expression(value))
                    .collect::<Vec<_>>();

                for ((pointer, ty), value) in pointers.into_iter().zip(values) {
                    self.assign(pointer, &ty, value);
                }
            }
            Statement::CompoundAssign {
                place,
                operator,
                value,
            } => {
                let (pointer, ty) = self.place_pointer(place);
                let rhs = self.lower_expression(value);
                let Some(kind) = ty.as_integer() else {
                    unreachable!("compound assignment needs an integer place, found {ty}")
                };
                let Some(operation) = lir::BinaryOperation::for_operator(*operator, kind.is_signed()) else {
                    unreachable!("'{operator}' has no compound form")
                };

                let lowered = lower_type(&ty);
                let current = self.load(lowered.clone(), pointer.clone());
                let result = self.binary(operation, lowered.clone(), current, rhs);
                self.store(lowered, result, pointer);
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.lower_expression(condition);
                let then_block = self.create_block();
                let else_block = otherwise.as_ref().map(|_| self.create_block());
                let end = self.create_block();
                self.branch(condition, then_block, else_block.unwrap_or(end));

                self.switch_to(then_block);
                self.lower_block(then);
                self.jump(end);

                if let (Some(block), Some(otherwise)) = (else_block, otherwise) {
                    self.switch_to(block);
                    self.lower_block(otherwise);
                    self.jump(end);
                }

                self.switch_to(end);
            }
            Statement::Loop {
                condition,
                body,
                step,
            } => self.lower_loop(condition.as_deref(), body, step.as_ref()),
            Statement::Return(value) => {
                if let Some(value) = value {
                    let value = self.lower_expression(value);
                    let Some((slot, ty)) = self.return_value.clone() else {
                        unreachable!("'{}' returns no value", self.symbol)
                    };

                    self.store(lower_type(&ty), value, slot.into());
                    self.retain_slot(slot.into(), &ty);
                }

                self.release_scopes_from(0);
                let block = self.return_block();
                self.jump(block);
            }
            Statement::Break | Statement::Continue => {
                let Some(target) = self.loops.last().copied() else {
                    unreachable!("'break' and 'continue' only appear in loops")
                };

                self.release_scopes_from(target.depth);
                match statement {
                    Statement::Break => self.jump(target.end),
                    _ => self.jump(target.next),
                }
            }
            Statement::Block(block) => self.lower_block(block),
        }
    }

    /// Stores `value` into `pointer`. The previous value is moved aside and
    /// released after the new one is retained.
    fn assign(&mut self, pointer: Operand, ty: &ty::Type, value: Operand) {
        let lowered = lower_type(ty);

        if !ty.is_managed() {
            self.store(lowered, value, pointer);
            return;
        }

        let scratch = self.create_slot(ty);
        let old = self.load(lowered.clone(), pointer.clone());
        self.store(lowered.clone(), old, scratch.into());

        self.store(lowered, value, pointer.clone());
        self.retain_slot(pointer, ty);
        self.release_slot(scratch.into(), ty);
    }

    fn lower_loop(&mut self, condition: Option<&tir::Expression>, body: &tir::Block, step: Option<&tir::Block>) {
        let condition_block = self.create_block();
        let body_block = self.create_block();
        let next = self.create_block();
        let end = self.create_block();
        self.jump(condition_block);

        self.switch_to(condition_block);
        match condition {
            Some(condition) => {
                // temporaries of the condition die every iteration
                self.enter_scope();
                let value = self.lower_expression(condition);
                self.exit_scope();
                self.branch(value, body_block, end);
            }
            None => self.jump(body_block),
        }

        self.switch_to(body_block);
        self.loops.push(LoopTargets {
            next,
            end,
            depth: self.scopes.len(),
        });
        self.lower_block(body);
        self.loops.pop();
        self.jump(next);

        self.switch_to(next);
        if let Some(step) = step {
            self.lower_block(step);
        }
        self.jump(condition_block);

        self.switch_to(end);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        frontend::ast::{self, BinaryOperatorKind},
        test_util::*,
    };

    fn main_text(statements: Vec<ast::Statement>) -> String {
        let module = lower_units(vec![unit(
            "main",
            vec![class("A", None, vec![], None, vec![]), main_function(statements)],
        )]);

        module
            .function("main::main")
            .map(|f| strip_ansi_escapes::strip_str(f.to_string()))
            .unwrap_or_default()
    }

    #[test]
    fn assignment_releases_the_previous_value_last() {
        let text = main_text(vec![
            var_decl("a", None, Some(new("A", vec![]))),
            assign(var("a"), new("A", vec![])),
        ]);

        // the moved aside value, then `a` and both temporaries at scope exit
        assert_eq!(text.matches(r#"call void @"dec""#).count(), 4);
    }

    #[test]
    fn break_releases_the_loop_body() {
        let text = main_text(vec![while_loop(
            boolean(true),
            block(vec![val("a", None, new("A", vec![])), break_stmt()]),
        )]);

        // the scope exit after `break` is unreachable and dropped
        assert_eq!(text.matches(r#"call void @"dec""#).count(), 2);
    }

    #[test]
    fn inner_break_releases_only_the_inner_body() {
        let text = main_text(vec![while_loop(
            boolean(true),
            block(vec![
                val("outer", None, new("A", vec![])),
                while_loop(
                    boolean(true),
                    block(vec![val("inner", None, new("A", vec![])), break_stmt()]),
                ),
            ]),
        )]);

        // `inner` and its temporary at the break, then `outer` and its
        // temporary when the outer body ends
        assert_eq!(text.matches(r#"call void @"dec""#).count(), 4);
    }

    #[test]
    fn continue_runs_the_step() {
        let text = main_text(vec![for_loop(
            Some(var_decl("i", None, Some(int("0")))),
            Some(binary(var("i"), BinaryOperatorKind::LessThan, int("10"))),
            Some(expr_stmt(post_increment(var("i")))),
            block(vec![continue_stmt()]),
        )]);

        assert!(text.contains("bb2:\n  br label %bb3\n"));
        assert!(text.contains("icmp slt i32"));
        assert!(text.contains("br label %bb1\n"));
    }

    #[test]
    fn compound_assignment_loads_operates_and_stores() {
        let text = main_text(vec![
            var_decl("x", Some(named("u16")), Some(int("8"))),
            compound_assign(var("x"), ast::AssignmentOperatorKind::Divide, int("2")),
        ]);

        assert!(text.contains("udiv i16"));
    }
}
