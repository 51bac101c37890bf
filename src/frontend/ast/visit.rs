//! Trait definition for an AST visitor which walks function bodies in DFS
//! order. Lambda bodies are only entered through [`Visitor::visit_lambda`].

use super::{Block, Expression, ExpressionKind, Lambda, Statement, StatementKind, VariableDeclaration};

pub trait Visitor<'ast>: Sized {
    fn visit_block(&mut self, block: &'ast Block) {
        walk_block(self, block)
    }

    fn visit_statement(&mut self, statement: &'ast Statement) {
        walk_statement(self, statement)
    }

    fn visit_declaration(&mut self, declaration: &'ast VariableDeclaration) {
        walk_declaration(self, declaration)
    }

    /// Called for the target of every assignment, operator assignment and
    /// increment, before the target expression itself is walked
    fn visit_assignment_target(&mut self, _target: &'ast Expression) {}

    fn visit_expression(&mut self, expression: &'ast Expression) {
        walk_expression(self, expression)
    }

    fn visit_lambda(&mut self, lambda: &'ast Lambda) {
        walk_lambda(self, lambda)
    }
}

pub fn walk_block<'a>(visitor: &mut impl Visitor<'a>, block: &'a Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_statement<'a>(visitor: &mut impl Visitor<'a>, statement: &'a Statement) {
    match &statement.kind {
        StatementKind::Declaration(declaration) => visitor.visit_declaration(declaration),
        StatementKind::Assignment { targets, values } => {
            for target in targets {
                visitor.visit_assignment_target(target);
                visitor.visit_expression(target);
            }

            values.iter().for_each(|v| visitor.visit_expression(v));
        }
        StatementKind::OperatorAssignment { target, value, .. } => {
            visitor.visit_assignment_target(target);
            visitor.visit_expression(target);
            visitor.visit_expression(value);
        }
        StatementKind::While { condition, body } => {
            visitor.visit_expression(condition);
            visitor.visit_block(body);
        }
        StatementKind::For {
            initializer,
            condition,
            step,
            body,
        } => {
            if let Some(initializer) = initializer {
                visitor.visit_statement(initializer);
            }

            if let Some(condition) = condition {
                visitor.visit_expression(condition);
            }

            if let Some(step) = step {
                visitor.visit_statement(step);
            }

            visitor.visit_block(body);
        }
        StatementKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expression(value);
            }
        }
        StatementKind::Break | StatementKind::Continue => {}
        StatementKind::Expression(expression) => visitor.visit_expression(expression),
    }
}

pub fn walk_declaration<'a>(visitor: &mut impl Visitor<'a>, declaration: &'a VariableDeclaration) {
    for value in declaration.values.iter().flatten() {
        visitor.visit_expression(value);
    }
}

pub fn walk_lambda<'a>(visitor: &mut impl Visitor<'a>, lambda: &'a Lambda) {
    visitor.visit_block(&lambda.body);
}

pub fn walk_expression<'a>(visitor: &mut impl Visitor<'a>, expression: &'a Expression) {
    match &expression.kind {
        ExpressionKind::IntegerLiteral(_)
        | ExpressionKind::StringLiteral(_)
        | ExpressionKind::BooleanLiteral(_)
        | ExpressionKind::Null
        | ExpressionKind::This
        | ExpressionKind::Path(_) => {}
        ExpressionKind::Member { object, .. } => visitor.visit_expression(object),
        ExpressionKind::Call { target, arguments } => {
            visitor.visit_expression(target);
            arguments.iter().for_each(|a| visitor.visit_expression(a));
        }
        ExpressionKind::Intrinsic { arguments, .. } | ExpressionKind::New { arguments, .. } => {
            arguments.iter().for_each(|a| visitor.visit_expression(a))
        }
        ExpressionKind::ArrayLiteral { elements, .. } => {
            elements.iter().for_each(|e| visitor.visit_expression(e))
        }
        ExpressionKind::ArrayGenerator {
            length, generator, ..
        } => {
            visitor.visit_expression(length);
            visitor.visit_expression(generator);
        }
        ExpressionKind::Index { array, index } => {
            visitor.visit_expression(array);
            visitor.visit_expression(index);
        }
        ExpressionKind::Tuple(fields) => {
            fields.iter().for_each(|f| visitor.visit_expression(&f.value))
        }
        ExpressionKind::Spread(inner)
        | ExpressionKind::NonNullAssertion(inner)
        | ExpressionKind::Cast {
            expression: inner, ..
        }
        | ExpressionKind::Is {
            expression: inner, ..
        }
        | ExpressionKind::Unary { operand: inner, .. } => visitor.visit_expression(inner),
        ExpressionKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expression(lhs);
            visitor.visit_expression(rhs);
        }
        ExpressionKind::PostIncrement { target, .. } => {
            visitor.visit_assignment_target(target);
            visitor.visit_expression(target);
        }
        ExpressionKind::Lambda(lambda) => visitor.visit_lambda(lambda),
        ExpressionKind::Block(block) => visitor.visit_block(block),
        ExpressionKind::If {
            branches,
            otherwise,
        } => {
            for branch in branches {
                visitor.visit_expression(&branch.condition);
                visitor.visit_block(&branch.block);
            }

            if let Some(otherwise) = otherwise {
                visitor.visit_block(otherwise);
            }
        }
    }
}
