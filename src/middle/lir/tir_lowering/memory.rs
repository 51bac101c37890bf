//! Slots, scopes and reference counting.
//!
//! A slot holds either null or exactly one owned reference. Retaining a slot
//! increments what it holds, releasing it decrements through the dynamic
//! destructor and stores null back. Tuples have no header of their own and
//! are retained and released field by field.

use crate::middle::{
    lir::{self, Operand, RegisterId, runtime::RuntimeFunction},
    tir::LocalId,
    ty::{self, CLASS_DESTRUCTOR_FIELD, TupleField, TypeKind},
};

use super::{FunctionLowering, class_header, lower_type, zero_value};

#[derive(Debug, Clone)]
pub(super) struct OwnedSlot {
    slot: RegisterId,
    ty: ty::Type,
}

enum Ownership<'t> {
    Class,
    Array,
    Tuple(&'t [TupleField]),
    Unmanaged,
}

fn ownership(ty: &ty::Type) -> Ownership<'_> {
    match &**ty {
        TypeKind::Class { .. } => Ownership::Class,
        TypeKind::Array(_) => Ownership::Array,
        TypeKind::Nullable(inner) => ownership(inner),
        TypeKind::Tuple(fields) if ty.is_managed() => Ownership::Tuple(fields),
        _ => Ownership::Unmanaged,
    }
}

impl FunctionLowering<'_, '_, '_> {
    pub(super) fn enter_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Releases everything the innermost scope owns, in declaration order
    pub(super) fn exit_scope(&mut self) {
        let owned = self
            .scopes
            .pop()
            .unwrap_or_else(|| unreachable!("scopes are balanced"));

        for OwnedSlot { slot, ty } in owned {
            self.release_slot(slot.into(), &ty);
        }
    }

    /// Releases every scope from `depth` outwards without leaving them, for
    /// jumps out of nested scopes
    pub(super) fn release_scopes_from(&mut self, depth: usize) {
        let owned = self.scopes[depth..]
            .iter()
            .rev()
            .flatten()
            .cloned()
            .collect::<Vec<_>>();

        for OwnedSlot { slot, ty } in owned {
            self.release_slot(slot.into(), &ty);
        }
    }

    /// Hands the slots of `locals` to the innermost scope
    pub(super) fn declare_locals(&mut self, locals: &[LocalId]) {
        for &local in locals {
            let slot = self.local_slot(local);
            let ty = &self.local(local).ty;

            if ty.is_managed() {
                self.own(slot, ty.clone());
            }
        }
    }

    fn own(&mut self, slot: RegisterId, ty: ty::Type) {
        self.scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("temporaries are created inside a scope"))
            .push(OwnedSlot { slot, ty });
    }

    pub(super) fn local_slot(&mut self, local: LocalId) -> RegisterId {
        if let Some(slot) = self.local_slots.get(&local) {
            return *slot;
        }

        let slot = self.create_slot(&self.local(local).ty);
        self.local_slots.insert(local, slot);
        slot
    }

    /// Entry block stack slot, zeroed when it can hold references
    pub(super) fn create_slot(&mut self, ty: &ty::Type) -> RegisterId {
        let lowered = lower_type(ty);
        let slot = self.create_register(lir::Type::Ptr);

        self.prologue.push(lir::Instruction::Alloca {
            destination: slot,
            ty: lowered.clone(),
        });
        if ty.is_managed() {
            self.prologue.push(lir::Instruction::Store {
                value: zero_value(&lowered),
                ty: lowered,
                pointer: slot.into(),
            });
        }

        slot
    }

    /// Gives the reference in `value` to a slot of the innermost scope.
    /// `retain` is needed for values nobody owns yet, like fresh strings.
    pub(super) fn own_temporary(&mut self, value: Operand, ty: &ty::Type, retain: bool) {
        if !ty.is_managed() {
            return;
        }

        let slot = self.create_slot(ty);
        self.store(lower_type(ty), value, slot.into());
        if retain {
            self.retain_slot(slot.into(), ty);
        }

        self.own(slot, ty.clone());
    }

    pub(super) fn retain_slot(&mut self, slot: Operand, ty: &ty::Type) {
        match ownership(ty) {
            Ownership::Class | Ownership::Array => {
                self.call_runtime(RuntimeFunction::Inc, vec![(lir::Type::Ptr, slot)]);
            }
            Ownership::Tuple(fields) => {
                let layout = lower_type(ty);

                for (index, field) in fields.iter().enumerate() {
                    if field.ty.is_managed() {
                        let pointer = self.field_pointer(layout.clone(), slot.clone(), index as u32);
                        self.retain_slot(pointer, &field.ty);
                    }
                }
            }
            Ownership::Unmanaged => {}
        }
    }

    /// Takes an extra reference on a value itself, for values which outlive
    /// the scope that owns them
    pub(super) fn retain_value(&mut self, value: Operand, ty: &ty::Type) {
        match ownership(ty) {
            Ownership::Class | Ownership::Array => {
                self.call_runtime(RuntimeFunction::IncD, vec![(lir::Type::Ptr, value)]);
            }
            Ownership::Tuple(fields) => {
                let layout = lower_type(ty);

                for (index, field) in fields.iter().enumerate() {
                    if field.ty.is_managed() {
                        let value = self.extract_value(layout.clone(), value.clone(), index as u32);
                        self.retain_value(value, &field.ty);
                    }
                }
            }
            Ownership::Unmanaged => {}
        }
    }

    pub(super) fn release_slot(&mut self, slot: Operand, ty: &ty::Type) {
        match ownership(ty) {
            Ownership::Class => {
                // the destructor comes from the record, not the static type
                let object = self.load(lir::Type::Ptr, slot.clone());
                let is_set = self.compare(lir::Predicate::Ne, lir::Type::Ptr, object.clone(), Operand::Null);

                let release = self.create_block();
                let done = self.create_block();
                self.branch(is_set, release, done);

                self.switch_to(release);
                let field = self.field_pointer(class_header(), object, CLASS_DESTRUCTOR_FIELD);
                let destructor = self.load(lir::Type::Ptr, field);
                self.call_runtime(
                    RuntimeFunction::Dec,
                    vec![(lir::Type::Ptr, slot.clone()), (lir::Type::Ptr, destructor)],
                );
                self.jump(done);

                self.switch_to(done);
                self.store(lir::Type::Ptr, Operand::Null, slot);
            }
            Ownership::Array => {
                let destructor = Operand::Global(RuntimeFunction::ArrayDestructor.symbol().to_owned());
                self.call_runtime(
                    RuntimeFunction::Dec,
                    vec![(lir::Type::Ptr, slot.clone()), (lir::Type::Ptr, destructor)],
                );
                self.store(lir::Type::Ptr, Operand::Null, slot);
            }
            Ownership::Tuple(fields) => {
                let layout = lower_type(ty);

                for (index, field) in fields.iter().enumerate() {
                    if field.ty.is_managed() {
                        let pointer = self.field_pointer(layout.clone(), slot.clone(), index as u32);
                        self.release_slot(pointer, &field.ty);
                    }
                }
            }
            Ownership::Unmanaged => {}
        }
    }

    /// `void (ptr slot)` releasing one array element of type `element`, or
    /// null when elements hold no references
    pub(super) fn release_function(&mut self, element: &ty::Type) -> Operand {
        if !element.is_managed() {
            return Operand::Null;
        }

        if let Some(symbol) = self.module.release_functions.get(element) {
            return Operand::Global(symbol.clone());
        }

        let symbol = format!("release.{}", self.module.release_functions.len());
        self.module
            .release_functions
            .insert(element.clone(), symbol.clone());

        let mut thunk = FunctionLowering::new(
            &mut *self.module,
            symbol.clone(),
            lir::Type::Void,
            vec![lir::Type::Ptr],
        );
        let slot = thunk.parameters[0];
        thunk.release_slot(slot.into(), element);
        thunk.push_instruction(lir::Instruction::Return { value: None });
        thunk.finish();

        Operand::Global(symbol)
    }
}

#[cfg(test)]
mod tests {
    use crate::{frontend::ast::BinaryOperatorKind, test_util::*};

    fn emitted(statements: Vec<crate::frontend::ast::Statement>) -> String {
        let module = lower_units(vec![unit(
            "main",
            vec![
                class("A", None, vec![], None, vec![]),
                main_function(statements),
            ],
        )]);

        module
            .function("main::main")
            .map(|f| strip_ansi_escapes::strip_str(f.to_string()))
            .unwrap_or_default()
    }

    #[test]
    fn class_locals_are_released_through_their_dynamic_destructor() {
        let text = emitted(vec![val("a", None, new("A", vec![]))]);

        assert!(text.contains(r#"call ptr @"main::A::constructor"()"#));
        assert!(text.contains(r#"call void @"inc"(ptr %r"#));
        assert!(text.contains("icmp ne ptr"));
        assert!(text.contains("getelementptr { i32, i32, ptr }, ptr"));
        assert!(text.contains(r#"call void @"dec"(ptr %r"#));
        assert!(text.contains("store ptr null, ptr"));
    }

    #[test]
    fn managed_slots_start_out_null() {
        let text = emitted(vec![val("a", None, new("A", vec![]))]);

        let first_store = text.lines().find(|line| line.contains("store"));
        assert_eq!(first_store.map(str::trim).map(|l| l.starts_with("store ptr null")), Some(true));
    }

    #[test]
    fn arrays_release_through_the_array_destructor() {
        let text = emitted(vec![val("xs", None, array_literal(vec![int("1"), int("2")]))]);

        assert!(text.contains(r#"call ptr @"Array_constructor"(i32 2, i64 4, ptr null)"#));
        assert!(text.contains(r#"ptr @"Array_destructor")"#));
    }

    #[test]
    fn arrays_of_objects_get_an_element_release_function() {
        let module = lower_units(vec![unit(
            "main",
            vec![
                class("A", None, vec![], None, vec![]),
                main_function(vec![val("xs", None, array_literal(vec![new("A", vec![])]))]),
            ],
        )]);

        let thunk = module
            .function("release.0")
            .map(|f| strip_ansi_escapes::strip_str(f.to_string()))
            .unwrap_or_default();

        assert!(thunk.starts_with(r#"define void @"release.0"(ptr %r0)"#));
        assert!(thunk.contains(r#"call void @"dec"(ptr %r0"#));
        assert!(module.emit().contains(r#"i64 8, ptr @"release.0")"#));
    }

    #[test]
    fn integers_need_no_bookkeeping() {
        let text = emitted(vec![val(
            "x",
            None,
            binary(int("1"), BinaryOperatorKind::Add, int("2")),
        )]);

        assert!(!text.contains("inc"));
        assert!(!text.contains("dec"));
    }
}
