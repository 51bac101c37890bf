//! Constructors, destructors and the class tables the runtime reads for
//! checked casts.

use std::rc::Rc;

use log::trace;

use crate::{
    index::Index,
    middle::{
        lir::{self, Operand, runtime::RuntimeFunction},
        session::FunctionId,
        tir,
        ty::{CLASS_DESTRUCTOR_FIELD, CLASS_TAG_FIELD, ClassId, PropertyKind},
    },
};

use super::{FunctionLowering, ModuleLowering, lower_signature, lower_type, zero_value};

/// `[N x ptr]` of qualified class names, indexed by tag minus one
pub(super) const NAMES_SYMBOL: &str = "class.names";
/// `[N x i32]` holding the superclass tag of every class, zero for roots
pub(super) const INHERITANCES_SYMBOL: &str = "class.inheritances";

impl<'s> ModuleLowering<'s, '_> {
    /// `ptr @Class::constructor(params...)`: allocates the record, fills in
    /// the header and function slots, then runs the body with the new
    /// object as `this`
    pub(super) fn lower_constructor(&mut self, id: FunctionId, class: ClassId, body: &'s tir::FunctionBody) {
        let session = self.session;
        let definition = &session.types.classes[class];
        let Some(function_type) = session.function_type(id).as_function() else {
            unreachable!("constructors have a function type")
        };

        let layout = self.class_layout(class);
        let destructor = definition
            .destructor
            .map_or(Operand::Null, |destructor| self.function_symbol(destructor));
        let signature = lower_signature(function_type);

        let mut function = FunctionLowering::new(
            self,
            session.functions[id].symbol.clone(),
            lir::Type::Ptr,
            signature.parameters,
        );
        let parameters = function.parameters.clone();

        let object = function.call_runtime(
            RuntimeFunction::Malloc,
            vec![(lir::Type::I64, Operand::Immediate(layout.size() as i64))],
        );

        let header = [
            (0, lir::Type::I32, Operand::Immediate(1)),
            (CLASS_TAG_FIELD, lir::Type::I32, Operand::Immediate(i64::from(class.tag()))),
            (CLASS_DESTRUCTOR_FIELD, lir::Type::Ptr, destructor),
        ];
        for (index, ty, value) in header {
            let pointer = function.field_pointer(layout.clone(), object.clone(), index);
            function.store(ty, value, pointer);
        }

        for (property, definition_property) in definition.stored_properties() {
            let Some(field) = definition.field_index(property) else {
                unreachable!("stored properties have a field")
            };
            let ty = lower_type(&definition_property.ty);
            let value = match definition_property.kind {
                PropertyKind::VirtualMethod(implementation) => function.module.function_symbol(implementation),
                PropertyKind::Field | PropertyKind::Method(_) => zero_value(&ty),
            };

            let pointer = function.field_pointer(layout.clone(), object.clone(), field);
            function.store(ty, value, pointer);
        }

        function.receiver = Some(object.clone());
        function.lower_body(body, &parameters);

        let block = function.return_block();
        function.jump(block);
        function.switch_to(block);
        function.push_instruction(lir::Instruction::Return {
            value: Some((lir::Type::Ptr, object)),
        });
        function.finish();
    }

    /// `void @Class::destructor(ptr this)`: runs the body, releases the
    /// fields this class adds, then hands the record to the superclass
    /// destructor. The root of the chain frees the memory.
    pub(super) fn lower_destructor(&mut self, id: FunctionId, class: ClassId, body: &'s tir::FunctionBody) {
        let session = self.session;
        let classes = &session.types.classes;
        let definition = &classes[class];
        let inherited = definition
            .superclass
            .map_or(0, |superclass| classes[superclass].properties.len());

        let layout = self.class_layout(class);
        let mut function = FunctionLowering::new(
            self,
            session.functions[id].symbol.clone(),
            lir::Type::Void,
            vec![lir::Type::Ptr],
        );
        let this = Operand::from(function.parameters[0]);
        function.receiver = Some(this.clone());

        function.lower_body(body, &[]);
        let block = function.return_block();
        function.jump(block);
        function.switch_to(block);

        for (property, definition_property) in definition.stored_properties().skip_while(|(i, _)| *i < inherited) {
            if definition_property.kind != PropertyKind::Field || !definition_property.ty.is_managed() {
                continue;
            }

            let Some(field) = definition.field_index(property) else {
                unreachable!("fields are stored")
            };
            let pointer = function.field_pointer(layout.clone(), this.clone(), field);
            function.release_slot(pointer, &definition_property.ty);
        }

        match definition.superclass.and_then(|superclass| classes[superclass].destructor) {
            Some(parent) => {
                let callee = function.module.function_symbol(parent);
                function.call(lir::Type::Void, callee, vec![(lir::Type::Ptr, this)]);
            }
            None => {
                function.call_runtime(RuntimeFunction::Free, vec![(lir::Type::Ptr, this)]);
            }
        }

        function.push_instruction(lir::Instruction::Return { value: None });
        function.finish();
    }

    /// Emits the name and inheritance tables indexed by class tag
    pub(super) fn lower_class_metadata(&mut self) {
        let session = self.session;
        let classes = &session.types.classes;
        trace!("emitting metadata for {} classes", classes.len());

        let mut names = Vec::with_capacity(classes.len());
        for class in classes.indices() {
            let mut bytes = session.class_qualified_name(class).into_bytes();
            bytes.push(0);

            let symbol = format!("class.name.{}", class.index());
            self.module.globals.push(lir::GlobalDefinition {
                symbol: symbol.clone(),
                is_constant: true,
                is_private: true,
                ty: lir::Type::Array(Rc::new(lir::Type::I8), bytes.len() as u64),
                initializer: lir::Constant::Bytes(bytes),
            });
            names.push(lir::Constant::Global(symbol));
        }

        let inheritances = classes
            .iter()
            .map(|class| {
                let tag = class.superclass.map_or(0, ClassId::tag);
                lir::Constant::Int(lir::Type::I32, i64::from(tag))
            })
            .collect::<Vec<_>>();

        for (symbol, element, values) in [
            (NAMES_SYMBOL, lir::Type::Ptr, names),
            (INHERITANCES_SYMBOL, lir::Type::I32, inheritances),
        ] {
            let ty = lir::Type::Array(Rc::new(element.clone()), values.len() as u64);
            let initializer = if values.is_empty() {
                lir::Constant::Zero
            } else {
                lir::Constant::Array(element, values)
            };

            self.module.globals.push(lir::GlobalDefinition {
                symbol: symbol.to_owned(),
                is_constant: true,
                is_private: false,
                ty,
                initializer,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{frontend::ast, test_util::*};

    fn function_text(module: &crate::middle::lir::Module, symbol: &str) -> String {
        module
            .function(symbol)
            .map(|f| strip_ansi_escapes::strip_str(f.to_string()))
            .unwrap_or_default()
    }

    #[test]
    fn constructors_fill_in_the_header_and_function_slots() {
        let base = class(
            "A",
            None,
            vec![property("x", named("i32"))],
            Some(constructor(vec![], block(vec![assign(var("x"), int("7"))]))),
            vec![method(
                ast::MethodModifier::Virtual,
                "run",
                vec![],
                None,
                block(vec![]),
            )],
        );
        let module = lower_units(vec![unit("main", vec![base, main_function(vec![])])]);
        let text = function_text(&module, "main::A::constructor");

        // { i32, i32, ptr, i32, ptr }
        assert!(text.contains(r#"call ptr @"malloc"(i64 32)"#));
        assert_eq!(text.matches("store i32 1, ptr").count(), 2);
        assert!(text.contains(r#"store ptr @"main::A::destructor", ptr"#));
        assert!(text.contains("store i32 0, ptr"));
        assert!(text.contains("store i32 7, ptr"));
        assert!(text.contains(r#"store ptr @"main::A::run", ptr"#));
        assert!(text.contains("ret ptr %r"));
    }

    #[test]
    fn destructors_release_own_fields_and_chain_to_the_parent() {
        let classes = vec![
            class(
                "A",
                None,
                vec![property("values", array_of(named("i32")))],
                Some(constructor(
                    vec![],
                    block(vec![assign(var("values"), array_literal(vec![int("1")]))]),
                )),
                vec![],
            ),
            class(
                "B",
                Some("A"),
                vec![property("child", nullable(named("A")))],
                Some(constructor(
                    vec![],
                    block(vec![
                        assign(var("values"), array_literal(vec![int("2")])),
                        assign(var("child"), null()),
                    ]),
                )),
                vec![],
            ),
        ];
        let mut items = classes;
        items.push(main_function(vec![]));
        let module = lower_units(vec![unit("main", items)]);

        let parent = function_text(&module, "main::A::destructor");
        assert!(parent.contains(r#"ptr @"Array_destructor")"#));
        assert!(parent.contains(r#"call void @"free"(ptr %r0)"#));

        let child = function_text(&module, "main::B::destructor");
        assert!(!child.contains("Array_destructor"));
        assert!(child.contains("icmp ne ptr"));
        assert!(child.contains(r#"call void @"main::A::destructor"(ptr %r0)"#));
        assert!(!child.contains("free"));
    }

    #[test]
    fn class_tables_are_indexed_by_tag() {
        let module = lower_units(vec![unit(
            "main",
            vec![
                class("A", None, vec![], None, vec![]),
                class("B", Some("A"), vec![], None, vec![]),
                main_function(vec![]),
            ],
        )]);
        let text = module.emit();

        assert!(text.contains(r#"@"class.name.1" = private constant [8 x i8] c"main::B\00""#));
        assert!(text.contains(
            r#"@"class.names" = constant [2 x ptr] [ptr @"class.name.0", ptr @"class.name.1"]"#
        ));
        assert!(text.contains(r#"@"class.inheritances" = constant [2 x i32] [i32 0, i32 1]"#));
    }

    #[test]
    fn programs_without_classes_get_empty_tables() {
        let module = lower_units(vec![unit("main", vec![main_function(vec![])])]);

        assert!(module.emit().contains(r#"@"class.names" = constant [0 x ptr] zeroinitializer"#));
    }
}
