//! Lowers elaborated TIR into a LIR module. Each function body becomes one
//! LIR function whose locals and temporaries live in entry block slots, with
//! reference counting made explicit on every scope exit.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use log::{debug, trace};

use crate::{
    frontend::Span,
    index::{Index, IndexVec},
    middle::{
        lir::{self, BlockId, Operand, RegisterId, runtime::RuntimeFunction},
        primitive::IntKind,
        session::{CompilationSession, FunctionId, FunctionKind, GlobalKind},
        tir::{self, ExprId, LocalId},
        ty::{self, ClassId, FunctionType, TypeKind},
    },
};

mod class;
mod expr;
mod memory;
mod stmt;

use memory::OwnedSlot;

/// Symbol of the synthesized process entry point
pub const ENTRY_SYMBOL: &str = "main";

pub fn lower_to_lir(session: &CompilationSession) -> lir::Module {
    debug!("lowering {} functions to LIR", session.functions.len());

    let mut lowering = ModuleLowering::new(session);
    lowering.lower_globals();

    for (id, function) in session.functions.enumerate() {
        if let Some(body) = &function.body {
            lowering.lower_function(id, body);
        }
    }

    if let Some(entry) = session.entry_point {
        lowering.lower_entry_point(entry);
    }

    lowering.lower_class_metadata();
    lowering.module
}

pub(super) fn lower_type(ty: &ty::Type) -> lir::Type {
    match &**ty {
        TypeKind::Void => lir::Type::Void,
        TypeKind::Bool => lir::Type::BOOL,
        TypeKind::Integer(kind) => lir::Type::int(*kind),
        TypeKind::Array(_) | TypeKind::Nullable(_) | TypeKind::Class { .. } | TypeKind::Function(_) => {
            lir::Type::Ptr
        }
        TypeKind::Tuple(fields) => lir::Type::structure(fields.iter().map(|f| lower_type(&f.ty))),
    }
}

/// `{ i32 refcount, i32 tag, ptr destructor }`, shared by every class record
pub(super) fn class_header() -> lir::Type {
    lir::Type::structure([lir::Type::I32, lir::Type::I32, lir::Type::Ptr])
}

/// `{ i32 refcount, i32 length, ptr data, ptr element_release }`
pub(super) fn array_record() -> lir::Type {
    lir::Type::structure([lir::Type::I32, lir::Type::I32, lir::Type::Ptr, lir::Type::Ptr])
}

pub(super) fn zero_value(ty: &lir::Type) -> Operand {
    match ty {
        lir::Type::Ptr => Operand::Null,
        lir::Type::Int(_) => Operand::Immediate(0),
        _ => Operand::Zero,
    }
}

struct Signature {
    return_type: lir::Type,
    parameters: Vec<lir::Type>,
}

fn lower_signature(function: &FunctionType) -> Signature {
    Signature {
        return_type: lower_type(&function.return_type),
        parameters: function
            .receiver
            .iter()
            .chain(function.parameters.iter())
            .map(lower_type)
            .collect(),
    }
}

/// Module wide lowering state: constants are shared by every function
pub(super) struct ModuleLowering<'s, 'a> {
    session: &'s CompilationSession<'a>,
    module: lir::Module,
    constants: HashMap<Vec<u8>, String>,
    locations: HashMap<Span, String>,
    release_functions: HashMap<ty::Type, String>,
}

impl<'s, 'a> ModuleLowering<'s, 'a> {
    fn new(session: &'s CompilationSession<'a>) -> Self {
        Self {
            session,
            module: lir::Module {
                declarations: RuntimeFunction::declarations(),
                ..Default::default()
            },
            constants: HashMap::new(),
            locations: HashMap::new(),
            release_functions: HashMap::new(),
        }
    }

    /// Private byte array constant, deduplicated by content
    fn constant(&mut self, bytes: Vec<u8>) -> Operand {
        if let Some(symbol) = self.constants.get(&bytes) {
            return Operand::Global(symbol.clone());
        }

        let symbol = format!("str.{}", self.constants.len());
        self.module.globals.push(lir::GlobalDefinition {
            symbol: symbol.clone(),
            is_constant: true,
            is_private: true,
            ty: lir::Type::Array(Rc::new(lir::Type::I8), bytes.len() as u64),
            initializer: lir::Constant::Bytes(bytes.clone()),
        });
        self.constants.insert(bytes, symbol.clone());

        Operand::Global(symbol)
    }

    fn c_string(&mut self, text: &str) -> Operand {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.constant(bytes)
    }

    /// `path:line:column` of `span` as a C string, passed to runtime traps
    fn location(&mut self, span: Span) -> Operand {
        if let Some(symbol) = self.locations.get(&span) {
            return Operand::Global(symbol.clone());
        }

        let mut bytes = self.session.sources.format_span_position(span).into_bytes();
        bytes.push(0);

        let symbol = format!("loc.{}", self.locations.len());
        self.module.globals.push(lir::GlobalDefinition {
            symbol: symbol.clone(),
            is_constant: true,
            is_private: true,
            ty: lir::Type::Array(Rc::new(lir::Type::I8), bytes.len() as u64),
            initializer: lir::Constant::Bytes(bytes),
        });
        self.locations.insert(span, symbol.clone());

        Operand::Global(symbol)
    }

    /// Header followed by every stored property, inherited ones first
    fn class_layout(&self, class: ClassId) -> lir::Type {
        let header = [lir::Type::I32, lir::Type::I32, lir::Type::Ptr];
        let properties = self.session.types.classes[class]
            .stored_properties()
            .map(|(_, p)| lower_type(&p.ty))
            .collect::<Vec<_>>();

        lir::Type::structure(header.into_iter().chain(properties))
    }

    fn function_symbol(&self, function: FunctionId) -> Operand {
        Operand::Global(self.session.functions[function].symbol.clone())
    }

    fn lower_globals(&mut self) {
        let session = self.session;

        for global in session.globals.iter() {
            if let GlobalKind::Variable { .. } = global.kind {
                let ty = global
                    .ty
                    .as_ref()
                    .unwrap_or_else(|| unreachable!("global signatures are resolved before lowering"));

                self.module.globals.push(lir::GlobalDefinition {
                    symbol: global.symbol.clone(),
                    is_constant: false,
                    is_private: false,
                    ty: lower_type(ty),
                    initializer: lir::Constant::Zero,
                });
            }
        }
    }

    fn lower_function(&mut self, id: FunctionId, body: &'s tir::FunctionBody) {
        let session = self.session;
        let definition = &session.functions[id];
        trace!("lowering '{}'", definition.symbol);

        let Some(function_type) = session.function_type(id).as_function() else {
            unreachable!("functions always have a function type")
        };

        match definition.kind {
            FunctionKind::Constructor(class) => self.lower_constructor(id, class, body),
            FunctionKind::Destructor(class) => self.lower_destructor(id, class, body),
            FunctionKind::Free | FunctionKind::Method { .. } | FunctionKind::Lambda => {
                let signature = lower_signature(function_type);
                let mut function = FunctionLowering::new(
                    self,
                    definition.symbol.clone(),
                    signature.return_type,
                    signature.parameters,
                );

                let mut parameters = function.parameters.clone();
                if function_type.receiver.is_some() {
                    function.receiver = Some(parameters.remove(0).into());
                }
                if !function_type.return_type.is_void() {
                    let slot = function.create_slot(&function_type.return_type);
                    function.return_value = Some((slot, function_type.return_type.clone()));
                }

                function.lower_body(body, &parameters);
                function.lower_return_block();
                function.finish();
            }
        }
    }

    /// `i32 @main()`: runs global initializers in order, calls the entry
    /// function, then releases every global
    fn lower_entry_point(&mut self, entry: FunctionId) {
        let session = self.session;
        debug!("synthesizing entry point around '{}'", session.functions[entry].symbol);

        let Some(entry_type) = session.function_type(entry).as_function() else {
            unreachable!("functions always have a function type")
        };

        let mut function =
            FunctionLowering::new(self, ENTRY_SYMBOL.to_owned(), lir::Type::I32, Vec::new());

        for initializer in &session.global_initializers {
            function.lower_body(initializer, &[]);
        }

        let callee = function.module.function_symbol(entry);
        let result = function.call(lower_type(&entry_type.return_type), callee, Vec::new());
        let status = match entry_type.return_type.as_integer() {
            Some(kind) => function.resize_integer(result, kind, 32),
            None => Operand::Immediate(0),
        };

        for global in session.globals.iter() {
            if let (GlobalKind::Variable { .. }, Some(ty)) = (global.kind, &global.ty) {
                function.release_slot(Operand::Global(global.symbol.clone()), ty);
            }
        }

        function.push_instruction(lir::Instruction::Return {
            value: Some((lir::Type::I32, status)),
        });
        function.finish();
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopTargets {
    next: BlockId,
    end: BlockId,
    /// Scopes at and above this depth belong to the loop body
    depth: usize,
}

/// Builds one LIR function. Instructions emitted while the current block is
/// unreachable are dropped, and blocks no reachable code jumps to are removed
/// when the function is finished.
pub(super) struct FunctionLowering<'m, 's, 'a> {
    module: &'m mut ModuleLowering<'s, 'a>,
    session: &'s CompilationSession<'a>,
    symbol: String,
    return_type: lir::Type,
    parameters: Vec<RegisterId>,
    registers: IndexVec<RegisterId, lir::Type>,
    blocks: IndexVec<BlockId, lir::Block>,
    /// Slot allocations and their zero initialization, placed at the top of
    /// the entry block
    prologue: Vec<lir::Instruction>,
    current_block: BlockId,
    reachable: bool,
    reachable_blocks: HashSet<BlockId>,

    locals: Option<&'s IndexVec<LocalId, tir::Local>>,
    local_slots: HashMap<LocalId, RegisterId>,
    /// Lowered value of every expression, so shared nodes run once
    values: HashMap<ExprId, Operand>,
    scopes: Vec<Vec<OwnedSlot>>,
    loops: Vec<LoopTargets>,

    receiver: Option<Operand>,
    return_block: Option<BlockId>,
    return_value: Option<(RegisterId, ty::Type)>,
}

impl<'m, 's, 'a> FunctionLowering<'m, 's, 'a> {
    fn new(
        module: &'m mut ModuleLowering<'s, 'a>,
        symbol: String,
        return_type: lir::Type,
        parameter_types: Vec<lir::Type>,
    ) -> Self {
        let session = module.session;
        let mut registers = IndexVec::new();
        let parameters = parameter_types
            .into_iter()
            .map(|ty| registers.push(ty))
            .collect();

        let mut blocks = IndexVec::new();
        let entry = blocks.push(lir::Block::default());

        Self {
            module,
            session,
            symbol,
            return_type,
            parameters,
            registers,
            blocks,
            prologue: Vec::new(),
            current_block: entry,
            reachable: true,
            reachable_blocks: HashSet::from([entry]),
            locals: None,
            local_slots: HashMap::new(),
            values: HashMap::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            receiver: None,
            return_block: None,
            return_value: None,
        }
    }

    fn create_register(&mut self, ty: lir::Type) -> RegisterId {
        self.registers.push(ty)
    }

    fn create_block(&mut self) -> BlockId {
        self.blocks.push(lir::Block::default())
    }

    fn push_instruction(&mut self, instruction: lir::Instruction) {
        if !self.reachable {
            return;
        }

        if instruction.is_terminator() {
            self.reachable_blocks.extend(instruction.successors());
            self.reachable = false;
        }

        self.blocks[self.current_block].instructions.push(instruction);
    }

    /// Continues emission in `block`, which is reachable only if reachable
    /// code already branched to it
    fn switch_to(&mut self, block: BlockId) {
        self.current_block = block;
        self.reachable = self.reachable_blocks.contains(&block);
    }

    fn local(&self, local: LocalId) -> &'s tir::Local {
        match self.locals {
            Some(locals) => &locals[local],
            None => unreachable!("locals are only read while lowering a body"),
        }
    }

    fn return_block(&mut self) -> BlockId {
        match self.return_block {
            Some(block) => block,
            None => {
                let block = self.create_block();
                self.return_block = Some(block);
                block
            }
        }
    }

    /// Lowers `body` into the current position: parameters are copied into
    /// retained slots, released again when the body is left
    fn lower_body(&mut self, body: &'s tir::FunctionBody, parameters: &[RegisterId]) {
        self.locals = Some(&body.locals);
        self.local_slots.clear();
        self.values.clear();

        self.enter_scope();
        for (&local, &register) in body.parameters.iter().zip(parameters) {
            let ty = &self.local(local).ty;
            self.declare_locals(&[local]);

            let slot = self.local_slot(local);
            self.store(lower_type(ty), register.into(), slot.into());
            self.retain_slot(slot.into(), ty);
        }

        self.lower_block(&body.block);
        self.exit_scope();
    }

    /// Falls through into the single return block and returns the value left
    /// in the return slot
    fn lower_return_block(&mut self) {
        let block = self.return_block();
        self.jump(block);
        self.switch_to(block);

        let value = self.return_value.clone().map(|(slot, ty)| {
            let ty = lower_type(&ty);
            (ty.clone(), self.load(ty, slot.into()))
        });
        self.push_instruction(lir::Instruction::Return { value });
    }

    fn finish(self) {
        let Self {
            module,
            symbol,
            return_type,
            parameters,
            registers,
            mut blocks,
            prologue,
            reachable_blocks,
            ..
        } = self;

        let entry = &mut blocks[BlockId::ENTRY].instructions;
        entry.splice(0..0, prologue);

        // renumber the blocks that survive
        let mut renumbered = HashMap::new();
        let mut kept = IndexVec::new();
        for (id, block) in blocks.raw.into_iter().enumerate() {
            let id = BlockId::new(id);
            if reachable_blocks.contains(&id) {
                renumbered.insert(id, kept.push(block));
            }
        }

        for block in kept.iter_mut() {
            for instruction in &mut block.instructions {
                for target in instruction.blocks_mut() {
                    *target = renumbered[&*target];
                }
            }
        }

        module.module.functions.push(lir::FunctionDefinition {
            symbol,
            return_type,
            parameters,
            registers,
            blocks: kept,
        });
    }

    fn jump(&mut self, destination: BlockId) {
        self.push_instruction(lir::Instruction::Jump { destination });
    }

    fn branch(&mut self, condition: Operand, positive: BlockId, negative: BlockId) {
        self.push_instruction(lir::Instruction::Branch {
            condition,
            positive,
            negative,
        });
    }

    fn load(&mut self, ty: lir::Type, pointer: Operand) -> Operand {
        let destination = self.create_register(ty.clone());
        self.push_instruction(lir::Instruction::Load {
            destination,
            ty,
            pointer,
        });
        destination.into()
    }

    fn store(&mut self, ty: lir::Type, value: Operand, pointer: Operand) {
        self.push_instruction(lir::Instruction::Store { ty, value, pointer });
    }

    fn field_pointer(&mut self, ty: lir::Type, pointer: Operand, index: u32) -> Operand {
        let destination = self.create_register(lir::Type::Ptr);
        self.push_instruction(lir::Instruction::FieldPointer {
            destination,
            ty,
            pointer,
            index,
        });
        destination.into()
    }

    fn extract_value(&mut self, ty: lir::Type, aggregate: Operand, index: u32) -> Operand {
        let lir::Type::Struct(fields) = &ty else {
            unreachable!("only structs have fields")
        };

        let destination = self.create_register(fields[index as usize].clone());
        self.push_instruction(lir::Instruction::ExtractValue {
            destination,
            ty,
            aggregate,
            index,
        });
        destination.into()
    }

    fn binary(
        &mut self,
        operation: lir::BinaryOperation,
        ty: lir::Type,
        lhs: Operand,
        rhs: Operand,
    ) -> Operand {
        let destination = self.create_register(ty.clone());
        self.push_instruction(lir::Instruction::Binary {
            operation,
            destination,
            ty,
            lhs,
            rhs,
        });
        destination.into()
    }

    fn compare(&mut self, predicate: lir::Predicate, ty: lir::Type, lhs: Operand, rhs: Operand) -> Operand {
        let destination = self.create_register(lir::Type::BOOL);
        self.push_instruction(lir::Instruction::Compare {
            predicate,
            destination,
            ty,
            lhs,
            rhs,
        });
        destination.into()
    }

    /// Sign or zero extends (by the signedness of `kind`) or truncates an
    /// integer of `kind` to `bits`
    fn resize_integer(&mut self, value: Operand, kind: IntKind, bits: u32) -> Operand {
        let from = lir::Type::int(kind);
        let to = lir::Type::Int(bits);

        let cast = match kind.bit_width().cmp(&bits) {
            core::cmp::Ordering::Equal => return value,
            core::cmp::Ordering::Less if kind.is_signed() => lir::CastKind::SExt,
            core::cmp::Ordering::Less => lir::CastKind::ZExt,
            core::cmp::Ordering::Greater => lir::CastKind::Trunc,
        };

        let destination = self.create_register(to.clone());
        self.push_instruction(lir::Instruction::Cast {
            kind: cast,
            destination,
            from,
            value,
            to,
        });
        destination.into()
    }

    /// Direct or indirect call. Yields `undef` for `void` callees.
    fn call(&mut self, return_type: lir::Type, callee: Operand, arguments: Vec<(lir::Type, Operand)>) -> Operand {
        self.call_with(return_type, None, callee, arguments)
    }

    fn call_with(
        &mut self,
        return_type: lir::Type,
        variadic_parameters: Option<Vec<lir::Type>>,
        callee: Operand,
        arguments: Vec<(lir::Type, Operand)>,
    ) -> Operand {
        let destination = (return_type != lir::Type::Void).then(|| self.create_register(return_type.clone()));

        self.push_instruction(lir::Instruction::Call {
            destination,
            return_type,
            variadic_parameters,
            callee,
            arguments,
        });

        destination.map_or(Operand::Undef, Operand::from)
    }

    fn call_runtime(&mut self, function: RuntimeFunction, arguments: Vec<(lir::Type, Operand)>) -> Operand {
        let declaration = function.declaration();
        let variadic_parameters = declaration.is_variadic.then_some(declaration.parameters);

        self.call_with(
            declaration.return_type,
            variadic_parameters,
            Operand::Global(declaration.symbol),
            arguments,
        )
    }

    /// Switches to `merge` and joins the values of its predecessors. Without
    /// predecessors `merge` is unreachable and the value is `undef`.
    fn merge_values(&mut self, merge: BlockId, ty: lir::Type, sources: Vec<(Operand, BlockId)>) -> Operand {
        self.switch_to(merge);

        if sources.is_empty() || ty == lir::Type::Void {
            return Operand::Undef;
        }

        let destination = self.create_register(ty.clone());
        self.push_instruction(lir::Instruction::Phi {
            destination,
            ty,
            sources,
        });
        destination.into()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{frontend::ast::BinaryOperatorKind, test_util::*};

    #[test]
    fn straight_line_functions_keep_one_return_block() {
        let module = lower_units(vec![unit(
            "main",
            vec![
                function(
                    "add",
                    vec![parameter("a", named("i32")), parameter("b", named("i32"))],
                    Some(named("i32")),
                    block(vec![return_value(binary(var("a"), BinaryOperatorKind::Add, var("b")))]),
                ),
                main_function(vec![]),
            ],
        )]);

        let add = module.function("main::add").map(ToString::to_string);
        let add = add.map(|text| strip_ansi_escapes::strip_str(text));

        assert_eq!(
            add.as_deref(),
            Some(indoc! {r#"
                define i32 @"main::add"(i32 %r0, i32 %r1) {
                bb0:
                  %r2 = alloca i32
                  %r3 = alloca i32
                  %r4 = alloca i32
                  store i32 %r0, ptr %r3
                  store i32 %r1, ptr %r4
                  %r5 = load i32, ptr %r3
                  %r6 = load i32, ptr %r4
                  %r7 = add i32 %r5, %r6
                  store i32 %r7, ptr %r2
                  br label %bb1

                bb1:
                  %r8 = load i32, ptr %r2
                  ret i32 %r8
                }
            "#})
        );
    }

    #[test]
    fn entry_point_wraps_the_user_main() {
        let module = lower_units(vec![unit(
            "main",
            vec![function("main", vec![], Some(named("i64")), block(vec![return_value(int("3"))]))],
        )]);

        let entry = module.function(ENTRY_SYMBOL).map(|f| strip_ansi_escapes::strip_str(f.to_string()));
        let entry = entry.unwrap_or_default();

        assert!(entry.contains(r#"%r0 = call i64 @"main::main"()"#));
        assert!(entry.contains("%r1 = trunc i64 %r0 to i32"));
        assert!(entry.contains("ret i32 %r1"));
    }

    #[test]
    fn unreachable_blocks_are_dropped() {
        let module = lower_units(vec![unit(
            "main",
            vec![main_function(vec![
                while_loop(boolean(true), block(vec![return_void()])),
                return_void(),
            ])],
        )]);

        let main = module.function("main::main").map(|f| f.blocks.len());

        // entry, condition, body, end, return
        assert_eq!(main, Some(5));
    }

    #[test]
    fn runtime_is_declared_once() {
        let module = lower_units(vec![unit("main", vec![main_function(vec![])])]);

        let text = module.emit();
        assert_eq!(text.matches(r#"declare void @"dec"(ptr, ptr)"#).count(), 1);
        assert!(text.contains(r#"declare i32 @"printf"(ptr, ...)"#));
    }
}
