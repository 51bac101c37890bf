use core::fmt::{Display, Formatter, Result};

use colored::Colorize;
use indoc::indoc;
use itertools::Itertools;

use crate::{index::Index, middle::lir};

const HEADER: &str = indoc! {"
    ; schc module
    ; class records are { i32 refcount, i32 tag, ptr destructor, fields... }
    ; arrays are { i32 refcount, i32 length, ptr data, ptr element_release }
"};

impl lir::Module {
    /// Plain textual IR without terminal colors
    pub fn emit(&self) -> String {
        strip_ansi_escapes::strip_str(self.to_string())
    }

    /// Prints the colored IR of every function to stdout
    pub fn pretty_print(&self) {
        for function in &self.functions {
            println!("{function}");
        }
    }
}

impl Display for lir::Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(f, "{}", HEADER.trim_end().bright_black())?;

        for global in &self.globals {
            writeln!(f, "{global}")?;
        }

        writeln!(f)?;
        for declaration in &self.declarations {
            writeln!(f, "{declaration}")?;
        }

        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }

        Ok(())
    }
}

impl Display for lir::GlobalDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let linkage = if self.is_private { "private " } else { "" };
        let kind = if self.is_constant { "constant" } else { "global" };

        write!(
            f,
            "{} = {}{} {} {}",
            symbol(&self.symbol),
            linkage.magenta(),
            kind.magenta(),
            self.ty,
            self.initializer
        )
    }
}

impl Display for lir::Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            lir::Constant::Zero => write!(f, "{}", "zeroinitializer".purple()),
            lir::Constant::Bytes(bytes) => write!(f, "{}", format!("c\"{}\"", escape_bytes(bytes)).green()),
            lir::Constant::Array(element, values) => write!(
                f,
                "[{}]",
                values.iter().map(|value| format!("{element} {value}")).join(", ")
            ),
            lir::Constant::Int(_, value) => write!(f, "{}", value.to_string().purple()),
            lir::Constant::Global(name) => write!(f, "{}", symbol(name)),
        }
    }
}

impl Display for lir::FunctionDeclaration {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} {} {}({})",
            "declare".magenta(),
            self.return_type,
            symbol(&self.symbol),
            signature(&self.parameters, self.is_variadic)
        )
    }
}

impl Display for lir::FunctionDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(
            f,
            "{} {} {}({}) {{",
            "define".magenta(),
            self.return_type,
            symbol(&self.symbol),
            self.parameters
                .iter()
                .map(|p| format!("{} {p}", self.registers[*p]))
                .join(", ")
        )?;

        for (id, block) in self.blocks.enumerate() {
            if id != lir::BlockId::ENTRY {
                writeln!(f)?;
            }
            writeln!(f, "{}", format!("bb{}:", id.index()).bright_red())?;

            for instruction in &block.instructions {
                writeln!(f, "  {instruction}")?;
            }
        }

        writeln!(f, "}}")
    }
}

impl Display for lir::Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            lir::Instruction::Alloca { destination, ty } => {
                write!(f, "{destination} = {} {ty}", "alloca".cyan())
            }
            lir::Instruction::Load {
                destination,
                ty,
                pointer,
            } => write!(f, "{destination} = {} {ty}, ptr {pointer}", "load".cyan()),
            lir::Instruction::Store { ty, value, pointer } => {
                write!(f, "{} {ty} {value}, ptr {pointer}", "store".cyan())
            }
            lir::Instruction::FieldPointer {
                destination,
                ty,
                pointer,
                index,
            } => write!(
                f,
                "{destination} = {} {ty}, ptr {pointer}, i32 0, i32 {}",
                "getelementptr".cyan(),
                index.to_string().purple()
            ),
            lir::Instruction::ExtractValue {
                destination,
                ty,
                aggregate,
                index,
            } => write!(
                f,
                "{destination} = {} {ty} {aggregate}, {}",
                "extractvalue".cyan(),
                index.to_string().purple()
            ),
            lir::Instruction::InsertValue {
                destination,
                ty,
                aggregate,
                field_type,
                value,
                index,
            } => write!(
                f,
                "{destination} = {} {ty} {aggregate}, {field_type} {value}, {}",
                "insertvalue".cyan(),
                index.to_string().purple()
            ),
            lir::Instruction::Binary {
                operation,
                destination,
                ty,
                lhs,
                rhs,
            } => write!(f, "{destination} = {} {ty} {lhs}, {rhs}", operation.to_string().cyan()),
            lir::Instruction::Compare {
                predicate,
                destination,
                ty,
                lhs,
                rhs,
            } => write!(
                f,
                "{destination} = {} {predicate} {ty} {lhs}, {rhs}",
                "icmp".cyan()
            ),
            lir::Instruction::Cast {
                kind,
                destination,
                from,
                value,
                to,
            } => write!(f, "{destination} = {} {from} {value} to {to}", kind.to_string().cyan()),
            lir::Instruction::Select {
                destination,
                condition,
                ty,
                positive,
                negative,
            } => write!(
                f,
                "{destination} = {} i1 {condition}, {ty} {positive}, {ty} {negative}",
                "select".cyan()
            ),
            lir::Instruction::Call {
                destination,
                return_type,
                variadic_parameters,
                callee,
                arguments,
            } => {
                if let Some(destination) = destination {
                    write!(f, "{destination} = ")?;
                }

                write!(f, "{} {return_type}", "call".cyan())?;
                if let Some(parameters) = variadic_parameters {
                    write!(f, " ({})", signature(parameters, true))?;
                }

                write!(
                    f,
                    " {callee}({})",
                    arguments
                        .iter()
                        .map(|(ty, value)| format!("{ty} {value}"))
                        .join(", ")
                )
            }
            lir::Instruction::Branch {
                condition,
                positive,
                negative,
            } => write!(
                f,
                "{} i1 {condition}, label {positive}, label {negative}",
                "br".cyan()
            ),
            lir::Instruction::Jump { destination } => {
                write!(f, "{} label {destination}", "br".cyan())
            }
            lir::Instruction::Return { value: Some((ty, value)) } => {
                write!(f, "{} {ty} {value}", "ret".cyan())
            }
            lir::Instruction::Return { value: None } => write!(f, "{} void", "ret".cyan()),
            lir::Instruction::Phi {
                destination,
                ty,
                sources,
            } => write!(
                f,
                "{destination} = {} {ty} {}",
                "phi".bright_green(),
                sources
                    .iter()
                    .map(|(value, block)| format!("[ {value}, {block} ]"))
                    .join(", ")
            ),
        }
    }
}

impl Display for lir::BinaryOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match self {
            lir::BinaryOperation::Add => "add",
            lir::BinaryOperation::Sub => "sub",
            lir::BinaryOperation::Mul => "mul",
            lir::BinaryOperation::SDiv => "sdiv",
            lir::BinaryOperation::UDiv => "udiv",
            lir::BinaryOperation::SRem => "srem",
            lir::BinaryOperation::URem => "urem",
            lir::BinaryOperation::And => "and",
            lir::BinaryOperation::Or => "or",
            lir::BinaryOperation::Xor => "xor",
            lir::BinaryOperation::Shl => "shl",
            lir::BinaryOperation::AShr => "ashr",
            lir::BinaryOperation::LShr => "lshr",
        })
    }
}

impl Display for lir::Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match self {
            lir::Predicate::Eq => "eq",
            lir::Predicate::Ne => "ne",
            lir::Predicate::Slt => "slt",
            lir::Predicate::Sle => "sle",
            lir::Predicate::Sgt => "sgt",
            lir::Predicate::Sge => "sge",
            lir::Predicate::Ult => "ult",
            lir::Predicate::Ule => "ule",
            lir::Predicate::Ugt => "ugt",
            lir::Predicate::Uge => "uge",
        })
    }
}

impl Display for lir::CastKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match self {
            lir::CastKind::Trunc => "trunc",
            lir::CastKind::SExt => "sext",
            lir::CastKind::ZExt => "zext",
        })
    }
}

impl Display for lir::RegisterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", format!("%r{}", self.index()).yellow())
    }
}

impl Display for lir::BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "%bb{}", self.index())
    }
}

impl Display for lir::Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            lir::Operand::Register(register) => write!(f, "{register}"),
            lir::Operand::Immediate(value) => write!(f, "{}", value.to_string().purple()),
            lir::Operand::Null => write!(f, "{}", "null".purple()),
            lir::Operand::Undef => write!(f, "{}", "undef".purple()),
            lir::Operand::Zero => write!(f, "{}", "zeroinitializer".purple()),
            lir::Operand::Global(name) => write!(f, "{}", symbol(name)),
        }
    }
}

impl Display for lir::Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            lir::Type::Void => write!(f, "void"),
            lir::Type::Int(bits) => write!(f, "i{bits}"),
            lir::Type::Ptr => write!(f, "ptr"),
            lir::Type::Struct(fields) => write!(f, "{{ {} }}", fields.iter().join(", ")),
            lir::Type::Array(element, length) => write!(f, "[{length} x {element}]"),
        }
    }
}

fn symbol(name: &str) -> String {
    format!("@\"{name}\"").blue().to_string()
}

fn signature(parameters: &[lir::Type], is_variadic: bool) -> String {
    let mut signature = parameters.iter().join(", ");

    if is_variadic {
        if !parameters.is_empty() {
            signature.push_str(", ");
        }
        signature.push_str("...");
    }

    signature
}

/// Printable ASCII stays as is, everything else becomes `\XX`
fn escape_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| match byte {
            b'"' | b'\\' => format!("\\{byte:02X}"),
            0x20..=0x7e => char::from(*byte).to_string(),
            _ => format!("\\{byte:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use indoc::indoc;

    use super::*;
    use crate::index::IndexVec;

    #[test]
    fn emitted_text_has_no_color_codes() {
        colored::control::set_override(true);

        let mut registers = IndexVec::new();
        let slot = registers.push(lir::Type::Ptr);
        let value = registers.push(lir::Type::I32);

        let mut blocks = IndexVec::new();
        blocks.push(lir::Block {
            instructions: vec![
                lir::Instruction::Alloca {
                    destination: slot,
                    ty: lir::Type::I32,
                },
                lir::Instruction::Store {
                    ty: lir::Type::I32,
                    value: lir::Operand::Immediate(-7),
                    pointer: slot.into(),
                },
                lir::Instruction::Load {
                    destination: value,
                    ty: lir::Type::I32,
                    pointer: slot.into(),
                },
                lir::Instruction::Return {
                    value: Some((lir::Type::I32, value.into())),
                },
            ],
        });

        let module = lir::Module {
            globals: vec![lir::GlobalDefinition {
                symbol: "str.0".to_owned(),
                is_constant: true,
                is_private: true,
                ty: lir::Type::Array(Rc::new(lir::Type::I8), 4),
                initializer: lir::Constant::Bytes(b"a\"b\0".to_vec()),
            }],
            declarations: vec![lir::FunctionDeclaration {
                symbol: "printf".to_owned(),
                return_type: lir::Type::I32,
                parameters: vec![lir::Type::Ptr],
                is_variadic: true,
            }],
            functions: vec![lir::FunctionDefinition {
                symbol: "main::f".to_owned(),
                return_type: lir::Type::I32,
                parameters: Vec::new(),
                registers,
                blocks,
            }],
        };

        let text = module.emit();
        colored::control::unset_override();

        assert!(!text.contains('\u{1b}'));
        assert!(text.ends_with(indoc! {r#"
            @"str.0" = private constant [4 x i8] c"a\22b\00"

            declare i32 @"printf"(ptr, ...)

            define i32 @"main::f"() {
            bb0:
              %r0 = alloca i32
              store i32 -7, ptr %r0
              %r1 = load i32, ptr %r0
              ret i32 %r1
            }
        "#}));
    }
}
