//! External functions the emitted code calls into. Names and signatures are
//! fixed by the runtime library linked against every program.

use strum::{EnumIter, IntoEnumIterator};

use crate::middle::lir::{FunctionDeclaration, Type};

macro_rules! abi_type {
    (void) => {
        Type::Void
    };
    (ptr) => {
        Type::Ptr
    };
    (i1) => {
        Type::BOOL
    };
    (i32) => {
        Type::I32
    };
    (i64) => {
        Type::I64
    };
}

macro_rules! runtime_functions {
    (@variadic) => {
        false
    };
    (@variadic $variadic:literal) => {
        $variadic
    };
    ($($name:ident: $return_type:ident ($($parameter:ident),*) $(, variadic = $variadic:literal)?;)*) => {
        paste::paste! {
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
            pub enum RuntimeFunction {
                $([<$name:camel>],)*
            }

            impl RuntimeFunction {
                pub fn symbol(self) -> &'static str {
                    match self {
                        $(Self::[<$name:camel>] => stringify!($name),)*
                    }
                }

                pub fn declaration(self) -> FunctionDeclaration {
                    match self {
                        $(Self::[<$name:camel>] => FunctionDeclaration {
                            symbol: stringify!($name).to_owned(),
                            return_type: abi_type!($return_type),
                            parameters: vec![$(abi_type!($parameter)),*],
                            is_variadic: runtime_functions!(@variadic $($variadic)?),
                        },)*
                    }
                }
            }
        }
    };
}

runtime_functions! {
    malloc: ptr(i64);
    free: void(ptr);
    inc: void(ptr);
    inc_d: void(ptr);
    dec: void(ptr, ptr);
    String_constructor: ptr(i32, ptr);
    Array_constructor: ptr(i32, i64, ptr);
    Array_constructor2: ptr(i32, i64, ptr, ptr);
    Array_destructor: void(ptr);
    Array_get: ptr(ptr, i32, i32, ptr);
    null_assert: void(ptr, ptr);
    is_subclass: i1(ptr, i32, ptr);
    is_subclass_assert: void(ptr, i32, ptr, ptr, ptr);
    printf: i32(ptr), variadic = true;
}

impl RuntimeFunction {
    pub fn return_type(self) -> Type {
        self.declaration().return_type
    }

    /// Declarations of the whole runtime, in a stable order
    pub fn declarations() -> Vec<FunctionDeclaration> {
        Self::iter().map(Self::declaration).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_keep_their_runtime_spelling() {
        assert_eq!(RuntimeFunction::StringConstructor.symbol(), "String_constructor");
        assert_eq!(RuntimeFunction::IncD.symbol(), "inc_d");
        assert_eq!(RuntimeFunction::ArrayConstructor2.symbol(), "Array_constructor2");
        assert_eq!(RuntimeFunction::IsSubclassAssert.symbol(), "is_subclass_assert");
    }

    #[test]
    fn only_printf_is_variadic() {
        let variadic = RuntimeFunction::declarations()
            .into_iter()
            .filter(|d| d.is_variadic)
            .map(|d| d.symbol)
            .collect::<Vec<_>>();

        assert_eq!(variadic, vec!["printf".to_owned()]);
    }

    #[test]
    fn signatures_match_the_abi() {
        let get = RuntimeFunction::ArrayGet.declaration();
        assert_eq!(get.return_type, Type::Ptr);
        assert_eq!(get.parameters, vec![Type::Ptr, Type::I32, Type::I32, Type::Ptr]);

        assert_eq!(RuntimeFunction::IsSubclass.return_type(), Type::BOOL);
        assert_eq!(RuntimeFunction::Malloc.declaration().parameters, vec![Type::I64]);
    }
}
