//! Everything after parsing. Names are resolved and the surface tree is
//! elaborated into TIR, which is then lowered and flattened to LIR.

pub mod elaborate;
pub mod error;
pub mod lir;
pub mod primitive;
pub mod resolve;
pub mod scope;
pub mod session;
pub mod tir;
pub mod ty;
