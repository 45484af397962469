//! Static recovery of the signature decipher procedure from a player
//! program. Nothing here executes the program.

pub mod deriver;
pub mod lexer;
pub mod patterns;
pub mod procedure;

pub use deriver::SignatureDecipherDeriver;
pub use procedure::{DecipherProcedure, DecipherStep, Primitive};
