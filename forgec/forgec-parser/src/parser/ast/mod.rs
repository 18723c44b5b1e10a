mod decl;
mod expr;
mod types;

pub use decl::*;
pub use expr::*;
pub use types::*;
