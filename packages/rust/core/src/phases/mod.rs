//! One module per build phase. Each `run` consumes the fully merged output
//! of the phases before it.

pub(crate) mod emit;
pub(crate) mod indices;
pub(crate) mod load;
pub(crate) mod parse;
pub(crate) mod process;
pub(crate) mod save;
pub(crate) mod warm;
