pub mod args;
pub mod names;
pub mod op;
pub mod ops;

pub use ops::{Cat, Grant, Hash, Init, Key, Ls, Mkdir, Put, Rm, SyncOp};
