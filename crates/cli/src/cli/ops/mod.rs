pub mod cat;
pub mod grant;
pub mod hash;
pub mod init;
pub mod key;
pub mod ls;
pub mod mkdir;
pub mod put;
pub mod rm;
pub mod sync;

pub use cat::Cat;
pub use grant::Grant;
pub use hash::Hash;
pub use init::Init;
pub use key::Key;
pub use ls::Ls;
pub use mkdir::Mkdir;
pub use put::Put;
pub use rm::Rm;
pub use sync::SyncOp;
