pub mod errors;
pub mod eval;
pub mod objective;
pub mod oracle;
pub mod record;
pub mod sentinel;
pub mod space;

pub use errors::*;
pub use eval::*;
pub use objective::*;
pub use oracle::*;
pub use record::*;
pub use space::*;
