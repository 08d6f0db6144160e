pub mod actor;
pub mod order;
pub mod ticket;
pub mod transaction;
pub mod transition;

pub use actor::*;
pub use order::*;
pub use ticket::*;
pub use transaction::*;
pub use transition::*;
