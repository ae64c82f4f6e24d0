mod approval;
mod checkpoint;
mod ledger;
mod plan;
mod task;

pub use approval::*;
pub use checkpoint::*;
pub use ledger::*;
pub use plan::*;
pub use task::*;
