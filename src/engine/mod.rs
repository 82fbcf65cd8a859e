//! Job lifecycle: the job envelope, the streaming worker and terminal mode.

pub mod job;
pub mod terminal;
pub mod worker;

pub use job::JobEnvelope;
pub use terminal::TerminalRun;
pub use worker::{JobOutcome, Worker};
