//! Deferred sends: the pending queue and the loop that fires it.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{DispatchOutcome, ScheduleDispatcher};
pub use queue::{PendingSchedule, ScheduleQueue, ScheduleRejection};
