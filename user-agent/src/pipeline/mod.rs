//! Asynchronous receive pipeline: the slot arena and the worker pool that
//! keeps it busy.

pub mod engine;
pub mod slots;

pub use engine::{DispatchEngine, EngineReport, WorkerExit};
pub use slots::{AllocError, ReceiveSlotPool, SlotLease, SlotSets, SlotState};
