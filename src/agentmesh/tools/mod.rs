//! Example tool implementations exercising the [`Tool`](crate::agentmesh::tool_protocol::Tool)
//! registry and dispatcher end to end.
//!
//! Concrete file/shell/network tools are deliberately out of scope here; `calculator` and
//! `memory` exist to give agents and the test suite something real to dispatch against.

pub mod calculator;
pub mod memory;

pub use calculator::{Calculator, CalculatorError, CalculatorResult, CalculatorTool};
pub use memory::{Memory, MemoryMetadata, MemoryTool};
