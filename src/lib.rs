// src/lib.rs

pub mod agentmesh;

pub use agentmesh::{Agent, AgentResponse, AgentState, AgentStatus, AgentTemplate, Context, Orchestrator, Runtime, RuntimeConfig};
