//! A multi-agent LLM orchestration runtime: agents parse free-text LLM turns into typed
//! actions, dispatch tools, launch and await subagents, and exchange peer messages under a
//! single cooperative `tokio` scheduler.

pub mod agent;
pub mod config;
pub mod context;
pub mod context_strategy;
pub mod event;
pub mod llm;
pub mod llm_session;
pub mod message;
pub mod message_bus;
pub mod orchestrator;
pub mod parser;
pub mod permissions;
pub mod runtime;
pub mod skill;
pub mod tool_protocol;
pub mod tools;
pub mod truncation;

pub use agent::{Agent, AgentResponse, AgentState, AgentStatus, AgentTemplate};
pub use config::RuntimeConfig;
pub use context::Context;
pub use orchestrator::Orchestrator;
pub use runtime::Runtime;
