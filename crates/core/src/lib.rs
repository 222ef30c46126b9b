//! Teach-back tutor core: the concept content store, the tutoring modes and
//! their personas, the MCP tool service the personas call, and the LLM client.

pub mod agent;
pub mod concept;
pub mod llm_client;
pub mod mode;
pub mod persona;
