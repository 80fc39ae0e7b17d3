//! Agentdesk Gateway Library
//!
//! Task orchestration for LLM-backed agents: domain model and storage
//! ports, the agent resolution loop, the coordinator that assigns queued
//! tasks, completion service clients, and the HTTP adapter.

pub mod agents;
pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod llm;
