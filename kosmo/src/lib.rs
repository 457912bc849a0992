#![cfg_attr(docsrs, feature(doc_cfg))]
//! Kosmo is an agent execution runtime: it drives conversational agents
//! through iterated LLM calls and tool invocations, streams structured
//! events to any number of independent consumers, and gates sensitive
//! actions through human approval.
//!
//! The crate is the *core* of an agent system, not the whole of one. It
//! deliberately performs no network I/O and implements no tools; vendor
//! adapters, tool implementations, persistence backends, and transport
//! bridges plug in through the seams in [`provider`], [`tool`], [`store`],
//! [`session`], and [`sandbox`].
//!
//! # Architecture
//!
//! - [`agent`] — the step loop: one task per agent alternating between
//!   generation and tool execution, with serialized turns and a strict
//!   state machine.
//! - [`event`] — the three-channel bus (`progress` / `control` /
//!   `monitor`) with per-subscriber bounded queues and filters.
//! - [`inspect`] — the permission inspector: modes, ordered rules, risk
//!   classification, remembered decisions, out-of-band approval.
//! - [`tool`] — tool traits, the registry, and the timeout-enforcing
//!   dispatcher.
//! - [`provider`] — the vendor-neutral LLM facade with retry and
//!   streaming chunk aggregation.
//! - [`prompt`] — priority-ordered system prompt assembly.
//! - [`cosmos`] — the bounded lifecycle registry of running agents.
//!
//! # Example
//!
//! ```rust,ignore
//! use kosmo::prelude::*;
//!
//! let agent = Agent::builder()
//!     .config(AgentConfig::new("assistant", "test-model"))
//!     .provider(provider)
//!     .tools(tools)
//!     .build()?;
//!
//! let mut progress = agent.subscribe([Channel::Progress]);
//! agent.send("hello").await?;
//! while let Some(event) = progress.recv().await {
//!     println!("{}", event.event_type());
//! }
//! ```

pub mod agent;
pub mod cosmos;
pub mod error;
pub mod event;
pub mod inspect;
pub mod message;
pub mod prelude;
pub mod prompt;
pub mod provider;
pub mod sandbox;
pub mod session;
pub mod store;
pub mod tool;
pub mod usage;

pub use agent::{Agent, AgentConfig, AgentState, AgentStatus};
pub use cosmos::Cosmos;
pub use error::{CoreError, Result};
pub use event::{Channel, Event, EventBus, Payload, Subscription};
pub use message::{ContentBlock, Message, Role};
pub use usage::Usage;
