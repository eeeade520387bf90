#![deny(missing_docs)]
//! # axon — umbrella crate
//!
//! Single import surface for the axon supervisor/worker orchestration
//! core. Re-exports the component crates behind feature flags, plus a
//! `prelude` for the happy path.

pub use axon_core;
pub use axon_turn;

#[cfg(feature = "storage")]
pub use axon_artifact;
#[cfg(feature = "orchestration")]
pub use axon_engine;
#[cfg(feature = "gateway")]
pub use axon_gateway;
#[cfg(feature = "storage")]
pub use axon_log;
#[cfg(feature = "orchestration")]
pub use axon_orch;
#[cfg(feature = "provider-anthropic")]
pub use axon_provider_anthropic;
#[cfg(feature = "storage")]
pub use axon_store;
#[cfg(feature = "storage")]
pub use axon_tool;
#[cfg(feature = "orchestration")]
pub use axon_worker;

/// Happy-path imports for composing an axon deployment.
pub mod prelude {
    pub use axon_core::{
        CoreConfig, EmitKind, EmitterRole, EngineOutcome, ErrorKind, EventId, EventType,
        ExecutionMode, Interrupt, JobId, OwnerId, RunPublicId, RunStatus, ThreadId, ToolCallId,
        WorkerId, WorkerResult,
    };
    pub use axon_turn::{AssistantMessage, Provider, ProviderMessage, ProviderRequest};

    #[cfg(feature = "storage")]
    pub use axon_artifact::ArtifactStore;
    #[cfg(feature = "orchestration")]
    pub use axon_engine::{EngineConfig, ReactEngine};
    #[cfg(feature = "storage")]
    pub use axon_log::{Emitter, EventLog};
    #[cfg(feature = "orchestration")]
    pub use axon_orch::{OrchConfig, Orchestrator};
    #[cfg(feature = "provider-anthropic")]
    pub use axon_provider_anthropic::AnthropicProvider;
    #[cfg(feature = "storage")]
    pub use axon_store::Store;
    #[cfg(feature = "storage")]
    pub use axon_tool::{ToolDyn, ToolInvoker, ToolRegistry};
    #[cfg(feature = "orchestration")]
    pub use axon_worker::{WorkerPool, WorkerRuntime};
}
