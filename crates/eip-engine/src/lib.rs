//! EIP Engine - Descriptor-ring scheduler for EIP197-class accelerators
//!
//! Drives a packet crypto engine through shared-memory descriptor rings:
//! - **Rings and DMA**: command/result ring pairs, one per CPU, with
//!   generation-tagged completion dispatch
//! - **Tokens**: per-operation instruction programs for cipher, hash, AEAD
//!   and ESP
//! - **Transform records**: per-session engine state with a
//!   drain-then-invalidate teardown
//! - **Contexts**: per-service algorithm tables and token pools, handed out
//!   by a [`ServiceRegistry`]
//! - **Flow table**: inline ESP flow lookup shared with the engine
//!
//! [`SimEngine`] models the engine's register and descriptor behaviour in
//! software, so the whole stack runs without hardware.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod device;
pub mod dma;
pub mod flow;
pub mod hw;
pub mod mem;
pub mod record;
pub mod ring;
pub mod sim;
pub mod stats;
pub mod token;

pub use context::{context_alloc, context_free, transform_alloc, transform_free, Context, Service, ServiceRegistry};
pub use device::{Device, Poller};
pub use dma::{DmaEngine, Segment};
pub use flow::{FlowStats, FlowTable, FlowTuple};
pub use mem::{DmaAllocator, DmaRegion};
pub use record::{
    Algorithm, ChannelSink, Completion, CompletionSink, Discard, HashAlg, IpsecMode, IpsecParams, NattPorts, Outcome,
    RecordWatch, ReplayWindow, Request, Session, SessionInfo, TrState, Transform, TransformRecord,
};
pub use sim::{SimEngine, SimOp};
pub use stats::{ContextStatsSnapshot, DmaStatsSnapshot, RecordStatsSnapshot};
pub use token::Direction;

pub use eip_common::{EngineConfig, EipError, EipResult, FlowTableConfig, HwError, HwErrorKind};
