//! External collaborators of the execution context.
//!
//! This crate defines the trait seams the context writes through (remote
//! update queue, per-node log, secret masker, variable expander) and the
//! in-process implementations the worker ships with.

#![warn(missing_docs)]

pub mod trait_;
pub mod queue;
pub mod logger;
pub mod masker;
pub mod expander;

pub use trait_::{
    JobServerQueue, PagingLogger, LoggerFactory, SecretMasker, VariableExpander, Expansion,
    FileUpload, ThrottlingHandler, ServiceError, Result,
};
pub use queue::{ChannelQueue, QueueItem};
pub use logger::{FileLogger, FileLoggerFactory, MemoryLoggerFactory};
pub use masker::{RegexSecretMasker, MASK};
pub use expander::{MacroExpander, MAX_EXPANSION_DEPTH};
