//! Execution drivers and kernel build pipeline for the manifold runtime
//!
//! This crate provides:
//! - **Driver trait**: the uniform capability set every execution mode
//!   implements (allocate, copy, compile, launch, synchronize, teardown)
//! - **Concrete drivers**: sequential, host-parallel (worker pool), and
//!   stream (host-side submission queue)
//! - **Kernel front end**: lexer, parser, and lowering for the
//!   backend-agnostic kernel source language
//! - **Program IR**: the slot-indexed representation drivers execute per
//!   work item
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Kernel Source                         │
//! │           (@kernel ... @outer for ...)                   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ lang: lex + parse
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Program IR                            │
//! │        (slot-indexed statements + launch range)          │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ driver: compile + launch
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//!   ┌──────────┐ ┌─────────────┐ ┌─────────┐
//!   │Sequential│ │Host-parallel│ │ Stream  │
//!   └──────────┘ └─────────────┘ └─────────┘
//! ```
//!
//! The user-facing façade (`Device`, `Memory`, `Kernel`, the kernel
//! cache) lives in `manifold-core`; this crate is the layer below it.

pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod kir;
pub mod lang;
pub mod types;

// Re-export the public API surface
pub use config::{DeviceConfig, SettingValue};
pub use driver::{CompiledKernel, Driver};
pub use error::{BackendError, Result};
pub use kir::{Param, ParamKind, Program};
pub use types::{BufferHandle, BuildOptions, LaunchArg, Mode, ScalarType, ScalarValue, Schedule};
