// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! ClawTrail — audit-trail verification harness for syscall tests.
//!
//! Every test in an audit test suite does the same three things: arm audit
//! capture for one event class, drive a syscall, and assert that the kernel
//! flushed a matching record to the trail. This crate is that harness:
//!
//! - **class**: arms the audit event-class preselection for one test and
//!   restores the pre-test baseline on every exit path
//! - **trail**: tails the live trail from its current end, frames and
//!   decodes BSM records, never re-reads what a previous test consumed
//! - **gate**: the single bounded-wait suspension point between syscall
//!   return and the kernel's asynchronous record flush
//! - **record**: BSM binary-to-text decoding in the canonical one-line form
//!   patterns match against, plus a builder for simulating the kernel
//! - **pattern**: regex expectations over the full decoded line
//! - **session**: the `setup` / `check_audit` / `cleanup` facade every test
//!   body drives, with guaranteed restore via `Drop`
//! - **fixture**: declarative `{syscall, class, pattern}` cases replacing
//!   per-syscall boilerplate
//! - **config**: TOML-backed paths, poll interval, and wait deadline
//!
//! Tests are serialized: the trail is a single global resource, so at most
//! one session is active at a time.

pub mod class;
pub mod config;
pub mod errors;
pub mod fixture;
pub mod gate;
pub mod pattern;
pub mod record;
pub mod session;
pub mod trail;

pub use class::{AuditClass, ClassFilter, ClassMask, MemoryPolicyStore, PolicyStore, SystemPolicyStore};
pub use config::HarnessConfig;
pub use errors::{ConfigError, ReadError, TimeoutError};
pub use fixture::Fixture;
pub use pattern::ExpectedPattern;
pub use record::{DecodedRecord, IpcKind, RecordBuilder};
pub use session::{AuditSession, Outcome};
pub use trail::{TrailHandle, TrailReader};
