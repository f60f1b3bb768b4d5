// Copyright 2025 corert contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A minimal user-space coroutine execution framework.
//!
//! A [`context::Context`] is a single-threaded cooperative executor
//! loop; [`task::schedule`] is the suspension point that moves a task
//! between contexts; [`service::Service`] is an OS-completion-driven
//! reactor for I/O readiness; [`sync::Sync`] bridges an async producer
//! to a blocking consumer.

pub mod affinity;
pub mod context;
pub mod error;
pub mod log;
pub mod service;
pub mod sync;
pub mod task;

pub use context::Context;
pub use error::Error;
pub use service::Service;
pub use sync::Sync;
pub use task::{schedule, spawn};
