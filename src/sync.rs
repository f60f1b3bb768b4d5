// Copyright 2025 corert contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A one-shot rendezvous bridging an async producer to a blocking
//! consumer.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use futures::FutureExt;

use crate::context::Context;
use crate::error::Error;
use crate::task;

struct State<T> {
    slot: Mutex<Option<thread::Result<T>>>,
    condvar: Condvar,
}

/// A blocking handle to the eventual result of a spawned future.
///
/// The future is spawned and begins running immediately, exactly like
/// [`task::spawn`]; `Sync::get` blocks the calling thread until it
/// finishes, returning the output or the captured panic as an
/// [`Error::Panic`].
pub struct Sync<T> {
    state: Arc<State<T>>,
}

impl<T: Send + 'static> Sync<T> {
    pub fn spawn<F>(context: &Arc<Context>, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let state = Arc::new(State {
            slot: Mutex::new(None),
            condvar: Condvar::new(),
        });

        let st = state.clone();
        let wrapped = async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            *st.slot.lock().unwrap() = Some(result);
            st.condvar.notify_one();
        };
        task::spawn(context, wrapped);

        Sync { state }
    }

    /// Blocks the calling thread until the spawned future completes.
    pub fn get(self) -> Result<T, Error> {
        let mut slot = self.state.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.state.condvar.wait(slot).unwrap();
        }
        match slot.take().unwrap() {
            Ok(value) => Ok(value),
            Err(payload) => Err(Error::panic(payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn delivers_the_value() {
        let ctx = Context::new();
        let ctx2 = ctx.clone();
        let handle = thread::spawn(move || ctx2.run());

        let sync = Sync::spawn(&ctx, async { 21 * 2 });
        assert_eq!(sync.get().unwrap(), 42);

        ctx.stop();
        handle.join().unwrap();
    }

    #[test]
    fn captures_a_panic() {
        let ctx = Context::new();
        let ctx2 = ctx.clone();
        let handle = thread::spawn(move || ctx2.run());

        let sync: Sync<()> = Sync::spawn(&ctx, async { panic!("kaboom") });
        let err = sync.get().unwrap_err();
        assert!(err.to_string().contains("kaboom"));

        ctx.stop();
        handle.join().unwrap();
    }
}
