// Copyright 2025 corert contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fire-and-forget resumable tasks.
//!
//! A task starts running the moment it is [`spawn`]ed, on the spawning
//! thread — there is no separate "queued but not yet started" state.
//! From then on it moves between contexts only through the [`schedule`]
//! awaitable; a generic waker wake (from some other future the task
//! happens to be polling, e.g. an I/O readiness future) reschedules it
//! onto whichever context most recently polled it.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll, RawWaker, RawWakerVTable, Waker};

use crate::context::Context;

thread_local! {
    static CURRENT_TASK: RefCell<Vec<Arc<TaskInner>>> = const { RefCell::new(Vec::new()) };
}

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) struct TaskInner {
    next: AtomicPtr<TaskInner>,
    home: Mutex<Arc<Context>>,
    future: Mutex<Option<BoxedFuture>>,
}

static_assertions::assert_impl_all!(TaskInner: Send, Sync);

impl TaskInner {
    pub(crate) fn next(&self) -> *mut TaskInner {
        self.next.load(Ordering::Relaxed)
    }

    pub(crate) fn set_next(&self, next: *mut TaskInner) {
        self.next.store(next, Ordering::Relaxed);
    }

    /// Polls the task once, on the calling thread, recording `ctx` as its
    /// new home for the duration of the poll.
    pub(crate) fn poll_once(this: &Arc<TaskInner>, ctx: &Arc<Context>) {
        *this.home.lock().unwrap() = ctx.clone();

        CURRENT_TASK.with(|stack| stack.borrow_mut().push(this.clone()));
        let waker = TaskInner::waker(this);
        let mut poll_cx = PollContext::from_waker(&waker);

        let mut slot = this.future.lock().unwrap();
        if let Some(future) = slot.as_mut() {
            if future.as_mut().poll(&mut poll_cx).is_ready() {
                *slot = None;
            }
        }
        drop(slot);
        CURRENT_TASK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }

    fn waker(this: &Arc<TaskInner>) -> Waker {
        let ptr = Arc::into_raw(this.clone()) as *const ();
        unsafe { Waker::from_raw(RawWaker::new(ptr, &TASK_WAKER_VTABLE)) }
    }

    fn reschedule(this: Arc<TaskInner>) {
        let home = this.home.lock().unwrap().clone();
        home.push(this);
    }
}

static TASK_WAKER_VTABLE: RawWakerVTable = RawWakerVTable::new(
    task_waker_clone,
    task_waker_wake,
    task_waker_wake_by_ref,
    task_waker_drop,
);

unsafe fn task_waker_clone(data: *const ()) -> RawWaker {
    unsafe { Arc::increment_strong_count(data as *const TaskInner) };
    RawWaker::new(data, &TASK_WAKER_VTABLE)
}

unsafe fn task_waker_wake(data: *const ()) {
    let task = unsafe { Arc::from_raw(data as *const TaskInner) };
    TaskInner::reschedule(task);
}

unsafe fn task_waker_wake_by_ref(data: *const ()) {
    unsafe { Arc::increment_strong_count(data as *const TaskInner) };
    let task = unsafe { Arc::from_raw(data as *const TaskInner) };
    TaskInner::reschedule(task);
}

unsafe fn task_waker_drop(data: *const ()) {
    unsafe { Arc::from_raw(data as *const TaskInner) };
}

/// Starts running `future` immediately, on the calling thread, homed on
/// `context`.
///
/// If the future never reaches a suspension point it simply runs to
/// completion before `spawn` returns. Otherwise progress continues
/// wherever the future's suspension points (usually [`schedule`]) or its
/// waker hand it off to.
pub fn spawn<F>(context: &Arc<Context>, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let inner = Arc::new(TaskInner {
        next: AtomicPtr::new(ptr::null_mut()),
        home: Mutex::new(context.clone()),
        future: Mutex::new(Some(Box::pin(future))),
    });
    TaskInner::poll_once(&inner, context);
}

/// An awaitable suspension point that moves the current task onto
/// `target`.
///
/// If `always_suspend` is `false` and the caller is already being polled
/// on `target`, this resolves immediately without suspending. Otherwise
/// the task is pushed onto `target`'s intake and will resume there.
pub fn schedule(target: &Arc<Context>, always_suspend: bool) -> Schedule<'_> {
    Schedule {
        target,
        ready: !always_suspend && target.is_current(),
        queued: false,
    }
}

pub struct Schedule<'a> {
    target: &'a Arc<Context>,
    ready: bool,
    queued: bool,
}

impl Future for Schedule<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<()> {
        if self.ready || self.queued {
            return Poll::Ready(());
        }
        self.queued = true;
        let task = CURRENT_TASK
            .with(|stack| stack.borrow().last().cloned())
            .expect("schedule() polled outside of a task");
        self.target.push(task);
        Poll::Pending
    }
}
