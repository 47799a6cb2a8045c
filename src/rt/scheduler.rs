use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::os::unix::io::RawFd;
use std::task::{Context, Waker};
use std::time::Instant;

use crate::rt::io::Driver;
use crate::rt::task::{TaskHandle, TaskId, TaskWaker};
use crate::rt::timer::TimerEntry;
use crate::util::MinHeap;

/// Single-threaded `Task` scheduler, paired with an `epoll(7)`-backed I/O
/// driver and a min-heap of pending timers.
#[derive(Debug)]
pub(crate) struct Scheduler {
    /// Stores all live tasks keyed by their ID, each paired with its
    /// `TaskWaker`. `TaskId`'s `Ord` impl keeps iteration order stable, which
    /// is convenient for debugging.
    tasks: RefCell<BTreeMap<TaskId, (TaskHandle, TaskWaker)>>,
    /// Queue of task IDs that are ready to be polled. Storing only IDs keeps
    /// the queue lightweight and avoids holding multiple `Task` handles at
    /// once. Wrapped in `RefCell` for interior mutability since components
    /// like `Waker`s only have shared access to the `Scheduler`.
    ready: RefCell<VecDeque<TaskId>>,
    /// `epoll(7)` driver used to wait for file descriptor readiness.
    driver: RefCell<Driver>,
    /// Pending `sleep`/`sleep_until` deadlines, ordered by expiry.
    timers: RefCell<MinHeap<TimerEntry>>,
}

impl Scheduler {
    /// Creates a new `Scheduler` instance.
    #[inline]
    pub(crate) fn new() -> Self {
        Scheduler {
            tasks: RefCell::new(BTreeMap::new()),
            ready: RefCell::new(VecDeque::new()),
            driver: RefCell::new(Driver::new()),
            timers: RefCell::new(MinHeap::new()),
        }
    }

    /// Registers `task` under its ID and marks it ready for an initial poll.
    pub(crate) fn spawn_task(&self, task: TaskHandle, waker: TaskWaker) {
        let id = task.borrow().id;
        task.borrow().scheduled.set(true);
        self.tasks.borrow_mut().insert(id, (task, waker));
        self.ready.borrow_mut().push_back(id);
    }

    /// Marks the task identified by `id` as ready for its next poll. A no-op
    /// if the task has already exited.
    pub(crate) fn schedule_task(&self, id: TaskId) {
        self.ready.borrow_mut().push_back(id);
    }

    /// Adds `fd` to the `epoll(7)` interest list, waking `waker` on
    /// readiness.
    pub(crate) fn register_fd(&self, fd: RawFd, events: u32, waker: Waker) {
        self.driver.borrow_mut().register(fd, events, waker);
    }

    /// Removes `fd` from the `epoll(7)` interest list.
    pub(crate) fn unregister_fd(&self, fd: RawFd) {
        self.driver.borrow_mut().unregister(fd);
    }

    /// Registers a one-shot timer that wakes `waker` once `deadline` has
    /// passed.
    pub(crate) fn register_timer(&self, deadline: Instant, waker: Waker) {
        self.timers.borrow_mut().push(TimerEntry { deadline, waker });
    }

    /// Schedules `task` using `waker`, blocking the current thread until it
    /// resolves. Tasks `spawn`ed while `task` is pending are polled
    /// alongside it on this same thread; the `epoll(7)` driver is only
    /// polled once nothing is immediately ready, with a timeout derived from
    /// the nearest pending timer.
    pub(crate) fn block_on(&self, task: TaskHandle, waker: TaskWaker) {
        let root = task.borrow().id;
        self.spawn_task(task, waker);

        loop {
            self.drain_ready();

            if !self.tasks.borrow().contains_key(&root) {
                return;
            }

            self.fire_expired_timers();

            if !self.ready.borrow().is_empty() {
                continue;
            }

            let timeout = self.next_timeout();
            self.driver.borrow_mut().poll(timeout);
            self.fire_expired_timers();
        }
    }

    /// Polls every task currently in the ready queue exactly once each.
    fn drain_ready(&self) {
        loop {
            let Some(id) = self.ready.borrow_mut().pop_front() else {
                break;
            };

            let Some((task, waker)) = self.tasks.borrow().get(&id).cloned() else {
                // The waker fired for a task that has already completed.
                continue;
            };

            task.borrow().scheduled.set(false);

            let mut ctx = Context::from_waker(&waker);
            let poll = task.borrow_mut().poll(&mut ctx);

            if poll.is_ready() {
                self.tasks.borrow_mut().remove(&id);
            }
        }
    }

    /// Pops and wakes every timer whose deadline has passed.
    fn fire_expired_timers(&self) {
        let now = Instant::now();
        let mut timers = self.timers.borrow_mut();

        while matches!(timers.peek(), Some(entry) if entry.deadline <= now) {
            if let Some(entry) = timers.pop() {
                entry.waker.wake();
            }
        }
    }

    /// Computes the `epoll_wait(2)` timeout (milliseconds) appropriate for
    /// the nearest pending timer: `-1` to block indefinitely if there are no
    /// timers, `0` if one has already expired.
    fn next_timeout(&self) -> i32 {
        match self.timers.borrow().peek() {
            Some(entry) => {
                let now = Instant::now();

                if entry.deadline <= now {
                    0
                } else {
                    (entry.deadline - now).as_millis().min(i32::MAX as u128) as i32
                }
            }
            None => -1,
        }
    }
}
