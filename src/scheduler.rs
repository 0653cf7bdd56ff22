//! Delayed-task execution for staggered tones.
//!
//! One worker thread runs boxed closures at absolute due times. Tasks own
//! their preconditions: a delayed tone captures everything it needs to
//! re-check the world when it actually fires, because context state at
//! schedule time says nothing about context state at fire time. Pending
//! tasks die with the scheduler.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{AudioError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    due: Instant,
    /// Tie-breaker keeping same-instant jobs in submission order.
    seq: u64,
    run: Task,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    // Reversed so the max-heap pops the earliest due time first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    jobs: BinaryHeap<Job>,
    running: bool,
    next_seq: u64,
}

/// Single-threaded timer queue for delayed tone tasks.
pub struct Scheduler {
    shared: Arc<(Mutex<State>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let shared = Arc::new((
            Mutex::new(State {
                jobs: BinaryHeap::new(),
                running: true,
                next_seq: 0,
            }),
            Condvar::new(),
        ));
        let worker_shared = shared.clone();
        let worker = std::thread::spawn(move || worker_loop(worker_shared));
        Scheduler {
            shared,
            worker: Some(worker),
        }
    }

    /// Runs `task` once `delay` has passed. Tasks with equal due times run
    /// in submission order; the single worker serializes execution.
    pub fn schedule_in(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock();
        if !state.running {
            return Err(AudioError::Scheduling("scheduler stopped".into()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.push(Job {
            due: Instant::now() + delay,
            seq,
            run: Box::new(task),
        });
        cvar.notify_one();
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.shared;
            let mut state = lock.lock();
            state.running = false;
            state.jobs.clear();
            cvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            // Drop can run on the worker itself when a task drops the last
            // handle to the scheduler's owner; never join the current thread.
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<(Mutex<State>, Condvar)>) {
    let (lock, cvar) = &*shared;
    let mut state = lock.lock();
    loop {
        if !state.running {
            return;
        }
        let next_due = state.jobs.peek().map(|job| job.due);
        match next_due {
            None => {
                cvar.wait(&mut state);
            }
            Some(due) if due <= Instant::now() => {
                if let Some(job) = state.jobs.pop() {
                    // Run outside the lock so tasks can schedule more work.
                    drop(state);
                    (job.run)();
                    state = lock.lock();
                }
            }
            Some(due) => {
                let _ = cvar.wait_until(&mut state, due);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::sleep;

    fn wait_for(flag: &AtomicBool, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            sleep(Duration::from_millis(2));
        }
        flag.load(Ordering::SeqCst)
    }

    #[test]
    fn tasks_fire_in_due_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, delay_ms) in [("late", 60u64), ("early", 10), ("mid", 30)] {
            let order = order.clone();
            scheduler
                .schedule_in(Duration::from_millis(delay_ms), move || {
                    order.lock().push(label);
                })
                .unwrap();
        }

        sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn zero_delay_runs_promptly() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        scheduler
            .schedule_in(Duration::ZERO, move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        assert!(wait_for(&fired, Duration::from_secs(1)));
    }

    #[test]
    fn tasks_can_schedule_followups() {
        let scheduler = Arc::new(Scheduler::new());
        let fired = Arc::new(AtomicBool::new(false));

        let inner_sched = scheduler.clone();
        let flag = fired.clone();
        scheduler
            .schedule_in(Duration::from_millis(5), move || {
                let flag = flag.clone();
                let _ = inner_sched.schedule_in(Duration::from_millis(5), move || {
                    flag.store(true, Ordering::SeqCst);
                });
            })
            .unwrap();

        assert!(wait_for(&fired, Duration::from_secs(1)));
    }

    #[test]
    fn equal_due_times_keep_submission_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let due = Duration::from_millis(20);
        for i in 0..5 {
            let order = order.clone();
            scheduler
                .schedule_in(due, move || order.lock().push(i))
                .unwrap();
        }
        sleep(Duration::from_millis(150));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drop_cancels_pending_work() {
        let fired = Arc::new(AtomicBool::new(false));
        {
            let scheduler = Scheduler::new();
            let flag = fired.clone();
            scheduler
                .schedule_in(Duration::from_millis(300), move || {
                    flag.store(true, Ordering::SeqCst)
                })
                .unwrap();
            // Scheduler dropped here, well before the task is due.
        }
        sleep(Duration::from_millis(400));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn a_task_owning_the_last_handle_tears_down_cleanly() {
        let fired = Arc::new(AtomicBool::new(false));
        let scheduler = Arc::new(Scheduler::new());

        let held = scheduler.clone();
        let flag = fired.clone();
        scheduler
            .schedule_in(Duration::from_millis(20), move || {
                // Teardown runs here, on the worker; the task must still
                // get to finish.
                drop(held);
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        drop(scheduler);

        assert!(wait_for(&fired, Duration::from_secs(1)));
    }

    #[test]
    fn captured_preconditions_run_at_fire_time() {
        // The pattern delayed tones rely on: the task re-checks shared
        // state when it fires, not when it was scheduled.
        let scheduler = Scheduler::new();
        let still_running = Arc::new(AtomicBool::new(true));
        let played = Arc::new(AtomicBool::new(false));

        let gate = still_running.clone();
        let out = played.clone();
        scheduler
            .schedule_in(Duration::from_millis(50), move || {
                if gate.load(Ordering::SeqCst) {
                    out.store(true, Ordering::SeqCst);
                }
            })
            .unwrap();

        // State changes between scheduling and firing.
        still_running.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(150));
        assert!(!played.load(Ordering::SeqCst));
    }
}
