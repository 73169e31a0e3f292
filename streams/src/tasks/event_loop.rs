use crossbeam::channel::{Receiver, Sender, TryRecvError, unbounded};

type Task = Box<dyn FnOnce() + 'static>;

/// A single-threaded cooperative task queue.
///
/// Streams defer work that must not run inside the current call (for example the step
/// after a synchronously acknowledged write) by queueing a task here. Nothing runs until
/// the owner drives the loop with [`turn()`](Self::turn) or [`run()`](Self::run).
/// Tasks run in FIFO order and never in parallel.
pub struct EventLoop {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
}

impl EventLoop {
    /// Creates an empty loop.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Returns a handle that can queue tasks on this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            sender: self.sender.clone(),
        }
    }

    /// Queues a task for a later turn.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.handle().defer(f);
    }

    /// Number of queued tasks.
    #[inline]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` when no task is queued.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Runs the tasks that were queued when the turn started.
    ///
    /// Tasks queued while the turn is running wait for the next turn. Returns the number of
    /// tasks run.
    pub fn turn(&self) -> usize {
        let queued = self.receiver.len();
        let mut ran = 0;
        while ran < queued {
            match self.receiver.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ran
    }

    /// Runs turns until the queue is empty. Returns the total number of tasks run.
    pub fn run(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle for queueing tasks on an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    sender: Sender<Task>,
}

impl LoopHandle {
    /// Queues a task for a later turn of the owning loop.
    ///
    /// The task is dropped without running if the loop no longer exists.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        if self.sender.send(Box::new(f)).is_err() {
            log::debug!("event loop dropped; discarding deferred task");
        }
    }
}

impl From<&EventLoop> for LoopHandle {
    fn from(event_loop: &EventLoop) -> Self {
        event_loop.handle()
    }
}

impl From<&LoopHandle> for LoopHandle {
    fn from(handle: &LoopHandle) -> Self {
        handle.clone()
    }
}
