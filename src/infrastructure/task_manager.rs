use tokio::task::JoinHandle;

/// Holds at most one background task; arming it again aborts the previous one.
///
/// Used for the timers that must never run twice: the reconnect delay, the keep-alive
/// interval, the transport read pump and the visibility debounce.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Spawn `future`, aborting whatever the slot held before
    pub fn spawn<F>(&mut self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.abort();
        self.handle = Some(tokio::spawn(future));
    }

    /// Abort the held task, if any
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forget the held task without aborting it (used by a task that is retiring itself)
    pub fn release(&mut self) {
        self.handle = None;
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Manages long-lived background tasks with proper lifecycle handling
#[derive(Debug, Default)]
pub struct TaskManager {
    handles: Vec<JoinHandle<()>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Spawn a task and track it
    pub fn spawn<F>(&mut self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(tokio::spawn(future));
    }

    /// Abort all tasks without waiting
    pub fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.abort_all();
    }
}
