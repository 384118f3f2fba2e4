use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Notify;

/// Process-wide run state shared by the watcher, the socket server and the
/// supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Initializing = 0,
    Running = 1,
    ShuttingDown = 2,
    ServerFault = 3,
    WatcherFault = 4,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Initializing,
            1 => Status::Running,
            2 => Status::ShuttingDown,
            3 => Status::ServerFault,
            _ => Status::WatcherFault,
        }
    }

    pub fn is_fault(self) -> bool {
        matches!(self, Status::ServerFault | Status::WatcherFault)
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::ShuttingDown | Status::ServerFault | Status::WatcherFault
        )
    }
}

/// Atomic status cell. Setters only flip the value and wake the supervisor;
/// teardown happens in the supervisor, never in the caller.
#[derive(Debug)]
pub struct StatusFlag {
    value: AtomicU8,
    changed: Notify,
}

impl StatusFlag {
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(Status::Initializing as u8),
            changed: Notify::new(),
        }
    }

    pub fn get(&self) -> Status {
        Status::from_u8(self.value.load(Ordering::SeqCst))
    }

    /// Coarse loop-continuation check.
    pub fn is_running(&self) -> bool {
        self.get() == Status::Running
    }

    pub fn start(&self) {
        self.value.store(Status::Running as u8, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self) -> bool {
        self.leave_running(Status::ShuttingDown)
    }

    pub fn fault(&self, status: Status) -> bool {
        debug_assert!(status.is_fault());
        self.leave_running(status)
    }

    /// First terminal transition wins; later ones are ignored.
    fn leave_running(&self, next: Status) -> bool {
        let switched = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (!Status::from_u8(v).is_terminal()).then_some(next as u8)
            })
            .is_ok();
        if switched {
            self.changed.notify_one();
        }
        switched
    }

    /// Wait until the status reaches a terminal state and return it.
    ///
    /// Meant for a single waiter: `notify_one` keeps a permit when the
    /// transition happens before the wait starts.
    pub async fn stopped(&self) -> Status {
        loop {
            let status = self.get();
            if status.is_terminal() {
                return status;
            }
            self.changed.notified().await;
        }
    }
}

impl Default for StatusFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_terminal_transition_wins() {
        let flag = StatusFlag::new();
        assert_eq!(flag.get(), Status::Initializing);
        flag.start();
        assert!(flag.is_running());
        assert!(flag.request_shutdown());
        assert!(!flag.fault(Status::ServerFault));
        assert_eq!(flag.get(), Status::ShuttingDown);
    }

    #[test]
    fn test_fault_after_start() {
        let flag = StatusFlag::new();
        flag.start();
        assert!(flag.fault(Status::WatcherFault));
        assert!(!flag.request_shutdown());
        assert!(flag.get().is_fault());
    }

    #[tokio::test]
    async fn test_stopped_wakes_on_transition() {
        let flag = Arc::new(StatusFlag::new());
        flag.start();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.stopped().await })
        };
        tokio::task::yield_now().await;
        flag.fault(Status::ServerFault);
        assert_eq!(waiter.await.unwrap(), Status::ServerFault);
    }

    #[tokio::test]
    async fn test_stopped_sees_earlier_transition() {
        let flag = StatusFlag::new();
        flag.start();
        flag.request_shutdown();
        assert_eq!(flag.stopped().await, Status::ShuttingDown);
    }
}
