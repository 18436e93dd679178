//! Page activity — whether the host surface is visible to the user.

use tokio::sync::watch;

/// Capability interface for page visibility.
pub trait PageActivitySource: Send + Sync {
    fn is_active(&self) -> bool;

    /// A receiver that observes visibility changes, if the source can push them.
    ///
    /// With a receiver, the controller disarms the poll timer as soon as the
    /// page is hidden and re-arms it when the page is shown again. A source
    /// that returns `None` is only queried: the timer stays armed while the
    /// page is hidden, each tick checks `is_active` and skips the fetch, and
    /// fetching resumes on the first tick after the page becomes visible.
    fn changes(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// A source that is always active (terminals, headless hosts).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysActive;

impl PageActivitySource for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}

/// Visibility driven by the host through [`WatchPageActivity::set_active`].
#[derive(Debug)]
pub struct WatchPageActivity {
    tx: watch::Sender<bool>,
}

impl WatchPageActivity {
    pub fn new(active: bool) -> Self {
        let (tx, _rx) = watch::channel(active);
        Self { tx }
    }

    pub fn set_active(&self, active: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
    }
}

impl PageActivitySource for WatchPageActivity {
    fn is_active(&self) -> bool {
        *self.tx.borrow()
    }

    fn changes(&self) -> Option<watch::Receiver<bool>> {
        Some(self.tx.subscribe())
    }
}
