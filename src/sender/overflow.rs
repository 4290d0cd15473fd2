//! Callback receiving backlog bytes discarded on overflow.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::warn;

type Callback = dyn Fn(&[u8]) + Send + Sync;

/// User callback invoked with the entire backlog when it is discarded.
///
/// The callback runs on the emitting task. A panic inside it is caught and
/// logged; it never reaches the sender.
#[derive(Clone)]
pub struct OverflowHandler(Arc<Callback>);

impl OverflowHandler {
    pub fn new(callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub(crate) fn call(&self, discarded: &[u8]) {
        if panic::catch_unwind(AssertUnwindSafe(|| (self.0)(discarded))).is_err() {
            warn!(
                "FluentSender buffer overflow handler panicked; {} bytes lost",
                discarded.len()
            );
        }
    }
}

impl<F> From<F> for OverflowHandler
where
    F: Fn(&[u8]) + Send + Sync + 'static,
{
    fn from(callback: F) -> Self {
        Self::new(callback)
    }
}

impl fmt::Debug for OverflowHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OverflowHandler(..)")
    }
}
