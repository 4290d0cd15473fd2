//! Process-wide default sender.
//!
//! Applications that want a single sender reachable from anywhere install it
//! once with [`setup`] and fetch the handle with [`get_global_sender`].
//! Nothing in the crate reads this slot implicitly; callers hold the returned
//! `Arc` and pass it where it is needed.

use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{
    error::SenderBuildError,
    sender::{FluentSender, SenderBuilder},
};

static DEFAULT_SENDER: Lazy<RwLock<Option<Arc<FluentSender>>>> = Lazy::new(|| RwLock::new(None));

/// Build a sender from `builder` and install it as the default.
///
/// Replaces any previously installed sender without closing it.
pub fn setup(builder: SenderBuilder) -> Result<Arc<FluentSender>, SenderBuildError> {
    let sender = Arc::new(builder.build()?);
    if set_global_sender(Some(Arc::clone(&sender))).is_some() {
        debug!("replaced the default FluentSender");
    }
    Ok(sender)
}

/// The installed default sender, if any.
pub fn get_global_sender() -> Option<Arc<FluentSender>> {
    DEFAULT_SENDER.read().clone()
}

/// Install `sender` directly (or clear the slot), returning the previous one.
pub fn set_global_sender(sender: Option<Arc<FluentSender>>) -> Option<Arc<FluentSender>> {
    std::mem::replace(&mut *DEFAULT_SENDER.write(), sender)
}

/// Close the default sender's connection. No-op when none is installed.
pub async fn close() {
    let sender = get_global_sender();
    if let Some(sender) = sender {
        sender.close().await;
    }
}
