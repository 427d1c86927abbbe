//! Single-slot handoff where only the most recent item matters.
//!
//! A bounded(1) channel whose producer keeps a receiver clone, so a stale item
//! still sitting in the slot can be displaced instead of blocking or dropping
//! the fresh one.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// What happened to an item handed to [`LatestSender::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Published {
    /// The slot was empty.
    Fresh,
    /// An unconsumed older item was discarded to make room.
    Displaced,
}

pub struct LatestSender<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
}

/// Create a latest-only channel.
///
/// The receiver observes disconnection once the [`LatestSender`] is dropped.
pub fn latest_channel<T>() -> (LatestSender<T>, Receiver<T>) {
    let (tx, rx) = bounded(1);
    let drain = rx.clone();
    (LatestSender { tx, drain }, rx)
}

impl<T> LatestSender<T> {
    pub fn publish(&self, item: T) -> Published {
        let item = match self.tx.try_send(item) {
            Ok(()) => return Published::Fresh,
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => item,
        };
        let displaced = self.drain.try_recv().is_ok();
        // Single producer: the slot is empty at this point.
        let _ = self.tx.try_send(item);
        if displaced {
            Published::Displaced
        } else {
            Published::Fresh
        }
    }
}
