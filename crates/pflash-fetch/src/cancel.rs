use tokio::sync::watch;

/// Receiving side of a cooperative cancel flag. `true` means "stop at the next
/// chunk or step boundary".
pub type CancelRx = watch::Receiver<bool>;

pub fn cancel_channel() -> (watch::Sender<bool>, CancelRx) {
    watch::channel(false)
}

pub fn cancel_requested(cancel_rx: Option<&CancelRx>) -> bool {
    cancel_rx.is_some_and(|rx| *rx.borrow())
}
