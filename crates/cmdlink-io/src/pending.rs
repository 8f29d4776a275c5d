//! The caller's side of a submitted request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use cmdlink_core::error::{Error, Result};

/// A request's eventual outcome.
///
/// Returned immediately by `LinkIo::submit` and `LinkIo::submit_capture`;
/// awaiting it yields the settled result once the request's turn in the
/// queue has come and gone. If the IO task stops before the request
/// settles, the result is [`Error::TaskClosed`].
#[must_use = "a Pending does nothing unless awaited"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Pending { rx }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(Error::TaskClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_yields_sent_value() {
        let (tx, rx) = oneshot::channel();
        let pending = Pending::new(rx);
        tx.send(Ok::<_, Error>(String::from("Temp: 23.22"))).unwrap();
        assert_eq!(pending.await.unwrap(), "Temp: 23.22");
    }

    #[tokio::test]
    async fn pending_dropped_sender_is_task_closed() {
        let (tx, rx) = oneshot::channel::<Result<Vec<u8>>>();
        drop(tx);
        let result = Pending::new(rx).await;
        assert!(matches!(result, Err(Error::TaskClosed)));
    }
}
