//! Single-producer, single-consumer record channels.
//!
//! Each channel carries [`Message::Data`] items followed by exactly one
//! [`Message::EndOfStream`]. The endpoints are deliberately not `Clone`, so a
//! channel can only ever have one writer and one reader; FIFO order on every
//! channel then carries source order through the whole chain.
//!
//! Both blocking operations also watch the run's [`CancelToken`] and return
//! [`ChannelError::Cancelled`] as soon as it fires.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;

use crate::cancel::CancelToken;
use crate::error::ChannelError;
use crate::record::Record;

/// An item on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Data(Record),
    /// No more records will arrive on this channel.
    EndOfStream,
}

/// Writing end of a channel.
pub struct ChannelWriter {
    index: usize,
    sender: Sender<Message>,
    cancel: CancelToken,
    closed: bool,
}

/// Reading end of a channel.
pub struct ChannelReader {
    index: usize,
    receiver: Receiver<Message>,
    cancel: CancelToken,
    finished: bool,
}

/// Create channel `index`.
///
/// `capacity` bounds the number of in-flight items (`None` is unbounded).
pub fn channel(
    index: usize,
    capacity: Option<usize>,
    cancel: &CancelToken,
) -> (ChannelWriter, ChannelReader) {
    let (sender, receiver) = match capacity {
        Some(cap) => channel::bounded(cap),
        None => channel::unbounded(),
    };
    let writer = ChannelWriter {
        index,
        sender,
        cancel: cancel.clone(),
        closed: false,
    };
    let reader = ChannelReader {
        index,
        receiver,
        cancel: cancel.clone(),
        finished: false,
    };
    (writer, reader)
}

impl ChannelWriter {
    pub fn index(&self) -> usize {
        self.index
    }

    /// True once the terminal marker has been written.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append a record, blocking while the channel is full.
    pub fn put(&mut self, record: Record) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::PutAfterEnd {
                channel: self.index,
            });
        }
        self.send(Message::Data(record))
    }

    /// Write the terminal marker. A second call is a protocol violation.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::PutAfterEnd {
                channel: self.index,
            });
        }
        self.send(Message::EndOfStream)?;
        self.closed = true;
        Ok(())
    }

    /// Write the terminal marker without blocking.
    ///
    /// Used on cancellation, where the consumer may already be gone or the
    /// channel full. Returns whether the marker was written.
    pub fn try_close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.sender.try_send(Message::EndOfStream) {
            Ok(()) => {
                self.closed = true;
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn send(&self, message: Message) -> Result<(), ChannelError> {
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Cancelled {
                channel: self.index,
            });
        }
        let sent = select! {
            send(self.sender, message) -> res => res.map_err(|_| ChannelError::ConsumerGone {
                channel: self.index,
            }),
            recv(self.cancel.signal()) -> _ => Err(ChannelError::Cancelled {
                channel: self.index,
            }),
        };
        sent.map_err(|err| blame_cancel(err, &self.cancel))
    }
}

impl ChannelReader {
    pub fn index(&self) -> usize {
        self.index
    }

    /// True once the terminal marker has been taken.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Remove the next item, blocking while the channel is empty.
    pub fn take(&mut self) -> Result<Message, ChannelError> {
        self.ensure_open()?;
        let received = select! {
            recv(self.receiver) -> msg => msg.map_err(|_| ChannelError::Disconnected {
                channel: self.index,
            }),
            recv(self.cancel.signal()) -> _ => Err(ChannelError::Cancelled {
                channel: self.index,
            }),
        };
        let message = received.map_err(|err| blame_cancel(err, &self.cancel))?;
        self.observe(message)
    }

    /// Like [`take`](Self::take), but gives up after `timeout`.
    ///
    /// A producer that never writes its terminal marker surfaces here as
    /// [`ChannelError::TimedOut`] instead of blocking forever.
    pub fn take_timeout(&mut self, timeout: Duration) -> Result<Message, ChannelError> {
        self.ensure_open()?;
        let received = select! {
            recv(self.receiver) -> msg => msg.map_err(|_| ChannelError::Disconnected {
                channel: self.index,
            }),
            recv(self.cancel.signal()) -> _ => Err(ChannelError::Cancelled {
                channel: self.index,
            }),
            default(timeout) => Err(ChannelError::TimedOut {
                channel: self.index,
                timeout,
            }),
        };
        let message = received.map_err(|err| blame_cancel(err, &self.cancel))?;
        self.observe(message)
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.finished {
            return Err(ChannelError::TakeAfterEnd {
                channel: self.index,
            });
        }
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Cancelled {
                channel: self.index,
            });
        }
        Ok(())
    }

    fn observe(&mut self, message: Message) -> Result<Message, ChannelError> {
        if message == Message::EndOfStream {
            self.finished = true;
        }
        Ok(message)
    }
}

/// Once a run is cancelled, peers exit and drop their endpoints; a lost
/// peer observed after that point is the cancellation, not a fault.
fn blame_cancel(err: ChannelError, cancel: &CancelToken) -> ChannelError {
    match err {
        ChannelError::Disconnected { channel } | ChannelError::ConsumerGone { channel }
            if cancel.is_cancelled() =>
        {
            ChannelError::Cancelled { channel }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn data(s: &str) -> Message {
        Message::Data(Record::new(s))
    }

    #[test]
    fn test_fifo_then_marker() {
        let cancel = CancelToken::new();
        let (mut tx, mut rx) = channel(0, None, &cancel);
        tx.put(Record::new("a")).unwrap();
        tx.put(Record::new("b")).unwrap();
        tx.close().unwrap();
        assert!(tx.is_closed());

        assert_eq!(rx.take().unwrap(), data("a"));
        assert_eq!(rx.take().unwrap(), data("b"));
        assert_eq!(rx.take().unwrap(), Message::EndOfStream);
        assert!(rx.is_finished());
    }

    #[test]
    fn test_put_after_marker_rejected() {
        let cancel = CancelToken::new();
        let (mut tx, _rx) = channel(4, None, &cancel);
        tx.close().unwrap();
        assert_eq!(
            tx.put(Record::new("late")),
            Err(ChannelError::PutAfterEnd { channel: 4 })
        );
        assert_eq!(tx.close(), Err(ChannelError::PutAfterEnd { channel: 4 }));
    }

    #[test]
    fn test_take_after_marker_rejected() {
        let cancel = CancelToken::new();
        let (mut tx, mut rx) = channel(1, None, &cancel);
        tx.close().unwrap();
        assert_eq!(rx.take().unwrap(), Message::EndOfStream);
        assert_eq!(rx.take(), Err(ChannelError::TakeAfterEnd { channel: 1 }));
    }

    #[test]
    fn test_dropped_writer_without_marker_is_disconnect() {
        let cancel = CancelToken::new();
        let (mut tx, mut rx) = channel(2, None, &cancel);
        tx.put(Record::new("only")).unwrap();
        drop(tx);
        assert_eq!(rx.take().unwrap(), data("only"));
        assert_eq!(rx.take(), Err(ChannelError::Disconnected { channel: 2 }));
    }

    #[test]
    fn test_dropped_reader_is_consumer_gone() {
        let cancel = CancelToken::new();
        let (mut tx, rx) = channel(3, Some(1), &cancel);
        drop(rx);
        assert_eq!(
            tx.put(Record::new("x")),
            Err(ChannelError::ConsumerGone { channel: 3 })
        );
    }

    #[test]
    fn test_missing_marker_times_out() {
        let cancel = CancelToken::new();
        let (mut tx, mut rx) = channel(0, None, &cancel);
        tx.put(Record::new("a")).unwrap();
        assert_eq!(rx.take_timeout(Duration::from_secs(1)).unwrap(), data("a"));
        let err = rx.take_timeout(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ChannelError::TimedOut { channel: 0, .. }));
        // Writer is still alive; it simply never closed.
        drop(tx);
    }

    #[test]
    fn test_bounded_put_blocks_until_taken() {
        let cancel = CancelToken::new();
        let (mut tx, mut rx) = channel(0, Some(1), &cancel);
        let producer = thread::spawn(move || {
            for s in ["a", "b", "c"] {
                tx.put(Record::new(s)).unwrap();
            }
            tx.close().unwrap();
        });
        thread::sleep(Duration::from_millis(20));
        // Only "a" fits; the producer is parked on "b".
        assert!(!producer.is_finished());
        let mut seen = Vec::new();
        loop {
            match rx.take().unwrap() {
                Message::Data(r) => seen.push(r.into_string()),
                Message::EndOfStream => break,
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cancel_wakes_blocked_take() {
        let cancel = CancelToken::new();
        let (_tx, mut rx) = channel(7, None, &cancel);
        let handle = thread::spawn(move || rx.take());
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(
            handle.join().unwrap(),
            Err(ChannelError::Cancelled { channel: 7 })
        );
    }

    #[test]
    fn test_cancel_wakes_blocked_put() {
        let cancel = CancelToken::new();
        let (mut tx, _rx) = channel(1, Some(1), &cancel);
        tx.put(Record::new("fills")).unwrap();
        let handle = thread::spawn(move || tx.put(Record::new("blocks")));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(
            handle.join().unwrap(),
            Err(ChannelError::Cancelled { channel: 1 })
        );
    }

    #[test]
    fn test_try_close_on_full_channel() {
        let cancel = CancelToken::new();
        let (mut tx, mut rx) = channel(0, Some(1), &cancel);
        tx.put(Record::new("a")).unwrap();
        assert!(!tx.try_close());
        assert!(!tx.is_closed());
        assert_eq!(rx.take().unwrap(), data("a"));
        assert!(tx.try_close());
        assert!(!tx.try_close());
        assert_eq!(rx.take().unwrap(), Message::EndOfStream);
    }
}
