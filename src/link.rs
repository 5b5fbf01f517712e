use crate::message::Message;
use crate::metrics::StageMetrics;
use crossbeam::channel::{Sender, TrySendError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Count of messages a stage currently owns: queued on its paths or being handled.
pub(crate) type InFlight = Arc<AtomicUsize>;

/// Sending half of a bounded path into a stage (or the sink).
///
/// The receiver's in-flight count is raised before the message enters the
/// channel, so a receiver never looks idle while a message is in transit to it.
#[derive(Clone)]
pub(crate) struct Link {
    tx: Sender<Message>,
    in_flight: InFlight,
    metrics: StageMetrics,
}

impl Link {
    /// `metrics` belongs to the sending side; blocked sends are recorded there.
    pub(crate) fn new(tx: Sender<Message>, in_flight: InFlight, metrics: StageMetrics) -> Self {
        Self {
            tx,
            in_flight,
            metrics,
        }
    }

    /// Send, blocking while the path is full.
    ///
    /// Hands the message back if the receiving side has gone away.
    pub(crate) fn send(&self, msg: Message) -> Result<(), Message> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                self.metrics.record_block();
                self.tx.send(msg).map_err(|err| err.into_inner())
            }
            Err(TrySendError::Disconnected(msg)) => Err(msg),
        };
        if result.is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    /// Non-blocking send; hands the message back when full or disconnected
    pub(crate) fn try_send(&self, msg: Message) -> Result<(), Message> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.tx.try_send(msg).map_err(|err| {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            err.into_inner()
        })
    }

    /// Messages buffered on the channel right now
    pub(crate) fn len(&self) -> usize {
        self.tx.len()
    }

    /// Buffer capacity; `None` for unbounded channels
    pub(crate) fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }
}

/// A closable admission point in front of a [`Link`].
///
/// Closing waits for sends already in progress, then drops the sender so the
/// receiving side observes a disconnect once it has drained the channel.
pub(crate) struct Gate {
    link: RwLock<Option<Link>>,
}

impl Gate {
    pub(crate) fn new(link: Link) -> Self {
        Self {
            link: RwLock::new(Some(link)),
        }
    }

    pub(crate) fn push(&self, msg: Message) -> Result<(), Message> {
        match self.link.read().as_ref() {
            Some(link) => link.send(msg),
            None => Err(msg),
        }
    }

    pub(crate) fn try_push(&self, msg: Message) -> Result<(), Message> {
        match self.link.read().as_ref() {
            Some(link) => link.try_send(msg),
            None => Err(msg),
        }
    }

    pub(crate) fn close(&self) {
        self.link.write().take();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.link.read().is_none()
    }

    /// Percentage of the buffer in use (0-100); 0 when closed or unbuffered
    pub(crate) fn utilization(&self) -> u32 {
        match self.link.read().as_ref() {
            Some(link) => match link.capacity() {
                Some(cap) if cap > 0 => ((link.len() * 100) / cap).min(100) as u32,
                _ => 0,
            },
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::thread;
    use std::time::Duration;

    fn link(cap: usize) -> (Link, crossbeam::channel::Receiver<Message>, InFlight, StageMetrics) {
        let (tx, rx) = bounded(cap);
        let in_flight = InFlight::default();
        let metrics = StageMetrics::new();
        (
            Link::new(tx, Arc::clone(&in_flight), metrics.clone()),
            rx,
            in_flight,
            metrics,
        )
    }

    #[test]
    fn test_send_counts_in_flight() {
        let (link, rx, in_flight, _) = link(4);
        link.send(Message::new(vec![1])).unwrap();
        link.send(Message::new(vec![2])).unwrap();
        assert_eq!(in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(rx.recv().unwrap().data(), &[1]);
    }

    #[test]
    fn test_full_link_blocks_and_records() {
        let (link, rx, _, metrics) = link(1);
        link.send(Message::new(vec![1])).unwrap();

        let sender = thread::spawn(move || link.send(Message::new(vec![2])).is_ok());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(metrics.total_blocks(), 1);

        assert_eq!(rx.recv().unwrap().data(), &[1]);
        assert!(sender.join().unwrap());
        assert_eq!(rx.recv().unwrap().data(), &[2]);
    }

    #[test]
    fn test_disconnected_link_returns_message() {
        let (link, rx, in_flight, _) = link(1);
        drop(rx);
        let back = link.send(Message::new(vec![9])).unwrap_err();
        assert_eq!(back.data(), &[9]);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gate_close_rejects() {
        let (link, rx, _, _) = link(2);
        let gate = Gate::new(link);
        gate.push(Message::new(vec![1])).unwrap();
        assert_eq!(gate.utilization(), 50);

        gate.close();
        assert!(gate.is_closed());
        assert!(gate.push(Message::new(vec![2])).is_err());
        assert!(gate.try_push(Message::new(vec![3])).is_err());

        assert_eq!(rx.recv().unwrap().data(), &[1]);
        assert!(rx.recv().is_err());
    }
}
