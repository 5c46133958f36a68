//! Lock-efficient event ingestion.
//!
//! Executors report events into a bounded queue; a single consumer task
//! drains the queue into an append-only log. Reporting never blocks: when
//! the queue is full the event is shed and counted, because a load
//! generator must not slow itself down under metric pressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::event::{Event, Reporter};

/// Default bound of the ingestion queue.
const QUEUE_SIZE: usize = 1000;

/// Aggregates events from all executors.
pub struct Collector {
    sender: flume::Sender<Event>,
    close_sender: Mutex<Option<flume::Sender<()>>>,
    consumer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shared: Arc<Shared>,
    start: Instant,
    end: Mutex<Option<Instant>>,
}

struct Shared {
    events: Mutex<Vec<Event>>,
    dropped: AtomicUsize,
}

impl Collector {
    /// Create a collector and start its consumer task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new() -> Collector {
        Collector::with_capacity(QUEUE_SIZE)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Collector {
        let (sender, receiver) = flume::bounded::<Event>(capacity);
        let (close_sender, close_receiver) = flume::bounded::<()>(1);
        let shared = Arc::new(Shared {
            events: Mutex::new(Vec::new()),
            dropped: AtomicUsize::new(0),
        });

        let consumer_shared = shared.clone();
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = receiver.recv_async() => match event {
                        Ok(event) => consumer_shared.push(event),
                        Err(_) => break,
                    },
                    _ = close_receiver.recv_async() => {
                        // Drain whatever the producers managed to queue.
                        while let Ok(event) = receiver.try_recv() {
                            consumer_shared.push(event);
                        }
                        break;
                    }
                }
            }
        });

        Collector {
            sender,
            close_sender: Mutex::new(Some(close_sender)),
            consumer: Mutex::new(Some(consumer)),
            shared,
            start: Instant::now(),
            end: Mutex::new(None),
        }
    }

    /// Stop ingestion, record the end time and wait for the consumer to
    /// drain the queue. Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut end = self.end.lock().unwrap();
            if end.is_none() {
                *end = Some(Instant::now());
            }
        }
        // Dropping the close sender wakes the consumer.
        self.close_sender.lock().unwrap().take();
        let consumer = self.consumer.lock().unwrap().take();
        if let Some(consumer) = consumer {
            let _ = consumer.await;
        }
        let dropped = self.dropped();
        if dropped > 0 {
            warn!("{} event(s) dropped: metrics queue saturated", dropped);
        }
    }

    /// A defensive copy of the event log.
    pub fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    /// How many events were shed because the queue was full.
    pub fn dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Elapsed test time: end − start once closed, otherwise now − start.
    pub fn duration(&self) -> Duration {
        match *self.end.lock().unwrap() {
            Some(end) => end.saturating_duration_since(self.start),
            None => self.start.elapsed(),
        }
    }
}

impl Shared {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Reporter for Collector {
    /// Non-blocking: a full queue sheds the event and counts the drop.
    fn report(&self, event: Event) {
        if self.sender.try_send(event).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
