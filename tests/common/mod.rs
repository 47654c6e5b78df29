//! Shared fixtures for queue integration tests.

#![allow(dead_code)]

use batchq::model::{Batch, FlushTrigger, Keyed};
use batchq::processor::BatchProcessor;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A small keyed test item: `n` is the offer sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub channel: &'static str,
    pub n: u32,
}

impl Keyed for Update {
    type Key = &'static str;

    fn partition_key(&self) -> &'static str {
        self.channel
    }
}

pub fn update(channel: &'static str, n: u32) -> Update {
    Update { channel, n }
}

/// One processor call as observed by [`Recorder`].
#[derive(Debug, Clone)]
pub struct Seen {
    pub key: &'static str,
    pub seq: u64,
    pub trigger: FlushTrigger,
    pub items: Vec<u32>,
    /// Time since the recorder was created when the call started.
    pub started: Duration,
    /// Time since the recorder was created when the call finished.
    pub finished: Option<Duration>,
    pub ok: bool,
}

#[derive(Default)]
struct Shared {
    seen: Mutex<Vec<Seen>>,
    in_flight: Mutex<HashMap<&'static str, usize>>,
    max_in_flight: Mutex<HashMap<&'static str, usize>>,
}

/// A processor that records every batch and can be told to be slow,
/// fail, or panic for specific `(key, seq)` calls.
#[derive(Clone)]
pub struct Recorder {
    shared: Arc<Shared>,
    origin: Instant,
    delays: Arc<HashMap<&'static str, Duration>>,
    fail_on: Arc<HashSet<(&'static str, u64)>>,
    panic_on: Arc<HashSet<(&'static str, u64)>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            shared: Arc::default(),
            origin: Instant::now(),
            delays: Arc::default(),
            fail_on: Arc::default(),
            panic_on: Arc::default(),
        }
    }

    pub fn delay(mut self, key: &'static str, delay: Duration) -> Self {
        Arc::make_mut(&mut self.delays).insert(key, delay);
        self
    }

    pub fn fail_on(mut self, key: &'static str, seq: u64) -> Self {
        Arc::make_mut(&mut self.fail_on).insert((key, seq));
        self
    }

    pub fn panic_on(mut self, key: &'static str, seq: u64) -> Self {
        Arc::make_mut(&mut self.panic_on).insert((key, seq));
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.shared.seen.lock().unwrap().clone()
    }

    pub fn seen_for(&self, key: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.key == key).collect()
    }

    /// Items delivered for `key`, concatenated in dispatch order.
    pub fn items_for(&self, key: &str) -> Vec<u32> {
        self.seen_for(key)
            .into_iter()
            .flat_map(|s| s.items)
            .collect()
    }

    /// Highest number of concurrent processor calls observed for `key`.
    pub fn max_in_flight(&self, key: &str) -> usize {
        self.shared
            .max_in_flight
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl BatchProcessor<Update> for Recorder {
    type Error = String;

    fn process(&self, batch: Batch<Update>) -> impl Future<Output = Result<(), String>> + Send {
        let recorder = self.clone();
        async move {
            let key = batch.key;
            let seq = batch.seq;
            let index = {
                let mut seen = recorder.shared.seen.lock().unwrap();
                seen.push(Seen {
                    key,
                    seq,
                    trigger: batch.trigger,
                    items: batch.items.iter().map(|u| u.n).collect(),
                    started: recorder.origin.elapsed(),
                    finished: None,
                    ok: false,
                });
                seen.len() - 1
            };
            {
                let mut in_flight = recorder.shared.in_flight.lock().unwrap();
                let count = in_flight.entry(key).or_insert(0);
                *count += 1;
                let mut max = recorder.shared.max_in_flight.lock().unwrap();
                let max = max.entry(key).or_insert(0);
                *max = (*max).max(*count);
            }

            if let Some(delay) = recorder.delays.get(key) {
                tokio::time::sleep(*delay).await;
            }

            *recorder
                .shared
                .in_flight
                .lock()
                .unwrap()
                .get_mut(key)
                .unwrap() -= 1;

            if recorder.panic_on.contains(&(key, seq)) {
                panic!("boom on {key} batch {seq}");
            }
            let ok = !recorder.fail_on.contains(&(key, seq));
            {
                let mut seen = recorder.shared.seen.lock().unwrap();
                seen[index].finished = Some(recorder.origin.elapsed());
                seen[index].ok = ok;
            }
            if ok {
                Ok(())
            } else {
                Err(format!("rejected {key} batch {seq}"))
            }
        }
    }
}
