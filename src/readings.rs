
use itertools::Itertools;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;

/***
 * WeightReadings
 *
 *  A bounded window of the most recent weight samples, shared between the
 * ingest task (the only appender) and any number of HTTP handlers (readers).
 *
 *  Every operation takes the lock exactly once, and only for as long as it
 * takes to push into or copy out of the deque. Sorting and averaging run on
 * the copy, so a slow reader never holds up the producer.
 *
 *  Configuration is passed into the constructor and is immutable.
 */
#[derive(Debug)]
pub struct WeightReadings {
    readings: Mutex<VecDeque<f64>>,
    max_size: usize,
    threshold_deviation: f64,
}

impl WeightReadings {
    pub fn new(max_size: usize, threshold_deviation: f64) -> Self {
        Self {
            readings: Mutex::new(VecDeque::with_capacity(max_size + 1)),
            max_size,
            threshold_deviation,
        }
    }

    /// Appends a sample, first dropping the oldest one if more than
    /// `max_size` are already stored. The window therefore settles at
    /// `max_size + 1` samples.
    pub fn add_reading(&self, reading: f64) {
        let mut readings = self.lock();
        if readings.len() > self.max_size {
            readings.pop_front();
        }
        readings.push_back(reading);
    }

    /// Copy of the stored samples, oldest first.
    pub fn raw_readings(&self) -> Vec<f64> {
        self.lock().iter().copied().collect()
    }

    /// Mean of the samples lying within `threshold_deviation` of the middle
    /// sample, or `None` when there is nothing to average.
    pub fn smoothed_value(&self) -> Option<f64> {
        let data = self
            .raw_readings()
            .into_iter()
            .sorted_by(f64::total_cmp)
            .collect_vec();

        let middle = middle_reading(&data);

        let (sum, count) = data
            .iter()
            .filter(|reading| (*reading - middle).abs() <= self.threshold_deviation)
            .fold((0.0, 0usize), |(sum, count), reading| (sum + reading, count + 1));

        if count == 0 {
            return None;
        }
        Some(sum / count as f64)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn threshold_deviation(&self) -> f64 {
        self.threshold_deviation
    }

    // a push_back/pop_front can't leave the deque half-written, so a panic
    // elsewhere while the guard was held doesn't invalidate the samples
    fn lock(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// positional pick at count/2 of the sorted samples -- not an interpolated median
fn middle_reading(sorted: &[f64]) -> f64 {
    match sorted.get(sorted.len() / 2) {
        Some(x) => *x,
        None => 0.0,
    }
}

/// Drains the hand-off channel into `readings` until every sender is gone.
pub async fn ingest(mut rx: mpsc::Receiver<f64>, readings: Arc<WeightReadings>) {
    while let Some(weight) = rx.recv().await {
        readings.add_reading(weight);

        tracing::debug!(
            weight,
            smoothed = ?readings.smoothed_value(),
            stored = readings.len(),
            "reading added"
        );
        tracing::trace!(raw = ?readings.raw_readings(), "current window");
    }

    tracing::info!("reading source closed, ingest stopped");
}
