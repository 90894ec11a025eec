//! Demo sustainability metrics.
//!
//! A rolling buffer of randomly generated samples with recent-N listing and
//! a linear-scan Euclidean similarity search, plus a trend forecast over a
//! slice of history. The buffer is the only state
//! shared between requests, so all access goes through one mutex owned by
//! [`MetricsBuffer`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::IntervalStream;

/// One sample of plant metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub timestamp: String,
    /// Tons.
    pub co2_emissions: f64,
    /// Percent.
    pub waste_level: f64,
    /// kWh.
    pub energy_usage: f64,
}

impl MetricSample {
    /// Generate a random sample stamped with the current time.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            co2_emissions: round_to(rng.gen_range(80.0..=150.0), 2),
            waste_level: round_to(rng.gen_range(30.0..=90.0), 1),
            energy_usage: round_to(rng.gen_range(10_000.0..=18_000.0), 1),
        }
    }

    fn vector(&self) -> [f64; 3] {
        [self.co2_emissions, self.waste_level, self.energy_usage]
    }
}

/// Query point for similarity search; missing fields count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct MetricProbe {
    #[serde(default)]
    pub co2_emissions: f64,
    #[serde(default)]
    pub waste_level: f64,
    #[serde(default)]
    pub energy_usage: f64,
}

impl MetricProbe {
    fn vector(&self) -> [f64; 3] {
        [self.co2_emissions, self.waste_level, self.energy_usage]
    }
}

/// A stored sample and its distance from the probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarSample {
    #[serde(flatten)]
    pub sample: MetricSample,
    /// Euclidean distance, rounded to 4 places.
    pub score: f64,
}

/// Fixed-capacity rolling buffer; the oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct MetricsBuffer {
    inner: Arc<Mutex<VecDeque<MetricSample>>>,
    capacity: usize,
}

impl MetricsBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<MetricSample>> {
        // Samples are plain data; a panic mid-push cannot leave them torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, sample: MetricSample) {
        let len = {
            let mut samples = self.lock();
            if samples.len() == self.capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
            samples.len()
        };
        tracing::trace!(name: "metrics.stored", total = len, "Stored metrics sample");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The last `limit` samples, ordered by timestamp.
    pub fn recent(&self, limit: usize) -> Vec<MetricSample> {
        let mut recent: Vec<MetricSample> = {
            let samples = self.lock();
            let skip = samples.len().saturating_sub(limit);
            samples.iter().skip(skip).cloned().collect()
        };
        recent.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        recent
    }

    /// The `top_k` stored samples closest to `probe`, nearest first.
    pub fn similar(&self, probe: &MetricProbe, top_k: usize) -> Vec<SimilarSample> {
        let target = probe.vector();
        let mut scored: Vec<(f64, MetricSample)> = self
            .lock()
            .iter()
            .map(|s| (euclidean(&target, &s.vector()), s.clone()))
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(distance, sample)| SimilarSample {
                sample,
                score: round_to(distance, 4),
            })
            .collect()
    }

    /// Endless stream that generates, stores and yields one sample per tick.
    pub fn live(&self, every: Duration) -> impl Stream<Item = MetricSample> + Send + use<> {
        let buffer = self.clone();
        IntervalStream::new(tokio::time::interval(every)).map(move |_| {
            let sample = MetricSample::random();
            buffer.push(sample.clone());
            sample
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forecast
// ─────────────────────────────────────────────────────────────────────────────

/// Latest and next-period value of one metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricForecast {
    pub metric: &'static str,
    pub latest: f64,
    pub predicted: f64,
}

/// Summary text plus one entry per metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub summary: String,
    pub forecast: Vec<MetricForecast>,
}

const FORECAST_LABELS: [&str; 3] = [
    "CO2 Emissions (tons)",
    "Waste Level (%)",
    "Energy Usage (kWh)",
];

/// Project each metric one step ahead from `history`, oldest first.
///
/// With two or more samples the last step's growth ratio is applied once
/// more to the latest value; a zero previous value counts as no growth.
/// With a single sample the average stands in for both figures.
pub fn forecast(history: &[MetricSample]) -> Forecast {
    let (Some(latest), count) = (history.last(), history.len()) else {
        return Forecast {
            summary: "Not enough data for forecast.".to_string(),
            forecast: Vec::new(),
        };
    };

    let mut sums = [0.0; 3];
    for sample in history {
        for (sum, value) in sums.iter_mut().zip(sample.vector()) {
            *sum += value;
        }
    }
    let averages = sums.map(|sum| sum / count as f64);

    let entries = match history.len().checked_sub(2).map(|i| &history[i]) {
        Some(previous) => latest
            .vector()
            .into_iter()
            .zip(previous.vector())
            .map(|(new, old)| {
                let ratio = if old == 0.0 { 1.0 } else { new / old };
                (new, new * ratio)
            })
            .collect::<Vec<_>>(),
        None => averages.iter().map(|&avg| (avg, avg)).collect(),
    };

    let forecast = FORECAST_LABELS
        .into_iter()
        .zip(entries)
        .map(|(metric, (latest, predicted))| MetricForecast {
            metric,
            latest: round_to(latest, 2),
            predicted: round_to(predicted, 2),
        })
        .collect();

    Forecast {
        summary: format!(
            "Forecast (trend):\n- CO2: {:.1} tons\n- Waste: {:.1}%\n- Energy: {:.0} kWh\n\
             Action: continue monitoring; schedule energy audits if trends exceed +5% next week.",
            averages[0], averages[1], averages[2]
        ),
        forecast,
    }
}

fn euclidean(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
