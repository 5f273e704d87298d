//! Synthetic order data.
//!
//! Orders look like:
//!
//! ```json
//! {
//!   "userId": "…", "status": "PAID", "total": 1234,
//!   "items": [{"productId": "…", "price": 250, "qty": 3}],
//!   "createdAt": "2026-09-01T10:00:00Z"
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::error::{BenchError, BenchResult};
use crate::logging::ReportSink;
use crate::report::format_duration;
use crate::store::{DocumentStore, Filter};

pub const STATUSES: [&str; 3] = ["PAID", "CANCELLED", "PENDING"];

/// Exclusive upper bound of an order total.
pub const MAX_TOTAL: u32 = 5000;
/// Exclusive upper bound of an item price.
pub const MAX_PRICE: u32 = 1000;
pub const MAX_QTY: u32 = 5;
/// `createdAt` falls within this many hours before the anchor.
pub const CREATED_AT_WINDOW_HOURS: i64 = 1000;

const PROGRESS_EVERY: u64 = 100_000;

/// Random order documents. A fixed seed gives the same orders every time.
pub struct OrderGenerator {
    rng: StdRng,
    anchor: DateTime<Utc>,
}

impl OrderGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            anchor: Utc::now(),
        }
    }

    /// Timestamps count back from `anchor` instead of the current time.
    pub fn with_anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = anchor;
        self
    }

    fn object_id(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.gen())
            .into_uuid()
            .to_string()
    }

    pub fn order(&mut self) -> Value {
        let status = STATUSES[self.rng.gen_range(0..STATUSES.len())];
        let hours_ago = self.rng.gen_range(0..CREATED_AT_WINDOW_HOURS);
        let created_at = self.anchor - chrono::Duration::hours(hours_ago);

        json!({
            "userId": self.object_id(),
            "status": status,
            "total": self.rng.gen_range(0..MAX_TOTAL),
            "items": [{
                "productId": self.object_id(),
                "price": self.rng.gen_range(0..MAX_PRICE),
                "qty": self.rng.gen_range(1..=MAX_QTY),
            }],
            "createdAt": created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }

    pub fn batch(&mut self, n: usize) -> Vec<Value> {
        (0..n).map(|_| self.order()).collect()
    }
}

/// What a seeding run stored.
#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub inserted: u64,
    pub duration: Duration,
    /// Collection count after seeding, when the count succeeded.
    pub stored: Option<u64>,
    pub distribution: Vec<(String, u64)>,
}

impl SeedSummary {
    pub fn rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.inserted as f64 / secs
        } else {
            0.0
        }
    }
}

/// Insert `total` generated orders in batches of `batch_size`, then report
/// the stored count and the status distribution.
pub async fn seed_collection(
    store: &dyn DocumentStore,
    generator: &mut OrderGenerator,
    total: u64,
    batch_size: usize,
    sink: &dyn ReportSink,
) -> BenchResult<SeedSummary> {
    if batch_size == 0 {
        return Err(BenchError::InvalidArgument(
            "seed batch size must be at least 1".to_string(),
        ));
    }

    sink.write_line(&format!(
        "Seeding {} records into '{}' (batch size {})",
        total,
        store.collection(),
        batch_size
    ));
    let start = Instant::now();
    let mut inserted = 0u64;
    let mut next_progress = PROGRESS_EVERY;

    while inserted < total {
        let n = (total - inserted).min(batch_size as u64) as usize;
        inserted += store.insert_many(generator.batch(n)).await? as u64;

        if inserted >= next_progress && inserted < total {
            let rate = inserted as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON);
            let eta = Duration::from_secs_f64((total - inserted) as f64 / rate);
            sink.write_line(&format!(
                "  Progress: {}/{} records ({:.1} rec/s, ~{} remaining)",
                inserted,
                total,
                rate,
                format_duration(eta)
            ));
            next_progress += PROGRESS_EVERY;
        }
    }

    let duration = start.elapsed();
    let stored = match store.count(&Filter::all()).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!("Count after seeding failed: {}", e);
            sink.write_line(&format!("WARNING: could not count stored records: {}", e));
            None
        }
    };

    let mut distribution = Vec::with_capacity(STATUSES.len());
    for status in STATUSES {
        let count = store.count(&Filter::eq("status", status)).await?;
        distribution.push((status.to_string(), count));
    }

    let summary = SeedSummary {
        inserted,
        duration,
        stored,
        distribution,
    };
    report(&summary, sink);
    Ok(summary)
}

fn report(summary: &SeedSummary, sink: &dyn ReportSink) {
    sink.write_line("");
    sink.write_line("Seeding complete");
    sink.write_line(&format!("  Total time: {}", format_duration(summary.duration)));
    sink.write_line(&format!("  Rate: {:.1} records/s", summary.rate()));
    sink.write_line(&format!("  Inserted: {}", summary.inserted));
    if let Some(stored) = summary.stored {
        sink.write_line(&format!("  Records in collection: {}", stored));
    }
    sink.write_line("Status distribution:");
    for (status, count) in &summary.distribution {
        let pct = if summary.inserted > 0 {
            *count as f64 / summary.inserted as f64 * 100.0
        } else {
            0.0
        };
        sink.write_line(&format!("  {}: {} ({:.1}%)", status, count, pct));
    }
}
