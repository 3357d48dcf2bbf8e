//! Item dataset sources.
//!
//! An [`ItemSource`] produces the canonical items batch on demand. The
//! default [`SimulatedSource`] models an expensive query (CPU spin plus a
//! random I/O wait) without external dependencies; the feature-gated
//! [`DbSource`] runs the real query against MySQL so the cached and
//! uncached endpoints can be benchmarked against an actual backing store.

use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::{Duration, Instant};

/// Categories cycled through when generating synthetic items.
pub const CATEGORIES: [&str; 4] = ["Electronics", "Food", "Clothing", "Books"];

/// One record of the items dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "mysql", derive(sqlx::FromRow))]
pub struct Item {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub price: u32,
    pub category: String,
}

/// A freshly produced batch plus its measured wall-clock cost.
#[derive(Debug, Clone)]
pub struct Generated {
    pub items: Vec<Item>,
    pub elapsed: Duration,
}

/// Trait for item dataset producers.
///
/// Implementations must be safely callable concurrently — each invocation
/// is independent and shares no mutable state with other invocations.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Produce a fresh batch, optionally filtered by category.
    async fn generate(&self, category: Option<&str>) -> Result<Generated>;
}

/// Simulated expensive source: bounded CPU spin followed by a bounded
/// random async delay, then a fixed-size synthetic batch.
///
/// The spin runs inline on the runtime thread on purpose — it stands in
/// for a heavy serialization/compute path whose cost the cached endpoints
/// are meant to hide.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    item_count: u32,
    spin_iterations: u64,
    delay_ms: Range<u64>,
}

impl SimulatedSource {
    /// Default timings: ~10-20ms of spin plus 5-15ms of simulated I/O.
    pub fn new(item_count: u32) -> Self {
        Self {
            item_count,
            spin_iterations: 1_000_000,
            delay_ms: 5..15,
        }
    }

    /// Custom timings for benches. `delay_ms` must be non-empty.
    pub fn with_timings(item_count: u32, spin_iterations: u64, delay_ms: Range<u64>) -> Self {
        Self {
            item_count,
            spin_iterations,
            delay_ms,
        }
    }

    fn build_items(&self) -> Vec<Item> {
        let mut rng = rand::rng();
        (1..=self.item_count)
            .map(|i| Item {
                id: i,
                name: format!("Item {i}"),
                description: format!("This is item number {i} with some description text"),
                price: rng.random_range(0..10_000),
                category: CATEGORIES[(i % 4) as usize].to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl ItemSource for SimulatedSource {
    async fn generate(&self, category: Option<&str>) -> Result<Generated> {
        let start = Instant::now();

        // CPU-bound phase. The accumulator is kept live so the loop is not
        // optimized away; iteration count is fixed, never data-dependent.
        let delay = {
            let mut rng = rand::rng();
            let mut acc = 0f64;
            for i in 0..self.spin_iterations {
                acc += (i as f64).sqrt() * rng.random::<f64>();
            }
            std::hint::black_box(acc);
            Duration::from_millis(rng.random_range(self.delay_ms.clone()))
        };

        // Simulated network/storage wait.
        tokio::time::sleep(delay).await;

        let mut items = self.build_items();
        if let Some(cat) = category {
            items.retain(|item| item.category.eq_ignore_ascii_case(cat));
        }

        Ok(Generated {
            items,
            elapsed: start.elapsed(),
        })
    }
}

/// MySQL-backed source querying the `items` table.
#[cfg(feature = "mysql")]
pub struct DbSource {
    pool: sqlx::MySqlPool,
}

#[cfg(feature = "mysql")]
impl DbSource {
    /// Connect a pool using the given settings.
    pub async fn connect(db: &crate::config::DbConfig) -> Result<Self> {
        let url = format!(
            "mysql://{}:{}@{}/{}",
            db.user, db.password, db.host, db.database
        );
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .max_connections(db.pool_size)
            .connect(&url)
            .await?;
        Ok(Self { pool })
    }
}

#[cfg(feature = "mysql")]
#[async_trait]
impl ItemSource for DbSource {
    async fn generate(&self, category: Option<&str>) -> Result<Generated> {
        let start = Instant::now();

        let items: Vec<Item> = match category {
            Some(cat) => {
                sqlx::query_as(
                    "SELECT id, name, description, price, category FROM items WHERE category = ?",
                )
                .bind(cat)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT id, name, description, price, category FROM items")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(Generated {
            items,
            elapsed: start.elapsed(),
        })
    }
}
