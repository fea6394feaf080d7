//! Read-only analytics over stored snapshots and history. Nothing here calls
//! upstream; every figure is derived from the database.

pub mod candles;
pub mod movers;
pub mod spread;
pub mod summary;

use crate::db::Storage;

pub use candles::MovingAveragePoint;
pub use spread::{SpreadAnalysis, VolumeAnalysis};
pub use summary::ItemSummary;

#[derive(Clone)]
pub struct Analytics {
    storage: Storage,
}

impl Analytics {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}
