//! Call-Rate Predictor (§4.6): tracks call arrival timestamps bucketed by
//! hour-of-day over the last 24h, and every 10 minutes predicts the next 2h
//! of volume to size the URL Prewarm Cache.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::prewarm::{SignedUrlSource, UrlPrewarmCache};

const WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const PREDICT_INTERVAL: Duration = Duration::from_secs(10 * 60);
const LOOKAHEAD_HOURS: u64 = 2;

/// An arrival timestamp, seconds since epoch, plus its hour-of-day bucket.
struct Arrival {
    at: u64,
    hour_of_day: u8,
}

pub struct CallRatePredictor {
    arrivals: Arc<Mutex<VecDeque<Arrival>>>,
}

impl Default for CallRatePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRatePredictor {
    pub fn new() -> Self {
        Self {
            arrivals: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Record a call arrival "now".
    pub async fn record_arrival(&self) {
        let now = now_secs();
        let hour_of_day = ((now / 3600) % 24) as u8;
        let mut arrivals = self.arrivals.lock().await;
        arrivals.push_back(Arrival { at: now, hour_of_day });
        Self::evict_stale(&mut arrivals, now);
    }

    fn evict_stale(arrivals: &mut VecDeque<Arrival>, now: u64) {
        while let Some(front) = arrivals.front() {
            if now.saturating_sub(front.at) > WINDOW.as_secs() {
                arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    /// Sum of the last-24h arrival counts for the next `LOOKAHEAD_HOURS`
    /// hour-of-day buckets (§4.6).
    pub async fn predict_next_window(&self) -> u32 {
        let now = now_secs();
        let current_hour = ((now / 3600) % 24) as u8;

        let mut arrivals = self.arrivals.lock().await;
        Self::evict_stale(&mut arrivals, now);

        let target_hours: Vec<u8> = (1..=LOOKAHEAD_HOURS)
            .map(|offset| ((current_hour as u64 + offset) % 24) as u8)
            .collect();

        arrivals
            .iter()
            .filter(|a| target_hours.contains(&a.hour_of_day))
            .count() as u32
    }

    /// Step table mapping predicted volume to a target cache size (§4.6).
    pub fn target_for(predicted: u32) -> usize {
        match predicted {
            0..=10 => 3,
            11..=20 => 5,
            21..=50 => 8,
            _ => 10,
        }
    }

    /// Spawn the periodic (every 10 minutes) prediction loop, applying the
    /// resulting target to `cache`.
    pub fn spawn_loop<S: SignedUrlSource + 'static>(
        self: Arc<Self>,
        cache: Arc<UrlPrewarmCache<S>>,
    ) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PREDICT_INTERVAL);
            loop {
                interval.tick().await;
                let predicted = self.predict_next_window().await;
                let target = Self::target_for(predicted);
                tracing::info!(predicted, target, "Call-rate prediction updated cache target");
                cache.set_target(target);
                cache.fill().await;
            }
        });
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_table() {
        assert_eq!(CallRatePredictor::target_for(0), 3);
        assert_eq!(CallRatePredictor::target_for(10), 3);
        assert_eq!(CallRatePredictor::target_for(11), 5);
        assert_eq!(CallRatePredictor::target_for(20), 5);
        assert_eq!(CallRatePredictor::target_for(21), 8);
        assert_eq!(CallRatePredictor::target_for(50), 8);
        assert_eq!(CallRatePredictor::target_for(51), 10);
        assert_eq!(CallRatePredictor::target_for(1000), 10);
    }

    #[tokio::test]
    async fn records_and_predicts_current_hour_window() {
        let predictor = CallRatePredictor::new();
        for _ in 0..5 {
            predictor.record_arrival().await;
        }
        // The recorded arrivals land in the *current* hour bucket, which is
        // not part of the next-2h lookahead window, so prediction stays 0
        // until the clock actually advances into those buckets.
        let predicted = predictor.predict_next_window().await;
        assert_eq!(predicted, 0);
    }
}
