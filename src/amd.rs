//! AMD Registry (§4.4): correlates Telco `AnsweredBy` status callbacks with
//! live Sessions by call id. Shared, mutex-guarded, like the teacher's
//! `CallRegistry` — but keyed by classification rather than by live WS handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::telco::TelcoClient;

/// Answering-party classification reported by the Telco status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Human,
    MachineStart,
    MachineEndBeep,
    MachineEndSilence,
    MachineEndOther,
    Fax,
    Unknown,
}

impl Classification {
    pub fn parse(answered_by: &str) -> Self {
        match answered_by {
            "human" => Classification::Human,
            "machine_start" => Classification::MachineStart,
            "machine_end_beep" => Classification::MachineEndBeep,
            "machine_end_silence" => Classification::MachineEndSilence,
            "machine_end_other" => Classification::MachineEndOther,
            "fax" => Classification::Fax,
            _ => Classification::Unknown,
        }
    }

    /// Whether this classification should trigger a voicemail-mode Session
    /// and an AMD finalize watchdog (§4.4, §4.3 "mode: voicemail").
    pub fn is_machine(&self) -> bool {
        matches!(
            self,
            Classification::MachineStart
                | Classification::MachineEndBeep
                | Classification::MachineEndSilence
                | Classification::MachineEndOther
                | Classification::Fax
        )
    }
}

struct AmdRecord {
    classification: Classification,
    arrival_ts: Instant,
}

const GC_TTL: Duration = Duration::from_secs(10 * 60);
const WATCHDOG_TTL: Duration = Duration::from_secs(60);

/// Process-wide `{call_id -> classification}` mapping (§3, "AMD Record").
///
/// Write path: `/call-status` handler. Read path: Session on Telco `start`,
/// which deletes the entry (first-write-wins per §4.4 "Race").
#[derive(Clone)]
pub struct AmdRegistry {
    inner: Arc<Mutex<HashMap<String, AmdRecord>>>,
}

impl Default for AmdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AmdRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a classification for `call_id`. First write for a given
    /// `call_id` wins; later callbacks for the same call are ignored.
    ///
    /// If `answered_by` is a machine/fax classification, arms a 60s watchdog
    /// that finalizes the Telco call regardless of whether a Session ever
    /// binds to it (§8, "For every AMD classification in {machine_*, fax}...").
    pub async fn record(&self, call_id: String, answered_by: &str, telco: Arc<TelcoClient>) {
        let classification = Classification::parse(answered_by);

        let mut map = self.inner.lock().await;
        if map.contains_key(&call_id) {
            tracing::debug!(call_id = %call_id, "AMD classification already recorded, ignoring");
            return;
        }
        map.insert(
            call_id.clone(),
            AmdRecord {
                classification,
                arrival_ts: Instant::now(),
            },
        );
        drop(map);

        tracing::info!(call_id = %call_id, ?classification, "AMD classification recorded");

        if classification.is_machine() {
            tokio::spawn(async move {
                tokio::time::sleep(WATCHDOG_TTL).await;
                tracing::info!(call_id = %call_id, "AMD watchdog firing, finalizing call");
                if let Err(e) = telco.finalize_call(&call_id).await {
                    tracing::warn!(call_id = %call_id, "AMD watchdog finalize failed: {e}");
                }
            });
        }
    }

    /// Consult and remove the classification for `call_id`, if any (read path,
    /// consulted by the Session Bridge on Telco `start`).
    pub async fn take(&self, call_id: &str) -> Option<Classification> {
        self.inner.lock().await.remove(call_id).map(|r| r.classification)
    }

    /// Garbage-collect entries older than 10 minutes that nobody consumed.
    pub async fn gc(&self) {
        let mut map = self.inner.lock().await;
        map.retain(|call_id, record| {
            let keep = record.arrival_ts.elapsed() < GC_TTL;
            if !keep {
                tracing::debug!(call_id = %call_id, "AMD record garbage-collected");
            }
            keep
        });
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Spawn the periodic GC loop (every minute), for startup wiring.
    pub fn spawn_gc_loop(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                self.gc().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_machine_variants() {
        assert!(Classification::parse("machine_start").is_machine());
        assert!(Classification::parse("machine_end_beep").is_machine());
        assert!(Classification::parse("machine_end_silence").is_machine());
        assert!(Classification::parse("machine_end_other").is_machine());
        assert!(Classification::parse("fax").is_machine());
        assert!(!Classification::parse("human").is_machine());
        assert!(!Classification::parse("garbage").is_machine());
    }

    #[tokio::test]
    async fn first_write_wins() {
        let registry = AmdRegistry::new();
        let telco = Arc::new(TelcoClient::for_tests());

        registry.record("CA1".into(), "machine_start", telco.clone()).await;
        registry.record("CA1".into(), "human".into(), telco).await;

        let classification = registry.take("CA1").await;
        assert_eq!(classification, Some(Classification::MachineStart));
    }

    #[tokio::test]
    async fn take_consumes_entry() {
        let registry = AmdRegistry::new();
        let telco = Arc::new(TelcoClient::for_tests());
        registry.record("CA2".into(), "human", telco).await;

        assert_eq!(registry.take("CA2").await, Some(Classification::Human));
        assert_eq!(registry.take("CA2").await, None);
    }
}
