//! Reconciliation worker.
//!
//! Drains the dispatch queue, re-derives canonical fields from each event's
//! raw payload, and applies the payment write and the event status change in
//! one transaction. Scales horizontally: correctness comes from the queue
//! lease, not from running a single copy.

use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::event_repository::EventRepository;
use crate::database::payment_repository::{PaymentRepository, PaymentUpsert};
use crate::database::queue_repository::{DueEvent, QueueRepository};
use crate::providers::registry::ProviderRegistry;
use crate::providers::types::{EventKind, ProviderKind};

pub const STATUS_INVALID: &str = "invalid";
pub const STATUS_IGNORED: &str = "ignored";

const DEFAULT_CURRENCY: &str = "KES";

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Items left in `delivering` longer than this are considered orphaned by
    /// a dead worker and returned to the queue.
    pub stalled_after: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 50,
            stalled_after: Duration::from_secs(300),
        }
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("WORKER_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("WORKER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(cfg.batch_size);
        cfg.stalled_after = Duration::from_secs(
            std::env::var("WORKER_STALLED_AFTER_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(cfg.stalled_after.as_secs()),
        );
        cfg
    }
}

/// What the worker decided to do with a leased event.
#[derive(Debug)]
enum Resolution {
    /// Write/merge the payment row and finalize the event, atomically.
    Reconcile {
        payment: PaymentUpsert,
        final_status: String,
    },
    /// Finalize the event without touching payments (poison avoidance).
    Finalize(&'static str),
}

/// How many poll cycles pass between sweeps for events whose enqueue was
/// lost after the durable write.
const SWEEP_EVERY_CYCLES: u64 = 30;

pub struct ReconcileWorker {
    pool: PgPool,
    queue: QueueRepository,
    events: EventRepository,
    payments: PaymentRepository,
    registry: Arc<ProviderRegistry>,
    config: ReconcileConfig,
}

impl ReconcileWorker {
    pub fn new(pool: PgPool, registry: Arc<ProviderRegistry>, config: ReconcileConfig) -> Self {
        Self {
            queue: QueueRepository::new(pool.clone()),
            events: EventRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            pool,
            registry,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "reconcile worker started"
        );

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconcile worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle(cycles % SWEEP_EVERY_CYCLES == 0).await {
                        warn!(error = %e, "reconcile cycle failed");
                    }
                    cycles = cycles.wrapping_add(1);
                }
            }
        }

        info!("reconcile worker stopped");
    }

    async fn run_cycle(&self, sweep: bool) -> Result<(), DatabaseError> {
        let reclaimed = self.queue.reclaim_stalled(self.config.stalled_after).await?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "reclaimed stalled queue items");
        }

        if sweep {
            self.sweep_unqueued().await?;
        }

        let due = self.queue.fetch_due(self.config.batch_size).await?;
        for item in due {
            if let Err(e) = self.process_one(&item).await {
                error!(
                    event_id = item.event_id,
                    tenant_id = item.tenant_id,
                    error = %e,
                    "event processing failed"
                );
                if let Err(mark_err) = self
                    .queue
                    .mark_failed(item.queue_id, item.event_id, &e.to_string())
                    .await
                {
                    error!(
                        event_id = item.event_id,
                        error = %mark_err,
                        "failed to record processing failure"
                    );
                }
            }
        }
        Ok(())
    }

    /// Queue insertion on the ingestion path is best-effort; events that were
    /// durably stored but never enqueued are pushed back onto the queue here.
    async fn sweep_unqueued(&self) -> Result<(), DatabaseError> {
        let stranded = self.events.find_unprocessed(self.config.batch_size).await?;
        for event in stranded {
            self.queue.enqueue(event.tenant_id, event.id).await?;
        }
        Ok(())
    }

    async fn process_one(&self, item: &DueEvent) -> Result<(), DatabaseError> {
        match evaluate(&self.registry, item) {
            Resolution::Finalize(status) => {
                self.queue
                    .mark_done(item.queue_id, item.event_id, status)
                    .await?;
                info!(
                    event_id = item.event_id,
                    tenant_id = item.tenant_id,
                    status,
                    "event finalized without payment write"
                );
            }
            Resolution::Reconcile {
                payment,
                final_status,
            } => {
                let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
                self.payments.upsert_in_tx(&mut tx, &payment).await?;
                self.queue
                    .complete_in_tx(&mut tx, item.queue_id, item.event_id, &final_status)
                    .await?;
                tx.commit().await.map_err(DatabaseError::from_sqlx)?;

                info!(
                    event_id = item.event_id,
                    tenant_id = item.tenant_id,
                    external_id = %item.external_id,
                    status = %final_status,
                    "event reconciled"
                );
            }
        }
        Ok(())
    }
}

/// Decide the fate of a leased event. Pure with respect to storage: only the
/// raw payload is trusted for money movement, so the adapter's parser is
/// re-invoked here rather than reading back the ingestion-time fields.
fn evaluate(registry: &ProviderRegistry, item: &DueEvent) -> Resolution {
    let kind = match EventKind::parse(&item.event_type) {
        Some(k) => k,
        None => return Resolution::Finalize(STATUS_IGNORED),
    };

    if !matches!(kind, EventKind::Stk | EventKind::C2b | EventKind::B2c) {
        return Resolution::Finalize(STATUS_IGNORED);
    }

    let provider_kind = match ProviderKind::from_str(&item.provider) {
        Ok(k) => k,
        Err(_) => return Resolution::Finalize(STATUS_IGNORED),
    };
    let adapter = match registry.get(provider_kind) {
        Ok(a) => a,
        Err(_) => return Resolution::Finalize(STATUS_IGNORED),
    };

    let body = match serde_json::to_vec(&item.payload_json) {
        Ok(b) => b,
        Err(_) => return Resolution::Finalize(STATUS_INVALID),
    };
    // A decode failure is deterministic; retrying would loop forever.
    let parsed = match adapter.parse_callback(&body, &Default::default()) {
        Ok(event) => event,
        Err(_) => return Resolution::Finalize(STATUS_INVALID),
    };

    let target_status = match kind {
        // C2B confirmations only arrive for settled payments.
        EventKind::C2b => "completed".to_string(),
        // STK and B2C carry a ResultCode; the parser folded it into status.
        _ => parsed.status.clone(),
    };

    Resolution::Reconcile {
        payment: PaymentUpsert {
            tenant_id: item.tenant_id,
            credential_id: item.provider_credential_id,
            invoice_no: parsed.invoice_ref,
            msisdn: parsed.msisdn,
            amount: parsed.amount,
            currency: DEFAULT_CURRENCY.to_string(),
            status: target_status.clone(),
            method: provider_kind.method_tag().to_string(),
            external_id: item.external_id.clone(),
        },
        final_status: target_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretBox;
    use crate::providers::mpesa::{MpesaConfig, MpesaProvider};
    use serde_json::json;

    fn registry() -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        let provider = MpesaProvider::new(
            MpesaConfig::default(),
            SecretBox::new(&[1u8; 32]).expect("key"),
        )
        .expect("provider");
        registry.register(Arc::new(provider));
        Arc::new(registry)
    }

    fn due_event(event_type: &str, payload: serde_json::Value) -> DueEvent {
        DueEvent {
            queue_id: 5,
            event_id: 7,
            tenant_id: 1,
            provider_credential_id: 10,
            provider: "mpesa_daraja".to_string(),
            event_type: event_type.to_string(),
            external_id: "ws_CO_X1".to_string(),
            payload_json: payload,
        }
    }

    #[test]
    fn successful_stk_reconciles_to_completed() {
        let payload = json!({
            "Body": {"stkCallback": {
                "CheckoutRequestID": "ws_CO_X1",
                "ResultCode": 0,
                "ResultDesc": "ok",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 100},
                    {"Name": "PhoneNumber", "Value": "254712345678"},
                    {"Name": "AccountReference", "Value": "INV-7"}
                ]}
            }}
        });
        match evaluate(&registry(), &due_event("stk", payload)) {
            Resolution::Reconcile {
                payment,
                final_status,
            } => {
                assert_eq!(final_status, "completed");
                assert_eq!(payment.amount, 100);
                assert_eq!(payment.invoice_no, "INV-7");
                assert_eq!(payment.method, "mpesa");
                assert_eq!(payment.external_id, "ws_CO_X1");
                assert_eq!(payment.currency, "KES");
            }
            other => panic!("expected reconcile, got {:?}", other),
        }
    }

    #[test]
    fn cancelled_stk_reconciles_to_failed() {
        let payload = json!({
            "Body": {"stkCallback": {
                "CheckoutRequestID": "ws_CO_X1",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }}
        });
        match evaluate(&registry(), &due_event("stk", payload)) {
            Resolution::Reconcile { final_status, .. } => assert_eq!(final_status, "failed"),
            other => panic!("expected reconcile, got {:?}", other),
        }
    }

    #[test]
    fn c2b_confirmation_is_always_completed() {
        let payload = json!({
            "TransID": "ABC1",
            "TransAmount": "50.00",
            "BillRefNumber": "INV-9",
            "MSISDN": "254712345678"
        });
        match evaluate(&registry(), &due_event("c2b", payload)) {
            Resolution::Reconcile {
                payment,
                final_status,
            } => {
                assert_eq!(final_status, "completed");
                assert_eq!(payment.amount, 50);
            }
            other => panic!("expected reconcile, got {:?}", other),
        }
    }

    #[test]
    fn undecodable_payload_is_finalized_invalid() {
        let payload = json!({"unexpected": "shape"});
        match evaluate(&registry(), &due_event("stk", payload)) {
            Resolution::Finalize(status) => assert_eq!(status, STATUS_INVALID),
            other => panic!("expected finalize, got {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_finalized_ignored() {
        let payload = json!({});
        match evaluate(&registry(), &due_event("bulk_transfer", payload)) {
            Resolution::Finalize(status) => assert_eq!(status, STATUS_IGNORED),
            other => panic!("expected finalize, got {:?}", other),
        }
    }

    #[test]
    fn balance_events_do_not_touch_payments() {
        let payload = json!({"Result": {"ConversationID": "AG_1", "ResultCode": 0}});
        match evaluate(&registry(), &due_event("balance", payload)) {
            Resolution::Finalize(status) => assert_eq!(status, STATUS_IGNORED),
            other => panic!("expected finalize, got {:?}", other),
        }
    }
}
