//! Operator event replay: push already-processed events back through the
//! queue. Idempotent upserts downstream make replays safe.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::database::error::DatabaseError;
use crate::database::event_repository::EventRepository;
use crate::database::queue_repository::QueueRepository;

const DEFAULT_MAX: i64 = 200;
const HARD_MAX: i64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct ReplayRequest {
    pub event_ids: Vec<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub max: i64,
}

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub requeued: usize,
}

pub struct ReplayService {
    events: EventRepository,
    queue: QueueRepository,
}

impl ReplayService {
    pub fn new(events: EventRepository, queue: QueueRepository) -> Self {
        Self { events, queue }
    }

    pub async fn replay(
        &self,
        tenant_id: i64,
        req: ReplayRequest,
    ) -> Result<ReplayOutcome, DatabaseError> {
        let ids = if !req.event_ids.is_empty() {
            req.event_ids
        } else {
            self.events
                .find_ids_in_window(tenant_id, req.since, req.until, clamp_max(req.max))
                .await?
        };

        let mut requeued = 0;
        for id in ids {
            match self.events.mark_for_reprocessing(tenant_id, id).await {
                Ok(()) => {
                    // Unlike the ingestion-path enqueue, this also resets a
                    // queue row that is failed mid-backoff, so the replay is
                    // picked up on the next worker cycle.
                    self.queue.requeue(tenant_id, id).await?;
                    requeued += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!(tenant_id, event_id = id, "skipping replay of unknown or pending event");
                }
                Err(e) => return Err(e),
            }
        }

        info!(tenant_id, requeued, "event replay requested");
        Ok(ReplayOutcome { requeued })
    }
}

fn clamp_max(max: i64) -> i64 {
    if max <= 0 || max > HARD_MAX {
        DEFAULT_MAX
    } else {
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_is_defaulted_and_capped() {
        assert_eq!(clamp_max(0), 200);
        assert_eq!(clamp_max(-5), 200);
        assert_eq!(clamp_max(100), 100);
        assert_eq!(clamp_max(1000), 1000);
        assert_eq!(clamp_max(5000), 200);
    }
}
