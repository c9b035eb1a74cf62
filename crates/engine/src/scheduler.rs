//! Delivery scheduler: spreads a campaign send over time.
//!
//! Recipients are walked in order with a running delay counter that starts at
//! the caller's base delay. Every 80th recipient (index 0 included) bumps the
//! counter by one minute before its send time is computed, so the first batch
//! goes out at `base + 1` minutes, the second at `base + 2`, and so on.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use mailcast_common::types::ScheduledTask;

/// Number of recipients released per minute.
pub const SEND_BATCH_SIZE: usize = 80;

/// Computes per-recipient send times for a live campaign send.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryScheduler {
    batch_size: usize,
}

impl DeliveryScheduler {
    pub fn new() -> Self {
        Self {
            batch_size: SEND_BATCH_SIZE,
        }
    }

    /// Build one task per recipient, in input order.
    ///
    /// Duplicated recipients produce duplicated tasks.
    pub fn schedule(
        &self,
        campaign_id: Uuid,
        recipients: &[Uuid],
        base_delay_minutes: u32,
        now: DateTime<Utc>,
    ) -> Vec<ScheduledTask> {
        let mut delay = i64::from(base_delay_minutes);

        recipients
            .iter()
            .enumerate()
            .map(|(index, contact_id)| {
                if index % self.batch_size == 0 {
                    delay += 1;
                }

                ScheduledTask {
                    campaign_id,
                    contact_id: *contact_id,
                    run_by: now + Duration::minutes(delay),
                }
            })
            .collect()
    }
}

impl Default for DeliveryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn delay_of(task: &ScheduledTask, now: DateTime<Utc>) -> i64 {
        (task.run_by - now).num_minutes()
    }

    #[test]
    fn test_one_task_per_recipient_in_order() {
        let now = Utc::now();
        let ids = recipients(250);
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &ids, 0, now);

        assert_eq!(tasks.len(), ids.len());
        for (task, id) in tasks.iter().zip(&ids) {
            assert_eq!(task.contact_id, *id);
        }
    }

    #[test]
    fn test_batches_step_one_minute_per_80() {
        let now = Utc::now();
        let ids = recipients(161);
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &ids, 0, now);

        assert!(tasks[..80].iter().all(|t| delay_of(t, now) == 1));
        assert!(tasks[80..160].iter().all(|t| delay_of(t, now) == 2));
        assert_eq!(delay_of(&tasks[160], now), 3);
    }

    #[test]
    fn test_81_recipients_spill_into_second_minute() {
        let now = Utc::now();
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &recipients(81), 0, now);

        assert_eq!(tasks[79].run_by, now + Duration::minutes(1));
        assert_eq!(tasks[80].run_by, now + Duration::minutes(2));
    }

    #[test]
    fn test_base_delay_offsets_every_batch() {
        let now = Utc::now();
        let base = 15;
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &recipients(400), base, now);

        for (i, task) in tasks.iter().enumerate() {
            let expected = i64::from(base) + (i / SEND_BATCH_SIZE) as i64 + 1;
            assert_eq!(delay_of(task, now), expected, "index {}", i);
        }
    }

    #[test]
    fn test_run_by_is_non_decreasing() {
        let now = Utc::now();
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &recipients(500), 3, now);
        assert!(tasks.windows(2).all(|w| w[0].run_by <= w[1].run_by));
    }

    #[test]
    fn test_empty_recipients_yield_no_tasks() {
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &[], 0, Utc::now());
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_duplicate_recipients_are_scheduled_twice() {
        // Repeated contacts are not collapsed here; each entry gets its own task.
        let now = Utc::now();
        let id = Uuid::new_v4();
        let tasks = DeliveryScheduler::new().schedule(Uuid::new_v4(), &[id, id], 0, now);

        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.contact_id == id));
    }
}
