//! Background clock of the coordinator: advances auction statuses, then runs
//! the settlement sweep, once per interval.
// region:    --- Imports
use crate::auction::AuctionRegistry;
use crate::clock::Clock;
use crate::settlement::SettlementEnforcer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

// endregion: --- Imports

// region:    --- Auction Scheduler
pub struct AuctionScheduler {
    registry: Arc<AuctionRegistry>,
    settlement: Arc<SettlementEnforcer>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl AuctionScheduler {
    pub fn new(
        registry: Arc<AuctionRegistry>,
        settlement: Arc<SettlementEnforcer>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            settlement,
            clock,
            period,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// One round; errors are logged and the next round retries.
    pub async fn tick(&self) {
        let now = self.clock.now();
        match self.registry.advance_statuses(now).await {
            Ok(advanced) if !advanced.is_empty() => {
                debug!(
                    "{:<12} --> {} auctions advanced",
                    "Scheduler",
                    advanced.len()
                );
            }
            Ok(_) => {}
            Err(e) => error!("{:<12} --> status update failed: {}", "Scheduler", e),
        }

        if let Err(e) = self.settlement.sweep().await {
            error!("{:<12} --> settlement sweep failed: {}", "Scheduler", e);
        }
    }
}
// endregion: --- Auction Scheduler
