// region:    --- Imports
use crate::auction::AuctionRegistry;
use crate::bidding::BidLedger;
use crate::clock::Clock;
use crate::live_sync::LiveSync;
use crate::notification::NotificationDispatcher;
use crate::roster::ParticipantRoster;
use crate::settlement::SettlementEnforcer;
use crate::store::Store;
use std::sync::Arc;
// endregion: --- Imports

/// Coordinator components wired over one store, clock and change feed.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub live_sync: Arc<dyn LiveSync>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub registry: Arc<AuctionRegistry>,
    pub ledger: Arc<BidLedger>,
    pub roster: Arc<ParticipantRoster>,
    pub settlement: Arc<SettlementEnforcer>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, live_sync: Arc<dyn LiveSync>) -> Self {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&live_sync),
        ));
        let registry = Arc::new(AuctionRegistry::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&dispatcher),
            Arc::clone(&live_sync),
        ));
        let ledger = Arc::new(BidLedger::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&live_sync),
        ));
        let roster = Arc::new(ParticipantRoster::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&live_sync),
        ));
        let settlement = Arc::new(SettlementEnforcer::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&dispatcher),
        ));

        Self {
            store,
            clock,
            live_sync,
            dispatcher,
            registry,
            ledger,
            roster,
            settlement,
        }
    }
}
