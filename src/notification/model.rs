// region:    --- Imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
// endregion: --- Imports

// region:    --- Notification Type

/// One variant per event and direction of fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    /// To the user who joined.
    JoinBidder,
    /// To the owner when someone joins.
    Join,
    /// To the owner when a bid lands.
    NewBid,
    /// To the other participants when a bid lands.
    NewBidParticipant,
    /// To the owner when bidding closes.
    AuctionEnded,
    AuctionEndedWin,
    AuctionEndedLose,
    Ban,
    PaymentFailed,
    CreateAuction,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::JoinBidder => "join-bidder",
            NotificationType::Join => "join",
            NotificationType::NewBid => "new-bid",
            NotificationType::NewBidParticipant => "new-bid-participant",
            NotificationType::AuctionEnded => "auction-ended",
            NotificationType::AuctionEndedWin => "auction-ended-win",
            NotificationType::AuctionEndedLose => "auction-ended-lose",
            NotificationType::Ban => "ban",
            NotificationType::PaymentFailed => "payment-failed",
            NotificationType::CreateAuction => "create-auction",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw {
            "join-bidder" => NotificationType::JoinBidder,
            "join" => NotificationType::Join,
            "new-bid" => NotificationType::NewBid,
            "new-bid-participant" => NotificationType::NewBidParticipant,
            "auction-ended" => NotificationType::AuctionEnded,
            "auction-ended-win" => NotificationType::AuctionEndedWin,
            "auction-ended-lose" => NotificationType::AuctionEndedLose,
            "ban" => NotificationType::Ban,
            "payment-failed" => NotificationType::PaymentFailed,
            "create-auction" => NotificationType::CreateAuction,
            _ => return None,
        };
        Some(kind)
    }
}

// endregion: --- Notification Type

// region:    --- Notification

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub message: String,
    pub auction_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub participant_id: Option<String>,
    pub from_user_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Idempotency key: the same logical event always maps to the same id.
pub fn notification_id(
    recipient_id: &str,
    auction_id: i64,
    kind: NotificationType,
    participant_id: Option<&str>,
) -> String {
    let auction_id = auction_id.to_string();
    [
        recipient_id,
        auction_id.as_str(),
        kind.as_str(),
        participant_id.unwrap_or("none"),
    ]
    .join("_")
}

/// Everything needed to emit one notification.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub recipient_id: String,
    pub auction_id: i64,
    pub kind: NotificationType,
    pub message: String,
    pub participant_id: Option<String>,
    pub from_user_id: Option<String>,
}

impl NotificationRequest {
    pub fn new(
        recipient_id: impl Into<String>,
        auction_id: i64,
        kind: NotificationType,
        message: String,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            auction_id,
            kind,
            message,
            participant_id: None,
            from_user_id: None,
        }
    }

    pub fn participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn from_user(mut self, from_user_id: impl Into<String>) -> Self {
        self.from_user_id = Some(from_user_id.into());
        self
    }

    pub fn id(&self) -> String {
        notification_id(
            &self.recipient_id,
            self.auction_id,
            self.kind,
            self.participant_id.as_deref(),
        )
    }
}

// endregion: --- Notification

// region:    --- Templates

/// Formats an amount the way bidders read prices: `105.000 VND`.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        grouped.insert(0, '-');
    }
    format!("{} VND", grouped)
}

pub mod templates {
    use super::format_amount;

    pub fn join_bidder(auction: &str) -> String {
        format!("You have successfully joined the auction \"{}\".", auction)
    }

    pub fn join(auction: &str) -> String {
        format!("A user joined your auction \"{}\".", auction)
    }

    pub fn new_bid(auction: &str, amount: i64, bidder: &str) -> String {
        format!(
            "A new bid of {} was placed on your auction \"{}\" by {}.",
            format_amount(amount),
            auction,
            bidder
        )
    }

    pub fn new_bid_participant(auction: &str, amount: i64) -> String {
        format!(
            "A new bid of {} was placed on auction \"{}\".",
            format_amount(amount),
            auction
        )
    }

    pub fn auction_ended(auction: &str, winning: Option<(i64, &str)>) -> String {
        match winning {
            Some((amount, winner)) => format!(
                "Your auction \"{}\" has ended. Winning bid: {} by {}.",
                auction,
                format_amount(amount),
                winner
            ),
            None => format!("Your auction \"{}\" has ended with no bids.", auction),
        }
    }

    pub fn auction_ended_win(auction: &str, amount: i64) -> String {
        format!(
            "Congratulations! You won the auction \"{}\" with a bid of {}. Please complete payment before the deadline.",
            auction,
            format_amount(amount)
        )
    }

    pub fn auction_ended_lose(auction: &str) -> String {
        format!("The auction \"{}\" has ended. You did not win.", auction)
    }

    pub fn ban(auction: &str, days: i64) -> String {
        format!(
            "You have been banned for {} days for missing the payment deadline of auction \"{}\".",
            days, auction
        )
    }

    pub fn payment_failed(auction: &str) -> String {
        format!(
            "The winner of your auction \"{}\" did not complete payment before the deadline.",
            auction
        )
    }

    pub fn create_auction(auction: &str) -> String {
        format!("Your auction \"{}\" has been created.", auction)
    }
}

// endregion: --- Templates
