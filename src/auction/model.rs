// region:    --- Imports
use crate::bidding::model::Bid;
use crate::config::DEFAULT_STEP_PRICE;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
// endregion: --- Imports

// region:    --- Status

/// Lifecycle phase. Ordering follows the lifecycle, so transitions only go up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Ended,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Ended => "ended",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(AuctionStatus::Scheduled),
            "active" => Some(AuctionStatus::Active),
            "ended" => Some(AuctionStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "approved" => Some(PaymentStatus::Approved),
            _ => None,
        }
    }
}

// endregion: --- Status

// region:    --- Schedule

/// Validated timestamps of an auction: start < end < payment deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub payment_deadline: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        payment_deadline: Option<DateTime<Utc>>,
    ) -> CoreResult<Self> {
        let start_time = start_time.ok_or_else(|| missing("startTime"))?;
        let end_time = end_time.ok_or_else(|| missing("endTime"))?;
        let payment_deadline = payment_deadline.ok_or_else(|| missing("paymentDeadline"))?;

        if end_time <= start_time {
            return Err(CoreError::Validation(
                "endTime must be after startTime".to_string(),
            ));
        }
        if payment_deadline <= end_time {
            return Err(CoreError::Validation(
                "paymentDeadline must be after endTime".to_string(),
            ));
        }

        Ok(Self {
            start_time,
            end_time,
            payment_deadline,
        })
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> AuctionStatus {
        if now < self.start_time {
            AuctionStatus::Scheduled
        } else if now < self.end_time {
            AuctionStatus::Active
        } else {
            AuctionStatus::Ended
        }
    }
}

fn missing(field: &str) -> CoreError {
    CoreError::Validation(format!("{} is required", field))
}

// endregion: --- Schedule

// region:    --- Auction

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub product: String,
    pub category: String,
    pub description: String,
    pub image_urls: Vec<String>,
    pub starting_price: i64,
    pub step_price: i64,
    /// 0 means unlimited.
    pub max_participants: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub payment_deadline: DateTime<Utc>,
    /// Last persisted projection of `status_at`.
    pub status: AuctionStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub end_announced: bool,
    pub penalty_applied_at: Option<DateTime<Utc>>,
    pub penalized_user_id: Option<String>,
    pub penalized_until: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Auction {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            start_time: self.start_time,
            end_time: self.end_time,
            payment_deadline: self.payment_deadline,
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> AuctionStatus {
        self.schedule().status_at(now)
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn has_capacity_limit(&self) -> bool {
        self.max_participants > 0
    }
}

/// Validated auction fields ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionDraft {
    pub owner_id: String,
    pub name: String,
    pub product: String,
    pub category: String,
    pub description: String,
    pub image_urls: Vec<String>,
    pub starting_price: i64,
    pub step_price: i64,
    pub max_participants: i32,
    pub schedule: Schedule,
}

/// Auction as shown to clients, with its bid-derived figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionView {
    #[serde(flatten)]
    pub auction: Auction,
    pub highest_bid: Option<Bid>,
    pub current_highest: i64,
    /// Guidance only; any amount above `current_highest` is accepted.
    pub minimum_next_bid: i64,
}

// endregion: --- Auction

// region:    --- Requests

/// Auction creation input as received on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateAuctionRequest {
    pub name: String,
    pub max_participants: Option<i32>,
    pub product: String,
    pub category: String,
    pub description: String,
    pub image_urls: Vec<String>,
    pub starting_price: Option<i64>,
    pub step_price: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub payment_deadline: Option<DateTime<Utc>>,
}

impl CreateAuctionRequest {
    pub fn into_draft(self, owner_id: &str) -> CoreResult<AuctionDraft> {
        let schedule = Schedule::new(self.start_time, self.end_time, self.payment_deadline)?;
        let draft = AuctionDraft {
            owner_id: owner_id.to_string(),
            name: self.name.trim().to_string(),
            product: self.product.trim().to_string(),
            category: self.category.trim().to_string(),
            description: self.description,
            image_urls: self.image_urls,
            starting_price: self.starting_price.ok_or_else(|| missing("startingPrice"))?,
            step_price: self.step_price.unwrap_or(DEFAULT_STEP_PRICE),
            max_participants: self.max_participants.unwrap_or(0),
            schedule,
        };
        validate_draft(&draft)?;
        Ok(draft)
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuctionPatch {
    pub name: Option<String>,
    pub max_participants: Option<i32>,
    pub product: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub starting_price: Option<i64>,
    pub step_price: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub payment_deadline: Option<DateTime<Utc>>,
}

impl AuctionPatch {
    /// Merges the patch over `current` and revalidates the result.
    pub fn apply(&self, current: &Auction) -> CoreResult<AuctionDraft> {
        let schedule = Schedule::new(
            Some(self.start_time.unwrap_or(current.start_time)),
            Some(self.end_time.unwrap_or(current.end_time)),
            Some(self.payment_deadline.unwrap_or(current.payment_deadline)),
        )?;
        let draft = AuctionDraft {
            owner_id: current.owner_id.clone(),
            name: pick(&self.name, &current.name).trim().to_string(),
            product: pick(&self.product, &current.product).trim().to_string(),
            category: pick(&self.category, &current.category).trim().to_string(),
            description: pick(&self.description, &current.description).clone(),
            image_urls: self
                .image_urls
                .clone()
                .unwrap_or_else(|| current.image_urls.clone()),
            starting_price: self.starting_price.unwrap_or(current.starting_price),
            step_price: self.step_price.unwrap_or(current.step_price),
            max_participants: self.max_participants.unwrap_or(current.max_participants),
            schedule,
        };
        validate_draft(&draft)?;
        Ok(draft)
    }
}

fn pick<'a>(patch: &'a Option<String>, current: &'a String) -> &'a String {
    patch.as_ref().unwrap_or(current)
}

fn validate_draft(draft: &AuctionDraft) -> CoreResult<()> {
    for (field, value) in [
        ("name", &draft.name),
        ("product", &draft.product),
        ("category", &draft.category),
    ] {
        if value.is_empty() {
            return Err(missing(field));
        }
    }
    if draft.starting_price <= 0 {
        return Err(CoreError::Validation(
            "startingPrice must be positive".to_string(),
        ));
    }
    if draft.step_price <= 0 {
        return Err(CoreError::Validation("stepPrice must be positive".to_string()));
    }
    if draft.max_participants < 0 {
        return Err(CoreError::Validation(
            "maxParticipants must not be negative".to_string(),
        ));
    }
    if draft.image_urls.iter().any(|url| url.trim().is_empty()) {
        return Err(CoreError::Validation("imageUrls must not contain blanks".to_string()));
    }
    Ok(())
}

// endregion: --- Requests
