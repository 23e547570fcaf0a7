// region:    --- Imports
use crate::app::AppState;
use crate::auction::model::{Auction, AuctionPatch, AuctionView, CreateAuctionRequest};
use crate::bidding::model::{Bid, PlaceBidCommand};
use crate::error::{CoreError, CoreResult};
use crate::live_sync::ChangeFilter;
use crate::notification::model::Notification;
use crate::roster::model::{Admission, Participant};
use crate::user::Identity;
use axum::async_trait;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

// endregion: --- Imports

// region:    --- Caller Identity

const USER_ID_HEADER: &str = "x-user-id";
const USER_NAME_HEADER: &str = "x-user-name";
const EMAIL_VERIFIED_HEADER: &str = "x-email-verified";

/// Identity forwarded by the authentication layer in request headers.
pub struct Caller(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let user_id = header(USER_ID_HEADER).ok_or(CoreError::Unauthenticated)?;
        let display_name = header(USER_NAME_HEADER).unwrap_or_else(|| user_id.clone());
        let email_verified = header(EMAIL_VERIFIED_HEADER)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Caller(Identity {
            user_id,
            display_name,
            email_verified,
        }))
    }
}

// endregion: --- Caller Identity

// region:    --- Router

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/auctions",
            post(handle_create_auction).get(handle_list_auctions),
        )
        .route(
            "/auctions/:id",
            get(handle_get_auction)
                .patch(handle_update_auction)
                .delete(handle_delete_auction),
        )
        .route(
            "/auctions/:id/approve-payment",
            post(handle_approve_payment),
        )
        .route("/auctions/:id/join", post(handle_join))
        .route("/auctions/:id/participants", get(handle_get_participants))
        .route(
            "/auctions/:id/bids",
            post(handle_place_bid).get(handle_get_bids),
        )
        .route("/auctions/:id/highest-bid", get(handle_get_highest_bid))
        .route("/users/me/auctions", get(handle_get_my_auctions))
        .route(
            "/users/me/participations",
            get(handle_get_my_participations),
        )
        .route("/notifications", get(handle_get_notifications))
        .route("/notifications/read-all", post(handle_mark_all_read))
        .route("/notifications/:id/read", post(handle_mark_read))
        .route("/changes", get(handle_changes))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 2))
        .with_state(state)
}

// endregion: --- Router

// region:    --- Command Handlers

pub async fn handle_create_auction(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(request): Json<CreateAuctionRequest>,
) -> CoreResult<(StatusCode, Json<Auction>)> {
    info!("{:<12} --> create auction by {}", "Command", caller.user_id);
    let auction = state.registry.create(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(auction)))
}

pub async fn handle_update_auction(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(auction_id): Path<i64>,
    Json(patch): Json<AuctionPatch>,
) -> CoreResult<Json<Auction>> {
    info!("{:<12} --> update auction {}", "Command", auction_id);
    let auction = state
        .registry
        .update(auction_id, &caller.user_id, patch)
        .await?;
    Ok(Json(auction))
}

pub async fn handle_delete_auction(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(auction_id): Path<i64>,
) -> CoreResult<StatusCode> {
    info!("{:<12} --> delete auction {}", "Command", auction_id);
    state.registry.delete(auction_id, &caller.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn handle_approve_payment(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(auction_id): Path<i64>,
) -> CoreResult<Json<Auction>> {
    info!("{:<12} --> approve payment {}", "Command", auction_id);
    let auction = state
        .registry
        .approve_payment(auction_id, &caller.user_id)
        .await?;
    Ok(Json(auction))
}

pub async fn handle_join(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(auction_id): Path<i64>,
) -> CoreResult<(StatusCode, Json<Admission>)> {
    info!(
        "{:<12} --> {} joins auction {}",
        "Command", caller.user_id, auction_id
    );
    let admission = state.roster.join(auction_id, &caller).await?;
    let status = if admission.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(admission)))
}

pub async fn handle_place_bid(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(auction_id): Path<i64>,
    Json(cmd): Json<PlaceBidCommand>,
) -> CoreResult<(StatusCode, Json<Bid>)> {
    info!(
        "{:<12} --> bid {} on auction {} by {}",
        "Command", cmd.amount, auction_id, caller.user_id
    );
    let bid = state
        .ledger
        .place_bid(auction_id, &caller, cmd.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(bid)))
}

pub async fn handle_mark_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(notification_id): Path<String>,
) -> CoreResult<Json<Notification>> {
    let notification = state
        .dispatcher
        .mark_read(&caller.user_id, &notification_id)
        .await?;
    Ok(Json(notification))
}

pub async fn handle_mark_all_read(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<Value>> {
    let updated = state.dispatcher.mark_all_read(&caller.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

pub async fn handle_list_auctions(State(state): State<AppState>) -> CoreResult<Json<Vec<Auction>>> {
    Ok(Json(state.registry.list_all().await?))
}

pub async fn handle_get_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> CoreResult<Json<AuctionView>> {
    info!("{:<12} --> auction id: {}", "HandlerQuery", auction_id);
    let auction = state.registry.get(auction_id).await?;
    Ok(Json(state.ledger.view(auction).await?))
}

pub async fn handle_get_participants(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> CoreResult<Json<Vec<Participant>>> {
    Ok(Json(state.roster.participants(auction_id).await?))
}

pub async fn handle_get_bids(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> CoreResult<Json<Vec<Bid>>> {
    info!("{:<12} --> bid history id: {}", "HandlerQuery", auction_id);
    Ok(Json(state.ledger.list_bids(auction_id).await?))
}

pub async fn handle_get_highest_bid(
    State(state): State<AppState>,
    Path(auction_id): Path<i64>,
) -> CoreResult<Json<Value>> {
    info!("{:<12} --> highest bid id: {}", "HandlerQuery", auction_id);
    let highest_bid = state.ledger.highest_bid(auction_id).await?;
    let current_highest = state.ledger.current_highest(auction_id).await?;
    Ok(Json(json!({
        "auctionId": auction_id,
        "highestBid": highest_bid,
        "currentHighest": current_highest,
    })))
}

pub async fn handle_get_my_auctions(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<Vec<Auction>>> {
    Ok(Json(state.registry.list_owned_by(&caller.user_id).await?))
}

pub async fn handle_get_my_participations(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<Vec<Auction>>> {
    Ok(Json(state.registry.list_joined_by(&caller.user_id).await?))
}

pub async fn handle_get_notifications(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> CoreResult<Json<Value>> {
    let notifications = state.dispatcher.list(&caller.user_id).await?;
    let unread = notifications.iter().filter(|n| !n.read).count();
    Ok(Json(json!({
        "unreadCount": unread,
        "notifications": notifications,
    })))
}

/// LiveSync as server-sent events; the query string narrows the feed.
pub async fn handle_changes(
    State(state): State<AppState>,
    Query(filter): Query<ChangeFilter>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!("{:<12} --> change feed opened {:?}", "HandlerQuery", filter);
    let stream = state.live_sync.subscribe(filter).map(|change| {
        Event::default()
            .event(format!("{:?}", change.kind).to_lowercase())
            .json_data(&change)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// endregion: --- Query Handlers
