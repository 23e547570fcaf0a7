macro_rules! auction_columns {
    () => {
        "id, owner_id, name, product, category, description, image_urls, starting_price, \
         step_price, max_participants, start_time, end_time, payment_deadline, status, \
         payment_status, created_at, end_announced, penalty_applied_at, penalized_user_id, \
         penalized_until, settled_at"
    };
}

macro_rules! bid_columns {
    () => {
        "id, auction_id, bidder_id, bidder_display_name, amount, placed_at"
    };
}

macro_rules! notification_columns {
    () => {
        "id, recipient_id, message, auction_id, type, participant_id, from_user_id, read, created_at"
    };
}

// region:    --- Users

/// Registers the caller or refreshes their display name.
pub const UPSERT_USER: &str = r#"
    INSERT INTO users (id, display_name)
    VALUES ($1, $2)
    ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name
    RETURNING id, display_name, banned_until
"#;

pub const GET_USER: &str = "SELECT id, display_name, banned_until FROM users WHERE id = $1";

pub const ENSURE_USER: &str =
    "INSERT INTO users (id, display_name) VALUES ($1, '') ON CONFLICT (id) DO NOTHING";

pub const LOCK_USER_BAN: &str = "SELECT banned_until FROM users WHERE id = $1 FOR UPDATE";

/// Never moves an existing ban earlier.
pub const EXTEND_USER_BAN: &str = r#"
    UPDATE users
    SET banned_until = GREATEST(COALESCE(banned_until, $2), $2)
    WHERE id = $1
    RETURNING banned_until
"#;

// endregion: --- Users

// region:    --- Auctions

pub const INSERT_AUCTION: &str = concat!(
    "INSERT INTO auctions (owner_id, name, product, category, description, image_urls, \
     starting_price, step_price, max_participants, start_time, end_time, payment_deadline, \
     status, payment_status, created_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'pending', $14) \
     RETURNING ",
    auction_columns!()
);

pub const GET_AUCTION: &str = concat!("SELECT ", auction_columns!(), " FROM auctions WHERE id = $1");

/// Only while scheduled and before the current start time.
pub const UPDATE_SCHEDULED_AUCTION: &str = concat!(
    "UPDATE auctions SET name = $2, product = $3, category = $4, description = $5, \
     image_urls = $6, starting_price = $7, step_price = $8, max_participants = $9, \
     start_time = $10, end_time = $11, payment_deadline = $12 \
     WHERE id = $1 AND status = 'scheduled' AND start_time > $13 \
     RETURNING ",
    auction_columns!()
);

pub const DELETE_AUCTION: &str = "DELETE FROM auctions WHERE id = $1";

pub const TRANSITION_STATUS: &str = "UPDATE auctions SET status = $3 WHERE id = $1 AND status = $2";

pub const APPROVE_PAYMENT: &str = concat!(
    "UPDATE auctions SET payment_status = 'approved' \
     WHERE id = $1 AND payment_deadline >= $2 \
     RETURNING ",
    auction_columns!()
);

pub const LIST_AUCTIONS: &str = concat!(
    "SELECT ",
    auction_columns!(),
    " FROM auctions ORDER BY created_at DESC, id DESC"
);

pub const LIST_AUCTIONS_BY_OWNER: &str = concat!(
    "SELECT ",
    auction_columns!(),
    " FROM auctions WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"
);

pub const LIST_AUCTIONS_BY_PARTICIPANT: &str = concat!(
    "SELECT ",
    auction_columns!(),
    " FROM auctions WHERE id IN (SELECT auction_id FROM participants WHERE user_id = $1) \
     ORDER BY created_at DESC, id DESC"
);

pub const AUCTIONS_NEEDING_TRANSITION: &str = concat!(
    "SELECT ",
    auction_columns!(),
    " FROM auctions \
     WHERE (status = 'scheduled' AND start_time <= $1) \
        OR (status = 'active' AND end_time <= $1)"
);

pub const AUCTIONS_AWAITING_ANNOUNCEMENT: &str = concat!(
    "SELECT ",
    auction_columns!(),
    " FROM auctions WHERE status = 'ended' AND end_announced = FALSE"
);

pub const MARK_END_ANNOUNCED: &str =
    "UPDATE auctions SET end_announced = TRUE WHERE id = $1 AND end_announced = FALSE";

pub const AUCTIONS_AWAITING_SETTLEMENT: &str = concat!(
    "SELECT ",
    auction_columns!(),
    " FROM auctions \
     WHERE status = 'ended' AND payment_status <> 'approved' \
       AND payment_deadline < $1 AND settled_at IS NULL"
);

pub const LOCK_PENALTY_MARKER: &str = r#"
    SELECT penalty_applied_at, penalized_user_id, penalized_until
    FROM auctions
    WHERE id = $1
    FOR UPDATE
"#;

pub const SET_PENALTY_MARKER: &str = r#"
    UPDATE auctions
    SET penalty_applied_at = $2, penalized_user_id = $3, penalized_until = $4
    WHERE id = $1
"#;

pub const MARK_SETTLED: &str =
    "UPDATE auctions SET settled_at = $2 WHERE id = $1 AND settled_at IS NULL";

// endregion: --- Auctions

// region:    --- Bids

/// Serializes bidders on the auction row.
pub const LOCK_AUCTION_FOR_BID: &str =
    "SELECT starting_price, start_time, end_time FROM auctions WHERE id = $1 FOR UPDATE";

pub const MAX_BID_AMOUNT: &str = "SELECT MAX(amount) FROM bids WHERE auction_id = $1";

pub const INSERT_BID: &str = concat!(
    "INSERT INTO bids (auction_id, bidder_id, bidder_display_name, amount, placed_at) \
     VALUES ($1, $2, $3, $4, $5) RETURNING ",
    bid_columns!()
);

pub const GET_HIGHEST_BID: &str = concat!(
    "SELECT ",
    bid_columns!(),
    " FROM bids WHERE auction_id = $1 ORDER BY amount DESC, placed_at ASC, id ASC LIMIT 1"
);

pub const GET_BID_HISTORY: &str = concat!(
    "SELECT ",
    bid_columns!(),
    " FROM bids WHERE auction_id = $1 ORDER BY amount DESC, placed_at ASC, id ASC"
);

// endregion: --- Bids

// region:    --- Participants

/// Serializes joiners on the auction row.
pub const LOCK_AUCTION_FOR_JOIN: &str =
    "SELECT max_participants, end_time FROM auctions WHERE id = $1 FOR UPDATE";

pub const GET_PARTICIPANT: &str = r#"
    SELECT auction_id, user_id, joined_at
    FROM participants
    WHERE auction_id = $1 AND user_id = $2
"#;

pub const COUNT_PARTICIPANTS: &str = "SELECT COUNT(*) FROM participants WHERE auction_id = $1";

pub const INSERT_PARTICIPANT: &str = r#"
    INSERT INTO participants (auction_id, user_id, joined_at)
    VALUES ($1, $2, $3)
    RETURNING auction_id, user_id, joined_at
"#;

pub const LIST_PARTICIPANTS: &str = r#"
    SELECT auction_id, user_id, joined_at
    FROM participants
    WHERE auction_id = $1
    ORDER BY joined_at ASC
"#;

// endregion: --- Participants

// region:    --- Notifications

pub const INSERT_NOTIFICATION: &str = concat!(
    "INSERT INTO notifications (",
    notification_columns!(),
    ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (id) DO NOTHING"
);

pub const GET_NOTIFICATION: &str = concat!(
    "SELECT ",
    notification_columns!(),
    " FROM notifications WHERE id = $1"
);

pub const LIST_NOTIFICATIONS: &str = concat!(
    "SELECT ",
    notification_columns!(),
    " FROM notifications WHERE recipient_id = $1 ORDER BY created_at DESC, id ASC"
);

pub const MARK_NOTIFICATION_READ: &str =
    "UPDATE notifications SET read = TRUE WHERE id = $1 AND read = FALSE";

pub const NOTIFICATION_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM notifications WHERE id = $1)";

pub const MARK_ALL_NOTIFICATIONS_READ: &str =
    "UPDATE notifications SET read = TRUE WHERE recipient_id = $1 AND read = FALSE";

// endregion: --- Notifications
