//! Repository layer for the auction store.
//!
//! All writes to an auction row happen inside a transaction that first
//! escalates to the database write lock (`get_auction_for_update`), which is
//! SQLite's equivalent of `SELECT ... FOR UPDATE`: concurrent bid commits on
//! the same auction serialize, and contention surfaces as a busy error the
//! arbiter retries.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use crate::domain::{
    Auction, AuctionId, AuctionStatus, AutoBid, AutoBidId, Bid, BidId, Money, ProductId, UserId,
};

pub type WriteTx = sqlx::Transaction<'static, Sqlite>;

const AUCTION_COLUMNS: &str = "id, product_id, seller_id, title, description, start_time_ms, \
     end_time_ms, status, start_price, reserve_price, buy_now_price, bid_count, current_bid_id, \
     winner_id, room_id, is_featured, auto_extend, extend_window_secs, extend_amount_secs, \
     created_at_ms, updated_at_ms";

const BID_COLUMNS: &str = "id, auction_id, bidder_id, amount, is_auto, is_winning, placed_at_ms";

const AUTO_BID_COLUMNS: &str = "id, auction_id, bidder_id, max_amount, increment, active, \
     last_fired_at_ms, last_amount, created_at_ms";

/// True for SQLite lock contention errors, which the bid path retries.
pub fn is_busy_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5") | Some("6") | Some("517"))
        }
        _ => false,
    }
}

/// True for unique-constraint violations (duplicate room id, auto-bid rule).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("1555") | Some("2067")),
        _ => false,
    }
}

pub struct AuctionStore {
    pool: SqlitePool,
}

impl AuctionStore {
    pub fn new(pool: SqlitePool) -> Self {
        AuctionStore { pool }
    }

    /// Open a transaction for a locked read-modify-write on an auction row.
    pub async fn begin_write(&self) -> Result<WriteTx, sqlx::Error> {
        self.pool.begin().await
    }

    // =========================================================================
    // Auction operations
    // =========================================================================

    /// Insert a new auction.
    ///
    /// # Errors
    /// Returns an error if the insert fails; `is_unique_violation` identifies
    /// a duplicate room id.
    pub async fn create_auction(&self, auction: &Auction) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO auctions
            (id, product_id, seller_id, title, description, start_time_ms, end_time_ms, status,
             start_price, reserve_price, buy_now_price, bid_count, current_bid_id, winner_id,
             room_id, is_featured, auto_extend, extend_window_secs, extend_amount_secs,
             created_at_ms, updated_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(auction.id.to_string())
        .bind(auction.product_id.to_string())
        .bind(auction.seller_id.to_string())
        .bind(&auction.title)
        .bind(&auction.description)
        .bind(auction.start_time.timestamp_millis())
        .bind(auction.end_time.timestamp_millis())
        .bind(auction.status.as_str())
        .bind(auction.start_price.to_canonical_string())
        .bind(auction.reserve_price.map(|m| m.to_canonical_string()))
        .bind(auction.buy_now_price.map(|m| m.to_canonical_string()))
        .bind(auction.bid_count)
        .bind(auction.current_bid_id.map(|id| id.to_string()))
        .bind(auction.winner_id.map(|id| id.to_string()))
        .bind(&auction.room_id)
        .bind(auction.is_featured)
        .bind(auction.auto_extend)
        .bind(auction.extend_window_secs)
        .bind(auction.extend_amount_secs)
        .bind(auction.created_at.timestamp_millis())
        .bind(auction.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_auction(&self, id: AuctionId) -> Result<Option<Auction>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM auctions WHERE id = ? AND deleted_at_ms IS NULL",
            AUCTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| auction_from_row(&r)).transpose()
    }

    /// Fetch an auction under the transaction's write lock.
    ///
    /// The leading no-op UPDATE takes the write lock before the read, so the
    /// returned row cannot change under the caller until commit or rollback.
    pub async fn get_auction_for_update(
        &self,
        tx: &mut WriteTx,
        id: AuctionId,
    ) -> Result<Option<Auction>, sqlx::Error> {
        let touched = sqlx::query(
            "UPDATE auctions SET updated_at_ms = updated_at_ms \
             WHERE id = ? AND deleted_at_ms IS NULL",
        )
        .bind(id.to_string())
        .execute(&mut **tx)
        .await?;

        if touched.rows_affected() == 0 {
            return Ok(None);
        }

        let sql = format!("SELECT {} FROM auctions WHERE id = ?", AUCTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_one(&mut **tx)
            .await?;

        auction_from_row(&row).map(Some)
    }

    /// Live auctions ordered by soonest end, with the total for pagination.
    pub async fn get_live_auctions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Auction>, i64), sqlx::Error> {
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM auctions WHERE status = 'live' AND deleted_at_ms IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {} FROM auctions WHERE status = 'live' AND deleted_at_ms IS NULL \
             ORDER BY end_time_ms ASC LIMIT ? OFFSET ?",
            AUCTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let auctions = rows
            .iter()
            .map(auction_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((auctions, total.0))
    }

    /// Scheduled auctions whose start time has passed; sweeper input.
    pub async fn get_scheduled_for_start(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuctionId>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id FROM auctions \
             WHERE status = 'scheduled' AND start_time_ms <= ? AND deleted_at_ms IS NULL",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| id_column(r, "id")).collect()
    }

    /// Live auctions whose end time has passed; sweeper input.
    pub async fn get_live_for_end(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuctionId>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id FROM auctions \
             WHERE status = 'live' AND end_time_ms <= ? AND deleted_at_ms IS NULL",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| id_column(r, "id")).collect()
    }

    /// Scheduled -> live, stamping the actual start time. A losing CAS
    /// returns false and is a no-op.
    pub async fn transition_to_live(
        &self,
        id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE auctions SET status = 'live', start_time_ms = ?, updated_at_ms = ? \
             WHERE id = ? AND status = 'scheduled' AND deleted_at_ms IS NULL",
        )
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Scheduled or live -> cancelled.
    pub async fn transition_to_cancelled(
        &self,
        id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE auctions SET status = 'cancelled', updated_at_ms = ? \
             WHERE id = ? AND status IN ('scheduled', 'live') AND deleted_at_ms IS NULL",
        )
        .bind(now.timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip a locked auction to ended, recording the winner and end time.
    pub async fn mark_ended(
        &self,
        tx: &mut WriteTx,
        id: AuctionId,
        winner_id: Option<UserId>,
        end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE auctions SET status = 'ended', winner_id = ?, end_time_ms = ?, \
             updated_at_ms = ? WHERE id = ?",
        )
        .bind(winner_id.map(|w| w.to_string()))
        .bind(end_time.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Hide an auction from every query without destroying bid history.
    pub async fn soft_delete_auction(
        &self,
        id: AuctionId,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE auctions SET deleted_at_ms = ?, updated_at_ms = ? \
             WHERE id = ? AND deleted_at_ms IS NULL",
        )
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Bid operations
    // =========================================================================

    /// Append a committed bid inside the caller's transaction: insert the
    /// bid as winning, clear the previous winner, and update the auction
    /// row's count, current bid, and (possibly extended) end time.
    pub async fn append_bid(
        &self,
        tx: &mut WriteTx,
        bid: &Bid,
        end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO bids (id, auction_id, bidder_id, amount, is_auto, is_winning, placed_at_ms)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(bid.id.to_string())
        .bind(bid.auction_id.to_string())
        .bind(bid.bidder_id.to_string())
        .bind(bid.amount.to_canonical_string())
        .bind(bid.is_auto)
        .bind(bid.placed_at.timestamp_millis())
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE bids SET is_winning = 0 \
             WHERE auction_id = ? AND id != ? AND is_winning = 1",
        )
        .bind(bid.auction_id.to_string())
        .bind(bid.id.to_string())
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE auctions SET current_bid_id = ?, bid_count = bid_count + 1, \
             end_time_ms = ?, updated_at_ms = ? WHERE id = ?",
        )
        .bind(bid.id.to_string())
        .bind(end_time.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(bid.auction_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn get_bid(&self, id: BidId) -> Result<Option<Bid>, sqlx::Error> {
        let sql = format!("SELECT {} FROM bids WHERE id = ?", BID_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| bid_from_row(&r)).transpose()
    }

    /// Read a bid inside a transaction (the current winning bid, under lock).
    pub async fn get_bid_in_tx(
        &self,
        tx: &mut WriteTx,
        id: BidId,
    ) -> Result<Option<Bid>, sqlx::Error> {
        let sql = format!("SELECT {} FROM bids WHERE id = ?", BID_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        row.map(|r| bid_from_row(&r)).transpose()
    }

    /// Bid history, newest first, with the total for pagination.
    pub async fn get_bids_by_auction(
        &self,
        auction_id: AuctionId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Bid>, i64), sqlx::Error> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bids WHERE auction_id = ?")
            .bind(auction_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {} FROM bids WHERE auction_id = ? \
             ORDER BY placed_at_ms DESC, rowid DESC LIMIT ? OFFSET ?",
            BID_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(auction_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let bids = rows.iter().map(bid_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((bids, total.0))
    }

    // =========================================================================
    // Auto-bid operations
    // =========================================================================

    /// Create or replace the rule for (auction, bidder); the unique index
    /// keeps at most one active rule per pair. Returns the effective row.
    pub async fn upsert_auto_bid(&self, rule: &AutoBid) -> Result<AutoBid, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO auto_bids
            (id, auction_id, bidder_id, max_amount, increment, active, created_at_ms)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(auction_id, bidder_id) DO UPDATE SET
                max_amount = excluded.max_amount,
                increment = excluded.increment,
                active = 1
            "#,
        )
        .bind(rule.id.to_string())
        .bind(rule.auction_id.to_string())
        .bind(rule.bidder_id.to_string())
        .bind(rule.max_amount.to_canonical_string())
        .bind(rule.increment.to_canonical_string())
        .bind(rule.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {} FROM auto_bids WHERE auction_id = ? AND bidder_id = ?",
            AUTO_BID_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(rule.auction_id.to_string())
            .bind(rule.bidder_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        auto_bid_from_row(&row)
    }

    /// Active rules in creation order. Money filters (max above current)
    /// happen in Rust: amount columns are strings and do not compare in SQL.
    pub async fn list_active_auto_bids(
        &self,
        auction_id: AuctionId,
    ) -> Result<Vec<AutoBid>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM auto_bids WHERE auction_id = ? AND active = 1 \
             ORDER BY created_at_ms ASC, id ASC",
            AUTO_BID_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(auction_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(auto_bid_from_row).collect()
    }

    /// Record that a rule fired, atomically.
    pub async fn touch_auto_bid(
        &self,
        id: AutoBidId,
        fired_at: DateTime<Utc>,
        amount: Money,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE auto_bids SET last_fired_at_ms = ?, last_amount = ? WHERE id = ?")
            .bind(fired_at.timestamp_millis())
            .bind(amount.to_canonical_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =========================================================================
// Row decoding
// =========================================================================

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

fn id_column<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(column);
    raw.parse::<T>()
        .map_err(|e| decode_err(format!("bad {} value {:?}: {}", column, raw, e)))
}

fn opt_id_column<T: FromStr>(row: &SqliteRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = row.get(column);
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|e| decode_err(format!("bad {} value {:?}: {}", column, s, e)))
    })
    .transpose()
}

fn money_column(row: &SqliteRow, column: &str) -> Result<Money, sqlx::Error> {
    let raw: String = row.get(column);
    Money::from_canonical(&raw)
        .map_err(|e| decode_err(format!("bad {} value {:?}: {}", column, raw, e)))
}

fn opt_money_column(row: &SqliteRow, column: &str) -> Result<Option<Money>, sqlx::Error> {
    let raw: Option<String> = row.get(column);
    raw.map(|s| {
        Money::from_canonical(&s)
            .map_err(|e| decode_err(format!("bad {} value {:?}: {}", column, s, e)))
    })
    .transpose()
}

fn time_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let ms: i64 = row.get(column);
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| decode_err(format!("bad {} timestamp {}", column, ms)))
}

fn opt_time_column(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let ms: Option<i64> = row.get(column);
    ms.map(|v| {
        DateTime::from_timestamp_millis(v)
            .ok_or_else(|| decode_err(format!("bad {} timestamp {}", column, v)))
    })
    .transpose()
}

fn auction_from_row(row: &SqliteRow) -> Result<Auction, sqlx::Error> {
    let status_raw: String = row.get("status");
    let status: AuctionStatus = status_raw.parse().map_err(decode_err)?;

    Ok(Auction {
        id: id_column(row, "id")?,
        product_id: id_column::<ProductId>(row, "product_id")?,
        seller_id: id_column::<UserId>(row, "seller_id")?,
        title: row.get("title"),
        description: row.get("description"),
        start_time: time_column(row, "start_time_ms")?,
        end_time: time_column(row, "end_time_ms")?,
        status,
        start_price: money_column(row, "start_price")?,
        reserve_price: opt_money_column(row, "reserve_price")?,
        buy_now_price: opt_money_column(row, "buy_now_price")?,
        bid_count: row.get("bid_count"),
        current_bid_id: opt_id_column::<BidId>(row, "current_bid_id")?,
        winner_id: opt_id_column::<UserId>(row, "winner_id")?,
        room_id: row.get("room_id"),
        is_featured: row.get("is_featured"),
        auto_extend: row.get("auto_extend"),
        extend_window_secs: row.get("extend_window_secs"),
        extend_amount_secs: row.get("extend_amount_secs"),
        created_at: time_column(row, "created_at_ms")?,
        updated_at: time_column(row, "updated_at_ms")?,
    })
}

fn bid_from_row(row: &SqliteRow) -> Result<Bid, sqlx::Error> {
    Ok(Bid {
        id: id_column(row, "id")?,
        auction_id: id_column(row, "auction_id")?,
        bidder_id: id_column(row, "bidder_id")?,
        amount: money_column(row, "amount")?,
        is_auto: row.get("is_auto"),
        is_winning: row.get("is_winning"),
        placed_at: time_column(row, "placed_at_ms")?,
    })
}

fn auto_bid_from_row(row: &SqliteRow) -> Result<AutoBid, sqlx::Error> {
    Ok(AutoBid {
        id: id_column(row, "id")?,
        auction_id: id_column(row, "auction_id")?,
        bidder_id: id_column(row, "bidder_id")?,
        max_amount: money_column(row, "max_amount")?,
        increment: money_column(row, "increment")?,
        active: row.get("active"),
        last_fired_at: opt_time_column(row, "last_fired_at_ms")?,
        last_amount: opt_money_column(row, "last_amount")?,
        created_at: time_column(row, "created_at_ms")?,
    })
}
