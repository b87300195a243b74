use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::config::MAX_MARKETS_PER_USER;
use crate::db::models::{
    CommentRow, MagicLinkRow, MarketListRow, MarketRow, PredictionRow, SessionRow, UserRow, VoteRow,
};
use crate::error::{AppError, Result};
use crate::types::{now_ns, NewMarket, VoteTally};
use crate::votes::{transition, VoteAction, VoteState};

/// Typed access to every table. Cheap to clone; wraps the connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub async fn find_user(&self, user_id: &str) -> Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, username, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, username, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Return the user with this email, creating it on first sight.
    pub async fn upsert_user_by_email(&self, email: &str) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        let created = sqlx::query(
            "INSERT INTO users (id, email, username, created_at) VALUES (?, ?, NULL, ?)
             ON CONFLICT(email) DO NOTHING",
        )
        .bind(&id)
        .bind(email)
        .bind(now_ns())
        .execute(&self.pool)
        .await?;
        if created.rows_affected() > 0 {
            debug!(user_id = %id, "created user");
        }

        self.find_user_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn add_auth_provider(&self, user_id: &str, provider: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO auth_providers (user_id, provider, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(provider)
        .bind(now_ns())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn auth_providers(&self, user_id: &str) -> Result<Vec<String>> {
        let providers = sqlx::query_scalar::<_, String>(
            "SELECT provider FROM auth_providers WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(providers)
    }

    pub async fn set_username(&self, user_id: &str, username: &str) -> Result<UserRow> {
        let updated = sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(username)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Validation("Username is already taken".to_string())
                }
                other => AppError::Database(other),
            })?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        self.find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    // -----------------------------------------------------------------------
    // Markets
    // -----------------------------------------------------------------------

    /// Insert a market unless the author already owns the maximum. The count
    /// and the insert are one statement, so concurrent creations by the same
    /// author cannot both slip under the cap.
    pub async fn create_market(&self, author_id: &str, market: &NewMarket) -> Result<MarketRow> {
        let id = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            r#"
            INSERT INTO markets (id, title, description, resolution_criteria, author_id, created_at, upvotes, downvotes)
            SELECT ?, ?, ?, ?, ?, ?, 0, 0
            WHERE (SELECT COUNT(*) FROM markets WHERE author_id = ?) < ?
            "#,
        )
        .bind(&id)
        .bind(&market.title)
        .bind(&market.description)
        .bind(&market.resolution_criteria)
        .bind(author_id)
        .bind(now_ns())
        .bind(author_id)
        .bind(MAX_MARKETS_PER_USER)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::QuotaExceeded(format!(
                "You can only create up to {MAX_MARKETS_PER_USER} markets"
            )));
        }

        self.find_market(&id)
            .await?
            .ok_or_else(|| AppError::NotFound("Market not found".to_string()))
    }

    pub async fn count_markets_by_author(&self, author_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM markets WHERE author_id = ?")
            .bind(author_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn find_market(&self, market_id: &str) -> Result<Option<MarketRow>> {
        let market = sqlx::query_as::<_, MarketRow>(
            r#"
            SELECT id, title, description, resolution_criteria, author_id, created_at, upvotes, downvotes
            FROM markets
            WHERE id = ?
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(market)
    }

    /// All markets, newest first, with the given viewer's stance on each.
    /// An empty `viewer_id` matches no votes.
    pub async fn list_markets(&self, viewer_id: &str) -> Result<Vec<MarketListRow>> {
        let rows = sqlx::query_as::<_, MarketListRow>(
            r#"
            SELECT m.id, m.title, m.description, m.resolution_criteria, m.author_id,
                   m.created_at, m.upvotes, m.downvotes,
                   u.email AS author_email, u.username AS author_username,
                   (SELECT COUNT(*) FROM comments c WHERE c.market_id = m.id) AS comment_count,
                   (SELECT v.stance FROM market_votes v
                     WHERE v.market_id = m.id AND v.user_id = ?) AS viewer_stance
            FROM markets m
            JOIN users u ON u.id = m.author_id
            ORDER BY m.created_at DESC, m.id DESC
            "#,
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete a market. Predictions, votes and comments go with it.
    pub async fn delete_market(&self, market_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM markets WHERE id = ?")
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Votes
    // -----------------------------------------------------------------------

    pub async fn market_votes(&self, market_id: &str) -> Result<Vec<VoteRow>> {
        let rows = sqlx::query_as::<_, VoteRow>(
            "SELECT user_id, stance FROM market_votes WHERE market_id = ? ORDER BY created_at",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Apply one vote button press atomically: read the current stance, move
    /// to the next state, and adjust both counters, all in one transaction.
    pub async fn toggle_vote(
        &self,
        market_id: &str,
        user_id: &str,
        action: VoteAction,
    ) -> Result<VoteTally> {
        let mut tx = self.pool.begin().await?;

        // A write as the first statement takes SQLite's write lock up front,
        // so concurrent toggles serialize instead of reading stale stances.
        let locked = sqlx::query("UPDATE markets SET upvotes = upvotes WHERE id = ?")
            .bind(market_id)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Err(AppError::NotFound("Market not found".to_string()));
        }

        let stance = sqlx::query_scalar::<_, i64>(
            "SELECT stance FROM market_votes WHERE market_id = ? AND user_id = ?",
        )
        .bind(market_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = VoteState::from_stance(stance);
        let (next, delta) = transition(current, action);

        match next.stance() {
            Some(stance) => {
                sqlx::query(
                    r#"
                    INSERT INTO market_votes (market_id, user_id, stance, created_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(market_id, user_id) DO UPDATE SET
                        stance = excluded.stance,
                        created_at = excluded.created_at
                    "#,
                )
                .bind(market_id)
                .bind(user_id)
                .bind(stance)
                .bind(now_ns())
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM market_votes WHERE market_id = ? AND user_id = ?")
                    .bind(market_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let (upvotes, downvotes) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            UPDATE markets
            SET upvotes = upvotes + ?, downvotes = downvotes + ?
            WHERE id = ?
            RETURNING upvotes, downvotes
            "#,
        )
        .bind(delta.upvotes)
        .bind(delta.downvotes)
        .bind(market_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            market_id = %market_id,
            user_id = %user_id,
            action = %action,
            from = %current,
            to = %next,
            "vote toggled"
        );

        Ok(VoteTally { state: next, upvotes, downvotes })
    }

    // -----------------------------------------------------------------------
    // Predictions
    // -----------------------------------------------------------------------

    pub async fn upsert_prediction(
        &self,
        market_id: &str,
        user_id: &str,
        probability: f64,
    ) -> Result<()> {
        let now = now_ns();
        sqlx::query(
            r#"
            INSERT INTO predictions (user_id, market_id, probability, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, market_id) DO UPDATE SET
                probability = excluded.probability,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(market_id)
        .bind(probability)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn predictions_for_market(&self, market_id: &str) -> Result<Vec<PredictionRow>> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            r#"
            SELECT p.user_id, p.probability, u.email, u.username
            FROM predictions p
            JOIN users u ON u.id = p.user_id
            WHERE p.market_id = ?
            ORDER BY p.created_at, p.user_id
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    pub async fn insert_comment(
        &self,
        market_id: &str,
        author_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<CommentRow> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO comments (id, content, author_id, market_id, parent_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(content)
        .bind(author_id)
        .bind(market_id)
        .bind(parent_id)
        .bind(now_ns())
        .execute(&self.pool)
        .await?;

        self.find_comment(&id)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
    }

    pub async fn find_comment(&self, comment_id: &str) -> Result<Option<CommentRow>> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.market_id, c.content, c.author_id,
                   u.email AS author_email, u.username AS author_username,
                   c.parent_id, c.created_at
            FROM comments c
            JOIN users u ON u.id = c.author_id
            WHERE c.id = ?
            "#,
        )
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Walk a market's threads from the roots down, `max_depth` levels deep
    /// (`1` = roots only). Rows come back flat; see `comments::build_tree`.
    pub async fn comment_thread(&self, market_id: &str, max_depth: usize) -> Result<Vec<CommentRow>> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            WITH RECURSIVE thread(id, market_id, content, author_id, parent_id, created_at, depth) AS (
                SELECT id, market_id, content, author_id, parent_id, created_at, 1
                FROM comments
                WHERE market_id = ? AND parent_id IS NULL
                UNION ALL
                SELECT c.id, c.market_id, c.content, c.author_id, c.parent_id, c.created_at, t.depth + 1
                FROM comments c
                JOIN thread t ON c.parent_id = t.id
                WHERE t.depth < ?
            )
            SELECT t.id, t.market_id, t.content, t.author_id,
                   u.email AS author_email, u.username AS author_username,
                   t.parent_id, t.created_at
            FROM thread t
            JOIN users u ON u.id = t.author_id
            "#,
        )
        .bind(market_id)
        .bind(max_depth as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Magic links and sessions
    // -----------------------------------------------------------------------

    pub async fn insert_magic_link(&self, token_hash: &str, email: &str, expires_at: i64) -> Result<()> {
        sqlx::query("INSERT INTO magic_links (token_hash, email, expires_at) VALUES (?, ?, ?)")
            .bind(token_hash)
            .bind(email)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a link used and return it, if it exists, is unused, and has not
    /// expired. A link can be consumed at most once.
    pub async fn consume_magic_link(&self, token_hash: &str, now: i64) -> Result<Option<MagicLinkRow>> {
        let row = sqlx::query_as::<_, MagicLinkRow>(
            r#"
            UPDATE magic_links
            SET consumed_at = ?
            WHERE token_hash = ? AND consumed_at IS NULL AND expires_at > ?
            RETURNING email
            "#,
        )
        .bind(now)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_session(&self, key_hash: &str, user_id: &str, expires_at: i64) -> Result<()> {
        sqlx::query("INSERT INTO sessions (key_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(key_hash)
            .bind(user_id)
            .bind(now_ns())
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_session(&self, key_hash: &str) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT user_id, expires_at FROM sessions WHERE key_hash = ?",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_session(&self, key_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE key_hash = ?")
            .bind(key_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop used or expired magic links and expired sessions. Returns the
    /// number of (links, sessions) removed.
    pub async fn purge_expired_auth(&self, now: i64) -> Result<(u64, u64)> {
        let links = sqlx::query("DELETE FROM magic_links WHERE consumed_at IS NOT NULL OR expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if links + sessions > 0 {
            debug!(links, sessions, "purged expired auth rows");
        }
        Ok((links, sessions))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    async fn store() -> Store {
        Store::new(connect_in_memory().await.expect("in-memory db"))
    }

    fn new_market(title: &str) -> NewMarket {
        NewMarket {
            title: title.to_string(),
            description: "Y".to_string(),
            resolution_criteria: "Z".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_user_is_idempotent() {
        let store = store().await;
        let first = store.upsert_user_by_email("a@example.com").await.unwrap();
        let second = store.upsert_user_by_email("a@example.com").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.username.is_none());
    }

    #[tokio::test]
    async fn created_market_starts_with_zero_votes() {
        let store = store().await;
        let u1 = store.upsert_user_by_email("u1@example.com").await.unwrap();
        let market = store.create_market(&u1.id, &new_market("X")).await.unwrap();
        assert_eq!(market.author_id, u1.id);
        assert_eq!(market.title, "X");
        assert_eq!(market.description, "Y");
        assert_eq!(market.resolution_criteria, "Z");
        assert_eq!((market.upvotes, market.downvotes), (0, 0));
    }

    #[tokio::test]
    async fn eleventh_market_is_rejected_without_insert() {
        let store = store().await;
        let u = store.upsert_user_by_email("cap@example.com").await.unwrap();
        for i in 0..MAX_MARKETS_PER_USER {
            store.create_market(&u.id, &new_market(&format!("m{i}"))).await.unwrap();
        }
        let err = store.create_market(&u.id, &new_market("one too many")).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded(_)), "got {err:?}");
        assert_eq!(err.to_string(), "You can only create up to 10 markets");
        assert_eq!(store.count_markets_by_author(&u.id).await.unwrap(), MAX_MARKETS_PER_USER);

        // Other authors are unaffected.
        let other = store.upsert_user_by_email("other@example.com").await.unwrap();
        assert!(store.create_market(&other.id, &new_market("fine")).await.is_ok());
    }

    #[tokio::test]
    async fn toggle_vote_keeps_counters_in_step_with_rows() {
        let store = store().await;
        let author = store.upsert_user_by_email("author@example.com").await.unwrap();
        let voter = store.upsert_user_by_email("voter@example.com").await.unwrap();
        let market = store.create_market(&author.id, &new_market("X")).await.unwrap();

        let up = store.toggle_vote(&market.id, &voter.id, VoteAction::Upvote).await.unwrap();
        assert_eq!(up, VoteTally { state: VoteState::Up, upvotes: 1, downvotes: 0 });

        let down = store.toggle_vote(&market.id, &voter.id, VoteAction::Downvote).await.unwrap();
        assert_eq!(down, VoteTally { state: VoteState::Down, upvotes: 0, downvotes: 1 });
        let rows = store.market_votes(&market.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(VoteState::from_stance(Some(rows[0].stance)), VoteState::Down);

        let cleared = store.toggle_vote(&market.id, &voter.id, VoteAction::Downvote).await.unwrap();
        assert_eq!(cleared, VoteTally { state: VoteState::None, upvotes: 0, downvotes: 0 });
        assert!(store.market_votes(&market.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upvote_twice_restores_counter() {
        let store = store().await;
        let u = store.upsert_user_by_email("u@example.com").await.unwrap();
        let market = store.create_market(&u.id, &new_market("X")).await.unwrap();

        store.toggle_vote(&market.id, &u.id, VoteAction::Upvote).await.unwrap();
        let tally = store.toggle_vote(&market.id, &u.id, VoteAction::Upvote).await.unwrap();
        assert_eq!(tally.state, VoteState::None);
        assert_eq!(tally.upvotes, 0);
        let reloaded = store.find_market(&market.id).await.unwrap().unwrap();
        assert_eq!(reloaded.upvotes, 0);
    }

    #[tokio::test]
    async fn vote_on_missing_market_is_not_found() {
        let store = store().await;
        let u = store.upsert_user_by_email("u@example.com").await.unwrap();
        let err = store.toggle_vote("nope", &u.id, VoteAction::Upvote).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_market_cascades() {
        let store = store().await;
        let u = store.upsert_user_by_email("u@example.com").await.unwrap();
        let market = store.create_market(&u.id, &new_market("X")).await.unwrap();
        store.toggle_vote(&market.id, &u.id, VoteAction::Upvote).await.unwrap();
        store.upsert_prediction(&market.id, &u.id, 0.3).await.unwrap();
        let root = store.insert_comment(&market.id, &u.id, "root", None).await.unwrap();
        store.insert_comment(&market.id, &u.id, "reply", Some(&root.id)).await.unwrap();

        assert!(store.delete_market(&market.id).await.unwrap());
        assert!(store.find_market(&market.id).await.unwrap().is_none());
        assert!(store.market_votes(&market.id).await.unwrap().is_empty());
        assert!(store.predictions_for_market(&market.id).await.unwrap().is_empty());
        assert!(store.find_comment(&root.id).await.unwrap().is_none());
        assert!(!store.delete_market(&market.id).await.unwrap());
    }

    #[tokio::test]
    async fn prediction_upsert_replaces_previous_value() {
        let store = store().await;
        let u = store.upsert_user_by_email("u@example.com").await.unwrap();
        let market = store.create_market(&u.id, &new_market("X")).await.unwrap();
        store.upsert_prediction(&market.id, &u.id, 0.2).await.unwrap();
        store.upsert_prediction(&market.id, &u.id, 0.7).await.unwrap();
        let preds = store.predictions_for_market(&market.id).await.unwrap();
        assert_eq!(preds.len(), 1);
        assert!((preds[0].probability - 0.7).abs() < 1e-12);
        assert_eq!(preds[0].email, "u@example.com");
    }

    #[tokio::test]
    async fn comment_thread_stops_at_max_depth() {
        let store = store().await;
        let u = store.upsert_user_by_email("u@example.com").await.unwrap();
        let market = store.create_market(&u.id, &new_market("X")).await.unwrap();
        let l1 = store.insert_comment(&market.id, &u.id, "l1", None).await.unwrap();
        let l2 = store.insert_comment(&market.id, &u.id, "l2", Some(&l1.id)).await.unwrap();
        let l3 = store.insert_comment(&market.id, &u.id, "l3", Some(&l2.id)).await.unwrap();
        store.insert_comment(&market.id, &u.id, "l4", Some(&l3.id)).await.unwrap();

        assert_eq!(store.comment_thread(&market.id, 3).await.unwrap().len(), 3);
        assert_eq!(store.comment_thread(&market.id, 1).await.unwrap().len(), 1);
        assert_eq!(store.comment_thread(&market.id, 10).await.unwrap().len(), 4);
        assert!(store.comment_thread(&market.id, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_markets_reports_viewer_stance_and_comment_count() {
        let store = store().await;
        let u = store.upsert_user_by_email("u@example.com").await.unwrap();
        let market = store.create_market(&u.id, &new_market("X")).await.unwrap();
        store.toggle_vote(&market.id, &u.id, VoteAction::Downvote).await.unwrap();
        store.insert_comment(&market.id, &u.id, "hi", None).await.unwrap();

        let rows = store.list_markets(&u.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].viewer_stance, Some(-1));
        assert_eq!(rows[0].comment_count, 1);
        assert_eq!(rows[0].author_email, "u@example.com");

        let anonymous = store.list_markets("").await.unwrap();
        assert_eq!(anonymous[0].viewer_stance, None);
    }

    /// Pool over a throwaway database file, so writers race on real
    /// connections instead of sharing one.
    async fn file_store() -> (Store, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("mmxxv-race-{}.db", Uuid::new_v4()));
        let pool = crate::db::connect(path.to_str().unwrap()).await.unwrap();
        (Store::new(pool), path)
    }

    async fn remove_db(store: Store, path: std::path::PathBuf) {
        store.pool.close().await;
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-journal"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_toggles_keep_counters_equal_to_vote_rows() {
        let (store, path) = file_store().await;
        let author = store.upsert_user_by_email("author@example.com").await.unwrap();
        let market = store.create_market(&author.id, &new_market("race")).await.unwrap();
        let mut voters = Vec::new();
        for i in 0..20 {
            voters.push(store.upsert_user_by_email(&format!("v{i}@example.com")).await.unwrap().id);
        }

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..100 {
            let store = store.clone();
            let market_id = market.id.clone();
            let user_id = voters[n % voters.len()].clone();
            let action = if n % 3 == 0 { VoteAction::Downvote } else { VoteAction::Upvote };
            tasks.spawn(async move { store.toggle_vote(&market_id, &user_id, action).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let (rows_up, rows_down) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COALESCE(SUM(stance = 1), 0), COALESCE(SUM(stance = -1), 0) FROM market_votes WHERE market_id = ?",
        )
        .bind(&market.id)
        .fetch_one(&store.pool)
        .await
        .unwrap();
        let row = store.find_market(&market.id).await.unwrap().unwrap();
        assert_eq!((row.upvotes, row.downvotes), (rows_up, rows_down));

        remove_db(store, path).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creations_never_exceed_the_cap() {
        let (store, path) = file_store().await;
        let author = store.upsert_user_by_email("busy@example.com").await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..30 {
            let store = store.clone();
            let author_id = author.id.clone();
            tasks.spawn(async move { store.create_market(&author_id, &new_market(&format!("m{n}"))).await });
        }
        let (mut created, mut refused) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) => created += 1,
                Err(AppError::QuotaExceeded(_)) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(created, MAX_MARKETS_PER_USER);
        assert_eq!(refused, 30 - MAX_MARKETS_PER_USER);
        assert_eq!(store.count_markets_by_author(&author.id).await.unwrap(), MAX_MARKETS_PER_USER);

        remove_db(store, path).await;
    }

    #[tokio::test]
    async fn purge_drops_used_and_expired_auth_rows_only() {
        let store = store().await;
        let now = now_ns();
        let user = store.upsert_user_by_email("s@example.com").await.unwrap();
        store.insert_magic_link("live", "a@example.com", now + 1_000_000_000).await.unwrap();
        store.insert_magic_link("used", "a@example.com", now + 1_000_000_000).await.unwrap();
        store.insert_magic_link("stale", "a@example.com", now - 1).await.unwrap();
        store.consume_magic_link("used", now).await.unwrap().unwrap();
        store.insert_session("fresh", &user.id, now + 1_000_000_000).await.unwrap();
        store.insert_session("expired", &user.id, now - 1).await.unwrap();

        assert_eq!(store.purge_expired_auth(now).await.unwrap(), (2, 1));
        assert!(store.find_session("fresh").await.unwrap().is_some());
        assert!(store.find_session("expired").await.unwrap().is_none());
        assert!(store.consume_magic_link("live", now).await.unwrap().is_some());
        assert_eq!(store.purge_expired_auth(now).await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn magic_link_is_single_use_and_expires() {
        let store = store().await;
        let now = now_ns();
        store.insert_magic_link("hash-ok", "a@example.com", now + 1_000_000_000).await.unwrap();
        store.insert_magic_link("hash-old", "b@example.com", now - 1).await.unwrap();

        let link = store.consume_magic_link("hash-ok", now).await.unwrap().unwrap();
        assert_eq!(link.email, "a@example.com");
        assert!(store.consume_magic_link("hash-ok", now).await.unwrap().is_none());
        assert!(store.consume_magic_link("hash-old", now).await.unwrap().is_none());
        assert!(store.consume_magic_link("missing", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_validation_error() {
        let store = store().await;
        let a = store.upsert_user_by_email("a@example.com").await.unwrap();
        let b = store.upsert_user_by_email("b@example.com").await.unwrap();
        store.set_username(&a.id, "alice").await.unwrap();
        let err = store.set_username(&b.id, "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
