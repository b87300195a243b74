use std::sync::Arc;

use tracing::info;

use crate::auth::Session;
use crate::comments::build_tree;
use crate::config::{COMMENT_TREE_MAX_DEPTH, MAX_USERNAME_LEN, NEW_MARKET_WINDOW_SECS};
use crate::consensus::{aggregate, Consensus};
use crate::db::models::{CommentRow, MarketRow, UserRow};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::state::ViewCache;
use crate::types::{
    now_ns, AuthorRef, MarketDetail, MarketSummary, NewMarket, PredictionEntry, ProbabilityView,
    VoteTally, NANOS_PER_SEC,
};
use crate::votes::{VoteAction, VoteState};

pub const MARKETS_PATH: &str = "/markets";

pub fn market_path(market_id: &str) -> String {
    format!("/markets/{market_id}")
}

pub fn probability_path(market_id: &str) -> String {
    format!("/probabilities/{market_id}")
}

pub fn is_new(created_at: i64, now: i64) -> bool {
    now.saturating_sub(created_at) < NEW_MARKET_WINDOW_SECS * NANOS_PER_SEC
}

/// Every read and mutation the UI and the JSON API can perform. Each takes
/// the caller's `Session` explicitly; mutations reject anonymous callers and
/// revalidate the views they touch once the write has committed.
#[derive(Clone)]
pub struct Actions {
    store: Store,
    cache: Arc<ViewCache>,
}

impl Actions {
    pub fn new(store: Store, cache: Arc<ViewCache>) -> Self {
        Self { store, cache }
    }

    // -----------------------------------------------------------------------
    // Markets
    // -----------------------------------------------------------------------

    pub async fn create_market(&self, session: &Session, input: NewMarket) -> Result<MarketRow> {
        let user = session.require_user()?;
        let market = NewMarket {
            title: input.title.trim().to_string(),
            description: input.description.trim().to_string(),
            resolution_criteria: input.resolution_criteria.trim().to_string(),
        };
        if market.title.is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }

        let created = self.store.create_market(&user.id, &market).await?;
        info!(event = "MARKET_CREATED", market_id = %created.id, author_id = %user.id, "market created");

        self.cache.revalidate_path(MARKETS_PATH);
        Ok(created)
    }

    /// Only the author may delete. Predictions, votes and comments go too.
    pub async fn delete_market(&self, session: &Session, market_id: &str) -> Result<()> {
        let user = session.require_user()?;
        let market = self
            .store
            .find_market(market_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Market not found".to_string()))?;
        if market.author_id != user.id {
            return Err(AppError::Forbidden("Unauthorized".to_string()));
        }

        self.store.delete_market(market_id).await?;
        info!(event = "MARKET_DELETED", market_id = %market_id, author_id = %user.id, "market deleted");

        self.cache.revalidate_path(MARKETS_PATH);
        self.cache.revalidate_path(&market_path(market_id));
        self.cache.revalidate_path(&probability_path(market_id));
        Ok(())
    }

    pub async fn list_markets(&self, session: &Session) -> Result<Vec<MarketSummary>> {
        let viewer = session.user_id().unwrap_or_default();
        let now = now_ns();
        let rows = self.store.list_markets(viewer).await?;

        Ok(rows
            .into_iter()
            .map(|r| MarketSummary {
                is_owner: session.user_id() == Some(r.author_id.as_str()),
                is_new: is_new(r.created_at, now),
                viewer_vote: VoteState::from_stance(r.viewer_stance),
                author: AuthorRef {
                    id: r.author_id,
                    email: r.author_email,
                    username: r.author_username,
                },
                id: r.id,
                title: r.title,
                description: r.description,
                resolution_criteria: r.resolution_criteria,
                created_at: r.created_at,
                upvotes: r.upvotes,
                downvotes: r.downvotes,
                comment_count: r.comment_count,
            })
            .collect())
    }

    /// A market with its author, voters and comment threads.
    pub async fn get_market_by_id(&self, session: &Session, market_id: &str) -> Result<MarketDetail> {
        let market = self.require_market(market_id).await?;
        let author = self.author_of(&market).await?;

        let votes = self.store.market_votes(market_id).await?;
        let (upvoters, downvoters): (Vec<_>, Vec<_>) = votes
            .into_iter()
            .partition(|v| VoteState::from_stance(Some(v.stance)) == VoteState::Up);
        let viewer_vote = match session.user_id() {
            Some(uid) if upvoters.iter().any(|v| v.user_id == uid) => VoteState::Up,
            Some(uid) if downvoters.iter().any(|v| v.user_id == uid) => VoteState::Down,
            _ => VoteState::None,
        };

        let rows = self.store.comment_thread(market_id, COMMENT_TREE_MAX_DEPTH).await?;
        let comments = build_tree(rows, COMMENT_TREE_MAX_DEPTH);

        Ok(MarketDetail {
            is_owner: session.user_id() == Some(market.author_id.as_str()),
            id: market.id,
            title: market.title,
            description: market.description,
            resolution_criteria: market.resolution_criteria,
            author,
            created_at: market.created_at,
            upvotes: market.upvotes,
            downvotes: market.downvotes,
            upvoters: upvoters.into_iter().map(|v| v.user_id).collect(),
            downvoters: downvoters.into_iter().map(|v| v.user_id).collect(),
            viewer_vote,
            comments,
        })
    }

    // -----------------------------------------------------------------------
    // Votes
    // -----------------------------------------------------------------------

    pub async fn upvote_market(&self, session: &Session, market_id: &str) -> Result<VoteTally> {
        self.vote(session, market_id, VoteAction::Upvote).await
    }

    pub async fn downvote_market(&self, session: &Session, market_id: &str) -> Result<VoteTally> {
        self.vote(session, market_id, VoteAction::Downvote).await
    }

    async fn vote(&self, session: &Session, market_id: &str, action: VoteAction) -> Result<VoteTally> {
        let user = session.require_user()?;
        let tally = self.store.toggle_vote(market_id, &user.id, action).await?;

        self.cache.revalidate_path(MARKETS_PATH);
        self.cache.revalidate_path(&market_path(market_id));
        Ok(tally)
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    /// Content is trimmed and must not be empty. A parent, if given, must be a
    /// comment on the same market. An empty parent id means a root comment.
    pub async fn add_comment(
        &self,
        session: &Session,
        market_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<CommentRow> {
        let user = session.require_user()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation(
                "Comment content must be a non-empty string".to_string(),
            ));
        }
        self.require_market(market_id).await?;

        let parent_id = parent_id.map(str::trim).filter(|p| !p.is_empty());
        if let Some(pid) = parent_id {
            let parent = self.store.find_comment(pid).await?;
            if parent.map_or(true, |p| p.market_id != market_id) {
                return Err(AppError::NotFound("Parent comment not found".to_string()));
            }
        }

        let comment = self
            .store
            .insert_comment(market_id, &user.id, content, parent_id)
            .await?;
        info!(event = "COMMENT_ADDED", market_id = %market_id, comment_id = %comment.id, "comment added");

        self.cache.revalidate_path(MARKETS_PATH);
        self.cache.revalidate_path(&market_path(market_id));
        Ok(comment)
    }

    // -----------------------------------------------------------------------
    // Predictions
    // -----------------------------------------------------------------------

    /// Record or revise the caller's probability for a market. Returns the
    /// updated consensus as the caller sees it.
    pub async fn assign_probability(
        &self,
        session: &Session,
        market_id: &str,
        probability: f64,
    ) -> Result<Consensus> {
        let user = session.require_user()?;
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(AppError::Validation(
                "Probability must be between 0 and 1".to_string(),
            ));
        }
        self.require_market(market_id).await?;

        self.store.upsert_prediction(market_id, &user.id, probability).await?;
        self.cache.revalidate_path(MARKETS_PATH);
        self.cache.revalidate_path(&market_path(market_id));
        self.cache.revalidate_path(&probability_path(market_id));

        let predictions = self.store.predictions_for_market(market_id).await?;
        Ok(aggregate(&predictions, Some(&user.id)))
    }

    pub async fn get_market_probability(
        &self,
        session: &Session,
        market_id: &str,
    ) -> Result<ProbabilityView> {
        let market = self.require_market(market_id).await?;
        let author = self.author_of(&market).await?;
        let rows = self.store.predictions_for_market(market_id).await?;
        let consensus = aggregate(&rows, session.user_id());

        let predictions = rows
            .into_iter()
            .map(|p| PredictionEntry {
                user: AuthorRef { id: p.user_id, email: p.email, username: p.username },
                probability: p.probability,
            })
            .collect();

        Ok(ProbabilityView {
            market_id: market.id,
            title: market.title,
            description: market.description,
            author,
            created_at: market.created_at,
            predictions,
            consensus,
        })
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub async fn current_user(&self, session: &Session) -> Result<UserRow> {
        let user = session.require_user()?;
        self.store
            .find_user(&user.id)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    pub async fn set_username(&self, session: &Session, username: &str) -> Result<UserRow> {
        let user = session.require_user()?;
        let username = validate_username(username)?;
        let updated = self.store.set_username(&user.id, &username).await?;
        info!(event = "USERNAME_SET", user_id = %user.id, username = %username, "username set");

        // Names appear on lists, threads and prediction tables alike.
        self.cache.revalidate_all();
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn require_market(&self, market_id: &str) -> Result<MarketRow> {
        self.store
            .find_market(market_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Market not found".to_string()))
    }

    async fn author_of(&self, market: &MarketRow) -> Result<AuthorRef> {
        let author = self
            .store
            .find_user(&market.author_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Author not found".to_string()))?;
        Ok(AuthorRef { id: author.id, email: author.email, username: author.username })
    }
}

fn validate_username(raw: &str) -> Result<String> {
    let username = raw.trim();
    let valid = !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(username.to_string())
    } else {
        Err(AppError::Validation(format!(
            "Username must be 1-{MAX_USERNAME_LEN} letters, digits, '_' or '-'"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionUser;
    use crate::db::connect_in_memory;

    struct Fixture {
        actions: Actions,
        store: Store,
        cache: Arc<ViewCache>,
    }

    async fn fixture() -> Fixture {
        let store = Store::new(connect_in_memory().await.expect("in-memory db"));
        let cache = ViewCache::new();
        Fixture {
            actions: Actions::new(store.clone(), Arc::clone(&cache)),
            store,
            cache,
        }
    }

    async fn sign_in(store: &Store, email: &str) -> Session {
        let user = store.upsert_user_by_email(email).await.unwrap();
        Session {
            session_key: format!("key-{email}"),
            user: SessionUser { id: user.id, auth_providers: vec!["email".to_string()] },
        }
    }

    fn xyz() -> NewMarket {
        NewMarket {
            title: "X".to_string(),
            description: "Y".to_string(),
            resolution_criteria: "Z".to_string(),
        }
    }

    #[tokio::test]
    async fn create_market_as_author() {
        let f = fixture().await;
        let u1 = sign_in(&f.store, "u1@example.com").await;
        let market = f.actions.create_market(&u1, xyz()).await.unwrap();
        assert_eq!(market.author_id, u1.user.id);
        assert_eq!((market.upvotes, market.downvotes), (0, 0));
    }

    #[tokio::test]
    async fn anonymous_callers_cannot_mutate() {
        let f = fixture().await;
        let anon = Session::anonymous();
        assert!(matches!(f.actions.create_market(&anon, xyz()).await, Err(AppError::Unauthorized)));
        assert!(matches!(f.actions.upvote_market(&anon, "m").await, Err(AppError::Unauthorized)));
        assert!(matches!(f.actions.add_comment(&anon, "m", "hi", None).await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let f = fixture().await;
        let u = sign_in(&f.store, "u@example.com").await;
        let mut input = xyz();
        input.title = "   ".to_string();
        assert!(matches!(f.actions.create_market(&u, input).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn comment_content_is_trimmed_and_empty_rejected() {
        let f = fixture().await;
        let u1 = sign_in(&f.store, "u1@example.com").await;
        let u2 = sign_in(&f.store, "u2@example.com").await;
        let market = f.actions.create_market(&u1, xyz()).await.unwrap();

        let comment = f.actions.add_comment(&u2, &market.id, "  hello  ", None).await.unwrap();
        assert_eq!(comment.content, "hello");
        assert_eq!(comment.author_id, u2.user.id);
        assert!(comment.parent_id.is_none());

        for empty in ["", "   \n\t"] {
            let err = f.actions.add_comment(&u2, &market.id, empty, None).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn reply_must_target_a_comment_on_the_same_market() {
        let f = fixture().await;
        let u = sign_in(&f.store, "u@example.com").await;
        let a = f.actions.create_market(&u, xyz()).await.unwrap();
        let b = f.actions.create_market(&u, xyz()).await.unwrap();
        let on_a = f.actions.add_comment(&u, &a.id, "root", None).await.unwrap();

        let err = f.actions.add_comment(&u, &b.id, "reply", Some(&on_a.id)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let reply = f.actions.add_comment(&u, &a.id, "reply", Some(&on_a.id)).await.unwrap();
        assert_eq!(reply.parent_id.as_deref(), Some(on_a.id.as_str()));

        // An empty parent id is a root comment.
        let root = f.actions.add_comment(&u, &a.id, "another", Some("")).await.unwrap();
        assert!(root.parent_id.is_none());
    }

    #[tokio::test]
    async fn market_detail_nests_replies() {
        let f = fixture().await;
        let u = sign_in(&f.store, "u@example.com").await;
        let market = f.actions.create_market(&u, xyz()).await.unwrap();
        let a = f.actions.add_comment(&u, &market.id, "A", None).await.unwrap();
        let b = f.actions.add_comment(&u, &market.id, "B", Some(&a.id)).await.unwrap();
        f.actions.upvote_market(&u, &market.id).await.unwrap();

        let detail = f.actions.get_market_by_id(&u, &market.id).await.unwrap();
        assert_eq!(detail.comments.len(), 1);
        assert_eq!(detail.comments[0].id, a.id);
        assert_eq!(detail.comments[0].replies[0].id, b.id);
        assert_eq!(detail.upvoters, vec![u.user.id.clone()]);
        assert!(detail.downvoters.is_empty());
        assert_eq!(detail.viewer_vote, VoteState::Up);
        assert!(detail.is_owner);

        let anon = f.actions.get_market_by_id(&Session::anonymous(), &market.id).await.unwrap();
        assert_eq!(anon.viewer_vote, VoteState::None);
        assert!(!anon.is_owner);
    }

    #[tokio::test]
    async fn only_the_author_can_delete() {
        let f = fixture().await;
        let author = sign_in(&f.store, "author@example.com").await;
        let other = sign_in(&f.store, "other@example.com").await;
        let market = f.actions.create_market(&author, xyz()).await.unwrap();

        let err = f.actions.delete_market(&other, &market.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(err.to_string(), "Unauthorized");

        f.actions.delete_market(&author, &market.id).await.unwrap();
        let err = f.actions.delete_market(&author, &market.id).await.unwrap_err();
        assert_eq!(err.to_string(), "Market not found");
    }

    #[tokio::test]
    async fn votes_revalidate_cached_views() {
        let f = fixture().await;
        let u = sign_in(&f.store, "u@example.com").await;
        let market = f.actions.create_market(&u, xyz()).await.unwrap();
        f.cache.insert(MARKETS_PATH, &u.user.id, "stale".to_string());
        f.cache.insert(&market_path(&market.id), "", "stale".to_string());
        f.cache.insert("/elsewhere", "", "kept".to_string());

        let tally = f.actions.downvote_market(&u, &market.id).await.unwrap();
        assert_eq!(tally.state, VoteState::Down);
        assert!(f.cache.get(MARKETS_PATH, &u.user.id).is_none());
        assert!(f.cache.get(&market_path(&market.id), "").is_none());
        assert_eq!(f.cache.get("/elsewhere", "").as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn predictions_revalidate_market_and_probability_views() {
        let f = fixture().await;
        let u = sign_in(&f.store, "p@example.com").await;
        let market = f.actions.create_market(&u, xyz()).await.unwrap();
        for path in [MARKETS_PATH.to_string(), market_path(&market.id), probability_path(&market.id)] {
            f.cache.insert(&path, &u.user.id, "stale".to_string());
        }

        f.actions.assign_probability(&u, &market.id, 0.4).await.unwrap();
        assert!(f.cache.get(MARKETS_PATH, &u.user.id).is_none());
        assert!(f.cache.get(&market_path(&market.id), &u.user.id).is_none());
        assert!(f.cache.get(&probability_path(&market.id), &u.user.id).is_none());
    }

    #[tokio::test]
    async fn list_marks_owner_and_viewer_vote() {
        let f = fixture().await;
        let author = sign_in(&f.store, "author@example.com").await;
        let viewer = sign_in(&f.store, "viewer@example.com").await;
        let market = f.actions.create_market(&author, xyz()).await.unwrap();
        f.actions.upvote_market(&viewer, &market.id).await.unwrap();

        let as_viewer = f.actions.list_markets(&viewer).await.unwrap();
        assert_eq!(as_viewer[0].viewer_vote, VoteState::Up);
        assert!(!as_viewer[0].is_owner);
        assert!(as_viewer[0].is_new);
        assert_eq!(as_viewer[0].upvotes, 1);

        let as_author = f.actions.list_markets(&author).await.unwrap();
        assert_eq!(as_author[0].viewer_vote, VoteState::None);
        assert!(as_author[0].is_owner);
    }

    #[tokio::test]
    async fn probability_assignment_updates_consensus() {
        let f = fixture().await;
        let a = sign_in(&f.store, "a@example.com").await;
        let b = sign_in(&f.store, "b@example.com").await;
        let market = f.actions.create_market(&a, xyz()).await.unwrap();

        f.actions.assign_probability(&a, &market.id, 0.25).await.unwrap();
        let consensus = f.actions.assign_probability(&b, &market.id, 0.75).await.unwrap();
        assert_eq!(consensus.user_prediction, Some(0.75));
        assert_eq!(consensus.average_probability, Some(0.5));

        // Revising replaces, never adds.
        f.actions.assign_probability(&a, &market.id, 0.75).await.unwrap();
        let view = f.actions.get_market_probability(&a, &market.id).await.unwrap();
        assert_eq!(view.predictions.len(), 2);
        assert_eq!(view.consensus.average_probability, Some(0.75));
        assert_eq!(view.consensus.user_prediction, Some(0.75));

        for bad in [-0.1, 1.01, f64::NAN] {
            let err = f.actions.assign_probability(&a, &market.id, bad).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        let err = f.actions.assign_probability(&a, "missing", 0.5).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn username_rules() {
        let f = fixture().await;
        let u = sign_in(&f.store, "u@example.com").await;
        let user = f.actions.set_username(&u, "  forecaster_1 ").await.unwrap();
        assert_eq!(user.username.as_deref(), Some("forecaster_1"));
        for bad in ["", "has space", "way_too_long_username_for_this_site"] {
            assert!(matches!(f.actions.set_username(&u, bad).await, Err(AppError::Validation(_))));
        }
    }
}
