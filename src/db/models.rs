/// Database row types matching `migrations/0001_init.sql`.
/// Used by sqlx for typed queries.

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, sqlx::FromRow)]
pub struct MarketRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution_criteria: String,
    pub author_id: String,
    pub created_at: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

/// Market joined with its author, comment count and the viewer's stance.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketListRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution_criteria: String,
    pub author_id: String,
    pub created_at: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub author_email: String,
    pub author_username: Option<String>,
    pub comment_count: i64,
    pub viewer_stance: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VoteRow {
    pub user_id: String,
    pub stance: i64,
}

/// Prediction joined with the predicting user.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PredictionRow {
    pub user_id: String,
    pub probability: f64,
    pub email: String,
    pub username: Option<String>,
}

/// Comment joined with its author.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CommentRow {
    pub id: String,
    pub market_id: String,
    pub content: String,
    pub author_id: String,
    pub author_email: String,
    pub author_username: Option<String>,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MagicLinkRow {
    pub email: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub user_id: String,
    pub expires_at: i64,
}
