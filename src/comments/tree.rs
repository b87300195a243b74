use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::models::CommentRow;
use crate::types::AuthorRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    pub id: String,
    pub content: String,
    pub author: AuthorRef,
    pub parent_id: Option<String>,
    pub created_at: i64,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    fn from_row(row: CommentRow, replies: Vec<CommentNode>) -> Self {
        Self {
            id: row.id,
            content: row.content,
            author: AuthorRef {
                id: row.author_id,
                email: row.author_email,
                username: row.author_username,
            },
            parent_id: row.parent_id,
            created_at: row.created_at,
            replies,
        }
    }

    /// Number of comments in this subtree, including this one.
    pub fn thread_size(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::thread_size).sum::<usize>()
    }
}

impl From<CommentRow> for CommentNode {
    fn from(row: CommentRow) -> Self {
        CommentNode::from_row(row, Vec::new())
    }
}

/// Assemble flat comment rows into nested threads.
///
/// Rows without a parent are roots. Every level is ordered newest first, ties
/// broken by id. At most `max_depth` levels are produced (`1` = roots only);
/// deeper replies, and rows whose parent is not in `rows`, are dropped.
pub fn build_tree(rows: Vec<CommentRow>, max_depth: usize) -> Vec<CommentNode> {
    if max_depth == 0 {
        return Vec::new();
    }

    let mut children: HashMap<Option<String>, Vec<CommentRow>> = HashMap::new();
    for row in rows {
        children.entry(row.parent_id.clone()).or_default().push(row);
    }

    assemble(&mut children, None, 1, max_depth)
}

fn assemble(
    children: &mut HashMap<Option<String>, Vec<CommentRow>>,
    parent: Option<String>,
    depth: usize,
    max_depth: usize,
) -> Vec<CommentNode> {
    let Some(mut level) = children.remove(&parent) else {
        return Vec::new();
    };
    level.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    level
        .into_iter()
        .map(|row| {
            let replies = if depth < max_depth {
                assemble(children, Some(row.id.clone()), depth + 1, max_depth)
            } else {
                Vec::new()
            };
            CommentNode::from_row(row, replies)
        })
        .collect()
}

/// Total comments across a forest.
pub fn count(nodes: &[CommentNode]) -> usize {
    nodes.iter().map(CommentNode::thread_size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, parent: Option<&str>, created_at: i64) -> CommentRow {
        CommentRow {
            id: id.to_string(),
            market_id: "m1".to_string(),
            content: format!("comment {id}"),
            author_id: "u1".to_string(),
            author_email: "u1@example.com".to_string(),
            author_username: None,
            parent_id: parent.map(str::to_string),
            created_at,
        }
    }

    fn ids(nodes: &[CommentNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn reply_is_nested_under_parent() {
        let tree = build_tree(vec![row("a", None, 1), row("b", Some("a"), 2)], 3);
        assert_eq!(ids(&tree), vec!["a"]);
        assert_eq!(ids(&tree[0].replies), vec!["b"]);
        assert!(tree[0].replies[0].replies.is_empty());
    }

    #[test]
    fn siblings_are_newest_first_at_every_level() {
        let rows = vec![
            row("old", None, 10),
            row("new", None, 30),
            row("mid", None, 20),
            row("r1", Some("new"), 40),
            row("r2", Some("new"), 50),
        ];
        let tree = build_tree(rows, 3);
        assert_eq!(ids(&tree), vec!["new", "mid", "old"]);
        assert_eq!(ids(&tree[0].replies), vec!["r2", "r1"]);
    }

    #[test]
    fn same_timestamp_orders_by_id() {
        let tree = build_tree(vec![row("a", None, 5), row("b", None, 5)], 3);
        assert_eq!(ids(&tree), vec!["b", "a"]);
    }

    #[test]
    fn depth_bound_drops_deeper_replies() {
        let rows = vec![
            row("l1", None, 1),
            row("l2", Some("l1"), 2),
            row("l3", Some("l2"), 3),
            row("l4", Some("l3"), 4),
        ];
        let tree = build_tree(rows.clone(), 3);
        let l3 = &tree[0].replies[0].replies[0];
        assert_eq!(l3.id, "l3");
        assert!(l3.replies.is_empty());
        assert_eq!(count(&tree), 3);

        assert_eq!(count(&build_tree(rows.clone(), 1)), 1);
        assert!(build_tree(rows, 0).is_empty());
    }

    #[test]
    fn orphans_are_dropped() {
        let tree = build_tree(vec![row("a", None, 1), row("x", Some("missing"), 2)], 3);
        assert_eq!(count(&tree), 1);
    }

    #[test]
    fn author_fields_are_carried() {
        let mut r = row("a", None, 1);
        r.author_username = Some("alice".to_string());
        let tree = build_tree(vec![r], 3);
        assert_eq!(tree[0].author.display_name(), "alice");
        assert_eq!(tree[0].content, "comment a");
    }
}
