//! HTML rendering. Pages are plain strings assembled with `format!`; every
//! user-supplied value goes through `escape`.

use chrono::{DateTime, Utc};

use crate::actions::{market_path, probability_path};
use crate::comments::{tree, CommentNode};
use crate::config::COMMENT_TREE_MAX_DEPTH;
use crate::consensus::format_percent;
use crate::db::models::UserRow;
use crate::types::{MarketDetail, MarketSummary, ProbabilityView, NANOS_PER_SEC};
use crate::votes::VoteState;

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:960px;margin:0 auto;padding:1rem}\
table{width:100%;border-collapse:collapse}td,th{padding:.4rem;border-bottom:1px solid #ddd;text-align:left}\
.badge-new{background:#16a34a;color:#fff;border-radius:4px;padding:0 .3rem;margin-left:.4rem;font-size:.75rem}\
.active{font-weight:bold;text-decoration:underline}.meta{color:#666;font-size:.85rem}\
.replies{margin-left:1.5rem;border-left:2px solid #eee;padding-left:.75rem}\
.alert{background:#fee2e2;border:1px solid #f87171;padding:.75rem;border-radius:4px}\
form.inline{display:inline}";

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// "Jan 21, 2025". Timestamps are nanoseconds, rendered in UTC.
pub fn format_date(ns: i64) -> String {
    DateTime::<Utc>::from_timestamp(ns.div_euclid(NANOS_PER_SEC), 0)
        .map(|dt| dt.format("%b %-d, %Y").to_string())
        .unwrap_or_default()
}

/// Username when set, otherwise email.
fn display_name(user: &UserRow) -> &str {
    user.username.as_deref().unwrap_or(&user.email)
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Page shell with the nav bar. Signed-in users without a username get a
/// prompt to pick one.
pub fn layout(title: &str, viewer: Option<&UserRow>, body: &str) -> String {
    let nav = match viewer {
        Some(user) => format!(
            "<a href=\"/markets\">Markets</a> | {} \
             <form class=\"inline\" method=\"post\" action=\"/auth/signout\">\
             <button type=\"submit\">Sign out</button></form>",
            escape(display_name(user)),
        ),
        None => "<a href=\"/markets\">Markets</a> | <a href=\"/auth/signin\">Sign in</a>".to_string(),
    };
    let username_prompt = match viewer {
        Some(user) if user.username.is_none() => "<div class=\"alert\">\
             <form method=\"post\" action=\"/actions/username\">\
             <label for=\"username\">Choose a username</label> \
             <input id=\"username\" name=\"username\" maxlength=\"32\" required> \
             <button type=\"submit\">Save</button></form></div>"
            .to_string(),
        _ => String::new(),
    };

    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>{} | MMXXV</title><style>{style}</style></head>\
         <body><nav>{nav}</nav>{username_prompt}<main>{body}</main></body></html>",
        escape(title),
        style = STYLE,
    )
}

/// Failure shown after a form action, with a link back.
pub fn alert_page(message: &str, back: &str, viewer: Option<&UserRow>) -> String {
    let body = format!(
        "<div class=\"alert\" role=\"alert\">{}</div><p><a href=\"{}\">Go back</a></p>",
        escape(message),
        escape(back),
    );
    layout("Error", viewer, &body)
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

fn vote_buttons(market_id: &str, upvotes: i64, downvotes: i64, state: VoteState, back: &str, enabled: bool) -> String {
    let disabled = if enabled { "" } else { " disabled" };
    let class = |active: bool| if active { "active" } else { "" };
    format!(
        "<form class=\"inline\" method=\"post\" action=\"/actions/markets/{id}/upvote\">\
         <input type=\"hidden\" name=\"back\" value=\"{back}\">\
         <button type=\"submit\" class=\"{up_class}\"{disabled}>&uarr;{upvotes}</button></form> \
         <form class=\"inline\" method=\"post\" action=\"/actions/markets/{id}/downvote\">\
         <input type=\"hidden\" name=\"back\" value=\"{back}\">\
         <button type=\"submit\" class=\"{down_class}\"{disabled}>&darr;{downvotes}</button></form>",
        id = escape(market_id),
        back = escape(back),
        up_class = class(state == VoteState::Up),
        down_class = class(state == VoteState::Down),
    )
}

pub fn market_list(markets: &[MarketSummary], viewer: Option<&UserRow>) -> String {
    let mut body = String::from("<h1>Markets</h1>");

    if viewer.is_some() {
        body.push_str(
            "<form method=\"post\" action=\"/actions/markets\">\
             <input name=\"title\" placeholder=\"Title\" required> \
             <input name=\"description\" placeholder=\"Description\"> \
             <input name=\"resolution_criteria\" placeholder=\"Resolution criteria\"> \
             <button type=\"submit\">Create Market</button></form>",
        );
    }

    if markets.is_empty() {
        body.push_str("<p>No markets yet.</p>");
        return layout("Markets", viewer, &body);
    }

    body.push_str(
        "<table><thead><tr><th>MARKET</th><th>DESCRIPTION</th><th>AUTHOR</th>\
         <th>VOTES</th><th>COMMENTS</th><th></th></tr></thead><tbody>",
    );
    for m in markets {
        let badge = if m.is_new { "<span class=\"badge-new\">NEW</span>" } else { "" };
        let delete = if m.is_owner {
            format!(
                "<form class=\"inline\" method=\"post\" action=\"/actions/markets/{}/delete\" \
                 onsubmit=\"return confirm('Are you sure you want to delete this market? This action cannot be undone.')\">\
                 <button type=\"submit\" title=\"Delete market\">&times;</button></form>",
                escape(&m.id),
            )
        } else {
            String::new()
        };
        body.push_str(&format!(
            "<tr><td><a href=\"{href}\">{title}</a>{badge}<div class=\"meta\">{date}</div></td>\
             <td class=\"meta\">{description}</td><td class=\"meta\">{author}</td>\
             <td>{votes}</td><td>{comments}</td><td>{delete}</td></tr>",
            href = escape(&market_path(&m.id)),
            title = escape(&m.title),
            date = format_date(m.created_at),
            description = escape(&m.description),
            author = escape(&m.author.email),
            votes = vote_buttons(&m.id, m.upvotes, m.downvotes, m.viewer_vote, "/markets", viewer.is_some()),
            comments = m.comment_count,
        ));
    }
    body.push_str("</tbody></table>");

    layout("Markets", viewer, &body)
}

/// `invite_url` is the absolute address of this page, offered for sharing.
pub fn market_detail(market: &MarketDetail, viewer: Option<&UserRow>, invite_url: &str) -> String {
    let path = market_path(&market.id);
    let mut body = format!(
        "<h1>{title}</h1><p>{description}</p>\
         <p><strong>Resolution criteria:</strong> {criteria}</p>\
         <p class=\"meta\">Posted by {author} on {date}</p>\
         <p>{votes} <a href=\"{probability}\">Probabilities</a></p>\
         <p class=\"meta\"><label>Invite link \
         <input type=\"text\" readonly size=\"48\" value=\"{invite}\" onclick=\"this.select()\"></label> \
         <a href=\"{invite}\">{invite}</a></p>",
        title = escape(&market.title),
        description = escape(&market.description),
        criteria = escape(&market.resolution_criteria),
        author = escape(market.author.display_name()),
        date = format_date(market.created_at),
        votes = vote_buttons(&market.id, market.upvotes, market.downvotes, market.viewer_vote, &path, viewer.is_some()),
        probability = escape(&probability_path(&market.id)),
        invite = escape(invite_url),
    );

    body.push_str(&format!("<h2>Comments ({})</h2>", tree::count(&market.comments)));
    if viewer.is_some() {
        body.push_str(&comment_form(&market.id, None));
    }
    if market.comments.is_empty() {
        body.push_str("<p class=\"meta\">No comments yet.</p>");
    }
    for node in &market.comments {
        render_comment(&mut body, node, &market.id, 1, viewer.is_some());
    }

    layout(&market.title, viewer, &body)
}

fn comment_form(market_id: &str, parent_id: Option<&str>) -> String {
    let (parent, label) = match parent_id {
        Some(pid) => (
            format!("<input type=\"hidden\" name=\"parent_id\" value=\"{}\">", escape(pid)),
            "Reply",
        ),
        None => (String::new(), "Add Comment"),
    };
    format!(
        "<form method=\"post\" action=\"/actions/markets/{}/comments\">{parent}\
         <textarea name=\"content\" rows=\"2\" required></textarea> \
         <button type=\"submit\">{label}</button></form>",
        escape(market_id),
    )
}

fn render_comment(out: &mut String, node: &CommentNode, market_id: &str, depth: usize, can_reply: bool) {
    out.push_str(&format!(
        "<div class=\"comment\" id=\"comment-{id}\"><p>{content}</p>\
         <p class=\"meta\">{author} &middot; {date}</p>",
        id = escape(&node.id),
        content = escape(&node.content),
        author = escape(node.author.display_name()),
        date = format_date(node.created_at),
    ));
    if can_reply && depth < COMMENT_TREE_MAX_DEPTH {
        out.push_str(&comment_form(market_id, Some(&node.id)));
    }
    if !node.replies.is_empty() {
        out.push_str("<div class=\"replies\">");
        for reply in &node.replies {
            render_comment(out, reply, market_id, depth + 1, can_reply);
        }
        out.push_str("</div>");
    }
    out.push_str("</div>");
}

// ---------------------------------------------------------------------------
// Probabilities
// ---------------------------------------------------------------------------

pub fn probability_page(view: &ProbabilityView, viewer: Option<&UserRow>) -> String {
    let current = view
        .consensus
        .user_prediction
        .map(|p| format!("{:.1}", p * 100.0))
        .unwrap_or_default();

    let mut body = format!(
        "<h1>{title}</h1><p>{description}</p>\
         <p class=\"meta\">Posted by {author} on {date}</p>\
         <h2>Assign Your Probability</h2>\
         <form method=\"post\" action=\"/actions/markets/{id}/prediction\">\
         <input type=\"number\" name=\"probability\" min=\"0\" max=\"100\" step=\"0.1\" value=\"{current}\" required>% \
         <button type=\"submit\">Save</button></form>\
         <h2>Current Probability</h2><p>{summary}</p>",
        title = escape(&view.title),
        description = escape(&view.description),
        author = escape(view.author.display_name()),
        date = format_date(view.created_at),
        id = escape(&view.market_id),
        summary = view.consensus.summary(),
    );

    if !view.predictions.is_empty() {
        body.push_str(
            "<h2>Individual Predictions</h2><table><thead><tr><th>USER</th>\
             <th>PROBABILITY</th></tr></thead><tbody>",
        );
        for p in &view.predictions {
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                escape(p.user.display_name()),
                format_percent(p.probability),
            ));
        }
        body.push_str("</tbody></table>");
    }

    layout(&view.title, viewer, &body)
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

pub fn signin_page(error: Option<&str>) -> String {
    let alert = error
        .map(|e| format!("<div class=\"alert\" role=\"alert\">{}</div>", escape(e)))
        .unwrap_or_default();
    let body = format!(
        "<h1>Welcome to MMXXV</h1>\
         <p>A prediction game for 2025. Enter your email to get started.</p>{alert}\
         <form method=\"post\" action=\"/auth/signin\">\
         <label for=\"email\">Email</label> \
         <input id=\"email\" name=\"email\" type=\"email\" placeholder=\"your@email.com\" required> \
         <button type=\"submit\">Send Magic Link</button></form>"
    );
    layout("Sign in", None, &body)
}

pub fn check_email_page(email: &str) -> String {
    let body = format!(
        "<h1>Check your email</h1><p>We sent a sign-in link to <strong>{}</strong>. \
         It expires in 15 minutes.</p>",
        escape(email),
    );
    layout("Check your email", None, &body)
}
