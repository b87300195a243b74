pub mod toggle;

pub use toggle::{transition, VoteAction, VoteState};
