pub mod mailer;
pub mod session;

pub use mailer::Mailer;
pub use session::{MaybeSession, Session, SessionKey, SessionOptions, SessionProvider};
