use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Delivers magic links. With a relay configured the mail is POSTed as JSON;
/// otherwise the link is written to the log, which is enough for local use.
pub enum Mailer {
    Http {
        client: reqwest::Client,
        relay_url: String,
        from: String,
    },
    Log,
}

impl Mailer {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        match &cfg.mail_relay_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()?;
                Ok(Mailer::Http {
                    client,
                    relay_url: url.clone(),
                    from: cfg.mail_from.clone(),
                })
            }
            None => Ok(Mailer::Log),
        }
    }

    pub async fn send_magic_link(&self, to: &str, link: &str) -> Result<()> {
        match self {
            Mailer::Http { client, relay_url, from } => {
                let mail = OutgoingMail {
                    from,
                    to,
                    subject: "Your MMXXV sign-in link",
                    text: format!(
                        "Click the link below to sign in to MMXXV.\n\n{link}\n\nThe link expires in 15 minutes. If you did not ask for it, ignore this email."
                    ),
                };
                client
                    .post(relay_url)
                    .json(&mail)
                    .send()
                    .await?
                    .error_for_status()?;
                info!(event = "MAGIC_LINK_SENT", to = %to, "magic link sent via relay");
            }
            Mailer::Log => {
                info!(event = "MAGIC_LINK", to = %to, link = %link, "MAIL_RELAY_URL not set, logging magic link");
            }
        }
        Ok(())
    }
}
