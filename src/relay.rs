use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use mailparse::{MailHeaderMap, ParsedMail};

use crate::logger::Logger;
use crate::smtpd::Envelope;
use crate::telegram::Bot;

/// Delivery worker sitting behind the SMTP core's envelope channel.
///
/// Failures here are logged and dropped; by the time an envelope reaches
/// the relay the client has already been told `250 Ok: queued`.
pub struct Relay {
    bot: Bot,
    receivers: HashMap<String, String>,
    logger: Arc<Logger>,
}

struct ImagePart {
    filename: String,
    bytes: Vec<u8>,
}

impl Relay {
    pub fn new(bot: Bot, receivers: HashMap<String, String>, logger: Arc<Logger>) -> Self {
        Self { bot, receivers, logger }
    }

    pub async fn deliver(&self, envelope: Envelope) {
        if let Err(err) = self.relay_message(&envelope).await {
            self.logger.error(format!("mail relay failed: {err:#}")).await;
        }
    }

    async fn relay_message(&self, envelope: &Envelope) -> Result<()> {
        let mail = mailparse::parse_mail(&envelope.data).context("failed to parse mail")?;
        let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
        let recipient = envelope.to.first().map(String::as_str).unwrap_or_default();

        self.logger
            .info(format!(
                "received mail from '{}' for '{}' with subject '{}'",
                envelope.from, recipient, subject
            ))
            .await;

        let chat = self
            .route(recipient)
            .ok_or_else(|| anyhow!("no receiver route for '{recipient}'"))?;
        let chat_id: i64 = chat
            .parse()
            .map_err(|_| anyhow!("wrong telegram id '{chat}': not an integer"))?;

        let (texts, images) = collect_parts(&mail);
        if texts.is_empty() && images.is_empty() {
            self.logger
                .info("mail contains neither text nor image parts")
                .await;
            return Ok(());
        }

        self.logger.info(format!("relaying message to {chat_id}")).await;

        if let Some(text) = texts.first() {
            self.bot
                .send_message(chat_id, text)
                .await
                .context("telegram message send failed")?;
        }
        for image in images {
            self.bot
                .send_photo(chat_id, &image.filename, image.bytes)
                .await
                .context("telegram photo send failed")?;
        }

        Ok(())
    }

    /// Exact recipient match, falling back to the wildcard route.
    fn route(&self, recipient: &str) -> Option<&str> {
        self.receivers
            .get(recipient)
            .or_else(|| self.receivers.get("*"))
            .map(String::as_str)
    }
}

/// Walk the MIME tree and pull out the leaf parts the relay can forward:
/// decoded `text/*` bodies and raw `image/*` attachments.
fn collect_parts(mail: &ParsedMail) -> (Vec<String>, Vec<ImagePart>) {
    let mut texts = Vec::new();
    let mut images = Vec::new();
    walk(mail, &mut texts, &mut images);
    (texts, images)
}

fn walk(part: &ParsedMail, texts: &mut Vec<String>, images: &mut Vec<ImagePart>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk(sub, texts, images);
        }
        return;
    }
    if part.ctype.mimetype.starts_with("text") {
        if let Ok(body) = part.get_body() {
            texts.push(body);
        }
    } else if part.ctype.mimetype.starts_with("image") {
        let filename = part
            .get_content_disposition()
            .params
            .get("filename")
            .cloned()
            .unwrap_or_else(|| "attachment".to_string());
        if let Ok(bytes) = part.get_body_raw() {
            images.push(ImagePart { filename, bytes });
        }
    }
}
