//! smtp2tg — an SMTP to Telegram relay.
//!
//! The daemon listens for mail on a plain SMTP socket, assembles each
//! message behind a `Received:` trace header and hands it to a delivery
//! worker that forwards text and image parts to Telegram chats, routed
//! through the `[receivers]` table of the configuration file.
//!
//! The protocol engine lives in [`smtpd`] and is independent of the
//! Telegram side: it emits [`smtpd::Envelope`] values on an mpsc channel
//! and never waits for delivery.

pub mod config;
pub mod logger;
pub mod relay;
pub mod smtpd;
pub mod telegram;
