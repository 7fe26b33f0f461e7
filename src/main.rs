use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tokio::sync::mpsc;

use smtp2tg::config::Settings;
use smtp2tg::logger::Logger;
use smtp2tg::relay::Relay;
use smtp2tg::smtpd;
use smtp2tg::telegram::Bot;

#[derive(Debug, StructOpt)]
#[structopt(name = "smtp2tg", about = "SMTP to Telegram relay daemon")]
struct Opt {
    /// Config file location
    #[structopt(
        short = "c",
        long = "config",
        default_value = "./smtp2tg.toml",
        parse(from_os_str)
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();
    let settings = Settings::load(&opt.config)?;

    let logger = Arc::new(Logger::new(
        settings.logging.file.clone(),
        settings.logging.debug,
    )?);
    if settings.logging.file.is_none() {
        logger
            .info("no logging.file defined in config, writing to stdout")
            .await;
    }

    let bot = Bot::new(&settings.bot.token)?;
    let me = bot.get_me().await.context("bot authorization failed")?;
    logger
        .info(format!(
            "bot authorized as {}",
            me.username.as_deref().unwrap_or("<unnamed>")
        ))
        .await;

    let relay = Arc::new(Relay::new(
        bot,
        settings.receivers.clone(),
        Arc::clone(&logger),
    ));

    // Envelope handoff: sessions enqueue and move on, each delivery runs
    // as its own task so a slow Telegram call never holds up an SMTP
    // reply.
    let (mail_tx, mut mail_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(envelope) = mail_rx.recv().await {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.deliver(envelope).await });
        }
    });

    logger
        .info(format!(
            "initializing smtp server on {}...",
            settings.smtp.listen
        ))
        .await;
    smtpd::listen_and_serve(
        &settings.smtp.listen,
        mail_tx,
        "smtp2tg",
        &settings.smtp.name,
        logger,
    )
    .await
}
