use anyhow::Result;
use keywords_reply::bot::{self, BotContext};
use keywords_reply::config::AppConfig;
use keywords_reply::images::ImageStore;
use keywords_reply::observability;
use keywords_reply::store::{self, EntryStore};
use keywords_reply::web::auth::PasswordFile;
use keywords_reply::web::AdminServer;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{error, info};

/// `--set-admin-password <password>` updates the console password hash and
/// exits; everything else starts the bot.
fn handle_cli(config: &AppConfig) -> Result<bool> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "--set-admin-password") {
        let password = args.get(pos + 1).ok_or_else(|| {
            anyhow::anyhow!("--set-admin-password requires the new password as the next argument")
        })?;
        let password_file = PasswordFile::new(config.storage.password_file());
        password_file
            .set_password(password)
            .map_err(|e| anyhow::anyhow!("Failed to set admin password: {}", e))?;
        println!("Admin password updated.");
        return Ok(true);
    }
    Ok(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;

    if handle_cli(&config)? {
        return Ok(());
    }

    observability::init_logging(&config.observability);
    info!("{}", config.summary());

    observability::init_metrics(&config.observability).await?;

    std::fs::create_dir_all(&config.storage.data_dir)?;
    let entry_store = store::shared(EntryStore::load(config.storage.entries_file()));
    let images = ImageStore::new(config.storage.image_dir())?;
    let password_file = PasswordFile::new(config.storage.password_file());

    // Admin console runs alongside the bot dispatcher
    let admin = AdminServer::new(
        config.web.clone(),
        Arc::clone(&entry_store),
        images.clone(),
        password_file,
    );
    tokio::spawn(async move {
        if let Err(e) = admin.run().await {
            error!(error = %e, "Admin console stopped");
        }
    });

    // Initialize the bot with custom client configuration for better reliability
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.bot.http_timeout_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

    let bot = Bot::with_client(config.bot.token.clone(), client.clone());
    let me = bot.get_me().await?;
    let username = me.username().to_string();

    let bot_context = Arc::new(BotContext::new(
        config,
        entry_store,
        images,
        client,
        username,
    ));

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry().branch(Update::filter_message().endpoint({
        let ctx = Arc::clone(&bot_context);
        move |bot: Bot, msg: Message| {
            let ctx = Arc::clone(&ctx);
            async move { bot::message_handler(bot, msg, ctx).await }
        }
    }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
