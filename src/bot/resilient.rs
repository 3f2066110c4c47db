//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! This module provides wrappers around Telegram API operations that automatically
//! retry on transient network failures using exponential backoff with jitter.
//! Photo helpers fall back to a bundled placeholder when Telegram cannot load
//! the image address.
//!
//! # Usage
//!
//! ```ignore
//! use mediascout::bot::resilient::{send_message_resilient, edit_message_safe_resilient};
//!
//! // Send with automatic retry
//! let msg = send_message_resilient(&bot, chat_id, "Hello!", None).await?;
//!
//! // Edit with graceful degradation
//! let success = edit_message_safe_resilient(&bot, chat_id, msg.id, "Updated!").await;
//! ```

use crate::config::TELEGRAM_CAPTION_LIMIT;
use crate::utils::fit_caption;
use anyhow::Result;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto, KeyboardMarkup,
    KeyboardRemove, Message, MessageId, ParseMode,
};
use tracing::{debug, warn};

const NO_POSTER: &[u8] = include_bytes!("../../assets/no_poster.png");

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";

/// Bundled image shown when an item has no usable picture.
#[must_use]
pub fn placeholder_photo() -> InputFile {
    InputFile::memory(NO_POSTER).file_name("no_poster.png")
}

fn remote_photo(image: Option<&str>) -> Option<InputFile> {
    let url = Url::parse(image?).ok()?;
    Some(InputFile::url(url))
}

fn is_benign_edit_error(err_msg: &str) -> bool {
    err_msg.contains(ERROR_NOT_MODIFIED) || err_msg.contains(ERROR_NOT_FOUND)
}

/// Send a message with automatic retry on network failures.
///
/// Uses [`crate::utils::retry_telegram_operation`] with exponential backoff
/// to handle transient network errors.
///
/// # Errors
///
/// Returns the last Telegram error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send a message together with a reply keyboard.
///
/// # Errors
///
/// Returns the last Telegram error after all retries are exhausted.
pub async fn send_with_keyboard_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    keyboard: KeyboardMarkup,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .reply_markup(keyboard.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send a message and hide the reply keyboard.
///
/// # Errors
///
/// Returns the last Telegram error after all retries are exhausted.
pub async fn send_removing_keyboard_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .reply_markup(KeyboardRemove::new())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last Telegram error after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.edit_message_text(chat_id, msg_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await
}

/// Edit message with graceful degradation and automatic retry.
///
/// This function:
/// 1. Truncates text to 4000 characters if needed
/// 2. Retries on transient network errors
/// 3. Gracefully handles expected errors ("message not modified", "not found")
///
/// # Returns
///
/// - `true` if message was successfully edited
/// - `false` if edit was skipped (not modified / not found) or failed after retries
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> bool {
    // Truncate if too long (Telegram limit is 4096, we use 4000 for safety)
    let truncated = if text.chars().count() > 4000 {
        let truncated_text = crate::utils::truncate_str(text, 4000);
        format!("{truncated_text}...")
    } else {
        text.to_string()
    };

    match edit_message_resilient(bot, chat_id, msg_id, truncated, None).await {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if is_benign_edit_error(&err_msg) {
                debug!("Message update skipped: {err_msg}");
            } else {
                warn!("Failed to edit message after retries: {e}");
            }
            false
        }
    }
}

/// Send a photo with caption and navigation controls.
///
/// The image address is tried once; if Telegram rejects it, the placeholder
/// is sent instead with the usual retry policy.
///
/// # Errors
///
/// Returns the last Telegram error when even the placeholder cannot be sent.
pub async fn send_photo_resilient(
    bot: &Bot,
    chat_id: ChatId,
    image: Option<&str>,
    caption: &str,
    markup: InlineKeyboardMarkup,
) -> Result<Message> {
    let caption = fit_caption(caption, TELEGRAM_CAPTION_LIMIT);

    if let Some(photo) = remote_photo(image) {
        match bot
            .send_photo(chat_id, photo)
            .caption(caption.clone())
            .reply_markup(markup.clone())
            .await
        {
            Ok(msg) => return Ok(msg),
            Err(e) => debug!(chat_id = chat_id.0, error = %e, "Image rejected, sending placeholder"),
        }
    }

    crate::utils::retry_telegram_operation(|| async {
        bot.send_photo(chat_id, placeholder_photo())
            .caption(caption.clone())
            .reply_markup(markup.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send photo error: {e}"))
    })
    .await
}

/// Replace the photo, caption and controls of a message.
///
/// Same fallback as [`send_photo_resilient`]. Returns `false` when the edit
/// was skipped ("not modified", "not found") or failed after retries.
pub async fn edit_photo_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    image: Option<&str>,
    caption: &str,
    markup: InlineKeyboardMarkup,
) -> bool {
    let caption = fit_caption(caption, TELEGRAM_CAPTION_LIMIT);
    let media = |photo: InputFile| InputMedia::Photo(InputMediaPhoto::new(photo).caption(caption.clone()));

    if let Some(photo) = remote_photo(image) {
        match bot
            .edit_message_media(chat_id, msg_id, media(photo))
            .reply_markup(markup.clone())
            .await
        {
            Ok(_) => return true,
            Err(e) if is_benign_edit_error(&e.to_string()) => {
                debug!("Photo update skipped: {e}");
                return false;
            }
            Err(e) => debug!(chat_id = chat_id.0, error = %e, "Image rejected, using placeholder"),
        }
    }

    let edited = crate::utils::retry_telegram_operation(|| async {
        bot.edit_message_media(chat_id, msg_id, media(placeholder_photo()))
            .reply_markup(markup.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Telegram edit media error: {e}"))
    })
    .await;

    match edited {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if is_benign_edit_error(&err_msg) {
                debug!("Photo update skipped: {err_msg}");
            } else {
                warn!("Failed to edit photo after retries: {e}");
            }
            false
        }
    }
}
