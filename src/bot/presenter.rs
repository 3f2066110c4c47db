//! Telegram rendering of flow events.

use crate::bot::resilient::{
    edit_message_safe_resilient, send_photo_resilient, send_removing_keyboard_resilient,
    send_with_keyboard_resilient,
};
use crate::bot::views;
use crate::engine::{BrowsePage, FlowError, FlowPresenter};
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

/// Where the chat lands when a flow ends without results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMenu {
    /// Back to the main menu
    Main,
    /// Back to the title prompt
    TitlePrompt,
}

/// [`FlowPresenter`] writing to one chat.
pub struct TelegramFlowPresenter {
    bot: Bot,
    chat_id: ChatId,
    progress_msg: MessageId,
    menu: FlowMenu,
}

impl TelegramFlowPresenter {
    /// Presenter editing `progress_msg` while fetching.
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId, progress_msg: MessageId, menu: FlowMenu) -> Self {
        Self {
            bot,
            chat_id,
            progress_msg,
            menu,
        }
    }

    async fn back_to_menu(&self, notice: String) -> Result<()> {
        match self.menu {
            FlowMenu::Main => {
                send_removing_keyboard_resilient(&self.bot, self.chat_id, notice).await?;
                send_with_keyboard_resilient(
                    &self.bot,
                    self.chat_id,
                    views::START_MESSAGE,
                    views::get_main_keyboard(),
                )
                .await?;
            }
            FlowMenu::TitlePrompt => {
                send_with_keyboard_resilient(
                    &self.bot,
                    self.chat_id,
                    format!("{notice}\n\n{}", views::TRY_AGAIN_MESSAGE),
                    views::get_cancel_keyboard(),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FlowPresenter for TelegramFlowPresenter {
    async fn progress(&self, percent: u8) -> Result<()> {
        edit_message_safe_resilient(
            &self.bot,
            self.chat_id,
            self.progress_msg,
            &views::progress_message(percent),
        )
        .await;
        Ok(())
    }

    async fn browse(&self, page: &BrowsePage) -> Result<()> {
        send_with_keyboard_resilient(
            &self.bot,
            self.chat_id,
            views::END_RESPONSE_MESSAGE,
            views::get_cancel_keyboard(),
        )
        .await?;
        send_photo_resilient(
            &self.bot,
            self.chat_id,
            page.image.as_deref(),
            &views::page_caption(page),
            views::navigation_keyboard(page),
        )
        .await?;
        send_with_keyboard_resilient(
            &self.bot,
            self.chat_id,
            views::MENU_CANCEL_MESSAGE,
            views::get_cancel_keyboard(),
        )
        .await?;
        Ok(())
    }

    async fn cancelled(&self) -> Result<()> {
        self.back_to_menu(views::CANCEL_MESSAGE.to_string()).await
    }

    async fn failed(&self, error: &FlowError) -> Result<()> {
        self.back_to_menu(failure_notice(self.menu, error)).await
    }
}

/// Text explaining why a flow returned to `menu`.
fn failure_notice(menu: FlowMenu, error: &FlowError) -> String {
    match (menu, error) {
        (FlowMenu::TitlePrompt, FlowError::NoMatches) => views::TITLE_NOT_FOUND_MESSAGE.to_string(),
        (FlowMenu::TitlePrompt, FlowError::Empty) => views::NO_RECOMMENDATIONS_MESSAGE.to_string(),
        _ => views::fetch_error_message(error),
    }
}
