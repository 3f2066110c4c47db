use crate::bot::presenter::{FlowMenu, TelegramFlowPresenter};
use crate::bot::resilient::{
    edit_photo_safe_resilient, send_message_resilient, send_removing_keyboard_resilient,
    send_with_keyboard_resilient,
};
use crate::bot::state::State;
use crate::bot::views;
use crate::engine::{ContentSource, FlowRunner, FlowSlot, ResultCollection, SessionBrowser};
use crate::session::{FlowPhase, FlowState, MemorySessionStore, SessionStore};
use crate::sources::discogs::is_known_style;
use crate::sources::{Discogs, DiscogsQuery, Kinopoisk, KinopoiskQuery};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{ChatId, MessageId},
    utils::command::BotCommands,
};
use tracing::{debug, info, warn};

/// Dialogue handle of a chat
pub type FlowDialogue = Dialogue<State, MemorySessionStore<State>>;

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Поддерживаемые команды:")]
pub enum Command {
    /// Show the main menu, leaving any running flow
    #[command(description = "главное меню.")]
    Start,
    /// List the commands
    #[command(description = "список команд.")]
    Help,
}

/// Everything the handlers need to start and browse flows.
pub struct Services {
    /// Shared session store (also the dialogue storage)
    pub store: Arc<MemorySessionStore<State>>,
    /// Discogs flows
    pub music: Arc<FlowRunner<Discogs>>,
    /// Kinopoisk flows
    pub video: Arc<FlowRunner<Kinopoisk>>,
    /// Albums collected per search
    pub music_budget: usize,
    /// Titles collected per recommendation
    pub video_budget: usize,
}

impl Services {
    fn slot(&self, chat_id: ChatId) -> FlowSlot<State> {
        let store: Arc<dyn SessionStore<State>> = self.store.clone();
        FlowSlot::new(store, chat_id.0)
    }
}

/// Tracker of the fetch running in `state`, if any.
fn running_fetch(state: &State) -> Option<&crate::engine::ProgressTracker> {
    match state {
        State::Music(FlowPhase::Fetching(tracker)) | State::Video(FlowPhase::Fetching(tracker)) => {
            Some(tracker)
        }
        _ => None,
    }
}

async fn show_main_menu(bot: &Bot, chat_id: ChatId) -> Result<()> {
    send_with_keyboard_resilient(bot, chat_id, views::START_MESSAGE, views::get_main_keyboard())
        .await?;
    Ok(())
}

async fn leave_flow(bot: &Bot, chat_id: ChatId, dialogue: &FlowDialogue) -> Result<()> {
    dialogue.update(State::Start).await?;
    send_removing_keyboard_resilient(bot, chat_id, views::CANCEL_MESSAGE).await?;
    show_main_menu(bot, chat_id).await
}

/// Start handler
///
/// A fetch still running in the chat is cancelled; its outcome is dropped.
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(bot: Bot, msg: Message, dialogue: FlowDialogue) -> Result<()> {
    if let Some(state) = dialogue.get().await? {
        if let Some(tracker) = running_fetch(&state) {
            info!(chat_id = msg.chat.id.0, "Restart requested during fetch, cancelling");
            tracker.request_cancel();
        }
    }
    dialogue.update(State::Start).await?;
    show_main_menu(&bot, msg.chat.id).await
}

/// Help handler
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, Command::descriptions().to_string(), None).await?;
    Ok(())
}

/// Main menu text: opens the music or video section.
///
/// # Errors
///
/// Returns an error if the menu cannot be sent.
pub async fn handle_start_text(bot: Bot, msg: Message) -> Result<()> {
    let chat_id = msg.chat.id;
    match msg.text().unwrap_or_default() {
        views::MUSIC_BUTTON => {
            bot.send_message(chat_id, views::OPTIONS_MESSAGE)
                .reply_markup(views::music_menu())
                .await?;
        }
        views::VIDEO_BUTTON => {
            bot.send_message(chat_id, views::OPTIONS_MESSAGE)
                .reply_markup(views::video_menu())
                .await?;
        }
        _ => {
            send_with_keyboard_resilient(
                &bot,
                chat_id,
                views::USE_MENU_MESSAGE,
                views::get_main_keyboard(),
            )
            .await?;
        }
    }
    Ok(())
}

/// Text typed while a flow of type `I` is active.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent or the state cannot be updated.
pub async fn handle_flow_text<I>(
    bot: Bot,
    msg: Message,
    phase: FlowPhase<I>,
    dialogue: FlowDialogue,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let cancel = msg.text() == Some(views::CANCEL_BUTTON);

    match phase {
        FlowPhase::Fetching(tracker) if cancel => {
            info!(chat_id = chat_id.0, "Cancel requested");
            tracker.request_cancel();
            send_removing_keyboard_resilient(&bot, chat_id, views::CANCELLING_MESSAGE).await?;
        }
        FlowPhase::Fetching(_) => {
            send_message_resilient(&bot, chat_id, views::WAIT_AND_CANCEL_MESSAGE, None).await?;
        }
        FlowPhase::Browsing(_) if cancel => leave_flow(&bot, chat_id, &dialogue).await?,
        FlowPhase::Browsing(_) => {
            send_message_resilient(&bot, chat_id, views::MENU_CANCEL_MESSAGE, None).await?;
        }
        FlowPhase::Idle => {
            dialogue.update(State::Start).await?;
            show_main_menu(&bot, chat_id).await?;
        }
    }
    Ok(())
}

/// Title typed at the recommendation prompt.
///
/// # Errors
///
/// Returns an error if the flow cannot be announced.
pub async fn handle_title(
    bot: Bot,
    msg: Message,
    dialogue: FlowDialogue,
    services: Arc<Services>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let title = msg.text().unwrap_or_default().trim().to_string();

    if title == views::CANCEL_BUTTON {
        return leave_flow(&bot, chat_id, &dialogue).await;
    }
    if title.is_empty() {
        send_message_resilient(&bot, chat_id, views::TITLE_PROMPT_MESSAGE, None).await?;
        return Ok(());
    }

    info!(chat_id = chat_id.0, title = %title, "Recommendation requested");
    send_with_keyboard_resilient(
        &bot,
        chat_id,
        views::advice_wait_message(&title),
        views::get_cancel_keyboard(),
    )
    .await?;
    let runner = Arc::clone(&services.video);
    spawn_flow(
        bot,
        chat_id,
        &services,
        runner,
        KinopoiskQuery { title },
        services.video_budget,
        FlowMenu::TitlePrompt,
    )
    .await
}

async fn start_music_flow(bot: Bot, chat_id: ChatId, style: &str, services: &Arc<Services>) -> Result<()> {
    info!(chat_id = chat_id.0, style = %style, "New releases requested");
    send_with_keyboard_resilient(
        &bot,
        chat_id,
        views::releases_wait_message(style),
        views::get_cancel_keyboard(),
    )
    .await?;
    let runner = Arc::clone(&services.music);
    spawn_flow(
        bot,
        chat_id,
        services,
        runner,
        DiscogsQuery::this_year(style),
        services.music_budget,
        FlowMenu::Main,
    )
    .await
}

/// Enters the fetching phase and runs the flow off the update handler, so
/// the next update of the chat (e.g. cancel) is handled while it runs.
async fn spawn_flow<S>(
    bot: Bot,
    chat_id: ChatId,
    services: &Arc<Services>,
    runner: Arc<FlowRunner<S>>,
    query: S::Query,
    budget: usize,
    menu: FlowMenu,
) -> Result<()>
where
    S: ContentSource,
    State: FlowState<S::Item>,
{
    let progress = send_message_resilient(&bot, chat_id, views::progress_message(0), None).await?;
    let slot = services.slot(chat_id);
    let tracker = runner.begin(&slot).await;
    let presenter = TelegramFlowPresenter::new(bot, chat_id, progress.id, menu);

    tokio::spawn(async move {
        runner.run(query, budget, tracker, &slot, &presenter).await;
    });
    Ok(())
}

/// Inline button handler: menus, style selection and page navigation.
///
/// # Errors
///
/// Returns an error if a Telegram call fails.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, services: Arc<Services>) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    let msg_id = message.id();
    let state = services.store.get(chat_id.0).await.unwrap_or_default();

    if services.music.browser().owns(data) || services.video.browser().owns(data) {
        return navigate(&bot, chat_id, msg_id, &state, &services, data).await;
    }
    if !matches!(state, State::Start) {
        debug!(chat_id = chat_id.0, data, "Menu button outside the main menu ignored");
        return Ok(());
    }

    // Menus are single-use.
    if let Err(e) = bot.edit_message_reply_markup(chat_id, msg_id).await {
        debug!("Could not remove menu buttons: {e}");
    }

    match data {
        views::CALLBACK_NEW_MUSIC => send_menu(&bot, chat_id, views::new_music_menu()).await,
        views::CALLBACK_NEW_MUSIC_DISCOGS => send_menu(&bot, chat_id, views::styles_menu()).await,
        views::CALLBACK_VIEWING_ADVICE => {
            send_menu(&bot, chat_id, views::viewing_advice_menu()).await
        }
        views::CALLBACK_ADVICE_KINOPOISK => {
            services.store.set(chat_id.0, State::VideoAwaitingTitle).await;
            send_with_keyboard_resilient(
                &bot,
                chat_id,
                views::TITLE_PROMPT_MESSAGE,
                views::get_cancel_keyboard(),
            )
            .await?;
            Ok(())
        }
        other => match views::style_from_callback(other) {
            Some(style) if is_known_style(style) => {
                start_music_flow(bot, chat_id, style, &services).await
            }
            _ => {
                warn!(chat_id = chat_id.0, data = other, "Unknown callback");
                Ok(())
            }
        },
    }
}

async fn send_menu(bot: &Bot, chat_id: ChatId, menu: teloxide::types::InlineKeyboardMarkup) -> Result<()> {
    bot.send_message(chat_id, views::OPTIONS_MESSAGE)
        .reply_markup(menu)
        .await?;
    Ok(())
}

async fn navigate(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    state: &State,
    services: &Services,
    data: &str,
) -> Result<()> {
    match state {
        State::Music(FlowPhase::Browsing(albums)) if services.music.browser().owns(data) => {
            show_page(bot, chat_id, msg_id, services.music.browser(), albums, data).await;
        }
        State::Video(FlowPhase::Browsing(movies)) if services.video.browser().owns(data) => {
            show_page(bot, chat_id, msg_id, services.video.browser(), movies, data).await;
        }
        _ => debug!(chat_id = chat_id.0, data, "Navigation outside its browse session ignored"),
    }
    Ok(())
}

async fn show_page<I: crate::engine::ResultItem>(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    browser: &SessionBrowser,
    collection: &ResultCollection<I>,
    data: &str,
) {
    match browser.navigate(collection, data) {
        Ok(page) => {
            edit_photo_safe_resilient(
                bot,
                chat_id,
                msg_id,
                page.image.as_deref(),
                &views::page_caption(&page),
                views::navigation_keyboard(&page),
            )
            .await;
        }
        Err(e) => warn!(chat_id = chat_id.0, error = %e, "Navigation rejected"),
    }
}
