use crate::bot;
use crate::bot::handlers::{Command, FlowDialogue, Services};
use crate::bot::state::State;
use crate::config::Settings;
use crate::engine::{FlowRunner, PaginatedFetchEngine};
use crate::http::{HttpFetcher, ReqwestFetcher};
use crate::session::{FlowPhase, MemorySessionStore};
use crate::sources::{Album, Discogs, Kinopoisk, Movie};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{error, info, warn};

/// Run the Telegram bot until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn run_bot(settings: Arc<Settings>) -> anyhow::Result<()> {
    let services = init_services(&settings)?;
    let store = Arc::clone(&services.store);

    let bot = Bot::new(settings.telegram_token.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![store, services])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_services(settings: &Settings) -> anyhow::Result<Arc<Services>> {
    for name in settings.missing_credentials() {
        warn!("{name} is not set, requests needing it go out unauthenticated and will likely fail.");
    }

    let fetcher: Arc<dyn HttpFetcher> = Arc::new(ReqwestFetcher::new(settings.fetcher())?);
    let music = PaginatedFetchEngine::new(
        Discogs::new(settings.discogs()),
        Arc::clone(&fetcher),
        settings.engine(),
    );
    let video = PaginatedFetchEngine::new(
        Kinopoisk::new(settings.kinopoisk()),
        fetcher,
        settings.engine(),
    );

    info!(
        "Initializing session store (max: {}, idle: {}s)",
        settings.session_max_capacity, settings.session_idle_secs
    );
    let store = Arc::new(MemorySessionStore::new(
        settings.session_max_capacity,
        settings.session_idle(),
    ));

    Ok(Arc::new(Services {
        store,
        music: Arc::new(FlowRunner::new(Arc::new(music), settings.orchestrator())),
        video: Arc::new(FlowRunner::new(Arc::new(video), settings.orchestrator())),
        music_budget: settings.discogs_page_budget,
        video_budget: settings.kinopoisk_page_budget,
    }))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .enter_dialogue::<Message, MemorySessionStore<State>, State>()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::case![State::Start]
                        .filter(|msg: Message| msg.text().is_some())
                        .endpoint(handle_start_text),
                )
                .branch(
                    dptree::case![State::VideoAwaitingTitle]
                        .filter(|msg: Message| msg.text().is_some())
                        .endpoint(handle_title),
                )
                .branch(dptree::case![State::Music(phase)].endpoint(handle_music_text))
                .branch(dptree::case![State::Video(phase)].endpoint(handle_video_text)),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogue: FlowDialogue,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg, dialogue).await,
        Command::Help => bot::handlers::help(bot, msg).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_start_text(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_start_text(bot, msg).await {
        error!("Menu handler error: {}", e);
    }
    respond(())
}

async fn handle_title(
    bot: Bot,
    msg: Message,
    dialogue: FlowDialogue,
    services: Arc<Services>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_title(bot, msg, dialogue, services).await {
        error!("Title handler error: {}", e);
    }
    respond(())
}

async fn handle_music_text(
    bot: Bot,
    msg: Message,
    phase: FlowPhase<Album>,
    dialogue: FlowDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_flow_text(bot, msg, phase, dialogue).await {
        error!("Music flow handler error: {}", e);
    }
    respond(())
}

async fn handle_video_text(
    bot: Bot,
    msg: Message,
    phase: FlowPhase<Movie>,
    dialogue: FlowDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_flow_text(bot, msg, phase, dialogue).await {
        error!("Video flow handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    services: Arc<Services>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_callback(bot, q, services).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}
