//! Menu texts, callback payloads and keyboards.

use crate::engine::{BrowsePage, FlowError};
use crate::http::FetchErrorKind;
use crate::sources::discogs::STYLES;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

// ─────────────────────────────────────────────────────────────────────────────
// Reply buttons and callback payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Main menu button of the music section
pub const MUSIC_BUTTON: &str = "🎧 Mузыка";
/// Main menu button of the video section
pub const VIDEO_BUTTON: &str = "🎦 Видео";
/// Reply button that cancels a fetch or leaves a flow
pub const CANCEL_BUTTON: &str = "Отмена";

/// Music menu: new releases
pub const CALLBACK_NEW_MUSIC: &str = "music new_music";
/// New releases: Discogs
pub const CALLBACK_NEW_MUSIC_DISCOGS: &str = "new_music discogs";
/// Prefix of the style selection payload, followed by the style name
pub const CALLBACK_STYLE_PREFIX: &str = "nm_discogs+";
/// Video menu: viewing advice
pub const CALLBACK_VIEWING_ADVICE: &str = "video viewing_advice";
/// Viewing advice: Kinopoisk
pub const CALLBACK_ADVICE_KINOPOISK: &str = "viewing_advice kinopoisk";

/// Style name carried by a style selection payload.
#[must_use]
pub fn style_from_callback(data: &str) -> Option<&str> {
    data.strip_prefix(CALLBACK_STYLE_PREFIX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Texts
// ─────────────────────────────────────────────────────────────────────────────

/// Greeting shown with the main menu
pub const START_MESSAGE: &str = "👋 Привет! Я помогу найти музыкальные новинки \
     и подобрать фильм на вечер.\n\n👇 Выберите раздел в меню:";
/// Prompt above an inline submenu
pub const OPTIONS_MESSAGE: &str = "📋 Выберите один из вариантов:";
/// Reply to unknown text in the main menu
pub const USE_MENU_MESSAGE: &str = "👇 Воспользуйтесь кнопками меню";
/// Confirms that a flow was left or cancelled
pub const CANCEL_MESSAGE: &str = "❌ Действие отменено";
/// Shown while a cancelled fetch winds down
pub const CANCELLING_MESSAGE: &str = "⏳ Отменяю запрос, подождите немного...";
/// Reply to text typed while a fetch runs
pub const WAIT_AND_CANCEL_MESSAGE: &str =
    "⏳ Запрос обрабатывается, дождитесь результата или нажмите «Отмена»";
/// Reply to text typed while browsing
pub const MENU_CANCEL_MESSAGE: &str =
    "👆 Листайте результаты кнопками под сообщением или нажмите «Отмена», чтобы вернуться в меню";
/// Announces the first page
pub const END_RESPONSE_MESSAGE: &str = "✅ Готово! Вот что удалось найти:";
/// Title prompt of the recommendation flow
pub const TITLE_PROMPT_MESSAGE: &str =
    "🔎 Введите название фильма, для которого хотите найти похожие фильмы";
/// Shown when the seed title matched nothing
pub const TITLE_NOT_FOUND_MESSAGE: &str = "🔎 Фильм для составления рекомендации не был найден";
/// Invitation to try another title
pub const TRY_AGAIN_MESSAGE: &str = "✏️ Попробуйте ввести другое название или нажмите «Отмена»";
/// Shown when the seed title was found but no similar films came back
pub const NO_RECOMMENDATIONS_MESSAGE: &str = "😔 Похожих фильмов подобрать не удалось";
/// Shown when a release search matched nothing
pub const NO_RELEASES_MESSAGE: &str = "😔 Новинок в этом стиле пока не нашлось";

/// Notice sent when a release search starts.
#[must_use]
pub fn releases_wait_message(style: &str) -> String {
    format!(
        "⏳ Ищу новинки в стиле {style}. Это может занять несколько минут.\n\n\
         Для отмены нажмите «Отмена»"
    )
}

/// Notice sent when a recommendation search starts.
#[must_use]
pub fn advice_wait_message(title: &str) -> String {
    format!("⏳ Подбираю фильмы, похожие на «{title}». Для отмены нажмите «Отмена»")
}

/// Progress line of a running fetch.
#[must_use]
pub fn progress_message(percent: u8) -> String {
    format!("📥 Загрузка: {percent}%")
}

/// User-facing text of a failed fetch.
#[must_use]
pub fn fetch_error_message(error: &FlowError) -> String {
    match error {
        FlowError::NoMatches | FlowError::Empty => NO_RELEASES_MESSAGE.to_string(),
        FlowError::Fetch(failure) => match failure.kind() {
            FetchErrorKind::Timeout => "⌛ Сервис слишком долго не отвечает, попробуйте позже".to_string(),
            FetchErrorKind::ClientError => {
                format!("⚠️ Сервис отклонил запрос (код {})", failure.status)
            }
            FetchErrorKind::ServerError => {
                format!("⚠️ Сервис временно недоступен (код {})", failure.status)
            }
            FetchErrorKind::Transport | FetchErrorKind::Decode => {
                "⚠️ Не удалось получить данные, попробуйте позже".to_string()
            }
        },
        FlowError::Aborted(_) => "⚠️ Внутренняя ошибка, попробуйте ещё раз".to_string(),
    }
}

/// Caption of a browse page with its position.
#[must_use]
pub fn page_caption(page: &BrowsePage) -> String {
    format!("{}\n\n📄 {}/{}", page.caption, page.cursor + 1, page.len)
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// Get the main menu keyboard
///
/// # Examples
///
/// ```
/// use mediascout::bot::views::get_main_keyboard;
/// let keyboard = get_main_keyboard();
/// assert!(!keyboard.keyboard.is_empty());
/// ```
#[must_use]
pub fn get_main_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(MUSIC_BUTTON),
        KeyboardButton::new(VIDEO_BUTTON),
    ]])
    .resize_keyboard()
}

/// Get the keyboard with a single cancel button
#[must_use]
pub fn get_cancel_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(CANCEL_BUTTON)]]).resize_keyboard()
}

/// Music section menu
#[must_use]
pub fn music_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🎻 Музыкальные новинки",
        CALLBACK_NEW_MUSIC,
    )]])
}

/// New releases source menu
#[must_use]
pub fn new_music_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "1⃣ discogs",
        CALLBACK_NEW_MUSIC_DISCOGS,
    )]])
}

/// Style selection, two styles per row
#[must_use]
pub fn styles_menu() -> InlineKeyboardMarkup {
    let rows = STYLES
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|(style, label)| {
                    InlineKeyboardButton::callback(*label, format!("{CALLBACK_STYLE_PREFIX}{style}"))
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

/// Video section menu
#[must_use]
pub fn video_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "📚 Совет По Названию Фильма",
        CALLBACK_VIEWING_ADVICE,
    )]])
}

/// Viewing advice source menu
#[must_use]
pub fn viewing_advice_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "1⃣ Kinopoisk",
        CALLBACK_ADVICE_KINOPOISK,
    )]])
}

/// Back/forward controls of a browse page
#[must_use]
pub fn navigation_keyboard(page: &BrowsePage) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("⬅️ Назад", page.prev.clone()),
        InlineKeyboardButton::callback("Вперёд ➡️", page.next.clone()),
    ]])
}
