use async_trait::async_trait;
use mediascout::bot::state::State;
use mediascout::engine::{
    BrowsePage, EngineConfig, FlowError, FlowOutcome, FlowPresenter, FlowRunner, FlowSlot,
    OrchestratorConfig, PaginatedFetchEngine, ResultItem,
};
use mediascout::http::{FetcherConfig, HttpFetcher, ReqwestFetcher};
use mediascout::session::{FlowPhase, MemorySessionStore, SessionStore};
use mediascout::sources::{
    Discogs, DiscogsConfig, DiscogsQuery, Kinopoisk, KinopoiskConfig, KinopoiskQuery,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingPresenter {
    events: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FlowPresenter for RecordingPresenter {
    async fn progress(&self, percent: u8) -> anyhow::Result<()> {
        self.push(format!("progress {percent}"));
        Ok(())
    }

    async fn browse(&self, page: &BrowsePage) -> anyhow::Result<()> {
        self.push(format!("browse {}/{}", page.cursor, page.len));
        Ok(())
    }

    async fn cancelled(&self) -> anyhow::Result<()> {
        self.push("cancelled".to_string());
        Ok(())
    }

    async fn failed(&self, error: &FlowError) -> anyhow::Result<()> {
        self.push(format!("failed {error}"));
        Ok(())
    }
}

fn fetcher() -> Arc<dyn HttpFetcher> {
    match ReqwestFetcher::new(FetcherConfig {
        max_retries: 0,
        timeout: Duration::from_secs(5),
        ..FetcherConfig::default()
    }) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => panic!("client build failed: {err}"),
    }
}

fn quick_engine() -> EngineConfig {
    EngineConfig {
        follow_up_delay: Duration::ZERO,
    }
}

fn quick_loop() -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_millis(10),
    }
}

fn discogs_runner(server: &MockServer) -> FlowRunner<Discogs> {
    let source = Discogs::new(DiscogsConfig {
        search_url: format!("{}/database/search", server.uri()),
        key: Some("k".to_string()),
        secret: Some("s".to_string()),
        follow_up_timeout: Duration::from_secs(5),
    });
    FlowRunner::new(
        Arc::new(PaginatedFetchEngine::new(source, fetcher(), quick_engine())),
        quick_loop(),
    )
}

fn release(title: &str, released: &str, cover: &str) -> Value {
    json!({
        "title": title,
        "artists": [{ "name": "Discharge" }],
        "uri": format!("https://www.discogs.com/release/{title}"),
        "formats": [{ "descriptions": ["LP"] }],
        "released": released,
        "country": "UK",
        "styles": ["Punk"],
        "tracklist": [{}, {}],
        "images": [{ "uri150": cover }]
    })
}

async fn mount_listing(server: &MockServer, releases: usize) {
    let results: Vec<Value> = (0..releases)
        .map(|n| json!({ "master_url": null, "resource_url": format!("{}/releases/{n}", server.uri()) }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/database/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": results })))
        .mount(server)
        .await;
}

fn session_store() -> Arc<MemorySessionStore<State>> {
    Arc::new(MemorySessionStore::new(100, Duration::from_secs(60)))
}

fn slot(store: &Arc<MemorySessionStore<State>>, id: i64) -> FlowSlot<State> {
    let store: Arc<dyn SessionStore<State>> = store.clone();
    FlowSlot::new(store, id)
}

#[tokio::test]
async fn completed_release_search_is_browsable() {
    let server = MockServer::start().await;
    mount_listing(&server, 2).await;
    for (n, (title, date)) in [("Older", "2024-02-01"), ("Newer", "2024-09-01")].iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/releases/{n}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(release(title, date, &format!("https://img/{n}"))),
            )
            .mount(&server)
            .await;
    }

    let runner = discogs_runner(&server);
    let store = session_store();
    let slot = slot(&store, 7);
    let presenter = RecordingPresenter::default();

    let tracker = runner.begin(&slot).await;
    let query = DiscogsQuery {
        style: "Punk".to_string(),
        year: 2024,
    };
    let outcome = runner.run(query, 50, tracker, &slot, &presenter).await;

    let FlowOutcome::Completed(albums) = outcome else {
        panic!("expected a completed flow");
    };
    assert_eq!(albums.len(), 2);
    assert_eq!(albums.get(0).map(|a| a.title.as_str()), Some("Newer"));
    assert!(presenter.events().contains(&"browse 0/2".to_string()));

    let Some(State::Music(FlowPhase::Browsing(stored))) = store.get(7).await else {
        panic!("session should be browsing");
    };
    let browser = runner.browser();
    let page = match browser.navigate(&stored, "discogs next 0") {
        Ok(page) => page,
        Err(err) => panic!("navigation failed: {err}"),
    };
    assert_eq!(page.cursor, 1);
    assert!(page.caption.contains("Older"));
    assert_eq!(page.image.as_deref(), stored.get(1).and_then(ResultItem::image));

    let clamped = browser.navigate(&stored, &page.next).map(|p| p.cursor);
    assert_eq!(clamped, Ok(1));
}

#[tokio::test]
async fn cancelled_search_leaves_no_collection() {
    let server = MockServer::start().await;
    mount_listing(&server, 5).await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"^/releases/\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(release("Slow", "2024-01-01", "https://img/slow"))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let runner = Arc::new(discogs_runner(&server));
    let store = session_store();
    let presenter = Arc::new(RecordingPresenter::default());
    let tracker = runner.begin(&slot(&store, 9)).await;

    let flow = {
        let runner = Arc::clone(&runner);
        let store = Arc::clone(&store);
        let presenter = Arc::clone(&presenter);
        let tracker = tracker.clone();
        tokio::spawn(async move {
            let query = DiscogsQuery {
                style: "Punk".to_string(),
                year: 2024,
            };
            runner
                .run(query, 5, tracker, &slot(&store, 9), presenter.as_ref())
                .await
        })
    };

    for _ in 0..200 {
        if tracker.read().items_completed >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracker.request_cancel();

    let outcome = match flow.await {
        Ok(outcome) => outcome,
        Err(err) => panic!("flow task failed: {err}"),
    };
    assert!(matches!(outcome, FlowOutcome::Cancelled));
    assert!(tracker.read().cancel_requested);
    assert!(tracker.read().items_completed < 5);
    assert!(matches!(store.get(9).await, Some(State::Start)));
    assert_eq!(presenter.events().last().map(String::as_str), Some("cancelled"));
}

#[tokio::test]
async fn unknown_title_returns_to_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.4/movie/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "docs": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let source = Kinopoisk::new(KinopoiskConfig {
        base_url: server.uri(),
        api_key: Some("token".to_string()),
        timeout: Duration::from_secs(5),
    });
    let runner = FlowRunner::new(
        Arc::new(PaginatedFetchEngine::new(source, fetcher(), quick_engine())),
        quick_loop(),
    );
    let store = session_store();
    let slot = slot(&store, 11);
    let presenter = RecordingPresenter::default();

    let tracker = runner.begin(&slot).await;
    let query = KinopoiskQuery {
        title: "Несуществующий фильм".to_string(),
    };
    let outcome = runner.run(query, 50, tracker, &slot, &presenter).await;

    assert!(matches!(outcome, FlowOutcome::Failed(FlowError::NoMatches)));
    assert!(matches!(store.get(11).await, Some(State::VideoAwaitingTitle)));
    assert_eq!(
        presenter.events().last().map(String::as_str),
        Some("failed no matches")
    );
}

#[tokio::test]
async fn known_title_without_similar_films_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.4/movie/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [{ "id": 1, "type": "movie", "genres": [{ "name": "драма" }] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.4/movie"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "docs": [] })))
        .mount(&server)
        .await;

    let source = Kinopoisk::new(KinopoiskConfig {
        base_url: server.uri(),
        api_key: Some("token".to_string()),
        timeout: Duration::from_secs(5),
    });
    let runner = FlowRunner::new(
        Arc::new(PaginatedFetchEngine::new(source, fetcher(), quick_engine())),
        quick_loop(),
    );
    let store = session_store();
    let slot = slot(&store, 12);
    let presenter = RecordingPresenter::default();

    let tracker = runner.begin(&slot).await;
    let query = KinopoiskQuery {
        title: "Сталкер".to_string(),
    };
    let outcome = runner.run(query, 50, tracker, &slot, &presenter).await;

    assert!(matches!(outcome, FlowOutcome::Failed(FlowError::Empty)));
    assert!(matches!(store.get(12).await, Some(State::VideoAwaitingTitle)));
}

#[tokio::test]
async fn listing_outage_resets_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/database/search"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let runner = discogs_runner(&server);
    let store = session_store();
    let slot = slot(&store, 13);
    let presenter = RecordingPresenter::default();

    let tracker = runner.begin(&slot).await;
    let query = DiscogsQuery {
        style: "Punk".to_string(),
        year: 2024,
    };
    let outcome = runner.run(query, 50, tracker, &slot, &presenter).await;

    let FlowOutcome::Failed(FlowError::Fetch(failure)) = outcome else {
        panic!("expected a fetch failure");
    };
    assert_eq!(failure.status, 503);
    assert!(matches!(store.get(13).await, Some(State::Start)));
}
