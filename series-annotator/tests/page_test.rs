use std::sync::Arc;
use std::time::Duration;

use series_annotator::{
    AnimeListSettings, AnnotatorConfig, Disposable, Document, ElementSpec, NodeId, PageContext,
    RecordingNavigator, Result, SeriesPage,
};
use series_interfaces::BaselineMetadataService;
use tracing::info;

const CATALOG: &str = r#"{
    "series": {
        "G1": {
            "seasons": [
                { "id": "s1", "title": "Season 1", "season_sequence_number": 1 },
                { "id": "s2", "title": "Season 2", "season_sequence_number": 2 }
            ],
            "up_next": { "season_id": "s2" }
        }
    },
    "episodes": {
        "s2": [
            { "id": "e1", "sequence_number": 1, "duration_ms": 1000, "availability_starts": "2024-01-06T15:30:00Z" },
            { "id": "e2", "sequence_number": 2, "duration_ms": 2000, "availability_starts": "9998-12-31T00:00:00Z",
              "episode_air_date": "2024-01-13T15:30:00Z" }
        ]
    },
    "airing": {
        "some-show": "2099-01-27T00:00:00Z"
    },
    "anime_lists": {
        "S2: Season 2": [
            { "site": "anilist", "url": "https://anilist.co/anime/2" },
            { "site": "my_anime_list", "url": "https://myanimelist.net/anime/2" }
        ]
    }
}"#;

const SERIES_URL: &str = "https://www.example.com/en/series/G1/some-show";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A series page as first rendered: hero, season navigation and two cards.
fn render_series_page() -> Result<Document> {
    let doc = Document::new();
    let layout = doc.insert(doc.root(), &ElementSpec::new("div").class("erc-root-layout"))?;
    let content = doc.insert(
        layout,
        &ElementSpec::new("div")
            .id("content")
            .child(ElementSpec::new("div").class("erc-series-hero-actions")),
    )?;
    let cards = ["e1", "e2"].map(|id| {
        ElementSpec::new("div").class("card").child(
            ElementSpec::new("div")
                .class("playable-card-hover__body--a")
                .child(ElementSpec::new("a").attr("href", &format!("https://www.example.com/en/watch/{id}/x")))
                .child(
                    ElementSpec::new("div")
                        .class("playable-card-hover__release--b")
                        .child(ElementSpec::new("span").text("Released")),
                ),
        )
    });
    doc.insert(
        content,
        &ElementSpec::new("div")
            .class("erc-season-with-navigation")
            .child(
                ElementSpec::new("div")
                    .class("seasons-select")
                    .child(ElementSpec::new("h4").text("S2: Season 2")),
            )
            .child(
                ElementSpec::new("div")
                    .class("erc-season-episode-list")
                    .child(ElementSpec::new("div").class("erc-playable-collection").children(cards)),
            ),
    )?;
    Ok(doc)
}

fn context(doc: &Document, service: &Arc<BaselineMetadataService>, air_date: bool) -> PageContext {
    let config = AnnotatorConfig {
        episode_air_date: air_date,
        anime_list_links: AnimeListSettings {
            anilist: true,
            myanimelist: false,
        },
        ..AnnotatorConfig::default()
    };
    PageContext::new(
        doc.clone(),
        config,
        service.clone(),
        service.clone(),
        Arc::new(RecordingNavigator::new()),
    )
    .with_linker(service.clone())
}

fn air_date_element(doc: &Document) -> Result<Option<NodeId>> {
    doc.query_selector(doc.root(), ".erc-series-hero-actions > p.next-air-date")
}

fn tracker_links(doc: &Document) -> Result<Vec<String>> {
    Ok(doc
        .query_selector_all(doc.root(), ".seasons-select > .anime-list-link-container > a")?
        .into_iter()
        .filter_map(|link| doc.attribute(link, "href"))
        .collect())
}

#[tokio::test(start_paused = true)]
async fn test_non_series_url_opens_nothing() -> Result<()> {
    init_tracing();

    let doc = render_series_page()?;
    let service = Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"));
    let page = SeriesPage::open(&context(&doc, &service, true), "https://www.example.com/en/watch/e1/x")?;
    settle().await;

    assert!(page.is_none());
    assert_eq!(doc.observer_count(), 0);
    assert!(service.calls().seasons.is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_series_page_annotates_and_shows_air_date() -> Result<()> {
    init_tracing();

    let doc = render_series_page()?;
    let service = Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"));
    let context = context(&doc, &service, true);
    let page = SeriesPage::open(&context, SERIES_URL)?.expect("series page");
    settle().await;

    assert_eq!(page.series_id(), "G1");
    assert_eq!(page.slug(), "some-show");
    assert_eq!(page.reconciler().annotations().len(), 2);

    let element = air_date_element(&doc)?.expect("air date injected");
    assert_eq!(page.air_date().and_then(|module| module.element()), Some(element));
    let text = doc.text_content(element);
    info!("Air date line: {}", text);
    assert!(text.starts_with("Next episode airs "));

    // Both modules share one season list and one episode fetch.
    let calls = service.calls();
    assert_eq!(calls.seasons.len(), 1);
    assert_eq!(service.episode_fetches("s2"), 1);
    assert_eq!(calls.airing, vec!["some-show".to_string()]);
    assert!(context.air_dates.entry("G1").is_some_and(|date| date.is_some()));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_air_date_setting_toggles_module() -> Result<()> {
    init_tracing();

    let doc = render_series_page()?;
    let service = Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"));
    let mut page = SeriesPage::open(&context(&doc, &service, false), SERIES_URL)?.expect("series page");
    settle().await;
    assert!(air_date_element(&doc)?.is_none());

    page.set_episode_air_date(true);
    settle().await;
    assert!(air_date_element(&doc)?.is_some());

    page.set_episode_air_date(false);
    assert!(air_date_element(&doc)?.is_none());
    assert!(page.air_date().is_none());

    // A future date is served from the cache on re-enable.
    page.set_episode_air_date(true);
    settle().await;
    assert!(air_date_element(&doc)?.is_some());
    assert_eq!(service.calls().airing.len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_upcoming_episode_injects_nothing() -> Result<()> {
    init_tracing();

    let doc = render_series_page()?;
    let service = Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"));
    let context = context(&doc, &service, true);
    let page = SeriesPage::open(&context, "https://www.example.com/en/series/G1/other-show")?
        .expect("series page");
    settle().await;

    assert!(page.air_date().is_some());
    assert!(air_date_element(&doc)?.is_none());
    assert_eq!(context.air_dates.entry("G1"), Some(None));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dispose_removes_everything() -> Result<()> {
    init_tracing();

    let doc = render_series_page()?;
    let service = Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"));
    let mut page = SeriesPage::open(&context(&doc, &service, true), SERIES_URL)?.expect("series page");
    settle().await;
    assert!(air_date_element(&doc)?.is_some());

    assert_eq!(tracker_links(&doc)?.len(), 1);

    page.dispose();
    settle().await;

    assert!(air_date_element(&doc)?.is_none());
    assert!(tracker_links(&doc)?.is_empty());
    assert_eq!(doc.observer_count(), 0);
    assert_eq!(page.reconciler().active_watches(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_anime_list_settings_rebuild_links() -> Result<()> {
    init_tracing();

    let doc = render_series_page()?;
    let service = Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"));
    let mut page = SeriesPage::open(&context(&doc, &service, false), SERIES_URL)?.expect("series page");
    settle().await;
    assert_eq!(tracker_links(&doc)?, vec!["https://anilist.co/anime/2".to_string()]);

    page.set_anime_list_links(AnimeListSettings {
        anilist: true,
        myanimelist: true,
    });
    settle().await;
    let links = tracker_links(&doc)?;
    info!("Tracker links: {:?}", links);
    assert_eq!(links.len(), 2);
    assert_eq!(doc.query_selector_all(doc.root(), ".anime-list-link-container")?.len(), 1);

    page.set_anime_list_links(AnimeListSettings::default());
    assert!(tracker_links(&doc)?.is_empty());
    assert!(page.anime_links().is_none());
    assert_eq!(service.calls().anime_lists, vec!["S2: Season 2", "S2: Season 2"]);

    Ok(())
}
