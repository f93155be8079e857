use std::sync::Arc;
use std::time::Duration;

use series_annotator::menu::{
    MARK_ALL_NEXT, MARK_ALL_PREVIOUS, MARK_AS_NOT_WATCHED, MARK_AS_WATCHED, MARK_ONLY_THIS_ONE,
};
use series_annotator::{
    ActionDispatcher, AnnotationReconciler, AnnotatorConfig, ButtonMenuRenderer, Disposable,
    Document, ElementSpec, MenuEntry, NavigationEvent, NodeId, PlayheadUpdate, RecordingNavigator,
    RefreshScheduler, Result, SeriesCatalog,
};
use series_interfaces::defs::MetadataService;
use series_interfaces::{BaselineMetadataService, EmptyMetadataService};
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
        "s1": [
            { "id": "a1", "sequence_number": 1, "duration_ms": 900, "availability_starts": "2023-10-07T14:30:00Z",
              "versions": [{ "guid": "A1V1" }] }
        ],
        "s2": [
            { "id": "e1", "sequence_number": 1, "duration_ms": 1000, "availability_starts": "2024-01-06T15:30:00Z",
              "versions": [{ "guid": "E1V1" }] },
            { "id": "e2", "sequence_number": 2, "duration_ms": 2000, "availability_starts": "2024-01-13T15:30:00Z",
              "versions": [{ "guid": "E2V1" }, { "guid": "E2V2" }] }
        ]
    }
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// Lets every runnable task finish its work under the paused clock.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn watch_href(key: &str) -> String {
    format!("https://www.example.com/en/watch/{key}/some-episode")
}

fn card_body(href: &str) -> ElementSpec {
    ElementSpec::new("div")
        .class("playable-card-hover__body--x1")
        .child(ElementSpec::new("a").attr("href", href))
        .child(
            ElementSpec::new("div")
                .class("playable-card-hover__release--x2")
                .child(ElementSpec::new("span").text("Released")),
        )
}

fn card(href: &str) -> ElementSpec {
    ElementSpec::new("div").class("card").child(card_body(href))
}

fn episode_list(cards: Vec<ElementSpec>) -> ElementSpec {
    ElementSpec::new("div")
        .class("erc-season-episode-list")
        .child(
            ElementSpec::new("div")
                .class("erc-playable-collection")
                .children(cards),
        )
}

struct SeriesDom {
    doc: Document,
    navigation: NodeId,
    label: Option<NodeId>,
}

impl SeriesDom {
    fn render(label: Option<&str>, cards: Vec<ElementSpec>) -> Result<Self> {
        let doc = Document::new();
        let layout = doc.insert(doc.root(), &ElementSpec::new("div").class("erc-root-layout"))?;
        let navigation = doc.insert(layout, &ElementSpec::new("div").class("erc-season-with-navigation"))?;
        let label = match label {
            Some(text) => {
                let select = doc.insert(
                    navigation,
                    &ElementSpec::new("div")
                        .class("seasons-select")
                        .child(ElementSpec::new("h4").text(text)),
                )?;
                doc.query_selector(select, "h4")?
            }
            None => None,
        };
        doc.insert(navigation, &episode_list(cards))?;
        Ok(Self { doc, navigation, label })
    }

    fn collection(&self) -> Result<NodeId> {
        Ok(self
            .doc
            .query_selector(self.navigation, ".erc-playable-collection")?
            .expect("collection rendered"))
    }

    fn cards(&self) -> Result<Vec<NodeId>> {
        self.doc.query_selector_all(self.navigation, ".card")
    }

    /// Replaces the visible season the way the host does: a new label and a
    /// fresh episode list swapped in within one tick.
    fn switch_season(&self, label: &str, cards: Vec<ElementSpec>) -> Result<()> {
        if let Some(h4) = self.label {
            self.doc.set_text_content(h4, label)?;
        }
        let old = self.doc.query_selector(self.navigation, ".erc-season-episode-list")?;
        if let Some(old) = old {
            self.doc.remove_child(self.navigation, old);
        }
        self.doc.insert(self.navigation, &episode_list(cards))?;
        Ok(())
    }
}

struct Harness {
    reconciler: AnnotationReconciler,
    navigator: Arc<RecordingNavigator>,
}

fn start(dom: &SeriesDom, service: Arc<dyn MetadataService>, config: AnnotatorConfig) -> Harness {
    let navigator = Arc::new(RecordingNavigator::new());
    let catalog = Arc::new(SeriesCatalog::new("G1", service.clone()));
    let refresh = RefreshScheduler::new(dom.doc.clone(), &config, navigator.clone());
    let reconciler = AnnotationReconciler::start(
        dom.doc.clone(),
        config,
        catalog,
        ActionDispatcher::new(service, refresh),
        Arc::new(ButtonMenuRenderer),
    );
    Harness { reconciler, navigator }
}

fn baseline() -> Arc<BaselineMetadataService> {
    Arc::new(BaselineMetadataService::from_json(CATALOG).expect("catalog parses"))
}

fn rearming() -> AnnotatorConfig {
    AnnotatorConfig {
        rearm_watches: true,
        ..AnnotatorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_mark_first_episode_watched() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(
        Some("S2: Season 2"),
        vec![card(&watch_href("e1")), card(&watch_href("e2"))],
    )?;
    let service = baseline();
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;

    let cards = dom.cards()?;
    assert_eq!(
        h.reconciler.annotations(),
        vec![(cards[0], "e1".to_string()), (cards[1], "e2".to_string())]
    );
    info!("Annotated {} cards", cards.len());

    let menu = h.reconciler.menu_for(cards[0]).expect("e1 carries a menu");
    let leaves = MenuEntry::visible_leaves(&menu);
    assert!(!leaves.contains(&vec![MARK_AS_WATCHED, MARK_ALL_PREVIOUS]));
    assert!(leaves.contains(&vec![MARK_AS_NOT_WATCHED, MARK_ALL_NEXT]));

    MenuEntry::find(&menu, &[MARK_AS_WATCHED, MARK_ONLY_THIS_ONE])
        .expect("action exists")
        .run()
        .await?;
    assert_eq!(
        service.calls().playheads,
        vec![vec![PlayheadUpdate { id: "e1".to_string(), playhead_ms: 1000 }]]
    );

    assert!(h.navigator.events().is_empty());
    tokio::time::sleep(Duration::from_millis(2600)).await;
    assert_eq!(h.navigator.events(), vec![NavigationEvent::Reload]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mark_all_previous_is_one_batched_call() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(
        Some("S2: Season 2"),
        vec![card(&watch_href("e1")), card(&watch_href("e2"))],
    )?;
    let service = baseline();
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;

    let e2_card = dom.cards()?[1];
    let menu = h.reconciler.menu_for(e2_card).expect("e2 carries a menu");
    assert!(MenuEntry::find(&menu, &[MARK_AS_NOT_WATCHED, MARK_ALL_NEXT])
        .is_some_and(|entry| !entry.is_visible()));

    MenuEntry::find(&menu, &[MARK_AS_WATCHED, MARK_ALL_PREVIOUS])
        .expect("action exists")
        .run()
        .await?;

    assert_eq!(
        service.calls().playheads,
        vec![vec![
            PlayheadUpdate { id: "e1".to_string(), playhead_ms: 1000 },
            PlayheadUpdate { id: "e2".to_string(), playhead_ms: 2000 },
        ]]
    );
    tokio::time::sleep(Duration::from_millis(2600)).await;
    assert_eq!(h.navigator.refreshes(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cards_correlate_through_version_guids() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(
        Some("S2: Season 2"),
        vec![card(&watch_href("E2V2")), card(&watch_href("UNKNOWN"))],
    )?;
    let h = start(&dom, baseline(), AnnotatorConfig::default());
    settle().await;

    let cards = dom.cards()?;
    assert_eq!(h.reconciler.annotated_episode(cards[0]).as_deref(), Some("e2"));
    assert_eq!(h.reconciler.annotated_episode(cards[1]), None);
    assert_eq!(dom.doc.query_selector_all(cards[1], ".ic_action")?.len(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_annotation_appends_menu_and_release_time() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), vec![card(&watch_href("e1"))])?;
    let h = start(&dom, baseline(), AnnotatorConfig::default());
    settle().await;

    let card = dom.cards()?[0];
    let release = dom
        .doc
        .query_selector(card, "[class^='playable-card-hover__release']")?
        .expect("release rendered");
    let menu = dom.doc.query_selector(release, ".action-menu.ic_action")?;
    assert!(menu.is_some());

    let span = dom.doc.query_selector(release, "span")?.expect("span rendered");
    let text = dom.doc.text_content(span);
    assert!(text.starts_with("Released - "), "unexpected release text {text:?}");
    assert_eq!(text.matches(':').count(), 2);

    assert_eq!(
        h.reconciler.annotate(card, &Arc::new(Vec::new()))?,
        series_annotator::AnnotationOutcome::AlreadyAnnotated
    );
    assert_eq!(dom.doc.query_selector_all(card, ".ic_action")?.len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_streamed_cards_are_annotated_once_per_watch() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), Vec::new())?;
    let service = baseline();
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;

    let collection = dom.collection()?;
    dom.doc.insert(collection, &card(&watch_href("e1")))?;
    dom.doc.insert(collection, &card(&watch_href("E2V1")))?;
    settle().await;
    assert_eq!(h.reconciler.annotations().len(), 2);

    // The collection watch handled its batch and is not re-armed.
    let late = dom.doc.insert(collection, &card(&watch_href("e1")))?;
    settle().await;
    assert_eq!(h.reconciler.annotated_episode(late), None);
    assert_eq!(service.episode_fetches("s2"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rearmed_collection_keeps_annotating() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), Vec::new())?;
    let service = baseline();
    let h = start(&dom, service.clone(), rearming());
    settle().await;

    let collection = dom.collection()?;
    for key in ["e1", "E2V1", "e1"] {
        dom.doc.insert(collection, &card(&watch_href(key)))?;
        settle().await;
    }

    assert_eq!(h.reconciler.annotations().len(), 3);
    assert_eq!(service.episode_fetches("s2"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cards_filling_in_later_are_annotated() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(
        Some("S2: Season 2"),
        vec![ElementSpec::new("div").class("card")],
    )?;
    let h = start(&dom, baseline(), AnnotatorConfig::default());
    settle().await;

    let card = dom.cards()?[0];
    assert!(h.reconciler.annotations().is_empty());

    dom.doc.insert(card, &card_body(&watch_href("e2")))?;
    settle().await;
    assert_eq!(h.reconciler.annotated_episode(card).as_deref(), Some("e2"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_season_switch_reannotates_once() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S1: Season 1"), vec![card(&watch_href("a1"))])?;
    let service = baseline();
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;
    assert_eq!(h.reconciler.annotations().len(), 1);

    dom.switch_season("S2: Season 2", vec![card(&watch_href("e1")), card(&watch_href("e2"))])?;
    settle().await;
    let switched = dom.cards()?;
    assert_eq!(switched.len(), 2);
    for card in &switched {
        assert!(h.reconciler.annotated_episode(*card).is_some());
    }

    // Without re-arming only the first switch is seen.
    dom.switch_season("S1: Season 1", vec![card(&watch_href("a1"))])?;
    settle().await;
    let back = dom.cards()?[0];
    assert_eq!(h.reconciler.annotated_episode(back), None);

    assert_eq!(service.episode_fetches("s1"), 1);
    assert_eq!(service.episode_fetches("s2"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rearmed_season_watch_follows_every_switch() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S1: Season 1"), vec![card(&watch_href("a1"))])?;
    let service = baseline();
    let h = start(&dom, service.clone(), rearming());
    settle().await;

    dom.switch_season("S2: Season 2", vec![card(&watch_href("e1"))])?;
    settle().await;
    dom.switch_season("S1: Season 1", vec![card(&watch_href("A1V1"))])?;
    settle().await;

    let back = dom.cards()?[0];
    assert_eq!(h.reconciler.annotated_episode(back).as_deref(), Some("a1"));
    assert_eq!(service.episode_fetches("s1"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_up_next_season_without_label() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(None, vec![card(&watch_href("e1"))])?;
    let service = baseline();
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;

    assert_eq!(h.reconciler.annotations().len(), 1);
    assert_eq!(service.calls().up_next, vec!["G1".to_string()]);
    assert!(service.calls().seasons.is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_season_navigation() -> Result<()> {
    init_tracing();

    let doc = Document::new();
    let layout = doc.insert(doc.root(), &ElementSpec::new("div").class("erc-root-layout"))?;
    let dom = SeriesDom {
        doc: doc.clone(),
        navigation: layout,
        label: None,
    };
    let h = start(&dom, baseline(), AnnotatorConfig::default());
    settle().await;

    doc.insert(
        layout,
        &ElementSpec::new("div")
            .class("erc-season-with-navigation")
            .child(episode_list(vec![card(&watch_href("e2"))])),
    )?;
    settle().await;

    assert_eq!(h.reconciler.annotations().len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_season_fetch_leaves_cards_unannotated() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), vec![card(&watch_href("e1"))])?;
    let service = baseline();
    service.fail_episodes_for("s2");
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;

    assert!(h.reconciler.annotations().is_empty());
    assert_eq!(service.episode_fetches("s2"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_initial_season_still_follows_switches() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), vec![card(&watch_href("e1"))])?;
    let service = baseline();
    service.fail_episodes_for("s2");
    let h = start(&dom, service.clone(), AnnotatorConfig::default());
    settle().await;
    assert!(h.reconciler.annotations().is_empty());

    dom.switch_season("S1: Season 1", vec![card(&watch_href("a1"))])?;
    settle().await;

    let switched = dom.cards()?[0];
    assert_eq!(h.reconciler.annotated_episode(switched).as_deref(), Some("a1"));
    assert_eq!(service.episode_fetches("s1"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failing_season_does_not_affect_others() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S1: Season 1"), vec![card(&watch_href("a1"))])?;
    let service = baseline();
    service.fail_episodes_for("s2");
    let h = start(&dom, service.clone(), rearming());
    settle().await;
    assert_eq!(h.reconciler.annotations().len(), 1);

    dom.switch_season("S2: Season 2", vec![card(&watch_href("e1"))])?;
    settle().await;
    assert!(h.reconciler.annotations().is_empty());
    assert_eq!(dom.doc.query_selector_all(dom.doc.root(), ".ic_action")?.len(), 0);

    dom.switch_season("S1: Season 1", vec![card(&watch_href("A1V1"))])?;
    settle().await;
    let back = dom.cards()?[0];
    assert_eq!(h.reconciler.annotated_episode(back).as_deref(), Some("a1"));
    assert_eq!(service.episode_fetches("s2"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_switched_out_cards_are_forgotten() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S1: Season 1"), vec![card(&watch_href("a1"))])?;
    let h = start(&dom, baseline(), rearming());
    settle().await;
    let first = dom.cards()?[0];
    assert!(h.reconciler.menu_for(first).is_some());
    // Season, collection and one card.
    assert_eq!(h.reconciler.active_watches(), 3);

    for round in 0..5 {
        if round % 2 == 0 {
            dom.switch_season("S2: Season 2", vec![card(&watch_href("e1"))])?;
        } else {
            dom.switch_season("S1: Season 1", vec![card(&watch_href("a1"))])?;
        }
        settle().await;
    }

    let live = dom.cards()?;
    assert_eq!(live.len(), 1);
    assert_eq!(h.reconciler.annotations(), vec![(live[0], "e1".to_string())]);
    assert!(h.reconciler.menu_for(first).is_none());
    assert_eq!(h.reconciler.active_watches(), 3);
    assert_eq!(dom.doc.observer_count(), 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_service_annotates_nothing() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), vec![card(&watch_href("e1"))])?;
    let h = start(&dom, Arc::new(EmptyMetadataService), AnnotatorConfig::default());
    settle().await;

    assert!(h.reconciler.annotations().is_empty());
    assert_eq!(dom.doc.query_selector_all(dom.doc.root(), ".ic_action")?.len(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dispose_tears_down_watches() -> Result<()> {
    init_tracing();

    let dom = SeriesDom::render(Some("S2: Season 2"), Vec::new())?;
    let mut h = start(&dom, baseline(), rearming());
    settle().await;
    assert!(h.reconciler.active_watches() > 0);
    assert!(dom.doc.observer_count() > 0);

    h.reconciler.dispatcher().refresh().request();
    h.reconciler.dispose();
    settle().await;
    assert_eq!(h.reconciler.active_watches(), 0);
    assert_eq!(dom.doc.observer_count(), 0);

    dom.doc.insert(dom.collection()?, &card(&watch_href("e1")))?;
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert!(h.reconciler.annotations().is_empty());
    assert!(h.navigator.events().is_empty());

    Ok(())
}
