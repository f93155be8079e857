use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use series_annotator::menu::{MARK_AS_WATCHED, MARK_ONLY_THIS_ONE};
use series_annotator::{
    AnnotatorConfig, Disposable, Document, ElementSpec, MenuEntry, NodeId, PageContext,
    RecordingNavigator, SeriesPage,
};
use series_interfaces::BaselineMetadataService;
use tracing::{info, warn};

/// Replays a streaming series page against a catalog fixture and prints the
/// annotations that end up on it.
#[derive(Parser, Debug)]
#[command(name = "series-annotator")]
struct Args {
    /// Catalog JSON served by the in-process metadata service
    #[arg(long, default_value = "fixtures/catalog.json")]
    fixture: PathBuf,

    #[arg(long, default_value = "https://www.example.com/en/series/GRDV0019R/some-show")]
    url: String,

    /// Annotator configuration JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep watches running after their first batch
    #[arg(long)]
    rearm: bool,

    /// Show the next air date under the series hero
    #[arg(long)]
    air_date: bool,

    /// Link the visible season to AniList
    #[arg(long)]
    anilist: bool,

    /// Link the visible season to MyAnimeList
    #[arg(long)]
    myanimelist: bool,

    /// Mark the first card as watched and wait for the page refresh
    #[arg(long)]
    mark_first: bool,
}

#[derive(Debug, Serialize)]
struct CardReport {
    card: String,
    episode_id: String,
    release: String,
    actions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PageReport {
    series_id: String,
    cards: Vec<CardReport>,
    next_air_date: Option<String>,
    tracker_links: Vec<String>,
    navigation: Vec<String>,
}

/// Builds the page skeleton the host renders before any episode is known.
fn render_skeleton(doc: &Document) -> anyhow::Result<NodeId> {
    let layout = doc.insert(doc.root(), &ElementSpec::new("div").class("erc-root-layout"))?;
    let content = doc.insert(
        layout,
        &ElementSpec::new("div")
            .id("content")
            .child(ElementSpec::new("div").class("erc-series-hero-actions")),
    )?;
    doc.insert(
        doc.root(),
        &ElementSpec::new("nav").child(ElementSpec::new("a").attr("href", "https://www.example.com/en/search")),
    )?;
    let navigation = doc.insert(
        content,
        &ElementSpec::new("div")
            .class("erc-season-with-navigation")
            .child(ElementSpec::new("div").class("seasons-select")),
    )?;
    let list = doc.insert(navigation, &ElementSpec::new("div").class("erc-season-episode-list"))?;
    let collection = doc.insert(list, &ElementSpec::new("div").class("erc-playable-collection"))?;
    Ok(collection)
}

fn card_body(href: &str, released: &str) -> ElementSpec {
    ElementSpec::new("div")
        .class("playable-card-hover__body--demo")
        .child(ElementSpec::new("a").attr("href", href))
        .child(
            ElementSpec::new("div")
                .class("playable-card-hover__release--demo")
                .child(ElementSpec::new("span").text(released)),
        )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AnnotatorConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnnotatorConfig::default(),
    }
    .with_env_overrides()?;
    if args.rearm {
        config.rearm_watches = true;
    }
    if args.air_date {
        config.episode_air_date = true;
    }
    config.anime_list_links.anilist |= args.anilist;
    config.anime_list_links.myanimelist |= args.myanimelist;

    let service = Arc::new(BaselineMetadataService::load(&args.fixture)?);
    let navigator = Arc::new(RecordingNavigator::new());
    let doc = Document::new();
    let collection = render_skeleton(&doc)?;
    let context = PageContext::new(doc.clone(), config.clone(), service.clone(), service.clone(), navigator.clone())
        .with_linker(service.clone());

    let Some(mut page) = SeriesPage::open(&context, &args.url)? else {
        bail!("{} is not a series page", args.url);
    };
    info!("Replaying series {}", page.series_id());

    let Some(entry) = service.catalog().series.get(page.series_id()) else {
        bail!("fixture has no series {}", page.series_id());
    };
    let Some(up_next) = entry.up_next.as_ref() else {
        bail!("fixture has no up-next season for {}", page.series_id());
    };
    let season_label = entry
        .seasons
        .iter()
        .find(|season| season.id == up_next.season_id)
        .map(|season| format!("S{}: {}", season.season_sequence_number, season.title))
        .unwrap_or_default();
    let episodes = service
        .catalog()
        .episodes
        .get(&up_next.season_id)
        .cloned()
        .unwrap_or_default();

    // The season selector gets its title once the season list has loaded.
    let select = doc
        .query_selector(doc.root(), &config.selectors.seasons_select)?
        .context("skeleton has no season selector")?;
    doc.insert(select, &ElementSpec::new("h4").text(&season_label))?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The host streams cards in first and fills each one in afterwards.
    let mut cards = Vec::new();
    for _ in &episodes {
        cards.push(doc.insert(collection, &ElementSpec::new("div").class("card"))?);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    for (card, episode) in cards.iter().zip(&episodes) {
        let guid = episode
            .versions
            .first()
            .map_or(episode.id.as_str(), |version| version.guid.as_str());
        let href = format!("https://www.example.com/en/watch/{guid}/episode-{}", episode.sequence_number);
        doc.insert(*card, &card_body(&href, &episode.availability_starts.format("%b %-d, %Y").to_string()))?;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    if args.mark_first {
        match cards.first().and_then(|card| page.reconciler().menu_for(*card)) {
            Some(menu) => {
                if let Some(action) = MenuEntry::find(&menu, &[MARK_AS_WATCHED, MARK_ONLY_THIS_ONE]) {
                    action.run().await?;
                    tokio::time::sleep(config.refresh_window() + Duration::from_millis(100)).await;
                }
            }
            None => warn!("First card carries no annotation"),
        }
    }

    let reconciler = page.reconciler();
    let report = PageReport {
        series_id: page.series_id().to_string(),
        cards: reconciler
            .annotations()
            .into_iter()
            .map(|(card, episode_id)| {
                let release = doc
                    .query_selector(card, "span")
                    .ok()
                    .flatten()
                    .map(|span| doc.text_content(span))
                    .unwrap_or_default();
                let actions = reconciler
                    .menu_for(card)
                    .map(|menu| {
                        MenuEntry::visible_leaves(&menu)
                            .into_iter()
                            .map(|path| path.join("/"))
                            .collect()
                    })
                    .unwrap_or_default();
                CardReport {
                    card: card.to_string(),
                    episode_id,
                    release,
                    actions,
                }
            })
            .collect(),
        next_air_date: page
            .air_date()
            .and_then(|module| module.element())
            .map(|node| doc.text_content(node)),
        tracker_links: page
            .anime_links()
            .and_then(|module| module.element())
            .map(|container| {
                doc.children(container)
                    .into_iter()
                    .filter_map(|link| doc.attribute(link, "href"))
                    .collect()
            })
            .unwrap_or_default(),
        navigation: navigator
            .events()
            .iter()
            .map(|event| format!("{event:?}"))
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    page.dispose();
    info!("Replay finished");
    Ok(())
}
