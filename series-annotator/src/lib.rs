pub mod types;
pub mod traits;
pub mod dom;
pub mod watch;
pub mod cache;
pub mod menu;
pub mod actions;
pub mod reconciler;
pub mod air_date;
pub mod anime_links;
pub mod page;

pub use types::*;
pub use traits::{Disposable, InjectedElement, NavigationEvent, PageNavigator, RecordingNavigator};
pub use dom::{Document, ElementSpec, NodeId, ObserveOptions};
pub use watch::{ChangeBatch, ChangeSignal, ElementWaiter};
pub use cache::{ReferenceCache, SeriesCatalog};
pub use menu::{ButtonMenuRenderer, MenuEntry, MenuRenderer};
pub use actions::{ActionDispatcher, MarkScope, RefreshScheduler, WatchState};
pub use reconciler::{AnnotationOutcome, AnnotationReconciler};
pub use air_date::{AirDateCache, NextAirDate};
pub use anime_links::AnimeListLinks;
pub use page::{series_id_from_url, series_slug_from_url, PageContext, SeriesPage};
