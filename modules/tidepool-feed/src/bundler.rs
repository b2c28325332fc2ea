//! Category bundles: candidate series grouped per `(host, category)` and
//! diffed against the user's last-seen category version, emitted as
//! synthetic feed items the ranker treats like any other candidate.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};

use tidepool_common::types::{
    BundleInfo, BundleItem, BundleStateRef, ContentItem, ContentStats, EventCategory,
    EventSeries,
};
use tidepool_common::util::mean_vector;
use tidepool_common::Window;
use tidepool_store::{BundleStateStore, CategoryStore, SeriesStore};

#[derive(Clone)]
pub struct Bundler {
    categories: CategoryStore,
    series: SeriesStore,
    bundle_states: BundleStateStore,
}

impl Bundler {
    pub fn new(
        categories: CategoryStore,
        series: SeriesStore,
        bundle_states: BundleStateStore,
    ) -> Self {
        Self {
            categories,
            series,
            bundle_states,
        }
    }

    /// Fold candidate series into per-category bundle items. Candidates
    /// carry their engagement stats so the bundle can sum them. Series
    /// without a host or category pass through ungrouped; bundles the user
    /// is fully caught up on are dropped entirely.
    pub async fn bundle_series(
        &self,
        user_id: &str,
        candidates: Vec<(EventSeries, ContentStats)>,
        window: Window,
    ) -> Result<(Vec<ContentItem>, Vec<(EventSeries, ContentStats)>)> {
        let mut grouped: BTreeMap<String, Vec<(EventSeries, ContentStats)>> = BTreeMap::new();
        let mut ungrouped = Vec::new();
        for (series, stats) in candidates {
            match series.category_id.clone() {
                Some(category_id) if !series.host.id.is_empty() => {
                    grouped.entry(category_id).or_default().push((series, stats));
                }
                _ => ungrouped.push((series, stats)),
            }
        }

        let category_ids: Vec<String> = grouped.keys().cloned().collect();
        let states = self.bundle_states.get_many(user_id, &category_ids).await?;
        let mut categories: BTreeMap<String, EventCategory> = self
            .categories
            .get_many(&category_ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut bundles = Vec::new();
        for category_id in category_ids {
            let group = grouped.remove(&category_id).unwrap_or_default();
            let Some(category) = categories.remove(&category_id) else {
                // Category vanished; let the member series flow ungrouped.
                ungrouped.extend(group);
                continue;
            };
            let member_stats: HashMap<String, ContentStats> = group
                .into_iter()
                .map(|(series, stats)| (series.id, stats))
                .collect();

            // Hydrate the full member set, keep those visible in the window,
            // ordered by earliest upcoming occurrence.
            let mut members = self.series.get_many(&category.series_ids).await?;
            members.retain(|s| s.next_start_time.is_some_and(|t| window.contains(t)));
            members.sort_by(|a, b| {
                a.next_start_time
                    .cmp(&b.next_start_time)
                    .then_with(|| a.id.cmp(&b.id))
            });
            if members.is_empty() {
                continue;
            }

            let last_seen = states.get(&category_id).map(|s| s.last_seen_version);
            let member_ids: Vec<String> = members.iter().map(|s| s.id.clone()).collect();
            let new_series_ids = diff_new_series(&category, last_seen);
            if last_seen.is_some() && new_series_ids.is_empty() {
                continue; // seen before and nothing new
            }

            let display_series = if last_seen.is_none() {
                member_ids.clone()
            } else {
                new_series_ids.clone()
            };

            bundles.push(build_bundle_item(
                &category,
                &members,
                &member_stats,
                member_ids,
                new_series_ids,
                display_series,
            ));
        }

        Ok((bundles, ungrouped))
    }
}

/// Which series are new since `last_seen`? Never seen means everything.
/// A truncated changeLog that can no longer explain the version delta falls
/// back to the full set rather than claiming "nothing new".
fn diff_new_series(category: &EventCategory, last_seen: Option<u32>) -> Vec<String> {
    let member_ids = &category.series_ids;
    let Some(last_seen) = last_seen else {
        return member_ids.clone();
    };

    let mut added: Vec<String> = category
        .change_log
        .iter()
        .filter(|entry| entry.version > last_seen)
        .flat_map(|entry| entry.added_series_ids.iter().cloned())
        .filter(|id| member_ids.contains(id))
        .collect();
    let mut seen = std::collections::HashSet::new();
    added.retain(|id| seen.insert(id.clone()));

    if added.is_empty() && category.version > last_seen {
        return member_ids.clone();
    }
    added
}

fn build_bundle_item(
    category: &EventCategory,
    members: &[EventSeries],
    member_stats: &HashMap<String, ContentStats>,
    member_ids: Vec<String>,
    new_series_ids: Vec<String>,
    display_series: Vec<String>,
) -> ContentItem {
    let host_name = members
        .first()
        .map(|s| s.host.name.clone())
        .unwrap_or_default();
    let host_id = members
        .first()
        .map(|s| s.host.id.clone())
        .unwrap_or_default();

    let mut tags: Vec<String> = Vec::new();
    for series in members {
        for tag in &series.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }

    let vectors: Vec<Vec<f32>> = members.iter().filter_map(|s| s.vector.clone()).collect();
    let embedding = mean_vector(&vectors);

    // Element-wise sum of member engagement; hydrated members that were not
    // in the candidate set contribute zeros.
    let stats = ContentStats::sum(
        members
            .iter()
            .map(|s| member_stats.get(&s.id).copied().unwrap_or_default()),
    );

    let total_series_count = member_ids.len();
    ContentItem::Bundle(Box::new(BundleItem {
        id: format!("bundle:{}", category.id),
        title: format!("{} · {}", category.name, host_name),
        tags,
        embedding,
        created_at: category.updated_at,
        stats,
        bundle: BundleInfo {
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            host_id,
            host_name,
            series_ids: member_ids,
            new_series_ids,
            display_series,
            total_series_count,
            bundle_state: BundleStateRef {
                category_id: category.id.clone(),
                version: category.version,
            },
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tidepool_common::types::{
        build_series_id, ChangeLogEntry, ContentType, EventSource, Occurrence, SeriesHost,
        SeriesStats,
    };
    use tidepool_store::{DocumentStore, MemoryStore};

    fn now() -> DateTime<Utc> {
        "2026-07-10T12:00:00Z".parse().unwrap()
    }

    fn window() -> Window {
        Window::new(now(), "2026-07-20T00:00:00Z".parse().unwrap()).unwrap()
    }

    fn series(title: &str, category: Option<(&str, &str)>, next: &str) -> EventSeries {
        let next_start: DateTime<Utc> = next.parse().unwrap();
        let occurrence = Occurrence {
            event_id: format!("s1:{}", title.to_lowercase()),
            title: title.to_string(),
            start_time: next_start,
            end_time: None,
            location: None,
            tags: vec![],
        };
        EventSeries {
            id: build_series_id("host:abc", title),
            title: title.to_string(),
            description: None,
            summary: None,
            content_type: ContentType::EventSeries,
            host: SeriesHost {
                id: "host:abc".to_string(),
                name: "Parks Dept".to_string(),
                organizer: None,
                source_ids: vec!["s1".to_string()],
            },
            tags: vec![format!("{}-tag", title.to_lowercase())],
            breadcrumbs: vec![],
            source: EventSource {
                source_id: "s1".to_string(),
                source_event_id: title.to_lowercase(),
                source_url: None,
            },
            venue: None,
            category_id: category.map(|(id, _)| id.to_string()),
            category_name: category.map(|(_, name)| name.to_string()),
            category_slug: None,
            upcoming_occurrences: vec![occurrence.clone()],
            next_occurrence: Some(occurrence),
            next_start_time: Some(next_start),
            vector: Some(vec![1.0, 0.0]),
            stats: SeriesStats { upcoming_count: 1 },
            created_at: now(),
            updated_at: now(),
        }
    }

    struct Fixture {
        bundler: Bundler,
        states: BundleStateStore,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let categories = CategoryStore::new(store.clone());
        let series_store = SeriesStore::new(store.clone());
        let states = BundleStateStore::new(store.clone());
        Fixture {
            bundler: Bundler::new(categories, series_store, states.clone()),
            states,
            store,
        }
    }

    async fn persist_series(store: &Arc<MemoryStore>, series: &[EventSeries]) {
        for s in series {
            store
                .set("eventSeries", &s.id, serde_json::to_value(s).unwrap())
                .await
                .unwrap();
        }
    }

    /// Build a category doc whose membership and log match the given series.
    async fn seed_category(
        f: &Fixture,
        id: &str,
        name: &str,
        members: &[&EventSeries],
        log: Vec<ChangeLogEntry>,
        version: u32,
    ) {
        let category = EventCategory {
            id: id.to_string(),
            host_id: "host:abc".to_string(),
            name: name.to_string(),
            slug: "cat".to_string(),
            description: None,
            tags: vec![],
            sample_series_titles: vec![],
            series_ids: members.iter().map(|s| s.id.clone()).collect(),
            version,
            change_log: log,
            created_at: now(),
            updated_at: now(),
        };
        f.store
            .set("eventCategories", id, serde_json::to_value(&category).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_sight_bundles_full_set() {
        let f = fixture();
        let a = series("Alpha", Some(("category:c1", "Workshops")), "2026-07-11T10:00:00Z");
        let b = series("Beta", Some(("category:c1", "Workshops")), "2026-07-12T10:00:00Z");
        persist_series(&f.store, &[a.clone(), b.clone()]).await;
        seed_category(
            &f,
            "category:c1",
            "Workshops",
            &[&a, &b],
            vec![ChangeLogEntry {
                version: 1,
                added_series_ids: vec![a.id.clone(), b.id.clone()],
                added_series_titles: vec![],
                created_at: now(),
            }],
            1,
        )
        .await;

        let a_stats = ContentStats { views: 10, likes: 2, shares: 1, bookmarks: 0 };
        let b_stats = ContentStats { views: 5, likes: 0, shares: 0, bookmarks: 3 };
        let (bundles, ungrouped) = f
            .bundler
            .bundle_series(
                "u1",
                vec![(a.clone(), a_stats), (b.clone(), b_stats)],
                window(),
            )
            .await
            .unwrap();

        assert!(ungrouped.is_empty());
        assert_eq!(bundles.len(), 1);
        let ContentItem::Bundle(bundle) = &bundles[0] else {
            panic!("expected bundle item");
        };
        assert_eq!(bundle.id, "bundle:category:c1");
        assert_eq!(bundle.title, "Workshops · Parks Dept");
        assert_eq!(bundle.bundle.total_series_count, 2);
        // Never seen: everything is new and displayed.
        assert_eq!(bundle.bundle.new_series_ids.len(), 2);
        assert_eq!(bundle.bundle.display_series.len(), 2);
        assert_eq!(bundle.bundle.bundle_state.version, 1);
        assert!(bundle.embedding.is_some());
        // Bundle stats are the element-wise sum of member stats.
        assert_eq!(
            bundle.stats,
            ContentStats { views: 15, likes: 2, shares: 1, bookmarks: 3 }
        );
    }

    #[tokio::test]
    async fn version_diff_shows_only_new_series() {
        let f = fixture();
        let a = series("Alpha", Some(("category:c1", "Workshops")), "2026-07-11T10:00:00Z");
        let b = series("Beta", Some(("category:c1", "Workshops")), "2026-07-12T10:00:00Z");
        persist_series(&f.store, &[a.clone(), b.clone()]).await;
        seed_category(
            &f,
            "category:c1",
            "Workshops",
            &[&a, &b],
            vec![
                ChangeLogEntry {
                    version: 2,
                    added_series_ids: vec![a.id.clone()],
                    added_series_titles: vec![],
                    created_at: now(),
                },
                ChangeLogEntry {
                    version: 3,
                    added_series_ids: vec![b.id.clone()],
                    added_series_titles: vec![],
                    created_at: now(),
                },
            ],
            3,
        )
        .await;
        f.states.mark_seen("u1", "category:c1", 2, now()).await.unwrap();

        let (bundles, _) = f
            .bundler
            .bundle_series(
                "u1",
                vec![
                    (a.clone(), ContentStats::default()),
                    (b.clone(), ContentStats::default()),
                ],
                window(),
            )
            .await
            .unwrap();
        assert_eq!(bundles.len(), 1);
        let ContentItem::Bundle(bundle) = &bundles[0] else {
            panic!("expected bundle item");
        };
        assert_eq!(bundle.bundle.new_series_ids, vec![b.id.clone()]);
        assert_eq!(bundle.bundle.display_series, vec![b.id.clone()]);
        assert_eq!(bundle.bundle.total_series_count, 2);
    }

    #[tokio::test]
    async fn caught_up_user_gets_no_bundle() {
        let f = fixture();
        let a = series("Alpha", Some(("category:c1", "Workshops")), "2026-07-11T10:00:00Z");
        persist_series(&f.store, &[a.clone()]).await;
        seed_category(
            &f,
            "category:c1",
            "Workshops",
            &[&a],
            vec![ChangeLogEntry {
                version: 1,
                added_series_ids: vec![a.id.clone()],
                added_series_titles: vec![],
                created_at: now(),
            }],
            1,
        )
        .await;
        f.states.mark_seen("u1", "category:c1", 1, now()).await.unwrap();

        let (bundles, ungrouped) = f
            .bundler
            .bundle_series("u1", vec![(a.clone(), ContentStats::default())], window())
            .await
            .unwrap();
        assert!(bundles.is_empty());
        assert!(ungrouped.is_empty());
    }

    #[tokio::test]
    async fn truncated_log_falls_back_to_full_set() {
        let f = fixture();
        let a = series("Alpha", Some(("category:c1", "Workshops")), "2026-07-11T10:00:00Z");
        persist_series(&f.store, &[a.clone()]).await;
        // Version moved past what the (empty) log can explain.
        seed_category(&f, "category:c1", "Workshops", &[&a], vec![], 5).await;
        f.states.mark_seen("u1", "category:c1", 3, now()).await.unwrap();

        let (bundles, _) = f
            .bundler
            .bundle_series("u1", vec![(a.clone(), ContentStats::default())], window())
            .await
            .unwrap();
        assert_eq!(bundles.len(), 1);
        let ContentItem::Bundle(bundle) = &bundles[0] else {
            panic!("expected bundle item");
        };
        assert_eq!(bundle.bundle.new_series_ids, vec![a.id.clone()]);
    }

    #[tokio::test]
    async fn uncategorized_series_pass_through() {
        let f = fixture();
        let a = series("Alpha", None, "2026-07-11T10:00:00Z");
        let (bundles, ungrouped) = f
            .bundler
            .bundle_series("u1", vec![(a.clone(), ContentStats::default())], window())
            .await
            .unwrap();
        assert!(bundles.is_empty());
        assert_eq!(ungrouped.len(), 1);
        assert_eq!(ungrouped[0].0.id, a.id);
    }

    #[tokio::test]
    async fn members_outside_window_are_dropped() {
        let f = fixture();
        let a = series("Alpha", Some(("category:c1", "Workshops")), "2026-07-11T10:00:00Z");
        let far = series("Gamma", Some(("category:c1", "Workshops")), "2026-09-01T10:00:00Z");
        persist_series(&f.store, &[a.clone(), far.clone()]).await;
        seed_category(
            &f,
            "category:c1",
            "Workshops",
            &[&a, &far],
            vec![ChangeLogEntry {
                version: 1,
                added_series_ids: vec![a.id.clone(), far.id.clone()],
                added_series_titles: vec![],
                created_at: now(),
            }],
            1,
        )
        .await;

        let (bundles, _) = f
            .bundler
            .bundle_series("u1", vec![(a.clone(), ContentStats::default())], window())
            .await
            .unwrap();
        let ContentItem::Bundle(bundle) = &bundles[0] else {
            panic!("expected bundle item");
        };
        // Membership reflects the window intersection.
        assert_eq!(bundle.bundle.series_ids, vec![a.id.clone()]);
    }
}
