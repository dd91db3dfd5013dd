use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use futures::future::join_all;
use regex::Regex;

use crate::{
    error::Result,
    models::{Tag, TagRegistration, paths},
    store::{Direction, DocumentStore, MergeWrite, Query},
};

pub const MAX_TAGS_PER_POST: usize = 5;

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)#[a-z0-9_]+").expect("hashtag pattern is valid"));

/// Canonical form of a tag: no leading `#`, no whitespace, lowercase.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let label: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    if label.is_empty() { None } else { Some(label) }
}

/// Normalizes and dedupes, keeping first occurrence order.
pub fn normalize_tags<I, S>(raws: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raws.into_iter()
        .filter_map(|raw| normalize_tag(raw.as_ref()))
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

pub fn extract_hashtags(content: &str) -> Vec<String> {
    normalize_tags(HASHTAG_RE.find_iter(content).map(|m| m.as_str()))
}

/// Bumps the usage count of every distinct tag. Each registration is an
/// independent merge-upsert; one failing does not stop the others.
pub async fn register_tags(store: &dyn DocumentStore, tags: &[String]) -> TagRegistration {
    let labels = normalize_tags(tags);
    let now = Utc::now().timestamp_millis();

    let results = join_all(labels.iter().map(|label| async move {
        let write = MergeWrite::new()
            .set("label", label.as_str())
            .set("updatedAt", now)
            .set_if_absent("createdAt", now)
            .increment("usageCount", 1);
        (label, store.merge(&paths::tag(label), write).await)
    }))
    .await;

    let mut outcome = TagRegistration::default();
    for (label, result) in results {
        match result {
            Ok(()) => outcome.registered.push(label.clone()),
            Err(e) => {
                tracing::warn!(tag = %label, error = %e, "failed to register tag");
                outcome.failed.push(label.clone());
            }
        }
    }
    outcome
}

/// Most used tags first.
pub async fn list_tags(store: &dyn DocumentStore, limit: usize) -> Result<Vec<Tag>> {
    let query = Query::new()
        .order_by("usageCount", Direction::Descending)
        .limit(limit);

    let docs = store.query(paths::TAGS, &query).await?;
    let mut tags = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut tag: Tag = doc.decode()?;
        if tag.label.is_empty() {
            tag.label = tag.id.clone();
        }
        tags.push(tag);
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn normalizes_tags() {
        assert_eq!(normalize_tag("#IoT"), Some("iot".to_string()));
        assert_eq!(normalize_tag("  smart farm "), Some("smartfarm".to_string()));
        assert_eq!(normalize_tag("##x"), Some("#x".to_string()));
        assert_eq!(normalize_tag(" # "), None);
        assert_eq!(
            normalize_tags(["#IoT", " iot ", "IOT", "", "Sensor"]),
            vec!["iot", "sensor"]
        );
    }

    #[test]
    fn extracts_hashtags_from_content() {
        let tags = extract_hashtags("Soil sensor #IoT update, see #soil_moisture and #iot!");
        assert_eq!(tags, vec!["iot", "soil_moisture"]);
        assert!(extract_hashtags("no tags # here").is_empty());
    }

    #[tokio::test]
    async fn duplicate_spellings_register_once() {
        let store = MemoryStore::new();
        let raws: Vec<String> = ["#IoT", " iot ", "IOT"].iter().map(|s| s.to_string()).collect();

        let outcome = register_tags(&store, &raws).await;
        assert_eq!(outcome.registered, vec!["iot"]);
        assert!(outcome.failed.is_empty());

        let tags = list_tags(&store, 10).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].label, "iot");
        assert_eq!(tags[0].usage_count, 1);
        assert!(tags[0].created_at.is_some());
    }

    #[tokio::test]
    async fn usage_grows_and_orders_listing() {
        let store = MemoryStore::new();
        register_tags(&store, &["farm".to_string()]).await;
        register_tags(&store, &["iot".to_string(), "farm".to_string()]).await;

        let tags = list_tags(&store, 10).await.unwrap();
        let labels: Vec<_> = tags.iter().map(|t| (t.label.as_str(), t.usage_count)).collect();
        assert_eq!(labels, vec![("farm", 2), ("iot", 1)]);

        assert_eq!(list_tags(&store, 1).await.unwrap().len(), 1);
    }
}
