//! School collection operations.

use bson::{doc, Bson, Document};
use tally_core::TallyResult;
use tracing::info;

use crate::collection::{DocumentCollection, UpdateSummary};

/// Every document in the collection; empty when the collection is.
pub async fn list_all(collection: &dyn DocumentCollection) -> TallyResult<Vec<Document>> {
    collection.find(doc! {}).await
}

/// Insert a school built from `fields` and return its new `_id`.
pub async fn insert_school(
    collection: &dyn DocumentCollection,
    fields: Document,
) -> TallyResult<Bson> {
    let id = collection.insert_one(fields).await?;
    info!(collection = collection.name(), id = %id, "Inserted school");
    Ok(id)
}

/// Replace the `topics` of every school named `name`.
pub async fn update_topics(
    collection: &dyn DocumentCollection,
    name: &str,
    topics: &[String],
) -> TallyResult<UpdateSummary> {
    let summary = collection
        .update_many(doc! { "name": name }, doc! { "$set": { "topics": topics.to_vec() } })
        .await?;
    info!(
        collection = collection.name(),
        name,
        matched = summary.matched,
        modified = summary.modified,
        "Updated school topics"
    );
    Ok(summary)
}

/// Schools whose `topics` include `topic`.
pub async fn schools_by_topic(
    collection: &dyn DocumentCollection,
    topic: &str,
) -> TallyResult<Vec<Document>> {
    collection.find(doc! { "topics": topic }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCollection;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_all_empty() {
        let coll = InMemoryCollection::new("school");
        assert!(list_all(&coll).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_then_list() {
        let coll = InMemoryCollection::new("school");
        let id = insert_school(&coll, doc! { "name": "UCSF", "address": "505 Parnassus Ave" })
            .await
            .unwrap();

        let all = list_all(&coll).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("_id"), Some(&id));
        assert_eq!(all[0].get_str("address").unwrap(), "505 Parnassus Ave");
    }

    #[tokio::test]
    async fn test_update_topics_only_touches_named_school() {
        let coll = InMemoryCollection::new("school");
        insert_school(&coll, doc! { "name": "A", "topics": ["Algo"] }).await.unwrap();
        insert_school(&coll, doc! { "name": "Other", "topics": ["Algo"] }).await.unwrap();

        let summary = update_topics(&coll, "A", &topics(&["Math"])).await.unwrap();
        assert_eq!(summary, UpdateSummary { matched: 1, modified: 1 });

        let a = coll.find(doc! { "name": "A" }).await.unwrap();
        assert_eq!(a[0].get_array("topics").unwrap(), &vec![Bson::String("Math".into())]);
        let other = coll.find(doc! { "name": "Other" }).await.unwrap();
        assert_eq!(other[0].get_array("topics").unwrap(), &vec![Bson::String("Algo".into())]);
    }

    #[tokio::test]
    async fn test_update_topics_unknown_name() {
        let coll = InMemoryCollection::new("school");
        insert_school(&coll, doc! { "name": "A" }).await.unwrap();
        let summary = update_topics(&coll, "Nope", &topics(&["C"])).await.unwrap();
        assert_eq!(summary, UpdateSummary::default());
    }

    #[tokio::test]
    async fn test_schools_by_topic() {
        let coll = InMemoryCollection::new("school");
        let holberton = doc! { "name": "Holberton", "topics": ["Algo", "C", "Python", "React"] };
        insert_school(&coll, holberton).await.unwrap();
        insert_school(&coll, doc! { "name": "UCSF", "topics": ["Algo", "MongoDB"] })
            .await
            .unwrap();
        insert_school(&coll, doc! { "name": "UCLA", "topics": ["C", "Python"] })
            .await
            .unwrap();

        let python: Vec<String> = schools_by_topic(&coll, "Python")
            .await
            .unwrap()
            .iter()
            .filter_map(|d| d.get_str("name").ok().map(str::to_string))
            .collect();
        assert_eq!(python, vec!["Holberton", "UCLA"]);
        assert!(schools_by_topic(&coll, "Rust").await.unwrap().is_empty());
    }
}
