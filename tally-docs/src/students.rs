//! Student ranking by average topic score.

use std::fmt;

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use tally_core::{format_real, DocumentError, TallyError, TallyResult};

use crate::collection::{display_id, DocumentCollection};

/// A student with the mean of their topic scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopStudent {
    #[serde(rename = "_id")]
    pub id: Bson,
    #[serde(default)]
    pub name: String,
    /// `None` when the student has no scored topics.
    #[serde(rename = "averageScore", default)]
    pub average_score: Option<f64>,
}

impl fmt::Display for TopStudent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.average_score {
            Some(score) => write!(
                f,
                "{}: {} ({})",
                display_id(&self.id),
                self.name,
                format_real(score)
            ),
            None => write!(f, "{}: {} (no scores)", display_id(&self.id), self.name),
        }
    }
}

/// Pipeline computing `averageScore` over `topics.score`, best first.
pub fn top_students_pipeline() -> Vec<Document> {
    vec![
        doc! {
            "$project": {
                "name": 1,
                "averageScore": { "$avg": "$topics.score" },
            }
        },
        doc! { "$sort": { "averageScore": -1 } },
    ]
}

/// All students sorted by average score, highest first.
pub async fn top_students(collection: &dyn DocumentCollection) -> TallyResult<Vec<TopStudent>> {
    let docs = collection.aggregate(top_students_pipeline()).await?;
    docs.into_iter()
        .map(|doc| {
            bson::from_document::<TopStudent>(doc).map_err(|e| {
                TallyError::from(DocumentError::Malformed {
                    reason: format!("student ranking row: {}", e),
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCollection;

    #[tokio::test]
    async fn test_students_ranked_by_average() {
        let coll = InMemoryCollection::with_documents(
            "students",
            vec![
                doc! {
                    "_id": 1,
                    "name": "A",
                    "topics": [{ "title": "Algo", "score": 80 }, { "title": "C", "score": 90 }],
                },
                doc! { "_id": 2, "name": "B", "topics": [{ "title": "Algo", "score": 70 }] },
            ],
        );

        let ranked = top_students(&coll).await.unwrap();
        assert_eq!(
            ranked,
            vec![
                TopStudent {
                    id: Bson::Int32(1),
                    name: "A".to_string(),
                    average_score: Some(85.0),
                },
                TopStudent {
                    id: Bson::Int32(2),
                    name: "B".to_string(),
                    average_score: Some(70.0),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_student_without_topics_ranks_last() {
        let coll = InMemoryCollection::with_documents(
            "students",
            vec![
                doc! { "_id": 1, "name": "Empty" },
                doc! { "_id": 2, "name": "B", "topics": [{ "score": 4.5 }] },
            ],
        );

        let ranked = top_students(&coll).await.unwrap();
        assert_eq!(ranked[0].name, "B");
        assert_eq!(ranked[1].average_score, None);
        assert_eq!(ranked[1].to_string(), "1: Empty (no scores)");
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let coll = InMemoryCollection::new("students");
        assert!(top_students(&coll).await.unwrap().is_empty());
    }

    #[test]
    fn test_display() {
        let student = TopStudent {
            id: Bson::String("s1".into()),
            name: "A".into(),
            average_score: Some(85.0),
        };
        assert_eq!(student.to_string(), "s1: A (85.0)");

        let oid = bson::oid::ObjectId::new();
        let unscored = TopStudent {
            id: Bson::ObjectId(oid),
            name: "B".into(),
            average_score: None,
        };
        assert_eq!(unscored.to_string(), format!("{}: B (no scores)", oid.to_hex()));
    }
}
