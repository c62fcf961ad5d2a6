//! Process boundary: one JSON request in, one JSON line out

use serde::{Deserialize, Serialize};
use story_core::{parse_json_object, IngestionRequest, QueryMatch, Result};

use crate::pipeline::{IngestionPipeline, IngestionReport};

/// Fallback line used if a response ever fails to encode
const ENCODE_FAILURE_LINE: &str = r#"{"status":"error","message":"Failed to encode response."}"#;

fn to_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| ENCODE_FAILURE_LINE.to_string())
}

/// Response to an ingestion request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestionOutcome {
    Success {
        user_id: String,
        story_id: String,
        vector_id: String,
    },
    Error {
        message: String,
    },
}

impl IngestionOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Single-line JSON form written to stdout
    pub fn to_json_line(&self) -> String {
        to_line(self)
    }
}

impl From<Result<IngestionReport>> for IngestionOutcome {
    fn from(result: Result<IngestionReport>) -> Self {
        match result {
            Ok(report) => Self::Success {
                user_id: report.user_id,
                story_id: report.story_id,
                vector_id: report.vector_id,
            },
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Parse raw stdin and run it through the pipeline
pub async fn handle_ingest(pipeline: &IngestionPipeline, raw: &str) -> IngestionOutcome {
    let request = match IngestionRequest::from_json(raw) {
        Ok(request) => request,
        Err(e) => return IngestionOutcome::error(e.to_string()),
    };
    pipeline.process(request).await.into()
}

/// Like `handle_ingest`, building the pipeline only once the request is valid
///
/// Malformed or incomplete input is reported without touching configuration.
pub async fn handle_ingest_with<F>(raw: &str, build: F) -> IngestionOutcome
where
    F: FnOnce() -> Result<IngestionPipeline>,
{
    let request = match IngestionRequest::from_json(raw).and_then(IngestionRequest::validate) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected ingestion request");
            return IngestionOutcome::error(e.to_string());
        }
    };

    let pipeline = match build() {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Failed to configure pipeline");
            return IngestionOutcome::error(e.to_string());
        }
    };

    pipeline.process_validated(request).await.into()
}

// ============================================================================
// Similar stories
// ============================================================================

/// Request for similar stories
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimilarRequest {
    pub story_text: Option<String>,

    /// Requester; their own vectors are left out of the result
    pub user_id: Option<String>,

    pub top_k: Option<usize>,
}

/// One similar story
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub vector_id: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
}

impl From<QueryMatch> for MatchSummary {
    fn from(m: QueryMatch) -> Self {
        let (user_id, story_id) = match m.metadata {
            Some(metadata) => (Some(metadata.user_id), Some(metadata.story_id)),
            None => (None, None),
        };
        Self {
            vector_id: m.id,
            score: m.score,
            user_id,
            story_id,
        }
    }
}

/// Response to a similar-stories request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SimilarOutcome {
    Success { matches: Vec<MatchSummary> },
    Error { message: String },
}

impl SimilarOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json_line(&self) -> String {
        to_line(self)
    }
}

/// Parse raw stdin and look up similar stories
///
/// A failed remote query reports success with no matches.
pub async fn handle_similar(pipeline: &IngestionPipeline, raw: &str) -> SimilarOutcome {
    match parse_json_object::<SimilarRequest>(raw) {
        Ok(request) => find_similar(pipeline, request).await,
        Err(e) => SimilarOutcome::error(e.to_string()),
    }
}

/// Like `handle_similar`, building the pipeline only once the request parses
pub async fn handle_similar_with<F>(raw: &str, build: F) -> SimilarOutcome
where
    F: FnOnce() -> Result<IngestionPipeline>,
{
    let request = match parse_json_object::<SimilarRequest>(raw) {
        Ok(request) => request,
        Err(e) => return SimilarOutcome::error(e.to_string()),
    };

    match build() {
        Ok(pipeline) => find_similar(&pipeline, request).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to configure pipeline");
            SimilarOutcome::error(e.to_string())
        }
    }
}

async fn find_similar(pipeline: &IngestionPipeline, request: SimilarRequest) -> SimilarOutcome {
    let text = request.story_text.unwrap_or_default();
    match pipeline
        .find_similar(&text, request.top_k, request.user_id.as_deref())
        .await
    {
        Ok(matches) => SimilarOutcome::Success {
            matches: matches
                .unwrap_or_default()
                .into_iter()
                .map(MatchSummary::from)
                .collect(),
        },
        Err(e) => SimilarOutcome::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_core::{StoryError, StoryMetadata};

    #[test]
    fn test_success_line_field_order() {
        let outcome = IngestionOutcome::Success {
            user_id: "u1".to_string(),
            story_id: "s1".to_string(),
            vector_id: "user:u1".to_string(),
        };
        assert_eq!(
            outcome.to_json_line(),
            r#"{"status":"success","user_id":"u1","story_id":"s1","vector_id":"user:u1"}"#
        );
    }

    #[test]
    fn test_error_line() {
        let outcome: IngestionOutcome =
            Err::<IngestionReport, _>(StoryError::EmbeddingGenerationFailed {
                reason: "timeout".to_string(),
            })
            .into();
        assert_eq!(
            outcome.to_json_line(),
            r#"{"status":"error","message":"Failed to generate embedding."}"#
        );
    }

    #[test]
    fn test_error_line_is_single_line() {
        let outcome = IngestionOutcome::error("first\nsecond");
        let line = outcome.to_json_line();
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_match_summary_without_metadata() {
        let summary = MatchSummary::from(QueryMatch {
            id: "user:x".to_string(),
            score: 0.5,
            metadata: None,
        });
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            serde_json::json!({"vector_id": "user:x", "score": 0.5})
        );

        let summary = MatchSummary::from(QueryMatch {
            id: "user:y".to_string(),
            score: 0.25,
            metadata: Some(StoryMetadata::new("y", "sy")),
        });
        assert_eq!(summary.user_id.as_deref(), Some("y"));
        assert_eq!(summary.story_id.as_deref(), Some("sy"));
    }
}
