//! Auxiliary API documents.

use serde::Deserialize;

/// `GET {api}/info` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct AppInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Whether the app offers follow-up questions after each answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub struct SuggestedAfterAnswer {
    #[serde(default)]
    pub enabled: bool,
}

/// `GET {api}/parameters` response, reduced to the fields the client reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct AppParameters {
    #[serde(default)]
    pub opening_statement: Option<String>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default)]
    pub suggested_questions_after_answer: SuggestedAfterAnswer,
}

/// `GET {api}/messages/{id}/suggested` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct SuggestedQuestions {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub data: Vec<String>,
}

/// Body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}
