use chrono::{DateTime, Utc};

use crate::models::QueryResult;

#[derive(Debug, Clone)]
pub struct Exchange {
    pub question: String,
    pub result: QueryResult,
    pub asked_at: DateTime<Utc>,
}

/// Per-session request state: the text being typed, the question waiting
/// to be answered, and the answers given so far.
#[derive(Debug, Default)]
pub struct Session {
    query_input: String,
    query_to_process: Option<String>,
    history: Vec<Exchange>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.query_input = text.into();
    }

    pub fn input(&self) -> &str {
        &self.query_input
    }

    /// Moves the typed question into the pending slot and clears the input.
    /// Blank input leaves nothing pending.
    pub fn submit_query(&mut self) {
        let question = std::mem::take(&mut self.query_input);
        let question = question.trim();
        self.query_to_process = (!question.is_empty()).then(|| question.to_string());
    }

    pub fn take_pending(&mut self) -> Option<String> {
        self.query_to_process.take()
    }

    pub fn record(&mut self, question: String, result: QueryResult) {
        self.history.push(Exchange {
            question,
            result,
            asked_at: Utc::now(),
        });
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }
}
