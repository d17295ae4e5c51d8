use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub article_id: i64,
    pub content: String,
    pub sections: OchiaiSections,
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
}

/// The six answers of an Ochiai-format summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OchiaiSections {
    /// 1. What is it?
    pub overview: String,
    /// 2. What makes it better than prior work?
    pub comparison: String,
    /// 3. What is the key technique?
    pub technique: String,
    /// 4. How was it validated?
    pub validation: String,
    /// 5. Is there discussion?
    pub discussion: String,
    /// 6. What should be read next?
    pub next_papers: String,
}
