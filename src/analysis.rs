use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::completion::{Completion, CompletionRequest};
use crate::storage::DEFAULT_CATEGORY;
use crate::tags;

/// Summaries per insight-extraction call, bounding prompt size as the shelf
/// grows.
pub const INSIGHT_BATCH_SIZE: usize = 30;

/// Hard cap on a digest; beyond it a selection pass picks the survivors.
pub const MAX_INSIGHTS: usize = 15;

/// The single entry a digest falls back to when nothing significant
/// survived. Its post id is empty.
pub const NO_INSIGHTS_TEXT: &str = "No significant new content in this period.";

const SUMMARIZE_SYSTEM: &str = "You are an expert content summarizer. Your task is to create a concise but informative summary of Reddit posts.
The summary should capture the key points and context while being brief.

Rules:
1. Keep summaries between 2-4 sentences
2. Focus on the main topic and key details
3. Include relevant context from the subreddit if applicable
4. Be objective and factual
5. Preserve any important technical details or specifications
6. Output just the summary text with no additional formatting";

const SUGGEST_RULE: &str = "
8. If you would have preferred to choose a non-existing category, output the category name you would have chosen between <suggested_category></suggested_category> tags as well.
";

const EXTRACT_SYSTEM: &str = "You are an expert technical analyst. You are given a numbered list of Reddit post summaries. Extract the most significant insights as short bullet points.

Rules:
1. Each point must be a single, concrete, standalone claim
2. Only include genuinely significant content; returning nothing is fine
3. Keep each point to one or two sentences
4. Preserve technical specifics (versions, numbers, names)
5. Output each point between <point></point> tags, immediately followed by the number of the summary it came from between <id></id> tags

Example output: <point>Zero-copy parsing cut decode time by 40%</point><id>3</id>";

/// What a post looks like to the analyzer: just enough to summarize and
/// categorize. `content` is the downloaded markdown document, if any.
#[derive(Debug, Clone)]
pub struct PostContent {
    pub title: String,
    pub subreddit: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insight {
    pub text: String,
    /// Empty for the no-content sentinel entry.
    pub post_id: String,
}

pub struct Analyzer {
    completion: Arc<dyn Completion>,
    suggest_mode: bool,
    suggestions: Mutex<Vec<String>>,
}

impl Analyzer {
    pub fn new(completion: Arc<dyn Completion>, suggest_mode: bool) -> Self {
        Self {
            completion,
            suggest_mode,
            suggestions: Mutex::new(Vec::new()),
        }
    }

    /// Category names the model proposed outside the allowed set, in the
    /// order first seen. Only populated in suggest mode.
    pub fn suggestions(&self) -> Vec<String> {
        self.suggestions.lock().clone()
    }

    /// Summarize a post's downloaded content. `Ok(None)` when the post has
    /// no content yet; this never fetches on its own.
    pub fn summarize_post(&self, post: &PostContent) -> Result<Option<String>> {
        let Some(content) = post.content.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };

        let request = CompletionRequest {
            system_message: SUMMARIZE_SYSTEM.to_string(),
            prompt: format!("Please create a concise summary of this Reddit post:\n\n{content}"),
            temperature: 0.2,
            ..CompletionRequest::default()
        };
        let response = self
            .completion
            .complete(&request)
            .context("analysis: summarize post")?;
        let summary = response.trim().to_string();
        Ok((!summary.is_empty()).then_some(summary))
    }

    /// Pick a category from the supplied closed set, generating a summary
    /// first when none is passed in. The returned name is always a member
    /// of `categories` or the default; model output never widens the set.
    pub fn categorize_post(
        &self,
        post: &PostContent,
        categories: &BTreeMap<String, Option<String>>,
        summary: Option<String>,
    ) -> Result<(String, Option<String>)> {
        let summary = match summary {
            Some(summary) => summary,
            None => match self.summarize_post(post)? {
                Some(summary) => summary,
                None => return Ok((DEFAULT_CATEGORY.to_string(), None)),
            },
        };

        let mut category_info = String::from("Available categories:\n");
        for (name, description) in categories {
            match description {
                Some(description) => category_info.push_str(&format!("- {name}: {description}\n")),
                None => category_info.push_str(&format!("- {name}\n")),
            }
        }

        let post_info = format!(
            "\nPost to categorize:\nTitle: {}\nSubreddit: r/{}\nSummary: {}\n",
            post.title, post.subreddit, summary
        );
        let prompt = format!(
            "{category_info}\n{post_info}\n\nBased on the above information, which category best fits this post? Remember to output your choice between <category></category> tags."
        );

        let request = CompletionRequest {
            system_message: self.categorize_system(),
            prompt,
            temperature: 0.2,
            ..CompletionRequest::default()
        };
        let response = self
            .completion
            .complete(&request)
            .context("analysis: categorize post")?;

        if self.suggest_mode {
            if let Some(suggested) = tags::extract_tag(&response, "suggested_category") {
                if !categories.contains_key(&suggested) {
                    self.record_suggestion(suggested);
                }
            }
        }

        let category = tags::extract_tag(&response, "category")
            .filter(|name| categories.contains_key(name))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        Ok((category, Some(summary)))
    }

    /// Extract cross-post insight bullet points from (summary, post_id)
    /// pairs. Batched to bound prompt size; capped at `MAX_INSIGHTS` via a
    /// selection pass. A failed or malformed batch contributes nothing and
    /// the rest still run.
    pub fn generate_bullet_points(&self, items: &[(String, String)]) -> Result<Vec<Insight>> {
        let mut insights = Vec::new();

        for batch in items.chunks(INSIGHT_BATCH_SIZE) {
            let mut listing = String::new();
            for (idx, (summary, _)) in batch.iter().enumerate() {
                listing.push_str(&format!("{}. {}\n", idx + 1, summary));
            }

            let request = CompletionRequest {
                system_message: EXTRACT_SYSTEM.to_string(),
                prompt: format!(
                    "Post summaries:\n\n{listing}\nExtract the significant insights, each between <point></point> tags followed by its source number between <id></id> tags."
                ),
                temperature: 0.2,
                ..CompletionRequest::default()
            };
            let response = match self.completion.complete(&request) {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "insight extraction batch failed, skipping");
                    continue;
                }
            };

            for (text, id) in tags::extract_points(&response) {
                // Ids are 1-based positions in this batch's listing; anything
                // out of range is model noise.
                let Some((_, post_id)) = id.checked_sub(1).and_then(|idx| batch.get(idx)) else {
                    continue;
                };
                insights.push(Insight {
                    text,
                    post_id: post_id.clone(),
                });
            }
        }

        if insights.len() > MAX_INSIGHTS {
            insights = self.select_insights(insights);
        }
        if insights.is_empty() {
            insights.push(Insight {
                text: NO_INSIGHTS_TEXT.to_string(),
                post_id: String::new(),
            });
        }
        Ok(insights)
    }

    /// Rank-and-select pass over an over-full candidate list. Anything other
    /// than exactly `MAX_INSIGHTS` valid distinct picks falls back to the
    /// first `MAX_INSIGHTS` candidates in original order.
    fn select_insights(&self, candidates: Vec<Insight>) -> Vec<Insight> {
        let mut listing = String::new();
        for (idx, insight) in candidates.iter().enumerate() {
            listing.push_str(&format!("{}. {}\n", idx + 1, insight.text));
        }

        let request = CompletionRequest {
            system_message: format!(
                "You are curating a digest from candidate insight bullet points.

Rules:
1. Select exactly {MAX_INSIGHTS} points
2. Favor topic diversity over several strong points about the same topic
3. Prefer concrete claims over general observations
4. Output each selected number between <selected></selected> tags, e.g. <selected>4</selected>"
            ),
            prompt: format!(
                "Candidate points:\n\n{listing}\nSelect exactly {MAX_INSIGHTS} of them, each number between <selected></selected> tags."
            ),
            temperature: 0.2,
            ..CompletionRequest::default()
        };

        let mut picked: Vec<usize> = Vec::new();
        match self.completion.complete(&request) {
            Ok(response) => {
                for n in tags::extract_selected(&response) {
                    let Some(idx) = n.checked_sub(1) else { continue };
                    if idx < candidates.len() && !picked.contains(&idx) {
                        picked.push(idx);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "insight selection failed, truncating");
            }
        }

        if picked.len() == MAX_INSIGHTS {
            picked
                .into_iter()
                .map(|idx| candidates[idx].clone())
                .collect()
        } else {
            candidates.into_iter().take(MAX_INSIGHTS).collect()
        }
    }

    fn categorize_system(&self) -> String {
        let extra = if self.suggest_mode { SUGGEST_RULE } else { "" };
        format!(
            "You are an expert content categorizer for Reddit posts. Your task is to analyze posts and assign them to the most appropriate category based on their content, title, and source subreddit.

Rules:
1. You must choose from the provided categories only
2. Use 'Uncategorized' if no category is a good fit or if you're uncertain
3. Consider the category descriptions when provided
4. Output your choice between XML-like tags, e.g. <category>Technology</category>
5. Choose only ONE category
6. Be consistent with category names - use exact matches only
7. Go step by step through your reasoning and then output your choice between <category></category> tags, always give your reasoning before outputting the category.
{extra}
Example output: <category>Gaming</category>"
        )
    }

    fn record_suggestion(&self, suggestion: String) {
        let mut suggestions = self.suggestions.lock();
        if !suggestions.contains(&suggestion) {
            suggestions.push(suggestion);
        }
    }
}
