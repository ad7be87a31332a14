//! Prompts sent to the summarizer and cleanup of its output

use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

use crate::types::Article;

/// Fixed instruction given to the summarizer for every newsletter
pub const SYSTEM_PROMPT: &str = "You are an expert newsletter editor. Write an engaging, \
well-structured newsletter in Markdown that is ready to be sent by email. Start with a \
catchy title as a level-one heading, follow with a short introduction, then one section \
per category with a level-two heading. For each story give a concise summary and keep \
the original link. End with a brief sign-off. Do not wrap the newsletter in a code block.";

/// Build the user prompt listing the collected articles
pub fn build_user_prompt(articles: &[Article], categories: &[String]) -> String {
    let mut prompt = format!(
        "Create a newsletter covering these categories: {}.\n\n",
        categories.join(", ")
    );

    if articles.is_empty() {
        prompt.push_str(
            "No recent articles were found. Write a short note letting the reader know \
             there is nothing new in their categories this time.\n",
        );
        return prompt;
    }

    prompt.push_str("Articles:\n\n");
    for (index, article) in articles.iter().enumerate() {
        // Writing to a String cannot fail
        let _ = writeln!(
            prompt,
            "{}. {}\n   {}\n   Link: {}\n",
            index + 1,
            article.title,
            article.description,
            article.url
        );
    }
    prompt
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").ok())
        .as_ref()
}

/// Strip a surrounding code fence and whitespace from model output
pub fn clean_completion(content: &str) -> String {
    let trimmed = content.trim();
    match fence_pattern().and_then(|re| re.captures(trimmed)) {
        Some(captures) => captures
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        None => trimmed.to_string(),
    }
}
