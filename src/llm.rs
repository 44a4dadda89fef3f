//! OpenRouter chat-completions client
//!
//! One request per batch: the prompt lists each messy folder name as a
//! labelled item and the model returns a JSON array with one object per
//! item. Responses wrapped in markdown code fences are tolerated.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Deserialize)]
pub struct ParsedName {
    /// "ITEM_N" label echoed back by the model
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    // The model is inconsistent about numbers vs strings for these
    #[serde(default)]
    pub series_num: Option<serde_json::Value>,
    #[serde(default)]
    pub year: Option<serde_json::Value>,
}

pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        let key = config.openrouter_api_key.as_deref()?;
        if key.is_empty() {
            return None;
        }
        Self::new(key, &config.openrouter_model).ok()
    }

    /// Parse a batch of messy "Author - Title" names in one request
    pub async fn parse_names(&self, messy_names: &[String]) -> Result<Vec<ParsedName>> {
        let prompt = build_prompt(messy_names);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1
        });

        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("OpenRouter request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("OpenRouter error {}: {}", status, error_text);
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }

        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let result: Response = response
            .json()
            .await
            .context("Invalid OpenRouter response body")?;

        let content = &result
            .choices
            .first()
            .context("OpenRouter returned no choices")?
            .message
            .content;

        parse_json_response(content)
    }
}

pub fn build_prompt(messy_names: &[String]) -> String {
    let names_list: Vec<String> = messy_names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("ITEM_{}: {}", i + 1, name))
        .collect();
    let names_list = names_list.join("\n");

    format!(
        r#"Parse these book filenames. Extract author and title.

{names_list}

RULES:
- Author names are people (e.g. "Adrian Tchaikovsky", "Dean Koontz", "Cormac McCarthy")
- Titles are book names (e.g. "Service Model", "The Funhouse", "Stella Maris")
- IMPORTANT: Keep series info in the title! "Book 2", "Book 6", "Part 1" etc MUST stay in the title
  - "Trailer Park Elves, Book 2" -> title should be "Trailer Park Elves, Book 2" NOT just "Trailer Park Elves"
  - "The Expanse 3" -> title should include the "3"
- Remove junk: [bitsearch.to], version numbers [r1.1], quality [64k], format suffixes (EPUB, MP3)
- "Author - Title" format: first part is usually author
- "Title by Author" format: author comes after "by"
- Years like 1999 go in year field, not author
- For "LastName, FirstName" format, author is "FirstName LastName"
- Keep ALL co-authors (e.g. "Michael Dalton, Adam Lance" stays as-is)

Return JSON array. Each object MUST have "item" matching the ITEM_N label:
[
  {{"item": "ITEM_1", "author": "Author Name", "title": "Book Title", "series": null, "series_num": null, "year": null}}
]

Return ONLY the JSON array, nothing else."#
    )
}

/// Strip markdown fences the model sometimes adds, then parse
pub fn parse_json_response(text: &str) -> Result<Vec<ParsedName>> {
    let json_str = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(json_str).context("Model response is not a valid JSON array")
}

/// "ITEM_3" -> 2. Labels the model invents are ignored.
pub fn item_index(label: &str) -> Option<usize> {
    label
        .trim()
        .strip_prefix("ITEM_")?
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_labels_items() {
        let names = vec![
            "The Funhouse - Dean Koontz".to_string(),
            "Koontz, Dean - Whispers".to_string(),
        ];
        let prompt = build_prompt(&names);
        assert!(prompt.contains("ITEM_1: The Funhouse - Dean Koontz"));
        assert!(prompt.contains("ITEM_2: Koontz, Dean - Whispers"));
        assert!(prompt.contains("Return ONLY the JSON array"));
    }

    #[test]
    fn test_parse_json_response_plain() {
        let text = r#"[{"item": "ITEM_1", "author": "Dean Koontz", "title": "Whispers"}]"#;
        let parsed = parse_json_response(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].author.as_deref(), Some("Dean Koontz"));
        assert_eq!(parsed[0].title.as_deref(), Some("Whispers"));
    }

    #[test]
    fn test_parse_json_response_fenced() {
        let text = "```json\n[{\"item\": \"ITEM_1\", \"author\": \"A\", \"title\": \"T\", \"year\": 1999}]\n```";
        let parsed = parse_json_response(text).unwrap();
        assert_eq!(parsed[0].item.as_deref(), Some("ITEM_1"));
        assert_eq!(parsed[0].year, Some(serde_json::json!(1999)));
    }

    #[test]
    fn test_parse_json_response_garbage() {
        assert!(parse_json_response("sorry, I cannot do that").is_err());
    }

    #[test]
    fn test_item_index() {
        assert_eq!(item_index("ITEM_1"), Some(0));
        assert_eq!(item_index("ITEM_12"), Some(11));
        assert_eq!(item_index("ITEM_0"), None);
        assert_eq!(item_index("banana"), None);
    }
}
