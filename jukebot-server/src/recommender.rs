// jukebot-server/src/recommender.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use jukebot_common::error::Collaborator;
use jukebot_common::models::Track;
use jukebot_common::traits::Recommender;
use jukebot_core::Error;

const SYSTEM_PROMPT: &str = "You are a music recommendation engine. Reply with only a JSON array \
of objects with the keys \"title\", \"artist\" and optionally \"url\". No prose, no markdown.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    title: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Asks a chat-completions endpoint for tracks similar to the seeds.
pub struct OpenAiRecommender {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiRecommender {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

fn user_prompt(seeds: &[Track], count: usize) -> String {
    let listed: Vec<String> = seeds.iter().map(|t| format!("- {}", t.display_title())).collect();
    format!(
        "Recently played:\n{}\n\nSuggest {} different songs that fit with these. \
         Do not repeat any of the listed songs.",
        listed.join("\n"),
        count
    )
}

/// Pulls the JSON array out of the model's reply, tolerating code fences.
fn parse_suggestions(content: &str, count: usize) -> Result<Vec<Track>, Error> {
    let start = content.find('[');
    let end = content.rfind(']');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => {
            return Err(Error::fatal(
                Collaborator::Recommender,
                "reply did not contain a JSON array",
            ));
        }
    };
    let suggestions: Vec<Suggestion> = serde_json::from_str(body)?;

    Ok(suggestions
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .take(count)
        .map(|s| {
            let label = match &s.artist {
                Some(artist) => format!("{} {}", artist, s.title),
                None => s.title.clone(),
            };
            // Without a URL the resolver searches for the label instead.
            let (id, source) = match s.url {
                Some(url) => (url.clone(), url),
                None => (format!("search:{}", label.to_lowercase()), label),
            };
            let track = Track::new(id, s.title, source).as_recommendation();
            match s.artist {
                Some(artist) => track.with_artist(artist),
                None => track,
            }
        })
        .collect())
}

#[async_trait]
impl Recommender for OpenAiRecommender {
    async fn suggest(&self, seeds: &[Track], count: usize) -> Result<Vec<Track>, Error> {
        if seeds.is_empty() || count == 0 {
            return Ok(Vec::new());
        }
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            Error::fatal(Collaborator::Recommender, "no OpenAI API key configured")
        })?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": user_prompt(seeds, count) },
                ],
                "max_tokens": 1000,
                "temperature": 0.8,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::retryable(
                Collaborator::Recommender,
                format!("chat completion returned {status}"),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::fatal(
                Collaborator::Recommender,
                format!("chat completion returned {status}: {body}"),
            ));
        }

        let data = response.json::<serde_json::Value>().await?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::fatal(Collaborator::Recommender, "Invalid response format"))?;
        debug!("OpenAiRecommender: raw reply: {}", content);

        let tracks = parse_suggestions(content, count)?;
        info!("OpenAiRecommender: {} suggestions for {} seeds", tracks.len(), seeds.len());
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n[{\"title\":\"Teardrop\",\"artist\":\"Massive Attack\"},\
                     {\"title\":\"Glory Box\",\"artist\":\"Portishead\",\"url\":\"https://youtu.be/x\"}]\n```";
        let tracks = parse_suggestions(reply, 5).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].source_url, "Massive Attack Teardrop");
        assert_eq!(tracks[0].id.as_str(), "search:massive attack teardrop");
        assert_eq!(tracks[1].source_url, "https://youtu.be/x");
        assert!(tracks.iter().all(|t| t.from_recommendation && !t.is_resolved()));
    }

    #[test]
    fn test_parse_truncates_to_count() {
        let reply = r#"[{"title":"a"},{"title":"b"},{"title":" "},{"title":"c"}]"#;
        let tracks = parse_suggestions(reply, 2).unwrap();
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[test]
    fn test_prose_reply_is_fatal() {
        let err = parse_suggestions("Sorry, I can't help with that.", 3).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_key_is_fatal() {
        let recommender = OpenAiRecommender::new(OpenAiConfig::default());
        let seeds = vec![Track::new("a", "A", "https://example.com/a")];
        let err = recommender.suggest(&seeds, 3).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(recommender.suggest(&[], 3).await.unwrap().is_empty());
    }
}
