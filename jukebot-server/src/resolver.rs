// jukebot-server/src/resolver.rs
//
// Resolves URLs and search queries by shelling out to yt-dlp.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use jukebot_common::error::{Collaborator, ResolveFailure};
use jukebot_common::models::{StreamDescriptor, Track};
use jukebot_common::traits::Resolver;
use jukebot_core::Error;

/// Subset of the `yt-dlp -j` output we care about.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    #[serde(default)]
    extractor_key: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ext: Option<String>,
}

pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

/// URLs go to yt-dlp as-is, anything else becomes a single-result search.
fn search_target(query: &str) -> String {
    match Url::parse(query) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => query.to_string(),
        _ => format!("ytsearch1:{query}"),
    }
}

/// Maps yt-dlp's stderr onto a resolve failure.
fn classify_failure(stderr: &str) -> ResolveFailure {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate-limit") {
        ResolveFailure::RateLimited
    } else if lower.contains("unsupported url")
        || lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("sign in to confirm")
        || lower.contains("drm")
    {
        ResolveFailure::Unplayable
    } else {
        ResolveFailure::NotFound
    }
}

fn parse_output(query: &str, stdout: &str) -> Result<Track, Error> {
    let line = stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::resolve(ResolveFailure::NotFound, query))?;
    let info: YtDlpInfo = serde_json::from_str(line)?;

    let stream_url = info
        .url
        .ok_or_else(|| Error::resolve(ResolveFailure::Unplayable, query))?;
    let id = match &info.extractor_key {
        Some(key) => format!("{}:{}", key.to_ascii_lowercase(), info.id),
        None => info.id.clone(),
    };
    let source_url = info.webpage_url.unwrap_or_else(|| query.to_string());

    let mut track = Track::new(id, info.title, source_url).with_stream(StreamDescriptor {
        stream_url,
        format: info.ext,
    });
    if let Some(artist) = info.artist.or(info.uploader) {
        track = track.with_artist(artist);
    }
    if let Some(secs) = info.duration.filter(|d| d.is_finite() && *d > 0.0) {
        track = track.with_duration(Duration::from_secs_f64(secs));
    }
    Ok(track)
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, Error> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("empty query".into()));
        }
        let target = search_target(query);
        debug!("YtDlpResolver: resolving '{}'", target);

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-j", "--no-playlist", "--no-warnings", "-f", "bestaudio/best"])
            .arg(&target)
            .kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await? {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::fatal(
                    Collaborator::Resolver,
                    format!("'{}' is not installed", self.binary),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("YtDlpResolver: '{}' failed: {}", query, stderr.trim());
            return Err(Error::resolve(classify_failure(&stderr), query));
        }
        parse_output(query, &String::from_utf8_lossy(&output.stdout))
    }
}
