//! Video link helpers: YouTube id extraction, thumbnails and embeddable
//! player URLs.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

const YOUTUBE_ID_LEN: usize = 11;

static YOUTUBE_ID_FALLBACK: OnceLock<Regex> = OnceLock::new();
static YOUTUBE_LOOSE: OnceLock<Regex> = OnceLock::new();
static VIMEO: OnceLock<Regex> = OnceLock::new();

fn youtube_id_fallback() -> &'static Regex {
    YOUTUBE_ID_FALLBACK.get_or_init(|| {
        Regex::new(r"(?:youtube\.com/.*(?:v=|/embed/|/v/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})")
            .expect("valid regex")
    })
}

fn youtube_loose() -> &'static Regex {
    YOUTUBE_LOOSE.get_or_init(|| Regex::new(r"(youtu\.be/|v=)([a-zA-Z0-9_-]+)").expect("valid regex"))
}

fn vimeo() -> &'static Regex {
    VIMEO.get_or_init(|| Regex::new(r"vimeo\.com/(\d+)").expect("valid regex"))
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == YOUTUBE_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn id_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    if host == "youtu.be" || host == "www.youtu.be" {
        return segments.next().filter(|id| is_video_id(id)).map(str::to_string);
    }
    if host != "youtube.com" && !host.ends_with(".youtube.com") {
        return None;
    }

    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        if is_video_id(&v) {
            return Some(v.into_owned());
        }
    }
    match segments.next()? {
        "embed" | "v" | "shorts" => segments.next().filter(|id| is_video_id(id)).map(str::to_string),
        _ => None,
    }
}

/// Extract the 11-character YouTube video id from a watch, short, embed or
/// `youtu.be` link.
pub fn youtube_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if let Some(id) = Url::parse(url).ok().as_ref().and_then(id_from_url) {
        return Some(id);
    }
    youtube_id_fallback()
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Medium-quality thumbnail for a YouTube link.
pub fn youtube_thumbnail(url: &str) -> Option<String> {
    youtube_video_id(url).map(|id| format!("https://img.youtube.com/vi/{}/mqdefault.jpg", id))
}

/// Player URL suitable for an iframe. Links that are neither YouTube nor
/// Vimeo come back unchanged.
pub fn embed_url(url: &str) -> String {
    if let Some(id) = youtube_video_id(url) {
        return format!("https://www.youtube.com/embed/{}", id);
    }
    if let Some(caps) = youtube_loose().captures(url) {
        return format!("https://www.youtube.com/embed/{}", &caps[2]);
    }
    if let Some(caps) = vimeo().captures(url) {
        return format!("https://player.vimeo.com/video/{}", &caps[1]);
    }
    url.to_string()
}
