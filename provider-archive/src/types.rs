//! Archive metadata API response types
//!
//! The metadata endpoint is loosely typed: numeric fields arrive as strings
//! or numbers depending on the item, lengths may be `"mm:ss"` or seconds, and
//! track numbers may carry a total (`"3/12"`). Parsing here is lenient and
//! drops values it cannot interpret instead of rejecting the document.

use serde::{Deserialize, Deserializer, Serialize};

/// `GET {base}/metadata/{item_id}` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataResponse {
    #[serde(default)]
    pub metadata: ItemMetadata,

    #[serde(default)]
    pub files: Vec<ArchiveFile>,
}

/// Item-level descriptive fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub title: Option<String>,

    /// Some items list several creators; they are joined with ", "
    #[serde(default, deserialize_with = "one_or_many")]
    pub creator: Option<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub description: Option<String>,
}

/// One file entry of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub name: String,

    #[serde(default)]
    pub format: Option<String>,

    /// Size in bytes
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,

    /// Duration in seconds
    #[serde(default, deserialize_with = "lenient_length")]
    pub length: Option<f64>,

    #[serde(default, deserialize_with = "lenient_track")]
    pub track: Option<u32>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub title: Option<String>,
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "oga", "opus", "flac", "m4a", "wav"];
const AUDIO_FORMAT_MARKERS: &[&str] = &["mp3", "ogg", "vorbis", "opus", "flac", "wave", "aac"];

impl ArchiveFile {
    /// Whether this entry is a playable audio file (as opposed to images,
    /// torrents, XML sidecars and similar derivatives).
    pub fn is_audio(&self) -> bool {
        let by_extension = self
            .name
            .rsplit_once('.')
            .map(|(_, ext)| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);

        let by_format = self
            .format
            .as_deref()
            .map(|format| {
                let format = format.to_ascii_lowercase();
                AUDIO_FORMAT_MARKERS.iter().any(|m| format.contains(m))
            })
            .unwrap_or(false);

        by_extension || by_format
    }

    /// MIME type guessed from the file extension.
    pub fn mime_type(&self) -> Option<&'static str> {
        let (_, ext) = self.name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some("audio/mpeg"),
            "ogg" | "oga" => Some("audio/ogg"),
            "opus" => Some("audio/opus"),
            "flac" => Some("audio/flac"),
            "m4a" => Some("audio/mp4"),
            "wav" => Some("audio/wav"),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(u64),
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Int(n)) => Some(n),
        Some(Scalar::Float(f)) if f.is_finite() && f >= 0.0 => Some(f as u64),
        Some(Scalar::Text(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_length<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Int(n)) => Some(n as f64),
        Some(Scalar::Float(f)) if f.is_finite() && f >= 0.0 => Some(f),
        Some(Scalar::Text(s)) => parse_length(&s),
        _ => None,
    })
}

fn lenient_track<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Int(n)) => u32::try_from(n).ok(),
        Some(Scalar::Float(f)) if f.is_finite() && f >= 0.0 => Some(f as u32),
        Some(Scalar::Text(s)) => s.split('/').next().and_then(|t| t.trim().parse().ok()),
        _ => None,
    })
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => Some(s),
        Some(OneOrMany::Many(items)) if !items.is_empty() => Some(items.join(", ")),
        _ => None,
    })
}

/// Parse `"ss"`, `"ss.fff"`, `"mm:ss"` or `"hh:mm:ss"` into seconds.
pub fn parse_length(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut seconds = 0.0;
    for part in raw.split(':') {
        let value: f64 = part.trim().parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        seconds = seconds * 60.0 + value;
    }
    Some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_mixed_field_types() {
        let json = r#"{
            "metadata": { "identifier": "lectures", "title": "Lectures", "creator": ["A", "B"] },
            "files": [
                { "name": "01.mp3", "format": "VBR MP3", "size": "1048576", "length": "03:25", "track": "1/12" },
                { "name": "02.mp3", "format": "VBR MP3", "size": 2048, "length": 61.5, "track": 2 },
                { "name": "cover.jpg", "format": "JPEG", "size": "not a number" }
            ]
        }"#;

        let response: MetadataResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.metadata.creator.as_deref(), Some("A, B"));
        assert_eq!(response.files[0].size, Some(1_048_576));
        assert_eq!(response.files[0].length, Some(205.0));
        assert_eq!(response.files[0].track, Some(1));
        assert_eq!(response.files[1].size, Some(2048));
        assert_eq!(response.files[1].length, Some(61.5));
        assert_eq!(response.files[2].size, None);
    }

    #[test]
    fn test_missing_sections_default() {
        let response: MetadataResponse = serde_json::from_str("{}").unwrap();
        assert!(response.files.is_empty());
        assert!(response.metadata.title.is_none());
    }

    #[test]
    fn test_parse_length_forms() {
        assert_eq!(parse_length("42"), Some(42.0));
        assert_eq!(parse_length("1:02:03"), Some(3723.0));
        assert_eq!(parse_length("x:10"), None);
        assert_eq!(parse_length(""), None);
    }

    #[test]
    fn test_audio_detection() {
        let file = |name: &str, format: Option<&str>| ArchiveFile {
            name: name.to_string(),
            format: format.map(str::to_string),
            size: None,
            length: None,
            track: None,
            title: None,
        };

        assert!(file("talk.MP3", None).is_audio());
        assert!(file("talk", Some("Ogg Vorbis")).is_audio());
        assert!(!file("item_meta.xml", Some("Metadata")).is_audio());
        assert_eq!(file("talk.ogg", None).mime_type(), Some("audio/ogg"));
    }
}
