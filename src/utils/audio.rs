use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Rough MP3 byte rate used when the real duration is unknown (128 kbit/s).
const ESTIMATED_BYTES_PER_SECOND: f64 = 16_000.0;

pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Returns the mime type and decoded payload of a base64 `data:` URI.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URI has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("Only base64 data URIs are supported"))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .context("Invalid base64 in data URI")?;
    Ok((mime.to_string(), bytes))
}

/// File extension for the audio mime types the TTS providers return.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" | "audio/ogg; codecs=opus" => "ogg",
        "audio/pcm" => "pcm",
        _ => "mp3",
    }
}

/// Merges audio chunks via simple binary concatenation.
/// Suitable for MP3 or other stream-based formats.
pub fn merge_binary_chunks<W: Write>(chunks: &[Vec<u8>], output: &mut W) -> Result<()> {
    for chunk in chunks {
        output.write_all(chunk)?;
    }
    output.flush()?;
    Ok(())
}

pub fn write_merged(chunks: &[Vec<u8>], output_path: &Path) -> Result<()> {
    if chunks.is_empty() {
        return Err(anyhow!("No audio to write"));
    }
    let mut file = std::fs::File::create(output_path)
        .with_context(|| format!("Failed to create {:?}", output_path))?;
    merge_binary_chunks(chunks, &mut file)
}

/// Playback length guess for `len` bytes of audio at the given rate.
pub fn estimate_duration(len: usize, rate: f32) -> Duration {
    let rate = if rate > 0.0 { rate as f64 } else { 1.0 };
    Duration::from_secs_f64(len as f64 / ESTIMATED_BYTES_PER_SECOND / rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_round_trip() -> Result<()> {
        let uri = encode_data_uri("audio/mpeg", b"ID3\x03audio");
        assert!(uri.starts_with("data:audio/mpeg;base64,"));
        let (mime, bytes) = decode_data_uri(&uri)?;
        assert_eq!(mime, "audio/mpeg");
        assert_eq!(bytes, b"ID3\x03audio");
        Ok(())
    }

    #[test]
    fn test_decode_rejects_other_urls() {
        assert!(decode_data_uri("https://example.com/a.mp3").is_err());
        assert!(decode_data_uri("data:audio/mpeg,plain").is_err());
        assert!(decode_data_uri("data:audio/mpeg;base64").is_err());
    }

    #[test]
    fn test_merge_binary_files() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let output = temp_dir.path().join("out.mp3");

        write_merged(&[b"Hello".to_vec(), b"World".to_vec()], &output)?;

        let content = std::fs::read(&output)?;
        assert_eq!(content, b"HelloWorld");
        assert!(write_merged(&[], &output).is_err());
        Ok(())
    }

    #[test]
    fn test_estimate_duration_scales_with_rate() {
        assert_eq!(estimate_duration(16_000, 1.0), Duration::from_secs(1));
        assert_eq!(estimate_duration(16_000, 2.0), Duration::from_millis(500));
        assert_eq!(estimate_duration(16_000, 0.0), Duration::from_secs(1));
    }
}
