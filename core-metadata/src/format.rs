//! # Format Detection
//!
//! Recognizes audio containers from their leading bytes. The declared MIME
//! type or file extension of an upload is never trusted on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{MetadataError, Result};

/// Audio container recognized at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Flac,
    Ogg,
    Wav,
    Mp4,
    Aiff,
    Ape,
    WavPack,
}

impl AudioFormat {
    /// Detect the container from its magic bytes.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }

        let format = match &bytes[..4] {
            b"ID3\x03" | b"ID3\x04" | b"ID3\x02" => AudioFormat::Mp3,
            b"fLaC" => AudioFormat::Flac,
            b"OggS" => AudioFormat::Ogg,
            b"MAC " => AudioFormat::Ape,
            b"wvpk" => AudioFormat::WavPack,
            b"RIFF" if bytes.len() >= 12 && &bytes[8..12] == b"WAVE" => AudioFormat::Wav,
            b"FORM" if bytes.len() >= 12 && matches!(&bytes[8..12], b"AIFF" | b"AIFC") => {
                AudioFormat::Aiff
            }
            _ if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" => AudioFormat::Mp4,
            [0xFF, second, ..] => return Self::detect_frame_sync(*second),
            _ => return None,
        };

        Some(format)
    }

    // MPEG audio frames and ADTS share the 11-bit sync word; the layer bits
    // tell them apart (ADTS always carries layer 0).
    fn detect_frame_sync(second: u8) -> Option<Self> {
        if second & 0xE0 != 0xE0 {
            return None;
        }
        if second & 0x06 == 0 {
            if second & 0xF0 == 0xF0 {
                Some(AudioFormat::Aac)
            } else {
                None
            }
        } else {
            Some(AudioFormat::Mp3)
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
            AudioFormat::Mp4 => "m4a",
            AudioFormat::Aiff => "aiff",
            AudioFormat::Ape => "ape",
            AudioFormat::WavPack => "wv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp4 => "audio/mp4",
            AudioFormat::Aiff => "audio/aiff",
            AudioFormat::Ape => "audio/ape",
            AudioFormat::WavPack => "audio/wavpack",
        }
    }

    /// Map a declared MIME type onto a format, ignoring parameters.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "audio/mpeg" | "audio/mp3" => Some(AudioFormat::Mp3),
            "audio/aac" | "audio/aacp" => Some(AudioFormat::Aac),
            "audio/flac" | "audio/x-flac" => Some(AudioFormat::Flac),
            "audio/ogg" | "audio/vorbis" | "audio/opus" => Some(AudioFormat::Ogg),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some(AudioFormat::Wav),
            "audio/mp4" | "audio/x-m4a" | "audio/m4a" => Some(AudioFormat::Mp4),
            "audio/aiff" | "audio/x-aiff" => Some(AudioFormat::Aiff),
            "audio/ape" | "audio/x-ape" => Some(AudioFormat::Ape),
            "audio/wavpack" | "audio/x-wavpack" => Some(AudioFormat::WavPack),
            _ => None,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Detect the container of an upload, rejecting anything that is not audio.
///
/// `declared_mime` is only compared for diagnostics; the byte signature wins.
pub fn detect_format(bytes: &[u8], declared_mime: Option<&str>) -> Result<AudioFormat> {
    let detected = AudioFormat::detect(bytes).ok_or_else(|| {
        MetadataError::UnsupportedFormat(format!(
            "unrecognized byte signature (declared {})",
            declared_mime.unwrap_or("none")
        ))
    })?;

    if let Some(declared) = declared_mime.and_then(AudioFormat::from_mime_type) {
        if declared != detected {
            debug!(%declared, %detected, "Declared MIME type disagrees with byte signature");
        }
    }

    Ok(detected)
}
