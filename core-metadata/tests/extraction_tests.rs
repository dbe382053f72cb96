//! Integration tests for the ingest boundary
//!
//! Audio fixtures are synthesized in memory so the suite runs without binary
//! files on disk.

use core_metadata::{content_hash, detect_format, AudioFormat, MetadataExtractor, MetadataError};

/// Minimal PCM WAV: 8 kHz, mono, 8-bit, `seconds` long.
fn pcm_wav(seconds: u32) -> Vec<u8> {
    let sample_rate: u32 = 8000;
    let data_len = sample_rate * seconds;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // channels
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes()); // byte rate
    bytes.extend_from_slice(&1u16.to_le_bytes()); // block align
    bytes.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0x80);
    bytes
}

#[test]
fn test_untagged_wav_uses_file_name_and_real_duration() {
    let wav = pcm_wav(2);
    assert_eq!(detect_format(&wav, Some("audio/wav")).unwrap(), AudioFormat::Wav);

    let extractor = MetadataExtractor::new();
    let metadata = extractor
        .try_extract(&wav, "Nina Simone - Sinnerman.wav")
        .expect("valid PCM wav parses");

    assert_eq!(metadata.artist, "Nina Simone");
    assert_eq!(metadata.title, "Sinnerman");
    assert_eq!(metadata.album, "Unknown Album");
    assert_eq!(metadata.duration_seconds, 2);
    assert!(metadata.cover.is_none());
}

#[test]
fn test_non_audio_rejected_before_extraction() {
    let pdf = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj".to_vec();
    let err = detect_format(&pdf, Some("audio/mpeg")).unwrap_err();
    assert!(matches!(err, MetadataError::UnsupportedFormat(_)));
}

#[test]
fn test_truncated_audio_still_yields_metadata() {
    let mut wav = pcm_wav(1);
    wav.truncate(20);

    let metadata = MetadataExtractor::default().extract(&wav, "broken.wav");
    assert_eq!(metadata.title, "broken");
    assert_eq!(metadata.artist, "Unknown Artist");
}

#[test]
fn test_identical_bytes_hash_identically() {
    let a = pcm_wav(1);
    let b = pcm_wav(1);
    let c = pcm_wav(2);
    assert_eq!(content_hash(&a), content_hash(&b));
    assert_ne!(content_hash(&a), content_hash(&c));
}
