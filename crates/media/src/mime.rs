//! Content sniffing and file-extension mapping.

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a MIME type from leading magic bytes.
pub fn detect(data: &[u8]) -> &'static str {
    let starts = |sig: &[u8]| data.starts_with(sig);

    if starts(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if starts(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if starts(b"GIF87a") || starts(b"GIF89a") {
        "image/gif"
    } else if starts(b"RIFF") && data.get(8..12) == Some(&b"WEBP"[..]) {
        "image/webp"
    } else if starts(b"RIFF") && data.get(8..12) == Some(&b"WAVE"[..]) {
        "audio/wav"
    } else if starts(b"OggS") {
        "audio/ogg"
    } else if starts(b"ID3") || is_mpeg_frame(data) {
        "audio/mpeg"
    } else if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
        "video/webm"
    } else if data.get(4..8) == Some(&b"ftyp"[..]) {
        match data.get(8..11) {
            Some(b"M4A") | Some(b"M4B") => "audio/x-m4a",
            _ => "video/mp4",
        }
    } else if starts(b"%PDF-") {
        "application/pdf"
    } else if starts(b"PK\x03\x04") {
        "application/zip"
    } else {
        OCTET_STREAM
    }
}

fn is_mpeg_frame(data: &[u8]) -> bool {
    matches!(data, [0xFF, b, ..] if b & 0xE0 == 0xE0)
}

fn essence(mime: &str) -> &str {
    mime.split(';').next().unwrap_or(mime).trim()
}

/// File extension used when naming stored objects.
pub fn extension(mime: &str) -> &'static str {
    match essence(mime) {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/ogg" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" | "video/webm" => "webm",
        "audio/x-m4a" | "audio/mp4" => "m4a",
        "video/mp4" => "mp4",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Extension for staging raw audio before handing it to ffmpeg.
pub fn audio_staging_extension(mime: &str) -> &'static str {
    match essence(mime) {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "audio/webm" | "video/webm" => "webm",
        "audio/x-m4a" | "audio/mp4" => "m4a",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0], "image/jpeg")]
    #[case(b"\x89PNG\r\n\x1a\n\0\0", "image/png")]
    #[case(b"GIF89a...", "image/gif")]
    #[case(b"RIFF\0\0\0\0WEBPVP8 ", "image/webp")]
    #[case(b"RIFF\0\0\0\0WAVEfmt ", "audio/wav")]
    #[case(b"OggS\0\x02", "audio/ogg")]
    #[case(b"ID3\x04\0", "audio/mpeg")]
    #[case(&[0xFF, 0xFB, 0x90, 0x64], "audio/mpeg")]
    #[case(&[0x1A, 0x45, 0xDF, 0xA3, 0x9F], "video/webm")]
    #[case(b"\0\0\0\x20ftypM4A \0", "audio/x-m4a")]
    #[case(b"\0\0\0\x18ftypisom", "video/mp4")]
    #[case(b"%PDF-1.7", "application/pdf")]
    #[case(b"hello world", OCTET_STREAM)]
    #[case(b"", OCTET_STREAM)]
    fn sniffs(#[case] data: &[u8], #[case] expected: &str) {
        assert_eq!(detect(data), expected);
    }

    #[rstest]
    #[case("image/jpeg", "jpg")]
    #[case("image/jpg", "jpg")]
    #[case("audio/ogg; codecs=opus", "ogg")]
    #[case("audio/mpeg", "mp3")]
    #[case("video/mp4", "mp4")]
    #[case("application/pdf", "pdf")]
    #[case("application/x-unknown", "bin")]
    fn extensions(#[case] mime: &str, #[case] ext: &str) {
        assert_eq!(extension(mime), ext);
    }

    #[test]
    fn staging_extension_for_unknown_audio() {
        assert_eq!(audio_staging_extension("audio/mpeg"), "mp3");
        assert_eq!(audio_staging_extension("audio/x-m4a"), "m4a");
        assert_eq!(audio_staging_extension(OCTET_STREAM), "bin");
    }
}
