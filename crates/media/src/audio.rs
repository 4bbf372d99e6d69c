//! Voice-note preparation: normalize any input to Opus-in-Ogg, probe its
//! duration and compute the 32-sample amplitude envelope shown by clients.

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    tokio::process::Command,
    tracing::debug,
    wabridge_config::MediaConfig,
};

use crate::mime;

/// MIME type of prepared voice notes.
pub const VOICE_MIME: &str = "audio/ogg; codecs=opus";

/// Number of envelope samples.
pub const WAVEFORM_LEN: usize = 32;

/// Lowest envelope value, keeps silent passages visible.
const WAVEFORM_FLOOR: u8 = 3;

const WAVEFORM_FILTER: &str = "aformat=channel_layouts=mono,highpass=f=200,lowpass=f=3000,\
     compand=gain=20:attack=0.01:release=0.05:points=-90/-90 -70/-90 -15/-15 0/-10,\
     showwavespic=s=32x32:colors=black:filter=peak:scale=lin";

/// Max stderr bytes kept in error messages.
const STDERR_TAIL: usize = 400;

/// A voice note ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAudio {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub duration_secs: u32,
    pub waveform: Vec<u8>,
}

#[async_trait]
pub trait AudioPipeline: Send + Sync {
    /// Transcode `raw` into a voice note. Any failure means the caller should
    /// send the original bytes as a document instead.
    async fn prepare(&self, raw: &[u8]) -> Result<PreparedAudio>;
}

/// [`AudioPipeline`] backed by the `ffmpeg` and `ffprobe` binaries.
pub struct FfmpegAudio {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl FfmpegAudio {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            timeout: config.command_timeout(),
        }
    }

    async fn run(&self, program: &str, args: &[&OsStr]) -> Result<Vec<u8>> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("{program} timed out after {:?}", self.timeout))?
            .with_context(|| format!("failed to spawn {program}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(tail_start..).unwrap_or(&stderr);
            bail!("{program} exited with {}: {}", output.status, tail.trim());
        }
        Ok(output.stdout)
    }

    async fn to_wav(&self, input: &Path, output: &Path) -> Result<()> {
        let args: [&OsStr; 10] = [
            "-y".as_ref(),
            "-i".as_ref(),
            input.as_os_str(),
            "-ar".as_ref(),
            "16000".as_ref(),
            "-ac".as_ref(),
            "1".as_ref(),
            "-c:a".as_ref(),
            "pcm_s16le".as_ref(),
            output.as_os_str(),
        ];
        self.run(&self.ffmpeg, &args).await.map(drop)
    }

    async fn probe_duration(&self, input: &Path) -> Result<f64> {
        let args: [&OsStr; 7] = [
            "-v".as_ref(),
            "error".as_ref(),
            "-show_entries".as_ref(),
            "format=duration".as_ref(),
            "-of".as_ref(),
            "default=noprint_wrappers=1:nokey=1".as_ref(),
            input.as_os_str(),
        ];
        let stdout = self.run(&self.ffprobe, &args).await?;
        parse_duration(&String::from_utf8_lossy(&stdout))
    }

    async fn render_waveform(&self, input: &Path) -> Result<Vec<u8>> {
        let args: [&OsStr; 13] = [
            "-i".as_ref(),
            input.as_os_str(),
            "-filter_complex".as_ref(),
            WAVEFORM_FILTER.as_ref(),
            "-frames:v".as_ref(),
            "1".as_ref(),
            "-f".as_ref(),
            "image2pipe".as_ref(),
            "-vcodec".as_ref(),
            "rawvideo".as_ref(),
            "-pix_fmt".as_ref(),
            "gray".as_ref(),
            "pipe:1".as_ref(),
        ];
        let pixels = self.run(&self.ffmpeg, &args).await?;
        envelope(&pixels)
    }

    async fn to_opus(&self, input: &Path, output: &Path) -> Result<()> {
        let args: [&OsStr; 16] = [
            "-y".as_ref(),
            "-i".as_ref(),
            input.as_os_str(),
            "-c:a".as_ref(),
            "libopus".as_ref(),
            "-ar".as_ref(),
            "48000".as_ref(),
            "-ac".as_ref(),
            "1".as_ref(),
            "-b:a".as_ref(),
            "128k".as_ref(),
            "-application".as_ref(),
            "voip".as_ref(),
            "-f".as_ref(),
            "ogg".as_ref(),
            output.as_os_str(),
        ];
        self.run(&self.ffmpeg, &args).await.map(drop)
    }
}

#[async_trait]
impl AudioPipeline for FfmpegAudio {
    async fn prepare(&self, raw: &[u8]) -> Result<PreparedAudio> {
        if raw.is_empty() {
            bail!("empty audio input");
        }
        let detected = mime::detect(raw);
        let ext = mime::audio_staging_extension(detected);

        let staging = tempfile::tempdir().context("failed to create staging dir")?;
        let input = staging.path().join(OsString::from(format!("input.{ext}")));
        let wav = staging.path().join("normalized.wav");
        let voice = staging.path().join("voice.ogg");

        tokio::fs::write(&input, raw)
            .await
            .context("failed to stage audio input")?;

        self.to_wav(&input, &wav).await?;
        let duration = self.probe_duration(&wav).await?;
        let waveform = self.render_waveform(&wav).await?;
        self.to_opus(&wav, &voice).await?;

        let data = tokio::fs::read(&voice)
            .await
            .context("failed to read transcoded audio")?;
        if data.is_empty() {
            bail!("transcoder produced no output");
        }

        debug!(
            input_mime = detected,
            input_bytes = raw.len(),
            output_bytes = data.len(),
            duration,
            "voice note prepared"
        );
        Ok(PreparedAudio {
            data,
            mime_type: VOICE_MIME,
            duration_secs: duration.round() as u32,
            waveform,
        })
    }
}

fn parse_duration(stdout: &str) -> Result<f64> {
    let secs: f64 = stdout
        .trim()
        .parse()
        .with_context(|| format!("unparseable duration {:?}", stdout.trim()))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("invalid duration {secs}");
    }
    Ok(secs)
}

/// Reduce a 32×32 grayscale waveform render to 32 amplitude samples in `3..=31`.
///
/// Each row is averaged, then shaped with `pow(x, 0.4) * 1.8 + 0.2` (clamped to
/// 1) so quiet passages stay visible.
pub fn envelope(gray: &[u8]) -> Result<Vec<u8>> {
    let needed = WAVEFORM_LEN * WAVEFORM_LEN;
    if gray.len() < needed {
        bail!("waveform render too small: {} of {needed} bytes", gray.len());
    }
    Ok(gray[..needed]
        .chunks_exact(WAVEFORM_LEN)
        .map(|row| {
            let sum: u32 = row.iter().map(|&px| u32::from(px)).sum();
            let normalized = f64::from(sum) / WAVEFORM_LEN as f64 / 255.0;
            let shaped = (normalized.powf(0.4) * 1.8 + 0.2).min(1.0);
            ((shaped * 31.0) as u8).max(WAVEFORM_FLOOR)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_of_silence_sits_above_floor() {
        let samples = envelope(&[0u8; 1024]).unwrap();
        assert_eq!(samples.len(), WAVEFORM_LEN);
        // 0.2 * 31 = 6.2
        assert!(samples.iter().all(|&v| v == 6));
    }

    #[test]
    fn envelope_of_full_scale_is_max() {
        let samples = envelope(&[255u8; 1024]).unwrap();
        assert!(samples.iter().all(|&v| v == 31));
    }

    #[test]
    fn envelope_is_monotonic_in_loudness() {
        let mut gray = vec![0u8; 1024];
        for (row, chunk) in gray.chunks_mut(32).enumerate() {
            chunk.fill((row * 8) as u8);
        }
        let samples = envelope(&gray).unwrap();
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
        assert!(samples.iter().all(|&v| (3..=31).contains(&v)));
    }

    #[test]
    fn envelope_ignores_trailing_bytes_and_rejects_short_input() {
        assert_eq!(envelope(&[10u8; 1100]).unwrap().len(), WAVEFORM_LEN);
        assert!(envelope(&[0u8; 100]).is_err());
    }

    #[test]
    fn parses_ffprobe_duration() {
        assert!((parse_duration("12.345000\n").unwrap() - 12.345).abs() < 1e-9);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("-1").is_err());
    }

    #[tokio::test]
    async fn missing_binaries_fail_instead_of_panicking() {
        let audio = FfmpegAudio::new(&MediaConfig {
            ffmpeg: "/nonexistent/ffmpeg".into(),
            ffprobe: "/nonexistent/ffprobe".into(),
            command_timeout_secs: 5,
        });
        assert!(audio.prepare(b"OggS\0\x02garbage").await.is_err());
        assert!(audio.prepare(b"").await.is_err());
    }
}
