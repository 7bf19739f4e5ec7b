// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Construction and supervision of ffmpeg/ffprobe child processes.
//!
//! Argument builders are pure functions over the invocation intent, so the
//! exact command lines are unit-testable without spawning anything. The
//! spawn/wait half captures stderr and keeps its tail for error reporting;
//! a non-zero exit is always an error here, the caller decides retry.

use crate::config::{Corner, TranscoderConfig, WatermarkConfig};
use base::time::Duration;
use base::{err, Error, ErrorKind, ResultExt};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// How much of a failing child's stderr to keep in the error message.
pub const STDERR_TAIL_BYTES: usize = 2048;

/// Resolution ladder for the watermark/scale pass.
pub const HEIGHT_LADDER: [u32; 4] = [360, 480, 720, 1080];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl VideoCodec {
    pub fn bitstream_filter(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264_mp4toannexb",
            VideoCodec::Hevc => "hevc_mp4toannexb",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "h264" => Some(VideoCodec::H264),
            "hevc" | "h265" => Some(VideoCodec::Hevc),
            _ => None,
        }
    }
}

/// What the RTSP probe learned; feeds the capture invocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    pub video_codec: VideoCodec,
    pub has_audio: bool,
}

/// Snaps a requested height onto the preset ladder (closest wins; ties go
/// down).
pub fn ladder_height(requested: u32) -> u32 {
    *HEIGHT_LADDER
        .iter()
        .min_by_key(|&&h| (h.abs_diff(requested), h))
        .expect("ladder is nonempty")
}

/// Arguments for the long-running capture transcoder: RTSP in, fixed-length
/// segments out.
pub fn capture_args(rtsp_url: &str, info: StreamInfo, segment_secs: i64, out_pattern: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        // Read timeout, µs. A camera going quiet kills the read rather than
        // hanging the child forever; the worker restarts from Probing.
        "-rw_timeout".into(),
        "30000000".into(),
        "-i".into(),
        rtsp_url.into(),
        "-c:v".into(),
        "copy".into(),
        "-bsf:v".into(),
        info.video_codec.bitstream_filter().into(),
    ];
    if info.has_audio {
        args.extend([
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-ar".into(),
            "44100".into(),
        ]);
    } else {
        args.push("-an".into());
    }
    args.extend([
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        segment_secs.to_string(),
        "-segment_format".into(),
        "mp4".into(),
        "-reset_timestamps".into(),
        "1".into(),
        "-strftime".into(),
        "1".into(),
        "-avoid_negative_ts".into(),
        "make_zero".into(),
        "-flags".into(),
        "+global_header".into(),
        out_pattern.to_string_lossy().into_owned(),
    ]);
    args
}

/// Stream-copy cut: `skip` into the input, `take` long.
pub fn cut_args(input: &Path, skip: Duration, take: Duration, out: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        skip.as_secs().to_string(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-t".into(),
        take.as_secs().to_string(),
        "-c".into(),
        "copy".into(),
        "-avoid_negative_ts".into(),
        "make_zero".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ]
}

/// Stream-copy concatenation of a prepared concat-demuxer list file.
pub fn concat_args(list: &Path, out: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ]
}

fn overlay_position(corner: Corner, margin: u32) -> String {
    match corner {
        Corner::TopLeft => format!("{margin}:{margin}"),
        Corner::TopRight => format!("W-w-{margin}:{margin}"),
        Corner::BottomLeft => format!("{margin}:H-h-{margin}"),
        Corner::BottomRight => format!("W-w-{margin}:H-h-{margin}"),
    }
}

/// The single re-encode pass: optional watermark overlay plus scale onto the
/// ladder, with either the configured hardware encoder or software x264.
pub fn watermark_scale_args(
    input: &Path,
    watermark_png: Option<&Path>,
    wm: &WatermarkConfig,
    height: u32,
    hw_encoder: Option<&str>,
    out: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];
    let opacity = wm.opacity.clamp(0.0, 1.0);
    match watermark_png {
        Some(png) => {
            args.extend(["-i".into(), png.to_string_lossy().into_owned()]);
            let filter = format!(
                "[0:v]scale=-2:{height}[base];\
                 [1:v]format=rgba,colorchannelmixer=aa={opacity}[wm];\
                 [base][wm]overlay={}",
                overlay_position(wm.corner, wm.margin)
            );
            args.extend(["-filter_complex".into(), filter]);
        }
        None => {
            args.extend(["-vf".into(), format!("scale=-2:{height}")]);
        }
    }
    match hw_encoder {
        Some(enc) => args.extend(["-c:v".into(), enc.into(), "-b:v".into(), "4M".into()]),
        None => args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "fast".into(),
            "-crf".into(),
            "23".into(),
        ]),
    }
    args.extend([
        "-c:a".into(),
        "copy".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ]);
    args
}

/// A single frame sampled at `at_secs`, as PNG.
pub fn thumbnail_args(input: &Path, at_secs: f64, out: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format!("{at_secs:.2}"),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-frames:v".into(),
        "1".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ]
}

/// The low-bitrate preview, derived from the already-watermarked clip.
pub fn preview_args(input: &Path, height: u32, out: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vf".into(),
        format!("scale=-2:{height}"),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "fast".into(),
        "-crf".into(),
        "28".into(),
        "-b:a".into(),
        "96k".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-y".into(),
        out.to_string_lossy().into_owned(),
    ]
}

/// Keeps the last `max` bytes of `s`, respecting char boundaries.
pub fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Runs a short-lived ffmpeg/ffprobe invocation to completion.
///
/// On non-zero exit the stderr tail lands in the error message. On timeout
/// the child is killed and `DeadlineExceeded` is returned.
pub async fn run(
    bin: &Path,
    args: &[String],
    timeout: std::time::Duration,
) -> Result<String, Error> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| err!(Internal, msg("unable to spawn {}", bin.display()), source(e)))?;

    let mut stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");
    let run = async {
        let mut out = String::new();
        let mut errbuf = String::new();
        let (status, _, _) = tokio::join!(
            child.wait(),
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut errbuf),
        );
        let status = status.err_kind(ErrorKind::Internal)?;
        if !status.success() {
            return Err(err!(
                Internal,
                msg(
                    "{} exited with {status}: {}",
                    bin.display(),
                    tail(&errbuf, STDERR_TAIL_BYTES)
                )
            ));
        }
        Ok(out)
    };
    match tokio::time::timeout(timeout, run).await {
        Ok(r) => r,
        Err(_) => Err(err!(
            DeadlineExceeded,
            msg("{} did not finish within {timeout:?}", bin.display())
        )),
    }
}

/// Asks ffprobe for a file's container duration, in seconds.
pub async fn probe_duration(cfg: &TranscoderConfig, path: &Path) -> Result<f64, Error> {
    let args: Vec<String> = vec![
        "-v".into(),
        "error".into(),
        "-show_entries".into(),
        "format=duration".into(),
        "-of".into(),
        "default=nw=1:nk=1".into(),
        path.to_string_lossy().into_owned(),
    ];
    let out = run(
        &cfg.ffprobe_bin,
        &args,
        std::time::Duration::from_secs(cfg.probe_timeout_secs),
    )
    .await?;
    out.lines()
        .next()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| err!(Internal, msg("ffprobe returned no duration for {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn wm_cfg() -> WatermarkConfig {
        toml::from_str("").unwrap()
    }

    #[test]
    fn ladder_snaps() {
        assert_eq!(ladder_height(360), 360);
        assert_eq!(ladder_height(700), 720);
        assert_eq!(ladder_height(1000), 1080);
        assert_eq!(ladder_height(2160), 1080);
        assert_eq!(ladder_height(1), 360);
    }

    #[test]
    fn capture_args_for_h264_with_audio() {
        let args = capture_args(
            "rtsp://u:p@cam/stream1",
            StreamInfo {
                video_codec: VideoCodec::H264,
                has_audio: true,
            },
            60,
            &PathBuf::from("/mnt/a/recordings/cam1/mp4/cam1_%Y%m%d_%H%M%S.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-bsf:v h264_mp4toannexb"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-segment_time 60"));
        assert!(joined.contains("-strftime 1"));
        assert!(joined.contains("-reset_timestamps 1"));
        assert!(joined.contains("-avoid_negative_ts make_zero"));
        assert!(joined.ends_with("cam1_%Y%m%d_%H%M%S.mp4"));
    }

    #[test]
    fn capture_args_for_hevc_without_audio() {
        let args = capture_args(
            "rtsp://cam/stream1",
            StreamInfo {
                video_codec: VideoCodec::Hevc,
                has_audio: false,
            },
            60,
            &PathBuf::from("/tmp/out_%Y%m%d_%H%M%S.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-bsf:v hevc_mp4toannexb"));
        assert!(joined.contains("-an"));
        assert!(!joined.contains("aac"));
    }

    #[test]
    fn cut_is_stream_copy() {
        let args = cut_args(
            &PathBuf::from("/mnt/a/chunks/cam1/c.mp4"),
            Duration::seconds(90),
            Duration::seconds(45),
            &PathBuf::from("/tmp/part0.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-ss 90"));
        assert!(joined.contains("-t 45"));
        assert!(joined.contains("-c copy"));
    }

    #[test]
    fn watermark_filter_by_corner() {
        let mut wm = wm_cfg();
        wm.margin = 10;
        wm.corner = Corner::TopLeft;
        let args = watermark_scale_args(
            &PathBuf::from("/tmp/merged.mp4"),
            Some(&PathBuf::from("/mnt/a/watermark/VEN01/watermark_720.png")),
            &wm,
            720,
            None,
            &PathBuf::from("/tmp/clip.ts"),
        );
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.contains("scale=-2:720"));
        assert!(filter.contains("overlay=10:10"));
        assert!(filter.contains("colorchannelmixer=aa=0.8"));
        assert!(args.join(" ").contains("-c:v libx264 -preset fast -crf 23"));
    }

    #[test]
    fn watermark_opacity_is_clamped() {
        let mut wm = wm_cfg();
        wm.opacity = 7.5;
        let args = watermark_scale_args(
            &PathBuf::from("/tmp/merged.mp4"),
            Some(&PathBuf::from("/tmp/wm.png")),
            &wm,
            480,
            None,
            &PathBuf::from("/tmp/clip.ts"),
        );
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.contains("colorchannelmixer=aa=1"));
    }

    #[test]
    fn no_watermark_still_scales() {
        let args = watermark_scale_args(
            &PathBuf::from("/tmp/merged.mp4"),
            None,
            &wm_cfg(),
            1080,
            Some("h264_v4l2m2m"),
            &PathBuf::from("/tmp/clip.ts"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-vf scale=-2:1080"));
        assert!(joined.contains("-c:v h264_v4l2m2m"));
        assert!(!joined.contains("filter_complex"));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        // Multibyte: never split a codepoint.
        let s = "xéé";
        let t = tail(s, 3);
        assert!(s.ends_with(t));
        assert!(t.len() <= 3);
    }
}
