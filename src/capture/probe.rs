// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The short RTSP probe run before each capture attempt: reads codec info
//! (h264/hevc, audio presence) that feeds the transcoder invocation.

use crate::config::TranscoderConfig;
use crate::ffmpeg::{self, StreamInfo, VideoCodec};
use base::{err, Error};
use serde::Deserialize;

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: String,
    #[serde(default)]
    codec_name: Option<String>,
}

/// Interprets `ffprobe -print_format json -show_streams` output.
pub fn parse_probe_output(json: &str) -> Result<StreamInfo, Error> {
    let out: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| err!(Unavailable, msg("unparseable ffprobe output"), source(e)))?;
    let mut video_codec = None;
    let mut has_audio = false;
    for s in &out.streams {
        match s.codec_type.as_str() {
            "video" => {
                let name = s.codec_name.as_deref().unwrap_or("");
                match VideoCodec::parse(name) {
                    Some(c) => video_codec = Some(c),
                    None => {
                        return Err(err!(
                            FailedPrecondition,
                            msg("unsupported video codec {name:?}")
                        ))
                    }
                }
            }
            "audio" => has_audio = true,
            _ => {}
        }
    }
    match video_codec {
        Some(video_codec) => Ok(StreamInfo {
            video_codec,
            has_audio,
        }),
        None => Err(err!(Unavailable, msg("probe found no video stream"))),
    }
}

/// Probes the RTSP endpoint, bounded by the configured probe timeout.
pub async fn probe_rtsp(cfg: &TranscoderConfig, rtsp_url: &str) -> Result<StreamInfo, Error> {
    let args: Vec<String> = vec![
        "-v".into(),
        "quiet".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        "-print_format".into(),
        "json".into(),
        "-show_streams".into(),
        rtsp_url.into(),
    ];
    let out = ffmpeg::run(
        &cfg.ffprobe_bin,
        &args,
        std::time::Duration::from_secs(cfg.probe_timeout_secs),
    )
    .await?;
    parse_probe_output(&out)
}
