//! ffmpeg invocation for subtitle + font muxing.

use std::path::Path;
use std::process::Stdio;

use process_utils::tokio_command;
use tokio::process::Command;

use crate::domain::Job;
use crate::utils::filename::extension_of;

const TRUETYPE_MIME: &str = "application/x-truetype-font";
const OPENTYPE_MIME: &str = "application/vnd.ms-opentype";

/// MIME type recorded on the embedded font attachment.
pub fn font_mime_type(font_path: &Path) -> &'static str {
    let name = font_path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    match extension_of(&name).as_deref() {
        Some("otf") => OPENTYPE_MIME,
        _ => TRUETYPE_MIME,
    }
}

/// Build ffmpeg arguments for a job.
///
/// Video and audio are stream-copied, the font is attached, and the subtitle
/// becomes the default subtitle track. Progress markers go to stdout.
pub fn build_args(job: &Job) -> Vec<String> {
    let inputs = &job.inputs;
    let mut args = Vec::with_capacity(32);

    args.push("-y".to_string());
    args.push("-hide_banner".to_string());

    // Inputs
    args.extend(["-i".to_string(), inputs.video_source.clone()]);
    args.extend([
        "-i".to_string(),
        inputs.subtitle_path.to_string_lossy().into_owned(),
    ]);

    // Font attachment
    args.extend([
        "-attach".to_string(),
        inputs.font_path.to_string_lossy().into_owned(),
    ]);
    args.extend([
        "-metadata:s:t".to_string(),
        format!("mimetype={}", font_mime_type(&inputs.font_path)),
    ]);

    // Stream copy, no re-encode
    args.extend(["-c".to_string(), "copy".to_string()]);

    // Stream mapping
    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    args.extend(["-map".to_string(), "0:a:0?".to_string()]);
    args.extend(["-map".to_string(), "1:s:0".to_string()]);
    args.extend(["-disposition:s:0".to_string(), "default".to_string()]);

    args.extend(["-progress".to_string(), "pipe:1".to_string()]);

    args.push(job.output_path.to_string_lossy().into_owned());

    args
}

/// Build the ffmpeg command for a job with both output channels piped.
pub fn mux_command(ffmpeg_path: &str, job: &Job) -> Command {
    let mut cmd = tokio_command(ffmpeg_path);
    cmd.args(build_args(job))
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}
