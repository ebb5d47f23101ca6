//! Persistent FFmpeg pipe that yields downscaled RGB24 frames with PTS,
//! synchronized by scraping `showinfo` lines off stderr on a dedicated task.
//!
//! The decode is intentionally downscaled (480px wide) and resampled to 1fps
//! before reaching Rust: the scene segmenter only needs enough resolution for
//! a perceptual hash and a Laplacian-sharpness comparison, not the source
//! frame.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

const OUT_WIDTH: u32 = 480;
const PTS_QUEUE_TIMEOUT_SECS: u64 = 10;

/// One decoded frame: raw RGB24 bytes plus its presentation timestamp.
#[derive(Debug, Clone)]
pub struct ScannedFrame {
    pub bytes: Vec<u8>,
    pub pts: f64,
}

pub struct VideoScanner {
    input_path: PathBuf,
    out_width: u32,
    out_height: u32,
    frame_byte_size: usize,
    start_pts: Option<f64>,
}

impl VideoScanner {
    /// Probe the source for dimensions up front so callers can size buffers
    /// and compute the even output height before decoding begins.
    pub async fn new(input_path: impl AsRef<Path>, start_pts: Option<f64>) -> MediaResult<Self> {
        let input_path = input_path.as_ref().to_path_buf();
        if !input_path.exists() {
            return Err(MediaError::FileNotFound(input_path));
        }
        let info = probe_video(&input_path).await?;
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "ffprobe returned invalid dimensions for {}",
                input_path.display()
            )));
        }
        let out_height = Self::output_height(info.width, info.height);
        let frame_byte_size = (OUT_WIDTH * out_height * 3) as usize;
        Ok(Self {
            input_path,
            out_width: OUT_WIDTH,
            out_height,
            frame_byte_size,
            start_pts,
        })
    }

    /// Even output height preserving aspect ratio; both the pipe writer and
    /// the reader must agree on this or frames desync.
    fn output_height(src_width: u32, src_height: u32) -> u32 {
        let scaled = OUT_WIDTH as f64 * src_height as f64 / src_width as f64;
        ((scaled as u32) / 2) * 2
    }

    pub fn out_width(&self) -> u32 {
        self.out_width
    }

    pub fn out_height(&self) -> u32 {
        self.out_height
    }

    pub fn frame_byte_size(&self) -> usize {
        self.frame_byte_size
    }

    fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "info".to_string()];
        args.push("-hwaccel".to_string());
        args.push("auto".to_string());
        if let Some(ss) = self.start_pts {
            args.push("-ss".to_string());
            args.push(format!("{ss}"));
        }
        args.push("-i".to_string());
        args.push(self.input_path.to_string_lossy().to_string());
        args.push("-vf".to_string());
        args.push(format!(
            "fps=1,scale={}:{},showinfo",
            self.out_width, self.out_height
        ));
        args.push("-f".to_string());
        args.push("rawvideo".to_string());
        args.push("-pix_fmt".to_string());
        args.push("rgb24".to_string());
        args.push("pipe:1".to_string());
        args
    }

    /// Spawn the decode pipe and stream frames through an mpsc channel so the
    /// caller can process each one (phash, sharpness) without blocking the
    /// stdout-reading loop. The channel closes when the process exits.
    pub fn spawn(self) -> MediaResult<FrameStream> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut child = Command::new("ffmpeg")
            .args(self.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout not captured");
        let stderr = child.stderr.take().expect("stderr not captured");

        let (pts_tx, mut pts_rx) = mpsc::unbounded_channel::<f64>();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(pts) = parse_pts_time(&line) {
                    let _ = pts_tx.send(pts);
                }
            }
        });

        let (frame_tx, frame_rx) = mpsc::channel::<MediaResult<ScannedFrame>>(4);
        let frame_byte_size = self.frame_byte_size;
        let read_task = tokio::spawn(async move {
            let mut reader = stdout;
            let mut last_pts = -1.0f64;
            loop {
                let mut buf = vec![0u8; frame_byte_size];
                if let Err(e) = reader.read_exact(&mut buf).await {
                    if e.kind() != std::io::ErrorKind::UnexpectedEof {
                        let _ = frame_tx.send(Err(MediaError::Io(e))).await;
                    }
                    break;
                }
                let pts = match tokio::time::timeout(
                    std::time::Duration::from_secs(PTS_QUEUE_TIMEOUT_SECS),
                    pts_rx.recv(),
                )
                .await
                {
                    Ok(Some(pts)) => pts,
                    Ok(None) => {
                        last_pts += 1.0;
                        last_pts
                    }
                    Err(_) => {
                        let _ = frame_tx
                            .send(Err(MediaError::internal(
                                "no PTS from ffmpeg stderr within timeout",
                            )))
                            .await;
                        break;
                    }
                };
                last_pts = pts;
                if frame_tx
                    .send(Ok(ScannedFrame { bytes: buf, pts }))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(FrameStream {
            child,
            frame_rx,
            _stderr_task: stderr_task,
            _read_task: read_task,
        })
    }
}

/// Handle to a running scan; drop or call [`FrameStream::finish`] to reap the
/// child process.
pub struct FrameStream {
    child: Child,
    frame_rx: mpsc::Receiver<MediaResult<ScannedFrame>>,
    _stderr_task: tokio::task::JoinHandle<()>,
    _read_task: tokio::task::JoinHandle<()>,
}

impl FrameStream {
    pub async fn next_frame(&mut self) -> Option<MediaResult<ScannedFrame>> {
        self.frame_rx.recv().await
    }

    /// Terminate the ffmpeg process, tolerating it having already exited.
    pub async fn finish(mut self) -> MediaResult<()> {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        Ok(())
    }
}

fn parse_pts_time(line: &str) -> Option<f64> {
    if !line.contains("pts_time:") {
        return None;
    }
    let idx = line.find("pts_time:")? + "pts_time:".len();
    let rest = &line[idx..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_height_stays_even_and_preserves_aspect() {
        let h = VideoScanner::output_height(1920, 1080);
        assert_eq!(h % 2, 0);
        assert!((h as f64 - 270.0).abs() < 2.0);
    }

    #[test]
    fn parse_pts_time_extracts_float() {
        let line = "[Parsed_showinfo_1 @ 0x0] n:   3 pts:    90000 pts_time:3.75      ";
        assert_eq!(parse_pts_time(line), Some(3.75));
        assert_eq!(parse_pts_time("no pts here"), None);
    }
}
