//! HLS adapter. Same FFmpeg demuxer path as RTSP (`CaptureStream::open`),
//! minus the buffer-size tweak — HLS segments are already chunked upstream,
//! so pinning a 1-frame capture buffer just adds reopen churn.

use crate::error::{Error, Result};
use crate::source::OpenParams;
use opencv::videoio::{VideoCapture, CAP_FFMPEG};

pub fn open(url: &str, _params: &OpenParams) -> Result<VideoCapture> {
    VideoCapture::from_file(url, CAP_FFMPEG)
        .map_err(|e| Error::SourceUnavailable(format!("hls open {url}: {e}")))
}
