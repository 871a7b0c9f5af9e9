//! RTSP adapter. Grounded on `TODO/capture.rs::CaptureStream::open`: an
//! FFmpeg-backed `VideoCapture` with a 1-frame capture buffer so the source
//! always yields the freshest frame rather than a queued one.

use crate::error::{Error, Result};
use crate::source::OpenParams;
use opencv::videoio::{VideoCapture, CAP_FFMPEG, CAP_PROP_BUFFERSIZE};

pub fn open(url: &str, params: &OpenParams) -> Result<VideoCapture> {
    let target = if params.prefer_tcp && !url.contains("rtsp_transport") {
        format!("{url}?rtsp_transport=tcp")
    } else {
        url.to_string()
    };

    let mut cap = VideoCapture::from_file(&target, CAP_FFMPEG)
        .map_err(|e| Error::SourceUnavailable(format!("rtsp open {url}: {e}")))?;
    let _ = cap.set(CAP_PROP_BUFFERSIZE as i32, 1.0);
    Ok(cap)
}
