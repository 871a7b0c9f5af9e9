//! Local video file adapter. Opened with `CAP_ANY` so OpenCV picks whatever
//! backend handles the container, rather than forcing FFmpeg demuxing.
//! `FrameSource::next_frame` treats an empty read from a `File` source as
//! `EndOfStream` rather than a stall, since a finite file has no "reconnect".

use crate::error::{Error, Result};
use crate::source::OpenParams;
use opencv::videoio::{VideoCapture, CAP_ANY};

pub fn open(url: &str, _params: &OpenParams) -> Result<VideoCapture> {
    VideoCapture::from_file(url, CAP_ANY)
        .map_err(|e| Error::SourceUnavailable(format!("file open {url}: {e}")))
}
