//! Progressive HTTP(S) media adapter. A direct media URL (already resolved
//! by the host — §4.1 explicitly excludes URL-resolution logic such as
//! extracting a playable stream from a youtube.com page) opened the same way
//! as RTSP/HLS.

use crate::error::{Error, Result};
use crate::source::OpenParams;
use opencv::videoio::{VideoCapture, CAP_FFMPEG};

pub fn open(url: &str, _params: &OpenParams) -> Result<VideoCapture> {
    VideoCapture::from_file(url, CAP_FFMPEG)
        .map_err(|e| Error::SourceUnavailable(format!("http open {url}: {e}")))
}
