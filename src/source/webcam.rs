//! Local webcam adapter. `url` is a device index ("0", "1", ...) rather than
//! a URI; opened through the default backend instead of FFmpeg since V4L2/
//! AVFoundation device enumeration isn't a demuxer concern.

use crate::error::{Error, Result};
use crate::source::OpenParams;
use opencv::videoio::{VideoCapture, CAP_ANY};

pub fn open(url: &str, _params: &OpenParams) -> Result<VideoCapture> {
    let index: i32 = url
        .trim()
        .parse()
        .map_err(|_| Error::UnsupportedSource(format!("webcam index {url} is not an integer")))?;
    VideoCapture::new(index, CAP_ANY)
        .map_err(|e| Error::SourceUnavailable(format!("webcam open {index}: {e}")))
}
