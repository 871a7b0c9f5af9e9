//! Screen-capture adapter. `url` is a platform FFmpeg input descriptor
//! (`x11grab`/`gdigrab`/`avfoundation` device string), already assembled by
//! the host — resolving "which display/window" is out of scope here, same
//! as URL resolution is for `Http`. Opened through the same FFmpeg path as
//! every other streaming variant; OpenCV dispatches on the descriptor
//! prefix opaquely.

use crate::error::{Error, Result};
use crate::source::OpenParams;
use opencv::videoio::{VideoCapture, CAP_FFMPEG};

pub fn open(url: &str, _params: &OpenParams) -> Result<VideoCapture> {
    VideoCapture::from_file(url, CAP_FFMPEG)
        .map_err(|e| Error::SourceUnavailable(format!("screen open {url}: {e}")))
}
