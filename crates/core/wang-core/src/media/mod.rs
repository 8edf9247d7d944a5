//! Media collaborators: probe, decode, download and attachment fetch

pub mod decode;
pub mod download;
pub mod fetch;
pub mod probe;
pub mod process;

pub use decode::{FfmpegDecoder, ProcessFrameSource};
pub use download::{MediaDownloader, YtDlpDownloader};
pub use fetch::{fetch_to_file, MAX_ATTACHMENT_BYTES};
pub use probe::{FfprobeProbe, MediaProbe};
pub use process::{run_captured, CapturedOutput};
