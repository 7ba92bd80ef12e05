use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::{CodecType, CODEC_TYPE_FLAC};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decides whether a file is in the source (lossless) format
pub trait FormatDetector: Send + Sync {
    fn is_flac(&self, path: &Path) -> bool;
}

/// Content-sniffing detector backed by symphonia's probe
///
/// The extension is only a hint; a `.flac` file that doesn't parse as FLAC
/// is rejected, and a FLAC stream with another extension is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeDetector;

impl FormatDetector for ProbeDetector {
    fn is_flac(&self, path: &Path) -> bool {
        match probe_codec(path) {
            Some(codec) => codec == CODEC_TYPE_FLAC,
            None => false,
        }
    }
}

/// Codec of the default track, if the file probes as audio
fn probe_codec(path: &Path) -> Option<CodecType> {
    let file = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let codec = probed.format.default_track().map(|t| t.codec_params.codec);
    log::debug!("Probed {:?}: {:?}", path.file_name(), codec);
    codec
}
