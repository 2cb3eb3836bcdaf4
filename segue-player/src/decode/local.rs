//! Local file decode backend

use crate::decode::backend::{BackendRead, DecodeBackend, SymphoniaCore};
use segue_common::{PlayerError, Result};
use std::fs::File;
use std::path::Path;

/// Synchronous file-backed decode path. Seekable, known length.
pub struct LocalBackend {
    core: SymphoniaCore,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend").finish_non_exhaustive()
    }
}

impl LocalBackend {
    /// Open and probe a local audio file.
    ///
    /// Missing, unreadable, and zero-length files are all `NotFound`: from
    /// the caller's point of view there is no playable track at that path.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .map_err(|e| PlayerError::from_io(&path.display().to_string(), e))?;
        if meta.len() == 0 {
            return Err(PlayerError::NotFound(format!(
                "{} is empty",
                path.display()
            )));
        }

        let file =
            File::open(path).map_err(|e| PlayerError::from_io(&path.display().to_string(), e))?;

        let extension = path.extension().and_then(|e| e.to_str());
        let core = SymphoniaCore::probe(
            Box::new(file),
            extension,
            &path.display().to_string(),
        )?;
        Ok(Self { core })
    }
}

impl DecodeBackend for LocalBackend {
    fn sample_rate(&self) -> u32 {
        self.core.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.core.channels()
    }

    fn total_frames(&self) -> Option<u64> {
        self.core.total_frames()
    }

    fn position_frames(&self) -> u64 {
        self.core.position_frames()
    }

    fn next_output(&mut self, storage: Vec<i16>) -> Result<BackendRead> {
        self.core.decode_next(storage)
    }

    fn seek(&mut self, ms: u64) -> Result<u64> {
        self.core.seek(ms)
    }

    fn flush(&mut self) {
        self.core.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample((i % 1000) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = LocalBackend::open(Path::new("/nonexistent/track.mp3")).unwrap_err();
        assert!(matches!(err, PlayerError::NotFound(_)));
    }

    #[test]
    fn test_empty_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        File::create(&path).unwrap();
        let err = LocalBackend::open(&path).unwrap_err();
        assert!(matches!(err, PlayerError::NotFound(_)));
    }

    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        File::create(&path)
            .unwrap()
            .write_all(&[0x42; 256])
            .unwrap();
        let err = LocalBackend::open(&path).unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_excessive_sample_rate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hires.wav");
        write_wav(&path, 96_000, 2, 128);
        let err = LocalBackend::open(&path).unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_stereo_wav_decodes_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        const FRAMES: u32 = 4410;
        write_wav(&path, 44_100, 2, FRAMES);

        let mut backend = LocalBackend::open(&path).unwrap();
        assert_eq!(backend.sample_rate(), 44_100);
        assert_eq!(backend.total_frames(), Some(FRAMES as u64));

        let mut decoded_samples = 0usize;
        let mut storage = Vec::new();
        loop {
            match backend.next_output(storage).unwrap() {
                BackendRead::Samples(samples) => {
                    decoded_samples += samples.len();
                    storage = samples;
                }
                BackendRead::EndOfStream(_) => break,
                BackendRead::NotReady(_) => panic!("local backend is always ready"),
            }
        }
        assert_eq!(decoded_samples, FRAMES as usize * 2);
    }

    #[test]
    fn test_mono_is_upmixed_to_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 44_100, 1, 441);

        let mut backend = LocalBackend::open(&path).unwrap();
        let mut total = 0usize;
        let mut storage = Vec::new();
        loop {
            match backend.next_output(storage).unwrap() {
                BackendRead::Samples(samples) => {
                    // stereo pairs with identical left/right
                    for pair in samples.chunks_exact(2) {
                        assert_eq!(pair[0], pair[1]);
                    }
                    total += samples.len();
                    storage = samples;
                }
                BackendRead::EndOfStream(_) => break,
                BackendRead::NotReady(_) => unreachable!(),
            }
        }
        assert_eq!(total, 441 * 2);
    }

    #[test]
    fn test_seek_relocates_before_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_wav(&path, 44_100, 2, 44_100);

        let mut backend = LocalBackend::open(&path).unwrap();
        let located = backend.seek(500).unwrap();
        assert!(located <= 44_100 / 2);

        // still decodes after the seek
        match backend.next_output(Vec::new()).unwrap() {
            BackendRead::Samples(s) => assert!(!s.is_empty()),
            _ => panic!("expected samples after seek"),
        }
    }
}
