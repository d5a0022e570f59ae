//! Thumbnail generation backends
//!
//! [`ThumbnailGenerator`] decodes one frame near a timestamp. The cache calls
//! it at most once per key at a time and never caches its failures.
//!
//! With the `ffmpeg` feature, [`FfmpegGenerator`] decodes real video files.
//! Without it, [`UnavailableGenerator`] fails every request, which the feed
//! shows as a placeholder.

use std::sync::Arc;

use image::RgbaImage;

use crate::entities::{FeedError, VideoHandle};

/// Decodes a single frame for a thumbnail.
pub trait ThumbnailGenerator: Send + Sync {
    /// Decode the frame at or just after `timestamp_ms`.
    fn generate(&self, handle: &VideoHandle, timestamp_ms: u64) -> Result<RgbaImage, FeedError>;
}

/// Blanket impl: Arc<T> implements trait if T does
impl<T: ThumbnailGenerator + ?Sized> ThumbnailGenerator for Arc<T> {
    fn generate(&self, handle: &VideoHandle, timestamp_ms: u64) -> Result<RgbaImage, FeedError> {
        (**self).generate(handle, timestamp_ms)
    }
}

/// Backend used when no decoder is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableGenerator;

impl ThumbnailGenerator for UnavailableGenerator {
    fn generate(&self, handle: &VideoHandle, _timestamp_ms: u64) -> Result<RgbaImage, FeedError> {
        Err(FeedError::generation(handle.id(), "built without video decoding support"))
    }
}

/// Best available backend for this build.
pub fn default_generator(max_width: u32) -> Arc<dyn ThumbnailGenerator> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(FfmpegGenerator::new(max_width))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        log::warn!(
            "Video decoding disabled (thumbnail width {} ignored); rebuild with --features ffmpeg",
            max_width
        );
        Arc::new(UnavailableGenerator)
    }
}

/// Output size that fits `max_width`, keeping aspect and even dimensions.
pub fn fit_width(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_width == 0 || width <= max_width {
        return (width, height);
    }
    let out_h = (height as u64 * max_width as u64 / width as u64) as u32;
    (max_width & !1, (out_h & !1).max(2))
}

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::FfmpegGenerator;

#[cfg(feature = "ffmpeg")]
mod ffmpeg_backend {
    use super::*;
    use log::{trace, warn};
    use playa_ffmpeg as ffmpeg;
    use std::sync::Once;

    static FFMPEG_INIT: Once = Once::new();

    fn init_ffmpeg() {
        FFMPEG_INIT.call_once(|| {
            if let Err(e) = ffmpeg::init() {
                warn!("FFmpeg init failed: {}", e);
            }
            unsafe {
                // AV_LOG_QUIET: decoder chatter goes nowhere, errors come back as Results
                ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_QUIET);
            }
        });
    }

    /// FFmpeg-backed frame grabber.
    #[derive(Debug, Clone)]
    pub struct FfmpegGenerator {
        max_width: u32,
    }

    impl FfmpegGenerator {
        pub fn new(max_width: u32) -> Self {
            init_ffmpeg();
            Self { max_width }
        }
    }

    impl ThumbnailGenerator for FfmpegGenerator {
        fn generate(&self, handle: &VideoHandle, timestamp_ms: u64) -> Result<RgbaImage, FeedError> {
            let fail = |reason: String| FeedError::generation(handle.id(), reason);

            let mut ictx = ffmpeg::format::input(handle.as_path())
                .map_err(|e| fail(format!("Failed to open video: {}", e)))?;

            let stream = ictx
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| fail("No video stream found".to_string()))?;
            let stream_idx = stream.index();
            let time_base = stream.time_base();

            let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| fail(format!("Failed to create decoder context: {}", e)))?;
            let mut decoder = decoder_ctx
                .decoder()
                .video()
                .map_err(|e| fail(format!("Failed to create video decoder: {}", e)))?;

            let (width, height) = (decoder.width(), decoder.height());
            let (out_w, out_h) = fit_width(width, height, self.max_width);

            let mut scaler = ffmpeg::software::scaling::Context::get(
                decoder.format(),
                width,
                height,
                ffmpeg::format::Pixel::RGBA,
                out_w,
                out_h,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| fail(format!("Failed to create scaler: {}", e)))?;

            let ms_tb = ffmpeg::ffi::AVRational { num: 1, den: 1000 };
            let stream_tb = ffmpeg::ffi::AVRational {
                num: time_base.numerator(),
                den: time_base.denominator(),
            };
            let target_ts = unsafe { ffmpeg::ffi::av_rescale_q(timestamp_ms as i64, ms_tb, stream_tb) };

            // Nearest keyframe at or before target, then decode forward
            let seek_ret = unsafe {
                ffmpeg::ffi::av_seek_frame(
                    ictx.as_mut_ptr(),
                    stream_idx as i32,
                    target_ts,
                    ffmpeg::ffi::AVSEEK_FLAG_BACKWARD,
                )
            };
            if seek_ret < 0 {
                trace!("Seek failed for {} (ret={}), decoding from start", handle, seek_ret);
            }

            let mut to_rgba = |decoded: &ffmpeg::util::frame::video::Video| -> Result<RgbaImage, FeedError> {
                let mut rgba = ffmpeg::util::frame::video::Video::empty();
                scaler
                    .run(decoded, &mut rgba)
                    .map_err(|e| fail(format!("Failed to scale frame: {}", e)))?;

                let data = rgba.data(0);
                let stride = rgba.stride(0);
                let row_bytes = out_w as usize * 4;
                let mut output = vec![0u8; row_bytes * out_h as usize];
                for y in 0..out_h as usize {
                    output[y * row_bytes..(y + 1) * row_bytes]
                        .copy_from_slice(&data[y * stride..y * stride + row_bytes]);
                }
                RgbaImage::from_raw(out_w, out_h, output)
                    .ok_or_else(|| fail("Frame buffer size mismatch".to_string()))
            };

            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            let mut last: Option<ffmpeg::util::frame::video::Video> = None;

            for (stream, packet) in ictx.packets() {
                if stream.index() != stream_idx {
                    continue;
                }
                if decoder.send_packet(&packet).is_err() {
                    continue;
                }
                while decoder.receive_frame(&mut decoded).is_ok() {
                    let reached = decoded.pts().map(|pts| pts >= target_ts).unwrap_or(true);
                    if reached {
                        return to_rgba(&decoded);
                    }
                    last = Some(decoded.clone());
                }
            }

            // Clip shorter than the timestamp: flush and take the final frame
            let _ = decoder.send_eof();
            while decoder.receive_frame(&mut decoded).is_ok() {
                last = Some(decoded.clone());
            }

            match last {
                Some(frame) => to_rgba(&frame),
                None => Err(fail(format!("No decodable frame near {} ms", timestamp_ms))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_generator_fails() {
        let err = UnavailableGenerator
            .generate(&VideoHandle::new("/v/a.mp4"), 1000)
            .unwrap_err();
        assert!(matches!(err, FeedError::GenerationFailed { ref locator, .. } if locator == "/v/a.mp4"));
    }

    #[test]
    fn test_fit_width() {
        assert_eq!(fit_width(640, 360, 720), (640, 360));
        assert_eq!(fit_width(1920, 1080, 720), (720, 404));
        assert_eq!(fit_width(1080, 1920, 720), (720, 1280));
        assert_eq!(fit_width(0, 0, 720), (0, 0));
    }
}
