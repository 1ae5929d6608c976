use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use minimp4::Mp4Muxer;
use nbody_common::{VideoConfig, VisError};
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Outcome of a video assembly run.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub elapsed: Duration,
}

/// Regular files in `dir`, sorted by file name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(VisError::EmptyFrameDir(dir.to_path_buf()).into());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn load_frame(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|e| VisError::FrameUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(image.to_rgb8())
}

/// RGB to YUV 4:2:0 (BT.601) conversion for video encoding.
///
/// Width and height must be even.
pub fn rgb_to_yuv420(image: &RgbImage) -> Vec<u8> {
    let width = image.width() as usize;
    let height = image.height() as usize;

    // Y plane is full size, U and V are quarter size
    let y_plane_size = width * height;
    let mut yuv = vec![0u8; y_plane_size + y_plane_size / 2];

    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(|c| c as f32);
        yuv[y as usize * width + x as usize] = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
    }

    let u_plane_offset = y_plane_size;
    let v_plane_offset = y_plane_size + y_plane_size / 4;
    let uv_width = width / 2;

    // Average U and V over each 2x2 block
    for y in (0..height).step_by(2) {
        for x in (0..width).step_by(2) {
            let mut sum_u = 0f32;
            let mut sum_v = 0f32;
            let mut count = 0;

            for dy in 0..2 {
                for dx in 0..2 {
                    if y + dy < height && x + dx < width {
                        let [r, g, b] = image.get_pixel((x + dx) as u32, (y + dy) as u32).0.map(|c| c as f32);
                        sum_u += -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
                        sum_v += 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
                        count += 1;
                    }
                }
            }

            let idx = (y / 2) * uv_width + x / 2;
            yuv[u_plane_offset + idx] = (sum_u / count as f32).round() as u8;
            yuv[v_plane_offset + idx] = (sum_v / count as f32).round() as u8;
        }
    }

    yuv
}

/// Wraps a raw H.264 stream into an MP4 container in memory.
fn mux_mp4(h264_data: &[u8], width: u32, height: u32, fps: u32) -> Vec<u8> {
    let mut video_buffer = Cursor::new(Vec::new());
    {
        let mut mp4muxer = Mp4Muxer::new(&mut video_buffer);
        mp4muxer.init_video(width as i32, height as i32, false, "N-body simulation");
        mp4muxer.write_video_with_fps(h264_data, fps);
        mp4muxer.close();
    }
    video_buffer.into_inner()
}

/// Encodes the images in `frames_dir` (in file-name order) into an MP4 at `output`.
///
/// Without an explicit resolution every frame must match the first frame's
/// size. The file is only written once every frame has been encoded.
pub fn assemble_video(frames_dir: &Path, output: &Path, config: &VideoConfig) -> Result<VideoSummary> {
    config.validate()?;
    let files = list_frames(frames_dir)?;
    let Some(first_path) = files.first() else {
        return Err(VisError::EmptyFrameDir(frames_dir.to_path_buf()).into());
    };
    info!("Found {} frames in {}", files.len(), frames_dir.display());

    let mut first_frame = Some(load_frame(first_path)?);
    let (width, height) = match config.resolution {
        Some([w, h]) => (w, h),
        None => first_frame.as_ref().map_or((0, 0), |f| f.dimensions()),
    };
    if width % 2 != 0 || height % 2 != 0 {
        return Err(VisError::config(format!(
            "H.264 needs even frame dimensions, got {}x{}; pass an explicit even resolution",
            width, height
        ))
        .into());
    }
    info!("Video dimensions: {}x{} at {} fps", width, height, config.fps);

    let mut encoder = Encoder::with_api_config(
        OpenH264API::from_source(),
        EncoderConfig::new()
            .max_frame_rate(FrameRate::from_hz(config.fps as f32))
            .bitrate(BitRate::from_bps(config.bitrate_bps))
            // one sample per frame
            .skip_frames(false),
    )
    .map_err(|e| VisError::resource(format!("failed to initialize H.264 encoder: {}", e)))?;

    let encode_progress = ProgressBar::new(files.len() as u64);
    encode_progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} encoded ({percent}%) [{eta}]")?
            .progress_chars("#>-"),
    );

    let start_time = Instant::now();
    let mut h264_data = Vec::new();
    for path in &files {
        let frame = match first_frame.take() {
            Some(frame) => frame,
            None => load_frame(path)?,
        };
        let frame = if frame.dimensions() == (width, height) {
            frame
        } else if config.resolution.is_some() {
            imageops::resize(&frame, width, height, FilterType::Triangle)
        } else {
            return Err(VisError::FrameSizeMismatch {
                path: path.clone(),
                expected: (width, height),
                found: frame.dimensions(),
            }
            .into());
        };

        let yuv_source = YUVBuffer::from_vec(rgb_to_yuv420(&frame), width as usize, height as usize);
        let bitstream = encoder
            .encode(&yuv_source)
            .map_err(|e| VisError::resource(format!("failed to encode {}: {}", path.display(), e)))?;
        if matches!(bitstream.frame_type(), FrameType::Skip | FrameType::Invalid) {
            return Err(VisError::resource(format!("encoder dropped {}", path.display())).into());
        }
        bitstream.write_vec(&mut h264_data);
        encode_progress.inc(1);
    }
    encode_progress.finish_with_message(format!("Encoded {} frames", files.len()));
    debug!("H.264 stream is {} bytes", h264_data.len());

    let video_bytes = mux_mp4(&h264_data, width, height, config.fps);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| VisError::resource(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    fs::write(output, &video_bytes)
        .map_err(|e| VisError::resource(format!("failed to write video file {}: {}", output.display(), e)))?;

    let elapsed = start_time.elapsed();
    info!("Video saved to {} ({} frames in {:.2?})", output.display(), files.len(), elapsed);
    Ok(VideoSummary {
        path: output.to_path_buf(),
        frames: files.len(),
        width,
        height,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nbody-video-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn yuv_planes_have_420_layout() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 255, 255]));
        let yuv = rgb_to_yuv420(&image);
        assert_eq!(yuv.len(), 4 * 2 + 4);
        assert!(yuv[..8].iter().all(|&y| y == 255));
        assert!(yuv[8..].iter().all(|&c| c == 128));
    }

    #[test]
    fn pure_blue_has_high_u() {
        let image = RgbImage::from_pixel(2, 2, Rgb([0, 0, 255]));
        let yuv = rgb_to_yuv420(&image);
        assert_eq!(yuv[0], 29);
        assert!(yuv[4] > 200);
        assert!(yuv[5] < 128);
    }

    #[test]
    fn frames_are_listed_by_name_and_dirs_skipped() {
        let dir = scratch("listing");
        for name in ["render_0002.jpg", "render_0000.jpg", "render_0001.jpg"] {
            fs::write(dir.join(name), b"x").unwrap();
        }
        fs::create_dir(dir.join("nested")).unwrap();
        let names: Vec<String> = list_frames(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["render_0000.jpg", "render_0001.jpg", "render_0002.jpg"]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_directory_is_an_input_error() {
        let dir = scratch("empty");
        let err = assemble_video(&dir, &dir.join("out.mp4"), &VideoConfig::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<VisError>(), Some(VisError::EmptyFrameDir(_))));
        assert!(!dir.join("out.mp4").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unreadable_frame_is_an_input_error() {
        let dir = scratch("garbage");
        fs::write(dir.join("render_0000.jpg"), b"not a jpeg").unwrap();
        let err = assemble_video(&dir, &dir.join("out.mp4"), &VideoConfig::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<VisError>(), Some(VisError::FrameUnreadable { .. })));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn odd_dimensions_need_an_explicit_resolution() {
        let dir = scratch("odd");
        RgbImage::from_pixel(15, 10, Rgb([0, 0, 0])).save(dir.join("render_0000.png")).unwrap();
        let err = assemble_video(&dir, &dir.join("out.mp4"), &VideoConfig::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<VisError>(), Some(VisError::InvalidConfig(_))));
        fs::remove_dir_all(&dir).ok();
    }
}
