//! Fixed-rate sampling of decoded video.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::pipeline::JobId;

use super::decoder::{DecodedStream, VideoDecoder};
use super::error::ExtractError;
use super::types::{DecodedFrame, FrameRecord, FrameTag, VideoInfo, VideoRef};

/// Sampling parameters for one extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub sample_rate_hz: f64,
    /// Accept a stream that ends short (at least one frame is still required).
    pub tolerate_partial: bool,
}

/// Turns a video into an ordered, lazily produced sequence of sampled frames.
#[derive(Clone)]
pub struct FrameExtractor {
    decoder: Arc<dyn VideoDecoder>,
}

impl FrameExtractor {
    pub fn new(decoder: Arc<dyn VideoDecoder>) -> Self {
        Self { decoder }
    }

    /// Opens `video` and returns a stream of frames at `k / sample_rate_hz`.
    pub async fn extract(
        &self,
        job_id: &JobId,
        video: &VideoRef,
        options: ExtractOptions,
    ) -> Result<FrameStream, ExtractError> {
        let rate = options.sample_rate_hz;
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(ExtractError::InvalidSampleRate { rate });
        }

        let source = self.decoder.open(video).await?;
        let info = source.info().clone();
        if !(info.duration_secs > 0.0) || info.width == 0 || info.height == 0 || !(info.fps > 0.0) {
            return Err(ExtractError::corrupt(format!(
                "unusable stream properties: {:?}",
                info
            )));
        }

        let target_count = info.expected_frames(rate);
        debug!(
            "Sampling {} at {} Hz: {} frames from {:.2}s",
            video, rate, target_count, info.duration_secs
        );

        Ok(FrameStream {
            job_id: job_id.clone(),
            source,
            info,
            rate,
            tolerate_partial: options.tolerate_partial,
            target_count,
            next_index: 0,
            behind: None,
            ahead: None,
            source_done: false,
            finished: false,
        })
    }
}

/// Sampled frames of one video. Finite and not restartable.
pub struct FrameStream {
    job_id: JobId,
    source: Box<dyn DecodedStream>,
    info: VideoInfo,
    rate: f64,
    tolerate_partial: bool,
    target_count: usize,
    next_index: usize,
    /// Latest decoded frame before `ahead`.
    behind: Option<DecodedFrame>,
    /// Most recently decoded frame.
    ahead: Option<DecodedFrame>,
    source_done: bool,
    finished: bool,
}

impl FrameStream {
    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Number of frames a complete stream yields.
    pub fn expected_frames(&self) -> usize {
        self.target_count
    }

    /// Number of frames yielded so far.
    pub fn produced(&self) -> usize {
        self.next_index
    }

    /// Next sampled frame, `None` once the stream is exhausted.
    pub async fn next_frame(&mut self) -> Option<Result<FrameRecord, ExtractError>> {
        if self.finished {
            return None;
        }
        if self.next_index >= self.target_count {
            self.finished = true;
            return None;
        }

        let target = self.next_index as f64 / self.rate;
        while !self.source_done && self.ahead.as_ref().map_or(true, |f| f.pts_secs < target) {
            match self.source.next_frame().await {
                Some(Ok(frame)) => self.behind = self.ahead.replace(frame),
                Some(Err(e)) => {
                    self.source_done = true;
                    return self.end_early(Some(e));
                }
                None => self.source_done = true,
            }
        }

        let chosen = match (&self.behind, &self.ahead) {
            (_, None) => return self.end_early(None),
            // Ties go to the earlier frame
            (Some(b), Some(a))
                if a.pts_secs >= target && target - b.pts_secs <= a.pts_secs - target =>
            {
                b.clone()
            }
            (_, Some(a)) => {
                let interval = 1.0 / self.info.fps;
                if a.pts_secs < target && target - a.pts_secs > 1.5 * interval {
                    // Source ended before the declared duration
                    return self.end_early(None);
                }
                a.clone()
            }
        };

        let record = FrameRecord {
            job_id: self.job_id.clone(),
            index: self.next_index,
            timestamp_secs: target,
            source_pts_secs: chosen.pts_secs,
            image: chosen.image,
            tag: FrameTag::Extracted,
        };
        self.next_index += 1;
        Some(Ok(record))
    }

    fn end_early(
        &mut self,
        error: Option<ExtractError>,
    ) -> Option<Result<FrameRecord, ExtractError>> {
        self.finished = true;
        let produced = self.next_index;

        if produced == 0 {
            let reason = match error {
                Some(e) if !e.is_media_error() => return Some(Err(e)),
                Some(e) => e.to_string(),
                None => "no decodable frames".to_string(),
            };
            return Some(Err(ExtractError::corrupt(reason)));
        }

        // Declared duration may overshoot the last decodable frame by one sample.
        if error.is_none() && produced + 1 >= self.target_count {
            return None;
        }

        let reason = match &error {
            Some(e) => e.to_string(),
            None => "stream ended early".to_string(),
        };
        if self.tolerate_partial {
            warn!(
                "Extraction for job {} stopped after {} of {} frames: {}",
                self.job_id, produced, self.target_count, reason
            );
            None
        } else {
            Some(Err(ExtractError::corrupt(format!(
                "decoding stopped after {} of {} frames: {}",
                produced, self.target_count, reason
            ))))
        }
    }
}
