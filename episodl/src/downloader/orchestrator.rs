//! Per-job state machine: admission, resolution, segment download,
//! remuxing and subtitle merging.

use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use episodl_engine::{SegmentFetcher, StreamResolver};
use hls::{Part, SegmentRef, TrackKind};
use remux::{AudioSource, RemuxSummary, Remuxer};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{Job, JobStatus};
use super::resume::{resume_index, segment_path, write_segment};
use crate::error::{Error, JobError, Result};

/// Runs jobs end to end. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    resolver: StreamResolver,
    fetcher: SegmentFetcher,
}

/// One entry of the temporary directory layout.
struct PlannedSegment<'a> {
    part: usize,
    kind: TrackKind,
    segment: &'a SegmentRef,
}

impl PlannedSegment<'_> {
    fn extension(&self) -> &'static str {
        match self.kind {
            TrackKind::Audio => "aac",
            _ => "ts",
        }
    }
}

/// Global segment order: each part's video segments, then its audio
/// segments, part after part.
fn plan_segments(parts: &[Part]) -> Vec<PlannedSegment<'_>> {
    parts
        .iter()
        .enumerate()
        .flat_map(|(position, part)| {
            let video = part.video.segments.iter().map(move |segment| PlannedSegment {
                part: position,
                kind: TrackKind::Video,
                segment,
            });
            let audio = part.audio.iter().flat_map(move |track| {
                track.segments.iter().map(move |segment| PlannedSegment {
                    part: position,
                    kind: TrackKind::Audio,
                    segment,
                })
            });
            video.chain(audio)
        })
        .collect()
}

struct SegmentFile {
    path: PathBuf,
    duration: f64,
}

/// The downloaded files of one part, as fed to the remuxer.
struct PartFiles {
    offset_ms: u64,
    video: Vec<SegmentFile>,
    audio: Vec<SegmentFile>,
}

impl PartFiles {
    fn audio_source(&self) -> AudioSource {
        if self.audio.is_empty() {
            AudioSource::Embedded
        } else {
            AudioSource::Separate
        }
    }
}

fn part_files(parts: &[Part], temp_dir: &Path) -> Vec<PartFiles> {
    let plan = plan_segments(parts);
    let mut files: Vec<PartFiles> = Vec::with_capacity(parts.len());
    let mut elapsed = 0.0;
    for part in parts {
        files.push(PartFiles {
            offset_ms: (elapsed * 1000.0_f64).round() as u64,
            video: Vec::new(),
            audio: Vec::new(),
        });
        elapsed += part.duration();
    }
    for (index, planned) in plan.iter().enumerate() {
        let file = SegmentFile {
            path: segment_path(temp_dir, index, planned.extension()),
            duration: planned.segment.duration.unwrap_or(0.0),
        };
        let part = &mut files[planned.part];
        match planned.kind {
            TrackKind::Audio => part.audio.push(file),
            _ => part.video.push(file),
        }
    }
    files
}

/// `<name>.part` next to the final output.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await.map_err(Error::file(parent))?;
    }
    Ok(())
}

fn read_segment(file: &SegmentFile) -> Result<bytes::Bytes> {
    std::fs::read(&file.path)
        .map(bytes::Bytes::from)
        .map_err(Error::file(&file.path))
}

/// Pushes one audio segment at its playlist time, advancing `audio_end`.
fn push_audio<W: Write + Seek>(remuxer: &mut Remuxer<W>, file: &SegmentFile, audio_end: &mut f64) -> Result<()> {
    let start_ms = (*audio_end * 1000.0).round() as u64;
    remuxer.push_audio_segment_at(read_segment(file)?, start_ms)?;
    *audio_end += file.duration;
    Ok(())
}

/// Remuxes every part into `output`. Blocking.
fn remux_parts(parts: &[PartFiles], output: &Path, token: &CancellationToken) -> Result<RemuxSummary> {
    let file = std::fs::File::create(output).map_err(Error::file(output))?;
    let mut remuxer = Remuxer::new(BufWriter::new(file))?;

    for (index, part) in parts.iter().enumerate() {
        remuxer.begin_part(part.offset_ms, part.audio_source())?;
        debug!(part = index + 1, offset_ms = part.offset_ms, "remuxing part");

        // Audio is pushed ahead of the video it plays under; the remuxer
        // holds it back until the video catches up.
        let mut audio = part.audio.iter();
        let mut video_end = 0.0;
        let mut audio_end = 0.0;
        for video in &part.video {
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            video_end += video.duration;
            while audio_end < video_end
                && let Some(next) = audio.next()
            {
                push_audio(&mut remuxer, next, &mut audio_end)?;
            }
            remuxer.push_video_segment(read_segment(video)?)?;
        }
        for rest in audio {
            push_audio(&mut remuxer, rest, &mut audio_end)?;
        }
    }

    let (writer, summary) = remuxer.finish()?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::file(output)(e.into_error()))?;
    file.sync_all().map_err(Error::file(output))?;
    Ok(summary)
}

impl Orchestrator {
    pub fn new(resolver: StreamResolver, fetcher: SegmentFetcher) -> Self {
        Self { resolver, fetcher }
    }

    /// Drives `job` to a terminal state.
    pub async fn run(&self, job: &Job) {
        let outcome = self.drive(job).await;
        if let Err(JobError::Interrupted { message, .. }) = &outcome {
            warn!(job_id = %job.id(), error = %message, "job interrupted");
        }
        job.finish(outcome);
    }

    async fn drive(&self, job: &Job) -> std::result::Result<(), JobError> {
        job.set_progress(JobStatus::Waiting, None);
        let _permit = job
            .enqueue()
            .wait(job.token())
            .await
            .map_err(|_| JobError::Canceled)?;

        match self.download(job).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() || job.token().is_cancelled() => Err(JobError::Canceled),
            Err(e) => Err(JobError::interrupted(job.status(), &e)),
        }
    }

    async fn download(&self, job: &Job) -> Result<()> {
        let params = job.params();
        let token = job.token();

        job.set_progress(JobStatus::FetchingMetadata, None);
        let parts = self
            .resolver
            .resolve(&params.content, job.selector(), token)
            .await?;

        if params.video_path.is_some() {
            job.set_progress(JobStatus::DownloadingVideo, Some(0.0));
            self.download_media(job, &parts).await?;
        }

        let subtitles = match &params.subtitle_path {
            Some(_) => {
                job.set_progress(JobStatus::DownloadingSubtitles, Some(0.0));
                Some(self.download_subtitles(job, &parts).await?)
            }
            None => None,
        };

        job.set_progress(JobStatus::Postprocessing, None);
        if let Some(video_path) = &params.video_path {
            let summary = remux(&parts, &params.temp_dir, video_path, token).await?;
            info!(
                job_id = %job.id(),
                path = %video_path.display(),
                video_frames = summary.video_frames,
                audio_frames = summary.audio_frames,
                duration_ms = summary.duration_ms,
                "video written"
            );
        }
        if let (Some(path), Some((texts, durations))) = (&params.subtitle_path, subtitles) {
            let merged = webvtt::merge(&texts, &durations)?;
            write_output(path, merged.as_bytes()).await?;
            info!(job_id = %job.id(), path = %path.display(), "subtitles written");
        }

        if fs::try_exists(&params.temp_dir)
            .await
            .map_err(Error::file(&params.temp_dir))?
        {
            fs::remove_dir_all(&params.temp_dir)
                .await
                .map_err(Error::file(&params.temp_dir))?;
            debug!(job_id = %job.id(), "removed temporary directory");
        }
        Ok(())
    }

    /// Fetches the video and audio segments into the temporary directory,
    /// resuming after the files a previous run left behind.
    async fn download_media(&self, job: &Job, parts: &[Part]) -> Result<()> {
        let temp_dir = &job.params().temp_dir;
        let token = job.token();
        fs::create_dir_all(temp_dir)
            .await
            .map_err(Error::file(temp_dir))?;

        let plan = plan_segments(parts);
        let extensions: Vec<&str> = plan.iter().map(PlannedSegment::extension).collect();
        let start = resume_index(temp_dir, &extensions).await?;
        if start > 0 {
            info!(job_id = %job.id(), segment = start, total = plan.len(), "resuming download");
        }

        let total = plan.len().max(1) as f64;
        for (index, planned) in plan.iter().enumerate().skip(start) {
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            let data = self.fetcher.fetch(planned.segment, token).await?;
            write_segment(temp_dir, index, planned.extension(), &data).await?;
            debug!(
                job_id = %job.id(),
                part = planned.part + 1,
                kind = %planned.kind,
                segment = index,
                bytes = data.len(),
                "segment written"
            );
            job.set_progress(JobStatus::DownloadingVideo, Some((index + 1) as f64 / total));
        }
        Ok(())
    }

    /// Fetches the subtitle segments of every part. Parts without
    /// subtitles contribute an empty document so later parts keep their
    /// offsets.
    async fn download_subtitles(&self, job: &Job, parts: &[Part]) -> Result<(Vec<String>, Vec<f64>)> {
        let token = job.token();
        let total: usize = parts
            .iter()
            .filter_map(|part| part.subtitles.as_ref())
            .map(|track| track.len())
            .sum();
        if total == 0 {
            warn!(job_id = %job.id(), "episode has no subtitles, writing an empty file");
        }

        let mut texts = Vec::with_capacity(parts.len());
        let mut durations = Vec::with_capacity(parts.len());
        let mut done = 0;
        for part in parts {
            let mut segments = Vec::new();
            for segment in part.subtitles.iter().flat_map(|track| &track.segments) {
                if token.is_cancelled() {
                    return Err(Error::Canceled);
                }
                let data = self.fetcher.fetch(segment, token).await?;
                let text = String::from_utf8(data.to_vec()).map_err(|source| Error::SubtitleEncoding {
                    url: segment.url.to_string(),
                    source,
                })?;
                segments.push(text);
                done += 1;
                job.set_progress(JobStatus::DownloadingSubtitles, Some(done as f64 / total as f64));
            }
            texts.push(if segments.is_empty() {
                "WEBVTT\n".to_string()
            } else {
                webvtt::join_segments(&segments)?
            });
            durations.push(part.duration());
        }
        Ok((texts, durations))
    }
}

async fn remux(parts: &[Part], temp_dir: &Path, output: &Path, token: &CancellationToken) -> Result<RemuxSummary> {
    create_parent(output).await?;
    let files = part_files(parts, temp_dir);
    let partial = partial_path(output);
    let summary = {
        let partial = partial.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || remux_parts(&files, &partial, &token)).await?
    };
    match summary {
        Ok(summary) => {
            fs::rename(&partial, output).await.map_err(Error::file(output))?;
            Ok(summary)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

/// Writes `data` to a `.part` sibling and renames it into place.
async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    create_parent(path).await?;
    let partial = partial_path(path);
    fs::write(&partial, data).await.map_err(Error::file(&partial))?;
    fs::rename(&partial, path).await.map_err(Error::file(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hls::{Rendition, Track};
    use std::str::FromStr;
    use url::Url;

    fn track(kind: TrackKind, durations: &[f64]) -> Track {
        let segments = durations
            .iter()
            .enumerate()
            .map(|(i, d)| SegmentRef {
                sequence: i as u64,
                url: Url::parse(&format!("https://cdn.example/{kind}/{i}")).unwrap(),
                duration: Some(*d),
                key: None,
            })
            .collect();
        Track::new(kind, segments)
    }

    fn part(index: usize, video: &[f64], audio: Option<&[f64]>) -> Part {
        Part {
            index,
            rendition: Rendition {
                bandwidth: 1,
                average_bandwidth: None,
                resolution: None,
                codecs: None,
                frame_rate: None,
                uri: Url::from_str("https://cdn.example/v.m3u8").unwrap(),
                audio_group: None,
                subtitle_group: None,
            },
            video: track(TrackKind::Video, video),
            audio: audio.map(|d| track(TrackKind::Audio, d)),
            subtitles: None,
        }
    }

    #[test]
    fn test_layout_is_continuous_across_parts() {
        let parts = [part(0, &[4.0, 4.0], Some(&[4.0, 4.0])), part(1, &[2.5], None)];
        let files = part_files(&parts, Path::new("/tmp/job"));

        assert_eq!(files[0].offset_ms, 0);
        assert_eq!(files[1].offset_ms, 8000);
        let names: Vec<_> = files
            .iter()
            .flat_map(|p| p.video.iter().chain(&p.audio))
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["Seg0000.ts", "Seg0001.ts", "Seg0002.aac", "Seg0003.aac", "Seg0004.ts"]);
        assert_eq!(files[0].audio_source(), AudioSource::Separate);
        assert_eq!(files[1].audio_source(), AudioSource::Embedded);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(partial_path(Path::new("/out/ep.mp4")), Path::new("/out/ep.mp4.part"));
    }
}
