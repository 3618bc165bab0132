use std::fs::File;
use std::io::{BufWriter, Write};

use remux::{AudioSource, Remuxer, demux, mux};
use ts::StreamType;
use ts::test_support::{av_segment, packed_audio_segment};

#[test]
fn demux_then_mux_keeps_every_frame() {
    let frames = demux(av_segment(0, 12, 23).into()).unwrap();
    let (video, audio): (Vec<_>, Vec<_>) = frames
        .into_iter()
        .partition(|frame| frame.stream_type == StreamType::H264);
    assert_eq!(video.len(), 12);

    let bytes = mux(video, audio).unwrap();
    let movie = mp4::probe(&bytes).unwrap();
    assert_eq!(&movie.major_brand, b"isom");

    for (handler, expected) in [(b"vide", 12), (b"soun", 23)] {
        let track = movie.track(handler).unwrap();
        assert_eq!(track.sample_count(), expected);
        assert!(track.presentation_times.windows(2).all(|w| w[0] <= w[1]));
        assert!(track.decode_times.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn two_part_episode_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("episode.mp4");

    let file = BufWriter::new(File::create(&path).unwrap());
    let mut remuxer = Remuxer::new(file).unwrap();

    remuxer.begin_part(0, AudioSource::Separate).unwrap();
    for index in 0..2u64 {
        remuxer.push_audio_segment(packed_audio_segment(46).into()).unwrap();
        remuxer
            .push_video_segment(av_segment(10_000 + index * 90_000, 25, 0).into())
            .unwrap();
    }
    remuxer.begin_part(2_000, AudioSource::Embedded).unwrap();
    remuxer.push_video_segment(av_segment(0, 25, 47).into()).unwrap();

    let (mut writer, summary) = remuxer.finish().unwrap();
    writer.flush().unwrap();
    drop(writer);

    assert_eq!(summary.video_frames, 75);
    assert_eq!(summary.audio_frames, 139);
    assert!(summary.duration_ms >= 3_000);

    let movie = mp4::probe(&std::fs::read(&path).unwrap()).unwrap();
    let video = movie.track(b"vide").unwrap();
    assert_eq!(video.decode_times[50], 2_000);
    let audio = movie.track(b"soun").unwrap();
    assert_eq!(audio.sample_count(), 139);
    assert!(audio.decode_times.windows(2).all(|w| w[0] < w[1]));
}
