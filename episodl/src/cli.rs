//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use episodl_engine::Quality;

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "episodl", version, about = "Download encrypted HLS episodes to MP4 with merged subtitles")]
pub struct Args {
    /// Episode URLs: a master playlist (.m3u8) or a service document.
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<url::Url>,

    /// Directory for finished files.
    #[arg(short, long, env = "EPISODL_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory for in-progress segment files.
    #[arg(long, env = "EPISODL_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Maximum quality: `best`, or a height such as `720p`.
    #[arg(short = 'Q', long, env = "EPISODL_QUALITY")]
    pub quality: Option<Quality>,

    /// Number of episodes downloaded at the same time.
    #[arg(short = 'j', long, env = "EPISODL_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Queue priority of these jobs; higher runs first.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Output name template; `{title}` and `{id}` are expanded.
    #[arg(long)]
    pub name: Option<String>,

    /// Skip the video and only fetch subtitles.
    #[arg(long, conflicts_with = "no_subtitles")]
    pub no_video: bool,

    /// Skip subtitles.
    #[arg(long)]
    pub no_subtitles: bool,

    /// Configuration file (default: <config_dir>/episodl/config.toml).
    #[arg(short, long, env = "EPISODL_CONFIG")]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Applies the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = Some(dir.clone());
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(template) = &self.name {
            config.filename_template = template.clone();
        }
        if self.no_video {
            config.video = false;
        }
        if self.no_subtitles {
            config.subtitles = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "episodl",
            "-o",
            "/tmp/out",
            "-Q",
            "540p",
            "-j",
            "3",
            "--priority",
            "-2",
            "--no-subtitles",
            "https://media.example/ep1.m3u8",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.quality, Quality::MaxHeight(540));
        assert_eq!(config.concurrency, 3);
        assert!(config.video);
        assert!(!config.subtitles);
        assert_eq!(args.priority, -2);
    }

    #[test]
    fn test_requires_a_url() {
        assert!(Args::try_parse_from(["episodl"]).is_err());
        assert!(Args::try_parse_from(["episodl", "not a url"]).is_err());
        assert!(Args::try_parse_from(["episodl", "--no-video", "--no-subtitles", "https://a.example/x"]).is_err());
    }
}
