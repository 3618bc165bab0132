use std::fmt;

use tracing::debug;

use crate::{Result, Timestamp, WebVttError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub id: Option<String>,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Raw cue settings following the end timestamp.
    pub settings: Option<String>,
    /// Payload lines joined with `\n`.
    pub text: String,
}

impl Cue {
    pub fn shifted(&self, offset_ms: u64) -> Self {
        Self {
            start: self.start.shifted(offset_ms),
            end: self.end.shifted(offset_ms),
            ..self.clone()
        }
    }
}

impl fmt::Display for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            writeln!(f, "{id}")?;
        }
        write!(f, "{} --> {}", self.start, self.end)?;
        if let Some(settings) = &self.settings {
            write!(f, " {settings}")?;
        }
        writeln!(f)?;
        if !self.text.is_empty() {
            writeln!(f, "{}", self.text)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Cue(Cue),
    /// A standalone `NOTE` comment.
    Note(String),
}

/// A parsed WebVTT document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebVtt {
    /// Text after the `WEBVTT` signature plus any header lines.
    pub header: String,
    pub blocks: Vec<Block>,
}

impl WebVtt {
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let mut lines = text.split('\n').enumerate().peekable();

        let (_, signature) = lines.next().ok_or(WebVttError::MissingSignature)?;
        let rest = signature
            .strip_prefix("WEBVTT")
            .ok_or(WebVttError::MissingSignature)?;
        if !(rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t')) {
            return Err(WebVttError::MissingSignature);
        }

        let mut header_lines = vec![rest.trim().to_string()];
        while let Some((_, line)) = lines.next_if(|(_, line)| !line.trim().is_empty()) {
            header_lines.push(line.to_string());
        }
        let header = header_lines
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut blocks = Vec::new();
        let mut current: Vec<(usize, &str)> = Vec::new();
        for (number, line) in lines {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    if let Some(block) = parse_block(&current)? {
                        blocks.push(block);
                    }
                    current.clear();
                }
            } else {
                current.push((number + 1, line));
            }
        }
        if !current.is_empty()
            && let Some(block) = parse_block(&current)?
        {
            blocks.push(block);
        }

        Ok(Self { header, blocks })
    }

    pub fn cues(&self) -> impl Iterator<Item = &Cue> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Cue(cue) => Some(cue),
            Block::Note(_) => None,
        })
    }
}

fn parse_block(lines: &[(usize, &str)]) -> Result<Option<Block>> {
    let (line_number, first) = lines[0];

    if first == "NOTE" || first.starts_with("NOTE ") || first.starts_with("NOTE\t") {
        let mut note = vec![first[4..].trim().to_string()];
        note.extend(lines[1..].iter().map(|(_, line)| line.to_string()));
        let note: Vec<String> = note.into_iter().filter(|l| !l.is_empty()).collect();
        return Ok(Some(Block::Note(note.join("\n"))));
    }
    if first.starts_with("STYLE") || first.starts_with("REGION") {
        debug!(line = line_number, "skipping {} block", first.trim());
        return Ok(None);
    }

    let (id, timing_index) = if first.contains("-->") {
        (None, 0)
    } else if lines.len() > 1 && lines[1].1.contains("-->") {
        (Some(first.to_string()), 1)
    } else {
        return Err(WebVttError::MalformedBlock {
            line: line_number,
            content: first.to_string(),
        });
    };

    let (_, timing) = lines[timing_index];
    let (start, rest) = timing
        .split_once("-->")
        .ok_or_else(|| WebVttError::MalformedBlock {
            line: line_number,
            content: timing.to_string(),
        })?;
    let rest = rest.trim_start();
    let (end, settings) = match rest.split_once(char::is_whitespace) {
        Some((end, settings)) => (end, Some(settings.trim().to_string()).filter(|s| !s.is_empty())),
        None => (rest, None),
    };

    let text = lines[timing_index + 1..]
        .iter()
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Some(Block::Cue(Cue {
        id,
        start: start.trim().parse()?,
        end: end.trim().parse()?,
        settings,
        text,
    })))
}

impl fmt::Display for WebVtt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.header.split_once('\n') {
            _ if self.header.is_empty() => writeln!(f, "WEBVTT")?,
            Some((first, rest)) => writeln!(f, "WEBVTT {first}\n{rest}")?,
            None => writeln!(f, "WEBVTT {}", self.header)?,
        }
        for block in &self.blocks {
            writeln!(f)?;
            match block {
                Block::Cue(cue) => write!(f, "{cue}")?,
                Block::Note(note) => writeln!(f, "NOTE {note}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "WEBVTT - episode 1\r\nX-TIMESTAMP-MAP=MPEGTS:900000,LOCAL:00:00:00.000\r\n\r\nNOTE translated by\r\nsomeone\r\n\r\n1\r\n00:00:01.000 --> 00:00:04.500 align:start line:90%\r\nHello there,\r\nfriend.\r\n\r\n00:05.000 --> 00:06.000\r\n<i>Music</i>\r\n\r\nSTYLE\r\n::cue { color: red }\r\n";

    #[test]
    fn parses_header_notes_and_cues() {
        let vtt = WebVtt::parse(SAMPLE).unwrap();
        assert_eq!(
            vtt.header,
            "- episode 1\nX-TIMESTAMP-MAP=MPEGTS:900000,LOCAL:00:00:00.000"
        );
        assert_eq!(vtt.blocks.len(), 3);
        assert_eq!(vtt.blocks[0], Block::Note("translated by\nsomeone".to_string()));

        let cues: Vec<&Cue> = vtt.cues().collect();
        assert_eq!(cues[0].id.as_deref(), Some("1"));
        assert_eq!(cues[0].start, Timestamp(1_000));
        assert_eq!(cues[0].end, Timestamp(4_500));
        assert_eq!(cues[0].settings.as_deref(), Some("align:start line:90%"));
        assert_eq!(cues[0].text, "Hello there,\nfriend.");
        assert_eq!(cues[1].id, None);
        assert_eq!(cues[1].start, Timestamp(5_000));
    }

    #[test]
    fn rejects_missing_signature_and_garbage_blocks() {
        assert_eq!(WebVtt::parse("1\n00:00.000 --> 00:01.000\nhi\n"), Err(WebVttError::MissingSignature));
        assert_eq!(WebVtt::parse("WEBVTTX\n"), Err(WebVttError::MissingSignature));
        assert!(matches!(
            WebVtt::parse("WEBVTT\n\njust text\n"),
            Err(WebVttError::MalformedBlock { line: 3, .. })
        ));
    }

    #[test]
    fn display_round_trips_structure() {
        let vtt = WebVtt::parse(SAMPLE).unwrap();
        let reparsed = WebVtt::parse(&vtt.to_string()).unwrap();
        assert_eq!(reparsed, vtt);
    }
}
