//! Track labels and the HLS stream mapping derived from them.
//!
//! Labels end up inside ffmpeg's `-var_stream_map`, where commas, colons and
//! spaces are separators, so every label is reduced to `[A-Za-z0-9_]`.

use super::prober::ProbeReport;

/// Label used when a stream carries no usable language tag.
pub const UNDETERMINED: &str = "und";

/// One audio or subtitle rendition as it will appear in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLabel {
    /// Position among tracks of the same kind (`0:a:<index>`)
    pub index: usize,
    /// Sanitized three-letter language code
    pub language: String,
    /// Language code made unique within its kind (`eng`, `eng_2`, ...)
    pub name: String,
}

/// Everything the transcoder needs to know about a source's streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub video_count: usize,
    pub audio: Vec<TrackLabel>,
    pub subtitles: Vec<TrackLabel>,
}

impl TrackInfo {
    pub fn from_report(report: &ProbeReport) -> Self {
        Self {
            video_count: report.video_count,
            audio: label_tracks(report.audio.iter().map(|s| s.language.as_deref())),
            subtitles: label_tracks(report.subtitles.iter().map(|s| s.language.as_deref())),
        }
    }

    pub fn has_subtitles(&self) -> bool {
        !self.subtitles.is_empty()
    }

    /// `-map` arguments selecting the first video stream and every track.
    pub fn map_args(&self, include_subtitles: bool) -> Vec<String> {
        let mut args = vec!["-map".to_string(), "0:v:0".to_string()];
        for track in &self.audio {
            args.push("-map".to_string());
            args.push(format!("0:a:{}", track.index));
        }
        if include_subtitles {
            for track in &self.subtitles {
                args.push("-map".to_string());
                args.push(format!("0:s:{}", track.index));
            }
        }
        args
    }

    /// Value for ffmpeg's `-var_stream_map`.
    ///
    /// Audio and subtitle renditions come first, grouped as `audio` and
    /// `subs`; the single video variant references those groups. The first
    /// audio track is the default rendition.
    pub fn var_stream_map(&self, include_subtitles: bool) -> String {
        let mut entries = Vec::new();

        for (position, track) in self.audio.iter().enumerate() {
            entries.push(format!(
                "a:{},agroup:audio,language:{},name:{},default:{}",
                track.index,
                track.language,
                track.name,
                if position == 0 { "yes" } else { "no" }
            ));
        }

        let with_subtitles = include_subtitles && self.has_subtitles();
        if with_subtitles {
            for track in &self.subtitles {
                entries.push(format!(
                    "s:{},sgroup:subs,language:{},name:{}",
                    track.index, track.language, track.name
                ));
            }
        }

        let mut video = "v:0".to_string();
        if !self.audio.is_empty() {
            video.push_str(",agroup:audio");
        }
        if with_subtitles {
            video.push_str(",sgroup:subs");
        }
        entries.push(video);

        entries.join(" ")
    }
}

/// Language code of a stream: the first three characters of its tag.
pub fn language_code(tag: Option<&str>) -> String {
    match tag.map(str::trim).filter(|t| !t.is_empty()) {
        Some(tag) => sanitize_label(&tag.chars().take(3).collect::<String>()),
        None => UNDETERMINED.to_string(),
    }
}

/// Reduce `raw` to ASCII alphanumerics and underscores.
///
/// Other characters become `_`, trailing underscores are dropped and an
/// empty result falls back to `und`.
pub fn sanitize_label(raw: &str) -> String {
    let mut label: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = label.trim_end_matches('_').len();
    label.truncate(trimmed);
    if label.is_empty() {
        UNDETERMINED.to_string()
    } else {
        label
    }
}

fn label_tracks<'a>(tags: impl Iterator<Item = Option<&'a str>>) -> Vec<TrackLabel> {
    let languages: Vec<String> = tags.map(language_code).collect();
    let names = disambiguate(&languages);
    languages
        .into_iter()
        .zip(names)
        .enumerate()
        .map(|(index, (language, name))| TrackLabel {
            index,
            language,
            name,
        })
        .collect()
}

/// Make labels unique in order of first occurrence.
///
/// The n-th occurrence of a base label gets the suffix `_n` (`eng`, `eng_2`,
/// `eng_3`). If a suffixed name collides with a literal label elsewhere in
/// the list, the counter keeps climbing until the name is free.
pub fn disambiguate(labels: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(labels.len());
    for (position, base) in labels.iter().enumerate() {
        let occurrence = labels[..position].iter().filter(|l| *l == base).count() + 1;
        let mut candidate = if occurrence == 1 {
            base.clone()
        } else {
            format!("{base}_{occurrence}")
        };
        let mut counter = occurrence;
        while names.contains(&candidate) {
            counter += 1;
            candidate = format!("{base}_{counter}");
        }
        names.push(candidate);
    }
    names
}
