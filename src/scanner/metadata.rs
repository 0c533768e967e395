use lofty::file::TaggedFileExt;
use lofty::id3::v2::{Frame, FrameId, Id3v2Tag};
use lofty::prelude::*;
use lofty::tag::{ItemKey, Tag, TagType};
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

use crate::snapshot::record::{TrackRecord, parse_int_text};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported format (not .mp3/.flac): {0}")]
    UnsupportedFormat(String),
    #[error("Could not read {path}: {source}")]
    Read {
        path: String,
        source: lofty::error::LoftyError,
    },
}

/// Reads one audio file into a track record. Implementations never write to
/// the file.
pub trait TagExtractor: Sync {
    fn extract(&self, path: &Path) -> Result<TrackRecord, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Flac,
    Mp3,
}

/// Lowercased extension of `path`, or empty.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Tag extractor for FLAC (vorbis comments) and MP3 (ID3v2) files.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

impl TagExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<TrackRecord, ExtractError> {
        let ext = extension_of(path);
        let container = match ext.as_str() {
            "flac" => Container::Flac,
            "mp3" => Container::Mp3,
            _ => return Err(ExtractError::UnsupportedFormat(path.display().to_string())),
        };

        let tagged_file = lofty::read_from_path(path).map_err(|source| ExtractError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let props = tagged_file.properties();
        let mut record = TrackRecord {
            time: props.duration().as_secs_f64(),
            bitrate: props
                .audio_bitrate()
                .map(|kbps| i64::from(kbps) * 1000)
                .unwrap_or(0),
            extension: ext,
            filename: path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default(),
            ..Default::default()
        };

        // Try primary tag, then fall back
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());

        match tag {
            Some(tag) => fill_from_tag(&mut record, tag, container),
            None => log::debug!("No tags in {}", path.display()),
        }

        Ok(record)
    }
}

fn fill_from_tag(record: &mut TrackRecord, tag: &Tag, container: Container) {
    record.id = custom_text(tag, &["ID", "TRACKID"]).and_then(|s| parse_int_text(&s).ok().flatten());

    record.title = tag.title().map(|s| s.to_string());
    let artists: Vec<&str> = tag.get_strings(&ItemKey::TrackArtist).collect();
    record.artist = if artists.is_empty() {
        tag.artist().map(|s| s.to_string())
    } else {
        Some(artists.join("; "))
    };
    record.album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|s| s.to_string());
    record.album = tag.album().map(|s| s.to_string());

    let (major, minor) = split_pair(tag.get_strings(&ItemKey::Genre));
    record.major_genre = major;
    record.minor_genre = minor;
    let (major, minor) = split_pair(tag.get_strings(&ItemKey::Language));
    record.major_language = major;
    record.minor_language = minor;

    record.bpm = tag
        .get_string(&ItemKey::IntegerBpm)
        .or_else(|| tag.get_string(&ItemKey::Bpm))
        .and_then(|s| parse_int_text(s).ok().flatten());
    record.key = tag.get_string(&ItemKey::InitialKey).map(|s| s.to_string());
    record.year = tag.year().map(i64::from).or_else(|| {
        tag.get_string(&ItemKey::RecordingDate)
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    });
    // the copyright frame is repurposed for the vocalist's gender
    record.gender = tag.get_string(&ItemKey::CopyrightMessage).map(|s| s.to_string());

    record.date_added = custom_text(tag, &["ENCODINGTIME"]).and_then(|s| convert_date_added(&s));
    record.energy = custom_text(tag, &["ENERGY", "EnergyLevel"]).and_then(|s| parse_int_text(&s).ok().flatten());
    record.kplay = custom_text(tag, &["KPLAY"]).and_then(|s| parse_int_text(&s).ok().flatten());

    record.rating = match container {
        Container::Flac => custom_text(tag, &["RATING"]).and_then(|s| vorbis_rating(&s)),
        Container::Mp3 => popm_rating(tag),
    };
}

/// First value of a free-form tag, matched case-insensitively on any of `keys`.
/// Covers vorbis comment fields and ID3v2 TXXX descriptions alike.
fn custom_text(tag: &Tag, keys: &[&str]) -> Option<String> {
    tag.items().find_map(|item| match item.key() {
        ItemKey::Unknown(k) if keys.iter().any(|want| k.eq_ignore_ascii_case(want)) => {
            item.value().text().map(|s| s.to_string())
        }
        _ => None,
    })
}

/// Split a multi-valued tag into (major, minor). Exactly two values fill both
/// slots; otherwise only the first value is kept. ID3v2 may pack several
/// values into one NUL-separated string.
pub fn split_pair<'a>(values: impl Iterator<Item = &'a str>) -> (Option<String>, Option<String>) {
    let values: Vec<&str> = values
        .flat_map(|v| v.split('\0'))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    match values.as_slice() {
        [] => (None, None),
        [a, b] => (Some(a.to_string()), Some(b.to_string())),
        [a, ..] => (Some(a.to_string()), None),
    }
}

/// `DD/MM/YYYY` tag text to `YYYY-MM-DD`.
pub fn convert_date_added(raw: &str) -> Option<String> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Vorbis `RATING` is stored on a 0–100 scale; five stars is 100.
pub fn vorbis_rating(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|v| v / 20.0)
}

/// Star value of an ID3v2 popularimeter byte, as written by the tagger that
/// maintains this library. Unrecognised bytes count as unrated.
pub fn popm_stars(byte: u8) -> f64 {
    match byte {
        13 => 0.5,
        1 => 1.0,
        54 => 1.5,
        64 => 2.0,
        118 => 2.5,
        128 => 3.0,
        186 => 3.5,
        196 => 4.0,
        242 => 4.5,
        255 => 5.0,
        _ => 0.0,
    }
}

fn popm_rating(tag: &Tag) -> Option<f64> {
    if tag.tag_type() != TagType::Id3v2 {
        return None;
    }
    let id3v2_tag = Id3v2Tag::from(tag.clone());
    match id3v2_tag.get(&FrameId::Valid(Cow::Borrowed("POPM"))) {
        Some(Frame::Popularimeter(p)) => Some(popm_stars(p.rating)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair(std::iter::empty()), (None, None));
        assert_eq!(
            split_pair(["Pop"].into_iter()),
            (Some("Pop".into()), None)
        );
        assert_eq!(
            split_pair(["Pop", "Dance"].into_iter()),
            (Some("Pop".into()), Some("Dance".into()))
        );
        assert_eq!(
            split_pair(["Pop\0Dance"].into_iter()),
            (Some("Pop".into()), Some("Dance".into()))
        );
        // three values: only the first survives
        assert_eq!(
            split_pair(["A", "B", "C"].into_iter()),
            (Some("A".into()), None)
        );
    }

    #[test]
    fn test_convert_date_added() {
        assert_eq!(convert_date_added("09/03/2021").as_deref(), Some("2021-03-09"));
        assert_eq!(convert_date_added(" 31/12/1999 ").as_deref(), Some("1999-12-31"));
        assert_eq!(convert_date_added("2021-03-09"), None);
        assert_eq!(convert_date_added("31/02/2021"), None);
    }

    #[test]
    fn test_vorbis_rating() {
        assert_eq!(vorbis_rating("100"), Some(5.0));
        assert_eq!(vorbis_rating("60"), Some(3.0));
        assert_eq!(vorbis_rating("90"), Some(4.5));
        assert_eq!(vorbis_rating("n/a"), None);
    }

    #[test]
    fn test_popm_stars() {
        assert_eq!(popm_stars(255), 5.0);
        assert_eq!(popm_stars(1), 1.0);
        assert_eq!(popm_stars(128), 3.0);
        assert_eq!(popm_stars(13), 0.5);
        assert_eq!(popm_stars(100), 0.0);
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("cover.jpg");
        std::fs::write(&p, b"\xff\xd8").unwrap();
        assert!(matches!(
            LoftyExtractor.extract(&p),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_corrupt_audio_is_read_error() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("broken.flac");
        std::fs::write(&p, b"definitely not flac").unwrap();
        assert!(matches!(
            LoftyExtractor.extract(&p),
            Err(ExtractError::Read { .. })
        ));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/B.FLAC")), "flac");
        assert_eq!(extension_of(Path::new("noext")), "");
    }
}
