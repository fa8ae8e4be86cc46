//! Filename conventions
//!
//! Fragments: `videoroom-<tag>-<room>-<user>-<timestampMs>-<mediaType>`
//! Mixed:     `mixed-<fragment filename>`
//! Converted: `converted-<mixed filename>.mkv`
//! Final:     `<room>.mkv`

use super::types::{ConvertedFile, Fragment, MediaType, MixedFile, ParseError};

pub const FRAGMENT_PREFIX: &str = "videoroom";
pub const RAW_CAPTURE_SUFFIX: &str = ".mjr";
pub const MIXED_PREFIX: &str = "mixed-";
pub const CONVERTED_PREFIX: &str = "converted-mixed-";
pub const MKV_SUFFIX: &str = ".mkv";

/// Leaf extensions produced by the demux step
const LEAF_SUFFIXES: [&str; 2] = [".opus", ".webm"];

/// Room ids become a directory name and a shell argument
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id != "."
        && room_id != ".."
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
}

pub fn is_fragment_name(filename: &str) -> bool {
    filename.starts_with(FRAGMENT_PREFIX) && !filename.ends_with(RAW_CAPTURE_SUFFIX)
}

pub fn is_mixed_name(filename: &str) -> bool {
    filename.starts_with(MIXED_PREFIX)
}

pub fn is_converted_name(filename: &str) -> bool {
    filename.starts_with(CONVERTED_PREFIX) && filename.ends_with(MKV_SUFFIX)
}

/// Intermediates and demuxed leaves, never the final artifact
pub fn is_deletable_name(filename: &str) -> bool {
    filename.starts_with("converted-mixed")
        || filename.starts_with("mixed")
        || LEAF_SUFFIXES.iter().any(|suffix| filename.ends_with(suffix))
}

pub fn final_name(room_id: &str) -> String {
    format!("{}{}", room_id, MKV_SUFFIX)
}

pub fn mixed_name(video_filename: &str) -> String {
    format!("{}{}", MIXED_PREFIX, video_filename)
}

pub fn converted_name(mixed_filename: &str) -> String {
    format!("converted-{}{}", mixed_filename, MKV_SUFFIX)
}

fn split_fields<'a>(filename: &'a str, expected: usize) -> Result<Vec<&'a str>, ParseError> {
    let fields: Vec<&str> = filename.split('-').collect();
    if fields.len() < expected {
        return Err(ParseError::MissingFields {
            filename: filename.to_string(),
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

fn numeric_field(
    filename: &str,
    fields: &[&str],
    index: usize,
    name: &'static str,
) -> Result<u64, ParseError> {
    fields[index].parse().map_err(|_| ParseError::NotNumeric {
        filename: filename.to_string(),
        field: index,
        name,
        value: fields[index].to_string(),
    })
}

/// Parse a recorder fragment name
///
/// The room id comes from the directory being scanned, not from the name.
pub fn parse_fragment(room_id: &str, filename: &str) -> Result<Fragment, ParseError> {
    let fields = split_fields(filename, 6)?;
    let user_id = numeric_field(filename, &fields, 3, "user")?;
    let timestamp_ms = numeric_field(filename, &fields, 4, "timestamp")?;

    Ok(Fragment {
        room_id: room_id.to_string(),
        user_id,
        timestamp_ms,
        filename: filename.to_string(),
        media_type: MediaType::from_token(fields[5]),
    })
}

pub fn parse_mixed(room_id: &str, filename: &str) -> Result<MixedFile, ParseError> {
    let fields = split_fields(filename, 6)?;
    Ok(MixedFile {
        room_id: room_id.to_string(),
        user_id: numeric_field(filename, &fields, 4, "user")?,
        timestamp_ms: numeric_field(filename, &fields, 5, "timestamp")?,
        filename: filename.to_string(),
    })
}

pub fn parse_converted(room_id: &str, filename: &str) -> Result<ConvertedFile, ParseError> {
    let fields = split_fields(filename, 7)?;
    Ok(ConvertedFile {
        room_id: room_id.to_string(),
        user_id: numeric_field(filename, &fields, 5, "user")?,
        timestamp_ms: numeric_field(filename, &fields, 6, "timestamp")?,
        filename: filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment() {
        let fragment = parse_fragment("abc", "videoroom-x-abc-1-1000-video.webm").unwrap();
        assert_eq!(fragment.room_id, "abc");
        assert_eq!(fragment.user_id, 1);
        assert_eq!(fragment.timestamp_ms, 1000);
        assert_eq!(fragment.media_type, MediaType::Video);
    }

    #[test]
    fn test_parse_fragment_errors() {
        assert!(matches!(
            parse_fragment("abc", "videoroom-x-abc-1"),
            Err(ParseError::MissingFields { found: 4, .. })
        ));
        assert!(matches!(
            parse_fragment("abc", "videoroom-x-abc-bob-1000-audio"),
            Err(ParseError::NotNumeric { name: "user", .. })
        ));
        assert!(matches!(
            parse_fragment("abc", "videoroom-x-abc-1-soon-audio"),
            Err(ParseError::NotNumeric { name: "timestamp", .. })
        ));
    }

    #[test]
    fn test_intermediate_names_parse_back() {
        let mixed = mixed_name("videoroom-x-abc-2-2000-video");
        assert!(is_mixed_name(&mixed));
        let parsed = parse_mixed("abc", &mixed).unwrap();
        assert_eq!((parsed.user_id, parsed.timestamp_ms), (2, 2000));

        let converted = converted_name(&mixed);
        assert_eq!(converted, "converted-mixed-videoroom-x-abc-2-2000-video.mkv");
        assert!(is_converted_name(&converted));
        let parsed = parse_converted("abc", &converted).unwrap();
        assert_eq!((parsed.user_id, parsed.timestamp_ms), (2, 2000));
    }

    #[test]
    fn test_room_ids() {
        assert!(is_valid_room_id("1234"));
        assert!(is_valid_room_id("room_1"));
        assert!(!is_valid_room_id(""));
        assert!(!is_valid_room_id(".."));
        assert!(!is_valid_room_id("a/b"));
        assert!(!is_valid_room_id("a-b"));
        assert!(!is_valid_room_id("a;rm"));
    }

    #[test]
    fn test_name_classes() {
        assert!(is_fragment_name("videoroom-x-abc-1-1000-audio.opus"));
        assert!(!is_fragment_name("videoroom-x-abc-1-1000-audio.mjr"));
        assert!(!is_converted_name("converted-mixed-videoroom-x-abc-1-1000-video"));

        assert!(is_deletable_name("mixed-videoroom-x-abc-1-1000-video.webm"));
        assert!(is_deletable_name("converted-mixed-videoroom-x-abc-1-1000-video.mkv"));
        assert!(is_deletable_name("videoroom-x-abc-1-1000-audio.opus"));
        assert!(!is_deletable_name("abc.mkv"));
        assert!(!is_deletable_name("videoroom-x-abc-1-1000-audio.mjr"));
    }
}
