//! Pairing of raw fragments into per-user (audio, video) pairs
//!
//! Fragments are stable-sorted by timestamp and adjacent entries with the
//! same user and timestamp form a pair. With three or more fragments for
//! the same (user, timestamp) only the first adjacent pair is kept.

use crate::store::{FilePair, Fragment};

/// Group fragments into pairs
pub fn pair(fragments: &[Fragment]) -> Vec<FilePair> {
    let mut sorted: Vec<&Fragment> = fragments.iter().collect();
    sorted.sort_by_key(|f| f.timestamp_ms);

    let mut pairs = Vec::new();
    let mut i = 0;
    while i + 1 < sorted.len() {
        let (a, b) = (sorted[i], sorted[i + 1]);
        if a.user_id == b.user_id && a.timestamp_ms == b.timestamp_ms {
            pairs.push(FilePair {
                user_id: a.user_id,
                file_a: a.clone(),
                file_b: b.clone(),
            });

            // Skip any further fragments of the same (user, timestamp)
            i += 2;
            while i < sorted.len()
                && sorted[i].user_id == a.user_id
                && sorted[i].timestamp_ms == a.timestamp_ms
            {
                tracing::debug!("Dropping surplus fragment {}", sorted[i].filename);
                i += 1;
            }
        } else {
            i += 1;
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MediaType;

    fn fragment(user_id: u64, timestamp_ms: u64, kind: &str) -> Fragment {
        Fragment {
            room_id: "abc".to_string(),
            user_id,
            timestamp_ms,
            filename: format!("videoroom-x-abc-{}-{}-{}", user_id, timestamp_ms, kind),
            media_type: MediaType::from_token(kind),
        }
    }

    #[test]
    fn test_pairs_two_users() {
        let fragments = vec![
            fragment(2, 2000, "video"),
            fragment(1, 1000, "audio"),
            fragment(2, 2000, "audio"),
            fragment(1, 1000, "video"),
        ];

        let pairs = pair(&fragments);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].user_id, 1);
        assert_eq!(pairs[0].video().filename, "videoroom-x-abc-1-1000-video");
        assert_eq!(pairs[0].audio().filename, "videoroom-x-abc-1-1000-audio");
        assert_eq!(pairs[1].user_id, 2);
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let fragments = vec![fragment(1, 1000, "audio"), fragment(1, 1000, "video")];
        let pairs = pair(&fragments);
        assert_eq!(pairs[0].file_a.filename, "videoroom-x-abc-1-1000-audio");
        assert_eq!(pairs[0].file_b.filename, "videoroom-x-abc-1-1000-video");
    }

    #[test]
    fn test_three_identical_fragments_make_one_pair() {
        let fragments = vec![
            fragment(1, 1000, "audio"),
            fragment(1, 1000, "video"),
            fragment(1, 1000, "video"),
        ];
        assert_eq!(pair(&fragments).len(), 1);
    }

    #[test]
    fn test_unmatched_fragments() {
        let fragments = vec![
            fragment(1, 1000, "audio"),
            fragment(2, 1000, "video"),
            fragment(1, 1500, "video"),
        ];
        assert!(pair(&fragments).is_empty());
        assert!(pair(&[]).is_empty());
    }

    #[test]
    fn test_same_timestamp_different_users_not_adjacent() {
        // user 2 sits between the two halves of user 1 after sorting
        let fragments = vec![
            fragment(1, 1000, "audio"),
            fragment(2, 1000, "audio"),
            fragment(1, 1000, "video"),
        ];
        assert!(pair(&fragments).is_empty());
    }
}
