//! Speaker identity labels and the file name convention that encodes them.
//!
//! Recordings are named as hyphen-separated numeric fields, for example
//! `03-01-05-02-01-01-12.wav`; the last field before the extension is the
//! speaker. Files are grouped under `Actor_NN` directories.

use crate::error::LabelError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Number of speakers in the corpus.
pub const NUM_SPEAKERS: u8 = 24;

const LABEL_PREFIX: &str = "speaker";
/// Directory name prefix grouping one speaker's recordings.
pub const ACTOR_DIR_PREFIX: &str = "Actor_";

/// One of the fixed set of speakers, numbered from 1.
///
/// Renders as `speakerNN` everywhere it is displayed or serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeakerId(u8);

impl SpeakerId {
    /// Every speaker, in display order.
    pub const ALL: [SpeakerId; NUM_SPEAKERS as usize] = {
        let mut all = [SpeakerId(1); NUM_SPEAKERS as usize];
        let mut i = 0;
        while i < all.len() {
            all[i] = SpeakerId(i as u8 + 1);
            i += 1;
        }
        all
    };

    pub fn new(id: u8) -> Option<Self> {
        (1..=NUM_SPEAKERS).contains(&id).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Parses the speaker from the last hyphen-separated field of the file stem.
    pub fn from_path(path: &Path) -> Result<Self, LabelError> {
        let field = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit('-').next())
            .filter(|field| !field.is_empty())
            .ok_or_else(|| LabelError::MissingField(path.to_path_buf()))?;

        if !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LabelError::InvalidField {
                path: path.to_path_buf(),
                field: field.to_string(),
            });
        }

        let id: u32 = field.parse().map_err(|_| LabelError::InvalidField {
            path: path.to_path_buf(),
            field: field.to_string(),
        })?;

        u8::try_from(id)
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| LabelError::UnknownSpeaker {
                path: path.to_path_buf(),
                id,
            })
    }

    /// Speaker implied by an `Actor_NN` parent directory, if there is one.
    pub fn from_actor_dir(path: &Path) -> Option<Self> {
        let dir = path.parent()?.file_name()?.to_str()?;
        let id = dir.strip_prefix(ACTOR_DIR_PREFIX)?.parse::<u8>().ok()?;
        Self::new(id)
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LABEL_PREFIX}{:02}", self.0)
    }
}

impl FromStr for SpeakerId {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(LABEL_PREFIX).unwrap_or(s);
        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| LabelError::Unrecognized(s.to_string()))
    }
}

impl Serialize for SpeakerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_last_field_of_stem() {
        let path = PathBuf::from("data/Actor_12/03-01-05-02-01-01-12.wav");
        assert_eq!(SpeakerId::from_path(&path).unwrap(), SpeakerId::new(12).unwrap());
    }

    #[test]
    fn renders_zero_padded() {
        let path = PathBuf::from("03-01-01-01-01-02-01.wav");
        let speaker = SpeakerId::from_path(&path).unwrap();
        assert_eq!(speaker.to_string(), "speaker01");
        assert_eq!(SpeakerId::new(24).unwrap().to_string(), "speaker24");
    }

    #[test]
    fn from_str_accepts_padded_and_unpadded() {
        let expected = SpeakerId::new(7).unwrap();
        assert_eq!("speaker07".parse::<SpeakerId>().unwrap(), expected);
        assert_eq!("speaker7".parse::<SpeakerId>().unwrap(), expected);
        assert_eq!("7".parse::<SpeakerId>().unwrap(), expected);
        assert!("speaker25".parse::<SpeakerId>().is_err());
        assert!("narrator".parse::<SpeakerId>().is_err());
    }

    #[test]
    fn rejects_non_numeric_field() {
        let path = PathBuf::from("03-01-01-01-01-02-xx.wav");
        assert!(matches!(
            SpeakerId::from_path(&path),
            Err(LabelError::InvalidField { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_speaker() {
        for name in ["03-01-01-01-01-02-00.wav", "03-01-01-01-01-02-25.wav", "1-999.wav"] {
            assert!(matches!(
                SpeakerId::from_path(Path::new(name)),
                Err(LabelError::UnknownSpeaker { .. })
            ));
        }
    }

    #[test]
    fn rejects_trailing_hyphen() {
        let path = PathBuf::from("03-01-.wav");
        assert!(matches!(
            SpeakerId::from_path(&path),
            Err(LabelError::MissingField(_))
        ));
    }

    #[test]
    fn all_is_ordered_and_complete() {
        assert_eq!(SpeakerId::ALL.len(), 24);
        assert_eq!(SpeakerId::ALL[0].get(), 1);
        assert_eq!(SpeakerId::ALL[23].get(), 24);
        assert!(SpeakerId::ALL.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn reads_actor_directory() {
        let path = PathBuf::from("ravdess/Actor_03/03-01-01-01-01-01-03.wav");
        assert_eq!(SpeakerId::from_actor_dir(&path), SpeakerId::new(3));
        assert_eq!(SpeakerId::from_actor_dir(Path::new("a.wav")), None);
    }

    #[test]
    fn serializes_as_label() {
        let json = serde_json::to_string(&SpeakerId::new(5).unwrap()).unwrap();
        assert_eq!(json, "\"speaker05\"");
    }
}
