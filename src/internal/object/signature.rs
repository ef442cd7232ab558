//! Author/committer/tagger signatures: `(name, email, timestamp, tz-offset)` as carried by
//! commit and tag object headers.

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which header line a signature was (or will be) serialized under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl SignatureType {
    fn keyword(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Committer => "committer",
            SignatureType::Tagger => "tagger",
        }
    }

    fn from_keyword(s: &str) -> Result<Self, GitError> {
        match s {
            "author" => Ok(SignatureType::Author),
            "committer" => Ok(SignatureType::Committer),
            "tagger" => Ok(SignatureType::Tagger),
            other => Err(GitError::InvalidSignatureType(other.to_string())),
        }
    }
}

/// `(name, email, timestamp, tz-offset-minutes)` per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Offset from UTC in minutes, e.g. `+0800` is `480`.
    pub tz_offset_minutes: i32,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} <{}> {} {}",
            self.signature_type.keyword(),
            self.name,
            self.email,
            self.timestamp,
            format_tz_offset(self.tz_offset_minutes)
        )
    }
}

fn format_tz_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let minutes = minutes.abs();
    format!("{sign}{:02}{:02}", minutes / 60, minutes % 60)
}

fn parse_tz_offset(s: &str) -> Result<i32, GitError> {
    if s.len() != 5 || !(s.starts_with('+') || s.starts_with('-')) {
        return Err(GitError::InvalidSignatureType(format!(
            "bad timezone offset: {s}"
        )));
    }
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let hours: i32 = s[1..3]
        .parse()
        .map_err(|_| GitError::InvalidSignatureType(format!("bad timezone offset: {s}")))?;
    let mins: i32 = s[3..5]
        .parse()
        .map_err(|_| GitError::InvalidSignatureType(format!("bad timezone offset: {s}")))?;
    Ok(sign * (hours * 60 + mins))
}

impl Signature {
    /// Build a signature stamped with the current wall-clock time and no tz offset, for
    /// callers that don't need to control timestamps precisely (e.g. interactive commits).
    pub fn new(signature_type: SignatureType, name: String, email: String) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Signature {
            signature_type,
            name,
            email,
            timestamp,
            tz_offset_minutes: 0,
        }
    }

    pub fn new_at(
        signature_type: SignatureType,
        name: String,
        email: String,
        timestamp: i64,
        tz_offset_minutes: i32,
    ) -> Self {
        Signature {
            signature_type,
            name,
            email,
            timestamp,
            tz_offset_minutes,
        }
    }

    /// Parse a single header line, e.g. `author A U Thor <a@example.com> 1700000000 +0800`.
    /// A line may also carry a PGP-signature continuation (`gpgsig`/`gpgsig-sha256`); only
    /// the plain author/committer/tagger line shape is accepted here, matching the slice the
    /// caller (commit/tag parsing) hands in.
    pub fn from_data(data: Vec<u8>) -> Result<Self, GitError> {
        let line = data
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?;
        let (keyword, rest) = line
            .split_once(' ')
            .ok_or_else(|| GitError::InvalidSignatureType(line.to_string()))?;
        let signature_type = SignatureType::from_keyword(keyword)?;

        let email_start = rest
            .find('<')
            .ok_or_else(|| GitError::InvalidSignatureType(line.to_string()))?;
        let email_end = rest
            .find('>')
            .ok_or_else(|| GitError::InvalidSignatureType(line.to_string()))?;
        let name = rest[..email_start].trim().to_string();
        let email = rest[email_start + 1..email_end].to_string();

        let tail = rest[email_end + 1..].trim();
        let mut parts = tail.split_whitespace();
        let timestamp: i64 = parts
            .next()
            .ok_or_else(|| GitError::InvalidSignatureType(line.to_string()))?
            .parse()
            .map_err(|_| GitError::InvalidSignatureType(line.to_string()))?;
        let tz_offset_minutes = match parts.next() {
            Some(tz) => parse_tz_offset(tz)?,
            None => 0,
        };

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            tz_offset_minutes,
        })
    }

    /// Serialize back to the `<keyword> <name> <<email>> <timestamp> <tz>` header line.
    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_data() {
        let sig = Signature::new_at(
            SignatureType::Author,
            "A U Thor".to_string(),
            "a@example.com".to_string(),
            1_700_000_000,
            480,
        );
        let data = sig.to_data().unwrap();
        let parsed = Signature::from_data(data).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn negative_offset_formats_with_minus_sign() {
        let sig = Signature::new_at(
            SignatureType::Committer,
            "A".to_string(),
            "a@example.com".to_string(),
            0,
            -330,
        );
        assert!(sig.to_string().ends_with("-0530"));
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let err = Signature::from_data(b"witness A <a@b.com> 1 +0000".to_vec()).unwrap_err();
        assert!(matches!(err, GitError::InvalidSignatureType(_)));
    }
}
