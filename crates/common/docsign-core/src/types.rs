use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map($name)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(
    /// Stable external reference to a user account. Not owned by this crate.
    UserId
);
id_type!(
    /// Business document (request or contract) being signed.
    DocumentId
);
id_type!(
    /// Entry in the statement template catalog.
    TemplateId
);

/// Role assignments that decide who has to sign a document.
///
/// Loaded fresh for every evaluation since director membership can change
/// between two signings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SigningContext {
    pub document_id: DocumentId,
    pub creator: UserId,
    /// `None` until the workflow is finished.
    pub completer: Option<UserId>,
    pub director_ids: BTreeSet<UserId>,
}

impl SigningContext {
    /// Participants are the creator and, once known, the completer.
    pub fn participants(&self) -> BTreeSet<UserId> {
        let mut participants = BTreeSet::new();
        participants.insert(self.creator);
        if let Some(completer) = self.completer {
            participants.insert(completer);
        }
        participants
    }

    /// Directors that still need their own signature, i.e. directors who are
    /// not already a participant.
    pub fn effective_directors(&self) -> BTreeSet<UserId> {
        let participants = self.participants();
        self.director_ids
            .iter()
            .filter(|id| !participants.contains(id))
            .copied()
            .collect()
    }

    /// `{creator} ∪ {completer} ∪ (directors \ {creator, completer})`
    pub fn required_signers(&self) -> BTreeSet<UserId> {
        let mut required = self.participants();
        required.extend(self.effective_directors());
        required
    }
}

/// Serde adapter: byte vectors as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
