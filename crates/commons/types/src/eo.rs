//! Epistemic operation (EO) audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::closed::closed_set;
use crate::ids::RoomId;

closed_set! {
    /// Operation kind of an audit record.
    EoKind = "EO kind" {
        /// Insertion: something now exists.
        Ins => "INS",
        /// Alteration of an existing value.
        Alt => "ALT",
        /// Segmentation: a visibility boundary moved.
        Seg => "SEG",
        /// Designation: something was defined or named.
        Des => "DES",
        /// Connection between two things.
        Con => "CON",
        /// Nullification: something was withdrawn or voided.
        Nul => "NUL",
        /// Synchronization of two sources into one value.
        Syn => "SYN",
        /// Superposition: competing readings held without resolution.
        Sup => "SUP",
        /// Reconfiguration.
        Rec => "REC",
    }
}

closed_set! {
    /// Epistemic stance of a record.
    Epistemic = "epistemic stance" {
        /// Asserted as fact.
        Given => "GIVEN",
        /// Asserted as interpretation or decision.
        Meant => "MEANT",
    }
}

closed_set! {
    /// Visibility type of the room a record is framed in.
    Visibility = "visibility" {
        Individual => "individual",
        Org => "org",
        Network => "network",
        Bridge => "bridge",
        Vault => "vault",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub visibility: Visibility,
    pub room: RoomId,
    pub epistemic: Epistemic,
}

impl Frame {
    pub fn given(visibility: Visibility, room: &RoomId) -> Self {
        Self {
            visibility,
            room: room.clone(),
            epistemic: Epistemic::Given,
        }
    }

    pub fn meant(visibility: Visibility, room: &RoomId) -> Self {
        Self {
            visibility,
            room: room.clone(),
            epistemic: Epistemic::Meant,
        }
    }
}

/// One immutable audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EoOperation {
    pub kind: EoKind,
    /// Dotted path of the thing the operation is about.
    pub target: String,
    pub payload: Value,
    pub frame: Frame,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_serializes_visibility_as_type() {
        let frame = Frame::meant(Visibility::Bridge, &RoomId::new("bridge-1"));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "bridge", "room": "bridge-1", "epistemic": "MEANT"})
        );
    }

    #[test]
    fn kinds_render_as_three_letter_codes() {
        let codes: Vec<&str> = EoKind::ALL.iter().map(EoKind::as_str).collect();
        assert_eq!(
            codes,
            vec!["INS", "ALT", "SEG", "DES", "CON", "NUL", "SYN", "SUP", "REC"]
        );
    }
}
