//! Participant arena and roster bookkeeping (§3).
//!
//! Cyclic references between platform observers and participant elements are
//! modeled as an arena (ID → [`Participant`]); observers carry IDs, not
//! handles, mirroring the teacher's member-ID-keyed `AudioHandler` in
//! `mixer/src/input/teamspeak.rs` rather than holding live connection
//! references directly.

use std::collections::HashMap;

/// Stable identity of a meeting participant. Identity is the ID, not the
/// display name — the same person may appear under variant capitalization
/// of the same name across observations.
pub type ParticipantId = String;

/// A participant observed in the meeting UI/SDK.
///
/// `element` is platform-opaque: for DOM-driven platforms it is a
/// CDP backend-node reference; for Zoom it is unused (`None`), since the
/// SDK exposes participants by ID only.
#[derive(Clone, Debug)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub element: Option<PlatformHandle>,
}

/// Opaque per-platform handle to a participant's DOM/SDK representation.
#[derive(Clone, Debug)]
pub enum PlatformHandle {
    /// Chrome DevTools Protocol backend node id, for Meet/Teams.
    CdpNode(i64),
}

/// Live roster plus the persistent name map that survives departures.
///
/// `active` reflects the current roster (created when first observed,
/// destroyed when the participant leaves); `names` is never cleared, so a
/// name can still be resolved for a participant who has since left (e.g.
/// when answering a "who spoke during [t0,t1]" query after they departed).
#[derive(Clone, Debug, Default)]
pub struct Roster {
    active: HashMap<ParticipantId, Participant>,
    names: HashMap<ParticipantId, String>,
    /// True once the roster has ever held more than one participant
    /// (i.e. someone other than the bot has joined at least once).
    speakers_identified: bool,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or updates) a participant as currently present.
    pub fn upsert(&mut self, p: Participant) {
        self.names.insert(p.id.clone(), p.display_name.clone());
        self.active.insert(p.id.clone(), p);
        if self.active.len() > 1 {
            self.speakers_identified = true;
        }
    }

    /// Removes a participant from the active roster. The name mapping is
    /// retained in `names`.
    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.active.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.active.get(id)
    }

    #[must_use]
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    #[must_use]
    pub fn active_ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.active.keys()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn speakers_identified(&self) -> bool {
        self.speakers_identified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_survives_departure() {
        let mut r = Roster::new();
        r.upsert(Participant {
            id: "p1".into(),
            display_name: "Ada".into(),
            element: None,
        });
        r.remove("p1");
        assert_eq!(r.name_of("p1"), Some("Ada"));
        assert_eq!(r.active_count(), 0);
    }

    #[test]
    fn speakers_identified_sticks() {
        let mut r = Roster::new();
        r.upsert(Participant {
            id: "bot".into(),
            display_name: "Bot".into(),
            element: None,
        });
        assert!(!r.speakers_identified());
        r.upsert(Participant {
            id: "p1".into(),
            display_name: "Ada".into(),
            element: None,
        });
        assert!(r.speakers_identified());
        r.remove("p1");
        assert!(r.speakers_identified());
    }
}
