//! Row-level data contracts shared by capture, diffing and persistence.

use crate::error::{CoreError, CoreResult};
use crate::hash::{PayloadHash, decode_payload, encode_payload};
use crate::id::{PlayerKey, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema version written into every row
pub const ROW_FORMAT_VERSION: u32 = 1;

/// `row_type` of every baseline row written today
pub const COMPONENT_ROW_TYPE: &str = "component";

/// Identity and capture context carried by every row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowContext {
    /// Row schema version
    pub version: u32,
    /// Capture this row belongs to
    pub snapshot_id: SnapshotId,
    /// Canonical player key
    pub player_key: PlayerKey,
    /// Character display name at capture time
    pub character_name: String,
    /// Platform account id
    pub platform_id: u64,
    /// Sandbox zone the capture was taken for
    pub zone_id: String,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl Default for RowContext {
    fn default() -> Self {
        Self {
            version: ROW_FORMAT_VERSION,
            snapshot_id: SnapshotId::from_raw(""),
            player_key: PlayerKey::from_raw(""),
            character_name: String::new(),
            platform_id: 0,
            zone_id: String::new(),
            captured_at: DateTime::<Utc>::default(),
        }
    }
}

/// Spatial context kept for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
    /// Z coordinate
    pub z: f32,
}

impl Position {
    /// Create a new position
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Identity of one live simulation object at capture time
///
/// `(entity_index, entity_version)` is unique within one capture. Indices are
/// recycled across captures; the prefab id tells occupants apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Slot index of the entity
    pub entity_index: u32,
    /// Generation of the slot
    pub entity_version: u32,
    /// Prefab the entity was spawned from
    pub prefab_id: i64,
    /// Prefab display name
    pub prefab_name: String,
    /// World position, when captured
    pub position: Option<Position>,
}

impl EntityEntry {
    /// Create an entry without position
    #[must_use]
    pub fn new(entity_index: u32, entity_version: u32, prefab_id: i64, prefab_name: impl Into<String>) -> Self {
        Self {
            entity_index,
            entity_version,
            prefab_id,
            prefab_name: prefab_name.into(),
            position: None,
        }
    }

    /// With position
    #[must_use]
    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// Raw state of one component as read by a capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentState {
    /// Fully disambiguated type identity
    pub qualified_type: String,
    /// Whether the component was present on the character
    pub existed: bool,
    /// Serialized component state
    pub payload: Vec<u8>,
}

impl ComponentState {
    /// A present component
    #[must_use]
    pub fn present(qualified_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            qualified_type: qualified_type.into(),
            existed: true,
            payload: payload.into(),
        }
    }

    /// An absent component
    #[must_use]
    pub fn absent(qualified_type: impl Into<String>) -> Self {
        Self {
            qualified_type: qualified_type.into(),
            existed: false,
            payload: Vec::new(),
        }
    }
}

/// Short logical name of a qualified type
///
/// `"Game.Research.TechState, Game.Core"` becomes `"TechState"`.
#[must_use]
pub fn short_type_name(qualified_type: &str) -> &str {
    let type_part = qualified_type.split(',').next().unwrap_or_default().trim();
    match type_part.rfind('.') {
        Some(dot) if dot + 1 < type_part.len() => &type_part[dot + 1..],
        _ => type_part,
    }
}

/// One captured component fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRow {
    /// Identity and capture context
    pub context: RowContext,
    /// Row kind; always [`COMPONENT_ROW_TYPE`] for now
    pub row_type: String,
    /// Short logical name
    pub component_type: String,
    /// Fully disambiguated type identity
    pub qualified_type: String,
    /// Whether the component was present at capture time
    pub existed: bool,
    /// Base64 payload, empty when the component was absent
    pub payload_base64: String,
    /// Upper-case SHA-256 of the decoded payload, empty when absent
    pub payload_hash: String,
}

impl BaselineRow {
    /// Build a component row, encoding and hashing the payload
    #[must_use]
    pub fn component(context: RowContext, qualified_type: &str, existed: bool, payload: &[u8]) -> Self {
        let (payload_base64, payload_hash) = if existed {
            (encode_payload(payload), PayloadHash::compute(payload).to_hex())
        } else {
            (String::new(), String::new())
        };

        Self {
            context,
            row_type: COMPONENT_ROW_TYPE.to_string(),
            component_type: short_type_name(qualified_type).to_string(),
            qualified_type: qualified_type.to_string(),
            existed,
            payload_base64,
            payload_hash,
        }
    }

    /// Build from a captured component state
    #[must_use]
    pub fn from_state(context: RowContext, state: &ComponentState) -> Self {
        Self::component(context, &state.qualified_type, state.existed, &state.payload)
    }

    /// Whether the component existed at capture time
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.existed
    }

    /// Decode the payload column
    ///
    /// # Errors
    ///
    /// Returns error if the column is not valid base64
    pub fn decode_payload(&self) -> CoreResult<Vec<u8>> {
        decode_payload(&self.payload_base64)
    }

    /// Check the stored hash against the decoded payload
    ///
    /// Rows without a hash are accepted.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        if self.payload_hash.is_empty() {
            return true;
        }
        match (self.decode_payload(), PayloadHash::from_hex(&self.payload_hash)) {
            (Ok(payload), Ok(hash)) => hash.verify(&payload),
            _ => false,
        }
    }

    /// Restorable state of this row
    ///
    /// # Errors
    ///
    /// Returns error if the payload column is not valid base64
    pub fn to_state(&self) -> CoreResult<ComponentState> {
        Ok(ComponentState {
            qualified_type: self.qualified_type.clone(),
            existed: self.existed,
            payload: self.decode_payload()?,
        })
    }
}

/// Payload shape a delta row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaShape {
    /// Component type with before and after payloads
    Component,
    /// Entity identity and prefab
    Entity,
    /// Tech id and name
    Tech,
}

impl DeltaShape {
    /// Get as str
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Entity => "entity",
            Self::Tech => "tech",
        }
    }
}

/// Kind of a delta row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeltaKind {
    /// Component present in both captures with different payloads
    ComponentChanged,
    /// Component present only after
    ComponentAdded,
    /// Component present only before
    ComponentRemoved,
    /// Entity present only after
    EntityCreated,
    /// Entity present only before
    EntityRemoved,
    /// Same entity index, different prefab
    EntityPrefabChanged,
    /// Unlock id that appeared during the session
    TechOpened,
    /// Kind registered by a derived detector
    Other(String),
}

impl DeltaKind {
    /// Wire name stored in the `row_type` column
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ComponentChanged => "component_changed",
            Self::ComponentAdded => "component_added",
            Self::ComponentRemoved => "component_removed",
            Self::EntityCreated => "entity_created",
            Self::EntityRemoved => "entity_removed",
            Self::EntityPrefabChanged => "entity_prefab_changed",
            Self::TechOpened => "tech_opened",
            Self::Other(name) => name.as_str(),
        }
    }

    /// Parse a wire name; unknown names become [`DeltaKind::Other`]
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "component_changed" => Self::ComponentChanged,
            "component_added" => Self::ComponentAdded,
            "component_removed" => Self::ComponentRemoved,
            "entity_created" => Self::EntityCreated,
            "entity_removed" => Self::EntityRemoved,
            "entity_prefab_changed" => Self::EntityPrefabChanged,
            "tech_opened" => Self::TechOpened,
            other => Self::Other(other.to_string()),
        }
    }

    /// Audit verb paired with the kind
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::ComponentChanged => "changed",
            Self::ComponentAdded => "added",
            Self::ComponentRemoved | Self::EntityRemoved => "removed",
            Self::EntityCreated => "created",
            Self::EntityPrefabChanged => "prefab_changed",
            Self::TechOpened => "opened",
            Self::Other(name) => name.as_str(),
        }
    }

    /// Shape required by built-in kinds; `None` for detector kinds
    #[must_use]
    pub fn shape(&self) -> Option<DeltaShape> {
        match self {
            Self::ComponentChanged | Self::ComponentAdded | Self::ComponentRemoved => {
                Some(DeltaShape::Component)
            }
            Self::EntityCreated | Self::EntityRemoved | Self::EntityPrefabChanged => {
                Some(DeltaShape::Entity)
            }
            Self::TechOpened => Some(DeltaShape::Tech),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single payload shape of a delta row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaPayload {
    /// Component change
    Component {
        /// Short component name
        component_type: String,
        /// Base64 payload before, empty if absent
        before_payload_base64: String,
        /// Base64 payload after, empty if absent
        after_payload_base64: String,
    },
    /// Entity change
    Entity {
        /// Slot index
        entity_index: u32,
        /// Slot generation
        entity_version: u32,
        /// Prefab id
        prefab_id: i64,
        /// Prefab display name
        prefab_name: String,
    },
    /// Opened tech
    Tech {
        /// Unlock id
        tech_id: i64,
        /// Display name
        tech_name: String,
    },
}

impl DeltaPayload {
    /// Shape of this payload
    #[must_use]
    pub const fn shape(&self) -> DeltaShape {
        match self {
            Self::Component { .. } => DeltaShape::Component,
            Self::Entity { .. } => DeltaShape::Entity,
            Self::Tech { .. } => DeltaShape::Tech,
        }
    }
}

/// One detected change or derived event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRow {
    /// Identity and capture context
    pub context: RowContext,
    /// Row kind
    pub kind: DeltaKind,
    /// Human-auditable verb; not authoritative
    pub operation: String,
    /// Kind-specific columns
    pub payload: DeltaPayload,
    /// Entity position, when captured
    pub position: Option<Position>,
}

impl DeltaRow {
    /// Build a row with the kind's default operation and an empty context
    #[must_use]
    pub fn new(kind: DeltaKind, payload: DeltaPayload) -> Self {
        Self {
            context: RowContext::default(),
            operation: kind.operation().to_string(),
            kind,
            payload,
            position: None,
        }
    }

    /// Component-shaped row
    #[must_use]
    pub fn component(kind: DeltaKind, component_type: &str, before: &str, after: &str) -> Self {
        Self::new(
            kind,
            DeltaPayload::Component {
                component_type: component_type.to_string(),
                before_payload_base64: before.to_string(),
                after_payload_base64: after.to_string(),
            },
        )
    }

    /// Entity-shaped row describing `entry`
    #[must_use]
    pub fn entity(kind: DeltaKind, entry: &EntityEntry) -> Self {
        let mut row = Self::new(
            kind,
            DeltaPayload::Entity {
                entity_index: entry.entity_index,
                entity_version: entry.entity_version,
                prefab_id: entry.prefab_id,
                prefab_name: entry.prefab_name.clone(),
            },
        );
        row.position = entry.position;
        row
    }

    /// `tech_opened` row
    #[must_use]
    pub fn tech_opened(tech_id: i64, tech_name: impl Into<String>) -> Self {
        Self::new(
            DeltaKind::TechOpened,
            DeltaPayload::Tech {
                tech_id,
                tech_name: tech_name.into(),
            },
        )
    }

    /// With explicit operation verb
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// With context stamped in
    #[must_use]
    pub fn with_context(mut self, context: RowContext) -> Self {
        self.context = context;
        self
    }

    /// Check that a built-in kind carries its own shape
    ///
    /// # Errors
    ///
    /// Returns error if kind and payload shape disagree
    pub fn validate(&self) -> CoreResult<()> {
        match self.kind.shape() {
            Some(expected) if expected != self.payload.shape() => Err(CoreError::InvalidShape {
                kind: self.kind.as_str().to_string(),
                shape: self.payload.shape().as_str(),
            }),
            _ => Ok(()),
        }
    }

    /// Component name of a component row
    #[must_use]
    pub fn component_type(&self) -> Option<&str> {
        match &self.payload {
            DeltaPayload::Component { component_type, .. } => Some(component_type),
            _ => None,
        }
    }

    /// Before payload of a component row
    #[must_use]
    pub fn before_payload(&self) -> Option<&str> {
        match &self.payload {
            DeltaPayload::Component { before_payload_base64, .. } => Some(before_payload_base64),
            _ => None,
        }
    }

    /// After payload of a component row
    #[must_use]
    pub fn after_payload(&self) -> Option<&str> {
        match &self.payload {
            DeltaPayload::Component { after_payload_base64, .. } => Some(after_payload_base64),
            _ => None,
        }
    }

    /// Entity index of an entity row
    #[must_use]
    pub fn entity_index(&self) -> Option<u32> {
        match &self.payload {
            DeltaPayload::Entity { entity_index, .. } => Some(*entity_index),
            _ => None,
        }
    }

    /// Entity version of an entity row
    #[must_use]
    pub fn entity_version(&self) -> Option<u32> {
        match &self.payload {
            DeltaPayload::Entity { entity_version, .. } => Some(*entity_version),
            _ => None,
        }
    }

    /// Prefab id of an entity row
    #[must_use]
    pub fn prefab_id(&self) -> Option<i64> {
        match &self.payload {
            DeltaPayload::Entity { prefab_id, .. } => Some(*prefab_id),
            _ => None,
        }
    }

    /// Tech id of a tech row
    #[must_use]
    pub fn tech_id(&self) -> Option<i64> {
        match &self.payload {
            DeltaPayload::Tech { tech_id, .. } => Some(*tech_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("Game.Research.TechState, Game.Core"), "TechState");
        assert_eq!(short_type_name("TechState"), "TechState");
        assert_eq!(short_type_name("Trailing."), "Trailing.");
        assert_eq!(short_type_name(""), "");
    }

    #[test]
    fn test_component_row_encodes_and_hashes() {
        let row = BaselineRow::component(
            RowContext::default(),
            "Game.Research.TechState, Game.Core",
            true,
            b"{\"guid\":123}",
        );
        assert_eq!(row.row_type, COMPONENT_ROW_TYPE);
        assert_eq!(row.component_type, "TechState");
        assert_eq!(row.payload_base64, "eyJndWlkIjoxMjN9");
        assert_eq!(row.payload_hash, PayloadHash::compute(b"{\"guid\":123}").to_hex());
        assert!(row.hash_matches());
    }

    #[test]
    fn test_absent_row_has_empty_payload() {
        let state = ComponentState::absent("Game.Buffs.Shield");
        let row = BaselineRow::from_state(RowContext::default(), &state);
        assert!(!row.is_present());
        assert!(row.payload_base64.is_empty());
        assert!(row.payload_hash.is_empty());
        assert!(row.hash_matches());
    }

    #[test]
    fn test_tampered_row_fails_hash() {
        let mut row = BaselineRow::component(RowContext::default(), "A", true, b"one");
        row.payload_base64 = encode_payload(b"two");
        assert!(!row.hash_matches());
    }

    #[test]
    fn test_to_state_round_trip() {
        let state = ComponentState::present("Game.Progress", b"{\"level\":3}".to_vec());
        let row = BaselineRow::from_state(RowContext::default(), &state);
        assert_eq!(row.to_state().unwrap(), state);
    }

    #[test]
    fn test_delta_kind_wire_names() {
        for kind in [
            DeltaKind::ComponentChanged,
            DeltaKind::ComponentAdded,
            DeltaKind::ComponentRemoved,
            DeltaKind::EntityCreated,
            DeltaKind::EntityRemoved,
            DeltaKind::EntityPrefabChanged,
            DeltaKind::TechOpened,
        ] {
            assert_eq!(DeltaKind::parse(kind.as_str()), kind);
        }
        assert_eq!(
            DeltaKind::parse("recipe_learned"),
            DeltaKind::Other("recipe_learned".to_string())
        );
    }

    #[test]
    fn test_delta_kind_operations() {
        assert_eq!(DeltaKind::ComponentChanged.operation(), "changed");
        assert_eq!(DeltaKind::ComponentAdded.operation(), "added");
        assert_eq!(DeltaKind::ComponentRemoved.operation(), "removed");
        assert_eq!(DeltaKind::TechOpened.operation(), "opened");
    }

    #[test]
    fn test_entity_row_carries_position() {
        let entry = EntityEntry::new(4, 1, 10, "Chest").at(Position::new(1.0, 2.0, 3.0));
        let row = DeltaRow::entity(DeltaKind::EntityCreated, &entry);
        assert_eq!(row.entity_index(), Some(4));
        assert_eq!(row.prefab_id(), Some(10));
        assert_eq!(row.position, Some(Position::new(1.0, 2.0, 3.0)));
        assert_eq!(row.operation, "created");
        assert!(row.tech_id().is_none());
    }

    #[test]
    fn test_validate_rejects_mixed_shape() {
        let row = DeltaRow::new(
            DeltaKind::TechOpened,
            DeltaPayload::Entity {
                entity_index: 1,
                entity_version: 1,
                prefab_id: 1,
                prefab_name: String::new(),
            },
        );
        assert!(matches!(row.validate(), Err(CoreError::InvalidShape { .. })));
        assert!(DeltaRow::tech_opened(5, "GUID:5").validate().is_ok());
    }

    #[test]
    fn test_detector_kind_accepts_any_shape() {
        let row = DeltaRow::component(DeltaKind::Other("recipe_learned".into()), "Recipes", "", "");
        assert!(row.validate().is_ok());
        assert_eq!(row.operation, "recipe_learned");
    }

    #[test]
    fn test_entity_accessors() {
        let row = DeltaRow::entity(DeltaKind::EntityCreated, &EntityEntry::new(9, 4, 90, "Forge"));
        assert_eq!(row.entity_index(), Some(9));
        assert_eq!(row.entity_version(), Some(4));
        assert_eq!(row.prefab_id(), Some(90));
        assert_eq!(DeltaRow::tech_opened(1, "t").entity_version(), None);
    }

    fn arb_kind() -> impl Strategy<Value = DeltaKind> {
        prop_oneof![
            Just(DeltaKind::ComponentChanged),
            Just(DeltaKind::ComponentAdded),
            Just(DeltaKind::ComponentRemoved),
            Just(DeltaKind::EntityCreated),
            Just(DeltaKind::EntityRemoved),
            Just(DeltaKind::EntityPrefabChanged),
            Just(DeltaKind::TechOpened),
            "x_[a-z_]{0,12}".prop_map(DeltaKind::Other),
        ]
    }

    proptest! {
        #[test]
        fn prop_kind_wire_name_round_trip(kind in arb_kind()) {
            prop_assert_eq!(DeltaKind::parse(kind.as_str()), kind);
        }

        #[test]
        fn prop_component_row_hash_matches_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..128),
            existed in any::<bool>(),
        ) {
            let row = BaselineRow::component(RowContext::default(), "Game.Progress", existed, &payload);
            prop_assert!(row.hash_matches());
            let expected = if existed { payload } else { Vec::new() };
            prop_assert_eq!(row.to_state().unwrap().payload, expected);
        }
    }
}
