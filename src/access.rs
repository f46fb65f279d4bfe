//! Actor identities, access levels and the registry that decides who may write.
//!
//! Authorization has two independent paths. The owner identity always resolves to
//! [`AccessLevel::Admin`], whatever its mapped entry says; everyone else resolves to
//! their granted level, or [`AccessLevel::None`] when nothing was granted. Owners can
//! therefore demote their own entry without ever locking themselves out.
use super::error::{LedgerError, Result};
use super::utils;
use bech32::Bech32m;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const ACTOR_HRP: &str = "actor";
const NULL_PAYLOAD: [u8; 16] = [0; 16];

/// Opaque caller identity, carried as a bech32 address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Actor(String);

impl Actor {
    /// Mint a fresh identity from a uuid7 payload.
    pub fn generate() -> Result<Self> {
        Ok(Self(utils::new_uuid_to_bech32(ACTOR_HRP)?))
    }

    pub fn parse(address: &str) -> Result<Self> {
        bech32::decode(address).map_err(|e| {
            LedgerError::InvalidArgument(format!("{address:?} is not a bech32 address: {e}"))
        })?;
        Ok(Self(address.to_lowercase()))
    }

    /// The zero identity. Never a valid owner.
    pub fn null() -> Self {
        let hrp = bech32::Hrp::parse_unchecked(ACTOR_HRP);
        let address = bech32::encode::<Bech32m>(hrp, &NULL_PAYLOAD)
            .expect("a fixed hrp and 16 bytes always fit in a bech32m string");
        Self(address)
    }

    pub fn is_null(&self) -> bool {
        match bech32::decode(&self.0) {
            Ok((_, payload)) => payload.iter().all(|b| *b == 0),
            Err(_) => true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Actor {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Actor::parse(s)
    }
}

/// Totally ordered permission tiers. The discriminants are the stored byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum AccessLevel {
    #[default]
    None = 0,
    Reader = 1,
    Recorder = 2,
    Admin = 3,
}

impl AccessLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AccessLevel::None),
            1 => Ok(AccessLevel::Reader),
            2 => Ok(AccessLevel::Recorder),
            3 => Ok(AccessLevel::Admin),
            other => Err(LedgerError::InvalidArgument(format!(
                "access level {other} is outside 0..=3"
            ))),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(AccessLevel::None),
            "READER" => Ok(AccessLevel::Reader),
            "RECORDER" => Ok(AccessLevel::Recorder),
            "ADMIN" => Ok(AccessLevel::Admin),
            _ => s
                .parse::<u8>()
                .map_err(|_| LedgerError::InvalidArgument(format!("unknown access level {s:?}")))
                .and_then(AccessLevel::try_from),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessLevel::None => "NONE",
            AccessLevel::Reader => "READER",
            AccessLevel::Recorder => "RECORDER",
            AccessLevel::Admin => "ADMIN",
        };
        f.write_str(name)
    }
}

/// Actor to level mapping plus the distinguished owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRegistry {
    owner: Actor,
    levels: HashMap<Actor, AccessLevel>,
}

impl AccessRegistry {
    /// The creator becomes owner and is granted `Admin`.
    pub fn initialize(creator: Actor) -> Result<Self> {
        if creator.is_null() {
            return Err(LedgerError::InvalidArgument(
                "the null identity cannot own a ledger".into(),
            ));
        }
        let mut levels = HashMap::new();
        levels.insert(creator.clone(), AccessLevel::Admin);

        Ok(Self {
            owner: creator,
            levels,
        })
    }

    /// Rebuild from persisted parts.
    pub(crate) fn restore(owner: Actor, levels: HashMap<Actor, AccessLevel>) -> Self {
        Self { owner, levels }
    }

    pub fn owner(&self) -> &Actor {
        &self.owner
    }

    /// Effective level: the owner override first, then the granted mapping.
    pub fn resolve(&self, actor: &Actor) -> AccessLevel {
        if *actor == self.owner {
            return AccessLevel::Admin;
        }
        self.granted(actor)
    }

    /// The mapped level alone, ignoring the owner override.
    pub fn granted(&self, actor: &Actor) -> AccessLevel {
        self.levels.get(actor).copied().unwrap_or_default()
    }

    pub fn authorize(&self, actor: &Actor, minimum: AccessLevel) -> bool {
        self.resolve(actor) >= minimum
    }

    /// Like [`AccessRegistry::authorize`], but a refusal becomes `Unauthorized`.
    pub fn require(&self, actor: &Actor, minimum: AccessLevel, action: &'static str) -> Result<()> {
        if self.authorize(actor, minimum) {
            return Ok(());
        }
        Err(LedgerError::Unauthorized {
            actor: actor.to_string(),
            action,
            required: minimum,
            actual: self.resolve(actor),
        })
    }

    /// Hands ownership to `new_owner` and returns the previous owner. The previous
    /// owner keeps whatever level it was explicitly granted.
    pub fn transfer_ownership(&mut self, caller: &Actor, new_owner: Actor) -> Result<Actor> {
        if *caller != self.owner {
            // owner only: a granted admin still resolves to Admin here
            return Err(LedgerError::Unauthorized {
                actor: caller.to_string(),
                action: "transfer ownership",
                required: AccessLevel::Admin,
                actual: self.resolve(caller),
            });
        }
        if new_owner.is_null() {
            return Err(LedgerError::InvalidArgument(
                "new owner is the null identity".into(),
            ));
        }

        self.levels.insert(new_owner.clone(), AccessLevel::Admin);
        Ok(std::mem::replace(&mut self.owner, new_owner))
    }

    /// Overwrites `target`'s granted level. Allowed for the owner and any `Admin`.
    pub fn set_access_level(
        &mut self,
        caller: &Actor,
        target: Actor,
        level: AccessLevel,
    ) -> Result<()> {
        self.require(caller, AccessLevel::Admin, "set access levels")?;
        self.levels.insert(target, level);
        Ok(())
    }

    /// Explicit grants sorted by actor.
    pub fn entries(&self) -> Vec<(Actor, AccessLevel)> {
        let mut entries: Vec<_> = self
            .levels
            .iter()
            .map(|(actor, level)| (actor.clone(), *level))
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Actor {
        Actor::generate().unwrap()
    }

    #[test]
    fn creator_is_owner_and_admin() {
        let owner = actor();
        let registry = AccessRegistry::initialize(owner.clone()).unwrap();

        assert_eq!(registry.owner(), &owner);
        assert_eq!(registry.resolve(&owner), AccessLevel::Admin);
        assert_eq!(registry.granted(&owner), AccessLevel::Admin);
    }

    #[test]
    fn null_creator_is_rejected() {
        assert!(AccessRegistry::initialize(Actor::null()).is_err());
    }

    #[test]
    fn unknown_actor_resolves_to_none() {
        let registry = AccessRegistry::initialize(actor()).unwrap();
        assert_eq!(registry.resolve(&actor()), AccessLevel::None);
        assert!(registry.authorize(&actor(), AccessLevel::None));
        assert!(!registry.authorize(&actor(), AccessLevel::Reader));
    }

    #[test]
    fn owner_override_survives_self_demotion() {
        let owner = actor();
        let mut registry = AccessRegistry::initialize(owner.clone()).unwrap();

        registry
            .set_access_level(&owner, owner.clone(), AccessLevel::None)
            .unwrap();

        assert_eq!(registry.granted(&owner), AccessLevel::None);
        assert_eq!(registry.resolve(&owner), AccessLevel::Admin);
        // still able to administer after the demotion
        registry
            .set_access_level(&owner, actor(), AccessLevel::Reader)
            .unwrap();
    }

    #[test]
    fn granted_admin_can_set_levels_but_not_transfer() {
        let owner = actor();
        let admin = actor();
        let mut registry = AccessRegistry::initialize(owner.clone()).unwrap();
        registry
            .set_access_level(&owner, admin.clone(), AccessLevel::Admin)
            .unwrap();

        let target = actor();
        registry
            .set_access_level(&admin, target.clone(), AccessLevel::Recorder)
            .unwrap();
        assert_eq!(registry.resolve(&target), AccessLevel::Recorder);

        let err = registry.transfer_ownership(&admin, actor()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Unauthorized {
                action: "transfer ownership",
                actual: AccessLevel::Admin,
                ..
            }
        ));
        assert_eq!(registry.owner(), &owner);
    }

    #[test]
    fn recorder_cannot_set_levels() {
        let owner = actor();
        let recorder = actor();
        let mut registry = AccessRegistry::initialize(owner.clone()).unwrap();
        registry
            .set_access_level(&owner, recorder.clone(), AccessLevel::Recorder)
            .unwrap();
        let before = registry.clone();

        let err = registry
            .set_access_level(&recorder, recorder.clone(), AccessLevel::Admin)
            .unwrap_err();
        match err {
            LedgerError::Unauthorized {
                actor,
                required,
                actual,
                ..
            } => {
                assert_eq!(actor, recorder.to_string());
                assert_eq!(required, AccessLevel::Admin);
                assert_eq!(actual, AccessLevel::Recorder);
            }
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        assert_eq!(registry, before);
    }

    #[test]
    fn transfer_keeps_previous_owner_grant() {
        let old = actor();
        let new = actor();
        let mut registry = AccessRegistry::initialize(old.clone()).unwrap();
        registry
            .set_access_level(&old, old.clone(), AccessLevel::Reader)
            .unwrap();

        let previous = registry.transfer_ownership(&old, new.clone()).unwrap();

        assert_eq!(previous, old);
        assert_eq!(registry.owner(), &new);
        assert_eq!(registry.resolve(&new), AccessLevel::Admin);
        assert_eq!(registry.resolve(&old), AccessLevel::Reader);
    }

    #[test]
    fn transfer_to_null_is_invalid() {
        let owner = actor();
        let mut registry = AccessRegistry::initialize(owner.clone()).unwrap();
        let err = registry
            .transfer_ownership(&owner, Actor::null())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert_eq!(registry.owner(), &owner);
    }

    #[test]
    fn level_byte_conversion() {
        for byte in 0..=3u8 {
            assert_eq!(AccessLevel::try_from(byte).unwrap().as_u8(), byte);
        }
        assert!(AccessLevel::try_from(4).is_err());
        assert_eq!("recorder".parse::<AccessLevel>().unwrap(), AccessLevel::Recorder);
        assert_eq!("3".parse::<AccessLevel>().unwrap(), AccessLevel::Admin);
        assert!(AccessLevel::None < AccessLevel::Reader);
        assert!(AccessLevel::Recorder < AccessLevel::Admin);
    }

    #[test]
    fn null_actor_is_a_valid_address() {
        let null = Actor::null();
        assert!(null.as_str().starts_with("actor1"));
        assert_eq!(Actor::parse(null.as_str()).unwrap(), null);
    }

    #[test]
    fn actor_parsing() {
        let a = actor();
        assert_eq!(Actor::parse(a.as_str()).unwrap(), a);
        assert!(Actor::parse("not an address").is_err());
        assert!(Actor::null().is_null());
        assert!(!a.is_null());
    }
}
