//! Personalities and the registry of those compiled into this build.
//!
//! A personality is one of the mutually exclusive functions the device can
//! perform.  The host picks which is active via the USB configuration number,
//! and each personality number maps 1:1 to a [`PersonalityId`].
//!
//! The [`Registry`] is filled once at start of day, from whichever
//! personality features are enabled, and is never added to after that.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt;
use heapless::Vec;

use crate::constants::{DEFAULT_PRECEDENCE, MAX_PERSONALITIES};
use crate::error::Error;

/// Identifies a personality.  The discriminant is the USB configuration
/// number the host uses to select it.  Configuration number 0 is reserved
/// by USB and has no personality.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersonalityId {
    /// Passive capture of the card/phone exchange.
    Sniffer = 1,

    /// Smart card reader (CCID) emulation.
    ReaderEmulation = 2,

    /// Virtual smart card, presented to a phone.
    CardEmulation = 3,

    /// Man-in-the-middle relay between a card and a phone.
    Relay = 4,
}

impl PersonalityId {
    /// Every personality, in ascending configuration number order.
    pub const ALL: [PersonalityId; 4] = [
        PersonalityId::Sniffer,
        PersonalityId::ReaderEmulation,
        PersonalityId::CardEmulation,
        PersonalityId::Relay,
    ];

    /// The USB configuration number for this personality.
    pub const fn config_number(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            PersonalityId::Sniffer => "Sniffer",
            PersonalityId::ReaderEmulation => "ReaderEmulation",
            PersonalityId::CardEmulation => "CardEmulation",
            PersonalityId::Relay => "Relay",
        }
    }
}

// Implements try_from to turn a USB configuration number into a
// PersonalityId.
impl TryFrom<u8> for PersonalityId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Sniffer),
            2 => Ok(Self::ReaderEmulation),
            3 => Ok(Self::CardEmulation),
            4 => Ok(Self::Relay),
            _ => Err(Error::UnknownConfig(value)),
        }
    }
}

impl fmt::Display for PersonalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.config_number())
    }
}

/// The lifecycle every personality implements.
///
/// None of these hooks can fail.  A personality which hits a fault must deal
/// with it internally.  All of them must return promptly, as they are called
/// from the single dispatch loop, which also polls the USB link state.
pub trait Personality {
    /// Static setup.  Called once at bring-up for every compiled-in
    /// personality, whether or not it is ever activated, so it must not claim
    /// any hardware exclusively.  Must be idempotent.
    fn configure(&mut self);

    /// Called once when this personality becomes the active one.  May claim
    /// exclusive hardware.
    fn init(&mut self);

    /// Called once when this personality stops being active.  Must have
    /// released everything `init()` claimed by the time it returns.
    fn exit(&mut self);

    /// One bounded unit of steady state work.  Called repeatedly while this
    /// personality is active.
    fn run(&mut self);
}

// A registered personality.
struct Entry<'a> {
    id: PersonalityId,
    personality: &'a mut dyn Personality,
}

/// The compiled-in personalities, kept in ascending [`PersonalityId`] order.
pub struct Registry<'a> {
    entries: Vec<Entry<'a>, MAX_PERSONALITIES>,
}

impl<'a> Registry<'a> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a personality.  Entries may be registered in any order.
    pub fn register(
        &mut self,
        id: PersonalityId,
        personality: &'a mut dyn Personality,
    ) -> Result<(), Error> {
        if self.contains(id) {
            return Err(Error::DuplicatePersonality(id));
        }

        // Insert so the entries stay sorted.
        let pos = self
            .entries
            .iter()
            .position(|e| e.id > id)
            .unwrap_or(self.entries.len());
        self.entries
            .insert(pos, Entry { id, personality })
            .map_err(|_| Error::RegistryFull)
    }

    pub fn contains(&self, id: PersonalityId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registered ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = PersonalityId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    /// Finds the personality for `id`.  Failure means the host has been
    /// offered a configuration this build doesn't contain.
    pub fn lookup(&mut self, id: PersonalityId) -> Result<&mut (dyn Personality + 'a), Error> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut *e.personality)
            .ok_or(Error::UnknownConfig(id.config_number()))
    }

    /// Resolves a raw USB configuration number to a registered personality
    /// id.
    pub fn resolve(&self, config: u8) -> Result<PersonalityId, Error> {
        let id = PersonalityId::try_from(config)?;
        if self.contains(id) {
            Ok(id)
        } else {
            Err(Error::UnknownConfig(config))
        }
    }

    /// Calls `f` on every personality in ascending id order.
    pub fn for_each(&mut self, mut f: impl FnMut(PersonalityId, &mut dyn Personality)) {
        for entry in self.entries.iter_mut() {
            f(entry.id, &mut *entry.personality);
        }
    }

    /// The personality to use if the host hasn't selected one by the time
    /// the link comes up.
    pub fn default_id(&self) -> Option<PersonalityId> {
        DEFAULT_PRECEDENCE
            .iter()
            .copied()
            .find(|id| self.contains(*id))
    }
}

impl Default for Registry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, CallLog, Recorder};

    #[test]
    fn config_numbers_round_trip_through_ids() {
        for id in PersonalityId::ALL {
            assert_eq!(PersonalityId::try_from(id.config_number()), Ok(id));
        }
        assert_eq!(PersonalityId::try_from(0), Err(Error::UnknownConfig(0)));
        assert_eq!(PersonalityId::try_from(5), Err(Error::UnknownConfig(5)));
    }

    #[test]
    fn entries_are_kept_in_ascending_order() {
        let log = CallLog::new();
        let mut relay = Recorder::new(PersonalityId::Relay, &log);
        let mut sniffer = Recorder::new(PersonalityId::Sniffer, &log);
        let mut cardem = Recorder::new(PersonalityId::CardEmulation, &log);

        let mut registry = Registry::new();
        registry.register(PersonalityId::Relay, &mut relay).unwrap();
        registry.register(PersonalityId::Sniffer, &mut sniffer).unwrap();
        registry.register(PersonalityId::CardEmulation, &mut cardem).unwrap();

        let ids: std::vec::Vec<_> = registry.ids().collect();
        assert_eq!(
            ids,
            [
                PersonalityId::Sniffer,
                PersonalityId::CardEmulation,
                PersonalityId::Relay
            ]
        );

        registry.for_each(|_, p| p.configure());
        assert_eq!(
            log.calls(),
            [
                Call::Configure(PersonalityId::Sniffer),
                Call::Configure(PersonalityId::CardEmulation),
                Call::Configure(PersonalityId::Relay),
            ]
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let log = CallLog::new();
        let mut first = Recorder::new(PersonalityId::Sniffer, &log);
        let mut second = Recorder::new(PersonalityId::Sniffer, &log);

        let mut registry = Registry::new();
        registry.register(PersonalityId::Sniffer, &mut first).unwrap();
        assert_eq!(
            registry.register(PersonalityId::Sniffer, &mut second),
            Err(Error::DuplicatePersonality(PersonalityId::Sniffer))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_of_missing_personality_fails() {
        let log = CallLog::new();
        let mut sniffer = Recorder::new(PersonalityId::Sniffer, &log);

        let mut registry = Registry::new();
        registry.register(PersonalityId::Sniffer, &mut sniffer).unwrap();

        assert!(registry.lookup(PersonalityId::Sniffer).is_ok());
        assert!(matches!(
            registry.lookup(PersonalityId::CardEmulation),
            Err(Error::UnknownConfig(3))
        ));
        assert_eq!(registry.resolve(1), Ok(PersonalityId::Sniffer));
        assert_eq!(registry.resolve(3), Err(Error::UnknownConfig(3)));
        assert_eq!(registry.resolve(9), Err(Error::UnknownConfig(9)));
    }

    #[test]
    fn default_follows_precedence() {
        let log = CallLog::new();
        let mut ccid = Recorder::new(PersonalityId::ReaderEmulation, &log);
        let mut cardem = Recorder::new(PersonalityId::CardEmulation, &log);

        let mut registry = Registry::new();
        assert_eq!(registry.default_id(), None);

        registry.register(PersonalityId::ReaderEmulation, &mut ccid).unwrap();
        assert_eq!(registry.default_id(), Some(PersonalityId::ReaderEmulation));

        registry.register(PersonalityId::CardEmulation, &mut cardem).unwrap();
        assert_eq!(registry.default_id(), Some(PersonalityId::CardEmulation));
    }
}
