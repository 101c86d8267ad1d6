use crate::{
    error::ValidationError,
    thresholds::Thresholds,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    fmt,
    str::FromStr,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl ChatId {
    /// Private chats carry positive ids, groups and channels negative ones.
    pub fn is_private(self) -> bool {
        self.0 > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Pump,
    Dump,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Pump => 1,
            Direction::Dump => -1,
        }
    }
}

/// Which threshold closed the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Pump,
    Dump,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pump => write!(f, "PUMP"),
            Outcome::Dump => write!(f, "DUMP"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BoosterKind {
    Pump10,
    Pump25,
    Pump50,
}

impl BoosterKind {
    pub const ALL: [BoosterKind; 3] =
        [BoosterKind::Pump10, BoosterKind::Pump25, BoosterKind::Pump50];

    pub fn magnitude(self) -> i64 {
        match self {
            BoosterKind::Pump10 => 10,
            BoosterKind::Pump25 => 25,
            BoosterKind::Pump50 => 50,
        }
    }

    pub fn price_stars(self) -> u32 {
        match self {
            BoosterKind::Pump10 => 12,
            BoosterKind::Pump25 => 30,
            BoosterKind::Pump50 => 60,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            BoosterKind::Pump10 => "pump10",
            BoosterKind::Pump25 => "pump25",
            BoosterKind::Pump50 => "pump50",
        }
    }

    pub fn dump_command(self) -> &'static str {
        match self {
            BoosterKind::Pump10 => "dump10",
            BoosterKind::Pump25 => "dump25",
            BoosterKind::Pump50 => "dump50",
        }
    }

    pub fn title(self) -> String {
        format!("PUMP/DUMP +{}", self.magnitude())
    }

    pub fn from_magnitude(magnitude: u64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.magnitude() as u64 == magnitude)
    }
}

impl fmt::Display for BoosterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for BoosterKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == lowered)
            .ok_or_else(|| ValidationError::UnknownBooster(s.trim().to_string()))
    }
}

/// The single shared round. Only reachable through the event lock, so every
/// `&mut EventState` is proof the caller holds it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventState {
    pub is_active: bool,
    pub finish_result: i64,
    pub pump_threshold: Option<i64>,
    pub dump_threshold: Option<i64>,
    pub pinned_message_id: Option<MessageRef>,
    pub event_chat_id: Option<ChatId>,
}

impl EventState {
    pub fn thresholds(&self) -> Option<Thresholds> {
        match (self.pump_threshold, self.dump_threshold) {
            (Some(pump), Some(dump)) => Some(Thresholds { pump, dump }),
            _ => None,
        }
    }

    pub fn activate(&mut self, chat: ChatId, initial: i64, thresholds: Thresholds) {
        self.is_active = true;
        self.finish_result = initial;
        self.pump_threshold = Some(thresholds.pump);
        self.dump_threshold = Some(thresholds.dump);
        self.pinned_message_id = None;
        self.event_chat_id = Some(chat);
    }

    pub fn modify(&mut self, delta: i64) -> Result<i64, ValidationError> {
        if !self.is_active {
            return Err(ValidationError::NotActive);
        }
        self.finish_result = self.finish_result.saturating_add(delta);
        Ok(self.finish_result)
    }

    /// First match wins: pump is evaluated before dump.
    pub fn outcome(&self) -> Option<Outcome> {
        let thresholds = self.thresholds()?;
        if self.finish_result >= thresholds.pump {
            Some(Outcome::Pump)
        } else if self.finish_result <= -thresholds.dump {
            Some(Outcome::Dump)
        } else {
            None
        }
    }

    /// Returns to the Idle shape and hands back the score it held.
    pub fn reset(&mut self) -> i64 {
        let final_score = self.finish_result;
        *self = EventState::default();
        final_score
    }
}

/// Booster counts per user. Zero counts are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserInventory {
    users: HashMap<UserId, BTreeMap<BoosterKind, u32>>,
}

impl UserInventory {
    pub fn count(&self, user: UserId, kind: BoosterKind) -> u32 {
        self.users
            .get(&user)
            .and_then(|items| items.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn grant(&mut self, user: UserId, kind: BoosterKind, amount: u32) -> u32 {
        let items = self.users.entry(user).or_default();
        if amount == 0 {
            return items.get(&kind).copied().unwrap_or(0);
        }
        let count = items.entry(kind).or_insert(0);
        *count = count.saturating_add(amount);
        *count
    }

    /// Takes one unit, removing the entry when it reaches zero.
    pub fn consume(&mut self, user: UserId, kind: BoosterKind) -> bool {
        let Some(items) = self.users.get_mut(&user) else {
            return false;
        };
        match items.get_mut(&kind) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                items.remove(&kind);
                true
            }
            None => false,
        }
    }

    pub fn boosters(&self, user: UserId) -> Vec<(BoosterKind, u32)> {
        self.users
            .get(&user)
            .map(|items| items.iter().map(|(kind, count)| (*kind, *count)).collect())
            .unwrap_or_default()
    }

    pub fn users_with_boosters(&self) -> usize {
        self.users.values().filter(|items| !items.is_empty()).count()
    }

    pub fn normalized(&self) -> Self {
        let users = self
            .users
            .iter()
            .filter_map(|(user, items)| {
                let items: BTreeMap<_, _> = items
                    .iter()
                    .filter(|(_, count)| **count > 0)
                    .map(|(kind, count)| (*kind, *count))
                    .collect();
                (!items.is_empty()).then_some((*user, items))
            })
            .collect();
        Self { users }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub event: EventState,
    pub inventory: UserInventory,
    pub saved_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(event: EventState, inventory: &UserInventory) -> Self {
        Self {
            event,
            inventory: inventory.normalized(),
            saved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn active_state(score: i64, pump: i64, dump: i64) -> EventState {
        let mut state = EventState::default();
        state.activate(ChatId(-100), score, Thresholds { pump, dump });
        state
    }

    #[test]
    fn outcome__score_equal_to_pump_threshold__completes_with_pump() {
        // given
        let state = active_state(100, 100, 80);

        // when
        let outcome = state.outcome();

        // then
        assert_eq!(outcome, Some(Outcome::Pump));
    }

    #[test]
    fn outcome__score_equal_to_negative_dump_threshold__completes_with_dump() {
        // given
        let state = active_state(-80, 100, 80);

        // when
        let outcome = state.outcome();

        // then
        assert_eq!(outcome, Some(Outcome::Dump));
    }

    #[test]
    fn outcome__both_bounds_satisfied__pump_wins() {
        // given
        let mut state = active_state(0, 100, 80);
        state.pump_threshold = Some(-5);
        state.dump_threshold = Some(-5);

        // when
        let outcome = state.outcome();

        // then
        assert_eq!(outcome, Some(Outcome::Pump));
    }

    #[test]
    fn modify__idle_state__is_rejected_without_change() {
        // given
        let mut state = EventState::default();

        // when
        let result = state.modify(1);

        // then
        assert_eq!(result, Err(ValidationError::NotActive));
        assert_eq!(state, EventState::default());
    }

    #[test]
    fn reset__active_state__returns_score_and_restores_idle_shape() {
        // given
        let mut state = active_state(42, 100, 80);
        state.pinned_message_id = Some(MessageRef(7));

        // when
        let final_score = state.reset();

        // then
        assert_eq!(final_score, 42);
        assert_eq!(state, EventState::default());
        assert!(state.thresholds().is_none());
    }

    #[test]
    fn consume__last_unit__removes_entry() {
        // given
        let mut inventory = UserInventory::default();
        let user = UserId(1);
        inventory.grant(user, BoosterKind::Pump25, 1);

        // when
        let consumed = inventory.consume(user, BoosterKind::Pump25);

        // then
        assert!(consumed);
        assert_eq!(inventory.count(user, BoosterKind::Pump25), 0);
        assert!(inventory.boosters(user).is_empty());
    }

    #[test]
    fn consume__empty_inventory__returns_false() {
        // given
        let mut inventory = UserInventory::default();

        // when
        let consumed = inventory.consume(UserId(1), BoosterKind::Pump10);

        // then
        assert!(!consumed);
    }

    #[test]
    fn normalized__drops_users_without_boosters() {
        // given
        let mut inventory = UserInventory::default();
        inventory.grant(UserId(1), BoosterKind::Pump10, 1);
        inventory.consume(UserId(1), BoosterKind::Pump10);
        inventory.grant(UserId(2), BoosterKind::Pump50, 2);

        // when
        let normalized = inventory.normalized();

        // then
        assert_eq!(normalized.users_with_boosters(), 1);
        assert_eq!(normalized.count(UserId(2), BoosterKind::Pump50), 2);
    }

    #[test]
    fn state_snapshot__json_round_trip__keeps_numeric_user_keys() {
        // given
        let mut inventory = UserInventory::default();
        inventory.grant(UserId(367), BoosterKind::Pump25, 3);
        let snapshot = StateSnapshot::new(active_state(5, 120, 90), &inventory);

        // when
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: StateSnapshot = serde_json::from_str(&json).unwrap();

        // then
        assert!(json.contains("\"367\""));
        assert!(json.contains("pump25"));
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn booster_kind__parses_case_insensitively() {
        assert_eq!("PUMP50".parse::<BoosterKind>(), Ok(BoosterKind::Pump50));
        assert_eq!(
            "pump15".parse::<BoosterKind>(),
            Err(ValidationError::UnknownBooster("pump15".to_string()))
        );
    }
}
