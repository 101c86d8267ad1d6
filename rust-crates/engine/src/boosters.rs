use crate::model::{
    BoosterKind,
    UserId,
    UserInventory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub applied_delta: i64,
    pub consumed: bool,
}

/// Decides how far a booster command moves the score.
///
/// The caller must hold both the event lock and the user's lock. A held
/// booster is consumed and yields the full `nominal` delta; otherwise the
/// command degrades to one unit in the same direction.
pub fn resolve(
    inventory: &mut UserInventory,
    user: UserId,
    kind: BoosterKind,
    nominal: i64,
) -> Resolution {
    if inventory.consume(user, kind) {
        Resolution {
            applied_delta: nominal,
            consumed: true,
        }
    } else {
        Resolution {
            applied_delta: nominal.signum(),
            consumed: false,
        }
    }
}
