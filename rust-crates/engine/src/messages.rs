//! User-facing text. Nothing here ever includes raw error detail.

use crate::{
    collaborators::TradeReceipt,
    config::EngineConfig,
    error::{
        EngineError,
        ValidationError,
    },
    model::{
        BoosterKind,
        Direction,
        Outcome,
    },
    thresholds::{
        Balances,
        Thresholds,
    },
};
use std::fmt::Write;

pub fn signed(score: i64) -> String {
    if score > 0 {
        format!("+{score}")
    } else {
        score.to_string()
    }
}

pub fn status(
    config: &EngineConfig,
    score: i64,
    thresholds: Thresholds,
    balances: Balances,
) -> String {
    format!(
        "🎯 Event is live! Current result: {score}\n\n\
         Use /pump (+1) or /dump (-1) to move the result.\n\
         🛒 /shop has boosters that move it further.\n\n\
         💰 Wallet balance:\n\
         • {reserve_symbol}: {reserve:.4}\n\
         • {demand_symbol}: {demand:.4}\n\n\
         📊 Thresholds (fixed at start):\n\
         • Pump: +{pump} (buy)\n\
         • Dump: -{dump} (sell)",
        score = signed(score),
        reserve_symbol = config.reserve_symbol,
        reserve = balances.reserve_units(),
        demand_symbol = config.demand_symbol,
        demand = balances.demand_units(),
        pump = thresholds.pump,
        dump = thresholds.dump,
    )
}

pub fn round_started(initial: i64, thresholds: Thresholds) -> String {
    format!(
        "🚀 Event started at {}. Pump at +{}, dump at -{}.",
        signed(initial),
        thresholds.pump,
        thresholds.dump
    )
}

pub fn round_stopped(final_score: i64) -> String {
    format!(
        "🛑 Event stopped by an admin.\n\nFinal result: {}",
        signed(final_score)
    )
}

pub fn round_completed(config: &EngineConfig, outcome: Outcome) -> String {
    let line = format!("❗️LEEEET'S {outcome} {}❗️", config.demand_symbol);
    vec![line; 10].join("\n")
}

pub fn trade_executed(receipt: &TradeReceipt) -> String {
    format!("✅ {} ({})", receipt.summary, receipt.reference)
}

pub fn trades_disabled(config: &EngineConfig, outcome: Outcome) -> String {
    let action = match outcome {
        Outcome::Pump => "Purchase",
        Outcome::Dump => "Sale",
    };
    format!(
        "⚠️ Transactions are disabled (test mode). {action} of {} was not executed.",
        config.demand_symbol
    )
}

pub fn trade_failed(config: &EngineConfig, outcome: Outcome) -> String {
    let action = match outcome {
        Outcome::Pump => "purchase",
        Outcome::Dump => "sale",
    };
    format!(
        "❌ The {action} of {} failed. The round stays closed.",
        config.demand_symbol
    )
}

pub fn moved(direction: Direction, score: i64) -> String {
    match direction {
        Direction::Pump => format!("📈 PUMP! Current result: {}", signed(score)),
        Direction::Dump => format!("📉 DUMP! Current result: {}", signed(score)),
    }
}

pub fn booster_applied(kind: BoosterKind, applied: i64, score: i64, remaining: u32) -> String {
    format!(
        "🔥 Booster {} applied ({}). Current result: {}. Boosters left: {remaining}.",
        kind.title(),
        signed(applied),
        signed(score),
    )
}

pub fn booster_missing(kind: BoosterKind, nominal: i64, applied: i64, score: i64) -> String {
    format!(
        "⚠️ You have no {} booster. Applied only {} instead of {}. Current result: {}.\n\n\
         Get boosters in the shop: /shop",
        kind.title(),
        signed(applied),
        signed(nominal),
        signed(score),
    )
}

pub fn event_status(active: bool, completing: bool, score: i64, thresholds: Option<Thresholds>) -> String {
    let status = match (active, completing) {
        (true, _) => "🟢 Active",
        (false, true) => "🟡 Completing",
        (false, false) => "🔴 Not active",
    };
    let mut text = format!("📊 Event status\n\nStatus: {status}\nCurrent result: {}", signed(score));
    if let Some(thresholds) = thresholds {
        let _ = write!(
            text,
            "\nThresholds: +{} / -{}",
            thresholds.pump, thresholds.dump
        );
    }
    text
}

pub fn shop() -> String {
    let mut lines = vec![
        "🛒 PUMP/DUMP booster shop".to_string(),
        String::new(),
        "Available items:".to_string(),
    ];
    for kind in BoosterKind::ALL {
        lines.push(format!("• {} — {}⭐", kind.title(), kind.price_stars()));
        lines.push(format!(
            "   Moves the event result once by ±{} with {}/{}.",
            kind.magnitude(),
            kind.id(),
            kind.dump_command()
        ));
        lines.push(String::new());
    }
    lines.push("A booster is spent when its command is used.".to_string());
    lines.join("\n")
}

pub fn inventory(boosters: &[(BoosterKind, u32)]) -> String {
    let mut lines = vec![
        "🎒 Booster inventory".to_string(),
        String::new(),
        "Your boosters:".to_string(),
    ];
    if boosters.is_empty() {
        lines.push("You have no boosters yet.".to_string());
        lines.push(String::new());
        lines.push("Buy some in the shop: /shop".to_string());
    }
    for (kind, count) in boosters {
        lines.push(format!("• {}: {count}", kind.title()));
        lines.push(format!("   Commands: {} / {}", kind.id(), kind.dump_command()));
    }
    lines.join("\n")
}

pub fn granted(kind: BoosterKind, count: u32, total: u32) -> String {
    format!("🎁 Granted {count} × {}. The user now holds {total}.", kind.title())
}

pub const ADMIN_ONLY: &str = "⛔ This command is available to chat admins only.";
pub const ADMINS_CANNOT_PLAY: &str =
    "Admins cannot take part in PUMP or DUMP. Drop the admin role and try again later.";

pub fn error(err: &EngineError) -> String {
    match err {
        EngineError::Validation(err) => validation(err),
        EngineError::Busy => "⏳ The command is being processed, try again in a second...".to_string(),
        EngineError::UserBusy(_) => {
            "⏳ Your previous command is still being processed, please wait...".to_string()
        }
        EngineError::ThresholdTimeout(_) => {
            "❌ Could not start the event: the balance check took too long.".to_string()
        }
    }
}

fn validation(err: &ValidationError) -> String {
    match err {
        ValidationError::AlreadyActive { score } => {
            format!("⚠️ The event is already active! Current result: {}", signed(*score))
        }
        ValidationError::NotActive => {
            "ℹ️ There is no active event right now. Ask an admin to start one with /pumpOrDump."
                .to_string()
        }
        ValidationError::InitialReachesPump { initial, threshold } => format!(
            "❌ Cannot start at {initial}: it reaches the pump threshold ({threshold}). \
             The initial value must be below {threshold}."
        ),
        ValidationError::InitialReachesDump { initial, threshold } => format!(
            "❌ Cannot start at {initial}: it reaches the dump threshold (-{threshold}). \
             The initial value must be above -{threshold}."
        ),
        ValidationError::UnknownBooster(kind) => {
            format!("❓ Unknown booster `{kind}`. See /shop for what is available.")
        }
    }
}
