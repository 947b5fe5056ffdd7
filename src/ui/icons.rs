//! Shared UI icons.
//!
//! Each icon falls back to plain text on terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Release artifacts
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "[BIN]");
pub static UPLOAD: Emoji<'_, '_> = Emoji("☁️  ", "[UP]");
pub static IMAGE: Emoji<'_, '_> = Emoji("💿 ", "[IMG]");
pub static BARRIER: Emoji<'_, '_> = Emoji("🚧 ", "[GATE]");

// Graph progress
pub static WAVE: Emoji<'_, '_> = Emoji("🌊 ", "[W]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
